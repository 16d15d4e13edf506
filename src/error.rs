//! Error types for the vSphere infrastructure operator

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SPBM transport error, propagated unchanged from the HTTP layer
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// Fault returned by the SPBM endpoint for a method invocation
    #[error("SPBM fault in {method}: {message}")]
    SoapFault { method: String, message: String },

    /// Malformed response body from the SPBM endpoint
    #[error("failed to decode SPBM response for {method}: {source}")]
    SoapDecode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// No storage profile with the requested name
    #[error("no pbm profile found with name: {name:?}")]
    ProfileNotFoundByName { name: String },

    /// No storage profile with the requested unique id
    #[error("no pbm profile found with id: {id:?}")]
    ProfileNotFoundById { id: String },

    /// Credentials file could not be parsed
    #[error("invalid credentials file {path}: {reason}")]
    Credentials { path: String, reason: String },

    /// Credentials file watch error
    #[error("credentials watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Webhook server failure
    #[error("webhook server error: {0}")]
    Webhook(String),

    /// Leader election failure
    #[error("leader election error: {0}")]
    LeaderElection(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
