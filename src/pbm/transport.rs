//! Transport seam for the SPBM endpoint.
//!
//! The wire encoding of the remote RPC protocol is owned by whatever client
//! library backs this trait; the typed wrapper in [`crate::pbm`] only builds
//! request bodies and decodes response bodies. Test doubles implement the
//! same trait.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Round-trips one named method invocation against the SPBM endpoint.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    /// Invoke `method` with the serialized request `body`, returning the
    /// decoded response body. Transport failures are returned unchanged.
    async fn round_trip(&self, method: &str, body: Value) -> Result<Value>;
}

/// HTTP-backed transport posting to the fixed SPBM service path.
///
/// The method name travels in the `SOAPAction` header, matching the remote
/// contract; a fault response body is surfaced as [`Error::SoapFault`].
pub struct HttpSoapTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSoapTransport {
    /// Build a transport for a server base URL, e.g. `https://vcenter.local`.
    pub fn new(server_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("vsphere-infra-operator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base = server_url.into();
        Ok(Self {
            client,
            endpoint: format!("{}{}", base.trim_end_matches('/'), super::types::PATH),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    #[instrument(skip(self, body), fields(endpoint = %self.endpoint))]
    async fn round_trip(&self, method: &str, body: Value) -> Result<Value> {
        debug!("invoking {}", method);
        let response = self
            .client
            .post(&self.endpoint)
            .header("SOAPAction", format!("{}:{}", super::types::NAMESPACE, method))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let payload: Value = response.json().await?;
        if let Some(fault) = payload.get("fault").and_then(Value::as_str) {
            return Err(Error::SoapFault {
                method: method.to_string(),
                message: fault.to_string(),
            });
        }
        Ok(payload)
    }
}
