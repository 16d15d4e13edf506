//! CRD presence probing.
//!
//! At startup the manager asks API discovery whether each controller
//! family's CRDs are deployed. A missing group or kind is a normal
//! skip-this-family condition; any other discovery failure aborts startup.

use kube::Client;
use tracing::debug;

use crate::error::Result;

/// Check whether `kind` of `group/version` is served by the API server.
///
/// Returns `Ok(false)` when the group or kind is simply not there; every
/// other discovery error is returned to the caller unchanged.
pub async fn crd_deployed(client: &Client, group: &str, version: &str, kind: &str) -> Result<bool> {
    match kube::discovery::group(client, group).await {
        Ok(apigroup) => {
            let present = apigroup
                .versioned_resources(version)
                .iter()
                .any(|(resource, _)| resource.kind == kind);
            debug!(
                "discovery: {}/{} {} present={}",
                group, version, kind, present
            );
            Ok(present)
        }
        Err(err) if is_not_found(&err) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// True when the error is the API server saying "no such group".
fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "discovery failed".to_string(),
            reason: if code == 404 {
                "NotFound".to_string()
            } else {
                "InternalError".to_string()
            },
            code,
        })
    }

    #[test]
    fn test_not_found_is_a_skip() {
        assert!(is_not_found(&api_error(404)));
    }

    #[test]
    fn test_other_discovery_errors_are_fatal() {
        assert!(!is_not_found(&api_error(500)));
        assert!(!is_not_found(&api_error(403)));
    }
}
