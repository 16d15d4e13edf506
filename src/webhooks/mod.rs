//! Validating admission webhooks.
//!
//! One TLS endpoint per standalone kind. The API server posts an
//! `AdmissionReview`; the handler decodes the embedded object, runs the pure
//! rule from [`validators`], and answers with an allow or deny response.
//! Readiness reporting flips to OK only after the listener is bound.

pub mod validators;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warp::{reply, Filter, Reply};

use crate::crd::infra::{
    VSphereClusterTemplate, VSphereDeploymentZone, VSphereFailureDomain, VSphereMachine,
    VSphereMachineTemplate, VSphereVM,
};
use crate::error::{Error, Result};

pub const CLUSTER_TEMPLATE_PATH: &str =
    "validate-infrastructure-cluster-x-k8s-io-v1beta1-vsphereclustertemplate";
pub const MACHINE_PATH: &str = "validate-infrastructure-cluster-x-k8s-io-v1beta1-vspheremachine";
pub const MACHINE_TEMPLATE_PATH: &str =
    "validate-infrastructure-cluster-x-k8s-io-v1beta1-vspheremachinetemplate";
pub const VM_PATH: &str = "validate-infrastructure-cluster-x-k8s-io-v1beta1-vspherevm";
pub const DEPLOYMENT_ZONE_PATH: &str =
    "validate-infrastructure-cluster-x-k8s-io-v1beta1-vspheredeploymentzone";
pub const FAILURE_DOMAIN_PATH: &str =
    "validate-infrastructure-cluster-x-k8s-io-v1beta1-vspherefailuredomain";

/// Flag the health endpoint consults for readiness.
pub type StartedFlag = Arc<AtomicBool>;

/// Serve the admission endpoints over TLS until `cancel` fires.
///
/// `started` flips to true once the listener is bound; certificate files are
/// expected at `<cert_dir>/tls.crt` and `<cert_dir>/tls.key`.
pub async fn run(
    port: u16,
    cert_dir: &Path,
    started: StartedFlag,
    cancel: CancellationToken,
) -> Result<()> {
    let cert_path = cert_dir.join("tls.crt");
    let key_path = cert_dir.join("tls.key");
    for path in [&cert_path, &key_path] {
        if !path.exists() {
            return Err(Error::Webhook(format!(
                "webhook certificate file {:?} does not exist",
                path
            )));
        }
    }

    let (addr, server) = warp::serve(routes())
        .tls()
        .cert_path(&cert_path)
        .key_path(&key_path)
        .bind_with_graceful_shutdown(([0, 0, 0, 0], port), cancel.cancelled_owned());

    started.store(true, Ordering::SeqCst);
    info!("Webhook server listening on {}", addr);

    server.await;
    info!("Webhook server shutdown complete");
    Ok(())
}

fn routes() -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    let cluster_template = warp::path(CLUSTER_TEMPLATE_PATH)
        .and(warp::body::json())
        .map(|review: AdmissionReview<DynamicObject>| {
            review_handler::<VSphereClusterTemplate, _>(review, validators::validate_cluster_template)
        });
    let machine_template = warp::path(MACHINE_TEMPLATE_PATH)
        .and(warp::body::json())
        .map(|review: AdmissionReview<DynamicObject>| {
            review_handler::<VSphereMachineTemplate, _>(review, validators::validate_machine_template)
        });
    let machine = warp::path(MACHINE_PATH)
        .and(warp::body::json())
        .map(|review: AdmissionReview<DynamicObject>| {
            review_handler::<VSphereMachine, _>(review, validators::validate_machine)
        });
    let vm = warp::path(VM_PATH)
        .and(warp::body::json())
        .map(|review: AdmissionReview<DynamicObject>| {
            review_handler::<VSphereVM, _>(review, validators::validate_vm)
        });
    let zone = warp::path(DEPLOYMENT_ZONE_PATH)
        .and(warp::body::json())
        .map(|review: AdmissionReview<DynamicObject>| {
            review_handler::<VSphereDeploymentZone, _>(review, validators::validate_deployment_zone)
        });
    let failure_domain = warp::path(FAILURE_DOMAIN_PATH)
        .and(warp::body::json())
        .map(|review: AdmissionReview<DynamicObject>| {
            review_handler::<VSphereFailureDomain, _>(review, validators::validate_failure_domain)
        });

    warp::post().and(
        cluster_template
            .or(machine)
            .or(machine_template)
            .or(vm)
            .or(zone)
            .or(failure_domain),
    )
}

/// Turn one review into a response, running `validate` on the decoded object.
fn review_handler<T, F>(review: AdmissionReview<DynamicObject>, validate: F) -> reply::Json
where
    T: DeserializeOwned,
    F: Fn(Option<&T>, &T) -> validators::Verdict,
{
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(err) => {
            warn!("invalid admission review: {}", err);
            return reply::json(&AdmissionResponse::invalid(err.to_string()).into_review());
        }
    };

    let response = AdmissionResponse::from(&request);
    let response = match &request.object {
        // DELETE reviews carry no object; nothing to validate.
        None => response,
        Some(object) => match decode_pair::<T>(request.old_object.as_ref(), object) {
            Err(reason) => {
                warn!("admission object decode failed: {}", reason);
                AdmissionResponse::invalid(reason)
            }
            Ok((old, new)) => match validate(old.as_ref(), &new) {
                Ok(()) => response,
                Err(reason) => response.deny(reason),
            },
        },
    };
    reply::json(&response.into_review())
}

fn decode_pair<T: DeserializeOwned>(
    old: Option<&DynamicObject>,
    new: &DynamicObject,
) -> std::result::Result<(Option<T>, T), String> {
    let new = decode::<T>(new)?;
    let old = old.map(decode::<T>).transpose()?;
    Ok((old, new))
}

fn decode<T: DeserializeOwned>(obj: &DynamicObject) -> std::result::Result<T, String> {
    let value = serde_json::to_value(obj).map_err(|e| e.to_string())?;
    serde_json::from_value(value).map_err(|e| format!("object does not match schema: {}", e))
}

/// Certificate directory default matching the deployment manifests.
pub fn default_cert_dir() -> PathBuf {
    PathBuf::from("/tmp/k8s-webhook-server/serving-certs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::admission::Operation;

    fn review(kind: &str, spec: serde_json::Value, old_spec: Option<serde_json::Value>) -> AdmissionReview<DynamicObject> {
        let object = |spec: &serde_json::Value| {
            serde_json::json!({
                "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta1",
                "kind": kind,
                "metadata": { "name": "obj-1", "namespace": "default" },
                "spec": spec,
            })
        };
        let review = serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-4ca8-972a-fb5b0c5052cd",
                "kind": { "group": "infrastructure.cluster.x-k8s.io", "version": "v1beta1", "kind": kind },
                "resource": { "group": "infrastructure.cluster.x-k8s.io", "version": "v1beta1", "resource": "tests" },
                "operation": if old_spec.is_some() { "UPDATE" } else { "CREATE" },
                "userInfo": {},
                "object": object(&spec),
                "oldObject": old_spec.as_ref().map(object),
            }
        });
        serde_json::from_value(review).unwrap()
    }

    // reply::Json cannot be inspected directly; tests go through the
    // decode + validate pipeline the handler uses.

    #[test]
    fn test_review_decodes_into_typed_request() {
        let review = review(
            "VSphereMachine",
            serde_json::json!({ "template": "ubuntu-2204" }),
            None,
        );
        let request: AdmissionRequest<DynamicObject> = review.try_into().unwrap();
        assert_eq!(request.operation, Operation::Create);

        let (old, new) =
            decode_pair::<VSphereMachine>(request.old_object.as_ref(), request.object.as_ref().unwrap())
                .unwrap();
        assert!(old.is_none());
        assert_eq!(new.spec.template, "ubuntu-2204");
    }

    #[test]
    fn test_update_review_carries_old_object() {
        let review = review(
            "VSphereMachine",
            serde_json::json!({ "template": "ubuntu-2204" }),
            Some(serde_json::json!({ "template": "ubuntu-2004" })),
        );
        let request: AdmissionRequest<DynamicObject> = review.try_into().unwrap();
        let (old, new) =
            decode_pair::<VSphereMachine>(request.old_object.as_ref(), request.object.as_ref().unwrap())
                .unwrap();

        let verdict = validators::validate_machine(old.as_ref(), &new);
        assert!(verdict.unwrap_err().contains("immutable"));
    }

    #[test]
    fn test_machine_template_review_decodes_and_validates() {
        let review = review(
            "VSphereMachineTemplate",
            serde_json::json!({ "template": { "spec": { "template": "ubuntu-2204" } } }),
            Some(serde_json::json!({ "template": { "spec": { "template": "ubuntu-2004" } } })),
        );
        let request: AdmissionRequest<DynamicObject> = review.try_into().unwrap();
        let (old, new) = decode_pair::<VSphereMachineTemplate>(
            request.old_object.as_ref(),
            request.object.as_ref().unwrap(),
        )
        .unwrap();

        let verdict = validators::validate_machine_template(old.as_ref(), &new);
        assert!(verdict.unwrap_err().contains("immutable"));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let review = review(
            "VSphereMachine",
            serde_json::json!({ "template": 42 }),
            None,
        );
        let request: AdmissionRequest<DynamicObject> = review.try_into().unwrap();
        let result = decode_pair::<VSphereMachine>(None, request.object.as_ref().unwrap());
        assert!(result.is_err());
    }
}
