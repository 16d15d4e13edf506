//! Supervisor vSphere infrastructure CRDs
//!
//! API group `vmware.infrastructure.cluster.x-k8s.io/v1beta1`: the
//! platform-managed variant, where the supervisor owns VM placement and the
//! operator only reconciles clusters and machines. Same kind names as the
//! standalone family, different group.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Condition;

pub const GROUP: &str = "vmware.infrastructure.cluster.x-k8s.io";
pub const VERSION: &str = "v1beta1";

/// Supervisor-managed cluster infrastructure.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vmware.infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereCluster",
    plural = "vsphereclusters",
    status = "VSphereClusterStatus",
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterSpec {
    /// Network provider the supervisor wires pods and services with.
    #[serde(default)]
    pub network_provider: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl VSphereCluster {
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }
}

/// Supervisor-managed machine.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "vmware.infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereMachine",
    plural = "vspheremachines",
    status = "VSphereMachineStatus",
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineSpec {
    /// VM class (t-shirt size) resolved by the supervisor.
    pub class_name: String,

    /// VM image the machine boots from.
    pub image_name: String,

    /// Storage class backing the machine's disks.
    #[serde(default)]
    pub storage_class: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub vm_id: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supervisor_group_differs_from_standalone() {
        assert_ne!(GROUP, crate::crd::infra::GROUP);
        assert_eq!(VERSION, crate::crd::infra::VERSION);
    }

    #[test]
    fn test_machine_spec_camel_case() {
        let json = serde_json::json!({
            "className": "best-effort-small",
            "imageName": "ubuntu-2204",
            "storageClass": "vsan-default"
        });
        let spec: VSphereMachineSpec = serde_json::from_value(json).unwrap();
        assert_eq!(spec.class_name, "best-effort-small");
        assert_eq!(spec.storage_class, "vsan-default");
    }
}
