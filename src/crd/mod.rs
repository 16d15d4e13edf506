//! Custom Resource Definitions
//!
//! Two alternative CRD families: the standalone variant
//! (`infrastructure.cluster.x-k8s.io`) and the supervisor variant
//! (`vmware.infrastructure.cluster.x-k8s.io`). The manager probes API
//! discovery at startup and registers controllers only for the families
//! actually deployed.

pub mod infra;
pub mod supervisor;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// Cluster/machine kinds exist in both families; access them by module path.
pub use infra::{
    ready_condition, VSphereDeploymentZone, VSphereDeploymentZoneSpec, VSphereFailureDomain,
    VSphereFailureDomainSpec, VSphereVM, VSphereVMSpec, VSphereVMStatus, VirtualMachine,
    VirtualMachineState,
};

/// Condition attached to a resource status.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,

    /// Status: True, False, or Unknown
    pub status: ConditionStatus,

    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<DateTime<Utc>>,

    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Condition status values
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_serializes() {
        let condition = Condition {
            r#type: "Ready".to_string(),
            status: ConditionStatus::True,
            last_transition_time: None,
            reason: Some("Reconciled".to_string()),
            message: None,
        };

        let json = serde_json::to_string(&condition).unwrap();
        assert!(json.contains("\"type\":\"Ready\""));
        assert!(json.contains("\"status\":\"True\""));
    }
}
