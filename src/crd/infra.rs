//! Standalone vSphere infrastructure CRDs
//!
//! API group `infrastructure.cluster.x-k8s.io/v1beta1`: the variant deployed
//! when the operator manages vSphere directly (clusters, machines, VMs,
//! deployment zones, failure domains).

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{Condition, ConditionStatus};

pub const GROUP: &str = "infrastructure.cluster.x-k8s.io";
pub const VERSION: &str = "v1beta1";

// =============================================================================
// VSphereCluster
// =============================================================================

/// VSphereCluster is the infrastructure backing for one workload cluster.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereCluster",
    plural = "vsphereclusters",
    shortname = "vsc",
    status = "VSphereClusterStatus",
    printcolumn = r#"{"name": "Server", "type": "string", "jsonPath": ".spec.server"}"#,
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterSpec {
    /// vCenter server the cluster's infrastructure lives on.
    pub server: String,

    /// SHA-256 thumbprint pinning the server certificate. Empty means the
    /// system trust store decides.
    #[serde(default)]
    pub thumbprint: String,

    /// Endpoint the cluster's control plane is reachable at.
    #[serde(default)]
    pub control_plane_endpoint: Option<ApiEndpoint>,

    /// Secret holding the vCenter credentials for this cluster.
    #[serde(default)]
    pub identity_ref: Option<IdentityRef>,
}

/// Host/port pair for the control plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub host: String,
    #[serde(default)]
    pub port: i32,
}

impl ApiEndpoint {
    /// An endpoint is usable once both host and port are set.
    pub fn is_set(&self) -> bool {
        !self.host.is_empty() && self.port != 0
    }
}

/// Reference to the secret carrying vCenter credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    pub kind: String,
    pub name: String,
}

/// Observed state of a VSphereCluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterStatus {
    #[serde(default)]
    pub ready: bool,

    /// Failure domains discovered for this cluster, keyed by name.
    #[serde(default)]
    pub failure_domains: BTreeMap<String, bool>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl VSphereCluster {
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }
}

/// VSphereClusterTemplate captures a reusable cluster spec referenced by
/// ClusterClass definitions.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereClusterTemplate",
    plural = "vsphereclustertemplates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterTemplateSpec {
    pub template: VSphereClusterTemplateResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereClusterTemplateResource {
    pub spec: VSphereClusterSpec,
}

// =============================================================================
// VSphereMachine
// =============================================================================

/// VSphereMachine describes one machine's desired virtual hardware.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereMachine",
    plural = "vspheremachines",
    shortname = "vsm",
    status = "VSphereMachineStatus",
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineSpec {
    /// Source template the VM is cloned from.
    pub template: String,

    /// Datastore the VM's disks are placed on. Empty defers to the storage
    /// policy's placement decision.
    #[serde(default)]
    pub datastore: String,

    /// Storage policy (by name) resolved against the SPBM endpoint.
    #[serde(default)]
    pub storage_policy_name: String,

    #[serde(default = "default_num_cpus")]
    pub num_cpus: i32,

    #[serde(default = "default_memory_mib")]
    pub memory_mib: i64,

    #[serde(default = "default_disk_gib")]
    pub disk_gib: i32,

    /// Networks the VM attaches to, in device order.
    #[serde(default)]
    pub networks: Vec<String>,
}

/// Observed state of a VSphereMachine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineStatus {
    #[serde(default)]
    pub ready: bool,

    /// Addresses reported by the guest.
    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

fn default_num_cpus() -> i32 {
    2
}

fn default_memory_mib() -> i64 {
    4096
}

fn default_disk_gib() -> i32 {
    20
}

impl VSphereMachine {
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }

    /// Whether the machine requests SPBM-managed placement.
    pub fn uses_storage_policy(&self) -> bool {
        !self.spec.storage_policy_name.is_empty()
    }
}

/// VSphereMachineTemplate captures a reusable machine spec stamped out by
/// MachineDeployments.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereMachineTemplate",
    plural = "vspheremachinetemplates",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineTemplateSpec {
    pub template: VSphereMachineTemplateResource,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereMachineTemplateResource {
    pub spec: VSphereMachineSpec,
}

// =============================================================================
// VSphereVM
// =============================================================================

/// VSphereVM tracks one virtual machine's lifecycle on the hypervisor.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereVM",
    plural = "vspherevms",
    status = "VSphereVMStatus",
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereVMSpec {
    /// vCenter server the VM is created on.
    #[serde(default)]
    pub server: String,

    pub template: String,

    #[serde(default)]
    pub datastore: String,

    #[serde(default)]
    pub storage_policy_name: String,

    #[serde(default = "default_num_cpus")]
    pub num_cpus: i32,

    #[serde(default = "default_memory_mib")]
    pub memory_mib: i64,

    /// Power off before delete instead of a guest shutdown.
    #[serde(default)]
    pub hard_power_off: bool,
}

/// Observed state of a VSphereVM.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereVMStatus {
    #[serde(default)]
    pub ready: bool,

    /// Lifecycle state reported by the VM service.
    #[serde(default)]
    pub state: VirtualMachineState,

    /// BIOS UUID assigned by the hypervisor once the VM exists.
    #[serde(default)]
    pub bios_uuid: Option<String>,

    #[serde(default)]
    pub addresses: Vec<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Lifecycle states of a hypervisor-side virtual machine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum VirtualMachineState {
    /// No state observed yet.
    #[default]
    NotFound,
    /// Create/clone has been issued but is not finished.
    Pending,
    /// The VM exists and is powered on.
    Ready,
    /// Deletion has been issued; the VM still exists.
    Deleting,
}

impl std::fmt::Display for VirtualMachineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VirtualMachineState::NotFound => write!(f, "NotFound"),
            VirtualMachineState::Pending => write!(f, "Pending"),
            VirtualMachineState::Ready => write!(f, "Ready"),
            VirtualMachineState::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Snapshot of one hypervisor VM, as returned by the VM service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VirtualMachine {
    pub name: String,
    pub bios_uuid: Option<String>,
    pub state: VirtualMachineState,
    pub addresses: Vec<String>,
}

// =============================================================================
// VSphereDeploymentZone / VSphereFailureDomain
// =============================================================================

/// VSphereDeploymentZone binds a failure domain to placement constraints.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereDeploymentZone",
    plural = "vspheredeploymentzones",
    status = "VSphereDeploymentZoneStatus",
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereDeploymentZoneSpec {
    pub server: String,

    /// Name of the VSphereFailureDomain this zone deploys into.
    pub failure_domain: String,

    /// Whether control plane machines may land in this zone.
    #[serde(default = "default_true")]
    pub control_plane: bool,

    #[serde(default)]
    pub placement_constraint: PlacementConstraint,
}

/// Resource pool / folder constraints for a zone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlacementConstraint {
    #[serde(default)]
    pub resource_pool: String,
    #[serde(default)]
    pub folder: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereDeploymentZoneStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

fn default_true() -> bool {
    true
}

/// VSphereFailureDomain names a region/zone pair in vCenter topology.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "VSphereFailureDomain",
    plural = "vspherefailuredomains",
    status = "VSphereFailureDomainStatus",
    printcolumn = r#"{"name": "Ready", "type": "boolean", "jsonPath": ".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VSphereFailureDomainSpec {
    pub region: FailureDomainCoordinate,
    pub zone: FailureDomainCoordinate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VSphereFailureDomainStatus {
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// One level of the topology: which vCenter object type and tag name it maps to.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainCoordinate {
    /// Datacenter, ComputeCluster or HostGroup.
    pub r#type: String,
    pub name: String,
}

// =============================================================================
// Condition helpers
// =============================================================================

/// Build a Ready condition in the shape status patches use.
pub fn ready_condition(ready: bool, reason: &str, message: impl Into<String>) -> Condition {
    Condition {
        r#type: "Ready".to_string(),
        status: if ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        },
        last_transition_time: Some(chrono::Utc::now()),
        reason: Some(reason.to_string()),
        message: Some(message.into()),
    }
}
