//! Data-transfer types for the storage-policy-based-management (SPBM) API.
//!
//! These shapes mirror the remote service's object model one to one. The
//! operator never mutates or persists them; they are built, sent, and the
//! responses handed back to the caller unchanged.

use serde::{Deserialize, Serialize};

/// Service namespace identifier for the SPBM endpoint.
pub const NAMESPACE: &str = "pbm";

/// Fixed service endpoint path.
pub const PATH: &str = "/pbm";

/// Reference to a managed object on the remote endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedObjectReference {
    #[serde(rename = "type")]
    pub r#type: String,
    pub value: String,
}

impl ManagedObjectReference {
    pub fn new(r#type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            value: value.into(),
        }
    }
}

/// The well-known SPBM service instance reference.
pub fn service_instance() -> ManagedObjectReference {
    ManagedObjectReference::new("PbmServiceInstance", "ServiceInstance")
}

/// Content of the SPBM service instance: the manager references every
/// operation is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmServiceInstanceContent {
    pub profile_manager: ManagedObjectReference,
    pub placement_solver: ManagedObjectReference,
    pub compliance_manager: ManagedObjectReference,
}

/// Unique identifier of a storage profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmProfileId {
    pub unique_id: String,
}

impl PbmProfileId {
    pub fn new(unique_id: impl Into<String>) -> Self {
        Self {
            unique_id: unique_id.into(),
        }
    }
}

/// Resource types a profile can apply to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbmProfileResourceTypeEnum {
    #[serde(rename = "STORAGE")]
    Storage,
}

/// Resource type wrapper carried in query requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmProfileResourceType {
    pub resource_type: PbmProfileResourceTypeEnum,
}

impl PbmProfileResourceType {
    pub fn storage() -> Self {
        Self {
            resource_type: PbmProfileResourceTypeEnum::Storage,
        }
    }
}

/// Profile categories defined by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbmProfileCategoryEnum {
    #[serde(rename = "REQUIREMENT")]
    Requirement,
    #[serde(rename = "RESOURCE")]
    Resource,
    #[serde(rename = "DATA_SERVICE_POLICY")]
    DataServicePolicy,
}

impl PbmProfileCategoryEnum {
    pub fn as_str(&self) -> &'static str {
        match self {
            PbmProfileCategoryEnum::Requirement => "REQUIREMENT",
            PbmProfileCategoryEnum::Resource => "RESOURCE",
            PbmProfileCategoryEnum::DataServicePolicy => "DATA_SERVICE_POLICY",
        }
    }
}

/// A storage profile as retrieved from the profile manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmProfile {
    pub profile_id: PbmProfileId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Candidate placement target (a datastore or datastore cluster).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmPlacementHub {
    pub hub_type: String,
    pub hub_id: String,
}

impl PbmPlacementHub {
    pub fn datastore(id: impl Into<String>) -> Self {
        Self {
            hub_type: "Datastore".to_string(),
            hub_id: id.into(),
        }
    }
}

/// A single requirement checked against candidate hubs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmPlacementRequirement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<PbmProfileId>,
}

impl PbmPlacementRequirement {
    pub fn profile(id: PbmProfileId) -> Self {
        Self {
            profile_id: Some(id),
        }
    }
}

/// Error entry attached to an incompatible placement result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmPlacementError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Compatibility verdict for one candidate hub. An empty `error` list means
/// the hub satisfies the requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmPlacementCompatibilityResult {
    pub hub: PbmPlacementHub,
    #[serde(default)]
    pub error: Vec<PbmPlacementError>,
}

/// Reference to a server-side object (virtual machine, disk, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmServerObjectRef {
    pub object_type: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_uuid: Option<String>,
}

/// Spec for creating a capability-based profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmCapabilityProfileCreateSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub resource_type: PbmProfileResourceType,
    pub category: PbmProfileCategoryEnum,
    #[serde(default)]
    pub constraints: serde_json::Value,
}

/// Spec for updating an existing capability-based profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmCapabilityProfileUpdateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub constraints: serde_json::Value,
}

/// Outcome of one profile deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmProfileOperationOutcome {
    pub profile_id: PbmProfileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Profiles associated with one queried entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmQueryProfileResult {
    pub object: PbmServerObjectRef,
    #[serde(default)]
    pub profile_id: Vec<PbmProfileId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
}

/// Capability metadata grouped by category.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmCapabilityMetadataPerCategory {
    pub sub_category: String,
    #[serde(default)]
    pub capability_metadata: Vec<serde_json::Value>,
}

/// Compliance verdict for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmComplianceResult {
    pub entity: PbmServerObjectRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<PbmProfileId>,
}

/// I/O filter types defined by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PbmIofilterType {
    #[serde(rename = "ENCRYPTION")]
    Encryption,
    #[serde(rename = "COMPRESSION")]
    Compression,
    #[serde(rename = "CACHE")]
    Cache,
    #[serde(rename = "REPLICATION")]
    Replication,
    #[serde(rename = "DATAPROVIDER")]
    DataProvider,
    #[serde(rename = "DATASTOREIOCONTROL")]
    DatastoreIoControl,
}

/// Information about one I/O filter attached to a profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmIofilterInfo {
    pub vib_id: String,
    pub filter_type: PbmIofilterType,
}

/// Mapping from a profile id to its I/O filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PbmProfileToIofilterMap {
    pub key: PbmProfileId,
    #[serde(default)]
    pub iofilters: Vec<PbmIofilterInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_instance_reference() {
        let moref = service_instance();
        assert_eq!(moref.r#type, "PbmServiceInstance");
        assert_eq!(moref.value, "ServiceInstance");
    }

    #[test]
    fn test_category_wire_names() {
        assert_eq!(
            serde_json::to_string(&PbmProfileCategoryEnum::Requirement).unwrap(),
            "\"REQUIREMENT\""
        );
        assert_eq!(
            serde_json::to_string(&PbmProfileCategoryEnum::DataServicePolicy).unwrap(),
            "\"DATA_SERVICE_POLICY\""
        );
        assert_eq!(PbmProfileCategoryEnum::Requirement.as_str(), "REQUIREMENT");
    }

    #[test]
    fn test_resource_type_wire_name() {
        let rtype = PbmProfileResourceType::storage();
        let json = serde_json::to_value(&rtype).unwrap();
        assert_eq!(json["resourceType"], "STORAGE");
    }

    #[test]
    fn test_iofilter_type_round_trip() {
        let json = serde_json::to_string(&PbmIofilterType::Encryption).unwrap();
        assert_eq!(json, "\"ENCRYPTION\"");
        let back: PbmIofilterType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PbmIofilterType::Encryption);
    }

    #[test]
    fn test_compatibility_result_default_error_list() {
        let json = serde_json::json!({
            "hub": { "hubType": "Datastore", "hubId": "ds-1" }
        });
        let res: PbmPlacementCompatibilityResult = serde_json::from_value(json).unwrap();
        assert!(res.error.is_empty());
        assert_eq!(res.hub, PbmPlacementHub::datastore("ds-1"));
    }
}
