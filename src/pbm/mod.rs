//! Typed client for the storage-policy-based-management (SPBM) endpoint.
//!
//! Each remote operation is a one-to-one call: build a request value
//! addressed to the service content's manager reference, invoke the method
//! through the transport, return the result or propagate the error verbatim.
//! The derived name/id lookups are linear scans over the retrieved profile
//! list; profile counts are small and infrequently polled, so no cache sits
//! in front of them.

pub mod session;
pub mod transport;
pub mod types;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use transport::SoapTransport;
use types::*;

/// Client bound to one SPBM endpoint session.
#[derive(Clone)]
pub struct PbmClient {
    transport: Arc<dyn SoapTransport>,
    service_content: PbmServiceInstanceContent,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveServiceContentRequest {
    this: ManagedObjectReference,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryProfileRequest {
    this: ManagedObjectReference,
    resource_type: PbmProfileResourceType,
    profile_category: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveContentRequest {
    this: ManagedObjectReference,
    profile_ids: Vec<PbmProfileId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckRequirementsRequest {
    this: ManagedObjectReference,
    hubs_to_search: Vec<PbmPlacementHub>,
    #[serde(skip_serializing_if = "Option::is_none")]
    placement_subject_ref: Option<PbmServerObjectRef>,
    placement_subject_requirement: Vec<PbmPlacementRequirement>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRequest {
    this: ManagedObjectReference,
    create_spec: PbmCapabilityProfileCreateSpec,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest {
    this: ManagedObjectReference,
    profile_id: PbmProfileId,
    update_spec: PbmCapabilityProfileUpdateSpec,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest {
    this: ManagedObjectReference,
    profile_id: Vec<PbmProfileId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryAssociatedEntityRequest {
    this: ManagedObjectReference,
    profile: PbmProfileId,
    entity_type: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryAssociatedEntitiesRequest {
    this: ManagedObjectReference,
    profiles: Vec<PbmProfileId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryAssociatedProfileRequest {
    this: ManagedObjectReference,
    entity: PbmServerObjectRef,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryAssociatedProfilesRequest {
    this: ManagedObjectReference,
    entities: Vec<PbmServerObjectRef>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchCapabilityMetadataRequest {
    this: ManagedObjectReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_type: Option<PbmProfileResourceType>,
    vendor_uuid: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchComplianceResultRequest {
    this: ManagedObjectReference,
    entities: Vec<PbmServerObjectRef>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryIoFiltersRequest {
    this: ManagedObjectReference,
    profile_ids: Vec<PbmProfileId>,
}

impl PbmClient {
    /// Connect to the endpoint: retrieve the service content against the
    /// well-known service instance reference.
    pub async fn connect(transport: Arc<dyn SoapTransport>) -> Result<Self> {
        let req = RetrieveServiceContentRequest {
            this: service_instance(),
        };
        let body = serde_json::to_value(&req)
            .map_err(|e| Error::Internal(format!("request encode failed: {}", e)))?;
        let res = transport.round_trip("PbmRetrieveServiceContent", body).await?;
        let service_content = decode("PbmRetrieveServiceContent", res)?;
        Ok(Self {
            transport,
            service_content,
        })
    }

    /// The service content retrieved at connect time.
    pub fn service_content(&self) -> &PbmServiceInstanceContent {
        &self.service_content
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: &impl Serialize,
    ) -> Result<T> {
        let body = serde_json::to_value(request)
            .map_err(|e| Error::Internal(format!("request encode failed: {}", e)))?;
        let res = self.transport.round_trip(method, body).await?;
        decode(method, res)
    }

    /// Query profile identifiers by resource type and category.
    pub async fn query_profile(
        &self,
        resource_type: PbmProfileResourceType,
        category: PbmProfileCategoryEnum,
    ) -> Result<Vec<PbmProfileId>> {
        self.call(
            "PbmQueryProfile",
            &QueryProfileRequest {
                this: self.service_content.profile_manager.clone(),
                resource_type,
                profile_category: category.as_str().to_string(),
            },
        )
        .await
    }

    /// Retrieve the full profile content for a set of identifiers.
    pub async fn retrieve_content(&self, ids: Vec<PbmProfileId>) -> Result<Vec<PbmProfile>> {
        self.call(
            "PbmRetrieveContent",
            &RetrieveContentRequest {
                this: self.service_content.profile_manager.clone(),
                profile_ids: ids,
            },
        )
        .await
    }

    /// Check placement requirements against candidate hubs.
    pub async fn check_requirements(
        &self,
        hubs: Vec<PbmPlacementHub>,
        subject_ref: Option<PbmServerObjectRef>,
        requirements: Vec<PbmPlacementRequirement>,
    ) -> Result<PlacementCompatibilityResult> {
        let results: Vec<PbmPlacementCompatibilityResult> = self
            .call(
                "PbmCheckRequirements",
                &CheckRequirementsRequest {
                    this: self.service_content.placement_solver.clone(),
                    hubs_to_search: hubs,
                    placement_subject_ref: subject_ref,
                    placement_subject_requirement: requirements,
                },
            )
            .await?;
        Ok(PlacementCompatibilityResult(results))
    }

    /// Create a capability-based profile, returning its identifier.
    pub async fn create_profile(
        &self,
        create_spec: PbmCapabilityProfileCreateSpec,
    ) -> Result<PbmProfileId> {
        self.call(
            "PbmCreate",
            &CreateRequest {
                this: self.service_content.profile_manager.clone(),
                create_spec,
            },
        )
        .await
    }

    /// Update an existing profile in place.
    pub async fn update_profile(
        &self,
        id: PbmProfileId,
        update_spec: PbmCapabilityProfileUpdateSpec,
    ) -> Result<()> {
        let body = serde_json::to_value(&UpdateRequest {
            this: self.service_content.profile_manager.clone(),
            profile_id: id,
            update_spec,
        })
        .map_err(|e| Error::Internal(format!("request encode failed: {}", e)))?;
        self.transport.round_trip("PbmUpdate", body).await?;
        Ok(())
    }

    /// Delete profiles, returning the per-profile outcomes.
    pub async fn delete_profile(
        &self,
        ids: Vec<PbmProfileId>,
    ) -> Result<Vec<PbmProfileOperationOutcome>> {
        self.call(
            "PbmDelete",
            &DeleteRequest {
                this: self.service_content.profile_manager.clone(),
                profile_id: ids,
            },
        )
        .await
    }

    /// Entities of `entity_type` associated with one profile.
    pub async fn query_associated_entity(
        &self,
        id: PbmProfileId,
        entity_type: &str,
    ) -> Result<Vec<PbmServerObjectRef>> {
        self.call(
            "PbmQueryAssociatedEntity",
            &QueryAssociatedEntityRequest {
                this: self.service_content.profile_manager.clone(),
                profile: id,
                entity_type: entity_type.to_string(),
            },
        )
        .await
    }

    /// Entities associated with each of several profiles.
    pub async fn query_associated_entities(
        &self,
        ids: Vec<PbmProfileId>,
    ) -> Result<Vec<PbmQueryProfileResult>> {
        self.call(
            "PbmQueryAssociatedEntities",
            &QueryAssociatedEntitiesRequest {
                this: self.service_content.profile_manager.clone(),
                profiles: ids,
            },
        )
        .await
    }

    /// Profiles associated with one entity.
    pub async fn query_associated_profile(
        &self,
        entity: PbmServerObjectRef,
    ) -> Result<Vec<PbmProfileId>> {
        self.call(
            "PbmQueryAssociatedProfile",
            &QueryAssociatedProfileRequest {
                this: self.service_content.profile_manager.clone(),
                entity,
            },
        )
        .await
    }

    /// Profiles associated with each of several entities.
    pub async fn query_associated_profiles(
        &self,
        entities: Vec<PbmServerObjectRef>,
    ) -> Result<Vec<PbmQueryProfileResult>> {
        self.call(
            "PbmQueryAssociatedProfiles",
            &QueryAssociatedProfilesRequest {
                this: self.service_content.profile_manager.clone(),
                entities,
            },
        )
        .await
    }

    /// Capability metadata for a vendor, grouped by category.
    pub async fn fetch_capability_metadata(
        &self,
        resource_type: Option<PbmProfileResourceType>,
        vendor_uuid: &str,
    ) -> Result<Vec<PbmCapabilityMetadataPerCategory>> {
        self.call(
            "PbmFetchCapabilityMetadata",
            &FetchCapabilityMetadataRequest {
                this: self.service_content.profile_manager.clone(),
                resource_type,
                vendor_uuid: vendor_uuid.to_string(),
            },
        )
        .await
    }

    /// Compliance results for a set of entities.
    pub async fn fetch_compliance_result(
        &self,
        entities: Vec<PbmServerObjectRef>,
    ) -> Result<Vec<PbmComplianceResult>> {
        self.call(
            "PbmFetchComplianceResult",
            &FetchComplianceResultRequest {
                this: self.service_content.compliance_manager.clone(),
                entities,
            },
        )
        .await
    }

    /// I/O filter mappings for one profile identifier.
    pub async fn query_io_filters_from_profile_id(
        &self,
        profile_id: &str,
    ) -> Result<Vec<PbmProfileToIofilterMap>> {
        self.call(
            "PbmQueryIOFiltersFromProfileId",
            &QueryIoFiltersRequest {
                this: self.service_content.profile_manager.clone(),
                profile_ids: vec![PbmProfileId::new(profile_id)],
            },
        )
        .await
    }

    /// Cheap liveness probe: re-fetch the service content and discard it.
    /// Used by the session keep-alive task.
    pub async fn ping(&self) -> Result<()> {
        let body = serde_json::to_value(&RetrieveServiceContentRequest {
            this: service_instance(),
        })
        .map_err(|e| Error::Internal(format!("request encode failed: {}", e)))?;
        self.transport
            .round_trip("PbmRetrieveServiceContent", body)
            .await?;
        Ok(())
    }

    /// Resolve a profile's unique identifier by its human-readable name.
    pub async fn profile_id_by_name(&self, profile_name: &str) -> Result<String> {
        let ids = self
            .query_profile(
                PbmProfileResourceType::storage(),
                PbmProfileCategoryEnum::Requirement,
            )
            .await?;
        let profiles = self.retrieve_content(ids).await?;

        for profile in &profiles {
            if profile.name == profile_name {
                return Ok(profile.profile_id.unique_id.clone());
            }
        }
        Err(Error::ProfileNotFoundByName {
            name: profile_name.to_string(),
        })
    }

    /// Resolve a profile's human-readable name by its unique identifier.
    pub async fn profile_name_by_id(&self, profile_id: &str) -> Result<String> {
        let ids = self
            .query_profile(
                PbmProfileResourceType::storage(),
                PbmProfileCategoryEnum::Requirement,
            )
            .await?;
        let profiles = self.retrieve_content(ids).await?;

        for profile in &profiles {
            if profile.profile_id.unique_id == profile_id {
                return Ok(profile.name.clone());
            }
        }
        Err(Error::ProfileNotFoundById {
            id: profile_id.to_string(),
        })
    }

    /// Whether the profile carries an encryption I/O filter.
    pub async fn supports_encryption(&self, profile_id: &str) -> Result<bool> {
        let list = self.query_io_filters_from_profile_id(profile_id).await?;
        for map in &list {
            for filter in &map.iofilters {
                if filter.filter_type == PbmIofilterType::Encryption {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

fn decode<T: DeserializeOwned>(method: &'static str, value: Value) -> Result<T> {
    let returnval = value.get("returnval").cloned().unwrap_or(Value::Null);
    serde_json::from_value(returnval).map_err(|e| Error::SoapDecode {
        method: method.to_string(),
        source: e,
    })
}

/// Placement compatibility verdicts for a set of candidate hubs.
#[derive(Debug, Clone)]
pub struct PlacementCompatibilityResult(pub Vec<PbmPlacementCompatibilityResult>);

impl PlacementCompatibilityResult {
    /// Hubs whose result carries no error entries.
    pub fn compatible_hubs(&self) -> Vec<PbmPlacementHub> {
        self.0
            .iter()
            .filter(|res| res.error.is_empty())
            .map(|res| res.hub.clone())
            .collect()
    }

    /// Hubs whose result carries at least one error entry.
    pub fn non_compatible_hubs(&self) -> Vec<PbmPlacementHub> {
        self.0
            .iter()
            .filter(|res| !res.error.is_empty())
            .map(|res| res.hub.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    /// Transport double: records invocations, replays queued responses.
    struct StubTransport {
        calls: Mutex<Vec<(String, Value)>>,
        responses: Mutex<VecDeque<Result<Value>>>,
    }

    impl StubTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                responses: Mutex::new(VecDeque::new()),
            })
        }

        fn push_ok(&self, returnval: Value) {
            self.responses
                .lock()
                .push_back(Ok(serde_json::json!({ "returnval": returnval })));
        }

        fn push_err(&self, err: Error) {
            self.responses.lock().push_back(Err(err));
        }

        fn calls(&self) -> Vec<(String, Value)> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl SoapTransport for StubTransport {
        async fn round_trip(&self, method: &str, body: Value) -> Result<Value> {
            self.calls.lock().push((method.to_string(), body));
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| panic!("unexpected call to {}", method))
        }
    }

    fn service_content_value() -> Value {
        serde_json::json!({
            "profileManager": { "type": "PbmProfileProfileManager", "value": "ProfileManager" },
            "placementSolver": { "type": "PbmPlacementSolver", "value": "placementSolver" },
            "complianceManager": { "type": "PbmComplianceManager", "value": "complianceManager" }
        })
    }

    async fn connected_client(stub: &Arc<StubTransport>) -> PbmClient {
        stub.push_ok(service_content_value());
        PbmClient::connect(stub.clone()).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_retrieves_service_content() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        let calls = stub.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "PbmRetrieveServiceContent");
        assert_eq!(calls[0].1["this"]["type"], "PbmServiceInstance");
        assert_eq!(
            client.service_content().profile_manager.value,
            "ProfileManager"
        );
    }

    #[tokio::test]
    async fn test_query_profile_addresses_profile_manager() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([{ "uniqueId": "pbm-1" }]));
        let ids = client
            .query_profile(
                PbmProfileResourceType::storage(),
                PbmProfileCategoryEnum::Requirement,
            )
            .await
            .unwrap();
        assert_eq!(ids, vec![PbmProfileId::new("pbm-1")]);

        let call = &stub.calls()[1];
        assert_eq!(call.0, "PbmQueryProfile");
        assert_eq!(call.1["this"]["value"], "ProfileManager");
        assert_eq!(call.1["profileCategory"], "REQUIREMENT");
        assert_eq!(call.1["resourceType"]["resourceType"], "STORAGE");
    }

    #[tokio::test]
    async fn test_transport_error_propagates_unchanged() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_err(Error::SoapFault {
            method: "PbmQueryProfile".to_string(),
            message: "NotAuthenticated".to_string(),
        });
        let err = client
            .query_profile(
                PbmProfileResourceType::storage(),
                PbmProfileCategoryEnum::Requirement,
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "SPBM fault in PbmQueryProfile: NotAuthenticated"
        );
    }

    #[tokio::test]
    async fn test_profile_id_by_name_found() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([
            { "uniqueId": "pbm-1" },
            { "uniqueId": "pbm-2" }
        ]));
        stub.push_ok(serde_json::json!([
            { "profileId": { "uniqueId": "pbm-1" }, "name": "silver" },
            { "profileId": { "uniqueId": "pbm-2" }, "name": "gold" }
        ]));

        let id = client.profile_id_by_name("gold").await.unwrap();
        assert_eq!(id, "pbm-2");
    }

    #[tokio::test]
    async fn test_profile_id_by_name_not_found() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([{ "uniqueId": "pbm-1" }]));
        stub.push_ok(serde_json::json!([
            { "profileId": { "uniqueId": "pbm-1" }, "name": "silver" }
        ]));

        let err = client.profile_id_by_name("platinum").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProfileNotFoundByName { ref name } if name == "platinum"
        ));
    }

    #[tokio::test]
    async fn test_profile_name_by_id_found_and_missing() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([{ "uniqueId": "pbm-9" }]));
        stub.push_ok(serde_json::json!([
            { "profileId": { "uniqueId": "pbm-9" }, "name": "bronze" }
        ]));
        assert_eq!(client.profile_name_by_id("pbm-9").await.unwrap(), "bronze");

        stub.push_ok(serde_json::json!([{ "uniqueId": "pbm-9" }]));
        stub.push_ok(serde_json::json!([
            { "profileId": { "uniqueId": "pbm-9" }, "name": "bronze" }
        ]));
        let err = client.profile_name_by_id("pbm-404").await.unwrap_err();
        assert!(matches!(
            err,
            Error::ProfileNotFoundById { ref id } if id == "pbm-404"
        ));
    }

    #[tokio::test]
    async fn test_supports_encryption_true() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([{
            "key": { "uniqueId": "pbm-1" },
            "iofilters": [
                { "vibId": "vib-cache", "filterType": "CACHE" },
                { "vibId": "vib-crypt", "filterType": "ENCRYPTION" }
            ]
        }]));
        assert!(client.supports_encryption("pbm-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_supports_encryption_false_on_non_matching_or_empty() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([{
            "key": { "uniqueId": "pbm-1" },
            "iofilters": [{ "vibId": "vib-cache", "filterType": "CACHE" }]
        }]));
        assert!(!client.supports_encryption("pbm-1").await.unwrap());

        stub.push_ok(serde_json::json!([]));
        assert!(!client.supports_encryption("pbm-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_requirements_partitions_hubs() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([
            { "hub": { "hubType": "Datastore", "hubId": "ds-ok" }, "error": [] },
            { "hub": { "hubType": "Datastore", "hubId": "ds-bad" },
              "error": [{ "message": "capacity" }] },
            { "hub": { "hubType": "Datastore", "hubId": "ds-ok2" } }
        ]));

        let result = client
            .check_requirements(
                vec![
                    PbmPlacementHub::datastore("ds-ok"),
                    PbmPlacementHub::datastore("ds-bad"),
                    PbmPlacementHub::datastore("ds-ok2"),
                ],
                None,
                vec![PbmPlacementRequirement::profile(PbmProfileId::new("pbm-1"))],
            )
            .await
            .unwrap();

        let compatible = result.compatible_hubs();
        let non_compatible = result.non_compatible_hubs();
        assert_eq!(
            compatible,
            vec![
                PbmPlacementHub::datastore("ds-ok"),
                PbmPlacementHub::datastore("ds-ok2")
            ]
        );
        assert_eq!(non_compatible, vec![PbmPlacementHub::datastore("ds-bad")]);
        // Disjoint partition covering the input.
        assert_eq!(compatible.len() + non_compatible.len(), result.len());
        for hub in &compatible {
            assert!(!non_compatible.contains(hub));
        }
    }

    #[tokio::test]
    async fn test_update_profile_has_no_return_value() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(Value::Null);
        client
            .update_profile(
                PbmProfileId::new("pbm-1"),
                PbmCapabilityProfileUpdateSpec {
                    name: Some("renamed".to_string()),
                    description: None,
                    constraints: Value::Null,
                },
            )
            .await
            .unwrap();

        let call = &stub.calls()[1];
        assert_eq!(call.0, "PbmUpdate");
        assert_eq!(call.1["profileId"]["uniqueId"], "pbm-1");
    }

    #[tokio::test]
    async fn test_fetch_compliance_result_addresses_compliance_manager() {
        let stub = StubTransport::new();
        let client = connected_client(&stub).await;

        stub.push_ok(serde_json::json!([{
            "entity": { "objectType": "virtualMachine", "key": "vm-1" },
            "complianceStatus": "compliant"
        }]));
        let results = client
            .fetch_compliance_result(vec![PbmServerObjectRef {
                object_type: "virtualMachine".to_string(),
                key: "vm-1".to_string(),
                server_uuid: None,
            }])
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].compliance_status.as_deref(), Some("compliant"));

        let call = &stub.calls()[1];
        assert_eq!(call.1["this"]["value"], "complianceManager");
    }
}
