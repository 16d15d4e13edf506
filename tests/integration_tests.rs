//! Integration tests
//!
//! Exercise the crate through its public API: the SPBM client over a stub
//! transport, the VM service port with its recording fake, the admission
//! rules, and the manager option surface.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use vsphere_infra_operator::crd::infra::{
    VSphereMachine, VSphereMachineSpec, VSphereVM, VSphereVMSpec,
};
use vsphere_infra_operator::crd::{VirtualMachine, VirtualMachineState};
use vsphere_infra_operator::error::{Error, Result};
use vsphere_infra_operator::pbm::transport::SoapTransport;
use vsphere_infra_operator::pbm::types::{
    PbmPlacementHub, PbmPlacementRequirement, PbmProfileCategoryEnum, PbmProfileId,
    PbmProfileResourceType,
};
use vsphere_infra_operator::pbm::PbmClient;
use vsphere_infra_operator::services::fake::{FakeVmService, RecordedCall};
use vsphere_infra_operator::services::{ReconcileOutcome, VmContext, VmService};
use vsphere_infra_operator::webhooks::validators;
use vsphere_infra_operator::ManagerOptions;

// =============================================================================
// Shared fixtures
// =============================================================================

struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value>>>,
}

impl ScriptedTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
        })
    }

    fn push_ok(&self, returnval: Value) {
        self.responses
            .lock()
            .push_back(Ok(json!({ "returnval": returnval })));
    }
}

#[async_trait]
impl SoapTransport for ScriptedTransport {
    async fn round_trip(&self, method: &str, _body: Value) -> Result<Value> {
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected call to {}", method))
    }
}

async fn connected_client(transport: &Arc<ScriptedTransport>) -> PbmClient {
    transport.push_ok(json!({
        "profileManager": { "type": "PbmProfileProfileManager", "value": "ProfileManager" },
        "placementSolver": { "type": "PbmPlacementSolver", "value": "placementSolver" },
        "complianceManager": { "type": "PbmComplianceManager", "value": "complianceManager" }
    }));
    PbmClient::connect(transport.clone()).await.unwrap()
}

fn machine(template: &str) -> VSphereMachine {
    VSphereMachine::new(
        "m1",
        serde_json::from_value::<VSphereMachineSpec>(json!({ "template": template })).unwrap(),
    )
}

fn vm(name: &str) -> VSphereVM {
    let mut vm = VSphereVM::new(
        name,
        serde_json::from_value::<VSphereVMSpec>(json!({ "template": "ubuntu-2204" })).unwrap(),
    );
    vm.metadata.name = Some(name.to_string());
    vm
}

// =============================================================================
// SPBM client
// =============================================================================

#[tokio::test]
async fn pbm_profile_lookup_round_trip() {
    let transport = ScriptedTransport::new();
    let client = connected_client(&transport).await;

    transport.push_ok(json!([{ "uniqueId": "pbm-1" }, { "uniqueId": "pbm-2" }]));
    transport.push_ok(json!([
        { "profileId": { "uniqueId": "pbm-1" }, "name": "silver" },
        { "profileId": { "uniqueId": "pbm-2" }, "name": "gold" }
    ]));
    assert_eq!(client.profile_id_by_name("gold").await.unwrap(), "pbm-2");

    transport.push_ok(json!([{ "uniqueId": "pbm-1" }]));
    transport.push_ok(json!([
        { "profileId": { "uniqueId": "pbm-1" }, "name": "silver" }
    ]));
    let err = client.profile_id_by_name("platinum").await.unwrap_err();
    assert_eq!(err.to_string(), "no pbm profile found with name: \"platinum\"");
}

#[tokio::test]
async fn pbm_placement_check_partitions_candidates() {
    let transport = ScriptedTransport::new();
    let client = connected_client(&transport).await;

    transport.push_ok(json!([
        { "hub": { "hubType": "Datastore", "hubId": "ds-1" }, "error": [] },
        { "hub": { "hubType": "Datastore", "hubId": "ds-2" },
          "error": [{ "message": "out of capacity" }] }
    ]));

    let result = client
        .check_requirements(
            vec![
                PbmPlacementHub::datastore("ds-1"),
                PbmPlacementHub::datastore("ds-2"),
            ],
            None,
            vec![PbmPlacementRequirement::profile(PbmProfileId::new("pbm-1"))],
        )
        .await
        .unwrap();

    assert_eq!(result.compatible_hubs(), vec![PbmPlacementHub::datastore("ds-1")]);
    assert_eq!(
        result.non_compatible_hubs(),
        vec![PbmPlacementHub::datastore("ds-2")]
    );
}

#[tokio::test]
async fn pbm_query_profile_returns_requirement_ids() {
    let transport = ScriptedTransport::new();
    let client = connected_client(&transport).await;

    transport.push_ok(json!([{ "uniqueId": "pbm-7" }]));
    let ids = client
        .query_profile(
            PbmProfileResourceType::storage(),
            PbmProfileCategoryEnum::Requirement,
        )
        .await
        .unwrap();
    assert_eq!(ids, vec![PbmProfileId::new("pbm-7")]);
}

// =============================================================================
// VM service port
// =============================================================================

#[tokio::test]
async fn fake_vm_service_replays_a_lifecycle() {
    let fake = FakeVmService::new();
    fake.on_reconcile(Ok(VirtualMachine {
        name: "node-0".to_string(),
        bios_uuid: None,
        state: VirtualMachineState::Pending,
        addresses: vec![],
    }));
    fake.on_reconcile(Ok(VirtualMachine {
        name: "node-0".to_string(),
        bios_uuid: Some("4203ec7f".to_string()),
        state: VirtualMachineState::Ready,
        addresses: vec!["10.0.0.4".to_string()],
    }));
    fake.on_destroy(Ok((
        ReconcileOutcome::requeue(Duration::from_secs(10)),
        VirtualMachine {
            name: "node-0".to_string(),
            bios_uuid: Some("4203ec7f".to_string()),
            state: VirtualMachineState::Deleting,
            addresses: vec![],
        },
    )));

    let ctx = VmContext::new(vm("node-0"), "https://vcenter.local");

    let first = fake.reconcile_vm(&ctx).await.unwrap();
    assert_eq!(first.state, VirtualMachineState::Pending);

    let second = fake.reconcile_vm(&ctx).await.unwrap();
    assert_eq!(second.state, VirtualMachineState::Ready);
    assert_eq!(second.addresses, vec!["10.0.0.4".to_string()]);

    let (outcome, observed) = fake.destroy_vm(&ctx).await.unwrap();
    assert_eq!(outcome.requeue_after, Some(Duration::from_secs(10)));
    assert_eq!(observed.state, VirtualMachineState::Deleting);

    let calls = fake.calls();
    assert_eq!(calls.len(), 3);
    assert!(matches!(calls[0], RecordedCall::ReconcileVm { .. }));
    assert!(matches!(calls[2], RecordedCall::DestroyVm { .. }));
}

#[tokio::test]
async fn fake_vm_service_surfaces_programmed_errors() {
    let fake = FakeVmService::new();
    fake.on_reconcile(Err(Error::SoapFault {
        method: "PbmQueryProfile".to_string(),
        message: "NotAuthenticated".to_string(),
    }));

    let ctx = VmContext::new(vm("node-1"), "https://vcenter.local");
    let err = fake.reconcile_vm(&ctx).await.unwrap_err();
    assert!(err.to_string().contains("NotAuthenticated"));
}

// =============================================================================
// Admission rules
// =============================================================================

#[test]
fn admission_rules_enforce_immutability_and_bounds() {
    let old = machine("ubuntu-2004");
    let mut renamed = machine("ubuntu-2204");
    assert!(validators::validate_machine(Some(&old), &renamed)
        .unwrap_err()
        .contains("immutable"));

    renamed.spec.template = old.spec.template.clone();
    assert!(validators::validate_machine(Some(&old), &renamed).is_ok());

    let mut tiny = machine("ubuntu-2204");
    tiny.spec.memory_mib = 128;
    assert!(validators::validate_machine(None, &tiny).is_err());
}

// =============================================================================
// Manager options
// =============================================================================

#[test]
fn manager_defaults_match_deployment_manifests() {
    let opts = ManagerOptions::default();
    assert_eq!(opts.webhook_port, 9443);
    assert_eq!(opts.metrics_bind_addr, "0.0.0.0:8080");
    assert_eq!(opts.health_addr, "0.0.0.0:9440");
    assert!(opts.enable_keep_alive);
    assert_eq!(opts.keep_alive().unwrap(), Duration::from_secs(300));
}
