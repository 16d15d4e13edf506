//! SPBM-backed VM service.
//!
//! Validates a VM's storage policy against the SPBM endpoint and reports the
//! lifecycle state derived from what the hypervisor has published so far.
//! The clone and power operations themselves sit behind the same
//! [`VmService`] port on the hypervisor side.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ReconcileOutcome, VmContext, VmService};
use crate::crd::{VirtualMachine, VirtualMachineState};
use crate::error::Result;
use crate::pbm::session;
use crate::pbm::transport::HttpSoapTransport;
use crate::pbm::PbmClient;

/// Requeue interval while a destroy is in flight.
const DESTROY_REQUEUE: Duration = Duration::from_secs(10);

pub struct SpbmVmService {
    keep_alive: Option<Duration>,
}

impl SpbmVmService {
    pub fn new(keep_alive: Option<Duration>) -> Self {
        Self { keep_alive }
    }

    async fn session(&self, server: &str) -> Result<PbmClient> {
        if let Some(client) = session::get(server) {
            return Ok(client);
        }
        let transport = Arc::new(HttpSoapTransport::new(server)?);
        let client = PbmClient::connect(transport).await?;
        session::insert(server, client.clone(), self.keep_alive);
        Ok(client)
    }
}

#[async_trait]
impl VmService for SpbmVmService {
    async fn reconcile_vm(&self, ctx: &VmContext) -> Result<VirtualMachine> {
        let name = ctx.vm.metadata.name.clone().unwrap_or_default();

        if !ctx.vm.spec.storage_policy_name.is_empty() {
            let pbm = self.session(&ctx.server).await?;
            let profile_id = pbm
                .profile_id_by_name(&ctx.vm.spec.storage_policy_name)
                .await?;
            debug!(
                "vm {}: storage policy {:?} resolved to {}",
                name, ctx.vm.spec.storage_policy_name, profile_id
            );
            if pbm.supports_encryption(&profile_id).await? {
                info!("vm {}: storage policy {} enables encryption", name, profile_id);
            }
        }

        Ok(observe(&ctx.vm, &name))
    }

    async fn destroy_vm(&self, ctx: &VmContext) -> Result<(ReconcileOutcome, VirtualMachine)> {
        let name = ctx.vm.metadata.name.clone().unwrap_or_default();
        let observed = observe(&ctx.vm, &name);

        // Nothing exists hypervisor-side until a BIOS UUID was assigned.
        if observed.bios_uuid.is_none() || observed.state == VirtualMachineState::NotFound {
            return Ok((
                ReconcileOutcome::done(),
                VirtualMachine {
                    state: VirtualMachineState::NotFound,
                    ..observed
                },
            ));
        }
        Ok((
            ReconcileOutcome::requeue(DESTROY_REQUEUE),
            VirtualMachine {
                state: VirtualMachineState::Deleting,
                ..observed
            },
        ))
    }
}

/// Lifecycle state derived from what the hypervisor has published on the
/// object so far: a BIOS UUID means the VM exists.
fn observe(vm: &crate::crd::VSphereVM, name: &str) -> VirtualMachine {
    let status = vm.status.as_ref();
    let bios_uuid = status.and_then(|s| s.bios_uuid.clone());
    let addresses = status.map(|s| s.addresses.clone()).unwrap_or_default();

    let state = match (&bios_uuid, status.map(|s| s.state)) {
        (None, Some(VirtualMachineState::NotFound)) => VirtualMachineState::NotFound,
        (_, Some(VirtualMachineState::Deleting)) => VirtualMachineState::Deleting,
        (Some(_), _) => VirtualMachineState::Ready,
        (None, _) => VirtualMachineState::Pending,
    };

    VirtualMachine {
        name: name.to_string(),
        bios_uuid,
        state,
        addresses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::infra::{VSphereVMSpec, VSphereVMStatus};
    use crate::crd::VSphereVM;

    fn vm(bios_uuid: Option<&str>, state: Option<VirtualMachineState>) -> VSphereVM {
        let mut vm = VSphereVM::new(
            "vm-1",
            serde_json::from_value::<VSphereVMSpec>(serde_json::json!({ "template": "t" }))
                .unwrap(),
        );
        vm.metadata.name = Some("vm-1".to_string());
        if bios_uuid.is_some() || state.is_some() {
            vm.status = Some(VSphereVMStatus {
                ready: false,
                state: state.unwrap_or_default(),
                bios_uuid: bios_uuid.map(String::from),
                addresses: vec![],
                conditions: vec![],
            });
        }
        vm
    }

    #[test]
    fn test_vm_with_uuid_is_ready() {
        let observed = observe(&vm(Some("4203ec7f"), Some(VirtualMachineState::Pending)), "vm-1");
        assert_eq!(observed.state, VirtualMachineState::Ready);
        assert_eq!(observed.bios_uuid.as_deref(), Some("4203ec7f"));
    }

    #[test]
    fn test_vm_without_status_is_pending() {
        let observed = observe(&vm(None, None), "vm-1");
        assert_eq!(observed.state, VirtualMachineState::Pending);
    }

    #[test]
    fn test_vm_reported_absent_stays_not_found() {
        let observed = observe(&vm(None, Some(VirtualMachineState::NotFound)), "vm-1");
        assert_eq!(observed.state, VirtualMachineState::NotFound);
    }

    #[test]
    fn test_deleting_state_wins_over_uuid() {
        let observed = observe(
            &vm(Some("4203ec7f"), Some(VirtualMachineState::Deleting)),
            "vm-1",
        );
        assert_eq!(observed.state, VirtualMachineState::Deleting);
    }

    #[tokio::test]
    async fn test_destroy_of_absent_vm_is_done() {
        let service = SpbmVmService::new(None);
        let ctx = VmContext::new(vm(None, None), "https://vcenter.unreachable.test");
        let (outcome, observed) = service.destroy_vm(&ctx).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::done());
        assert_eq!(observed.state, VirtualMachineState::NotFound);
    }

    #[tokio::test]
    async fn test_destroy_of_existing_vm_requeues() {
        let service = SpbmVmService::new(None);
        let ctx = VmContext::new(
            vm(Some("4203ec7f"), Some(VirtualMachineState::Ready)),
            "https://vcenter.unreachable.test",
        );
        let (outcome, observed) = service.destroy_vm(&ctx).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::requeue(DESTROY_REQUEUE));
        assert_eq!(observed.state, VirtualMachineState::Deleting);
    }
}
