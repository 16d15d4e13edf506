//! Recording test double for [`VmService`].
//!
//! Calls are recorded with their arguments and answered from pre-programmed
//! result queues in FIFO order. Purely a test fixture; nothing in the
//! production control flow constructs it.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ReconcileOutcome, VmContext, VmService};
use crate::crd::VirtualMachine;
use crate::error::{Error, Result};

/// One recorded invocation.
#[derive(Debug, Clone)]
pub enum RecordedCall {
    ReconcileVm { vm_name: String, server: String },
    DestroyVm { vm_name: String, server: String },
}

#[derive(Default)]
pub struct FakeVmService {
    calls: Mutex<Vec<RecordedCall>>,
    reconcile_results: Mutex<VecDeque<Result<VirtualMachine>>>,
    destroy_results: Mutex<VecDeque<Result<(ReconcileOutcome, VirtualMachine)>>>,
}

impl FakeVmService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `reconcile_vm` call.
    pub fn on_reconcile(&self, result: Result<VirtualMachine>) {
        self.reconcile_results.lock().push_back(result);
    }

    /// Queue the result of the next `destroy_vm` call.
    pub fn on_destroy(&self, result: Result<(ReconcileOutcome, VirtualMachine)>) {
        self.destroy_results.lock().push_back(result);
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl VmService for FakeVmService {
    async fn reconcile_vm(&self, ctx: &VmContext) -> Result<VirtualMachine> {
        self.calls.lock().push(RecordedCall::ReconcileVm {
            vm_name: ctx.vm.metadata.name.clone().unwrap_or_default(),
            server: ctx.server.clone(),
        });
        self.reconcile_results
            .lock()
            .pop_front()
            .unwrap_or_else(|| {
                Err(Error::Internal(
                    "FakeVmService: no reconcile result programmed".to_string(),
                ))
            })
    }

    async fn destroy_vm(&self, ctx: &VmContext) -> Result<(ReconcileOutcome, VirtualMachine)> {
        self.calls.lock().push(RecordedCall::DestroyVm {
            vm_name: ctx.vm.metadata.name.clone().unwrap_or_default(),
            server: ctx.server.clone(),
        });
        self.destroy_results.lock().pop_front().unwrap_or_else(|| {
            Err(Error::Internal(
                "FakeVmService: no destroy result programmed".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{VSphereVM, VirtualMachineState};
    use std::time::Duration;

    fn vm(name: &str) -> VSphereVM {
        let mut vm = VSphereVM::new(
            name,
            serde_json::from_value(serde_json::json!({ "template": "t" })).unwrap(),
        );
        vm.metadata.name = Some(name.to_string());
        vm
    }

    #[tokio::test]
    async fn test_records_calls_and_replays_results() {
        let fake = FakeVmService::new();
        fake.on_reconcile(Ok(VirtualMachine {
            name: "vm-a".to_string(),
            bios_uuid: Some("uuid-a".to_string()),
            state: VirtualMachineState::Ready,
            addresses: vec!["10.0.0.5".to_string()],
        }));

        let ctx = VmContext::new(vm("vm-a"), "https://vcenter.local");
        let machine = fake.reconcile_vm(&ctx).await.unwrap();
        assert_eq!(machine.state, VirtualMachineState::Ready);

        let calls = fake.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0],
            RecordedCall::ReconcileVm { vm_name, server }
                if vm_name == "vm-a" && server == "https://vcenter.local"
        ));
    }

    #[tokio::test]
    async fn test_destroy_returns_programmed_triplet() {
        let fake = FakeVmService::new();
        fake.on_destroy(Ok((
            ReconcileOutcome::requeue(Duration::from_secs(10)),
            VirtualMachine {
                name: "vm-b".to_string(),
                bios_uuid: None,
                state: VirtualMachineState::Deleting,
                addresses: vec![],
            },
        )));

        let ctx = VmContext::new(vm("vm-b"), "https://vcenter.local");
        let (outcome, machine) = fake.destroy_vm(&ctx).await.unwrap();
        assert_eq!(outcome.requeue_after, Some(Duration::from_secs(10)));
        assert_eq!(machine.state, VirtualMachineState::Deleting);
        assert_eq!(fake.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unprogrammed_call_is_an_error() {
        let fake = FakeVmService::new();
        let ctx = VmContext::new(vm("vm-c"), "https://vcenter.local");
        assert!(fake.reconcile_vm(&ctx).await.is_err());
    }
}
