//! VSphereMachine Controller
//!
//! Resolves the machine's storage policy against the SPBM endpoint and
//! mirrors the state of the backing VSphereVM into the machine status.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::{
    log_reconcile_result, shutdown_signal, ControllerContext, DEFAULT_REQUEUE, ERROR_REQUEUE,
    RECONCILE_ERRORS, RECONCILE_TOTAL, WAIT_REQUEUE,
};
use crate::crd::infra::{
    ready_condition, VSphereCluster, VSphereMachine, VSphereMachineStatus, VSphereVM,
};
use crate::error::{Error, Result};

const CONTROLLER: &str = "vspheremachine";
const FIELD_MANAGER: &str = "vsphere-infra-operator";

/// Run the VSphereMachine controller until shutdown.
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let machines: Api<VSphereMachine> = ctx.api();

    info!("Starting VSphereMachine controller");

    Controller::new(machines, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(CONTROLLER, res) })
        .await;

    info!("VSphereMachine controller shutdown complete");
    Ok(())
}

#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
async fn reconcile(
    machine: Arc<VSphereMachine>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[CONTROLLER]).inc();
    let name = machine.name_any();
    let namespace = machine.namespace().unwrap_or_default();

    // The owning cluster carries the vCenter server for this namespace.
    let clusters: Api<VSphereCluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let cluster_list = clusters.list(&ListParams::default().limit(1)).await?;
    let Some(cluster) = cluster_list.items.into_iter().next() else {
        debug!("no VSphereCluster in namespace {}, waiting", namespace);
        patch_status(
            &ctx,
            &name,
            &namespace,
            VSphereMachineStatus {
                ready: false,
                conditions: vec![ready_condition(
                    false,
                    "WaitingForCluster",
                    "no VSphereCluster in namespace",
                )],
                ..Default::default()
            },
        )
        .await?;
        return Ok(Action::requeue(WAIT_REQUEUE));
    };

    if machine.uses_storage_policy() {
        let pbm = ctx.pbm_session(&cluster.spec.server).await?;
        match pbm
            .profile_id_by_name(&machine.spec.storage_policy_name)
            .await
        {
            Ok(profile_id) => debug!(
                "storage policy {:?} resolved to {}",
                machine.spec.storage_policy_name, profile_id
            ),
            Err(err @ Error::ProfileNotFoundByName { .. }) => {
                patch_status(
                    &ctx,
                    &name,
                    &namespace,
                    VSphereMachineStatus {
                        ready: false,
                        conditions: vec![ready_condition(
                            false,
                            "StoragePolicyNotFound",
                            err.to_string(),
                        )],
                        ..Default::default()
                    },
                )
                .await?;
                return Err(err);
            }
            Err(err) => return Err(err),
        }
    }

    let vms: Api<VSphereVM> = Api::namespaced(ctx.client.clone(), &namespace);
    let vm = vms.get_opt(&name).await?;
    let status = status_from_vm(vm.as_ref());
    let ready = status.ready;
    patch_status(&ctx, &name, &namespace, status).await?;

    if ready {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

/// Machine status derived from the backing VM, if one exists yet.
fn status_from_vm(vm: Option<&VSphereVM>) -> VSphereMachineStatus {
    let vm_status = vm.and_then(|v| v.status.as_ref());
    let ready = vm_status.map(|s| s.ready).unwrap_or(false);
    let addresses = vm_status.map(|s| s.addresses.clone()).unwrap_or_default();

    let condition = if ready {
        ready_condition(true, "Reconciled", "backing VM is ready")
    } else if vm.is_some() {
        ready_condition(false, "WaitingForVM", "backing VM is not ready")
    } else {
        ready_condition(false, "WaitingForVM", "backing VM does not exist yet")
    };

    VSphereMachineStatus {
        ready,
        addresses,
        conditions: vec![condition],
    }
}

async fn patch_status(
    ctx: &ControllerContext,
    name: &str,
    namespace: &str,
    status: VSphereMachineStatus,
) -> Result<()> {
    let machines: Api<VSphereMachine> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    machines
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(
    _machine: Arc<VSphereMachine>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    RECONCILE_ERRORS.with_label_values(&[CONTROLLER]).inc();
    tracing::error!("VSphereMachine reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::infra::{VSphereVMSpec, VSphereVMStatus, VirtualMachineState};
    use crate::crd::ConditionStatus;

    fn vm(ready: bool, addresses: Vec<&str>) -> VSphereVM {
        let mut vm = VSphereVM::new(
            "m1",
            serde_json::from_value::<VSphereVMSpec>(serde_json::json!({ "template": "t" }))
                .unwrap(),
        );
        vm.status = Some(VSphereVMStatus {
            ready,
            state: if ready {
                VirtualMachineState::Ready
            } else {
                VirtualMachineState::Pending
            },
            bios_uuid: None,
            addresses: addresses.into_iter().map(String::from).collect(),
            conditions: vec![],
        });
        vm
    }

    #[test]
    fn test_status_without_vm_is_not_ready() {
        let status = status_from_vm(None);
        assert!(!status.ready);
        assert!(status.addresses.is_empty());
        assert_eq!(status.conditions[0].status, ConditionStatus::False);
        assert_eq!(status.conditions[0].reason.as_deref(), Some("WaitingForVM"));
    }

    #[test]
    fn test_status_mirrors_ready_vm() {
        let vm = vm(true, vec!["10.0.0.7"]);
        let status = status_from_vm(Some(&vm));
        assert!(status.ready);
        assert_eq!(status.addresses, vec!["10.0.0.7".to_string()]);
        assert_eq!(status.conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn test_status_with_pending_vm_is_not_ready() {
        let vm = vm(false, vec![]);
        let status = status_from_vm(Some(&vm));
        assert!(!status.ready);
        assert_eq!(status.conditions[0].reason.as_deref(), Some("WaitingForVM"));
    }
}
