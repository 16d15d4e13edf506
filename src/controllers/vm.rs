//! VSphereVM Controller
//!
//! Drives hypervisor-side VMs through the [`VmService`] port and publishes
//! the observed machine state on the VSphereVM status. Objects carrying a
//! deletion timestamp are torn down and requeued until the hypervisor
//! reports the VM gone.

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
    ready_condition, VSphereCluster, VSphereVM, VSphereVMStatus, VirtualMachine,
    VirtualMachineState,
};
use crate::error::{Error, Result};
use crate::services::{VmContext, VmService};

const CONTROLLER: &str = "vspherevm";
const FIELD_MANAGER: &str = "vsphere-infra-operator";

/// Run the VSphereVM controller until shutdown.
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let vms: Api<VSphereVM> = ctx.api();

    info!("Starting VSphereVM controller");

    Controller::new(vms, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(CONTROLLER, res) })
        .await;

    info!("VSphereVM controller shutdown complete");
    Ok(())
}

#[instrument(skip(vm, ctx), fields(vm = %vm.name_any()))]
async fn reconcile(
    vm: Arc<VSphereVM>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[CONTROLLER]).inc();
    let name = vm.name_any();
    let namespace = vm.namespace().unwrap_or_default();

    let server = resolve_server(&ctx, &vm, &namespace).await?;
    let service_ctx = VmContext::new((*vm).clone(), server);

    if vm.metadata.deletion_timestamp.is_some() {
        let (outcome, observed) = ctx.vm_service.destroy_vm(&service_ctx).await?;
        debug!("destroy observed state {} for {}", observed.state, name);
        patch_status(&ctx, &name, &namespace, status_from_observed(&observed)).await?;
        return Ok(match outcome.requeue_after {
            Some(after) => Action::requeue(after),
            None => Action::await_change(),
        });
    }

    let observed = ctx.vm_service.reconcile_vm(&service_ctx).await?;
    debug!("observed state {} for {}", observed.state, name);
    let status = status_from_observed(&observed);
    let ready = status.ready;
    patch_status(&ctx, &name, &namespace, status).await?;

    if ready {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

/// The server the VM lives on: its own spec, or the namespace's cluster.
async fn resolve_server(
    ctx: &ControllerContext,
    vm: &VSphereVM,
    namespace: &str,
) -> Result<String> {
    if !vm.spec.server.is_empty() {
        return Ok(vm.spec.server.clone());
    }
    let clusters: Api<VSphereCluster> = Api::namespaced(ctx.client.clone(), namespace);
    let cluster_list = clusters.list(&ListParams::default().limit(1)).await?;
    cluster_list
        .items
        .into_iter()
        .next()
        .map(|c| c.spec.server)
        .ok_or_else(|| {
            Error::Config(format!(
                "VSphereVM {}/{} names no server and no VSphereCluster exists in its namespace",
                namespace,
                vm.name_any()
            ))
        })
}

/// VSphereVM status derived from one observed hypervisor state.
fn status_from_observed(observed: &VirtualMachine) -> VSphereVMStatus {
    let ready = observed.state == VirtualMachineState::Ready;
    let condition = match observed.state {
        VirtualMachineState::Ready => ready_condition(true, "Reconciled", "VM is powered on"),
        VirtualMachineState::Pending => {
            ready_condition(false, "Provisioning", "VM clone in progress")
        }
        VirtualMachineState::Deleting => ready_condition(false, "Deleting", "VM is being removed"),
        VirtualMachineState::NotFound => {
            ready_condition(false, "NotFound", "VM does not exist on the hypervisor")
        }
    };
    VSphereVMStatus {
        ready,
        state: observed.state,
        bios_uuid: observed.bios_uuid.clone(),
        addresses: observed.addresses.clone(),
        conditions: vec![condition],
    }
}

async fn patch_status(
    ctx: &ControllerContext,
    name: &str,
    namespace: &str,
    status: VSphereVMStatus,
) -> Result<()> {
    let vms: Api<VSphereVM> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    vms.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(_vm: Arc<VSphereVM>, error: &Error, _ctx: Arc<ControllerContext>) -> Action {
    RECONCILE_ERRORS.with_label_values(&[CONTROLLER]).inc();
    tracing::error!("VSphereVM reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
