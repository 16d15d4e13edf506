//! Supervisor-mode controllers
//!
//! In supervisor mode the platform owns VM placement; these reconcilers only
//! track readiness of the supervisor-family cluster and machine objects.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use tracing::{info, instrument};

use super::{
    log_reconcile_result, shutdown_signal, ControllerContext, DEFAULT_REQUEUE, ERROR_REQUEUE,
    RECONCILE_ERRORS, RECONCILE_TOTAL, WAIT_REQUEUE,
};
use crate::crd::supervisor::{
    VSphereCluster, VSphereClusterStatus, VSphereMachine, VSphereMachineStatus,
};
use crate::crd::{Condition, ConditionStatus};
use crate::error::{Error, Result};

const CLUSTER_CONTROLLER: &str = "supervisor-vspherecluster";
const MACHINE_CONTROLLER: &str = "supervisor-vspheremachine";
const FIELD_MANAGER: &str = "vsphere-infra-operator";

/// Run the supervisor VSphereCluster controller until shutdown.
pub async fn run_cluster(ctx: Arc<ControllerContext>) -> Result<()> {
    let clusters: Api<VSphereCluster> = ctx.api();

    info!("Starting supervisor VSphereCluster controller");

    Controller::new(clusters, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile_cluster, cluster_error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(CLUSTER_CONTROLLER, res) })
        .await;

    info!("Supervisor VSphereCluster controller shutdown complete");
    Ok(())
}

/// Run the supervisor VSphereMachine controller until shutdown.
pub async fn run_machine(ctx: Arc<ControllerContext>) -> Result<()> {
    let machines: Api<VSphereMachine> = ctx.api();

    info!("Starting supervisor VSphereMachine controller");

    Controller::new(machines, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile_machine, machine_error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(MACHINE_CONTROLLER, res) })
        .await;

    info!("Supervisor VSphereMachine controller shutdown complete");
    Ok(())
}

#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
async fn reconcile_cluster(
    cluster: Arc<VSphereCluster>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[CLUSTER_CONTROLLER]).inc();
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let status = cluster_status(&cluster);
    let ready = status.ready;

    let clusters: Api<VSphereCluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({ "status": status });
    clusters
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    if ready {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
async fn reconcile_machine(
    machine: Arc<VSphereMachine>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[MACHINE_CONTROLLER]).inc();
    let name = machine.name_any();
    let namespace = machine.namespace().unwrap_or_default();

    let status = machine_status(&machine);
    let ready = status.ready;

    let machines: Api<VSphereMachine> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({ "status": status });
    machines
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    if ready {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

/// A supervisor cluster is ready once a network provider is configured.
fn cluster_status(cluster: &VSphereCluster) -> VSphereClusterStatus {
    let ready = !cluster.spec.network_provider.is_empty();
    VSphereClusterStatus {
        ready,
        conditions: vec![condition(
            ready,
            if ready { "Reconciled" } else { "WaitingForNetworkProvider" },
            if ready {
                "supervisor cluster ready".to_string()
            } else {
                "no network provider configured".to_string()
            },
        )],
    }
}

/// A supervisor machine is ready once the platform has bound a VM to it.
fn machine_status(machine: &VSphereMachine) -> VSphereMachineStatus {
    let vm_id = machine.status.as_ref().and_then(|s| s.vm_id.clone());
    let ready = vm_id.is_some();
    VSphereMachineStatus {
        ready,
        vm_id,
        conditions: vec![condition(
            ready,
            if ready { "Reconciled" } else { "WaitingForVM" },
            if ready {
                "supervisor has bound a VM".to_string()
            } else {
                "supervisor has not bound a VM yet".to_string()
            },
        )],
    }
}

fn condition(ready: bool, reason: &str, message: String) -> Condition {
    Condition {
        r#type: "Ready".to_string(),
        status: if ready {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        },
        last_transition_time: Some(chrono::Utc::now()),
        reason: Some(reason.to_string()),
        message: Some(message),
    }
}

fn cluster_error_policy(
    _cluster: Arc<VSphereCluster>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    RECONCILE_ERRORS.with_label_values(&[CLUSTER_CONTROLLER]).inc();
    tracing::error!("supervisor VSphereCluster reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}

fn machine_error_policy(
    _machine: Arc<VSphereMachine>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    RECONCILE_ERRORS.with_label_values(&[MACHINE_CONTROLLER]).inc();
    tracing::error!("supervisor VSphereMachine reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
