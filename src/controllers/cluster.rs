//! VSphereCluster Controller
//!
//! Establishes the SPBM session for the cluster's vCenter, mirrors the ready
//! deployment zones into the cluster's failure domain map, and reports
//! readiness once the control plane endpoint is set.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use tracing::{info, instrument};

use super::{
    log_reconcile_result, shutdown_signal, ControllerContext, DEFAULT_REQUEUE, ERROR_REQUEUE,
    RECONCILE_ERRORS, RECONCILE_TOTAL, WAIT_REQUEUE,
};
use crate::crd::infra::{ready_condition, VSphereCluster, VSphereClusterStatus};
use crate::crd::VSphereDeploymentZone;
use crate::error::{Error, Result};

const CONTROLLER: &str = "vspherecluster";
const FIELD_MANAGER: &str = "vsphere-infra-operator";

/// Run the VSphereCluster controller until shutdown.
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let clusters: Api<VSphereCluster> = ctx.api();

    info!("Starting VSphereCluster controller");

    Controller::new(clusters, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(CONTROLLER, res) })
        .await;

    info!("VSphereCluster controller shutdown complete");
    Ok(())
}

#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
async fn reconcile(
    cluster: Arc<VSphereCluster>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[CONTROLLER]).inc();
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    // A reachable SPBM endpoint is a precondition for machine placement.
    if let Err(err) = ctx.pbm_session(&cluster.spec.server).await {
        patch_status(
            &ctx,
            &name,
            &namespace,
            VSphereClusterStatus {
                ready: false,
                conditions: vec![ready_condition(
                    false,
                    "VCenterUnreachable",
                    err.to_string(),
                )],
                ..Default::default()
            },
        )
        .await?;
        return Err(err);
    }

    let failure_domains = discover_failure_domains(&ctx, &cluster.spec.server).await?;

    let endpoint_set = cluster
        .spec
        .control_plane_endpoint
        .as_ref()
        .map(|e| e.is_set())
        .unwrap_or(false);

    let status = if endpoint_set {
        VSphereClusterStatus {
            ready: true,
            failure_domains,
            conditions: vec![ready_condition(true, "Reconciled", "cluster infrastructure ready")],
        }
    } else {
        VSphereClusterStatus {
            ready: false,
            failure_domains,
            conditions: vec![ready_condition(
                false,
                "WaitingForEndpoint",
                "control plane endpoint is not set",
            )],
        }
    };
    patch_status(&ctx, &name, &namespace, status).await?;

    if endpoint_set {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

/// Failure domains offered by ready deployment zones on the same server,
/// keyed by zone name with their control plane eligibility.
async fn discover_failure_domains(
    ctx: &ControllerContext,
    server: &str,
) -> Result<BTreeMap<String, bool>> {
    let zones: Api<VSphereDeploymentZone> = Api::all(ctx.client.clone());
    let list = zones.list(&ListParams::default()).await?;
    Ok(collect_failure_domains(&list.items, server))
}

fn collect_failure_domains(
    zones: &[VSphereDeploymentZone],
    server: &str,
) -> BTreeMap<String, bool> {
    zones
        .iter()
        .filter(|z| z.spec.server == server)
        .filter(|z| z.status.as_ref().map(|s| s.ready).unwrap_or(false))
        .map(|z| (z.name_any(), z.spec.control_plane))
        .collect()
}

async fn patch_status(
    ctx: &ControllerContext,
    name: &str,
    namespace: &str,
    status: VSphereClusterStatus,
) -> Result<()> {
    let clusters: Api<VSphereCluster> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    clusters
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(
    _cluster: Arc<VSphereCluster>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    RECONCILE_ERRORS.with_label_values(&[CONTROLLER]).inc();
    tracing::error!("VSphereCluster reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
