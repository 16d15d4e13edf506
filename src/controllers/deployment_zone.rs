//! VSphereDeploymentZone Controller
//!
//! Marks a zone ready once its referenced failure domain exists with a valid
//! topology and its vCenter endpoint answers.

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
use crate::crd::infra::{ready_condition, VSphereDeploymentZoneStatus, VSphereFailureDomain};
use crate::crd::VSphereDeploymentZone;
use crate::error::{Error, Result};

const CONTROLLER: &str = "vspheredeploymentzone";
const FIELD_MANAGER: &str = "vsphere-infra-operator";

/// Topology levels a failure domain coordinate may map to.
const VALID_COORDINATE_TYPES: &[&str] = &["Datacenter", "ComputeCluster", "HostGroup"];

/// Run the VSphereDeploymentZone controller until shutdown.
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let zones: Api<VSphereDeploymentZone> = Api::all(ctx.client.clone());

    info!("Starting VSphereDeploymentZone controller");

    Controller::new(zones, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(CONTROLLER, res) })
        .await;

    info!("VSphereDeploymentZone controller shutdown complete");
    Ok(())
}

#[instrument(skip(zone, ctx), fields(zone = %zone.name_any()))]
async fn reconcile(
    zone: Arc<VSphereDeploymentZone>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[CONTROLLER]).inc();
    let name = zone.name_any();

    let domains: Api<VSphereFailureDomain> = Api::all(ctx.client.clone());
    let domain = domains.get_opt(&zone.spec.failure_domain).await?;

    let status = match domain {
        None => not_ready(
            "FailureDomainNotFound",
            format!("VSphereFailureDomain {:?} does not exist", zone.spec.failure_domain),
        ),
        Some(domain) => match validate_topology(&domain) {
            Err(reason) => not_ready("InvalidTopology", reason),
            Ok(()) => {
                // Zone readiness also vouches that its vCenter answers.
                let pbm = ctx.pbm_session(&zone.spec.server).await?;
                pbm.ping().await?;
                VSphereDeploymentZoneStatus {
                    ready: true,
                    conditions: vec![ready_condition(true, "Reconciled", "deployment zone ready")],
                }
            }
        },
    };

    let ready = status.ready;
    patch_status(&ctx, &name, status).await?;

    if ready {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

fn not_ready(reason: &str, message: impl Into<String>) -> VSphereDeploymentZoneStatus {
    VSphereDeploymentZoneStatus {
        ready: false,
        conditions: vec![ready_condition(false, reason, message)],
    }
}

/// Check that both coordinates of a failure domain use known object types.
pub fn validate_topology(domain: &VSphereFailureDomain) -> std::result::Result<(), String> {
    for (level, coordinate) in [("region", &domain.spec.region), ("zone", &domain.spec.zone)] {
        if coordinate.name.is_empty() {
            return Err(format!("{} name must not be empty", level));
        }
        if !VALID_COORDINATE_TYPES.contains(&coordinate.r#type.as_str()) {
            return Err(format!(
                "{} type {:?} is not one of {:?}",
                level, coordinate.r#type, VALID_COORDINATE_TYPES
            ));
        }
    }
    Ok(())
}

async fn patch_status(
    ctx: &ControllerContext,
    name: &str,
    status: VSphereDeploymentZoneStatus,
) -> Result<()> {
    let zones: Api<VSphereDeploymentZone> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": status });
    zones
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(
    _zone: Arc<VSphereDeploymentZone>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    RECONCILE_ERRORS.with_label_values(&[CONTROLLER]).inc();
    tracing::error!("VSphereDeploymentZone reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
