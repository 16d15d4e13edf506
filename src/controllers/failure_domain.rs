//! VSphereFailureDomain Controller
//!
//! Marks a failure domain ready once its region/zone coordinates name valid
//! vCenter object types. Deployment zones referencing the domain pick the
//! readiness up on their next pass.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::ResourceExt;
use tracing::{info, instrument};

use super::{
    deployment_zone::validate_topology, log_reconcile_result, shutdown_signal, ControllerContext,
    DEFAULT_REQUEUE, ERROR_REQUEUE, RECONCILE_ERRORS, RECONCILE_TOTAL, WAIT_REQUEUE,
};
use crate::crd::infra::{ready_condition, VSphereFailureDomainStatus};
use crate::crd::VSphereFailureDomain;
use crate::error::{Error, Result};

const CONTROLLER: &str = "vspherefailuredomain";
const FIELD_MANAGER: &str = "vsphere-infra-operator";

/// Run the VSphereFailureDomain controller until shutdown.
pub async fn run(ctx: Arc<ControllerContext>) -> Result<()> {
    let domains: Api<VSphereFailureDomain> = Api::all(ctx.client.clone());

    info!("Starting VSphereFailureDomain controller");

    Controller::new(domains, Config::default())
        .with_config(
            kube::runtime::controller::Config::default()
                .concurrency(ctx.max_concurrent_reconciles),
        )
        .graceful_shutdown_on(shutdown_signal(&ctx.shutdown))
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move { log_reconcile_result(CONTROLLER, res) })
        .await;

    info!("VSphereFailureDomain controller shutdown complete");
    Ok(())
}

#[instrument(skip(domain, ctx), fields(domain = %domain.name_any()))]
async fn reconcile(
    domain: Arc<VSphereFailureDomain>,
    ctx: Arc<ControllerContext>,
) -> std::result::Result<Action, Error> {
    RECONCILE_TOTAL.with_label_values(&[CONTROLLER]).inc();
    let name = domain.name_any();

    let status = domain_status(&domain);
    let ready = status.ready;
    patch_status(&ctx, &name, status).await?;

    if ready {
        Ok(Action::requeue(DEFAULT_REQUEUE))
    } else {
        Ok(Action::requeue(WAIT_REQUEUE))
    }
}

/// Readiness derived purely from the domain's topology coordinates.
pub fn domain_status(domain: &VSphereFailureDomain) -> VSphereFailureDomainStatus {
    match validate_topology(domain) {
        Ok(()) => VSphereFailureDomainStatus {
            ready: true,
            conditions: vec![ready_condition(true, "Reconciled", "failure domain ready")],
        },
        Err(reason) => VSphereFailureDomainStatus {
            ready: false,
            conditions: vec![ready_condition(false, "InvalidTopology", reason)],
        },
    }
}

async fn patch_status(
    ctx: &ControllerContext,
    name: &str,
    status: VSphereFailureDomainStatus,
) -> Result<()> {
    let domains: Api<VSphereFailureDomain> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": status });
    domains
        .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

fn error_policy(
    _domain: Arc<VSphereFailureDomain>,
    error: &Error,
    _ctx: Arc<ControllerContext>,
) -> Action {
    RECONCILE_ERRORS.with_label_values(&[CONTROLLER]).inc();
    tracing::error!("VSphereFailureDomain reconciliation error: {}", error);
    Action::requeue(ERROR_REQUEUE)
}
