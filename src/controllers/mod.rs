//! Reconcilers for both CRD families.
//!
//! One submodule per controller; all of them share [`ControllerContext`].
//! Which controllers actually run is decided by the manager from API
//! discovery.

pub mod cluster;
pub mod deployment_zone;
pub mod failure_domain;
pub mod machine;
pub mod supervisor;
pub mod vm;

use std::sync::Arc;
use std::time::Duration;

use kube::api::Api;
use kube::Client;
use once_cell::sync::Lazy;
use prometheus::{register_int_counter_vec, IntCounterVec};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::error::Result;
use crate::pbm::session;
use crate::pbm::transport::HttpSoapTransport;
use crate::pbm::PbmClient;
use crate::services::VmService;

/// Requeue interval for a successfully reconciled object.
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// Requeue interval while waiting for an upstream object to settle.
pub const WAIT_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue interval after a reconcile error.
pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vsphere_operator_reconcile_total",
        "Total reconciliations per controller",
        &["controller"]
    )
    .expect("reconcile_total metric registration")
});

pub static RECONCILE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "vsphere_operator_reconcile_errors_total",
        "Failed reconciliations per controller",
        &["controller"]
    )
    .expect("reconcile_errors metric registration")
});

/// Shared state handed to every reconciler.
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,

    /// VM lifecycle service driven by the VM controller
    pub vm_service: Arc<dyn VmService>,

    /// Namespace to watch; empty watches everything
    pub namespace: Option<String>,

    /// Upper bound on in-flight reconciles per controller
    pub max_concurrent_reconciles: u16,

    /// Keep-alive interval for SPBM sessions, if enabled
    pub keep_alive: Option<Duration>,

    /// Cancelled when the manager shuts down
    pub shutdown: CancellationToken,
}

impl ControllerContext {
    /// Namespaced or all-namespace Api depending on the watch scope.
    pub fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Cached SPBM session for `server`, establishing one on first use.
    pub async fn pbm_session(&self, server: &str) -> Result<PbmClient> {
        if let Some(client) = session::get(server) {
            return Ok(client);
        }
        let transport = Arc::new(HttpSoapTransport::new(server)?);
        let client = PbmClient::connect(transport).await?;
        session::insert(server, client.clone(), self.keep_alive);
        Ok(client)
    }
}

/// Adapt a [`CancellationToken`] into the future shape the controller
/// builder's graceful shutdown hook accepts.
pub(crate) fn shutdown_signal(
    token: &CancellationToken,
) -> impl std::future::Future<Output = ()> + Send + Sync + 'static {
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let token = token.clone();
    tokio::spawn(async move {
        token.cancelled().await;
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
    }
}

/// Log a stream item the way every controller loop does.
pub(crate) fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Display>(
    controller: &str,
    res: std::result::Result<T, E>,
) {
    match res {
        Ok(o) => tracing::debug!("{}: reconciled {:?}", controller, o),
        Err(e) => error!("{}: reconcile failed: {}", controller, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requeue_intervals_are_ordered() {
        assert!(WAIT_REQUEUE < ERROR_REQUEUE);
        assert!(ERROR_REQUEUE < DEFAULT_REQUEUE);
    }

    #[test]
    fn test_metrics_register_once() {
        RECONCILE_TOTAL.with_label_values(&["test"]).inc();
        RECONCILE_ERRORS.with_label_values(&["test"]).inc();
        assert!(RECONCILE_TOTAL.with_label_values(&["test"]).get() >= 1);
    }
}
