//! Manager wiring.
//!
//! Owns everything that runs before the first reconcile: credentials
//! loading, leader election, CRD family discovery, controller and webhook
//! startup, and the health and metrics endpoints. Controllers for a family
//! are only registered when discovery reports its CRDs deployed.

pub mod credentials;
pub mod discovery;
pub mod leader;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controllers::{self, ControllerContext};
use crate::crd;
use crate::error::{Error, Result};
use crate::pbm::session;
use crate::services::spbm::SpbmVmService;
use crate::services::VmService;
use crate::webhooks;
use credentials::CredentialsWatch;
use leader::{LeaderElectionConfig, LeaderElector};

pub const DEFAULT_LEADER_ELECTION_ID: &str = "vsphere-infra-operator-leader";
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
pub const DEFAULT_RENEW_DEADLINE: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(2);
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;
pub const DEFAULT_TLS_MIN_VERSION: &str = "1.2";
pub const DEFAULT_SYNC_PERIOD: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_CREDENTIALS_FILE: &str = "/etc/capv/credentials.yaml";

/// Everything configurable about one manager process.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub enable_leader_election: bool,
    pub leader_election_id: String,
    pub leader_election_namespace: String,
    pub leader_election_lease_duration: Duration,
    pub leader_election_renew_deadline: Duration,
    pub leader_election_retry_period: Duration,

    /// Identity recorded on the leader lease.
    pub pod_name: String,

    pub max_concurrent_reconciles: u16,

    /// Namespace to watch; `None` watches all namespaces.
    pub watch_namespace: Option<String>,

    pub credentials_file: PathBuf,
    pub enable_keep_alive: bool,
    pub keep_alive_duration: Duration,

    /// Network provider announced for supervisor clusters.
    pub network_provider: String,

    pub metrics_bind_addr: String,
    pub health_addr: String,
    pub webhook_port: u16,
    pub webhook_cert_dir: PathBuf,

    /// Minimum TLS version the webhook server accepts ("1.2" or "1.3").
    /// The listener's rustls config already refuses anything below 1.2;
    /// the value is validated at startup and logged.
    pub tls_min_version: String,

    /// Minimum resync interval for watches; informational for now, the
    /// watcher streams re-list on their own schedule.
    pub sync_period: Duration,

    /// Client-side rate limits, logged for parity with the deployment
    /// manifests that set them.
    pub kube_api_qps: f32,
    pub kube_api_burst: u32,

    /// pprof-style profiler address; accepted but not served.
    pub profiler_address: String,
    pub enable_contention_profiling: bool,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            enable_leader_election: true,
            leader_election_id: DEFAULT_LEADER_ELECTION_ID.to_string(),
            leader_election_namespace: "default".to_string(),
            leader_election_lease_duration: DEFAULT_LEASE_DURATION,
            leader_election_renew_deadline: DEFAULT_RENEW_DEADLINE,
            leader_election_retry_period: DEFAULT_RETRY_PERIOD,
            pod_name: "vsphere-infra-operator".to_string(),
            max_concurrent_reconciles: 10,
            watch_namespace: None,
            credentials_file: PathBuf::from(DEFAULT_CREDENTIALS_FILE),
            enable_keep_alive: true,
            keep_alive_duration: session::DEFAULT_KEEP_ALIVE_DURATION,
            network_provider: String::new(),
            metrics_bind_addr: "0.0.0.0:8080".to_string(),
            health_addr: "0.0.0.0:9440".to_string(),
            webhook_port: DEFAULT_WEBHOOK_PORT,
            webhook_cert_dir: webhooks::default_cert_dir(),
            tls_min_version: DEFAULT_TLS_MIN_VERSION.to_string(),
            sync_period: DEFAULT_SYNC_PERIOD,
            kube_api_qps: 20.0,
            kube_api_burst: 30,
            profiler_address: String::new(),
            enable_contention_profiling: false,
        }
    }
}

impl ManagerOptions {
    /// Keep-alive interval, or `None` when keep-alive is disabled.
    pub fn keep_alive(&self) -> Option<Duration> {
        self.enable_keep_alive.then_some(self.keep_alive_duration)
    }
}

/// Validate a `--tls-min-version` value; anything outside 1.2/1.3 is a
/// startup configuration error.
pub fn check_tls_min_version(value: &str) -> Result<()> {
    match value {
        "1.2" | "1.3" => Ok(()),
        other => Err(Error::Config(format!(
            "unsupported TLS minimum version {:?}, expected \"1.2\" or \"1.3\"",
            other
        ))),
    }
}

pub struct Manager {
    client: Client,
    options: ManagerOptions,
}

impl Manager {
    pub fn new(client: Client, options: ManagerOptions) -> Self {
        Self { client, options }
    }

    /// Run everything until `cancel` fires, then tear sessions down.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let opts = &self.options;
        check_tls_min_version(&opts.tls_min_version)?;
        info!("  Leader election: {}", opts.enable_leader_election);
        info!("  Webhook TLS minimum version: {}", opts.tls_min_version);
        info!("  Max concurrent reconciles: {}", opts.max_concurrent_reconciles);
        info!(
            "  Watch namespace: {}",
            opts.watch_namespace.as_deref().unwrap_or("<all>")
        );
        info!(
            "  Kube API rate limits: qps={} burst={}",
            opts.kube_api_qps, opts.kube_api_burst
        );
        info!("  Sync period: {:?}", opts.sync_period);
        if !opts.network_provider.is_empty() {
            info!("  Network provider: {}", opts.network_provider);
        }
        if !opts.profiler_address.is_empty() {
            warn!(
                "profiler address {} configured but profiling endpoints are not served (contention profiling: {})",
                opts.profiler_address, opts.enable_contention_profiling
            );
        }

        let mut creds_watch = CredentialsWatch::start(&opts.credentials_file)?;
        info!(
            "Loaded vCenter credentials for {} from {:?}",
            creds_watch.current().username,
            opts.credentials_file
        );

        // The webhook-started flag stays true unless a webhook server is
        // actually planned, so readiness never blocks on a server that was
        // never meant to run.
        let webhook_started: webhooks::StartedFlag = Arc::new(AtomicBool::new(true));

        let health = spawn_health_server(
            opts.health_addr.clone(),
            Arc::clone(&webhook_started),
            cancel.clone(),
        );
        let metrics = spawn_metrics_server(opts.metrics_bind_addr.clone(), cancel.clone());

        if opts.enable_leader_election {
            let elector = LeaderElector::new(
                self.client.clone(),
                LeaderElectionConfig {
                    lease_name: opts.leader_election_id.clone(),
                    namespace: opts.leader_election_namespace.clone(),
                    identity: opts.pod_name.clone(),
                    lease_duration: opts.leader_election_lease_duration,
                    renew_deadline: opts.leader_election_renew_deadline,
                    retry_period: opts.leader_election_retry_period,
                },
            );
            elector.acquire(&cancel).await?;
            let renew_cancel = cancel.clone();
            tokio::spawn(async move { elector.renew_loop(renew_cancel).await });
        }

        let vm_service: Arc<dyn VmService> = Arc::new(SpbmVmService::new(opts.keep_alive()));
        let ctx = Arc::new(ControllerContext {
            client: self.client.clone(),
            vm_service,
            namespace: opts.watch_namespace.clone(),
            max_concurrent_reconciles: opts.max_concurrent_reconciles,
            keep_alive: opts.keep_alive(),
            shutdown: cancel.clone(),
        });

        let mut tasks = Vec::new();

        let standalone = discovery::crd_deployed(
            &self.client,
            crd::infra::GROUP,
            crd::infra::VERSION,
            "VSphereCluster",
        )
        .await?;
        if standalone {
            info!("Standalone CRD family detected, starting its controllers and webhooks");
            webhook_started.store(false, Ordering::SeqCst);

            let port = opts.webhook_port;
            let cert_dir = opts.webhook_cert_dir.clone();
            let started = Arc::clone(&webhook_started);
            let webhook_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = webhooks::run(port, &cert_dir, started, webhook_cancel).await {
                    error!("Webhook server error: {}", e);
                }
            }));

            spawn_controller(&mut tasks, controllers::cluster::run(Arc::clone(&ctx)));
            spawn_controller(&mut tasks, controllers::machine::run(Arc::clone(&ctx)));
            spawn_controller(&mut tasks, controllers::vm::run(Arc::clone(&ctx)));
            spawn_controller(&mut tasks, controllers::deployment_zone::run(Arc::clone(&ctx)));
            spawn_controller(&mut tasks, controllers::failure_domain::run(Arc::clone(&ctx)));
        } else {
            info!("Standalone CRD family not deployed, skipping its controllers");
        }

        let supervisor = discovery::crd_deployed(
            &self.client,
            crd::supervisor::GROUP,
            crd::supervisor::VERSION,
            "VSphereCluster",
        )
        .await?;
        if supervisor {
            info!("Supervisor CRD family detected, starting its controllers");
            spawn_controller(&mut tasks, controllers::supervisor::run_cluster(Arc::clone(&ctx)));
            spawn_controller(&mut tasks, controllers::supervisor::run_machine(Arc::clone(&ctx)));
        } else {
            info!("Supervisor CRD family not deployed, skipping its controllers");
        }

        if !standalone && !supervisor {
            warn!("No supported CRD family is deployed; running idle until CRDs appear requires a restart");
        }

        cancel.cancelled().await;
        info!("Shutdown requested, draining controllers");

        for task in tasks {
            let _ = task.await;
        }
        let _ = health.await;
        let _ = metrics.await;

        creds_watch.close();
        session::clear();
        info!("Manager shutdown complete");
        Ok(())
    }
}

fn spawn_controller(
    tasks: &mut Vec<tokio::task::JoinHandle<()>>,
    fut: impl std::future::Future<Output = Result<()>> + Send + 'static,
) {
    tasks.push(tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!("Controller error: {}", e);
        }
    }));
}

// =============================================================================
// Health Server
// =============================================================================

fn spawn_health_server(
    addr: String,
    webhook_started: webhooks::StartedFlag,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = run_health_server(&addr, webhook_started) => {
                if let Err(e) = result {
                    error!("Health server error: {}", e);
                }
            }
        }
    })
}

async fn run_health_server(addr: &str, webhook_started: webhooks::StartedFlag) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid health server address: {}", e)))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind health server: {}", e)))?;

    info!("Health server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Config(format!("health server accept error: {}", e)))?;
        let io = TokioIo::new(stream);
        let started = Arc::clone(&webhook_started);

        tokio::spawn(async move {
            let service = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
                let started = Arc::clone(&started);
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => Response::builder()
                            .status(StatusCode::OK)
                            .body(Full::new(Bytes::from("ok")))
                            .unwrap(),
                        // Not ready until the webhook server accepts requests.
                        "/readyz" => {
                            if started.load(Ordering::SeqCst) {
                                Response::builder()
                                    .status(StatusCode::OK)
                                    .body(Full::new(Bytes::from("ok")))
                                    .unwrap()
                            } else {
                                Response::builder()
                                    .status(StatusCode::SERVICE_UNAVAILABLE)
                                    .body(Full::new(Bytes::from("webhook server not started")))
                                    .unwrap()
                            }
                        }
                        _ => Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Full::new(Bytes::from("not found")))
                            .unwrap(),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                tracing::error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

fn spawn_metrics_server(addr: String, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = run_metrics_server(&addr) => {
                if let Err(e) = result {
                    error!("Metrics server error: {}", e);
                }
            }
        }
    })
}

async fn run_metrics_server(addr: &str) -> Result<()> {
    use http_body_util::Full;
    use hyper::body::Bytes;
    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use hyper::{Request, Response, StatusCode};
    use hyper_util::rt::TokioIo;
    use prometheus::{Encoder, TextEncoder};
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    async fn metrics_handler(
        req: Request<hyper::body::Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, std::convert::Infallible> {
        let response = match req.uri().path() {
            "/metrics" => {
                let encoder = TextEncoder::new();
                let metric_families = prometheus::gather();
                let mut buffer = Vec::new();
                if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                    tracing::error!("metrics encode error: {}", e);
                }
                Response::builder()
                    .status(StatusCode::OK)
                    .header("Content-Type", encoder.format_type())
                    .body(Full::new(Bytes::from(buffer)))
                    .unwrap()
            }
            _ => Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(Full::new(Bytes::from("not found")))
                .unwrap(),
        };
        Ok(response)
    }

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("invalid metrics server address: {}", e)))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("failed to bind metrics server: {}", e)))?;

    info!("Metrics server listening on {}", addr);

    loop {
        let (stream, _) = listener
            .accept()
            .await
            .map_err(|e| Error::Config(format!("metrics server accept error: {}", e)))?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server connection error: {}", e);
            }
        });
    }
}
