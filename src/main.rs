//! Operator entrypoint.
//!
//! Parses flags, initializes logging, builds the Kubernetes client and hands
//! control to the [`manager`]. Shutdown is driven by SIGINT/SIGTERM through
//! a cancellation token so controllers, servers and SPBM sessions drain
//! together.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod controllers;
mod crd;
mod error;
mod manager;
mod pbm;
mod services;
mod webhooks;

use crate::error::Result;
use crate::manager::{Manager, ManagerOptions};

// =============================================================================
// CLI Arguments
// =============================================================================

/// vSphere Infrastructure Operator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable leader election so only one replica reconciles
    #[arg(long, env = "ENABLE_LEADER_ELECTION", default_value = "true", action = clap::ArgAction::Set)]
    leader_elect: bool,

    /// Name of the leader election lease
    #[arg(long, default_value = manager::DEFAULT_LEADER_ELECTION_ID)]
    leader_election_id: String,

    /// Namespace the leader election lease lives in
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    leader_election_namespace: String,

    /// Leader lease validity in seconds
    #[arg(long, default_value = "15")]
    leader_election_lease_duration: u64,

    /// Leader renewal deadline in seconds
    #[arg(long, default_value = "10")]
    leader_election_renew_deadline: u64,

    /// Pause between leader election attempts in seconds
    #[arg(long, default_value = "2")]
    leader_election_retry_period: u64,

    /// Identity recorded as the lease holder
    #[arg(long, env = "POD_NAME", default_value = "vsphere-infra-operator")]
    pod_name: String,

    /// Upper bound on in-flight reconciles per controller
    #[arg(long, default_value = "10")]
    max_concurrent_reconciles: u16,

    /// Namespace to watch; empty watches all namespaces
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Path to the vCenter credentials file
    #[arg(long, default_value = manager::DEFAULT_CREDENTIALS_FILE)]
    credentials_file: PathBuf,

    /// Keep SPBM sessions alive between reconciles
    #[arg(long, default_value = "true", action = clap::ArgAction::Set)]
    enable_keep_alive: bool,

    /// Idle interval between SPBM keep-alive pings in seconds
    #[arg(long, default_value = "300")]
    keep_alive_duration: u64,

    /// Network provider announced for supervisor clusters
    #[arg(long, env = "NETWORK_PROVIDER", default_value = "")]
    network_provider: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_bind_addr: String,

    /// Health probe bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:9440")]
    health_addr: String,

    /// Port the webhook server binds
    #[arg(long, default_value = "9443")]
    webhook_port: u16,

    /// Directory holding the webhook serving certificate pair
    #[arg(long, default_value = "/tmp/k8s-webhook-server/serving-certs")]
    webhook_cert_dir: PathBuf,

    /// Minimum interval between full watch resyncs (e.g. 10m, 600s, 1h)
    #[arg(long, default_value = "10m", value_parser = parse_duration)]
    sync_period: Duration,

    /// Minimum TLS version the webhook server accepts (1.2 or 1.3)
    #[arg(long, default_value = "1.2")]
    tls_min_version: String,

    /// Client-side queries-per-second limit against the API server
    #[arg(long, default_value = "20")]
    kube_api_qps: f32,

    /// Client-side burst allowance against the API server
    #[arg(long, default_value = "30")]
    kube_api_burst: u32,

    /// Bind address for profiling endpoints; empty disables them
    #[arg(long, env = "PROFILER_ADDR", default_value = "")]
    profiler_address: String,

    /// Enable lock contention profiling alongside the profiler
    #[arg(long)]
    contention_profiling: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn into_options(self) -> ManagerOptions {
        ManagerOptions {
            enable_leader_election: self.leader_elect,
            leader_election_id: self.leader_election_id,
            leader_election_namespace: self.leader_election_namespace,
            leader_election_lease_duration: Duration::from_secs(self.leader_election_lease_duration),
            leader_election_renew_deadline: Duration::from_secs(self.leader_election_renew_deadline),
            leader_election_retry_period: Duration::from_secs(self.leader_election_retry_period),
            pod_name: self.pod_name,
            max_concurrent_reconciles: self.max_concurrent_reconciles,
            watch_namespace: if self.namespace.is_empty() {
                None
            } else {
                Some(self.namespace)
            },
            credentials_file: self.credentials_file,
            enable_keep_alive: self.enable_keep_alive,
            keep_alive_duration: Duration::from_secs(self.keep_alive_duration),
            network_provider: self.network_provider,
            metrics_bind_addr: self.metrics_bind_addr,
            health_addr: self.health_addr,
            webhook_port: self.webhook_port,
            webhook_cert_dir: self.webhook_cert_dir,
            sync_period: self.sync_period,
            tls_min_version: self.tls_min_version,
            kube_api_qps: self.kube_api_qps,
            kube_api_burst: self.kube_api_burst,
            profiler_address: self.profiler_address,
            enable_contention_profiling: self.contention_profiling,
        }
    }
}

/// Parse a duration flag in the `10m` / `600s` / `1h` shape; a bare number
/// means seconds.
fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    let (number, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let number: u64 = number
        .parse()
        .map_err(|_| format!("invalid duration {:?}", value))?;
    let seconds = match unit {
        "s" => number,
        "m" => number * 60,
        "h" => number * 3600,
        other => return Err(format!("unknown duration unit {:?} in {:?}", other, value)),
    };
    Ok(Duration::from_secs(seconds))
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting vSphere Infrastructure Operator");

    let client = Client::try_default().await.map_err(|e| {
        error!("Failed to create Kubernetes client: {}", e);
        error::Error::Config(format!("Kubernetes client creation failed: {}", e))
    })?;

    info!("Connected to Kubernetes cluster");

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let manager = Manager::new(client, args.into_options());
    manager.run(cancel).await?;

    info!("Operator shutdown complete");
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received SIGINT");
        }
        cancel.cancel();
    });
}

// =============================================================================
// Logging Setup
// =============================================================================

/// Map a `--log-level` value; an unknown level is a startup error.
fn parse_log_level(value: &str) -> Result<Level> {
    match value.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(error::Error::Config(format!(
            "unknown log level {:?}, expected trace, debug, info, warn or error",
            other
        ))),
    }
}

fn init_logging(args: &Args) -> Result<()> {
    let level = parse_log_level(&args.log_level)?;

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("kube=info".parse().unwrap())
        .add_directive("tower=warn".parse().unwrap());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}
