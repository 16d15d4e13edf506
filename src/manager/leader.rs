//! Lease-based leader election.
//!
//! A single coordination.k8s.io/v1 `Lease` arbitrates which replica runs the
//! controllers. The elector blocks in [`LeaderElector::acquire`] until it
//! holds the lease, then [`LeaderElector::renew_loop`] keeps renewing it and
//! cancels the manager when the lease is lost.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Timing and identity parameters for the election.
#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// Name of the Lease object.
    pub lease_name: String,
    /// Namespace the Lease lives in.
    pub namespace: String,
    /// This replica's identity, recorded as the holder.
    pub identity: String,
    /// How long a lease is valid after its last renewal.
    pub lease_duration: Duration,
    /// How long the holder keeps retrying renewal before giving up.
    pub renew_deadline: Duration,
    /// Pause between acquisition or renewal attempts.
    pub retry_period: Duration,
}

/// True when `spec` names `identity` as the current holder.
fn held_by(spec: &LeaseSpec, identity: &str) -> bool {
    spec.holder_identity.as_deref() == Some(identity)
}

/// True when the lease has gone unrenewed past its duration.
fn expired(spec: &LeaseSpec, now: DateTime<Utc>) -> bool {
    let last = spec
        .renew_time
        .as_ref()
        .or(spec.acquire_time.as_ref())
        .map(|t| t.0);
    let duration = spec.lease_duration_seconds.unwrap_or(0).max(0) as i64;
    match last {
        Some(last) => now - last > chrono::Duration::seconds(duration),
        // A lease with no timestamps was never properly taken.
        None => true,
    }
}

pub struct LeaderElector {
    api: Api<Lease>,
    config: LeaderElectionConfig,
}

impl LeaderElector {
    pub fn new(client: Client, config: LeaderElectionConfig) -> Self {
        let api = Api::namespaced(client, &config.namespace);
        Self { api, config }
    }

    /// Block until this replica holds the lease.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            match self.try_acquire().await {
                Ok(true) => {
                    info!(
                        "acquired leader lease {}/{} as {}",
                        self.config.namespace, self.config.lease_name, self.config.identity
                    );
                    return Ok(());
                }
                Ok(false) => {}
                Err(err) => warn!("leader lease acquisition attempt failed: {}", err),
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::LeaderElection(
                        "shutdown requested before leadership was acquired".to_string(),
                    ));
                }
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
        }
    }

    /// Renew the lease until cancelled or renewal fails past the deadline.
    ///
    /// Cancels `cancel` on loss of leadership so the rest of the manager
    /// shuts down with it.
    pub async fn renew_loop(&self, cancel: CancellationToken) {
        let mut last_renewed = Utc::now();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.release().await;
                    return;
                }
                _ = tokio::time::sleep(self.config.retry_period) => {}
            }
            match self.try_acquire().await {
                Ok(true) => last_renewed = Utc::now(),
                Ok(false) => {
                    warn!("leader lease taken over by another holder, shutting down");
                    cancel.cancel();
                    return;
                }
                Err(err) => {
                    warn!("leader lease renewal failed: {}", err);
                    let deadline = chrono::Duration::from_std(self.config.renew_deadline)
                        .unwrap_or_else(|_| chrono::Duration::seconds(10));
                    if Utc::now() - last_renewed > deadline {
                        warn!("leader lease renew deadline exceeded, shutting down");
                        cancel.cancel();
                        return;
                    }
                }
            }
        }
    }

    /// One acquisition or renewal attempt. `Ok(false)` means another live
    /// holder owns the lease.
    async fn try_acquire(&self) -> Result<bool> {
        let now = MicroTime(Utc::now());
        match self.api.get_opt(&self.config.lease_name).await? {
            None => {
                let lease = self.fresh_lease(now);
                match self.api.create(&PostParams::default(), &lease).await {
                    Ok(_) => Ok(true),
                    // Lost the creation race.
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
            Some(mut lease) => {
                let spec = lease.spec.clone().unwrap_or_default();
                let ours = held_by(&spec, &self.config.identity);
                if !ours && !expired(&spec, now.0) {
                    return Ok(false);
                }
                let transitions = spec.lease_transitions.unwrap_or(0) + i32::from(!ours);
                lease.spec = Some(LeaseSpec {
                    holder_identity: Some(self.config.identity.clone()),
                    lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
                    acquire_time: if ours { spec.acquire_time } else { Some(now.clone()) },
                    renew_time: Some(now),
                    lease_transitions: Some(transitions),
                    ..Default::default()
                });
                match self
                    .api
                    .replace(&self.config.lease_name, &PostParams::default(), &lease)
                    .await
                {
                    Ok(_) => Ok(true),
                    // Someone else updated it first.
                    Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(false),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    /// Give the lease up voluntarily on clean shutdown.
    async fn release(&self) {
        let Ok(Some(mut lease)) = self.api.get_opt(&self.config.lease_name).await else {
            return;
        };
        let spec = lease.spec.clone().unwrap_or_default();
        if !held_by(&spec, &self.config.identity) {
            return;
        }
        lease.spec = Some(LeaseSpec {
            holder_identity: None,
            ..spec
        });
        if let Err(err) = self
            .api
            .replace(&self.config.lease_name, &PostParams::default(), &lease)
            .await
        {
            warn!("failed to release leader lease: {}", err);
        }
    }

    fn fresh_lease(&self, now: MicroTime) -> Lease {
        Lease {
            metadata: ObjectMeta {
                name: Some(self.config.lease_name.clone()),
                namespace: Some(self.config.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.config.identity.clone()),
                lease_duration_seconds: Some(self.config.lease_duration.as_secs() as i32),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        }
    }
}
