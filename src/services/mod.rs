//! VM lifecycle service port.
//!
//! The VM controller drives hypervisor-side virtual machines through this
//! trait; [`fake::FakeVmService`] is the recording test double used by
//! controller tests.

pub mod fake;
pub mod spbm;

use std::time::Duration;

use async_trait::async_trait;

use crate::crd::{VSphereVM, VirtualMachine};
use crate::error::Result;

/// Everything a VM reconcile needs to know about its subject.
#[derive(Debug, Clone)]
pub struct VmContext {
    /// The resource being reconciled.
    pub vm: VSphereVM,
    /// vCenter server the VM lives on.
    pub server: String,
}

impl VmContext {
    pub fn new(vm: VSphereVM, server: impl Into<String>) -> Self {
        Self {
            vm,
            server: server.into(),
        }
    }
}

/// Outcome of a destroy call: whether and when to requeue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

/// Port for hypervisor VM lifecycle operations.
#[async_trait]
pub trait VmService: Send + Sync {
    /// Drive the VM toward its spec; returns the observed machine state.
    async fn reconcile_vm(&self, ctx: &VmContext) -> Result<VirtualMachine>;

    /// Tear the VM down; returns the requeue outcome and the last observed
    /// machine state.
    async fn destroy_vm(&self, ctx: &VmContext) -> Result<(ReconcileOutcome, VirtualMachine)>;
}
