//! vSphere Infrastructure Operator
//!
//! A Kubernetes operator managing vSphere-backed cluster infrastructure.
//! It reconciles two alternative CRD families (standalone and supervisor),
//! validates objects through admission webhooks, and talks to vCenter's
//! Storage Policy Based Management (SPBM) endpoint through a typed client.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                  vSphere Infrastructure Operator               │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌─────────────┐   ┌──────────────┐            │
//! │  │  Manager  │──▶│ Controllers │──▶│  VM Service  │            │
//! │  │ (startup) │   │ (reconcile) │   │ (hypervisor) │            │
//! │  └───────────┘   └─────────────┘   └──────┬───────┘            │
//! │        │                                  │                    │
//! │        ▼                                  ▼                    │
//! │  ┌───────────┐                     ┌─────────────┐             │
//! │  │ Webhooks  │                     │ SPBM client │             │
//! │  └───────────┘                     └─────────────┘             │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controllers`] - Reconciliation loops for both CRD families
//! - [`crd`] - Custom Resource Definitions
//! - [`error`] - Error types
//! - [`manager`] - Startup wiring: discovery, leader election, credentials
//! - [`pbm`] - Typed SPBM (storage policy) client
//! - [`services`] - VM lifecycle service port and implementations
//! - [`webhooks`] - Validating admission webhooks

pub mod controllers;
pub mod crd;
pub mod error;
pub mod manager;
pub mod pbm;
pub mod services;
pub mod webhooks;

// Re-export commonly used types
pub use error::{Error, Result};
pub use manager::{Manager, ManagerOptions};
pub use pbm::PbmClient;
