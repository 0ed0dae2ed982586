//! Reconciliation loop for the tracked cloud fleet.
//!
//! This library converges the locally tracked view of a fleet (images and
//! their instances, from `vmfleet-model`) with the world a cloud provider
//! actually reports. Key concepts:
//!
//! - **Tracked state**: what we believe exists (the per-image registries).
//! - **Observed world**: what the provider reports this cycle, fetched in
//!   one bulk call.
//! - **Convergence**: detect new instances, drop vanished ones, propagate
//!   observed attributes, and aggregate start failures into image error
//!   state with a sticky-timeout window.
//!
//! # Invariants
//!
//! - Cycles are idempotent: an unchanged observed world produces no state
//!   change on a repeated run
//! - A transitional status younger than the stuck threshold is never
//!   overwritten by an observed status
//! - Per-instance probe failures never abort sibling processing
//! - At most one cycle runs per client at a time (the shipped worker awaits
//!   the cycle inside its tick arm)

mod client;
mod connector;
mod task;
mod worker;

pub use client::{CloudClient, StaticClient};
pub use connector::{CloudConnector, MockConnector, ObservedWorld};
pub use task::{ReconcileConfig, ReconcileTask};
pub use worker::ReconcileWorker;
