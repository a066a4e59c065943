//! Event grouping and dispatch
//!
//! - event: attribute parsing and fingerprints
//! - group: dispatch groups, payloads and machine configs
//! - engine: failover creation and acknowledgement per group

pub mod engine;
pub mod event;
pub mod group;

pub use engine::{DispatchReport, Dispatcher, GroupOutcome};
pub use event::{fingerprint, DropReason, WorkloadSpec, DEFAULT_SIZE};
pub use group::{group_events, DispatchGroup, Grouping};
