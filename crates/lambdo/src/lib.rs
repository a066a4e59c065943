//! lambdo - turns queued events into self-destroying Fly Machines
//!
//! This crate provides:
//! - config: environment-bound arguments resolved into `DispatcherConfig`
//! - queue: SQS ingestion and the receive loop
//! - dispatch: grouping, payloads and failover dispatch of a batch
//! - pipeline: the consumer wiring receive loop and dispatcher together
//! - operator: app and machine commands for operators

pub mod config;
pub mod dispatch;
pub mod operator;
pub mod pipeline;
pub mod queue;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, DispatcherConfig, FlyConfig, QueueConfig};
pub use dispatch::{DispatchReport, Dispatcher};
pub use pipeline::run_consumer;
pub use queue::{QueueOperations, RawEvent};
