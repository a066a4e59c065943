//! lambdo-machines - Fly Machines API client
//!
//! This crate provides:
//! - transport: HTTP execution with bounded retries for timeouts, 409 and 412
//! - client: typed app and machine operations with status translation
//! - failover: machine creation across a prioritized region list
//! - wait: readiness polling for newly created machines

pub mod client;
pub mod error;
pub mod failover;
pub mod operations;
pub mod transport;
pub mod types;
pub mod wait;

pub use client::{MachinesClient, DEFAULT_API_BASE_URL, DEFAULT_ORG};
pub use error::{MachinesError, TransportError};
pub use failover::create_with_failover;
pub use operations::MachineOperations;
pub use transport::{ApiRequest, ApiResponse, HttpSend, RetryPolicy, SendError, Transport};
pub use types::{App, Machine, MachineConfig, MachineFile, MachineProcess, MachineState};
pub use wait::{wait_for_machine, WaitConfig};
