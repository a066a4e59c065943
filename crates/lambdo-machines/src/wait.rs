//! Resource waiting with a fixed poll interval and cancellation support.
//!
//! Provides a generic abstraction for polling a remote resource until it is
//! ready, bounded by an attempt budget, plus the machine readiness poller
//! built on top of it.

use crate::error::MachinesError;
use crate::operations::MachineOperations;
use crate::types::Machine;
use backon::{BackoffBuilder, ConstantBuilder};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration for resource waiting.
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// Delay between checks
    pub interval: Duration,
    /// Total number of checks before giving up
    pub max_attempts: u32,
}

impl Default for WaitConfig {
    /// 150 checks, 2 seconds apart (about five minutes)
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 150,
        }
    }
}

/// Poll `check` until it yields a value.
///
/// # Arguments
/// * `config` - Wait configuration
/// * `cancel` - Optional cancellation token, checked before and between polls
/// * `check` - Returns `Ok(Some(value))` when ready, `Ok(None)` to poll again
/// * `resource_name` - Name for logging and errors
///
/// # Returns
/// * `Ok(value)` - Resource is ready
/// * `Err` - Attempts exhausted, cancelled, or `check` failed (no retry)
pub async fn wait_for_resource<T, F, Fut>(
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
    check: F,
    resource_name: &str,
) -> Result<T, MachinesError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>, MachinesError>>,
{
    let mut delays = ConstantBuilder::default()
        .with_delay(config.interval)
        .with_max_times(config.max_attempts.saturating_sub(1) as usize)
        .build();
    let mut attempts = 0u32;

    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(MachinesError::WaitCancelled {
                resource: resource_name.to_string(),
            });
        }

        attempts += 1;

        match check().await {
            Ok(Some(value)) => {
                debug!(resource = %resource_name, attempts, "Resource ready");
                return Ok(value);
            }
            Ok(None) => {
                let Some(delay) = delays.next() else {
                    warn!(resource = %resource_name, attempts, "Gave up waiting for resource");
                    return Err(MachinesError::WaitTimeout {
                        resource: resource_name.to_string(),
                        attempts,
                    });
                };

                debug!(
                    resource = %resource_name,
                    attempt = attempts,
                    delay_ms = delay.as_millis(),
                    "Resource not ready, retrying"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = async {
                        match cancel {
                            Some(token) => token.cancelled().await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        return Err(MachinesError::WaitCancelled {
                            resource: resource_name.to_string(),
                        });
                    }
                }
            }
            Err(e) => {
                warn!(resource = %resource_name, error = %e, "Resource check failed");
                return Err(e);
            }
        }
    }
}

/// Wait for a machine to reach an initialized state (started, stopping or
/// stopped) and return its last observed description.
pub async fn wait_for_machine<M>(
    machines: &M,
    app: &str,
    machine_id: &str,
    config: WaitConfig,
    cancel: Option<&CancellationToken>,
) -> Result<Machine, MachinesError>
where
    M: MachineOperations + ?Sized,
{
    info!(
        app = %app,
        machine_id = %machine_id,
        max_attempts = config.max_attempts,
        "Waiting for machine to initialize"
    );

    wait_for_resource(
        config,
        cancel,
        || async move {
            let machine = machines.get_machine(app, machine_id).await?;
            Ok(machine.is_initialized().then_some(machine))
        },
        &format!("machine {machine_id} in app {app}"),
    )
    .await
}
