//! Receive loop feeding batches into the dispatch channel

use super::QueueOperations;
use super::message::RawEvent;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between receives when long polling is disabled
pub const SHORT_POLL_PAUSE: Duration = Duration::from_millis(250);

/// Receive batches until cancelled and hand each non-empty one to `batches`.
///
/// Cancellation is checked before every receive; a receive already in flight
/// is allowed to finish. A receive error ends the loop with that error unless
/// cancellation was requested meanwhile. The loop also ends quietly when the
/// receiving side of `batches` is gone.
pub async fn run_receive_loop<Q>(
    queue: &Q,
    long_poll_seconds: u32,
    batches: mpsc::Sender<Vec<RawEvent>>,
    cancel: &CancellationToken,
) -> Result<()>
where
    Q: QueueOperations + ?Sized,
{
    let pause = (long_poll_seconds < 1).then_some(SHORT_POLL_PAUSE);
    info!(long_poll_seconds, "Receive loop started");

    loop {
        if cancel.is_cancelled() {
            info!("Receive loop stopping");
            return Ok(());
        }

        let events = match queue.receive().await {
            Ok(events) => events,
            Err(e) if cancel.is_cancelled() => {
                debug!(error = %e, "Receive failed during shutdown");
                return Ok(());
            }
            Err(e) => return Err(e.context("Receive loop failed")),
        };

        if !events.is_empty() {
            debug!(count = events.len(), "Handing batch to dispatcher");
            if batches.send(events).await.is_err() {
                warn!("Dispatcher is gone, stopping receive loop");
                return Ok(());
            }
        }

        if let Some(pause) = pause {
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => {}
            }
        }
    }
}
