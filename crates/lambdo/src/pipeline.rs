//! Consumer pipeline: receive loop, handoff channel and dispatch task

use crate::dispatch::Dispatcher;
use crate::queue::{run_receive_loop, QueueOperations, RawEvent};
use anyhow::Result;
use lambdo_machines::MachineOperations;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Batches buffered between the receive loop and the dispatcher
pub const HANDOFF_CAPACITY: usize = 1;

/// Run the consumer until `cancel` fires or the receive loop fails.
///
/// The receive loop runs on the current task and the dispatcher on a spawned
/// one. A batch that is being dispatched when cancellation arrives runs to
/// completion; this function returns only after the dispatch task has ended.
pub async fn run_consumer<M, Q>(
    dispatcher: Dispatcher<M, Q>,
    queue: Arc<Q>,
    long_poll_seconds: u32,
    cancel: CancellationToken,
) -> Result<()>
where
    M: MachineOperations + 'static,
    Q: QueueOperations + 'static,
{
    let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);
    let dispatch_handle = spawn_dispatch_loop(dispatcher, rx, cancel.clone());

    let received = run_receive_loop(queue.as_ref(), long_poll_seconds, tx, &cancel).await;
    if let Err(e) = &received {
        error!(error = %e, "Receive loop failed, draining dispatcher");
    }

    match dispatch_handle.await {
        Ok(()) => debug!("Dispatch task drained"),
        Err(e) if e.is_panic() => error!(error = ?e, "Dispatch task panicked"),
        Err(e) => debug!(error = ?e, "Dispatch task cancelled"),
    }

    received
}

fn spawn_dispatch_loop<M, Q>(
    dispatcher: Dispatcher<M, Q>,
    mut batches: mpsc::Receiver<Vec<RawEvent>>,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    M: MachineOperations + 'static,
    Q: QueueOperations + 'static,
{
    tokio::spawn(async move {
        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            let report = dispatcher.dispatch(batch).await;
            info!(
                groups = report.groups.len(),
                succeeded = report.succeeded(),
                failed = report.failed(),
                acknowledged = report.acknowledged(),
                dropped = report.dropped,
                "Batch dispatched"
            );
        }
        info!("Dispatch loop stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event::ATTR_IMAGE;
    use crate::queue::MockQueueOperations;
    use crate::test_support::{created, MockMachines};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn event(n: u32) -> RawEvent {
        RawEvent::new(format!("{n}"), format!("rh-{n}")).with_attribute(ATTR_IMAGE, "worker")
    }

    #[tokio::test]
    async fn test_receive_failure_drains_the_buffered_batch() {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let seen = deleted.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let mut queue = MockQueueOperations::new();
        queue.expect_receive().returning(move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(vec![event(1), event(2)])
            } else {
                Err(anyhow::anyhow!("access denied"))
            }
        });
        queue.expect_delete().returning(move |handle| {
            seen.lock().unwrap().push(handle.to_string());
            Ok(())
        });
        let queue = Arc::new(queue);

        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .times(1)
            .returning(|_, request| Ok(created(request, "m1")));

        let dispatcher = Dispatcher::new(Arc::new(machines), queue.clone(), "jobs", vec!["ord".into()]);
        let err = run_consumer(dispatcher, queue, 10, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("access denied"));
        assert_eq!(*deleted.lock().unwrap(), vec!["rh-1", "rh-2"]);
    }

    #[tokio::test]
    async fn test_cancelled_consumer_returns_ok() {
        let queue = Arc::new(MockQueueOperations::new());
        let machines = Arc::new(MockMachines::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let dispatcher = Dispatcher::new(machines, queue.clone(), "jobs", vec!["ord".into()]);
        run_consumer(dispatcher, queue, 10, cancel).await.unwrap();
    }
}
