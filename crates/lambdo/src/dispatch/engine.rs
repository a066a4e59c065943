//! Grouping and resilient dispatch of one batch

use super::group::{group_events, DispatchGroup};
use crate::queue::{QueueOperations, RawEvent};
use lambdo_machines::{create_with_failover, MachineOperations};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What happened to one dispatch group
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOutcome {
    pub fingerprint: String,
    pub image: String,
    /// Set when a machine was created
    pub machine_id: Option<String>,
    pub region: Option<String>,
    /// Receipt handles deleted from the queue
    pub acknowledged: Vec<String>,
    /// Receipt handles left on the queue (group failed or delete failed)
    pub unacknowledged: Vec<String>,
    pub delete_failures: usize,
}

impl GroupOutcome {
    pub fn succeeded(&self) -> bool {
        self.machine_id.is_some()
    }
}

/// Summary of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub groups: Vec<GroupOutcome>,
    /// Events that never joined a group
    pub dropped: usize,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.groups.iter().filter(|g| g.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.groups.len() - self.succeeded()
    }

    pub fn acknowledged(&self) -> usize {
        self.groups.iter().map(|g| g.acknowledged.len()).sum()
    }
}

/// Turns batches of queue events into machines.
///
/// Groups are dispatched one after another; each either gets a machine (and
/// its events are deleted from the queue) or leaves its events for
/// redelivery. Nothing here fails the batch.
pub struct Dispatcher<M, Q> {
    machines: Arc<M>,
    queue: Arc<Q>,
    app: String,
    regions: Vec<String>,
}

impl<M, Q> Dispatcher<M, Q>
where
    M: MachineOperations,
    Q: QueueOperations,
{
    pub fn new(machines: Arc<M>, queue: Arc<Q>, app: impl Into<String>, regions: Vec<String>) -> Self {
        Self {
            machines,
            queue,
            app: app.into(),
            regions,
        }
    }

    pub async fn dispatch(&self, events: Vec<RawEvent>) -> DispatchReport {
        let received = events.len();
        let grouping = group_events(events);

        info!(
            app = %self.app,
            events = received,
            groups = grouping.groups.len(),
            dropped = grouping.dropped,
            "Dispatching batch"
        );

        let mut report = DispatchReport {
            groups: Vec::with_capacity(grouping.groups.len()),
            dropped: grouping.dropped,
        };
        for group in &grouping.groups {
            report.groups.push(self.dispatch_group(group).await);
        }
        report
    }

    async fn dispatch_group(&self, group: &DispatchGroup) -> GroupOutcome {
        let mut outcome = GroupOutcome {
            fingerprint: group.fingerprint.clone(),
            image: group.spec.image.clone(),
            ..Default::default()
        };

        let config = group.machine_config();
        let machine =
            match create_with_failover(self.machines.as_ref(), &self.app, &config, &self.regions)
                .await
            {
                Ok(machine) => machine,
                Err(e) => {
                    error!(
                        app = %self.app,
                        fingerprint = %group.fingerprint,
                        image = %group.spec.image,
                        events = group.members.len(),
                        error = %e,
                        "Could not dispatch group, leaving events for redelivery"
                    );
                    outcome.unacknowledged = group.receipt_handles().map(str::to_string).collect();
                    return outcome;
                }
            };

        info!(
            app = %self.app,
            machine_id = %machine.id,
            region = %machine.region,
            image = %group.spec.image,
            events = group.members.len(),
            "Dispatched group"
        );

        for member in &group.members {
            match self.queue.delete(&member.receipt_handle).await {
                Ok(()) => outcome.acknowledged.push(member.receipt_handle.clone()),
                Err(e) => {
                    warn!(
                        machine_id = %machine.id,
                        message_id = member.message_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "Could not delete message"
                    );
                    outcome.delete_failures += 1;
                    outcome.unacknowledged.push(member.receipt_handle.clone());
                }
            }
        }

        outcome.machine_id = Some(machine.id);
        outcome.region = Some(machine.region);
        outcome
    }
}

impl<M, Q> std::fmt::Debug for Dispatcher<M, Q> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("app", &self.app)
            .field("regions", &self.regions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::event::{ATTR_COMMAND, ATTR_IMAGE};
    use crate::queue::MockQueueOperations;
    use crate::test_support::{created, MockMachines};
    use lambdo_machines::MachinesError;
    use std::sync::Mutex;

    fn regions() -> Vec<String> {
        ["ord", "bos", "dfw"].map(String::from).to_vec()
    }

    fn event(n: u32, image: &str) -> RawEvent {
        RawEvent::new(format!("{n}"), format!("rh-{n}")).with_attribute(ATTR_IMAGE, image)
    }

    fn recording_queue() -> (MockQueueOperations, Arc<Mutex<Vec<String>>>) {
        let deleted = Arc::new(Mutex::new(Vec::new()));
        let seen = deleted.clone();
        let mut queue = MockQueueOperations::new();
        queue.expect_delete().returning(move |handle| {
            seen.lock().unwrap().push(handle.to_string());
            Ok(())
        });
        (queue, deleted)
    }

    fn dispatcher(machines: MockMachines, queue: MockQueueOperations) -> Dispatcher<MockMachines, MockQueueOperations> {
        Dispatcher::new(Arc::new(machines), Arc::new(queue), "jobs", regions())
    }

    #[tokio::test]
    async fn test_successful_group_deletes_all_its_events() {
        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .times(1)
            .returning(|_, request| Ok(created(request, "m1")));
        let (queue, deleted) = recording_queue();

        let report = dispatcher(machines, queue)
            .dispatch(vec![event(1, "a"), event(2, "a"), event(3, "a")])
            .await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.groups[0].machine_id.as_deref(), Some("m1"));
        assert_eq!(report.groups[0].region.as_deref(), Some("ord"));
        assert_eq!(*deleted.lock().unwrap(), vec!["rh-1", "rh-2", "rh-3"]);
        assert_eq!(report.acknowledged(), 3);
    }

    #[tokio::test]
    async fn test_failed_group_deletes_nothing() {
        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .withf(|_, request| request.config.image == "broken")
            .times(3)
            .returning(|_, _| {
                Err(MachinesError::Status {
                    operation: "create machine",
                    status: 503,
                })
            });
        machines
            .expect_create_machine()
            .withf(|_, request| request.config.image == "ok")
            .times(1)
            .returning(|_, request| Ok(created(request, "m-ok")));
        let (queue, deleted) = recording_queue();

        let report = dispatcher(machines, queue)
            .dispatch(vec![event(1, "broken"), event(2, "ok"), event(3, "broken")])
            .await;

        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(*deleted.lock().unwrap(), vec!["rh-2"]);

        let failed = report.groups.iter().find(|g| !g.succeeded()).unwrap();
        assert_eq!(failed.unacknowledged, vec!["rh-1", "rh-3"]);
        assert!(failed.acknowledged.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_events_are_never_deleted() {
        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .times(1)
            .returning(|_, request| Ok(created(request, "m1")));
        let (queue, deleted) = recording_queue();

        let report = dispatcher(machines, queue)
            .dispatch(vec![
                event(1, "a"),
                event(2, "a").with_attribute(ATTR_COMMAND, "{not a list"),
                RawEvent::new("3", "rh-3"),
            ])
            .await;

        assert_eq!(report.dropped, 2);
        assert_eq!(*deleted.lock().unwrap(), vec!["rh-1"]);
    }

    #[tokio::test]
    async fn test_delete_failures_are_counted_not_fatal() {
        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .times(1)
            .returning(|_, request| Ok(created(request, "m1")));
        let mut queue = MockQueueOperations::new();
        queue.expect_delete().returning(|handle| {
            if handle == "rh-2" {
                Err(anyhow::anyhow!("receipt handle expired"))
            } else {
                Ok(())
            }
        });

        let report = dispatcher(machines, queue)
            .dispatch(vec![event(1, "a"), event(2, "a"), event(3, "a")])
            .await;

        let group = &report.groups[0];
        assert!(group.succeeded());
        assert_eq!(group.acknowledged, vec!["rh-1", "rh-3"]);
        assert_eq!(group.unacknowledged, vec!["rh-2"]);
        assert_eq!(group.delete_failures, 1);
    }

    #[tokio::test]
    async fn test_failover_moves_to_next_region() {
        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .times(2)
            .returning(|_, request| {
                if request.region == "ord" {
                    Err(MachinesError::Unprocessable {
                        status: 422,
                        body: "no capacity".into(),
                    })
                } else {
                    Ok(created(request, "m-bos"))
                }
            });
        let (queue, _) = recording_queue();

        let report = dispatcher(machines, queue).dispatch(vec![event(1, "a")]).await;
        assert_eq!(report.groups[0].region.as_deref(), Some("bos"));
    }

    #[tokio::test]
    async fn test_payload_reaches_the_machine() {
        let mut machines = MockMachines::new();
        machines
            .expect_create_machine()
            .withf(|app, request| {
                app == "jobs"
                    && request.config.auto_destroy
                    && request.config.files[0].raw_value.as_deref() == Some("WzEsMl0=")
            })
            .times(1)
            .returning(|_, request| Ok(created(request, "m1")));
        let (queue, _) = recording_queue();

        let report = dispatcher(machines, queue)
            .dispatch(vec![event(1, "a"), event(2, "a")])
            .await;
        assert_eq!(report.succeeded(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let machines = MockMachines::new();
        let queue = MockQueueOperations::new();
        let report = dispatcher(machines, queue).dispatch(Vec::new()).await;
        assert_eq!(report, DispatchReport::default());
    }
}
