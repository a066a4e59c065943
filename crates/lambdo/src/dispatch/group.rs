//! Dispatch groups, batch payloads and machine configs

use super::event::{DropReason, WorkloadSpec};
use crate::queue::RawEvent;
use base64::prelude::*;
use lambdo_machines::{MachineConfig, MachineFile, MachineProcess};
use std::collections::HashMap;
use tracing::warn;

/// Where the batch payload is written inside the machine
pub const EVENTS_PATH: &str = "/tmp/events.json";
/// Environment variable telling the workload where its events are
pub const EVENTS_PATH_VAR: &str = "EVENTS_PATH";

/// One grouped event: the parts the dispatcher still needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub message_id: Option<String>,
    pub body: String,
    pub receipt_handle: String,
}

/// Events sharing a fingerprint, in receipt order
#[derive(Debug, Clone)]
pub struct DispatchGroup {
    pub fingerprint: String,
    pub spec: WorkloadSpec,
    pub members: Vec<GroupMember>,
}

impl DispatchGroup {
    /// `[body,body,...]` in receipt order, base64 encoded (standard, padded)
    pub fn payload(&self) -> String {
        let bodies: Vec<&str> = self.members.iter().map(|m| m.body.as_str()).collect();
        BASE64_STANDARD.encode(format!("[{}]", bodies.join(",")))
    }

    /// The machine config that runs this group's batch and then destroys
    /// itself.
    pub fn machine_config(&self) -> MachineConfig {
        let processes = if self.spec.command.is_empty() {
            Vec::new()
        } else {
            vec![MachineProcess {
                cmd: self.spec.command.clone(),
                ..Default::default()
            }]
        };

        MachineConfig {
            image: self.spec.image.clone(),
            size: Some(self.spec.size.clone()),
            env: [(EVENTS_PATH_VAR.to_string(), EVENTS_PATH.to_string())].into(),
            processes,
            files: vec![MachineFile {
                guest_path: EVENTS_PATH.to_string(),
                raw_value: Some(self.payload()),
                secret_name: None,
            }],
            auto_destroy: true,
            ..Default::default()
        }
    }

    pub fn receipt_handles(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.receipt_handle.as_str())
    }
}

/// Result of grouping one batch
#[derive(Debug, Default)]
pub struct Grouping {
    /// Groups in order of first appearance
    pub groups: Vec<DispatchGroup>,
    /// Events that could not be grouped; they stay on the queue
    pub dropped: usize,
}

/// Partition a batch into dispatch groups.
///
/// Events without an `image`, or with an unparseable `command`, are dropped
/// with a warning and never acknowledged.
pub fn group_events(events: Vec<RawEvent>) -> Grouping {
    let mut grouping = Grouping::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for event in events {
        let spec = match WorkloadSpec::from_event(&event) {
            Ok(spec) => spec,
            Err(reason) => {
                log_drop(&event, &reason);
                grouping.dropped += 1;
                continue;
            }
        };

        let member = GroupMember {
            message_id: event.message_id,
            body: event.body,
            receipt_handle: event.receipt_handle,
        };

        let fingerprint = spec.fingerprint();
        match index.get(&fingerprint) {
            Some(&i) => grouping.groups[i].members.push(member),
            None => {
                index.insert(fingerprint.clone(), grouping.groups.len());
                grouping.groups.push(DispatchGroup {
                    fingerprint,
                    spec,
                    members: vec![member],
                });
            }
        }
    }

    grouping
}

fn log_drop(event: &RawEvent, reason: &DropReason) {
    let message_id = event.message_id.as_deref().unwrap_or("-");
    match reason {
        DropReason::InvalidCommand(e) => {
            warn!(message_id, reason = %reason, error = %e, "Dropping event")
        }
        DropReason::MissingImage => warn!(message_id, reason = %reason, "Dropping event"),
    }
}
