//! Event attribute parsing and dispatch fingerprints

use crate::queue::RawEvent;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const ATTR_IMAGE: &str = "image";
pub const ATTR_SIZE: &str = "size";
pub const ATTR_COMMAND: &str = "command";

/// Machine size used when an event has no `size` attribute
pub const DEFAULT_SIZE: &str = "performance-2x";

/// Why an event was left out of every group
#[derive(Debug, Error)]
pub enum DropReason {
    #[error("missing required attribute `image`")]
    MissingImage,

    #[error("attribute `command` is not a JSON list of strings")]
    InvalidCommand(#[source] serde_json::Error),
}

/// What an event asks to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub image: String,
    pub size: String,
    pub command: Vec<String>,
    /// `command` attribute as received, empty when absent
    pub command_text: String,
}

impl WorkloadSpec {
    /// Read the workload attributes of an event.
    ///
    /// A missing or `null` `command` means "use the image's default
    /// command"; a `command` that does not parse drops the event.
    pub fn from_event(event: &RawEvent) -> Result<Self, DropReason> {
        let image = event
            .attribute(ATTR_IMAGE)
            .ok_or(DropReason::MissingImage)?
            .to_string();

        let size = event.attribute(ATTR_SIZE).unwrap_or(DEFAULT_SIZE).to_string();

        let (command, command_text) = match event.attribute(ATTR_COMMAND) {
            Some(text) => (
                serde_json::from_str::<Option<Vec<String>>>(text)
                    .map_err(DropReason::InvalidCommand)?
                    .unwrap_or_default(),
                text.to_string(),
            ),
            None => (Vec::new(), String::new()),
        };

        Ok(Self {
            image,
            size,
            command,
            command_text,
        })
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.image, &self.size, &self.command_text)
    }
}

/// SHA-256 (lowercase hex) of the image, size and command text.
///
/// Each component is prefixed with its length so that no two distinct
/// triples hash the same input.
pub fn fingerprint(image: &str, size: &str, command_text: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [image, size, command_text] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
