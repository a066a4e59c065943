//! Queue message as seen by the dispatcher

use aws_sdk_sqs::types::Message;
use std::collections::HashMap;

/// One message received from the queue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEvent {
    /// Queue-assigned id, for logging only
    pub message_id: Option<String>,
    /// Opaque body, expected (never checked) to be a JSON value
    pub body: String,
    /// String message attributes (`image`, `size`, `command`)
    pub attributes: HashMap<String, String>,
    /// Receipt handle needed to delete the message
    pub receipt_handle: String,
}

impl RawEvent {
    pub fn new(body: impl Into<String>, receipt_handle: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            ..Default::default()
        }
    }

    /// Set a message attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

impl From<Message> for RawEvent {
    fn from(message: Message) -> Self {
        let attributes = message
            .message_attributes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| value.string_value.map(|v| (name, v)))
            .collect();

        Self {
            message_id: message.message_id,
            body: message.body.unwrap_or_default(),
            attributes,
            receipt_handle: message.receipt_handle.unwrap_or_default(),
        }
    }
}
