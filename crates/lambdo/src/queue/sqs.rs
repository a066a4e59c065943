//! SQS-backed queue

use super::context::AwsContext;
use super::message::RawEvent;
use super::QueueOperations;
use crate::config::QueueConfig;
use crate::dispatch::event::{ATTR_COMMAND, ATTR_IMAGE, ATTR_SIZE};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_sqs::Client;
use tracing::debug;

/// Receives from and deletes on a single SQS queue.
pub struct SqsQueue {
    client: Client,
    config: QueueConfig,
}

impl SqsQueue {
    pub fn new(ctx: &AwsContext, config: QueueConfig) -> Self {
        Self {
            client: ctx.sqs_client(),
            config,
        }
    }
}

fn as_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl QueueOperations for SqsQueue {
    async fn receive(&self) -> Result<Vec<RawEvent>> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.config.queue_url)
            .max_number_of_messages(as_i32(self.config.max_messages))
            .wait_time_seconds(as_i32(self.config.long_poll_seconds))
            .visibility_timeout(as_i32(self.config.visibility_timeout))
            .message_attribute_names(ATTR_IMAGE)
            .message_attribute_names(ATTR_SIZE)
            .message_attribute_names(ATTR_COMMAND)
            .send()
            .await
            .with_context(|| format!("Failed to receive from {}", self.config.queue_url))?;

        let events: Vec<RawEvent> = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(RawEvent::from)
            .collect();

        debug!(queue_url = %self.config.queue_url, count = events.len(), "Received messages");
        Ok(events)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(&self.config.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .with_context(|| format!("Failed to delete message from {}", self.config.queue_url))?;
        Ok(())
    }
}

impl std::fmt::Debug for SqsQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueue")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
