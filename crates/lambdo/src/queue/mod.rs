//! Queue ingestion: SQS access and the receive loop

pub mod context;
pub mod listener;
pub mod message;
pub mod sqs;

pub use context::AwsContext;
pub use listener::run_receive_loop;
pub use message::RawEvent;
pub use sqs::SqsQueue;

use async_trait::async_trait;

/// Queue operations the pipeline needs. Mockable for tests.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueOperations: Send + Sync {
    /// Receive up to one batch of events. May return an empty batch.
    async fn receive(&self) -> anyhow::Result<Vec<RawEvent>>;

    /// Acknowledge (delete) a message by its receipt handle
    async fn delete(&self, receipt_handle: &str) -> anyhow::Result<()>;
}
