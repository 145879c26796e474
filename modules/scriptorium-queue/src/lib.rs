//! At-least-once task queue abstraction.
//!
//! Consumers lease a message, do their work, then ack (done) or nack
//! (redeliver). A lease that expires without an ack is redelivered — the queue
//! never loses an unacked message, and may deliver a message more than once.
//! Exactly-once *effects* are the job store's responsibility, not the queue's.

pub mod memory;
pub mod pg;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

pub use memory::MemoryQueue;
pub use pg::PgQueue;

/// One leased message.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stable identifier for dedup: the same stored message keeps the same id
    /// across redeliveries.
    pub message_id: String,
    pub topic: String,
    pub body: Vec<u8>,
    /// True when this message has been delivered before (nack or lease expiry).
    pub redelivered: bool,
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()>;

    /// Publish a message that becomes consumable only after `delay`.
    async fn publish_delayed(&self, topic: &str, body: Vec<u8>, delay: Duration) -> Result<()>;

    /// Lease the next available message, or `None` when the topic is empty.
    async fn consume(&self, topic: &str) -> Result<Option<Delivery>>;

    /// Acknowledge: the message is done and will never be redelivered.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Negative-acknowledge: release the lease for immediate redelivery.
    async fn nack(&self, delivery: &Delivery) -> Result<()>;

    /// Keep a long-running handler's lease alive (the worker heartbeat).
    async fn extend_lease(&self, delivery: &Delivery) -> Result<()>;
}

/// Well-known topic names.
pub mod topics {
    pub const TASKS: &str = "tasks";
    pub const CONTROL: &str = "control";
    pub const ENRICHMENT: &str = "enrichment";
}
