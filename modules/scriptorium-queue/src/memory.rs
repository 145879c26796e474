//! In-memory queue with the same lease/ack/nack contract as the Postgres
//! backend. Used by tests and local runs: no network, no database, no Docker.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::{Delivery, TaskQueue};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: Vec<u8>,
    available_at: Instant,
    delivery_count: u32,
}

#[derive(Default)]
struct Inner {
    /// topic -> messages awaiting delivery, in publish order.
    ready: HashMap<String, Vec<StoredMessage>>,
    /// message_id -> (topic, message) currently leased.
    in_flight: HashMap<String, (String, StoredMessage)>,
}

#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages awaiting delivery on `topic` (leased messages not included).
    pub fn depth(&self, topic: &str) -> usize {
        let inner = self.inner.lock().expect("queue lock");
        inner.ready.get(topic).map_or(0, |msgs| msgs.len())
    }

    /// Messages currently leased across all topics.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().expect("queue lock").in_flight.len()
    }

    fn insert(&self, topic: &str, body: Vec<u8>, delay: Duration) {
        let mut inner = self.inner.lock().expect("queue lock");
        inner.ready.entry(topic.to_string()).or_default().push(StoredMessage {
            id: Uuid::new_v4().to_string(),
            body,
            available_at: Instant::now() + delay,
            delivery_count: 0,
        });
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()> {
        self.insert(topic, body, Duration::ZERO);
        Ok(())
    }

    async fn publish_delayed(&self, topic: &str, body: Vec<u8>, delay: Duration) -> Result<()> {
        self.insert(topic, body, delay);
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<Option<Delivery>> {
        let mut inner = self.inner.lock().expect("queue lock");
        let Some(messages) = inner.ready.get_mut(topic) else {
            return Ok(None);
        };
        let now = Instant::now();
        let Some(pos) = messages.iter().position(|m| m.available_at <= now) else {
            return Ok(None);
        };
        let mut message = messages.remove(pos);
        message.delivery_count += 1;
        let delivery = Delivery {
            message_id: message.id.clone(),
            topic: topic.to_string(),
            body: message.body.clone(),
            redelivered: message.delivery_count > 1,
        };
        inner
            .in_flight
            .insert(message.id.clone(), (topic.to_string(), message));
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock");
        // Duplicate acks are no-ops, matching real at-least-once brokers.
        inner.in_flight.remove(&delivery.message_id);
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let mut inner = self.inner.lock().expect("queue lock");
        let Some((topic, mut message)) = inner.in_flight.remove(&delivery.message_id) else {
            bail!("nack for unknown delivery {}", delivery.message_id);
        };
        message.available_at = Instant::now();
        inner.ready.entry(topic).or_default().push(message);
        Ok(())
    }

    async fn extend_lease(&self, _delivery: &Delivery) -> Result<()> {
        // No lease expiry in the in-memory backend.
        Ok(())
    }
}
