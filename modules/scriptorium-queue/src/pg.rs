//! Postgres-backed queue: lease-based dequeue with `FOR UPDATE SKIP LOCKED`.
//!
//! A consumed message is leased, not removed. Ack deletes it; nack releases
//! the lease; a crash lets the lease expire and the message comes back. The
//! message row's primary key is the stable message id workers dedup on.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use crate::{Delivery, TaskQueue};

const DEFAULT_LEASE_SECS: u64 = 120;

pub struct PgQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgQueue {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lease: Duration::from_secs(DEFAULT_LEASE_SECS),
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Create the queue schema. Safe to run on every startup.
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_messages (
                message_id UUID PRIMARY KEY,
                topic TEXT NOT NULL,
                body BYTEA NOT NULL,
                available_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                lease_expires_at TIMESTAMPTZ,
                delivery_count INT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(pool)
        .await
        .context("create queue_messages table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_queue_topic_available
             ON queue_messages (topic, available_at)",
        )
        .execute(pool)
        .await
        .context("create queue index")?;

        Ok(())
    }

    async fn insert(&self, topic: &str, body: Vec<u8>, delay: Duration) -> Result<()> {
        sqlx::query(
            "INSERT INTO queue_messages (message_id, topic, body, available_at)
             VALUES ($1, $2, $3, now() + make_interval(secs => $4))",
        )
        .bind(Uuid::new_v4())
        .bind(topic)
        .bind(body)
        .bind(delay.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("publish queue message")?;
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for PgQueue {
    async fn publish(&self, topic: &str, body: Vec<u8>) -> Result<()> {
        self.insert(topic, body, Duration::ZERO).await
    }

    async fn publish_delayed(&self, topic: &str, body: Vec<u8>, delay: Duration) -> Result<()> {
        self.insert(topic, body, delay).await
    }

    async fn consume(&self, topic: &str) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT message_id
                FROM queue_messages
                WHERE topic = $1
                  AND available_at <= now()
                  AND (lease_expires_at IS NULL OR lease_expires_at <= now())
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE queue_messages q
            SET lease_expires_at = now() + make_interval(secs => $2),
                delivery_count = q.delivery_count + 1
            FROM next
            WHERE q.message_id = next.message_id
            RETURNING q.message_id, q.body, q.delivery_count
            "#,
        )
        .bind(topic)
        .bind(self.lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .context("lease queue message")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let message_id: Uuid = row.try_get("message_id")?;
        let body: Vec<u8> = row.try_get("body")?;
        let delivery_count: i32 = row.try_get("delivery_count")?;

        debug!(topic, %message_id, delivery_count, "Leased message");
        Ok(Some(Delivery {
            message_id: message_id.to_string(),
            topic: topic.to_string(),
            body,
            redelivered: delivery_count > 1,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let id = Uuid::parse_str(&delivery.message_id).context("parse message id")?;
        sqlx::query("DELETE FROM queue_messages WHERE message_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("ack queue message")?;
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let id = Uuid::parse_str(&delivery.message_id).context("parse message id")?;
        sqlx::query(
            "UPDATE queue_messages
             SET lease_expires_at = NULL, available_at = now()
             WHERE message_id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .context("nack queue message")?;
        Ok(())
    }

    async fn extend_lease(&self, delivery: &Delivery) -> Result<()> {
        let id = Uuid::parse_str(&delivery.message_id).context("parse message id")?;
        sqlx::query(
            "UPDATE queue_messages
             SET lease_expires_at = now() + make_interval(secs => $2)
             WHERE message_id = $1",
        )
        .bind(id)
        .bind(self.lease.as_secs_f64())
        .execute(&self.pool)
        .await
        .context("extend queue lease")?;
        Ok(())
    }
}
