use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// Work queue receiving lifecycle messages for downstream consumers.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn enqueue_message(&self, queue: &str, payload: &serde_json::Value) -> Result<(), QueueError>;
}

/// Event bus receiving lifecycle events.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_event(
        &self,
        bus: &str,
        source: &str,
        detail_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), QueueError>;
}

/// Envelope published on the event bus.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    pub source: String,
    pub detail_type: String,
    pub time: DateTime<Utc>,
    pub detail: serde_json::Value,
}

/// Redis-backed queue (lists) and event bus (pub/sub channels).
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    /// Get the current depth of a queue.
    pub async fn queue_depth(&self, queue: &str) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(queue).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }
}

#[async_trait]
impl MessageQueue for RedisBus {
    async fn enqueue_message(&self, queue: &str, payload: &serde_json::Value) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(payload).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(queue, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl EventBus for RedisBus {
    async fn publish_event(
        &self,
        bus: &str,
        source: &str,
        detail_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let envelope = EventEnvelope {
            source: source.to_string(),
            detail_type: detail_type.to_string(),
            time: Utc::now(),
            detail: payload.clone(),
        };
        let message = serde_json::to_string(&envelope).map_err(QueueError::Serialize)?;
        conn.publish::<_, _, ()>(bus, &message)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
