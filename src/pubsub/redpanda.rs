//! Redpanda (Kafka-compatible) notifier implementation.
//!
//! Publishes user notifications to `{prefix}.notifications`, keyed by user id
//! so every message for one user lands on the same partition in order.

use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use serde::Serialize;

use super::notifier::Notifier;
use crate::config::RedpandaSettings;

/// Wire format consumed by the websocket gateway.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationEnvelope<'a> {
    user_id: &'a str,
    event: &'a str,
    payload: &'a serde_json::Value,
    emitted_at: DateTime<Utc>,
}

/// Redpanda publisher for real-time user notifications.
pub struct RedpandaNotifier {
    producer: FutureProducer,
    topic: String,
}

impl RedpandaNotifier {
    /// Create a new Redpanda notifier.
    ///
    /// Returns None if Redpanda is disabled in settings or connection fails.
    pub fn new(settings: &RedpandaSettings) -> Option<Self> {
        if !settings.enabled {
            info!("Redpanda publishing is disabled");
            return None;
        }

        info!("Connecting to Redpanda brokers: {}", settings.brokers);

        let producer: FutureProducer = match ClientConfig::new()
            .set("bootstrap.servers", &settings.brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .set("linger.ms", "5") // Small delay to batch messages
            .create()
        {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to create Redpanda producer: {}", e);
                return None;
            },
        };

        let topic = format!("{}.notifications", settings.topic_prefix);
        info!("Redpanda notifier initialized on topic: {}", topic);

        Some(Self { producer, topic })
    }

    /// Flush any pending messages (call on shutdown).
    pub fn flush(&self) {
        self.producer.flush(Duration::from_secs(5)).ok();
    }
}

#[async_trait]
impl Notifier for RedpandaNotifier {
    async fn notify_user(
        &self,
        user_id: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let envelope = NotificationEnvelope {
            user_id,
            event,
            payload,
            emitted_at: Utc::now(),
        };
        let body = serde_json::to_string(&envelope)?;

        let record = FutureRecord::to(&self.topic).key(user_id).payload(&body);

        // Short queue timeout: a stalled broker must not back up the dispatcher
        self.producer
            .send(record, Duration::from_millis(100))
            .await
            .map_err(|(e, _)| anyhow!("Failed to send message to {}: {}", self.topic, e))?;

        Ok(())
    }
}

impl Drop for RedpandaNotifier {
    fn drop(&mut self) {
        self.flush();
    }
}
