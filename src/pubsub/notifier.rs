//! Real-time notification dispatch.
//!
//! The event mapper only produces [`Notification`] values. They are queued on
//! a bounded channel and delivered by [`NotificationDispatcher`] on its own
//! task, so a slow or unavailable transport never holds up the poller.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// New toll transaction visible to the payer
pub const TRANSACTION_NEW: &str = "transaction:new";
/// Toll payment confirmed on chain
pub const TOLL_PAYMENT_COMPLETED: &str = "toll:payment:completed";
/// Vehicle blacklist flag changed
pub const VEHICLE_BLACKLIST_UPDATED: &str = "vehicle:blacklist:updated";

/// Upper bound for a single delivery attempt
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// A message for one user's real-time channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// User channel; the user's wallet address
    pub user_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl Notification {
    pub fn new(user_id: impl Into<String>, event: &str, payload: serde_json::Value) -> Self {
        Self {
            user_id: user_id.into(),
            event: event.to_string(),
            payload,
        }
    }
}

/// Transport delivering notifications to connected clients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user(
        &self,
        user_id: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()>;
}

/// Notifier used when no real-time transport is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_user(
        &self,
        user_id: &str,
        event: &str,
        payload: &serde_json::Value,
    ) -> anyhow::Result<()> {
        info!("[NOTIFY] {} -> {}: {}", event, user_id, payload);
        Ok(())
    }
}

pub enum NotifyMessage {
    Deliver(Notification),
    Shutdown,
}

/// Producer side of the notification queue. Never blocks.
#[derive(Clone)]
pub struct NotificationSender {
    tx: mpsc::Sender<NotifyMessage>,
}

impl NotificationSender {
    /// Queue a notification; drops it (with a warning) if the queue is full.
    pub fn enqueue(&self, notification: Notification) {
        match self.tx.try_send(NotifyMessage::Deliver(notification)) {
            Ok(()) => {},
            Err(TrySendError::Full(NotifyMessage::Deliver(n))) => {
                warn!(
                    "[NOTIFY] Queue full, dropping {} for {}",
                    n.event, n.user_id
                );
            },
            Err(TrySendError::Closed(_)) | Err(TrySendError::Full(_)) => {
                warn!("[NOTIFY] Dispatcher is not running, notification dropped");
            },
        }
    }

    /// Ask the dispatcher to stop after delivering what is already queued.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(NotifyMessage::Shutdown).await;
    }
}

/// Consumer side: delivers queued notifications through a [`Notifier`].
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    rx: mpsc::Receiver<NotifyMessage>,
}

impl NotificationDispatcher {
    pub fn channel(notifier: Arc<dyn Notifier>, capacity: usize) -> (NotificationSender, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (NotificationSender { tx }, Self { notifier, rx })
    }

    pub async fn run(mut self, cancellation_token: CancellationToken) -> anyhow::Result<()> {
        let mut delivered: u64 = 0;

        loop {
            tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(NotifyMessage::Deliver(n)) => {
                        self.deliver(&n).await;
                        delivered += 1;
                    },
                    Some(NotifyMessage::Shutdown) | None => break,
                },
                _ = cancellation_token.cancelled() => {
                    // Flush whatever is already queued, then stop
                    while let Ok(NotifyMessage::Deliver(n)) = self.rx.try_recv() {
                        self.deliver(&n).await;
                        delivered += 1;
                    }
                    break;
                }
            }
        }

        info!("[NOTIFY] Dispatcher stopped after {} notifications", delivered);
        Ok(())
    }

    async fn deliver(&self, n: &Notification) {
        let send = self.notifier.notify_user(&n.user_id, &n.event, &n.payload);
        match tokio::time::timeout(DELIVERY_TIMEOUT, send).await {
            Ok(Ok(())) => debug!("[NOTIFY] Delivered {} to {}", n.event, n.user_id),
            Ok(Err(e)) => warn!(
                "[NOTIFY] Failed to deliver {} to {}: {:#}",
                n.event, n.user_id, e
            ),
            Err(_) => warn!(
                "[NOTIFY] Delivery of {} to {} timed out after {:?}",
                n.event, n.user_id, DELIVERY_TIMEOUT
            ),
        }
    }
}
