//! Pub/Sub messaging for real-time user notifications.
//!
//! The poller enqueues notifications; a dispatcher task delivers them through
//! Redpanda (Kafka-compatible) or, when that is disabled, to the log.

pub mod notifier;
mod redpanda;

pub use notifier::{
    LogNotifier, Notification, NotificationDispatcher, NotificationSender, Notifier,
    NotifyMessage, TOLL_PAYMENT_COMPLETED, TRANSACTION_NEW, VEHICLE_BLACKLIST_UPDATED,
};
pub use redpanda::RedpandaNotifier;
