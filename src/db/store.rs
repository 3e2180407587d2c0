//! Entity store seam for the event mapper.
//!
//! The store is shared with the HTTP layer, so implementations must make
//! each operation atomic on their own (upserts and conflict-ignoring
//! inserts) rather than relying on in-process locking.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{InsertOutcome, TollTransaction, Vehicle};

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>>;

    /// Insert or refresh a vehicle from its registration event.
    ///
    /// Sets the owner and registration time, marks it active and clears the
    /// blacklist flag.
    async fn upsert_vehicle_registration(
        &self,
        vehicle_id: &str,
        owner: &str,
        registration_time: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    /// Returns false when no vehicle with that id exists.
    async fn set_vehicle_blacklisted(
        &self,
        vehicle_id: &str,
        is_blacklisted: bool,
    ) -> anyhow::Result<bool>;

    /// Insert unless a row with the same `transaction_id` already exists.
    async fn insert_toll_transaction(&self, tx: &TollTransaction)
        -> anyhow::Result<InsertOutcome>;

    /// Move `last_toll_time` forward; an older timestamp leaves it unchanged.
    async fn touch_vehicle_last_toll(
        &self,
        vehicle_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}
