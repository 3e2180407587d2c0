//! In-memory implementations of the store seams.
//!
//! Used by the test suites and by offline runs where no database is
//! available. Semantics match the PostgreSQL implementations: upserts by
//! key, conflict-ignoring inserts and a non-decreasing checkpoint.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{
    checkpoint::CheckpointStore,
    models::{InsertOutcome, TollTransaction, Vehicle},
    store::EntityStore,
};

#[derive(Default)]
struct Tables {
    vehicles: BTreeMap<String, Vehicle>,
    transactions: BTreeMap<String, TollTransaction>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_vehicle(&self, vehicle: Vehicle) {
        self.tables
            .lock()
            .await
            .vehicles
            .insert(vehicle.vehicle_id.clone(), vehicle);
    }

    pub async fn vehicles(&self) -> Vec<Vehicle> {
        self.tables.lock().await.vehicles.values().cloned().collect()
    }

    pub async fn transactions(&self) -> Vec<TollTransaction> {
        self.tables
            .lock()
            .await
            .transactions
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        Ok(self.tables.lock().await.vehicles.get(vehicle_id).cloned())
    }

    async fn upsert_vehicle_registration(
        &self,
        vehicle_id: &str,
        owner: &str,
        registration_time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        let last_toll_time = tables
            .vehicles
            .get(vehicle_id)
            .and_then(|v| v.last_toll_time);

        let mut vehicle = Vehicle::registered(
            vehicle_id.to_string(),
            owner.to_string(),
            registration_time,
        );
        vehicle.last_toll_time = last_toll_time;
        tables.vehicles.insert(vehicle_id.to_string(), vehicle);
        Ok(())
    }

    async fn set_vehicle_blacklisted(
        &self,
        vehicle_id: &str,
        is_blacklisted: bool,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.vehicles.get_mut(vehicle_id) {
            Some(vehicle) => {
                vehicle.is_blacklisted = is_blacklisted;
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn insert_toll_transaction(
        &self,
        tx: &TollTransaction,
    ) -> anyhow::Result<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.transactions.contains_key(&tx.transaction_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        tables
            .transactions
            .insert(tx.transaction_id.clone(), tx.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn touch_vehicle_last_toll(
        &self,
        vehicle_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(vehicle) = tables.vehicles.get_mut(vehicle_id) {
            vehicle.last_toll_time = Some(vehicle.last_toll_time.map_or(at, |t| t.max(at)));
        }
        Ok(())
    }
}

/// Checkpoint held in memory; remembers every accepted save.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    saves: Mutex<Vec<u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(block: u64) -> Self {
        Self {
            saves: Mutex::new(vec![block]),
        }
    }

    /// Accepted saves in order (including the starting value, if any).
    pub async fn history(&self) -> Vec<u64> {
        self.saves.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self) -> anyhow::Result<Option<u64>> {
        Ok(self.saves.lock().await.last().copied())
    }

    async fn save(&self, block: u64) -> anyhow::Result<()> {
        let mut saves = self.saves.lock().await;
        if saves.last().is_some_and(|&last| last > block) {
            return Ok(());
        }
        saves.push(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::TollStatus;

    fn tx(id: &str) -> TollTransaction {
        TollTransaction {
            transaction_id: id.to_string(),
            vehicle_id: "DL01AB1234".to_string(),
            payer: "0xaaa".to_string(),
            amount: "1000".to_string(),
            amount_eth: 0.0,
            zk_proof_hash: "0x00".to_string(),
            status: TollStatus::Confirmed,
            blockchain_tx_hash: "0x01".to_string(),
            block_number: 1,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_transaction_rejected() {
        let store = MemoryStore::new();
        assert_eq!(
            store.insert_toll_transaction(&tx("toll_1")).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_toll_transaction(&tx("toll_1")).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.transactions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_never_decreases() {
        let store = MemoryCheckpointStore::starting_at(100);
        store.save(110).await.unwrap();
        store.save(105).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(110));
        assert_eq!(store.history().await, vec![100, 110]);
    }

    #[tokio::test]
    async fn test_last_toll_time_only_moves_forward() {
        let store = MemoryStore::new();
        let t0 = DateTime::from_timestamp(1_000, 0).unwrap();
        let t1 = DateTime::from_timestamp(2_000, 0).unwrap();
        store
            .upsert_vehicle_registration("V1", "0xaaa", t0)
            .await
            .unwrap();

        store.touch_vehicle_last_toll("V1", t1).await.unwrap();
        store.touch_vehicle_last_toll("V1", t0).await.unwrap();

        let vehicle = store.find_vehicle("V1").await.unwrap().unwrap();
        assert_eq!(vehicle.last_toll_time, Some(t1));
    }
}
