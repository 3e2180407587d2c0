use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::error;

use crate::db::models::{InsertOutcome, PollerCheckpoint, TollTransaction, Vehicle};
use crate::db::postgres::PostgresClient;
use crate::db::store::EntityStore;

/// Sanitize a string for PostgreSQL by removing null bytes (0x00)
/// which are invalid in UTF-8 text columns
fn sanitize_string(s: &str) -> String {
    s.replace('\0', "")
}

impl PostgresClient {
    // ==================== VEHICLES ====================

    /// Get a vehicle by its registration id
    pub async fn get_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT vehicle_id, owner, is_active, is_blacklisted, registration_time, last_toll_time
            FROM tollchain.vehicles
            WHERE vehicle_id = $1
        "#;

        let vehicle_id = sanitize_string(vehicle_id);
        let row = client.query_opt(query, &[&vehicle_id]).await?;

        Ok(row.map(|r| Vehicle {
            vehicle_id: r.get("vehicle_id"),
            owner: r.get("owner"),
            is_active: r.get("is_active"),
            is_blacklisted: r.get("is_blacklisted"),
            registration_time: r.get("registration_time"),
            last_toll_time: r.get("last_toll_time"),
        }))
    }

    /// Insert or update a vehicle from its on-chain registration
    pub async fn upsert_vehicle(&self, vehicle: &Vehicle) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tollchain.vehicles (
                vehicle_id, owner, is_active, is_blacklisted, registration_time, updated_at
            ) VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (vehicle_id) DO UPDATE SET
                owner = EXCLUDED.owner,
                is_active = EXCLUDED.is_active,
                is_blacklisted = EXCLUDED.is_blacklisted,
                registration_time = EXCLUDED.registration_time,
                updated_at = NOW()
        "#;

        let vehicle_id = sanitize_string(&vehicle.vehicle_id);

        client
            .execute(
                query,
                &[
                    &vehicle_id,
                    &vehicle.owner,
                    &vehicle.is_active,
                    &vehicle.is_blacklisted,
                    &vehicle.registration_time,
                ],
            )
            .await
            .map_err(|e| {
                error!("Failed to upsert vehicle {}: {:?}", vehicle.vehicle_id, e);
                e
            })?;

        Ok(())
    }

    /// Set the blacklist flag. Returns the number of rows touched.
    pub async fn set_vehicle_blacklist_flag(
        &self,
        vehicle_id: &str,
        is_blacklisted: bool,
    ) -> anyhow::Result<u64> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE tollchain.vehicles
            SET is_blacklisted = $2, updated_at = NOW()
            WHERE vehicle_id = $1
        "#;

        let vehicle_id = sanitize_string(vehicle_id);
        let updated = client
            .execute(query, &[&vehicle_id, &is_blacklisted])
            .await?;

        Ok(updated)
    }

    /// Advance a vehicle's last toll time (never moves it backwards)
    pub async fn set_vehicle_last_toll_time(
        &self,
        vehicle_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            UPDATE tollchain.vehicles
            SET last_toll_time = GREATEST(COALESCE(last_toll_time, $2), $2),
                updated_at = NOW()
            WHERE vehicle_id = $1
        "#;

        let vehicle_id = sanitize_string(vehicle_id);
        client.execute(query, &[&vehicle_id, &at]).await?;

        Ok(())
    }

    // ==================== TOLL TRANSACTIONS ====================

    /// Insert a toll transaction; a row with the same transaction_id wins
    pub async fn insert_toll_transaction_row(
        &self,
        tx: &TollTransaction,
    ) -> anyhow::Result<InsertOutcome> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tollchain.toll_transactions (
                transaction_id, vehicle_id, payer, amount, amount_eth, zk_proof_hash,
                status, blockchain_tx_hash, block_number, timestamp
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (transaction_id) DO NOTHING
        "#;

        let vehicle_id = sanitize_string(&tx.vehicle_id);
        let block_number = i64::try_from(tx.block_number)?;

        let inserted = client
            .execute(
                query,
                &[
                    &tx.transaction_id,
                    &vehicle_id,
                    &tx.payer,
                    &tx.amount,
                    &tx.amount_eth,
                    &tx.zk_proof_hash,
                    &tx.status,
                    &tx.blockchain_tx_hash,
                    &block_number,
                    &tx.timestamp,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    "Failed to insert toll transaction {}: {:?}",
                    tx.transaction_id, e
                );
                e
            })?;

        Ok(if inserted == 0 {
            InsertOutcome::Duplicate
        } else {
            InsertOutcome::Inserted
        })
    }

    // ==================== POLLER CHECKPOINT ====================

    /// Get the poller checkpoint stored under `name`
    pub async fn get_poller_checkpoint(
        &self,
        name: &str,
    ) -> anyhow::Result<Option<PollerCheckpoint>> {
        let client = self.pool.get().await?;
        let query = "SELECT name, last_processed_block, updated_at FROM tollchain.poller_checkpoints WHERE name = $1";

        let row = client.query_opt(query, &[&name]).await?;

        row.map(|r| {
            let block: i64 = r.get("last_processed_block");
            Ok(PollerCheckpoint {
                name: r.get("name"),
                last_processed_block: u64::try_from(block)?,
                updated_at: r.get("updated_at"),
            })
        })
        .transpose()
    }

    /// Set the poller checkpoint. A lower block than the stored one is ignored.
    pub async fn set_poller_checkpoint(&self, checkpoint: &PollerCheckpoint) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tollchain.poller_checkpoints (name, last_processed_block, updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET
                last_processed_block = EXCLUDED.last_processed_block,
                updated_at = EXCLUDED.updated_at
            WHERE tollchain.poller_checkpoints.last_processed_block <= EXCLUDED.last_processed_block
        "#;

        let block = i64::try_from(checkpoint.last_processed_block)?;

        client
            .execute(query, &[&checkpoint.name, &block, &checkpoint.updated_at])
            .await
            .map_err(|e| {
                error!(
                    "Failed to update poller checkpoint {}: {:?}",
                    checkpoint.name, e
                );
                e
            })?;

        Ok(())
    }
}

#[async_trait]
impl EntityStore for PostgresClient {
    async fn find_vehicle(&self, vehicle_id: &str) -> anyhow::Result<Option<Vehicle>> {
        self.get_vehicle(vehicle_id).await
    }

    async fn upsert_vehicle_registration(
        &self,
        vehicle_id: &str,
        owner: &str,
        registration_time: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let vehicle = Vehicle::registered(
            vehicle_id.to_string(),
            owner.to_string(),
            registration_time,
        );
        self.upsert_vehicle(&vehicle).await
    }

    async fn set_vehicle_blacklisted(
        &self,
        vehicle_id: &str,
        is_blacklisted: bool,
    ) -> anyhow::Result<bool> {
        let updated = self
            .set_vehicle_blacklist_flag(vehicle_id, is_blacklisted)
            .await?;
        Ok(updated > 0)
    }

    async fn insert_toll_transaction(
        &self,
        tx: &TollTransaction,
    ) -> anyhow::Result<InsertOutcome> {
        self.insert_toll_transaction_row(tx).await
    }

    async fn touch_vehicle_last_toll(
        &self,
        vehicle_id: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.set_vehicle_last_toll_time(vehicle_id, at).await
    }
}
