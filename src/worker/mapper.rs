//! Event mapper: applies decoded toll registry events to the entity store.
//!
//! Every handler is idempotent so a window replayed after a restart leaves
//! the store unchanged. Handlers return the notifications to send instead of
//! sending them; the caller owns delivery.

use std::sync::Arc;

use anyhow::anyhow;
use log::{error, info, warn};
use serde_json::json;

use crate::{
    chain::{ChainEvent, TollEvent},
    db::{
        models::{InsertOutcome, TollStatus, TollTransaction},
        EntityStore,
    },
    pubsub::{Notification, TOLL_PAYMENT_COMPLETED, TRANSACTION_NEW, VEHICLE_BLACKLIST_UPDATED},
    utils::{u256_to_f64, unix_to_datetime, NATIVE_DECIMALS},
};

/// Totals for one batch of events.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub applied: usize,
    pub failed: usize,
    pub notifications: Vec<Notification>,
}

pub struct EventMapper {
    store: Arc<dyn EntityStore>,
}

impl EventMapper {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Apply events in the given order. A failing event is logged and the
    /// rest of the batch still runs.
    pub async fn apply_batch(&self, events: &[ChainEvent]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for event in events {
            match self.apply(event).await {
                Ok(mut notifications) => {
                    outcome.applied += 1;
                    outcome.notifications.append(&mut notifications);
                },
                Err(e) => {
                    outcome.failed += 1;
                    error!(
                        "[MAPPER] Failed to apply {} at block {} (tx {}): {:#}",
                        event.name(),
                        event.block_number,
                        event.transaction_hash,
                        e
                    );
                },
            }
        }

        outcome
    }

    pub async fn apply(&self, event: &ChainEvent) -> anyhow::Result<Vec<Notification>> {
        match &event.event {
            TollEvent::VehicleRegistered {
                owner,
                vehicle_id,
                timestamp,
            } => self.on_vehicle_registered(owner, vehicle_id, *timestamp).await,
            TollEvent::TollPaid { .. } => self.on_toll_paid(event).await,
            TollEvent::VehicleBlacklisted {
                vehicle_id,
                is_blacklisted,
                ..
            } => self.on_vehicle_blacklisted(vehicle_id, *is_blacklisted).await,
        }
    }

    async fn on_vehicle_registered(
        &self,
        owner: &str,
        vehicle_id: &str,
        timestamp: u64,
    ) -> anyhow::Result<Vec<Notification>> {
        self.store
            .upsert_vehicle_registration(vehicle_id, owner, unix_to_datetime(timestamp))
            .await?;

        info!("[MAPPER] Vehicle {} registered to {}", vehicle_id, owner);
        Ok(Vec::new())
    }

    async fn on_toll_paid(&self, event: &ChainEvent) -> anyhow::Result<Vec<Notification>> {
        let TollEvent::TollPaid {
            payer,
            vehicle_id,
            amount,
            toll_id,
            zk_proof_hash,
            timestamp,
        } = &event.event
        else {
            return Err(anyhow!("on_toll_paid called with {}", event.name()));
        };

        // Without a known vehicle there is nothing valid to attach the toll to
        if self.store.find_vehicle(vehicle_id).await?.is_none() {
            return Err(anyhow!(
                "toll {} references unknown vehicle {}",
                toll_id,
                vehicle_id
            ));
        }

        let tx = TollTransaction {
            transaction_id: TollTransaction::transaction_id_for(*toll_id),
            vehicle_id: vehicle_id.clone(),
            payer: payer.clone(),
            amount: amount.to_string(),
            amount_eth: u256_to_f64(*amount, NATIVE_DECIMALS),
            zk_proof_hash: zk_proof_hash.clone(),
            status: TollStatus::Confirmed,
            blockchain_tx_hash: event.transaction_hash.clone(),
            block_number: event.block_number,
            timestamp: unix_to_datetime(*timestamp),
        };

        let outcome = self.store.insert_toll_transaction(&tx).await?;

        // Touch on replays too: a previous attempt may have stopped between
        // the insert and this update. The update never moves the time back.
        self.store
            .touch_vehicle_last_toll(vehicle_id, tx.timestamp)
            .await?;

        if outcome == InsertOutcome::Duplicate {
            info!(
                "[MAPPER] Toll {} already recorded, skipping notifications",
                tx.transaction_id
            );
            return Ok(Vec::new());
        }

        info!(
            "[MAPPER] Toll {} paid for {} by {} ({} ETH)",
            tx.transaction_id, vehicle_id, payer, tx.amount_eth
        );

        let completed = json!({
            "transactionId": tx.transaction_id,
            "vehicleId": tx.vehicle_id,
            "amount": tx.amount,
            "amountEth": tx.amount_eth,
            "txHash": tx.blockchain_tx_hash,
            "blockNumber": tx.block_number,
            "timestamp": tx.timestamp,
        });

        Ok(vec![
            Notification::new(payer.clone(), TRANSACTION_NEW, serde_json::to_value(&tx)?),
            Notification::new(payer.clone(), TOLL_PAYMENT_COMPLETED, completed),
        ])
    }

    async fn on_vehicle_blacklisted(
        &self,
        vehicle_id: &str,
        is_blacklisted: bool,
    ) -> anyhow::Result<Vec<Notification>> {
        let Some(vehicle) = self.store.find_vehicle(vehicle_id).await? else {
            warn!(
                "[MAPPER] Blacklist update for unknown vehicle {}, ignoring",
                vehicle_id
            );
            return Ok(Vec::new());
        };

        if !self
            .store
            .set_vehicle_blacklisted(vehicle_id, is_blacklisted)
            .await?
        {
            warn!(
                "[MAPPER] Vehicle {} disappeared before blacklist update",
                vehicle_id
            );
            return Ok(Vec::new());
        }

        info!(
            "[MAPPER] Vehicle {} blacklisted = {}",
            vehicle_id, is_blacklisted
        );

        Ok(vec![Notification::new(
            vehicle.owner,
            VEHICLE_BLACKLIST_UPDATED,
            json!({
                "vehicleId": vehicle_id,
                "isBlacklisted": is_blacklisted,
            }),
        )])
    }
}
