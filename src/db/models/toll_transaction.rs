use alloy::primitives::U256;
use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "lowercase")]
#[postgres(name = "toll_status")]
pub enum TollStatus {
    #[postgres(name = "pending")]
    Pending,
    #[postgres(name = "confirmed")]
    Confirmed,
    #[postgres(name = "failed")]
    Failed,
}

/// Toll payment recorded from a `TollPaid` event (PostgreSQL).
///
/// `transaction_id` is derived from the on-chain toll id and is the table's
/// primary key, so a replayed event collides instead of duplicating the row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TollTransaction {
    pub transaction_id: String,
    pub vehicle_id: String,
    pub payer: String,
    /// Amount in wei as a decimal string
    pub amount: String,
    /// Amount in whole native units, for display
    pub amount_eth: f64,
    pub zk_proof_hash: String,
    pub status: TollStatus,
    pub blockchain_tx_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

impl TollTransaction {
    pub fn transaction_id_for(toll_id: U256) -> String {
        format!("toll_{}", toll_id)
    }
}

/// Result of inserting a row keyed by a unique id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}
