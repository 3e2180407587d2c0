use std::fmt;

use alloy::{
    primitives::{B256, U256},
    sol_types::SolEvent,
};
use serde::Serialize;

use crate::abis::toll;

/// Toll registry events the poller keeps a filter for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum EventName {
    VehicleRegistered,
    TollPaid,
    VehicleBlacklisted,
}

impl EventName {
    /// Every event, in the order filters are queried within a window.
    pub const ALL: [EventName; 3] = [
        EventName::VehicleRegistered,
        EventName::TollPaid,
        EventName::VehicleBlacklisted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::VehicleRegistered => "VehicleRegistered",
            EventName::TollPaid => "TollPaid",
            EventName::VehicleBlacklisted => "VehicleBlacklisted",
        }
    }

    /// topic0 of the event's logs
    pub fn signature_hash(&self) -> B256 {
        match self {
            EventName::VehicleRegistered => toll::VehicleRegistered::SIGNATURE_HASH,
            EventName::TollPaid => toll::TollPaid::SIGNATURE_HASH,
            EventName::VehicleBlacklisted => toll::VehicleBlacklisted::SIGNATURE_HASH,
        }
    }

    pub fn from_signature_hash(hash: &B256) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|name| &name.signature_hash() == hash)
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded arguments of a toll registry event.
///
/// Addresses and hashes are lowercase 0x-prefixed hex strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TollEvent {
    VehicleRegistered {
        owner: String,
        vehicle_id: String,
        timestamp: u64,
    },
    TollPaid {
        payer: String,
        vehicle_id: String,
        amount: U256,
        toll_id: U256,
        zk_proof_hash: String,
        timestamp: u64,
    },
    VehicleBlacklisted {
        vehicle_id: String,
        is_blacklisted: bool,
        timestamp: u64,
    },
}

impl TollEvent {
    pub fn name(&self) -> EventName {
        match self {
            TollEvent::VehicleRegistered { .. } => EventName::VehicleRegistered,
            TollEvent::TollPaid { .. } => EventName::TollPaid,
            TollEvent::VehicleBlacklisted { .. } => EventName::VehicleBlacklisted,
        }
    }
}

/// A toll registry event together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub event: TollEvent,
    pub block_number: u64,
    pub log_index: u64,
    pub transaction_hash: String,
}

impl ChainEvent {
    pub fn name(&self) -> EventName {
        self.event.name()
    }

    /// Sort key giving ascending log order across filters.
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}
