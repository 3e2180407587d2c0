//! Log parsing for toll registry events.
//!
//! Decodes raw RPC logs into [`ChainEvent`]s. A log that cannot be decoded is
//! reported to the caller and never aborts the rest of the batch.

use alloy::{rpc::types::Log, sol_types::SolEvent};
use anyhow::{anyhow, bail, Context};
use log::warn;

use crate::{
    abis::toll,
    chain::events::{ChainEvent, EventName, TollEvent},
    utils::{hex_encode, u256_to_u64},
};

/// Decode a single log emitted by the toll registry contract.
pub fn parse_log(log: &Log) -> anyhow::Result<ChainEvent> {
    if log.removed {
        bail!("log was removed by a reorg");
    }

    let topic0 = log.topic0().ok_or_else(|| anyhow!("log has no topics"))?;
    let name = EventName::from_signature_hash(topic0)
        .ok_or_else(|| anyhow!("unknown event signature {}", topic0))?;

    let block_number = log.block_number.ok_or_else(|| anyhow!("log has no block number"))?;
    let log_index = log.log_index.unwrap_or_default();
    let transaction_hash = log
        .transaction_hash
        .map(|h| hex_encode(h.as_slice()))
        .unwrap_or_default();

    let data = log.data();
    let event = match name {
        EventName::VehicleRegistered => {
            let e = toll::VehicleRegistered::decode_log_data(data)
                .context("failed to decode VehicleRegistered")?;
            TollEvent::VehicleRegistered {
                owner: hex_encode(e.owner.as_slice()),
                vehicle_id: e.vehicleId,
                timestamp: u256_to_u64(e.timestamp),
            }
        },
        EventName::TollPaid => {
            let e = toll::TollPaid::decode_log_data(data).context("failed to decode TollPaid")?;
            TollEvent::TollPaid {
                payer: hex_encode(e.payer.as_slice()),
                vehicle_id: e.vehicleId,
                amount: e.amount,
                toll_id: e.tollId,
                zk_proof_hash: hex_encode(e.zkProofHash.as_slice()),
                timestamp: u256_to_u64(e.timestamp),
            }
        },
        EventName::VehicleBlacklisted => {
            let e = toll::VehicleBlacklisted::decode_log_data(data)
                .context("failed to decode VehicleBlacklisted")?;
            TollEvent::VehicleBlacklisted {
                vehicle_id: e.vehicleId,
                is_blacklisted: e.isBlacklisted,
                timestamp: u256_to_u64(e.timestamp),
            }
        },
    };

    Ok(ChainEvent {
        event,
        block_number,
        log_index,
        transaction_hash,
    })
}

/// Decode a batch of logs, dropping (and logging) the ones that fail.
///
/// The result is sorted by `(block_number, log_index)`.
pub fn parse_logs(logs: &[Log]) -> Vec<ChainEvent> {
    let mut events: Vec<ChainEvent> = logs
        .iter()
        .filter_map(|log| match parse_log(log) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    "[PARSER] Skipping undecodable log in block {:?} (tx {:?}): {:#}",
                    log.block_number, log.transaction_hash, e
                );
                None
            },
        })
        .collect();

    events.sort_by_key(ChainEvent::position);
    events
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use alloy::primitives::{Address, FixedBytes, LogData, B256, U256};

    pub(crate) fn rpc_log(data: LogData, block_number: u64, log_index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: Address::repeat_byte(0x11),
                data,
            },
            block_number: Some(block_number),
            log_index: Some(log_index),
            transaction_hash: Some(B256::repeat_byte(0x22)),
            ..Default::default()
        }
    }

    fn toll_paid(toll_id: u64) -> toll::TollPaid {
        toll::TollPaid {
            payer: Address::repeat_byte(0xAA),
            vehicleId: "DL01AB1234".to_string(),
            amount: U256::from(50_000_000_000_000_000u128),
            tollId: U256::from(toll_id),
            zkProofHash: FixedBytes::repeat_byte(0x33),
            timestamp: U256::from(1_700_000_000u64),
        }
    }

    #[test]
    fn test_parse_toll_paid() {
        let log = rpc_log(toll_paid(7).encode_log_data(), 120, 3);
        let parsed = parse_log(&log).unwrap();

        assert_eq!(parsed.block_number, 120);
        assert_eq!(parsed.log_index, 3);
        assert_eq!(parsed.transaction_hash, hex_encode(&[0x22; 32]));
        match parsed.event {
            TollEvent::TollPaid {
                payer,
                vehicle_id,
                toll_id,
                timestamp,
                ..
            } => {
                assert_eq!(payer, hex_encode(&[0xAA; 20]));
                assert_eq!(vehicle_id, "DL01AB1234");
                assert_eq!(toll_id, U256::from(7));
                assert_eq!(timestamp, 1_700_000_000);
            },
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_parse_vehicle_registered() {
        let event = toll::VehicleRegistered {
            owner: Address::repeat_byte(0xAA),
            vehicleId: "DL01AB1234".to_string(),
            timestamp: U256::from(1_700_000_000u64),
        };
        let parsed = parse_log(&rpc_log(event.encode_log_data(), 101, 0)).unwrap();
        assert_eq!(parsed.name(), EventName::VehicleRegistered);
    }

    #[test]
    fn test_unknown_signature_rejected() {
        let data = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Default::default());
        assert!(parse_log(&rpc_log(data, 1, 0)).is_err());
    }

    #[test]
    fn test_removed_log_rejected() {
        let mut log = rpc_log(toll_paid(1).encode_log_data(), 5, 0);
        log.removed = true;
        assert!(parse_log(&log).is_err());
    }

    #[test]
    fn test_parse_logs_sorts_and_drops_bad_logs() {
        let bad = LogData::new_unchecked(vec![B256::repeat_byte(0x99)], Default::default());
        let logs = vec![
            rpc_log(toll_paid(2).encode_log_data(), 110, 4),
            rpc_log(bad, 105, 0),
            rpc_log(toll_paid(1).encode_log_data(), 110, 1),
            rpc_log(toll_paid(0).encode_log_data(), 102, 9),
        ];

        let events = parse_logs(&logs);
        let positions: Vec<(u64, u64)> = events.iter().map(ChainEvent::position).collect();
        assert_eq!(positions, vec![(102, 9), (110, 1), (110, 4)]);
    }
}
