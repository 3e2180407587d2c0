//! Scripted chain provider and event builders shared by the worker tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use alloy::primitives::{Address, U256};
use anyhow::anyhow;
use async_trait::async_trait;

use crate::chain::{
    ChainEvent, ChainProvider, EventName, FilterHandle, ProviderError, ProviderResult, TollEvent,
};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Expired,
    RateLimited,
    Other,
}

impl Failure {
    fn into_error(self, event: EventName) -> ProviderError {
        match self {
            Failure::Expired => ProviderError::FilterExpired(event),
            Failure::RateLimited => ProviderError::RateLimited("429 Too Many Requests".into()),
            Failure::Other => ProviderError::Other(anyhow!("connection reset by peer")),
        }
    }
}

struct QueryFailure {
    event: EventName,
    from_block: Option<u64>,
    failure: Failure,
}

#[derive(Default)]
struct State {
    head: u64,
    head_fails: bool,
    events: Vec<ChainEvent>,
    queries: Vec<(EventName, u64, u64)>,
    created: HashMap<EventName, usize>,
    next_filter_id: u64,
    create_failures: HashMap<EventName, VecDeque<Failure>>,
    query_failures: Vec<QueryFailure>,
    uninstalled: Vec<FilterHandle>,
}

/// In-memory provider whose chain contents and failures are set by the test.
#[derive(Default)]
pub struct ScriptedProvider {
    state: Mutex<State>,
}

impl ScriptedProvider {
    pub fn new(head: u64) -> Self {
        let provider = Self::default();
        provider.set_head(head);
        provider
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn fail_head(&self, fails: bool) {
        self.state.lock().unwrap().head_fails = fails;
    }

    pub fn push_event(&self, event: ChainEvent) {
        self.state.lock().unwrap().events.push(event);
    }

    /// Fail the next query for `event`, whatever its window.
    pub fn fail_query(&self, event: EventName, failure: Failure) {
        self.state.lock().unwrap().query_failures.push(QueryFailure {
            event,
            from_block: None,
            failure,
        });
    }

    /// Fail the next query for `event` starting at `from_block`.
    pub fn fail_query_at(&self, event: EventName, from_block: u64, failure: Failure) {
        self.state.lock().unwrap().query_failures.push(QueryFailure {
            event,
            from_block: Some(from_block),
            failure,
        });
    }

    pub fn fail_create(&self, event: EventName, failure: Failure) {
        self.state
            .lock()
            .unwrap()
            .create_failures
            .entry(event)
            .or_default()
            .push_back(failure);
    }

    pub fn queries(&self) -> Vec<(EventName, u64, u64)> {
        self.state.lock().unwrap().queries.clone()
    }

    pub fn created(&self, event: EventName) -> usize {
        self.state
            .lock()
            .unwrap()
            .created
            .get(&event)
            .copied()
            .unwrap_or_default()
    }

    pub fn uninstalled(&self) -> Vec<FilterHandle> {
        self.state.lock().unwrap().uninstalled.clone()
    }
}

#[async_trait]
impl ChainProvider for ScriptedProvider {
    async fn get_block_number(&self) -> ProviderResult<u64> {
        let state = self.state.lock().unwrap();
        if state.head_fails {
            return Err(ProviderError::Other(anyhow!("provider unreachable")));
        }
        Ok(state.head)
    }

    async fn create_filter(&self, event: EventName) -> ProviderResult<FilterHandle> {
        let mut state = self.state.lock().unwrap();
        if let Some(failure) = state
            .create_failures
            .get_mut(&event)
            .and_then(VecDeque::pop_front)
        {
            return Err(failure.into_error(event));
        }
        state.next_filter_id += 1;
        let id = U256::from(state.next_filter_id);
        *state.created.entry(event).or_default() += 1;
        Ok(FilterHandle::new(event, Some(id)))
    }

    async fn query_filter(
        &self,
        handle: &FilterHandle,
        from_block: u64,
        to_block: u64,
    ) -> ProviderResult<Vec<ChainEvent>> {
        let mut state = self.state.lock().unwrap();
        state.queries.push((handle.event, from_block, to_block));

        if let Some(pos) = state.query_failures.iter().position(|f| {
            f.event == handle.event && f.from_block.map_or(true, |b| b == from_block)
        }) {
            let failure = state.query_failures.remove(pos).failure;
            return Err(failure.into_error(handle.event));
        }

        let mut events: Vec<ChainEvent> = state
            .events
            .iter()
            .filter(|e| {
                e.name() == handle.event && e.block_number >= from_block && e.block_number <= to_block
            })
            .cloned()
            .collect();
        events.sort_by_key(ChainEvent::position);
        Ok(events)
    }

    async fn uninstall_filter(&self, handle: &FilterHandle) -> ProviderResult<()> {
        self.state.lock().unwrap().uninstalled.push(handle.clone());
        Ok(())
    }

    async fn get_balance(&self, _address: Address) -> ProviderResult<U256> {
        Ok(U256::ZERO)
    }
}

pub fn registered(block: u64, log_index: u64, vehicle_id: &str, owner: &str) -> ChainEvent {
    ChainEvent {
        event: TollEvent::VehicleRegistered {
            owner: owner.to_string(),
            vehicle_id: vehicle_id.to_string(),
            timestamp: 1_700_000_000 + block,
        },
        block_number: block,
        log_index,
        transaction_hash: format!("0xreg{}", block),
    }
}

pub fn toll_paid(block: u64, log_index: u64, vehicle_id: &str, payer: &str, toll_id: u64) -> ChainEvent {
    ChainEvent {
        event: TollEvent::TollPaid {
            payer: payer.to_string(),
            vehicle_id: vehicle_id.to_string(),
            amount: U256::from(50_000_000_000_000_000u128),
            toll_id: U256::from(toll_id),
            zk_proof_hash: "0xproof".to_string(),
            timestamp: 1_700_000_000 + block,
        },
        block_number: block,
        log_index,
        transaction_hash: format!("0xtoll{}", toll_id),
    }
}

pub fn blacklisted(block: u64, log_index: u64, vehicle_id: &str, is_blacklisted: bool) -> ChainEvent {
    ChainEvent {
        event: TollEvent::VehicleBlacklisted {
            vehicle_id: vehicle_id.to_string(),
            is_blacklisted,
            timestamp: 1_700_000_000 + block,
        },
        block_number: block,
        log_index,
        transaction_hash: format!("0xbl{}", block),
    }
}
