//! Provider seam between the poller and the chain.
//!
//! The scanner only needs to know which class of failure a query hit, so
//! every provider implementation maps its transport errors onto
//! [`ProviderError`].

use alloy::primitives::{Address, U256};
use async_trait::async_trait;

use super::events::{ChainEvent, EventName};

/// Subscription scoped to one event signature.
///
/// `id` is the provider filter id when the endpoint supports installed
/// filters, `None` when the handle is purely client-side. The JSON-RPC
/// provider only keeps the id so the filter can be uninstalled on stop:
/// range queries go through `eth_getLogs` with the handle's event, since
/// installed filters cannot be queried for an explicit block range.
/// `FilterExpired` is therefore only raised by providers that track
/// handles themselves or report the filter as unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterHandle {
    pub event: EventName,
    pub id: Option<U256>,
}

impl FilterHandle {
    pub fn new(event: EventName, id: Option<U256>) -> Self {
        Self { event, id }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("filter not found or expired for {0}")]
    FilterExpired(EventName),
    #[error("rate limited by provider: {0}")]
    RateLimited(String),
    #[error("rpc error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }

    pub fn is_filter_expired(&self) -> bool {
        matches!(self, Self::FilterExpired(_))
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Current chain head
    async fn get_block_number(&self) -> ProviderResult<u64>;

    /// Register a filter for the event on the provider
    async fn create_filter(&self, event: EventName) -> ProviderResult<FilterHandle>;

    /// Fetch the decoded events matched by `handle` in `[from_block, to_block]`.
    ///
    /// Events are returned in ascending log order.
    async fn query_filter(
        &self,
        handle: &FilterHandle,
        from_block: u64,
        to_block: u64,
    ) -> ProviderResult<Vec<ChainEvent>>;

    /// Release a filter on the provider. Unknown filters are not an error.
    async fn uninstall_filter(&self, handle: &FilterHandle) -> ProviderResult<()>;

    async fn get_balance(&self, address: Address) -> ProviderResult<U256>;
}
