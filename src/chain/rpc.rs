//! JSON-RPC provider backed by alloy.

use std::{future::Future, str::FromStr, time::Duration};

use alloy::{
    primitives::{Address, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::Filter,
    transports::{RpcError, TransportError, TransportResult},
};
use anyhow::Context;
use async_trait::async_trait;
use log::{debug, info, warn};
use url::Url;

use super::{
    events::{ChainEvent, EventName},
    parser::parse_logs,
    provider::{ChainProvider, FilterHandle, ProviderError, ProviderResult},
};

/// Timeout for individual RPC calls (30 seconds)
const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON-RPC error code for an unsupported method
const METHOD_NOT_FOUND: i64 = -32601;

/// Error codes providers use for "request limit exceeded"
const RATE_LIMIT_CODES: [i64; 2] = [429, -32005];

const RATE_LIMIT_MARKERS: [&str; 4] = [
    "rate limit",
    "too many requests",
    "limit exceeded",
    "exceeded its compute units",
];

const FILTER_EXPIRED_MARKERS: [&str; 3] = ["filter not found", "filter expired", "unknown filter"];

/// Toll registry provider speaking Ethereum JSON-RPC over HTTP.
#[derive(Clone)]
pub struct RpcChainProvider {
    provider: DynProvider,
    contract: Address,
}

impl RpcChainProvider {
    pub fn new(rpc_url: &str, contract_address: &str) -> anyhow::Result<Self> {
        let url = Url::parse(rpc_url).context("Invalid RPC URL")?;
        let contract = Address::from_str(contract_address)
            .with_context(|| format!("Invalid toll registry address: {}", contract_address))?;

        let client = ProviderBuilder::new().connect_http(url);
        let provider = DynProvider::new(client);

        info!("Connected RPC provider for toll registry {}", contract);

        Ok(Self { provider, contract })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    fn event_filter(&self, event: EventName) -> Filter {
        Filter::new()
            .address(self.contract)
            .event_signature(event.signature_hash())
    }
}

async fn with_timeout<T, F>(what: &str, fut: F) -> TransportResult<T>
where
    F: Future<Output = TransportResult<T>>,
{
    match tokio::time::timeout(RPC_CALL_TIMEOUT, fut).await {
        Ok(res) => res,
        Err(_) => Err(RpcError::local_usage_str(&format!(
            "{} timed out after {:?}",
            what, RPC_CALL_TIMEOUT
        ))),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let haystack = haystack.to_lowercase();
    needles.iter().any(|n| haystack.contains(n))
}

pub(crate) fn is_rate_limited(err: &TransportError) -> bool {
    match err {
        RpcError::ErrorResp(resp) => {
            RATE_LIMIT_CODES.contains(&resp.code) || contains_any(&resp.message, &RATE_LIMIT_MARKERS)
        },
        RpcError::Transport(kind) => kind
            .as_http_error()
            .is_some_and(|e| e.status == 429 || contains_any(&e.body, &RATE_LIMIT_MARKERS)),
        _ => false,
    }
}

pub(crate) fn is_filter_expired(err: &TransportError) -> bool {
    match err {
        RpcError::ErrorResp(resp) => contains_any(&resp.message, &FILTER_EXPIRED_MARKERS),
        RpcError::Transport(kind) => kind
            .as_http_error()
            .is_some_and(|e| contains_any(&e.body, &FILTER_EXPIRED_MARKERS)),
        _ => false,
    }
}

fn is_method_not_found(err: &TransportError) -> bool {
    matches!(err, RpcError::ErrorResp(resp) if resp.code == METHOD_NOT_FOUND)
}

/// Map a transport error onto the classes the scanner acts on.
pub(crate) fn classify(err: TransportError, event: Option<EventName>) -> ProviderError {
    if is_rate_limited(&err) {
        return ProviderError::RateLimited(err.to_string());
    }
    if let Some(event) = event {
        if is_filter_expired(&err) {
            return ProviderError::FilterExpired(event);
        }
    }
    ProviderError::Other(anyhow::Error::new(err))
}

#[async_trait]
impl ChainProvider for RpcChainProvider {
    async fn get_block_number(&self) -> ProviderResult<u64> {
        with_timeout("eth_blockNumber", self.provider.get_block_number())
            .await
            .map_err(|e| classify(e, None))
    }

    async fn create_filter(&self, event: EventName) -> ProviderResult<FilterHandle> {
        let filter = self.event_filter(event);
        match with_timeout("eth_newFilter", self.provider.new_filter(&filter)).await {
            Ok(id) => {
                debug!("Installed {} filter with id {}", event, id);
                Ok(FilterHandle::new(event, Some(id)))
            },
            // Some hosted endpoints do not keep server-side filters; eth_getLogs
            // with the same topic set still works
            Err(e) if is_method_not_found(&e) => {
                warn!(
                    "Provider does not support eth_newFilter, using client-side {} filter",
                    event
                );
                Ok(FilterHandle::new(event, None))
            },
            Err(e) => Err(classify(e, Some(event))),
        }
    }

    async fn query_filter(
        &self,
        handle: &FilterHandle,
        from_block: u64,
        to_block: u64,
    ) -> ProviderResult<Vec<ChainEvent>> {
        // handle.id is not used here: eth_getFilterLogs has no block range
        let filter = self
            .event_filter(handle.event)
            .from_block(from_block)
            .to_block(to_block);

        let logs = with_timeout("eth_getLogs", self.provider.get_logs(&filter))
            .await
            .map_err(|e| classify(e, Some(handle.event)))?;

        Ok(parse_logs(&logs))
    }

    async fn uninstall_filter(&self, handle: &FilterHandle) -> ProviderResult<()> {
        let Some(id) = handle.id else {
            return Ok(());
        };

        let removed = with_timeout("eth_uninstallFilter", self.provider.uninstall_filter(id))
            .await
            .map_err(|e| classify(e, Some(handle.event)))?;

        if !removed {
            debug!("{} filter {} was already gone on the provider", handle.event, id);
        }
        Ok(())
    }

    async fn get_balance(&self, address: Address) -> ProviderResult<U256> {
        with_timeout("eth_getBalance", async {
            self.provider.get_balance(address).await
        })
        .await
        .map_err(|e| classify(e, None))
    }
}
