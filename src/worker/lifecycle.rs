//! Startup hook that wires the poller from settings.

use std::sync::Arc;

use anyhow::{bail, Context};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    chain::RpcChainProvider,
    config::{ChainSettings, Settings},
    db::{checkpoint, EntityStore},
    pubsub::NotificationSender,
    worker::poller::{PollerConfig, PollerHandle, PollerService},
    Database,
};

/// Contract address to poll, or `None` when running in mock mode without one.
fn contract_address(chain: &ChainSettings) -> anyhow::Result<Option<&str>> {
    match chain.contract_address.as_deref().map(str::trim) {
        Some(address) if !address.is_empty() => Ok(Some(address)),
        _ if chain.mock_mode => Ok(None),
        _ => bail!("chain.contract_address is not configured and chain.mock_mode is off"),
    }
}

/// Build the poller and start it.
///
/// Returns `Ok(None)` in mock mode when no contract is configured; any other
/// configuration problem is an error and the poller is not started.
pub async fn start_poller(
    settings: &Settings,
    db: &Database,
    notifications: NotificationSender,
    cancellation_token: &CancellationToken,
) -> anyhow::Result<Option<PollerHandle>> {
    let Some(address) = contract_address(&settings.chain)? else {
        warn!("[POLLER] No contract address configured, running in mock mode without the poller");
        return Ok(None);
    };

    let provider = RpcChainProvider::new(&settings.chain.rpc_url, address)
        .context("Failed to create chain provider")?;
    info!(
        "[POLLER] Watching toll registry {} via {}",
        provider.contract(),
        settings.chain.rpc_url
    );

    let store: Arc<dyn EntityStore> = db.postgres.clone();
    let checkpoint = checkpoint::from_settings(&settings.checkpoint, db.postgres.clone());

    let poller = PollerService::new(
        Arc::new(provider),
        store,
        checkpoint,
        notifications,
        PollerConfig::from(&settings.chain),
    );

    Ok(Some(poller.start(cancellation_token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(address: Option<&str>, mock_mode: bool) -> ChainSettings {
        ChainSettings {
            rpc_url: "http://localhost:8545".to_string(),
            contract_address: address.map(str::to_string),
            mock_mode,
            poll_interval_ms: 5_000,
            max_block_range: 10,
            rate_limit_block_range: 5,
            window_delay_ms: 0,
            backfill_window: 100,
            rate_limit_backoff_ms: 0,
            max_rate_limit_backoff_ms: 0,
            shutdown_grace_secs: 1,
        }
    }

    #[test]
    fn test_missing_contract_is_fatal_without_mock_mode() {
        assert!(contract_address(&chain(None, false)).is_err());
        assert!(contract_address(&chain(Some("  "), false)).is_err());
    }

    #[test]
    fn test_mock_mode_skips_poller() {
        assert_eq!(contract_address(&chain(None, true)).unwrap(), None);
    }

    #[test]
    fn test_configured_contract_wins_over_mock_mode() {
        let settings = chain(Some("0x5FbDB2315678afecb367f032d93F642f64180aa3"), true);
        assert_eq!(
            contract_address(&settings).unwrap(),
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3")
        );
    }
}
