use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::{
    chain::ChainProvider,
    config::ChainSettings,
    db::{CheckpointStore, EntityStore},
    pubsub::NotificationSender,
    worker::{
        mapper::EventMapper,
        scanner::{ChunkedRangeScanner, ScanConfig, ScanReport},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    #[default]
    Stopped,
    Starting,
    Polling,
    /// Last cycle failed as a whole; the next tick retries
    Degraded,
    Stopping,
}

/// Snapshot of the poller, published on a watch channel for health checks.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub state: PollerState,
    pub last_processed_block: Option<u64>,
    pub chain_head: Option<u64>,
    pub last_error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Blocks to look back on a first run without a checkpoint
    pub backfill_window: u64,
    /// How long `stop` waits for an in-flight window
    pub shutdown_grace: Duration,
    pub scan: ScanConfig,
}

impl From<&ChainSettings> for PollerConfig {
    fn from(settings: &ChainSettings) -> Self {
        Self {
            poll_interval: settings.poll_interval(),
            backfill_window: settings.backfill_window,
            shutdown_grace: settings.shutdown_grace(),
            scan: ScanConfig::from(settings),
        }
    }
}

/// Tails the toll registry contract and reconciles its events into the store.
///
/// One instance per process. All mutable poller state (filters, next block)
/// lives here and is owned by the task spawned in [`PollerService::start`],
/// so nothing is shared or locked.
pub struct PollerService {
    provider: Arc<dyn ChainProvider>,
    scanner: ChunkedRangeScanner,
    checkpoint: Arc<dyn CheckpointStore>,
    config: PollerConfig,
    status_tx: watch::Sender<PollerStatus>,
    /// First block of the next scan; `None` until loaded from the checkpoint
    next_block: Option<u64>,
}

impl PollerService {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        store: Arc<dyn EntityStore>,
        checkpoint: Arc<dyn CheckpointStore>,
        notifications: NotificationSender,
        config: PollerConfig,
    ) -> Self {
        let scanner = ChunkedRangeScanner::new(
            provider.clone(),
            EventMapper::new(store),
            checkpoint.clone(),
            notifications,
            config.scan.clone(),
        );
        let (status_tx, _) = watch::channel(PollerStatus::default());

        Self {
            provider,
            scanner,
            checkpoint,
            config,
            status_tx,
            next_block: None,
        }
    }

    pub fn status(&self) -> watch::Receiver<PollerStatus> {
        self.status_tx.subscribe()
    }

    /// Spawn the polling loop. Cancelling `parent` also stops the poller.
    pub fn start(self, parent: &CancellationToken) -> PollerHandle {
        let cancel = parent.child_token();
        let status = self.status();
        let grace = self.config.shutdown_grace;

        let token = cancel.clone();
        let handle = tokio::spawn(self.run(token));

        PollerHandle {
            cancel,
            handle,
            status,
            grace,
        }
    }

    async fn run(mut self, cancellation_token: CancellationToken) {
        self.set_state(PollerState::Starting);

        let resolved = self.scanner.registry_mut().resolve_all().await;
        info!("[POLLER] Starting with {} event filter(s)", resolved);

        let mut interval = tokio::time::interval(self.config.poll_interval);
        // A tick missed while a scan is running is dropped, never queued
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.set_state(PollerState::Polling);

        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => {
                    info!("[POLLER] Received cancellation signal");
                    break;
                }
                _ = interval.tick() => {
                    self.poll_once(&cancellation_token).await;
                }
            }
        }

        self.set_state(PollerState::Stopping);
        self.scanner.release_filters().await;
        self.set_state(PollerState::Stopped);
        info!("[POLLER] Stopped");
    }

    /// Run one cycle and record its outcome in the status.
    pub async fn poll_once(&mut self, cancellation_token: &CancellationToken) {
        match self.tick(cancellation_token).await {
            Ok(_) => {
                self.status_tx.send_modify(|s| {
                    if s.state == PollerState::Degraded {
                        info!("[POLLER] Recovered");
                    }
                    s.state = PollerState::Polling;
                    s.last_error = None;
                    s.updated_at = Some(Utc::now());
                });
            },
            Err(e) => {
                error!("[POLLER] Poll cycle failed: {:#}", e);
                // Provider may have restarted; recreate all filters next cycle
                self.scanner.registry_mut().invalidate_all();
                self.status_tx.send_modify(|s| {
                    s.state = PollerState::Degraded;
                    s.last_error = Some(format!("{:#}", e));
                    s.updated_at = Some(Utc::now());
                });
            },
        }
    }

    /// Scan from the next unprocessed block up to the current head.
    ///
    /// Returns `None` when there was nothing new.
    async fn tick(
        &mut self,
        cancellation_token: &CancellationToken,
    ) -> anyhow::Result<Option<ScanReport>> {
        let head = self
            .provider
            .get_block_number()
            .await
            .context("Failed to fetch chain head")?;
        self.status_tx.send_modify(|s| s.chain_head = Some(head));

        let from = match self.next_block {
            Some(block) => block,
            None => {
                let block = self.resume_from(head).await?;
                self.next_block = Some(block);
                block
            },
        };

        if from > head {
            debug!("[POLLER] Up to date at block {}", head);
            return Ok(None);
        }

        let report = match self.scanner.scan(from, head, cancellation_token).await {
            Ok(report) => report,
            Err(e) => {
                // Re-read the durable watermark before the next attempt
                self.next_block = None;
                return Err(e);
            },
        };

        if let Some(saved) = report.last_saved {
            self.next_block = saved.checked_add(1);
            self.status_tx
                .send_modify(|s| s.last_processed_block = Some(saved));
        }

        if report.events_applied > 0 || report.events_failed > 0 {
            info!(
                "[POLLER] Blocks {}-{}: {} event(s) applied, {} failed, {} window(s)",
                from,
                report.last_saved.unwrap_or(from),
                report.events_applied,
                report.events_failed,
                report.windows
            );
        }
        if !report.skipped.is_empty() {
            warn!(
                "[POLLER] {} event query(ies) skipped this cycle",
                report.skipped.len()
            );
        }

        Ok(Some(report))
    }

    async fn resume_from(&self, head: u64) -> anyhow::Result<u64> {
        let checkpoint = self
            .checkpoint
            .load()
            .await
            .context("Failed to load checkpoint")?;

        Ok(match checkpoint {
            Some(block) => {
                info!("[POLLER] Resuming after checkpoint {}", block);
                self.status_tx
                    .send_modify(|s| s.last_processed_block = Some(block));
                block.saturating_add(1)
            },
            None => {
                let start = head.saturating_sub(self.config.backfill_window);
                info!(
                    "[POLLER] No checkpoint, backfilling from block {} (head {})",
                    start, head
                );
                start
            },
        })
    }

    fn set_state(&self, state: PollerState) {
        self.status_tx.send_modify(|s| {
            s.state = state;
            s.updated_at = Some(Utc::now());
        });
    }
}

/// Handle to a running poller.
pub struct PollerHandle {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    status: watch::Receiver<PollerStatus>,
    grace: Duration,
}

impl PollerHandle {
    pub fn status(&self) -> watch::Receiver<PollerStatus> {
        self.status.clone()
    }

    /// Signal shutdown and wait for the in-flight window, up to the grace period.
    pub async fn stop(self) {
        info!("[POLLER] Stopping");
        self.cancel.cancel();

        let abort = self.handle.abort_handle();
        match tokio::time::timeout(self.grace, self.handle).await {
            Ok(Ok(())) => info!("[POLLER] Stopped gracefully"),
            Ok(Err(e)) => error!("[POLLER] Poller task failed: {}", e),
            Err(_) => {
                warn!(
                    "[POLLER] Did not stop within {:?}, aborting in-flight scan",
                    self.grace
                );
                abort.abort();
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::chain::EventName;
    use crate::db::{MemoryCheckpointStore, MemoryStore};
    use crate::pubsub::{LogNotifier, NotificationDispatcher, NotificationSender};
    use crate::worker::test_support::{registered, toll_paid, ScriptedProvider};

    fn config() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(10),
            backfill_window: 100,
            shutdown_grace: Duration::from_secs(5),
            scan: ScanConfig {
                max_block_range: 10,
                rate_limit_block_range: 5,
                window_delay: Duration::ZERO,
                rate_limit_backoff: Duration::ZERO,
                max_rate_limit_backoff: Duration::ZERO,
            },
        }
    }

    fn sender() -> NotificationSender {
        let (sender, dispatcher) = NotificationDispatcher::channel(Arc::new(LogNotifier), 64);
        tokio::spawn(dispatcher.run(CancellationToken::new()));
        sender
    }

    fn service(
        provider: Arc<ScriptedProvider>,
        store: Arc<MemoryStore>,
        checkpoint: Arc<dyn CheckpointStore>,
    ) -> PollerService {
        PollerService::new(provider, store, checkpoint, sender(), config())
    }

    #[tokio::test]
    async fn test_first_run_backfill_is_capped() {
        let provider = Arc::new(ScriptedProvider::new(500));
        let checkpoint = Arc::new(MemoryCheckpointStore::new());
        let mut poller = service(provider.clone(), Arc::new(MemoryStore::new()), checkpoint.clone());

        poller.poll_once(&CancellationToken::new()).await;

        let first = provider.queries()[0];
        assert_eq!((first.1, first.2), (400, 409));
        assert_eq!(checkpoint.load().await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn test_backfill_on_young_chain_starts_at_genesis() {
        let provider = Arc::new(ScriptedProvider::new(30));
        let checkpoint = Arc::new(MemoryCheckpointStore::new());
        let mut poller = service(provider.clone(), Arc::new(MemoryStore::new()), checkpoint.clone());

        poller.poll_once(&CancellationToken::new()).await;

        assert_eq!(provider.queries()[0].1, 0);
        assert_eq!(checkpoint.history().await, vec![9, 19, 29, 30]);
    }

    #[tokio::test]
    async fn test_checkpoint_advances_monotonically_across_ticks() {
        let provider = Arc::new(ScriptedProvider::new(125));
        let store = Arc::new(MemoryStore::new());
        let checkpoint = Arc::new(MemoryCheckpointStore::starting_at(100));
        let mut poller = service(provider.clone(), store.clone(), checkpoint.clone());
        let token = CancellationToken::new();

        provider.push_event(registered(104, 0, "V1", "0xaaa"));
        provider.push_event(toll_paid(131, 0, "V1", "0xaaa", 1));

        poller.poll_once(&token).await;
        // Head unchanged: nothing to scan
        poller.poll_once(&token).await;
        provider.set_head(140);
        poller.poll_once(&token).await;

        assert_eq!(
            checkpoint.history().await,
            vec![100, 110, 120, 125, 135, 140]
        );
        assert_eq!(store.transactions().await.len(), 1);
        assert_eq!(poller.status().borrow().last_processed_block, Some(140));
    }

    #[tokio::test]
    async fn test_restart_replays_from_checkpoint_without_duplicates() {
        let provider = Arc::new(ScriptedProvider::new(110));
        let store = Arc::new(MemoryStore::new());
        let checkpoint = Arc::new(MemoryCheckpointStore::starting_at(100));
        provider.push_event(registered(101, 0, "V1", "0xaaa"));
        provider.push_event(toll_paid(105, 0, "V1", "0xaaa", 7));

        let mut first = service(provider.clone(), store.clone(), checkpoint.clone());
        first.poll_once(&CancellationToken::new()).await;

        // Same window delivered again to a fresh poller
        let replay = Arc::new(MemoryCheckpointStore::starting_at(100));
        let mut second = service(provider.clone(), store.clone(), replay);
        second.poll_once(&CancellationToken::new()).await;

        assert_eq!(store.transactions().await.len(), 1);
        assert_eq!(store.vehicles().await.len(), 1);
    }

    #[tokio::test]
    async fn test_head_failure_degrades_then_recovers() {
        let provider = Arc::new(ScriptedProvider::new(120));
        let checkpoint = Arc::new(MemoryCheckpointStore::starting_at(100));
        let mut poller = service(provider.clone(), Arc::new(MemoryStore::new()), checkpoint.clone());
        let status = poller.status();
        let token = CancellationToken::new();

        provider.fail_head(true);
        poller.poll_once(&token).await;

        assert_eq!(status.borrow().state, PollerState::Degraded);
        assert!(status.borrow().last_error.is_some());
        assert_eq!(checkpoint.history().await, vec![100]);

        provider.fail_head(false);
        poller.poll_once(&token).await;

        assert_eq!(status.borrow().state, PollerState::Polling);
        assert!(status.borrow().last_error.is_none());
        assert_eq!(checkpoint.load().await.unwrap(), Some(120));
    }

    #[tokio::test]
    async fn test_cycle_failure_drops_filters_for_recreation() {
        let provider = Arc::new(ScriptedProvider::new(110));
        let checkpoint = Arc::new(MemoryCheckpointStore::starting_at(100));
        let mut poller = service(provider.clone(), Arc::new(MemoryStore::new()), checkpoint);
        let token = CancellationToken::new();

        poller.poll_once(&token).await;
        assert_eq!(poller.scanner.registry().len(), EventName::ALL.len());

        provider.fail_head(true);
        poller.poll_once(&token).await;
        assert!(poller.scanner.registry().is_empty());

        provider.fail_head(false);
        provider.set_head(120);
        poller.poll_once(&token).await;

        assert_eq!(poller.scanner.registry().len(), EventName::ALL.len());
        assert_eq!(provider.created(EventName::TollPaid), 2);
    }

    struct BrokenCheckpoint;

    #[async_trait]
    impl CheckpointStore for BrokenCheckpoint {
        async fn load(&self) -> anyhow::Result<Option<u64>> {
            Ok(Some(100))
        }

        async fn save(&self, _block: u64) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[tokio::test]
    async fn test_checkpoint_save_failure_degrades() {
        let provider = Arc::new(ScriptedProvider::new(130));
        let mut poller = service(
            provider.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(BrokenCheckpoint),
        );
        let status = poller.status();

        poller.poll_once(&CancellationToken::new()).await;

        assert_eq!(status.borrow().state, PollerState::Degraded);
        // Scan stopped at the first window that could not be checkpointed
        assert!(provider.queries().iter().all(|(_, from, _)| *from == 101));
    }

    #[tokio::test]
    async fn test_start_and_stop_releases_filters() {
        let provider = Arc::new(ScriptedProvider::new(150));
        let checkpoint = Arc::new(MemoryCheckpointStore::starting_at(100));
        let poller = service(provider.clone(), Arc::new(MemoryStore::new()), checkpoint.clone());

        let handle = poller.start(&CancellationToken::new());
        let mut status = handle.status();

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.last_processed_block == Some(150)),
        )
        .await
        .unwrap()
        .unwrap();

        handle.stop().await;

        assert_eq!(status.borrow().state, PollerState::Stopped);
        assert_eq!(provider.uninstalled().len(), EventName::ALL.len());
        assert_eq!(checkpoint.load().await.unwrap(), Some(150));
    }

    #[tokio::test]
    async fn test_parent_cancellation_stops_poller() {
        let provider = Arc::new(ScriptedProvider::new(100));
        let poller = service(
            provider.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryCheckpointStore::starting_at(100)),
        );
        let parent = CancellationToken::new();

        let handle = poller.start(&parent);
        let mut status = handle.status();
        parent.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            status.wait_for(|s| s.state == PollerState::Stopped),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
