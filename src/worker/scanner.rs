//! Chunked range scanner.
//!
//! Walks `[from, to]` in windows no wider than the provider's block range
//! limit. Every window queries each event filter, applies the collected
//! events in log order and then saves the window's last block as the new
//! checkpoint. A failing filter only costs that event type for that window.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Context;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    chain::{ChainEvent, ChainProvider, EventName, FilterHandle, ProviderError},
    config::ChainSettings,
    db::CheckpointStore,
    pubsub::NotificationSender,
    worker::{filters::FilterRegistry, mapper::EventMapper},
};

/// Interval for logging backfill progress (10 seconds)
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Widest window a single provider query may cover
    pub max_block_range: u64,
    /// Window size for the retry after a rate limit
    pub rate_limit_block_range: u64,
    /// Pause between windows
    pub window_delay: Duration,
    pub rate_limit_backoff: Duration,
    pub max_rate_limit_backoff: Duration,
}

impl From<&ChainSettings> for ScanConfig {
    fn from(settings: &ChainSettings) -> Self {
        Self {
            max_block_range: settings.max_block_range.max(1),
            rate_limit_block_range: settings.rate_limit_block_range.max(1),
            window_delay: settings.window_delay(),
            rate_limit_backoff: Duration::from_millis(settings.rate_limit_backoff_ms),
            max_rate_limit_backoff: Duration::from_millis(settings.max_rate_limit_backoff_ms),
        }
    }
}

/// Inclusive block range covered by one provider query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockWindow {
    pub from: u64,
    pub to: u64,
}

impl BlockWindow {
    /// Window starting at `cursor`, at most `max_range` blocks, ending no later than `limit`.
    pub fn starting_at(cursor: u64, limit: u64, max_range: u64) -> Self {
        let span = max_range.max(1) - 1;
        Self {
            from: cursor,
            to: cursor.saturating_add(span).min(limit),
        }
    }
}

/// Split `[from, to]` into consecutive windows of at most `max_range` blocks.
pub fn split_range(from: u64, to: u64, max_range: u64) -> Vec<BlockWindow> {
    let mut windows = Vec::new();
    let mut cursor = from;
    while cursor <= to {
        let window = BlockWindow::starting_at(cursor, to, max_range);
        windows.push(window);
        match window.to.checked_add(1) {
            Some(next) => cursor = next,
            None => break,
        }
    }
    windows
}

/// Exponential backoff for the `streak`-th consecutive rate limit.
pub fn rate_limit_delay(base: Duration, max: Duration, streak: u32) -> Duration {
    let factor = 2u32.saturating_pow(streak.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryStatus {
    Complete,
    /// Gave up on this event for the window
    Skipped,
    /// Filter handle expired and was invalidated
    Expired,
    /// Shutdown arrived while backing off
    Cancelled,
}

/// How a window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowEnd {
    /// Applied and checkpointed
    Done,
    /// Applied and checkpointed, but a filter expired
    Expired,
    /// Abandoned before applying; replayed on the next start
    Cancelled,
}

struct QueryOutcome {
    events: Vec<ChainEvent>,
    status: QueryStatus,
}

impl QueryOutcome {
    fn complete(events: Vec<ChainEvent>) -> Self {
        Self {
            events,
            status: QueryStatus::Complete,
        }
    }

    fn failed(events: Vec<ChainEvent>, status: QueryStatus) -> Self {
        Self { events, status }
    }
}

/// What one scan did.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub windows: usize,
    /// Checkpoint value after the last completed window
    pub last_saved: Option<u64>,
    pub events_applied: usize,
    pub events_failed: usize,
    pub notifications: usize,
    /// Event types given up on for a window
    pub skipped: Vec<(EventName, BlockWindow)>,
    /// Event types whose filter expired during the scan
    pub expired: Vec<EventName>,
    /// Scan ended before `to` (filter expiry or shutdown)
    pub stopped_early: bool,
}

pub struct ChunkedRangeScanner {
    provider: Arc<dyn ChainProvider>,
    registry: FilterRegistry,
    mapper: EventMapper,
    checkpoint: Arc<dyn CheckpointStore>,
    notifications: NotificationSender,
    config: ScanConfig,
    rate_limit_streak: u32,
}

impl ChunkedRangeScanner {
    pub fn new(
        provider: Arc<dyn ChainProvider>,
        mapper: EventMapper,
        checkpoint: Arc<dyn CheckpointStore>,
        notifications: NotificationSender,
        config: ScanConfig,
    ) -> Self {
        Self {
            registry: FilterRegistry::new(provider.clone()),
            provider,
            mapper,
            checkpoint,
            notifications,
            config,
            rate_limit_streak: 0,
        }
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut FilterRegistry {
        &mut self.registry
    }

    /// Scan `[from, to]` window by window until done or cancelled.
    ///
    /// Returns an error only when the checkpoint cannot be saved; windows
    /// completed before that are already persisted.
    pub async fn scan(
        &mut self,
        from: u64,
        to: u64,
        cancellation_token: &CancellationToken,
    ) -> anyhow::Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut last_progress_log = Instant::now();
        let mut cursor = from;

        while cursor <= to {
            if cancellation_token.is_cancelled() {
                report.stopped_early = true;
                break;
            }

            let window = BlockWindow::starting_at(cursor, to, self.config.max_block_range);
            match self
                .scan_window(window, &mut report, cancellation_token)
                .await?
            {
                WindowEnd::Done => {},
                WindowEnd::Expired => {
                    info!(
                        "[SCANNER] Stopping at block {} until expired filters are recreated",
                        window.to
                    );
                    report.stopped_early = window.to < to;
                    break;
                },
                WindowEnd::Cancelled => {
                    info!(
                        "[SCANNER] Shutdown during blocks {}-{}, window left for replay",
                        window.from, window.to
                    );
                    report.stopped_early = true;
                    break;
                },
            }

            if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
                info!(
                    "[SCANNER] Processed up to block {} of {} ({} events)",
                    window.to, to, report.events_applied
                );
                last_progress_log = Instant::now();
            }

            cursor = match window.to.checked_add(1) {
                Some(next) => next,
                None => break,
            };

            if cursor <= to && !self.config.window_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.window_delay) => {},
                    _ = cancellation_token.cancelled() => {},
                }
            }
        }

        Ok(report)
    }

    /// Query, apply and checkpoint one window.
    async fn scan_window(
        &mut self,
        window: BlockWindow,
        report: &mut ScanReport,
        cancellation_token: &CancellationToken,
    ) -> anyhow::Result<WindowEnd> {
        let mut batch = Vec::new();
        let mut end = WindowEnd::Done;

        for event in EventName::ALL {
            let outcome = self.query_event(event, window, cancellation_token).await;
            batch.extend(outcome.events);
            match outcome.status {
                QueryStatus::Complete => {},
                QueryStatus::Skipped => report.skipped.push((event, window)),
                QueryStatus::Expired => {
                    end = WindowEnd::Expired;
                    report.expired.push(event);
                },
                QueryStatus::Cancelled => return Ok(WindowEnd::Cancelled),
            }
        }

        batch.sort_by_key(ChainEvent::position);

        let outcome = self.mapper.apply_batch(&batch).await;
        report.events_applied += outcome.applied;
        report.events_failed += outcome.failed;
        report.notifications += outcome.notifications.len();
        for notification in outcome.notifications {
            self.notifications.enqueue(notification);
        }

        self.checkpoint
            .save(window.to)
            .await
            .with_context(|| format!("Failed to save checkpoint at block {}", window.to))?;
        report.last_saved = Some(window.to);
        report.windows += 1;

        Ok(end)
    }

    async fn query_event(
        &mut self,
        event: EventName,
        window: BlockWindow,
        cancellation_token: &CancellationToken,
    ) -> QueryOutcome {
        let handle = match self.registry.resolve(event).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(
                    "[SCANNER] No {} filter for blocks {}-{}, skipping: {}",
                    event, window.from, window.to, e
                );
                return QueryOutcome::failed(Vec::new(), QueryStatus::Skipped);
            },
        };

        match self
            .provider
            .query_filter(&handle, window.from, window.to)
            .await
        {
            Ok(events) => {
                self.rate_limit_streak = 0;
                QueryOutcome::complete(events)
            },
            Err(ProviderError::FilterExpired(_)) => {
                self.registry.invalidate(event);
                QueryOutcome::failed(Vec::new(), QueryStatus::Expired)
            },
            Err(ProviderError::RateLimited(msg)) => {
                warn!(
                    "[SCANNER] Rate limited querying {} for blocks {}-{}: {}",
                    event, window.from, window.to, msg
                );
                self.retry_in_smaller_windows(&handle, window, cancellation_token)
                    .await
            },
            Err(e) => {
                warn!(
                    "[SCANNER] Query for {} in blocks {}-{} failed, skipping: {}",
                    event, window.from, window.to, e
                );
                QueryOutcome::failed(Vec::new(), QueryStatus::Skipped)
            },
        }
    }

    /// Single retry pass after a rate limit: back off, then cover the window
    /// in smaller sub-windows. Any further failure gives up on the rest.
    async fn retry_in_smaller_windows(
        &mut self,
        handle: &FilterHandle,
        window: BlockWindow,
        cancellation_token: &CancellationToken,
    ) -> QueryOutcome {
        self.rate_limit_streak = self.rate_limit_streak.saturating_add(1);
        let delay = rate_limit_delay(
            self.config.rate_limit_backoff,
            self.config.max_rate_limit_backoff,
            self.rate_limit_streak,
        );
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {},
                _ = cancellation_token.cancelled() => {
                    return QueryOutcome::failed(Vec::new(), QueryStatus::Cancelled);
                },
            }
        }

        let mut events = Vec::new();
        for sub in split_range(window.from, window.to, self.config.rate_limit_block_range) {
            match self.provider.query_filter(handle, sub.from, sub.to).await {
                Ok(mut found) => events.append(&mut found),
                Err(ProviderError::FilterExpired(_)) => {
                    self.registry.invalidate(handle.event);
                    return QueryOutcome::failed(events, QueryStatus::Expired);
                },
                Err(e) => {
                    warn!(
                        "[SCANNER] Retry for {} in blocks {}-{} failed, skipping rest of window: {}",
                        handle.event, sub.from, window.to, e
                    );
                    return QueryOutcome::failed(events, QueryStatus::Skipped);
                },
            }
        }

        self.rate_limit_streak = 0;
        QueryOutcome::complete(events)
    }

    /// Uninstall all filters (shutdown).
    pub async fn release_filters(&mut self) {
        self.registry.release_all().await;
    }
}
