use std::time::Duration;

use anyhow::bail;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// PostgreSQL database connection configuration.
///
/// Used for storing:
/// - Vehicles and toll transactions
/// - The poller checkpoint (when the postgres backend is selected)
#[derive(Debug, Deserialize, Clone)]
pub struct PostgresSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

fn default_pool_size() -> usize {
    16
}

/// Toll registry contract and RPC provider configuration.
///
/// The block range limits mirror the provider tier: most hosted RPC
/// endpoints reject `eth_getLogs` over more than a handful of blocks.
#[derive(Debug, Deserialize, Clone)]
pub struct ChainSettings {
    pub rpc_url: String,
    /// Toll registry contract address. Required unless `mock_mode` is set.
    #[serde(default)]
    pub contract_address: Option<String>,
    /// Run the backend without the chain poller when the contract is not configured
    #[serde(default)]
    pub mock_mode: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of blocks a single provider query may span
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
    /// Sub-window size used when retrying a rate-limited query
    #[serde(default = "default_rate_limit_block_range")]
    pub rate_limit_block_range: u64,
    /// Throttle between consecutive windows
    #[serde(default = "default_window_delay_ms")]
    pub window_delay_ms: u64,
    /// How far behind head the first scan starts when no checkpoint exists
    #[serde(default = "default_backfill_window")]
    pub backfill_window: u64,
    #[serde(default = "default_rate_limit_backoff_ms")]
    pub rate_limit_backoff_ms: u64,
    #[serde(default = "default_max_rate_limit_backoff_ms")]
    pub max_rate_limit_backoff_ms: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_max_block_range() -> u64 {
    10
}

fn default_rate_limit_block_range() -> u64 {
    5
}

fn default_window_delay_ms() -> u64 {
    250
}

fn default_backfill_window() -> u64 {
    100
}

fn default_rate_limit_backoff_ms() -> u64 {
    500
}

fn default_max_rate_limit_backoff_ms() -> u64 {
    8_000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl ChainSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn window_delay(&self) -> Duration {
        Duration::from_millis(self.window_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    Postgres,
    File,
}

/// Where the poller persists its last processed block.
#[derive(Debug, Deserialize, Clone)]
pub struct CheckpointSettings {
    #[serde(default = "default_checkpoint_backend")]
    pub backend: CheckpointBackend,
    /// Row key in `tollchain.poller_checkpoints` (postgres backend)
    #[serde(default = "default_checkpoint_name")]
    pub name: String,
    /// JSON file location (file backend)
    #[serde(default = "default_checkpoint_path")]
    pub path: String,
}

fn default_checkpoint_backend() -> CheckpointBackend {
    CheckpointBackend::Postgres
}

fn default_checkpoint_name() -> String {
    "toll_registry".to_string()
}

fn default_checkpoint_path() -> String {
    "data/checkpoint.json".to_string()
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            backend: default_checkpoint_backend(),
            name: default_checkpoint_name(),
            path: default_checkpoint_path(),
        }
    }
}

/// Redpanda (Kafka-compatible) pub/sub configuration.
///
/// When enabled, real-time user notifications are published to
/// `{topic_prefix}.notifications` keyed by user id. The websocket
/// gateway consumes that topic and fans out to connected clients.
#[derive(Debug, Deserialize, Clone)]
pub struct RedpandaSettings {
    /// Enable/disable Redpanda publishing
    #[serde(default)]
    pub enabled: bool,
    /// Comma-separated list of broker addresses (e.g., "localhost:9092")
    #[serde(default = "default_redpanda_brokers")]
    pub brokers: String,
    #[serde(default = "default_redpanda_topic_prefix")]
    pub topic_prefix: String,
}

fn default_redpanda_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_redpanda_topic_prefix() -> String {
    "tollchain".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationSettings {
    /// Bounded queue between the poller and the notification dispatcher
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    1_024
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Root application configuration.
///
/// Loaded from `config.yaml` at startup, with `TOLLCHAIN__SECTION__KEY`
/// environment variables taking precedence.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub postgres: PostgresSettings,
    pub chain: ChainSettings,
    #[serde(default)]
    pub checkpoint: CheckpointSettings,
    #[serde(default)]
    pub redpanda: Option<RedpandaSettings>,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("config"))
            .add_source(Environment::with_prefix("TOLLCHAIN").separator("__"))
            .build()?;

        let settings: Settings = s.try_deserialize()?;

        Ok(settings)
    }

    /// Reject combinations that would make the scanner misbehave.
    pub fn validate(&self) -> anyhow::Result<()> {
        let chain = &self.chain;
        if chain.max_block_range == 0 {
            bail!("chain.max_block_range must be at least 1");
        }
        if chain.rate_limit_block_range == 0 || chain.rate_limit_block_range > chain.max_block_range
        {
            bail!(
                "chain.rate_limit_block_range must be between 1 and max_block_range ({})",
                chain.max_block_range
            );
        }
        if chain.poll_interval_ms == 0 {
            bail!("chain.poll_interval_ms must be greater than zero");
        }
        if self.notifications.channel_capacity == 0 {
            bail!("notifications.channel_capacity must be greater than zero");
        }
        Ok(())
    }
}
