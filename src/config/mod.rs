#[allow(clippy::module_inception)]
mod config;

pub use config::{
    ChainSettings, CheckpointBackend, CheckpointSettings, NotificationSettings, PostgresSettings,
    RedpandaSettings, Settings,
};
