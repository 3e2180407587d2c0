pub mod abis;
pub mod chain;
pub mod config;
pub mod db;
pub mod pubsub;
pub mod utils;
pub mod worker;

pub use chain::{ChainProvider, RpcChainProvider};
pub use config::Settings;
pub use db::Database;
pub use pubsub::{LogNotifier, NotificationDispatcher, RedpandaNotifier};
pub use worker::{start_poller, PollerHandle, PollerService, PollerStatus};
