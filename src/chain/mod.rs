//! Chain access for the toll registry contract.
//!
//! - [`events`] - Event names and decoded event types
//! - [`parser`] - RPC log decoding
//! - [`provider`] - The provider trait the poller consumes
//! - [`rpc`] - alloy JSON-RPC implementation

pub mod events;
pub mod parser;
pub mod provider;
pub mod rpc;

pub use events::{ChainEvent, EventName, TollEvent};
pub use provider::{ChainProvider, FilterHandle, ProviderError, ProviderResult};
pub use rpc::RpcChainProvider;
