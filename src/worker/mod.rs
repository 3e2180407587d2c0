pub mod filters;
pub mod lifecycle;
pub mod mapper;
pub mod poller;
pub mod scanner;

#[cfg(test)]
mod test_support;

pub use filters::FilterRegistry;
pub use lifecycle::start_poller;
pub use mapper::{BatchOutcome, EventMapper};
pub use poller::{PollerConfig, PollerHandle, PollerService, PollerState, PollerStatus};
pub use scanner::{BlockWindow, ChunkedRangeScanner, ScanConfig, ScanReport};
