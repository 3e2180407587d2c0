pub mod checkpoint;
pub mod toll_transaction;
pub mod vehicle;

pub use checkpoint::PollerCheckpoint;
pub use toll_transaction::{InsertOutcome, TollStatus, TollTransaction};
pub use vehicle::Vehicle;
