pub mod toll;

pub use toll::{TollPaid, VehicleBlacklisted, VehicleRegistered};
