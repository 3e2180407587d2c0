use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Registered vehicle (PostgreSQL).
///
/// The poller owns `owner`, `is_active`, `is_blacklisted`, `registration_time`
/// and `last_toll_time`; the API layer may write other columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub vehicle_id: String,
    pub owner: String,
    pub is_active: bool,
    pub is_blacklisted: bool,
    pub registration_time: Option<DateTime<Utc>>,
    pub last_toll_time: Option<DateTime<Utc>>,
}

impl Vehicle {
    /// A vehicle as it looks right after its on-chain registration.
    pub fn registered(vehicle_id: String, owner: String, registration_time: DateTime<Utc>) -> Self {
        Self {
            vehicle_id,
            owner,
            is_active: true,
            is_blacklisted: false,
            registration_time: Some(registration_time),
            last_toll_time: None,
        }
    }
}
