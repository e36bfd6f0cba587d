//! Configuration for the storage managers.

use serde::{Deserialize, Serialize};

/// Tunables shared by every storage manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Maximum number of request IDs accepted in one status update
    pub max_decision_batch: usize,

    /// Free the seat of a confirmed request when its requester cancels it.
    /// Off by default: a canceled confirmation keeps counting against the limit.
    pub release_seat_on_cancel: bool,

    /// How long a transaction waits for the event row lock before failing (milliseconds).
    /// Only used by the PostgreSQL manager.
    pub lock_timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_decision_batch: 1000,
            release_seat_on_cancel: false,
            lock_timeout_ms: 5000, // 5 seconds
        }
    }
}
