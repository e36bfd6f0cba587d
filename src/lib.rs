//! Capacity-aware admission of participation requests to events.
//!
//! Users propose events with an optional participant limit. Other users submit
//! participation requests; the event's initiator confirms or rejects them in batches.
//! The crate guarantees that an event's confirmed participants never exceed its limit,
//! however many decisions and submissions race for the last seats.
//!
//! The admission rules live in [`admission`] as pure functions. [`Storage`]
//! implementations wrap them in one atomic unit per call:
//!
//! - [`InMemoryRequestManager`]: process-local, behind a single mutex.
//! - `PostgresRequestManager` (feature `postgres`): one transaction per call, with the
//!   event row locked `FOR UPDATE`.

pub mod admission;
pub mod config;
pub mod domain;
pub mod error;
pub mod event;
pub mod manager;
mod metrics;
pub mod request;

// Re-export commonly used types
pub use admission::{Decision, StatusUpdate, StatusUpdateResult};
pub use config::AdmissionConfig;
pub use error::{ErrorKind, Result, TurnstileError};
pub use event::*;
pub use manager::memory::InMemoryRequestManager;
#[cfg(feature = "postgres")]
pub use manager::postgres::{PoolProvider, PostgresRequestManager, TestDbPools};
pub use manager::{SeatAudit, Storage};
pub use request::*;

/// Get the turnstile database migrator
///
/// Returns a migrator that can be run against a connection pool.
#[cfg(feature = "postgres")]
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}
