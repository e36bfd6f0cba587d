//! Request aggregate - domain model and state transitions.
//!
//! This module contains the core domain logic for participation requests:
//! - Request types and states (typestate pattern)
//! - State transition methods
//! - The caller-facing `RequestView`

pub mod state;
pub mod transitions;

// Re-export commonly used types
pub use state::*;
