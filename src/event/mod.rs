//! Event types.
//!
//! This module re-exports types from `domain::event`.
//! See that module for the actual implementations.

pub use crate::domain::event::{Event, EventId, EventState, EventUpdate, NewEvent, UserId};
