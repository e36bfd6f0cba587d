//! Core domain types for turnstile.
//!
//! This module contains pure domain types with no persistence dependencies:
//! - Events and their capacity record
//! - The participation request typestate machine

pub mod event;
pub mod request;
