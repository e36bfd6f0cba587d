//! Storage managers.
//!
//! This module defines the [`Storage`] trait: the atomic operations a request-handling
//! layer calls to propose events, submit and cancel participation requests, and let
//! initiators decide on them. Implementations run each mutating call as one unit that
//! serializes writers on the same event, and delegate every rule to
//! [`crate::admission`] so that all backends behave identically.

use async_trait::async_trait;
use serde::Serialize;

use crate::admission::{StatusUpdate, StatusUpdateResult};
use crate::domain::event::{Event, EventId, EventUpdate, NewEvent, UserId};
use crate::domain::request::{RequestId, RequestView};
use crate::error::Result;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Cached confirmed counter of an event next to the number of confirmed requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeatAudit {
    pub event_id: EventId,
    /// Value of `confirmed_requests` on the event record
    pub cached: u32,
    /// Number of requests currently in status CONFIRMED
    pub counted: u32,
}

impl SeatAudit {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.counted
    }
}

/// Storage trait for events and their participation requests.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Propose a new event. It starts unpublished with no confirmed participants.
    async fn create_event(&self, initiator_id: UserId, input: NewEvent) -> Result<Event>;

    /// Get an event by ID.
    async fn get_event(&self, event_id: EventId) -> Result<Event>;

    /// Edit an unpublished event. Only its initiator may do so.
    async fn update_event(
        &self,
        initiator_id: UserId,
        event_id: EventId,
        update: EventUpdate,
    ) -> Result<Event>;

    /// Administrative publish; the event must be pending review.
    async fn publish_event(&self, event_id: EventId) -> Result<Event>;

    /// Administrative rejection; a published event cannot be rejected.
    async fn reject_event(&self, event_id: EventId) -> Result<Event>;

    /// Submit a participation request.
    ///
    /// The request is confirmed on the spot when the event is unmoderated or
    /// unlimited, in which case the event's confirmed counter moves with it.
    async fn submit_request(&self, requester_id: UserId, event_id: EventId)
    -> Result<RequestView>;

    /// Confirm or reject a batch of an event's requests on behalf of its initiator.
    ///
    /// Either the full partition is persisted together with the seat reservation, or
    /// nothing is.
    async fn decide_requests(
        &self,
        initiator_id: UserId,
        event_id: EventId,
        update: StatusUpdate,
    ) -> Result<StatusUpdateResult>;

    /// Cancel one of the requester's own requests.
    async fn cancel_request(&self, requester_id: UserId, request_id: RequestId)
    -> Result<RequestView>;

    /// All requests submitted by a user, ordered by ID.
    async fn requests_by_requester(&self, requester_id: UserId) -> Result<Vec<RequestView>>;

    /// Requests of an event, visible to its initiator only.
    ///
    /// Anyone else gets an empty list.
    async fn event_requests(
        &self,
        initiator_id: UserId,
        event_id: EventId,
    ) -> Result<Vec<RequestView>>;

    /// Compare an event's cached confirmed counter with its confirmed requests.
    async fn audit_confirmed_count(&self, event_id: EventId) -> Result<SeatAudit>;
}
