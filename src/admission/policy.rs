//! Submission policy: who may ask to join, and whether they get in straight away.

use crate::domain::event::{Event, UserId};
use crate::error::{Result, TurnstileError};

/// Status a freshly submitted request starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialStatus {
    /// Admitted on submission; takes a seat immediately.
    Confirmed,
    /// Waits for the initiator's decision.
    Pending,
}

/// Resolve the initial status from the event policy.
///
/// Without moderation every request is confirmed. With moderation, an unlimited event
/// has nothing to protect, so requests are confirmed as well.
pub fn initial_status(participant_limit: u32, request_moderation: bool) -> InitialStatus {
    if !request_moderation {
        InitialStatus::Confirmed
    } else if participant_limit == 0 {
        InitialStatus::Confirmed
    } else {
        InitialStatus::Pending
    }
}

/// Validate a submission against the event and resolve its initial status.
///
/// `has_active_request` tells whether the requester already holds a non-canceled
/// request for the event. Checks run in a fixed order so callers always see the
/// same error for the same situation.
pub fn check_submission(
    event: &Event,
    requester_id: UserId,
    has_active_request: bool,
) -> Result<InitialStatus> {
    if event.initiator_id == requester_id {
        return Err(TurnstileError::InvalidState(format!(
            "Initiator {} cannot request to join their own event {}",
            requester_id, event.id
        )));
    }
    if !event.is_published() {
        return Err(TurnstileError::InvalidState(format!(
            "Event {} is {}; only published events accept requests",
            event.id, event.state
        )));
    }
    if has_active_request {
        return Err(TurnstileError::Conflict {
            requester_id,
            event_id: event.id,
        });
    }
    if event.is_saturated() {
        return Err(TurnstileError::CapacityExceeded {
            event_id: event.id,
            limit: event.participant_limit,
            confirmed: event.confirmed_requests,
        });
    }
    Ok(initial_status(
        event.participant_limit,
        event.request_moderation,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventId, EventState};
    use chrono::Utc;

    fn published(limit: u32, confirmed: u32, moderation: bool) -> Event {
        Event {
            id: EventId(1),
            initiator_id: UserId(1),
            title: "Launch party".to_string(),
            participant_limit: limit,
            confirmed_requests: confirmed,
            request_moderation: moderation,
            state: EventState::Published,
            created_at: Utc::now(),
            published_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_initial_status_table() {
        assert_eq!(initial_status(0, false), InitialStatus::Confirmed);
        assert_eq!(initial_status(5, false), InitialStatus::Confirmed);
        assert_eq!(initial_status(0, true), InitialStatus::Confirmed);
        assert_eq!(initial_status(5, true), InitialStatus::Pending);
    }

    #[test]
    fn test_initiator_cannot_join() {
        let err = check_submission(&published(5, 0, true), UserId(1), false).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidState(_)));
    }

    #[test]
    fn test_unpublished_event_refuses_requests() {
        let mut event = published(5, 0, true);
        event.state = EventState::Pending;
        let err = check_submission(&event, UserId(2), false).unwrap_err();
        assert!(matches!(err, TurnstileError::InvalidState(_)));
    }

    #[test]
    fn test_duplicate_is_conflict_before_capacity() {
        let err = check_submission(&published(1, 1, true), UserId(2), true).unwrap_err();
        assert!(matches!(err, TurnstileError::Conflict { .. }));
    }

    #[test]
    fn test_full_event_refuses_even_without_moderation() {
        let err = check_submission(&published(2, 2, false), UserId(2), false).unwrap_err();
        match err {
            TurnstileError::CapacityExceeded {
                limit, confirmed, ..
            } => {
                assert_eq!(limit, 2);
                assert_eq!(confirmed, 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unlimited_event_never_full() {
        let status = check_submission(&published(0, 10_000, true), UserId(2), false).unwrap();
        assert_eq!(status, InitialStatus::Confirmed);
    }
}
