//! Error types for turnstile.

use thiserror::Error;

use crate::domain::event::{EventId, UserId};
use crate::domain::request::RequestId;

/// Result type alias using the turnstile error type.
pub type Result<T> = std::result::Result<T, TurnstileError>;

/// Main error type for submission, admission and cancellation.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// Request not found (or not part of the event being decided)
    #[error("Request not found: {0}")]
    RequestNotFound(RequestId),

    /// Caller does not own the event or request it is acting on
    #[error("User {user_id} is not allowed to {action}")]
    Forbidden { user_id: UserId, action: String },

    /// Event or request is in the wrong state for the operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The requester already holds an active request for this event
    #[error("User {requester_id} already has an active request for event {event_id}")]
    Conflict {
        requester_id: UserId,
        event_id: EventId,
    },

    /// No seat left on the event
    #[error("Participant limit reached for event {event_id}: {confirmed} of {limit} seats taken")]
    CapacityExceeded {
        event_id: EventId,
        limit: u32,
        confirmed: u32,
    },

    /// Malformed input (blank title, oversized batch)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// General error from anyhow
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Coarse error taxonomy, independent of the variant's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    InvalidState,
    Conflict,
    CapacityExceeded,
    Validation,
    Internal,
}

impl TurnstileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TurnstileError::EventNotFound(_) | TurnstileError::RequestNotFound(_) => {
                ErrorKind::NotFound
            }
            TurnstileError::Forbidden { .. } => ErrorKind::Forbidden,
            TurnstileError::InvalidState(_) => ErrorKind::InvalidState,
            TurnstileError::Conflict { .. } => ErrorKind::Conflict,
            TurnstileError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            TurnstileError::ValidationError(_) => ErrorKind::Validation,
            TurnstileError::Other(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status code for a request-handling layer.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::InvalidState | ErrorKind::Conflict | ErrorKind::CapacityExceeded => 409,
            ErrorKind::Validation => 400,
            ErrorKind::Internal => 500,
        }
    }

    pub(crate) fn forbidden(user_id: UserId, action: impl Into<String>) -> Self {
        TurnstileError::Forbidden {
            user_id,
            action: action.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(TurnstileError::EventNotFound(EventId(1)).status_code(), 404);
        assert_eq!(
            TurnstileError::forbidden(UserId(2), "decide requests of event 1").status_code(),
            403
        );
        assert_eq!(
            TurnstileError::CapacityExceeded {
                event_id: EventId(1),
                limit: 2,
                confirmed: 2
            }
            .status_code(),
            409
        );
        assert_eq!(
            TurnstileError::ValidationError("empty".to_string()).status_code(),
            400
        );
        assert_eq!(
            TurnstileError::Other(anyhow::anyhow!("boom")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_messages_carry_context() {
        let err = TurnstileError::CapacityExceeded {
            event_id: EventId(9),
            limit: 5,
            confirmed: 5,
        };
        assert_eq!(
            err.to_string(),
            "Participant limit reached for event 9: 5 of 5 seats taken"
        );

        let err = TurnstileError::Conflict {
            requester_id: UserId(4),
            event_id: EventId(9),
        };
        assert_eq!(
            err.to_string(),
            "User 4 already has an active request for event 9"
        );
    }
}
