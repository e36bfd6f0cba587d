//! Participation request types.
//!
//! This module defines the request lifecycle using the typestate pattern. A request is
//! created either `Pending` (waiting for the initiator) or `Confirmed` (admitted on
//! submission), and ends up `Confirmed`, `Rejected` or `Canceled`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::event::{EventId, UserId};

/// Flat request status, as stored in the `status` column and shown to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Confirmed,
    Rejected,
    Canceled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "PENDING",
            RequestStatus::Confirmed => "CONFIRMED",
            RequestStatus::Rejected => "REJECTED",
            RequestStatus::Canceled => "CANCELED",
        }
    }

    /// Every status except `Canceled` counts against the one-request-per-event rule.
    pub fn is_active(&self) -> bool {
        !matches!(self, RequestStatus::Canceled)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(RequestStatus::Pending),
            "CONFIRMED" => Ok(RequestStatus::Confirmed),
            "REJECTED" => Ok(RequestStatus::Rejected),
            "CANCELED" => Ok(RequestStatus::Canceled),
            other => Err(format!("unknown request status '{other}'")),
        }
    }
}

/// Marker trait for valid request states.
pub trait RequestState: Send + Sync {
    /// The flat status this state projects to.
    const STATUS: RequestStatus;
}

/// A participation request in state `T`.
///
/// # Example
/// ```ignore
/// let pending: Request<Pending> = ...;
/// // Only a pending request can be confirmed
/// let confirmed: Request<Confirmed> = pending.confirm(Utc::now());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Request<T: RequestState> {
    /// The current state of the request.
    pub state: T,
    /// Immutable request data.
    pub data: RequestData,
}

/// Data fixed at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestData {
    pub id: RequestId,
    pub requester_id: UserId,
    pub event_id: EventId,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Request States
// ============================================================================

/// Waiting for the event initiator's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pending {}

impl RequestState for Pending {
    const STATUS: RequestStatus = RequestStatus::Pending;
}

/// Holds a seat at the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Confirmed {
    pub confirmed_at: DateTime<Utc>,
}

impl RequestState for Confirmed {
    const STATUS: RequestStatus = RequestStatus::Confirmed;
}

/// Turned down by the initiator, or left over when seats ran out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejected {
    pub rejected_at: DateTime<Utc>,
}

impl RequestState for Rejected {
    const STATUS: RequestStatus = RequestStatus::Rejected;
}

/// Withdrawn by the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Canceled {
    pub canceled_at: DateTime<Utc>,
}

impl RequestState for Canceled {
    const STATUS: RequestStatus = RequestStatus::Canceled;
}

/// Unique identifier for a participation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub i64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId(id)
    }
}

impl std::ops::Deref for RequestId {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// Unified Request Representation
// ============================================================================

/// A request in any state.
///
/// Used by storage and views where requests are handled uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "request")]
pub enum AnyRequest {
    Pending(Request<Pending>),
    Confirmed(Request<Confirmed>),
    Rejected(Request<Rejected>),
    Canceled(Request<Canceled>),
}

impl AnyRequest {
    /// Get the request ID regardless of state.
    pub fn id(&self) -> RequestId {
        self.data().id
    }

    /// Get the request data regardless of state.
    pub fn data(&self) -> &RequestData {
        match self {
            AnyRequest::Pending(r) => &r.data,
            AnyRequest::Confirmed(r) => &r.data,
            AnyRequest::Rejected(r) => &r.data,
            AnyRequest::Canceled(r) => &r.data,
        }
    }

    pub fn status(&self) -> RequestStatus {
        match self {
            AnyRequest::Pending(_) => RequestStatus::Pending,
            AnyRequest::Confirmed(_) => RequestStatus::Confirmed,
            AnyRequest::Rejected(_) => RequestStatus::Rejected,
            AnyRequest::Canceled(_) => RequestStatus::Canceled,
        }
    }

    /// When the request reached its current state.
    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            AnyRequest::Pending(r) => r.data.created_at,
            AnyRequest::Confirmed(r) => r.state.confirmed_at,
            AnyRequest::Rejected(r) => r.state.rejected_at,
            AnyRequest::Canceled(r) => r.state.canceled_at,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AnyRequest::Pending(_))
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, AnyRequest::Confirmed(_))
    }

    /// Try to take as a Pending request, consuming self.
    pub fn into_pending(self) -> Option<Request<Pending>> {
        match self {
            AnyRequest::Pending(r) => Some(r),
            _ => None,
        }
    }

    /// Rebuild a request from its stored columns.
    pub fn from_parts(
        data: RequestData,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> Self {
        match status {
            RequestStatus::Pending => AnyRequest::Pending(Request {
                state: Pending {},
                data,
            }),
            RequestStatus::Confirmed => AnyRequest::Confirmed(Request {
                state: Confirmed {
                    confirmed_at: updated_at,
                },
                data,
            }),
            RequestStatus::Rejected => AnyRequest::Rejected(Request {
                state: Rejected {
                    rejected_at: updated_at,
                },
                data,
            }),
            RequestStatus::Canceled => AnyRequest::Canceled(Request {
                state: Canceled {
                    canceled_at: updated_at,
                },
                data,
            }),
        }
    }
}

impl From<Request<Pending>> for AnyRequest {
    fn from(r: Request<Pending>) -> Self {
        AnyRequest::Pending(r)
    }
}

impl From<Request<Confirmed>> for AnyRequest {
    fn from(r: Request<Confirmed>) -> Self {
        AnyRequest::Confirmed(r)
    }
}

impl From<Request<Rejected>> for AnyRequest {
    fn from(r: Request<Rejected>) -> Self {
        AnyRequest::Rejected(r)
    }
}

impl From<Request<Canceled>> for AnyRequest {
    fn from(r: Request<Canceled>) -> Self {
        AnyRequest::Canceled(r)
    }
}

/// Caller-facing projection of a request.
///
/// Field names follow the wire format consumers already rely on: `event` and
/// `requester` carry IDs, `created` the submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestView {
    pub id: RequestId,
    pub created: DateTime<Utc>,
    pub event: EventId,
    pub requester: UserId,
    pub status: RequestStatus,
}

impl From<&AnyRequest> for RequestView {
    fn from(request: &AnyRequest) -> Self {
        let data = request.data();
        RequestView {
            id: data.id,
            created: data.created_at,
            event: data.event_id,
            requester: data.requester_id,
            status: request.status(),
        }
    }
}

impl<T: RequestState> From<&Request<T>> for RequestView {
    fn from(request: &Request<T>) -> Self {
        RequestView {
            id: request.data.id,
            created: request.data.created_at,
            event: request.data.event_id,
            requester: request.data.requester_id,
            status: T::STATUS,
        }
    }
}
