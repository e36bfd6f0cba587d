//! State transitions for participation requests using the typestate pattern.
//!
//! ```text
//!                    ┌──confirm()──> Request<Confirmed>
//! Request<Pending> ──┤
//!                    └──reject()───> Request<Rejected>
//!
//! AnyRequest ──reject()──> Request<Rejected>   (initiator override, unless canceled)
//! AnyRequest ──cancel()──> Request<Canceled>   (requester action, any prior state)
//! ```
//!
//! Transitions are pure. Persisting the result, and keeping the event's confirmed
//! counter in step with it, is the storage manager's job inside one atomic unit.

use chrono::{DateTime, Utc};

use super::state::{
    AnyRequest, Canceled, Confirmed, Pending, Rejected, Request, RequestData, RequestState,
};

impl Request<Pending> {
    pub fn new(data: RequestData) -> Self {
        Request {
            state: Pending {},
            data,
        }
    }

    pub fn confirm(self, now: DateTime<Utc>) -> Request<Confirmed> {
        Request {
            data: self.data,
            state: Confirmed { confirmed_at: now },
        }
    }

    pub fn reject(self, now: DateTime<Utc>) -> Request<Rejected> {
        Request {
            data: self.data,
            state: Rejected { rejected_at: now },
        }
    }
}

impl Request<Confirmed> {
    /// A request admitted on submission, without passing through `Pending`.
    pub fn admitted(data: RequestData) -> Self {
        let confirmed_at = data.created_at;
        Request {
            state: Confirmed { confirmed_at },
            data,
        }
    }
}

impl<T: RequestState> Request<T> {
    fn into_canceled(self, now: DateTime<Utc>) -> Request<Canceled> {
        Request {
            data: self.data,
            state: Canceled { canceled_at: now },
        }
    }

    fn into_rejected(self, now: DateTime<Utc>) -> Request<Rejected> {
        Request {
            data: self.data,
            state: Rejected { rejected_at: now },
        }
    }
}

impl AnyRequest {
    /// Reject on the initiator's behalf, overriding an earlier outcome.
    ///
    /// An already rejected request keeps its original timestamp so repeated rejections
    /// are idempotent. A canceled request was withdrawn by its requester and stays
    /// canceled: reviving it could give the requester two active requests for the
    /// same event. Returns `None` in that case.
    pub fn reject(self, now: DateTime<Utc>) -> Option<Request<Rejected>> {
        match self {
            AnyRequest::Pending(r) => Some(r.reject(now)),
            AnyRequest::Confirmed(r) => Some(r.into_rejected(now)),
            AnyRequest::Rejected(r) => Some(r),
            AnyRequest::Canceled(_) => None,
        }
    }

    /// Cancel regardless of the current state, including a confirmed request.
    pub fn cancel(self, now: DateTime<Utc>) -> Request<Canceled> {
        match self {
            AnyRequest::Pending(r) => r.into_canceled(now),
            AnyRequest::Confirmed(r) => r.into_canceled(now),
            AnyRequest::Rejected(r) => r.into_canceled(now),
            AnyRequest::Canceled(r) => r,
        }
    }
}
