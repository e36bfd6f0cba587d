//! Admission engine: resolves pending participation requests under a hard seat limit.
//!
//! Everything here is pure. A storage manager locks the event, loads the records,
//! runs these functions and persists the outcome as one atomic unit:
//!
//! ```text
//! open_decision(event, actor, update)      -> Gate::Skip | Gate::Open
//! order_requests(event, ids, loaded)       -> requests in caller order
//! plan_decision(event, requests, decision) -> AdmissionPlan
//! plan.apply_to(&mut event)                -> confirmed_requests += seats_reserved
//! ```
//!
//! # Confirmation
//!
//! With `available = participant_limit - confirmed_requests` and `n` requests, the
//! first `min(available, n)` requests (in the order the caller supplied them) are
//! confirmed and must all be pending. Every remaining request is rejected. Callers
//! wanting first-come-first-served order sort the IDs themselves.
//!
//! # Rejection
//!
//! Every listed request is rejected whatever its prior status, except canceled ones,
//! which stay canceled and are left out of the result. The seat counter is left
//! untouched.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AdmissionConfig;
use crate::domain::event::{Event, UserId};
use crate::domain::request::{
    AnyRequest, Canceled, Confirmed, Rejected, Request, RequestId, RequestView,
};
use crate::error::{Result, TurnstileError};

pub mod policy;

pub use policy::{InitialStatus, check_submission, initial_status};

/// Outcome the initiator asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Confirmed,
    Rejected,
}

/// A status update over a batch of requests of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub request_ids: Vec<RequestId>,
    pub status: Decision,
}

/// Requests touched by a status update, split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateResult {
    pub confirmed_requests: Vec<RequestView>,
    pub rejected_requests: Vec<RequestView>,
}

/// Whether a decision has anything to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// The event never produces pending requests; return an empty result.
    Skip,
    /// Load the requests and plan.
    Open,
}

/// Run the event-level checks of a decision, in order.
pub fn open_decision(
    event: &Event,
    actor_id: UserId,
    update: &StatusUpdate,
    config: &AdmissionConfig,
) -> Result<Gate> {
    if event.initiator_id != actor_id {
        return Err(TurnstileError::forbidden(
            actor_id,
            format!("decide requests of event {}", event.id),
        ));
    }
    if !event.is_published() {
        return Err(TurnstileError::InvalidState(format!(
            "Event {} is {}; only published events admit requests",
            event.id, event.state
        )));
    }
    if update.request_ids.len() > config.max_decision_batch {
        return Err(TurnstileError::ValidationError(format!(
            "Status update lists {} requests, at most {} are accepted",
            update.request_ids.len(),
            config.max_decision_batch
        )));
    }
    // A full event leaves the initiator nothing to decide, rejections included.
    if event.is_saturated() {
        return Err(TurnstileError::CapacityExceeded {
            event_id: event.id,
            limit: event.participant_limit,
            confirmed: event.confirmed_requests,
        });
    }
    if event.admits_without_review() {
        return Ok(Gate::Skip);
    }
    Ok(Gate::Open)
}

/// Collapse repeated IDs, keeping the first occurrence.
pub fn dedup_ids(ids: &[RequestId]) -> Vec<RequestId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

/// Arrange loaded requests in caller order.
///
/// Fails with `RequestNotFound` for an ID that was not loaded or that belongs to a
/// different event.
pub fn order_requests(
    event: &Event,
    ids: &[RequestId],
    loaded: Vec<AnyRequest>,
) -> Result<Vec<AnyRequest>> {
    let mut by_id: HashMap<RequestId, AnyRequest> = loaded
        .into_iter()
        .filter(|r| r.data().event_id == event.id)
        .map(|r| (r.id(), r))
        .collect();

    ids.iter()
        .map(|id| by_id.remove(id).ok_or(TurnstileError::RequestNotFound(*id)))
        .collect()
}

/// Planned outcome of a decision, ready to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionPlan {
    /// Seats taken by this decision.
    pub seats_reserved: u32,
    pub confirmed: Vec<Request<Confirmed>>,
    pub rejected: Vec<Request<Rejected>>,
}

impl AdmissionPlan {
    /// Reserve the planned seats on the event.
    pub fn apply_to(&self, event: &mut Event) {
        event.confirmed_requests += self.seats_reserved;
        debug_assert!(event.is_unlimited() || event.confirmed_requests <= event.participant_limit);
    }

    /// Every request whose record must be written back.
    pub fn changed(&self) -> Vec<AnyRequest> {
        self.confirmed
            .iter()
            .cloned()
            .map(AnyRequest::from)
            .chain(self.rejected.iter().cloned().map(AnyRequest::from))
            .collect()
    }

    pub fn to_result(&self) -> StatusUpdateResult {
        StatusUpdateResult {
            confirmed_requests: self.confirmed.iter().map(RequestView::from).collect(),
            rejected_requests: self.rejected.iter().map(RequestView::from).collect(),
        }
    }
}

/// Partition requests into confirmed and rejected.
///
/// `requests` must already be in caller order (see [`order_requests`]). Nothing is
/// planned unless the whole batch is valid.
pub fn plan_decision(
    event: &Event,
    requests: Vec<AnyRequest>,
    decision: Decision,
    now: DateTime<Utc>,
) -> Result<AdmissionPlan> {
    match decision {
        Decision::Rejected => Ok(AdmissionPlan {
            seats_reserved: 0,
            confirmed: Vec::new(),
            rejected: requests.into_iter().filter_map(|r| r.reject(now)).collect(),
        }),
        Decision::Confirmed => {
            let available = event.available_seats().unwrap_or(u32::MAX);
            let requested = u32::try_from(requests.len()).unwrap_or(u32::MAX);
            let to_confirm = available.min(requested);

            let mut iter = requests.into_iter();
            let mut confirmed = Vec::with_capacity(to_confirm as usize);
            for request in iter.by_ref().take(to_confirm as usize) {
                let status = request.status();
                let id = request.id();
                let pending = request.into_pending().ok_or_else(|| {
                    TurnstileError::InvalidState(format!(
                        "Request {} must be PENDING to be confirmed, found {}",
                        id, status
                    ))
                })?;
                confirmed.push(pending.confirm(now));
            }
            let rejected = iter.filter_map(|r| r.reject(now)).collect();

            Ok(AdmissionPlan {
                seats_reserved: to_confirm,
                confirmed,
                rejected,
            })
        }
    }
}

/// Check ownership and cancel a request.
///
/// Returns the canceled request and the number of seats it frees, which is zero
/// unless `release_seat_on_cancel` is set and the request was confirmed.
pub fn plan_cancel(
    request: AnyRequest,
    requester_id: UserId,
    config: &AdmissionConfig,
    now: DateTime<Utc>,
) -> Result<(Request<Canceled>, u32)> {
    if request.data().requester_id != requester_id {
        return Err(TurnstileError::forbidden(
            requester_id,
            format!("cancel request {}", request.id()),
        ));
    }
    let released = u32::from(config.release_seat_on_cancel && request.is_confirmed());
    Ok((request.cancel(now), released))
}
