//! Counters for submissions, decisions and cancellations.
//!
//! Emitted through the `metrics` facade, so any installed recorder (Prometheus
//! exporter, statsd, ...) picks them up. Managers record only after a unit of work has
//! committed; rolled back calls leave no trace here.
//!
//! - `turnstile_requests_submitted_total{status}`: requests created, by initial status
//! - `turnstile_decisions_total{decision}`: status updates applied by initiators
//! - `turnstile_requests_decided_total{status}`: requests confirmed or rejected by those updates
//! - `turnstile_seats_reserved_total`: seats taken by bulk confirmation
//! - `turnstile_requests_canceled_total`: requests withdrawn by their requester
//! - `turnstile_seats_released_total`: seats freed by cancellation (opt-in)

use metrics::counter;

use crate::admission::{Decision, StatusUpdateResult};
use crate::domain::request::RequestStatus;

pub(crate) fn record_submission(status: RequestStatus) {
    counter!("turnstile_requests_submitted_total", "status" => status.as_str()).increment(1);
}

pub(crate) fn record_decision(decision: Decision, result: &StatusUpdateResult, seats_reserved: u32) {
    let decision = match decision {
        Decision::Confirmed => "confirmed",
        Decision::Rejected => "rejected",
    };
    counter!("turnstile_decisions_total", "decision" => decision).increment(1);
    counter!("turnstile_requests_decided_total", "status" => "CONFIRMED")
        .increment(result.confirmed_requests.len() as u64);
    counter!("turnstile_requests_decided_total", "status" => "REJECTED")
        .increment(result.rejected_requests.len() as u64);
    counter!("turnstile_seats_reserved_total").increment(u64::from(seats_reserved));
}

pub(crate) fn record_cancel(seats_released: u32) {
    counter!("turnstile_requests_canceled_total").increment(1);
    if seats_released > 0 {
        counter!("turnstile_seats_released_total").increment(u64::from(seats_released));
    }
}
