//! In-process implementation of [`Storage`].
//!
//! All state sits behind one mutex. Each operation takes the lock once, plans with the
//! pure admission rules on the current records, and writes back only when planning
//! succeeded, so a failed call leaves nothing behind. Suitable for tests, embedded use
//! and single-node deployments.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{SeatAudit, Storage};
use crate::admission::{
    self, Gate, InitialStatus, StatusUpdate, StatusUpdateResult,
};
use crate::config::AdmissionConfig;
use crate::domain::event::{Event, EventId, EventState, EventUpdate, NewEvent, UserId};
use crate::domain::request::{
    AnyRequest, Confirmed, Pending, Request, RequestData, RequestId, RequestView,
};
use crate::error::{Result, TurnstileError};

#[derive(Debug, Default)]
struct State {
    events: BTreeMap<EventId, Event>,
    requests: BTreeMap<RequestId, AnyRequest>,
    last_event_id: i64,
    last_request_id: i64,
}

impl State {
    fn event(&self, event_id: EventId) -> Result<&Event> {
        self.events
            .get(&event_id)
            .ok_or(TurnstileError::EventNotFound(event_id))
    }

    fn event_mut(&mut self, event_id: EventId) -> Result<&mut Event> {
        self.events
            .get_mut(&event_id)
            .ok_or(TurnstileError::EventNotFound(event_id))
    }

    fn has_active_request(&self, requester_id: UserId, event_id: EventId) -> bool {
        self.requests.values().any(|r| {
            let data = r.data();
            data.requester_id == requester_id
                && data.event_id == event_id
                && r.status().is_active()
        })
    }

    fn store(&mut self, request: AnyRequest) {
        self.requests.insert(request.id(), request);
    }
}

/// [`Storage`] backed by process memory.
///
/// # Example
/// ```ignore
/// use turnstile::{InMemoryRequestManager, Storage};
///
/// let manager = InMemoryRequestManager::new();
/// let event = manager.create_event(initiator, new_event).await?;
/// manager.publish_event(event.id).await?;
/// let request = manager.submit_request(requester, event.id).await?;
/// ```
#[derive(Debug, Default)]
pub struct InMemoryRequestManager {
    state: Mutex<State>,
    config: AdmissionConfig,
}

impl InMemoryRequestManager {
    /// Create an empty manager with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a custom configuration.
    pub fn with_config(mut self, config: AdmissionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }
}

#[async_trait]
impl Storage for InMemoryRequestManager {
    #[tracing::instrument(skip(self, input), fields(title = %input.title))]
    async fn create_event(&self, initiator_id: UserId, input: NewEvent) -> Result<Event> {
        input.validate()?;
        let mut state = self.state.lock();
        state.last_event_id += 1;
        let event = Event {
            id: EventId(state.last_event_id),
            initiator_id,
            title: input.title,
            participant_limit: input.participant_limit,
            confirmed_requests: 0,
            request_moderation: input.request_moderation,
            state: EventState::Pending,
            created_at: Utc::now(),
            published_at: None,
        };
        state.events.insert(event.id, event.clone());

        tracing::info!(event_id = %event.id, "Event created");
        Ok(event)
    }

    async fn get_event(&self, event_id: EventId) -> Result<Event> {
        self.state.lock().event(event_id).cloned()
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_event(
        &self,
        initiator_id: UserId,
        event_id: EventId,
        update: EventUpdate,
    ) -> Result<Event> {
        let mut state = self.state.lock();
        let current = state.event(event_id)?;
        if current.initiator_id != initiator_id {
            return Err(TurnstileError::forbidden(
                initiator_id,
                format!("edit event {}", event_id),
            ));
        }
        let mut edited = current.clone();
        edited.apply_update(&update)?;
        state.events.insert(event_id, edited.clone());
        Ok(edited)
    }

    #[tracing::instrument(skip(self))]
    async fn publish_event(&self, event_id: EventId) -> Result<Event> {
        let mut state = self.state.lock();
        let event = state.event_mut(event_id)?;
        event.publish(Utc::now())?;

        tracing::info!(event_id = %event_id, "Event published");
        Ok(event.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn reject_event(&self, event_id: EventId) -> Result<Event> {
        let mut state = self.state.lock();
        let event = state.event_mut(event_id)?;
        event.reject()?;

        tracing::info!(event_id = %event_id, "Event rejected");
        Ok(event.clone())
    }

    #[tracing::instrument(skip(self))]
    async fn submit_request(
        &self,
        requester_id: UserId,
        event_id: EventId,
    ) -> Result<RequestView> {
        let mut state = self.state.lock();
        let event = state.event(event_id)?;
        let has_active = state.has_active_request(requester_id, event_id);
        let initial = admission::check_submission(event, requester_id, has_active)?;

        state.last_request_id += 1;
        let data = RequestData {
            id: RequestId(state.last_request_id),
            requester_id,
            event_id,
            created_at: Utc::now(),
        };
        let request = match initial {
            InitialStatus::Confirmed => {
                state.event_mut(event_id)?.confirmed_requests += 1;
                AnyRequest::from(Request::<Confirmed>::admitted(data))
            }
            InitialStatus::Pending => AnyRequest::from(Request::<Pending>::new(data)),
        };
        let view = RequestView::from(&request);
        state.store(request);
        drop(state);

        crate::metrics::record_submission(view.status);
        tracing::info!(
            request_id = %view.id,
            status = %view.status,
            "Participation request submitted"
        );
        Ok(view)
    }

    #[tracing::instrument(
        skip(self, update),
        fields(count = update.request_ids.len(), decision = ?update.status)
    )]
    async fn decide_requests(
        &self,
        initiator_id: UserId,
        event_id: EventId,
        update: StatusUpdate,
    ) -> Result<StatusUpdateResult> {
        let mut state = self.state.lock();
        let event = state.event(event_id)?;
        if admission::open_decision(event, initiator_id, &update, &self.config)? == Gate::Skip {
            tracing::debug!("Event admits without review, nothing to decide");
            return Ok(StatusUpdateResult::default());
        }

        let ids = admission::dedup_ids(&update.request_ids);
        let loaded = ids
            .iter()
            .filter_map(|id| state.requests.get(id).cloned())
            .collect();
        let mut event = event.clone();
        let requests = admission::order_requests(&event, &ids, loaded)?;
        let plan = admission::plan_decision(&event, requests, update.status, Utc::now())?;

        plan.apply_to(&mut event);
        let confirmed_requests = event.confirmed_requests;
        state.events.insert(event_id, event);
        for request in plan.changed() {
            state.store(request);
        }
        drop(state);

        let result = plan.to_result();
        crate::metrics::record_decision(update.status, &result, plan.seats_reserved);
        tracing::info!(
            confirmed = result.confirmed_requests.len(),
            rejected = result.rejected_requests.len(),
            seats_reserved = plan.seats_reserved,
            confirmed_requests,
            "Status update applied"
        );
        Ok(result)
    }

    #[tracing::instrument(skip(self))]
    async fn cancel_request(
        &self,
        requester_id: UserId,
        request_id: RequestId,
    ) -> Result<RequestView> {
        let mut state = self.state.lock();
        let request = state
            .requests
            .get(&request_id)
            .cloned()
            .ok_or(TurnstileError::RequestNotFound(request_id))?;
        let event_id = request.data().event_id;
        let (canceled, released) =
            admission::plan_cancel(request, requester_id, &self.config, Utc::now())?;

        if released > 0 {
            let event = state.event_mut(event_id)?;
            event.confirmed_requests = event.confirmed_requests.saturating_sub(released);
        }
        let view = RequestView::from(&canceled);
        state.store(AnyRequest::from(canceled));
        drop(state);

        crate::metrics::record_cancel(released);
        tracing::info!(event_id = %event_id, seats_released = released, "Request canceled");
        Ok(view)
    }

    async fn requests_by_requester(&self, requester_id: UserId) -> Result<Vec<RequestView>> {
        let state = self.state.lock();
        Ok(state
            .requests
            .values()
            .filter(|r| r.data().requester_id == requester_id)
            .map(RequestView::from)
            .collect())
    }

    async fn event_requests(
        &self,
        initiator_id: UserId,
        event_id: EventId,
    ) -> Result<Vec<RequestView>> {
        let state = self.state.lock();
        let owns_event = state
            .events
            .get(&event_id)
            .is_some_and(|e| e.initiator_id == initiator_id);
        if !owns_event {
            return Ok(Vec::new());
        }
        Ok(state
            .requests
            .values()
            .filter(|r| r.data().event_id == event_id)
            .map(RequestView::from)
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn audit_confirmed_count(&self, event_id: EventId) -> Result<SeatAudit> {
        let state = self.state.lock();
        let event = state.event(event_id)?;
        let counted = state
            .requests
            .values()
            .filter(|r| r.data().event_id == event_id && r.is_confirmed())
            .count();
        let audit = SeatAudit {
            event_id,
            cached: event.confirmed_requests,
            counted: u32::try_from(counted).unwrap_or(u32::MAX),
        };
        if !audit.is_consistent() {
            tracing::warn!(
                cached = audit.cached,
                counted = audit.counted,
                "Confirmed counter drifted from confirmed requests"
            );
        }
        Ok(audit)
    }
}
