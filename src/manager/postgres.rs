//! PostgreSQL implementation of [`Storage`].
//!
//! Every mutating call runs in one transaction on the write pool. The event row is
//! locked with `SELECT ... FOR UPDATE` before anything else is read, then the request
//! rows being changed. Writers on the same event therefore queue on the event lock,
//! and the admission rules always see the committed counter. Plain reads go to the
//! read pool.

pub mod pool_provider;

pub use pool_provider::{PoolProvider, TestDbPools};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Postgres, Row, Transaction};

use super::{SeatAudit, Storage};
use crate::admission::{self, Gate, InitialStatus, StatusUpdate, StatusUpdateResult};
use crate::config::AdmissionConfig;
use crate::domain::event::{Event, EventId, EventState, EventUpdate, NewEvent, UserId};
use crate::domain::request::{AnyRequest, RequestData, RequestId, RequestStatus, RequestView};
use crate::error::{Result, TurnstileError};

const EVENT_COLUMNS: &str = "id, initiator_id, title, participant_limit, confirmed_requests, \
     request_moderation, state, created_at, published_at";

const REQUEST_COLUMNS: &str = "id, event_id, requester_id, status, created_at, updated_at";

/// PostgreSQL implementation of the [`Storage`] trait.
///
/// # Example
/// ```ignore
/// use turnstile::{PostgresRequestManager, Storage};
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgresql://localhost/turnstile").await?;
/// turnstile::migrator().run(&pool).await?;
///
/// let manager = PostgresRequestManager::new(my_pools)
///     .with_config(AdmissionConfig { lock_timeout_ms: 2000, ..Default::default() });
/// let result = manager.decide_requests(initiator, event_id, update).await?;
/// ```
pub struct PostgresRequestManager<P: PoolProvider> {
    pools: P,
    config: AdmissionConfig,
}

impl<P: PoolProvider> PostgresRequestManager<P> {
    /// Create a manager with the default configuration.
    pub fn new(pools: P) -> Self {
        Self {
            pools,
            config: AdmissionConfig::default(),
        }
    }

    /// Set a custom configuration.
    ///
    /// This is a builder method that can be chained after `new()`.
    pub fn with_config(mut self, config: AdmissionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Get the underlying pool provider.
    pub fn pools(&self) -> &P {
        &self.pools
    }

    /// Open a write transaction bounded by the configured lock timeout.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx =
            self.pools.write().begin().await.map_err(|e| {
                TurnstileError::Other(anyhow!("Failed to begin transaction: {}", e))
            })?;

        // SET does not take bind parameters; the value is an integer from config.
        let statement = format!("SET LOCAL lock_timeout = {}", self.config.lock_timeout_ms);
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to set lock timeout: {}", e)))?;

        Ok(tx)
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> Result<()> {
    tx.commit()
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to commit transaction: {}", e)))
}

/// Lock the event row for the rest of the transaction.
async fn lock_event(conn: &mut PgConnection, event_id: EventId) -> Result<Event> {
    let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&query)
        .bind(*event_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to lock event: {}", e)))?
        .ok_or(TurnstileError::EventNotFound(event_id))?;
    event_from_row(&row)
}

/// Lock the given request rows, in ID order.
async fn lock_requests(conn: &mut PgConnection, ids: &[RequestId]) -> Result<Vec<AnyRequest>> {
    let ids: Vec<i64> = ids.iter().map(|id| **id).collect();
    let query = format!(
        "SELECT {REQUEST_COLUMNS} FROM participation_requests \
         WHERE id = ANY($1) ORDER BY id FOR UPDATE"
    );
    let rows = sqlx::query(&query)
        .bind(ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to lock requests: {}", e)))?;
    rows.iter().map(request_from_row).collect()
}

/// Write back the status of every changed request in one statement.
async fn store_requests(conn: &mut PgConnection, requests: &[AnyRequest]) -> Result<()> {
    if requests.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = requests.iter().map(|r| *r.id()).collect();
    let statuses: Vec<String> = requests
        .iter()
        .map(|r| r.status().as_str().to_string())
        .collect();
    let updated: Vec<DateTime<Utc>> = requests.iter().map(AnyRequest::updated_at).collect();

    sqlx::query(
        r#"
        UPDATE participation_requests AS r
        SET status = u.status, updated_at = u.updated_at
        FROM UNNEST($1::BIGINT[], $2::TEXT[], $3::TIMESTAMPTZ[]) AS u(id, status, updated_at)
        WHERE r.id = u.id
        "#,
    )
    .bind(ids)
    .bind(statuses)
    .bind(updated)
    .execute(&mut *conn)
    .await
    .map_err(|e| TurnstileError::Other(anyhow!("Failed to update requests: {}", e)))?;
    Ok(())
}

async fn store_confirmed_count(conn: &mut PgConnection, event: &Event) -> Result<()> {
    sqlx::query("UPDATE events SET confirmed_requests = $2 WHERE id = $1")
        .bind(*event.id)
        .bind(to_db_count(event.confirmed_requests, "confirmed_requests")?)
        .execute(&mut *conn)
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to update seat counter: {}", e)))?;
    Ok(())
}

fn to_db_count(value: u32, column: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        TurnstileError::ValidationError(format!("{} is too large: {}", column, value))
    })
}

fn from_db_count(value: i32, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TurnstileError::Other(anyhow!("Invalid {} in database: {}", column, value)))
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read id: {}", e)))?;
    let initiator_id: i64 = row
        .try_get("initiator_id")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read initiator_id: {}", e)))?;
    let title: String = row
        .try_get("title")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read title: {}", e)))?;
    let participant_limit: i32 = row
        .try_get("participant_limit")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read participant_limit: {}", e)))?;
    let confirmed_requests: i32 = row
        .try_get("confirmed_requests")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read confirmed_requests: {}", e)))?;
    let request_moderation: bool = row
        .try_get("request_moderation")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read request_moderation: {}", e)))?;
    let state: String = row
        .try_get("state")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read state: {}", e)))?;
    let state: EventState = state
        .parse()
        .map_err(|e| TurnstileError::Other(anyhow!("Invalid event state: {}", e)))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read created_at: {}", e)))?;
    let published_at: Option<DateTime<Utc>> = row
        .try_get("published_at")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read published_at: {}", e)))?;

    Ok(Event {
        id: EventId(id),
        initiator_id: UserId(initiator_id),
        title,
        participant_limit: from_db_count(participant_limit, "participant_limit")?,
        confirmed_requests: from_db_count(confirmed_requests, "confirmed_requests")?,
        request_moderation,
        state,
        created_at,
        published_at,
    })
}

fn request_from_row(row: &PgRow) -> Result<AnyRequest> {
    let id: i64 = row
        .try_get("id")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read id: {}", e)))?;
    let event_id: i64 = row
        .try_get("event_id")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read event_id: {}", e)))?;
    let requester_id: i64 = row
        .try_get("requester_id")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read requester_id: {}", e)))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read status: {}", e)))?;
    let status: RequestStatus = status
        .parse()
        .map_err(|e| TurnstileError::Other(anyhow!("Invalid request status: {}", e)))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read created_at: {}", e)))?;
    let updated_at: DateTime<Utc> = row
        .try_get("updated_at")
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to read updated_at: {}", e)))?;

    let data = RequestData {
        id: RequestId(id),
        requester_id: UserId(requester_id),
        event_id: EventId(event_id),
        created_at,
    };
    Ok(AnyRequest::from_parts(data, status, updated_at))
}

#[async_trait]
impl<P: PoolProvider> Storage for PostgresRequestManager<P> {
    #[tracing::instrument(skip(self, input), fields(title = %input.title))]
    async fn create_event(&self, initiator_id: UserId, input: NewEvent) -> Result<Event> {
        input.validate()?;
        let query = format!(
            "INSERT INTO events (initiator_id, title, participant_limit, request_moderation) \
             VALUES ($1, $2, $3, $4) RETURNING {EVENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(*initiator_id)
            .bind(&input.title)
            .bind(to_db_count(input.participant_limit, "participant_limit")?)
            .bind(input.request_moderation)
            .fetch_one(self.pools.write())
            .await
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to create event: {}", e)))?;
        let event = event_from_row(&row)?;

        tracing::info!(event_id = %event.id, "Event created");
        Ok(event)
    }

    async fn get_event(&self, event_id: EventId) -> Result<Event> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(*event_id)
            .fetch_optional(self.pools.read())
            .await
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to fetch event: {}", e)))?
            .ok_or(TurnstileError::EventNotFound(event_id))?;
        event_from_row(&row)
    }

    #[tracing::instrument(skip(self, update))]
    async fn update_event(
        &self,
        initiator_id: UserId,
        event_id: EventId,
        update: EventUpdate,
    ) -> Result<Event> {
        let mut tx = self.begin().await?;
        let mut event = lock_event(&mut tx, event_id).await?;
        if event.initiator_id != initiator_id {
            return Err(TurnstileError::forbidden(
                initiator_id,
                format!("edit event {}", event_id),
            ));
        }
        event.apply_update(&update)?;

        sqlx::query(
            r#"
            UPDATE events
            SET title = $2, participant_limit = $3, request_moderation = $4
            WHERE id = $1
            "#,
        )
        .bind(*event_id)
        .bind(&event.title)
        .bind(to_db_count(event.participant_limit, "participant_limit")?)
        .bind(event.request_moderation)
        .execute(&mut *tx)
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to update event: {}", e)))?;
        commit(tx).await?;

        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn publish_event(&self, event_id: EventId) -> Result<Event> {
        let mut tx = self.begin().await?;
        let mut event = lock_event(&mut tx, event_id).await?;
        event.publish(Utc::now())?;

        sqlx::query("UPDATE events SET state = $2, published_at = $3 WHERE id = $1")
            .bind(*event_id)
            .bind(event.state.as_str())
            .bind(event.published_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to publish event: {}", e)))?;
        commit(tx).await?;

        tracing::info!(event_id = %event_id, "Event published");
        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn reject_event(&self, event_id: EventId) -> Result<Event> {
        let mut tx = self.begin().await?;
        let mut event = lock_event(&mut tx, event_id).await?;
        event.reject()?;

        sqlx::query("UPDATE events SET state = $2 WHERE id = $1")
            .bind(*event_id)
            .bind(event.state.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to reject event: {}", e)))?;
        commit(tx).await?;

        tracing::info!(event_id = %event_id, "Event rejected");
        Ok(event)
    }

    #[tracing::instrument(skip(self))]
    async fn submit_request(
        &self,
        requester_id: UserId,
        event_id: EventId,
    ) -> Result<RequestView> {
        let mut tx = self.begin().await?;
        let event = lock_event(&mut tx, event_id).await?;

        let has_active: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM participation_requests
                WHERE requester_id = $1 AND event_id = $2 AND status <> 'CANCELED'
            )
            "#,
        )
        .bind(*requester_id)
        .bind(*event_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to check existing requests: {}", e)))?;

        let initial = admission::check_submission(&event, requester_id, has_active)?;
        let status = match initial {
            InitialStatus::Confirmed => RequestStatus::Confirmed,
            InitialStatus::Pending => RequestStatus::Pending,
        };

        let query = format!(
            "INSERT INTO participation_requests (event_id, requester_id, status) \
             VALUES ($1, $2, $3) RETURNING {REQUEST_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(*event_id)
            .bind(*requester_id)
            .bind(status.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match e {
                // The partial unique index backs up the check above
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    TurnstileError::Conflict {
                        requester_id,
                        event_id,
                    }
                }
                e => TurnstileError::Other(anyhow!("Failed to create request: {}", e)),
            })?;
        let request = request_from_row(&row)?;

        if initial == InitialStatus::Confirmed {
            sqlx::query("UPDATE events SET confirmed_requests = confirmed_requests + 1 WHERE id = $1")
                .bind(*event_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    TurnstileError::Other(anyhow!("Failed to update seat counter: {}", e))
                })?;
        }
        commit(tx).await?;

        let view = RequestView::from(&request);
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
        let mut tx = self.begin().await?;
        let mut event = lock_event(&mut tx, event_id).await?;
        if admission::open_decision(&event, initiator_id, &update, &self.config)? == Gate::Skip {
            tracing::debug!("Event admits without review, nothing to decide");
            return Ok(StatusUpdateResult::default());
        }

        let ids = admission::dedup_ids(&update.request_ids);
        let loaded = lock_requests(&mut tx, &ids).await?;
        let requests = admission::order_requests(&event, &ids, loaded)?;
        let plan = admission::plan_decision(&event, requests, update.status, Utc::now())?;

        plan.apply_to(&mut event);
        if plan.seats_reserved > 0 {
            store_confirmed_count(&mut tx, &event).await?;
        }
        store_requests(&mut tx, &plan.changed()).await?;
        commit(tx).await?;

        let result = plan.to_result();
        crate::metrics::record_decision(update.status, &result, plan.seats_reserved);
        tracing::info!(
            confirmed = result.confirmed_requests.len(),
            rejected = result.rejected_requests.len(),
            seats_reserved = plan.seats_reserved,
            confirmed_requests = event.confirmed_requests,
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
        let mut tx = self.begin().await?;

        // The event is locked before the request row, like every other writer.
        let event_id: i64 =
            sqlx::query_scalar("SELECT event_id FROM participation_requests WHERE id = $1")
                .bind(*request_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| TurnstileError::Other(anyhow!("Failed to fetch request: {}", e)))?
                .ok_or(TurnstileError::RequestNotFound(request_id))?;
        let mut event = lock_event(&mut tx, EventId(event_id)).await?;
        let request = lock_requests(&mut tx, &[request_id])
            .await?
            .pop()
            .ok_or(TurnstileError::RequestNotFound(request_id))?;

        let (canceled, released) =
            admission::plan_cancel(request, requester_id, &self.config, Utc::now())?;
        let canceled = AnyRequest::from(canceled);
        store_requests(&mut tx, std::slice::from_ref(&canceled)).await?;
        if released > 0 {
            event.confirmed_requests = event.confirmed_requests.saturating_sub(released);
            store_confirmed_count(&mut tx, &event).await?;
        }
        commit(tx).await?;

        crate::metrics::record_cancel(released);
        tracing::info!(event_id = %event.id, seats_released = released, "Request canceled");
        Ok(RequestView::from(&canceled))
    }

    async fn requests_by_requester(&self, requester_id: UserId) -> Result<Vec<RequestView>> {
        let query = format!(
            "SELECT {REQUEST_COLUMNS} FROM participation_requests \
             WHERE requester_id = $1 ORDER BY id"
        );
        let rows = sqlx::query(&query)
            .bind(*requester_id)
            .fetch_all(self.pools.read())
            .await
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to list requests: {}", e)))?;
        rows.iter()
            .map(|row| request_from_row(row).map(|r| RequestView::from(&r)))
            .collect()
    }

    async fn event_requests(
        &self,
        initiator_id: UserId,
        event_id: EventId,
    ) -> Result<Vec<RequestView>> {
        // Join on the initiator so a stranger simply matches nothing.
        let rows = sqlx::query(
            r#"
            SELECT r.id, r.event_id, r.requester_id, r.status, r.created_at, r.updated_at
            FROM participation_requests r
            JOIN events e ON e.id = r.event_id
            WHERE r.event_id = $1 AND e.initiator_id = $2
            ORDER BY r.id
            "#,
        )
        .bind(*event_id)
        .bind(*initiator_id)
        .fetch_all(self.pools.read())
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to list event requests: {}", e)))?;
        rows.iter()
            .map(|row| request_from_row(row).map(|r| RequestView::from(&r)))
            .collect()
    }

    #[tracing::instrument(skip(self))]
    async fn audit_confirmed_count(&self, event_id: EventId) -> Result<SeatAudit> {
        let row = sqlx::query(
            r#"
            SELECT
                e.confirmed_requests,
                (
                    SELECT COUNT(*) FROM participation_requests r
                    WHERE r.event_id = e.id AND r.status = 'CONFIRMED'
                ) AS counted
            FROM events e
            WHERE e.id = $1
            "#,
        )
        .bind(*event_id)
        .fetch_optional(self.pools.read())
        .await
        .map_err(|e| TurnstileError::Other(anyhow!("Failed to audit event: {}", e)))?
        .ok_or(TurnstileError::EventNotFound(event_id))?;

        let cached: i32 = row
            .try_get("confirmed_requests")
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to read confirmed_requests: {}", e)))?;
        let counted: i64 = row
            .try_get("counted")
            .map_err(|e| TurnstileError::Other(anyhow!("Failed to read counted: {}", e)))?;

        let audit = SeatAudit {
            event_id,
            cached: from_db_count(cached, "confirmed_requests")?,
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
