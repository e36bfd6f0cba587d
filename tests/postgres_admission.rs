#![cfg(feature = "postgres")]

use turnstile::manager::postgres::PostgresRequestManager;
use turnstile::{
    Decision, EventId, NewEvent, RequestId, RequestStatus, StatusUpdate, StatusUpdateResult,
    Storage, TestDbPools, TurnstileError, UserId,
};

const OWNER: UserId = UserId(1);

async fn setup(pool: sqlx::PgPool) -> PostgresRequestManager<TestDbPools> {
    PostgresRequestManager::new(TestDbPools::new(pool).await.unwrap())
}

async fn published_event(storage: &dyn Storage, limit: u32, moderation: bool) -> EventId {
    let event = storage
        .create_event(
            OWNER,
            NewEvent {
                title: "Harbour tour".to_string(),
                participant_limit: limit,
                request_moderation: moderation,
            },
        )
        .await
        .expect("Failed to create event");
    storage
        .publish_event(event.id)
        .await
        .expect("Failed to publish event")
        .id
}

async fn submit_from(
    storage: &dyn Storage,
    event_id: EventId,
    requesters: std::ops::Range<i64>,
) -> Vec<RequestId> {
    let mut ids = Vec::new();
    for requester in requesters {
        ids.push(
            storage
                .submit_request(UserId(requester), event_id)
                .await
                .expect("Failed to submit request")
                .id,
        );
    }
    ids
}

#[sqlx::test(migrations = "./migrations")]
#[test_log::test]
async fn test_unlimited_event_decision_is_a_no_op(pool: sqlx::PgPool) {
    let manager = setup(pool).await;
    let event_id = published_event(&manager, 0, true).await;
    let ids = submit_from(&manager, event_id, 10..13).await;

    let result = manager
        .decide_requests(
            OWNER,
            event_id,
            StatusUpdate {
                request_ids: ids,
                status: Decision::Rejected,
            },
        )
        .await
        .unwrap();
    assert_eq!(result, StatusUpdateResult::default());

    let event = manager.get_event(event_id).await.unwrap();
    assert_eq!(event.confirmed_requests, 3);
    let requests = manager.event_requests(OWNER, event_id).await.unwrap();
    assert!(requests.iter().all(|r| r.status == RequestStatus::Confirmed));
}

#[sqlx::test(migrations = "./migrations")]
#[test_log::test]
async fn test_confirmed_request_in_confirm_slots_rolls_back(pool: sqlx::PgPool) {
    let manager = setup(pool).await;
    let event_id = published_event(&manager, 3, true).await;
    let ids = submit_from(&manager, event_id, 10..12).await;

    manager
        .decide_requests(
            OWNER,
            event_id,
            StatusUpdate {
                request_ids: vec![ids[0]],
                status: Decision::Confirmed,
            },
        )
        .await
        .unwrap();

    let err = manager
        .decide_requests(
            OWNER,
            event_id,
            StatusUpdate {
                request_ids: vec![ids[1], ids[0]],
                status: Decision::Confirmed,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::InvalidState(_)));

    assert_eq!(manager.get_event(event_id).await.unwrap().confirmed_requests, 1);
    let statuses: Vec<_> = manager
        .event_requests(OWNER, event_id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.status)
        .collect();
    assert_eq!(statuses, vec![RequestStatus::Confirmed, RequestStatus::Pending]);
}

#[sqlx::test(migrations = "./migrations")]
#[test_log::test]
async fn test_non_initiator_mutates_nothing(pool: sqlx::PgPool) {
    let manager = setup(pool).await;
    let event_id = published_event(&manager, 2, true).await;
    let ids = submit_from(&manager, event_id, 10..12).await;

    let err = manager
        .decide_requests(
            UserId(10),
            event_id,
            StatusUpdate {
                request_ids: ids,
                status: Decision::Confirmed,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::Forbidden { .. }));

    let audit = manager.audit_confirmed_count(event_id).await.unwrap();
    assert_eq!((audit.cached, audit.counted), (0, 0));
}

#[sqlx::test(migrations = "./migrations")]
#[test_log::test]
async fn test_canceled_confirmation_keeps_seat_by_default(pool: sqlx::PgPool) {
    let manager = setup(pool).await;
    let event_id = published_event(&manager, 1, false).await;
    let ids = submit_from(&manager, event_id, 10..11).await;

    manager.cancel_request(UserId(10), ids[0]).await.unwrap();

    let audit = manager.audit_confirmed_count(event_id).await.unwrap();
    assert_eq!(audit.cached, 1);
    assert_eq!(audit.counted, 0);
    assert!(!audit.is_consistent());
}
