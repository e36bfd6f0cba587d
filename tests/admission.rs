use std::sync::Arc;

use turnstile::{
    AdmissionConfig, Decision, Event, EventId, InMemoryRequestManager, NewEvent, RequestId,
    RequestStatus, StatusUpdate, StatusUpdateResult, Storage, TurnstileError, UserId,
};

const OWNER: UserId = UserId(1);

async fn published_event(
    manager: &InMemoryRequestManager,
    participant_limit: u32,
    request_moderation: bool,
) -> Event {
    let event = manager
        .create_event(
            OWNER,
            NewEvent {
                title: "Community cleanup".to_string(),
                participant_limit,
                request_moderation,
            },
        )
        .await
        .expect("Failed to create event");
    manager
        .publish_event(event.id)
        .await
        .expect("Failed to publish event")
}

/// Submit one request per requester, in order.
async fn submit_from(
    manager: &InMemoryRequestManager,
    event_id: EventId,
    requesters: impl IntoIterator<Item = i64>,
) -> Vec<RequestId> {
    let mut ids = Vec::new();
    for requester in requesters {
        let view = manager
            .submit_request(UserId(requester), event_id)
            .await
            .expect("Failed to submit request");
        ids.push(view.id);
    }
    ids
}

async fn decide(
    manager: &InMemoryRequestManager,
    event_id: EventId,
    request_ids: Vec<RequestId>,
    status: Decision,
) -> turnstile::Result<StatusUpdateResult> {
    manager
        .decide_requests(OWNER, event_id, StatusUpdate { request_ids, status })
        .await
}

fn ids_of(result: &StatusUpdateResult) -> (Vec<RequestId>, Vec<RequestId>) {
    (
        result.confirmed_requests.iter().map(|r| r.id).collect(),
        result.rejected_requests.iter().map(|r| r.id).collect(),
    )
}

async fn statuses(manager: &InMemoryRequestManager, event_id: EventId) -> Vec<RequestStatus> {
    manager
        .event_requests(OWNER, event_id)
        .await
        .expect("Failed to list event requests")
        .into_iter()
        .map(|r| r.status)
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_confirm_fills_limit_and_rejects_overflow() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 2, true).await;
    let ids = submit_from(&manager, event.id, 10..13).await;

    let result = decide(&manager, event.id, ids.clone(), Decision::Confirmed)
        .await
        .expect("Decision should succeed");

    let (confirmed, rejected) = ids_of(&result);
    assert_eq!(confirmed, vec![ids[0], ids[1]]);
    assert_eq!(rejected, vec![ids[2]]);
    assert!(
        result
            .confirmed_requests
            .iter()
            .all(|r| r.status == RequestStatus::Confirmed)
    );
    assert_eq!(result.rejected_requests[0].status, RequestStatus::Rejected);

    let event = manager.get_event(event.id).await.unwrap();
    assert_eq!(event.confirmed_requests, 2);
    assert!(event.is_saturated());
}

#[test_log::test(tokio::test)]
async fn test_unlimited_event_confirms_on_submit_and_skips_decisions() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 0, true).await;

    for requester in 10..15 {
        let view = manager
            .submit_request(UserId(requester), event.id)
            .await
            .unwrap();
        assert_eq!(view.status, RequestStatus::Confirmed);
    }

    let ids: Vec<_> = manager
        .event_requests(OWNER, event.id)
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    for status in [Decision::Confirmed, Decision::Rejected] {
        let result = decide(&manager, event.id, ids.clone(), status).await.unwrap();
        assert_eq!(result, StatusUpdateResult::default());
    }

    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 5);
    assert!(
        statuses(&manager, event.id)
            .await
            .iter()
            .all(|s| *s == RequestStatus::Confirmed)
    );
}

#[test_log::test(tokio::test)]
async fn test_unmoderated_event_never_has_pending_requests() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 5, false).await;

    for (n, requester) in (10..15).enumerate() {
        let view = manager
            .submit_request(UserId(requester), event.id)
            .await
            .unwrap();
        assert_eq!(view.status, RequestStatus::Confirmed);
        let event = manager.get_event(event.id).await.unwrap();
        assert_eq!(event.confirmed_requests as usize, n + 1);
    }
    assert!(!statuses(&manager, event.id).await.contains(&RequestStatus::Pending));

    let err = manager
        .submit_request(UserId(99), event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::CapacityExceeded { .. }));
    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 5);
}

#[test_log::test(tokio::test)]
async fn test_confirmed_request_in_confirm_slots_rolls_back() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 3, true).await;
    let ids = submit_from(&manager, event.id, 10..13).await;

    decide(&manager, event.id, vec![ids[0]], Decision::Confirmed)
        .await
        .unwrap();
    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 1);

    let err = decide(&manager, event.id, vec![ids[1], ids[0]], Decision::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::InvalidState(_)));

    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 1);
    assert_eq!(
        statuses(&manager, event.id).await,
        vec![
            RequestStatus::Confirmed,
            RequestStatus::Pending,
            RequestStatus::Pending
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_non_initiator_cannot_decide() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 2, true).await;
    let ids = submit_from(&manager, event.id, 10..12).await;

    for status in [Decision::Confirmed, Decision::Rejected] {
        let err = manager
            .decide_requests(
                UserId(10),
                event.id,
                StatusUpdate {
                    request_ids: ids.clone(),
                    status,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TurnstileError::Forbidden { .. }));
        assert_eq!(err.status_code(), 403);
    }

    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 0);
    assert_eq!(
        statuses(&manager, event.id).await,
        vec![RequestStatus::Pending, RequestStatus::Pending]
    );
}

#[test_log::test(tokio::test)]
async fn test_confirmed_count_grows_by_min_of_available_and_batch() {
    for (limit, already, batch) in [(5u32, 0usize, 3usize), (5, 3, 4), (4, 2, 2), (3, 0, 6)] {
        let manager = InMemoryRequestManager::new();
        let event = published_event(&manager, limit, true).await;
        let ids = submit_from(&manager, event.id, 100..(100 + (already + batch) as i64)).await;

        if already > 0 {
            decide(&manager, event.id, ids[..already].to_vec(), Decision::Confirmed)
                .await
                .unwrap();
        }
        let before = manager.get_event(event.id).await.unwrap();
        let available = before.available_seats().unwrap();

        let result = decide(&manager, event.id, ids[already..].to_vec(), Decision::Confirmed)
            .await
            .unwrap();

        let after = manager.get_event(event.id).await.unwrap();
        let expected = available.min(batch as u32);
        assert_eq!(after.confirmed_requests - before.confirmed_requests, expected);
        assert_eq!(result.confirmed_requests.len() as u32, expected);
        assert_eq!(
            result.confirmed_requests.len() + result.rejected_requests.len(),
            batch
        );
    }
}

#[test_log::test(tokio::test)]
async fn test_bulk_reject_is_idempotent_and_keeps_counter() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 3, true).await;
    let ids = submit_from(&manager, event.id, 10..12).await;

    let first = decide(&manager, event.id, ids.clone(), Decision::Rejected)
        .await
        .unwrap();
    let second = decide(&manager, event.id, ids.clone(), Decision::Rejected)
        .await
        .unwrap();

    assert!(first.confirmed_requests.is_empty());
    assert_eq!(ids_of(&first).1, ids);
    assert_eq!(first, second);
    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 0);
}

#[test_log::test(tokio::test)]
async fn test_full_event_refuses_any_decision() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 1, true).await;
    let ids = submit_from(&manager, event.id, 10..12).await;
    decide(&manager, event.id, vec![ids[0]], Decision::Confirmed)
        .await
        .unwrap();

    for status in [Decision::Confirmed, Decision::Rejected] {
        let err = decide(&manager, event.id, vec![ids[1]], status)
            .await
            .unwrap_err();
        match err {
            TurnstileError::CapacityExceeded {
                limit, confirmed, ..
            } => {
                assert_eq!((limit, confirmed), (1, 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

#[test_log::test(tokio::test)]
async fn test_repeated_ids_count_once() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 5, true).await;
    let ids = submit_from(&manager, event.id, 10..12).await;

    let result = decide(
        &manager,
        event.id,
        vec![ids[1], ids[0], ids[1]],
        Decision::Confirmed,
    )
    .await
    .unwrap();

    assert_eq!(ids_of(&result).0, vec![ids[1], ids[0]]);
    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 2);
}

#[test_log::test(tokio::test)]
async fn test_requests_of_other_events_are_not_found() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 5, true).await;
    let other = published_event(&manager, 5, true).await;
    let mine = submit_from(&manager, event.id, 10..11).await;
    let foreign = submit_from(&manager, other.id, 11..12).await;

    let err = decide(
        &manager,
        event.id,
        vec![mine[0], foreign[0]],
        Decision::Confirmed,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, TurnstileError::RequestNotFound(id) if id == foreign[0]));
    assert_eq!(manager.get_event(event.id).await.unwrap().confirmed_requests, 0);
}

#[test_log::test(tokio::test)]
async fn test_oversized_batch_is_rejected() {
    let manager = InMemoryRequestManager::new().with_config(AdmissionConfig {
        max_decision_batch: 2,
        ..Default::default()
    });
    let event = published_event(&manager, 5, true).await;
    let ids = submit_from(&manager, event.id, 10..13).await;

    let err = decide(&manager, event.id, ids, Decision::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::ValidationError(_)));
    assert_eq!(err.status_code(), 400);
}

#[test_log::test(tokio::test)]
async fn test_submission_rules() {
    let manager = InMemoryRequestManager::new();
    let draft = manager
        .create_event(
            OWNER,
            NewEvent {
                title: "Not yet live".to_string(),
                participant_limit: 3,
                request_moderation: true,
            },
        )
        .await
        .unwrap();

    let err = manager.submit_request(UserId(10), draft.id).await.unwrap_err();
    assert!(matches!(err, TurnstileError::InvalidState(_)));

    let event = manager.publish_event(draft.id).await.unwrap();
    let err = manager.submit_request(OWNER, event.id).await.unwrap_err();
    assert!(matches!(err, TurnstileError::InvalidState(_)));

    let err = manager
        .submit_request(UserId(10), EventId(404))
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::EventNotFound(EventId(404))));

    let view = manager.submit_request(UserId(10), event.id).await.unwrap();
    assert_eq!(view.status, RequestStatus::Pending);
    assert_eq!(view.event, event.id);
    assert_eq!(view.requester, UserId(10));

    let err = manager
        .submit_request(UserId(10), event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::Conflict { .. }));
    assert_eq!(err.status_code(), 409);
}

#[test_log::test(tokio::test)]
async fn test_resubmission_after_cancel() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 3, true).await;
    let first = manager.submit_request(UserId(10), event.id).await.unwrap();

    let err = manager
        .cancel_request(UserId(11), first.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::Forbidden { .. }));

    let canceled = manager.cancel_request(UserId(10), first.id).await.unwrap();
    assert_eq!(canceled.status, RequestStatus::Canceled);

    let second = manager.submit_request(UserId(10), event.id).await.unwrap();
    assert_eq!(second.status, RequestStatus::Pending);

    // The withdrawn request stays withdrawn when the initiator rejects it.
    let result = decide(&manager, event.id, vec![first.id], Decision::Rejected)
        .await
        .unwrap();
    assert_eq!(result, StatusUpdateResult::default());

    let mine: Vec<_> = manager
        .requests_by_requester(UserId(10))
        .await
        .unwrap()
        .into_iter()
        .map(|r| (r.id, r.status))
        .collect();
    assert_eq!(
        mine,
        vec![
            (first.id, RequestStatus::Canceled),
            (second.id, RequestStatus::Pending)
        ]
    );
}

#[test_log::test(tokio::test)]
async fn test_cancel_keeps_seat_by_default() {
    let manager = InMemoryRequestManager::new();
    let event = published_event(&manager, 1, true).await;
    let ids = submit_from(&manager, event.id, 10..11).await;
    decide(&manager, event.id, ids.clone(), Decision::Confirmed)
        .await
        .unwrap();

    manager.cancel_request(UserId(10), ids[0]).await.unwrap();

    let audit = manager.audit_confirmed_count(event.id).await.unwrap();
    assert_eq!(audit.cached, 1);
    assert_eq!(audit.counted, 0);
    assert!(!audit.is_consistent());

    let err = manager
        .submit_request(UserId(11), event.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TurnstileError::CapacityExceeded { .. }));
}

#[test_log::test(tokio::test)]
async fn test_cancel_releases_seat_when_configured() {
    let manager = InMemoryRequestManager::new().with_config(AdmissionConfig {
        release_seat_on_cancel: true,
        ..Default::default()
    });
    let event = published_event(&manager, 1, true).await;
    let ids = submit_from(&manager, event.id, 10..11).await;
    decide(&manager, event.id, ids.clone(), Decision::Confirmed)
        .await
        .unwrap();

    manager.cancel_request(UserId(10), ids[0]).await.unwrap();
    // Canceling twice frees nothing more.
    manager.cancel_request(UserId(10), ids[0]).await.unwrap();

    let audit = manager.audit_confirmed_count(event.id).await.unwrap();
    assert_eq!((audit.cached, audit.counted), (0, 0));

    let view = manager.submit_request(UserId(11), event.id).await.unwrap();
    assert_eq!(view.status, RequestStatus::Pending);
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_decisions_never_exceed_limit() {
    let manager = Arc::new(InMemoryRequestManager::new());
    let event = published_event(&manager, 4, true).await;
    let ids = submit_from(&manager, event.id, 10..30).await;
    let event_id = event.id;

    let decisions = ids.chunks(3).map(|chunk| {
        let manager = manager.clone();
        let request_ids = chunk.to_vec();
        async move {
            manager
                .decide_requests(
                    OWNER,
                    event_id,
                    StatusUpdate {
                        request_ids,
                        status: Decision::Confirmed,
                    },
                )
                .await
        }
    });
    let outcomes = futures::future::join_all(decisions).await;

    let mut confirmed = 0;
    for outcome in outcomes {
        match outcome {
            Ok(result) => confirmed += result.confirmed_requests.len(),
            Err(TurnstileError::CapacityExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    let event = manager.get_event(event.id).await.unwrap();
    assert_eq!(confirmed, 4);
    assert_eq!(event.confirmed_requests, 4);
    assert!(manager.audit_confirmed_count(event.id).await.unwrap().is_consistent());
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn test_concurrent_submissions_respect_limit() {
    let manager = Arc::new(InMemoryRequestManager::new());
    let event_id = published_event(&manager, 3, false).await.id;

    let handles: Vec<_> = (10..30)
        .map(|requester| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.submit_request(UserId(requester), event_id).await })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        match handle.await.expect("Task panicked") {
            Ok(view) => {
                assert_eq!(view.status, RequestStatus::Confirmed);
                admitted += 1;
            }
            Err(TurnstileError::CapacityExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(manager.get_event(event_id).await.unwrap().confirmed_requests, 3);
}

#[test]
fn test_status_update_wire_format() {
    let update: StatusUpdate =
        serde_json::from_str(r#"{"requestIds": [3, 1, 2], "status": "CONFIRMED"}"#).unwrap();
    assert_eq!(
        update.request_ids,
        vec![RequestId(3), RequestId(1), RequestId(2)]
    );
    assert_eq!(update.status, Decision::Confirmed);

    let json = serde_json::to_value(StatusUpdateResult::default()).unwrap();
    assert_eq!(
        json,
        serde_json::json!({"confirmedRequests": [], "rejectedRequests": []})
    );
}
