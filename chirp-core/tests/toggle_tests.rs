mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chirp_core::{BackendError, LogQuery, ToggleController, ToggleOutcome, ToggleState};
use chirp_types::{ActorId, EntityId, RelationKind, Severity};
use common::{gateway, ScriptedBackend};
use serde_json::json;

fn like_42(backend: &Arc<ScriptedBackend>, initial: ToggleState) -> (ToggleController, Arc<chirp_core::LogRing>) {
    let (gw, ring) = gateway(backend);
    let controller = ToggleController::new(
        gw,
        RelationKind::Like,
        ActorId::new("u1"),
        EntityId::Int(42),
        initial,
    );
    (controller, ring)
}

#[tokio::test]
async fn test_like_confirmed_by_server() {
    let backend = ScriptedBackend::new(|_| Ok(json!([{"liked": true, "likes_count": 4}])));
    let (controller, _) = like_42(&backend, ToggleState::settled(false, 3));

    let outcome = controller.toggle().await;

    assert_eq!(outcome, ToggleOutcome::Confirmed { value: true, count: 4 });
    assert_eq!(controller.state(), ToggleState::settled(true, 4));
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test]
async fn test_server_count_wins_over_guess() {
    let backend = ScriptedBackend::new(|_| Ok(json!([{"liked": true, "likes_count": 10}])));
    let (controller, _) = like_42(&backend, ToggleState::settled(false, 3));

    controller.toggle().await;

    assert_eq!(controller.state(), ToggleState::settled(true, 10));
}

#[tokio::test]
async fn test_failure_rolls_back_and_logs() {
    let backend = ScriptedBackend::new(|_| Err(BackendError::with_code("timeout", "network")));
    let (gw, ring) = gateway(&backend);
    let rollbacks = Arc::new(AtomicUsize::new(0));
    let seen = rollbacks.clone();
    let controller = ToggleController::new(
        gw,
        RelationKind::Like,
        ActorId::new("u1"),
        EntityId::Int(42),
        ToggleState::settled(false, 3),
    )
    .on_rollback(move |err| {
        assert_eq!(err.message, "timeout");
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let outcome = controller.toggle().await;

    match outcome {
        ToggleOutcome::RolledBack { value, count, error } => {
            assert!(!value);
            assert_eq!(count, 3);
            assert_eq!(error.code.as_deref(), Some("network"));
        }
        other => panic!("expected rollback, got {other:?}"),
    }
    assert_eq!(controller.state(), ToggleState::settled(false, 3));
    assert_eq!(rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(
        ring.query(&LogQuery::new().tag("TOGGLE").level(Severity::Error))
            .len(),
        1
    );
}

#[tokio::test]
async fn test_second_toggle_while_pending_is_ignored() {
    let backend = ScriptedBackend::new(|_| Ok(json!([{"liked": true, "likes_count": 4}])));
    backend.hold();
    let (controller, _) = like_42(&backend, ToggleState::settled(false, 3));

    let (first, second) = tokio::join!(controller.toggle(), async {
        backend.wait_for_calls(1).await;
        assert!(controller.state().is_pending());
        let second = controller.toggle().await;
        backend.release();
        second
    });

    assert_eq!(first, ToggleOutcome::Confirmed { value: true, count: 4 });
    assert_eq!(second, ToggleOutcome::Ignored);
    assert_eq!(backend.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_toggle_restores_settled_state() {
    let backend = ScriptedBackend::new(|_| Ok(json!([{"liked": true, "likes_count": 4}])));
    backend.hold();
    let (controller, ring) = like_42(&backend, ToggleState::settled(false, 3));
    let rx = controller.subscribe();

    let cancelled = tokio::time::timeout(Duration::from_millis(10), controller.toggle()).await;

    assert!(cancelled.is_err());
    assert_eq!(backend.call_count(), 1);
    assert_eq!(controller.state(), ToggleState::settled(false, 3));
    assert_eq!(*rx.borrow(), ToggleState::settled(false, 3));
    assert_eq!(
        ring.query(&LogQuery::new().tag("TOGGLE").level(Severity::Warn))
            .len(),
        1
    );

    backend.release();
    let outcome = controller.toggle().await;

    assert_eq!(outcome, ToggleOutcome::Confirmed { value: true, count: 4 });
    assert_eq!(backend.call_count(), 2);
}

#[tokio::test]
async fn test_each_failed_toggle_counts_once_toward_bursts() {
    let backend = ScriptedBackend::new(|_| Err(BackendError::new("down")));
    let (controller, ring) = like_42(&backend, ToggleState::settled(false, 3));

    for _ in 0..4 {
        controller.toggle().await;
    }

    assert_eq!(ring.query(&LogQuery::new().level(Severity::Error)).len(), 4);
    assert_eq!(
        ring.query(&LogQuery::new().tag("GATEWAY").level(Severity::Warn))
            .len(),
        4
    );
    assert!(ring
        .query(&LogQuery::new().level(Severity::Critical))
        .is_empty());
}

#[tokio::test]
async fn test_optimistic_state_is_visible_while_pending() {
    let backend = ScriptedBackend::new(|_| Ok(json!([{"liked": true, "likes_count": 4}])));
    backend.hold();
    let (controller, _) = like_42(&backend, ToggleState::settled(false, 3));
    let mut rx = controller.subscribe();

    let (outcome, pending) = tokio::join!(controller.toggle(), async {
        backend.wait_for_calls(1).await;
        let pending = *rx.borrow_and_update();
        backend.release();
        pending
    });

    assert_eq!(
        pending,
        ToggleState::Pending {
            previous_value: false,
            previous_count: 3,
            optimistic_value: true,
            optimistic_count: 4,
        }
    );
    assert!(matches!(outcome, ToggleOutcome::Confirmed { .. }));
    assert_eq!(*rx.borrow(), ToggleState::settled(true, 4));
}

#[tokio::test]
async fn test_successful_toggles_alternate_value() {
    // Follow reports no counter, so the optimistic values stand.
    let backend = ScriptedBackend::new(|_| Ok(json!([])));
    let (gw, _) = gateway(&backend);
    let controller = ToggleController::new(
        gw,
        RelationKind::Follow,
        ActorId::new("u1"),
        EntityId::from("u2"),
        ToggleState::settled(false, 0),
    );

    for n in 1..=5u32 {
        controller.toggle().await;
        let state = controller.state();
        assert_eq!(state.value(), n % 2 == 1);
        assert_eq!(state.count(), n % 2);
    }
    assert_eq!(backend.call_count(), 5);
}

#[tokio::test]
async fn test_refresh_reseeds_from_server() {
    let backend = ScriptedBackend::new(|_| Ok(json!({"id": 1})));
    let (controller, _) = like_42(&backend, ToggleState::settled(false, 3));

    let state = controller.refresh().await.unwrap();

    assert_eq!(state, ToggleState::settled(true, 3));
    assert_eq!(backend.calls()[0].operation.to_string(), "select:likes");
}

#[tokio::test]
async fn test_refresh_failure_keeps_state() {
    let backend = ScriptedBackend::new(|_| Err(BackendError::new("down")));
    let (controller, _) = like_42(&backend, ToggleState::settled(true, 8));

    assert!(controller.refresh().await.is_err());
    assert_eq!(controller.state(), ToggleState::settled(true, 8));
}
