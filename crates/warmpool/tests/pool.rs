//! Populate, Pick/Put and Close against a scripted Session Service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::MockService;
use warmpool::{CloseReport, PoolBuilder, PoolError, SessionPool};

fn pool_with(service: MockService, size: usize) -> Arc<SessionPool<MockService>> {
    PoolBuilder::new()
        .pool_size(size)
        .refresh_chance(0.0)
        .drain_timeout(Duration::from_secs(1))
        .build(service)
}

// ---------------------------------------------------------------------------
// Populate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_populate_fills_pool_to_configured_size() {
    let pool = pool_with(MockService::default(), 5);
    pool.populate().await.unwrap();

    assert_eq!(pool.pool_size_counter(), 5);
    assert_eq!(pool.queued(), 5);
    assert_eq!(pool.bad_session_count(), 0);
    assert_eq!(pool.service().creates(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_populate_unreachable_service_fills_pool_with_bad_sessions() {
    let pool = pool_with(MockService::unreachable(), 3);
    pool.populate().await.unwrap();

    assert_eq!(pool.pool_size_counter(), 3);
    assert_eq!(pool.bad_session_count(), 3);

    // Availability over health: pick hands out a bad session immediately.
    let session = tokio::time::timeout(Duration::from_millis(1), pool.pick())
        .await
        .expect("pick must not wait")
        .unwrap();
    assert!(!session.is_ok());
    assert!(session.token().is_none());

    let snap = pool.snapshot();
    assert_eq!(snap.network_errors, 3);
    assert_eq!(snap.recent_network_errors.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_populate_fault_response_counts_as_bad_session() {
    let service = MockService::default();
    service.set(|s| s.create_fault = true);
    let pool = pool_with(service, 2);
    pool.populate().await.unwrap();

    assert_eq!(pool.pool_size_counter(), 2);
    assert_eq!(pool.bad_session_count(), 2);

    let session = pool.pick().await.unwrap();
    assert_eq!(session.fault().map(|f| f.code.as_str()), Some("ERR.SWS.AUTH"));
    assert_eq!(pool.snapshot().fault_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn test_populate_huge_expiry_does_not_overflow_clock() {
    let pool = PoolBuilder::new()
        .pool_size(2)
        .expire_scheme(u64::MAX / 2, u64::MAX)
        .refresh_chance(0.0)
        .build(MockService::default());
    pool.populate().await.unwrap();
    assert_eq!(pool.bad_session_count(), 0);

    let session = pool.pick().await.unwrap();
    let now = tokio::time::Instant::now();
    assert!(!session.needs_validation(now));
    assert!(session.expire_at() > now + Duration::from_secs(3600));
    pool.put(session).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_populate_zero_capacity_returns_error_and_pick_fails_fast() {
    let pool = pool_with(MockService::default(), 0);

    let err = pool.populate().await.unwrap_err();
    assert!(matches!(err, PoolError::ZeroCapacity));

    let picked = tokio::time::timeout(Duration::from_millis(1), pool.pick())
        .await
        .expect("pick on a zero-capacity pool must not hang");
    assert!(matches!(picked, Err(PoolError::Closed)));
    assert!(pool.snapshot().closed);
    assert_eq!(pool.service().creates(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_populate_twice_returns_already_populated() {
    let pool = pool_with(MockService::default(), 2);
    pool.populate().await.unwrap();

    let err = pool.populate().await.unwrap_err();
    assert!(matches!(err, PoolError::AlreadyPopulated));
    assert_eq!(pool.pool_size_counter(), 2);
    assert_eq!(pool.service().creates(), 2);
}

// ---------------------------------------------------------------------------
// Pick / Put
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_pick_put_round_trip_preserves_queue_length() {
    let pool = pool_with(MockService::default(), 3);
    pool.populate().await.unwrap();

    let session = pool.pick().await.unwrap();
    let id = session.id();
    assert_eq!(pool.queued(), 2);
    assert_eq!(pool.snapshot().leased, 1);

    pool.put(session).await.unwrap();
    assert_eq!(pool.queued(), 3);
    assert_eq!(pool.snapshot().leased, 0);

    // FIFO: the returned session sits at the back.
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(pool.pick().await.unwrap().id());
    }
    assert_eq!(ids[2], id);
}

#[tokio::test(start_paused = true)]
async fn test_queued_plus_leased_equals_counter() {
    let pool = pool_with(MockService::default(), 4);
    pool.populate().await.unwrap();

    let a = pool.pick().await.unwrap();
    let b = pool.pick().await.unwrap();
    let snap = pool.snapshot();
    assert_eq!(snap.queued + snap.leased, snap.pool_size_counter);

    pool.put(a).await.unwrap();
    let snap = pool.snapshot();
    assert_eq!(snap.queued + snap.leased, snap.pool_size_counter);

    pool.put(b).await.unwrap();
    let snap = pool.snapshot();
    assert_eq!(snap.queued, 4);
    assert_eq!(snap.leased, 0);
}

#[tokio::test(start_paused = true)]
async fn test_pick_waits_until_session_put_back() {
    let pool = pool_with(MockService::default(), 1);
    pool.populate().await.unwrap();
    let held = pool.pick().await.unwrap();
    let held_id = held.id();

    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.pick().await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());

    pool.put(held).await.unwrap();
    let got = waiter.await.unwrap().unwrap();
    assert_eq!(got.id(), held_id);
}

#[tokio::test(start_paused = true)]
async fn test_put_after_close_returns_closed_and_closes_remotely() {
    let pool = pool_with(MockService::default(), 2);
    pool.populate().await.unwrap();
    let session = pool.pick().await.unwrap();
    let token = session.token().unwrap().to_string();

    let report = pool.close().await;
    assert_eq!(report.missing, 1);

    let err = pool.put(session).await.unwrap_err();
    assert!(matches!(err, PoolError::Closed));
    assert!(pool.service().closed().contains(&token));
    assert_eq!(pool.snapshot().leased, 0);
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_close_closes_every_session() {
    let pool = pool_with(MockService::default(), 3);
    pool.populate().await.unwrap();

    let report = pool.close().await;
    assert_eq!(
        report,
        CloseReport {
            closed: 3,
            ..CloseReport::default()
        }
    );
    assert_eq!(pool.service().closed().len(), 3);
    assert!(matches!(pool.pick().await, Err(PoolError::Closed)));
    assert!(pool.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn test_close_waits_for_leased_session() {
    let pool = pool_with(MockService::default(), 3);
    pool.populate().await.unwrap();
    let session = pool.pick().await.unwrap();

    {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            pool.put(session).await.unwrap();
        });
    }

    let report = pool.close().await;
    assert_eq!(report.closed, 3);
    assert_eq!(report.missing, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_reports_missing_after_drain_timeout() {
    let pool = pool_with(MockService::default(), 3);
    pool.populate().await.unwrap();
    let _held = pool.pick().await.unwrap();

    let report = pool.close().await;
    assert_eq!(report.closed, 2);
    assert_eq!(report.missing, 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_skips_sessions_without_token() {
    let pool = pool_with(MockService::unreachable(), 2);
    pool.populate().await.unwrap();

    let report = pool.close().await;
    assert_eq!(report.skipped, 2);
    assert_eq!(report.closed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_counts_remote_failures() {
    let pool = pool_with(MockService::default(), 2);
    pool.populate().await.unwrap();
    pool.service().set(|s| s.unreachable = true);

    let report = pool.close().await;
    assert_eq!(report.failed, 2);
    assert_eq!(pool.snapshot().network_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn test_close_error_status_counts_as_failed() {
    let pool = pool_with(MockService::default(), 3);
    pool.populate().await.unwrap();
    pool.service().set(|s| s.close_error_rs = true);

    let report = pool.close().await;
    assert_eq!(report.failed, 3);
    assert_eq!(report.closed, 0);
    assert!(pool.service().closed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_close_twice_second_call_is_noop() {
    let pool = pool_with(MockService::default(), 2);
    pool.populate().await.unwrap();

    assert_eq!(pool.close().await.closed, 2);
    assert_eq!(pool.close().await, CloseReport::default());
    assert_eq!(pool.service().closed().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_serializes_to_json() {
    let pool = pool_with(MockService::default(), 2);
    pool.populate().await.unwrap();

    let json = serde_json::to_value(pool.snapshot()).unwrap();
    assert_eq!(json["config_pool_size"], 2);
    assert_eq!(json["queued"], 2);
    assert_eq!(json["closed"], false);
}
