//! Claiming, locking, retry and shutdown behaviour of the scheduler.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use common::{BackendMode, BrokenClaims, Harness};
use memalerts_db::{lock_key_for_instance, ModerationStore, TickLease, TickLock};
use memalerts_models::{AiStatus, Submission};
use memalerts_worker::{Scheduler, TickSkip, EXHAUSTED_MARKER};

#[tokio::test]
async fn test_concurrent_instances_process_each_item_once() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for i in 0..6 {
        let s = h
            .submit(&format!("Мем {i}"), &format!("m{i}.mp4"), format!("bytes {i}").as_bytes())
            .await;
        ids.push(s.id);
    }

    // Distinct instance ids take distinct advisory keys, so both tick.
    let mut other_config = h.config.clone();
    other_config.instance_id = "other-instance".to_string();
    let mut other_deps = h.deps(true);
    other_deps.lock = Arc::new(h.locks.lock_for(lock_key_for_instance("other-instance")));

    let a = h.scheduler();
    let b = Scheduler::new(&other_config, other_deps).unwrap();
    let (ra, rb) = tokio::join!(a.run_once(), b.run_once());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.done + rb.done, 6);
    assert_eq!(h.backend.transcribe_calls.load(Ordering::SeqCst), 6);
    for id in &ids {
        let s = h.store.submission(id).await.unwrap();
        assert_eq!(s.ai_status, AiStatus::Done);
        assert_eq!(s.ai_retry_count, 0);
    }
}

#[tokio::test]
async fn test_racing_claims_grant_one_winner() {
    let h = Harness::new();
    let s = h.submit("Кот", "cat.mp4", b"cat").await;
    let now = Utc::now();
    let stuck_before = now - chrono::Duration::minutes(10);

    let attempts = (0..8).map(|_| {
        let store = h.store.clone();
        let candidate = s.clone();
        tokio::spawn(async move { store.try_claim(&candidate, now, stuck_before).await })
    });
    let mut winners = 0;
    for attempt in attempts.collect::<Vec<_>>() {
        if attempt.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }

    assert_eq!(winners, 1);
    assert_eq!(h.store.submission(&s.id).await.unwrap().ai_status, AiStatus::Processing);
}

#[tokio::test]
async fn test_claim_error_does_not_abort_batch() {
    let h = Harness::new();
    let first = h.submit("Кот", "cat.mp4", b"cat").await;
    let second = h.submit("Пёс", "dog.mp4", b"dog").await;

    let mut deps = h.deps(true);
    deps.store = Arc::new(BrokenClaims::new(h.store.clone(), &[first.id.clone()]));
    let scheduler = Scheduler::new(&h.config, deps).unwrap();

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.claim_errors, 1);
    assert_eq!(report.done, 1);

    assert_eq!(h.store.submission(&first.id).await.unwrap().ai_status, AiStatus::Pending);
    assert_eq!(h.store.submission(&second.id).await.unwrap().ai_status, AiStatus::Done);
    assert!(!h.locks.is_held(lock_key_for_instance(&h.config.instance_id)));

    // The failing row stays eligible and is picked up once claims work again.
    let report = h.scheduler().run_once().await.unwrap();
    assert_eq!(report.done, 1);
    assert_eq!(h.store.submission(&first.id).await.unwrap().ai_status, AiStatus::Done);
}

#[tokio::test]
async fn test_held_lock_skips_tick() {
    let h = Harness::new();
    h.submit("Кот", "cat.mp4", b"cat").await;

    let key = lock_key_for_instance(&h.config.instance_id);
    let lease = h.locks.lock_for(key).try_acquire().await.unwrap().unwrap();

    let scheduler = h.scheduler();
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.skipped, Some(TickSkip::LockHeld));
    assert_eq!(h.backend.total_calls(), 0);
    assert_eq!(scheduler.state().snapshot().skipped, 1);

    lease.release().await.unwrap();
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.done, 1);
    assert!(!h.locks.is_held(key));
}

#[tokio::test]
async fn test_lock_released_after_tick() {
    let h = Harness::new();
    h.submit("Кот", "cat.mp4", b"cat").await;

    h.scheduler().run_once().await.unwrap();

    assert!(!h.locks.is_held(lock_key_for_instance(&h.config.instance_id)));
}

#[tokio::test]
async fn test_transient_failures_reach_failed_final() {
    let mut h = Harness::new();
    h.config.max_retries = 2;
    h.backend.set_mode(BackendMode::Unavailable);
    let s = h.submit("Кот", "cat.mp4", b"cat").await;
    let scheduler = h.scheduler();

    let before = Utc::now();
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = h.store.submission(&s.id).await.unwrap();
    assert_eq!(failed.ai_status, AiStatus::Failed);
    assert_eq!(failed.ai_retry_count, 1);
    assert!(failed.ai_error.as_deref().unwrap().starts_with("transient"));
    let next = failed.ai_next_retry_at.unwrap();
    assert!(next >= before + chrono::Duration::seconds(5));

    // Not eligible until the backoff has passed.
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.candidates, 0);

    h.store
        .update_submission(&s.id, |s| s.ai_next_retry_at = Some(Utc::now()))
        .await;
    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.failed_final, 1);

    let final_row = h.store.submission(&s.id).await.unwrap();
    assert_eq!(final_row.ai_status, AiStatus::FailedFinal);
    assert_eq!(final_row.ai_retry_count, 2);
    assert_eq!(final_row.ai_next_retry_at, None);

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.candidates, 0);
}

#[tokio::test]
async fn test_recovery_after_transient_failure() {
    let h = Harness::new();
    h.backend.set_mode(BackendMode::Unavailable);
    let s = h.submit("Кот", "cat.mp4", b"cat").await;
    let scheduler = h.scheduler();

    scheduler.run_once().await.unwrap();
    h.backend.set_mode(BackendMode::Healthy);
    h.store
        .update_submission(&s.id, |s| s.ai_next_retry_at = Some(Utc::now()))
        .await;
    scheduler.run_once().await.unwrap();

    let done = h.store.submission(&s.id).await.unwrap();
    assert_eq!(done.ai_status, AiStatus::Done);
    assert_eq!(done.ai_error, None);
    assert_eq!(done.ai_retry_count, 1);
}

#[tokio::test]
async fn test_stuck_claim_with_spent_budget_is_finalized() {
    let h = Harness::new();
    let mut s = Submission::new("channel-1", "viewer-1", "Кот");
    s.file_url = Some(h.media_file("cat.mp4", b"cat"));
    s.ai_status = AiStatus::Processing;
    s.ai_last_tried_at = Some(Utc::now() - chrono::Duration::hours(1));
    s.ai_retry_count = h.config.max_retries - 1;
    h.store.insert_submission(s.clone()).await;

    let report = h.scheduler().run_once().await.unwrap();
    assert_eq!(report.exhausted, 1);
    assert_eq!(h.backend.total_calls(), 0);

    let row = h.store.submission(&s.id).await.unwrap();
    assert_eq!(row.ai_status, AiStatus::FailedFinal);
    assert_eq!(row.ai_error.as_deref(), Some(EXHAUSTED_MARKER));
}

#[tokio::test]
async fn test_stuck_claim_is_reclaimed_as_retry() {
    let h = Harness::new();
    let mut s = Submission::new("channel-1", "viewer-1", "Кот");
    s.file_url = Some(h.media_file("cat.mp4", b"cat"));
    s.ai_status = AiStatus::Processing;
    s.ai_last_tried_at = Some(Utc::now() - chrono::Duration::hours(1));
    h.store.insert_submission(s.clone()).await;

    h.scheduler().run_once().await.unwrap();

    let row = h.store.submission(&s.id).await.unwrap();
    assert_eq!(row.ai_status, AiStatus::Done);
    assert_eq!(row.ai_retry_count, 1);
}

#[tokio::test]
async fn test_fresh_processing_claim_is_left_alone() {
    let h = Harness::new();
    let mut s = Submission::new("channel-1", "viewer-1", "Кот");
    s.file_url = Some(h.media_file("cat.mp4", b"cat"));
    s.ai_status = AiStatus::Processing;
    s.ai_last_tried_at = Some(Utc::now());
    h.store.insert_submission(s.clone()).await;

    let report = h.scheduler().run_once().await.unwrap();
    assert_eq!(report.candidates, 0);
    assert_eq!(h.store.submission(&s.id).await.unwrap().ai_status, AiStatus::Processing);
}

#[tokio::test]
async fn test_item_timeout_fails_and_cleans_scratch() {
    let mut h = Harness::new();
    h.config.item_timeout = Duration::from_millis(200);
    h.media.set_probe_delay(Duration::from_secs(5));
    let s = h.submit("Кот", "cat.mp4", b"cat").await;

    let report = h.scheduler().run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let row = h.store.submission(&s.id).await.unwrap();
    assert_eq!(row.ai_status, AiStatus::Failed);
    assert!(row.ai_error.as_deref().unwrap().contains("timed out"));

    let leftovers = std::fs::read_dir(&h.config.work_dir).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_missing_media_is_recorded_as_failure() {
    let h = Harness::new();
    let mut s = Submission::new("channel-1", "viewer-1", "Кот");
    s.file_url = Some("/uploads/memes/gone.mp4".to_string());
    h.store.insert_submission(s.clone()).await;

    let report = h.scheduler().run_once().await.unwrap();
    assert_eq!(report.failed, 1);

    let row = h.store.submission(&s.id).await.unwrap();
    assert_eq!(row.ai_status, AiStatus::Failed);
    assert!(row.ai_error.as_deref().unwrap().starts_with("fatal"));
}

#[tokio::test]
async fn test_batch_size_bounds_tick() {
    let mut h = Harness::new();
    h.config.batch_size = 2;
    for i in 0..5 {
        h.submit(&format!("Мем {i}"), &format!("m{i}.mp4"), format!("b{i}").as_bytes())
            .await;
    }

    let report = h.scheduler().run_once().await.unwrap();
    assert_eq!(report.candidates, 2);
    assert_eq!(report.done, 2);
}

#[tokio::test]
async fn test_run_loop_processes_and_stops_on_shutdown() {
    let h = Harness::new();
    let s = h.submit("Кот", "cat.mp4", b"cat").await;
    let scheduler = Arc::new(h.scheduler());
    let state = scheduler.state();

    let (tx, rx) = watch::channel(false);
    let runner = {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.run(rx).await })
    };

    let mut done = false;
    for _ in 0..100 {
        if h.store.submission(&s.id).await.unwrap().ai_status == AiStatus::Done {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(done);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("scheduler stops")
        .unwrap();

    let snapshot = state.snapshot();
    assert!(snapshot.ticks >= 1);
    assert!(snapshot.processed >= 1);
    assert!(!snapshot.running);
    assert!(snapshot.claimed >= 1);
    assert!(snapshot.last_started_at.is_some());
    assert!(snapshot.last_finished_at.is_some());
    assert_eq!(snapshot.last_error, None);
}
