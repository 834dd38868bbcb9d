// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::dispatch::submit_leg;
use mw_core::MessageStatus;
use mw_storage::{MessageQuery, MessageStore as _};
use std::sync::atomic::AtomicUsize;

/// Scriptable processor: pops the next disposition per call, records
/// the order messages arrived in.
struct StubProcessor {
    script: Mutex<Vec<Disposition>>,
    seen: Mutex<Vec<String>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl StubProcessor {
    fn completing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn scripted(script: Vec<Disposition>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Processor for StubProcessor {
    async fn process(&self, message: &Message) -> Result<Disposition, HostError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.seen.lock().push(message.correlation_id.clone());
        let next = self.script.lock().pop();
        Ok(next.unwrap_or(Disposition::Complete))
    }
}

fn tuning(pool_size: usize) -> HostTuning {
    HostTuning {
        pool_size,
        queue_size: 100,
        timeout: Duration::from_secs(5),
        max_errors: 10,
        error_delay: Duration::from_millis(10),
        max_retries: 3,
        retry_delay: Duration::from_millis(10),
    }
}

fn make_host(
    ctx: &EngineContext,
    processor: Arc<StubProcessor>,
    tuning: HostTuning,
) -> Arc<WorkerHost<StubProcessor>> {
    let host = Arc::new(WorkerHost::new("TestHost", ItemType::Process, tuning, processor, ctx.clone()));
    ctx.dispatcher.register("TestHost", host.queue_sender());
    host
}

fn leg(n: u32) -> Message {
    Message::builder()
        .correlation_id(format!("corr-{n:03}"))
        .raw(format!("payload-{n}").into_bytes())
        .build()
}

async fn wait_until<F: Fn() -> bool>(deadline_ms: u64, predicate: F) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(deadline_ms);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    predicate()
}

#[tokio::test]
async fn lifecycle_start_and_stop() {
    let ctx = EngineContext::in_memory();
    let host = make_host(&ctx, StubProcessor::completing(), tuning(1));

    assert_eq!(host.state(), HostState::Created);
    host.start().await.unwrap();
    assert_eq!(host.state(), HostState::Running);

    host.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(host.state(), HostState::Stopped);

    // Stopped hosts start again.
    host.start().await.unwrap();
    assert_eq!(host.state(), HostState::Running);
    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn start_is_rejected_while_running() {
    let ctx = EngineContext::in_memory();
    let host = make_host(&ctx, StubProcessor::completing(), tuning(1));
    host.start().await.unwrap();

    let err = host.start().await.unwrap_err();
    assert!(matches!(
        err,
        HostError::InvalidTransition { from: HostState::Running, operation: "start" }
    ));
    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn pause_requires_running() {
    let ctx = EngineContext::in_memory();
    let host = make_host(&ctx, StubProcessor::completing(), tuning(1));
    assert!(host.pause().await.is_err());
    assert!(host.resume().await.is_err());
}

#[tokio::test]
async fn single_worker_preserves_arrival_order() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::completing();
    let host = make_host(&ctx, Arc::clone(&processor), tuning(1));
    host.start().await.unwrap();

    for n in 0..20 {
        submit_leg(&ctx, "TestHost", leg(n), true).await.unwrap();
    }

    assert!(wait_until(2_000, || processor.seen().len() == 20).await);
    let expected: Vec<String> = (0..20).map(|n| format!("corr-{n:03}")).collect();
    assert_eq!(processor.seen(), expected);

    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn completed_messages_are_recorded() {
    let ctx = EngineContext::in_memory();
    let host = make_host(&ctx, StubProcessor::completing(), tuning(1));
    host.start().await.unwrap();

    let header_id = submit_leg(&ctx, "TestHost", leg(1), true).await.unwrap();
    assert!(wait_for_status(&ctx, header_id, MessageStatus::Completed).await);
    host.stop(Duration::from_secs(1)).await.unwrap();
}

async fn status_of(ctx: &EngineContext, id: mw_storage::HeaderId) -> Option<MessageStatus> {
    ctx.store.get_by_id(id).await.ok().flatten().map(|h| h.status)
}

async fn wait_for_status(
    ctx: &EngineContext,
    id: mw_storage::HeaderId,
    expected: MessageStatus,
) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(3_000);
    while tokio::time::Instant::now() < deadline {
        if status_of(ctx, id).await == Some(expected) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_until_success() {
    let ctx = EngineContext::in_memory();
    // Script is popped from the end: two retries then success.
    let processor = StubProcessor::scripted(vec![
        Disposition::Complete,
        Disposition::Retry { delay: Duration::from_millis(5), reason: "nack".into() },
        Disposition::Retry { delay: Duration::from_millis(5), reason: "nack".into() },
    ]);
    let host = make_host(&ctx, Arc::clone(&processor), tuning(1));
    host.start().await.unwrap();

    let header_id = submit_leg(&ctx, "TestHost", leg(1), true).await.unwrap();

    assert!(wait_until(3_000, || processor.calls() == 3).await);
    assert!(wait_for_status(&ctx, header_id, MessageStatus::Completed).await);
    assert_eq!(host.status().metrics.retries, 2);
    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retries_exhaust_to_error() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::scripted(vec![
        Disposition::Retry { delay: Duration::from_millis(2), reason: "nack".into() };
        10
    ]);
    let mut tuning = tuning(1);
    tuning.max_retries = 2;
    let host = make_host(&ctx, Arc::clone(&processor), tuning);
    host.start().await.unwrap();

    let header_id = submit_leg(&ctx, "TestHost", leg(1), true).await.unwrap();
    assert!(wait_for_status(&ctx, header_id, MessageStatus::Error).await);
    // Initial attempt plus two retries.
    assert_eq!(processor.calls(), 3);
    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consecutive_failures_trip_host_to_error() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::scripted(vec![Disposition::Fail("boom".into()); 5]);
    let mut tuning = tuning(1);
    tuning.max_errors = 3;
    let host = make_host(&ctx, Arc::clone(&processor), tuning);
    host.start().await.unwrap();

    for n in 0..5 {
        submit_leg(&ctx, "TestHost", leg(n), true).await.unwrap();
    }

    assert!(wait_until(3_000, || host.state() == HostState::Error).await);
    assert_eq!(host.status().metrics.consecutive_errors, 3);

    // Error hosts can be stopped and restarted.
    host.stop(Duration::from_secs(1)).await.unwrap();
    assert_eq!(host.state(), HostState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_gates_workers_and_resume_releases() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::completing();
    let host = make_host(&ctx, Arc::clone(&processor), tuning(1));
    host.start().await.unwrap();
    host.pause().await.unwrap();
    assert_eq!(host.state(), HostState::Paused);

    submit_leg(&ctx, "TestHost", leg(1), true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(processor.calls(), 0, "paused host processed a message");

    host.resume().await.unwrap();
    assert!(wait_until(2_000, || processor.calls() == 1).await);
    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_shutdown_leaves_no_queued_rows() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::slow(Duration::from_millis(20));
    let host = make_host(&ctx, Arc::clone(&processor), tuning(1));
    host.start().await.unwrap();

    for n in 0..50 {
        submit_leg(&ctx, "TestHost", leg(n), true).await.unwrap();
    }

    let started = std::time::Instant::now();
    host.stop(Duration::from_millis(500)).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3), "stop exceeded budget");

    let rows = ctx.store.query(&MessageQuery::new().limit(0)).await.unwrap();
    assert_eq!(rows.len(), 50);
    for row in rows {
        assert!(
            matches!(row.status, MessageStatus::Completed | MessageStatus::Error),
            "row left in {:?}",
            row.status
        );
        if row.status == MessageStatus::Error {
            let reason = row.error_message.unwrap_or_default();
            assert!(reason.contains("cancelled"), "unexpected reason: {reason}");
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_preserving_returns_undelivered_messages() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::slow(Duration::from_millis(50));
    let host = make_host(&ctx, Arc::clone(&processor), tuning(1));
    host.start().await.unwrap();

    for n in 0..10 {
        submit_leg(&ctx, "TestHost", leg(n), true).await.unwrap();
    }
    let preserved = host.stop_preserving(Duration::from_millis(100)).await.unwrap();
    assert!(!preserved.is_empty(), "expected undelivered messages to be preserved");

    // Preserved rows are still Queued: they were neither run nor
    // cancelled.
    for queued in &preserved {
        assert_eq!(status_of(&ctx, queued.header_id).await, Some(MessageStatus::Queued));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_messages_are_discarded() {
    let ctx = EngineContext::in_memory();
    let processor = StubProcessor::completing();
    let host = make_host(&ctx, Arc::clone(&processor), tuning(1));
    host.start().await.unwrap();

    let mut message = leg(1);
    message.expires_at_ms = Some(1);
    let header_id = submit_leg(&ctx, "TestHost", message, true).await.unwrap();

    assert!(wait_for_status(&ctx, header_id, MessageStatus::Discarded).await);
    assert_eq!(processor.calls(), 0);
    host.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn try_submit_backpressure() {
    let ctx = EngineContext::in_memory();
    let mut tuning = tuning(1);
    tuning.queue_size = 2;
    let host = make_host(&ctx, StubProcessor::completing(), tuning);
    // Host not started: nothing drains the queue.
    let _ = host;

    submit_leg(&ctx, "TestHost", leg(1), false).await.unwrap();
    submit_leg(&ctx, "TestHost", leg(2), false).await.unwrap();
    let err = submit_leg(&ctx, "TestHost", leg(3), false).await.unwrap_err();
    assert!(matches!(err, HostError::Backpressure(_)));
}

#[tokio::test]
async fn submit_to_unknown_target_fails() {
    let ctx = EngineContext::in_memory();
    let err = submit_leg(&ctx, "Nowhere", leg(1), true).await.unwrap_err();
    assert!(matches!(err, HostError::NotAccepting(_)));
}

#[tokio::test]
async fn rejected_leg_fails_its_wal_entry() {
    use mw_storage::{Wal, WalConfig};

    let dir = tempfile::tempdir().unwrap();
    let ctx = EngineContext::in_memory()
        .with_wal(Arc::new(Mutex::new(Wal::open(WalConfig::new(dir.path())).unwrap())));
    let mut tuning = tuning(1);
    tuning.queue_size = 1;
    let host = make_host(&ctx, StubProcessor::completing(), tuning);
    // Host not started: the second nonblocking submit hits a full queue.
    let _ = host;

    let accepted = leg(1);
    let accepted_id = accepted.id.to_string();
    submit_leg(&ctx, "TestHost", accepted, false).await.unwrap();
    let err = submit_leg(&ctx, "TestHost", leg(2), false).await.unwrap_err();
    assert!(matches!(err, HostError::Backpressure(_)));

    // The queued leg is still pending; the rejected one reads as a
    // terminal failure, never as completed.
    {
        let wal = ctx.wal.as_ref().unwrap().lock();
        assert_eq!(wal.pending_count(), 1);
        let pending = wal.get_pending();
        assert_eq!(pending[0].message_id, accepted_id);
    }
    let segment = std::fs::read_to_string(dir.path().join("medway.wal")).unwrap();
    let last_record = segment.lines().rev().find(|l| !l.is_empty()).unwrap();
    assert!(last_record.contains("\"state\":\"failed\""), "ledger tail: {last_record}");
    assert!(!segment.contains("\"state\":\"completed\""), "rejected leg recorded as completed");
}
