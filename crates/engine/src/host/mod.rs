// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Hosts: the worker-pool runtime around an adapter and a handler.
//!
//! All three host kinds (service, process, operation) share one
//! machine: a bounded queue, `pool_size` worker loops, the lifecycle
//! state, and the failure policy. The kind-specific behavior lives in a
//! [`Processor`] the workers call per message.

pub mod operation;
pub mod process;
pub mod reply;
pub mod service;

pub use operation::{FileOperationProcessor, TcpOperationProcessor};
pub use process::{PassthroughProcessor, RoutingProcessor};
pub use reply::{ReplyAction, ReplyCodeActions};
pub use service::{ServiceCallback, ServiceProcessor};

use crate::adapter::{Adapter, AdapterMetricsSnapshot};
use crate::context::EngineContext;
use crate::dispatch::{complete_wal, QueuedMessage};
use crate::error::HostError;
use bytes::Bytes;
use mw_core::{HostState, ItemConfig, ItemType, Message, MessageId, MessageStatus};
use mw_storage::MessageStore as _;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a processor decided about one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Done; the leg is `Completed`.
    Complete,
    /// Done, with acknowledgment content to record.
    CompleteWithAck(String),
    /// Re-enqueue after `delay`, counted against the retry budget.
    Retry { delay: Duration, reason: String },
    /// Terminal failure for this leg.
    Fail(String),
    /// Dropped deliberately (routing `delete`, expiry).
    Discard(String),
}

/// Result of an inbound adapter hand-off.
#[derive(Debug, Clone, Default)]
pub struct InboundOutcome {
    /// Protocol-level acknowledgment to send back, if any.
    pub ack: Option<Bytes>,
    /// ID of the accepted ingress message.
    pub message_id: Option<MessageId>,
    /// False when the payload was rejected (validation, backpressure).
    pub accepted: bool,
    /// Rejected for capacity rather than content; HTTP answers 503
    /// instead of 400.
    pub busy: bool,
    pub reason: Option<String>,
}

/// Callback from inbound adapters into their service host.
#[async_trait::async_trait]
pub trait InboundHandler: Send + Sync {
    async fn on_data_received(&self, data: Bytes, content_type: &str) -> InboundOutcome;
}

/// Kind-specific host behavior, driven by the shared worker pool.
#[async_trait::async_trait]
pub trait Processor: Send + Sync + 'static {
    /// The adapter whose lifecycle this host manages, if any.
    fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        None
    }

    /// Bind schemas, verify configuration. Runs inside `start()`.
    async fn on_start(&self) -> Result<(), HostError> {
        Ok(())
    }

    async fn on_stop(&self) {}

    /// Handle one dequeued message.
    async fn process(&self, message: &Message) -> Result<Disposition, HostError>;
}

/// Host-local counters.
#[derive(Debug, Default)]
pub struct HostMetrics {
    pub messages_received: AtomicU64,
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub retries: AtomicU64,
    pub consecutive_errors: AtomicU32,
    pub last_error: Mutex<Option<String>>,
}

/// Point-in-time host metrics for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct HostMetricsSnapshot {
    pub messages_received: u64,
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub retries: u64,
    pub consecutive_errors: u32,
    pub queue_depth: i64,
    pub last_error: Option<String>,
    pub adapter: Option<AdapterMetricsSnapshot>,
}

/// Status of one host: state plus metrics.
#[derive(Debug, Clone, Serialize)]
pub struct HostStatus {
    pub state: HostState,
    pub item_type: ItemType,
    pub metrics: HostMetricsSnapshot,
}

/// Tuning knobs read from the item's `Host` settings bag.
#[derive(Debug, Clone)]
pub struct HostTuning {
    pub pool_size: usize,
    pub queue_size: usize,
    pub timeout: Duration,
    pub max_errors: u32,
    pub error_delay: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl HostTuning {
    /// Defaults match the documented setting defaults.
    pub fn from_item(item: &ItemConfig) -> Result<Self, HostError> {
        let host = item.host_settings();
        let adapter = item.adapter_settings();
        Ok(Self {
            pool_size: item.pool_size.max(1),
            queue_size: host.parse_or("QueueSize", 1000)?,
            timeout: host.duration_secs_or("TimeoutSeconds", Duration::from_secs(30))?,
            max_errors: host.parse_or("MaxErrors", 10)?,
            error_delay: host.duration_secs_or("ErrorDelaySeconds", Duration::from_secs(5))?,
            max_retries: match host.parse::<u32>("MaxRetries")? {
                Some(n) => n,
                None => adapter.parse_or("MaxRetries", 3)?,
            },
            retry_delay: host.duration_secs_or("RetryInterval", Duration::from_secs(5))?,
        })
    }
}

/// The common host interface the engine drives.
#[async_trait::async_trait]
pub trait Host: Send + Sync {
    fn name(&self) -> &str;
    fn item_type(&self) -> ItemType;
    fn state(&self) -> HostState;
    fn status(&self) -> HostStatus;

    /// The adapter this host manages, if any.
    fn adapter(&self) -> Option<Arc<dyn Adapter>>;

    /// The host's queue sender, for dispatcher registration.
    fn queue_sender(&self) -> mpsc::Sender<QueuedMessage>;

    async fn start(&self) -> Result<(), HostError>;

    /// Stop, draining queued work within `budget`; whatever is still
    /// queued afterwards is closed out as `Error` (cancelled).
    async fn stop(&self, budget: Duration) -> Result<(), HostError>;

    /// Stop but keep queued messages unprocessed, returning them for
    /// hand-off to a replacement host.
    async fn stop_preserving(&self, budget: Duration) -> Result<Vec<QueuedMessage>, HostError>;

    async fn pause(&self) -> Result<(), HostError>;
    async fn resume(&self) -> Result<(), HostError>;
}

/// The shared host runtime: queue + worker pool + lifecycle around a
/// [`Processor`].
pub struct WorkerHost<P: Processor> {
    name: String,
    item_type: ItemType,
    tuning: HostTuning,
    state: Arc<RwLock<HostState>>,
    queue_tx: mpsc::Sender<QueuedMessage>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedMessage>>>,
    paused: watch::Sender<bool>,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<HostMetrics>,
    processor: Arc<P>,
    ctx: EngineContext,
    /// Messages currently being processed, keyed by worker index, so a
    /// forced shutdown can close out their persistence trail.
    in_flight: Arc<Mutex<std::collections::BTreeMap<usize, QueuedMessage>>>,
}

impl<P: Processor> WorkerHost<P> {
    pub fn new(
        name: impl Into<String>,
        item_type: ItemType,
        tuning: HostTuning,
        processor: Arc<P>,
        ctx: EngineContext,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(tuning.queue_size.max(1));
        let (paused, _) = watch::channel(false);
        Self {
            name: name.into(),
            item_type,
            tuning,
            state: Arc::new(RwLock::new(HostState::Created)),
            queue_tx,
            queue_rx: Arc::new(tokio::sync::Mutex::new(queue_rx)),
            paused,
            shutdown: Mutex::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
            metrics: Arc::new(HostMetrics::default()),
            processor,
            ctx,
            in_flight: Arc::new(Mutex::new(std::collections::BTreeMap::new())),
        }
    }

    pub fn processor(&self) -> &Arc<P> {
        &self.processor
    }

    fn set_state(&self, state: HostState) {
        *self.state.write() = state;
        let running = if state == HostState::Running { 1.0 } else { 0.0 };
        self.ctx.metrics.host_status.set(
            running,
            &[("host", self.name.as_str()), ("type", self.item_type.as_str())],
        );
    }

    fn queue_depth(&self) -> i64 {
        self.ctx.metrics.queue_depth.get(&[("host", self.name.as_str())]) as i64
    }

    fn spawn_workers(&self, token: &CancellationToken) {
        let mut workers = self.workers.lock();
        for worker_index in 0..self.tuning.pool_size {
            let shared = WorkerShared {
                host: self.name.clone(),
                item_type: self.item_type,
                worker_index,
                tuning: self.tuning.clone(),
                state: Arc::clone(&self.state),
                queue_tx: self.queue_tx.clone(),
                queue_rx: Arc::clone(&self.queue_rx),
                paused: self.paused.subscribe(),
                metrics: Arc::clone(&self.metrics),
                processor: Arc::clone(&self.processor),
                ctx: self.ctx.clone(),
                in_flight: Arc::clone(&self.in_flight),
            };
            let token = token.clone();
            workers.push(tokio::spawn(async move { run_worker(shared, token).await }));
        }
    }

    /// Close out whatever is still queued after shutdown: the message
    /// never ran, so its header must not stay `Queued`.
    async fn drain_cancelled(&self) {
        let drained = self.drain_queue().await;
        for queued in drained {
            warn!(
                host = %self.name,
                message = queued.message.id.as_str(),
                "message cancelled at shutdown"
            );
            if let Err(e) = self
                .ctx
                .store
                .update_status(
                    queued.header_id,
                    MessageStatus::Error,
                    None,
                    Some("cancelled: host stopped before processing".to_string()),
                )
                .await
            {
                warn!(error = %e, "cannot record cancelled message");
            }
            // The WAL entry stays pending so a restart replays the leg.
        }
    }

    async fn drain_queue(&self) -> Vec<QueuedMessage> {
        let mut drained = Vec::new();
        let mut rx = self.queue_rx.lock().await;
        while let Ok(queued) = rx.try_recv() {
            self.ctx.metrics.queue_depth.sub(1.0, &[("host", self.name.as_str())]);
            drained.push(queued);
        }
        drained
    }

    async fn stop_inner(
        &self,
        budget: Duration,
        preserve: bool,
    ) -> Result<Vec<QueuedMessage>, HostError> {
        {
            let state = self.state.read();
            if matches!(*state, HostState::Created | HostState::Stopped | HostState::Stopping) {
                return Ok(Vec::new());
            }
            if !state.can_stop() && *state != HostState::Starting {
                return Err(HostError::InvalidTransition { from: *state, operation: "stop" });
            }
        }
        self.set_state(HostState::Stopping);
        let deadline = tokio::time::Instant::now() + budget;

        // Adapters first, so nothing new arrives while we drain.
        if let Some(adapter) = self.processor.adapter() {
            adapter.stop(budget).await;
        }

        // Let the workers drain the queue for the rest of the budget.
        if !preserve {
            while self.queue_depth() > 0 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }

        // Workers finish their current message and exit; stragglers
        // past the deadline are aborted and their message closed out.
        self.shutdown.lock().cancel();
        let _ = self.paused.send(false);
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for mut handle in handles {
            let remaining = deadline
                .saturating_duration_since(tokio::time::Instant::now())
                .max(Duration::from_millis(50));
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                handle.abort();
            }
        }
        let aborted: Vec<QueuedMessage> =
            std::mem::take(&mut *self.in_flight.lock()).into_values().collect();
        for queued in aborted {
            if let Err(e) = self
                .ctx
                .store
                .update_status(
                    queued.header_id,
                    MessageStatus::Error,
                    None,
                    Some("cancelled: processing interrupted at shutdown".to_string()),
                )
                .await
            {
                warn!(host = %self.name, error = %e, "cannot record aborted message");
            }
        }

        let preserved = if preserve {
            self.drain_queue().await
        } else {
            self.drain_cancelled().await;
            Vec::new()
        };

        self.processor.on_stop().await;
        self.set_state(HostState::Stopped);
        info!(host = %self.name, "host stopped");
        Ok(preserved)
    }
}

#[async_trait::async_trait]
impl<P: Processor> Host for WorkerHost<P> {
    fn name(&self) -> &str {
        &self.name
    }

    fn item_type(&self) -> ItemType {
        self.item_type
    }

    fn state(&self) -> HostState {
        *self.state.read()
    }

    fn status(&self) -> HostStatus {
        HostStatus {
            state: self.state(),
            item_type: self.item_type,
            metrics: HostMetricsSnapshot {
                messages_received: self.metrics.messages_received.load(Ordering::Relaxed),
                messages_processed: self.metrics.messages_processed.load(Ordering::Relaxed),
                messages_failed: self.metrics.messages_failed.load(Ordering::Relaxed),
                retries: self.metrics.retries.load(Ordering::Relaxed),
                consecutive_errors: self.metrics.consecutive_errors.load(Ordering::Relaxed),
                queue_depth: self.queue_depth(),
                last_error: self.metrics.last_error.lock().clone(),
                adapter: self.processor.adapter().map(|a| a.metrics().snapshot()),
            },
        }
    }

    fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        self.processor.adapter()
    }

    fn queue_sender(&self) -> mpsc::Sender<QueuedMessage> {
        self.queue_tx.clone()
    }

    async fn start(&self) -> Result<(), HostError> {
        {
            let state = self.state.read();
            if !state.can_start() {
                return Err(HostError::InvalidTransition { from: *state, operation: "start" });
            }
        }
        self.set_state(HostState::Starting);
        let _ = self.paused.send(false);
        self.metrics.consecutive_errors.store(0, Ordering::Relaxed);

        let token = CancellationToken::new();
        *self.shutdown.lock() = token.clone();

        if let Err(e) = self.processor.on_start().await {
            error!(host = %self.name, error = %e, "host start failed");
            self.set_state(HostState::Error);
            return Err(e);
        }
        if let Some(adapter) = self.processor.adapter() {
            if let Err(e) = adapter.start(token.child_token()).await {
                error!(host = %self.name, error = %e, "adapter start failed");
                self.set_state(HostState::Error);
                return Err(e.into());
            }
        }

        self.spawn_workers(&token);
        self.set_state(HostState::Running);
        info!(host = %self.name, workers = self.tuning.pool_size, "host started");
        Ok(())
    }

    async fn stop(&self, budget: Duration) -> Result<(), HostError> {
        self.stop_inner(budget, false).await.map(|_| ())
    }

    async fn stop_preserving(&self, budget: Duration) -> Result<Vec<QueuedMessage>, HostError> {
        self.stop_inner(budget, true).await
    }

    async fn pause(&self) -> Result<(), HostError> {
        {
            let state = self.state.read();
            if *state != HostState::Running {
                return Err(HostError::InvalidTransition { from: *state, operation: "pause" });
            }
        }
        let _ = self.paused.send(true);
        self.set_state(HostState::Paused);
        Ok(())
    }

    async fn resume(&self) -> Result<(), HostError> {
        {
            let state = self.state.read();
            if *state != HostState::Paused {
                return Err(HostError::InvalidTransition { from: *state, operation: "resume" });
            }
        }
        let _ = self.paused.send(false);
        self.set_state(HostState::Running);
        Ok(())
    }
}

struct WorkerShared<P: Processor> {
    host: String,
    item_type: ItemType,
    worker_index: usize,
    tuning: HostTuning,
    state: Arc<RwLock<HostState>>,
    queue_tx: mpsc::Sender<QueuedMessage>,
    queue_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedMessage>>>,
    paused: watch::Receiver<bool>,
    metrics: Arc<HostMetrics>,
    processor: Arc<P>,
    ctx: EngineContext,
    in_flight: Arc<Mutex<std::collections::BTreeMap<usize, QueuedMessage>>>,
}

async fn run_worker<P: Processor>(mut shared: WorkerShared<P>, token: CancellationToken) {
    debug!(host = %shared.host, worker = shared.worker_index, "worker started");
    loop {
        // Pause gate.
        while *shared.paused.borrow() {
            tokio::select! {
                _ = token.cancelled() => return,
                changed = shared.paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let queued = {
            let mut rx = shared.queue_rx.lock().await;
            tokio::select! {
                _ = token.cancelled() => return,
                queued = rx.recv() => queued,
            }
        };
        let Some(queued) = queued else {
            return;
        };
        // A pause may have landed while this worker sat in recv; hold
        // the dequeued message until resumed (or shutdown, which still
        // finishes the current message).
        while *shared.paused.borrow() {
            tokio::select! {
                _ = token.cancelled() => break,
                changed = shared.paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        shared.ctx.metrics.queue_depth.sub(1.0, &[("host", shared.host.as_str())]);
        shared.metrics.messages_received.fetch_add(1, Ordering::Relaxed);

        shared.in_flight.lock().insert(shared.worker_index, queued.clone());
        process_one(&shared, queued, &token).await;
        shared.in_flight.lock().remove(&shared.worker_index);

        if *shared.state.read() == HostState::Error {
            return;
        }
    }
}

async fn process_one<P: Processor>(
    shared: &WorkerShared<P>,
    queued: QueuedMessage,
    token: &CancellationToken,
) {
    let host = shared.host.as_str();
    let message = &queued.message;

    if message.is_expired(shared.ctx.clock.epoch_ms()) {
        finish(shared, &queued, MessageStatus::Discarded, None, Some("expired".to_string())).await;
        return;
    }

    let started = std::time::Instant::now();
    let outcome = match tokio::time::timeout(
        shared.tuning.timeout,
        shared.processor.process(message),
    )
    .await
    {
        Err(_) => Err(HostError::Timeout(shared.tuning.timeout)),
        Ok(result) => result,
    };
    let elapsed = started.elapsed();
    shared
        .ctx
        .metrics
        .processing_seconds
        .observe(elapsed.as_secs_f64(), &[("host", host)]);

    match outcome {
        Ok(Disposition::Complete) => {
            record_success(shared, &queued, None).await;
        }
        Ok(Disposition::CompleteWithAck(ack)) => {
            record_success(shared, &queued, Some(ack)).await;
        }
        Ok(Disposition::Discard(reason)) => {
            shared.metrics.consecutive_errors.store(0, Ordering::Relaxed);
            finish(shared, &queued, MessageStatus::Discarded, None, Some(reason)).await;
        }
        Ok(Disposition::Retry { delay, reason }) => {
            let retries = queued.message.retry_count;
            if retries < shared.tuning.max_retries {
                shared.metrics.retries.fetch_add(1, Ordering::Relaxed);
                warn!(host, message = message.id.as_str(), %reason, retries, "retrying message");
                if let (Some(wal), Some(wal_id)) = (&shared.ctx.wal, queued.wal_id.as_ref()) {
                    if let Err(e) = wal.lock().fail(wal_id.as_str(), &reason) {
                        warn!(host, error = %e, "cannot record retry in WAL");
                    }
                }
                let mut requeued = queued.clone();
                requeued.message.retry_count = retries + 1;
                requeued.message.status = MessageStatus::Queued;
                let tx = shared.queue_tx.clone();
                let depth_metrics = shared.ctx.metrics.queue_depth.clone();
                let host_name = shared.host.clone();
                let delay_token = token.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = delay_token.cancelled() => {}
                        _ = tokio::time::sleep(delay) => {
                            depth_metrics.add(1.0, &[("host", host_name.as_str())]);
                            if tx.send(requeued).await.is_err() {
                                debug!(host = %host_name, "retry dropped: queue closed");
                                depth_metrics.sub(1.0, &[("host", host_name.as_str())]);
                            }
                        }
                    }
                });
            } else {
                let reason = format!("retries exhausted ({retries}): {reason}");
                record_failure(shared, &queued, reason).await;
            }
        }
        Ok(Disposition::Fail(reason)) => {
            record_failure(shared, &queued, reason).await;
        }
        Err(e) => {
            record_failure(shared, &queued, e.to_string()).await;
            // Back off before pulling the next message.
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(shared.tuning.error_delay) => {}
            }
        }
    }
}

async fn record_success<P: Processor>(
    shared: &WorkerShared<P>,
    queued: &QueuedMessage,
    ack: Option<String>,
) {
    shared.metrics.messages_processed.fetch_add(1, Ordering::Relaxed);
    shared.metrics.consecutive_errors.store(0, Ordering::Relaxed);
    finish(shared, queued, MessageStatus::Completed, ack, None).await;
}

async fn record_failure<P: Processor>(
    shared: &WorkerShared<P>,
    queued: &QueuedMessage,
    reason: String,
) {
    let host = shared.host.as_str();
    error!(host, message = queued.message.id.as_str(), %reason, "message failed");
    shared.metrics.messages_failed.fetch_add(1, Ordering::Relaxed);
    *shared.metrics.last_error.lock() = Some(reason.clone());
    shared
        .ctx
        .metrics
        .messages_failed
        .inc(&[("host", host), ("error", error_kind(&reason))]);

    let consecutive = shared.metrics.consecutive_errors.fetch_add(1, Ordering::Relaxed) + 1;

    if let (Some(wal), Some(wal_id)) = (&shared.ctx.wal, queued.wal_id.as_ref()) {
        if let Err(e) = wal.lock().fail_terminal(wal_id.as_str(), &reason) {
            warn!(host, error = %e, "cannot record failure in WAL");
        } else {
            shared.ctx.metrics.wal_pending.sub(1.0, &[]);
        }
    }
    if let Err(e) = shared
        .ctx
        .store
        .update_status(queued.header_id, MessageStatus::Error, None, Some(reason))
        .await
    {
        warn!(host, error = %e, "cannot record failed message");
    }

    if consecutive >= shared.tuning.max_errors {
        error!(host, consecutive, "too many consecutive failures, host entering error state");
        *shared.state.write() = HostState::Error;
        shared
            .ctx
            .metrics
            .host_status
            .set(0.0, &[("host", host), ("type", shared.item_type.as_str())]);
    }
}

/// Terminal bookkeeping for one leg: store status, WAL, counters.
async fn finish<P: Processor>(
    shared: &WorkerShared<P>,
    queued: &QueuedMessage,
    status: MessageStatus,
    ack: Option<String>,
    error_message: Option<String>,
) {
    if let Err(e) = shared
        .ctx
        .store
        .update_status(queued.header_id, status, ack, error_message)
        .await
    {
        warn!(host = %shared.host, error = %e, "cannot update message status");
    }
    complete_wal(&shared.ctx, queued.wal_id.as_ref());
}

/// Coarse error label for the failure counter; free-form reasons would
/// explode cardinality.
fn error_kind(reason: &str) -> &'static str {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        "timeout"
    } else if lower.contains("connect") {
        "connection"
    } else if lower.contains("validation") || lower.contains("missing required") {
        "validation"
    } else if lower.contains("retries exhausted") {
        "retries_exhausted"
    } else {
        "processing"
    }
}

#[cfg(test)]
#[path = "host_tests.rs"]
mod tests;
