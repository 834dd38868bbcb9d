// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inter-host dispatch: the only producer/consumer state shared
//! between hosts is their bounded queues, and every hand-off passes
//! through here so it is persisted and WAL-logged exactly once.

use crate::context::EngineContext;
use crate::error::HostError;
use mw_core::{Message, MessageStatus};
use mw_storage::{HeaderId, MessageStore as _, WalEntryId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A message parked in a host queue, with its persistence handles.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub message: Message,
    pub header_id: HeaderId,
    pub wal_id: Option<WalEntryId>,
}

/// Name → queue sender for every running host.
#[derive(Default)]
pub struct Dispatcher {
    targets: RwLock<BTreeMap<String, mpsc::Sender<QueuedMessage>>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, sender: mpsc::Sender<QueuedMessage>) {
        debug!(host = name, "dispatch target registered");
        self.targets.write().insert(name.to_string(), sender);
    }

    pub fn unregister(&self, name: &str) {
        self.targets.write().remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.targets.read().contains_key(name)
    }

    fn sender(&self, name: &str) -> Option<mpsc::Sender<QueuedMessage>> {
        self.targets.read().get(name).cloned()
    }
}

/// Persist and enqueue one leg onto `target`'s queue.
///
/// Writes the header row (status `Queued`) and the WAL entry before the
/// message enters the queue, so a crash after this call replays the
/// leg. With `block` unset a full queue fails fast with
/// [`HostError::Backpressure`]; the header is closed out as `Error` so
/// no row is left `Queued` for a message that never was.
pub async fn submit_leg(
    ctx: &EngineContext,
    target: &str,
    message: Message,
    block: bool,
) -> Result<HeaderId, HostError> {
    if let Some(reason) = ctx.fatal_reason() {
        return Err(HostError::Fatal(reason));
    }

    let mut message = message;
    message.status = MessageStatus::Queued;
    message.target_config_name = target.to_string();
    message.received_at_ms = ctx.clock.epoch_ms();

    let header_id = match ctx.store.store_header(&message).await {
        Ok(id) => id,
        Err(e) => {
            ctx.record_fatal(format!("message store write failed: {e}"));
            return Err(e.into());
        }
    };

    let wal_id = match &ctx.wal {
        None => None,
        Some(wal) => {
            let payload = serde_json::to_vec(&message)
                .map_err(|e| HostError::Processing(format!("cannot encode message: {e}")))?;
            let mut metadata = std::collections::BTreeMap::new();
            metadata.insert("header_id".to_string(), header_id.to_string());
            match wal.lock().append(target, message.id.as_str(), &payload, metadata) {
                Ok(entry) => {
                    ctx.metrics.wal_pending.add(1.0, &[]);
                    Some(entry.id)
                }
                Err(e) => {
                    ctx.record_fatal(format!("WAL append failed: {e}"));
                    return Err(e.into());
                }
            }
        }
    };

    let queued = QueuedMessage { message, header_id, wal_id };

    let Some(sender) = ctx.dispatcher.sender(target) else {
        reject(ctx, &queued, "no such dispatch target").await;
        return Err(HostError::NotAccepting(target.to_string()));
    };

    let send_result = if block {
        sender.send(queued.clone()).await.map_err(|_| ())
    } else {
        match sender.try_send(queued.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                reject(ctx, &queued, "queue full").await;
                return Err(HostError::Backpressure(target.to_string()));
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(()),
        }
    };

    if send_result.is_err() {
        reject(ctx, &queued, "host stopped").await;
        return Err(HostError::NotAccepting(target.to_string()));
    }

    ctx.metrics.queue_depth.add(1.0, &[("host", target)]);
    Ok(header_id)
}

/// Close out the persistence trail of a leg that never made it into a
/// queue. The WAL entry fails terminally, matching the `Error` status
/// on the header: a dropped leg must not read as delivered.
async fn reject(ctx: &EngineContext, queued: &QueuedMessage, reason: &str) {
    warn!(
        message = queued.message.id.as_str(),
        target = queued.message.target_config_name.as_str(),
        reason,
        "leg rejected"
    );
    if let Err(e) = ctx
        .store
        .update_status(queued.header_id, MessageStatus::Error, None, Some(reason.to_string()))
        .await
    {
        warn!(error = %e, "cannot record rejected leg");
    }
    if let (Some(wal), Some(id)) = (&ctx.wal, queued.wal_id.as_ref()) {
        match wal.lock().fail_terminal(id.as_str(), reason) {
            Ok(()) => ctx.metrics.wal_pending.sub(1.0, &[]),
            Err(e) => warn!(error = %e, "cannot fail WAL entry for rejected leg"),
        }
    }
}

/// Forward a message to each named target as a fresh leg. Used by
/// service hosts and passthrough processes. Collects per-target
/// failures instead of stopping at the first.
pub async fn fan_out(
    ctx: &EngineContext,
    source: &str,
    targets: &[String],
    message: &Message,
) -> Result<(), HostError> {
    let mut failures = Vec::new();
    for target in targets {
        let leg = message.next_leg(source, target.clone());
        match submit_leg(ctx, target, leg, true).await {
            Ok(_) => {
                ctx.metrics
                    .messages_sent
                    .inc(&[("host", source), ("target", target.as_str())]);
            }
            Err(e) => failures.push(format!("{target}: {e}")),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(HostError::Send(failures.join("; ")))
    }
}

/// Mark a WAL entry terminal after its message reached a terminal
/// store status.
pub(crate) fn complete_wal(ctx: &EngineContext, wal_id: Option<&WalEntryId>) {
    let (Some(wal), Some(id)) = (&ctx.wal, wal_id) else {
        return;
    };
    match wal.lock().complete(id.as_str()) {
        Ok(()) => ctx.metrics.wal_pending.sub(1.0, &[]),
        Err(e) => warn!(error = %e, "cannot complete WAL entry"),
    }
}
