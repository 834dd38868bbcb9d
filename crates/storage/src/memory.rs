// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory message store: the reference backend and the test default.

use crate::store::{
    apply_order_and_page, BodyRecord, HeaderId, HeaderRecord, MessageQuery, MessageStore,
    StoreError,
};
use mw_core::{Clock, Message, MessageStatus, SystemClock};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct Inner {
    headers: BTreeMap<HeaderId, HeaderRecord>,
    bodies: BTreeMap<String, BodyRecord>,
}

/// Message store held entirely in memory.
pub struct MemoryStore<C: Clock = SystemClock> {
    clock: C,
    inner: RwLock<Inner>,
}

impl MemoryStore<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for MemoryStore<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> MemoryStore<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock, inner: RwLock::new(Inner::default()) }
    }
}

pub(crate) fn header_from_message(message: &Message, body_id: String) -> HeaderRecord {
    HeaderRecord {
        id: HeaderId::new(),
        message_id: message.id.to_string(),
        session_id: message.session_id.to_string(),
        correlation_id: message.correlation_id.clone(),
        sequence_num: message.sequence_num,
        source_config_name: message.source_config_name.clone(),
        target_config_name: message.target_config_name.clone(),
        message_type: message.message_type.clone(),
        status: message.status,
        received_at_ms: message.received_at_ms,
        completed_at_ms: None,
        latency_ms: None,
        body_id,
        error_message: None,
        ack_content: None,
    }
}

pub(crate) fn apply_status(
    header: &mut HeaderRecord,
    status: MessageStatus,
    ack_content: Option<String>,
    error_message: Option<String>,
    now_ms: u64,
) {
    header.status = status;
    if let Some(ack) = ack_content {
        header.ack_content = Some(ack);
    }
    if let Some(error) = error_message {
        header.error_message = Some(error);
    }
    if status.is_terminal() {
        header.completed_at_ms = Some(now_ms);
        header.latency_ms = Some(now_ms.saturating_sub(header.received_at_ms));
    }
}

#[async_trait::async_trait]
impl<C: Clock> MessageStore for MemoryStore<C> {
    async fn store_header(&self, message: &Message) -> Result<HeaderId, StoreError> {
        let body = BodyRecord::from_message(message);
        let header = header_from_message(message, body.id.clone());
        let id = header.id;

        let mut inner = self.inner.write();
        inner.bodies.entry(body.id.clone()).or_insert(body);
        inner.headers.insert(id, header);
        Ok(id)
    }

    async fn update_status(
        &self,
        id: HeaderId,
        status: MessageStatus,
        ack_content: Option<String>,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let now_ms = self.clock.epoch_ms();
        let mut inner = self.inner.write();
        let header = inner
            .headers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        apply_status(header, status, ack_content, error_message, now_ms);
        Ok(())
    }

    async fn get_by_id(&self, id: HeaderId) -> Result<Option<HeaderRecord>, StoreError> {
        Ok(self.inner.read().headers.get(&id).cloned())
    }

    async fn get_content(&self, id: HeaderId) -> Result<Option<BodyRecord>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .headers
            .get(&id)
            .and_then(|h| inner.bodies.get(&h.body_id))
            .cloned())
    }

    async fn query(&self, query: &MessageQuery) -> Result<Vec<HeaderRecord>, StoreError> {
        let rows: Vec<HeaderRecord> = self
            .inner
            .read()
            .headers
            .values()
            .filter(|h| query.matches(h))
            .cloned()
            .collect();
        Ok(apply_order_and_page(rows, query))
    }

    async fn count(&self, query: &MessageQuery) -> Result<usize, StoreError> {
        Ok(self.inner.read().headers.values().filter(|h| query.matches(h)).count())
    }

    async fn delete_received_before(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let before = inner.headers.len();
        inner.headers.retain(|_, h| h.received_at_ms >= cutoff_ms);
        let deleted = before - inner.headers.len();

        // Drop bodies no remaining header references.
        let live: std::collections::BTreeSet<String> =
            inner.headers.values().map(|h| h.body_id.clone()).collect();
        inner.bodies.retain(|id, _| live.contains(id));
        Ok(deleted)
    }

    async fn body_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().bodies.len())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
