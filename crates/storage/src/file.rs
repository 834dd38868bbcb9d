// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed message store: an append-only JSON-lines journal of
//! header and body records, replayed into memory on open.
//!
//! Suitable for single-node deployments and tests; a relational backend
//! implements [`MessageStore`](crate::store::MessageStore) out of tree.

use crate::memory::{apply_status, header_from_message};
use crate::store::{
    apply_order_and_page, BodyRecord, HeaderId, HeaderRecord, MessageQuery, MessageStore,
    StoreError,
};
use mw_core::{Clock, Message, MessageStatus, SystemClock};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const JOURNAL_NAME: &str = "store.jsonl";

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoreRecord {
    Header(HeaderRecord),
    Body(BodyRecord),
    Status {
        id: HeaderId,
        status: MessageStatus,
        ack_content: Option<String>,
        error_message: Option<String>,
        at_ms: u64,
    },
}

#[derive(Default)]
struct State {
    headers: BTreeMap<HeaderId, HeaderRecord>,
    bodies: BTreeMap<String, BodyRecord>,
}

impl State {
    fn apply(&mut self, record: StoreRecord) {
        match record {
            StoreRecord::Header(header) => {
                self.headers.insert(header.id, header);
            }
            StoreRecord::Body(body) => {
                self.bodies.insert(body.id.clone(), body);
            }
            StoreRecord::Status { id, status, ack_content, error_message, at_ms } => {
                if let Some(header) = self.headers.get_mut(&id) {
                    apply_status(header, status, ack_content, error_message, at_ms);
                }
            }
        }
    }
}

/// Message store journaled to a single file in `directory`.
pub struct FileStore<C: Clock = SystemClock> {
    clock: C,
    path: PathBuf,
    inner: Mutex<FileStoreInner>,
}

struct FileStoreInner {
    state: State,
    writer: BufWriter<File>,
}

impl FileStore<SystemClock> {
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open_with_clock(directory, SystemClock)
    }
}

impl<C: Clock> FileStore<C> {
    pub fn open_with_clock(directory: impl Into<PathBuf>, clock: C) -> Result<Self, StoreError> {
        let directory = directory.into();
        std::fs::create_dir_all(&directory)?;
        let path = directory.join(JOURNAL_NAME);

        let mut state = State::default();
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines().filter(|l| !l.is_empty()) {
                    match serde_json::from_str::<StoreRecord>(line) {
                        Ok(record) => state.apply(record),
                        Err(e) => {
                            // Skip unreadable tail records but keep serving
                            // what replayed cleanly.
                            warn!(path = %path.display(), error = %e, "skipping corrupt store record");
                            break;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), headers = state.headers.len(), "file store opened");

        Ok(Self {
            clock,
            path,
            inner: Mutex::new(FileStoreInner { state, writer: BufWriter::new(file) }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(inner: &mut FileStoreInner, record: &StoreRecord) -> Result<(), StoreError> {
        let line = serde_json::to_string(record)?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        Ok(())
    }

    /// Rewrite the journal from current state (after retention sweeps).
    fn compact(&self, inner: &mut FileStoreInner) -> Result<(), StoreError> {
        let mut writer = BufWriter::new(File::create(&self.path)?);
        for body in inner.state.bodies.values() {
            writer.write_all(serde_json::to_string(&StoreRecord::Body(body.clone()))?.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        for header in inner.state.headers.values() {
            writer
                .write_all(serde_json::to_string(&StoreRecord::Header(header.clone()))?.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        inner.writer = BufWriter::new(OpenOptions::new().append(true).open(&self.path)?);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<C: Clock> MessageStore for FileStore<C> {
    async fn store_header(&self, message: &Message) -> Result<HeaderId, StoreError> {
        let body = BodyRecord::from_message(message);
        let header = header_from_message(message, body.id.clone());
        let id = header.id;

        let mut inner = self.inner.lock();
        if !inner.state.bodies.contains_key(&body.id) {
            Self::append(&mut inner, &StoreRecord::Body(body.clone()))?;
            inner.state.bodies.insert(body.id.clone(), body);
        }
        Self::append(&mut inner, &StoreRecord::Header(header.clone()))?;
        inner.state.headers.insert(id, header);
        Ok(id)
    }

    async fn update_status(
        &self,
        id: HeaderId,
        status: MessageStatus,
        ack_content: Option<String>,
        error_message: Option<String>,
    ) -> Result<(), StoreError> {
        let at_ms = self.clock.epoch_ms();
        let mut inner = self.inner.lock();
        if !inner.state.headers.contains_key(&id) {
            return Err(StoreError::NotFound(id.to_string()));
        }
        let record = StoreRecord::Status {
            id,
            status,
            ack_content: ack_content.clone(),
            error_message: error_message.clone(),
            at_ms,
        };
        Self::append(&mut inner, &record)?;
        inner.state.apply(record);
        Ok(())
    }

    async fn get_by_id(&self, id: HeaderId) -> Result<Option<HeaderRecord>, StoreError> {
        Ok(self.inner.lock().state.headers.get(&id).cloned())
    }

    async fn get_content(&self, id: HeaderId) -> Result<Option<BodyRecord>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .state
            .headers
            .get(&id)
            .and_then(|h| inner.state.bodies.get(&h.body_id))
            .cloned())
    }

    async fn query(&self, query: &MessageQuery) -> Result<Vec<HeaderRecord>, StoreError> {
        let rows: Vec<HeaderRecord> = self
            .inner
            .lock()
            .state
            .headers
            .values()
            .filter(|h| query.matches(h))
            .cloned()
            .collect();
        Ok(apply_order_and_page(rows, query))
    }

    async fn count(&self, query: &MessageQuery) -> Result<usize, StoreError> {
        Ok(self.inner.lock().state.headers.values().filter(|h| query.matches(h)).count())
    }

    async fn delete_received_before(&self, cutoff_ms: u64) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let before = inner.state.headers.len();
        inner.state.headers.retain(|_, h| h.received_at_ms >= cutoff_ms);
        let deleted = before - inner.state.headers.len();

        let live: std::collections::BTreeSet<String> =
            inner.state.headers.values().map(|h| h.body_id.clone()).collect();
        inner.state.bodies.retain(|id, _| live.contains(id));

        if deleted > 0 {
            self.compact(&mut inner)?;
        }
        Ok(deleted)
    }

    async fn body_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.lock().state.bodies.len())
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
