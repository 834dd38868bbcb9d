// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-ahead log for in-flight messages.
//!
//! Append-only JSON-lines file. State changes append new records, never
//! rewrite history; the latest record for an entry ID wins. On open the
//! valid prefix of a corrupt file is preserved and the original rotated
//! to `.bak` (keeping at most three backups).

use base64::Engine as _;
use mw_core::define_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

define_id! {
    /// Identifier of one WAL entry.
    pub struct WalEntryId("wal-");
}

/// Filename of the single live segment inside the WAL directory.
const SEGMENT_NAME: &str = "medway.wal";

/// How many appends may accumulate between fsyncs in batched mode.
const BATCH_SYNC_THRESHOLD: usize = 100;

/// How many `.bak` rotations of a corrupt segment are kept.
const MAX_BACKUPS: u32 = 3;

/// Durability mode for appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// OS-buffered only; fastest, lossy on power failure.
    None,
    /// fsync on every append.
    Fsync,
    /// fsync every [`BATCH_SYNC_THRESHOLD`] appends and on flush.
    #[default]
    FsyncBatched,
}

/// WAL configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    pub directory: PathBuf,
    pub sync_mode: SyncMode,
    /// `fail()` reports retryable until this many failures.
    pub max_retries: u32,
}

impl WalConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self { directory: directory.into(), sync_mode: SyncMode::default(), max_retries: 3 }
    }

    mw_core::setters! {
        set {
            sync_mode: SyncMode,
            max_retries: u32,
        }
    }
}

/// Latest known state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalState {
    Pending,
    Completed,
    Failed,
}

mw_core::simple_display! {
    WalState {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
    }
}

fn serialize_payload<S: serde::Serializer>(payload: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(payload))
}

fn deserialize_payload<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let text = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(serde::de::Error::custom)
}

/// One logged message hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalEntry {
    pub id: WalEntryId,
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub state: WalState,
    pub host_name: String,
    pub message_id: String,
    #[serde(serialize_with = "serialize_payload", deserialize_with = "deserialize_payload")]
    pub payload: Vec<u8>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// On-disk record: a new entry or a state transition for an earlier one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WalRecord {
    Append(WalEntry),
    State {
        id: WalEntryId,
        sequence: u64,
        timestamp_ms: u64,
        state: WalState,
        retry_count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl WalRecord {
    fn sequence(&self) -> u64 {
        match self {
            WalRecord::Append(entry) => entry.sequence,
            WalRecord::State { sequence, .. } => *sequence,
        }
    }
}

/// Errors from WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("unknown WAL entry: {0}")]
    UnknownEntry(String),
}

/// The write-ahead log. Single writer; wrap in a lock to share.
pub struct Wal {
    path: PathBuf,
    config: WalConfig,
    writer: BufWriter<File>,
    next_sequence: u64,
    /// Latest state per entry ID, rebuilt on open.
    entries: BTreeMap<WalEntryId, WalEntry>,
    unsynced_appends: usize,
    now_ms: fn() -> u64,
}

fn system_now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl Wal {
    /// Open (or create) the WAL in `config.directory`.
    pub fn open(config: WalConfig) -> Result<Self, WalError> {
        std::fs::create_dir_all(&config.directory)?;
        let path = config.directory.join(SEGMENT_NAME);

        let (records, corrupt) = read_records(&path)?;
        if corrupt {
            warn!(path = %path.display(), "corrupt WAL tail detected, rotating to .bak");
            rotate_backups(&path)?;
            // Rewrite only the valid prefix under the original name.
            let mut clean = BufWriter::new(File::create(&path)?);
            for record in &records {
                clean.write_all(serde_json::to_string(record)?.as_bytes())?;
                clean.write_all(b"\n")?;
            }
            clean.flush()?;
        }

        let mut entries: BTreeMap<WalEntryId, WalEntry> = BTreeMap::new();
        let mut next_sequence = 1;
        for record in records {
            next_sequence = next_sequence.max(record.sequence() + 1);
            match record {
                WalRecord::Append(entry) => {
                    entries.insert(entry.id, entry);
                }
                WalRecord::State { id, state, retry_count, error, timestamp_ms, .. } => {
                    if let Some(entry) = entries.get_mut(&id) {
                        entry.state = state;
                        entry.retry_count = retry_count;
                        entry.error = error;
                        entry.timestamp_ms = timestamp_ms;
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(path = %path.display(), entries = entries.len(), "WAL opened");

        Ok(Self {
            path,
            config,
            writer: BufWriter::new(file),
            next_sequence,
            entries,
            unsynced_appends: 0,
            now_ms: system_now_ms,
        })
    }

    /// Sequence the next record will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, record: &WalRecord) -> Result<(), WalError> {
        let line = serde_json::to_string(record)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        // Always hand the line to the OS; the sync mode only controls
        // whether it reaches the platter before we return.
        self.writer.flush()?;
        match self.config.sync_mode {
            SyncMode::None => {}
            SyncMode::Fsync => self.writer.get_ref().sync_data()?,
            SyncMode::FsyncBatched => {
                self.unsynced_appends += 1;
                if self.unsynced_appends >= BATCH_SYNC_THRESHOLD {
                    self.writer.get_ref().sync_data()?;
                    self.unsynced_appends = 0;
                }
            }
        }
        Ok(())
    }

    fn take_sequence(&mut self) -> u64 {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        seq
    }

    /// Log a pending hand-off. Durable before return unless the sync
    /// mode is `None`.
    pub fn append(
        &mut self,
        host_name: &str,
        message_id: &str,
        payload: &[u8],
        metadata: BTreeMap<String, String>,
    ) -> Result<WalEntry, WalError> {
        let entry = WalEntry {
            id: WalEntryId::new(),
            sequence: self.take_sequence(),
            timestamp_ms: (self.now_ms)(),
            state: WalState::Pending,
            host_name: host_name.to_string(),
            message_id: message_id.to_string(),
            payload: payload.to_vec(),
            retry_count: 0,
            metadata,
            error: None,
        };
        self.write_record(&WalRecord::Append(entry.clone()))?;
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    fn transition(
        &mut self,
        id: &str,
        state: WalState,
        error: Option<String>,
        bump_retry: bool,
    ) -> Result<WalEntry, WalError> {
        let entry_id = WalEntryId::from_string(id);
        let mut entry = self
            .entries
            .get(&entry_id)
            .cloned()
            .ok_or_else(|| WalError::UnknownEntry(id.to_string()))?;

        entry.state = state;
        entry.timestamp_ms = (self.now_ms)();
        entry.error = error;
        if bump_retry {
            entry.retry_count += 1;
        }

        let record = WalRecord::State {
            id: entry.id,
            sequence: self.take_sequence(),
            timestamp_ms: entry.timestamp_ms,
            state: entry.state,
            retry_count: entry.retry_count,
            error: entry.error.clone(),
        };
        self.write_record(&record)?;
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    /// Mark an entry completed.
    pub fn complete(&mut self, id: &str) -> Result<(), WalError> {
        self.transition(id, WalState::Completed, None, false)?;
        Ok(())
    }

    /// Record a failure. Returns `true` while the entry should be
    /// retried; once retries are exhausted the entry is terminally
    /// `Failed` and `false` is returned.
    pub fn fail(&mut self, id: &str, error: &str) -> Result<bool, WalError> {
        let entry_id = WalEntryId::from_string(id);
        let current_retries = self
            .entries
            .get(&entry_id)
            .map(|e| e.retry_count)
            .ok_or_else(|| WalError::UnknownEntry(id.to_string()))?;

        let should_retry = current_retries + 1 < self.config.max_retries;
        let state = if should_retry { WalState::Pending } else { WalState::Failed };
        self.transition(id, state, Some(error.to_string()), true)?;
        Ok(should_retry)
    }

    /// Mark an entry terminally failed, regardless of remaining budget.
    pub fn fail_terminal(&mut self, id: &str, error: &str) -> Result<(), WalError> {
        self.transition(id, WalState::Failed, Some(error.to_string()), true)?;
        Ok(())
    }

    /// Entries whose latest state is `Pending`, in sequence order.
    pub fn get_pending(&self) -> Vec<WalEntry> {
        let mut pending: Vec<WalEntry> = self
            .entries
            .values()
            .filter(|e| e.state == WalState::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.sequence);
        pending
    }

    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| e.state == WalState::Pending).count()
    }

    /// Force buffered records to disk.
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        if self.config.sync_mode != SyncMode::None {
            self.writer.get_ref().sync_data()?;
            self.unsynced_appends = 0;
        }
        Ok(())
    }

    /// Rotate away a fully terminal segment. Returns `true` when the
    /// segment was truncated; a segment with pending entries is left
    /// untouched.
    pub fn truncate(&mut self) -> Result<bool, WalError> {
        if self.pending_count() > 0 {
            return Ok(false);
        }
        self.writer.flush()?;
        let file = File::create(&self.path)?;
        self.writer = BufWriter::new(file);
        self.entries.clear();
        self.unsynced_appends = 0;
        debug!(path = %self.path.display(), "WAL truncated");
        Ok(true)
    }
}

/// Read records from the segment, stopping at the first corrupt line.
/// Returns the parsed records and whether a corrupt tail was found
/// (invalid JSON, non-UTF-8 bytes, or a missing trailing newline).
fn read_records(path: &Path) -> Result<(Vec<WalRecord>, bool), WalError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), false)),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    let mut corrupt = false;

    let mut offset = 0usize;
    while offset < bytes.len() {
        let end = bytes[offset..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|p| offset + p)
            .unwrap_or(bytes.len());
        let line = &bytes[offset..end];
        if line.is_empty() {
            offset = end + 1;
            continue;
        }
        let parsed = std::str::from_utf8(line)
            .ok()
            .and_then(|text| serde_json::from_str::<WalRecord>(text).ok());
        match parsed {
            Some(record) => {
                if end == bytes.len() {
                    // Final line lacks its newline; keep the record but
                    // rewrite the file so the next append starts clean.
                    corrupt = true;
                    records.push(record);
                    break;
                }
                records.push(record);
                offset = end + 1;
            }
            None => {
                corrupt = true;
                break;
            }
        }
    }

    Ok((records, corrupt))
}

/// Shift `.bak` → `.bak.2` → `.bak.3`, evicting the oldest, then move
/// the corrupt segment to `.bak`.
fn rotate_backups(path: &Path) -> Result<(), WalError> {
    let backup = |n: u32| -> PathBuf {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = backup(MAX_BACKUPS);
    if oldest.exists() {
        std::fs::remove_file(&oldest)?;
    }
    for n in (1..MAX_BACKUPS).rev() {
        let from = backup(n);
        if from.exists() {
            std::fs::rename(&from, backup(n + 1))?;
        }
    }
    std::fs::rename(path, backup(1))?;
    Ok(())
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
