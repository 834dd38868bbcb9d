// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File inbound: polls a watch directory for new files.
//!
//! Existing files are processed in filename order at start; afterwards
//! each poll picks up additions. A short grace window lets the writer
//! finish before the file is read. Processed files are moved or
//! deleted per configuration.

use crate::adapter::{Adapter, AdapterMetrics, AdapterState, StateCell};
use crate::error::AdapterError;
use crate::host::InboundHandler;
use mw_core::{ItemConfig, CONTENT_TYPE_HL7V2};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Writer grace window before a detected file is read.
const SETTLE_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct FileInSettings {
    pub watch_directory: PathBuf,
    pub patterns: Vec<String>,
    pub poll_interval: Duration,
    pub move_to: Option<PathBuf>,
    pub delete_after: bool,
    pub recursive: bool,
}

impl FileInSettings {
    pub fn from_item(item: &ItemConfig) -> Result<Self, AdapterError> {
        let adapter = item.adapter_settings();
        let patterns = adapter
            .str_or("patterns", "*")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        Ok(Self {
            watch_directory: PathBuf::from(adapter.str_or("watch_directory", "")),
            patterns,
            poll_interval: adapter.duration_secs_or("poll_interval", Duration::from_secs(1))?,
            move_to: adapter.get("move_to").map(PathBuf::from),
            delete_after: adapter.bool_or("delete_after", false)?,
            recursive: adapter.bool_or("recursive", false)?,
        })
    }
}

/// Content type inferred from the file extension.
fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("hl7") | Some("hl7v2") => CONTENT_TYPE_HL7V2,
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("xml") => "application/xml",
        _ => "application/octet-stream",
    }
}

/// Single-`*` glob match over file names.
fn glob_match(name: &str, pattern: &str) -> bool {
    let mut segments = pattern.split('*');
    let Some(first) = segments.next() else {
        return name == pattern;
    };
    if !name.starts_with(first) {
        return false;
    }
    let mut position = first.len();
    let mut rest: Vec<&str> = segments.collect();
    let Some(last) = rest.pop() else {
        // No '*' in the pattern at all.
        return name == pattern;
    };
    for segment in rest {
        if segment.is_empty() {
            continue;
        }
        match name[position..].find(segment) {
            None => return false,
            Some(found) => position = position + found + segment.len(),
        }
    }
    name.len() >= position + last.len() && name.ends_with(last)
}

struct Shared {
    host_name: String,
    settings: FileInSettings,
    handler: Arc<dyn InboundHandler>,
    metrics: Arc<AdapterMetrics>,
    /// Paths currently being processed, so duplicate poll hits are
    /// suppressed.
    in_flight: Mutex<BTreeSet<PathBuf>>,
}

impl Shared {
    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.settings.patterns.iter().any(|p| glob_match(name, p))
    }

    fn scan(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        scan_dir(&self.settings.watch_directory, self.settings.recursive, &mut found);
        found.retain(|p| self.matches(p));
        found.sort();
        found
    }

    async fn process_file(&self, path: &Path) {
        // Let the writer finish.
        tokio::time::sleep(SETTLE_DELAY).await;

        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read file");
                self.metrics.record_error();
                return;
            }
        };
        self.metrics.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
        debug!(host = %self.host_name, path = %path.display(), size = data.len(), "file picked up");

        let outcome = self
            .handler
            .on_data_received(data.into(), content_type_for(path))
            .await;
        if !outcome.accepted {
            warn!(
                host = %self.host_name,
                path = %path.display(),
                reason = outcome.reason.as_deref().unwrap_or("rejected"),
                "file rejected"
            );
        }

        // Move or delete regardless of acceptance so a bad file is not
        // re-ingested every poll; rejection is already recorded.
        if let Some(move_to) = &self.settings.move_to {
            let destination = move_to.join(path.file_name().unwrap_or_default());
            if let Err(e) = tokio::fs::rename(path, &destination).await {
                warn!(path = %path.display(), error = %e, "cannot move processed file");
                self.metrics.record_error();
            }
        } else if self.settings.delete_after {
            if let Err(e) = tokio::fs::remove_file(path).await {
                warn!(path = %path.display(), error = %e, "cannot delete processed file");
                self.metrics.record_error();
            }
        }
    }
}

fn scan_dir(dir: &Path, recursive: bool, found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if recursive {
                scan_dir(&path, recursive, found);
            }
        } else {
            found.push(path);
        }
    }
}

/// Directory-watching inbound adapter.
pub struct FileInboundAdapter {
    shared: Arc<Shared>,
    state: StateCell,
    tracker: Mutex<TaskTracker>,
    token: Mutex<Option<CancellationToken>>,
}

impl FileInboundAdapter {
    pub fn new(item: &ItemConfig, handler: Arc<dyn InboundHandler>) -> Result<Self, AdapterError> {
        let settings = FileInSettings::from_item(item)?;
        Ok(Self {
            shared: Arc::new(Shared {
                host_name: item.name.clone(),
                settings,
                handler,
                metrics: Arc::new(AdapterMetrics::default()),
                in_flight: Mutex::new(BTreeSet::new()),
            }),
            state: StateCell::default(),
            tracker: Mutex::new(TaskTracker::new()),
            token: Mutex::new(None),
        })
    }
}

#[async_trait::async_trait]
impl Adapter for FileInboundAdapter {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn metrics(&self) -> Arc<AdapterMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), AdapterError> {
        let settings = &self.shared.settings;
        if !settings.watch_directory.is_dir() {
            return Err(AdapterError::Connection(format!(
                "watch directory not found: {}",
                settings.watch_directory.display()
            )));
        }
        if let Some(move_to) = &settings.move_to {
            std::fs::create_dir_all(move_to)?;
        }

        let tracker = TaskTracker::new();
        *self.tracker.lock() = tracker.clone();
        *self.token.lock() = Some(shutdown.clone());

        let shared = Arc::clone(&self.shared);
        tracker.spawn(async move {
            let mut interval = tokio::time::interval(shared.settings.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }
                for path in shared.scan() {
                    if shutdown.is_cancelled() {
                        break;
                    }
                    if !shared.in_flight.lock().insert(path.clone()) {
                        continue;
                    }
                    shared.process_file(&path).await;
                    shared.in_flight.lock().remove(&path);
                }
            }
        });

        self.state.set(AdapterState::Started);
        info!(
            host = %self.shared.host_name,
            directory = %self.shared.settings.watch_directory.display(),
            "file watcher started"
        );
        Ok(())
    }

    async fn stop(&self, budget: Duration) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
        let tracker = self.tracker.lock().clone();
        tracker.close();
        if tokio::time::timeout(budget, tracker.wait()).await.is_err() {
            warn!(host = %self.shared.host_name, "file watcher did not stop before deadline");
        }
        self.state.set(AdapterState::Stopped);
    }
}

#[cfg(test)]
#[path = "file_in_tests.rs"]
mod tests;
