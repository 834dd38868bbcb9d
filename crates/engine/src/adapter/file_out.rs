// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File outbound: writes each delivered message to a drop directory.

use crate::adapter::{Adapter, AdapterMetrics, AdapterState, StateCell};
use crate::error::AdapterError;
use bytes::Bytes;
use mw_core::{DynClock, ItemConfig, SystemClock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct FileOutSettings {
    pub directory: PathBuf,
    pub prefix: String,
    pub extension: String,
}

impl FileOutSettings {
    pub fn from_item(item: &ItemConfig) -> Result<Self, AdapterError> {
        let adapter = item.adapter_settings();
        Ok(Self {
            directory: PathBuf::from(adapter.str_or("directory", "")),
            prefix: adapter.str_or("filename_prefix", "msg"),
            extension: adapter.str_or("extension", ".hl7"),
        })
    }
}

/// Drop-directory outbound adapter. Filenames are
/// `{prefix}_{yyyymmddhhmmss}_{counter}{extension}`, unique within the
/// process.
pub struct FileOutboundAdapter {
    host_name: String,
    settings: FileOutSettings,
    state: StateCell,
    metrics: Arc<AdapterMetrics>,
    clock: Arc<dyn DynClock>,
    counter: AtomicU64,
}

impl FileOutboundAdapter {
    pub fn new(item: &ItemConfig) -> Result<Self, AdapterError> {
        Ok(Self {
            host_name: item.name.clone(),
            settings: FileOutSettings::from_item(item)?,
            state: StateCell::default(),
            metrics: Arc::new(AdapterMetrics::default()),
            clock: Arc::new(SystemClock),
            counter: AtomicU64::new(0),
        })
    }

    pub fn settings(&self) -> &FileOutSettings {
        &self.settings
    }
}

#[async_trait::async_trait]
impl Adapter for FileOutboundAdapter {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn metrics(&self) -> Arc<AdapterMetrics> {
        Arc::clone(&self.metrics)
    }

    async fn start(&self, _shutdown: CancellationToken) -> Result<(), AdapterError> {
        std::fs::create_dir_all(&self.settings.directory)?;
        self.state.set(AdapterState::Started);
        info!(
            host = %self.host_name,
            directory = %self.settings.directory.display(),
            "file writer started"
        );
        Ok(())
    }

    async fn stop(&self, _budget: Duration) {
        self.state.set(AdapterState::Stopped);
    }

    async fn send(&self, payload: &[u8]) -> Result<Bytes, AdapterError> {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let filename = format!(
            "{}_{}_{:06}{}",
            self.settings.prefix,
            self.clock.hl7_timestamp(),
            sequence,
            self.settings.extension
        );
        let path = self.settings.directory.join(filename);

        // Write to a temp name first so watchers never see a partial file.
        let staging = path.with_extension("tmp");
        tokio::fs::write(&staging, payload).await?;
        tokio::fs::rename(&staging, &path).await?;

        self.metrics.bytes_sent.fetch_add(payload.len() as u64, Ordering::Relaxed);
        debug!(host = %self.host_name, path = %path.display(), "message written");
        Ok(Bytes::new())
    }
}
