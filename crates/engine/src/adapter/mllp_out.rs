// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MLLP outbound: lazy client connection to a downstream system.
//!
//! Send/ACK pairs are serialized by the connection lock, so ACK
//! correlation is positional: the reply read after a write belongs to
//! that write. Connection failures retry with a reconnect delay.

use crate::adapter::{Adapter, AdapterMetrics, AdapterState, StateCell};
use crate::error::AdapterError;
use bytes::Bytes;
use mw_core::{EngineMetrics, ItemConfig};
use mw_wire::{read_frame, write_frame};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MllpOutSettings {
    pub address: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub ack_timeout: Duration,
    pub reconnect_delay: Duration,
    pub max_retries: u32,
    /// Recorded; socket-level keepalive is left to the platform
    /// default.
    pub keepalive: bool,
    pub max_message_size: usize,
}

impl MllpOutSettings {
    pub fn from_item(item: &ItemConfig) -> Result<Self, AdapterError> {
        let adapter = item.adapter_settings();
        Ok(Self {
            address: adapter.str_or("IPAddress", "localhost"),
            port: adapter.parse_or("Port", 2575)?,
            connect_timeout: adapter.duration_secs_or("ConnectTimeout", Duration::from_secs(10))?,
            write_timeout: adapter.duration_secs_or("WriteTimeout", Duration::from_secs(30))?,
            ack_timeout: adapter.duration_secs_or("AckTimeout", Duration::from_secs(30))?,
            reconnect_delay: adapter.duration_secs_or("ReconnectDelay", Duration::from_secs(5))?,
            max_retries: adapter.parse_or("MaxRetries", 3)?,
            keepalive: adapter.bool_or("KeepAlive", true)?,
            max_message_size: adapter.parse_or("MaxMessageSize", 10 * 1024 * 1024)?,
        })
    }

    pub fn remote(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// MLLP/TCP client adapter.
pub struct MllpOutboundAdapter {
    host_name: String,
    settings: MllpOutSettings,
    state: StateCell,
    metrics: Arc<AdapterMetrics>,
    engine_metrics: Arc<EngineMetrics>,
    /// The single connection; holding this lock serializes send/ACK.
    connection: tokio::sync::Mutex<Option<Connection>>,
}

impl MllpOutboundAdapter {
    pub fn new(item: &ItemConfig, engine_metrics: Arc<EngineMetrics>) -> Result<Self, AdapterError> {
        Ok(Self {
            host_name: item.name.clone(),
            settings: MllpOutSettings::from_item(item)?,
            state: StateCell::default(),
            metrics: Arc::new(AdapterMetrics::default()),
            engine_metrics,
            connection: tokio::sync::Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &MllpOutSettings {
        &self.settings
    }

    async fn connect(&self) -> Result<Connection, AdapterError> {
        let remote = self.settings.remote();
        let stream = tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect((self.settings.address.as_str(), self.settings.port)),
        )
        .await
        .map_err(|_| AdapterError::Timeout(self.settings.connect_timeout))?
        .map_err(|e| AdapterError::Connection(format!("{remote}: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.connections_active.store(1, Ordering::Relaxed);
        self.engine_metrics
            .connections_active
            .set(1.0, &[("host", self.host_name.as_str()), ("adapter", "mllp")]);
        info!(host = %self.host_name, %remote, "connected");
        Ok(Connection { reader: BufReader::new(read_half), writer: write_half })
    }

    fn drop_connection(&self, slot: &mut Option<Connection>) {
        if slot.take().is_some() {
            self.metrics.connections_active.store(0, Ordering::Relaxed);
            self.engine_metrics
                .connections_active
                .set(0.0, &[("host", self.host_name.as_str()), ("adapter", "mllp")]);
        }
    }

    /// One write (and optionally one ACK read) on an open connection.
    async fn exchange(
        &self,
        connection: &mut Connection,
        payload: &[u8],
        want_ack: bool,
    ) -> Result<Option<Bytes>, AdapterError> {
        write_frame(&mut connection.writer, payload, self.settings.write_timeout).await?;
        self.metrics.bytes_sent.fetch_add(payload.len() as u64, Ordering::Relaxed);

        if !want_ack {
            return Ok(None);
        }
        let ack = read_frame(
            &mut connection.reader,
            self.settings.ack_timeout,
            self.settings.max_message_size,
        )
        .await?;
        self.metrics.bytes_received.fetch_add(ack.len() as u64, Ordering::Relaxed);
        Ok(Some(ack))
    }

    async fn send_inner(&self, payload: &[u8], want_ack: bool) -> Result<Option<Bytes>, AdapterError> {
        let mut slot = self.connection.lock().await;
        let mut last_error = String::new();

        let attempts = self.settings.max_retries.max(1);
        for attempt in 1..=attempts {
            if slot.is_none() {
                match self.connect().await {
                    Ok(connection) => *slot = Some(connection),
                    Err(e) => {
                        warn!(host = %self.host_name, attempt, error = %e, "connect failed");
                        self.metrics.record_error();
                        last_error = e.to_string();
                        if attempt < attempts {
                            tokio::time::sleep(self.settings.reconnect_delay).await;
                        }
                        continue;
                    }
                }
            }

            // The connection is present; a failure mid-exchange drops it
            // before the retry so the next attempt reconnects cleanly.
            let connection = match slot.as_mut() {
                Some(connection) => connection,
                None => continue,
            };
            match self.exchange(connection, payload, want_ack).await {
                Ok(ack) => {
                    debug!(host = %self.host_name, attempt, size = payload.len(), "message sent");
                    return Ok(ack);
                }
                Err(e) => {
                    warn!(host = %self.host_name, attempt, error = %e, "send failed");
                    self.metrics.record_error();
                    last_error = e.to_string();
                    self.drop_connection(&mut slot);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.reconnect_delay).await;
                    }
                }
            }
        }

        Err(AdapterError::SendFailed { attempts, last: last_error })
    }
}

#[async_trait::async_trait]
impl Adapter for MllpOutboundAdapter {
    fn kind(&self) -> &'static str {
        "mllp"
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn metrics(&self) -> Arc<AdapterMetrics> {
        Arc::clone(&self.metrics)
    }

    async fn start(&self, _shutdown: CancellationToken) -> Result<(), AdapterError> {
        // Connection is lazy; the first send dials out.
        self.state.set(AdapterState::Started);
        info!(host = %self.host_name, remote = %self.settings.remote(), "MLLP client ready");
        Ok(())
    }

    async fn stop(&self, budget: Duration) {
        // A worker may be mid-exchange; wait for the connection lock
        // only within the budget, otherwise leave the teardown to the
        // socket's drop.
        match tokio::time::timeout(budget, self.connection.lock()).await {
            Ok(mut slot) => self.drop_connection(&mut slot),
            Err(_) => warn!(host = %self.host_name, "connection busy at stop"),
        }
        self.state.set(AdapterState::Stopped);
        info!(host = %self.host_name, "MLLP client stopped");
    }

    async fn send(&self, payload: &[u8]) -> Result<Bytes, AdapterError> {
        match self.send_inner(payload, true).await? {
            Some(ack) => Ok(ack),
            None => Err(AdapterError::Connection("no acknowledgment received".to_string())),
        }
    }

    async fn send_no_ack(&self, payload: &[u8]) -> Result<(), AdapterError> {
        self.send_inner(payload, false).await.map(|_| ())
    }
}
