// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MLLP inbound: TCP listener feeding a service host.
//!
//! One task per connection. Within a connection, frames are read,
//! handed to the host, and acknowledged strictly in order; the next
//! frame is not read until the previous ACK went out, which is the
//! back-pressure contract of MLLP.

use crate::adapter::{Adapter, AdapterMetrics, AdapterState, StateCell};
use crate::error::AdapterError;
use crate::host::InboundHandler;
use mw_core::{EngineMetrics, ItemConfig, CONTENT_TYPE_HL7V2};
use mw_wire::{read_frame, write_frame, FrameError};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MllpInSettings {
    pub port: u16,
    pub bind_host: String,
    pub max_connections: usize,
    pub read_timeout: Duration,
    pub ack_timeout: Duration,
    pub max_message_size: usize,
}

impl MllpInSettings {
    pub fn from_item(item: &ItemConfig) -> Result<Self, AdapterError> {
        let adapter = item.adapter_settings();
        Ok(Self {
            port: adapter.parse_or("Port", 2575)?,
            bind_host: adapter.str_or("Host", "0.0.0.0"),
            max_connections: adapter.parse_or("MaxConnections", 100)?,
            read_timeout: adapter.duration_secs_or("ReadTimeout", Duration::from_secs(30))?,
            ack_timeout: adapter.duration_secs_or("AckTimeout", Duration::from_secs(30))?,
            max_message_size: adapter.parse_or("MaxMessageSize", 10 * 1024 * 1024)?,
        })
    }
}

/// Listener state shared with connection tasks.
struct Shared {
    host_name: String,
    settings: MllpInSettings,
    handler: Arc<dyn InboundHandler>,
    metrics: Arc<AdapterMetrics>,
    engine_metrics: Arc<EngineMetrics>,
    active: AtomicUsize,
}

impl Shared {
    fn connection_opened(&self) {
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        self.engine_metrics
            .connections_active
            .add(1.0, &[("host", self.host_name.as_str()), ("adapter", "mllp")]);
    }

    fn connection_closed(&self) {
        self.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.engine_metrics
            .connections_active
            .sub(1.0, &[("host", self.host_name.as_str()), ("adapter", "mllp")]);
    }
}

/// MLLP/TCP listener adapter.
pub struct MllpInboundAdapter {
    shared: Arc<Shared>,
    state: StateCell,
    tracker: Mutex<TaskTracker>,
    token: Mutex<Option<CancellationToken>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl MllpInboundAdapter {
    pub fn new(
        item: &ItemConfig,
        handler: Arc<dyn InboundHandler>,
        engine_metrics: Arc<EngineMetrics>,
    ) -> Result<Self, AdapterError> {
        let settings = MllpInSettings::from_item(item)?;
        Ok(Self {
            shared: Arc::new(Shared {
                host_name: item.name.clone(),
                settings,
                handler,
                metrics: Arc::new(AdapterMetrics::default()),
                engine_metrics,
                active: AtomicUsize::new(0),
            }),
            state: StateCell::default(),
            tracker: Mutex::new(TaskTracker::new()),
            token: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    /// The bound address; useful when `Port` is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait::async_trait]
impl Adapter for MllpInboundAdapter {
    fn kind(&self) -> &'static str {
        "mllp"
    }

    fn state(&self) -> AdapterState {
        self.state.get()
    }

    fn metrics(&self) -> Arc<AdapterMetrics> {
        Arc::clone(&self.shared.metrics)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    async fn start(&self, shutdown: CancellationToken) -> Result<(), AdapterError> {
        let settings = &self.shared.settings;
        let listener =
            TcpListener::bind((settings.bind_host.as_str(), settings.port)).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);

        let tracker = TaskTracker::new();
        *self.tracker.lock() = tracker.clone();
        *self.token.lock() = Some(shutdown.clone());

        let shared = Arc::clone(&self.shared);
        let accept_token = shutdown.clone();
        let accept_tracker = tracker.clone();
        tracker.spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        shared.metrics.record_error();
                    }
                    Ok((stream, peer)) => {
                        if shared.active.load(Ordering::Relaxed)
                            >= shared.settings.max_connections
                        {
                            warn!(%peer, "connection rejected: limit reached");
                            drop(stream);
                            continue;
                        }
                        shared.connection_opened();
                        debug!(%peer, "connection accepted");
                        let conn_shared = Arc::clone(&shared);
                        let conn_token = accept_token.clone();
                        accept_tracker.spawn(async move {
                            handle_connection(conn_shared, stream, peer, conn_token).await;
                        });
                    }
                }
            }
        });

        self.state.set(AdapterState::Started);
        info!(host = %self.shared.host_name, addr = %local, "MLLP listener started");
        Ok(())
    }

    async fn stop(&self, budget: Duration) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
        let tracker = self.tracker.lock().clone();
        tracker.close();
        if tokio::time::timeout(budget, tracker.wait()).await.is_err() {
            warn!(host = %self.shared.host_name, "connections did not drain before deadline");
        }
        self.state.set(AdapterState::Stopped);
        info!(host = %self.shared.host_name, "MLLP listener stopped");
    }
}

async fn handle_connection(
    shared: Arc<Shared>,
    stream: TcpStream,
    peer: SocketAddr,
    token: CancellationToken,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let settings = &shared.settings;

    loop {
        let frame = tokio::select! {
            _ = token.cancelled() => break,
            frame = read_frame(&mut reader, settings.read_timeout, settings.max_message_size) => frame,
        };

        match frame {
            Ok(payload) => {
                shared
                    .metrics
                    .bytes_received
                    .fetch_add(payload.len() as u64, Ordering::Relaxed);

                let outcome =
                    shared.handler.on_data_received(payload, CONTENT_TYPE_HL7V2).await;

                if let Some(ack) = outcome.ack {
                    match write_frame(&mut write_half, &ack, settings.ack_timeout).await {
                        Ok(()) => {
                            shared
                                .metrics
                                .bytes_sent
                                .fetch_add(ack.len() as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(%peer, error = %e, "cannot send ACK");
                            shared.metrics.record_error();
                            break;
                        }
                    }
                }
            }
            // Idle connection: keep waiting for the next frame.
            Err(FrameError::Timeout(_)) => continue,
            Err(e) if e.is_frame_error() => {
                warn!(%peer, error = %e, "frame error, resynchronizing");
                shared.metrics.record_error();
            }
            Err(e) => {
                debug!(%peer, reason = %e, "connection ended");
                break;
            }
        }
    }

    shared.connection_closed();
}
