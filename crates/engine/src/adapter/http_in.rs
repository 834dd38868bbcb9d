// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP inbound: a minimal HTTP/1.1 endpoint for posting messages.
//!
//! One request per connection, `Connection: close` semantics. Enough
//! protocol to be a correct citizen (405/404/413/415/503) without
//! pulling a web framework into the engine.

use crate::adapter::{Adapter, AdapterMetrics, AdapterState, StateCell};
use crate::error::AdapterError;
use crate::host::InboundHandler;
use mw_core::{ItemConfig, CONTENT_TYPE_HL7V2};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpInSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub methods: Vec<String>,
    pub content_types: Vec<String>,
    pub max_body_size: usize,
}

impl HttpInSettings {
    pub fn from_item(item: &ItemConfig) -> Result<Self, AdapterError> {
        let adapter = item.adapter_settings();
        let list = |name: &str, default: &str| -> Vec<String> {
            adapter
                .str_or(name, default)
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect()
        };
        Ok(Self {
            host: adapter.str_or("host", "127.0.0.1"),
            port: adapter.parse_or("port", 8080)?,
            path: adapter.str_or("path", "/messages"),
            methods: list("methods", "POST"),
            content_types: list(
                "content_types",
                &format!("{CONTENT_TYPE_HL7V2}, text/plain, application/json"),
            ),
            max_body_size: adapter.parse_or("max_body_size", 10 * 1024 * 1024)?,
        })
    }
}

struct Shared {
    host_name: String,
    settings: HttpInSettings,
    handler: Arc<dyn InboundHandler>,
    metrics: Arc<AdapterMetrics>,
}

/// Minimal HTTP/1.1 inbound adapter.
pub struct HttpInboundAdapter {
    shared: Arc<Shared>,
    state: StateCell,
    tracker: Mutex<TaskTracker>,
    token: Mutex<Option<CancellationToken>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpInboundAdapter {
    pub fn new(item: &ItemConfig, handler: Arc<dyn InboundHandler>) -> Result<Self, AdapterError> {
        Ok(Self {
            shared: Arc::new(Shared {
                host_name: item.name.clone(),
                settings: HttpInSettings::from_item(item)?,
                handler,
                metrics: Arc::new(AdapterMetrics::default()),
            }),
            state: StateCell::default(),
            tracker: Mutex::new(TaskTracker::new()),
            token: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    /// The bound address; useful when `port` is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait::async_trait]
impl Adapter for HttpInboundAdapter {
    fn kind(&self) -> &'static str {
        "http"
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
        let listener = TcpListener::bind((settings.host.as_str(), settings.port)).await?;
        let local = listener.local_addr()?;
        *self.local_addr.lock() = Some(local);

        let tracker = TaskTracker::new();
        *self.tracker.lock() = tracker.clone();
        *self.token.lock() = Some(shutdown.clone());

        let shared = Arc::clone(&self.shared);
        let accept_tracker = tracker.clone();
        tracker.spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        shared.metrics.record_error();
                    }
                    Ok((stream, peer)) => {
                        shared.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                        let conn_shared = Arc::clone(&shared);
                        accept_tracker.spawn(async move {
                            let handled = tokio::time::timeout(
                                REQUEST_TIMEOUT,
                                handle_request(conn_shared, stream),
                            )
                            .await;
                            if handled.is_err() {
                                debug!(%peer, "request timed out");
                            }
                        });
                    }
                }
            }
        });

        self.state.set(AdapterState::Started);
        info!(host = %self.shared.host_name, addr = %local, path = %settings.path, "HTTP listener started");
        Ok(())
    }

    async fn stop(&self, budget: Duration) {
        if let Some(token) = self.token.lock().take() {
            token.cancel();
        }
        let tracker = self.tracker.lock().clone();
        tracker.close();
        if tokio::time::timeout(budget, tracker.wait()).await.is_err() {
            warn!(host = %self.shared.host_name, "requests did not drain before deadline");
        }
        self.state.set(AdapterState::Stopped);
    }
}

async fn handle_request(shared: Arc<Shared>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let settings = &shared.settings;

    // Request line.
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await.is_err() || request_line.is_empty() {
        return;
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    // Headers.
    let mut content_length = 0usize;
    let mut content_type = String::new();
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Err(_) | Ok(0) => return,
            Ok(_) => {}
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let value = value.trim();
            match name.to_ascii_lowercase().as_str() {
                "content-length" => content_length = value.parse().unwrap_or(0),
                "content-type" => content_type = value.to_string(),
                _ => {}
            }
        }
    }

    if !settings.methods.iter().any(|m| m.eq_ignore_ascii_case(&method)) {
        let allow = settings.methods.join(", ");
        respond(&mut write_half, 405, "Method Not Allowed", &format!("Allow: {allow}\r\n"), "")
            .await;
        return;
    }
    if path != settings.path {
        respond(&mut write_half, 404, "Not Found", "", "no such endpoint\n").await;
        return;
    }
    if content_length > settings.max_body_size {
        shared.metrics.record_error();
        respond(&mut write_half, 413, "Payload Too Large", "", "body exceeds limit\n").await;
        return;
    }
    let base_type = content_type.split(';').next().unwrap_or_default().trim();
    if !settings.content_types.iter().any(|t| t.eq_ignore_ascii_case(base_type)) {
        respond(&mut write_half, 415, "Unsupported Media Type", "", "unsupported content type\n")
            .await;
        return;
    }

    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).await.is_err() {
        return;
    }
    shared.metrics.bytes_received.fetch_add(body.len() as u64, Ordering::Relaxed);

    let outcome = shared
        .handler
        .on_data_received(body.into(), base_type)
        .await;

    if outcome.accepted {
        let id = outcome
            .message_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        respond(&mut write_half, 202, "Accepted", "", &format!("{id}\n")).await;
    } else if outcome.busy {
        shared.metrics.record_error();
        respond(&mut write_half, 503, "Service Unavailable", "Retry-After: 1\r\n", "queue full\n")
            .await;
    } else {
        let reason = outcome.reason.unwrap_or_else(|| "rejected".to_string());
        respond(&mut write_half, 400, "Bad Request", "", &format!("{reason}\n")).await;
    }
}

async fn respond(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    code: u16,
    reason: &str,
    extra_headers: &str,
    body: &str,
) {
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n{extra_headers}Connection: close\r\n\r\n{body}",
        body.len()
    );
    if let Err(e) = writer.write_all(response.as_bytes()).await {
        debug!(error = %e, "cannot write response");
    }
    let _ = writer.shutdown().await;
}
