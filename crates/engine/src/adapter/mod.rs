// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol adapters: the I/O edge of a host.
//!
//! Every adapter shares the `Created → Started → Stopped` machine and a
//! metrics block. Inbound adapters push received payloads into their
//! host through [`InboundHandler`](crate::host::InboundHandler);
//! outbound adapters expose `send`/`send_no_ack`.

pub mod file_in;
pub mod file_out;
pub mod http_in;
pub mod mllp_in;
pub mod mllp_out;

pub use file_in::FileInboundAdapter;
pub use file_out::FileOutboundAdapter;
pub use http_in::HttpInboundAdapter;
pub use mllp_in::MllpInboundAdapter;
pub use mllp_out::MllpOutboundAdapter;

use crate::error::AdapterError;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Adapter lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterState {
    Created,
    Started,
    Stopped,
}

mw_core::simple_display! {
    AdapterState {
        Created => "created",
        Started => "started",
        Stopped => "stopped",
    }
}

/// Shared adapter counters. Handles are cheap to clone; recording
/// never suspends.
#[derive(Debug, Default)]
pub struct AdapterMetrics {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicI64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Point-in-time copy for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdapterMetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: i64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors_total: u64,
}

impl AdapterMetrics {
    pub fn snapshot(&self) -> AdapterMetricsSnapshot {
        AdapterMetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            errors_total: self.errors_total.load(Ordering::Relaxed),
        }
    }

    pub fn record_error(&self) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
    }
}

/// Tracks the adapter state behind a lock; shared by all adapters.
#[derive(Debug)]
pub struct StateCell(Mutex<AdapterState>);

impl Default for StateCell {
    fn default() -> Self {
        Self(Mutex::new(AdapterState::Created))
    }
}

impl StateCell {
    pub fn get(&self) -> AdapterState {
        *self.0.lock()
    }

    pub fn set(&self, state: AdapterState) {
        *self.0.lock() = state;
    }
}

/// The protocol-specific I/O layer attached to a host.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Short protocol label for metrics (`mllp`, `file`, `http`).
    fn kind(&self) -> &'static str;

    fn state(&self) -> AdapterState;

    fn metrics(&self) -> Arc<AdapterMetrics>;

    /// The socket address a listening adapter bound, if any. Useful
    /// when the configured port is 0.
    fn local_addr(&self) -> Option<std::net::SocketAddr> {
        None
    }

    /// Begin I/O. Inbound adapters bind and accept until the token is
    /// cancelled; outbound adapters prepare for lazy connection.
    async fn start(&self, shutdown: CancellationToken) -> Result<(), AdapterError>;

    /// Stop I/O, draining in-flight work up to `budget`.
    async fn stop(&self, budget: std::time::Duration);

    /// Deliver a payload and return the raw acknowledgment. Outbound
    /// adapters only.
    async fn send(&self, _payload: &[u8]) -> Result<Bytes, AdapterError> {
        Err(AdapterError::Unsupported("send"))
    }

    /// Fire-and-forget delivery. Outbound adapters only.
    async fn send_no_ack(&self, payload: &[u8]) -> Result<(), AdapterError> {
        self.send(payload).await.map(|_| ())
    }
}
