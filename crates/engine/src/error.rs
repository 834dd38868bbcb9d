// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy.
//!
//! Transient, expected failures (frame errors, timeouts, send retries)
//! are handled where they occur and surface only in metrics and the
//! store. Everything here is what callers of the control API or host
//! internals see.

use mw_core::HostState;
use std::time::Duration;
use thiserror::Error;

/// Adapter-level failures.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Frame(#[from] mw_wire::FrameError),

    #[error("adapter I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("adapter timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("send failed after {attempts} attempts: {last}")]
    SendFailed { attempts: u32, last: String },

    #[error("{0} is not supported by this adapter")]
    Unsupported(&'static str),

    #[error(transparent)]
    Setting(#[from] mw_core::SettingError),
}

/// Host-level failures.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("cannot {operation} host in state {from}")]
    InvalidTransition { from: HostState, operation: &'static str },

    #[error("queue full for host '{0}'")]
    Backpressure(String),

    #[error("host '{0}' is not accepting messages")]
    NotAccepting(String),

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Setting(#[from] mw_core::SettingError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error(transparent)]
    Store(#[from] mw_storage::StoreError),

    #[error(transparent)]
    Wal(#[from] mw_storage::WalError),

    /// The persistence plane is gone; nothing is accepted any more.
    #[error("engine fatal: {0}")]
    Fatal(String),
}

/// Control-API and load failures.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] mw_config::ConfigError),

    #[error("no production deployed")]
    NotDeployed,

    #[error("unknown host: '{0}'")]
    UnknownHost(String),

    #[error("unknown host class: '{0}'")]
    UnknownClass(String),

    #[error("engine is {actual}, expected {expected}")]
    InvalidState { expected: &'static str, actual: mw_core::ProductionState },

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Store(#[from] mw_storage::StoreError),

    #[error(transparent)]
    Wal(#[from] mw_storage::WalError),

    /// Persistence is gone; the engine stops accepting work.
    #[error("fatal: {0}")]
    Fatal(String),
}
