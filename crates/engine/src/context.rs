// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared context handed to every host and adapter.

use crate::dispatch::Dispatcher;
use crate::transform::TransformRegistry;
use mw_core::{DynClock, EngineMetrics, SystemClock};
use mw_hl7::SchemaRegistry;
use mw_storage::{MemoryStore, MessageStore, Wal};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Everything a host needs from its engine: clock, metrics, schema and
/// transform registries, the persistence plane, and the dispatcher.
#[derive(Clone)]
pub struct EngineContext {
    pub clock: Arc<dyn DynClock>,
    pub metrics: Arc<EngineMetrics>,
    pub schemas: Arc<SchemaRegistry>,
    pub transforms: Arc<TransformRegistry>,
    pub store: Arc<dyn MessageStore>,
    /// Absent when the persistence config disables the WAL.
    pub wal: Option<Arc<Mutex<Wal>>>,
    pub dispatcher: Arc<Dispatcher>,
    /// Set when the persistence plane failed a write. Once set, no
    /// further messages are accepted and the engine reports `Error`.
    pub fatal: Arc<RwLock<Option<String>>>,
}

impl EngineContext {
    /// Context with in-memory persistence and no WAL. The engine builds
    /// richer ones from its persistence config.
    pub fn in_memory() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            metrics: EngineMetrics::new(),
            schemas: Arc::new(SchemaRegistry::new()),
            transforms: Arc::new(TransformRegistry::new()),
            store: Arc::new(MemoryStore::new()),
            wal: None,
            dispatcher: Arc::new(Dispatcher::new()),
            fatal: Arc::new(RwLock::new(None)),
        }
    }

    /// Record a persistence failure; the engine refuses new work from
    /// here on.
    pub fn record_fatal(&self, reason: impl Into<String>) {
        let mut fatal = self.fatal.write();
        if fatal.is_none() {
            *fatal = Some(reason.into());
        }
    }

    pub fn fatal_reason(&self) -> Option<String> {
        self.fatal.read().clone()
    }

    pub fn with_clock(mut self, clock: Arc<dyn DynClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_wal(mut self, wal: Arc<Mutex<Wal>>) -> Self {
        self.wal = Some(wal);
        self
    }
}
