// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The production engine: load a configuration, build the host graph,
//! and run it.
//!
//! Start order is dependency order (operations → processes →
//! services) so every target is running before anything feeds it;
//! stop reverses it inside a total shutdown budget. WAL recovery runs
//! at start: legs whose latest state is pending are re-dispatched.

use crate::context::EngineContext;
use crate::dispatch::submit_leg;
use crate::error::EngineError;
use crate::host::{Host, HostStatus};
use crate::registry::ClassRegistry;
use indexmap::IndexMap;
use mw_config::{PersistenceBackend, PersistenceConfig, ProductionConfig};
use mw_core::{ItemSetting, Message, ProductionState};
use mw_storage::{FileStore, MemoryStore, MessageStore as _, Wal, WalConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Engine-level tuning.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Pause between host starts.
    pub startup_delay: Duration,
    /// Total stop budget, shared across hosts.
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { startup_delay: Duration::ZERO, shutdown_timeout: Duration::from_secs(10) }
    }
}

/// The status surface consumed by the management layer.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub production: Option<String>,
    pub state: ProductionState,
    pub hosts: BTreeMap<String, HostStatus>,
}

/// Build an [`EngineContext`] per the persistence section of a
/// production config.
pub fn build_context(persistence: &PersistenceConfig) -> Result<EngineContext, EngineError> {
    let mut ctx = EngineContext::in_memory().with_store(Arc::new(MemoryStore::new()));

    if persistence.backend == PersistenceBackend::File {
        let directory = persistence.directory.as_deref().ok_or_else(|| {
            EngineError::Fatal("persistence.directory is required for the file backend".to_string())
        })?;
        let store = FileStore::open(std::path::Path::new(directory).join("store"))?;
        ctx = ctx.with_store(Arc::new(store));
    }
    // The WAL needs somewhere to live; purely in-memory deployments
    // (no directory) run without one.
    if persistence.wal_enabled {
        if let Some(directory) = persistence.directory.as_deref() {
            let wal = Wal::open(WalConfig::new(std::path::Path::new(directory).join("wal")))?;
            ctx = ctx.with_wal(Arc::new(Mutex::new(wal)));
        }
    }
    Ok(ctx)
}

/// One engine runs one production. Deploy, start, stop, and the host
/// control operations are all here; everything else lives in the hosts.
pub struct Engine {
    options: EngineOptions,
    ctx: EngineContext,
    registry: ClassRegistry,
    state: RwLock<ProductionState>,
    config: RwLock<Option<ProductionConfig>>,
    hosts: RwLock<IndexMap<String, Arc<dyn Host>>>,
}

impl Engine {
    pub fn new(ctx: EngineContext, options: EngineOptions) -> Self {
        Self {
            options,
            ctx,
            registry: ClassRegistry::with_defaults(),
            state: RwLock::new(ProductionState::Created),
            config: RwLock::new(None),
            hosts: RwLock::new(IndexMap::new()),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// The class registry, for registering site host classes before
    /// `deploy`.
    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    pub fn state(&self) -> ProductionState {
        if self.ctx.fatal_reason().is_some() {
            return ProductionState::Error;
        }
        *self.state.read()
    }

    pub fn get_host(&self, name: &str) -> Option<Arc<dyn Host>> {
        self.hosts.read().get(name).cloned()
    }

    pub fn get_status(&self) -> EngineStatus {
        EngineStatus {
            production: self.config.read().as_ref().map(|c| c.name.clone()),
            state: self.state(),
            hosts: self
                .hosts
                .read()
                .iter()
                .map(|(name, host)| (name.clone(), host.status()))
                .collect(),
        }
    }

    /// Validate the configuration and build every enabled host. Does
    /// not start anything.
    pub async fn deploy(&self, config: ProductionConfig) -> Result<(), EngineError> {
        {
            let state = self.state.read();
            if matches!(*state, ProductionState::Running | ProductionState::Starting) {
                return Err(EngineError::InvalidState {
                    expected: "created or stopped",
                    actual: *state,
                });
            }
        }
        config.validate()?;

        // Unknown classes are load failures, before anything is built.
        for item in config.enabled_items() {
            if !self.registry.contains(&item.class_name) {
                return Err(EngineError::UnknownClass(item.class_name.clone()));
            }
        }

        // Drop any previously deployed (stopped) host graph.
        for (name, _) in self.hosts.write().drain(..) {
            self.ctx.dispatcher.unregister(&name);
        }

        let mut hosts: IndexMap<String, Arc<dyn Host>> = IndexMap::new();
        for name in config.dependency_order() {
            let item = match config.get_item(&name) {
                Some(item) => item,
                None => continue,
            };
            let host = self.registry.build(item, &config, &self.ctx)?;
            self.ctx.dispatcher.register(&name, host.queue_sender());
            hosts.insert(name, host);
        }

        info!(production = %config.name, hosts = hosts.len(), "production deployed");
        *self.hosts.write() = hosts;
        *self.config.write() = Some(config);
        *self.state.write() = ProductionState::Created;
        Ok(())
    }

    /// Start every enabled host in dependency order. Idempotent: a
    /// running engine reports no newly started items.
    pub async fn start(&self) -> Result<Vec<String>, EngineError> {
        {
            let mut state = self.state.write();
            match *state {
                ProductionState::Running => return Ok(Vec::new()),
                ProductionState::Created | ProductionState::Stopped => {
                    *state = ProductionState::Starting;
                }
                actual => {
                    return Err(EngineError::InvalidState { expected: "created or stopped", actual })
                }
            }
        }
        if self.config.read().is_none() {
            *self.state.write() = ProductionState::Created;
            return Err(EngineError::NotDeployed);
        }

        let order: Vec<String> = self.hosts.read().keys().cloned().collect();
        let mut started = Vec::new();
        for name in order {
            let host = match self.get_host(&name) {
                Some(host) => host,
                None => continue,
            };
            if let Err(e) = host.start().await {
                error!(host = %name, error = %e, "host failed to start");
                *self.state.write() = ProductionState::Error;
                return Err(e.into());
            }
            started.push(name);
            if !self.options.startup_delay.is_zero() {
                tokio::time::sleep(self.options.startup_delay).await;
            }
        }

        self.recover_pending().await;

        *self.state.write() = ProductionState::Running;
        info!(items = started.len(), "production running");
        Ok(started)
    }

    /// Stop in reverse dependency order within the shutdown budget.
    pub async fn stop(&self) -> Result<(), EngineError> {
        {
            let mut state = self.state.write();
            match *state {
                ProductionState::Stopped | ProductionState::Created => return Ok(()),
                ProductionState::Stopping => return Ok(()),
                _ => *state = ProductionState::Stopping,
            }
        }

        let deadline = tokio::time::Instant::now() + self.options.shutdown_timeout;
        let order: Vec<String> = self.hosts.read().keys().cloned().collect();
        let mut remaining_hosts = order.len();

        for name in order.iter().rev() {
            let host = match self.get_host(name) {
                Some(host) => host,
                None => continue,
            };
            // Each host gets an equal share of what is left.
            let remaining_time = deadline.saturating_duration_since(tokio::time::Instant::now());
            let budget = remaining_time
                .checked_div(remaining_hosts.max(1) as u32)
                .unwrap_or(Duration::ZERO)
                .max(Duration::from_millis(50));
            remaining_hosts = remaining_hosts.saturating_sub(1);

            if let Err(e) = host.stop(budget).await {
                warn!(host = %name, error = %e, "host stop failed");
            }
        }

        if let Some(wal) = &self.ctx.wal {
            if let Err(e) = wal.lock().flush() {
                warn!(error = %e, "WAL flush at shutdown failed");
            }
        }

        *self.state.write() = ProductionState::Stopped;
        info!("production stopped");
        Ok(())
    }

    /// Stop and restart one host, preserving its queued messages.
    pub async fn restart_host(&self, name: &str) -> Result<(), EngineError> {
        let host = self
            .get_host(name)
            .ok_or_else(|| EngineError::UnknownHost(name.to_string()))?;

        let preserved = host.stop_preserving(self.options.shutdown_timeout).await?;
        host.start().await?;

        let sender = host.queue_sender();
        for queued in preserved {
            self.ctx.metrics.queue_depth.add(1.0, &[("host", name)]);
            if sender.send(queued).await.is_err() {
                warn!(host = name, "requeue after restart failed");
                self.ctx.metrics.queue_depth.sub(1.0, &[("host", name)]);
            }
        }
        info!(host = name, "host restarted");
        Ok(())
    }

    /// Mark an item enabled; build and start its host when the engine
    /// is running.
    pub async fn enable_host(&self, name: &str) -> Result<(), EngineError> {
        let (item, config_snapshot) = {
            let mut config = self.config.write();
            let config = config.as_mut().ok_or(EngineError::NotDeployed)?;
            let item = config
                .items
                .iter_mut()
                .find(|i| i.name == name)
                .ok_or_else(|| EngineError::UnknownHost(name.to_string()))?;
            item.enabled = true;
            (item.clone(), config.clone())
        };

        if self.get_host(name).is_none() {
            let host = self.registry.build(&item, &config_snapshot, &self.ctx)?;
            self.ctx.dispatcher.register(name, host.queue_sender());
            self.hosts.write().insert(name.to_string(), host.clone());
            if self.state() == ProductionState::Running {
                host.start().await?;
            }
        } else if self.state() == ProductionState::Running {
            let host = self.get_host(name).ok_or_else(|| EngineError::UnknownHost(name.into()))?;
            if host.state().can_start() {
                host.start().await?;
            }
        }
        info!(host = name, "host enabled");
        Ok(())
    }

    /// Stop a host and mark its item disabled.
    pub async fn disable_host(&self, name: &str) -> Result<(), EngineError> {
        {
            let mut config = self.config.write();
            let config = config.as_mut().ok_or(EngineError::NotDeployed)?;
            let item = config
                .items
                .iter_mut()
                .find(|i| i.name == name)
                .ok_or_else(|| EngineError::UnknownHost(name.to_string()))?;
            item.enabled = false;
        }

        if let Some(host) = self.get_host(name) {
            host.stop(self.options.shutdown_timeout).await?;
            self.ctx.dispatcher.unregister(name);
            self.hosts.write().shift_remove(name);
        }
        info!(host = name, "host disabled");
        Ok(())
    }

    /// Hot-apply settings to one host: the item config is updated, the
    /// host rebuilt, and queued messages carried over to the new queue.
    pub async fn reload_host_config(
        &self,
        name: &str,
        settings: Vec<ItemSetting>,
    ) -> Result<mw_core::HostState, EngineError> {
        let (item, config_snapshot) = {
            let mut config = self.config.write();
            let config = config.as_mut().ok_or(EngineError::NotDeployed)?;
            let item = config
                .items
                .iter_mut()
                .find(|i| i.name == name)
                .ok_or_else(|| EngineError::UnknownHost(name.to_string()))?;
            for setting in settings {
                item.set_setting(setting.target, setting.name, setting.value);
            }
            (item.clone(), config.clone())
        };

        // Build the replacement first so a bad setting leaves the old
        // host untouched.
        let replacement = self.registry.build(&item, &config_snapshot, &self.ctx)?;

        let preserved = match self.get_host(name) {
            None => Vec::new(),
            Some(old) => old.stop_preserving(self.options.shutdown_timeout).await?,
        };
        self.ctx.dispatcher.register(name, replacement.queue_sender());
        self.hosts.write().insert(name.to_string(), replacement.clone());

        if self.state() == ProductionState::Running {
            replacement.start().await?;
        }

        let sender = replacement.queue_sender();
        for queued in preserved {
            self.ctx.metrics.queue_depth.add(1.0, &[("host", name)]);
            if sender.send(queued).await.is_err() {
                warn!(host = name, "requeue after reload failed");
                self.ctx.metrics.queue_depth.sub(1.0, &[("host", name)]);
            }
        }

        info!(host = name, "host configuration reloaded");
        Ok(replacement.state())
    }

    /// Apply the retention policy: delete header rows received more
    /// than `persistence.retention_days` ago (0 disables the sweep).
    /// The embedding layer decides when to call this.
    pub async fn sweep_retention(&self) -> Result<usize, EngineError> {
        let days = self
            .config
            .read()
            .as_ref()
            .map(|c| c.persistence.retention_days)
            .unwrap_or(0);
        if days == 0 {
            return Ok(0);
        }
        let cutoff = self
            .ctx
            .clock
            .epoch_ms()
            .saturating_sub(u64::from(days) * 86_400_000);
        let deleted = self.ctx.store.delete_received_before(cutoff).await?;
        if deleted > 0 {
            info!(deleted, days, "retention sweep removed old message headers");
        }
        Ok(deleted)
    }

    /// Re-dispatch WAL entries whose latest state is pending. Each
    /// replayed leg gets a fresh entry; the recovered one is completed.
    async fn recover_pending(&self) {
        let Some(wal) = &self.ctx.wal else {
            return;
        };
        let pending = wal.lock().get_pending();
        if pending.is_empty() {
            return;
        }
        info!(entries = pending.len(), "recovering pending WAL entries");
        self.ctx.metrics.wal_pending.set(pending.len() as f64, &[]);

        for entry in pending {
            let message: Message = match serde_json::from_slice(&entry.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!(entry = entry.id.as_str(), error = %e, "unreadable WAL payload");
                    let mut wal = wal.lock();
                    if let Err(e) = wal.fail_terminal(entry.id.as_str(), "unreadable payload") {
                        warn!(error = %e, "cannot fail WAL entry");
                    }
                    continue;
                }
            };
            match submit_leg(&self.ctx, &entry.host_name, message, true).await {
                Ok(_) => {
                    let mut wal = wal.lock();
                    if let Err(e) = wal.complete(entry.id.as_str()) {
                        warn!(error = %e, "cannot complete recovered WAL entry");
                    }
                }
                Err(e) => {
                    warn!(
                        entry = entry.id.as_str(),
                        host = entry.host_name.as_str(),
                        error = %e,
                        "cannot replay WAL entry"
                    );
                }
            }
        }
        self.ctx.metrics.wal_pending.set(wal.lock().pending_count() as f64, &[]);
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
