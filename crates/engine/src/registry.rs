// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Class registry: `class_name → host factory`.
//!
//! The loader names a class per item; the registry builds the matching
//! host. Composition, not inheritance: a factory assembles settings,
//! adapter, processor, and the shared worker runtime.

use crate::adapter::{
    Adapter, FileInboundAdapter, FileOutboundAdapter, HttpInboundAdapter, MllpInboundAdapter,
    MllpOutboundAdapter,
};
use crate::context::EngineContext;
use crate::error::{EngineError, HostError};
use crate::host::{
    FileOperationProcessor, Host, HostTuning, PassthroughProcessor, RoutingProcessor,
    ServiceCallback, ServiceProcessor, TcpOperationProcessor, WorkerHost,
};
use crate::host::operation::OperationSettings;
use crate::host::service::ServiceSettings;
use crate::router::RoutingEngine;
use mw_config::ProductionConfig;
use mw_core::{ItemConfig, SettingTarget};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds one host from its item configuration.
pub type HostFactory = Arc<
    dyn Fn(&ItemConfig, &ProductionConfig, &EngineContext) -> Result<Arc<dyn Host>, EngineError>
        + Send
        + Sync,
>;

/// Process-wide class table. Read-mostly after start; registration is
/// synchronized.
pub struct ClassRegistry {
    factories: RwLock<BTreeMap<String, HostFactory>>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ClassRegistry {
    pub fn empty() -> Self {
        Self { factories: RwLock::new(BTreeMap::new()) }
    }

    /// Registry with the built-in host classes.
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register("Hl7TcpService", Arc::new(build_tcp_service));
        registry.register("Hl7FileService", Arc::new(build_file_service));
        registry.register("Hl7HttpService", Arc::new(build_http_service));
        registry.register("RoutingProcess", Arc::new(build_routing_process));
        registry.register("PassthroughProcess", Arc::new(build_passthrough_process));
        registry.register("Hl7TcpOperation", Arc::new(build_tcp_operation));
        registry.register("Hl7FileOperation", Arc::new(build_file_operation));
        registry
    }

    pub fn register(&self, class_name: &str, factory: HostFactory) {
        self.factories.write().insert(class_name.to_string(), factory);
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.read().contains_key(class_name)
    }

    pub fn class_names(&self) -> Vec<String> {
        self.factories.read().keys().cloned().collect()
    }

    /// Build the host for an item.
    pub fn build(
        &self,
        item: &ItemConfig,
        production: &ProductionConfig,
        ctx: &EngineContext,
    ) -> Result<Arc<dyn Host>, EngineError> {
        let factory = self
            .factories
            .read()
            .get(&item.class_name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownClass(item.class_name.clone()))?;
        factory(item, production, ctx)
    }
}

fn tuning(item: &ItemConfig) -> Result<HostTuning, EngineError> {
    Ok(HostTuning::from_item(item)?)
}

fn build_tcp_service(
    item: &ItemConfig,
    _production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    let settings = ServiceSettings::from_item(item, false).map_err(HostError::Setting)?;
    let callback = Arc::new(ServiceCallback::new(settings.clone(), ctx.clone()));
    let adapter = Arc::new(
        MllpInboundAdapter::new(item, callback, Arc::clone(&ctx.metrics))
            .map_err(HostError::Adapter)?,
    );
    let processor = Arc::new(ServiceProcessor::new(
        settings,
        adapter as Arc<dyn Adapter>,
        ctx.clone(),
    ));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}

fn build_file_service(
    item: &ItemConfig,
    _production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    let settings = ServiceSettings::from_item(item, false).map_err(HostError::Setting)?;
    let callback = Arc::new(ServiceCallback::new(settings.clone(), ctx.clone()));
    let adapter =
        Arc::new(FileInboundAdapter::new(item, callback).map_err(HostError::Adapter)?);
    let processor = Arc::new(ServiceProcessor::new(
        settings,
        adapter as Arc<dyn Adapter>,
        ctx.clone(),
    ));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}

fn build_http_service(
    item: &ItemConfig,
    _production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    // HTTP callers get a 503 instead of blocking on a full queue.
    let settings = ServiceSettings::from_item(item, true).map_err(HostError::Setting)?;
    let callback = Arc::new(ServiceCallback::new(settings.clone(), ctx.clone()));
    let adapter =
        Arc::new(HttpInboundAdapter::new(item, callback).map_err(HostError::Adapter)?);
    let processor = Arc::new(ServiceProcessor::new(
        settings,
        adapter as Arc<dyn Adapter>,
        ctx.clone(),
    ));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}

fn build_routing_process(
    item: &ItemConfig,
    production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    let default_targets = match item.setting(SettingTarget::Host, "DefaultTargets") {
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        None => item.target_config_names(),
    };
    let rules = production.rules_for(&item.name);
    let engine = RoutingEngine::compile(&rules, default_targets)
        .map_err(|e| HostError::Config(format!("routing rules for '{}': {e}", item.name)))?;
    let processor = Arc::new(RoutingProcessor::new(item.name.clone(), engine, ctx.clone()));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}

fn build_passthrough_process(
    item: &ItemConfig,
    _production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    let processor = Arc::new(PassthroughProcessor::new(
        item.name.clone(),
        item.target_config_names(),
        ctx.clone(),
    ));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}

fn build_tcp_operation(
    item: &ItemConfig,
    _production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    let settings = OperationSettings::from_item(item)?;
    let adapter = Arc::new(
        MllpOutboundAdapter::new(item, Arc::clone(&ctx.metrics)).map_err(HostError::Adapter)?,
    );
    let remote = adapter.settings().remote();
    let processor = Arc::new(TcpOperationProcessor::new(
        settings,
        adapter as Arc<dyn Adapter>,
        remote,
        ctx.clone(),
    ));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}

fn build_file_operation(
    item: &ItemConfig,
    _production: &ProductionConfig,
    ctx: &EngineContext,
) -> Result<Arc<dyn Host>, EngineError> {
    let settings = OperationSettings::from_item(item)?;
    let adapter = Arc::new(FileOutboundAdapter::new(item).map_err(HostError::Adapter)?);
    let directory = adapter.settings().directory.display().to_string();
    let processor = Arc::new(FileOperationProcessor::new(
        settings,
        adapter as Arc<dyn Adapter>,
        directory,
        ctx.clone(),
    ));
    Ok(Arc::new(WorkerHost::new(
        item.name.clone(),
        item.item_type,
        tuning(item)?,
        processor,
        ctx.clone(),
    )))
}
