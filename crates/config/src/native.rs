// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Native declarative configuration: TOML with `[production]`,
//! `[[items]]`, `[[routes]]`, `[logging]`, and `[persistence]` sections.
//!
//! Item settings are written as `[items.adapter]` / `[items.host]`
//! tables; scalar values of any TOML type are carried as their wire
//! string form.

use crate::error::ConfigError;
use crate::iris::IrisXmlLoader;
use crate::model::{LoggingConfig, PersistenceConfig, ProductionConfig, RoutingRule};
use mw_core::{ItemConfig, ItemSetting, ItemType, SettingTarget};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ProductionFile {
    production: ProductionSection,
    #[serde(default)]
    items: Vec<ItemSection>,
    #[serde(default)]
    routes: Vec<RoutingRule>,
    #[serde(default)]
    logging: LoggingConfig,
    #[serde(default)]
    persistence: PersistenceConfig,
}

#[derive(Debug, Deserialize)]
struct ProductionSection {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    testing_enabled: bool,
    #[serde(default = "default_actor_pool")]
    actor_pool_size: usize,
}

fn default_actor_pool() -> usize {
    2
}

#[derive(Debug, Deserialize)]
struct ItemSection {
    name: String,
    class_name: String,
    item_type: ItemType,
    #[serde(default = "default_pool_size")]
    pool_size: usize,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    category: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    schedule: String,
    #[serde(default)]
    adapter: BTreeMap<String, toml::Value>,
    #[serde(default)]
    host: BTreeMap<String, toml::Value>,
}

fn default_pool_size() -> usize {
    1
}

fn default_enabled() -> bool {
    true
}

/// Settings carry string values on the wire whatever their TOML type.
fn value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

impl ItemSection {
    fn into_item(self) -> ItemConfig {
        let mut settings = Vec::new();
        for (name, value) in &self.adapter {
            settings.push(ItemSetting::new(SettingTarget::Adapter, name, value_to_string(value)));
        }
        for (name, value) in &self.host {
            settings.push(ItemSetting::new(SettingTarget::Host, name, value_to_string(value)));
        }
        ItemConfig {
            name: self.name,
            class_name: self.class_name,
            item_type: self.item_type,
            pool_size: self.pool_size,
            enabled: self.enabled,
            category: self.category,
            comment: self.comment,
            schedule: self.schedule,
            settings,
        }
    }
}

/// Parse and validate the native TOML form.
pub fn load_toml_str(text: &str) -> Result<ProductionConfig, ConfigError> {
    let file: ProductionFile = toml::from_str(text)?;
    let config = ProductionConfig {
        name: file.production.name,
        description: file.production.description,
        testing_enabled: file.production.testing_enabled,
        actor_pool_size: file.production.actor_pool_size,
        items: file.items.into_iter().map(ItemSection::into_item).collect(),
        routes: file.routes,
        logging: file.logging,
        persistence: file.persistence,
    };
    config.validate()?;
    info!(production = %config.name, items = config.items.len(), "configuration loaded");
    Ok(config)
}

/// Load a production from disk, dispatching on the file extension:
/// `.toml` native form, `.xml`/`.cls` legacy IRIS form.
pub fn load_file(path: impl AsRef<Path>) -> Result<ProductionConfig, ConfigError> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "toml" => load_toml_str(&std::fs::read_to_string(path)?),
        "xml" | "cls" => IrisXmlLoader::new().load(path),
        other => Err(ConfigError::UnsupportedFormat(format!(
            "{} (extension {other:?})",
            path.display()
        ))),
    }
}

#[cfg(test)]
#[path = "native_tests.rs"]
mod tests;
