// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Item configuration: the immutable snapshot a host is built from.
//!
//! Settings arrive as strings in the wire format (IRIS XML or the native
//! TOML form) and are converted to typed values where they are consumed;
//! [`SettingsView`] provides the typed accessor surface.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Category of item, which determines the host kind built for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    /// Inbound: accepts messages from external systems.
    Service,
    /// Routing/transformation between hosts.
    Process,
    /// Outbound: delivers messages to external systems.
    Operation,
}

impl ItemType {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemType::Service => "service",
            ItemType::Process => "process",
            ItemType::Operation => "operation",
        }
    }
}

crate::simple_display! {
    ItemType {
        Service => "service",
        Process => "process",
        Operation => "operation",
    }
}

/// Which component of a host a setting addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingTarget {
    Adapter,
    Host,
}

crate::simple_display! {
    SettingTarget {
        Adapter => "adapter",
        Host => "host",
    }
}

/// One configured setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSetting {
    pub target: SettingTarget,
    pub name: String,
    pub value: String,
}

impl ItemSetting {
    pub fn new(
        target: SettingTarget,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self { target, name: name.into(), value: value.into() }
    }
}

/// A malformed setting value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("setting {target}/{name}: cannot parse {value:?} as {expected}")]
pub struct SettingError {
    pub target: SettingTarget,
    pub name: String,
    pub value: String,
    pub expected: &'static str,
}

/// Immutable configuration snapshot for one production item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemConfig {
    /// Unique within the production.
    pub name: String,
    /// Selects the host implementation via the class registry.
    pub class_name: String,
    pub item_type: ItemType,
    pub pool_size: usize,
    pub enabled: bool,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub comment: String,
    /// IRIS schedule string; carried through, not interpreted.
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub settings: Vec<ItemSetting>,
}

impl ItemConfig {
    pub fn new(
        name: impl Into<String>,
        class_name: impl Into<String>,
        item_type: ItemType,
    ) -> Self {
        Self {
            name: name.into(),
            class_name: class_name.into(),
            item_type,
            pool_size: 1,
            enabled: true,
            category: String::new(),
            comment: String::new(),
            schedule: String::new(),
            settings: Vec::new(),
        }
    }

    crate::setters! {
        into {
            category: String,
        }
        set {
            pool_size: usize,
            enabled: bool,
        }
    }

    /// Add a setting (builder style).
    pub fn with_setting(
        mut self,
        target: SettingTarget,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.settings.push(ItemSetting::new(target, name, value));
        self
    }

    /// Raw lookup. Last occurrence wins so reloaded settings can be appended.
    pub fn setting(&self, target: SettingTarget, name: &str) -> Option<&str> {
        self.settings
            .iter()
            .rev()
            .find(|s| s.target == target && s.name == name)
            .map(|s| s.value.as_str())
    }

    /// Replace or append a setting value.
    pub fn set_setting(
        &mut self,
        target: SettingTarget,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        let name = name.into();
        let value = value.into();
        if let Some(s) = self
            .settings
            .iter_mut()
            .find(|s| s.target == target && s.name == name)
        {
            s.value = value;
        } else {
            self.settings.push(ItemSetting::new(target, name, value));
        }
    }

    pub fn adapter_settings(&self) -> SettingsView<'_> {
        SettingsView { config: self, target: SettingTarget::Adapter }
    }

    pub fn host_settings(&self) -> SettingsView<'_> {
        SettingsView { config: self, target: SettingTarget::Host }
    }

    /// Targets this item forwards to (`TargetConfigNames`, comma separated).
    pub fn target_config_names(&self) -> Vec<String> {
        self.setting(SettingTarget::Host, "TargetConfigNames")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Typed accessors over one target's settings bag.
#[derive(Clone, Copy)]
pub struct SettingsView<'a> {
    config: &'a ItemConfig,
    target: SettingTarget,
}

impl<'a> SettingsView<'a> {
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.config.setting(self.target, name)
    }

    pub fn str_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or(default).to_string()
    }

    /// Parse a setting, `None` when absent.
    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, SettingError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| SettingError {
                target: self.target,
                name: name.to_string(),
                value: raw.to_string(),
                expected: std::any::type_name::<T>(),
            }),
        }
    }

    pub fn parse_or<T: FromStr>(&self, name: &str, default: T) -> Result<T, SettingError> {
        Ok(self.parse(name)?.unwrap_or(default))
    }

    /// Booleans accept `true/false`, `1/0`, `yes/no` (case-insensitive),
    /// matching the IRIS wire format.
    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool, SettingError> {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                _ => Err(SettingError {
                    target: self.target,
                    name: name.to_string(),
                    value: raw.to_string(),
                    expected: "bool",
                }),
            },
        }
    }

    /// Durations are configured in (possibly fractional) seconds.
    pub fn duration_secs_or(
        &self,
        name: &str,
        default: Duration,
    ) -> Result<Duration, SettingError> {
        match self.parse::<f64>(name)? {
            None => Ok(default),
            Some(secs) if secs >= 0.0 && secs.is_finite() => {
                Ok(Duration::from_secs_f64(secs))
            }
            Some(_) => Err(SettingError {
                target: self.target,
                name: name.to_string(),
                value: self.get(name).unwrap_or_default().to_string(),
                expected: "non-negative seconds",
            }),
        }
    }
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
