// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The production configuration model and its load-time validation.

use crate::error::ConfigError;
use mw_core::{ItemConfig, ItemType, SettingTarget};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What a matched routing rule does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    /// Dispatch to the rule's targets and stop evaluating.
    Send,
    /// Rewrite the message and keep evaluating.
    Transform,
    /// End evaluation with no targets.
    Stop,
    /// Drop the message.
    Delete,
}

mw_core::simple_display! {
    RouteAction {
        Send => "send",
        Transform => "transform",
        Stop => "stop",
        Delete => "delete",
    }
}

/// One content-based routing rule, attached to a process item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub name: String,
    /// The process item this rule belongs to.
    pub process: String,
    /// 0–1000; higher evaluates first.
    pub priority: u16,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Condition expression; empty matches everything.
    #[serde(default)]
    pub condition: String,
    pub action: RouteAction,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub transform: Option<String>,
    /// Serialize every message through this route, trading throughput
    /// for strict ordering.
    #[serde(default)]
    pub ordered: bool,
}

fn default_true() -> bool {
    true
}

/// Logging preferences, consumed by the embedding layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub trace_messages: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), trace_messages: false }
    }
}

/// Which store backend the engine builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersistenceBackend {
    #[default]
    Memory,
    File,
}

/// Persistence plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub backend: PersistenceBackend,
    /// Directory for the file store and the WAL.
    pub directory: Option<String>,
    pub wal_enabled: bool,
    /// Header retention in days, 0 disables the sweep.
    pub retention_days: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { backend: PersistenceBackend::Memory, directory: None, wal_enabled: true, retention_days: 0 }
    }
}

/// A complete, validated production description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub testing_enabled: bool,
    #[serde(default = "default_pool")]
    pub actor_pool_size: usize,
    #[serde(default)]
    pub items: Vec<ItemConfig>,
    #[serde(default)]
    pub routes: Vec<RoutingRule>,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

fn default_pool() -> usize {
    2
}

impl ProductionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            testing_enabled: false,
            actor_pool_size: 2,
            items: Vec::new(),
            routes: Vec::new(),
            logging: LoggingConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }

    pub fn with_item(mut self, item: ItemConfig) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_route(mut self, route: RoutingRule) -> Self {
        self.routes.push(route);
        self
    }

    pub fn get_item(&self, name: &str) -> Option<&ItemConfig> {
        self.items.iter().find(|i| i.name == name)
    }

    pub fn enabled_items(&self) -> impl Iterator<Item = &ItemConfig> {
        self.items.iter().filter(|i| i.enabled)
    }

    pub fn items_of_type(&self, item_type: ItemType) -> impl Iterator<Item = &ItemConfig> {
        self.items.iter().filter(move |i| i.item_type == item_type)
    }

    /// Routing rules for one process, priority descending then
    /// definition order.
    pub fn rules_for(&self, process: &str) -> Vec<&RoutingRule> {
        let mut rules: Vec<(usize, &RoutingRule)> = self
            .routes
            .iter()
            .enumerate()
            .filter(|(_, r)| r.process == process)
            .collect();
        rules.sort_by(|(ia, a), (ib, b)| b.priority.cmp(&a.priority).then(ia.cmp(ib)));
        rules.into_iter().map(|(_, r)| r).collect()
    }

    /// Every name an item or rule forwards to, per source item.
    fn forward_edges(&self) -> BTreeMap<&str, BTreeSet<String>> {
        let mut edges: BTreeMap<&str, BTreeSet<String>> = BTreeMap::new();
        for item in &self.items {
            let targets: &mut BTreeSet<String> = edges.entry(item.name.as_str()).or_default();
            targets.extend(item.target_config_names());
            for name in ["BadMessageHandler", "DefaultTargets"] {
                if let Some(value) = item.setting(SettingTarget::Host, name) {
                    targets.extend(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(str::to_string),
                    );
                }
            }
        }
        for rule in &self.routes {
            if let Some(targets) = edges.get_mut(rule.process.as_str()) {
                targets.extend(rule.targets.iter().cloned());
            }
        }
        edges
    }

    /// Startup order: operations, then processes, then services, so a
    /// host's targets are running before the host that feeds them.
    pub fn dependency_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        for item_type in [ItemType::Operation, ItemType::Process, ItemType::Service] {
            order.extend(
                self.enabled_items()
                    .filter(|i| i.item_type == item_type)
                    .map(|i| i.name.clone()),
            );
        }
        order
    }

    /// Validate the whole production. Collects every problem rather
    /// than stopping at the first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        let mut seen = BTreeSet::new();
        for item in &self.items {
            if item.name.trim().is_empty() {
                errors.push("item with empty name".to_string());
            }
            if !seen.insert(item.name.as_str()) {
                errors.push(format!("duplicate item name: '{}'", item.name));
            }
            if item.pool_size == 0 {
                errors.push(format!("item '{}': pool_size must be ≥ 1", item.name));
            }
        }

        let known: BTreeSet<&str> = self.items.iter().map(|i| i.name.as_str()).collect();
        for (source, targets) in self.forward_edges() {
            for target in targets {
                if !known.contains(target.as_str()) {
                    errors.push(format!("item '{source}' references unknown target '{target}'"));
                }
            }
        }

        for rule in &self.routes {
            if rule.priority > 1000 {
                errors.push(format!(
                    "route '{}': priority {} out of range 0–1000",
                    rule.name, rule.priority
                ));
            }
            match self.get_item(&rule.process) {
                None => errors.push(format!(
                    "route '{}' references unknown process '{}'",
                    rule.name, rule.process
                )),
                Some(item) if item.item_type != ItemType::Process => errors.push(format!(
                    "route '{}' attached to '{}', which is not a process",
                    rule.name, rule.process
                )),
                Some(_) => {}
            }
            if rule.action == RouteAction::Transform && rule.transform.is_none() {
                errors.push(format!("route '{}': transform action without transform name", rule.name));
            }
            if rule.action == RouteAction::Send && rule.targets.is_empty() {
                errors.push(format!("route '{}': send action without targets", rule.name));
            }
        }

        if let Some(cycle) = self.find_process_cycle() {
            errors.push(format!("routing cycle among processes: {}", cycle.join(" -> ")));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::invalid(errors))
        }
    }

    /// DFS over process→process forwarding edges.
    fn find_process_cycle(&self) -> Option<Vec<String>> {
        let processes: BTreeSet<&str> = self
            .items_of_type(ItemType::Process)
            .map(|i| i.name.as_str())
            .collect();
        let edges = self.forward_edges();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            node: &str,
            edges: &BTreeMap<&str, BTreeSet<String>>,
            processes: &BTreeSet<&str>,
            marks: &mut BTreeMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> bool {
            match marks.get(node) {
                Some(Mark::Done) => return false,
                Some(Mark::Visiting) => {
                    path.push(node.to_string());
                    return true;
                }
                None => {}
            }
            marks.insert(node.to_string(), Mark::Visiting);
            path.push(node.to_string());
            if let Some(targets) = edges.get(node) {
                for target in targets {
                    if processes.contains(target.as_str())
                        && visit(target, edges, processes, marks, path)
                    {
                        return true;
                    }
                }
            }
            path.pop();
            marks.insert(node.to_string(), Mark::Done);
            false
        }

        let mut marks = BTreeMap::new();
        for process in &processes {
            let mut path = Vec::new();
            if visit(process, &edges, &processes, &mut marks, &mut path) {
                return Some(path);
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
