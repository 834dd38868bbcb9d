// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Content-based routing: evaluate a process's rules against a message
//! and decide which targets receive it.

pub mod expr;

pub use expr::{Expr, ExprError};

use crate::transform::{TransformError, TransformRegistry};
use mw_config::{RouteAction, RoutingRule};
use mw_core::Message;
use mw_hl7::ParsedView;
use tracing::debug;

/// A rule with its condition compiled.
#[derive(Debug, Clone)]
struct CompiledRule {
    name: String,
    enabled: bool,
    condition: Expr,
    action: RouteAction,
    targets: Vec<String>,
    transform: Option<String>,
    ordered: bool,
}

/// One selected destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub name: String,
    pub transform: Option<String>,
    pub ordered: bool,
}

/// Outcome of evaluating the rules for one message.
#[derive(Debug, Clone)]
pub struct RouteDecision {
    /// The message after any `transform` actions along the way.
    pub message: Message,
    pub targets: Vec<RouteTarget>,
    /// A `delete` rule matched; the message is dropped.
    pub deleted: bool,
    pub matched_rule: Option<String>,
}

/// Compiled rule set for one process host.
pub struct RoutingEngine {
    rules: Vec<CompiledRule>,
    default_targets: Vec<String>,
}

impl RoutingEngine {
    /// Compile rules (already in priority order) and the fallback
    /// target list from host settings.
    pub fn compile(
        rules: &[&RoutingRule],
        default_targets: Vec<String>,
    ) -> Result<Self, ExprError> {
        let compiled = rules
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    name: rule.name.clone(),
                    enabled: rule.enabled,
                    condition: Expr::parse(&rule.condition)?,
                    action: rule.action,
                    targets: rule.targets.clone(),
                    transform: rule.transform.clone(),
                    ordered: rule.ordered,
                })
            })
            .collect::<Result<Vec<_>, ExprError>>()?;
        Ok(Self { rules: compiled, default_targets })
    }

    /// Walk the rules: the first match decides, except `transform`
    /// actions, which rewrite the message and keep evaluating. Falls
    /// back to the default target list when nothing matches.
    pub fn evaluate(
        &self,
        message: &Message,
        transforms: &TransformRegistry,
    ) -> Result<RouteDecision, TransformError> {
        let mut current = message.clone();
        let mut view = ParsedView::new(current.raw.clone());

        for rule in self.rules.iter().filter(|r| r.enabled) {
            if !rule.condition.matches(&view) {
                continue;
            }
            debug!(rule = %rule.name, action = %rule.action, "routing rule matched");
            match rule.action {
                RouteAction::Transform => {
                    let name = rule.transform.as_deref().unwrap_or_default();
                    current = transforms.apply(name, &current)?;
                    view = ParsedView::new(current.raw.clone());
                }
                RouteAction::Delete => {
                    return Ok(RouteDecision {
                        message: current,
                        targets: Vec::new(),
                        deleted: true,
                        matched_rule: Some(rule.name.clone()),
                    })
                }
                RouteAction::Stop => {
                    return Ok(RouteDecision {
                        message: current,
                        targets: Vec::new(),
                        deleted: false,
                        matched_rule: Some(rule.name.clone()),
                    })
                }
                RouteAction::Send => {
                    let targets = rule
                        .targets
                        .iter()
                        .map(|t| RouteTarget {
                            name: t.clone(),
                            transform: rule.transform.clone(),
                            ordered: rule.ordered,
                        })
                        .collect();
                    return Ok(RouteDecision {
                        message: current,
                        targets,
                        deleted: false,
                        matched_rule: Some(rule.name.clone()),
                    });
                }
            }
        }

        Ok(RouteDecision {
            message: current,
            targets: self
                .default_targets
                .iter()
                .map(|t| RouteTarget { name: t.clone(), transform: None, ordered: false })
                .collect(),
            deleted: false,
            matched_rule: None,
        })
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
