// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process hosts: routing and passthrough.

use crate::context::EngineContext;
use crate::dispatch::{fan_out, submit_leg};
use crate::error::HostError;
use crate::host::{Disposition, Processor};
use crate::router::{RoutingEngine, RouteTarget};
use mw_core::Message;
use tracing::debug;

/// Content-based router: evaluates its rule set per message and
/// dispatches to the selected targets.
pub struct RoutingProcessor {
    name: String,
    engine: RoutingEngine,
    /// Serializes dispatch for targets on rules flagged `ordered`.
    ordered_lock: tokio::sync::Mutex<()>,
    ctx: EngineContext,
}

impl RoutingProcessor {
    pub fn new(name: impl Into<String>, engine: RoutingEngine, ctx: EngineContext) -> Self {
        Self { name: name.into(), engine, ordered_lock: tokio::sync::Mutex::new(()), ctx }
    }

    async fn dispatch_target(
        &self,
        target: &RouteTarget,
        message: &Message,
    ) -> Result<(), HostError> {
        let outgoing = match &target.transform {
            None => message.clone(),
            Some(name) => self
                .ctx
                .transforms
                .apply(name, message)
                .map_err(|e| HostError::Processing(e.to_string()))?,
        };
        let leg = outgoing.next_leg(self.name.clone(), target.name.clone());
        submit_leg(&self.ctx, &target.name, leg, true).await?;
        self.ctx
            .metrics
            .messages_sent
            .inc(&[("host", self.name.as_str()), ("target", target.name.as_str())]);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Processor for RoutingProcessor {
    async fn process(&self, message: &Message) -> Result<Disposition, HostError> {
        let decision = self
            .engine
            .evaluate(message, &self.ctx.transforms)
            .map_err(|e| HostError::Processing(e.to_string()))?;

        if decision.deleted {
            let rule = decision.matched_rule.unwrap_or_default();
            debug!(host = %self.name, rule = %rule, "message deleted by routing rule");
            return Ok(Disposition::Discard(format!("deleted by rule '{rule}'")));
        }
        if decision.targets.is_empty() {
            debug!(host = %self.name, "no routing targets matched");
            return Ok(Disposition::Complete);
        }

        let mut failures = Vec::new();
        for target in &decision.targets {
            let result = if target.ordered {
                let _serialized = self.ordered_lock.lock().await;
                self.dispatch_target(target, &decision.message).await
            } else {
                self.dispatch_target(target, &decision.message).await
            };
            if let Err(e) = result {
                failures.push(format!("{}: {e}", target.name));
            }
        }
        if failures.is_empty() {
            Ok(Disposition::Complete)
        } else {
            Err(HostError::Send(failures.join("; ")))
        }
    }
}

/// Forwards every message to every configured target, unconditionally.
pub struct PassthroughProcessor {
    name: String,
    targets: Vec<String>,
    ctx: EngineContext,
}

impl PassthroughProcessor {
    pub fn new(name: impl Into<String>, targets: Vec<String>, ctx: EngineContext) -> Self {
        Self { name: name.into(), targets, ctx }
    }
}

#[async_trait::async_trait]
impl Processor for PassthroughProcessor {
    async fn process(&self, message: &Message) -> Result<Disposition, HostError> {
        if self.targets.is_empty() {
            return Ok(Disposition::Complete);
        }
        fan_out(&self.ctx, &self.name, &self.targets, message).await?;
        Ok(Disposition::Complete)
    }
}
