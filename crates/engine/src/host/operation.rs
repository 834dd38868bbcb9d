// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation hosts: the outbound edge.
//!
//! Workers hand each message to the adapter and interpret the returned
//! acknowledgment through `ReplyCodeActions`.

use crate::adapter::Adapter;
use crate::context::EngineContext;
use crate::error::HostError;
use crate::host::reply::{ReplyAction, ReplyCodeActions};
use crate::host::{Disposition, Processor};
use mw_core::{ItemConfig, Message};
use mw_hl7::ParsedView;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Shared ACK interpretation for outbound processors.
fn interpret_ack(
    host: &str,
    adapter: &Arc<dyn Adapter>,
    reply_actions: &ReplyCodeActions,
    retry_delay: Duration,
    ack: &[u8],
) -> Disposition {
    let code = ParsedView::new(bytes::Bytes::copy_from_slice(ack))
        .get_field("MSA-1")
        .ok()
        .flatten()
        .filter(|c| !c.is_empty())
        // An unparseable or absent MSA is treated as an accept.
        .unwrap_or_else(|| "AA".to_string());

    let ack_text = String::from_utf8_lossy(ack).to_string();
    match reply_actions.evaluate(&code) {
        ReplyAction::Success => Disposition::CompleteWithAck(ack_text),
        ReplyAction::Warning => {
            warn!(host, code = %code, "reply code mapped to warning");
            Disposition::CompleteWithAck(ack_text)
        }
        ReplyAction::Retry => {
            adapter.metrics().record_error();
            Disposition::Retry {
                delay: retry_delay,
                reason: format!("reply code {code} mapped to retry"),
            }
        }
        ReplyAction::Fail => {
            adapter.metrics().record_error();
            Disposition::Fail(format!("reply code {code} mapped to fail"))
        }
    }
}

/// Reads the outbound tuning shared by operation kinds.
pub struct OperationSettings {
    pub name: String,
    pub reply_actions: ReplyCodeActions,
    pub retry_delay: Duration,
    pub no_ack: bool,
}

impl OperationSettings {
    pub fn from_item(item: &ItemConfig) -> Result<Self, HostError> {
        let host = item.host_settings();
        let reply_actions = match host.get("ReplyCodeActions") {
            None => ReplyCodeActions::default(),
            Some(raw) => ReplyCodeActions::parse(raw)
                .map_err(|e| HostError::Config(format!("ReplyCodeActions: {e}")))?,
        };
        Ok(Self {
            name: item.name.clone(),
            reply_actions,
            retry_delay: host.duration_secs_or("RetryInterval", Duration::from_secs(5))?,
            no_ack: host.bool_or("NoAck", false)?,
        })
    }
}

/// MLLP outbound operation.
pub struct TcpOperationProcessor {
    settings: OperationSettings,
    adapter: Arc<dyn Adapter>,
    remote: String,
    ctx: EngineContext,
}

impl TcpOperationProcessor {
    pub fn new(
        settings: OperationSettings,
        adapter: Arc<dyn Adapter>,
        remote: impl Into<String>,
        ctx: EngineContext,
    ) -> Self {
        Self { settings, adapter, remote: remote.into(), ctx }
    }
}

#[async_trait::async_trait]
impl Processor for TcpOperationProcessor {
    fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        Some(Arc::clone(&self.adapter))
    }

    async fn process(&self, message: &Message) -> Result<Disposition, HostError> {
        let host = self.settings.name.as_str();
        self.ctx
            .metrics
            .message_size_bytes
            .observe(message.raw.len() as f64, &[("host", host), ("direction", "out")]);

        if self.settings.no_ack {
            self.adapter.send_no_ack(&message.raw).await?;
            self.ctx.metrics.messages_sent.inc(&[("host", host), ("target", self.remote.as_str())]);
            return Ok(Disposition::Complete);
        }

        let ack = self.adapter.send(&message.raw).await?;
        self.ctx.metrics.messages_sent.inc(&[("host", host), ("target", self.remote.as_str())]);
        debug!(host, ack_bytes = ack.len(), "delivery acknowledged");
        Ok(interpret_ack(
            host,
            &self.adapter,
            &self.settings.reply_actions,
            self.settings.retry_delay,
            &ack,
        ))
    }
}

/// File-drop outbound operation. No acknowledgments on this path, so a
/// successful write completes the leg.
pub struct FileOperationProcessor {
    settings: OperationSettings,
    adapter: Arc<dyn Adapter>,
    directory: String,
    ctx: EngineContext,
}

impl FileOperationProcessor {
    pub fn new(
        settings: OperationSettings,
        adapter: Arc<dyn Adapter>,
        directory: impl Into<String>,
        ctx: EngineContext,
    ) -> Self {
        Self { settings, adapter, directory: directory.into(), ctx }
    }
}

#[async_trait::async_trait]
impl Processor for FileOperationProcessor {
    fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        Some(Arc::clone(&self.adapter))
    }

    async fn process(&self, message: &Message) -> Result<Disposition, HostError> {
        let host = self.settings.name.as_str();
        self.adapter.send_no_ack(&message.raw).await?;
        self.ctx
            .metrics
            .messages_sent
            .inc(&[("host", host), ("target", self.directory.as_str())]);
        Ok(Disposition::Complete)
    }
}
