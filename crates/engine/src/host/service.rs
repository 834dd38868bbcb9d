// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service hosts: the inbound edge.
//!
//! The adapter callback parses and validates arriving payloads,
//! answers with an ACK according to `AckMode`, and enqueues accepted
//! messages; the host's own workers then fan out to every configured
//! target.

use crate::adapter::Adapter;
use crate::context::EngineContext;
use crate::dispatch::{fan_out, submit_leg};
use crate::error::HostError;
use crate::host::{Disposition, InboundHandler, InboundOutcome, Processor};
use bytes::Bytes;
use mw_core::{ItemConfig, Message, MessageStatus, SettingError, SettingTarget, CONTENT_TYPE_HL7V2};
use mw_hl7::{AckCode, ParsedView};
use mw_storage::MessageStore as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// When the service answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// ACK from validation, before the message is enqueued.
    Immediate,
    /// ACK only after the message is durably enqueued.
    Application,
    /// No ACK at all.
    Never,
}

impl AckMode {
    fn from_item(item: &ItemConfig) -> Result<Self, SettingError> {
        match item.host_settings().get("AckMode") {
            None => Ok(AckMode::Immediate),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "immediate" => Ok(AckMode::Immediate),
                "application" => Ok(AckMode::Application),
                "never" => Ok(AckMode::Never),
                _ => Err(SettingError {
                    target: SettingTarget::Host,
                    name: "AckMode".to_string(),
                    value: raw.to_string(),
                    expected: "Immediate | Application | Never",
                }),
            },
        }
    }
}

/// Settings shared by the callback and the processor.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub name: String,
    pub schema_category: String,
    pub ack_mode: AckMode,
    pub bad_message_handler: Option<String>,
    pub targets: Vec<String>,
    /// Drop with a rejection instead of blocking when the queue is
    /// full (HTTP services).
    pub drop_on_full: bool,
}

impl ServiceSettings {
    pub fn from_item(item: &ItemConfig, drop_on_full: bool) -> Result<Self, SettingError> {
        let host = item.host_settings();
        Ok(Self {
            name: item.name.clone(),
            schema_category: host.str_or("MessageSchemaCategory", "2.4"),
            ack_mode: AckMode::from_item(item)?,
            bad_message_handler: host.get("BadMessageHandler").map(str::to_string),
            targets: item.target_config_names(),
            drop_on_full,
        })
    }
}

/// Adapter-facing half of a service host.
pub struct ServiceCallback {
    settings: ServiceSettings,
    ctx: EngineContext,
}

impl ServiceCallback {
    pub fn new(settings: ServiceSettings, ctx: EngineContext) -> Self {
        Self { settings, ctx }
    }

    fn ack(&self, parsed: &ParsedView, code: AckCode, text: &str) -> Option<Bytes> {
        if self.settings.ack_mode == AckMode::Never {
            return None;
        }
        let schema = self.ctx.schemas.get_or_default(&self.settings.schema_category);
        Some(schema.create_ack(parsed, code, text, &ClockRef(&*self.ctx.clock)))
    }
}

/// Adapts the dyn clock back to the `Clock` bound `create_ack` wants.
#[derive(Clone)]
struct ClockRef<'a>(&'a dyn mw_core::DynClock);

impl mw_core::Clock for ClockRef<'_> {
    fn now(&self) -> std::time::Instant {
        self.0.now()
    }

    fn epoch_ms(&self) -> u64 {
        self.0.epoch_ms()
    }

    fn hl7_timestamp(&self) -> String {
        self.0.hl7_timestamp()
    }
}

#[async_trait::async_trait]
impl InboundHandler for ServiceCallback {
    async fn on_data_received(&self, data: Bytes, content_type: &str) -> InboundOutcome {
        let name = self.settings.name.as_str();
        let is_hl7 = content_type == CONTENT_TYPE_HL7V2;

        let mut message = Message::new(data.clone(), content_type, name, &ClockRef(&*self.ctx.clock));
        let parsed = ParsedView::new(data);

        let mut validation_errors = Vec::new();
        if is_hl7 {
            if let Some(control_id) = parsed.control_id() {
                message.correlation_id = control_id;
            }
            message.message_type = parsed.message_type();
            let schema = self.ctx.schemas.get_or_default(&self.settings.schema_category);
            validation_errors = schema.validate(&message.raw);
        }

        self.ctx.metrics.messages_received.inc(&[
            ("host", name),
            ("type", message.message_type.as_deref().unwrap_or("unknown")),
        ]);
        self.ctx
            .metrics
            .message_size_bytes
            .observe(message.raw.len() as f64, &[("host", name), ("direction", "in")]);

        if !validation_errors.is_empty() {
            let text = validation_errors
                .iter()
                .take(3)
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            warn!(host = name, errors = %text, "message failed validation");

            // Record the rejected leg so the trail shows what arrived.
            match self.ctx.store.store_header(&message).await {
                Ok(header_id) => {
                    if let Err(e) = self
                        .ctx
                        .store
                        .update_status(
                            header_id,
                            MessageStatus::Error,
                            None,
                            Some(format!("validation: {text}")),
                        )
                        .await
                    {
                        warn!(host = name, error = %e, "cannot record invalid message");
                    }
                }
                Err(e) => warn!(host = name, error = %e, "cannot record invalid message"),
            }

            if let Some(handler) = &self.settings.bad_message_handler {
                let leg = message.next_leg(name, handler.clone());
                if let Err(e) = submit_leg(&self.ctx, handler, leg, true).await {
                    warn!(host = name, handler = handler.as_str(), error = %e, "bad-message hand-off failed");
                }
            }

            return InboundOutcome {
                ack: self.ack(&parsed, AckCode::Ae, &text),
                message_id: Some(message.id),
                accepted: false,
                busy: false,
                reason: Some(text),
            };
        }

        match self.settings.ack_mode {
            // ACK reflects validation; enqueue afterwards (blocking, so
            // the connection back-pressures on a full queue).
            AckMode::Immediate | AckMode::Never => {
                let ack = self.ack(&parsed, AckCode::Aa, "Message accepted");
                match submit_leg(&self.ctx, name, message.clone(), !self.settings.drop_on_full)
                    .await
                {
                    Ok(_) => InboundOutcome {
                        ack,
                        message_id: Some(message.id),
                        accepted: true,
                        busy: false,
                        reason: None,
                    },
                    Err(e) => InboundOutcome {
                        ack: self.ack(&parsed, AckCode::Ae, "Message not accepted"),
                        message_id: Some(message.id),
                        accepted: false,
                        busy: matches!(e, HostError::Backpressure(_)),
                        reason: Some(e.to_string()),
                    },
                }
            }
            // ACK only once the message is actually queued.
            AckMode::Application => {
                match submit_leg(&self.ctx, name, message.clone(), !self.settings.drop_on_full)
                    .await
                {
                    Ok(_) => InboundOutcome {
                        ack: self.ack(&parsed, AckCode::Aa, "Message accepted"),
                        message_id: Some(message.id),
                        accepted: true,
                        busy: false,
                        reason: None,
                    },
                    Err(e) => {
                        warn!(host = name, error = %e, "cannot enqueue message");
                        InboundOutcome {
                            ack: self.ack(&parsed, AckCode::Ae, "Message not accepted"),
                            message_id: Some(message.id),
                            accepted: false,
                            busy: matches!(e, HostError::Backpressure(_)),
                            reason: Some(e.to_string()),
                        }
                    }
                }
            }
        }
    }
}

/// Worker-facing half: deliver each accepted message to the targets.
pub struct ServiceProcessor {
    settings: ServiceSettings,
    adapter: Arc<dyn Adapter>,
    ctx: EngineContext,
}

impl ServiceProcessor {
    pub fn new(settings: ServiceSettings, adapter: Arc<dyn Adapter>, ctx: EngineContext) -> Self {
        Self { settings, adapter, ctx }
    }
}

#[async_trait::async_trait]
impl Processor for ServiceProcessor {
    fn adapter(&self) -> Option<Arc<dyn Adapter>> {
        Some(Arc::clone(&self.adapter))
    }

    async fn on_start(&self) -> Result<(), HostError> {
        // Bind the schema so the first message does not pay for it.
        self.ctx.schemas.get_or_default(&self.settings.schema_category);
        Ok(())
    }

    async fn process(&self, message: &Message) -> Result<Disposition, HostError> {
        if self.settings.targets.is_empty() {
            debug!(host = %self.settings.name, "no targets configured, message completed in place");
            return Ok(Disposition::Complete);
        }
        fan_out(&self.ctx, &self.settings.name, &self.settings.targets, message).await?;
        Ok(Disposition::Complete)
    }
}
