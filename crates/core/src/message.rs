// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-flight message envelope.
//!
//! A [`Message`] is the unit of work that flows between hosts. The raw
//! payload is held in a shared [`Bytes`] buffer and is never mutated;
//! transforms produce a new message over new bytes.

use crate::clock::Clock;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for one leg of a message.
    ///
    /// Every hand-off between hosts gets its own message ID; the session
    /// ID ties the legs of one business event together.
    pub struct MessageId("msg-");
}

crate::define_id! {
    /// Identifier for one business event, stable across every leg.
    pub struct SessionId("ses-");
}

/// Content type for HL7 v2 ER7-encoded payloads.
pub const CONTENT_TYPE_HL7V2: &str = "x-application/hl7-v2+er7";

/// Processing status of a message leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Created,
    Queued,
    Completed,
    Error,
    Discarded,
}

impl MessageStatus {
    /// Terminal statuses are never processed again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Completed | MessageStatus::Error | MessageStatus::Discarded
        )
    }
}

crate::simple_display! {
    MessageStatus {
        Created => "created",
        Queued => "queued",
        Completed => "completed",
        Error => "error",
        Discarded => "discarded",
    }
}

/// One leg of a message moving through the production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Stable across legs that carry the same clinical payload.
    /// For HL7 this is MSH-10; otherwise the originating message ID.
    pub correlation_id: String,
    /// Stable across all legs of one business event.
    pub session_id: SessionId,
    /// Position of this leg within the session, starting at 1.
    pub sequence_num: u32,
    pub raw: Bytes,
    pub content_type: String,
    /// Character encoding label. Payloads are treated as UTF-8-tolerant
    /// byte strings regardless; the label travels with the message.
    pub encoding: String,
    pub source_config_name: String,
    pub target_config_name: String,
    /// Resolved message type (e.g. `ADT_A01`), when known.
    pub message_type: Option<String>,
    pub status: MessageStatus,
    pub retry_count: u32,
    /// Epoch milliseconds after which the message is discarded unprocessed.
    pub expires_at_ms: Option<u64>,
    pub received_at_ms: u64,
}

impl Message {
    /// Create an ingress message at a service host.
    ///
    /// Mints a fresh session and uses the message ID as the correlation ID
    /// until a protocol layer derives a better one.
    pub fn new(
        raw: impl Into<Bytes>,
        content_type: impl Into<String>,
        source: impl Into<String>,
        clock: &impl Clock,
    ) -> Self {
        let id = MessageId::new();
        Self {
            id,
            correlation_id: id.to_string(),
            session_id: SessionId::new(),
            sequence_num: 1,
            raw: raw.into(),
            content_type: content_type.into(),
            encoding: "utf-8".to_string(),
            source_config_name: source.into(),
            target_config_name: String::new(),
            message_type: None,
            status: MessageStatus::Created,
            retry_count: 0,
            expires_at_ms: None,
            received_at_ms: clock.epoch_ms(),
        }
    }

    /// Derive the next leg of this message toward `target`.
    ///
    /// Session, correlation, payload, and type carry over; the leg gets a
    /// fresh ID, an incremented sequence number, and a reset retry count.
    pub fn next_leg(&self, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            correlation_id: self.correlation_id.clone(),
            session_id: self.session_id,
            sequence_num: self.sequence_num + 1,
            raw: self.raw.clone(),
            content_type: self.content_type.clone(),
            encoding: self.encoding.clone(),
            source_config_name: source.into(),
            target_config_name: target.into(),
            message_type: self.message_type.clone(),
            status: MessageStatus::Created,
            retry_count: 0,
            expires_at_ms: self.expires_at_ms,
            received_at_ms: self.received_at_ms,
        }
    }

    /// Replace the payload, keeping identity. Used by transforms; the
    /// original message is untouched.
    pub fn with_raw(&self, raw: impl Into<Bytes>) -> Self {
        let mut next = self.clone();
        next.raw = raw.into();
        next
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }
}

crate::builder! {
    pub struct MessageBuilder => Message {
        into {
            correlation_id: String = "corr-1",
            raw: Bytes = Bytes::from_static(b"MSH|^~\\&|A|B|C|D|20240101000000||ADT^A01|MSG001|P|2.4\r"),
            content_type: String = CONTENT_TYPE_HL7V2,
            encoding: String = "utf-8",
            source_config_name: String = "TestService",
            target_config_name: String = "",
        }
        set {
            sequence_num: u32 = 1,
            status: MessageStatus = MessageStatus::Created,
            retry_count: u32 = 0,
            received_at_ms: u64 = 1_000_000,
        }
        option {
            message_type: String = None,
            expires_at_ms: u64 = None,
        }
        computed {
            id: MessageId = MessageId::new(),
            session_id: SessionId = SessionId::new(),
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
