// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable message store: one header row per leg, content-addressed
//! bodies shared by every leg that carries the same payload.

use base64::Engine as _;
use bytes::Bytes;
use mw_core::{define_id, Message, MessageStatus, CONTENT_TYPE_HL7V2};
use mw_hl7::ParsedView;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

define_id! {
    /// Identifier of one persisted header row.
    pub struct HeaderId("hdr-");
}

/// Errors from store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("header not found: {0}")]
    NotFound(String),
}

/// One persisted leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRecord {
    pub id: HeaderId,
    pub message_id: String,
    pub session_id: String,
    pub correlation_id: String,
    pub sequence_num: u32,
    pub source_config_name: String,
    pub target_config_name: String,
    pub message_type: Option<String>,
    pub status: MessageStatus,
    pub received_at_ms: u64,
    pub completed_at_ms: Option<u64>,
    pub latency_ms: Option<u64>,
    pub body_id: String,
    pub error_message: Option<String>,
    pub ack_content: Option<String>,
}

fn serialize_bytes<S: serde::Serializer>(bytes: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn deserialize_bytes<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Bytes, D::Error> {
    let text = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map(Bytes::from)
        .map_err(serde::de::Error::custom)
}

/// A stored message body, shared across legs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyRecord {
    /// Content hash of `raw_content` and the content type.
    pub id: String,
    pub body_class_name: String,
    pub content_type: String,
    pub content_size: usize,
    #[serde(serialize_with = "serialize_bytes", deserialize_with = "deserialize_bytes")]
    pub raw_content: Bytes,
    pub hl7_message_type: Option<String>,
    pub hl7_control_id: Option<String>,
}

impl BodyRecord {
    /// Content address: N legs with identical bytes and content type
    /// share one body row.
    pub fn content_id(raw: &[u8], content_type: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw);
        hasher.update([0u8]);
        hasher.update(content_type.as_bytes());
        hex(&hasher.finalize())
    }

    /// Build the body row for a message, deriving HL7 metadata when the
    /// payload is ER7-encoded.
    pub fn from_message(message: &Message) -> Self {
        let (hl7_message_type, hl7_control_id, class_name) =
            if message.content_type == CONTENT_TYPE_HL7V2 {
                let parsed = ParsedView::new(message.raw.clone());
                (parsed.message_type(), parsed.control_id(), "Hl7Message")
            } else {
                (None, None, "BinaryMessage")
            };

        Self {
            id: Self::content_id(&message.raw, &message.content_type),
            body_class_name: class_name.to_string(),
            content_type: message.content_type.clone(),
            content_size: message.raw.len(),
            raw_content: message.raw.clone(),
            hl7_message_type,
            hl7_control_id,
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Multi-field selector over persisted headers.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub session_id: Option<String>,
    pub correlation_id: Option<String>,
    pub source_config_name: Option<String>,
    pub target_config_name: Option<String>,
    pub message_type: Option<String>,
    pub status: Option<MessageStatus>,
    pub received_after_ms: Option<u64>,
    pub received_before_ms: Option<u64>,
    /// Newest first by default.
    pub order_ascending: bool,
    pub limit: usize,
    pub offset: usize,
}

impl MessageQuery {
    pub fn new() -> Self {
        Self { limit: 100, ..Default::default() }
    }

    mw_core::setters! {
        set {
            order_ascending: bool,
            limit: usize,
            offset: usize,
        }
        option {
            session_id: String,
            correlation_id: String,
            source_config_name: String,
            target_config_name: String,
            message_type: String,
            status: MessageStatus,
            received_after_ms: u64,
            received_before_ms: u64,
        }
    }

    /// Does a header match every bound filter?
    pub fn matches(&self, header: &HeaderRecord) -> bool {
        let field_matches = |filter: &Option<String>, value: &str| {
            filter.as_deref().map(|f| f == value).unwrap_or(true)
        };
        field_matches(&self.session_id, &header.session_id)
            && field_matches(&self.correlation_id, &header.correlation_id)
            && field_matches(&self.source_config_name, &header.source_config_name)
            && field_matches(&self.target_config_name, &header.target_config_name)
            && self
                .message_type
                .as_deref()
                .map(|f| header.message_type.as_deref() == Some(f))
                .unwrap_or(true)
            && self.status.map(|s| header.status == s).unwrap_or(true)
            && self
                .received_after_ms
                .map(|t| header.received_at_ms >= t)
                .unwrap_or(true)
            && self
                .received_before_ms
                .map(|t| header.received_at_ms < t)
                .unwrap_or(true)
    }
}

/// Pluggable storage backend for persisted messages.
///
/// The engine only sees this trait; a relational backend implements the
/// same surface out of tree.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one leg. The body is content-addressed and inserted only
    /// if no identical body exists.
    async fn store_header(&self, message: &Message) -> Result<HeaderId, StoreError>;

    /// Update the status of a leg; terminal statuses stamp completion
    /// time and latency.
    async fn update_status(
        &self,
        id: HeaderId,
        status: MessageStatus,
        ack_content: Option<String>,
        error_message: Option<String>,
    ) -> Result<(), StoreError>;

    async fn get_by_id(&self, id: HeaderId) -> Result<Option<HeaderRecord>, StoreError>;

    /// The body referenced by a header.
    async fn get_content(&self, id: HeaderId) -> Result<Option<BodyRecord>, StoreError>;

    async fn query(&self, query: &MessageQuery) -> Result<Vec<HeaderRecord>, StoreError>;

    async fn count(&self, query: &MessageQuery) -> Result<usize, StoreError>;

    /// Housekeeping: delete headers received before the cutoff, and any
    /// bodies no remaining header references. Returns deleted headers.
    async fn delete_received_before(&self, cutoff_ms: u64) -> Result<usize, StoreError>;

    /// Number of stored body rows (for dedup verification and metrics).
    async fn body_count(&self) -> Result<usize, StoreError>;
}

/// Sort, paginate per the query.
pub(crate) fn apply_order_and_page(
    mut rows: Vec<HeaderRecord>,
    query: &MessageQuery,
) -> Vec<HeaderRecord> {
    if query.order_ascending {
        rows.sort_by_key(|h| h.received_at_ms);
    } else {
        rows.sort_by(|a, b| b.received_at_ms.cmp(&a.received_at_ms));
    }
    rows.into_iter()
        .skip(query.offset)
        .take(if query.limit == 0 { usize::MAX } else { query.limit })
        .collect()
}
