// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HL7 schema: named, versioned segment and message-type tables with
//! validation and ACK generation.

use crate::definitions::{standard_message_types, standard_segments, MessageTypeDef, SegmentDef};
use crate::parsed::{FieldPath, ParsedView};
use bytes::Bytes;
use mw_core::Clock;
use std::collections::BTreeMap;

/// HL7 acknowledgment codes carried in `MSA-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckCode {
    /// Application Accept
    Aa,
    /// Application Error
    Ae,
    /// Application Reject
    Ar,
    /// Commit Accept
    Ca,
    /// Commit Error
    Ce,
    /// Commit Reject
    Cr,
}

impl AckCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AckCode::Aa => "AA",
            AckCode::Ae => "AE",
            AckCode::Ar => "AR",
            AckCode::Ca => "CA",
            AckCode::Ce => "CE",
            AckCode::Cr => "CR",
        }
    }
}

impl std::fmt::Display for AckCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One structured validation finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into(), severity: Severity::Error }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A named, versioned HL7 schema.
///
/// Every schema starts from the standard v2.4 tables; site dialects add
/// or override definitions and may name a base schema, which lookups in
/// the registry walk when a definition is missing here.
#[derive(Debug, Clone)]
pub struct Hl7Schema {
    name: String,
    version: String,
    base: Option<String>,
    segments: BTreeMap<String, SegmentDef>,
    message_types: BTreeMap<String, MessageTypeDef>,
}

impl Hl7Schema {
    pub fn new(name: impl Into<String>) -> Self {
        let segments = standard_segments()
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        let message_types = standard_message_types()
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();
        Self {
            name: name.into(),
            version: "2.4".to_string(),
            base: None,
            segments,
            message_types,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn base(&self) -> Option<&str> {
        self.base.as_deref()
    }

    pub fn add_segment(&mut self, segment: SegmentDef) {
        self.segments.insert(segment.name.clone(), segment);
    }

    pub fn add_message_type(&mut self, message_type: MessageTypeDef) {
        self.message_types.insert(message_type.name.clone(), message_type);
    }

    pub fn segment_def(&self, name: &str) -> Option<&SegmentDef> {
        self.segments.get(name)
    }

    pub fn message_type_def(&self, name: &str) -> Option<&MessageTypeDef> {
        self.message_types.get(name)
    }

    /// Build a lazy view over the raw bytes.
    pub fn parse(&self, raw: impl Into<Bytes>) -> ParsedView {
        ParsedView::new(raw)
    }

    /// Validate raw bytes against this schema's tables.
    pub fn validate(&self, raw: &[u8]) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let parsed = ParsedView::new(Bytes::copy_from_slice(raw));

        let names = parsed.segment_names();
        if names.first().map(String::as_str) != Some("MSH") {
            issues.push(ValidationIssue::error("MSH", "Message must start with an MSH segment"));
            return issues;
        }

        let message_type = parsed.message_type();
        match &message_type {
            None => issues.push(ValidationIssue::error("MSH-9", "Missing message type")),
            Some(mt) => {
                if let Some(def) = self.message_types.get(mt) {
                    for segment in &def.required_segments {
                        if !parsed.has_segment(segment) {
                            issues.push(ValidationIssue::error(
                                segment.clone(),
                                format!("Missing required segment: {segment}"),
                            ));
                        }
                    }
                }
            }
        }

        if let Some(msh) = self.segments.get("MSH") {
            for field in msh.fields.iter().filter(|f| f.required) {
                let path = FieldPath {
                    segment: "MSH".to_string(),
                    occurrence: 1,
                    field: field.position,
                    component: None,
                    subcomponent: None,
                };
                let empty = parsed.field(&path).map(|v| v.is_empty()).unwrap_or(true);
                if empty {
                    issues.push(ValidationIssue::error(
                        format!("MSH-{}", field.position),
                        format!("Missing required field: {}", field.name),
                    ));
                }
            }
        }

        issues
    }

    /// Build an ACK for the given message.
    ///
    /// Sender and receiver are swapped, the timestamp comes from the
    /// clock, and the control ID and version are copied from the input.
    pub fn create_ack(
        &self,
        parsed: &ParsedView,
        code: AckCode,
        text: &str,
        clock: &impl Clock,
    ) -> Bytes {
        let get = |field: usize| {
            parsed
                .field(&FieldPath {
                    segment: "MSH".to_string(),
                    occurrence: 1,
                    field,
                    component: None,
                    subcomponent: None,
                })
                .unwrap_or_default()
        };

        let sending_app = get(3);
        let sending_fac = get(4);
        let receiving_app = get(5);
        let receiving_fac = get(6);
        let control_id = get(10);
        let version = {
            let v = get(12);
            if v.is_empty() { self.version.clone() } else { v }
        };
        let timestamp = clock.hl7_timestamp();

        let mut ack = format!(
            "MSH|^~\\&|{receiving_app}|{receiving_fac}|{sending_app}|{sending_fac}|{timestamp}||ACK|{control_id}|P|{version}\rMSA|{code}|{control_id}"
        );
        if !text.is_empty() {
            ack.push('|');
            ack.push_str(text);
        }
        ack.push('\r');
        Bytes::from(ack)
    }
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
