// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lazy parsed view over raw HL7 bytes.
//!
//! The view holds the original bytes and decodes segments on first
//! access. Field lookups are total: a missing segment, field, or
//! component yields `None`. Edits never touch the original — `set_field`
//! assembles new bytes and returns a fresh view.

use bytes::Bytes;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors from field-path parsing and edits.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("invalid field path {0:?}")]
    Invalid(String),

    #[error("field {0} cannot be modified")]
    Immutable(String),
}

/// A parsed field reference: `SEGMENT(occurrence)-field.component.sub`.
///
/// Occurrence selects among repeating segments and is 1-based;
/// `OBX(2)-5.1` is the first component of field 5 of the second OBX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    pub segment: String,
    pub occurrence: usize,
    pub field: usize,
    pub component: Option<usize>,
    pub subcomponent: Option<usize>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let invalid = || PathError::Invalid(path.to_string());

        let (seg_part, field_part) = path.split_once('-').ok_or_else(invalid)?;

        let (segment, occurrence) = match seg_part.split_once('(') {
            None => (seg_part.to_string(), 1),
            Some((name, rest)) => {
                let occ = rest
                    .strip_suffix(')')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| *n >= 1)
                    .ok_or_else(invalid)?;
                (name.to_string(), occ)
            }
        };
        if segment.is_empty() || !segment.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid());
        }

        let mut numbers = field_part.split('.');
        let field = numbers
            .next()
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|n| *n >= 1)
            .ok_or_else(invalid)?;
        let mut parse_opt = |raw: Option<&str>| -> Result<Option<usize>, PathError> {
            match raw {
                None => Ok(None),
                Some(n) => n
                    .parse::<usize>()
                    .ok()
                    .filter(|n| *n >= 1)
                    .map(Some)
                    .ok_or_else(invalid),
            }
        };
        let component = parse_opt(numbers.next())?;
        let subcomponent = parse_opt(numbers.next())?;
        if numbers.next().is_some() {
            return Err(invalid());
        }

        Ok(Self { segment: segment.to_ascii_uppercase(), occurrence, field, component, subcomponent })
    }
}

impl std::str::FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segment)?;
        if self.occurrence != 1 {
            write!(f, "({})", self.occurrence)?;
        }
        write!(f, "-{}", self.field)?;
        if let Some(c) = self.component {
            write!(f, ".{c}")?;
        }
        if let Some(s) = self.subcomponent {
            write!(f, ".{s}")?;
        }
        Ok(())
    }
}

/// One decoded segment: `parts[0]` is the segment name, the rest are
/// field values in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    parts: Vec<String>,
}

impl Segment {
    fn name(&self) -> &str {
        self.parts.first().map(String::as_str).unwrap_or("")
    }

    /// Wire index of a 1-based field position. MSH-1 is the field
    /// separator itself and MSH-2 the encoding characters, so MSH field
    /// numbering is shifted by one relative to the split parts.
    fn part_index(&self, field: usize) -> Option<usize> {
        if self.name() == "MSH" {
            if field == 1 {
                return None;
            }
            Some(field - 1)
        } else {
            Some(field)
        }
    }

    fn field(&self, field: usize) -> Option<&str> {
        if self.name() == "MSH" && field == 1 {
            return Some("|");
        }
        self.parts.get(self.part_index(field)?).map(String::as_str)
    }
}

/// Lazy accessor over raw HL7 bytes. Never mutates `raw`.
#[derive(Debug)]
pub struct ParsedView {
    raw: Bytes,
    segments: OnceLock<Vec<Segment>>,
}

impl Clone for ParsedView {
    fn clone(&self) -> Self {
        // The decoded cache is cheap to rebuild; clones restart lazy.
        Self::new(self.raw.clone())
    }
}

impl ParsedView {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self { raw: raw.into(), segments: OnceLock::new() }
    }

    /// The original bytes, untouched by any lookup or edit.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    fn segments(&self) -> &[Segment] {
        self.segments.get_or_init(|| {
            let text = String::from_utf8_lossy(&self.raw);
            text.split(['\r', '\n'])
                .filter(|line| !line.is_empty())
                .map(|line| Segment {
                    parts: line.split('|').map(str::to_string).collect(),
                })
                .collect()
        })
    }

    fn segment(&self, name: &str, occurrence: usize) -> Option<&Segment> {
        self.segments()
            .iter()
            .filter(|s| s.name() == name)
            .nth(occurrence.saturating_sub(1))
    }

    pub fn has_segment(&self, name: &str) -> bool {
        self.segment(name, 1).is_some()
    }

    pub fn segment_count(&self, name: &str) -> usize {
        self.segments().iter().filter(|s| s.name() == name).count()
    }

    pub fn segment_names(&self) -> Vec<String> {
        self.segments().iter().map(|s| s.name().to_string()).collect()
    }

    /// Look up a field value. Total: missing anything yields `None`.
    pub fn field(&self, path: &FieldPath) -> Option<String> {
        let segment = self.segment(&path.segment, path.occurrence)?;
        let field = segment.field(path.field)?;

        let value = match path.component {
            None => field.to_string(),
            Some(component) => {
                let comp = field.split('^').nth(component - 1)?;
                match path.subcomponent {
                    None => comp.to_string(),
                    Some(sub) => comp.split('&').nth(sub - 1)?.to_string(),
                }
            }
        };
        Some(value)
    }

    /// Parse the path and look up the field.
    pub fn get_field(&self, path: &str) -> Result<Option<String>, PathError> {
        Ok(self.field(&FieldPath::parse(path)?))
    }

    /// Look up with a default, swallowing missing values (not bad paths).
    pub fn get_field_or(&self, path: &str, default: &str) -> Result<String, PathError> {
        Ok(self.get_field(path)?.unwrap_or_else(|| default.to_string()))
    }

    /// Resolved message type, e.g. `ADT_A01` from `MSH-9` `ADT^A01`.
    pub fn message_type(&self) -> Option<String> {
        let raw = self.field(&FieldPath {
            segment: "MSH".into(),
            occurrence: 1,
            field: 9,
            component: None,
            subcomponent: None,
        })?;
        if raw.is_empty() {
            return None;
        }
        let mut parts = raw.split('^');
        let kind = parts.next().unwrap_or_default();
        match parts.next() {
            Some(trigger) if !trigger.is_empty() => Some(format!("{kind}_{trigger}")),
            _ => Some(kind.to_string()),
        }
    }

    /// `MSH-10`, the message control ID.
    pub fn control_id(&self) -> Option<String> {
        self.field(&FieldPath {
            segment: "MSH".into(),
            occurrence: 1,
            field: 10,
            component: None,
            subcomponent: None,
        })
        .filter(|v| !v.is_empty())
    }

    /// Produce new bytes with one field replaced. The receiver is
    /// unchanged; missing fields and components are padded as needed.
    pub fn set_field(&self, path: &FieldPath, value: &str) -> Result<ParsedView, PathError> {
        if path.segment == "MSH" && path.field == 1 {
            return Err(PathError::Immutable(path.to_string()));
        }

        let mut segments: Vec<Segment> = self.segments().to_vec();
        let mut seen = 0usize;
        let segment = segments
            .iter_mut()
            .filter(|s| s.name() == path.segment)
            .find(|_| {
                seen += 1;
                seen == path.occurrence
            })
            .ok_or_else(|| PathError::Invalid(path.to_string()))?;

        let index = segment
            .part_index(path.field)
            .ok_or_else(|| PathError::Immutable(path.to_string()))?;
        while segment.parts.len() <= index {
            segment.parts.push(String::new());
        }

        segment.parts[index] = match path.component {
            None => value.to_string(),
            Some(component) => {
                let mut comps: Vec<String> =
                    segment.parts[index].split('^').map(str::to_string).collect();
                while comps.len() < component {
                    comps.push(String::new());
                }
                comps[component - 1] = match path.subcomponent {
                    None => value.to_string(),
                    Some(sub) => {
                        let mut subs: Vec<String> =
                            comps[component - 1].split('&').map(str::to_string).collect();
                        while subs.len() < sub {
                            subs.push(String::new());
                        }
                        subs[sub - 1] = value.to_string();
                        subs.join("&")
                    }
                };
                comps.join("^")
            }
        };

        let mut assembled = segments
            .iter()
            .map(|s| s.parts.join("|"))
            .collect::<Vec<_>>()
            .join("\r");
        assembled.push('\r');
        Ok(ParsedView::new(assembled.into_bytes()))
    }
}

#[cfg(test)]
#[path = "parsed_tests.rs"]
mod tests;
