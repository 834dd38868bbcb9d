// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `ReplyCodeActions`: how an operation interprets `MSA-1` codes.
//!
//! A comma-separated list of `:PATTERN=ACTION` clauses, e.g.
//! `":?R=F,:?E=S,:*=S"`. First match wins; an unmatched code is a
//! success. Unknown patterns and actions are load-time errors.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid ReplyCodeActions clause {clause:?}: {reason}")]
pub struct ReplyParseError {
    pub clause: String,
    pub reason: String,
}

/// What to do with a reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyAction {
    Success,
    Fail,
    Retry,
    Warning,
}

mw_core::simple_display! {
    ReplyAction {
        Success => "success",
        Fail => "fail",
        Retry => "retry",
        Warning => "warning",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplyPattern {
    /// Exact `MSA-1` match (`AA`, `AE`, `AR`, `CA`, `CE`, `CR`).
    Exact(String),
    /// `?A`: any accept code (`AA`, `CA`).
    AnyAccept,
    /// `?E`: any error code (`AE`, `CE`).
    AnyError,
    /// `?R`: any reject code (`AR`, `CR`).
    AnyReject,
    /// `*`: catch-all.
    Any,
}

impl ReplyPattern {
    fn matches(&self, code: &str) -> bool {
        match self {
            ReplyPattern::Exact(exact) => exact == code,
            ReplyPattern::AnyAccept => matches!(code, "AA" | "CA"),
            ReplyPattern::AnyError => matches!(code, "AE" | "CE"),
            ReplyPattern::AnyReject => matches!(code, "AR" | "CR"),
            ReplyPattern::Any => true,
        }
    }
}

const EXACT_CODES: &[&str] = &["AA", "AE", "AR", "CA", "CE", "CR"];

/// Parsed rule list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyCodeActions {
    pairs: Vec<(ReplyPattern, ReplyAction)>,
}

impl Default for ReplyCodeActions {
    /// Everything is a success.
    fn default() -> Self {
        Self { pairs: vec![(ReplyPattern::Any, ReplyAction::Success)] }
    }
}

impl ReplyCodeActions {
    pub fn parse(text: &str) -> Result<Self, ReplyParseError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut pairs = Vec::new();
        for clause in text.split(',') {
            let clause = clause.trim();
            if clause.is_empty() {
                continue;
            }
            let error = |reason: &str| ReplyParseError {
                clause: clause.to_string(),
                reason: reason.to_string(),
            };

            let (pattern_text, action_text) =
                clause.split_once('=').ok_or_else(|| error("missing '='"))?;
            let pattern_text = pattern_text.trim().trim_start_matches(':').trim();
            let action_text = action_text.trim();

            let pattern = match pattern_text {
                "*" => ReplyPattern::Any,
                "?A" => ReplyPattern::AnyAccept,
                "?E" => ReplyPattern::AnyError,
                "?R" => ReplyPattern::AnyReject,
                code if EXACT_CODES.contains(&code) => ReplyPattern::Exact(code.to_string()),
                _ => return Err(error("unknown pattern")),
            };
            let action = match action_text.to_ascii_uppercase().as_str() {
                "S" => ReplyAction::Success,
                "F" => ReplyAction::Fail,
                "R" => ReplyAction::Retry,
                "W" => ReplyAction::Warning,
                _ => return Err(error("unknown action")),
            };
            pairs.push((pattern, action));
        }

        if pairs.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self { pairs })
    }

    /// First matching clause decides; unmatched codes succeed.
    pub fn evaluate(&self, code: &str) -> ReplyAction {
        self.pairs
            .iter()
            .find(|(pattern, _)| pattern.matches(code))
            .map(|(_, action)| *action)
            .unwrap_or(ReplyAction::Success)
    }
}

#[cfg(test)]
#[path = "reply_tests.rs"]
mod tests;
