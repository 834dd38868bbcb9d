// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mw-hl7: HL7 v2 schemas, lazy parsed views, validation, and ACKs.
//!
//! A schema is a named, versioned description of segments and message
//! types; site dialects extend a base schema and lookups walk the
//! inheritance chain. Parsing is lazy and never mutates the raw bytes —
//! edits assemble new bytes.

pub mod definitions;
pub mod parsed;
pub mod registry;
pub mod schema;

pub use definitions::{FieldDef, MessageTypeDef, SegmentDef};
pub use parsed::{FieldPath, ParsedView, PathError};
pub use registry::SchemaRegistry;
pub use schema::{AckCode, Hl7Schema, Severity, ValidationIssue};
