// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schema registry with single-parent inheritance lookup.

use crate::definitions::{MessageTypeDef, SegmentDef};
use crate::schema::Hl7Schema;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Registry of loaded schemas, shared across the engine.
///
/// Read-mostly after start; registration is synchronized. Lookups that
/// miss on a dialect walk its `base` chain until a definition is found.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<BTreeMap<String, Arc<Hl7Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, schema: Hl7Schema) -> Arc<Hl7Schema> {
        let name = schema.name().to_string();
        let schema = Arc::new(schema);
        self.schemas.write().insert(name.clone(), Arc::clone(&schema));
        debug!(schema = %name, "schema registered");
        schema
    }

    pub fn get(&self, name: &str) -> Option<Arc<Hl7Schema>> {
        self.schemas.read().get(name).cloned()
    }

    /// Fetch a schema, creating and registering a standard-table schema
    /// under that name when none exists yet.
    pub fn get_or_default(&self, name: &str) -> Arc<Hl7Schema> {
        if let Some(schema) = self.get(name) {
            return schema;
        }
        self.register(Hl7Schema::new(name))
    }

    /// The schema and its ancestors, most specific first. Safe against
    /// accidental cycles in `base` references.
    pub fn chain(&self, name: &str) -> Vec<Arc<Hl7Schema>> {
        let mut chain = Vec::new();
        let mut seen = std::collections::BTreeSet::new();
        let mut current = Some(name.to_string());

        while let Some(schema_name) = current {
            if !seen.insert(schema_name.clone()) {
                break;
            }
            match self.get(&schema_name) {
                None => break,
                Some(schema) => {
                    current = schema.base().map(str::to_string);
                    chain.push(schema);
                }
            }
        }
        chain
    }

    /// Resolve a message type definition, walking the inheritance chain.
    pub fn resolve_message_type(&self, schema: &str, name: &str) -> Option<MessageTypeDef> {
        self.chain(schema)
            .iter()
            .find_map(|s| s.message_type_def(name).cloned())
    }

    /// Resolve a segment definition, walking the inheritance chain.
    pub fn resolve_segment(&self, schema: &str, name: &str) -> Option<SegmentDef> {
        self.chain(schema)
            .iter()
            .find_map(|s| s.segment_def(name).cloned())
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }

    /// Drop every registered schema. For tests.
    pub fn clear(&self) {
        self.schemas.write().clear();
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
