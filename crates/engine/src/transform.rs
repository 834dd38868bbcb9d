// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transform invocation contract.
//!
//! Transforms are black-box callables named by routing rules. The
//! engine only defines how they are looked up and invoked; what they
//! do to the bytes is their business. A transform must not suspend and
//! must leave its input untouched, returning a new message.

use mw_core::Message;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("unknown transform: '{0}'")]
    Unknown(String),

    #[error("transform '{name}' failed: {reason}")]
    Failed { name: String, reason: String },
}

/// A named message rewrite.
pub trait Transform: Send + Sync {
    fn apply(&self, message: &Message) -> Result<Message, TransformError>;
}

impl<F> Transform for F
where
    F: Fn(&Message) -> Result<Message, TransformError> + Send + Sync,
{
    fn apply(&self, message: &Message) -> Result<Message, TransformError> {
        self(message)
    }
}

/// Process-wide transform lookup, synchronized for registration and
/// read-mostly afterwards.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: RwLock<BTreeMap<String, Arc<dyn Transform>>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, transform: Arc<dyn Transform>) {
        self.transforms.write().insert(name.into(), transform);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.read().get(name).cloned()
    }

    /// Invoke a named transform on a message.
    pub fn apply(&self, name: &str, message: &Message) -> Result<Message, TransformError> {
        self.get(name)
            .ok_or_else(|| TransformError::Unknown(name.to_string()))?
            .apply(message)
    }

    pub fn names(&self) -> Vec<String> {
        self.transforms.read().keys().cloned().collect()
    }

    /// Drop every registered transform. For tests.
    pub fn clear(&self) {
        self.transforms.write().clear();
    }
}
