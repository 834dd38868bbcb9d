// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle state machines for productions and hosts.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a whole production.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductionState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
}

crate::simple_display! {
    ProductionState {
        Created => "created",
        Starting => "starting",
        Running => "running",
        Stopping => "stopping",
        Stopped => "stopped",
        Error => "error",
    }
}

/// Lifecycle state of a single host.
///
/// Legal transitions:
/// `Created → Starting → Running`, `Running ⇄ Paused`,
/// `Running|Paused|Error → Stopping → Stopped`, `Stopped → Starting`,
/// any processing state `→ Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Created,
    Starting,
    Running,
    Paused,
    Stopping,
    Stopped,
    Error,
}

impl HostState {
    /// States from which `start()` is allowed.
    pub fn can_start(self) -> bool {
        matches!(self, HostState::Created | HostState::Stopped)
    }

    /// States from which `stop()` is allowed.
    pub fn can_stop(self) -> bool {
        matches!(self, HostState::Running | HostState::Paused | HostState::Error)
    }

    /// True while the host accepts submitted messages.
    pub fn accepts_messages(self) -> bool {
        matches!(self, HostState::Running | HostState::Paused)
    }
}

crate::simple_display! {
    HostState {
        Created => "created",
        Starting => "starting",
        Running => "running",
        Paused => "paused",
        Stopping => "stopping",
        Stopped => "stopped",
        Error => "error",
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
