// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mw-core: core types for the Medway integration engine.
//!
//! Holds the pieces every other crate leans on: message envelopes, item
//! configuration, host lifecycle states, IDs, clocks, and the metrics
//! registry. No I/O lives here.

pub mod macros;

pub mod clock;
pub mod id;
pub mod item;
pub mod lifecycle;
pub mod message;
pub mod metrics;

pub use clock::{Clock, DynClock, FakeClock, SystemClock};
pub use item::{
    ItemConfig, ItemSetting, ItemType, SettingError, SettingTarget, SettingsView,
};
pub use lifecycle::{HostState, ProductionState};
#[cfg(any(test, feature = "test-support"))]
pub use message::MessageBuilder;
pub use message::{Message, MessageId, MessageStatus, SessionId, CONTENT_TYPE_HL7V2};
pub use metrics::{Counter, EngineMetrics, Gauge, Histogram, MetricsRegistry};
