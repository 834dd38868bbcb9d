// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mw-engine: the production runtime.
//!
//! An engine loads a production configuration, builds one host per
//! enabled item through the class registry, wires host queues together
//! via the dispatcher, and runs the whole graph: inbound adapters feed
//! service hosts, process hosts route, operation hosts deliver, and the
//! persistence plane records every leg.

pub mod adapter;
pub mod context;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod host;
pub mod registry;
pub mod router;
pub mod transform;

pub use adapter::{Adapter, AdapterMetrics, AdapterState};
pub use context::EngineContext;
pub use dispatch::{Dispatcher, QueuedMessage};
pub use engine::{build_context, Engine, EngineOptions, EngineStatus};
pub use error::{AdapterError, EngineError, HostError};
pub use host::{
    Disposition, Host, HostStatus, HostTuning, InboundHandler, InboundOutcome, Processor,
    ReplyAction, ReplyCodeActions, WorkerHost,
};
pub use registry::ClassRegistry;
pub use router::{RouteDecision, RoutingEngine};
pub use transform::{Transform, TransformError, TransformRegistry};
