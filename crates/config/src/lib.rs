// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mw-config: typed production configuration and its loaders.
//!
//! A production is loaded either from the native TOML form or from a
//! legacy IRIS production XML document (including `.cls`-wrapped
//! XData). Validation happens at load: unknown targets, duplicate
//! names, and routing cycles never reach the engine.

pub mod error;
pub mod iris;
pub mod model;
pub mod native;

pub use error::ConfigError;
pub use iris::IrisXmlLoader;
pub use model::{
    LoggingConfig, PersistenceBackend, PersistenceConfig, ProductionConfig, RouteAction,
    RoutingRule,
};
pub use native::{load_file, load_toml_str};
