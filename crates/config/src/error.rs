// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration error type.

use thiserror::Error;

/// Fatal at load: the engine never starts on a config that fails here.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid XML: {0}")]
    Xml(String),

    #[error("invalid setting: {0}")]
    Setting(#[from] mw_core::SettingError),

    #[error("invalid production configuration:\n{}", errors.join("\n"))]
    Invalid { errors: Vec<String> },

    #[error("unsupported configuration file: {0}")]
    UnsupportedFormat(String),
}

impl ConfigError {
    pub fn invalid(errors: Vec<String>) -> Self {
        ConfigError::Invalid { errors }
    }
}

impl From<quick_xml::Error> for ConfigError {
    fn from(e: quick_xml::Error) -> Self {
        ConfigError::Xml(e.to_string())
    }
}
