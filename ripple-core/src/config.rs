//! Runtime Configuration
//!
//! Each thread's runtime reads its limits from a [`RuntimeConfig`]. The
//! defaults suit interactive use; tests and embedders can install their own
//! with [`configure`].

use serde::{Deserialize, Serialize};

use crate::error::ReactiveError;
use crate::reactive::Runtime;

/// Tunables for the reactive runtime of the current thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Flush passes allowed before a flush is aborted as a runaway loop.
    pub max_update_depth: usize,

    /// Emit a warning when an effect or cleanup is created with no owner
    /// to dispose it.
    pub warn_on_orphans: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_update_depth: 1000,
            warn_on_orphans: true,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ReactiveError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Install `config` for the reactive runtime of the current thread.
pub fn configure(config: RuntimeConfig) {
    tracing::debug!(?config, "configuring reactive runtime");
    Runtime::with(|rt| rt.set_config(config));
}

/// The configuration currently in effect on this thread.
pub fn current_config() -> RuntimeConfig {
    Runtime::with(|rt| rt.config())
}
