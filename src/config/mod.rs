//! # Latched Services Configuration
//!
//! YAML-based configuration for the startup scheduler. The document has one
//! section per concern plus optional per-environment override sections that are
//! merged over the base values (see [`loader`]).
//!
//! ```yaml
//! controller:
//!   thread_pool_size: 4
//!   circularity_timeout_ms: 30000
//! dependency_graph:
//!   max_depth: 50 # optional, unlimited when absent
//!   cycle_detection_enabled: true
//!
//! test:
//!   controller:
//!     thread_pool_size: 1
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use latched_services::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let pool_size = manager.config().controller.thread_pool_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring latched-services.yaml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LatchedServicesConfig {
    /// Worker pool and run-level settings
    pub controller: ControllerConfig,

    /// Dependency graph analysis settings
    pub dependency_graph: DependencyGraphConfig,
}

impl LatchedServicesConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.controller.validate()?;
        self.dependency_graph.validate()?;

        if !self.dependency_graph.cycle_detection_enabled
            && self.controller.circularity_timeout_ms.is_none()
        {
            tracing::warn!(
                "Cycle detection is disabled and no circularity timeout is set; a dependency cycle will block startup forever"
            );
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Maximum number of service actions running at once; unbounded when absent
    pub thread_pool_size: Option<usize>,

    /// How long a run may take before unfinished services are reported as circular
    pub circularity_timeout_ms: Option<u64>,
}

impl ControllerConfig {
    pub fn circularity_timeout(&self) -> Option<Duration> {
        self.circularity_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.thread_pool_size == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "controller.thread_pool_size",
                "0",
                "thread pool size must be greater than zero",
            ));
        }

        if self.circularity_timeout_ms == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "controller.circularity_timeout_ms",
                "0",
                "circularity timeout must be greater than zero",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DependencyGraphConfig {
    /// Maximum number of dependency levels; unlimited when absent
    pub max_depth: Option<u32>,
    pub cycle_detection_enabled: bool,
}

impl Default for DependencyGraphConfig {
    fn default() -> Self {
        Self {
            max_depth: None,
            cycle_detection_enabled: true,
        }
    }
}

impl DependencyGraphConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_depth == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "dependency_graph.max_depth",
                "0",
                "max depth must be at least 1",
            ));
        }
        Ok(())
    }
}
