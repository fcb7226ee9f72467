//! Error types for the latched service scheduler.
//!
//! Two families live here. [`LatchedServiceError`] covers contract violations
//! raised synchronously to whoever wires or drives the graph. [`ServiceActionError`]
//! is what a service's own startup action returns; it is contained by the unit
//! that raised it and turned into failed state, never propagated.

use crate::config::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type LatchedServiceResult<T> = std::result::Result<T, LatchedServiceError>;

#[derive(Debug, Error)]
pub enum LatchedServiceError {
    /// A dependency was added after the service had been handed to a running controller
    #[error("Cannot add dependency '{dependency}' to service '{service}': service has already started")]
    AlreadyStarted { service: String, dependency: String },

    /// A completion notification arrived from a service that is not a registered dependency
    #[error("Service '{dependency}' is not a dependency of service '{service}'")]
    NotADependency { service: String, dependency: String },

    /// A dependency references a service that was not handed to the controller
    #[error("Service '{service}' depends on '{dependency}', which is not part of this run")]
    UnknownDependency { service: String, dependency: String },

    #[error("Unknown service '{0}'")]
    UnknownService(String),

    #[error("Service '{0}' is already registered")]
    DuplicateService(String),

    #[error(transparent)]
    Circularity(#[from] LatchedServiceCircularityError),

    #[error("Dependency depth {depth} exceeds configured maximum of {max_depth}")]
    DependencyDepthExceeded { depth: u32, max_depth: u32 },

    #[error("Services have already been executed by this controller")]
    AlreadyExecuted,

    #[error("Invalid thread pool size {0}: must be greater than zero")]
    InvalidThreadPoolSize(usize),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl LatchedServiceError {
    pub fn already_started(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::AlreadyStarted {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    pub fn not_a_dependency(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::NotADependency {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    pub fn unknown_dependency(service: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            service: service.into(),
            dependency: dependency.into(),
        }
    }

    /// True for errors caused by wiring the graph incorrectly
    pub fn is_wiring_error(&self) -> bool {
        matches!(
            self,
            Self::AlreadyStarted { .. }
                | Self::NotADependency { .. }
                | Self::UnknownDependency { .. }
                | Self::UnknownService(_)
                | Self::DuplicateService(_)
        )
    }

    pub fn is_circularity(&self) -> bool {
        matches!(self, Self::Circularity(_))
    }
}

/// How a dependency cycle was discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircularityDetection {
    /// Found by graph analysis before any service was released
    Eager,
    /// Inferred because the run did not finish within the given timeout
    Timeout(Duration),
}

impl fmt::Display for CircularityDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eager => write!(f, "dependency analysis"),
            Self::Timeout(after) => write!(f, "no completion after {}ms", after.as_millis()),
        }
    }
}

/// A set of services that can never be released because they wait on each other.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct LatchedServiceCircularityError {
    /// Services that could not be ordered (the cycle plus anything downstream of it)
    pub unresolved: Vec<String>,
    /// One concrete cycle, first element repeated at the end (`a -> b -> a`)
    pub cycle: Option<Vec<String>>,
    pub detection: CircularityDetection,
}

impl LatchedServiceCircularityError {
    pub fn eager(unresolved: Vec<String>, cycle: Option<Vec<String>>) -> Self {
        Self {
            unresolved,
            cycle,
            detection: CircularityDetection::Eager,
        }
    }

    pub fn timed_out(unresolved: Vec<String>, after: Duration) -> Self {
        Self {
            unresolved,
            cycle: None,
            detection: CircularityDetection::Timeout(after),
        }
    }
}

impl fmt::Display for LatchedServiceCircularityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circular dependency detected by {}", self.detection)?;
        if let Some(cycle) = &self.cycle {
            write!(f, ": {}", cycle.join(" -> "))?;
        }
        write!(f, " (unresolved services: [{}])", self.unresolved.join(", "))
    }
}

/// Failure reported by a service's own startup action.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ServiceActionError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ServiceActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn from_source(source: impl Into<anyhow::Error>) -> Self {
        let source: anyhow::Error = source.into();
        Self {
            message: format!("{source:#}"),
            source: Some(source.into()),
        }
    }

    pub fn with_context(message: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        let source: anyhow::Error = source.into();
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for ServiceActionError {
    fn from(error: anyhow::Error) -> Self {
        Self::from_source(error)
    }
}
