use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a latched service within one controller run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Created and possibly wired, not yet handed to a running controller
    #[default]
    Pending,
    /// Scheduled, waiting for the controller's start gate
    WaitingForStart,
    /// Released, waiting for every dependency to report completion
    WaitingForDependencies,
    /// Startup action is executing
    Running,
    /// Startup action returned successfully
    Completed,
    /// Startup action returned an error or panicked
    Failed,
    /// Never executed because a dependency failed
    Skipped,
    /// Interrupted while waiting, never executed
    Interrupted,
}

impl ServiceState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Interrupted
        )
    }

    /// Terminal states that dependents must treat as failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped | Self::Interrupted)
    }

    /// Check if this is a waiting state (service holds no execution permit)
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::WaitingForStart | Self::WaitingForDependencies)
    }

    /// Whether moving from `self` to `next` follows the service lifecycle
    pub fn can_transition_to(&self, next: ServiceState) -> bool {
        use ServiceState::*;
        match (self, next) {
            (Pending, WaitingForStart) => true,
            (WaitingForStart, WaitingForDependencies) => true,
            (WaitingForDependencies, Running) => true,
            (WaitingForDependencies, Skipped) => true,
            (Running, Completed) | (Running, Failed) => true,
            (WaitingForStart, Interrupted) | (WaitingForDependencies, Interrupted) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::WaitingForStart => write!(f, "waiting_for_start"),
            Self::WaitingForDependencies => write!(f, "waiting_for_dependencies"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

impl std::str::FromStr for ServiceState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "waiting_for_start" => Ok(Self::WaitingForStart),
            "waiting_for_dependencies" => Ok(Self::WaitingForDependencies),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "interrupted" => Ok(Self::Interrupted),
            _ => Err(format!("Invalid service state: {s}")),
        }
    }
}
