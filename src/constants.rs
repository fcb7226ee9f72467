//! # System Constants
//!
//! Operation names used in structured log records and the component names
//! used when reporting errors.

/// Service and controller lifecycle operations
pub mod events {
    // Service lifecycle
    pub const SERVICE_COMPLETED: &str = "service.completed";
    pub const SERVICE_FAILED: &str = "service.failed";
    pub const SERVICE_SKIPPED: &str = "service.skipped";
    pub const SERVICE_INTERRUPTED: &str = "service.interrupted";

    // Controller lifecycle
    pub const CONTROLLER_STARTED: &str = "controller.started";
    pub const CONTROLLER_COMPLETED: &str = "controller.completed";
    pub const CONTROLLER_INTERRUPTED: &str = "controller.interrupted";
    pub const CONTROLLER_CIRCULARITY: &str = "controller.circularity";
}

pub mod components {
    pub const LATCHED_SERVICE: &str = "latched_service";
    pub const CONTROLLER: &str = "latched_service_controller";
}

/// Label reported for an unbounded worker pool
pub const UNBOUNDED_POOL: &str = "unbounded";
