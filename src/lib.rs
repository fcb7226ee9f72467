#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Latched Services
//!
//! Dependency-graph-driven concurrent startup scheduler.
//!
//! ## Overview
//!
//! Given a set of named services, each depending on zero or more others in the set,
//! run every service's startup action exactly once and only after all of its
//! dependencies have finished. A failed service causes its dependents to be skipped
//! rather than run, dependency cycles are rejected, and concurrency is bounded by a
//! worker limit that can never deadlock on a deep chain.
//!
//! ## Module Organization
//!
//! - [`orchestration`] - Services, the controller and graph analysis
//! - [`state_machine`] - Per-service lifecycle states
//! - [`config`] - YAML configuration with environment overrides
//! - [`error`] - Wiring, graph and action errors
//! - [`logging`] - Structured console and file logging
//!
//! ## Quick Start
//!
//! ```rust
//! use latched_services::{service_fn, ServiceGraphBuilder};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = ServiceGraphBuilder::new();
//! graph.add_service("database", service_fn(|| async { Ok(()) }))?;
//! graph.add_service("search-index", service_fn(|| async { Ok(()) }))?;
//! graph.add_service("web", service_fn(|| async { Ok(()) }))?;
//! graph.add_dependencies("web", ["database", "search-index"])?;
//!
//! let mut controller = graph.build();
//! controller.set_thread_pool_size(2)?;
//! let report = controller.execute_services().await?;
//! assert!(report.all_succeeded());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod orchestration;
pub mod state_machine;

pub use config::{
    ConfigManager, ConfigurationError, ControllerConfig, DependencyGraphConfig,
    LatchedServicesConfig,
};
pub use error::{
    CircularityDetection, LatchedServiceCircularityError, LatchedServiceError,
    LatchedServiceResult, ServiceActionError,
};
pub use orchestration::{
    blocking_service_fn, service_fn, ExecutionReport, InterruptHandle, LatchedService,
    LatchedServiceController, ServiceAction, ServiceGraphBuilder, ServiceOutcome,
};
pub use state_machine::ServiceState;
