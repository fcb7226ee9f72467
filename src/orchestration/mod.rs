//! # Orchestration Engine
//!
//! Dependency-ordered, concurrent startup of named services.
//!
//! ## Core Components
//!
//! - **LatchedService**: a unit of startup work plus its dependency edges, dependency
//!   latch and failure flag
//! - **LatchedServiceController**: validates the graph, releases every service at once
//!   and waits for all of them under a bounded worker limit
//! - **DependencyGraph**: eager unknown-dependency, cycle and depth checks
//! - **ServiceGraphBuilder**: wiring by service name
//! - **CountDownLatch**: the single-use async barrier behind the start, dependency and
//!   completion gates
//!
//! Service failures never cross service boundaries as errors. A failed action marks its
//! service failed, every transitive dependent is skipped, and the caller reads the
//! outcome per service once `execute_services` returns.

pub mod action;
pub mod controller;
pub mod dependency_graph;
pub mod graph_builder;
pub mod latch;
pub mod latched_service;

pub use action::{
    blocking_service_fn, service_fn, BlockingFnAction, FnAction, NoopAction, ServiceAction,
    ServiceActionResult,
};
pub use controller::{ExecutionReport, InterruptHandle, LatchedServiceController};
pub use dependency_graph::DependencyGraph;
pub use graph_builder::ServiceGraphBuilder;
pub use latch::CountDownLatch;
pub use latched_service::{LatchedService, ServiceOutcome};
