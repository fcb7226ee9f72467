//! # Latched Service Controller
//!
//! Runs a set of wired [`LatchedService`]s exactly once each, in dependency order,
//! with as much parallelism as the graph and the worker limit allow.
//!
//! ## Execution
//!
//! 1. validate the graph (unknown dependencies, cycles, depth) before anything runs
//! 2. freeze every service's dependency latch, then spawn one task per service
//! 3. open the shared start gate so all services begin waiting on their dependencies
//! 4. wait for the completion gate, an interrupt, or the circularity timeout
//!
//! ## Worker limit
//!
//! `thread_pool_size` bounds how many startup *actions* run at once. A service only
//! takes a permit after its dependencies are done and gives it back as soon as its
//! action returns, so a service waiting on a dependency never occupies a worker slot.
//! A chain deeper than the pool therefore always makes progress.
//!
//! ```rust
//! use latched_services::orchestration::{service_fn, LatchedService, LatchedServiceController};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let database = LatchedService::new("database", service_fn(|| async { Ok(()) }));
//! let api = LatchedService::new("api", service_fn(|| async { Ok(()) }));
//! api.add_dependency(&database)?;
//!
//! let mut controller = LatchedServiceController::new([database.clone(), api.clone()]);
//! controller.set_thread_pool_size(1)?;
//! let report = controller.execute_services().await?;
//!
//! assert!(report.all_succeeded());
//! assert!(!api.has_failed());
//! # Ok(())
//! # }
//! ```

use crate::config::{DependencyGraphConfig, LatchedServicesConfig};
use crate::constants::{components, events, UNBOUNDED_POOL};
use crate::error::{LatchedServiceCircularityError, LatchedServiceError, LatchedServiceResult};
use crate::logging::{log_controller_operation, log_error};
use crate::orchestration::dependency_graph::DependencyGraph;
use crate::orchestration::latch::CountDownLatch;
use crate::orchestration::latched_service::{LatchedService, ServiceOutcome, ServiceRunContext};
use crate::state_machine::ServiceState;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Per-service results of a controller run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    /// One entry per service, in the order the services were given to the controller
    pub outcomes: Vec<ServiceOutcome>,
    pub elapsed_ms: u64,
    /// The run was interrupted; some services may not have reached a terminal state
    pub interrupted: bool,
}

impl ExecutionReport {
    pub fn completed(&self) -> Vec<&str> {
        self.names_in(ServiceState::Completed)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.names_in(ServiceState::Failed)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.names_in(ServiceState::Skipped)
    }

    pub fn interrupted_services(&self) -> Vec<&str> {
        self.names_in(ServiceState::Interrupted)
    }

    pub fn all_succeeded(&self) -> bool {
        !self.interrupted
            && self
                .outcomes
                .iter()
                .all(|outcome| outcome.state == ServiceState::Completed)
    }

    pub fn outcome(&self, name: &str) -> Option<&ServiceOutcome> {
        self.outcomes.iter().find(|outcome| outcome.name == name)
    }

    fn names_in(&self, state: ServiceState) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.state == state)
            .map(|outcome| outcome.name.as_str())
            .collect()
    }
}

/// Cloneable handle that interrupts a running (or not yet started) controller
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptHandle {
    /// Every service still waiting ends as interrupted and `execute_services`
    /// stops waiting. Actions already running are left to finish.
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }
}

pub struct LatchedServiceController {
    run_id: Uuid,
    services: Vec<Arc<LatchedService>>,
    thread_pool_size: Option<usize>,
    circularity_timeout: Option<Duration>,
    graph_config: DependencyGraphConfig,
    executed: AtomicBool,
    interrupt_tx: Arc<watch::Sender<bool>>,
}

impl LatchedServiceController {
    /// Controller with an unbounded worker pool and eager cycle detection
    pub fn new(services: impl IntoIterator<Item = Arc<LatchedService>>) -> Self {
        let (interrupt_tx, _) = watch::channel(false);
        Self {
            run_id: Uuid::new_v4(),
            services: services.into_iter().collect(),
            thread_pool_size: None,
            circularity_timeout: None,
            graph_config: DependencyGraphConfig::default(),
            executed: AtomicBool::new(false),
            interrupt_tx: Arc::new(interrupt_tx),
        }
    }

    pub fn with_config(
        services: impl IntoIterator<Item = Arc<LatchedService>>,
        config: &LatchedServicesConfig,
    ) -> LatchedServiceResult<Self> {
        config.validate()?;

        let mut controller = Self::new(services);
        controller.graph_config = config.dependency_graph.clone();
        controller.circularity_timeout = config.controller.circularity_timeout();
        if let Some(size) = config.controller.thread_pool_size {
            controller.set_thread_pool_size(size)?;
        }
        Ok(controller)
    }

    /// Limit how many startup actions run at once. Must be called before
    /// [`execute_services`](Self::execute_services).
    pub fn set_thread_pool_size(&mut self, size: usize) -> LatchedServiceResult<()> {
        if self.executed.load(Ordering::Acquire) {
            return Err(LatchedServiceError::AlreadyExecuted);
        }
        if size == 0 || size > Semaphore::MAX_PERMITS {
            return Err(LatchedServiceError::InvalidThreadPoolSize(size));
        }
        self.thread_pool_size = Some(size);
        Ok(())
    }

    pub fn thread_pool_size(&self) -> Option<usize> {
        self.thread_pool_size
    }

    /// Fail the run with a circularity error if it has not finished within `timeout`.
    ///
    /// Only needed when eager cycle detection is disabled.
    pub fn set_circularity_timeout(&mut self, timeout: Duration) -> LatchedServiceResult<()> {
        if self.executed.load(Ordering::Acquire) {
            return Err(LatchedServiceError::AlreadyExecuted);
        }
        self.circularity_timeout = Some(timeout);
        Ok(())
    }

    pub fn services(&self) -> &[Arc<LatchedService>] {
        &self.services
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            tx: self.interrupt_tx.clone(),
        }
    }

    /// Run every service once, in dependency order.
    ///
    /// Returns `Err` only for graph problems: an unknown dependency, a dependency
    /// cycle (found eagerly, or by the circularity timeout when eager detection is
    /// disabled) or a graph deeper than the configured limit. Service failures are
    /// reported per service in the [`ExecutionReport`] and through
    /// [`LatchedService::has_failed`]. An interrupt ends the wait early and returns
    /// a report flagged as interrupted.
    #[instrument(skip(self), fields(run_id = %self.run_id, services = self.services.len()))]
    pub async fn execute_services(&self) -> LatchedServiceResult<ExecutionReport> {
        if self.executed.swap(true, Ordering::AcqRel) {
            return Err(LatchedServiceError::AlreadyExecuted);
        }

        let run_id = self.run_id.to_string();
        let started = Instant::now();

        let graph = match DependencyGraph::analyze(&self.services, &self.graph_config) {
            Ok(graph) => graph,
            Err(e) => {
                let operation = if e.is_circularity() {
                    events::CONTROLLER_CIRCULARITY
                } else {
                    "execute_services"
                };
                log_error(components::CONTROLLER, operation, &e.to_string(), Some(&run_id));
                return Err(e);
            }
        };

        let pool = self
            .thread_pool_size
            .map_or_else(|| UNBOUNDED_POOL.to_string(), |size| size.to_string());
        log_controller_operation(
            events::CONTROLLER_STARTED,
            &run_id,
            self.services.len(),
            "started",
            Some(&format!(
                "pool={pool}, edges={}, depth={}",
                graph.edge_count,
                graph.depth()
            )),
        );

        let start_gate = Arc::new(CountDownLatch::new(1));
        let completion_gate = Arc::new(CountDownLatch::new(self.services.len()));
        let context = ServiceRunContext {
            start_gate: start_gate.clone(),
            completion_gate: completion_gate.clone(),
            execution_permits: self
                .thread_pool_size
                .map(|size| Arc::new(Semaphore::new(size))),
            interrupt: self.interrupt_tx.subscribe(),
        };

        // All latches are sized before the first task can notify anyone.
        for service in &self.services {
            service.prepare();
        }

        let handles: Vec<JoinHandle<()>> = self
            .services
            .iter()
            .map(|service| tokio::spawn(service.clone().run(context.clone())))
            .collect();

        start_gate.count_down();
        debug!(run_id = %run_id, "Start gate opened");

        let mut interrupt = self.interrupt_tx.subscribe();
        let finished = async {
            match self.circularity_timeout {
                Some(limit) => tokio::time::timeout(limit, completion_gate.wait())
                    .await
                    .is_ok(),
                None => {
                    completion_gate.wait().await;
                    true
                }
            }
        };

        let completed_in_time = tokio::select! {
            biased;
            completed = finished => completed,
            _ = interrupt.wait_for(|raised| *raised) => {
                warn!(run_id = %run_id, "Interrupted while waiting for services to finish");
                log_controller_operation(
                    events::CONTROLLER_INTERRUPTED,
                    &run_id,
                    self.services.len(),
                    "interrupted",
                    Some(&format!("{} services still running", completion_gate.count())),
                );
                return Ok(self.report(started, true));
            }
        };

        if !completed_in_time {
            return Err(self.timed_out(&run_id, &completion_gate).await.into());
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                log_error(
                    components::CONTROLLER,
                    "join_service_task",
                    &e.to_string(),
                    Some(&run_id),
                );
            }
        }

        let report = self.report(started, false);
        info!(
            run_id = %run_id,
            completed = report.completed().len(),
            failed = ?report.failed(),
            skipped = ?report.skipped(),
            elapsed_ms = report.elapsed_ms,
            "Completed {} services",
            self.services.len()
        );
        log_controller_operation(
            events::CONTROLLER_COMPLETED,
            &run_id,
            self.services.len(),
            if report.all_succeeded() { "completed" } else { "completed_with_failures" },
            Some(
                &serde_json::json!({
                    "failed": report.failed(),
                    "skipped": report.skipped(),
                    "elapsed_ms": report.elapsed_ms,
                })
                .to_string(),
            ),
        );
        Ok(report)
    }

    /// Treat the unfinished services as a cycle and release them.
    async fn timed_out(
        &self,
        run_id: &str,
        completion_gate: &CountDownLatch,
    ) -> LatchedServiceCircularityError {
        let unresolved: Vec<String> = self
            .services
            .iter()
            .filter(|service| !service.state().is_terminal())
            .map(|service| service.name().to_string())
            .collect();
        let after = self.circularity_timeout.unwrap_or_default();
        let error = LatchedServiceCircularityError::timed_out(unresolved, after);

        log_error(
            components::CONTROLLER,
            events::CONTROLLER_CIRCULARITY,
            &error.to_string(),
            Some(run_id),
        );

        // Waiting services drop out as soon as they see the interrupt.
        self.interrupt_tx.send_replace(true);
        completion_gate.wait().await;
        error
    }

    fn report(&self, started: Instant, interrupted: bool) -> ExecutionReport {
        ExecutionReport {
            run_id: self.run_id,
            outcomes: self.services.iter().map(|service| service.outcome()).collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            interrupted,
        }
    }
}

impl std::fmt::Debug for LatchedServiceController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatchedServiceController")
            .field("run_id", &self.run_id)
            .field("services", &self.services.len())
            .field("thread_pool_size", &self.thread_pool_size)
            .field("circularity_timeout", &self.circularity_timeout)
            .field("executed", &self.executed.load(Ordering::Acquire))
            .finish()
    }
}
