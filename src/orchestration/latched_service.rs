//! # Latched Service
//!
//! A named unit of startup work that runs only after every service it depends on
//! has finished. Each service owns:
//!
//! - its dependency list and the inverse dependents list, always updated together
//!   by [`LatchedService::add_dependency`]
//! - a [`CountDownLatch`] sized to its dependency count when scheduling begins;
//!   each finishing dependency counts it down once via
//!   [`LatchedService::notify_complete`]
//! - a monotonic failure flag: set when its own action fails or when any
//!   dependency reports failure, never cleared
//!
//! Edges are held as `Weak` references. The controller (and usually the caller)
//! owns the services, so a cyclic graph does not keep itself alive.
//!
//! ## Run sequence
//!
//! 1. wait for the controller's start gate
//! 2. wait for the dependency latch
//! 3. skip if a dependency failed, otherwise execute the action under a pool permit
//! 4. notify every dependent, then count down the controller's completion gate
//!
//! Step 4 lives in a drop guard, so it happens on every exit path including
//! interruption and cancellation of the service task.

use crate::constants::{components, events};
use crate::error::{LatchedServiceError, LatchedServiceResult, ServiceActionError};
use crate::logging::{log_error, log_service_operation};
use crate::orchestration::action::{panic_message, ServiceAction};
use crate::orchestration::latch::CountDownLatch;
use crate::state_machine::ServiceState;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};

/// Terminal (or current) status of a single service, for reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceOutcome {
    pub name: String,
    pub state: ServiceState,
    pub has_failed: bool,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Shared run state handed to every service by the controller
#[derive(Clone)]
pub(crate) struct ServiceRunContext {
    pub start_gate: Arc<CountDownLatch>,
    pub completion_gate: Arc<CountDownLatch>,
    pub execution_permits: Option<Arc<Semaphore>>,
    pub interrupt: watch::Receiver<bool>,
}

#[derive(Default)]
struct ServiceTiming {
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    duration_ms: Option<u64>,
}

pub struct LatchedService {
    name: String,
    action: Arc<dyn ServiceAction>,
    self_ref: Weak<LatchedService>,
    dependencies: Mutex<Vec<Weak<LatchedService>>>,
    dependents: Mutex<Vec<Weak<LatchedService>>>,
    dependency_latch: OnceLock<CountDownLatch>,
    started: AtomicBool,
    has_failed: AtomicBool,
    state: Mutex<ServiceState>,
    failure_reason: Mutex<Option<String>>,
    timing: Mutex<ServiceTiming>,
}

impl LatchedService {
    pub fn new(name: impl Into<String>, action: impl ServiceAction + 'static) -> Arc<Self> {
        Self::with_action(name, Arc::new(action))
    }

    pub fn with_action(name: impl Into<String>, action: Arc<dyn ServiceAction>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|self_ref| Self {
            name,
            action,
            self_ref: self_ref.clone(),
            dependencies: Mutex::new(Vec::new()),
            dependents: Mutex::new(Vec::new()),
            dependency_latch: OnceLock::new(),
            started: AtomicBool::new(false),
            has_failed: AtomicBool::new(false),
            state: Mutex::new(ServiceState::Pending),
            failure_reason: Mutex::new(None),
            timing: Mutex::new(ServiceTiming::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `dependency` as a prerequisite of this service.
    ///
    /// Also records this service as a dependent of `dependency`, so both sides of
    /// the edge exist before scheduling begins. Adding the same dependency twice is
    /// a no-op. Fails once this service has started.
    pub fn add_dependency(&self, dependency: &Arc<LatchedService>) -> LatchedServiceResult<()> {
        let mut dependencies = self.dependencies.lock();

        // Checked under the dependencies lock: `prepare` sizes the latch under the
        // same lock, so an edge can never slip in after the count was taken.
        if self.started.load(Ordering::Acquire) {
            return Err(LatchedServiceError::already_started(
                &self.name,
                dependency.name(),
            ));
        }

        let target = Arc::as_ptr(dependency);
        if dependencies.iter().any(|d| d.as_ptr() == target) {
            debug!(
                service = %self.name,
                dependency = %dependency.name(),
                "Dependency already registered"
            );
            return Ok(());
        }

        dependencies.push(Arc::downgrade(dependency));
        dependency.dependents.lock().push(self.self_ref.clone());

        debug!(
            service = %self.name,
            dependency = %dependency.name(),
            "Registered dependency"
        );
        Ok(())
    }

    /// Services this one waits for. Services that no longer exist are omitted.
    pub fn dependencies(&self) -> Vec<Arc<LatchedService>> {
        self.dependencies
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Services waiting for this one. Services that no longer exist are omitted.
    pub fn dependents(&self) -> Vec<Arc<LatchedService>> {
        self.dependents
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn dependency_count(&self) -> usize {
        self.dependencies.lock().len()
    }

    /// Raw dependency edges, including references to services that were dropped
    pub(crate) fn dependency_refs(&self) -> Vec<Weak<LatchedService>> {
        self.dependencies.lock().clone()
    }

    /// Dependencies that have not yet reported completion, once scheduling has begun
    pub fn remaining_dependencies(&self) -> Option<usize> {
        self.dependency_latch.get().map(CountDownLatch::count)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// True if this service's action failed, or it never ran because a dependency
    /// failed or it was interrupted
    pub fn has_failed(&self) -> bool {
        self.has_failed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> ServiceState {
        *self.state.lock()
    }

    pub fn failure_reason(&self) -> Option<String> {
        self.failure_reason.lock().clone()
    }

    pub fn outcome(&self) -> ServiceOutcome {
        let timing = self.timing.lock();
        ServiceOutcome {
            name: self.name.clone(),
            state: self.state(),
            has_failed: self.has_failed(),
            failure_reason: self.failure_reason(),
            started_at: timing.started_at,
            finished_at: timing.finished_at,
            duration_ms: timing.duration_ms,
        }
    }

    /// Called by a finished dependency on each of its dependents.
    ///
    /// A failed dependency marks this service as failed. Either way the
    /// dependency latch is counted down once. Rejects notifications from services
    /// that are not registered dependencies.
    pub fn notify_complete(
        &self,
        dependency: &LatchedService,
        did_fail: bool,
    ) -> LatchedServiceResult<()> {
        let target: *const LatchedService = dependency;
        let is_dependency = self
            .dependencies
            .lock()
            .iter()
            .any(|d| d.as_ptr() == target);

        if !is_dependency {
            return Err(LatchedServiceError::not_a_dependency(
                &self.name,
                dependency.name(),
            ));
        }

        if did_fail {
            self.has_failed.store(true, Ordering::Release);
            self.failure_reason.lock().get_or_insert_with(|| {
                format!("dependency '{}' failed", dependency.name())
            });
        }

        let remaining = self.prepare().count_down();
        debug!(
            service = %self.name,
            dependency = %dependency.name(),
            did_fail = did_fail,
            remaining = remaining,
            "Dependency completed"
        );
        Ok(())
    }

    /// Freeze the dependency set and size the dependency latch. Idempotent.
    pub(crate) fn prepare(&self) -> &CountDownLatch {
        self.dependency_latch.get_or_init(|| {
            let dependencies = self.dependencies.lock();
            self.started.store(true, Ordering::Release);
            self.transition(ServiceState::WaitingForStart);
            CountDownLatch::new(dependencies.len())
        })
    }

    /// Wait for the start gate and dependencies, execute or skip, then notify.
    pub(crate) async fn run(self: Arc<Self>, context: ServiceRunContext) {
        let _completion = CompletionGuard {
            service: self.clone(),
            completion_gate: context.completion_gate.clone(),
        };
        let mut interrupt = context.interrupt.clone();

        let dependency_latch = self.prepare();

        if !wait_or_interrupt(&context.start_gate, &mut interrupt).await {
            self.finish(
                ServiceState::Interrupted,
                Some("interrupted while waiting for the start gate".to_string()),
            );
            return;
        }

        self.transition(ServiceState::WaitingForDependencies);
        if !wait_or_interrupt(dependency_latch, &mut interrupt).await {
            self.finish(
                ServiceState::Interrupted,
                Some("interrupted while waiting for dependencies".to_string()),
            );
            return;
        }

        if self.has_failed() {
            self.finish(ServiceState::Skipped, None);
            return;
        }

        let _permit = match &context.execution_permits {
            Some(permits) => {
                let acquire = permits.clone().acquire_owned();
                tokio::select! {
                    permit = acquire => match permit {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            self.finish(
                                ServiceState::Interrupted,
                                Some(format!("worker pool closed: {e}")),
                            );
                            return;
                        }
                    },
                    _ = interrupted(&mut interrupt) => {
                        self.finish(
                            ServiceState::Interrupted,
                            Some("interrupted while waiting for a worker".to_string()),
                        );
                        return;
                    }
                }
            }
            None => None,
        };

        self.execute().await;
    }

    async fn execute(&self) {
        self.transition(ServiceState::Running);
        self.timing.lock().started_at = Some(Utc::now());
        let started = Instant::now();

        let action = self.action.clone();
        let result = tokio::spawn(async move { action.execute_service().await }).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        self.timing.lock().duration_ms = Some(duration_ms);

        match result {
            Ok(Ok(())) => self.finish(ServiceState::Completed, None),
            Ok(Err(e)) => self.fail_with(&e),
            Err(join_error) if join_error.is_panic() => {
                let message = panic_message(join_error.into_panic());
                self.fail_with(&ServiceActionError::new(format!(
                    "startup action panicked: {message}"
                )));
            }
            Err(join_error) => {
                self.fail_with(&ServiceActionError::new(format!(
                    "startup action was cancelled: {join_error}"
                )));
            }
        }
    }

    fn fail_with(&self, error: &ServiceActionError) {
        log_error(
            components::LATCHED_SERVICE,
            "execute_service",
            &error.to_string(),
            Some(&self.name),
        );
        self.finish(ServiceState::Failed, Some(error.to_string()));
    }

    /// Record a terminal state and log it
    fn finish(&self, state: ServiceState, reason: Option<String>) {
        if state.is_failure() {
            self.has_failed.store(true, Ordering::Release);
        }
        if let Some(reason) = reason {
            *self.failure_reason.lock() = Some(reason);
        }
        self.timing.lock().finished_at = Some(Utc::now());
        self.transition(state);

        let reason = self.failure_reason();
        let duration_ms = self.timing.lock().duration_ms;
        match state {
            ServiceState::Completed => {
                log_service_operation(
                    events::SERVICE_COMPLETED,
                    &self.name,
                    "completed",
                    duration_ms,
                    None,
                );
            }
            ServiceState::Failed => {
                error!(service = %self.name, reason = ?reason, "Service failed");
                log_service_operation(
                    events::SERVICE_FAILED,
                    &self.name,
                    "failed",
                    duration_ms,
                    reason.as_deref(),
                );
            }
            ServiceState::Skipped => {
                warn!(
                    service = %self.name,
                    reason = ?reason,
                    "Service not started due to upstream failure"
                );
                log_service_operation(
                    events::SERVICE_SKIPPED,
                    &self.name,
                    "skipped",
                    None,
                    reason.as_deref(),
                );
            }
            ServiceState::Interrupted => {
                warn!(service = %self.name, reason = ?reason, "Service interrupted");
                log_service_operation(
                    events::SERVICE_INTERRUPTED,
                    &self.name,
                    "interrupted",
                    None,
                    reason.as_deref(),
                );
            }
            _ => {}
        }
    }

    fn transition(&self, next: ServiceState) {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
        } else if *state != next {
            debug!(
                service = %self.name,
                from = %*state,
                to = %next,
                "Ignoring out-of-order state transition"
            );
        }
    }

    fn notify_dependents(&self) {
        let did_fail = self.has_failed();
        for dependent in self.dependents() {
            if let Err(e) = dependent.notify_complete(self, did_fail) {
                log_error(
                    components::LATCHED_SERVICE,
                    "notify_complete",
                    &e.to_string(),
                    Some(&self.name),
                );
            }
        }
    }
}

impl fmt::Debug for LatchedService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LatchedService")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("has_failed", &self.has_failed())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

/// Notifies dependents and counts down the completion gate exactly once, on drop
struct CompletionGuard {
    service: Arc<LatchedService>,
    completion_gate: Arc<CountDownLatch>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        let state = self.service.state();
        if !state.is_terminal() {
            let terminal = if state == ServiceState::Running {
                ServiceState::Failed
            } else {
                ServiceState::Interrupted
            };
            self.service.finish(
                terminal,
                Some("service task ended before reaching a terminal state".to_string()),
            );
        }
        self.service.notify_dependents();
        self.completion_gate.count_down();
    }
}

/// Resolves once the interrupt flag is raised or the controller is gone
async fn interrupted(interrupt: &mut watch::Receiver<bool>) {
    let _ = interrupt.wait_for(|raised| *raised).await;
}

/// Returns false if interrupted before the latch opened
async fn wait_or_interrupt(latch: &CountDownLatch, interrupt: &mut watch::Receiver<bool>) -> bool {
    if *interrupt.borrow() {
        return false;
    }
    tokio::select! {
        biased;
        _ = latch.wait() => true,
        _ = interrupted(interrupt) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::action::{service_fn, NoopAction};

    #[test]
    fn test_add_dependency_wires_both_directions() {
        let database = LatchedService::new("database", NoopAction);
        let cache = LatchedService::new("cache", NoopAction);

        cache.add_dependency(&database).unwrap();

        let deps = cache.dependencies();
        assert_eq!(deps.len(), 1);
        assert!(Arc::ptr_eq(&deps[0], &database));

        let dependents = database.dependents();
        assert_eq!(dependents.len(), 1);
        assert!(Arc::ptr_eq(&dependents[0], &cache));
    }

    #[test]
    fn test_duplicate_dependency_is_ignored() {
        let a = LatchedService::new("a", NoopAction);
        let b = LatchedService::new("b", NoopAction);
        b.add_dependency(&a).unwrap();
        b.add_dependency(&a).unwrap();
        assert_eq!(b.dependency_count(), 1);
        assert_eq!(a.dependents().len(), 1);
    }

    #[test]
    fn test_add_dependency_after_start_is_rejected() {
        let a = LatchedService::new("a", NoopAction);
        let b = LatchedService::new("b", NoopAction);
        b.prepare();

        let err = b.add_dependency(&a).unwrap_err();
        assert!(matches!(err, LatchedServiceError::AlreadyStarted { .. }));
        assert_eq!(b.dependency_count(), 0);
        assert!(a.dependents().is_empty());
    }

    #[test]
    fn test_notify_from_non_dependency_is_rejected() {
        let a = LatchedService::new("a", NoopAction);
        let stranger = LatchedService::new("stranger", NoopAction);

        let err = a.notify_complete(&stranger, false).unwrap_err();
        assert!(matches!(err, LatchedServiceError::NotADependency { .. }));
        assert!(!a.has_failed());
    }

    #[test]
    fn test_same_name_is_not_the_same_service() {
        let real = LatchedService::new("plugin", NoopAction);
        let impostor = LatchedService::new("plugin", NoopAction);
        let dependent = LatchedService::new("dependent", NoopAction);
        dependent.add_dependency(&real).unwrap();

        assert!(dependent.notify_complete(&impostor, false).is_err());
        assert!(dependent.notify_complete(&real, false).is_ok());
    }

    #[test]
    fn test_failure_notification_is_monotonic() {
        let a = LatchedService::new("a", NoopAction);
        let b = LatchedService::new("b", NoopAction);
        let c = LatchedService::new("c", NoopAction);
        c.add_dependency(&a).unwrap();
        c.add_dependency(&b).unwrap();
        c.prepare();

        c.notify_complete(&a, true).unwrap();
        assert!(c.has_failed());
        assert_eq!(c.remaining_dependencies(), Some(1));

        c.notify_complete(&b, false).unwrap();
        assert!(c.has_failed());
        assert_eq!(c.remaining_dependencies(), Some(0));
        assert_eq!(c.failure_reason().as_deref(), Some("dependency 'a' failed"));
    }

    #[test]
    fn test_prepare_sizes_latch_from_current_dependencies() {
        let a = LatchedService::new("a", NoopAction);
        let b = LatchedService::new("b", NoopAction);
        let c = LatchedService::new("c", NoopAction);
        assert_eq!(c.remaining_dependencies(), None);

        c.add_dependency(&a).unwrap();
        c.add_dependency(&b).unwrap();
        c.prepare();

        assert!(c.is_started());
        assert_eq!(c.remaining_dependencies(), Some(2));
        assert_eq!(c.state(), ServiceState::WaitingForStart);
    }

    #[test]
    fn test_dropped_dependency_is_not_kept_alive() {
        let dependent = LatchedService::new("dependent", NoopAction);
        {
            let transient = LatchedService::new("transient", NoopAction);
            dependent.add_dependency(&transient).unwrap();
        }
        assert!(dependent.dependencies().is_empty());
        assert_eq!(dependent.dependency_count(), 1);
    }

    fn context(
        start_gate: &Arc<CountDownLatch>,
        completion_gate: &Arc<CountDownLatch>,
        interrupt: &watch::Sender<bool>,
    ) -> ServiceRunContext {
        ServiceRunContext {
            start_gate: start_gate.clone(),
            completion_gate: completion_gate.clone(),
            execution_permits: None,
            interrupt: interrupt.subscribe(),
        }
    }

    #[tokio::test]
    async fn test_run_executes_and_notifies() {
        let start_gate = Arc::new(CountDownLatch::new(1));
        let completion_gate = Arc::new(CountDownLatch::new(2));
        let (interrupt, _) = watch::channel(false);

        let a = LatchedService::new("a", NoopAction);
        let b = LatchedService::new("b", NoopAction);
        b.add_dependency(&a).unwrap();
        a.prepare();
        b.prepare();

        let hb = tokio::spawn(b.clone().run(context(&start_gate, &completion_gate, &interrupt)));
        let ha = tokio::spawn(a.clone().run(context(&start_gate, &completion_gate, &interrupt)));
        start_gate.count_down();
        ha.await.unwrap();
        hb.await.unwrap();

        assert!(completion_gate.is_open());
        assert_eq!(a.state(), ServiceState::Completed);
        assert_eq!(b.state(), ServiceState::Completed);
        assert!(!b.has_failed());
        assert!(a.outcome().duration_ms.is_some());
    }

    #[tokio::test]
    async fn test_failed_action_skips_dependent() {
        let start_gate = Arc::new(CountDownLatch::new(1));
        let completion_gate = Arc::new(CountDownLatch::new(2));
        let (interrupt, _) = watch::channel(false);

        let a = LatchedService::new(
            "a",
            service_fn(|| async { Err(ServiceActionError::new("port in use")) }),
        );
        let b = LatchedService::new("b", NoopAction);
        b.add_dependency(&a).unwrap();
        a.prepare();
        b.prepare();

        let ha = tokio::spawn(a.clone().run(context(&start_gate, &completion_gate, &interrupt)));
        let hb = tokio::spawn(b.clone().run(context(&start_gate, &completion_gate, &interrupt)));
        start_gate.count_down();
        ha.await.unwrap();
        hb.await.unwrap();

        assert_eq!(a.state(), ServiceState::Failed);
        assert_eq!(a.failure_reason().as_deref(), Some("port in use"));
        assert_eq!(b.state(), ServiceState::Skipped);
        assert!(b.has_failed());
        assert!(b.outcome().started_at.is_none());
    }

    #[tokio::test]
    async fn test_interrupt_while_waiting_for_start_gate() {
        let start_gate = Arc::new(CountDownLatch::new(1));
        let completion_gate = Arc::new(CountDownLatch::new(1));
        let (interrupt, _) = watch::channel(false);

        let a = LatchedService::new("a", NoopAction);
        a.prepare();
        let handle = tokio::spawn(a.clone().run(context(&start_gate, &completion_gate, &interrupt)));
        interrupt.send_replace(true);
        handle.await.unwrap();

        assert_eq!(a.state(), ServiceState::Interrupted);
        assert!(a.has_failed());
        assert_eq!(
            a.failure_reason().as_deref(),
            Some("interrupted while waiting for the start gate")
        );
        assert!(completion_gate.is_open());
    }

    #[tokio::test]
    async fn test_interrupt_while_waiting_for_dependencies() {
        let start_gate = Arc::new(CountDownLatch::new(0));
        let completion_gate = Arc::new(CountDownLatch::new(1));
        let (interrupt, _) = watch::channel(false);

        let never_runs = LatchedService::new("never_runs", NoopAction);
        let waiting = LatchedService::new("waiting", NoopAction);
        waiting.add_dependency(&never_runs).unwrap();
        waiting.prepare();

        let handle = tokio::spawn(
            waiting
                .clone()
                .run(context(&start_gate, &completion_gate, &interrupt)),
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(waiting.state(), ServiceState::WaitingForDependencies);

        interrupt.send_replace(true);
        handle.await.unwrap();
        assert_eq!(
            waiting.failure_reason().as_deref(),
            Some("interrupted while waiting for dependencies")
        );
        assert!(completion_gate.is_open());
    }

    #[tokio::test]
    async fn test_panicking_action_is_contained() {
        let start_gate = Arc::new(CountDownLatch::new(0));
        let completion_gate = Arc::new(CountDownLatch::new(1));
        let (interrupt, _) = watch::channel(false);

        struct PanickingAction;

        #[async_trait::async_trait]
        impl ServiceAction for PanickingAction {
            async fn execute_service(&self) -> crate::orchestration::action::ServiceActionResult {
                panic!("plugin descriptor missing")
            }
        }

        let a = LatchedService::new("a", PanickingAction);
        a.prepare();
        tokio::spawn(a.clone().run(context(&start_gate, &completion_gate, &interrupt)))
            .await
            .unwrap();

        assert_eq!(a.state(), ServiceState::Failed);
        assert!(a
            .failure_reason()
            .unwrap()
            .contains("plugin descriptor missing"));
        assert!(completion_gate.is_open());
    }
}
