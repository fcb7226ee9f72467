//! Recording actions and graph helpers shared by the integration tests

use latched_services::{service_fn, LatchedService, ServiceAction, ServiceActionError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

/// Shared record of action start/finish events plus a live concurrency gauge
#[derive(Debug, Default)]
pub struct ExecutionLog {
    events: Mutex<Vec<Event>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ExecutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Names in the order their actions started
    pub fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Started(name) => Some(name.clone()),
                Event::Finished(_) => None,
            })
            .collect()
    }

    pub fn run_count(&self, name: &str) -> usize {
        self.started().iter().filter(|n| n.as_str() == name).count()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    /// True if `dependency` finished before `service` started
    pub fn finished_before_started(&self, dependency: &str, service: &str) -> bool {
        match (
            self.position(&Event::Finished(dependency.to_string())),
            self.position(&Event::Started(service.to_string())),
        ) {
            (Some(finished), Some(started)) => finished < started,
            _ => false,
        }
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self, name: &str) {
        self.events.lock().push(Event::Started(name.to_string()));
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
    }

    fn exit(&self, name: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.events.lock().push(Event::Finished(name.to_string()));
    }
}

/// Action that records itself in `log`, sleeps for `delay` and then succeeds or fails
pub fn recording_action(
    log: &Arc<ExecutionLog>,
    name: &str,
    fail: bool,
    delay: Duration,
) -> impl ServiceAction + 'static {
    let log = log.clone();
    let name = name.to_string();
    service_fn(move || {
        let log = log.clone();
        let name = name.clone();
        async move {
            log.enter(&name);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            log.exit(&name);
            if fail {
                Err(ServiceActionError::new(format!("{name} failed to start")))
            } else {
                Ok(())
            }
        }
    })
}

pub fn recording_service(log: &Arc<ExecutionLog>, name: &str) -> Arc<LatchedService> {
    LatchedService::new(name, recording_action(log, name, false, Duration::ZERO))
}

pub fn failing_service(log: &Arc<ExecutionLog>, name: &str) -> Arc<LatchedService> {
    LatchedService::new(name, recording_action(log, name, true, Duration::ZERO))
}

pub fn slow_service(log: &Arc<ExecutionLog>, name: &str, delay: Duration) -> Arc<LatchedService> {
    LatchedService::new(name, recording_action(log, name, false, delay))
}

/// Build services `0..count` named by index and wire `(service, dependency)` edges
pub fn build_graph(
    log: &Arc<ExecutionLog>,
    count: usize,
    edges: &[(usize, usize)],
    failing: &[usize],
) -> Vec<Arc<LatchedService>> {
    let services: Vec<Arc<LatchedService>> = (0..count)
        .map(|i| {
            let name = i.to_string();
            if failing.contains(&i) {
                failing_service(log, &name)
            } else {
                recording_service(log, &name)
            }
        })
        .collect();
    for &(service, dependency) in edges {
        services[service]
            .add_dependency(&services[dependency])
            .expect("wiring before execution");
    }
    services
}

pub fn by_name(services: &[Arc<LatchedService>]) -> HashMap<String, Arc<LatchedService>> {
    services
        .iter()
        .map(|s| (s.name().to_string(), s.clone()))
        .collect()
}
