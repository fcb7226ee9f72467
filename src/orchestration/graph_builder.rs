//! # Service Graph Builder
//!
//! Name-keyed wiring for callers that describe their startup graph as a map of
//! service names to dependency names (a plugin manifest, a YAML section) rather
//! than holding the [`LatchedService`] handles themselves.

use crate::config::LatchedServicesConfig;
use crate::error::{LatchedServiceError, LatchedServiceResult};
use crate::orchestration::action::ServiceAction;
use crate::orchestration::controller::LatchedServiceController;
use crate::orchestration::latched_service::LatchedService;
use std::collections::HashMap;
use std::sync::Arc;

/// Registers services by name and wires them by name.
///
/// ```rust
/// use latched_services::orchestration::{NoopAction, ServiceGraphBuilder};
///
/// # tokio_test::block_on(async {
/// let mut graph = ServiceGraphBuilder::new();
/// graph.add_service("database", NoopAction)?;
/// graph.add_service("web", NoopAction)?;
/// graph.add_dependency("web", "database")?;
///
/// let report = graph.build().execute_services().await?;
/// assert_eq!(report.completed(), vec!["database", "web"]);
/// # Ok::<(), latched_services::LatchedServiceError>(())
/// # }).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct ServiceGraphBuilder {
    services: Vec<Arc<LatchedService>>,
    by_name: HashMap<String, usize>,
}

impl ServiceGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_service(
        &mut self,
        name: impl Into<String>,
        action: impl ServiceAction + 'static,
    ) -> LatchedServiceResult<Arc<LatchedService>> {
        self.add_service_with_action(name, Arc::new(action))
    }

    pub fn add_service_with_action(
        &mut self,
        name: impl Into<String>,
        action: Arc<dyn ServiceAction>,
    ) -> LatchedServiceResult<Arc<LatchedService>> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(LatchedServiceError::DuplicateService(name));
        }

        let service = LatchedService::with_action(name.clone(), action);
        self.by_name.insert(name, self.services.len());
        self.services.push(service.clone());
        Ok(service)
    }

    /// Make `service` wait for `dependency`. Both must already be registered.
    pub fn add_dependency(&mut self, service: &str, dependency: &str) -> LatchedServiceResult<()> {
        let dependent = self.require(service)?;
        let dependency = self.require(dependency)?;
        dependent.add_dependency(&dependency)
    }

    pub fn add_dependencies<I, S>(&mut self, service: &str, dependencies: I) -> LatchedServiceResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for dependency in dependencies {
            self.add_dependency(service, dependency.as_ref())?;
        }
        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<Arc<LatchedService>> {
        self.by_name.get(name).map(|&i| self.services[i].clone())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Controller over every registered service, in registration order
    pub fn build(self) -> LatchedServiceController {
        LatchedServiceController::new(self.services)
    }

    pub fn build_with_config(
        self,
        config: &LatchedServicesConfig,
    ) -> LatchedServiceResult<LatchedServiceController> {
        LatchedServiceController::with_config(self.services, config)
    }

    fn require(&self, name: &str) -> LatchedServiceResult<Arc<LatchedService>> {
        self.service(name)
            .ok_or_else(|| LatchedServiceError::UnknownService(name.to_string()))
    }
}
