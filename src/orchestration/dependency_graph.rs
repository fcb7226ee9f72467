//! # Dependency Graph Analysis
//!
//! Validates the service graph before any service is released. Services are
//! identified by reference, not by name.
//!
//! - every service appears once, and every dependency must be one of the
//!   services handed to the controller
//! - with cycle detection enabled, Kahn's algorithm orders the graph into
//!   dependency levels; anything left unordered is part of, or downstream of,
//!   a cycle, and one concrete cycle is extracted for the error message
//! - when a maximum depth is configured, the number of levels must not exceed it

use crate::config::DependencyGraphConfig;
use crate::error::{LatchedServiceCircularityError, LatchedServiceError, LatchedServiceResult};
use crate::orchestration::latched_service::LatchedService;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

/// Result of analysing a service graph
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Service names grouped by level; level 0 has no dependencies and every
    /// service sits one level above its deepest dependency. Empty when cycle
    /// detection is disabled.
    pub levels: Vec<Vec<String>>,
    pub edge_count: usize,
}

impl DependencyGraph {
    pub fn analyze(
        services: &[Arc<LatchedService>],
        config: &DependencyGraphConfig,
    ) -> LatchedServiceResult<Self> {
        let mut index: HashMap<*const LatchedService, usize> =
            HashMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            // A service listed twice would run twice and count its dependents down twice.
            if index.insert(Arc::as_ptr(service), i).is_some() {
                return Err(LatchedServiceError::DuplicateService(
                    service.name().to_string(),
                ));
            }
        }

        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(services.len());
        for service in services {
            let mut resolved = Vec::new();
            for dependency in service.dependency_refs() {
                match index.get(&dependency.as_ptr()) {
                    Some(&i) => resolved.push(i),
                    None => {
                        let name = dependency
                            .upgrade()
                            .map(|d| d.name().to_string())
                            .unwrap_or_else(|| "<dropped service>".to_string());
                        return Err(LatchedServiceError::unknown_dependency(
                            service.name(),
                            name,
                        ));
                    }
                }
            }
            dependencies.push(resolved);
        }

        let edge_count = dependencies.iter().map(Vec::len).sum();
        if !config.cycle_detection_enabled {
            return Ok(Self {
                levels: Vec::new(),
                edge_count,
            });
        }

        let levels = Self::order_levels(services, &dependencies)?;

        let depth = levels.len() as u32;
        if let Some(max_depth) = config.max_depth {
            if depth > max_depth {
                return Err(LatchedServiceError::DependencyDepthExceeded { depth, max_depth });
            }
        }

        debug!(
            services = services.len(),
            edges = edge_count,
            depth = depth,
            "Dependency graph analysed"
        );

        Ok(Self { levels, edge_count })
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Kahn's algorithm over dependency edges, tracking each node's level
    fn order_levels(
        services: &[Arc<LatchedService>],
        dependencies: &[Vec<usize>],
    ) -> LatchedServiceResult<Vec<Vec<String>>> {
        let n = services.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut in_degree: Vec<usize> = vec![0; n];
        for (service, deps) in dependencies.iter().enumerate() {
            in_degree[service] = deps.len();
            for &dependency in deps {
                dependents[dependency].push(service);
            }
        }

        let mut level = vec![0usize; n];
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut ordered = 0;

        while let Some(current) = queue.pop_front() {
            ordered += 1;
            for &dependent in &dependents[current] {
                level[dependent] = level[dependent].max(level[current] + 1);
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        if ordered < n {
            let unresolved: Vec<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
            let cycle = Self::find_cycle(&unresolved, dependencies, &in_degree)
                .map(|path| path.iter().map(|&i| services[i].name().to_string()).collect());
            let names = unresolved
                .iter()
                .map(|&i| services[i].name().to_string())
                .collect();
            return Err(LatchedServiceCircularityError::eager(names, cycle).into());
        }

        let depth = level.iter().max().map_or(0, |deepest| deepest + 1);
        let mut levels = vec![Vec::new(); depth];
        for (i, service) in services.iter().enumerate() {
            levels[level[i]].push(service.name().to_string());
        }
        Ok(levels)
    }

    /// Walk unresolved dependency edges until a node repeats.
    ///
    /// Every unresolved node has at least one unresolved dependency, so the walk
    /// always closes a loop. The path reads in "depends on" order and repeats its
    /// first node at the end.
    fn find_cycle(
        unresolved: &[usize],
        dependencies: &[Vec<usize>],
        in_degree: &[usize],
    ) -> Option<Vec<usize>> {
        let start = *unresolved.first()?;
        let mut position: HashMap<usize, usize> = HashMap::new();
        let mut path = Vec::new();
        let mut current = start;

        loop {
            if let Some(&at) = position.get(&current) {
                let mut cycle = path[at..].to_vec();
                cycle.push(current);
                return Some(cycle);
            }
            position.insert(current, path.len());
            path.push(current);
            current = *dependencies[current]
                .iter()
                .find(|&&dependency| in_degree[dependency] > 0)?;
        }
    }
}
