use proptest::prelude::*;

/// A random acyclic service graph: service `i` may only depend on services `< i`
#[derive(Debug, Clone)]
pub struct GraphShape {
    pub count: usize,
    /// `(service, dependency)` pairs
    pub edges: Vec<(usize, usize)>,
    pub failing: Vec<usize>,
}

impl GraphShape {
    pub fn dependencies_of(&self, service: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(s, _)| *s == service)
            .map(|(_, d)| *d)
    }

    /// Services that fail themselves or sit downstream of a failure
    pub fn tainted(&self) -> Vec<bool> {
        let mut tainted = vec![false; self.count];
        // Dependencies always have lower indices, so one forward pass suffices.
        for service in 0..self.count {
            tainted[service] = self.failing.contains(&service)
                || self.dependencies_of(service).any(|d| tainted[d]);
        }
        tainted
    }
}

/// Strategy for acyclic graphs of 1..=max_services services
pub fn graph_shape_strategy(max_services: usize) -> impl Strategy<Value = GraphShape> {
    (1..=max_services).prop_flat_map(|count| {
        let candidate_edges: Vec<(usize, usize)> = (1..count)
            .flat_map(|service| (0..service).map(move |dependency| (service, dependency)))
            .collect();
        let edge_count = candidate_edges.len();
        (
            Just(count),
            Just(candidate_edges),
            prop::collection::vec(prop::bool::weighted(0.3), edge_count),
            prop::collection::vec(prop::bool::weighted(0.15), count),
        )
            .prop_map(|(count, candidates, keep, fail)| GraphShape {
                count,
                edges: candidates
                    .into_iter()
                    .zip(keep)
                    .filter_map(|(edge, keep)| keep.then_some(edge))
                    .collect(),
                failing: fail
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, fail)| fail.then_some(i))
                    .collect(),
            })
    })
}

/// Strategy for worker limits, `None` meaning unbounded
pub fn pool_size_strategy() -> impl Strategy<Value = Option<usize>> {
    prop_oneof![Just(None), (1usize..=4).prop_map(Some)]
}

/// Strategy for the length of a dependency cycle
pub fn cycle_length_strategy() -> impl Strategy<Value = usize> {
    1usize..=8
}
