use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use latched_services::orchestration::NoopAction;
use latched_services::{LatchedService, LatchedServiceController};
use std::sync::Arc;

fn wide_graph(width: usize) -> Vec<Arc<LatchedService>> {
    let root = LatchedService::new("root", NoopAction);
    let mut services = vec![root.clone()];
    for i in 0..width {
        let service = LatchedService::new(format!("leaf-{i}"), NoopAction);
        service.add_dependency(&root).expect("fresh service");
        services.push(service);
    }
    services
}

fn deep_graph(depth: usize) -> Vec<Arc<LatchedService>> {
    let mut services: Vec<Arc<LatchedService>> = Vec::with_capacity(depth);
    for i in 0..depth {
        let service = LatchedService::new(format!("link-{i}"), NoopAction);
        if let Some(previous) = services.last() {
            service.add_dependency(previous).expect("fresh service");
        }
        services.push(service);
    }
    services
}

fn benchmark_scheduling(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let mut group = c.benchmark_group("execute_services");

    for size in [16usize, 256] {
        for pool in [None, Some(4)] {
            let label = pool.map_or_else(|| "unbounded".to_string(), |p| format!("pool{p}"));

            group.bench_with_input(BenchmarkId::new(format!("wide/{label}"), size), &size, |b, &size| {
                b.iter(|| {
                    let mut controller = LatchedServiceController::new(wide_graph(size));
                    if let Some(p) = pool {
                        controller.set_thread_pool_size(p).expect("valid pool size");
                    }
                    runtime.block_on(controller.execute_services()).expect("acyclic")
                })
            });

            group.bench_with_input(BenchmarkId::new(format!("deep/{label}"), size), &size, |b, &depth| {
                b.iter(|| {
                    let mut controller = LatchedServiceController::new(deep_graph(depth));
                    if let Some(p) = pool {
                        controller.set_thread_pool_size(p).expect("valid pool size");
                    }
                    runtime.block_on(controller.execute_services()).expect("acyclic")
                })
            });
        }
    }
    group.finish();
}

fn benchmark_graph_analysis(c: &mut Criterion) {
    use latched_services::config::DependencyGraphConfig;
    use latched_services::orchestration::DependencyGraph;

    let services = wide_graph(1024);
    let config = DependencyGraphConfig::default();
    c.bench_function("dependency_graph_analyze_wide_1024", |b| {
        b.iter(|| DependencyGraph::analyze(&services, &config).expect("acyclic"))
    });
}

criterion_group!(benches, benchmark_scheduling, benchmark_graph_analysis);
criterion_main!(benches);
