#![allow(dead_code)]

use std::sync::Arc;

use swap_core::{Config, ModelSpec, RemoteConfig};
use swap_dev::{config_with, setup_test_logging, standard_probe, MemorySink, MockBackend, MockProbe};
use swap_orchestrator::Orchestrator;

pub struct Harness {
    pub orchestrator: Orchestrator<MockBackend>,
    pub backend: MockBackend,
    pub probe: Arc<MockProbe>,
    pub sink: Arc<MemorySink>,
}

pub fn config(models: Vec<ModelSpec>, remote: Option<RemoteConfig>) -> Config {
    config_with(models, remote)
}

pub fn harness(config: Config) -> Harness {
    harness_with_probe(config, standard_probe())
}

pub fn harness_with_probe(config: Config, probe: MockProbe) -> Harness {
    setup_test_logging();
    let backend = MockBackend::new();
    let probe = Arc::new(probe);
    let sink = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::builder(&config, Arc::new(backend.clone()), probe.clone())
        .with_sink(sink.clone())
        .build()
        .expect("valid test configuration");
    Harness {
        orchestrator,
        backend,
        probe,
        sink,
    }
}
