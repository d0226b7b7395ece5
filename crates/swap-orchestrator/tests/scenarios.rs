//! End-to-end routing, eviction and fallback scenarios

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use swap_core::config::REMOTE_FALLBACK_MODEL;
use swap_core::{ContextRetriever, DeviceId, Error, LifecycleState, QueryOutcome, Query};
use swap_dev::{large_gpu, medium_gpu, remote_section, small_local, Fault, MockBackend, MockProbe};
use swap_orchestrator::{Orchestrator, QueryInput};

use common::{config, harness, harness_with_probe};

#[tokio::test]
async fn small_local_serves_easy_query() {
    let h = harness(config(vec![small_local(), large_gpu()], Some(remote_section())));

    let query = Query::new("What is a closure?", 20);
    assert_eq!(
        h.orchestrator.route(&query),
        vec!["small-local".to_string(), REMOTE_FALLBACK_MODEL.to_string()]
    );

    let result = h
        .orchestrator
        .query(QueryInput::new("What is a closure?").with_difficulty(20))
        .await
        .unwrap();
    assert_eq!(result.model, "small-local");
    assert!(!result.degraded);
    assert!(!result.cached);
    assert_eq!(result.cost_usd, None);
    assert_eq!(result.memory.as_ref().unwrap().device, DeviceId::Cpu);
    assert!(h.sink.evicted().is_empty());
    assert_eq!(h.backend.load_calls("small-local"), 1);
    assert_eq!(h.sink.count_outcome(QueryOutcome::Success), 1);
}

#[tokio::test]
async fn large_model_evicts_medium() {
    // 14512 MB with a 512 MB margin: 9000 MB usable while medium holds 5000
    let probe = MockProbe::new()
        .with_device(DeviceId::Gpu(0), 14_512, 0)
        .with_device(DeviceId::Gpu(1), 24_000, 0)
        .with_device(DeviceId::Cpu, 64_000, 0);
    let h = harness_with_probe(config(vec![medium_gpu(), large_gpu()], None), probe);

    let warm = h
        .orchestrator
        .query(QueryInput::new("warm up").with_model("medium-gpu"))
        .await
        .unwrap();
    assert_eq!(warm.model, "medium-gpu");
    let before = h.orchestrator.ledger().snapshot(DeviceId::Gpu(0)).await.unwrap();
    assert_eq!(before.available_mb - before.safety_margin_mb, 9_000);

    let result = h
        .orchestrator
        .query(QueryInput::new("prove the theorem").with_difficulty(90))
        .await
        .unwrap();
    assert_eq!(result.model, "large-gpu");
    assert_eq!(h.sink.evicted(), vec!["medium-gpu".to_string()]);
    assert_eq!(h.backend.unload_calls("medium-gpu"), 1);
    assert_eq!(h.orchestrator.lifecycle().residents(), vec!["large-gpu".to_string()]);

    let after = h.orchestrator.ledger().snapshot(DeviceId::Gpu(0)).await.unwrap();
    assert_eq!(after.reserved_mb, 14_000);
    assert_eq!(after.residents, vec!["large-gpu".to_string()]);
}

#[tokio::test]
async fn concurrent_queries_share_one_load() {
    let h = harness(config(vec![small_local()], Some(remote_section())));
    h.backend.set_load_delay(Duration::from_millis(100));

    let (a, b) = tokio::join!(
        h.orchestrator.query(QueryInput::new("first question").with_difficulty(10)),
        h.orchestrator.query(QueryInput::new("second question").with_difficulty(10)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.model, "small-local");
    assert_eq!(b.model, "small-local");
    assert_eq!(h.backend.load_calls("small-local"), 1);
    assert_eq!(h.backend.max_live_instances("small-local"), 1);
    assert_eq!(h.backend.generate_calls("small-local"), 2);
}

#[tokio::test]
async fn failing_model_escalates_then_cools_down() {
    let h = harness(config(vec![small_local()], Some(remote_section())));

    h.backend.set_fault("small-local", Fault::Generate);
    let result = h
        .orchestrator
        .query(QueryInput::new("malformed ]]] input").with_difficulty(20))
        .await
        .unwrap();
    assert_eq!(result.model, REMOTE_FALLBACK_MODEL);
    assert!(result.degraded);
    assert!(result.cost_usd.is_some());
    assert_eq!(h.sink.count_outcome(QueryOutcome::Degraded), 1);

    // Now the model cannot even load
    assert!(h.orchestrator.unload("small-local").await.unwrap());
    h.backend.set_fault("small-local", Fault::Load);
    for _ in 0..3 {
        let result = h
            .orchestrator
            .query(QueryInput::new("another question").with_difficulty(20))
            .await
            .unwrap();
        assert_eq!(result.model, REMOTE_FALLBACK_MODEL);
    }
    assert_eq!(h.backend.load_calls("small-local"), 4);

    let query = Query::new("another question", 20);
    assert_eq!(h.orchestrator.route(&query), vec![REMOTE_FALLBACK_MODEL.to_string()]);

    h.orchestrator
        .query(QueryInput::new("skipped while cooling").with_difficulty(20))
        .await
        .unwrap();
    assert_eq!(h.backend.load_calls("small-local"), 4);

    let status = h.orchestrator.status().await;
    let model = status.model("small-local").unwrap();
    assert_eq!(model.state, LifecycleState::LoadFailed);
    assert_eq!(model.consecutive_load_failures, 3);
    assert_eq!(model.generation_errors, 1);
    assert!(model.cooldown_remaining_s.unwrap() > 0);
}

#[tokio::test]
async fn no_match_without_remote_is_exhausted() {
    let h = harness(config(vec![small_local()], None));

    let err = h
        .orchestrator
        .query(QueryInput::new("hard question").with_difficulty(95))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllCandidatesExhausted { ref tried } if tried.is_empty()));
    assert_eq!(err.to_http_status(), 503);

    let record = h.sink.last_record().unwrap();
    assert_eq!(record.outcome, QueryOutcome::Failed);
    assert_eq!(record.error.as_deref(), Some("exhausted"));
    assert_eq!(record.model, None);
    assert_eq!(h.backend.total_loads(), 0);
}

#[tokio::test]
async fn failed_query_record_names_last_model() {
    let h = harness(config(vec![small_local()], None));
    h.backend.set_fault("small-local", Fault::Load);
    h.backend.set_load_delay(Duration::from_millis(30));

    let err = h
        .orchestrator
        .query(QueryInput::new("easy one").with_difficulty(10))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AllCandidatesExhausted { ref tried } if tried == &["small-local"]));

    let record = h.sink.last_record().unwrap();
    assert_eq!(record.outcome, QueryOutcome::Failed);
    assert_eq!(record.model.as_deref(), Some("small-local"));
    assert!(record.latency >= Duration::from_millis(30));
    let memory = record.memory.unwrap();
    assert_eq!(memory.device, DeviceId::Cpu);
    assert_eq!(memory.reserved_mb, 0);
}

#[tokio::test]
async fn generation_timeout_falls_back() {
    let mut cfg = config(vec![small_local()], Some(remote_section()));
    cfg.orchestrator.default_timeout_s = 1;
    let h = harness(cfg);
    h.backend.set_fault("small-local", Fault::Hang);

    let result = h
        .orchestrator
        .query(QueryInput::new("will hang").with_difficulty(10))
        .await
        .unwrap();
    assert_eq!(result.model, REMOTE_FALLBACK_MODEL);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let status = h.orchestrator.status().await;
    let model = status.model("small-local").unwrap();
    assert_eq!(model.timeouts, 1);
    assert_eq!(model.generation_errors, 0);
    assert_eq!(model.in_flight, 0);
    assert!(model.cooldown_remaining_s.is_none());
}

#[tokio::test]
async fn cached_responses_skip_the_backend() {
    let mut cfg = config(vec![small_local()], None);
    cfg.orchestrator.cache_responses = true;
    let h = harness(cfg);

    let input = QueryInput::new("same question").with_difficulty(10);
    let first = h.orchestrator.query(input.clone()).await.unwrap();
    let second = h.orchestrator.query(input).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.text, first.text);
    assert_eq!(h.backend.generate_calls("small-local"), 1);
    assert_eq!(h.sink.count_outcome(QueryOutcome::Cached), 1);

    let other = h
        .orchestrator
        .query(QueryInput::new("same question").with_difficulty(11))
        .await
        .unwrap();
    assert!(!other.cached);
}

struct FixedContext;

#[async_trait]
impl ContextRetriever for FixedContext {
    async fn retrieve(&self, _query: &str) -> swap_core::Result<Option<String>> {
        Ok(Some("Rust was first released in 2015.".to_string()))
    }
}

#[tokio::test]
async fn retrieved_context_is_prepended() {
    let backend = MockBackend::new();
    let orchestrator = Orchestrator::builder(
        &config(vec![small_local()], None),
        Arc::new(backend.clone()),
        Arc::new(swap_dev::standard_probe()),
    )
    .with_retriever(Arc::new(FixedContext))
    .build()
    .unwrap();

    orchestrator
        .query(QueryInput::new("When was Rust released?").with_difficulty(5))
        .await
        .unwrap();
    assert_eq!(
        backend.last_prompt("small-local").unwrap(),
        "Rust was first released in 2015.\n\nWhen was Rust released?"
    );
}

#[tokio::test]
async fn estimated_difficulty_and_specialty() {
    let coder = swap_dev::test_spec(
        "coder",
        swap_core::BackendKind::AcceleratedSingle,
        DeviceId::Gpu(1),
        8_000,
        [0, 100],
    )
    .with_specialty("code")
    .with_priority(20);
    let h = harness(config(vec![small_local(), coder], None));

    let query = h
        .orchestrator
        .classify(&QueryInput::new("Why does this fn not compile?\n```rust\nfn main() {}\n```"));
    assert_eq!(query.specialty.as_deref(), Some("code"));
    assert_eq!(h.orchestrator.route(&query)[0], "coder");

    let explicit = h
        .orchestrator
        .classify(&QueryInput::new("anything").with_difficulty(77).with_specialty("math"));
    assert_eq!(explicit.difficulty, 77);
    assert_eq!(explicit.specialty.as_deref(), Some("math"));
}

#[tokio::test]
async fn reload_changes_routing() {
    let h = harness(config(vec![small_local()], None));
    assert!(h.orchestrator.route(&Query::new("q", 95)).is_empty());

    h.orchestrator
        .reload_registry(vec![small_local(), large_gpu()])
        .unwrap();
    assert_eq!(h.orchestrator.route(&Query::new("q", 95)), vec!["large-gpu".to_string()]);

    let undeclared = swap_dev::test_spec(
        "elsewhere",
        swap_core::BackendKind::BatchedGpu,
        DeviceId::Gpu(7),
        1_000,
        [0, 100],
    );
    assert!(h.orchestrator.reload_registry(vec![undeclared]).is_err());
    assert_eq!(h.orchestrator.registry().len(), 2);
}

#[tokio::test]
async fn unload_and_unknown_models() {
    let h = harness(config(vec![small_local()], None));
    h.orchestrator
        .query(QueryInput::new("hi").with_difficulty(5))
        .await
        .unwrap();

    assert!(h.orchestrator.unload("small-local").await.unwrap());
    assert!(!h.orchestrator.unload("small-local").await.unwrap());
    assert!(matches!(
        h.orchestrator.unload("nope").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(h.backend.live_instances("small-local"), 0);
}

#[tokio::test]
async fn shutdown_unloads_and_refuses() {
    let h = harness(config(vec![small_local(), medium_gpu()], None));
    h.orchestrator
        .query(QueryInput::new("a").with_difficulty(5))
        .await
        .unwrap();
    h.orchestrator
        .query(QueryInput::new("b").with_model("medium-gpu"))
        .await
        .unwrap();
    assert_eq!(h.orchestrator.status().await.resident_count(), 2);

    h.orchestrator.shutdown().await;
    let status = h.orchestrator.status().await;
    assert!(!status.accepting);
    assert_eq!(status.resident_count(), 0);
    assert!(status.devices.iter().all(|d| d.reserved_mb == 0));

    let err = h
        .orchestrator
        .query(QueryInput::new("late").with_difficulty(5))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ShuttingDown));
}

#[tokio::test]
async fn abandoned_query_keeps_generation_running() {
    let h = harness(config(vec![small_local()], None));
    h.backend.hold_generations("small-local");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.query(QueryInput::new("slow one").with_difficulty(5)),
    )
    .await;
    assert!(abandoned.is_err());

    assert_eq!(h.backend.generating("small-local"), 1);
    assert_eq!(h.orchestrator.lifecycle().state("small-local").1, 1);

    h.backend.release_generations("small-local", 1);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.backend.generating("small-local"), 0);
    assert_eq!(h.orchestrator.lifecycle().state("small-local").1, 0);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let h = harness(config(vec![small_local()], None));
    let err = h.orchestrator.query(QueryInput::new("   ")).await.unwrap_err();
    assert!(err.is_client_error());
    assert!(h.sink.records().is_empty());
}

#[tokio::test]
async fn external_memory_pressure_blocks_admission() {
    let h = harness(config(vec![medium_gpu()], Some(remote_section())));
    h.probe.set_used(DeviceId::Gpu(0), 20_000);

    let result = h
        .orchestrator
        .query(QueryInput::new("needs gpu").with_difficulty(50))
        .await
        .unwrap();
    assert_eq!(result.model, REMOTE_FALLBACK_MODEL);
    assert_eq!(h.backend.load_calls("medium-gpu"), 0);
}
