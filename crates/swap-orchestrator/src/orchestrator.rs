//! The orchestrator facade
//!
//! `query` runs the whole pipeline: estimate, retrieve context, consult the
//! cache, route, then hand the candidates to the fallback controller. Every
//! query, served or failed, produces one record for the metrics sink.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use swap_core::{
    BackendAdapter, Config, ContextRetriever, Error, GenerationRequest, GenerationResult,
    LifecycleState, MemoryProbe, MetricsSink, ModelSpec, ModelStatus, NoContext, NullSink, OrchestratorConfig,
    OrchestratorStatus, Query, QueryOutcome, QueryRecord, Result,
};

use crate::cache::{fingerprint, ResponseCache};
use crate::cooldown::Cooldown;
use crate::estimate::estimate;
use crate::fallback::FallbackController;
use crate::ledger::Ledger;
use crate::lifecycle::LifecycleManager;
use crate::registry::Registry;
use crate::router::Router;

const EXCERPT_CHARS: usize = 120;

/// What the request layer hands over
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub text: String,
    /// Overrides the estimated difficulty
    #[serde(default)]
    pub difficulty: Option<u8>,
    #[serde(default)]
    pub specialty: Option<String>,
    /// Explicit model name
    #[serde(default)]
    pub model: Option<String>,
}

impl QueryInput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_difficulty(mut self, difficulty: u8) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

pub struct OrchestratorBuilder<A: BackendAdapter> {
    config: Config,
    adapter: Arc<A>,
    probe: Arc<dyn MemoryProbe>,
    sink: Arc<dyn MetricsSink>,
    retriever: Arc<dyn ContextRetriever>,
}

impl<A: BackendAdapter> OrchestratorBuilder<A> {
    pub fn with_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn ContextRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn build(self) -> Result<Orchestrator<A>> {
        self.config.validate()?;
        let registry = Registry::from_config(&self.config)?;
        let ledger = Arc::new(Ledger::from_config(&self.config, self.probe));
        let cooldown = Arc::new(Cooldown::new(&self.config.cooldown));
        let settings = self.config.orchestrator.clone();

        let lifecycle = LifecycleManager::new(
            self.adapter,
            Arc::clone(&ledger),
            Arc::clone(&cooldown),
            Arc::clone(&self.sink),
            settings.eviction_policy,
        );
        let fallback = FallbackController::new(
            lifecycle.clone(),
            Arc::clone(&cooldown),
            Arc::clone(&self.sink),
            settings.default_timeout(),
        );
        let cache = settings
            .cache_responses
            .then(|| ResponseCache::new(settings.cache_capacity, settings.cache_ttl()));

        info!(
            "Orchestrator ready: {} models on {} devices, remote fallback {}",
            registry.len(),
            ledger.devices().len(),
            if registry.fallback().is_some() { "on" } else { "off" }
        );

        Ok(Orchestrator {
            router: Router::new(settings.prefer_local),
            settings,
            registry: RwLock::new(Arc::new(registry)),
            fallback_spec: self.config.remote_fallback_spec(),
            ledger,
            lifecycle,
            fallback,
            cooldown,
            cache,
            sink: self.sink,
            retriever: self.retriever,
            accepting: AtomicBool::new(true),
        })
    }
}

pub struct Orchestrator<A: BackendAdapter> {
    settings: OrchestratorConfig,
    registry: RwLock<Arc<Registry>>,
    fallback_spec: Option<ModelSpec>,
    router: Router,
    ledger: Arc<Ledger>,
    lifecycle: LifecycleManager<A>,
    fallback: FallbackController<A>,
    cooldown: Arc<Cooldown>,
    cache: Option<ResponseCache>,
    sink: Arc<dyn MetricsSink>,
    retriever: Arc<dyn ContextRetriever>,
    accepting: AtomicBool,
}

impl<A: BackendAdapter> Orchestrator<A> {
    pub fn builder(config: &Config, adapter: Arc<A>, probe: Arc<dyn MemoryProbe>) -> OrchestratorBuilder<A> {
        OrchestratorBuilder {
            config: config.clone(),
            adapter,
            probe,
            sink: Arc::new(NullSink),
            retriever: Arc::new(NoContext),
        }
    }

    pub fn settings(&self) -> &OrchestratorConfig {
        &self.settings
    }

    /// Current registry snapshot
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read())
    }

    pub fn lifecycle(&self) -> &LifecycleManager<A> {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Resolve the query's difficulty and specialty
    pub fn classify(&self, input: &QueryInput) -> Query {
        let estimated = estimate(&input.text);
        let mut query = Query::new(
            input.text.clone(),
            input.difficulty.unwrap_or(estimated.difficulty),
        );
        query.specialty = input
            .specialty
            .clone()
            .or_else(|| estimated.specialty.map(str::to_string));
        query.model_override = input.model.clone();
        query
    }

    /// Candidate names for `query` against the current registry
    pub fn route(&self, query: &Query) -> Vec<String> {
        self.router
            .select(&self.registry(), query, |m| self.cooldown.is_cooling(m))
    }

    pub async fn query(&self, input: QueryInput) -> Result<GenerationResult> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        if input.text.trim().is_empty() {
            return Err(Error::invalid_request("query text is empty"));
        }

        let started = Instant::now();
        let query = self.classify(&input);
        let registry = self.registry();
        let request = self.build_request(&query).await;

        let key = self.cache.as_ref().map(|_| {
            fingerprint(
                &request,
                query.difficulty,
                query.specialty.as_deref(),
                query.model_override.as_deref(),
            )
        });
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(mut hit) = cache.get(key) {
                debug!("Cache hit for {}", query.excerpt(40));
                hit.cached = true;
                hit.latency = started.elapsed();
                self.record(&query, &hit, QueryOutcome::Cached);
                return Ok(hit);
            }
        }

        let candidates = self
            .router
            .select(&registry, &query, |m| self.cooldown.is_cooling(m));
        debug!(
            "difficulty {} specialty {:?} -> {:?}",
            query.difficulty, query.specialty, candidates
        );

        let served = match self.fallback.execute(&registry, &candidates, &request).await {
            Ok(served) => served,
            Err(e) => {
                self.record_failure(&query, &e, &registry, started.elapsed()).await;
                return Err(e);
            }
        };

        let memory = self.ledger.snapshot(served.spec.device).await;
        let result = GenerationResult {
            text: served.generation.text,
            model: served.spec.name.clone(),
            latency: started.elapsed(),
            tokens: served.generation.tokens,
            memory,
            degraded: served.rank > 0,
            cached: false,
            cost_usd: served.spec.cost_for(served.generation.tokens),
        };

        if let (Some(cache), Some(key)) = (&self.cache, key) {
            cache.insert(key, result.clone());
        }
        let outcome = if result.degraded {
            QueryOutcome::Degraded
        } else {
            QueryOutcome::Success
        };
        self.record(&query, &result, outcome);
        Ok(result)
    }

    /// Generation parameters, with retrieved context ahead of the text
    async fn build_request(&self, query: &Query) -> GenerationRequest {
        let context = match self.retriever.retrieve(&query.text).await {
            Ok(context) => context.filter(|c| !c.trim().is_empty()),
            Err(e) => {
                warn!("Context retrieval failed, continuing without: {}", e);
                None
            }
        };
        let prompt = match context {
            Some(context) => format!("{}\n\n{}", context, query.text),
            None => query.text.clone(),
        };
        GenerationRequest {
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        }
    }

    fn record(&self, query: &Query, result: &GenerationResult, outcome: QueryOutcome) {
        self.sink.record_query(&QueryRecord {
            excerpt: query.excerpt(EXCERPT_CHARS),
            model: Some(result.model.clone()),
            difficulty: query.difficulty,
            specialty: query.specialty.clone(),
            latency: result.latency,
            tokens: result.tokens,
            memory: result.memory.clone(),
            cost_usd: result.cost_usd,
            outcome,
            error: None,
            timestamp: Utc::now(),
        });
    }

    /// Failed queries name the last model tried, with its device as it
    /// stood when the query gave up
    async fn record_failure(&self, query: &Query, error: &Error, registry: &Registry, latency: Duration) {
        let last = match error {
            Error::AllCandidatesExhausted { tried } => tried.last().and_then(|name| registry.get(name)).cloned(),
            _ => None,
        };
        let memory = match &last {
            Some(spec) => self.ledger.snapshot(spec.device).await,
            None => None,
        };
        self.sink.record_query(&QueryRecord {
            excerpt: query.excerpt(EXCERPT_CHARS),
            model: last.map(|spec| spec.name.clone()),
            difficulty: query.difficulty,
            specialty: query.specialty.clone(),
            latency,
            tokens: 0,
            memory,
            cost_usd: None,
            outcome: QueryOutcome::Failed,
            error: Some(error.category().to_string()),
            timestamp: Utc::now(),
        });
    }

    /// Drain and unload `model`; false when it was known but not resident
    pub async fn unload(&self, model: &str) -> Result<bool> {
        let unloaded = self.lifecycle.unload(model).await;
        if !unloaded && !self.registry().contains(model) {
            return Err(Error::not_found(format!("model {}", model)));
        }
        Ok(unloaded)
    }

    /// Replace the catalog. Queries already routing keep the old snapshot;
    /// resident models stay until evicted or unloaded.
    pub fn reload_registry(&self, specs: Vec<ModelSpec>) -> Result<()> {
        for spec in &specs {
            if !self.ledger.admits(spec.device) {
                return Err(Error::config(format!(
                    "Model {} targets undeclared device {}",
                    spec.name, spec.device
                )));
            }
        }
        let registry = Registry::new(specs, self.fallback_spec.clone())?;
        info!("Registry reloaded with {} models", registry.len());
        *self.registry.write() = Arc::new(registry);
        if let Some(cache) = &self.cache {
            cache.clear();
        }
        Ok(())
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let registry = self.registry();
        let models = registry
            .specs()
            .map(|spec| {
                let (mut state, in_flight, last_used) = self.lifecycle.state(&spec.name);
                let health = self.cooldown.health(&spec.name);
                if state == LifecycleState::Unloaded && health.consecutive_load_failures > 0 {
                    state = LifecycleState::LoadFailed;
                }
                ModelStatus {
                    name: spec.name.clone(),
                    backend: spec.backend,
                    device: spec.device,
                    footprint_mb: spec.footprint_mb,
                    state,
                    in_flight,
                    last_used,
                    cooldown_remaining_s: health.cooldown_remaining.map(|d| d.as_secs()),
                    consecutive_load_failures: health.consecutive_load_failures,
                    generation_errors: health.generation_errors,
                    timeouts: health.timeouts,
                }
            })
            .collect();

        OrchestratorStatus {
            models,
            devices: self.ledger.snapshots().await,
            accepting: self.is_accepting(),
        }
    }

    /// Stop accepting queries and unload every resident model
    pub async fn shutdown(&self) {
        if !self.accepting.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down orchestrator");
        self.lifecycle.shutdown().await;
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }
}
