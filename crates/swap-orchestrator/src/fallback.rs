//! Fallback controller
//!
//! Walks the router's candidates in order. Each model is tried at most
//! once; admission, load, generation and timeout failures move on to the
//! next candidate. Only running out of candidates fails the query.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use swap_core::{BackendAdapter, Error, Generation, GenerationRequest, LifecycleEvent, MetricsSink, ModelSpec, Result};

use crate::cooldown::Cooldown;
use crate::lifecycle::LifecycleManager;
use crate::registry::Registry;

/// A generation and the candidate that produced it
#[derive(Debug, Clone)]
pub struct Served {
    pub generation: Generation,
    pub spec: Arc<ModelSpec>,
    /// Position in the candidate list
    pub rank: usize,
}

impl Served {
    pub fn degraded(&self) -> bool {
        self.rank > 0
    }
}

pub struct FallbackController<A: BackendAdapter> {
    lifecycle: LifecycleManager<A>,
    cooldown: Arc<Cooldown>,
    sink: Arc<dyn MetricsSink>,
    timeout: Duration,
}

impl<A: BackendAdapter> FallbackController<A> {
    pub fn new(
        lifecycle: LifecycleManager<A>,
        cooldown: Arc<Cooldown>,
        sink: Arc<dyn MetricsSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            lifecycle,
            cooldown,
            sink,
            timeout,
        }
    }

    pub async fn execute(
        &self,
        registry: &Registry,
        candidates: &[String],
        request: &GenerationRequest,
    ) -> Result<Served> {
        let mut tried = Vec::new();
        let mut seen = HashSet::new();

        for (rank, name) in candidates.iter().enumerate() {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let Some(spec) = registry.get(name) else {
                warn!("Candidate {} is not in the registry, skipping", name);
                continue;
            };
            tried.push(name.clone());

            match self.attempt(spec, request).await {
                Ok(generation) => {
                    if rank > 0 {
                        warn!(
                            "Degraded response from {} (candidate {} of {}, preferred {})",
                            name,
                            rank + 1,
                            candidates.len(),
                            candidates[0]
                        );
                    }
                    return Ok(Served {
                        generation,
                        spec: Arc::clone(spec),
                        rank,
                    });
                }
                Err(Error::ShuttingDown) => return Err(Error::ShuttingDown),
                Err(e) => self.note_failure(name, &e),
            }
        }

        warn!("All candidates exhausted: {:?}", tried);
        Err(Error::AllCandidatesExhausted { tried })
    }

    async fn attempt(&self, spec: &Arc<ModelSpec>, request: &GenerationRequest) -> Result<Generation> {
        let lease = self.lifecycle.ensure_resident(spec).await?;
        debug!("Generating with {}", spec.name);

        // The lease travels with the task, so a caller that stops waiting
        // leaves the generation running and the model pinned until it ends
        let adapter = Arc::clone(self.lifecycle.adapter());
        let owned = request.clone();
        let mut task = tokio::spawn(async move {
            let result = adapter.generate(lease.handle(), &owned).await;
            drop(lease);
            result
        });

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(Error::generation(&spec.name, format!("generation task failed: {}", join))),
            Err(_) => {
                task.abort();
                Err(Error::timeout(&spec.name, self.timeout))
            }
        }
    }

    fn note_failure(&self, model: &str, error: &Error) {
        match error {
            Error::Admission { .. } => info!("{} not admitted: {}", model, error),
            Error::Load { .. } => warn!("{} failed to load: {}", model, error),
            Error::Timeout { .. } => {
                warn!("{} timed out: {}", model, error);
                self.cooldown.record_timeout(model);
                self.sink.record_lifecycle(&LifecycleEvent::GenerationFailed {
                    model: model.to_string(),
                    timeout: true,
                });
            }
            Error::Generation { .. } => {
                warn!("{} failed to generate: {}", model, error);
                self.cooldown.record_generation_error(model);
                self.sink.record_lifecycle(&LifecycleEvent::GenerationFailed {
                    model: model.to_string(),
                    timeout: false,
                });
            }
            other => warn!("{} failed: {}", model, other),
        }
    }
}
