//! Mock backend adapter for testing
//!
//! `MockBackend` serves every backend kind. Each model name keeps its own
//! call counters, an optional injected fault and optional gates that hold a
//! load or a generation open until the test releases it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

use swap_core::{
    BackendAdapter, Error, Generation, GenerationRequest, ModelHandle, ModelSpec, Result,
};

/// Failure injected for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every load fails with `Error::Load`
    Load,
    /// Every generation fails with `Error::Generation`
    Generate,
    /// Every generation fails with an out-of-memory `Error::Generation`
    OutOfMemory,
    /// Generations never complete
    Hang,
}

/// Adapter calls seen for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub loads: usize,
    pub generations: usize,
    pub unloads: usize,
}

#[derive(Default)]
struct ModelBook {
    calls: CallCounts,
    live: usize,
    max_live: usize,
    generating: usize,
    fault: Option<Fault>,
    load_gate: Option<Arc<Semaphore>>,
    generation_gate: Option<Arc<Semaphore>>,
    last_prompt: Option<String>,
}

#[derive(Default)]
struct Inner {
    models: Mutex<HashMap<String, ModelBook>>,
    load_delay: Mutex<Duration>,
    generate_delay: Mutex<Duration>,
}

impl Inner {
    fn with_book<T>(&self, model: &str, f: impl FnOnce(&mut ModelBook) -> T) -> T {
        let mut models = self.models.lock();
        f(models.entry(model.to_string()).or_default())
    }
}

/// Scriptable backend that records what the orchestrator asks of it
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

/// Decrements the generating count even when the call is aborted
struct Generating {
    inner: Arc<Inner>,
    model: String,
}

impl Drop for Generating {
    fn drop(&mut self) {
        self.inner
            .with_book(&self.model, |book| book.generating = book.generating.saturating_sub(1));
    }
}

async fn pass(gate: Option<Arc<Semaphore>>, model: &str) -> Result<()> {
    if let Some(gate) = gate {
        gate.acquire()
            .await
            .map_err(|_| Error::internal(format!("gate for {} closed", model)))?
            .forget();
    }
    Ok(())
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_load_delay(&self, delay: Duration) {
        *self.inner.load_delay.lock() = delay;
    }

    pub fn set_generate_delay(&self, delay: Duration) {
        *self.inner.generate_delay.lock() = delay;
    }

    pub fn set_fault(&self, model: &str, fault: Fault) {
        self.inner.with_book(model, |book| book.fault = Some(fault));
    }

    pub fn clear_fault(&self, model: &str) {
        self.inner.with_book(model, |book| book.fault = None);
    }

    /// Block loads of `model` until [`MockBackend::release_loads`]
    pub fn hold_loads(&self, model: &str) {
        self.inner
            .with_book(model, |book| book.load_gate = Some(Arc::new(Semaphore::new(0))));
    }

    pub fn release_loads(&self, model: &str, permits: usize) {
        if let Some(gate) = self.inner.with_book(model, |book| book.load_gate.clone()) {
            gate.add_permits(permits);
        }
    }

    /// Block generations of `model` until [`MockBackend::release_generations`]
    pub fn hold_generations(&self, model: &str) {
        self.inner.with_book(model, |book| {
            book.generation_gate = Some(Arc::new(Semaphore::new(0)))
        });
    }

    pub fn release_generations(&self, model: &str, permits: usize) {
        if let Some(gate) = self.inner.with_book(model, |book| book.generation_gate.clone()) {
            gate.add_permits(permits);
        }
    }

    pub fn calls(&self, model: &str) -> CallCounts {
        self.inner.with_book(model, |book| book.calls)
    }

    pub fn load_calls(&self, model: &str) -> usize {
        self.calls(model).loads
    }

    pub fn generate_calls(&self, model: &str) -> usize {
        self.calls(model).generations
    }

    pub fn unload_calls(&self, model: &str) -> usize {
        self.calls(model).unloads
    }

    pub fn total_loads(&self) -> usize {
        self.inner.models.lock().values().map(|b| b.calls.loads).sum()
    }

    /// Handles loaded and not yet unloaded
    pub fn live_instances(&self, model: &str) -> usize {
        self.inner.with_book(model, |book| book.live)
    }

    /// High-water mark of [`MockBackend::live_instances`]
    pub fn max_live_instances(&self, model: &str) -> usize {
        self.inner.with_book(model, |book| book.max_live)
    }

    /// Generations currently executing
    pub fn generating(&self, model: &str) -> usize {
        self.inner.with_book(model, |book| book.generating)
    }

    pub fn last_prompt(&self, model: &str) -> Option<String> {
        self.inner.with_book(model, |book| book.last_prompt.clone())
    }

    /// Poll until `count` generations of `model` are executing
    pub async fn wait_until_generating(&self, model: &str, count: usize) {
        while self.generating(model) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until `count` loads of `model` have started
    pub async fn wait_until_loading(&self, model: &str, count: usize) {
        while self.load_calls(model) < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl BackendAdapter for MockBackend {
    async fn load(&self, spec: &ModelSpec) -> Result<ModelHandle> {
        let (fault, gate) = self.inner.with_book(&spec.name, |book| {
            book.calls.loads += 1;
            (book.fault, book.load_gate.clone())
        });
        debug!("mock load of {}", spec.name);

        pass(gate, &spec.name).await?;
        let delay = *self.inner.load_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fault == Some(Fault::Load) {
            return Err(Error::load(&spec.name, "injected load failure"));
        }

        let handle = ModelHandle::new(&spec.name, spec.backend, spec.device);
        self.inner.with_book(&spec.name, |book| {
            book.live += 1;
            book.max_live = book.max_live.max(book.live);
        });
        Ok(handle)
    }

    async fn generate(&self, handle: &ModelHandle, request: &GenerationRequest) -> Result<Generation> {
        let model = handle.model.as_str();
        let (fault, gate) = self.inner.with_book(model, |book| {
            book.calls.generations += 1;
            book.generating += 1;
            book.last_prompt = Some(request.prompt.clone());
            (book.fault, book.generation_gate.clone())
        });
        let _generating = Generating {
            inner: Arc::clone(&self.inner),
            model: model.to_string(),
        };

        pass(gate, model).await?;
        let delay = *self.inner.generate_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match fault {
            Some(Fault::Generate) => Err(Error::generation(model, "injected generation failure")),
            Some(Fault::OutOfMemory) => Err(Error::out_of_memory(model, "CUDA out of memory")),
            Some(Fault::Hang) => std::future::pending().await,
            _ => {
                let tokens = (request.prompt.split_whitespace().count() as u32).min(request.max_tokens);
                Ok(Generation {
                    text: format!("[{}] {}", model, request.prompt),
                    tokens,
                })
            }
        }
    }

    async fn unload(&self, handle: &ModelHandle) -> Result<()> {
        self.inner.with_book(&handle.model, |book| {
            book.calls.unloads += 1;
            book.live = book.live.saturating_sub(1);
        });
        debug!("mock unload of {}", handle.model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_core::{BackendKind, DeviceId};

    fn spec() -> ModelSpec {
        ModelSpec::new("m", BackendKind::CpuOptimized, DeviceId::Cpu, 100)
    }

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest {
            prompt: prompt.to_string(),
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn test_counts_calls() {
        let backend = MockBackend::new();
        let handle = backend.load(&spec()).await.unwrap();
        let out = backend.generate(&handle, &request("two words")).await.unwrap();
        assert_eq!(out.text, "[m] two words");
        assert_eq!(out.tokens, 2);
        backend.unload(&handle).await.unwrap();

        assert_eq!(
            backend.calls("m"),
            CallCounts {
                loads: 1,
                generations: 1,
                unloads: 1
            }
        );
        assert_eq!(backend.live_instances("m"), 0);
        assert_eq!(backend.max_live_instances("m"), 1);
        assert_eq!(backend.last_prompt("m").as_deref(), Some("two words"));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let backend = MockBackend::new();
        backend.set_fault("m", Fault::Load);
        assert!(matches!(backend.load(&spec()).await, Err(Error::Load { .. })));
        assert_eq!(backend.live_instances("m"), 0);

        backend.set_fault("m", Fault::OutOfMemory);
        let handle = backend.load(&spec()).await.unwrap();
        let err = backend.generate(&handle, &request("x")).await.unwrap_err();
        assert!(err.is_oom());

        backend.clear_fault("m");
        assert!(backend.generate(&handle, &request("x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_generation_gate() {
        let backend = MockBackend::new();
        let handle = backend.load(&spec()).await.unwrap();
        backend.hold_generations("m");

        let task = {
            let backend = backend.clone();
            let handle = handle.clone();
            tokio::spawn(async move { backend.generate(&handle, &request("held")).await })
        };
        backend.wait_until_generating("m", 1).await;
        assert!(!task.is_finished());

        backend.release_generations("m", 1);
        assert!(task.await.unwrap().is_ok());
        assert_eq!(backend.generating("m"), 0);
    }
}
