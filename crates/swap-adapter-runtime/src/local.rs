//! Adapter for locally served models
//!
//! A local model is a serving process (vLLM, TGI, llama.cpp) listening on a
//! loopback port. The adapter either spawns that process pinned to the
//! model's device or attaches to one started elsewhere, and forwards
//! generations using the backend's wire protocol.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use swap_core::{
    BackendAdapter, BackendKind, Generation, GenerationRequest, ModelHandle, ModelSpec,
};

use crate::config::{ProcessConfig, RuntimeConfig};
use crate::health::HealthCheck;
use crate::process::ProcessManager;
use crate::{Result, RuntimeError};

/// What differs between serving technologies
#[async_trait]
pub trait WireProtocol: Send + Sync + 'static {
    fn kind(&self) -> BackendKind;

    fn health_path(&self) -> &'static str {
        "/health"
    }

    /// Command line for a managed server when the entry names a
    /// `model_path` but no `command`
    fn default_command(&self, model_path: &str, served_name: &str, port: u16) -> (String, Vec<String>);

    async fn generate(
        &self,
        client: &Client,
        endpoint: &str,
        model: &str,
        request: &GenerationRequest,
        transport_timeout: Duration,
    ) -> Result<Generation>;
}

struct Instance {
    endpoint: String,
    upstream_model: String,
    process: Mutex<Option<ProcessManager>>,
    /// Generation slots; `None` when the server batches internally
    slots: Option<Arc<Semaphore>>,
}

/// Load/generate/unload over one wire protocol
pub struct LocalAdapter<P: WireProtocol> {
    protocol: P,
    config: RuntimeConfig,
    client: Client,
    instances: RwLock<HashMap<Uuid, Arc<Instance>>>,
    next_port: AtomicU16,
}

impl<P: WireProtocol> LocalAdapter<P> {
    pub fn new(protocol: P, config: RuntimeConfig) -> Result<Self> {
        let client = config.http_client()?;
        let next_port = AtomicU16::new(config.base_port);
        Ok(Self {
            protocol,
            config,
            client,
            instances: RwLock::new(HashMap::new()),
            next_port,
        })
    }

    pub fn kind(&self) -> BackendKind {
        self.protocol.kind()
    }

    /// Number of live instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst)
    }

    async fn start_instance(&self, spec: &ModelSpec) -> Result<Instance> {
        if spec.backend != self.protocol.kind() {
            return Err(RuntimeError::Configuration(format!(
                "{} is a {} model, not {}",
                spec.name,
                spec.backend,
                self.protocol.kind()
            )));
        }

        let launch = &spec.runtime;
        let slots = spec.concurrency().map(|n| Arc::new(Semaphore::new(n.max(1))));
        let upstream_model = spec.upstream_name().to_string();

        if launch.command.is_some() || (launch.model_path.is_some() && launch.endpoint.is_none()) {
            let port = launch.port.unwrap_or_else(|| self.allocate_port());
            let (command, args) = match &launch.command {
                Some(command) => (command.clone(), launch.args.clone()),
                None => self.protocol.default_command(
                    launch.model_path.as_deref().unwrap_or_default(),
                    &upstream_model,
                    port,
                ),
            };
            return self
                .spawn_instance(spec, command, args, port, upstream_model, slots)
                .await;
        }

        let endpoint = launch.endpoint.as_deref().ok_or_else(|| {
            RuntimeError::Configuration(format!(
                "{} needs a command, model_path or endpoint",
                spec.name
            ))
        })?;
        let endpoint = Url::parse(endpoint)
            .map_err(|e| RuntimeError::Configuration(format!("invalid endpoint {}: {}", endpoint, e)))?
            .as_str()
            .trim_end_matches('/')
            .to_string();

        info!("Attaching {} to {}", spec.name, endpoint);
        let health = HealthCheck::new(
            self.client.clone(),
            &endpoint,
            self.protocol.health_path(),
            self.config.health_interval,
        );
        let deadline = launch
            .startup_timeout()
            .unwrap_or(self.config.startup_timeout);
        health.wait_until_healthy(deadline, || true).await?;

        Ok(Instance {
            endpoint,
            upstream_model,
            process: Mutex::new(None),
            slots,
        })
    }

    async fn spawn_instance(
        &self,
        spec: &ModelSpec,
        command: String,
        args: Vec<String>,
        port: u16,
        upstream_model: String,
        slots: Option<Arc<Semaphore>>,
    ) -> Result<Instance> {
        let model_path = spec.runtime.model_path.clone().unwrap_or_default();
        let args = args
            .into_iter()
            .map(|a| a.replace("{port}", &port.to_string()).replace("{model_path}", &model_path))
            .collect();

        let endpoint = format!("http://{}:{}", self.config.host, port);
        let process_config = ProcessConfig::for_model(spec, &self.config, command, args);
        let health = HealthCheck::new(
            self.client.clone(),
            &endpoint,
            self.protocol.health_path(),
            self.config.health_interval,
        );

        info!("Launching {} on {} at {}", spec.name, spec.device, endpoint);
        let mut process = ProcessManager::new(process_config);
        process.start(&health).await?;

        Ok(Instance {
            endpoint,
            upstream_model,
            process: Mutex::new(Some(process)),
            slots,
        })
    }

    fn instance(&self, handle: &ModelHandle) -> Result<Arc<Instance>> {
        self.instances
            .read()
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownHandle(format!("{} ({})", handle.model, handle.id)))
    }
}

#[async_trait]
impl<P: WireProtocol> BackendAdapter for LocalAdapter<P> {
    async fn load(&self, spec: &ModelSpec) -> swap_core::Result<ModelHandle> {
        let instance = self
            .start_instance(spec)
            .await
            .map_err(|e| e.into_load_error(&spec.name))?;

        let handle = ModelHandle::new(&spec.name, spec.backend, spec.device)
            .with_endpoint(instance.endpoint.clone());
        self.instances.write().insert(handle.id, Arc::new(instance));
        debug!("{} loaded as {}", spec.name, handle.id);
        Ok(handle)
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> swap_core::Result<Generation> {
        let instance = self
            .instance(handle)
            .map_err(|e| e.into_generation_error(&handle.model))?;

        // Held until the call returns, serializing single-request servers
        let _permit = match &instance.slots {
            Some(slots) => Some(Arc::clone(slots).acquire_owned().await.map_err(|_| {
                swap_core::Error::generation(&handle.model, "instance is shutting down")
            })?),
            None => None,
        };

        self.protocol
            .generate(
                &self.client,
                &instance.endpoint,
                &instance.upstream_model,
                request,
                self.config.request_timeout,
            )
            .await
            .map_err(|e| e.into_generation_error(&handle.model))
    }

    async fn unload(&self, handle: &ModelHandle) -> swap_core::Result<()> {
        let Some(instance) = self.instances.write().remove(&handle.id) else {
            debug!("Unload of unknown handle {} ignored", handle.id);
            return Ok(());
        };

        if let Some(slots) = &instance.slots {
            slots.close();
        }

        let mut process = instance.process.lock().await;
        if let Some(mut manager) = process.take() {
            if let Err(e) = manager.stop().await {
                warn!("Stopping {} failed: {}", handle.model, e);
            }
        }
        info!("{} unloaded from {}", handle.model, handle.device);
        Ok(())
    }
}
