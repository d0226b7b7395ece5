//! Hosted OpenAI-compatible API backend
//!
//! Holds no local resource: `load` only records where to send requests and
//! `unload` forgets it.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use std::collections::HashMap;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use swap_core::{BackendAdapter, BackendKind, Generation, GenerationRequest, ModelHandle, ModelSpec};

use crate::config::RuntimeConfig;
use crate::openai::chat_completion;
use crate::{Result, RuntimeError};

#[derive(Debug, Clone)]
struct RemoteTarget {
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

pub struct RemoteApiAdapter {
    config: RuntimeConfig,
    client: Client,
    targets: RwLock<HashMap<Uuid, RemoteTarget>>,
}

impl RemoteApiAdapter {
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let client = config.http_client()?;
        Ok(Self {
            config,
            client,
            targets: RwLock::new(HashMap::new()),
        })
    }

    fn target_for(&self, spec: &ModelSpec) -> Result<RemoteTarget> {
        if spec.backend != BackendKind::RemoteApi {
            return Err(RuntimeError::Configuration(format!(
                "{} is a {} model, not remote_api",
                spec.name, spec.backend
            )));
        }
        let endpoint = spec.runtime.endpoint.as_deref().ok_or_else(|| {
            RuntimeError::Configuration(format!("remote model {} has no endpoint", spec.name))
        })?;
        Url::parse(endpoint)
            .map_err(|e| RuntimeError::Configuration(format!("invalid endpoint {}: {}", endpoint, e)))?;

        let api_key = match &self.config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) => Some(key),
                Err(_) => {
                    warn!("{} is not set; calling {} without credentials", var, endpoint);
                    None
                }
            },
            None => None,
        };

        Ok(RemoteTarget {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: spec.upstream_name().to_string(),
            api_key,
        })
    }

    pub fn target_count(&self) -> usize {
        self.targets.read().len()
    }
}

#[async_trait]
impl BackendAdapter for RemoteApiAdapter {
    async fn load(&self, spec: &ModelSpec) -> swap_core::Result<ModelHandle> {
        let target = self
            .target_for(spec)
            .map_err(|e| e.into_load_error(&spec.name))?;
        let handle = ModelHandle::new(&spec.name, spec.backend, spec.device)
            .with_endpoint(target.endpoint.clone());
        debug!("Remote model {} bound to {}", spec.name, target.endpoint);
        self.targets.write().insert(handle.id, target);
        Ok(handle)
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> swap_core::Result<Generation> {
        let target = self
            .targets
            .read()
            .get(&handle.id)
            .cloned()
            .ok_or_else(|| {
                RuntimeError::UnknownHandle(handle.id.to_string()).into_generation_error(&handle.model)
            })?;

        chat_completion(
            &self.client,
            &target.endpoint,
            &target.model,
            request,
            target.api_key.as_deref(),
            self.config.request_timeout,
        )
        .await
        .map_err(|e| e.into_generation_error(&handle.model))
    }

    async fn unload(&self, handle: &ModelHandle) -> swap_core::Result<()> {
        self.targets.write().remove(&handle.id);
        Ok(())
    }
}
