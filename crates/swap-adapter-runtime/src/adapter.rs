//! Closed-set dispatch over the four backend adapters

use async_trait::async_trait;
use tracing::debug;

use swap_core::{
    BackendAdapter, BackendKind, Generation, GenerationRequest, ModelHandle, ModelSpec,
};

use crate::config::RuntimeConfig;
use crate::local::LocalAdapter;
use crate::remote::RemoteApiAdapter;
use crate::{LlamaCppProtocol, Result, TgiProtocol, VllmProtocol};

/// One adapter per backend kind, selected by the registry entry
pub struct RuntimeAdapter {
    batched_gpu: LocalAdapter<VllmProtocol>,
    accelerated_single: LocalAdapter<TgiProtocol>,
    cpu_optimized: LocalAdapter<LlamaCppProtocol>,
    remote_api: RemoteApiAdapter,
    config: RuntimeConfig,
}

impl RuntimeAdapter {
    pub fn new(config: RuntimeConfig, api_key_env: Option<String>) -> Result<Self> {
        // Keep the managed port ranges of the three local adapters apart
        let batched = config.clone();
        let mut single = config.clone();
        let mut cpu = config.clone();
        single.base_port = config.base_port.saturating_add(1000);
        cpu.base_port = config.base_port.saturating_add(2000);

        let mut remote = config.clone();
        if api_key_env.is_some() {
            remote.api_key_env = api_key_env;
        }

        Ok(Self {
            batched_gpu: LocalAdapter::new(VllmProtocol, batched)?,
            accelerated_single: LocalAdapter::new(TgiProtocol, single)?,
            cpu_optimized: LocalAdapter::new(LlamaCppProtocol, cpu)?,
            remote_api: RemoteApiAdapter::new(remote)?,
            config,
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

#[async_trait]
impl BackendAdapter for RuntimeAdapter {
    async fn load(&self, spec: &ModelSpec) -> swap_core::Result<ModelHandle> {
        debug!("Dispatching load of {} to {}", spec.name, spec.backend);
        match spec.backend {
            BackendKind::BatchedGpu => self.batched_gpu.load(spec).await,
            BackendKind::AcceleratedSingle => self.accelerated_single.load(spec).await,
            BackendKind::CpuOptimized => self.cpu_optimized.load(spec).await,
            BackendKind::RemoteApi => self.remote_api.load(spec).await,
        }
    }

    async fn generate(
        &self,
        handle: &ModelHandle,
        request: &GenerationRequest,
    ) -> swap_core::Result<Generation> {
        match handle.backend {
            BackendKind::BatchedGpu => self.batched_gpu.generate(handle, request).await,
            BackendKind::AcceleratedSingle => self.accelerated_single.generate(handle, request).await,
            BackendKind::CpuOptimized => self.cpu_optimized.generate(handle, request).await,
            BackendKind::RemoteApi => self.remote_api.generate(handle, request).await,
        }
    }

    async fn unload(&self, handle: &ModelHandle) -> swap_core::Result<()> {
        match handle.backend {
            BackendKind::BatchedGpu => self.batched_gpu.unload(handle).await,
            BackendKind::AcceleratedSingle => self.accelerated_single.unload(handle).await,
            BackendKind::CpuOptimized => self.cpu_optimized.unload(handle).await,
            BackendKind::RemoteApi => self.remote_api.unload(handle).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_core::DeviceId;

    #[tokio::test]
    async fn test_dispatch_by_backend_kind() {
        let adapter = RuntimeAdapter::new(RuntimeConfig::default(), None).unwrap();
        assert_eq!(adapter.batched_gpu.kind(), BackendKind::BatchedGpu);
        assert_eq!(adapter.cpu_optimized.kind(), BackendKind::CpuOptimized);

        let remote = ModelSpec::new("api", BackendKind::RemoteApi, DeviceId::Remote, 0)
            .with_endpoint("https://api.example.com");
        let handle = adapter.load(&remote).await.unwrap();
        assert_eq!(handle.backend, BackendKind::RemoteApi);
        assert_eq!(adapter.remote_api.target_count(), 1);
        adapter.unload(&handle).await.unwrap();
        assert_eq!(adapter.remote_api.target_count(), 0);
    }

    #[tokio::test]
    async fn test_local_model_without_launch_settings_fails() {
        let adapter = RuntimeAdapter::new(RuntimeConfig::default(), None).unwrap();
        let spec = ModelSpec::new("m", BackendKind::AcceleratedSingle, DeviceId::Gpu(0), 1000);
        let err = adapter.load(&spec).await.unwrap_err();
        assert!(matches!(err, swap_core::Error::Load { .. }));
        assert!(err.to_string().contains("needs a command"));
    }
}
