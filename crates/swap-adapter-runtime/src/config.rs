//! Runtime configuration

use reqwest::Client;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use swap_core::{DeviceId, ModelSpec};

use crate::{Result, RuntimeError};

/// Settings shared by every adapter
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Transport-level ceiling for a single HTTP call; the orchestrator
    /// applies its own per-generation deadline on top
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// How often a starting server's health endpoint is polled
    pub health_interval: Duration,
    /// Startup deadline when the model entry does not set one
    pub startup_timeout: Duration,
    /// Grace period between SIGTERM and kill
    pub shutdown_timeout: Duration,
    /// Host managed servers listen on
    pub host: String,
    /// First port handed to managed servers without an explicit port
    pub base_port: u16,
    /// Environment variable holding the remote API bearer token
    pub api_key_env: Option<String>,
}

impl RuntimeConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn http_client(&self) -> Result<Client> {
        Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()
            .map_err(|e| RuntimeError::Configuration(format!("Failed to create HTTP client: {}", e)))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(5),
            health_interval: Duration::from_millis(500),
            startup_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(30),
            host: "127.0.0.1".to_string(),
            base_port: 18_000,
            api_key_env: None,
        }
    }
}

/// How to run one serving process
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub startup_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl ProcessConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            startup_timeout: Duration::from_secs(600),
            shutdown_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Process settings for a model, pinned to its target device
    pub fn for_model(
        spec: &ModelSpec,
        runtime: &RuntimeConfig,
        command: String,
        args: Vec<String>,
    ) -> Self {
        let mut env = spec.runtime.env.clone();
        let visible = match spec.device {
            DeviceId::Gpu(index) => index.to_string(),
            // hide accelerators from CPU runtimes
            _ => String::new(),
        };
        env.insert("CUDA_VISIBLE_DEVICES".to_string(), visible);

        Self {
            command,
            args,
            env,
            working_dir: None,
            startup_timeout: spec
                .runtime
                .startup_timeout()
                .unwrap_or(runtime.startup_timeout),
            shutdown_timeout: runtime.shutdown_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use swap_core::BackendKind;

    #[test]
    fn test_process_config_pins_device() {
        let spec = ModelSpec::new("m", BackendKind::BatchedGpu, DeviceId::Gpu(2), 1000);
        let config = ProcessConfig::for_model(
            &spec,
            &RuntimeConfig::default(),
            "vllm".to_string(),
            vec![],
        );
        assert_eq!(config.env.get("CUDA_VISIBLE_DEVICES").map(String::as_str), Some("2"));
        assert_eq!(config.startup_timeout, Duration::from_secs(600));

        let mut cpu = ModelSpec::new("c", BackendKind::CpuOptimized, DeviceId::Cpu, 1000);
        cpu.runtime.startup_timeout_s = Some(20);
        let config =
            ProcessConfig::for_model(&cpu, &RuntimeConfig::default(), "llama-server".into(), vec![]);
        assert_eq!(config.env.get("CUDA_VISIBLE_DEVICES").map(String::as_str), Some(""));
        assert_eq!(config.startup_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_http_client_builds() {
        assert!(RuntimeConfig::default().http_client().is_ok());
    }
}
