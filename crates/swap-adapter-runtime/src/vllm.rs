//! vLLM wire protocol for the batched-GPU backend

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use swap_core::{BackendKind, Generation, GenerationRequest};

use crate::local::WireProtocol;
use crate::openai::chat_completion;
use crate::Result;

/// vLLM's OpenAI-compatible server; batches concurrent requests internally
#[derive(Debug, Clone, Copy, Default)]
pub struct VllmProtocol;

#[async_trait]
impl WireProtocol for VllmProtocol {
    fn kind(&self) -> BackendKind {
        BackendKind::BatchedGpu
    }

    fn default_command(&self, model_path: &str, served_name: &str, port: u16) -> (String, Vec<String>) {
        let args = vec![
            "serve".to_string(),
            model_path.to_string(),
            "--served-model-name".to_string(),
            served_name.to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            port.to_string(),
        ];
        ("vllm".to_string(), args)
    }

    async fn generate(
        &self,
        client: &Client,
        endpoint: &str,
        model: &str,
        request: &GenerationRequest,
        transport_timeout: Duration,
    ) -> Result<Generation> {
        chat_completion(client, endpoint, model, request, None, transport_timeout).await
    }
}
