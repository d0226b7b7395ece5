//! llama.cpp `llama-server` wire protocol for the CPU-optimized backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use swap_core::{BackendKind, Generation, GenerationRequest};

use crate::http::post_json;
use crate::local::WireProtocol;
use crate::openai::approximate_tokens;
use crate::Result;

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    n_predict: u32,
    temperature: f32,
    stream: bool,
    cache_prompt: bool,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    content: String,
    #[serde(default)]
    tokens_predicted: Option<u32>,
}

/// `llama-server /completion` with GPU offload disabled
#[derive(Debug, Clone, Copy, Default)]
pub struct LlamaCppProtocol;

#[async_trait]
impl WireProtocol for LlamaCppProtocol {
    fn kind(&self) -> BackendKind {
        BackendKind::CpuOptimized
    }

    fn default_command(&self, model_path: &str, served_name: &str, port: u16) -> (String, Vec<String>) {
        let args = vec![
            "-m".to_string(),
            model_path.to_string(),
            "--alias".to_string(),
            served_name.to_string(),
            "--host".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            port.to_string(),
            "--n-gpu-layers".to_string(),
            "0".to_string(),
        ];
        ("llama-server".to_string(), args)
    }

    async fn generate(
        &self,
        client: &Client,
        endpoint: &str,
        _model: &str,
        request: &GenerationRequest,
        transport_timeout: Duration,
    ) -> Result<Generation> {
        let url = format!("{}/completion", endpoint.trim_end_matches('/'));
        let body = CompletionRequest {
            prompt: &request.prompt,
            n_predict: request.max_tokens,
            temperature: request.temperature,
            stream: false,
            cache_prompt: true,
        };

        let response: CompletionResponse =
            post_json(client, &url, &body, None, transport_timeout).await?;
        let tokens = response
            .tokens_predicted
            .unwrap_or_else(|| approximate_tokens(&response.content));

        Ok(Generation {
            text: response.content,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_disables_offload() {
        let (command, args) = LlamaCppProtocol.default_command("/m/small.gguf", "small", 18002);
        assert_eq!(command, "llama-server");
        assert!(args.windows(2).any(|w| w[0] == "--n-gpu-layers" && w[1] == "0"));
        assert!(args.windows(2).any(|w| w[0] == "-m" && w[1] == "/m/small.gguf"));
    }
}
