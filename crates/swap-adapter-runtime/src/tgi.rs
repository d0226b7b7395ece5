//! Text Generation Inference (TGI) wire protocol for the accelerated-single backend

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use swap_core::{BackendKind, Generation, GenerationRequest};

use crate::http::post_json;
use crate::local::WireProtocol;
use crate::openai::approximate_tokens;
use crate::Result;

/// TGI generate request
#[derive(Debug, Serialize)]
struct TgiGenerateRequest<'a> {
    inputs: &'a str,
    parameters: TgiParameters,
}

/// TGI generation parameters
#[derive(Debug, Serialize)]
struct TgiParameters {
    max_new_tokens: u32,
    do_sample: bool,
    /// TGI rejects a temperature of exactly zero
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    details: bool,
    return_full_text: bool,
}

/// TGI generate response
#[derive(Debug, Deserialize)]
struct TgiGenerateResponse {
    generated_text: String,
    #[serde(default)]
    details: Option<TgiGenerationDetails>,
}

#[derive(Debug, Deserialize)]
struct TgiGenerationDetails {
    generated_tokens: u32,
}

/// TGI `/generate`; one generation at a time per instance
#[derive(Debug, Clone, Copy, Default)]
pub struct TgiProtocol;

impl TgiProtocol {
    fn parameters(request: &GenerationRequest) -> TgiParameters {
        let sampling = request.temperature > 0.0;
        TgiParameters {
            max_new_tokens: request.max_tokens,
            do_sample: sampling,
            temperature: sampling.then_some(request.temperature),
            details: true,
            return_full_text: false,
        }
    }
}

#[async_trait]
impl WireProtocol for TgiProtocol {
    fn kind(&self) -> BackendKind {
        BackendKind::AcceleratedSingle
    }

    fn default_command(&self, model_path: &str, _served_name: &str, port: u16) -> (String, Vec<String>) {
        let args = vec![
            "--model-id".to_string(),
            model_path.to_string(),
            "--hostname".to_string(),
            "127.0.0.1".to_string(),
            "--port".to_string(),
            port.to_string(),
        ];
        ("text-generation-launcher".to_string(), args)
    }

    async fn generate(
        &self,
        client: &Client,
        endpoint: &str,
        _model: &str,
        request: &GenerationRequest,
        transport_timeout: Duration,
    ) -> Result<Generation> {
        let url = format!("{}/generate", endpoint.trim_end_matches('/'));
        let body = TgiGenerateRequest {
            inputs: &request.prompt,
            parameters: Self::parameters(request),
        };

        let response: TgiGenerateResponse =
            post_json(client, &url, &body, None, transport_timeout).await?;
        let tokens = response
            .details
            .map(|d| d.generated_tokens)
            .unwrap_or_else(|| approximate_tokens(&response.generated_text));

        Ok(Generation {
            text: response.generated_text,
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greedy_omits_temperature() {
        let request = GenerationRequest {
            prompt: "p".to_string(),
            max_tokens: 32,
            temperature: 0.0,
        };
        let json = serde_json::to_value(TgiProtocol::parameters(&request)).unwrap();
        assert_eq!(json["do_sample"], false);
        assert!(json.get("temperature").is_none());
        assert_eq!(json["max_new_tokens"], 32);
    }

    #[test]
    fn test_sampling_sets_temperature() {
        let request = GenerationRequest {
            prompt: "p".to_string(),
            max_tokens: 32,
            temperature: 0.5,
        };
        let params = TgiProtocol::parameters(&request);
        assert!(params.do_sample);
        assert_eq!(params.temperature, Some(0.5));
    }
}
