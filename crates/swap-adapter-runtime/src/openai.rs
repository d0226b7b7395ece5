//! OpenAI-compatible chat completions, spoken by vLLM and hosted APIs

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use swap_core::{Generation, GenerationRequest};

use crate::http::post_json;
use crate::{Result, RuntimeError};

#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
    #[allow(unused)]
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    #[allow(unused)]
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
}

/// Send one chat completion with the prompt as a single user message
pub async fn chat_completion(
    client: &Client,
    base: &str,
    model: &str,
    request: &GenerationRequest,
    bearer: Option<&str>,
    transport_timeout: Duration,
) -> Result<Generation> {
    let url = format!("{}/v1/chat/completions", base.trim_end_matches('/'));
    let body = ChatRequest {
        model,
        messages: vec![ChatMessage {
            role: "user",
            content: &request.prompt,
        }],
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream: false,
    };

    let response: ChatResponse = post_json(client, &url, &body, bearer, transport_timeout).await?;
    let text = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| RuntimeError::InvalidResponse("chat response had no choices".to_string()))?;

    let tokens = response
        .usage
        .map(|u| u.completion_tokens)
        .unwrap_or_else(|| approximate_tokens(&text));

    Ok(Generation { text, tokens })
}

/// Rough token count for replies without usage data
pub(crate) fn approximate_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let body = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            max_tokens: 16,
            temperature: 0.0,
            stream: false,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["max_tokens"], 16);
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_chat_response_without_usage() {
        let response: ChatResponse =
            serde_json::from_str(r#"{"choices":[{"message":{"content":"a b c"}}]}"#).unwrap();
        assert!(response.usage.is_none());
        assert_eq!(approximate_tokens("a b c"), 3);
    }
}
