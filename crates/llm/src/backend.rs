//! LLM backends
//!
//! Streaming chat completions against OpenAI-compatible APIs (OpenAI, vLLM, Ollama's
//! `/v1` surface, and so on).

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;

use parley_config::LlmConfig;

use crate::prompt::Message;
use crate::LlmError;

/// Generated text fragments, in order
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Stream a completion for `messages`
    fn stream(&self, messages: Vec<Message>) -> TokenStream;

    /// Check if backend is available
    async fn is_available(&self) -> bool;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible backend
pub struct OpenAIBackend {
    config: LlmConfig,
    client: Client,
}

impl OpenAIBackend {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let has_key = config.api_key.as_deref().is_some_and(|k| !k.is_empty());
        if !has_key && !is_local(&config.endpoint) {
            return Err(LlmError::Configuration(
                "API key required for remote endpoints".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.config.endpoint.trim_end_matches('/'))
    }

    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            if let Ok(val) = HeaderValue::from_str(&format!("Bearer {}", key)) {
                headers.insert(AUTHORIZATION, val);
            }
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        headers
    }

    fn request(&self, messages: Vec<Message>) -> reqwest::RequestBuilder {
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            max_tokens: Some(self.config.max_tokens),
            temperature: Some(self.config.temperature),
            stream: true,
        };

        self.client
            .post(self.chat_url())
            .headers(self.build_headers())
            .json(&request)
    }
}

fn is_local(endpoint: &str) -> bool {
    endpoint.starts_with("http://localhost") || endpoint.starts_with("http://127.0.0.1")
}

#[async_trait]
impl LlmBackend for OpenAIBackend {
    fn stream(&self, messages: Vec<Message>) -> TokenStream {
        tracing::debug!(model = %self.config.model, messages = messages.len(), "Starting completion");
        Box::pin(completion_tokens(self.request(messages)))
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/models", self.config.endpoint.trim_end_matches('/'));
        self.client
            .get(&url)
            .headers(self.build_headers())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn completion_tokens(
    request: reqwest::RequestBuilder,
) -> impl Stream<Item = Result<String, LlmError>> + Send + 'static {
    async_stream::try_stream! {
        let response = check_status(request.send().await?).await?;

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            for token in decoder.push(&chunk)? {
                yield token;
            }
            if decoder.is_done() {
                break;
            }
        }
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error_text = response.text().await.unwrap_or_default();
    Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)))
}

/// Server-sent event decoding of streamed chat completion chunks
///
/// Lines may be split across body chunks at any byte.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed body bytes, returning the content deltas of every complete line
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, LlmError> {
        self.buffer.extend_from_slice(bytes);

        let mut tokens = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            if line.is_empty() || self.done {
                continue;
            }
            if line == "data: [DONE]" {
                self.done = true;
                continue;
            }

            let Some(json_str) = line.strip_prefix("data:") else {
                continue;
            };
            match serde_json::from_str::<StreamChunk>(json_str.trim_start()) {
                Ok(StreamChunk {
                    error: Some(error), ..
                }) => return Err(LlmError::Api(error.message)),
                Ok(chunk) => {
                    if let Some(content) = chunk
                        .choices
                        .into_iter()
                        .next()
                        .and_then(|c| c.delta)
                        .and_then(|d| d.content)
                        .filter(|c| !c.is_empty())
                    {
                        tokens.push(content);
                    }
                },
                Err(e) => tracing::debug!(error = %e, "Skipping unparsable stream line"),
            }
        }

        Ok(tokens)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: Option<Delta>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> LlmConfig {
        LlmConfig {
            api_key: Some("sk-test".to_string()),
            endpoint: "https://llm.example.com/v1/".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_remote_endpoint_requires_key() {
        let config = LlmConfig {
            api_key: None,
            endpoint: "https://api.openai.com/v1".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OpenAIBackend::new(config),
            Err(LlmError::Configuration(_))
        ));

        let local = LlmConfig {
            api_key: None,
            endpoint: "http://localhost:11434/v1".to_string(),
            ..Default::default()
        };
        assert!(OpenAIBackend::new(local).is_ok());
    }

    #[test]
    fn test_request_shape() {
        let backend = OpenAIBackend::new(config()).unwrap();
        let request = backend
            .request(vec![Message::system("Rap."), Message::user("Hi")])
            .build()
            .unwrap();

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(
            request.url().as_str(),
            "https://llm.example.com/v1/chat/completions"
        );
        assert_eq!(
            request.headers().get(AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );

        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["model"], "gpt-3.5-turbo");
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Hi");
    }

    #[test]
    fn test_sse_split_lines() {
        let mut decoder = SseDecoder::default();
        let first = b"data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\ndata: {\"choi";
        let second = b"ces\":[{\"delta\":{\"content\":\"Yo\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" fam\"}}]}\n";

        assert!(decoder.push(first).unwrap().is_empty());
        assert_eq!(decoder.push(second).unwrap(), vec!["Yo", " fam"]);
        assert!(!decoder.is_done());

        assert!(decoder.push(b"data: [DONE]\n\n").unwrap().is_empty());
        assert!(decoder.is_done());
    }

    #[test]
    fn test_sse_multibyte_split() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9}\"}}]}\n";
        let bytes = line.as_bytes();
        let split = line.find('\u{e9}').unwrap() + 1;

        let mut decoder = SseDecoder::default();
        assert!(decoder.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(decoder.push(&bytes[split..]).unwrap(), vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_sse_error_event() {
        let mut decoder = SseDecoder::default();
        let result = decoder.push(b"data: {\"error\":{\"message\":\"rate limited\"}}\n");
        assert!(matches!(result, Err(LlmError::Api(m)) if m == "rate limited"));
    }
}
