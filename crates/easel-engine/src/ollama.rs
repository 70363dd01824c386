use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::providers::{non_empty_env, response_json_or_error};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "gpt-oss:20b";

#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: usize,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: non_empty_env("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompressionRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl CompressionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            model: None,
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompressionResponse {
    pub text: String,
    pub model: String,
    pub total_duration_ms: Option<u64>,
    pub eval_count: Option<u64>,
    pub error: Option<String>,
}

impl CompressionResponse {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && !self.text.trim().is_empty()
    }

    fn failed(model: &str, message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            model: model.to_string(),
            total_duration_ms: None,
            eval_count: None,
            error: Some(message.into()),
        }
    }
}

/// Text compression backend. The validator only talks to this trait, so a
/// test double can stand in for a live model server.
#[async_trait]
pub trait PromptCompressor: Send + Sync {
    async fn is_available(&self) -> bool;

    async fn compress(&self, request: &CompressionRequest) -> CompressionResponse;
}

pub struct OllamaClient {
    config: OllamaConfig,
    http: Client,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    async fn generate_once(&self, request: &CompressionRequest) -> anyhow::Result<CompressionResponse> {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model);
        let endpoint = format!("{}/api/generate", self.config.base_url);
        let mut payload = json!({
            "model": model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": request.temperature,
                "num_predict": request.max_tokens,
            },
        });
        if let Some(system) = &request.system {
            payload["system"] = json!(system);
        }
        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Ollama request failed ({endpoint})"))?;
        let body = response_json_or_error("Ollama", response).await?;
        let text = body
            .get("response")
            .and_then(Value::as_str)
            .context("Ollama payload missing response text")?
            .trim()
            .to_string();
        Ok(CompressionResponse {
            text,
            model: model.to_string(),
            total_duration_ms: body
                .get("total_duration")
                .and_then(Value::as_u64)
                .map(|nanos| nanos / 1_000_000),
            eval_count: body.get("eval_count").and_then(Value::as_u64),
            error: None,
        })
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(OllamaConfig::default())
    }
}

#[async_trait]
impl PromptCompressor for OllamaClient {
    /// Cheap pre-flight: the model list endpoint answers quickly even when
    /// generation is saturated.
    async fn is_available(&self) -> bool {
        let endpoint = format!("{}/api/tags", self.config.base_url);
        let probe = self
            .http
            .get(&endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match probe {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(%endpoint, error = %err, "Ollama unavailable");
                false
            }
        }
    }

    async fn compress(&self, request: &CompressionRequest) -> CompressionResponse {
        let model = request
            .model
            .as_deref()
            .unwrap_or(&self.config.default_model)
            .to_string();
        // Fail fast on a down backend instead of burning the retry budget
        // against the full generation timeout.
        if !self.is_available().await {
            return CompressionResponse::failed(
                &model,
                format!("Ollama unavailable at {}", self.config.base_url),
            );
        }
        let mut last_error = String::new();
        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = Duration::from_secs(1 << attempt);
                warn!(attempt, ?backoff, "retrying Ollama generation");
                tokio::time::sleep(backoff).await;
            }
            match self.generate_once(request).await {
                Ok(response) => return response,
                Err(err) => {
                    last_error = format!("{err:#}");
                }
            }
        }
        CompressionResponse::failed(
            &model,
            format!(
                "Ollama generation failed after {} attempts: {last_error}",
                self.config.max_retries + 1
            ),
        )
    }
}
