use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use easel_contracts::provider::snap_multiple;
use easel_contracts::{GeneratedImage, GenerationRequest, GenerationResult, Provider};

use crate::poll::{poll_until, PollPlan};
use crate::providers::{non_empty_env, response_json_or_error, ImageProvider, ModelInfo};

const DEFAULT_API_BASE: &str = "https://cloud.leonardo.ai/api/rest/v1";
const PHOENIX_MODEL_ID: &str = "de7d3faf-762f-48e0-b3b7-9d0ac3a3fcf3";

pub struct LeonardoProvider {
    api_base: String,
    api_key: Option<String>,
    http: Client,
    poll: PollPlan,
}

impl LeonardoProvider {
    pub fn new() -> Self {
        Self::with_config(
            non_empty_env("LEONARDO_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            non_empty_env("LEONARDO_API_KEY"),
        )
    }

    pub fn with_config(api_base: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            http: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_default(),
            poll: PollPlan::IMAGE_GENERATION,
        }
    }

    pub fn with_poll_plan(mut self, poll: PollPlan) -> Self {
        self.poll = poll;
        self
    }

    fn api_key(&self) -> anyhow::Result<&str> {
        self.api_key.as_deref().context("LEONARDO_API_KEY not set")
    }

    async fn fetch_generation(&self, generation_id: &str) -> anyhow::Result<Value> {
        let url = format!("{}/generations/{generation_id}", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_key()?)
            .send()
            .await
            .with_context(|| format!("Leonardo poll request failed ({url})"))?;
        response_json_or_error("Leonardo", response).await
    }

    async fn try_generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let api_key = self.api_key()?.to_string();
        let payload = self.map_request(request);
        let endpoint = format!("{}/generations", self.api_base);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Leonardo request failed ({endpoint})"))?;
        let submitted = response_json_or_error("Leonardo", response).await?;
        let generation_id = submitted
            .pointer("/sdGenerationJob/generationId")
            .and_then(Value::as_str)
            .context("Leonardo response missing generationId")?
            .to_string();
        info!(%generation_id, "Leonardo generation queued");

        let polled = poll_until(self.poll, |_| {
            let generation_id = generation_id.clone();
            async move {
                let payload = self.fetch_generation(&generation_id).await?;
                let ready = payload
                    .pointer("/generations_by_pk/generated_images")
                    .and_then(Value::as_array)
                    .map(|images| !images.is_empty())
                    .unwrap_or(false);
                Ok(ready.then_some(payload))
            }
        })
        .await;

        match polled {
            Ok(payload) => {
                let mut result = self.map_response(&payload, request);
                result.generation_id = generation_id;
                Ok(result)
            }
            Err(err) => Ok(GenerationResult::failed(
                Provider::Leonardo,
                request,
                format!("Leonardo generation {generation_id}: {err}"),
            )),
        }
    }

    /// Queue a prompt-improvement pass on Leonardo's side.
    pub async fn improve_prompt(&self, prompt: &str) -> anyhow::Result<Value> {
        let url = format!("{}/prompt/improve", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key()?)
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .context("Leonardo prompt improve failed")?;
        response_json_or_error("Leonardo", response).await
    }

    pub async fn delete_generation(&self, generation_id: &str) -> anyhow::Result<()> {
        let url = format!("{}/generations/{generation_id}", self.api_base);
        let response = self
            .http
            .delete(&url)
            .bearer_auth(self.api_key()?)
            .send()
            .await
            .context("Leonardo delete failed")?;
        response_json_or_error("Leonardo", response).await?;
        Ok(())
    }

    pub async fn remove_background(&self, image_id: &str) -> anyhow::Result<Value> {
        self.variation_request("nobg", image_id).await
    }

    pub async fn upscale(&self, image_id: &str) -> anyhow::Result<Value> {
        self.variation_request("upscale", image_id).await
    }

    pub async fn unzoom(&self, image_id: &str) -> anyhow::Result<Value> {
        self.variation_request("unzoom", image_id).await
    }

    async fn variation_request(&self, kind: &str, image_id: &str) -> anyhow::Result<Value> {
        let url = format!("{}/variations/{kind}", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_key()?)
            .json(&json!({ "id": image_id }))
            .send()
            .await
            .with_context(|| format!("Leonardo {kind} request failed"))?;
        response_json_or_error("Leonardo", response).await
    }
}

impl Default for LeonardoProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Source of variation-job status, separated so the background monitor can
/// be driven by a mock in tests.
#[async_trait]
pub trait VariationSource: Send + Sync {
    async fn variation(&self, job_id: &str) -> anyhow::Result<Value>;
}

#[async_trait]
impl VariationSource for LeonardoProvider {
    async fn variation(&self, job_id: &str) -> anyhow::Result<Value> {
        let url = format!("{}/variations/{job_id}", self.api_base);
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.api_key()?)
            .send()
            .await
            .context("Leonardo variation fetch failed")?;
        response_json_or_error("Leonardo", response).await
    }
}

#[async_trait]
impl ImageProvider for LeonardoProvider {
    fn id(&self) -> Provider {
        Provider::Leonardo
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: PHOENIX_MODEL_ID.to_string(),
            name: "Phoenix 1.0".to_string(),
            description: "Leonardo Phoenix general purpose model".to_string(),
        }]
    }

    async fn validate(&self, request: &GenerationRequest) -> bool {
        if self.api_key.is_none() {
            return false;
        }
        let chars = request.prompt_chars();
        if chars == 0 || chars > 3000 {
            return false;
        }
        if request.num_images == 0 || request.num_images > 8 {
            return false;
        }
        let (width, height) = request.effective_dimensions(512);
        (128..=1536).contains(&width) && (128..=1536).contains(&height)
    }

    fn map_request(&self, request: &GenerationRequest) -> Value {
        let (width, height) = request.effective_dimensions(512);
        let width = snap_multiple(width, 8, 128, 1536);
        let height = snap_multiple(height, 8, 128, 1536);
        json!({
            "alchemy": true,
            "height": height,
            "width": width,
            "modelId": request.model_id.as_deref().unwrap_or(PHOENIX_MODEL_ID),
            "presetStyle": request.preset_style.as_deref().unwrap_or("DYNAMIC"),
            "prompt": request.prompt,
            "num_images": request.num_images,
        })
    }

    fn map_response(&self, payload: &Value, request: &GenerationRequest) -> GenerationResult {
        let Some(rows) = payload
            .pointer("/generations_by_pk/generated_images")
            .and_then(Value::as_array)
        else {
            return GenerationResult::failed(
                Provider::Leonardo,
                request,
                "Leonardo payload missing generated_images",
            )
            .with_raw_response(payload.clone());
        };

        let (width, height) = request.effective_dimensions(512);
        let images = rows
            .iter()
            .map(|row| {
                let mut image = GeneratedImage::new(Uuid::new_v4().to_string());
                image.provider_id = row.get("id").and_then(Value::as_str).map(str::to_string);
                image.url = row.get("url").and_then(Value::as_str).map(str::to_string);
                image.nsfw = row.get("nsfw").and_then(Value::as_bool).unwrap_or(false);
                image.width = Some(width);
                image.height = Some(height);
                image.model_id = Some(
                    request
                        .model_id
                        .clone()
                        .unwrap_or_else(|| PHOENIX_MODEL_ID.to_string()),
                );
                if let Some(motion) = row.get("motionMP4URL").and_then(Value::as_str) {
                    let mut metadata = Map::new();
                    metadata.insert("motionMP4URL".to_string(), Value::String(motion.to_string()));
                    image.provider_metadata = Some(metadata);
                }
                image
            })
            .collect::<Vec<_>>();

        let generation_id = payload
            .pointer("/generations_by_pk/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if images.is_empty() {
            return GenerationResult::failed(
                Provider::Leonardo,
                request,
                "Leonardo returned no images",
            )
            .with_raw_response(payload.clone());
        }
        GenerationResult::completed(generation_id, Provider::Leonardo, request, images)
            .with_raw_response(payload.clone())
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        match self.try_generate(request).await {
            Ok(result) => result,
            Err(err) => GenerationResult::failed(
                Provider::Leonardo,
                request,
                format!("Leonardo generation failed: {err:#}"),
            ),
        }
    }
}
