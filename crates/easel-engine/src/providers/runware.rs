use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use easel_contracts::provider::snap_multiple;
use easel_contracts::{GeneratedImage, GenerationRequest, GenerationResult, OutputFormat, Provider};

use crate::providers::{non_empty_env, response_json_or_error, ImageProvider, ModelInfo};

const DEFAULT_API_BASE: &str = "https://api.runware.ai";
const DEFAULT_MODEL: &str = "runware:100@1";

pub struct RunwareProvider {
    api_base: String,
    api_key: Option<String>,
    http: Client,
}

impl RunwareProvider {
    pub fn new() -> Self {
        Self::with_config(
            non_empty_env("RUNWARE_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            non_empty_env("RUNWARE_API_KEY"),
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
        }
    }

    fn output_format_label(format: OutputFormat) -> &'static str {
        match format {
            OutputFormat::Jpg => "JPG",
            OutputFormat::Png => "PNG",
            OutputFormat::Webp => "WEBP",
        }
    }

    async fn try_generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let api_key = self
            .api_key
            .as_deref()
            .context("RUNWARE_API_KEY not set")?;
        let task = self.map_request(request);
        let endpoint = format!("{}/v1", self.api_base);
        info!(%endpoint, "submitting Runware task");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            // Runware expects an array of tasks.
            .json(&json!([task]))
            .send()
            .await
            .with_context(|| format!("Runware request failed ({endpoint})"))?;
        let payload = response_json_or_error("Runware", response).await?;
        Ok(self.map_response(&payload, request))
    }
}

impl Default for RunwareProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for RunwareProvider {
    fn id(&self) -> Provider {
        Provider::Runware
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![
            ModelInfo {
                id: "runware:100@1".to_string(),
                name: "Runware v1.0".to_string(),
                description: "High-quality general purpose model".to_string(),
            },
            ModelInfo {
                id: "runware:101@1".to_string(),
                name: "Runware v1.1".to_string(),
                description: "Enhanced model with better prompt adherence".to_string(),
            },
        ]
    }

    async fn validate(&self, request: &GenerationRequest) -> bool {
        if self.api_key.is_none() {
            return false;
        }
        let (width, height) = request.effective_dimensions(512);
        for dim in [width, height] {
            if !(128..=2048).contains(&dim) || dim % 64 != 0 {
                return false;
            }
        }
        if request.num_images == 0 || request.num_images > 20 {
            return false;
        }
        let chars = request.prompt_chars();
        (2..=3000).contains(&chars)
    }

    fn map_request(&self, request: &GenerationRequest) -> Value {
        let (width, height) = request.effective_dimensions(512);
        let width = snap_multiple(width, 64, 128, 2048);
        let height = snap_multiple(height, 64, 128, 2048);

        let mut task = Map::new();
        task.insert("taskType".into(), json!("imageInference"));
        task.insert("taskUUID".into(), json!(Uuid::new_v4().to_string()));
        task.insert("positivePrompt".into(), json!(request.prompt));
        task.insert(
            "model".into(),
            json!(request.model_id.as_deref().unwrap_or(DEFAULT_MODEL)),
        );
        task.insert("width".into(), json!(width));
        task.insert("height".into(), json!(height));
        task.insert("numberResults".into(), json!(request.num_images));
        task.insert("outputType".into(), json!("URL"));
        task.insert(
            "outputFormat".into(),
            json!(Self::output_format_label(request.output_format)),
        );
        if let Some(negative) = &request.negative_prompt {
            task.insert("negativePrompt".into(), json!(negative));
        }
        if let Some(seed) = request.seed {
            task.insert("seed".into(), json!(seed));
        }
        if let Some(scale) = request.guidance_scale {
            task.insert("CFGScale".into(), json!(scale));
        }
        if let Some(steps) = request.steps {
            task.insert("steps".into(), json!(steps));
        }
        if let Some(params) = &request.provider_params {
            for (key, value) in params {
                task.insert(key.clone(), value.clone());
            }
        }
        Value::Object(task)
    }

    fn map_response(&self, payload: &Value, request: &GenerationRequest) -> GenerationResult {
        let Some(rows) = payload.get("data").and_then(Value::as_array) else {
            return GenerationResult::failed(
                Provider::Runware,
                request,
                "Runware payload missing data array",
            )
            .with_raw_response(payload.clone());
        };

        let (width, height) = request.effective_dimensions(512);
        let mut images = Vec::new();
        let mut cost = 0.0;
        let mut generation_id = None;
        for row in rows {
            if row.get("taskType").and_then(Value::as_str) != Some("imageInference") {
                continue;
            }
            if generation_id.is_none() {
                generation_id = row
                    .get("taskUUID")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
            let mut image = GeneratedImage::new(Uuid::new_v4().to_string());
            image.provider_id = row
                .get("imageUUID")
                .and_then(Value::as_str)
                .map(str::to_string);
            image.url = row
                .get("imageURL")
                .and_then(Value::as_str)
                .map(str::to_string);
            image.seed = row.get("seed").and_then(Value::as_i64);
            image.width = Some(width);
            image.height = Some(height);
            image.format = Some(request.output_format.extension().to_string());
            if let Some(row_cost) = row.get("cost").and_then(Value::as_f64) {
                cost += row_cost;
                let mut metadata = Map::new();
                metadata.insert("cost".to_string(), json!(row_cost));
                image.provider_metadata = Some(metadata);
            }
            images.push(image);
        }

        if images.is_empty() {
            return GenerationResult::failed(Provider::Runware, request, "Runware returned no images")
                .with_raw_response(payload.clone());
        }
        let mut result = GenerationResult::completed(
            generation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            Provider::Runware,
            request,
            images,
        )
        .with_raw_response(payload.clone());
        if cost > 0.0 {
            result.cost = Some(cost);
        }
        result
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        match self.try_generate(request).await {
            Ok(result) => result,
            Err(err) => GenerationResult::failed(
                Provider::Runware,
                request,
                format!("Runware generation failed: {err:#}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RunwareProvider {
        RunwareProvider::with_config("https://example.test", Some("key".to_string()))
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("neon city at night", Uuid::new_v4())
    }

    #[tokio::test]
    async fn validate_requires_dimensions_divisible_by_64() {
        let provider = provider();
        assert!(provider.validate(&request()).await);

        let mut odd = request();
        odd.width = 520;
        assert!(!provider.validate(&odd).await);

        let mut short = request();
        short.prompt = "x".to_string();
        assert!(!provider.validate(&short).await);

        let mut many = request();
        many.num_images = 21;
        assert!(!provider.validate(&many).await);
    }

    #[test]
    fn map_request_builds_an_image_inference_task() {
        let provider = provider();
        let mut request = request();
        request.negative_prompt = Some("blurry".to_string());
        request.seed = Some(7);
        request.width = 1000;
        request.height = 1000;
        let task = provider.map_request(&request);
        assert_eq!(task["taskType"], "imageInference");
        assert_eq!(task["positivePrompt"], "neon city at night");
        assert_eq!(task["negativePrompt"], "blurry");
        assert_eq!(task["seed"], 7);
        assert_eq!(task["width"], 960);
        assert_eq!(task["height"], 960);
        assert_eq!(task["outputType"], "URL");
        assert_eq!(task["outputFormat"], "PNG");
    }

    #[test]
    fn provider_params_override_mapped_fields() {
        let provider = provider();
        let mut request = request();
        let mut params = Map::new();
        params.insert("steps".to_string(), json!(12));
        request.provider_params = Some(params);
        let task = provider.map_request(&request);
        assert_eq!(task["steps"], 12);
    }

    #[test]
    fn map_response_collects_images_and_sums_cost() {
        let provider = provider();
        let payload = json!({
            "data": [
                { "taskType": "imageInference", "taskUUID": "task-1",
                  "imageUUID": "u-1", "imageURL": "https://img.test/1.png",
                  "seed": 11, "cost": 0.002 },
                { "taskType": "imageInference", "taskUUID": "task-1",
                  "imageUUID": "u-2", "imageURL": "https://img.test/2.png",
                  "cost": 0.003 },
                { "taskType": "other" },
            ],
        });
        let result = provider.map_response(&payload, &request());
        assert!(result.is_success());
        assert_eq!(result.generation_id, "task-1");
        assert_eq!(result.total_images, 2);
        assert_eq!(result.images[0].seed, Some(11));
        assert!((result.cost.unwrap() - 0.005).abs() < 1e-9);
    }

    #[test]
    fn map_response_without_images_is_a_failure() {
        let provider = provider();
        let payload = json!({ "data": [] });
        let result = provider.map_response(&payload, &request());
        assert!(!result.is_success());
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .contains("no images"));
        assert!(result.provider_response.is_some());
    }
}
