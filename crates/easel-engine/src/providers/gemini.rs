use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::warn;
use uuid::Uuid;

use easel_contracts::{
    GeneratedImage, GenerationRequest, GenerationResult, MediaStore, Provider,
};

use crate::providers::{non_empty_env, response_json_or_error, truncate_text, ImageProvider, ModelInfo};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Fully synchronous provider: the API returns base64 image data inline,
/// which is persisted through the media store before the adapter returns.
pub struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    model: String,
    http: Client,
    store: Arc<dyn MediaStore>,
}

impl GeminiProvider {
    pub fn new(store: Arc<dyn MediaStore>) -> Self {
        Self::with_config(
            non_empty_env("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            non_empty_env("GEMINI_API_KEY"),
            store,
        )
    }

    pub fn with_config(
        api_base: impl Into<String>,
        api_key: Option<String>,
        store: Arc<dyn MediaStore>,
    ) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            http: Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            store,
        }
    }

    fn extension_for_mime(mime: &str) -> &'static str {
        match mime {
            "image/jpeg" => "jpg",
            "image/webp" => "webp",
            _ => "png",
        }
    }

    async fn try_generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let api_key = self.api_key.as_deref().context("GEMINI_API_KEY not set")?;
        let payload = self.map_request(request);
        let endpoint = format!(
            "{}/v1beta/models/{}:generateContent",
            self.api_base, self.model
        );
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let raw = response_json_or_error("Gemini", response).await?;
        let mut result = self.map_response(&raw, request);
        self.persist_inline_images(&mut result, request).await;
        Ok(result)
    }

    /// Decode every inline payload, hand the bytes to the media store, and
    /// replace the raw base64 in the metadata with a short preview.
    async fn persist_inline_images(&self, result: &mut GenerationResult, request: &GenerationRequest) {
        for image in &mut result.images {
            let Some(metadata) = image.provider_metadata.as_mut() else {
                continue;
            };
            let Some(data) = metadata.get("base64_data").and_then(Value::as_str) else {
                continue;
            };
            let data = data.to_string();
            match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => {
                    let mime = metadata
                        .get("mime_type")
                        .and_then(Value::as_str)
                        .unwrap_or("image/png");
                    let extension = Self::extension_for_mime(mime);
                    match self
                        .store
                        .save_image(request.project_id, &image.id, extension, &bytes)
                        .await
                    {
                        Ok(stored) => {
                            image.local_path = Some(stored.path.to_string_lossy().to_string());
                            image.local_url = Some(stored.url);
                        }
                        Err(err) => {
                            warn!(image_id = %image.id, error = %err, "failed to persist Gemini image");
                        }
                    }
                }
                Err(err) => {
                    warn!(image_id = %image.id, error = %err, "Gemini inline data is not valid base64");
                }
            }
            metadata.insert(
                "base64_data".to_string(),
                Value::String(truncate_text(&data, 100)),
            );
        }
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn id(&self) -> Provider {
        Provider::Gemini
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: DEFAULT_MODEL.to_string(),
            name: "Gemini 2.5 Flash Image".to_string(),
            description: "Fast image generation with Gemini 2.5 Flash".to_string(),
        }]
    }

    async fn validate(&self, request: &GenerationRequest) -> bool {
        if self.api_key.is_none() {
            return false;
        }
        let chars = request.prompt_chars();
        if chars == 0 || chars > 2000 {
            return false;
        }
        // Unsupported knobs degrade rather than reject.
        if request.num_images > 1 {
            warn!("Gemini generates one image per request; extra images are dropped");
        }
        if request.negative_prompt.is_some() {
            warn!("Gemini does not support negative prompts; ignoring");
        }
        if request.seed.is_some() {
            warn!("Gemini does not support seeds; ignoring");
        }
        true
    }

    fn map_request(&self, request: &GenerationRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{ "parts": [{ "text": format!("Generate an image: {}", request.prompt) }] }]),
        );
        payload.insert(
            "generationConfig".to_string(),
            json!({ "responseModalities": ["TEXT", "IMAGE"] }),
        );
        if let Some(params) = &request.provider_params {
            for (key, value) in params {
                payload.insert(key.clone(), value.clone());
            }
        }
        Value::Object(payload)
    }

    fn map_response(&self, payload: &Value, request: &GenerationRequest) -> GenerationResult {
        let Some(candidates) = payload.get("candidates").and_then(Value::as_array) else {
            return GenerationResult::failed(
                Provider::Gemini,
                request,
                "Gemini payload missing candidates",
            )
            .with_raw_response(payload.clone());
        };

        let mut images = Vec::new();
        for candidate in candidates {
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();
            for part in parts {
                let Some(inline) = part.get("inlineData") else {
                    continue;
                };
                let Some(data) = inline.get("data").and_then(Value::as_str) else {
                    continue;
                };
                let mime = inline
                    .get("mimeType")
                    .and_then(Value::as_str)
                    .unwrap_or("image/png");
                let mut image = GeneratedImage::new(Uuid::new_v4().to_string());
                image.width = Some(if request.width > 0 { request.width } else { 1024 });
                image.height = Some(if request.height > 0 { request.height } else { 1024 });
                image.format = Some(Self::extension_for_mime(mime).to_string());
                image.model_id = Some(self.model.clone());
                let mut metadata = Map::new();
                metadata.insert("mime_type".to_string(), Value::String(mime.to_string()));
                metadata.insert("base64_data".to_string(), Value::String(data.to_string()));
                image.provider_metadata = Some(metadata);
                images.push(image);
            }
        }

        if images.is_empty() {
            return GenerationResult::failed(
                Provider::Gemini,
                request,
                "Gemini returned no inline images",
            )
            .with_raw_response(payload.clone());
        }
        GenerationResult::completed(
            Uuid::new_v4().to_string(),
            Provider::Gemini,
            request,
            images,
        )
        .with_raw_response(payload.clone())
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        match self.try_generate(request).await {
            Ok(result) => result,
            Err(err) => GenerationResult::failed(
                Provider::Gemini,
                request,
                format!("Gemini generation failed: {err:#}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use easel_contracts::LocalMediaStore;

    use super::*;

    fn provider(store: Arc<dyn MediaStore>) -> GeminiProvider {
        GeminiProvider::with_config("https://example.test", Some("key".to_string()), store)
    }

    fn temp_provider() -> (tempfile::TempDir, GeminiProvider) {
        let temp = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalMediaStore::new(temp.path()));
        (temp, provider(store))
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new("an origami fox", Uuid::new_v4())
    }

    #[tokio::test]
    async fn validate_enforces_the_prompt_ceiling() {
        let (_temp, provider) = temp_provider();
        assert!(provider.validate(&request()).await);
        let mut long = request();
        long.prompt = "x".repeat(2001);
        assert!(!provider.validate(&long).await);
    }

    #[test]
    fn map_request_wraps_the_prompt_in_contents() {
        let (_temp, provider) = temp_provider();
        let payload = provider.map_request(&request());
        let text = payload
            .pointer("/contents/0/parts/0/text")
            .and_then(Value::as_str)
            .unwrap();
        assert_eq!(text, "Generate an image: an origami fox");
        assert!(payload.pointer("/generationConfig/responseModalities").is_some());
    }

    #[test]
    fn map_response_extracts_inline_image_data() {
        let (_temp, provider) = temp_provider();
        let payload = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } },
                ]},
            }],
        });
        let result = provider.map_response(&payload, &request());
        assert!(result.is_success());
        assert_eq!(result.total_images, 1);
        let metadata = result.images[0].provider_metadata.as_ref().unwrap();
        assert_eq!(metadata["mime_type"], "image/png");
        assert_eq!(metadata["base64_data"], "aGVsbG8=");
    }

    #[test]
    fn map_response_without_candidates_is_a_failure() {
        let (_temp, provider) = temp_provider();
        let payload = json!({ "error": { "message": "quota" } });
        let result = provider.map_response(&payload, &request());
        assert!(!result.is_success());
        assert_eq!(result.provider_response, Some(payload));
    }

    #[tokio::test]
    async fn persist_inline_images_rehosts_bytes_and_truncates_metadata() {
        let (_temp, provider) = temp_provider();
        let request = request();
        let payload = json!({
            "candidates": [{
                "content": { "parts": [
                    { "inlineData": { "mimeType": "image/png", "data": "aGVsbG8=" } },
                ]},
            }],
        });
        let mut result = provider.map_response(&payload, &request);
        provider.persist_inline_images(&mut result, &request).await;

        let image = &result.images[0];
        let local_path = image.local_path.as_ref().unwrap();
        assert!(std::path::Path::new(local_path).exists());
        assert_eq!(
            std::fs::read(local_path).unwrap(),
            b"hello",
            "stored bytes should be the decoded inline data"
        );
        assert!(image.local_url.as_ref().unwrap().starts_with("/storage/"));
        let metadata = image.provider_metadata.as_ref().unwrap();
        assert_eq!(metadata["base64_data"], "aGVsbG8=");
    }
}
