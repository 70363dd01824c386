use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::provider::Provider;
use crate::request::GenerationRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }
}

/// One produced image. Created by an adapter; the storage collaborator may
/// fill `local_path`/`local_url` for re-hosted assets. Never mutated after
/// the adapter returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub id: String,
    pub provider_id: Option<String>,
    pub url: Option<String>,
    pub local_url: Option<String>,
    pub local_path: Option<String>,
    pub seed: Option<i64>,
    pub model_id: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<String>,
    pub nsfw: bool,
    pub provider_metadata: Option<Map<String, Value>>,
}

impl GeneratedImage {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider_id: None,
            url: None,
            local_url: None,
            local_path: None,
            seed: None,
            model_id: None,
            width: None,
            height: None,
            format: None,
            nsfw: false,
            provider_metadata: None,
        }
    }
}

/// Universal result shape. One result belongs to exactly one adapter
/// attempt; a fallback chain produces a fresh result per provider tried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub generation_id: String,
    pub provider: Provider,
    pub status: GenerationStatus,
    pub prompt: String,
    pub project_id: Uuid,
    pub images: Vec<GeneratedImage>,
    pub total_images: usize,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cost: Option<f64>,
    pub error_message: Option<String>,
    /// Prompt as submitted by the caller, before optimization. Set by the
    /// orchestrator when the submitted prompt differs.
    pub original_prompt: Option<String>,
    pub provider_response: Option<Value>,
}

impl GenerationResult {
    pub fn completed(
        generation_id: impl Into<String>,
        provider: Provider,
        request: &GenerationRequest,
        images: Vec<GeneratedImage>,
    ) -> Self {
        let now = Utc::now();
        Self {
            generation_id: generation_id.into(),
            provider,
            status: GenerationStatus::Completed,
            prompt: request.prompt.clone(),
            project_id: request.project_id,
            total_images: images.len(),
            images,
            created_at: now,
            completed_at: Some(now),
            cost: None,
            error_message: None,
            original_prompt: None,
            provider_response: None,
        }
    }

    pub fn failed(
        provider: Provider,
        request: &GenerationRequest,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            generation_id: Uuid::new_v4().to_string(),
            provider,
            status: GenerationStatus::Failed,
            prompt: request.prompt.clone(),
            project_id: request.project_id,
            images: Vec::new(),
            total_images: 0,
            created_at: Utc::now(),
            completed_at: None,
            cost: None,
            error_message: Some(error_message.into()),
            original_prompt: None,
            provider_response: None,
        }
    }

    pub fn with_raw_response(mut self, payload: Value) -> Self {
        self.provider_response = Some(payload);
        self
    }

    /// Success for fallback purposes: completed and at least one image.
    /// A completed status with an empty image list is not a success.
    pub fn is_success(&self) -> bool {
        self.status == GenerationStatus::Completed && !self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new("a lighthouse at dusk", Uuid::new_v4())
    }

    #[test]
    fn completed_result_counts_images_and_stamps_completion() {
        let request = request();
        let images = vec![GeneratedImage::new("img-1"), GeneratedImage::new("img-2")];
        let result = GenerationResult::completed("gen-1", Provider::Runware, &request, images);
        assert_eq!(result.total_images, 2);
        assert!(result.completed_at.is_some());
        assert!(result.is_success());
    }

    #[test]
    fn completed_with_no_images_is_not_a_success() {
        let request = request();
        let result =
            GenerationResult::completed("gen-1", Provider::Leonardo, &request, Vec::new());
        assert_eq!(result.status, GenerationStatus::Completed);
        assert!(!result.is_success());
    }

    #[test]
    fn failed_result_carries_the_error_message() {
        let request = request();
        let result = GenerationResult::failed(Provider::Gemini, &request, "backend said no");
        assert_eq!(result.status, GenerationStatus::Failed);
        assert_eq!(result.error_message.as_deref(), Some("backend said no"));
        assert!(result.images.is_empty());
        assert!(!result.is_success());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&GenerationStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
