use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::provider::{AspectRatio, OutputFormat, Provider};

/// Universal generation request accepted by every provider adapter. The
/// orchestrator may replace `prompt` with its optimized form before the
/// request reaches an adapter; the original is retained on the result for
/// audit. Adapters treat the request as immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: Option<AspectRatio>,
    pub num_images: u32,
    pub seed: Option<i64>,
    pub model_id: Option<String>,
    pub preset_style: Option<String>,
    pub guidance_scale: Option<f64>,
    pub steps: Option<u32>,
    pub output_format: OutputFormat,
    pub provider: Option<Provider>,
    pub provider_params: Option<Map<String, Value>>,
    pub project_id: Uuid,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, project_id: Uuid) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: None,
            width: 512,
            height: 512,
            aspect_ratio: None,
            num_images: 1,
            seed: None,
            model_id: None,
            preset_style: Some("DYNAMIC".to_string()),
            guidance_scale: Some(7.5),
            steps: Some(30),
            output_format: OutputFormat::Png,
            provider: None,
            provider_params: None,
            project_id,
        }
    }

    /// Effective width/height once an aspect ratio override is applied.
    pub fn effective_dimensions(&self, base_size: u32) -> (u32, u32) {
        match self.aspect_ratio {
            Some(ratio) => ratio.dimensions(base_size),
            None => (self.width, self.height),
        }
    }

    pub fn prompt_chars(&self) -> usize {
        self.prompt.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_mirror_the_universal_contract() {
        let request = GenerationRequest::new("a boat", Uuid::new_v4());
        assert_eq!(request.width, 512);
        assert_eq!(request.height, 512);
        assert_eq!(request.num_images, 1);
        assert_eq!(request.output_format, OutputFormat::Png);
        assert_eq!(request.preset_style.as_deref(), Some("DYNAMIC"));
        assert!(request.provider.is_none());
    }

    #[test]
    fn aspect_ratio_overrides_explicit_dimensions() {
        let mut request = GenerationRequest::new("a boat", Uuid::new_v4());
        request.width = 1024;
        request.height = 768;
        assert_eq!(request.effective_dimensions(512), (1024, 768));
        request.aspect_ratio = Some(AspectRatio::Portrait);
        let (w, h) = request.effective_dimensions(512);
        assert_eq!(h, 512);
        assert!(w < h);
    }

    #[test]
    fn prompt_chars_counts_scalars_not_bytes() {
        let request = GenerationRequest::new("héllo", Uuid::new_v4());
        assert_eq!(request.prompt_chars(), 5);
        assert!(request.prompt.len() > 5);
    }
}
