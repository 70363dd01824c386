use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tracing::{info, warn};

use easel_contracts::{PromptOutcome, PromptStats, PromptValidation};

use crate::ollama::{CompressionRequest, PromptCompressor};

pub const OPTIMIZATION_THRESHOLD: usize = 3000;
pub const MAX_PROMPT_LENGTH: usize = 10_000;
pub const TARGET_LENGTH: usize = 2800;

const SYSTEM_PROMPT: &str = "You are an expert at compressing image generation prompts. \
Rewrite the prompt to be shorter while preserving every subject, style cue, \
composition detail, and quality modifier. Remove redundancy and filler words. \
Respond with the compressed prompt only, no commentary.";

const USER_PROMPT_TEMPLATE: &str = "Compress the following image generation prompt to \
under {target} characters while keeping its full meaning:\n\n{prompt}";

#[derive(Debug, Clone, Copy)]
pub struct PromptLimits {
    pub optimization_threshold: usize,
    pub max_length: usize,
    pub target_length: usize,
}

impl Default for PromptLimits {
    fn default() -> Self {
        Self {
            optimization_threshold: OPTIMIZATION_THRESHOLD,
            max_length: MAX_PROMPT_LENGTH,
            target_length: TARGET_LENGTH,
        }
    }
}

/// Gate between callers and providers: short prompts pass untouched,
/// over-threshold prompts are compressed through the backend, and prompts
/// over the hard ceiling are rejected without ever calling the backend.
pub struct PromptValidator {
    compressor: Arc<dyn PromptCompressor>,
    limits: PromptLimits,
}

impl PromptValidator {
    pub fn new(compressor: Arc<dyn PromptCompressor>) -> Self {
        Self {
            compressor,
            limits: PromptLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: PromptLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn compressor_available(&self) -> bool {
        self.compressor.is_available().await
    }

    pub async fn validate_and_optimize(&self, prompt: &str, force: bool) -> PromptValidation {
        let length = prompt.chars().count();
        if length > self.limits.max_length {
            return PromptValidation::too_long(prompt, length, self.limits.max_length);
        }
        if length <= self.limits.optimization_threshold && !force {
            return PromptValidation::valid(prompt, length);
        }
        self.optimize(prompt, length).await
    }

    async fn optimize(&self, prompt: &str, length: usize) -> PromptValidation {
        let started = Instant::now();
        let user_prompt = USER_PROMPT_TEMPLATE
            .replace("{target}", &self.limits.target_length.to_string())
            .replace("{prompt}", prompt);
        let mut request = CompressionRequest::new(user_prompt);
        request.system = Some(SYSTEM_PROMPT.to_string());

        let response = self.compressor.compress(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        let mut validation = PromptValidation::valid(prompt, length);
        validation.optimization_seconds = Some(elapsed);
        validation.metadata.insert("model".to_string(), json!(response.model));
        if let Some(eval_count) = response.eval_count {
            validation
                .metadata
                .insert("eval_count".to_string(), json!(eval_count));
        }

        if !response.is_ok() {
            let message = response
                .error
                .unwrap_or_else(|| "compression backend returned empty text".to_string());
            warn!(error = %message, "prompt optimization failed, using original prompt");
            validation.outcome = PromptOutcome::OptimizationFailed;
            validation.error_message = Some(message);
            return validation;
        }

        let optimized = response.text;
        let optimized_length = optimized.chars().count();
        // An overshoot past the target is accepted; the lengths expose it.
        if optimized_length > self.limits.target_length {
            info!(
                optimized_length,
                target = self.limits.target_length,
                "compressed prompt overshot the target"
            );
        }
        validation.outcome = PromptOutcome::Optimized;
        validation.optimized_prompt = optimized;
        validation.optimized_length = optimized_length;
        info!(
            original = length,
            optimized = optimized_length,
            reduction_pct = validation.reduction_percentage(),
            "prompt optimized"
        );
        validation
    }

    pub fn optimization_stats(&self, prompt: &str) -> PromptStats {
        let character_count = prompt.chars().count();
        let word_count = prompt.split_whitespace().count();
        PromptStats {
            character_count,
            word_count,
            needs_optimization: character_count > self.limits.optimization_threshold,
            exceeds_maximum: character_count > self.limits.max_length,
            optimization_threshold: self.limits.optimization_threshold,
            maximum_length: self.limits.max_length,
            estimated_reduction_needed: character_count
                .saturating_sub(self.limits.target_length),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use crate::ollama::CompressionResponse;

    use super::*;

    struct CountingCompressor {
        calls: AtomicUsize,
        response: CompressionResponse,
    }

    impl CountingCompressor {
        fn returning(text: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: CompressionResponse {
                    text: text.to_string(),
                    model: "test-model".to_string(),
                    total_duration_ms: Some(12),
                    eval_count: Some(90),
                    error: None,
                },
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                response: CompressionResponse {
                    text: String::new(),
                    model: "test-model".to_string(),
                    total_duration_ms: None,
                    eval_count: None,
                    error: Some(message.to_string()),
                },
            }
        }
    }

    #[async_trait]
    impl PromptCompressor for CountingCompressor {
        async fn is_available(&self) -> bool {
            true
        }

        async fn compress(&self, _request: &CompressionRequest) -> CompressionResponse {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    fn validator(compressor: Arc<CountingCompressor>) -> PromptValidator {
        PromptValidator::new(compressor)
    }

    #[tokio::test]
    async fn short_prompts_never_call_the_backend() {
        let compressor = Arc::new(CountingCompressor::returning("unused"));
        let validator = validator(compressor.clone());
        let prompt = "a".repeat(3000);
        let validation = validator.validate_and_optimize(&prompt, false).await;
        assert_eq!(validation.outcome, PromptOutcome::Valid);
        assert_eq!(validation.optimized_prompt, prompt);
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn over_maximum_prompts_are_rejected_without_a_call() {
        let compressor = Arc::new(CountingCompressor::returning("unused"));
        let validator = validator(compressor.clone());
        let prompt = "a".repeat(10_001);
        let validation = validator.validate_and_optimize(&prompt, false).await;
        assert_eq!(validation.outcome, PromptOutcome::TooLong);
        assert!(validation.error_message.is_some());
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn over_threshold_prompts_are_compressed() {
        let compressor = Arc::new(CountingCompressor::returning("a tidy compressed prompt"));
        let validator = validator(compressor.clone());
        let prompt = "a".repeat(5000);
        let validation = validator.validate_and_optimize(&prompt, false).await;
        assert_eq!(validation.outcome, PromptOutcome::Optimized);
        assert_eq!(validation.optimized_prompt, "a tidy compressed prompt");
        assert_eq!(validation.original_length, 5000);
        assert_eq!(validation.optimized_length, 24);
        assert!(validation.optimization_seconds.is_some());
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overshooting_the_target_is_still_optimized() {
        let long_output = "b".repeat(2900);
        let compressor = Arc::new(CountingCompressor::returning(&long_output));
        let validator = validator(compressor);
        let prompt = "a".repeat(4000);
        let validation = validator.validate_and_optimize(&prompt, false).await;
        assert_eq!(validation.outcome, PromptOutcome::Optimized);
        assert_eq!(validation.optimized_length, 2900);
    }

    #[tokio::test]
    async fn backend_failure_falls_back_to_the_original_prompt() {
        let compressor = Arc::new(CountingCompressor::failing("connection refused"));
        let validator = validator(compressor);
        let prompt = "a".repeat(5000);
        let validation = validator.validate_and_optimize(&prompt, false).await;
        assert_eq!(validation.outcome, PromptOutcome::OptimizationFailed);
        assert_eq!(validation.optimized_prompt, prompt);
        assert!(validation
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn force_compresses_even_short_prompts() {
        let compressor = Arc::new(CountingCompressor::returning("short"));
        let validator = validator(compressor.clone());
        let validation = validator.validate_and_optimize("a small prompt", true).await;
        assert_eq!(validation.outcome, PromptOutcome::Optimized);
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stats_are_pure_and_complete() {
        let compressor = Arc::new(CountingCompressor::returning("unused"));
        let validator = validator(compressor.clone());
        let stats = validator.optimization_stats(&"word ".repeat(800));
        assert_eq!(stats.character_count, 4000);
        assert_eq!(stats.word_count, 800);
        assert!(stats.needs_optimization);
        assert!(!stats.exceeds_maximum);
        assert_eq!(stats.estimated_reduction_needed, 1200);
        assert_eq!(compressor.calls.load(Ordering::SeqCst), 0);
    }
}
