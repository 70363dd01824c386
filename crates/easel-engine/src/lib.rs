pub mod monitor;
pub mod ollama;
pub mod poll;
pub mod providers;
pub mod validator;

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use easel_contracts::{
    GenerationError, GenerationRequest, GenerationResult, JobStatus, JobStore, MediaStore,
    PromptOutcome, PromptStats, PromptValidation, Provider, PREFERENCE_ORDER,
};

pub use crate::ollama::{OllamaClient, OllamaConfig, PromptCompressor};
pub use crate::providers::{
    ComfyUiProvider, GeminiProvider, ImageProvider, LeonardoProvider, ProviderRegistry,
    RunwareProvider,
};
pub use crate::validator::{PromptValidator, MAX_PROMPT_LENGTH, OPTIMIZATION_THRESHOLD};

/// Concurrent generations allowed in one batch.
const BATCH_LIMIT: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct GenerateOptions {
    pub enable_fallback: bool,
    /// Cap on total providers tried for one request, fallbacks included.
    pub max_retries: usize,
    pub validate_prompt: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            enable_fallback: true,
            max_retries: 2,
            validate_prompt: true,
        }
    }
}

/// Front door for image generation: selects a provider, validates and
/// optionally compresses the prompt, runs the adapter, and walks the
/// fallback chain in fixed preference order when attempts fail. Every
/// attempt is recorded in the job store before and after the adapter call.
pub struct GenerationEngine {
    providers: ProviderRegistry,
    validator: PromptValidator,
    jobs: Arc<dyn JobStore>,
    batch_limit: Arc<Semaphore>,
}

impl GenerationEngine {
    pub fn new(validator: PromptValidator, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            providers: ProviderRegistry::new(),
            validator,
            jobs,
            batch_limit: Arc::new(Semaphore::new(BATCH_LIMIT)),
        }
    }

    /// Production wiring: every adapter configured from the environment,
    /// prompt compression through a local Ollama server.
    pub fn from_env(store: Arc<dyn MediaStore>, jobs: Arc<dyn JobStore>) -> Self {
        let validator = PromptValidator::new(Arc::new(OllamaClient::default()));
        let mut engine = Self::new(validator, jobs);
        engine.register(Box::new(LeonardoProvider::new()));
        engine.register(Box::new(RunwareProvider::new()));
        engine.register(Box::new(GeminiProvider::new(store)));
        engine.register(Box::new(ComfyUiProvider::new()));
        engine
    }

    pub fn register(&mut self, provider: Box<dyn ImageProvider>) {
        self.providers.register(provider);
    }

    pub fn available_providers(&self) -> Vec<Provider> {
        self.providers.ids()
    }

    /// Explicit pin wins when registered; otherwise the first registered
    /// provider in preference order.
    pub fn select_provider(&self, request: &GenerationRequest) -> Result<Provider, GenerationError> {
        if let Some(pinned) = request.provider {
            if self.providers.contains(pinned) {
                return Ok(pinned);
            }
            return Err(GenerationError::ProviderNotAvailable(pinned.to_string()));
        }
        PREFERENCE_ORDER
            .into_iter()
            .find(|provider| self.providers.contains(*provider))
            .ok_or_else(|| {
                GenerationError::ProviderNotAvailable("no providers registered".to_string())
            })
    }

    /// Structural pre-check without dispatching: is this request inside
    /// the named provider's constraints right now.
    pub async fn validate_request_for_provider(
        &self,
        request: &GenerationRequest,
        provider: Provider,
    ) -> bool {
        match self.providers.get(provider) {
            Some(adapter) => adapter.validate(request).await,
            None => false,
        }
    }

    pub async fn generate_images(
        &self,
        request: &GenerationRequest,
        options: GenerateOptions,
    ) -> GenerationResult {
        let mut request = request.clone();
        let mut original_prompt = None;

        if options.validate_prompt {
            let validation = self
                .validator
                .validate_and_optimize(&request.prompt, false)
                .await;
            match validation.outcome {
                PromptOutcome::TooLong => {
                    let provider = request.provider.unwrap_or(Provider::Leonardo);
                    let message = validation
                        .error_message
                        .unwrap_or_else(|| "prompt exceeds maximum length".to_string());
                    return GenerationResult::failed(provider, &request, message);
                }
                PromptOutcome::Optimized => {
                    original_prompt = Some(request.prompt.clone());
                    request.prompt = validation.optimized_prompt;
                }
                PromptOutcome::OptimizationFailed => {
                    warn!(
                        error = validation.error_message.as_deref().unwrap_or("unknown"),
                        "prompt optimization unavailable, submitting original prompt"
                    );
                }
                PromptOutcome::Valid => {}
            }
        }

        let selected = match self.select_provider(&request) {
            Ok(provider) => provider,
            Err(err) => {
                let provider = request.provider.unwrap_or(Provider::Leonardo);
                return GenerationResult::failed(provider, &request, err.to_string());
            }
        };

        let mut candidates = vec![selected];
        if options.enable_fallback {
            for provider in PREFERENCE_ORDER {
                if candidates.len() >= options.max_retries {
                    break;
                }
                if provider == selected {
                    continue;
                }
                let Some(adapter) = self.providers.get(provider) else {
                    continue;
                };
                if adapter.validate(&request).await {
                    candidates.push(provider);
                }
            }
        }

        let mut last_error = String::from("no provider attempted");
        for provider in &candidates {
            let mut result = self.attempt(*provider, &request).await;
            if result.is_success() {
                result.original_prompt = original_prompt;
                return result;
            }
            last_error = result
                .error_message
                .unwrap_or_else(|| "provider returned no images".to_string());
            warn!(provider = %provider, error = %last_error, "generation attempt failed");
        }

        let mut failed = GenerationResult::failed(
            candidates[0],
            &request,
            format!("All providers failed. Last error: {last_error}"),
        );
        failed.original_prompt = original_prompt;
        failed
    }

    /// Single-provider path with no fallback. The prompt still goes through
    /// validation.
    pub async fn generate_with_provider(
        &self,
        request: &GenerationRequest,
        provider: Provider,
    ) -> GenerationResult {
        let mut pinned = request.clone();
        pinned.provider = Some(provider);
        let options = GenerateOptions {
            enable_fallback: false,
            ..GenerateOptions::default()
        };
        self.generate_images(&pinned, options).await
    }

    /// Run a batch concurrently under the batch limit. Result order matches
    /// request order; a panicking or failing slot never poisons siblings.
    pub async fn batch_generate(
        self: &Arc<Self>,
        requests: Vec<GenerationRequest>,
        options: GenerateOptions,
    ) -> Vec<GenerationResult> {
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let engine = Arc::clone(self);
            let limit = Arc::clone(&self.batch_limit);
            handles.push((
                request.clone(),
                tokio::spawn(async move {
                    // The semaphore lives as long as the engine, so acquire
                    // only fails if it is closed, which never happens here.
                    let _permit = limit.acquire_owned().await.ok();
                    engine.generate_images(&request, options).await
                }),
            ));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (request, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(err) => {
                    warn!(error = %err, "batch generation task aborted");
                    let provider = request.provider.unwrap_or(Provider::Leonardo);
                    results.push(GenerationResult::failed(
                        provider,
                        &request,
                        format!("generation task aborted: {err}"),
                    ));
                }
            }
        }
        results
    }

    pub async fn optimize_prompt_only(&self, prompt: &str) -> PromptValidation {
        self.validator.validate_and_optimize(prompt, true).await
    }

    pub fn prompt_stats(&self, prompt: &str) -> PromptStats {
        self.validator.optimization_stats(prompt)
    }

    pub async fn compressor_available(&self) -> bool {
        self.validator.compressor_available().await
    }

    async fn attempt(&self, provider: Provider, request: &GenerationRequest) -> GenerationResult {
        let Some(adapter) = self.providers.get(provider) else {
            return GenerationResult::failed(
                provider,
                request,
                GenerationError::ProviderNotAvailable(provider.to_string()).to_string(),
            );
        };

        // One job row per attempt, keyed by an id minted here so the
        // terminal update always lands on the row just written.
        let attempt_id = Uuid::new_v4().to_string();
        if let Err(err) = self.jobs.save_job(request, provider, &attempt_id).await {
            warn!(%provider, %attempt_id, error = %err, "failed to persist pending job");
        }
        info!(%provider, %attempt_id, "dispatching generation");

        let result = adapter.generate(request).await;

        let update = if result.is_success() {
            self.jobs
                .update_job(
                    &attempt_id,
                    provider,
                    JobStatus::Completed,
                    Some(&result.images),
                    None,
                )
                .await
        } else {
            let message = result
                .error_message
                .as_deref()
                .unwrap_or("provider returned no images");
            self.jobs
                .update_job(&attempt_id, provider, JobStatus::Failed, None, Some(message))
                .await
        };
        if let Err(err) = update {
            warn!(%provider, %attempt_id, error = %err, "failed to persist job outcome");
        }
        result
    }
}
