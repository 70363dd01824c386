use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use easel_contracts::{GenerationRequest, GenerationResult, Provider};

mod comfyui;
mod gemini;
mod leonardo;
mod runware;

pub use comfyui::ComfyUiProvider;
pub use gemini::GeminiProvider;
pub use leonardo::{LeonardoProvider, VariationSource};
pub use runware::RunwareProvider;

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Universal adapter contract. `map_request` and `map_response` are pure;
/// `generate` performs the provider call(s) and always returns a result,
/// converting network and vendor errors into a `failed` result rather than
/// propagating them. Retry and fallback live in the orchestrator, never
/// inside an adapter.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn id(&self) -> Provider;

    fn models(&self) -> Vec<ModelInfo>;

    /// Structural check against provider constraints. Only ComfyUI touches
    /// the network here: reachability of the local server is its
    /// validation precondition.
    async fn validate(&self, request: &GenerationRequest) -> bool;

    fn map_request(&self, request: &GenerationRequest) -> Value;

    /// Normalize a raw provider payload into the universal shape. Parse
    /// failures produce a `failed` result carrying the raw payload for
    /// diagnosis.
    fn map_response(&self, payload: &Value, request: &GenerationRequest) -> GenerationResult;

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult;
}

/// Closed registry keyed by the provider enum. Iteration order follows the
/// enum's declaration order, which is the fixed preference order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<Provider, Box<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn ImageProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn get(&self, provider: Provider) -> Option<&dyn ImageProvider> {
        self.providers.get(&provider).map(|boxed| boxed.as_ref())
    }

    pub fn contains(&self, provider: Provider) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn ids(&self) -> Vec<Provider> {
        self.providers.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

pub(crate) async fn response_json_or_error(
    provider: &str,
    response: reqwest::Response,
) -> anyhow::Result<Value> {
    use anyhow::Context as _;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "{provider} API error ({}): {}",
            status.as_u16(),
            truncate_text(&body, 512)
        );
    }
    response
        .json::<Value>()
        .await
        .with_context(|| format!("{provider} returned a non-JSON payload"))
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let text: String = value.chars().take(max_chars).collect();
    format!("{text}…")
}
