use thiserror::Error;

use crate::provider::Provider;

#[derive(Debug, Error)]
pub enum GenerationError {
    /// Bad input shape, rejected before any network call.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No adapter registered or reachable for the request.
    #[error("no provider available: {0}")]
    ProviderNotAvailable(String),

    /// The vendor rejected or errored; recoverable via fallback.
    #[error("{provider} request failed: {message}")]
    ProviderRequest { provider: Provider, message: String },

    /// Compression backend unreachable or returned malformed output;
    /// recoverable, the caller falls back to the original prompt.
    #[error("prompt optimization failed: {0}")]
    Optimization(String),

    /// Poll budget exhausted; terminal for the attempt, fallback may
    /// still advance to the next provider.
    #[error("timed out after {attempts} polling attempts")]
    Timeout { attempts: usize },

    /// Prompt exceeds the hard ceiling; fatal, no provider attempted.
    #[error("prompt of {length} characters exceeds maximum of {max}")]
    PromptTooLong { length: usize, max: usize },
}

impl GenerationError {
    pub fn provider_request(provider: Provider, message: impl Into<String>) -> Self {
        GenerationError::ProviderRequest {
            provider,
            message: message.into(),
        }
    }
}
