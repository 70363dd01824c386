use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptOutcome {
    Valid,
    Optimized,
    TooLong,
    OptimizationFailed,
}

/// Result of one validation/optimization pass. Computed fresh per call,
/// never persisted. `optimized_prompt` always holds the prompt the caller
/// should submit: the rewritten text on success, the original otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptValidation {
    pub outcome: PromptOutcome,
    pub original_prompt: String,
    pub optimized_prompt: String,
    pub original_length: usize,
    pub optimized_length: usize,
    pub optimization_seconds: Option<f64>,
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
}

impl PromptValidation {
    pub fn valid(prompt: &str, length: usize) -> Self {
        Self {
            outcome: PromptOutcome::Valid,
            original_prompt: prompt.to_string(),
            optimized_prompt: prompt.to_string(),
            original_length: length,
            optimized_length: length,
            optimization_seconds: None,
            error_message: None,
            metadata: Map::new(),
        }
    }

    pub fn too_long(prompt: &str, length: usize, max: usize) -> Self {
        Self {
            outcome: PromptOutcome::TooLong,
            original_prompt: prompt.to_string(),
            optimized_prompt: prompt.to_string(),
            original_length: length,
            optimized_length: length,
            optimization_seconds: None,
            error_message: Some(format!(
                "prompt exceeds maximum length of {max} characters"
            )),
            metadata: Map::new(),
        }
    }

    pub fn size_reduction(&self) -> i64 {
        self.original_length as i64 - self.optimized_length as i64
    }

    pub fn reduction_percentage(&self) -> f64 {
        if self.original_length == 0 {
            return 0.0;
        }
        let pct = self.size_reduction() as f64 / self.original_length as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// Pure prompt analysis; no network I/O, always succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptStats {
    pub character_count: usize,
    pub word_count: usize,
    pub needs_optimization: bool,
    pub exceeds_maximum: bool,
    pub optimization_threshold: usize,
    pub maximum_length: usize,
    pub estimated_reduction_needed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_keeps_prompt_unchanged() {
        let validation = PromptValidation::valid("a cat", 5);
        assert_eq!(validation.outcome, PromptOutcome::Valid);
        assert_eq!(validation.optimized_prompt, "a cat");
        assert_eq!(validation.size_reduction(), 0);
    }

    #[test]
    fn too_long_sets_error_and_no_optimized_text() {
        let validation = PromptValidation::too_long("x", 12000, 10000);
        assert_eq!(validation.outcome, PromptOutcome::TooLong);
        assert!(validation
            .error_message
            .as_deref()
            .unwrap()
            .contains("10000"));
        assert_eq!(validation.optimized_prompt, validation.original_prompt);
    }

    #[test]
    fn reduction_percentage_rounds_to_two_places() {
        let mut validation = PromptValidation::valid("p", 3000);
        validation.optimized_length = 2000;
        assert_eq!(validation.size_reduction(), 1000);
        assert_eq!(validation.reduction_percentage(), 33.33);
    }

    #[test]
    fn reduction_percentage_handles_empty_prompt() {
        let validation = PromptValidation::valid("", 0);
        assert_eq!(validation.reduction_percentage(), 0.0);
    }
}
