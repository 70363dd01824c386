pub mod error;
pub mod jobs;
pub mod provider;
pub mod request;
pub mod result;
pub mod storage;
pub mod validation;

pub use error::GenerationError;
pub use jobs::{GenerationJob, JobStatus, JobStore, MemoryJobStore};
pub use provider::{AspectRatio, OutputFormat, Provider, PREFERENCE_ORDER};
pub use request::GenerationRequest;
pub use result::{GeneratedImage, GenerationResult, GenerationStatus};
pub use storage::{LocalMediaStore, MediaStore, StoredImage};
pub use validation::{PromptOutcome, PromptStats, PromptValidation};
