use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::provider::Provider;
use crate::request::GenerationRequest;
use crate::result::GeneratedImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// Durable record of one adapter attempt, keyed by
/// (generation_id, provider): the same logical request may be retried
/// against a different provider and both attempts are tracked. A job is
/// created pending and transitions exactly once to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub generation_id: String,
    pub provider: Provider,
    pub project_id: Uuid,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: u32,
    pub height: u32,
    pub num_images: u32,
    pub seed: Option<i64>,
    pub model_id: Option<String>,
    pub status: JobStatus,
    pub result_images: Option<Vec<GeneratedImage>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persistence contract owned by an external collaborator. Failures to
/// persist must never abort an in-flight generation; the orchestrator
/// logs and swallows them.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save_job(
        &self,
        request: &GenerationRequest,
        provider: Provider,
        generation_id: &str,
    ) -> anyhow::Result<Uuid>;

    async fn update_job(
        &self,
        generation_id: &str,
        provider: Provider,
        status: JobStatus,
        images: Option<&[GeneratedImage]>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()>;

    async fn jobs_for_generation(&self, generation_id: &str) -> anyhow::Result<Vec<GenerationJob>>;
}

/// In-process store used as the default wiring and in tests.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<GenerationJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<GenerationJob> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn save_job(
        &self,
        request: &GenerationRequest,
        provider: Provider,
        generation_id: &str,
    ) -> anyhow::Result<Uuid> {
        let job = GenerationJob {
            id: Uuid::new_v4(),
            generation_id: generation_id.to_string(),
            provider,
            project_id: request.project_id,
            prompt: request.prompt.clone(),
            negative_prompt: request.negative_prompt.clone(),
            width: request.width,
            height: request.height,
            num_images: request.num_images,
            seed: request.seed,
            model_id: request.model_id.clone(),
            status: JobStatus::Pending,
            result_images: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let id = job.id;
        self.jobs.lock().await.push(job);
        Ok(id)
    }

    async fn update_job(
        &self,
        generation_id: &str,
        provider: Provider,
        status: JobStatus,
        images: Option<&[GeneratedImage]>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs
            .iter_mut()
            .find(|job| job.generation_id == generation_id && job.provider == provider)
        else {
            warn!(generation_id, %provider, "update for unknown generation job");
            return Ok(());
        };
        if job.status != JobStatus::Pending {
            warn!(
                generation_id,
                %provider,
                current = ?job.status,
                "ignoring update for a job already in a terminal state"
            );
            return Ok(());
        }
        job.status = status;
        if let Some(images) = images {
            job.result_images = Some(images.to_vec());
        }
        if let Some(error_message) = error_message {
            job.error_message = Some(error_message.to_string());
        }
        if status == JobStatus::Completed {
            job.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn jobs_for_generation(&self, generation_id: &str) -> anyhow::Result<Vec<GenerationJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.generation_id == generation_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> GenerationRequest {
        GenerationRequest::new("a quiet harbor", Uuid::new_v4())
    }

    #[tokio::test]
    async fn save_then_update_transitions_to_terminal_state() {
        let store = MemoryJobStore::new();
        let request = request();
        store
            .save_job(&request, Provider::Leonardo, "gen-1")
            .await
            .unwrap();

        let images = vec![GeneratedImage::new("img-1")];
        store
            .update_job("gen-1", Provider::Leonardo, JobStatus::Completed, Some(&images), None)
            .await
            .unwrap();

        let jobs = store.jobs_for_generation("gen-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::Completed);
        assert!(jobs[0].completed_at.is_some());
        assert_eq!(jobs[0].result_images.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attempts_against_different_providers_are_tracked_separately() {
        let store = MemoryJobStore::new();
        let request = request();
        store
            .save_job(&request, Provider::Leonardo, "gen-1")
            .await
            .unwrap();
        store
            .save_job(&request, Provider::Runware, "gen-1")
            .await
            .unwrap();

        store
            .update_job("gen-1", Provider::Leonardo, JobStatus::Failed, None, Some("boom"))
            .await
            .unwrap();

        let jobs = store.jobs_for_generation("gen-1").await.unwrap();
        assert_eq!(jobs.len(), 2);
        let leonardo = jobs.iter().find(|j| j.provider == Provider::Leonardo).unwrap();
        let runware = jobs.iter().find(|j| j.provider == Provider::Runware).unwrap();
        assert_eq!(leonardo.status, JobStatus::Failed);
        assert_eq!(leonardo.error_message.as_deref(), Some("boom"));
        assert_eq!(runware.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn a_terminal_job_is_never_reopened() {
        let store = MemoryJobStore::new();
        let request = request();
        store
            .save_job(&request, Provider::Leonardo, "gen-1")
            .await
            .unwrap();
        store
            .update_job("gen-1", Provider::Leonardo, JobStatus::Failed, None, Some("boom"))
            .await
            .unwrap();

        let images = vec![GeneratedImage::new("img-1")];
        store
            .update_job("gen-1", Provider::Leonardo, JobStatus::Completed, Some(&images), None)
            .await
            .unwrap();

        let jobs = store.jobs_for_generation("gen-1").await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Failed);
        assert_eq!(jobs[0].error_message.as_deref(), Some("boom"));
        assert!(jobs[0].result_images.is_none());
    }

    #[tokio::test]
    async fn update_for_unknown_job_is_a_no_op() {
        let store = MemoryJobStore::new();
        store
            .update_job("missing", Provider::Gemini, JobStatus::Failed, None, Some("x"))
            .await
            .unwrap();
        assert!(store.all().await.is_empty());
    }
}
