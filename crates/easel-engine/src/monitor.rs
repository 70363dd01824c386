use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use crate::providers::VariationSource;

/// Cadence for the durable variation monitor. Production values are long;
/// tests override with millisecond durations.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub initial_delay: Duration,
    pub check_interval: Duration,
    pub error_backoff: Duration,
    pub max_checks: usize,
    pub max_task_retries: usize,
    pub retry_countdown: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            check_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            max_checks: 20,
            max_task_retries: 20,
            retry_countdown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Completed { job_id: String, url: String },
    TimedOut { job_id: String },
}

/// Watch a variation job until it completes or the check budget runs out.
/// A transient status-fetch error costs one check and a longer backoff,
/// it never aborts the monitor.
pub async fn run(
    source: &dyn VariationSource,
    job_id: &str,
    config: MonitorConfig,
) -> MonitorOutcome {
    tokio::time::sleep(config.initial_delay).await;
    for check in 0..config.max_checks {
        match source.variation(job_id).await {
            Ok(payload) => {
                if let Some(url) = completed_url(&payload, job_id) {
                    info!(job_id, check = check + 1, "variation job completed");
                    return MonitorOutcome::Completed {
                        job_id: job_id.to_string(),
                        url,
                    };
                }
                if check + 1 < config.max_checks {
                    tokio::time::sleep(config.check_interval).await;
                }
            }
            Err(err) => {
                warn!(job_id, check = check + 1, error = %err, "variation status fetch failed");
                if check + 1 < config.max_checks {
                    tokio::time::sleep(config.error_backoff).await;
                }
            }
        }
    }
    warn!(job_id, checks = config.max_checks, "variation monitor gave up");
    MonitorOutcome::TimedOut {
        job_id: job_id.to_string(),
    }
}

/// Host-level supervision for the monitor as a retryable unit of work.
/// The unit is re-run only when it errors outright (setup or persistence
/// failures, not job status); a `TimedOut` outcome is terminal and passes
/// through untouched.
pub async fn run_with_retries<F, Fut>(
    config: MonitorConfig,
    mut unit: F,
) -> anyhow::Result<MonitorOutcome>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<MonitorOutcome>>,
{
    let mut last_error = None;
    for retry in 0..=config.max_task_retries {
        if retry > 0 {
            info!(retry, "restarting variation monitor");
            tokio::time::sleep(config.retry_countdown).await;
        }
        match unit(retry).await {
            Ok(outcome) => return Ok(outcome),
            Err(err) => {
                warn!(retry, error = %err, "variation monitor errored");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("variation monitor never ran")))
}

fn completed_url(payload: &Value, job_id: &str) -> Option<String> {
    let rows = payload
        .pointer("/data/generated_image_variation_generic")
        .and_then(Value::as_array)?;
    for row in rows {
        if row.get("id").and_then(Value::as_str) != Some(job_id) {
            continue;
        }
        if row.get("status").and_then(Value::as_str) != Some("COMPLETE") {
            continue;
        }
        if let Some(url) = row.get("url").and_then(Value::as_str) {
            return Some(url.to_string());
        }
    }
    None
}
