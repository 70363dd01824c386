use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use easel_contracts::{GeneratedImage, GenerationRequest, GenerationResult, Provider};

use crate::poll::{poll_until, PollPlan};
use crate::providers::{non_empty_env, response_json_or_error, ImageProvider, ModelInfo};

const DEFAULT_BASE_URL: &str = "http://localhost:8188";
const DEFAULT_CHECKPOINT: &str = "flux1-dev-fp8.safetensors";

/// Adapter for a self-hosted ComfyUI server. Requests are expressed as a
/// workflow graph; completion is observed through the queue and history
/// endpoints rather than a job status field.
pub struct ComfyUiProvider {
    base_url: String,
    http: Client,
    poll: PollPlan,
}

impl ComfyUiProvider {
    pub fn new() -> Self {
        Self::with_base_url(
            non_empty_env("COMFYUI_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        )
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            poll: PollPlan::LOCAL_WORKFLOW,
        }
    }

    pub fn with_poll_plan(mut self, poll: PollPlan) -> Self {
        self.poll = poll;
        self
    }

    async fn server_reachable(&self) -> bool {
        let endpoint = format!("{}/system_stats", self.base_url);
        let probe = self
            .http
            .get(&endpoint)
            .timeout(Duration::from_secs(5))
            .send()
            .await;
        match probe {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(%endpoint, error = %err, "ComfyUI server unreachable");
                false
            }
        }
    }

    /// Minimal Flux text-to-image graph. Node ids mirror the stock ComfyUI
    /// template so overrides written against it keep working.
    fn workflow(&self, request: &GenerationRequest) -> Value {
        let (width, height) = request.effective_dimensions(512);
        let seed = request
            .seed
            .unwrap_or_else(|| (Uuid::new_v4().as_u128() % u32::MAX as u128) as i64);
        let mut workflow = json!({
            "3": {
                "class_type": "KSampler",
                "inputs": {
                    "seed": seed,
                    "steps": request.steps.unwrap_or(30),
                    "cfg": request.guidance_scale.unwrap_or(7.5),
                    "sampler_name": "euler",
                    "scheduler": "normal",
                    "denoise": 1.0,
                    "model": ["4", 0],
                    "positive": ["6", 0],
                    "negative": ["7", 0],
                    "latent_image": ["5", 0],
                },
            },
            "4": {
                "class_type": "CheckpointLoaderSimple",
                "inputs": {
                    "ckpt_name": request.model_id.as_deref().unwrap_or(DEFAULT_CHECKPOINT),
                },
            },
            "5": {
                "class_type": "EmptyLatentImage",
                "inputs": {
                    "width": width,
                    "height": height,
                    "batch_size": request.num_images,
                },
            },
            "6": {
                "class_type": "CLIPTextEncode",
                "inputs": { "text": request.prompt, "clip": ["4", 1] },
            },
            "7": {
                "class_type": "CLIPTextEncode",
                "inputs": {
                    "text": request.negative_prompt.as_deref().unwrap_or(""),
                    "clip": ["4", 1],
                },
            },
            "8": {
                "class_type": "VAEDecode",
                "inputs": { "samples": ["3", 0], "vae": ["4", 2] },
            },
            "9": {
                "class_type": "SaveImage",
                "inputs": { "filename_prefix": "easel", "images": ["8", 0] },
            },
        });
        if let Some(params) = &request.provider_params {
            if let Some(overrides) = params.get("workflow_overrides").and_then(Value::as_object) {
                for (node, patch) in overrides {
                    merge_node(&mut workflow, node, patch);
                }
            }
        }
        workflow
    }

    async fn queue_position(&self, prompt_id: &str) -> anyhow::Result<Option<&'static str>> {
        let endpoint = format!("{}/queue", self.base_url);
        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("ComfyUI queue check failed ({endpoint})"))?;
        let queue = response_json_or_error("ComfyUI", response).await?;
        for (key, label) in [("queue_running", "running"), ("queue_pending", "pending")] {
            let entries = queue.get(key).and_then(Value::as_array).cloned().unwrap_or_default();
            for entry in &entries {
                // Queue entries are [number, prompt_id, ...] tuples.
                if entry.get(1).and_then(Value::as_str) == Some(prompt_id) {
                    return Ok(Some(label));
                }
            }
        }
        Ok(None)
    }

    async fn history_outputs(&self, prompt_id: &str) -> anyhow::Result<Option<Value>> {
        let endpoint = format!("{}/history/{prompt_id}", self.base_url);
        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .with_context(|| format!("ComfyUI history check failed ({endpoint})"))?;
        let history = response_json_or_error("ComfyUI", response).await?;
        Ok(history.get(prompt_id).cloned())
    }

    async fn try_generate(&self, request: &GenerationRequest) -> anyhow::Result<GenerationResult> {
        let payload = self.map_request(request);
        let endpoint = format!("{}/prompt", self.base_url);
        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("ComfyUI submission failed ({endpoint})"))?;
        let submitted = response_json_or_error("ComfyUI", response).await?;
        let prompt_id = submitted
            .get("prompt_id")
            .and_then(Value::as_str)
            .context("ComfyUI response missing prompt_id")?
            .to_string();
        info!(%prompt_id, "ComfyUI workflow queued");

        let polled = poll_until(self.poll, |_attempt| {
            let prompt_id = prompt_id.clone();
            async move {
                if let Some(position) = self.queue_position(&prompt_id).await? {
                    debug!(%prompt_id, position, "workflow still queued");
                    return Ok(None);
                }
                // Off the queue: the history entry carries the outputs.
                self.history_outputs(&prompt_id).await
            }
        })
        .await;

        let entry = match polled {
            Ok(entry) => entry,
            Err(err) => {
                return Ok(GenerationResult::failed(
                    Provider::Comfyui,
                    request,
                    format!("ComfyUI workflow did not complete: {err}"),
                ));
            }
        };
        let mut result = self.map_response(&entry, request);
        result.generation_id = prompt_id;
        Ok(result)
    }
}

fn merge_node(workflow: &mut Value, node: &str, patch: &Value) {
    let Some(target) = workflow.get_mut(node).and_then(|n| n.pointer_mut("/inputs")) else {
        return;
    };
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl Default for ComfyUiProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageProvider for ComfyUiProvider {
    fn id(&self) -> Provider {
        Provider::Comfyui
    }

    fn models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: DEFAULT_CHECKPOINT.to_string(),
            name: "Flux.1 Dev (fp8)".to_string(),
            description: "Local Flux checkpoint served by ComfyUI".to_string(),
        }]
    }

    async fn validate(&self, request: &GenerationRequest) -> bool {
        let (width, height) = request.effective_dimensions(512);
        for dim in [width, height] {
            if !(128..=2048).contains(&dim) || dim % 8 != 0 {
                return false;
            }
        }
        if request.num_images == 0 || request.num_images > 4 {
            return false;
        }
        if request.prompt_chars() == 0 {
            return false;
        }
        self.server_reachable().await
    }

    fn map_request(&self, request: &GenerationRequest) -> Value {
        json!({
            "prompt": self.workflow(request),
            "client_id": Uuid::new_v4().to_string(),
        })
    }

    fn map_response(&self, payload: &Value, request: &GenerationRequest) -> GenerationResult {
        let Some(outputs) = payload.get("outputs").and_then(Value::as_object) else {
            return GenerationResult::failed(
                Provider::Comfyui,
                request,
                "ComfyUI history entry has no outputs",
            )
            .with_raw_response(payload.clone());
        };

        let (width, height) = request.effective_dimensions(512);
        let mut images = Vec::new();
        for node_output in outputs.values() {
            let files = node_output
                .get("images")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for file in &files {
                let Some(filename) = file.get("filename").and_then(Value::as_str) else {
                    continue;
                };
                let subfolder = file.get("subfolder").and_then(Value::as_str).unwrap_or("");
                let kind = file.get("type").and_then(Value::as_str).unwrap_or("output");
                let mut image = GeneratedImage::new(Uuid::new_v4().to_string());
                image.provider_id = Some(filename.to_string());
                image.url = Some(format!(
                    "{}/view?filename={filename}&subfolder={subfolder}&type={kind}",
                    self.base_url
                ));
                image.seed = request.seed;
                image.width = Some(width);
                image.height = Some(height);
                image.format = Some("png".to_string());
                let mut metadata = Map::new();
                metadata.insert("subfolder".to_string(), json!(subfolder));
                metadata.insert("type".to_string(), json!(kind));
                image.provider_metadata = Some(metadata);
                images.push(image);
            }
        }

        if images.is_empty() {
            return GenerationResult::failed(
                Provider::Comfyui,
                request,
                "ComfyUI produced no images",
            )
            .with_raw_response(payload.clone());
        }
        let mut result = GenerationResult::completed(
            Uuid::new_v4().to_string(),
            Provider::Comfyui,
            request,
            images,
        );
        // Local inference carries no per-image vendor cost.
        result.cost = Some(0.0);
        result
    }

    async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        match self.try_generate(request).await {
            Ok(result) => result,
            Err(err) => GenerationResult::failed(
                Provider::Comfyui,
                request,
                format!("ComfyUI generation failed: {err:#}"),
            ),
        }
    }
}
