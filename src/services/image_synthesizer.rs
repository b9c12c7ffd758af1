// src/services/image_synthesizer.rs
use crate::config::GenerationConfig;
use crate::errors::{InferenceError, excerpt};
use crate::models::ImageRef;
use crate::services::image_processor::detect_mime;
use async_trait::async_trait;
use bytes::Bytes;
use log::{info, warn};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const PROMPT_SUFFIX: &str = "product photography on plain white background, professional studio \
lighting, high resolution, detailed texture, centered composition, clean edges";

const NEGATIVE_PROMPT: &str = "worst quality, low quality, distorted, blurry, noisy, text, \
watermark, logo, multiple items, cluttered background, colored background, people, person, \
human, hands, low resolution, ugly, deformed, amateur, unprofessional";

const ERROR_EXCERPT_CHARS: usize = 200;

/// Parameters of one text-to-image request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u32,
}

impl GenerationRequest {
    /// Product-shot prompt for a clothing description, with a fresh random seed.
    pub fn for_description(description: &str) -> Self {
        Self {
            prompt: format!("{}, {}", description, PROMPT_SUFFIX),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            width: 768,
            height: 768,
            steps: 25,
            guidance_scale: 7.5,
            seed: rand::thread_rng().gen_range(0..1_000_000),
        }
    }
}

/// One attempt against a text-to-image endpoint, returning raw image bytes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn render(&self, request: &GenerationRequest) -> Result<Bytes, InferenceError>;
}

/// Produces an image for a clothing description. Failures are final.
#[async_trait]
pub trait ClothingImageGenerator: Send + Sync {
    async fn generate(&self, description: &str) -> Result<ImageRef, InferenceError>;
}

pub struct HuggingFaceBackend {
    endpoint: String,
    api_token: String,
    client: Client,
}

impl HuggingFaceBackend {
    pub fn new(config: &GenerationConfig) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_token: config.api_token.clone(),
            client,
        })
    }
}

#[async_trait]
impl ImageBackend for HuggingFaceBackend {
    async fn render(&self, request: &GenerationRequest) -> Result<Bytes, InferenceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .header("Accept", "image/jpeg")
            .json(&json!({
                "inputs": request.prompt,
                "parameters": {
                    "negative_prompt": request.negative_prompt,
                    "height": request.height,
                    "width": request.width,
                    "num_inference_steps": request.steps,
                    "guidance_scale": request.guidance_scale,
                    "seed": request.seed
                },
                "options": {
                    "use_cache": false,
                    "wait_for_model": true
                }
            }))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if !status.is_success() || is_json {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error_body(status, &body));
        }

        let data = response.bytes().await.map_err(classify_transport)?;
        if data.is_empty() {
            return Err(InferenceError::Parse(
                "Image endpoint returned an empty payload".to_string(),
            ));
        }
        Ok(data)
    }
}

fn classify_transport(e: reqwest::Error) -> InferenceError {
    if e.is_timeout() {
        InferenceError::Timeout {
            status: None,
            message: format!("Image request timed out: {}", e),
        }
    } else {
        InferenceError::Transport(format!("Image generation request failed: {}", e))
    }
}

/// Gateway and upstream timeouts become `Timeout`; everything else is `Remote`.
pub fn classify_error_body(status: StatusCode, body: &str) -> InferenceError {
    let message = excerpt(body.trim(), ERROR_EXCERPT_CHARS);
    let lowered = body.to_ascii_lowercase();
    let timed_out = status == StatusCode::GATEWAY_TIMEOUT
        || status == StatusCode::REQUEST_TIMEOUT
        || lowered.contains("timed out")
        || lowered.contains("timeout");

    if timed_out {
        InferenceError::Timeout {
            status: Some(status.as_u16()),
            message,
        }
    } else {
        InferenceError::Remote {
            status: status.as_u16(),
            message,
        }
    }
}

/// Bounded, fixed-delay retry around an [`ImageBackend`].
pub struct ImageSynthesizer {
    backend: Arc<dyn ImageBackend>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ImageSynthesizer {
    pub fn new(backend: Arc<dyn ImageBackend>, config: &GenerationConfig) -> Self {
        Self::with_policy(backend, config.max_attempts, config.retry_delay)
    }

    pub fn with_policy(backend: Arc<dyn ImageBackend>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            backend,
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[async_trait]
impl ClothingImageGenerator for ImageSynthesizer {
    async fn generate(&self, description: &str) -> Result<ImageRef, InferenceError> {
        let mut attempt = 1;

        loop {
            info!(
                "Generating image (attempt {}/{}) for: {}",
                attempt, self.max_attempts, description
            );

            let request = GenerationRequest::for_description(description);
            let err = match self.backend.render(&request).await {
                Ok(data) => {
                    info!("Image generated on attempt {}", attempt);
                    return Ok(ImageRef::embedded(detect_mime(&data), &data));
                }
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(exhausted(attempt, err));
            }

            warn!("Attempt {} failed: {}", attempt, err);
            if matches!(err, InferenceError::Timeout { .. }) {
                info!("Gateway timeout detected. Retrying after {:?}", self.retry_delay);
            }
            tokio::time::sleep(self.retry_delay).await;
            attempt += 1;
        }
    }
}

fn exhausted(attempts: u32, last: InferenceError) -> InferenceError {
    let last_status = last.status();
    let mut detail = last.to_string();
    if let Some(status) = last_status {
        detail.push_str(&format!(" | Status: {}", status));
    }
    InferenceError::GenerationExhausted {
        attempts,
        last_status,
        detail,
    }
}
