// src/services/image_synthesis.rs
use bytes::Bytes;
use log::{error, info};
use std::sync::Arc;
use std::time::Instant;

use super::capabilities::{ImageSynthesisCapability, SynthesisRequest};
use crate::config::SynthesisConfig;
use crate::errors::PipelineError;
use crate::models::VisualArtifact;

const USER_SAFE_FAILURE: &str = "Image generation is temporarily unavailable, please try again later";

pub struct ImageSynthesizer {
    capability: Arc<dyn ImageSynthesisCapability>,
    config: SynthesisConfig,
}

impl ImageSynthesizer {
    pub fn new(capability: Arc<dyn ImageSynthesisCapability>, config: SynthesisConfig) -> Self {
        Self { capability, config }
    }

    pub async fn synthesize(&self, prompt: &str) -> Result<VisualArtifact, PipelineError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "Image prompt must not be empty".to_string(),
            ));
        }
        let start = Instant::now();

        let request = SynthesisRequest {
            prompt: truncate_chars(prompt, self.config.max_prompt_chars).to_string(),
            size: self.config.size.clone(),
            quality: self.config.quality.clone(),
        };

        let response = self.capability.generate(&request).await.map_err(|e| {
            error!("Image synthesis failed: {}", e);
            PipelineError::ServiceUnavailable(USER_SAFE_FAILURE.to_string())
        })?;
        if response.image.is_empty() {
            error!("Image synthesis returned no image data");
            return Err(PipelineError::ServiceUnavailable(USER_SAFE_FAILURE.to_string()));
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Synthesized {} image ({} bytes) in {}ms",
            self.config.size,
            response.image.len(),
            elapsed_ms
        );

        Ok(VisualArtifact::SynthesizedImage {
            bytes: Bytes::from(response.image),
            content_type: content_type_for(&response.format).to_string(),
            elapsed_ms,
        })
    }
}

fn content_type_for(format: &str) -> &'static str {
    match format.to_lowercase().as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "webp" => "image/webp",
        _ => "image/png",
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
