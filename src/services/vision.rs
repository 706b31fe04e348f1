// src/services/vision.rs
use bytes::Bytes;
use log::info;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::capabilities::{VisionCapability, WeightedTag};
use super::image_processor::ImageProcessor;
use crate::config::VisionConfig;
use crate::errors::PipelineError;
use crate::models::AnalysisResult;

pub struct VisionAnalyzer {
    capability: Arc<dyn VisionCapability>,
    config: VisionConfig,
}

impl VisionAnalyzer {
    pub fn new(capability: Arc<dyn VisionCapability>, config: VisionConfig) -> Self {
        Self { capability, config }
    }

    /// Single call-through, no retries. Empty input is rejected before any
    /// request is made.
    pub async fn analyze(&self, image: &Bytes) -> Result<AnalysisResult, PipelineError> {
        if image.is_empty() {
            return Err(PipelineError::InvalidInput(
                "Cannot analyze an empty image".to_string(),
            ));
        }
        let start = Instant::now();

        let max_edge = self.config.max_edge_px;
        let source = image.clone();
        let prepared =
            tokio::task::spawn_blocking(move || ImageProcessor::prepare_for_vision(source, max_edge))
                .await
                .map_err(|e| PipelineError::Unexpected(format!("Image preparation panicked: {}", e)))?;

        let response = self
            .capability
            .describe(&prepared)
            .await
            .map_err(|e| PipelineError::ServiceFailure(format!("Vision analysis failed: {}", e)))?;

        let raw_count = response.tags.len();
        let tags = filter_tags(response.tags, self.config.min_tag_confidence);
        let confidence = if response.confidence.is_finite() {
            response.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            "Vision analysis kept {}/{} tags (confidence {:.2}) in {}ms",
            tags.len(),
            raw_count,
            confidence,
            elapsed_ms
        );

        Ok(AnalysisResult {
            caption: response.caption.trim().to_string(),
            tags,
            confidence,
            elapsed_ms,
        })
    }
}

/// Keeps tags at or above `min_confidence`, in the order the service
/// returned them, dropping case-insensitive duplicates.
pub fn filter_tags(tags: Vec<WeightedTag>, min_confidence: f32) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.into_iter()
        .filter(|tag| tag.confidence >= min_confidence)
        .map(|tag| tag.name.trim().to_string())
        .filter(|name| !name.is_empty() && seen.insert(name.to_lowercase()))
        .collect()
}
