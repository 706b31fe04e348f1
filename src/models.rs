// src/models.rs
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PipelineError;

pub const FALLBACK_TOP_CAPTION: &str = "WHEN THE PICTURE";
pub const FALLBACK_BOTTOM_CAPTION: &str = "SPEAKS FOR ITSELF";
pub const FALLBACK_DESCRIPTION_PREFIX: &str = "Image contains:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingMode {
    Regeneration { target_words: u32 },
    MemeGeneration,
}

impl ProcessingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingMode::Regeneration { .. } => "regeneration",
            ProcessingMode::MemeGeneration => "meme_generation",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub image: Bytes,
    pub declared_content_type: Option<String>,
    pub mode: ProcessingMode,
}

impl ProcessingRequest {
    pub fn new(image: impl Into<Bytes>, mode: ProcessingMode) -> Self {
        Self {
            image: image.into(),
            declared_content_type: None,
            mode,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.declared_content_type = Some(content_type.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub caption: String,
    pub tags: Vec<String>,
    pub confidence: f32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeneratedText {
    Description {
        text: String,
        tokens: u32,
        elapsed_ms: u64,
    },
    MemeCaption {
        top: String,
        bottom: String,
        tokens: u32,
        elapsed_ms: u64,
    },
}

impl GeneratedText {
    /// Deterministic stand-in when description generation fails.
    pub fn fallback_description(tags: &[String]) -> Self {
        GeneratedText::Description {
            text: format!("{} {}", FALLBACK_DESCRIPTION_PREFIX, tags.join(", ")),
            tokens: 0,
            elapsed_ms: 0,
        }
    }

    pub fn fallback_caption() -> Self {
        GeneratedText::MemeCaption {
            top: FALLBACK_TOP_CAPTION.to_string(),
            bottom: FALLBACK_BOTTOM_CAPTION.to_string(),
            tokens: 0,
            elapsed_ms: 0,
        }
    }

    pub fn tokens(&self) -> u32 {
        match self {
            GeneratedText::Description { tokens, .. } | GeneratedText::MemeCaption { tokens, .. } => {
                *tokens
            }
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            GeneratedText::Description { elapsed_ms, .. }
            | GeneratedText::MemeCaption { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VisualArtifact {
    SynthesizedImage {
        #[serde(with = "base64_bytes")]
        bytes: Bytes,
        content_type: String,
        elapsed_ms: u64,
    },
    OverlayImage {
        #[serde(with = "base64_bytes")]
        bytes: Bytes,
        elapsed_ms: u64,
    },
}

impl VisualArtifact {
    pub fn bytes(&self) -> &Bytes {
        match self {
            VisualArtifact::SynthesizedImage { bytes, .. } | VisualArtifact::OverlayImage { bytes, .. } => {
                bytes
            }
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        match self {
            VisualArtifact::SynthesizedImage { elapsed_ms, .. }
            | VisualArtifact::OverlayImage { elapsed_ms, .. } => *elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Validating,
    Analyzing,
    GeneratingText,
    GeneratingVisual,
    Assembling,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Validating => "validating",
            PipelineState::Analyzing => "analyzing",
            PipelineState::GeneratingText => "generating_text",
            PipelineState::GeneratingVisual => "generating_visual",
            PipelineState::Assembling => "assembling",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Completed,
    Failed,
}

/// Result of a step that degrades instead of aborting.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Ok(T),
    Degraded { fallback: T, cause: PipelineError },
}

impl<T> StepOutcome<T> {
    pub fn from_result(result: Result<T, PipelineError>, fallback: impl FnOnce() -> T) -> Self {
        match result {
            Ok(value) => StepOutcome::Ok(value),
            Err(cause) => StepOutcome::Degraded {
                fallback: fallback(),
                cause,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessingMetrics {
    pub vision_time_ms: u64,
    pub text_gen_time_ms: u64,
    pub visual_time_ms: u64,
    pub total_time_ms: u64,
    pub tokens_used: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_info: Option<String>,
}

impl ProcessingMetrics {
    /// Logs every error but keeps only the first one in `error_info`.
    /// Returns true when this error became the recorded one.
    pub fn record_error(&mut self, request_id: Uuid, state: PipelineState, err: &PipelineError) -> bool {
        warn!("[{}] {} failed: {}", request_id, state.as_str(), err);
        if self.error_info.is_some() {
            return false;
        }
        self.error_info = Some(format!("{}: {}", state.as_str(), err));
        true
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub mode: ProcessingMode,
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub analysis: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<GeneratedText>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visual: Option<VisualArtifact>,
    pub metrics: ProcessingMetrics,
    pub completed_at: DateTime<Utc>,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose};
    use bytes::Bytes;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }
}
