// src/pipeline.rs
use bytes::Bytes;
use log::{debug, error, info};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{CapabilityError, PipelineError};
use crate::models::*;
use crate::render::{CaptionOverlayRenderer, SvgCaptionRenderer};
use crate::services::{ImageProcessor, ImageSynthesizer, OpenAiClient, TextGenerator, VisionAnalyzer};

pub const MIN_TARGET_WORDS: u32 = 200;
pub const MAX_TARGET_WORDS: u32 = 500;

/// Raised by the host to abandon a run.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn pair() -> (CancelHandle, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelSignal { rx })
    }

    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_, signal) = Self::pair();
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

enum VisualPlan {
    Synthesize(String),
    Overlay { top: String, bottom: String },
}

pub struct Pipeline {
    processor: ImageProcessor,
    vision: VisionAnalyzer,
    text: TextGenerator,
    synthesizer: ImageSynthesizer,
    renderer: Arc<dyn CaptionOverlayRenderer>,
}

impl Pipeline {
    pub fn new(
        processor: ImageProcessor,
        vision: VisionAnalyzer,
        text: TextGenerator,
        synthesizer: ImageSynthesizer,
        renderer: Arc<dyn CaptionOverlayRenderer>,
    ) -> Self {
        Self {
            processor,
            vision,
            text,
            synthesizer,
            renderer,
        }
    }

    /// Wires every adapter to one OpenAI-compatible client.
    pub fn with_openai(config: &AppConfig) -> Result<Self, CapabilityError> {
        let client = Arc::new(OpenAiClient::new(
            &config.openai,
            &config.vision,
            &config.synthesis,
        )?);
        Ok(Self::new(
            ImageProcessor::new(config.pipeline.max_image_bytes),
            VisionAnalyzer::new(client.clone(), config.vision.clone()),
            TextGenerator::new(client.clone(), config.text.clone()),
            ImageSynthesizer::new(client, config.synthesis.clone()),
            Arc::new(SvgCaptionRenderer::new(config.render.clone())),
        ))
    }

    /// Upload size limit enforced during validation.
    pub fn max_image_bytes(&self) -> usize {
        self.processor.max_bytes()
    }

    /// Runs one request through
    /// Validating → Analyzing → GeneratingText → GeneratingVisual → Assembling.
    ///
    /// Only validation (and cancellation before it) returns `Err`. A vision
    /// failure yields a `Failed` result with metrics only; text and visual
    /// failures degrade and the run still completes.
    pub async fn process(
        &self,
        request: ProcessingRequest,
        cancel: &CancelSignal,
    ) -> Result<PipelineResult, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();
        let mode = request.mode;
        let mut metrics = ProcessingMetrics::default();

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(
                PipelineState::Validating.as_str().to_string(),
            ));
        }
        self.validate(&request).inspect_err(|e| {
            info!("[{}] Request rejected: {}", request_id, e);
        })?;
        info!(
            "[{}] Processing {} request ({} bytes)",
            request_id,
            mode.as_str(),
            request.image.len()
        );

        let analysis = match guarded(cancel, PipelineState::Analyzing, self.vision.analyze(&request.image)).await {
            Ok(analysis) => analysis,
            Err(e) => {
                error!("[{}] Analysis failed, aborting run: {}", request_id, e);
                metrics.record_error(request_id, PipelineState::Analyzing, &e);
                return Ok(finish(request_id, mode, PipelineStatus::Failed, None, None, None, metrics, started));
            }
        };
        metrics.vision_time_ms = analysis.elapsed_ms;
        debug!("[{}] Tags: {:?}", request_id, analysis.tags);

        let text = match self.generate_text(mode, &analysis, cancel).await {
            StepOutcome::Ok(text) => {
                metrics.text_gen_time_ms = text.elapsed_ms();
                metrics.tokens_used = text.tokens();
                text
            }
            StepOutcome::Degraded { fallback, cause } => {
                metrics.record_error(request_id, PipelineState::GeneratingText, &cause);
                fallback
            }
        };

        let plan = match visual_plan(mode, &text) {
            Ok(plan) => plan,
            Err(e) => {
                error!("[{}] Pipeline bookkeeping error: {}", request_id, e);
                metrics.record_error(request_id, PipelineState::Assembling, &e);
                return Ok(finish(request_id, mode, PipelineStatus::Failed, None, None, None, metrics, started));
            }
        };

        let visual = match self.generate_visual(plan, &request.image, cancel).await {
            StepOutcome::Ok(visual) => {
                metrics.visual_time_ms = visual.as_ref().map(VisualArtifact::elapsed_ms).unwrap_or(0);
                visual
            }
            StepOutcome::Degraded { fallback, cause } => {
                metrics.record_error(request_id, PipelineState::GeneratingVisual, &cause);
                fallback
            }
        };

        let result = finish(
            request_id,
            mode,
            PipelineStatus::Completed,
            Some(analysis),
            Some(text),
            visual,
            metrics,
            started,
        );
        info!(
            "[{}] Completed in {}ms (degraded: {})",
            request_id,
            result.metrics.total_time_ms,
            result.metrics.error_info.is_some()
        );
        Ok(result)
    }

    fn validate(&self, request: &ProcessingRequest) -> Result<(), PipelineError> {
        self.processor
            .validate_upload(&request.image, request.declared_content_type.as_deref())?;
        match request.mode {
            ProcessingMode::Regeneration { target_words }
                if !(MIN_TARGET_WORDS..=MAX_TARGET_WORDS).contains(&target_words) =>
            {
                Err(PipelineError::InvalidInput(format!(
                    "target_words must be between {} and {}, got {}",
                    MIN_TARGET_WORDS, MAX_TARGET_WORDS, target_words
                )))
            }
            ProcessingMode::Regeneration { .. } | ProcessingMode::MemeGeneration => Ok(()),
        }
    }

    async fn generate_text(
        &self,
        mode: ProcessingMode,
        analysis: &AnalysisResult,
        cancel: &CancelSignal,
    ) -> StepOutcome<GeneratedText> {
        match mode {
            ProcessingMode::Regeneration { target_words } => StepOutcome::from_result(
                guarded(
                    cancel,
                    PipelineState::GeneratingText,
                    self.text.enhance_description(&analysis.tags, target_words),
                )
                .await,
                || GeneratedText::fallback_description(&analysis.tags),
            ),
            ProcessingMode::MemeGeneration => StepOutcome::from_result(
                guarded(
                    cancel,
                    PipelineState::GeneratingText,
                    self.text.generate_meme_caption(&analysis.tags, analysis.confidence),
                )
                .await,
                GeneratedText::fallback_caption,
            ),
        }
    }

    async fn generate_visual(
        &self,
        plan: VisualPlan,
        original: &Bytes,
        cancel: &CancelSignal,
    ) -> StepOutcome<Option<VisualArtifact>> {
        let result = match plan {
            VisualPlan::Synthesize(prompt) => {
                guarded(
                    cancel,
                    PipelineState::GeneratingVisual,
                    self.synthesizer.synthesize(&prompt),
                )
                .await
            }
            VisualPlan::Overlay { top, bottom } => {
                guarded(
                    cancel,
                    PipelineState::GeneratingVisual,
                    self.render_overlay(original.clone(), top, bottom),
                )
                .await
            }
        };
        StepOutcome::from_result(result.map(Some), || None)
    }

    /// Rendering is CPU-bound, so it runs on the blocking pool. A blocking
    /// task cannot be aborted: when the run is cancelled mid-render the
    /// handle is dropped and the finished image is discarded.
    async fn render_overlay(
        &self,
        image: Bytes,
        top: String,
        bottom: String,
    ) -> Result<VisualArtifact, PipelineError> {
        let start = Instant::now();
        let renderer = Arc::clone(&self.renderer);
        let bytes = tokio::task::spawn_blocking(move || {
            renderer.overlay(&image, Some(top.as_str()), Some(bottom.as_str()))
        })
        .await
        .map_err(|e| PipelineError::Unexpected(format!("Overlay renderer panicked: {}", e)))??;

        Ok(VisualArtifact::OverlayImage {
            bytes: Bytes::from(bytes),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }
}

fn visual_plan(mode: ProcessingMode, text: &GeneratedText) -> Result<VisualPlan, PipelineError> {
    match (mode, text) {
        (ProcessingMode::Regeneration { .. }, GeneratedText::Description { text, .. }) => {
            Ok(VisualPlan::Synthesize(text.clone()))
        }
        (ProcessingMode::MemeGeneration, GeneratedText::MemeCaption { top, bottom, .. }) => {
            Ok(VisualPlan::Overlay {
                top: top.clone(),
                bottom: bottom.clone(),
            })
        }
        (mode, _) => Err(PipelineError::Unexpected(format!(
            "generated text does not match {} mode",
            mode.as_str()
        ))),
    }
}

/// Races an adapter call against cancellation; a cancelled call counts as
/// a failure of that step.
async fn guarded<T>(
    cancel: &CancelSignal,
    state: PipelineState,
    call: impl Future<Output = Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled(state.as_str().to_string())),
        result = call => result,
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    request_id: Uuid,
    mode: ProcessingMode,
    status: PipelineStatus,
    analysis: Option<AnalysisResult>,
    text: Option<GeneratedText>,
    visual: Option<VisualArtifact>,
    mut metrics: ProcessingMetrics,
    started: Instant,
) -> PipelineResult {
    metrics.total_time_ms = started.elapsed().as_millis() as u64;
    PipelineResult {
        request_id,
        mode,
        status,
        analysis,
        text,
        visual,
        metrics,
        completed_at: chrono::Utc::now(),
    }
}
