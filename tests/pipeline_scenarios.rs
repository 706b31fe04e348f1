// tests/pipeline_scenarios.rs
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbImage, RgbaImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use usvg::fontdb;

use quipcraft::config::{RenderConfig, SynthesisConfig, TextGenConfig, VisionConfig};
use quipcraft::errors::{CapabilityError, PipelineError};
use quipcraft::models::*;
use quipcraft::pipeline::{CancelHandle, CancelSignal, Pipeline};
use quipcraft::render::{CaptionOverlayRenderer, ResolvedFont, SvgCaptionRenderer};
use quipcraft::services::capabilities::{
    LanguageRequest, LanguageResponse, SynthesisRequest, SynthesisResponse, VisionResponse,
    WeightedTag,
};
use quipcraft::services::{
    ImageProcessor, ImageSynthesisCapability, ImageSynthesizer, LanguageCapability, TextGenerator,
    VisionAnalyzer, VisionCapability,
};

struct MockVision {
    fail: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl VisionCapability for MockVision {
    async fn describe(&self, _image: &[u8]) -> Result<VisionResponse, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(CapabilityError::Failed("vision backend offline".to_string()));
        }
        Ok(VisionResponse {
            caption: "a cat on a sofa".to_string(),
            tags: vec![
                WeightedTag {
                    name: "cat".to_string(),
                    confidence: 0.97,
                },
                WeightedTag {
                    name: "indoor".to_string(),
                    confidence: 0.81,
                },
                WeightedTag {
                    name: "noise".to_string(),
                    confidence: 0.1,
                },
            ],
            confidence: 0.9,
        })
    }
}

enum LanguageBehavior {
    Reply(&'static str, Option<u32>),
    Fail(&'static str),
    Hang,
}

struct MockLanguage {
    behavior: LanguageBehavior,
    calls: AtomicUsize,
}

#[async_trait]
impl LanguageCapability for MockLanguage {
    async fn complete(&self, _request: &LanguageRequest) -> Result<LanguageResponse, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            LanguageBehavior::Reply(text, tokens_used) => Ok(LanguageResponse {
                text: text.to_string(),
                tokens_used: *tokens_used,
            }),
            LanguageBehavior::Fail(reason) => Err(CapabilityError::Failed(reason.to_string())),
            LanguageBehavior::Hang => std::future::pending().await,
        }
    }
}

struct MockImages {
    fail: bool,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageSynthesisCapability for MockImages {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, CapabilityError> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.fail {
            return Err(CapabilityError::Failed("quota exhausted for org-123".to_string()));
        }
        Ok(SynthesisResponse {
            image: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
            format: "png".to_string(),
        })
    }
}

struct FailingRenderer {
    calls: AtomicUsize,
}

impl CaptionOverlayRenderer for FailingRenderer {
    fn overlay(
        &self,
        _image: &[u8],
        _top_text: Option<&str>,
        _bottom_text: Option<&str>,
    ) -> Result<Vec<u8>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(PipelineError::InvalidImageData("unreadable pixels".to_string()))
    }
}

/// Raises the cancel signal once rendering has started, then keeps working.
struct CancellingRenderer {
    handle: Mutex<Option<CancelHandle>>,
    finished: AtomicBool,
}

impl CaptionOverlayRenderer for CancellingRenderer {
    fn overlay(
        &self,
        image: &[u8],
        _top_text: Option<&str>,
        _bottom_text: Option<&str>,
    ) -> Result<Vec<u8>, PipelineError> {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.cancel();
        }
        std::thread::sleep(Duration::from_millis(500));
        self.finished.store(true, Ordering::SeqCst);
        Ok(image.to_vec())
    }
}

struct Harness {
    vision: Arc<MockVision>,
    language: Arc<MockLanguage>,
    images: Arc<MockImages>,
    pipeline: Pipeline,
}

fn fontless_renderer() -> SvgCaptionRenderer {
    SvgCaptionRenderer::with_font(
        RenderConfig::default(),
        ResolvedFont {
            metrics: None,
            family: "sans-serif".to_string(),
            bold: true,
            database: Arc::new(fontdb::Database::new()),
        },
    )
}

fn harness_with(
    vision_fails: bool,
    language: LanguageBehavior,
    images_fail: bool,
    renderer: Arc<dyn CaptionOverlayRenderer>,
) -> Harness {
    let vision = Arc::new(MockVision {
        fail: vision_fails,
        calls: AtomicUsize::new(0),
    });
    let language = Arc::new(MockLanguage {
        behavior: language,
        calls: AtomicUsize::new(0),
    });
    let images = Arc::new(MockImages {
        fail: images_fail,
        prompts: Mutex::new(Vec::new()),
    });
    let pipeline = Pipeline::new(
        ImageProcessor::new(20 * 1024 * 1024),
        VisionAnalyzer::new(vision.clone(), VisionConfig::default()),
        TextGenerator::new(language.clone(), TextGenConfig::default()),
        ImageSynthesizer::new(images.clone(), SynthesisConfig::default()),
        renderer,
    );
    Harness {
        vision,
        language,
        images,
        pipeline,
    }
}

fn harness(vision_fails: bool, language: LanguageBehavior, images_fail: bool) -> Harness {
    harness_with(vision_fails, language, images_fail, Arc::new(fontless_renderer()))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba([200, 120, 40, 255]));
    let mut out = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, image::Rgb([30, 160, 90]));
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Jpeg)
        .unwrap();
    out
}

fn regeneration(words: u32) -> ProcessingMode {
    ProcessingMode::Regeneration {
        target_words: words,
    }
}

#[tokio::test]
async fn regeneration_with_text_failure_uses_tag_fallback() {
    let h = harness(false, LanguageBehavior::Fail("llm upstream exploded"), false);
    let request = ProcessingRequest::new(jpeg(64, 48), regeneration(200)).with_content_type("image/jpeg");

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    match result.text.as_ref().unwrap() {
        GeneratedText::Description { text, tokens, .. } => {
            assert!(text.starts_with("Image contains:"));
            assert_eq!(text, "Image contains: cat, indoor");
            assert_eq!(*tokens, 0);
        }
        other => panic!("unexpected text: {:?}", other),
    }
    let error_info = result.metrics.error_info.as_deref().unwrap();
    assert!(error_info.contains("llm upstream exploded"));

    // Synthesis still runs, on the fallback text.
    match result.visual.as_ref().unwrap() {
        VisualArtifact::SynthesizedImage { bytes, content_type, .. } => {
            assert!(!bytes.is_empty());
            assert_eq!(content_type, "image/png");
        }
        other => panic!("unexpected visual: {:?}", other),
    }
    assert_eq!(
        *h.images.prompts.lock().unwrap(),
        vec!["Image contains: cat, indoor".to_string()]
    );
    assert_eq!(result.metrics.text_gen_time_ms, 0);
    assert_eq!(result.metrics.tokens_used, 0);
}

#[tokio::test]
async fn regeneration_happy_path_records_tokens() {
    let h = harness(
        false,
        LanguageBehavior::Reply("A tabby cat naps on a faded green sofa.", Some(412)),
        false,
    );
    let request = ProcessingRequest::new(png(32, 32), regeneration(300));

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.metrics.error_info.is_none());
    assert_eq!(result.metrics.tokens_used, 412);
    assert_eq!(result.analysis.as_ref().unwrap().tags, vec!["cat", "indoor"]);
    assert!(matches!(
        result.visual,
        Some(VisualArtifact::SynthesizedImage { .. })
    ));
    assert_eq!(
        h.images.prompts.lock().unwrap()[0],
        "A tabby cat naps on a faded green sofa."
    );
}

#[tokio::test]
async fn meme_overlay_keeps_source_dimensions() {
    let h = harness(
        false,
        LanguageBehavior::Reply("TOP: WHEN YOU FETCH\nBOTTOM: THE WRONG BALL", None),
        false,
    );
    let request = ProcessingRequest::new(png(100, 100), ProcessingMode::MemeGeneration)
        .with_content_type("image/png");

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.metrics.error_info.is_none());
    match result.text.as_ref().unwrap() {
        GeneratedText::MemeCaption { top, bottom, tokens, .. } => {
            assert_eq!(top, "WHEN YOU FETCH");
            assert_eq!(bottom, "THE WRONG BALL");
            assert!(*tokens > 0);
        }
        other => panic!("unexpected text: {:?}", other),
    }
    match result.visual.as_ref().unwrap() {
        VisualArtifact::OverlayImage { bytes, .. } => {
            let decoded = image::load_from_memory(bytes).unwrap();
            assert_eq!(decoded.dimensions(), (100, 100));
        }
        other => panic!("unexpected visual: {:?}", other),
    }
    assert!(h.images.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn meme_text_failure_overlays_fixed_captions() {
    let h = harness(false, LanguageBehavior::Fail("rate limited"), false);
    let request = ProcessingRequest::new(png(80, 60), ProcessingMode::MemeGeneration);

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(result.text, Some(GeneratedText::fallback_caption()));
    assert!(matches!(
        result.visual,
        Some(VisualArtifact::OverlayImage { .. })
    ));
    assert!(result.metrics.error_info.as_deref().unwrap().contains("rate limited"));
}

#[tokio::test]
async fn empty_image_is_rejected_before_any_service_call() {
    let h = harness(false, LanguageBehavior::Reply("unused", None), false);
    let request = ProcessingRequest::new(Bytes::new(), regeneration(250));

    let err = h.pipeline.process(request, &CancelSignal::never()).await.unwrap_err();

    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.language.calls.load(Ordering::SeqCst), 0);
    assert!(h.images.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let h = harness(false, LanguageBehavior::Reply("unused", None), false);

    let out_of_range = ProcessingRequest::new(png(10, 10), regeneration(199));
    assert!(matches!(
        h.pipeline.process(out_of_range, &CancelSignal::never()).await,
        Err(PipelineError::InvalidInput(_))
    ));

    let mislabeled = ProcessingRequest::new(png(10, 10), regeneration(300)).with_content_type("image/jpeg");
    assert!(matches!(
        h.pipeline.process(mislabeled, &CancelSignal::never()).await,
        Err(PipelineError::InvalidInput(_))
    ));

    let not_an_image = ProcessingRequest::new(b"GIF89a-ish".to_vec(), ProcessingMode::MemeGeneration);
    assert!(matches!(
        h.pipeline.process(not_an_image, &CancelSignal::never()).await,
        Err(PipelineError::InvalidInput(_))
    ));

    assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn vision_failure_fails_the_run() {
    let h = harness(true, LanguageBehavior::Reply("unused", None), false);
    let request = ProcessingRequest::new(png(20, 20), ProcessingMode::MemeGeneration);

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Failed);
    assert!(result.analysis.is_none());
    assert!(result.text.is_none());
    assert!(result.visual.is_none());
    assert!(
        result
            .metrics
            .error_info
            .as_deref()
            .unwrap()
            .contains("vision backend offline")
    );
    assert_eq!(h.language.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn synthesis_failure_surfaces_only_a_safe_message() {
    let h = harness(false, LanguageBehavior::Reply("A cat.", Some(5)), true);
    let request = ProcessingRequest::new(png(20, 20), regeneration(200));

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.text.is_some());
    assert!(result.visual.is_none());
    let error_info = result.metrics.error_info.as_deref().unwrap();
    assert!(error_info.starts_with("generating_visual"));
    assert!(!error_info.contains("org-123"));
    assert_eq!(result.metrics.visual_time_ms, 0);
}

#[tokio::test]
async fn first_failure_wins_when_text_and_visual_both_fail() {
    let h = harness(false, LanguageBehavior::Fail("first problem"), true);
    let request = ProcessingRequest::new(png(20, 20), regeneration(200));

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    let error_info = result.metrics.error_info.as_deref().unwrap();
    assert!(error_info.starts_with("generating_text"));
    assert!(error_info.contains("first problem"));
    assert!(result.visual.is_none());
    assert_eq!(h.images.prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn renderer_failure_degrades_meme_run() {
    let renderer = Arc::new(FailingRenderer {
        calls: AtomicUsize::new(0),
    });
    let h = harness_with(
        false,
        LanguageBehavior::Reply("TOP: ONE\nBOTTOM: TWO", None),
        false,
        renderer.clone(),
    );
    let request = ProcessingRequest::new(png(40, 40), ProcessingMode::MemeGeneration);

    let result = h.pipeline.process(request, &CancelSignal::never()).await.unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.visual.is_none());
    assert!(matches!(result.text, Some(GeneratedText::MemeCaption { .. })));
    assert!(
        result
            .metrics
            .error_info
            .as_deref()
            .unwrap()
            .contains("unreadable pixels")
    );
    assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_before_start_is_an_error() {
    let h = harness(false, LanguageBehavior::Reply("unused", None), false);
    let (handle, signal) = CancelSignal::pair();
    handle.cancel();

    let err = h
        .pipeline
        .process(ProcessingRequest::new(png(10, 10), regeneration(200)), &signal)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled(_)));
    assert_eq!(h.vision.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancellation_mid_run_degrades_remaining_steps() {
    let h = harness(false, LanguageBehavior::Hang, false);
    let (handle, signal) = CancelSignal::pair();
    let request = ProcessingRequest::new(png(10, 10), regeneration(200));

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });
    let result = tokio::time::timeout(Duration::from_secs(5), h.pipeline.process(request, &signal))
        .await
        .expect("cancellation should unblock the run")
        .unwrap();

    assert_eq!(result.status, PipelineStatus::Completed);
    assert_eq!(
        result.text,
        Some(GeneratedText::fallback_description(&[
            "cat".to_string(),
            "indoor".to_string()
        ]))
    );
    assert!(result.visual.is_none());
    assert!(
        result
            .metrics
            .error_info
            .as_deref()
            .unwrap()
            .contains("Cancelled during generating_text")
    );
    assert!(h.images.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_during_render_returns_without_waiting() {
    let (handle, signal) = CancelSignal::pair();
    let renderer = Arc::new(CancellingRenderer {
        handle: Mutex::new(Some(handle)),
        finished: AtomicBool::new(false),
    });
    let h = harness_with(
        false,
        LanguageBehavior::Reply("TOP: ONE\nBOTTOM: TWO", None),
        false,
        renderer.clone(),
    );
    let request = ProcessingRequest::new(png(30, 30), ProcessingMode::MemeGeneration);

    let result = h.pipeline.process(request, &signal).await.unwrap();

    // The blocking render is abandoned, not awaited.
    assert!(!renderer.finished.load(Ordering::SeqCst));
    assert_eq!(result.status, PipelineStatus::Completed);
    assert!(result.visual.is_none());
    assert!(matches!(result.text, Some(GeneratedText::MemeCaption { .. })));
    let error_info = result.metrics.error_info.as_deref().unwrap();
    assert!(error_info.starts_with("generating_visual"));
    assert!(error_info.contains("Cancelled during generating_visual"));
}
