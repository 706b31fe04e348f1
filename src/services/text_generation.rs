// src/services/text_generation.rs
use log::{info, warn};
use std::sync::Arc;
use std::time::Instant;

use super::capabilities::{LanguageCapability, LanguageRequest, LanguageResponse};
use crate::config::TextGenConfig;
use crate::errors::{CapabilityError, PipelineError};
use crate::models::{FALLBACK_BOTTOM_CAPTION, FALLBACK_TOP_CAPTION, GeneratedText};

const DESCRIPTION_SYSTEM: &str = "You are a visual writer. You turn image tags into rich, concrete \
descriptions that an image generator can render faithfully.";

const MEME_SYSTEM: &str = "You are a witty meme writer. You write short, punchy, family-friendly \
two-line captions in classic meme style.";

pub struct TextGenerator {
    capability: Arc<dyn LanguageCapability>,
    config: TextGenConfig,
}

impl TextGenerator {
    pub fn new(capability: Arc<dyn LanguageCapability>, config: TextGenConfig) -> Self {
        Self { capability, config }
    }

    pub async fn enhance_description(
        &self,
        tags: &[String],
        target_words: u32,
    ) -> Result<GeneratedText, PipelineError> {
        if target_words == 0 {
            return Err(PipelineError::InvalidArgument(
                "target word count must be positive".to_string(),
            ));
        }
        let start = Instant::now();

        let prompt = format!(
            "Write a vivid description of approximately {words} words for an image containing: {tags}.\n\
             Cover the main subjects, setting, lighting, colors, composition and mood.\n\
             Write flowing prose in a single paragraph and output only the description.",
            words = target_words,
            tags = tags.join(", ")
        );
        let request = LanguageRequest {
            model: self.config.primary_model.clone(),
            prompt,
            system_instruction: DESCRIPTION_SYSTEM.to_string(),
            max_output_tokens: description_token_budget(
                target_words,
                self.config.min_description_tokens,
            ),
            temperature: self.config.temperature,
        };

        let response = self.complete_with_fallback(request).await?;
        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(PipelineError::ServiceFailure(
                "Language service returned an empty description".to_string(),
            ));
        }
        let tokens = token_count(&response, &text);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        info!(
            "Generated {}-word description ({} tokens) in {}ms",
            text.split_whitespace().count(),
            tokens,
            elapsed_ms
        );

        Ok(GeneratedText::Description {
            text,
            tokens,
            elapsed_ms,
        })
    }

    pub async fn generate_meme_caption(
        &self,
        tags: &[String],
        confidence: f32,
    ) -> Result<GeneratedText, PipelineError> {
        let start = Instant::now();

        let certainty = if confidence < 0.5 {
            "The tags are uncertain, so keep the joke general."
        } else {
            "The tags are reliable, so the joke can be specific."
        };
        let prompt = format!(
            "Write a funny two-line meme caption for an image containing: {tags}.\n\
             {certainty}\n\
             Respond with exactly two lines and nothing else:\n\
             TOP: <setup, at most 8 words>\n\
             BOTTOM: <punchline, at most 8 words>",
            tags = tags.join(", "),
            certainty = certainty
        );
        let request = LanguageRequest {
            model: self.config.primary_model.clone(),
            prompt,
            system_instruction: MEME_SYSTEM.to_string(),
            max_output_tokens: self.config.meme_max_tokens,
            temperature: self.config.meme_temperature,
        };

        let response = self.complete_with_fallback(request).await?;
        let (top, bottom) = parse_meme_caption(&response.text);
        let tokens = token_count(&response, &response.text);

        Ok(GeneratedText::MemeCaption {
            top,
            bottom,
            tokens,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Retries exactly once on the fallback model when the primary one is
    /// reported unavailable.
    async fn complete_with_fallback(
        &self,
        mut request: LanguageRequest,
    ) -> Result<LanguageResponse, PipelineError> {
        match self.capability.complete(&request).await {
            Ok(response) => Ok(response),
            Err(CapabilityError::ModelUnavailable(reason)) => {
                let fallback = match &self.config.fallback_model {
                    Some(model) if *model != request.model => model.clone(),
                    _ => {
                        return Err(PipelineError::ServiceFailure(format!(
                            "Model {} unavailable: {}",
                            request.model, reason
                        )));
                    }
                };
                warn!(
                    "Model {} unavailable ({}), retrying with {}",
                    request.model, reason, fallback
                );
                request.model = fallback;
                self.capability.complete(&request).await.map_err(|e| {
                    PipelineError::ServiceFailure(format!(
                        "Fallback model {} failed: {}",
                        request.model, e
                    ))
                })
            }
            Err(e) => Err(PipelineError::ServiceFailure(format!(
                "Text generation failed: {}",
                e
            ))),
        }
    }
}

/// Output budget large enough to reach `target_words`; word-to-token ratios
/// are well above 1:1.
pub fn description_token_budget(target_words: u32, floor: u32) -> u32 {
    let scaled = (target_words as f32 * 2.5).ceil() as u32;
    scaled.max(floor)
}

fn token_count(response: &LanguageResponse, text: &str) -> u32 {
    match response.tokens_used {
        Some(tokens) if tokens > 0 => tokens,
        _ => estimate_tokens(text),
    }
}

fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count() as u32;
    if words == 0 {
        return if text.trim().is_empty() { 0 } else { 1 };
    }
    (words * 4).div_ceil(3)
}

/// Extracts top/bottom captions. Tries TOP:/BOTTOM: markers anywhere in the
/// text (or a JSON object), then splits on the first line break with every
/// later line joined into the bottom caption, then the fixed neutral pair.
pub fn parse_meme_caption(raw: &str) -> (String, String) {
    let cleaned = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if let Some(pair) = parse_markers(cleaned).or_else(|| parse_json(cleaned)) {
        return pair;
    }

    let mut lines = cleaned
        .lines()
        .map(clean_line)
        .filter(|line| !line.is_empty());
    if let Some(top) = lines.next() {
        let bottom = lines.collect::<Vec<_>>().join(" ");
        if !bottom.is_empty() {
            return (top, bottom);
        }
    }

    (
        FALLBACK_TOP_CAPTION.to_string(),
        FALLBACK_BOTTOM_CAPTION.to_string(),
    )
}

const TOP_MARKERS: &[&str] = &["TOP TEXT:", "TOP:"];
const BOTTOM_MARKERS: &[&str] = &["BOTTOM TEXT:", "BOTTOM:"];

fn parse_markers(text: &str) -> Option<(String, String)> {
    // ASCII uppercasing keeps byte offsets valid for `text`.
    let upper = text.to_ascii_uppercase();
    let (top_start, top_end) = find_marker(&upper, TOP_MARKERS)?;
    let (bottom_start, bottom_end) = find_marker(&upper, BOTTOM_MARKERS)?;

    let (top, bottom) = if top_start < bottom_start {
        (&text[top_end..bottom_start], &text[bottom_end..])
    } else {
        (&text[top_end..], &text[bottom_end..top_start])
    };
    let top = clean_caption(top);
    let bottom = clean_caption(bottom);
    if top.is_empty() || bottom.is_empty() {
        return None;
    }
    Some((top, bottom))
}

/// Earliest occurrence of any marker as a `(start, end)` byte range.
/// Longer markers are listed first so they win ties.
fn find_marker(upper: &str, markers: &[&str]) -> Option<(usize, usize)> {
    markers
        .iter()
        .filter_map(|marker| upper.find(marker).map(|start| (start, start + marker.len())))
        .min_by_key(|(start, _)| *start)
}

fn strip_marker<'a>(line: &'a str, upper: &str, markers: &[&str]) -> Option<&'a str> {
    markers
        .iter()
        .find(|marker| upper.starts_with(*marker))
        .and_then(|marker| line.get(marker.len()..))
}

fn parse_json(text: &str) -> Option<(String, String)> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    let top = clean_caption(value["top"].as_str()?);
    let bottom = clean_caption(value["bottom"].as_str()?);
    if top.is_empty() || bottom.is_empty() {
        return None;
    }
    Some((top, bottom))
}

fn clean_caption(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '"' | '*' | '`' | '|' | '-'))
        .to_string()
}

/// Cleans a free-form line, dropping a leading marker if one is present.
fn clean_line(line: &str) -> String {
    let trimmed = line.trim().trim_matches('*').trim();
    let upper = trimmed.to_ascii_uppercase();
    let rest = strip_marker(trimmed, &upper, TOP_MARKERS)
        .or_else(|| strip_marker(trimmed, &upper, BOTTOM_MARKERS))
        .unwrap_or(trimmed);
    clean_caption(rest)
}
