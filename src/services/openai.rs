// src/services/openai.rs
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use log::debug;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;

use super::capabilities::*;
use crate::config::{OpenAiConfig, VisionConfig, SynthesisConfig};
use crate::errors::CapabilityError;

const VISION_PROMPT: &str = r#"
Describe this image for downstream caption and prompt writing. Provide:

1. CAPTION: one short sentence describing the scene.
2. TAGS: up to 15 single- or two-word tags for the objects, setting, mood and
   style, most relevant first, each with a confidence between 0 and 1.
3. CONFIDENCE: your overall confidence in the description, between 0 and 1.

Return as JSON matching this structure:
{
    "caption": "...",
    "tags": [{"name": "...", "confidence": 0.0}],
    "confidence": 0.0
}
"#;

/// OpenAI-compatible implementation of all three capabilities.
pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    vision_model: String,
    image_model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(
        config: &OpenAiConfig,
        vision: &VisionConfig,
        synthesis: &SynthesisConfig,
    ) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CapabilityError::Failed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            vision_model: vision.model.clone(),
            image_model: synthesis.model.clone(),
            client,
        })
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, CapabilityError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| CapabilityError::Failed(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_error(status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| CapabilityError::Failed(format!("Failed to parse OpenAI response: {}", e)))
    }
}

#[async_trait]
impl VisionCapability for OpenAiClient {
    async fn describe(&self, image: &[u8]) -> Result<VisionResponse, CapabilityError> {
        let base64_image = general_purpose::STANDARD.encode(image);
        let mime = match image::guess_format(image) {
            Ok(image::ImageFormat::Png) => "image/png",
            _ => "image/jpeg",
        };

        let result = self
            .post(
                "/chat/completions",
                json!({
                    "model": self.vision_model,
                    "messages": [{
                        "role": "user",
                        "content": [
                            { "type": "text", "text": VISION_PROMPT },
                            {
                                "type": "image_url",
                                "image_url": { "url": format!("data:{};base64,{}", mime, base64_image) }
                            }
                        ]
                    }],
                    "max_tokens": 1024,
                    "response_format": { "type": "json_object" }
                }),
            )
            .await?;

        let (content, _) = extract_chat_text(&result)?;
        parse_vision_content(&content)
    }
}

#[async_trait]
impl LanguageCapability for OpenAiClient {
    async fn complete(&self, request: &LanguageRequest) -> Result<LanguageResponse, CapabilityError> {
        debug!(
            "Requesting completion from {} (max_tokens={})",
            request.model, request.max_output_tokens
        );
        let result = self
            .post(
                "/chat/completions",
                json!({
                    "model": request.model,
                    "messages": [
                        { "role": "system", "content": request.system_instruction },
                        { "role": "user", "content": request.prompt }
                    ],
                    "max_tokens": request.max_output_tokens,
                    "temperature": request.temperature
                }),
            )
            .await?;

        let (text, tokens_used) = extract_chat_text(&result)?;
        Ok(LanguageResponse { text, tokens_used })
    }
}

#[async_trait]
impl ImageSynthesisCapability for OpenAiClient {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, CapabilityError> {
        let result = self
            .post(
                "/images/generations",
                json!({
                    "model": self.image_model,
                    "prompt": request.prompt,
                    "n": 1,
                    "size": request.size,
                    "quality": request.quality,
                    "response_format": "b64_json"
                }),
            )
            .await?;

        let image = extract_b64_image(&result)?;
        Ok(SynthesisResponse {
            image,
            format: "png".to_string(),
        })
    }
}

fn classify_error(status: StatusCode, body: &str) -> CapabilityError {
    let lower = body.to_lowercase();
    if status == StatusCode::NOT_FOUND
        || lower.contains("model_not_found")
        || lower.contains("does not exist")
    {
        return CapabilityError::ModelUnavailable(format!("{}: {}", status, body));
    }
    CapabilityError::Failed(format!("OpenAI error ({}): {}", status, body))
}

fn extract_chat_text(result: &Value) -> Result<(String, Option<u32>), CapabilityError> {
    let content = result["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| CapabilityError::Failed("No content in OpenAI response".to_string()))?;
    let tokens = result["usage"]["total_tokens"]
        .as_u64()
        .map(|t| t.min(u32::MAX as u64) as u32);
    Ok((content.to_string(), tokens))
}

fn parse_vision_content(content: &str) -> Result<VisionResponse, CapabilityError> {
    let data: Value = serde_json::from_str(content)
        .map_err(|e| CapabilityError::Failed(format!("Failed to parse vision JSON: {}", e)))?;

    let tags = data["tags"]
        .as_array()
        .ok_or_else(|| CapabilityError::Failed("Missing tags in vision response".to_string()))?
        .iter()
        .filter_map(|tag| match tag {
            Value::String(name) => Some(WeightedTag {
                name: name.clone(),
                confidence: 1.0,
            }),
            _ => Some(WeightedTag {
                name: tag["name"].as_str()?.to_string(),
                confidence: tag["confidence"].as_f64().unwrap_or(0.0) as f32,
            }),
        })
        .collect();

    Ok(VisionResponse {
        caption: data["caption"].as_str().unwrap_or("").to_string(),
        tags,
        confidence: data["confidence"].as_f64().unwrap_or(0.0) as f32,
    })
}

fn extract_b64_image(result: &Value) -> Result<Vec<u8>, CapabilityError> {
    let b64_json = result["data"][0]["b64_json"]
        .as_str()
        .ok_or_else(|| CapabilityError::Failed("No image data in response".to_string()))?;
    general_purpose::STANDARD
        .decode(b64_json)
        .map_err(|e| CapabilityError::Failed(format!("Failed to decode image: {}", e)))
}
