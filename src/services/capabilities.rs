// src/services/capabilities.rs
// Narrow interfaces over the external AI services. Adapters depend on these
// traits only, so any vendor (or a test double) can stand behind them.
use async_trait::async_trait;

use crate::errors::CapabilityError;

#[derive(Debug, Clone, PartialEq)]
pub struct WeightedTag {
    pub name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub caption: String,
    pub tags: Vec<WeightedTag>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageRequest {
    pub model: String,
    pub prompt: String,
    pub system_instruction: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResponse {
    pub image: Vec<u8>,
    pub format: String,
}

#[async_trait]
pub trait VisionCapability: Send + Sync {
    async fn describe(&self, image: &[u8]) -> Result<VisionResponse, CapabilityError>;
}

#[async_trait]
pub trait LanguageCapability: Send + Sync {
    async fn complete(&self, request: &LanguageRequest) -> Result<LanguageResponse, CapabilityError>;
}

#[async_trait]
pub trait ImageSynthesisCapability: Send + Sync {
    async fn generate(&self, request: &SynthesisRequest) -> Result<SynthesisResponse, CapabilityError>;
}
