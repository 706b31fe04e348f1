// src/config.rs
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct VisionConfig {
    pub model: String,
    /// Tags below this confidence are dropped before text generation.
    pub min_tag_confidence: f32,
    /// Longest edge sent to the vision capability.
    pub max_edge_px: u32,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            min_tag_confidence: 0.6,
            max_edge_px: 2048,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TextGenConfig {
    pub primary_model: String,
    pub fallback_model: Option<String>,
    pub temperature: f32,
    pub meme_temperature: f32,
    pub min_description_tokens: u32,
    pub meme_max_tokens: u32,
}

impl Default for TextGenConfig {
    fn default() -> Self {
        Self {
            primary_model: "gpt-4o".to_string(),
            fallback_model: Some("gpt-4o-mini".to_string()),
            temperature: 0.7,
            meme_temperature: 0.9,
            min_description_tokens: 1500,
            meme_max_tokens: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    pub model: String,
    pub size: String,
    pub quality: String,
    pub max_prompt_chars: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
            max_prompt_chars: 4000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderConfig {
    pub preferred_font: String,
    pub font_path: Option<PathBuf>,
    pub min_font_size: f32,
    pub max_font_size: f32,
    pub font_step: f32,
    pub top_zone_fraction: f32,
    pub bottom_zone_fraction: f32,
    pub vertical_padding_fraction: f32,
    pub horizontal_padding_fraction: f32,
    pub min_stroke_width: f32,
    pub line_height: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            preferred_font: "Impact".to_string(),
            font_path: None,
            min_font_size: 10.0,
            max_font_size: 120.0,
            font_step: 2.0,
            top_zone_fraction: 0.38,
            bottom_zone_fraction: 0.28,
            vertical_padding_fraction: 0.02,
            horizontal_padding_fraction: 0.04,
            min_stroke_width: 1.0,
            line_height: 1.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_image_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_image_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub openai: OpenAiConfig,
    pub vision: VisionConfig,
    pub text: TextGenConfig,
    pub synthesis: SynthesisConfig,
    pub render: RenderConfig,
    pub pipeline: PipelineConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let server_defaults = ServerConfig::default();
        let vision_defaults = VisionConfig::default();
        let text_defaults = TextGenConfig::default();
        let synthesis_defaults = SynthesisConfig::default();
        let render_defaults = RenderConfig::default();

        let fallback_model = match env::var("TEXT_FALLBACK_MODEL") {
            Ok(value) if value.trim().is_empty() => None,
            Ok(value) => Some(value.trim().to_string()),
            Err(_) => text_defaults.fallback_model.clone(),
        };

        Ok(Self {
            server: ServerConfig {
                host: env::var("QUIP_HOST").unwrap_or(server_defaults.host),
                port: parse_var("QUIP_PORT", server_defaults.port)?,
            },
            openai: OpenAiConfig {
                api_key: env::var("OPENAI_API_KEY")
                    .map_err(|_| ConfigError::Missing("OPENAI_API_KEY"))?,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                timeout_secs: parse_var("OPENAI_TIMEOUT_SECS", 120)?,
            },
            vision: VisionConfig {
                model: env::var("VISION_MODEL").unwrap_or(vision_defaults.model),
                min_tag_confidence: parse_var(
                    "VISION_MIN_TAG_CONFIDENCE",
                    vision_defaults.min_tag_confidence,
                )?,
                max_edge_px: vision_defaults.max_edge_px,
            },
            text: TextGenConfig {
                primary_model: env::var("TEXT_MODEL").unwrap_or(text_defaults.primary_model),
                fallback_model,
                temperature: parse_var("TEXT_TEMPERATURE", text_defaults.temperature)?,
                meme_temperature: parse_var("MEME_TEMPERATURE", text_defaults.meme_temperature)?,
                ..text_defaults
            },
            synthesis: SynthesisConfig {
                model: env::var("IMAGE_MODEL").unwrap_or(synthesis_defaults.model),
                quality: env::var("IMAGE_QUALITY").unwrap_or(synthesis_defaults.quality),
                ..synthesis_defaults
            },
            render: RenderConfig {
                preferred_font: env::var("MEME_FONT").unwrap_or(render_defaults.preferred_font),
                font_path: env::var("MEME_FONT_PATH").ok().map(PathBuf::from),
                ..render_defaults
            },
            pipeline: PipelineConfig::default(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.vision.min_tag_confidence) {
            return Err(ConfigError::Invalid {
                name: "VISION_MIN_TAG_CONFIDENCE",
                reason: format!("{} is outside [0, 1]", self.vision.min_tag_confidence),
            });
        }
        self.render.validate()
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_font_size <= 0.0 || self.max_font_size < self.min_font_size {
            return Err(ConfigError::Invalid {
                name: "font sizes",
                reason: format!(
                    "expected 0 < min ({}) <= max ({})",
                    self.min_font_size, self.max_font_size
                ),
            });
        }
        if self.font_step <= 0.0 {
            return Err(ConfigError::Invalid {
                name: "font step",
                reason: "must be positive".to_string(),
            });
        }
        if self.top_zone_fraction + self.bottom_zone_fraction > 1.0 {
            return Err(ConfigError::Invalid {
                name: "caption zones",
                reason: "top and bottom zones overlap".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
