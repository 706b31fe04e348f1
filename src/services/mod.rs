// src/services/mod.rs
pub mod capabilities;
pub mod image_processor;
pub mod image_synthesis;
pub mod openai;
pub mod text_generation;
pub mod vision;

pub use capabilities::{ImageSynthesisCapability, LanguageCapability, VisionCapability};
pub use image_processor::ImageProcessor;
pub use image_synthesis::ImageSynthesizer;
pub use openai::OpenAiClient;
pub use text_generation::TextGenerator;
pub use vision::VisionAnalyzer;
