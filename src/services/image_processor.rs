// src/services/image_processor.rs
use crate::errors::PipelineError;
use bytes::Bytes;
use image::{GenericImageView, ImageFormat as ImgFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadFormat {
    Jpeg,
    Png,
}

impl UploadFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            UploadFormat::Jpeg => "image/jpeg",
            UploadFormat::Png => "image/png",
        }
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or(mime).trim().to_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" => Some(UploadFormat::Jpeg),
            "image/png" => Some(UploadFormat::Png),
            _ => None,
        }
    }
}

pub struct ImageProcessor {
    max_bytes: usize,
}

impl ImageProcessor {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Checks size bounds and sniffs the magic bytes. The declared content
    /// type, when present, must agree with what the bytes actually are.
    pub fn validate_upload(
        &self,
        data: &[u8],
        declared: Option<&str>,
    ) -> Result<UploadFormat, PipelineError> {
        if data.is_empty() {
            return Err(PipelineError::InvalidInput("Image is empty".to_string()));
        }
        if data.len() > self.max_bytes {
            return Err(PipelineError::InvalidInput(format!(
                "Image is {} bytes, limit is {}",
                data.len(),
                self.max_bytes
            )));
        }

        let sniffed = match image::guess_format(data) {
            Ok(ImgFormat::Jpeg) => UploadFormat::Jpeg,
            Ok(ImgFormat::Png) => UploadFormat::Png,
            Ok(other) => {
                return Err(PipelineError::InvalidInput(format!(
                    "Unsupported image format: {:?}",
                    other
                )));
            }
            Err(_) => {
                return Err(PipelineError::InvalidInput(
                    "Data is not a JPEG or PNG image".to_string(),
                ));
            }
        };

        if let Some(declared) = declared {
            let declared_format = UploadFormat::from_mime(declared).ok_or_else(|| {
                PipelineError::InvalidInput(format!("Unsupported content type: {}", declared))
            })?;
            if declared_format != sniffed {
                return Err(PipelineError::InvalidInput(format!(
                    "Declared content type {} does not match image data ({})",
                    declared,
                    sniffed.mime()
                )));
            }
        }

        Ok(sniffed)
    }

    /// Downscales images whose longest edge exceeds `max_edge` before they
    /// are sent for analysis. Undecodable data is passed through untouched.
    pub fn prepare_for_vision(data: Bytes, max_edge: u32) -> Bytes {
        let img = match image::load_from_memory(&data) {
            Ok(img) => img,
            Err(_) => return data,
        };

        let (width, height) = img.dimensions();
        if width <= max_edge && height <= max_edge {
            return data;
        }

        let ratio = (max_edge as f32 / width.max(height) as f32).min(1.0);
        let new_width = ((width as f32 * ratio) as u32).max(1);
        let new_height = ((height as f32 * ratio) as u32).max(1);

        let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

        let mut output = Vec::new();
        match resized.write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png) {
            Ok(()) => Bytes::from(output),
            Err(e) => {
                log::warn!("Failed to encode resized image, sending original: {}", e);
                data
            }
        }
    }
}
