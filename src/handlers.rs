// src/handlers.rs
use actix_multipart::Multipart;
use actix_web::{Error, HttpResponse, web};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use log::info;
use std::sync::Arc;

use crate::errors::PipelineError;
use crate::models::*;
use crate::pipeline::{CancelSignal, Pipeline};

pub const DEFAULT_TARGET_WORDS: u32 = 300;
/// Cap for the small text parts of the form.
const TEXT_FIELD_LIMIT: usize = 64;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

#[derive(Default)]
struct ProcessForm {
    image: Option<Vec<u8>>,
    content_type: Option<String>,
    mode: Option<String>,
    target_words: Option<String>,
}

impl ProcessForm {
    fn into_request(self) -> Result<ProcessingRequest, PipelineError> {
        let image = self
            .image
            .ok_or_else(|| PipelineError::InvalidInput("Missing 'image' part".to_string()))?;
        let mode = parse_mode(self.mode.as_deref(), self.target_words.as_deref())?;

        let request = ProcessingRequest::new(image, mode);
        Ok(match self.content_type {
            Some(content_type) => request.with_content_type(content_type),
            None => request,
        })
    }
}

fn parse_mode(mode: Option<&str>, target_words: Option<&str>) -> Result<ProcessingMode, PipelineError> {
    match mode.map(str::trim).unwrap_or("regeneration") {
        "regeneration" => {
            let target_words = match target_words.map(str::trim) {
                None | Some("") => DEFAULT_TARGET_WORDS,
                Some(raw) => raw.parse().map_err(|_| {
                    PipelineError::InvalidInput(format!("target_words is not a number: {}", raw))
                })?,
            };
            Ok(ProcessingMode::Regeneration { target_words })
        }
        "meme" | "meme_generation" => Ok(ProcessingMode::MemeGeneration),
        other => Err(PipelineError::InvalidInput(format!(
            "Unknown mode '{}', expected 'regeneration' or 'meme'",
            other
        ))),
    }
}

/// Collects a part's chunks, failing as soon as the total would exceed
/// `limit` so oversized uploads are never fully buffered.
async fn read_capped<S, E>(mut chunks: S, limit: usize, part: &str) -> Result<Vec<u8>, Error>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Into<Error>,
{
    let mut data = Vec::new();
    while let Some(chunk) = chunks.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return Err(e.into()),
        };
        if data.len() + chunk.len() > limit {
            return Err(PipelineError::InvalidInput(format!(
                "'{}' part exceeds {} bytes",
                part, limit
            ))
            .into());
        }
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_text(field: &mut actix_multipart::Field, part: &str) -> Result<String, Error> {
    let raw = read_capped(field, TEXT_FIELD_LIMIT, part).await?;
    String::from_utf8(raw)
        .map_err(|_| PipelineError::InvalidInput("Form field is not valid UTF-8".to_string()).into())
}

pub async fn process_image(
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let mut form = ProcessForm::default();
    let image_limit = data.pipeline.max_image_bytes();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().to_string();
        match name.as_str() {
            "image" => {
                form.content_type = field.content_type().map(|ct| ct.essence_str().to_string());
                form.image = Some(read_capped(&mut field, image_limit, "image").await?);
            }
            "mode" => form.mode = Some(read_text(&mut field, "mode").await?),
            "target_words" => form.target_words = Some(read_text(&mut field, "target_words").await?),
            _ => {
                // Drain unknown parts so the stream can advance.
                while field.try_next().await?.is_some() {}
            }
        }
    }

    let request = form.into_request()?;
    let result = data.pipeline.process(request, &CancelSignal::never()).await?;
    info!(
        "Request {} finished with status {:?}",
        result.request_id, result.status
    );

    Ok(HttpResponse::Ok().json(&result))
}
