// src/lib.rs
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod pipeline;
pub mod render;
pub mod services;

pub use errors::PipelineError;
pub use pipeline::{CancelHandle, CancelSignal, Pipeline};
