// src/render/mod.rs
pub mod fit;
pub mod font;
pub mod overlay;

pub use fit::{TextFit, TextFitter};
pub use font::{FontMetrics, ResolvedFont, resolve_caption_font};
pub use overlay::{CaptionOverlayRenderer, SvgCaptionRenderer};
