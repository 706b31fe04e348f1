// src/render/overlay.rs
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use log::debug;
use std::io::Cursor;
use tiny_skia::{ColorU8, Pixmap, Transform};
use usvg::{Options, Tree};

use super::fit::{TextFit, TextFitter};
use super::font::{ResolvedFont, resolve_caption_font};
use crate::config::RenderConfig;
use crate::errors::PipelineError;

const FILL_COLOR: &str = "#FFFFFF";
const STROKE_COLOR: &str = "#000000";

/// Draws top and bottom captions onto a copy of an image.
pub trait CaptionOverlayRenderer: Send + Sync {
    fn overlay(
        &self,
        image: &[u8],
        top_text: Option<&str>,
        bottom_text: Option<&str>,
    ) -> Result<Vec<u8>, PipelineError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ZoneAnchor {
    Top,
    Bottom,
}

/// Rectangle reserved for one caption. `y` is the top edge for a top zone
/// and the bottom edge for a bottom zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Zone {
    pub anchor: ZoneAnchor,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub lines: Vec<String>,
    pub fit: TextFit,
    pub stroke_width: f32,
    pub center_x: f32,
    pub baselines: Vec<f32>,
}

/// Portable renderer: the captions become SVG text rasterized by resvg
/// directly on top of the decoded pixels.
pub struct SvgCaptionRenderer {
    config: RenderConfig,
    font: ResolvedFont,
}

impl SvgCaptionRenderer {
    pub fn new(config: RenderConfig) -> Self {
        let font = resolve_caption_font(&config.preferred_font, config.font_path.as_deref());
        debug!(
            "Caption renderer using font family '{}' (metrics: {})",
            font.family,
            font.metrics.is_some()
        );
        Self { config, font }
    }

    pub fn with_font(config: RenderConfig, font: ResolvedFont) -> Self {
        Self { config, font }
    }

    pub fn font_family(&self) -> &str {
        &self.font.family
    }

    pub fn zones(&self, width: u32, height: u32) -> (Zone, Zone) {
        let w = width as f32;
        let h = height as f32;
        let pad_x = w * self.config.horizontal_padding_fraction;
        let pad_y = h * self.config.vertical_padding_fraction;
        let inner_w = (w - pad_x * 2.0).max(1.0);

        let top = Zone {
            anchor: ZoneAnchor::Top,
            x: pad_x,
            y: pad_y,
            width: inner_w,
            height: (h * self.config.top_zone_fraction - pad_y).max(0.0),
        };
        let bottom = Zone {
            anchor: ZoneAnchor::Bottom,
            x: pad_x,
            y: h - pad_y,
            width: inner_w,
            height: (h * self.config.bottom_zone_fraction - pad_y).max(0.0),
        };
        (top, bottom)
    }

    /// Lays one caption out inside `zone`. Returns None for blank text.
    pub fn layout(&self, text: &str, zone: &Zone) -> Option<CaptionLayout> {
        let text = text.trim().to_uppercase();
        if text.is_empty() {
            return None;
        }

        let fitter = TextFitter::new(
            self.font.metrics.as_ref(),
            self.config.font_step,
            self.config.line_height,
        );
        let min_size = self.config.min_font_size;
        let max_size = (zone.height / self.config.line_height)
            .min(self.config.max_font_size)
            .max(min_size);
        let fit = fitter.fit(&text, zone.width, zone.height, min_size, max_size);

        let lines = if fit.wrapped {
            fitter.wrap(&text, zone.width, fit.font_size)
        } else {
            vec![text]
        };

        let advance = fitter.line_advance(fit.font_size);
        let ascent = fit.font_size * self.font.ascent_ratio();
        let descent = fit.font_size * (1.0 - self.font.ascent_ratio()).max(0.1);
        let first_baseline = match zone.anchor {
            ZoneAnchor::Top => zone.y + ascent,
            // Bottom captions grow upwards from the zone's lower edge.
            ZoneAnchor::Bottom => zone.y - descent - advance * (lines.len() as f32 - 1.0),
        };
        let baselines = (0..lines.len())
            .map(|i| first_baseline + advance * i as f32)
            .collect();

        Some(CaptionLayout {
            stroke_width: (fit.font_size / 8.0).max(self.config.min_stroke_width),
            center_x: zone.x + zone.width / 2.0,
            lines,
            fit,
            baselines,
        })
    }

    fn build_svg(&self, width: u32, height: u32, layouts: &[CaptionLayout]) -> String {
        let mut svg = String::new();
        svg.push_str(&format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = width,
            h = height
        ));
        let weight = if self.font.bold { "bold" } else { "normal" };
        for layout in layouts {
            for (line, baseline) in layout.lines.iter().zip(&layout.baselines) {
                svg.push_str(&format!(
                    r#"<text x="{x}" y="{y}" font-family="{family}" font-size="{size}" font-weight="{weight}" fill="{fill}" stroke="{stroke}" stroke-width="{stroke_width}" stroke-linejoin="round" paint-order="stroke" text-anchor="middle">{text}</text>"#,
                    x = layout.center_x,
                    y = baseline,
                    family = escape_xml(&self.font.family),
                    size = layout.fit.font_size,
                    weight = weight,
                    fill = FILL_COLOR,
                    stroke = STROKE_COLOR,
                    stroke_width = layout.stroke_width,
                    text = escape_xml(line)
                ));
            }
        }
        svg.push_str("</svg>");
        svg
    }

    fn draw(&self, base: RgbaImage, svg: &str) -> Result<RgbaImage, PipelineError> {
        let (width, height) = base.dimensions();
        let mut pixmap = Pixmap::new(width, height).ok_or_else(|| {
            PipelineError::InvalidImageData(format!("cannot allocate {}x{} canvas", width, height))
        })?;
        for (dst, src) in pixmap.pixels_mut().iter_mut().zip(base.pixels()) {
            *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
        }

        let options = Options {
            fontdb: self.font.database.clone(),
            ..Options::default()
        };
        let tree = Tree::from_str(svg, &options)
            .map_err(|e| PipelineError::Unexpected(format!("caption SVG rejected: {}", e)))?;
        resvg::render(&tree, Transform::identity(), &mut pixmap.as_mut());

        let mut out = RgbaImage::new(width, height);
        for (dst, src) in out.pixels_mut().zip(pixmap.pixels()) {
            let color = src.demultiply();
            *dst = image::Rgba([color.red(), color.green(), color.blue(), color.alpha()]);
        }
        Ok(out)
    }
}

impl CaptionOverlayRenderer for SvgCaptionRenderer {
    fn overlay(
        &self,
        image: &[u8],
        top_text: Option<&str>,
        bottom_text: Option<&str>,
    ) -> Result<Vec<u8>, PipelineError> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| PipelineError::InvalidImageData(e.to_string()))?;
        let (width, height) = decoded.dimensions();
        let (top_zone, bottom_zone) = self.zones(width, height);

        let layouts: Vec<CaptionLayout> = [(top_text, top_zone), (bottom_text, bottom_zone)]
            .iter()
            .filter_map(|(text, zone)| text.and_then(|t| self.layout(t, zone)))
            .collect();

        let rgba = decoded.to_rgba8();
        let rendered = if layouts.is_empty() {
            rgba
        } else {
            let svg = self.build_svg(width, height, &layouts);
            self.draw(rgba, &svg)?
        };

        encode_png(rendered)
    }
}

fn encode_png(image: RgbaImage) -> Result<Vec<u8>, PipelineError> {
    let mut output = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| PipelineError::Unexpected(format!("Failed to encode overlay image: {}", e)))?;
    Ok(output)
}

fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
