// src/render/fit.rs
use super::font::{FontMetrics, measure_text_width};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextFit {
    pub font_size: f32,
    pub wrapped: bool,
}

/// Picks the largest font size that keeps a caption inside its box.
///
/// Sizes are scanned linearly from the maximum down in fixed steps; the
/// domain is small and the first (largest) fitting size wins. A single line
/// is preferred. When no single-line size fits, the scan repeats over the
/// word-wrapped layout, and if nothing fits even then the minimum size is
/// returned with `wrapped` set so the caller can accept the overflow.
pub struct TextFitter<'a> {
    font: Option<&'a FontMetrics>,
    step: f32,
    line_height: f32,
}

impl<'a> TextFitter<'a> {
    pub fn new(font: Option<&'a FontMetrics>, step: f32, line_height: f32) -> Self {
        Self {
            font,
            step: if step > 0.0 { step } else { 2.0 },
            line_height: line_height.max(1.0),
        }
    }

    pub fn fit(
        &self,
        text: &str,
        max_width: f32,
        max_height: f32,
        min_font_size: f32,
        max_font_size: f32,
    ) -> TextFit {
        let max_font_size = max_font_size.max(min_font_size);
        let text = text.trim();
        if text.is_empty() {
            return TextFit {
                font_size: max_font_size,
                wrapped: false,
            };
        }

        let candidates = candidate_sizes(min_font_size, max_font_size, self.step);
        // A zone shorter than one minimum-size line can only be judged on width.
        let height_binding = max_height >= min_font_size * self.line_height;

        for &size in &candidates {
            let fits_width = self.width(text, size) <= max_width;
            let fits_height = !height_binding || size * self.line_height <= max_height;
            if fits_width && fits_height {
                return TextFit {
                    font_size: size,
                    wrapped: false,
                };
            }
        }

        for &size in &candidates {
            let lines = self.wrap(text, max_width, size);
            let fits_width = lines.iter().all(|line| self.width(line, size) <= max_width);
            let fits_height = self.block_height(lines.len(), size) <= max_height;
            if fits_width && fits_height {
                return TextFit {
                    font_size: size,
                    wrapped: true,
                };
            }
        }

        TextFit {
            font_size: min_font_size,
            wrapped: true,
        }
    }

    /// Greedy word wrap. A word wider than `max_width` keeps its own line.
    pub fn wrap(&self, text: &str, max_width: f32, font_size: f32) -> Vec<String> {
        let mut lines = Vec::new();
        let mut current = String::new();
        for word in text.split_whitespace() {
            if current.is_empty() {
                current.push_str(word);
                continue;
            }
            let candidate = format!("{} {}", current, word);
            if self.width(&candidate, font_size) <= max_width {
                current = candidate;
            } else {
                lines.push(std::mem::take(&mut current));
                current.push_str(word);
            }
        }
        if !current.is_empty() {
            lines.push(current);
        }
        lines
    }

    pub fn block_height(&self, line_count: usize, font_size: f32) -> f32 {
        line_count as f32 * font_size * self.line_height
    }

    pub fn line_advance(&self, font_size: f32) -> f32 {
        font_size * self.line_height
    }

    fn width(&self, text: &str, font_size: f32) -> f32 {
        measure_text_width(text, font_size, self.font)
    }
}

fn candidate_sizes(min: f32, max: f32, step: f32) -> Vec<f32> {
    let mut sizes = Vec::new();
    let mut size = max;
    while size > min {
        sizes.push(size);
        size -= step;
    }
    sizes.push(min);
    sizes
}
