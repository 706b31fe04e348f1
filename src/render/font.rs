// src/render/font.rs
use log::{debug, warn};
use std::path::Path;
use std::sync::Arc;
use ttf_parser::{Face, name_id};
use usvg::fontdb;

const DEFAULT_ASCENT_RATIO: f32 = 0.8;

/// Glyph-advance metrics of one parsed font face.
#[derive(Clone)]
pub struct FontMetrics {
    data: Arc<Vec<u8>>,
    face_index: u32,
    units_per_em: u16,
    space_advance: u16,
    ascent_ratio: f32,
    family: Option<String>,
}

impl FontMetrics {
    /// Parses the first usable face in `data` (a font file or collection).
    pub fn from_data(data: Vec<u8>) -> Option<Self> {
        let count = ttf_parser::fonts_in_collection(&data).unwrap_or(1);
        let index = (0..count).find(|index| Face::parse(&data, *index).is_ok())?;
        Self::from_face(data, index)
    }

    pub fn from_face(data: Vec<u8>, face_index: u32) -> Option<Self> {
        let face = Face::parse(&data, face_index).ok()?;
        let units_per_em = face.units_per_em().max(1);
        let space_advance = face
            .glyph_index(' ')
            .and_then(|id| face.glyph_hor_advance(id))
            .unwrap_or(units_per_em / 2);
        let ascent_ratio = (face.ascender() as f32 / units_per_em as f32).clamp(0.5, 1.2);
        let family = extract_family_name(&face);
        Some(Self {
            data: Arc::new(data),
            face_index,
            units_per_em,
            space_advance,
            ascent_ratio,
            family,
        })
    }

    pub fn family(&self) -> Option<&str> {
        self.family.as_deref()
    }

    pub fn ascent_ratio(&self) -> f32 {
        self.ascent_ratio
    }

    fn advance_units(&self, text: &str) -> Option<u32> {
        let face = Face::parse(&self.data, self.face_index).ok()?;
        let mut advance = 0u32;
        for ch in text.chars() {
            if ch == '\n' {
                continue;
            }
            let glyph_advance = face
                .glyph_index(ch)
                .and_then(|glyph| face.glyph_hor_advance(glyph))
                .unwrap_or(self.space_advance);
            advance = advance.saturating_add(glyph_advance as u32);
        }
        Some(advance)
    }
}

/// Single-line width of `text` in pixels at `font_size`.
/// Without usable metrics the width is estimated from character classes.
pub fn measure_text_width(text: &str, font_size: f32, font: Option<&FontMetrics>) -> f32 {
    if let Some(font) = font {
        if let Some(advance) = font.advance_units(text) {
            return advance as f32 * (font_size / font.units_per_em as f32);
        }
    }
    estimate_text_width_units(text) * font_size
}

fn estimate_char_units(ch: char) -> f32 {
    if ch.is_whitespace() {
        0.25
    } else if ch.is_ascii_uppercase() || ch.is_ascii_digit() {
        0.6
    } else if ch.is_ascii_alphanumeric() {
        0.55
    } else if ch.is_ascii() {
        0.35
    } else {
        0.9
    }
}

fn estimate_text_width_units(text: &str) -> f32 {
    text.chars().map(estimate_char_units).sum()
}

/// The face the overlay renderer draws with, together with the font
/// database handed to the SVG rasterizer.
#[derive(Clone)]
pub struct ResolvedFont {
    pub metrics: Option<FontMetrics>,
    pub family: String,
    pub bold: bool,
    pub database: Arc<fontdb::Database>,
}

impl ResolvedFont {
    pub fn ascent_ratio(&self) -> f32 {
        self.metrics
            .as_ref()
            .map(FontMetrics::ascent_ratio)
            .unwrap_or(DEFAULT_ASCENT_RATIO)
    }
}

/// Finds the caption font: explicit file, then the preferred family, then any
/// bold sans-serif face. Never fails; with no usable font the renderer falls
/// back to estimated metrics.
pub fn resolve_caption_font(preferred: &str, font_path: Option<&Path>) -> ResolvedFont {
    let mut db = fontdb::Database::new();
    db.load_system_fonts();

    if let Some(path) = font_path {
        match std::fs::read(path) {
            Ok(data) => {
                db.load_font_data(data.clone());
                if let Some(metrics) = FontMetrics::from_data(data) {
                    let family = metrics
                        .family()
                        .map(str::to_string)
                        .unwrap_or_else(|| preferred.to_string());
                    debug!("Caption font loaded from {}", path.display());
                    return ResolvedFont {
                        metrics: Some(metrics),
                        family,
                        bold: false,
                        database: Arc::new(db),
                    };
                }
                warn!("Font file {} could not be parsed", path.display());
            }
            Err(e) => warn!("Failed to read font file {}: {}", path.display(), e),
        }
    }

    if let Some(resolved) = query_family(&db, fontdb::Family::Name(preferred), false) {
        return resolved.with_database(db);
    }

    warn!(
        "Preferred caption font '{}' not found, falling back to bold sans-serif",
        preferred
    );

    if let Some(resolved) = query_family(&db, fontdb::Family::SansSerif, true)
        .or_else(|| scan_for_sans(&db))
    {
        return resolved.with_database(db);
    }

    warn!("No usable system font found, caption widths will be estimated");
    ResolvedFont {
        metrics: None,
        family: "sans-serif".to_string(),
        bold: true,
        database: Arc::new(db),
    }
}

struct Candidate {
    metrics: FontMetrics,
    family: String,
    bold: bool,
}

impl Candidate {
    fn with_database(self, db: fontdb::Database) -> ResolvedFont {
        ResolvedFont {
            metrics: Some(self.metrics),
            family: self.family,
            bold: self.bold,
            database: Arc::new(db),
        }
    }
}

fn query_family(db: &fontdb::Database, family: fontdb::Family<'_>, bold: bool) -> Option<Candidate> {
    let families = [family];
    let query = fontdb::Query {
        families: &families,
        weight: if bold {
            fontdb::Weight::BOLD
        } else {
            fontdb::Weight::NORMAL
        },
        ..Default::default()
    };
    let id = db.query(&query)?;
    load_candidate(db, id, bold)
}

fn scan_for_sans(db: &fontdb::Database) -> Option<Candidate> {
    let is_sans = |face: &fontdb::FaceInfo| {
        face.families
            .iter()
            .any(|(name, _)| name.to_lowercase().contains("sans"))
    };
    let id = db
        .faces()
        .find(|face| is_sans(*face) && face.weight >= fontdb::Weight::BOLD)
        .or_else(|| db.faces().find(|face| is_sans(*face)))
        .or_else(|| db.faces().next())
        .map(|face| face.id)?;
    load_candidate(db, id, true)
}

fn load_candidate(db: &fontdb::Database, id: fontdb::ID, bold: bool) -> Option<Candidate> {
    let family = db
        .face(id)
        .and_then(|info| info.families.first().map(|(name, _)| name.clone()))?;
    let metrics = db
        .with_face_data(id, |data, index| (data.to_vec(), index))
        .and_then(|(data, index)| FontMetrics::from_face(data, index))?;
    Some(Candidate {
        metrics,
        family,
        bold,
    })
}

fn extract_family_name(face: &Face<'_>) -> Option<String> {
    let mut fallback = None;
    for name in face.names() {
        if name.name_id == name_id::TYPOGRAPHIC_FAMILY {
            if let Some(value) = name.to_string() {
                return Some(value);
            }
        } else if name.name_id == name_id::FAMILY && fallback.is_none() {
            fallback = name.to_string();
        }
    }
    fallback
}
