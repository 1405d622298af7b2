// src/ensemble/edges.rs
// Validation-only strategy: checks that a region has the edge density a
// real glyph produces. Empty felt and solid highlights have almost no
// edges; noise and halftone patterns have far too many.

use super::{RecognitionStrategy, StrategyVote, ValidationSignal};
use crate::types::ExtractionKind;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

/// Gradient magnitude counted as an edge pixel.
const EDGE_THRESHOLD: i32 = 40;

/// Edge-pixel fraction band expected for rendered glyphs.
const DENSITY_MIN: f32 = 0.03;
const DENSITY_MAX: f32 = 0.45;

pub struct EdgeDensityStrategy;

impl EdgeDensityStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EdgeDensityStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionStrategy for EdgeDensityStrategy {
    fn name(&self) -> &'static str {
        "edge_density"
    }

    fn reliability(&self) -> f32 {
        0.6
    }

    fn attempt(&self, region: &DynamicImage, _kind: ExtractionKind) -> StrategyVote {
        if region.width() < 4 || region.height() < 4 {
            return StrategyVote::abstain();
        }
        let gray = region
            .resize_exact(
                region.width().min(64),
                region.height().min(64),
                FilterType::Triangle,
            )
            .to_luma8();

        let density = edge_density(&gray);
        if density < DENSITY_MIN || density > DENSITY_MAX {
            // Structure absent: nothing to lend confidence to.
            return StrategyVote::abstain();
        }

        // Peak confidence at the middle of the band, tapering to the
        // edges.
        let mid = (DENSITY_MIN + DENSITY_MAX) / 2.0;
        let half = (DENSITY_MAX - DENSITY_MIN) / 2.0;
        let confidence = (1.0 - ((density - mid).abs() / half)).clamp(0.0, 1.0) * 0.9;

        StrategyVote::signal(
            ValidationSignal::GlyphPresent,
            confidence,
            format!("density={:.3}", density),
        )
    }
}

/// Fraction of pixels whose horizontal or vertical gradient exceeds the
/// edge threshold.
fn edge_density(gray: &GrayImage) -> f32 {
    let (w, h) = (gray.width(), gray.height());
    if w < 2 || h < 2 {
        return 0.0;
    }
    let mut edges = 0u32;
    let mut total = 0u32;
    for y in 0..h - 1 {
        for x in 0..w - 1 {
            let here = gray.get_pixel(x, y)[0] as i32;
            let right = gray.get_pixel(x + 1, y)[0] as i32;
            let below = gray.get_pixel(x, y + 1)[0] as i32;
            if (here - right).abs() > EDGE_THRESHOLD || (here - below).abs() > EDGE_THRESHOLD {
                edges += 1;
            }
            total += 1;
        }
    }
    edges as f32 / total as f32
}
