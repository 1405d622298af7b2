// src/ensemble/color.rs
// Validation-only strategy: classifies the dominant ink color of a card
// region into red/black. It never names a card, it lends (or withholds)
// confidence from candidates whose suit family matches.

use super::{RecognitionStrategy, StrategyVote, ValidationSignal};
use crate::types::{ColorFamily, ExtractionKind};
use image::imageops::FilterType;
use image::DynamicImage;

/// Fraction of classified ink pixels required before the signal is
/// considered meaningful at all.
const MIN_INK_RATIO: f32 = 0.02;

pub struct ColorFamilyStrategy;

impl ColorFamilyStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ColorFamilyStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl RecognitionStrategy for ColorFamilyStrategy {
    fn name(&self) -> &'static str {
        "color_family"
    }

    fn reliability(&self) -> f32 {
        0.8
    }

    fn attempt(&self, region: &DynamicImage, kind: ExtractionKind) -> StrategyVote {
        // Only card faces have a meaningful ink color.
        if kind != ExtractionKind::CardFace {
            return StrategyVote::abstain();
        }

        let small = region.resize_exact(
            32.min(region.width().max(1)),
            32.min(region.height().max(1)),
            FilterType::Nearest,
        );
        let rgba = small.to_rgba8();
        let total = rgba.pixels().len() as f32;
        if total == 0.0 {
            return StrategyVote::abstain();
        }

        let mut red = 0u32;
        let mut black = 0u32;
        for px in rgba.pixels() {
            let (r, g, b) = (px[0] as i32, px[1] as i32, px[2] as i32);
            // Red ink: red channel clearly dominant.
            if r > 90 && r - g > 40 && r - b > 40 {
                red += 1;
            // Black ink: dark across all channels. Card background is
            // near-white and falls through both tests.
            } else if r < 90 && g < 90 && b < 90 {
                black += 1;
            }
        }

        let ink = (red + black) as f32;
        if ink / total < MIN_INK_RATIO {
            return StrategyVote::abstain();
        }

        let (family, dominant) = if red >= black {
            (ColorFamily::Red, red)
        } else {
            (ColorFamily::Black, black)
        };
        // Confidence tracks how one-sided the ink distribution is.
        let confidence = (dominant as f32 / ink).clamp(0.0, 1.0);
        StrategyVote::signal(
            ValidationSignal::Color(family),
            confidence,
            format!("red={} black={}", red, black),
        )
    }
}
