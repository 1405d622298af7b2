// src/ensemble/ocr.rs
// OCR-backed recognition. The engine itself (tesseract, a bundled
// model, a remote service) is a collaborator injected behind a trait;
// this strategy owns crop preprocessing, charset restriction and
// parsing of the raw text into a typed value.

use super::{RecognitionStrategy, StrategyVote};
use crate::types::{Card, ExtractionKind, FieldValue};
use crate::validate::normalize_recognized_text;
use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use std::sync::Arc;
use tracing::debug;

/// Raw engine output for one crop.
#[derive(Debug, Clone)]
pub struct OcrObservation {
    pub text: String,
    pub confidence: f32,
}

/// Seam to the external OCR backend.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &GrayImage, charset: &str) -> Result<OcrObservation>;
}

/// Expected character set per extraction kind, handed to the engine as
/// a whitelist.
fn charset_for(kind: ExtractionKind) -> &'static str {
    match kind {
        ExtractionKind::Amount => "0123456789.,$kKmM",
        ExtractionKind::CardFace => "23456789TJQKAcdhs10",
        ExtractionKind::ActionLabel => "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-",
        ExtractionKind::TimerValue => "0123456789:",
    }
}

pub struct OcrStrategy {
    engine: Arc<dyn OcrEngine>,
}

impl OcrStrategy {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self { engine }
    }
}

impl RecognitionStrategy for OcrStrategy {
    fn name(&self) -> &'static str {
        "ocr"
    }

    fn attempt(&self, region: &DynamicImage, kind: ExtractionKind) -> StrategyVote {
        let prepared = prepare_crop(region);
        let observation = match self.engine.recognize(&prepared, charset_for(kind)) {
            Ok(obs) => obs,
            Err(err) => {
                // Backend hiccups are transient; the ensemble carries on
                // with the remaining strategies.
                debug!(error = %err, "ocr engine unavailable for region");
                return StrategyVote::abstain();
            }
        };

        let raw = observation.text.trim();
        if raw.is_empty() {
            return StrategyVote::abstain();
        }

        match parse_value(raw, kind) {
            Some(value) => StrategyVote::value(
                value,
                observation.confidence.clamp(0.0, 1.0),
                format!("text={:?}", raw),
            ),
            None => {
                // Text came back but did not parse: a null vote at the
                // engine's confidence still counts as an attempt.
                StrategyVote {
                    value: None,
                    confidence: observation.confidence * 0.5,
                    signal: Some(super::ValidationSignal::GlyphPresent),
                    detail: format!("unparsed={:?}", raw),
                }
            }
        }
    }
}

/// Upscale small crops and stretch contrast before handing the region
/// to the engine; tiny low-contrast labels are where engines fail.
fn prepare_crop(region: &DynamicImage) -> GrayImage {
    let gray = region.to_luma8();
    let (w, h) = (gray.width().max(1), gray.height().max(1));
    let upscaled = if h < 32 {
        image::imageops::resize(&gray, w * 2, h * 2, FilterType::Triangle)
    } else {
        gray
    };
    stretch_contrast(&upscaled)
}

fn stretch_contrast(img: &GrayImage) -> GrayImage {
    let mut lo = 255u8;
    let mut hi = 0u8;
    for p in img.pixels() {
        lo = lo.min(p[0]);
        hi = hi.max(p[0]);
    }
    if hi <= lo {
        return img.clone();
    }
    let range = (hi - lo) as f32;
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        let v = img.get_pixel(x, y)[0];
        Luma([(((v - lo) as f32 / range) * 255.0) as u8])
    })
}

fn parse_value(raw: &str, kind: ExtractionKind) -> Option<FieldValue> {
    let normalized = normalize_recognized_text(raw, kind);
    match kind {
        ExtractionKind::Amount => normalized.parse::<f64>().ok().map(FieldValue::Number),
        ExtractionKind::CardFace => Card::parse(&normalized).map(FieldValue::Card),
        ExtractionKind::ActionLabel => {
            let label = normalized.to_lowercase();
            if label.is_empty() {
                None
            } else {
                Some(FieldValue::Category(label))
            }
        }
        ExtractionKind::TimerValue => parse_timer(&normalized).map(FieldValue::Number),
    }
}

/// "0:23" or "23" → seconds.
fn parse_timer(text: &str) -> Option<f64> {
    if let Some((minutes, seconds)) = text.split_once(':') {
        let m: f64 = minutes.parse().ok()?;
        let s: f64 = seconds.parse().ok()?;
        Some(m * 60.0 + s)
    } else {
        text.parse().ok()
    }
}
