// src/roi.rs
// Named regions of interest. The registry is defined once as normalized
// rectangles (resolution-independent, like a calibration layout) and
// materialized in pixel coordinates for the active capture size.

use crate::types::{ExtractionKind, FieldId, Rect};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoiName {
    Pot,
    Board(u8),
    Seat(u8),
    ActionBar,
    Timer,
}

/// Rectangle in fractions of the frame, all components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale to pixel coordinates, clamped to the frame bounds.
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> Rect {
        let x = (self.x * frame_width as f64) as u32;
        let y = (self.y * frame_height as f64) as u32;
        let x = x.min(frame_width.saturating_sub(1));
        let y = y.min(frame_height.saturating_sub(1));
        let w = ((self.width * frame_width as f64) as u32).min(frame_width - x).max(1);
        let h = ((self.height * frame_height as f64) as u32).min(frame_height - y).max(1);
        Rect {
            x,
            y,
            width: w,
            height: h,
        }
    }

    /// Normalized center, used by the spatial-layout validator.
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiEntry {
    pub name: RoiName,
    pub rect: NormRect,
    pub field: FieldId,
    pub kind: ExtractionKind,
}

/// Exactly one registry exists per active resolution; rebuilding for a
/// new capture size replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoiRegistry {
    entries: Vec<RoiEntry>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl RoiRegistry {
    /// Standard nine-seat table layout. Positions follow the usual client
    /// arrangement: pot above center, five board slots across the middle,
    /// action buttons bottom-right, turn timer bottom-center.
    pub fn standard(frame_width: u32, frame_height: u32, seats: u8) -> Self {
        let mut entries = Vec::new();

        entries.push(RoiEntry {
            name: RoiName::Pot,
            rect: NormRect::new(0.40, 0.28, 0.20, 0.06),
            field: FieldId::Pot,
            kind: ExtractionKind::Amount,
        });

        for slot in 0..5u8 {
            let x = 0.30 + slot as f64 * 0.085;
            entries.push(RoiEntry {
                name: RoiName::Board(slot),
                rect: NormRect::new(x, 0.38, 0.075, 0.14),
                field: FieldId::BoardSlot(slot),
                kind: ExtractionKind::CardFace,
            });
        }

        // Seats ring the table; stack labels sit under each avatar.
        for seat in 0..seats {
            let angle = (seat as f64 / seats as f64) * std::f64::consts::TAU;
            let x = 0.5 + 0.40 * angle.sin() - 0.05;
            let y = 0.5 + 0.36 * angle.cos() - 0.04;
            entries.push(RoiEntry {
                name: RoiName::Seat(seat),
                rect: NormRect::new(x.clamp(0.0, 0.90), y.clamp(0.0, 0.92), 0.10, 0.08),
                field: FieldId::SeatStack(seat),
                kind: ExtractionKind::Amount,
            });
        }

        entries.push(RoiEntry {
            name: RoiName::ActionBar,
            rect: NormRect::new(0.55, 0.86, 0.42, 0.11),
            field: FieldId::SeatAction(0),
            kind: ExtractionKind::ActionLabel,
        });

        entries.push(RoiEntry {
            name: RoiName::Timer,
            rect: NormRect::new(0.45, 0.80, 0.10, 0.05),
            field: FieldId::Timer,
            kind: ExtractionKind::TimerValue,
        });

        Self {
            entries,
            frame_width,
            frame_height,
        }
    }

    pub fn from_entries(entries: Vec<RoiEntry>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            entries,
            frame_width,
            frame_height,
        }
    }

    /// Rebuild for a new capture resolution. Normalized rects are
    /// untouched; only the pixel mapping changes.
    pub fn rescaled(&self, frame_width: u32, frame_height: u32) -> Self {
        Self {
            entries: self.entries.clone(),
            frame_width,
            frame_height,
        }
    }

    pub fn entries(&self) -> &[RoiEntry] {
        &self.entries
    }

    pub fn get(&self, name: RoiName) -> Option<&RoiEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn pixel_rect(&self, name: RoiName) -> Option<Rect> {
        self.get(name)
            .map(|e| e.rect.to_pixels(self.frame_width, self.frame_height))
    }

    /// Crop one ROI out of a frame.
    pub fn crop(&self, image: &DynamicImage, name: RoiName) -> Option<DynamicImage> {
        let rect = self.pixel_rect(name)?;
        Some(image.crop_imm(rect.x, rect.y, rect.width, rect.height))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_mapping_stays_in_bounds() {
        let registry = RoiRegistry::standard(1920, 1080, 9);
        for entry in registry.entries() {
            let rect = registry.pixel_rect(entry.name).unwrap();
            assert!(rect.x + rect.width <= 1920, "{:?} overflows x", entry.name);
            assert!(rect.y + rect.height <= 1080, "{:?} overflows y", entry.name);
            assert!(rect.width > 0 && rect.height > 0);
        }
    }

    #[test]
    fn test_rescale_preserves_relative_layout() {
        let base = RoiRegistry::standard(1920, 1080, 6);
        let scaled = base.rescaled(1280, 720);
        let pot_base = base.pixel_rect(RoiName::Pot).unwrap();
        let pot_scaled = scaled.pixel_rect(RoiName::Pot).unwrap();
        let rel_base = pot_base.x as f64 / 1920.0;
        let rel_scaled = pot_scaled.x as f64 / 1280.0;
        assert!((rel_base - rel_scaled).abs() < 0.01);
        assert_eq!(base.len(), scaled.len());
    }

    #[test]
    fn test_board_slots_do_not_overlap_pot() {
        let registry = RoiRegistry::standard(1280, 720, 9);
        let pot = registry.pixel_rect(RoiName::Pot).unwrap();
        for slot in 0..5 {
            let board = registry.pixel_rect(RoiName::Board(slot)).unwrap();
            assert!(board.y >= pot.y + pot.height);
        }
    }
}
