// src/change.rs
// Two independent change gates ahead of recognition: a frame-level
// similarity check on downsampled thumbnails, and per-ROI binary
// fingerprints. Both fail open: an internal error is treated as change.

use crate::config::ChangeConfig;
use crate::roi::{RoiName, RoiRegistry};
use crate::types::Frame;
use image::imageops::FilterType;
use image::GrayImage;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// Downsampled remains of the previous frame. Committed at the end of
/// each gate call; the next frame's gate must not run before then.
struct FrameSignature {
    luma: Vec<f64>,
    checksum: u64,
    width: u32,
    height: u32,
}

/// Per-ROI comparison state, mutated once per frame.
#[derive(Debug, Clone, Default)]
pub struct RoiState {
    pub fingerprint: u64,
    pub last_changed_frame: u64,
    pub change_count: u64,
    pub skip_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeStats {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub skipped_frames: u64,
    pub forced_frames: u64,
}

impl ChangeStats {
    pub fn skip_rate(&self) -> f64 {
        if self.total_frames == 0 {
            0.0
        } else {
            self.skipped_frames as f64 / self.total_frames as f64
        }
    }

    /// Estimated throughput multiplier versus processing every frame,
    /// with a skipped frame costing `skip_cost_ratio` of a full pass.
    pub fn estimated_speedup(&self, skip_cost_ratio: f64) -> f64 {
        if self.total_frames == 0 {
            return 1.0;
        }
        let actual =
            self.processed_frames as f64 + self.skipped_frames as f64 * skip_cost_ratio;
        if actual <= 0.0 {
            return 1.0;
        }
        self.total_frames as f64 / actual
    }
}

#[derive(Debug, Clone)]
pub struct FrameDecision {
    pub process: bool,
    pub similarity: f64,
    pub reason: &'static str,
}

pub struct ChangeDetector {
    cfg: ChangeConfig,
    previous: Option<FrameSignature>,
    roi_states: HashMap<RoiName, RoiState>,
    stats: ChangeStats,
    frame_no: u64,
    last_full_process: Option<Instant>,
}

impl ChangeDetector {
    pub fn new(cfg: ChangeConfig) -> Self {
        Self {
            cfg,
            previous: None,
            roi_states: HashMap::new(),
            stats: ChangeStats::default(),
            frame_no: 0,
            last_full_process: None,
        }
    }

    pub fn frame_no(&self) -> u64 {
        self.frame_no
    }

    /// Frame-level gate. Returns the decision plus the similarity score
    /// against the previous frame (1.0 when there is none yet).
    pub fn should_process_frame(&mut self, frame: &Frame) -> FrameDecision {
        self.frame_no += 1;
        self.stats.total_frames += 1;

        let signature = match self.thumbnail_signature(frame) {
            Some(sig) => sig,
            None => {
                // Degenerate frame; fail open.
                self.stats.processed_frames += 1;
                self.last_full_process = Some(Instant::now());
                return FrameDecision {
                    process: true,
                    similarity: 0.0,
                    reason: "unreadable frame",
                };
            }
        };

        let decision = match &self.previous {
            None => FrameDecision {
                process: true,
                similarity: 0.0,
                reason: "first frame",
            },
            Some(prev) => {
                if prev.checksum == signature.checksum {
                    FrameDecision {
                        process: false,
                        similarity: 1.0,
                        reason: "exact duplicate",
                    }
                } else {
                    let similarity = structural_similarity(prev, &signature);
                    if similarity < self.cfg.similarity_threshold {
                        FrameDecision {
                            process: true,
                            similarity,
                            reason: "changed",
                        }
                    } else {
                        FrameDecision {
                            process: false,
                            similarity,
                            reason: "similar",
                        }
                    }
                }
            }
        };

        // Deadline override: never coast on skips indefinitely.
        let decision = if !decision.process
            && self
                .last_full_process
                .map(|t| t.elapsed() >= self.cfg.max_skip_interval)
                .unwrap_or(false)
        {
            self.stats.forced_frames += 1;
            FrameDecision {
                process: true,
                similarity: decision.similarity,
                reason: "max skip interval",
            }
        } else {
            decision
        };

        if decision.process {
            self.stats.processed_frames += 1;
            self.last_full_process = Some(Instant::now());
        } else {
            self.stats.skipped_frames += 1;
            debug!(
                similarity = decision.similarity,
                reason = decision.reason,
                "frame skipped"
            );
        }

        // Commit the comparison buffer for the next cycle.
        self.previous = Some(signature);
        decision
    }

    /// Region-level gate. A ROI with no stored fingerprint counts as
    /// changed; any per-ROI failure also counts as changed.
    pub fn detect_changed_regions(
        &mut self,
        frame: &Frame,
        registry: &RoiRegistry,
    ) -> HashSet<RoiName> {
        let mut changed = HashSet::new();
        let frame_no = self.frame_no;

        for entry in registry.entries() {
            let fingerprint = match registry.crop(&frame.image, entry.name) {
                Some(crop) => region_fingerprint(&crop.to_luma8(), self.cfg.fingerprint_grid),
                None => None,
            };

            let state = self.roi_states.entry(entry.name).or_default();
            match fingerprint {
                Some(fp) => {
                    let is_new = state.last_changed_frame == 0 && state.change_count == 0;
                    if is_new || fp != state.fingerprint {
                        state.fingerprint = fp;
                        state.last_changed_frame = frame_no;
                        state.change_count += 1;
                        changed.insert(entry.name);
                    } else {
                        state.skip_count += 1;
                    }
                }
                None => {
                    // Fail open for this region.
                    state.last_changed_frame = frame_no;
                    state.change_count += 1;
                    changed.insert(entry.name);
                }
            }
        }

        changed
    }

    pub fn roi_state(&self, name: RoiName) -> Option<&RoiState> {
        self.roi_states.get(&name)
    }

    pub fn stats(&self) -> ChangeStats {
        self.stats.clone()
    }

    /// Drop all comparison state, e.g. when the capture source restarts.
    pub fn reset(&mut self) {
        self.previous = None;
        self.roi_states.clear();
        self.last_full_process = None;
    }

    fn thumbnail_signature(&self, frame: &Frame) -> Option<FrameSignature> {
        if frame.width() == 0 || frame.height() == 0 {
            return None;
        }
        let width = self.cfg.thumbnail_width.min(frame.width()).max(1);
        let height =
            ((frame.height() as f64 / frame.width() as f64) * width as f64).max(1.0) as u32;
        // Nearest keeps this cheap; structure survives blocky resampling.
        let thumb = frame
            .image
            .resize_exact(width, height, FilterType::Nearest)
            .to_luma8();

        let mut checksum: u64 = 0;
        let mut luma = Vec::with_capacity((width * height) as usize);
        for (i, px) in thumb.pixels().enumerate() {
            luma.push(px[0] as f64);
            let weight = (i as u64 + 1) % 997;
            checksum = checksum.wrapping_add(px[0] as u64 * weight);
        }
        if luma.is_empty() {
            return None;
        }
        Some(FrameSignature {
            luma,
            checksum,
            width,
            height,
        })
    }
}

/// Cheap structural-similarity approximation over whole thumbnails:
/// the SSIM formula applied globally from means, variances and
/// covariance, clamped to [0, 1].
fn structural_similarity(a: &FrameSignature, b: &FrameSignature) -> f64 {
    if a.width != b.width || a.height != b.height || a.luma.len() != b.luma.len() {
        return 0.0;
    }
    let n = a.luma.len() as f64;
    let mean_a: f64 = a.luma.iter().sum::<f64>() / n;
    let mean_b: f64 = b.luma.iter().sum::<f64>() / n;

    let mut var_a = 0.0;
    let mut var_b = 0.0;
    let mut cov = 0.0;
    for (pa, pb) in a.luma.iter().zip(b.luma.iter()) {
        let da = pa - mean_a;
        let db = pb - mean_b;
        var_a += da * da;
        var_b += db * db;
        cov += da * db;
    }
    var_a /= n;
    var_b /= n;
    cov /= n;

    const C1: f64 = 6.5025; // (0.01 * 255)^2
    const C2: f64 = 58.5225; // (0.03 * 255)^2
    let numerator = (2.0 * mean_a * mean_b + C1) * (2.0 * cov + C2);
    let denominator = (mean_a * mean_a + mean_b * mean_b + C1) * (var_a + var_b + C2);
    if denominator == 0.0 {
        return 1.0;
    }
    (numerator / denominator).clamp(0.0, 1.0)
}

/// Position-tolerant binary fingerprint of a small region: downsample to
/// a grid, set a bit where the cell exceeds the grid mean.
fn region_fingerprint(region: &GrayImage, grid: u32) -> Option<u64> {
    if region.width() == 0 || region.height() == 0 || grid == 0 || grid * grid > 64 {
        return None;
    }
    let small = image::imageops::resize(region, grid, grid, FilterType::Nearest);
    let sum: u64 = small.pixels().map(|p| p[0] as u64).sum();
    let avg = sum / (grid * grid) as u64;

    let mut bits: u64 = 0;
    for (i, px) in small.pixels().enumerate() {
        if px[0] as u64 > avg {
            bits |= 1 << i;
        }
    }
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn flat_frame(width: u32, height: u32, gray: u8) -> Frame {
        let img = RgbaImage::from_fn(width, height, |_, _| Rgba([gray, gray, gray, 255]));
        Frame::new(DynamicImage::ImageRgba8(img))
    }

    fn patterned_frame(width: u32, height: u32, bright: Option<(u32, u32, u32, u32)>) -> Frame {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            let base = (((x / 16) + (y / 16)) % 2) as u8 * 90 + 40;
            let lit = bright
                .map(|(bx, by, bw, bh)| x >= bx && x < bx + bw && y >= by && y < by + bh)
                .unwrap_or(false);
            if lit {
                Rgba([230, 230, 230, 255])
            } else {
                Rgba([base, base, base, 255])
            }
        });
        Frame::new(DynamicImage::ImageRgba8(img))
    }

    #[test]
    fn test_first_frame_always_processes() {
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        let decision = detector.should_process_frame(&flat_frame(640, 360, 80));
        assert!(decision.process);
        assert_eq!(decision.reason, "first frame");
    }

    #[test]
    fn test_identical_consecutive_frames_skip() {
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        let frame = flat_frame(640, 360, 80);
        assert!(detector.should_process_frame(&frame).process);
        let second = detector.should_process_frame(&frame);
        assert!(!second.process);
        assert_eq!(second.similarity, 1.0);
    }

    #[test]
    fn test_five_identical_frames_process_once() {
        // One full pass then four skips: 80% skip rate.
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        let frame = patterned_frame(640, 360, None);
        for _ in 0..5 {
            detector.should_process_frame(&frame);
        }
        let stats = detector.stats();
        assert_eq!(stats.processed_frames, 1);
        assert_eq!(stats.skipped_frames, 4);
        assert!((stats.skip_rate() - 0.8).abs() < 1e-9);
        assert!(stats.estimated_speedup(0.07) > 3.0);
    }

    #[test]
    fn test_gross_change_processes() {
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        detector.should_process_frame(&patterned_frame(640, 360, None));
        let changed = patterned_frame(640, 360, Some((0, 0, 640, 180)));
        let decision = detector.should_process_frame(&changed);
        assert!(decision.process);
        assert!(decision.similarity < 0.95);
    }

    #[test]
    fn test_max_skip_interval_forces_processing() {
        let cfg = ChangeConfig {
            max_skip_interval: std::time::Duration::from_millis(10),
            ..ChangeConfig::default()
        };
        let mut detector = ChangeDetector::new(cfg);
        let frame = patterned_frame(640, 360, None);
        assert!(detector.should_process_frame(&frame).process);
        assert!(!detector.should_process_frame(&frame).process);

        std::thread::sleep(std::time::Duration::from_millis(20));
        let forced = detector.should_process_frame(&frame);
        assert!(forced.process);
        assert_eq!(forced.reason, "max skip interval");
        assert_eq!(detector.stats().forced_frames, 1);
    }

    #[test]
    fn test_degenerate_frame_fails_open() {
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        detector.should_process_frame(&flat_frame(640, 360, 80));
        let empty = flat_frame(0, 0, 0);
        assert!(detector.should_process_frame(&empty).process);
    }

    #[test]
    fn test_changed_regions_isolated() {
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        let registry = RoiRegistry::standard(640, 360, 6);
        let base = patterned_frame(640, 360, None);

        // First observation: everything counts as changed.
        let first = detector.detect_changed_regions(&base, &registry);
        assert_eq!(first.len(), registry.len());

        // Same frame again: nothing changed.
        let second = detector.detect_changed_regions(&base, &registry);
        assert!(second.is_empty());

        // Light up half the pot region only.
        let pot = registry.pixel_rect(RoiName::Pot).unwrap();
        let lit = patterned_frame(
            640,
            360,
            Some((pot.x, pot.y, pot.width / 2, pot.height)),
        );
        let third = detector.detect_changed_regions(&lit, &registry);
        assert!(third.contains(&RoiName::Pot));
        assert!(!third.contains(&RoiName::Timer));
    }

    #[test]
    fn test_roi_counters_accumulate() {
        let mut detector = ChangeDetector::new(ChangeConfig::default());
        let registry = RoiRegistry::standard(640, 360, 6);
        let frame = patterned_frame(640, 360, None);
        detector.should_process_frame(&frame);
        detector.detect_changed_regions(&frame, &registry);
        detector.detect_changed_regions(&frame, &registry);

        let state = detector.roi_state(RoiName::Pot).unwrap();
        assert_eq!(state.change_count, 1);
        assert_eq!(state.skip_count, 1);
    }
}
