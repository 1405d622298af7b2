// src/config.rs
// Tunable parameters for every pipeline stage. Thresholds and cooldowns
// are empirically tuned; treat the defaults as starting points.

use std::time::Duration;

/// Frame-level and region-level change detection.
#[derive(Debug, Clone)]
pub struct ChangeConfig {
    /// Thumbnail width used for the structural similarity approximation.
    pub thumbnail_width: u32,
    /// Frames with similarity at or above this are skipped.
    pub similarity_threshold: f64,
    /// Force a full pass after this long without one, even if similar.
    pub max_skip_interval: Duration,
    /// Side length of the per-ROI binary fingerprint grid.
    pub fingerprint_grid: u32,
    /// Cost of a skipped frame relative to a full pass, for the speedup
    /// estimate.
    pub skip_cost_ratio: f64,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            thumbnail_width: 320,
            similarity_threshold: 0.95,
            max_skip_interval: Duration::from_secs(15),
            fingerprint_grid: 8,
            skip_cost_ratio: 0.07,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
    /// Side length of the grayscale downsample fed to the digest.
    pub digest_grid: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 512,
            ttl: Duration::from_secs(300),
            digest_grid: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnsembleConfig {
    /// Results below this confidence are flagged low-confidence but still
    /// returned.
    pub acceptance_threshold: f32,
    /// Bonus per extra agreeing strategy.
    pub agreement_bonus: f32,
    /// Cap on the total agreement bonus.
    pub agreement_bonus_cap: f32,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.80,
            agreement_bonus: 0.1,
            agreement_bonus_cap: 0.2,
        }
    }
}

impl EnsembleConfig {
    /// Tighter acceptance for sessions where a wrong read is worse than a
    /// missing one.
    pub fn high_precision() -> Self {
        Self {
            acceptance_threshold: 0.99,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Samples retained per field.
    pub window: usize,
    /// Samples further than this many σ from the rest of the window are
    /// trimmed before the weighted mean.
    pub trim_sigma: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            window: 5,
            trim_sigma: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Relative tolerance for the pot-continuity check.
    pub pot_tolerance: f64,
    /// Relative tolerance when snapping blind pairs to the stakes table.
    pub stakes_snap_tolerance: f64,
    /// Half-width of the accepted normalized position band per role.
    pub layout_band: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            pot_tolerance: 0.10,
            stakes_snap_tolerance: 0.15,
            layout_band: 0.12,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Rolling success/failure window size.
    pub window: usize,
    /// Minimum recorded attempts before any tier may fire.
    pub min_samples: usize,
    pub light_threshold: f64,
    pub medium_threshold: f64,
    pub heavy_threshold: f64,
    pub critical_threshold: f64,
    pub light_cooldown: Duration,
    pub medium_cooldown: Duration,
    pub heavy_cooldown: Duration,
    pub critical_cooldown: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            window: 100,
            min_samples: 10,
            light_threshold: 0.8,
            medium_threshold: 0.6,
            heavy_threshold: 0.4,
            critical_threshold: 0.2,
            light_cooldown: Duration::from_secs(30),
            medium_cooldown: Duration::from_secs(60),
            heavy_cooldown: Duration::from_secs(120),
            critical_cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// A field's rolling success rate below this raises a degradation
    /// alert.
    pub degradation_threshold: f64,
    /// Minimum samples before a field can be flagged degraded.
    pub min_samples: usize,
    /// Per-field rolling window size.
    pub window: usize,
    /// Recurring error kinds at or above this count enter the report.
    pub pattern_threshold: usize,
    /// Confidence history length for quality trends.
    pub quality_window: usize,
    /// Windowed mean confidence below this triggers recalibration.
    pub recalibration_threshold: f64,
    /// Minimum spacing between recalibration triggers.
    pub recalibration_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degradation_threshold: 0.5,
            min_samples: 10,
            window: 100,
            pattern_threshold: 5,
            quality_window: 50,
            recalibration_threshold: 0.6,
            recalibration_interval: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceConfig {
    /// Samples kept for the baseline.
    pub baseline_window: usize,
    /// Samples in the recent short window.
    pub recent_window: usize,
    /// Recent mean above baseline by this ratio flags a suspected leak.
    pub leak_ratio: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            baseline_window: 60,
            recent_window: 10,
            leak_ratio: 1.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistConfig {
    /// Snapshots older than this are discarded at load.
    pub staleness: Duration,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            staleness: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Bounded worker pool for per-ROI extraction.
    pub workers: usize,
    /// Watchdog deadline per extraction attempt.
    pub watchdog_timeout: Duration,
    /// Inter-frame interval bounds for adaptive backpressure.
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Multiplicative widening applied while similarity stays high.
    pub backoff_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 6,
            watchdog_timeout: Duration::from_secs(2),
            min_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            backoff_factor: 1.5,
        }
    }
}

/// Aggregate configuration handed to the orchestrator once at
/// construction. Components receive their slice by reference; there is
/// no global mutable configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub change: ChangeConfig,
    pub cache: CacheConfig,
    pub ensemble: EnsembleConfig,
    pub consensus: ConsensusConfig,
    pub validation: ValidationConfig,
    pub recovery: RecoveryConfig,
    pub health: HealthConfig,
    pub resource: ResourceConfig,
    pub persist: PersistConfig,
    pub scheduler: SchedulerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_tuning() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.change.similarity_threshold, 0.95);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.consensus.window, 5);
        assert_eq!(cfg.recovery.window, 100);
        assert_eq!(cfg.scheduler.workers, 6);
    }

    #[test]
    fn test_high_precision_acceptance() {
        let cfg = EnsembleConfig::high_precision();
        assert_eq!(cfg.acceptance_threshold, 0.99);
        assert_eq!(cfg.agreement_bonus, 0.1);
    }
}
