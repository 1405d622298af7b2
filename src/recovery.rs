// src/recovery.rs
// Escalating recovery tiers driven by the rolling extraction success
// rate, plus the ordered fallback chain used when a primary extraction
// path returns nothing.

use crate::config::RecoveryConfig;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Light: drop cached recognitions that may have gone stale.
    ClearCaches,
    /// Medium: re-derive the ROI layout from the current frame size.
    ForceRecalibration,
    /// Heavy: widen the inter-frame interval to shed load.
    ReduceSamplingRate,
    /// Critical: tear down and reopen the capture source.
    RestartCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Tier {
    Light,
    Medium,
    Heavy,
    Critical,
}

impl Tier {
    fn action(self) -> RecoveryAction {
        match self {
            Tier::Light => RecoveryAction::ClearCaches,
            Tier::Medium => RecoveryAction::ForceRecalibration,
            Tier::Heavy => RecoveryAction::ReduceSamplingRate,
            Tier::Critical => RecoveryAction::RestartCapture,
        }
    }
}

/// Watches the rolling success rate and recommends at most one recovery
/// action per check. Each tier has its own cooldown; when several tiers
/// apply, the most severe one off cooldown fires.
pub struct RecoveryManager {
    cfg: RecoveryConfig,
    outcomes: VecDeque<bool>,
    last_fired: HashMap<Tier, Instant>,
    actions_taken: u64,
}

impl RecoveryManager {
    pub fn new(cfg: RecoveryConfig) -> Self {
        Self {
            cfg,
            outcomes: VecDeque::new(),
            last_fired: HashMap::new(),
            actions_taken: 0,
        }
    }

    pub fn record(&mut self, success: bool) {
        if self.outcomes.len() == self.cfg.window {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.outcomes.len() < self.cfg.min_samples {
            return None;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        Some(successes as f64 / self.outcomes.len() as f64)
    }

    pub fn actions_taken(&self) -> u64 {
        self.actions_taken
    }

    /// Evaluate the current window and return the action to run, if any.
    pub fn check(&mut self) -> Option<RecoveryAction> {
        let rate = self.success_rate()?;
        let mut applicable = Vec::new();
        if rate < self.cfg.critical_threshold {
            applicable.push((Tier::Critical, self.cfg.critical_cooldown));
        }
        if rate < self.cfg.heavy_threshold {
            applicable.push((Tier::Heavy, self.cfg.heavy_cooldown));
        }
        if rate < self.cfg.medium_threshold {
            applicable.push((Tier::Medium, self.cfg.medium_cooldown));
        }
        if rate < self.cfg.light_threshold {
            applicable.push((Tier::Light, self.cfg.light_cooldown));
        }

        let now = Instant::now();
        for (tier, cooldown) in applicable {
            let ready = self
                .last_fired
                .get(&tier)
                .map(|fired| now.duration_since(*fired) >= cooldown)
                .unwrap_or(true);
            if ready {
                self.last_fired.insert(tier, now);
                self.actions_taken += 1;
                let action = tier.action();
                warn!(?action, rate, "recovery action triggered");
                return Some(action);
            }
        }
        None
    }
}

/// Ordered alternatives tried when the primary extraction path yields
/// nothing. The first non-null answer wins; per-method counters show
/// which links in the chain actually earn their keep.
pub struct FallbackChain<T> {
    methods: Vec<(&'static str, Box<dyn Fn() -> Option<T> + Send + Sync>)>,
    successes: HashMap<&'static str, u64>,
    attempts: HashMap<&'static str, u64>,
}

impl<T> FallbackChain<T> {
    pub fn new() -> Self {
        Self {
            methods: Vec::new(),
            successes: HashMap::new(),
            attempts: HashMap::new(),
        }
    }

    pub fn with_method(
        mut self,
        name: &'static str,
        method: impl Fn() -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        self.methods.push((name, Box::new(method)));
        self
    }

    pub fn run(&mut self) -> Option<(T, &'static str)> {
        for (name, method) in &self.methods {
            *self.attempts.entry(*name).or_insert(0) += 1;
            if let Some(value) = method() {
                *self.successes.entry(*name).or_insert(0) += 1;
                return Some((value, *name));
            }
        }
        None
    }

    pub fn stats(&self) -> Vec<(&'static str, u64, u64)> {
        self.methods
            .iter()
            .map(|(name, _)| {
                (
                    *name,
                    self.attempts.get(name).copied().unwrap_or(0),
                    self.successes.get(name).copied().unwrap_or(0),
                )
            })
            .collect()
    }
}

impl<T> Default for FallbackChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config_with_long_cooldowns() -> RecoveryConfig {
        RecoveryConfig {
            light_cooldown: Duration::from_secs(600),
            medium_cooldown: Duration::from_secs(600),
            heavy_cooldown: Duration::from_secs(600),
            critical_cooldown: Duration::from_secs(600),
            ..RecoveryConfig::default()
        }
    }

    fn record_rate(manager: &mut RecoveryManager, successes: usize, failures: usize) {
        for _ in 0..successes {
            manager.record(true);
        }
        for _ in 0..failures {
            manager.record(false);
        }
    }

    #[test]
    fn test_no_action_below_min_samples() {
        let mut manager = RecoveryManager::new(config_with_long_cooldowns());
        record_rate(&mut manager, 1, 4);
        assert_eq!(manager.success_rate(), None);
        assert_eq!(manager.check(), None);
    }

    #[test]
    fn test_healthy_rate_fires_nothing() {
        let mut manager = RecoveryManager::new(config_with_long_cooldowns());
        record_rate(&mut manager, 18, 2);
        assert_eq!(manager.check(), None);
    }

    #[test]
    fn test_medium_tier_fires_once_then_cools_down() {
        // Success rate pinned at 0.5: below light (0.8) and medium (0.6),
        // above heavy (0.4). The medium tier is the most severe
        // applicable and fires exactly once.
        let mut manager = RecoveryManager::new(config_with_long_cooldowns());
        let mut medium_firings = 0;
        for _ in 0..30 {
            manager.record(true);
            manager.record(false);
            if let Some(action) = manager.check() {
                if action == RecoveryAction::ForceRecalibration {
                    medium_firings += 1;
                }
            }
        }
        assert_eq!(medium_firings, 1);
    }

    #[test]
    fn test_cooled_severe_tier_falls_through_to_lighter() {
        // With medium on cooldown, the light tier still fires.
        let mut manager = RecoveryManager::new(config_with_long_cooldowns());
        record_rate(&mut manager, 10, 10);
        assert_eq!(manager.check(), Some(RecoveryAction::ForceRecalibration));
        assert_eq!(manager.check(), Some(RecoveryAction::ClearCaches));
        assert_eq!(manager.check(), None);
    }

    #[test]
    fn test_total_failure_escalates_to_critical() {
        let mut manager = RecoveryManager::new(config_with_long_cooldowns());
        record_rate(&mut manager, 0, 20);
        assert_eq!(manager.check(), Some(RecoveryAction::RestartCapture));
        assert_eq!(manager.actions_taken(), 1);
    }

    #[test]
    fn test_fallback_chain_first_hit_wins() {
        let mut chain: FallbackChain<i32> = FallbackChain::new()
            .with_method("primary", || None)
            .with_method("secondary", || Some(7))
            .with_method("tertiary", || Some(9));
        let (value, method) = chain.run().unwrap();
        assert_eq!(value, 7);
        assert_eq!(method, "secondary");

        let stats = chain.stats();
        assert_eq!(stats[0], ("primary", 1, 0));
        assert_eq!(stats[1], ("secondary", 1, 1));
        // Tertiary never attempted.
        assert_eq!(stats[2], ("tertiary", 0, 0));
    }

    #[test]
    fn test_fallback_chain_exhausted() {
        let mut chain: FallbackChain<i32> = FallbackChain::new()
            .with_method("only", || None);
        assert!(chain.run().is_none());
    }
}
