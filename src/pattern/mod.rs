//! Pattern extraction and confidence tracking (§4.7), run during `LEARN`.
//!
//! The confidence-update math itself lives on [`crate::core::Pattern`]
//! (`support`/`falsify`); this module is the per-cycle driver that decides,
//! for each pool, whether an existing pattern's precondition matched (and
//! by how much it was falsified) and folds in new patterns.

use chrono::{DateTime, Utc};

use crate::core::{Pattern, PatternKind, PoolObservation};

/// Default actionable threshold (§3, §6 `MIN_PATTERN_CONFIDENCE`).
pub const MIN_PATTERN_CONFIDENCE_DEFAULT: f64 = 0.7;

/// Deviation tolerance beyond which a pattern's prediction counts as
/// falsified rather than merely imprecise (§4.7: "predicted outcome
/// deviates beyond tolerance").
pub const FALSIFY_TOLERANCE: f64 = 0.30;

/// A single pool's delta since its last observation, the minimal signal
/// each pattern-kind precondition checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolDelta {
    pub apr_delta_1h: f64,
    pub volume_delta_1h: f64,
    pub predicted_apr: f64,
    pub observed_apr: f64,
}

impl PoolDelta {
    #[must_use]
    pub fn from_observations(previous: &PoolObservation, current: &PoolObservation, predicted_apr: f64) -> Self {
        Self {
            apr_delta_1h: current.total_apr() - previous.total_apr(),
            volume_delta_1h: current.volume_24h_usd - previous.volume_24h_usd,
            predicted_apr,
            observed_apr: current.total_apr(),
        }
    }

    fn prediction_deviation(&self) -> f64 {
        if self.predicted_apr.abs() < f64::EPSILON {
            0.0
        } else {
            (self.observed_apr - self.predicted_apr).abs() / self.predicted_apr.abs()
        }
    }
}

/// Whether `delta` matches a given pattern kind's precondition (§4.7: "if a
/// known pattern kind's precondition matches").
#[must_use]
pub fn precondition_matches(kind: PatternKind, delta: &PoolDelta) -> bool {
    match kind {
        PatternKind::AprDegradation => delta.apr_delta_1h <= -0.01,
        PatternKind::VolumeSpike => delta.volume_delta_1h > 0.0 && delta.volume_delta_1h.abs() > 1.0,
        PatternKind::GasWindow | PatternKind::PoolLifecycle | PatternKind::Arbitrage | PatternKind::Other => false,
    }
}

/// Applies one cycle of support/falsify updates to `patterns` in place for
/// every `(kind, delta)` pair whose precondition matches, and returns any
/// brand-new patterns that should be added to `patterns_active` (confidence
/// 0.3, per §4.7).
pub fn update_patterns(patterns: &mut [Pattern], delta: &PoolDelta, now: DateTime<Utc>) {
    for pattern in patterns.iter_mut() {
        if !precondition_matches(pattern.kind, delta) {
            continue;
        }
        if delta.prediction_deviation() > FALSIFY_TOLERANCE {
            pattern.falsify(now);
        } else {
            pattern.support(now);
        }
    }
}

/// Looks for a matching active pattern of `kind`; if none exists and the
/// precondition matches, mints a fresh one at the initial confidence.
pub fn extract_or_update(
    patterns: &mut Vec<Pattern>,
    kind: PatternKind,
    description: impl Into<String>,
    delta: &PoolDelta,
    now: DateTime<Utc>,
) {
    if !precondition_matches(kind, delta) {
        return;
    }
    if let Some(existing) = patterns.iter_mut().find(|p| p.kind == kind) {
        if delta.prediction_deviation() > FALSIFY_TOLERANCE {
            existing.falsify(now);
        } else {
            existing.support(now);
        }
    } else {
        patterns.push(Pattern::new(kind, description, now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PoolId;

    fn obs(apr: f64, volume: f64) -> PoolObservation {
        PoolObservation {
            pool_id: PoolId::new("p"),
            pair_label: "A/B".into(),
            tvl_usd: 1_000_000.0,
            volume_24h_usd: volume,
            fee_apr: apr,
            reward_apr: 0.0,
            observed_at: Utc::now(),
            emotion_at_observation: crate::core::Emotion::Stable,
        }
    }

    #[test]
    fn apr_degradation_precondition_matches_on_drop() {
        let previous = obs(0.20, 1000.0);
        let current = obs(0.10, 1000.0);
        let delta = PoolDelta::from_observations(&previous, &current, 0.18);
        assert!(precondition_matches(PatternKind::AprDegradation, &delta));
    }

    #[test]
    fn new_pattern_starts_at_initial_confidence() {
        let previous = obs(0.20, 1000.0);
        let current = obs(0.10, 1000.0);
        let delta = PoolDelta::from_observations(&previous, &current, 0.10);
        let mut patterns = Vec::new();
        extract_or_update(&mut patterns, PatternKind::AprDegradation, "apr dropping", &delta, Utc::now());
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].confidence, crate::core::pattern_types::INITIAL_PATTERN_CONFIDENCE);
    }

    #[test]
    fn repeated_support_pushes_existing_pattern_toward_actionable() {
        let previous = obs(0.20, 1000.0);
        let current = obs(0.10, 1000.0);
        let delta = PoolDelta::from_observations(&previous, &current, 0.10);
        let mut patterns = Vec::new();
        for _ in 0..20 {
            extract_or_update(&mut patterns, PatternKind::AprDegradation, "apr dropping", &delta, Utc::now());
        }
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].confidence >= MIN_PATTERN_CONFIDENCE_DEFAULT);
    }

    #[test]
    fn large_deviation_falsifies_instead_of_supporting() {
        let previous = obs(0.20, 1000.0);
        let current = obs(0.10, 1000.0);
        // predicted_apr way off from what actually happened -> falsify path
        let delta = PoolDelta::from_observations(&previous, &current, 1.0);
        let mut patterns = vec![Pattern::new(PatternKind::AprDegradation, "x", Utc::now())];
        patterns[0].support(Utc::now());
        let before = patterns[0].confidence;
        update_patterns(&mut patterns, &delta, Utc::now());
        assert!(patterns[0].confidence < before);
    }
}
