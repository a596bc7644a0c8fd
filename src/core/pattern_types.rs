//! The `Pattern` entity tracked by [`crate::pattern`] and consulted by the
//! decider.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::PatternId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternKind {
    GasWindow,
    AprDegradation,
    VolumeSpike,
    PoolLifecycle,
    Arbitrage,
    Other,
}

/// Confidence a pattern is initialized with on first observation (§4.7).
pub const INITIAL_PATTERN_CONFIDENCE: f64 = 0.3;
/// Confidence at or above which a pattern is advisory (§3, §4.7).
pub const ADVISORY_PATTERN_CONFIDENCE: f64 = 0.5;
/// α used when supporting evidence is observed (§4.7).
pub const ALPHA_SUPPORT: f64 = 0.1;
/// α used when a pattern's prediction is falsified (§4.7).
pub const ALPHA_FALSIFY: f64 = 0.2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub kind: PatternKind,
    pub description: String,
    pub confidence: f64,
    pub support_count: u64,
    pub first_observed_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
    pub payload: HashMap<String, String>,
}

impl Pattern {
    #[must_use]
    pub fn new(kind: PatternKind, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: PatternId::new(),
            kind,
            description: description.into(),
            confidence: INITIAL_PATTERN_CONFIDENCE,
            support_count: 1,
            first_observed_at: now,
            last_observed_at: now,
            payload: HashMap::new(),
        }
    }

    /// Applies supporting evidence: `new = old + (1 - old) * alpha_support`.
    pub fn support(&mut self, now: DateTime<Utc>) {
        self.confidence += (1.0 - self.confidence) * ALPHA_SUPPORT;
        self.support_count += 1;
        self.last_observed_at = now;
    }

    /// Applies falsifying evidence: `new = old * (1 - alpha_falsify)`.
    pub fn falsify(&mut self, now: DateTime<Utc>) {
        self.confidence *= 1.0 - ALPHA_FALSIFY;
        self.last_observed_at = now;
    }

    #[must_use]
    pub fn is_advisory(&self) -> bool {
        self.confidence >= ADVISORY_PATTERN_CONFIDENCE
    }

    #[must_use]
    pub fn is_actionable(&self, min_pattern_confidence: f64) -> bool {
        self.confidence >= min_pattern_confidence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn support_moves_confidence_toward_one_monotonically() {
        let mut p = Pattern::new(PatternKind::GasWindow, "test", Utc::now());
        let mut prev = p.confidence;
        for _ in 0..10 {
            p.support(Utc::now());
            assert!(p.confidence > prev);
            assert!(p.confidence < 1.0);
            prev = p.confidence;
        }
    }

    #[test]
    fn falsify_decays_confidence() {
        let mut p = Pattern::new(PatternKind::AprDegradation, "test", Utc::now());
        p.support(Utc::now());
        let before = p.confidence;
        p.falsify(Utc::now());
        assert!(p.confidence < before);
    }

    #[test]
    fn new_pattern_starts_below_advisory_threshold() {
        let p = Pattern::new(PatternKind::Other, "test", Utc::now());
        assert!(!p.is_advisory());
    }
}
