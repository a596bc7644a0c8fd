//! Rebalance/Compound Decider (§4.6) — turns the current state, memories,
//! and pool profiles into exactly one `Decision`.
//!
//! The control-flow shape (evaluate all candidates, gate on a circuit
//! breaker before any action, downgrade to a safe decision under an
//! observation/dry-run flag) follows the same evaluate-then-gate loop a
//! CLMM position executor uses, adapted here to produce a single decision
//! per cycle rather than a batch of per-position actions.

use chrono::{DateTime, Utc};

use crate::core::{Decision, Emotion, Pattern, PatternKind, PoolId, PoolObservation};

/// Horizon over which a `GAS_WINDOW` pattern's cheaper-gas prediction is
/// considered relevant (§4.6 step 4).
pub const GAS_WINDOW_HORIZON: chrono::Duration = chrono::Duration::hours(6);

/// Minimum tolerable total value locked for a candidate pool, below which
/// it is filtered out regardless of yield (§4.6 step 1). Fixed as a
/// conservative floor.
pub const MIN_TVL_USD: f64 = 50_000.0;
/// Maximum tolerated predicted impermanent-loss proxy (§4.6 step 1,
/// GLOSSARY).
pub const MAX_IL_TOLERANCE: f64 = 0.15;

/// Critical treasury floor below which, combined with `DESPERATE`, any
/// action is forced to `HOLD` regardless of opportunity (§4.6 step 7).
pub const CRITICAL_TREASURY_FLOOR_USD: f64 = 25.0;

/// Scoring weights for §4.6 step 2: `w1 * predicted_apr + w2 * pattern_boost
/// - w3 * risk - w4 * gas_cost_share`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub w1_apr: f64,
    pub w2_pattern: f64,
    pub w3_risk: f64,
    pub w4_gas_share: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            w1_apr: 1.0,
            w2_pattern: 0.2,
            w3_risk: 0.5,
            w4_gas_share: 0.3,
        }
    }
}

/// A candidate pool as presented to the decider, pre-joined with its
/// profile prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub pool_id: PoolId,
    pub tvl_usd: f64,
    pub predicted_apr: f64,
    pub prediction_confidence: f64,
    pub il_estimate: f64,
    pub gas_cost_usd: f64,
    pub expected_24h_net_usd: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct ScoredCandidate {
    candidate: Candidate,
    score: f64,
}

fn pattern_boost(pool_id: &PoolId, patterns: &[Pattern]) -> f64 {
    patterns
        .iter()
        .filter(|p| p.is_advisory())
        .filter(|p| {
            p.payload.get("pool_id").map(String::as_str) == Some(pool_id.as_str())
                || p.description.contains(pool_id.as_str())
        })
        .map(|p| p.confidence)
        .fold(0.0, f64::max)
}

fn risk(candidate: &Candidate) -> f64 {
    (1.0 - candidate.prediction_confidence).max(candidate.il_estimate)
}

fn gas_cost_share(candidate: &Candidate) -> f64 {
    if candidate.expected_24h_net_usd.abs() < f64::EPSILON {
        1.0
    } else {
        (candidate.gas_cost_usd / candidate.expected_24h_net_usd.abs()).min(1.0)
    }
}

fn score(candidate: &Candidate, patterns: &[Pattern], weights: ScoreWeights) -> f64 {
    weights.w1_apr * candidate.predicted_apr + weights.w2_pattern * pattern_boost(&candidate.pool_id, patterns)
        - weights.w3_risk * risk(candidate)
        - weights.w4_gas_share * gas_cost_share(candidate)
}

/// Inputs the decider needs beyond the candidate list itself.
#[derive(Debug, Clone)]
pub struct DeciderInputs<'a> {
    pub current_position_pool_id: Option<&'a PoolId>,
    pub emotion: Emotion,
    pub treasury_usd: f64,
    pub observation_mode: bool,
    pub emergency_mode: bool,
    pub patterns: &'a [Pattern],
    pub min_pattern_confidence: f64,
    pub now: DateTime<Utc>,
}

/// Runs the full seven-step procedure from §4.6 and returns exactly one
/// `Decision`.
#[must_use]
pub fn decide(candidates: &[Candidate], inputs: &DeciderInputs<'_>) -> Decision {
    decide_with_weights(candidates, inputs, ScoreWeights::default())
}

#[must_use]
pub fn decide_with_weights(
    candidates: &[Candidate],
    inputs: &DeciderInputs<'_>,
    weights: ScoreWeights,
) -> Decision {
    // Step 7 (checked first, since it preempts everything else): emergency
    // override.
    if inputs.emergency_mode
        || (inputs.emotion == Emotion::Desperate && inputs.treasury_usd < CRITICAL_TREASURY_FLOOR_USD)
    {
        return Decision::hold("emergency override: emotion/treasury below critical floor", inputs.now);
    }

    // Step 1: filter.
    let min_confidence = inputs.emotion.min_prediction_confidence();
    let filtered: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| c.tvl_usd >= MIN_TVL_USD)
        .filter(|c| c.il_estimate <= MAX_IL_TOLERANCE)
        .filter(|c| c.prediction_confidence >= min_confidence)
        .collect();

    if filtered.is_empty() {
        return downgrade_if_observing(
            Decision::hold("no candidate cleared the confidence/TVL/IL filter", inputs.now),
            inputs.observation_mode,
        );
    }

    // Step 2: score, tie-broken by higher confidence then lower pool_id.
    let mut scored: Vec<ScoredCandidate> = filtered
        .into_iter()
        .map(|c| ScoredCandidate {
            candidate: c.clone(),
            score: score(c, inputs.patterns, weights),
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then_with(|| {
                b.candidate
                    .prediction_confidence
                    .partial_cmp(&a.candidate.prediction_confidence)
                    .unwrap()
            })
            .then_with(|| a.candidate.pool_id.cmp(&b.candidate.pool_id))
    });
    let top = &scored[0].candidate;

    // Step 4: gas window deferral, checked before the gate so a cheaper
    // window can preempt an otherwise-profitable action.
    if let Some(window_pattern) = inputs
        .patterns
        .iter()
        .filter(|p| p.kind == PatternKind::GasWindow)
        .filter(|p| p.confidence >= inputs.min_pattern_confidence)
        .filter(|p| inputs.now.signed_duration_since(p.last_observed_at) <= GAS_WINDOW_HORIZON)
        .max_by(|a, b| a.confidence.partial_cmp(&b.confidence).unwrap())
    {
        return downgrade_if_observing(
            Decision::observe_more(
                format!(
                    "cheaper gas window predicted: {}",
                    window_pattern.description
                ),
                inputs.now,
            ),
            inputs.observation_mode,
        );
    }

    // Step 3: gas gate.
    let required = inputs.emotion.required_multiplier() * top.gas_cost_usd;
    if top.expected_24h_net_usd < required {
        return downgrade_if_observing(
            Decision::hold("expected net gain does not clear the gas gate", inputs.now),
            inputs.observation_mode,
        );
    }

    // Step 5: compound vs rebalance vs hold.
    let mut decision = if inputs.current_position_pool_id == Some(&top.pool_id) {
        Decision {
            kind: crate::core::DecisionKind::Compound,
            target_pool_id: Some(top.pool_id.clone()),
            amount_usd: None,
            rationale: format!("compounding into current position {}", top.pool_id),
            confidence: top.candidate_confidence(),
            expected_roi: top.expected_24h_net_usd,
            gas_budget_usd: top.gas_cost_usd,
            created_at: inputs.now,
        }
    } else {
        Decision {
            kind: crate::core::DecisionKind::Rebalance,
            target_pool_id: Some(top.pool_id.clone()),
            amount_usd: None,
            rationale: format!("rebalancing into {}: would rebalance due to higher score", top.pool_id),
            confidence: top.candidate_confidence(),
            expected_roi: top.expected_24h_net_usd,
            gas_budget_usd: top.gas_cost_usd,
            created_at: inputs.now,
        }
    };

    // Step 6: observation-mode downgrade (rationale preserved).
    decision = downgrade_if_observing(decision, inputs.observation_mode);
    decision
}

impl Candidate {
    fn candidate_confidence(&self) -> f64 {
        self.prediction_confidence
    }
}

fn downgrade_if_observing(decision: Decision, observation_mode: bool) -> Decision {
    if !observation_mode {
        return decision;
    }
    if matches!(
        decision.kind,
        crate::core::DecisionKind::Rebalance | crate::core::DecisionKind::Compound
    ) {
        Decision {
            kind: crate::core::DecisionKind::ObserveMore,
            ..decision
        }
    } else {
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Pattern, PatternKind};

    fn candidate(pool_id: &str, apr: f64, confidence: f64, gas: f64, net: f64) -> Candidate {
        Candidate {
            pool_id: PoolId::new(pool_id),
            tvl_usd: 1_000_000.0,
            predicted_apr: apr,
            prediction_confidence: confidence,
            il_estimate: 0.01,
            gas_cost_usd: gas,
            expected_24h_net_usd: net,
        }
    }

    fn base_inputs(now: DateTime<Utc>) -> DeciderInputs<'static> {
        DeciderInputs {
            current_position_pool_id: None,
            emotion: Emotion::Stable,
            treasury_usd: 500.0,
            observation_mode: true,
            emergency_mode: false,
            patterns: &[],
            min_pattern_confidence: 0.7,
            now,
        }
    }

    #[test]
    fn s1_low_confidence_candidate_yields_hold() {
        let now = Utc::now();
        let candidates = vec![candidate("C", 0.18, 0.55, 0.1, 0.2)];
        let inputs = base_inputs(now);
        let decision = decide(&candidates, &inputs);
        assert_eq!(decision.kind, crate::core::DecisionKind::Hold);
    }

    #[test]
    fn s2_high_apr_candidate_downgrades_to_observe_more_in_observation_mode() {
        let now = Utc::now();
        let candidates = vec![candidate("D", 0.45, 0.82, 0.50, 0.80)];
        let inputs = base_inputs(now);
        let decision = decide(&candidates, &inputs);
        assert_eq!(decision.kind, crate::core::DecisionKind::ObserveMore);
        assert!(decision.rationale.contains("rebalance") || decision.rationale.contains("compound"));
    }

    #[test]
    fn s2_without_observation_mode_would_rebalance() {
        let now = Utc::now();
        let candidates = vec![candidate("D", 0.45, 0.82, 0.50, 0.80)];
        let mut inputs = base_inputs(now);
        inputs.observation_mode = false;
        let decision = decide(&candidates, &inputs);
        assert_eq!(decision.kind, crate::core::DecisionKind::Rebalance);
    }

    #[test]
    fn s3_desperate_below_critical_floor_forces_hold() {
        let now = Utc::now();
        let candidates = vec![candidate("D", 0.80, 0.95, 0.10, 5.0)];
        let mut inputs = base_inputs(now);
        inputs.emotion = Emotion::Desperate;
        inputs.treasury_usd = 15.0;
        let decision = decide(&candidates, &inputs);
        assert_eq!(decision.kind, crate::core::DecisionKind::Hold);
    }

    #[test]
    fn s5_gas_window_pattern_defers_to_observe_more() {
        let now = Utc::now();
        let candidates = vec![candidate("E", 0.30, 0.85, 1.20, 0.60)];
        let mut pattern = Pattern::new(PatternKind::GasWindow, "gas drops to $0.25 in 4h", now);
        pattern.confidence = 0.8;
        let patterns = vec![pattern];
        let mut inputs = base_inputs(now);
        inputs.patterns = &patterns;
        let decision = decide(&candidates, &inputs);
        assert_eq!(decision.kind, crate::core::DecisionKind::ObserveMore);
        assert!(decision.rationale.contains("window"));
    }

    #[test]
    fn empty_candidates_never_panics_and_holds_or_observes() {
        let now = Utc::now();
        let inputs = base_inputs(now);
        let decision = decide(&[], &inputs);
        assert!(matches!(
            decision.kind,
            crate::core::DecisionKind::Hold | crate::core::DecisionKind::ObserveMore
        ));
    }

    #[test]
    fn compound_chosen_when_top_candidate_is_current_position() {
        let now = Utc::now();
        let candidates = vec![candidate("F", 0.40, 0.9, 0.2, 1.0)];
        let pool = PoolId::new("F");
        let mut inputs = base_inputs(now);
        inputs.observation_mode = false;
        inputs.current_position_pool_id = Some(&pool);
        let decision = decide(&candidates, &inputs);
        assert_eq!(decision.kind, crate::core::DecisionKind::Compound);
    }
}
