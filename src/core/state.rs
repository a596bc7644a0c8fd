//! `ConsciousnessState` and the records that flow through it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::emotion::Emotion;
use super::ids::{AgentId, CycleCount, PoolId};
use super::memory_types::MemoryRef;
use super::pattern_types::Pattern;

/// A single pool's data as gathered during `SENSE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolObservation {
    pub pool_id: PoolId,
    pub pair_label: String,
    pub tvl_usd: f64,
    pub volume_24h_usd: f64,
    pub fee_apr: f64,
    pub reward_apr: f64,
    pub observed_at: DateTime<Utc>,
    pub emotion_at_observation: Emotion,
}

impl PoolObservation {
    #[must_use]
    pub fn total_apr(&self) -> f64 {
        self.fee_apr + self.reward_apr
    }

    /// 0 when `tvl_usd` is 0, per §3.
    #[must_use]
    pub fn volume_to_tvl(&self) -> f64 {
        if self.tvl_usd <= 0.0 {
            0.0
        } else {
            self.volume_24h_usd / self.tvl_usd
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionKind {
    Hold,
    ObserveMore,
    Rebalance,
    Compound,
    EmergencyStop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub kind: DecisionKind,
    pub target_pool_id: Option<PoolId>,
    pub amount_usd: Option<f64>,
    pub rationale: String,
    pub confidence: f64,
    pub expected_roi: f64,
    pub gas_budget_usd: f64,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    #[must_use]
    pub fn hold(rationale: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            kind: DecisionKind::Hold,
            target_pool_id: None,
            amount_usd: None,
            rationale: rationale.into(),
            confidence: 0.0,
            expected_roi: 0.0,
            gas_budget_usd: 0.0,
            created_at: now,
        }
    }

    #[must_use]
    pub fn observe_more(rationale: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            kind: DecisionKind::ObserveMore,
            target_pool_id: None,
            amount_usd: None,
            rationale: rationale.into(),
            confidence: 0.0,
            expected_roi: 0.0,
            gas_budget_usd: 0.0,
            created_at: now,
        }
    }

    /// §3 invariant: action decisions must clear the ROI bar.
    #[must_use]
    pub fn satisfies_roi_invariant(&self, emotion: Emotion) -> bool {
        if matches!(self.kind, DecisionKind::Rebalance | DecisionKind::Compound) {
            self.expected_roi >= self.gas_budget_usd * emotion.required_multiplier()
        } else {
            true
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CostService {
    Llm,
    Rpc,
    Vector,
    Doc,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostLedgerEntry {
    pub ts: DateTime<Utc>,
    pub service: CostService,
    pub operation: String,
    pub usd: f64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub model_tier: Option<crate::gateway::ModelTier>,
}

/// The single working object mutated by each cycle stage. Owned
/// exclusively by the cycle that is currently running; snapshot-persisted
/// at `PERSIST` and discarded thereafter — the next cycle builds a fresh
/// one seeded from the persisted snapshot plus live treasury/positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsciousnessState {
    pub agent_id: AgentId,
    pub cycle_count: CycleCount,
    pub started_at: DateTime<Utc>,
    pub now: DateTime<Utc>,

    pub treasury_usd: f64,
    pub daily_burn_usd: f64,

    pub emotion: Emotion,
    pub emotion_intensity: f64,

    pub observations: Vec<PoolObservation>,
    pub working_memories: Vec<MemoryRef>,
    pub patterns_active: Vec<Pattern>,
    pub last_decision: Option<Decision>,

    pub cycle_cost_usd: f64,
    pub total_cost_usd: f64,

    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Default cap on `working_memories` (§3).
pub const WORKING_MEMORY_CAP: usize = 10;

impl ConsciousnessState {
    #[must_use]
    pub fn new(agent_id: AgentId, treasury_usd: f64, now: DateTime<Utc>) -> Self {
        Self {
            agent_id,
            cycle_count: CycleCount::zero(),
            started_at: now,
            now,
            treasury_usd,
            daily_burn_usd: 0.0,
            emotion: Emotion::Stable,
            emotion_intensity: 0.0,
            observations: Vec::new(),
            working_memories: Vec::new(),
            patterns_active: Vec::new(),
            last_decision: None,
            cycle_cost_usd: 0.0,
            total_cost_usd: 0.0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Resets the per-cycle scratch fields at the start of a new cycle,
    /// keeping everything that carries over (treasury, totals, emotion
    /// until `FEEL` recomputes it).
    pub fn begin_cycle(&mut self, now: DateTime<Utc>) {
        self.cycle_count = self.cycle_count.next();
        self.now = now;
        self.observations.clear();
        self.last_decision = None;
        self.cycle_cost_usd = 0.0;
        self.errors.clear();
        self.warnings.clear();
    }

    /// `∞` when burn is 0 (§3).
    #[must_use]
    pub fn days_until_bankruptcy(&self) -> f64 {
        if self.daily_burn_usd <= 0.0 {
            f64::INFINITY
        } else {
            self.treasury_usd / self.daily_burn_usd
        }
    }

    /// Inserts a [`MemoryRef`] at the front, evicting the LRU tail (by
    /// `last_accessed_at`) past [`WORKING_MEMORY_CAP`].
    pub fn push_working_memory(&mut self, m: MemoryRef) {
        self.working_memories.retain(|existing| existing.id != m.id);
        self.working_memories.insert(0, m);
        if self.working_memories.len() > WORKING_MEMORY_CAP {
            if let Some((lru_idx, _)) = self
                .working_memories
                .iter()
                .enumerate()
                .min_by_key(|(_, m)| m.last_accessed_at)
            {
                self.working_memories.remove(lru_idx);
            }
        }
    }

    pub fn record_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn record_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ConsciousnessState {
        ConsciousnessState::new(AgentId::new(), 500.0, Utc::now())
    }

    #[test]
    fn days_until_bankruptcy_is_infinite_with_zero_burn() {
        let s = state();
        assert!(s.days_until_bankruptcy().is_infinite());
    }

    #[test]
    fn begin_cycle_strictly_increments_cycle_count() {
        let mut s = state();
        assert_eq!(s.cycle_count.value(), 0);
        s.begin_cycle(Utc::now());
        assert_eq!(s.cycle_count.value(), 1);
        s.begin_cycle(Utc::now());
        assert_eq!(s.cycle_count.value(), 2);
    }

    #[test]
    fn working_memory_cap_evicts_lru() {
        let mut s = state();
        let now = Utc::now();
        for i in 0..(WORKING_MEMORY_CAP + 3) {
            s.push_working_memory(MemoryRef {
                id: super::super::ids::MemoryId::new(),
                category: super::super::memory_types::MemoryCategory::Observation,
                importance: 0.5,
                last_accessed_at: now + chrono::Duration::seconds(i as i64),
            });
        }
        assert_eq!(s.working_memories.len(), WORKING_MEMORY_CAP);
    }

    #[test]
    fn pool_observation_volume_to_tvl_is_zero_when_tvl_zero() {
        let obs = PoolObservation {
            pool_id: PoolId::new("p"),
            pair_label: "A/B".into(),
            tvl_usd: 0.0,
            volume_24h_usd: 1000.0,
            fee_apr: 0.1,
            reward_apr: 0.0,
            observed_at: Utc::now(),
            emotion_at_observation: Emotion::Stable,
        };
        assert_eq!(obs.volume_to_tvl(), 0.0);
    }

    #[test]
    fn decision_roi_invariant_holds_for_hold_unconditionally() {
        let d = Decision::hold("no opportunity", Utc::now());
        assert!(d.satisfies_roi_invariant(Emotion::Desperate));
    }

    #[test]
    fn decision_roi_invariant_checked_for_action_kinds() {
        let mut d = Decision::hold("x", Utc::now());
        d.kind = DecisionKind::Rebalance;
        d.gas_budget_usd = 1.0;
        d.expected_roi = 1.0;
        assert!(!d.satisfies_roi_invariant(Emotion::Desperate));
        d.expected_roi = 3.0;
        assert!(d.satisfies_roi_invariant(Emotion::Desperate));
    }
}
