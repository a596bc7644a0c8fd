//! `CycleEngine` — the `SENSE -> THINK -> FEEL -> DECIDE -> LEARN -> PERSIST`
//! state machine (§4.2).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::config::Config;
use crate::core::{
    ConsciousnessState, Decision, DecisionKind, Emotion, MemoryCategory, MemoryMetadata,
    PatternKind, PoolId, PoolObservation,
};
use crate::cost::{CostGovernor, TierHint};
use crate::decider::{self, Candidate, DeciderInputs};
use crate::gateway::{ChainGateway, Clock, DocStore, Observer, ObserverLevel, PoolFilter};
use crate::memory::{self, MemoryManager};
use crate::pattern::{self, PoolDelta};
use crate::profile::PoolProfileStore;

/// In-process counters: cycle counts, error/warning counts, average cycle
/// duration, and total spend, queryable by the binary or a future exporter
/// without this crate depending on any metrics crate itself.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineMetrics {
    pub cycles_run: u64,
    pub cycles_with_errors: u64,
    pub total_warnings: u64,
    pub total_cost_usd: f64,
    pub avg_cycle_duration_ms: f64,
}

fn current_snapshot_collection(agent_id: &str) -> String {
    format!("agent_state/{agent_id}")
}

fn cycle_snapshot_collection(agent_id: &str) -> String {
    format!("cycles/{agent_id}")
}

/// A cycle snapshot, persisted verbatim at `PERSIST` (§4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct CycleSnapshot {
    cycle_count: u64,
    emotion: Emotion,
    treasury_usd: f64,
    last_decision: Option<Decision>,
    cycle_cost_usd: f64,
    working_memory_ids: Vec<String>,
}

impl From<&ConsciousnessState> for CycleSnapshot {
    fn from(state: &ConsciousnessState) -> Self {
        Self {
            cycle_count: state.cycle_count.value(),
            emotion: state.emotion,
            treasury_usd: state.treasury_usd,
            last_decision: state.last_decision.clone(),
            cycle_cost_usd: state.cycle_cost_usd,
            working_memory_ids: state.working_memories.iter().map(|m| m.id.to_string()).collect(),
        }
    }
}

pub struct CycleEngine {
    chain: Arc<dyn ChainGateway>,
    memory: MemoryManager,
    profiles: PoolProfileStore,
    cost: CostGovernor,
    doc_store: Arc<dyn DocStore>,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn Observer>,
    config: Config,
    metrics: Mutex<EngineMetrics>,
    /// Last observation seen per pool, carried across cycles so `learn` can
    /// compute a real [`PoolDelta`] instead of a zero one (§4.3, §4.7).
    previous_observations: Mutex<HashMap<PoolId, PoolObservation>>,
}

impl CycleEngine {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chain: Arc<dyn ChainGateway>,
        memory: MemoryManager,
        profiles: PoolProfileStore,
        cost: CostGovernor,
        doc_store: Arc<dyn DocStore>,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn Observer>,
        config: Config,
    ) -> Self {
        Self {
            chain,
            memory,
            profiles,
            cost,
            doc_store,
            clock,
            observer,
            config,
            metrics: Mutex::new(EngineMetrics::default()),
            previous_observations: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn get_metrics(&self) -> EngineMetrics {
        *self.metrics.lock().unwrap()
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock().unwrap() = EngineMetrics::default();
    }

    /// Whether the cost governor's emergency-stop tombstone is set. The
    /// scheduler checks this before dispatching each cycle (§4.5/§4.8).
    pub async fn is_emergency(&self) -> Result<bool, crate::core::CoreError> {
        let now = self.clock.now();
        Ok(self.cost.is_emergency(now).await?)
    }

    /// Runs exactly one cycle against `state`, mutating it in place.
    /// Returns `Err` only for the two fatal conditions named in §4.2/§7:
    /// cost-cap breach or (via the caller's own cancellation check)
    /// context cancellation. Every other stage failure is recorded into
    /// `state.errors`/`state.warnings` and the cycle still completes and
    /// persists.
    pub async fn run_cycle(&self, state: &mut ConsciousnessState) -> Result<(), crate::core::CoreError> {
        let cycle_start = self.clock.now();
        state.begin_cycle(cycle_start);
        tracing::debug!(cycle = state.cycle_count.value(), "cycle started");

        self.sense(state).await;
        let think_result = self.think(state).await;
        self.feel(state);
        self.decide(state).await;
        self.learn(state).await;
        let persisted = self.persist(state).await;

        let mut metrics = self.metrics.lock().unwrap();
        metrics.cycles_run += 1;
        if !state.errors.is_empty() {
            metrics.cycles_with_errors += 1;
        }
        metrics.total_warnings += state.warnings.len() as u64;
        metrics.total_cost_usd = state.total_cost_usd;
        let duration_ms = (self.clock.now() - cycle_start).num_milliseconds() as f64;
        metrics.avg_cycle_duration_ms = if metrics.cycles_run == 1 {
            duration_ms
        } else {
            metrics.avg_cycle_duration_ms + (duration_ms - metrics.avg_cycle_duration_ms) / metrics.cycles_run as f64
        };
        drop(metrics);

        if !state.errors.is_empty() {
            let mut fields = std::collections::HashMap::new();
            fields.insert("cycle".to_string(), state.cycle_count.to_string());
            fields.insert("errors".to_string(), state.errors.join("; "));
            self.observer.event(ObserverLevel::Warn, "cycle_errors", &fields);
        }

        if let Err(crate::cost::CostError::CapExceeded) = think_result {
            return Err(crate::core::CoreError::CostCapExceeded);
        }
        persisted
    }

    async fn sense(&self, state: &mut ConsciousnessState) {
        let timeout = self.config.external_read_timeout;

        let balance = tokio::time::timeout(timeout, self.chain.get_wallet_balance_usd()).await;
        match balance {
            Ok(Ok(balance)) => state.treasury_usd = balance,
            Ok(Err(e)) => state.record_warning(format!("wallet balance read failed: {e}")),
            Err(_) => state.record_warning("wallet balance read timed out"),
        }

        let pools = tokio::time::timeout(timeout, self.chain.list_pools(&PoolFilter::default())).await;
        let pools = match pools {
            Ok(Ok(pools)) => pools,
            Ok(Err(e)) => {
                state.record_warning(format!("pool listing failed: {e}"));
                Vec::new()
            }
            Err(_) => {
                state.record_warning("pool listing timed out");
                Vec::new()
            }
        };

        for pool in pools {
            state.observations.push(PoolObservation {
                pool_id: PoolId::new(pool.pool_id),
                pair_label: pool.pair_label,
                tvl_usd: pool.tvl_usd,
                volume_24h_usd: pool.volume_24h_usd,
                fee_apr: pool.fee_apr,
                reward_apr: pool.reward_apr,
                observed_at: state.now,
                emotion_at_observation: state.emotion,
            });
        }
    }

    async fn think(&self, state: &mut ConsciousnessState) -> Result<(), crate::cost::CostError> {
        let prompt = format!(
            "agent={} cycle={} treasury={:.2} pools_observed={}",
            state.agent_id,
            state.cycle_count,
            state.treasury_usd,
            state.observations.len()
        );
        let result = self
            .cost
            .call(
                state.emotion,
                TierHint::Analysis,
                &prompt,
                256,
                0.20,
                state.treasury_usd,
                state.now,
            )
            .await;

        match result {
            Ok((completion, entry)) => {
                state.cycle_cost_usd += entry.usd;
                tracing::debug!(cycle = state.cycle_count.value(), usd = entry.usd, "think: llm analysis complete");
                let _ = completion;
                Ok(())
            }
            Err(crate::cost::CostError::CapExceeded) => {
                state.record_error("cost cap exceeded, falling back to rule-only analysis");
                tracing::warn!(cycle = state.cycle_count.value(), "think: cost cap exceeded");
                Err(crate::cost::CostError::CapExceeded)
            }
            Err(e) => {
                state.record_warning(format!("llm call failed: {e}"));
                Ok(())
            }
        }
    }

    /// Pure function of treasury/burn/thresholds (§4.2, §8 invariant 6).
    fn feel(&self, state: &mut ConsciousnessState) {
        let (emotion, intensity) = compute_emotion(
            state.treasury_usd,
            state.daily_burn_usd,
            &self.config,
        );
        state.emotion = emotion;
        state.emotion_intensity = intensity;
    }

    async fn decide(&self, state: &mut ConsciousnessState) {
        let emergency_mode = self
            .cost
            .is_emergency(state.now)
            .await
            .unwrap_or_else(|e| {
                state.record_warning(format!("emergency-flag read failed: {e}"));
                false
            });

        let mut candidates = Vec::new();
        for obs in &state.observations {
            let (predicted_apr, confidence) = self
                .profiles
                .predict(&obs.pool_id, chrono::Duration::hours(24), state.now)
                .await
                .unwrap_or((obs.total_apr(), 0.0));
            let gas_price_gwei = self.chain.get_gas_price_gwei().await.unwrap_or(30.0);
            let gas_cost_usd = self
                .chain
                .estimate_gas_usd("rebalance")
                .await
                .unwrap_or(gas_price_gwei * 0.005);
            let expected_24h_net_usd = obs.tvl_usd.min(1000.0) * predicted_apr / 365.0 - gas_cost_usd;
            candidates.push(Candidate {
                pool_id: obs.pool_id.clone(),
                tvl_usd: obs.tvl_usd,
                predicted_apr,
                prediction_confidence: confidence.max(obs_confidence(obs)),
                il_estimate: 0.02,
                gas_cost_usd,
                expected_24h_net_usd,
            });
        }

        let positions = self.chain.list_positions().await.unwrap_or_default();
        let current_pool = positions.first().map(|p| PoolId::new(p.pool_id.clone()));

        let inputs = DeciderInputs {
            current_position_pool_id: current_pool.as_ref(),
            emotion: state.emotion,
            treasury_usd: state.treasury_usd,
            observation_mode: self.config.observation_mode,
            emergency_mode,
            patterns: &state.patterns_active,
            min_pattern_confidence: self.config.min_pattern_confidence,
            now: state.now,
        };

        let decision = decider::decide(&candidates, &inputs);
        tracing::info!(cycle = state.cycle_count.value(), kind = ?decision.kind, "decide: {}", decision.rationale);
        state.last_decision = Some(decision);
    }

    async fn learn(&self, state: &mut ConsciousnessState) {
        let observations: Vec<PoolObservation> = state
            .observations
            .iter()
            .cloned()
            .take(self.config.max_memories_per_cycle)
            .collect();

        let mut previous = self.previous_observations.lock().unwrap().clone();

        for obs in &observations {
            let (predicted_apr, _confidence) = self
                .profiles
                .predict(&obs.pool_id, chrono::Duration::hours(1), state.now)
                .await
                .unwrap_or((obs.total_apr(), 0.0));

            let delta = previous
                .get(&obs.pool_id)
                .map(|prev| PoolDelta::from_observations(prev, obs, predicted_apr));
            let imbalance = delta.is_some_and(|d| d.apr_delta_1h.abs() >= 0.25);

            let gate_triggered = obs.total_apr() * 100.0 >= self.config.min_apr_for_memory
                || obs.volume_24h_usd >= self.config.min_volume_for_memory
                || imbalance;

            if gate_triggered {
                let mut metadata = MemoryMetadata::new();
                metadata.insert("pool_id", obs.pool_id.as_str());
                metadata.insert("tvl_usd", obs.tvl_usd.to_string());
                let content = format!(
                    "pool {} apr={:.2}% volume=${:.0} tvl=${:.0}",
                    obs.pool_id, obs.total_apr() * 100.0, obs.volume_24h_usd, obs.tvl_usd
                );
                let importance = obs.total_apr().clamp(0.0, 1.0).max(0.3);
                let embedding = memory::text_embedding(&content);
                match self
                    .memory
                    .remember(content, MemoryCategory::PoolBehavior, metadata, importance, 0.7, &embedding)
                    .await
                {
                    Ok(id) => {
                        if let Some(m) = state
                            .working_memories
                            .iter()
                            .find(|m| m.id == id)
                            .cloned()
                            .or_else(|| {
                                Some(crate::core::MemoryRef {
                                    id,
                                    category: MemoryCategory::PoolBehavior,
                                    importance,
                                    last_accessed_at: state.now,
                                })
                            })
                        {
                            state.push_working_memory(m);
                        }
                    }
                    Err(e) => state.record_warning(format!("remember failed: {e}")),
                }
            }

            let obs_importance = observation_importance(obs);
            if obs_importance >= self.config.memory_formation_threshold {
                let mut metadata = MemoryMetadata::new();
                metadata.insert("pool_id", obs.pool_id.as_str());
                let content = format!(
                    "observed pool {} apr={:.2}% volume=${:.0} tvl=${:.0}",
                    obs.pool_id, obs.total_apr() * 100.0, obs.volume_24h_usd, obs.tvl_usd
                );
                let embedding = memory::text_embedding(&content);
                if let Err(e) = self
                    .memory
                    .remember(content, MemoryCategory::Observation, metadata, obs_importance, obs_confidence(obs), &embedding)
                    .await
                {
                    state.record_warning(format!("observation memory failed: {e}"));
                }
            }

            if let Err(e) = self
                .profiles
                .update(&obs.pool_id, obs.total_apr(), obs.tvl_usd, obs.volume_24h_usd, state.now)
                .await
            {
                state.record_warning(format!("pool profile update failed: {e}"));
            }

            if let Some(delta) = delta {
                if pattern::precondition_matches(PatternKind::AprDegradation, &delta) {
                    pattern::extract_or_update(
                        &mut state.patterns_active,
                        PatternKind::AprDegradation,
                        format!("apr degrading on {}", obs.pool_id),
                        &delta,
                        state.now,
                    );
                }
                if pattern::precondition_matches(PatternKind::VolumeSpike, &delta) {
                    pattern::extract_or_update(
                        &mut state.patterns_active,
                        PatternKind::VolumeSpike,
                        format!("volume rising on {}", obs.pool_id),
                        &delta,
                        state.now,
                    );
                }
            }

            previous.insert(obs.pool_id.clone(), obs.clone());
        }

        *self.previous_observations.lock().unwrap() = previous;

        if let Some(decision) = state.last_decision.clone() {
            if matches!(decision.kind, DecisionKind::Rebalance | DecisionKind::Compound | DecisionKind::ObserveMore) {
                let mut metadata = MemoryMetadata::new();
                if let Some(pool_id) = &decision.target_pool_id {
                    metadata.insert("pool_id", pool_id.as_str());
                }
                let content = format!(
                    "decision={:?} expected_roi={:.4} rationale={}",
                    decision.kind, decision.expected_roi, decision.rationale
                );
                let embedding = memory::text_embedding(&content);
                if let Err(e) = self
                    .memory
                    .remember(content, MemoryCategory::RebalanceOutcome, metadata, 0.6, 0.6, &embedding)
                    .await
                {
                    state.record_warning(format!("outcome memory failed: {e}"));
                }
            }
        }
    }

    async fn persist(&self, state: &mut ConsciousnessState) -> Result<(), crate::core::CoreError> {
        let snapshot = CycleSnapshot::from(&*state);
        let doc = serde_json::to_value(&snapshot).expect("CycleSnapshot always serializes");

        let mut last_err = None;
        for _ in 0..3 {
            match self
                .doc_store
                .put(
                    &cycle_snapshot_collection(&self.config.agent_id),
                    &state.cycle_count.to_string(),
                    doc.clone(),
                    None,
                )
                .await
            {
                Ok(()) => {
                    last_err = None;
                    break;
                }
                Err(e) => last_err = Some(e),
            }
        }
        if let Some(e) = last_err {
            state.record_error(format!("persist failed after retries: {e}"));
            tracing::error!(cycle = state.cycle_count.value(), error = %e, "persist: cycle dropped");
            return Ok(());
        }

        if let Err(e) = self
            .doc_store
            .put(&current_snapshot_collection(&self.config.agent_id), "current", doc, None)
            .await
        {
            state.record_warning(format!("current-snapshot write failed: {e}"));
        }

        state.total_cost_usd += state.cycle_cost_usd;
        Ok(())
    }
}

fn obs_confidence(obs: &PoolObservation) -> f64 {
    if obs.tvl_usd > 0.0 && obs.volume_24h_usd > 0.0 {
        0.6
    } else {
        0.3
    }
}

/// Importance for an unconditional per-pool `OBSERVATION` memory, gated by
/// `MEMORY_FORMATION_THRESHOLD` (§3, §6) rather than the hard significance
/// gate used for `POOL_BEHAVIOR` memories. A complete reading (both `tvl_usd`
/// and `volume_24h_usd` populated) clears the default 0.7 threshold; a
/// partial one does not.
fn observation_importance(obs: &PoolObservation) -> f64 {
    if obs.tvl_usd > 0.0 && obs.volume_24h_usd > 0.0 {
        0.75
    } else {
        0.4
    }
}

/// §4.2 FEEL: pure function of treasury, burn, and configured thresholds.
#[must_use]
pub fn compute_emotion(treasury_usd: f64, daily_burn_usd: f64, config: &Config) -> (Emotion, f64) {
    if treasury_usd < config.feel_desperate_treasury_floor_usd {
        return (Emotion::Desperate, 1.0);
    }

    let days = if daily_burn_usd <= 0.0 {
        f64::INFINITY
    } else {
        treasury_usd / daily_burn_usd
    };

    if days < config.feel_desperate_runway_days {
        (Emotion::Desperate, (1.0 - days / config.feel_desperate_runway_days).clamp(0.0, 1.0))
    } else if days < config.feel_cautious_runway_days {
        (Emotion::Cautious, (1.0 - days / config.feel_cautious_runway_days).clamp(0.0, 1.0))
    } else if days < config.feel_stable_runway_days {
        (Emotion::Stable, (1.0 - days / config.feel_stable_runway_days).clamp(0.0, 1.0))
    } else {
        (Emotion::Confident, 0.0)
    }
}
