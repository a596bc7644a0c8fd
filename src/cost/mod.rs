//! `CostGovernor` + LLM router (§4.5) — a hard daily USD cap, tiered model
//! selection, and the emergency-stop kill switch.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::{CostLedgerEntry, CostService, Emotion};
use crate::gateway::{
    Analytics, Completion, DocStore, GatewayError, KV, LLMProvider, ModelTier, Observer,
    ObserverLevel,
};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CostError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("daily cost cap exceeded")]
    CapExceeded,
    #[error("cost ledger CAS conflict after {0} retries")]
    UpdateConflict(u32),
}

pub type Result<T> = std::result::Result<T, CostError>;

/// A hint about why a call is being made, used in tier selection step 3/4
/// of §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierHint {
    Routine,
    Analysis,
    CriticalDecision,
}

/// Treasury level above which a `CriticalDecision` hint may use the
/// `Powerful` tier (§4.5 step 4). Fixed as a constant derived from the
/// default starting treasury.
pub const COMFORTABLE_TREASURY_USD: f64 = 200.0;

fn tombstone_collection(agent_id: &str) -> String {
    format!("agent_state/{agent_id}")
}

fn daily_spend_key(agent_id: &str, day: DateTime<Utc>) -> String {
    format!("costs/{agent_id}/{}", day.format("%Y%m%d"))
}

fn ledger_table(agent_id: &str) -> String {
    format!("cost_ledger/{agent_id}")
}

pub struct CostGovernor {
    agent_id: String,
    hard_cap_usd: f64,
    alert_thresholds_usd: Vec<f64>,
    cas_max_retries: u32,
    kv: Arc<dyn KV>,
    doc_store: Arc<dyn DocStore>,
    llm: Arc<dyn LLMProvider>,
    observer: Arc<dyn Observer>,
    analytics: Arc<dyn Analytics>,
}

impl CostGovernor {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agent_id: impl Into<String>,
        hard_cap_usd: f64,
        alert_thresholds_usd: Vec<f64>,
        cas_max_retries: u32,
        kv: Arc<dyn KV>,
        doc_store: Arc<dyn DocStore>,
        llm: Arc<dyn LLMProvider>,
        observer: Arc<dyn Observer>,
        analytics: Arc<dyn Analytics>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            hard_cap_usd,
            alert_thresholds_usd,
            cas_max_retries,
            kv,
            doc_store,
            llm,
            observer,
            analytics,
        }
    }

    async fn daily_spend(&self, now: DateTime<Utc>) -> Result<f64> {
        let cents = self.kv.get_int(&daily_spend_key(&self.agent_id, now)).await?;
        Ok(cents.unwrap_or(0) as f64 / 100.0)
    }

    pub async fn is_emergency(&self, now: DateTime<Utc>) -> Result<bool> {
        let doc = self
            .doc_store
            .get(&tombstone_collection(&self.agent_id), "emergency")
            .await?;
        let _ = now;
        Ok(doc.is_some())
    }

    async fn raise_emergency(&self, reason: &str, now: DateTime<Utc>) -> Result<()> {
        self.doc_store
            .put(
                &tombstone_collection(&self.agent_id),
                "emergency",
                serde_json::json!({"reason": reason, "at": now.to_rfc3339()}),
                None,
            )
            .await?;
        let mut fields = std::collections::HashMap::new();
        fields.insert("reason".to_string(), reason.to_string());
        self.observer.event(ObserverLevel::Alert, "emergency_stop", &fields);
        Ok(())
    }

    /// Tier selection, in the order given in §4.5.
    #[must_use]
    pub fn select_tier(
        &self,
        emotion: Emotion,
        tier_hint: TierHint,
        daily_spend_usd: f64,
        emergency_mode: bool,
        treasury_usd: f64,
    ) -> ModelTier {
        if emergency_mode
            || emotion == Emotion::Desperate
            || daily_spend_usd >= (2.0 / 3.0) * self.hard_cap_usd
        {
            return ModelTier::Critical;
        }
        if matches!(emotion, Emotion::Cautious | Emotion::Confident) && tier_hint == TierHint::Routine {
            return ModelTier::Efficient;
        }
        if tier_hint == TierHint::Analysis {
            return ModelTier::Balanced;
        }
        if tier_hint == TierHint::CriticalDecision && treasury_usd > COMFORTABLE_TREASURY_USD {
            return ModelTier::Powerful;
        }
        ModelTier::Efficient
    }

    /// Denies the call up front if `daily_spend + budget_hint` would
    /// exceed the hard cap, triggering emergency stop. Otherwise places
    /// the call, records a `CostLedgerEntry`, and raises alerts on
    /// threshold crossings.
    pub async fn call(
        &self,
        emotion: Emotion,
        tier_hint: TierHint,
        prompt: &str,
        max_tokens: u32,
        budget_hint_usd: f64,
        treasury_usd: f64,
        now: DateTime<Utc>,
    ) -> Result<(Completion, CostLedgerEntry)> {
        let emergency_mode = self.is_emergency(now).await?;
        let before = self.daily_spend(now).await?;
        if before + budget_hint_usd > self.hard_cap_usd {
            self.raise_emergency("daily cost cap exceeded", now).await?;
            return Err(CostError::CapExceeded);
        }

        let tier = self.select_tier(emotion, tier_hint, before, emergency_mode, treasury_usd);
        let completion = self.llm.complete(tier, prompt, max_tokens).await?;
        let after = self.record_spend(&completion, now).await?;

        for threshold in &self.alert_thresholds_usd {
            if before < *threshold && after >= *threshold {
                let mut fields = std::collections::HashMap::new();
                fields.insert("threshold_usd".to_string(), threshold.to_string());
                fields.insert("daily_spend_usd".to_string(), after.to_string());
                self.observer
                    .event(ObserverLevel::Warn, "cost_threshold_crossed", &fields);
            }
        }

        let entry = CostLedgerEntry {
            ts: now,
            service: CostService::Llm,
            operation: "complete".to_string(),
            usd: completion.usd,
            tokens_in: completion.tokens_in,
            tokens_out: completion.tokens_out,
            model_tier: Some(tier),
        };

        let record = serde_json::to_value(&entry).expect("CostLedgerEntry always serializes");
        if let Err(e) = self.analytics.append(&ledger_table(&self.agent_id), record).await {
            let mut fields = std::collections::HashMap::new();
            fields.insert("error".to_string(), e.to_string());
            self.observer
                .event(ObserverLevel::Warn, "cost_ledger_append_failed", &fields);
        }

        Ok((completion, entry))
    }

    /// Bounded-retry compare-and-set against the daily spend counter,
    /// stored in cents to keep the KV's integer contract exact.
    async fn record_spend(&self, completion: &Completion, now: DateTime<Utc>) -> Result<f64> {
        let key = daily_spend_key(&self.agent_id, now);
        let delta_cents = (completion.usd * 100.0).round() as i64;
        for _ in 0..self.cas_max_retries {
            let current = self.kv.get_int(&key).await?;
            let new = current.unwrap_or(0) + delta_cents;
            if self.kv.compare_and_set_int(&key, current, new).await? {
                return Ok(new as f64 / 100.0);
            }
        }
        Err(CostError::UpdateConflict(self.cas_max_retries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fakes::{FakeAnalytics, FakeDocStore, FakeKv, FakeLLMProvider, FakeObserver};

    fn governor(hard_cap: f64) -> CostGovernor {
        CostGovernor::new(
            "agent-1",
            hard_cap,
            vec![5.0, 10.0, 20.0, 25.0],
            5,
            Arc::new(FakeKv::new()),
            Arc::new(FakeDocStore::new()),
            Arc::new(FakeLLMProvider::new()),
            Arc::new(FakeObserver::new()),
            Arc::new(FakeAnalytics::new()),
        )
    }

    #[test]
    fn tier_selection_prefers_critical_under_emergency() {
        let g = governor(30.0);
        let tier = g.select_tier(Emotion::Stable, TierHint::Analysis, 0.0, true, 500.0);
        assert_eq!(tier, ModelTier::Critical);
    }

    #[test]
    fn tier_selection_prefers_critical_when_desperate() {
        let g = governor(30.0);
        let tier = g.select_tier(Emotion::Desperate, TierHint::Routine, 0.0, false, 500.0);
        assert_eq!(tier, ModelTier::Critical);
    }

    #[test]
    fn tier_selection_escalates_near_cap() {
        let g = governor(30.0);
        let tier = g.select_tier(Emotion::Stable, TierHint::Analysis, 21.0, false, 500.0);
        assert_eq!(tier, ModelTier::Critical);
    }

    #[tokio::test]
    async fn call_denies_and_raises_emergency_when_over_cap() {
        let kv = Arc::new(FakeKv::new());
        // seed prior spend of $0.95 as in scenario S4
        kv.compare_and_set_int(&daily_spend_key("agent-1", Utc::now()), None, 95)
            .await
            .unwrap();
        let g = CostGovernor::new(
            "agent-1",
            1.0,
            vec![5.0, 10.0, 20.0, 25.0],
            5,
            kv,
            Arc::new(FakeDocStore::new()),
            Arc::new(FakeLLMProvider::new()),
            Arc::new(FakeObserver::new()),
            Arc::new(FakeAnalytics::new()),
        );
        let result = g
            .call(Emotion::Stable, TierHint::Analysis, "prompt", 100, 0.20, 500.0, Utc::now())
            .await;
        assert!(matches!(result, Err(CostError::CapExceeded)));
        assert!(g.is_emergency(Utc::now()).await.unwrap());
    }

    #[tokio::test]
    async fn successful_call_increases_daily_spend_monotonically() {
        let g = governor(30.0);
        let now = Utc::now();
        let before = g.daily_spend(now).await.unwrap();
        let (_, entry) = g
            .call(Emotion::Stable, TierHint::Analysis, "prompt", 50, 1.0, 500.0, now)
            .await
            .unwrap();
        let after = g.daily_spend(now).await.unwrap();
        assert!(after >= before);
        assert!(entry.usd > 0.0);
    }

    #[tokio::test]
    async fn successful_call_appends_a_cost_ledger_entry() {
        let analytics = Arc::new(FakeAnalytics::new());
        let g = CostGovernor::new(
            "agent-1",
            30.0,
            vec![5.0, 10.0, 20.0, 25.0],
            5,
            Arc::new(FakeKv::new()),
            Arc::new(FakeDocStore::new()),
            Arc::new(FakeLLMProvider::new()),
            Arc::new(FakeObserver::new()),
            analytics.clone(),
        );
        g.call(Emotion::Stable, TierHint::Analysis, "prompt", 50, 1.0, 500.0, Utc::now())
            .await
            .unwrap();
        let records = analytics.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].0, ledger_table("agent-1"));
    }
}
