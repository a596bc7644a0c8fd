//! `Scheduler` — drives [`crate::cycle::CycleEngine`] at an emotion-modulated
//! cadence, with exponential backoff on fatal cycle errors and cooperative
//! cancellation (§4.1, ambient §5 resource model).

use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::core::{CoreError, ConsciousnessState};
use crate::gateway::Clock;

use super::engine::CycleEngine;

/// Backoff applied after a fatal cycle error, doubling up to this ceiling
/// before the scheduler retries at the normal emotion-modulated interval
/// again.
const MAX_BACKOFF_MULTIPLIER: u32 = 8;

pub struct Scheduler {
    engine: Arc<CycleEngine>,
    clock: Arc<dyn Clock>,
    config: Config,
    cancel: tokio::sync::watch::Receiver<bool>,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        engine: Arc<CycleEngine>,
        clock: Arc<dyn Clock>,
        config: Config,
        cancel: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self {
            engine,
            clock,
            config,
            cancel,
        }
    }

    fn interval_for(&self, state: &ConsciousnessState) -> std::time::Duration {
        self.config
            .cycle_interval_override_sec
            .map(std::time::Duration::from_secs)
            .unwrap_or_else(|| state.emotion.default_interval())
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Runs cycles until cancelled or `max_cycles` is reached (`None` runs
    /// forever). Returns the number of cycles completed.
    pub async fn run(&mut self, state: &mut ConsciousnessState, max_cycles: Option<u64>) -> u64 {
        let mut completed = 0u64;
        let mut backoff_multiplier = 1u32;

        while !self.is_cancelled() {
            if let Some(max) = max_cycles {
                if completed >= max {
                    break;
                }
            }

            match self.engine.is_emergency().await {
                Ok(true) => {
                    tracing::error!("emergency stop tombstone set, halting scheduler");
                    break;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to check emergency stop, applying backoff");
                    backoff_multiplier = (backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
                    let base = self.interval_for(state);
                    let wait = base * backoff_multiplier;
                    tokio::select! {
                        () = self.clock.sleep(wait) => {}
                        _ = self.cancel.changed() => {}
                    }
                    continue;
                }
            }

            let deadline = self.config.cycle_deadline;
            let result = tokio::time::timeout(deadline, self.engine.run_cycle(state)).await;

            match result {
                Ok(Ok(())) => {
                    completed += 1;
                    backoff_multiplier = 1;
                }
                Ok(Err(CoreError::CostCapExceeded)) => {
                    completed += 1;
                    tracing::warn!("cycle ended in cost-cap breach, applying backoff");
                    backoff_multiplier = (backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "cycle returned a fatal error, applying backoff");
                    backoff_multiplier = (backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
                }
                Err(_elapsed) => {
                    tracing::error!("cycle exceeded its deadline, applying backoff");
                    backoff_multiplier = (backoff_multiplier * 2).min(MAX_BACKOFF_MULTIPLIER);
                }
            }

            if self.is_cancelled() {
                break;
            }
            if let Some(max) = max_cycles {
                if completed >= max {
                    break;
                }
            }

            let base = self.interval_for(state);
            let wait = base * backoff_multiplier;
            tokio::select! {
                () = self.clock.sleep(wait) => {}
                _ = self.cancel.changed() => {}
            }
        }

        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostGovernor;
    use crate::core::AgentId;
    use crate::gateway::fakes::{
        FakeAnalytics, FakeChainGateway, FakeClock, FakeDocStore, FakeKv, FakeLLMProvider,
        FakeObserver, FakeVectorStore,
    };
    use crate::gateway::DocStore as _;
    use crate::memory::MemoryManager;
    use crate::profile::PoolProfileStore;

    fn scheduler(cancel: tokio::sync::watch::Receiver<bool>) -> (Scheduler, Arc<FakeClock>) {
        scheduler_with_doc_store(cancel, Arc::new(FakeDocStore::new()))
    }

    fn scheduler_with_doc_store(
        cancel: tokio::sync::watch::Receiver<bool>,
        doc_store: Arc<dyn crate::gateway::DocStore>,
    ) -> (Scheduler, Arc<FakeClock>) {
        let config = Config::defaults();
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let memory = MemoryManager::new(
            config.agent_id.clone(),
            doc_store.clone(),
            Arc::new(FakeVectorStore::new()),
            clock.clone(),
        );
        let profiles = PoolProfileStore::new(
            config.agent_id.clone(),
            doc_store.clone(),
            chrono::Duration::seconds(config.pool_profile_update_interval_sec as i64),
        );
        let cost = CostGovernor::new(
            config.agent_id.clone(),
            config.max_daily_cost_usd,
            config.alert_thresholds_usd.clone(),
            config.cost_cas_max_retries,
            Arc::new(FakeKv::new()),
            doc_store.clone(),
            Arc::new(FakeLLMProvider::new()),
            Arc::new(FakeObserver::new()),
            Arc::new(FakeAnalytics::new()),
        );
        let engine = Arc::new(CycleEngine::new(
            Arc::new(FakeChainGateway::new(500.0)),
            memory,
            profiles,
            cost,
            doc_store,
            clock.clone(),
            Arc::new(FakeObserver::new()),
            config.clone(),
        ));
        (Scheduler::new(engine, clock.clone(), config, cancel), clock)
    }

    #[tokio::test]
    async fn runs_exactly_max_cycles_then_stops() {
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let (mut sched, _clock) = scheduler(rx);
        let mut state = ConsciousnessState::new(AgentId::new(), 500.0, Utc::now());
        let completed = sched.run(&mut state, Some(3)).await;
        assert_eq!(completed, 3);
        assert_eq!(state.cycle_count.value(), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_promptly() {
        let (tx, rx) = tokio::sync::watch::channel(false);
        let (mut sched, _clock) = scheduler(rx);
        let mut state = ConsciousnessState::new(AgentId::new(), 500.0, Utc::now());
        tx.send(true).unwrap();
        let completed = sched.run(&mut state, Some(100)).await;
        assert_eq!(completed, 0);
    }

    #[tokio::test]
    async fn emergency_tombstone_halts_the_scheduler_before_dispatch() {
        let config = Config::defaults();
        let doc_store = Arc::new(FakeDocStore::new());
        doc_store
            .put(
                &format!("agent_state/{}", config.agent_id),
                "emergency",
                serde_json::json!({"reason": "daily cost cap exceeded"}),
                None,
            )
            .await
            .unwrap();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let (mut sched, _clock) = scheduler_with_doc_store(rx, doc_store);
        let mut state = ConsciousnessState::new(AgentId::new(), 500.0, Utc::now());
        let completed = sched.run(&mut state, Some(100)).await;
        assert_eq!(completed, 0);
        assert_eq!(state.cycle_count.value(), 0);
    }
}
