//! liquisensed - demonstration runner for the liquidity sentinel
//!
//! Wires the [`liquisense::gateway::fakes`] in-memory collaborators into a
//! [`liquisense::cycle::CycleEngine`] and drives it with a
//! [`liquisense::cycle::Scheduler`]. Real RPC clients, managed stores, and an
//! HTTP/dashboard surface are explicitly out of scope for this crate; this
//! binary exists to prove the cognitive cycle runs end to end, not to be a
//! production agent launcher.
//!
//! # Usage
//!
//! ```sh
//! liquisensed                 # run indefinitely until Ctrl-C
//! liquisensed --cycles 10     # run exactly 10 cycles then exit
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liquisense::config::Config;
use liquisense::core::{AgentId, ConsciousnessState};
use liquisense::cost::CostGovernor;
use liquisense::cycle::{CycleEngine, Scheduler};
use liquisense::gateway::fakes::{
    FakeAnalytics, FakeChainGateway, FakeClock, FakeDocStore, FakeKv, FakeLLMProvider,
    FakeObserver, FakeSecretStore, FakeVectorStore,
};
use liquisense::memory::MemoryManager;
use liquisense::profile::PoolProfileStore;

/// Demonstration runner for the autonomous liquidity sentinel
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of cycles to run before exiting. Omit to run until Ctrl-C.
    #[arg(long)]
    cycles: Option<u64>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        if !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound) {
            eprintln!("Warning: failed to load .env: {e}");
        }
    }

    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_new(&args.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        agent_id = %config.agent_id,
        observation_mode = config.observation_mode,
        starting_treasury_usd = config.starting_treasury_usd,
        "liquisense starting"
    );

    run(&config, args.cycles).await;
}

async fn run(config: &Config, max_cycles: Option<u64>) {
    let clock = Arc::new(FakeClock::new(chrono::Utc::now()));
    let doc_store: Arc<dyn liquisense::gateway::DocStore> = Arc::new(FakeDocStore::new());
    let vector_store: Arc<dyn liquisense::gateway::VectorStore> = Arc::new(FakeVectorStore::new());
    let kv: Arc<dyn liquisense::gateway::KV> = Arc::new(FakeKv::new());
    let llm: Arc<dyn liquisense::gateway::LLMProvider> = Arc::new(FakeLLMProvider::new());
    let observer: Arc<dyn liquisense::gateway::Observer> = Arc::new(FakeObserver::new());
    let analytics: Arc<dyn liquisense::gateway::Analytics> = Arc::new(FakeAnalytics::new());
    let _secrets: Arc<dyn liquisense::gateway::SecretStore> =
        Arc::new(FakeSecretStore::new(HashMap::new()));
    let chain: Arc<dyn liquisense::gateway::ChainGateway> =
        Arc::new(FakeChainGateway::new(config.starting_treasury_usd));

    let memory = MemoryManager::new(
        config.agent_id.clone(),
        doc_store.clone(),
        vector_store,
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
        kv,
        doc_store.clone(),
        llm,
        observer.clone(),
        analytics,
    );

    let engine = Arc::new(CycleEngine::new(
        chain,
        memory,
        profiles,
        cost,
        doc_store,
        clock.clone(),
        observer,
        config.clone(),
    ));

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested, finishing current cycle");
            let _ = cancel_tx.send(true);
        }
    });

    let mut scheduler = Scheduler::new(engine, clock, config.clone(), cancel_rx);
    let mut state = ConsciousnessState::new(
        AgentId::new(),
        config.starting_treasury_usd,
        chrono::Utc::now(),
    );

    let completed = scheduler.run(&mut state, max_cycles).await;
    info!(completed, "liquisense exiting");
}
