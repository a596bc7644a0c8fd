//! External-collaborator interfaces
//!
//! Everything here is a leaf dependency the cognitive cycle engine is built
//! over: a chain client, a semantic vector index, a document store, a small
//! key-value counter store, an append-only analytics sink, a secret store,
//! an LLM provider, a clock, and an alert/log observer. Concrete
//! implementations (a real RPC client, a managed vector database, ...) live
//! outside this crate; [`fakes`] provides deterministic in-memory stand-ins
//! used by the rest of this crate's own test suite and by the demonstration
//! binary.

pub mod fakes;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by any external collaborator.
///
/// Mirrors the error taxonomy in the top-level error design: transient
/// failures are retried by callers per their own per-I/O policy, data
/// quality issues are surfaced as warnings rather than failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GatewayError {
    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("malformed external data: {0}")]
    DataQuality(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("optimistic write conflict on {0}")]
    WriteConflict(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

/// A liquidity position held by the agent's wallet.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Position {
    pub pool_id: String,
    pub amount_usd: f64,
    pub opened_at: DateTime<Utc>,
}

/// A pool as reported by the chain.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Pool {
    pub pool_id: String,
    pub pair_label: String,
    pub tvl_usd: f64,
    pub volume_24h_usd: f64,
    pub fee_apr: f64,
    pub reward_apr: f64,
}

/// A filter for listing pools. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolFilter {
    pub min_tvl_usd: Option<f64>,
}

/// A simulated swap quote.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub amount_out: f64,
    pub price_impact_pct: f64,
}

/// Chain operations the decider/execution path needs.
///
/// Concrete RPC clients, wallet signers, and protocol-specific ABI/event
/// decoders live outside this crate. In observation mode, execution methods
/// (`estimate_gas_usd` aside, which is read-only) are never called.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    async fn get_wallet_balance_usd(&self) -> Result<f64>;
    async fn get_gas_price_gwei(&self) -> Result<f64>;
    async fn list_positions(&self) -> Result<Vec<Position>>;
    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<Pool>>;
    async fn get_pool_info(&self, pool_id: &str) -> Result<Pool>;
    async fn simulate_swap(&self, pool_id: &str, amount_usd: f64) -> Result<Quote>;
    async fn estimate_gas_usd(&self, op: &str) -> Result<f64>;
}

/// A semantic search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub id: String,
    pub score: f32,
}

/// Minimal metadata attached to a vector upsert.
pub type VectorMeta = HashMap<String, String>;

/// Embedding-based recall index. The embedding algorithm itself and its
/// concrete provider are out of scope for this crate.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, id: &str, embedding: &[f32], meta: VectorMeta) -> Result<()>;
    async fn search(&self, query_embedding: &[f32], k: usize, filters: &VectorMeta)
        -> Result<Vec<Hit>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Ordering direction for `DocStore::query`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

/// A durable document store keyed by `(collection, id)`.
#[async_trait]
pub trait DocStore: Send + Sync {
    /// Writes `doc` to `collection/id`. `if_match` is an optimistic
    /// concurrency token (the caller's last-seen version); `None` means
    /// unconditional write.
    async fn put(
        &self,
        collection: &str,
        id: &str,
        doc: serde_json::Value,
        if_match: Option<&str>,
    ) -> Result<()>;
    async fn get(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>>;
    async fn query(
        &self,
        collection: &str,
        prefix: &str,
        order: Order,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>>;
    async fn delete(&self, collection: &str, id: &str) -> Result<()>;
}

/// A small shared integer counter store, used for the daily cost ledger.
#[async_trait]
pub trait KV: Send + Sync {
    async fn get_int(&self, key: &str) -> Result<Option<i64>>;
    /// Atomically sets `key` to `new` if its current value equals `expected`
    /// (or the key is absent and `expected` is `None`). Returns whether the
    /// swap happened.
    async fn compare_and_set_int(&self, key: &str, expected: Option<i64>, new: i64)
        -> Result<bool>;
}

/// Append-only analytics sink (out of scope for concrete backing store).
#[async_trait]
pub trait Analytics: Send + Sync {
    async fn append(&self, table: &str, record: serde_json::Value) -> Result<()>;
}

/// Secret retrieval, e.g. API keys and RPC credentials.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<String>;
}

/// Model tiers the cost governor routes between, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelTier {
    Critical,
    Efficient,
    Balanced,
    Powerful,
}

/// A completion response from an LLM provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usd: f64,
    pub tokens_in: u32,
    pub tokens_out: u32,
}

/// The raw LLM backend. [`crate::cost::CostGovernor`] wraps this with budget
/// enforcement and tier selection; nothing else in this crate calls it
/// directly.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, tier: ModelTier, prompt: &str, max_tokens: u32) -> Result<Completion>;
}

/// Wall-clock access, abstracted so tests can run without real sleeps.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: std::time::Duration);
}

/// Alert/log levels for [`Observer::event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverLevel {
    Info,
    Warn,
    Alert,
}

/// Fire-and-forget alerting/logging sink, distinct from `tracing` (which
/// this crate also uses internally for structured logs): `Observer` is for
/// events a human operator should be paged on, e.g. cost threshold crossings.
pub trait Observer: Send + Sync {
    fn event(&self, level: ObserverLevel, code: &str, fields: &HashMap<String, String>);
}
