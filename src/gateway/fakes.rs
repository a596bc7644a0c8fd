//! In-memory fakes for every external-collaborator interface.
//!
//! These back this crate's own test suite and the demonstration binary.
//! None of them talk to a network; all state lives behind a `Mutex` for
//! interior mutability across the `&self` trait methods the async traits
//! require.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{
    Analytics, ChainGateway, Clock, Completion, DocStore, GatewayError, Hit, KV, LLMProvider,
    ModelTier, Observer, ObserverLevel, Order, Pool, PoolFilter, Position, Quote, Result,
    SecretStore, VectorMeta, VectorStore,
};

/// A fake chain gateway seeded with a fixed wallet balance, gas price, and
/// pool list. Tests mutate these via the `set_*` helpers before driving a
/// cycle.
pub struct FakeChainGateway {
    inner: Mutex<FakeChainState>,
}

struct FakeChainState {
    wallet_balance_usd: f64,
    gas_price_gwei: f64,
    positions: Vec<Position>,
    pools: Vec<Pool>,
}

impl FakeChainGateway {
    #[must_use]
    pub fn new(wallet_balance_usd: f64) -> Self {
        Self {
            inner: Mutex::new(FakeChainState {
                wallet_balance_usd,
                gas_price_gwei: 30.0,
                positions: Vec::new(),
                pools: Vec::new(),
            }),
        }
    }

    pub fn set_wallet_balance_usd(&self, balance: f64) {
        self.inner.lock().unwrap().wallet_balance_usd = balance;
    }

    pub fn set_gas_price_gwei(&self, gwei: f64) {
        self.inner.lock().unwrap().gas_price_gwei = gwei;
    }

    pub fn set_pools(&self, pools: Vec<Pool>) {
        self.inner.lock().unwrap().pools = pools;
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        self.inner.lock().unwrap().positions = positions;
    }
}

#[async_trait]
impl ChainGateway for FakeChainGateway {
    async fn get_wallet_balance_usd(&self) -> Result<f64> {
        Ok(self.inner.lock().unwrap().wallet_balance_usd)
    }

    async fn get_gas_price_gwei(&self) -> Result<f64> {
        Ok(self.inner.lock().unwrap().gas_price_gwei)
    }

    async fn list_positions(&self) -> Result<Vec<Position>> {
        Ok(self.inner.lock().unwrap().positions.clone())
    }

    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<Pool>> {
        let pools = self.inner.lock().unwrap().pools.clone();
        Ok(pools
            .into_iter()
            .filter(|p| filter.min_tvl_usd.is_none_or(|min| p.tvl_usd >= min))
            .collect())
    }

    async fn get_pool_info(&self, pool_id: &str) -> Result<Pool> {
        self.inner
            .lock()
            .unwrap()
            .pools
            .iter()
            .find(|p| p.pool_id == pool_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(pool_id.to_string()))
    }

    async fn simulate_swap(&self, _pool_id: &str, amount_usd: f64) -> Result<Quote> {
        Ok(Quote {
            amount_out: amount_usd * 0.997,
            price_impact_pct: 0.1,
        })
    }

    async fn estimate_gas_usd(&self, _op: &str) -> Result<f64> {
        let gwei = self.inner.lock().unwrap().gas_price_gwei;
        // Rough fixed-gas-unit estimate: 150k gas units at the current price.
        Ok(gwei * 150_000.0 / 1e9 * 2000.0)
    }
}

/// A fake vector store doing brute-force cosine search over an in-memory map.
#[derive(Default)]
pub struct FakeVectorStore {
    points: Mutex<HashMap<String, (Vec<f32>, VectorMeta)>>,
}

impl FakeVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert(&self, id: &str, embedding: &[f32], meta: VectorMeta) -> Result<()> {
        self.points
            .lock()
            .unwrap()
            .insert(id.to_string(), (embedding.to_vec(), meta));
        Ok(())
    }

    async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        filters: &VectorMeta,
    ) -> Result<Vec<Hit>> {
        let points = self.points.lock().unwrap();
        let mut hits: Vec<Hit> = points
            .iter()
            .filter(|(_, (_, meta))| {
                filters
                    .iter()
                    .all(|(k, v)| meta.get(k).is_some_and(|mv| mv == v))
            })
            .map(|(id, (vec, _))| Hit {
                id: id.clone(),
                score: cosine(query_embedding, vec),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.points.lock().unwrap().remove(id);
        Ok(())
    }
}

/// A fake document store, a `HashMap<(collection, id), Value>` behind a mutex.
#[derive(Default)]
pub struct FakeDocStore {
    docs: Mutex<HashMap<(String, String), serde_json::Value>>,
}

impl FakeDocStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocStore for FakeDocStore {
    async fn put(
        &self,
        collection: &str,
        id: &str,
        doc: serde_json::Value,
        _if_match: Option<&str>,
    ) -> Result<()> {
        self.docs
            .lock()
            .unwrap()
            .insert((collection.to_string(), id.to_string()), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<serde_json::Value>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .cloned())
    }

    async fn query(
        &self,
        collection: &str,
        prefix: &str,
        order: Order,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>> {
        let docs = self.docs.lock().unwrap();
        let mut matches: Vec<(&String, &serde_json::Value)> = docs
            .iter()
            .filter(|((c, id), _)| c == collection && id.starts_with(prefix))
            .map(|((_, id), v)| (id, v))
            .collect();
        matches.sort_by(|a, b| match order {
            Order::Ascending => a.0.cmp(b.0),
            Order::Descending => b.0.cmp(a.0),
        });
        Ok(matches
            .into_iter()
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.docs
            .lock()
            .unwrap()
            .remove(&(collection.to_string(), id.to_string()));
        Ok(())
    }
}

/// A fake KV store with bounded compare-and-set retries modeled via plain
/// mutex exclusion (a real KV backend would use a server-side CAS).
#[derive(Default)]
pub struct FakeKv {
    values: Mutex<HashMap<String, i64>>,
}

impl FakeKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KV for FakeKv {
    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.values.lock().unwrap().get(key).copied())
    }

    async fn compare_and_set_int(
        &self,
        key: &str,
        expected: Option<i64>,
        new: i64,
    ) -> Result<bool> {
        let mut values = self.values.lock().unwrap();
        let current = values.get(key).copied();
        if current == expected {
            values.insert(key.to_string(), new);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// An analytics sink that just accumulates records, for test assertions.
#[derive(Default)]
pub struct FakeAnalytics {
    records: Mutex<Vec<(String, serde_json::Value)>>,
}

impl FakeAnalytics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(String, serde_json::Value)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl Analytics for FakeAnalytics {
    async fn append(&self, table: &str, record: serde_json::Value) -> Result<()> {
        self.records
            .lock()
            .unwrap()
            .push((table.to_string(), record));
        Ok(())
    }
}

/// A fake secret store backed by a fixed map, handy for injecting API keys
/// in tests without touching the environment.
#[derive(Default)]
pub struct FakeSecretStore {
    secrets: HashMap<String, String>,
}

impl FakeSecretStore {
    #[must_use]
    pub fn new(secrets: HashMap<String, String>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn get(&self, name: &str) -> Result<String> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }
}

/// A fake LLM provider with a fixed per-tier cost-per-token and canned text.
pub struct FakeLLMProvider {
    cost_per_1k_tokens: HashMap<ModelTier, f64>,
}

impl Default for FakeLLMProvider {
    fn default() -> Self {
        let mut cost_per_1k_tokens = HashMap::new();
        cost_per_1k_tokens.insert(ModelTier::Critical, 0.001);
        cost_per_1k_tokens.insert(ModelTier::Efficient, 0.01);
        cost_per_1k_tokens.insert(ModelTier::Balanced, 0.05);
        cost_per_1k_tokens.insert(ModelTier::Powerful, 0.20);
        Self { cost_per_1k_tokens }
    }
}

impl FakeLLMProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LLMProvider for FakeLLMProvider {
    async fn complete(&self, tier: ModelTier, prompt: &str, max_tokens: u32) -> Result<Completion> {
        let tokens_in = (prompt.len() / 4).max(1) as u32;
        let tokens_out = max_tokens.min(256);
        let per_1k = self.cost_per_1k_tokens.get(&tier).copied().unwrap_or(0.05);
        let usd = f64::from(tokens_in + tokens_out) / 1000.0 * per_1k;
        Ok(Completion {
            text: format!("[{tier:?} analysis of {} chars]", prompt.len()),
            usd,
            tokens_in,
            tokens_out,
        })
    }
}

/// A fake clock whose `now()` can be advanced deterministically by tests,
/// and whose `sleep` returns instantly (real delay is never wanted in unit
/// tests that drive dozens of cycles).
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(duration).unwrap_or_default();
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

#[async_trait]
impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// An observer that records events for test assertions instead of paging
/// anyone.
#[derive(Default)]
pub struct FakeObserver {
    events: Mutex<Vec<(ObserverLevel, String)>>,
}

impl FakeObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(ObserverLevel, String)> {
        self.events.lock().unwrap().clone()
    }
}

impl Observer for FakeObserver {
    fn event(&self, level: ObserverLevel, code: &str, _fields: &HashMap<String, String>) {
        self.events.lock().unwrap().push((level, code.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn chain_gateway_filters_pools_by_tvl() {
        let gw = FakeChainGateway::new(100.0);
        gw.set_pools(vec![
            Pool {
                pool_id: "a".into(),
                pair_label: "A/B".into(),
                tvl_usd: 1000.0,
                volume_24h_usd: 0.0,
                fee_apr: 0.1,
                reward_apr: 0.0,
            },
            Pool {
                pool_id: "b".into(),
                pair_label: "C/D".into(),
                tvl_usd: 10.0,
                volume_24h_usd: 0.0,
                fee_apr: 0.1,
                reward_apr: 0.0,
            },
        ]);

        let filtered = gw
            .list_pools(&PoolFilter {
                min_tvl_usd: Some(500.0),
            })
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].pool_id, "a");
    }

    #[tokio::test]
    async fn vector_store_search_ranks_by_similarity() {
        let store = FakeVectorStore::new();
        store
            .upsert("x", &[1.0, 0.0], VectorMeta::new())
            .await
            .unwrap();
        store
            .upsert("y", &[0.0, 1.0], VectorMeta::new())
            .await
            .unwrap();

        let hits = store
            .search(&[1.0, 0.0], 2, &VectorMeta::new())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "x");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn doc_store_roundtrip() {
        let store = FakeDocStore::new();
        store
            .put("memories", "1", serde_json::json!({"a": 1}), None)
            .await
            .unwrap();
        let got = store.get("memories", "1").await.unwrap();
        assert_eq!(got, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn kv_compare_and_set_rejects_stale_expected() {
        let kv = FakeKv::new();
        assert!(kv.compare_and_set_int("k", None, 5).await.unwrap());
        assert!(!kv.compare_and_set_int("k", None, 10).await.unwrap());
        assert!(kv.compare_and_set_int("k", Some(5), 10).await.unwrap());
        assert_eq!(kv.get_int("k").await.unwrap(), Some(10));
    }

    #[test]
    fn fake_clock_advances_deterministically() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(clock.now(), start + chrono::Duration::hours(1));
    }
}
