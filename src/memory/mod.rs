//! `MemoryManager` — the three-tier memory store (§4.3).
//!
//! Working memory lives on `ConsciousnessState` itself
//! ([`crate::core::state::ConsciousnessState::push_working_memory`]); this
//! module owns the durable tiers (episodic via `DocStore`, semantic via
//! `VectorStore`) plus the bounded in-memory dedup cache that sits in front
//! of both.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Timelike, Utc};
use thiserror::Error;

use crate::core::{Memory, MemoryCategory, MemoryId, MemoryMetadata, MemoryRef, TtlPolicy};
use crate::gateway::{Clock, DocStore, GatewayError, Order, VectorStore};

/// Dedup and recall operate over at most this many recent memories without
/// touching the durable stores (§5).
pub const RECENT_LRU_CAP: usize = 256;
/// Cosine-similarity floor for treating a new `Remember` as a duplicate of
/// an existing memory (§4.3).
pub const DEDUP_SIMILARITY_THRESHOLD: f32 = 0.95;
/// `Compact` evicts non-permanent memories at or below this access count
/// once their TTL has elapsed (§4.3).
pub const COMPACT_ACCESS_FLOOR: u64 = 2;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum MemoryError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("memory {0} not found in episodic store")]
    NotFound(MemoryId),
}

pub type Result<T> = std::result::Result<T, MemoryError>;

fn episodic_collection(agent_id: &str) -> String {
    format!("memories/{agent_id}")
}

/// Fixed-dimension content signature used as the embedding for
/// `remember`/`recall` calls. A real embedding provider is an external
/// collaborator this crate does not define (§1 Non-goals rule out a new
/// vector-search algorithm, and §6 never lists an embedder interface); this
/// is a byte-histogram stand-in that is deterministic and similarity-
/// preserving enough to exercise dedup and recall in this crate's own
/// tests and demonstration binary.
pub const EMBEDDING_DIM: usize = 16;

#[must_use]
pub fn text_embedding(content: &str) -> Vec<f32> {
    let mut buckets = vec![0.0f32; EMBEDDING_DIM];
    for (i, byte) in content.bytes().enumerate() {
        buckets[(byte as usize + i) % EMBEDDING_DIM] += 1.0;
    }
    let norm = buckets.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for b in &mut buckets {
            *b /= norm;
        }
    }
    buckets
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

struct RecentEntry {
    id: MemoryId,
    embedding: Vec<f32>,
}

/// Filters accepted by [`MemoryManager::recall`].
#[derive(Debug, Clone, Default)]
pub struct RecallFilters {
    pub category: Option<MemoryCategory>,
    pub since: Option<DateTime<Utc>>,
}

pub struct MemoryManager {
    agent_id: String,
    doc_store: Arc<dyn DocStore>,
    vector_store: Arc<dyn VectorStore>,
    clock: Arc<dyn Clock>,
    recent: Mutex<VecDeque<RecentEntry>>,
}

impl MemoryManager {
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        doc_store: Arc<dyn DocStore>,
        vector_store: Arc<dyn VectorStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            doc_store,
            vector_store,
            clock,
            recent: Mutex::new(VecDeque::with_capacity(RECENT_LRU_CAP)),
        }
    }

    fn remember_recent(&self, id: MemoryId, embedding: Vec<f32>) {
        let mut recent = self.recent.lock().unwrap();
        recent.retain(|e| e.id != id);
        recent.push_front(RecentEntry { id, embedding });
        recent.truncate(RECENT_LRU_CAP);
    }

    fn find_recent_duplicate(&self, embedding: &[f32]) -> Option<MemoryId> {
        let recent = self.recent.lock().unwrap();
        recent
            .iter()
            .find(|e| cosine(&e.embedding, embedding) >= DEDUP_SIMILARITY_THRESHOLD)
            .map(|e| e.id)
    }

    async fn load(&self, id: MemoryId) -> Result<Option<Memory>> {
        let doc = self
            .doc_store
            .get(&episodic_collection(&self.agent_id), &id.to_string())
            .await?;
        Ok(doc.and_then(|v| serde_json::from_value(v).ok()))
    }

    async fn save(&self, memory: &Memory) -> Result<()> {
        let doc = serde_json::to_value(memory).expect("Memory always serializes");
        self.doc_store
            .put(
                &episodic_collection(&self.agent_id),
                &memory.id.to_string(),
                doc,
                None,
            )
            .await?;
        Ok(())
    }

    /// Stores (or, on a dedup hit, updates) a memory. Returns the id of the
    /// record that now exists — either freshly created or the existing
    /// match.
    pub async fn remember(
        &self,
        content: impl Into<String>,
        category: MemoryCategory,
        metadata: MemoryMetadata,
        importance: f64,
        confidence: f64,
        embedding: &[f32],
    ) -> Result<MemoryId> {
        let content = content.into();
        let now = self.clock.now();

        if let Some(existing_id) = self.find_recent_duplicate(embedding) {
            if let Some(mut existing) = self.load(existing_id).await? {
                existing.touch(now);
                existing.metadata.merge_from(&metadata);
                self.save(&existing).await?;
                self.remember_recent(existing.id, embedding.to_vec());
                return Ok(existing.id);
            }
        }

        let floor_minute = now
            .date_naive()
            .and_hms_opt(now.hour(), now.minute(), 0)
            .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
            .unwrap_or(now);
        let id = MemoryId::content_addressed(&content, category_key(category), floor_minute);

        // A second `remember` call for the exact same (content, category,
        // minute) triple produces the same id even if the dedup-by-cosine
        // check above missed it (e.g. a cold `recent` cache) — load first
        // to stay idempotent per the round-trip law in the invariants.
        if let Some(mut existing) = self.load(id).await? {
            existing.touch(now);
            existing.metadata.merge_from(&metadata);
            self.save(&existing).await?;
            self.remember_recent(id, embedding.to_vec());
            return Ok(id);
        }

        let ttl_policy = if (importance - 1.0).abs() < f64::EPSILON {
            TtlPolicy::Permanent
        } else {
            category.default_ttl()
        };

        let memory = Memory {
            id,
            content,
            category,
            importance,
            confidence,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            metadata,
            embedding_ref: id.to_string(),
            ttl_policy,
        };

        self.save(&memory).await?;

        let mut vector_meta = crate::gateway::VectorMeta::new();
        vector_meta.insert("category".to_string(), category_key(category).to_string());
        vector_meta.insert("importance".to_string(), importance.to_string());
        if let Err(e) = self.vector_store.upsert(&id.to_string(), embedding, vector_meta).await {
            // Episodic write already landed; semantic recall will simply
            // miss this memory until a repair pass re-upserts it.
            tracing::warn!(memory_id = %id, error = %e, "semantic write failed after episodic write, repair needed");
        }

        self.remember_recent(id, embedding.to_vec());
        Ok(id)
    }

    /// Semantic top-k recall, filtered then hydrated from the episodic
    /// store. Bumps `access_count`/`last_accessed_at` on every returned
    /// item.
    pub async fn recall(
        &self,
        query_embedding: &[f32],
        filters: &RecallFilters,
        k: usize,
    ) -> Result<Vec<MemoryRef>> {
        let mut vector_filters = crate::gateway::VectorMeta::new();
        if let Some(category) = filters.category {
            vector_filters.insert("category".to_string(), category_key(category).to_string());
        }
        let hits = self
            .vector_store
            .search(query_embedding, k.max(1) * 2, &vector_filters)
            .await?;

        let mut out = Vec::with_capacity(k);
        let now = self.clock.now();
        for hit in hits {
            let Ok(id) = hit.id.parse::<uuid::Uuid>() else {
                continue;
            };
            let id = MemoryId::from_uuid(id);
            let Some(mut memory) = self.load(id).await? else {
                continue;
            };
            if let Some(since) = filters.since {
                if memory.created_at < since {
                    continue;
                }
            }
            memory.touch(now);
            let memory_ref = MemoryRef::from(&memory);
            self.save(&memory).await?;
            out.push(memory_ref);
            if out.len() >= k {
                break;
            }
        }
        Ok(out)
    }

    /// Optimized metadata-only recall for a single pool's history, used by
    /// the decider to pull prior `POOL_BEHAVIOR`/`GAS_TIMING` memories
    /// without a semantic search round-trip.
    pub async fn recall_for_pool(
        &self,
        pool_id: &str,
        window: chrono::Duration,
    ) -> Result<Vec<MemoryRef>> {
        let now = self.clock.now();
        let cutoff = now - window;
        let docs = self
            .doc_store
            .query(&episodic_collection(&self.agent_id), "", Order::Descending, 10_000)
            .await?;

        let mut out = Vec::new();
        for doc in docs {
            let Ok(memory) = serde_json::from_value::<Memory>(doc) else {
                continue;
            };
            if memory.created_at < cutoff {
                continue;
            }
            if memory.metadata.get("pool_id") != Some(pool_id) {
                continue;
            }
            out.push(MemoryRef::from(&memory));
        }
        Ok(out)
    }

    /// Evicts memories whose TTL has elapsed and whose `access_count` is at
    /// or below [`COMPACT_ACCESS_FLOOR`]. Permanent memories are exempt.
    /// Returns the number evicted.
    pub async fn compact(&self) -> Result<usize> {
        let now = self.clock.now();
        let docs = self
            .doc_store
            .query(&episodic_collection(&self.agent_id), "", Order::Ascending, 100_000)
            .await?;

        let mut evicted = 0;
        for doc in docs {
            let Ok(memory) = serde_json::from_value::<Memory>(doc) else {
                continue;
            };
            if memory.is_permanent() {
                continue;
            }
            let Some(ttl) = memory.ttl_policy.duration() else {
                continue;
            };
            if now - memory.created_at < ttl {
                continue;
            }
            if memory.access_count > COMPACT_ACCESS_FLOOR {
                continue;
            }
            self.doc_store
                .delete(&episodic_collection(&self.agent_id), &memory.id.to_string())
                .await?;
            let _ = self.vector_store.delete(&memory.id.to_string()).await;
            evicted += 1;
        }
        Ok(evicted)
    }
}

fn category_key(category: MemoryCategory) -> &'static str {
    match category {
        MemoryCategory::Observation => "OBSERVATION",
        MemoryCategory::Pattern => "PATTERN",
        MemoryCategory::Strategy => "STRATEGY",
        MemoryCategory::Outcome => "OUTCOME",
        MemoryCategory::SurvivalCritical => "SURVIVAL_CRITICAL",
        MemoryCategory::PoolBehavior => "POOL_BEHAVIOR",
        MemoryCategory::GasTiming => "GAS_TIMING",
        MemoryCategory::RebalanceOutcome => "REBALANCE_OUTCOME",
        MemoryCategory::Error => "ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::fakes::{FakeClock, FakeDocStore, FakeVectorStore};

    fn manager() -> MemoryManager {
        MemoryManager::new(
            "agent-1",
            Arc::new(FakeDocStore::new()),
            Arc::new(FakeVectorStore::new()),
            Arc::new(FakeClock::new(Utc::now())),
        )
    }

    #[tokio::test]
    async fn remember_is_idempotent_within_the_same_minute() {
        let mgr = manager();
        let embedding = vec![1.0, 0.0, 0.0];
        let id1 = mgr
            .remember(
                "gas cheap Sun 03:00 UTC",
                MemoryCategory::GasTiming,
                MemoryMetadata::new(),
                0.8,
                0.8,
                &embedding,
            )
            .await
            .unwrap();
        let id2 = mgr
            .remember(
                "gas cheap Sun 03:00 UTC",
                MemoryCategory::GasTiming,
                MemoryMetadata::new(),
                0.8,
                0.8,
                &embedding,
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let stored = mgr.load(id1).await.unwrap().unwrap();
        assert!(stored.access_count >= 2);
    }

    #[tokio::test]
    async fn remember_assigns_permanent_ttl_at_importance_one() {
        let mgr = manager();
        let id = mgr
            .remember(
                "wallet drained",
                MemoryCategory::Observation,
                MemoryMetadata::new(),
                1.0,
                1.0,
                &[0.1, 0.2],
            )
            .await
            .unwrap();
        let stored = mgr.load(id).await.unwrap().unwrap();
        assert_eq!(stored.ttl_policy, TtlPolicy::Permanent);
    }

    #[tokio::test]
    async fn compact_exempts_permanent_memories() {
        let mgr = manager();
        let id = mgr
            .remember(
                "never forget",
                MemoryCategory::SurvivalCritical,
                MemoryMetadata::new(),
                1.0,
                1.0,
                &[0.5, 0.5],
            )
            .await
            .unwrap();
        let evicted = mgr.compact().await.unwrap();
        assert_eq!(evicted, 0);
        assert!(mgr.load(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn recall_for_pool_filters_by_metadata() {
        let mgr = manager();
        let mut meta = MemoryMetadata::new();
        meta.insert("pool_id", "pool-a");
        mgr.remember(
            "pool a observation",
            MemoryCategory::PoolBehavior,
            meta,
            0.8,
            0.8,
            &[1.0, 0.0],
        )
        .await
        .unwrap();

        let mut other_meta = MemoryMetadata::new();
        other_meta.insert("pool_id", "pool-b");
        mgr.remember(
            "pool b observation",
            MemoryCategory::PoolBehavior,
            other_meta,
            0.8,
            0.8,
            &[0.0, 1.0],
        )
        .await
        .unwrap();

        let found = mgr
            .recall_for_pool("pool-a", chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn text_embedding_is_deterministic_and_normalized() {
        let a = text_embedding("gas cheap Sun 03:00 UTC");
        let b = text_embedding("gas cheap Sun 03:00 UTC");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5 || norm == 0.0);
    }
}
