//! The `Memory` entity and its supporting closed sets, shared between
//! [`crate::memory`] (which owns the store/recall/compact operations) and
//! [`crate::core::state`] (which carries lightweight `MemoryRef`s on the
//! working state).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MemoryId;

/// Closed set of memory categories. `Learn` assigns one of these to every
/// memory it forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemoryCategory {
    Observation,
    Pattern,
    Strategy,
    Outcome,
    SurvivalCritical,
    PoolBehavior,
    GasTiming,
    RebalanceOutcome,
    Error,
}

impl MemoryCategory {
    /// The TTL table in §4.3.
    #[must_use]
    pub fn default_ttl(self) -> TtlPolicy {
        match self {
            MemoryCategory::SurvivalCritical => TtlPolicy::Permanent,
            MemoryCategory::Pattern
            | MemoryCategory::Strategy
            | MemoryCategory::Outcome
            | MemoryCategory::PoolBehavior
            | MemoryCategory::RebalanceOutcome
            | MemoryCategory::GasTiming => TtlPolicy::Long90d,
            MemoryCategory::Observation => TtlPolicy::Medium30d,
            MemoryCategory::Error => TtlPolicy::Short7d,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TtlPolicy {
    Permanent,
    Long90d,
    Medium30d,
    Short7d,
}

impl TtlPolicy {
    /// `None` for `Permanent`.
    #[must_use]
    pub fn duration(self) -> Option<chrono::Duration> {
        match self {
            TtlPolicy::Permanent => None,
            TtlPolicy::Long90d => Some(chrono::Duration::days(90)),
            TtlPolicy::Medium30d => Some(chrono::Duration::days(30)),
            TtlPolicy::Short7d => Some(chrono::Duration::days(7)),
        }
    }
}

/// Bounded metadata attached to a memory: at most 32 keys, values at most
/// 256 bytes. Construction through [`MemoryMetadata::insert`] enforces
/// both bounds rather than trusting callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata(HashMap<String, String>);

impl MemoryMetadata {
    pub const MAX_KEYS: usize = 32;
    pub const MAX_VALUE_BYTES: usize = 256;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `key`/`value`, silently truncating the value to
    /// [`Self::MAX_VALUE_BYTES`] and refusing the insert once the map is
    /// already at [`Self::MAX_KEYS`] distinct keys.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let mut value = value.into();
        if value.len() > Self::MAX_VALUE_BYTES {
            value.truncate(Self::MAX_VALUE_BYTES);
        }
        if self.0.len() >= Self::MAX_KEYS && !self.0.contains_key(&key) {
            return;
        }
        self.0.insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Shallow merge: `other`'s keys win on conflict, subject to the same
    /// key-count cap.
    pub fn merge_from(&mut self, other: &MemoryMetadata) {
        for (k, v) in &other.0 {
            self.insert(k.clone(), v.clone());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A durable memory record. The embedding itself lives in the
/// [`crate::gateway::VectorStore`]; this struct holds everything else,
/// including `embedding_ref`, the opaque id under which the embedding was
/// upserted (conventionally equal to `id`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub content: String,
    pub category: MemoryCategory,
    pub importance: f64,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub metadata: MemoryMetadata,
    pub embedding_ref: String,
    pub ttl_policy: TtlPolicy,
}

impl Memory {
    /// Permanent memories are exempt from `Compact` regardless of access
    /// history (§3 invariant, §8 property 5).
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        matches!(self.ttl_policy, TtlPolicy::Permanent)
            || self.category == MemoryCategory::SurvivalCritical
            || (self.importance - 1.0).abs() < f64::EPSILON
    }

    /// Marks this memory as recalled: bumps `access_count` and
    /// `last_accessed_at`, used by both `Remember`'s dedup hit path and
    /// `Recall`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.access_count += 1;
        self.last_accessed_at = now;
    }
}

/// A lightweight reference to a memory, as carried on
/// `ConsciousnessState::working_memories`. Mirrors just enough of
/// [`Memory`] to avoid re-hydrating the full record every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRef {
    pub id: MemoryId,
    pub category: MemoryCategory,
    pub importance: f64,
    pub last_accessed_at: DateTime<Utc>,
}

impl From<&Memory> for MemoryRef {
    fn from(m: &Memory) -> Self {
        Self {
            id: m.id,
            category: m.category,
            importance: m.importance,
            last_accessed_at: m.last_accessed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_ttl_table_matches_spec() {
        assert_eq!(
            MemoryCategory::SurvivalCritical.default_ttl(),
            TtlPolicy::Permanent
        );
        assert_eq!(MemoryCategory::Pattern.default_ttl(), TtlPolicy::Long90d);
        assert_eq!(MemoryCategory::Strategy.default_ttl(), TtlPolicy::Long90d);
        assert_eq!(MemoryCategory::Outcome.default_ttl(), TtlPolicy::Long90d);
        assert_eq!(
            MemoryCategory::PoolBehavior.default_ttl(),
            TtlPolicy::Long90d
        );
        assert_eq!(
            MemoryCategory::RebalanceOutcome.default_ttl(),
            TtlPolicy::Long90d
        );
        assert_eq!(MemoryCategory::GasTiming.default_ttl(), TtlPolicy::Long90d);
        assert_eq!(
            MemoryCategory::Observation.default_ttl(),
            TtlPolicy::Medium30d
        );
        assert_eq!(MemoryCategory::Error.default_ttl(), TtlPolicy::Short7d);
    }

    #[test]
    fn metadata_caps_key_count() {
        let mut meta = MemoryMetadata::new();
        for i in 0..40 {
            meta.insert(format!("k{i}"), "v");
        }
        assert_eq!(meta.len(), MemoryMetadata::MAX_KEYS);
    }

    #[test]
    fn metadata_truncates_long_values() {
        let mut meta = MemoryMetadata::new();
        meta.insert("k", "x".repeat(1000));
        assert_eq!(meta.get("k").unwrap().len(), MemoryMetadata::MAX_VALUE_BYTES);
    }

    #[test]
    fn importance_one_forces_permanent_regardless_of_category() {
        let m = Memory {
            id: MemoryId::new(),
            content: "x".into(),
            category: MemoryCategory::Observation,
            importance: 1.0,
            confidence: 0.5,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            access_count: 0,
            metadata: MemoryMetadata::new(),
            embedding_ref: "x".into(),
            ttl_policy: MemoryCategory::Observation.default_ttl(),
        };
        assert!(m.is_permanent());
    }
}
