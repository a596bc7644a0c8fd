//! Identifier newtypes.
//!
//! Follows the same shape throughout: a thin wrapper around `Uuid` (or a
//! plain string for externally-assigned identifiers like `pool_id`), with
//! `Display`, `Copy` where the inner type allows it, and a `new()` that
//! mints a fresh random id.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            #[must_use]
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(AgentId);
uuid_id!(MemoryId);
uuid_id!(PatternId);

/// Namespace for content-addressed memory ids, so the same
/// `(content, category, minute)` triple always mints the same [`MemoryId`]
/// (§3: "content-addressed hash of (content, category,
/// created_at_floor_to_minute)").
const MEMORY_ID_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6c, 0x69, 0x71, 0x75, 0x69, 0x73, 0x65, 0x6e, 0x73, 0x65, 0x2d, 0x6d, 0x65, 0x6d, 0x2d, 0x31,
]);

impl MemoryId {
    /// Derives a deterministic id from content, category, and a minute-
    /// floored timestamp. Two calls with identical inputs always produce
    /// identical ids, which is what lets `Remember` dedup by id alone once
    /// the cosine-similarity check has already matched.
    #[must_use]
    pub fn content_addressed(
        content: &str,
        category: &str,
        created_at_floor_to_minute: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let key = format!(
            "{content}\u{0}{category}\u{0}{}",
            created_at_floor_to_minute.format("%Y-%m-%dT%H:%M")
        );
        Self(Uuid::new_v5(&MEMORY_ID_NAMESPACE, key.as_bytes()))
    }
}

/// A pool identifier, stable and externally assigned (e.g. a contract
/// address or protocol-internal slug). Not a `Uuid` — pools are named by
/// the chain, not minted by this crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolId(String);

impl PoolId {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PoolId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for PoolId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

/// A strictly-increasing per-agent cycle counter. Starts at 0 (pre-first-cycle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CycleCount(u64);

impl CycleCount {
    #[must_use]
    pub fn zero() -> Self {
        Self(0)
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl Default for CycleCount {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Display for CycleCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
