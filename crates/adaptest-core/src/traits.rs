//! Boundary traits for the engine's external collaborators.
//!
//! The item bank supplies candidates and the session store persists
//! serialized sessions. The engine never talks to a database itself; hosts
//! implement these traits (see `adaptest-store` for reference stores).

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CatError;
use crate::model::ItemParams;

// ---------------------------------------------------------------------------
// Item bank
// ---------------------------------------------------------------------------

/// Optional narrowing applied by the item bank before selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateFilter {
    /// Only items in these content areas.
    #[serde(default)]
    pub content_areas: Option<Vec<String>>,
    /// Only items with difficulty in `[min, max]`.
    #[serde(default)]
    pub difficulty_range: Option<(f64, f64)>,
}

impl CandidateFilter {
    pub fn matches(&self, item: &ItemParams) -> bool {
        if let Some(areas) = &self.content_areas {
            match &item.content_area {
                Some(area) if areas.iter().any(|a| a == area) => {}
                _ => return false,
            }
        }
        if let Some((min, max)) = self.difficulty_range {
            if item.b < min || item.b > max {
                return false;
            }
        }
        true
    }
}

/// Synchronous source of candidate items.
pub trait ItemBank: Send + Sync {
    /// Items not in `exclude_ids` that pass `filter`.
    fn candidates(&self, exclude_ids: &HashSet<String>, filter: &CandidateFilter)
        -> Vec<ItemParams>;

    /// Look up one item by id.
    fn get(&self, id: &str) -> Option<ItemParams>;
}

/// Asynchronous source of candidate items.
///
/// Every [`ItemBank`] is usable here through a blanket adapter.
#[async_trait]
pub trait AsyncItemBank: Send + Sync {
    async fn candidates(
        &self,
        exclude_ids: &HashSet<String>,
        filter: &CandidateFilter,
    ) -> anyhow::Result<Vec<ItemParams>>;

    async fn get(&self, id: &str) -> anyhow::Result<Option<ItemParams>>;
}

#[async_trait]
impl<T: ItemBank> AsyncItemBank for T {
    async fn candidates(
        &self,
        exclude_ids: &HashSet<String>,
        filter: &CandidateFilter,
    ) -> anyhow::Result<Vec<ItemParams>> {
        Ok(ItemBank::candidates(self, exclude_ids, filter))
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<ItemParams>> {
        Ok(ItemBank::get(self, id))
    }
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

/// A serialized session with the store's version counter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub version: u64,
    pub blob: Value,
}

/// Persistence for serialized sessions.
///
/// `save` must be atomic per session id: it succeeds only when the stored
/// version equals `expected_version` (`None` meaning "not stored yet") and
/// returns the new version. This is how lost updates from concurrent
/// load → mutate → save cycles are detected.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Human-readable store name (e.g. "memory").
    fn name(&self) -> &str;

    async fn load(&self, session_id: &str) -> Result<Option<StoredSession>, CatError>;

    async fn save(
        &self,
        session_id: &str,
        blob: Value,
        expected_version: Option<u64>,
    ) -> Result<u64, CatError>;

    async fn delete(&self, session_id: &str) -> Result<bool, CatError>;
}
