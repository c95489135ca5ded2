//! In-memory item bank.

use std::collections::HashSet;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::model::ItemParams;
use crate::traits::{CandidateFilter, ItemBank};

/// A named collection of calibrated items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemBankSet {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub items: Vec<ItemParams>,
}

/// Item bank backed by a vector, with in-place recalibration.
///
/// Sessions snapshot item parameters when they record an attempt, so
/// recalibrating here never changes a session's history.
#[derive(Debug, Default)]
pub struct InMemoryItemBank {
    items: RwLock<Vec<ItemParams>>,
}

impl InMemoryItemBank {
    pub fn new(items: Vec<ItemParams>) -> Self {
        Self {
            items: RwLock::new(items),
        }
    }

    pub fn from_set(set: &ItemBankSet) -> Self {
        Self::new(set.items.clone())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Replace the calibration of one item. Returns `false` if it is unknown.
    pub fn recalibrate(&self, id: &str, a: f64, b: f64, c: f64) -> bool {
        let mut items = self
            .items
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match items.iter_mut().find(|item| item.id == id) {
            Some(item) => {
                item.a = a;
                item.b = b;
                item.c = c;
                true
            }
            None => false,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<ItemParams>> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ItemBank for InMemoryItemBank {
    fn candidates(
        &self,
        exclude_ids: &HashSet<String>,
        filter: &CandidateFilter,
    ) -> Vec<ItemParams> {
        self.read()
            .iter()
            .filter(|item| !exclude_ids.contains(&item.id) && filter.matches(item))
            .cloned()
            .collect()
    }

    fn get(&self, id: &str) -> Option<ItemParams> {
        self.read().iter().find(|item| item.id == id).cloned()
    }
}
