//! Maximum-information item selection.
//!
//! Candidates are ranked by Fisher information at the current ability
//! estimate. Exposure control and content balancing are expressed as
//! [`SelectionPolicy`] post-filters over the ranked list, so the ranking math
//! itself never changes.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::irt;
use crate::model::{Attempt, ItemParams};

/// Selection settings.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// Keep only items with `|b - theta| <= difficulty_window` before ranking.
    #[serde(default)]
    pub difficulty_window: Option<f64>,
}

/// A candidate with its information at the ranking ability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub item: ItemParams,
    pub information: f64,
    /// `|b - theta|` at ranking time.
    pub distance: f64,
}

/// Ranked candidates, best first.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Ranking {
    pub items: Vec<RankedItem>,
    /// `true` when the difficulty window emptied the pool and the full
    /// unattempted pool was ranked instead.
    pub window_fallback: bool,
}

impl Ranking {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn best(&self) -> Option<&RankedItem> {
        self.items.first()
    }
}

/// Result of asking the selector for the next item.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    /// The item to administer next.
    Next(RankedItem),
    /// No unattempted item remains. The caller must terminate the session.
    Exhausted,
}

impl Selection {
    pub fn item(&self) -> Option<&ItemParams> {
        match self {
            Selection::Next(ranked) => Some(&ranked.item),
            Selection::Exhausted => None,
        }
    }
}

/// Context handed to post-filter policies.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext<'a> {
    pub theta: f64,
    /// Items administered so far in this session.
    pub history: &'a [Attempt],
}

/// A post-filter or re-weighting step over an already ranked candidate list.
///
/// Implementations must not return an empty list for a non-empty input.
pub trait SelectionPolicy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Reorder or filter `ranked`. The first element is administered.
    fn apply(&self, ctx: &PolicyContext<'_>, ranked: Vec<RankedItem>) -> Vec<RankedItem>;
}

/// Compare two ranked items: higher information first, then closer
/// difficulty, then smaller id.
fn rank_order(lhs: &RankedItem, rhs: &RankedItem) -> Ordering {
    rhs.information
        .total_cmp(&lhs.information)
        .then_with(|| lhs.distance.total_cmp(&rhs.distance))
        .then_with(|| lhs.item.id.cmp(&rhs.item.id))
}

fn rank(theta: f64, pool: &[&ItemParams]) -> Vec<RankedItem> {
    let mut ranked: Vec<RankedItem> = pool
        .iter()
        .map(|item| {
            let cal = item.sanitized();
            RankedItem {
                item: (*item).clone(),
                information: irt::item_information(theta, &cal),
                distance: (cal.b - theta).abs(),
            }
        })
        .collect();
    ranked.sort_by(rank_order);
    ranked
}

/// Rank unattempted candidates by information at `theta`.
///
/// Items whose id is in `exclude` are dropped first. If a difficulty window is
/// given and it leaves nothing, the full unattempted pool is ranked instead.
pub fn rank_candidates(
    theta: f64,
    candidates: &[ItemParams],
    exclude: &HashSet<String>,
    difficulty_window: Option<f64>,
) -> Ranking {
    let mut seen: HashSet<&str> = HashSet::new();
    let unattempted: Vec<&ItemParams> = candidates
        .iter()
        .filter(|item| !exclude.contains(&item.id))
        .filter(|item| seen.insert(&item.id))
        .collect();

    if unattempted.is_empty() {
        return Ranking::default();
    }

    if let Some(window) = difficulty_window {
        let windowed: Vec<&ItemParams> = unattempted
            .iter()
            .copied()
            .filter(|item| (item.b - theta).abs() <= window)
            .collect();
        if !windowed.is_empty() {
            return Ranking {
                items: rank(theta, &windowed),
                window_fallback: false,
            };
        }
        tracing::warn!(
            theta,
            window,
            pool = unattempted.len(),
            "difficulty window is empty, ranking the full unattempted pool"
        );
        return Ranking {
            items: rank(theta, &unattempted),
            window_fallback: true,
        };
    }

    Ranking {
        items: rank(theta, &unattempted),
        window_fallback: false,
    }
}

/// Pick the most informative unattempted item, or [`Selection::Exhausted`].
pub fn pick_best_item(
    theta: f64,
    candidates: &[ItemParams],
    exclude: &HashSet<String>,
    difficulty_window: Option<f64>,
) -> Selection {
    match rank_candidates(theta, candidates, exclude, difficulty_window)
        .items
        .into_iter()
        .next()
    {
        Some(best) => Selection::Next(best),
        None => Selection::Exhausted,
    }
}

/// Maximum-information selector with an ordered chain of post-filters.
#[derive(Default)]
pub struct ItemSelector {
    config: SelectionConfig,
    policies: Vec<Box<dyn SelectionPolicy>>,
}

impl std::fmt::Debug for ItemSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.policies.iter().map(|p| p.name()).collect();
        f.debug_struct("ItemSelector")
            .field("config", &self.config)
            .field("policies", &names)
            .finish()
    }
}

impl ItemSelector {
    pub fn new(config: SelectionConfig) -> Self {
        Self {
            config,
            policies: Vec::new(),
        }
    }

    /// Append a post-filter. Policies run in insertion order.
    pub fn with_policy(mut self, policy: impl SelectionPolicy + 'static) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// Rank `candidates` and run every policy over the result.
    pub fn rank(&self, theta: f64, candidates: &[ItemParams], history: &[Attempt]) -> Ranking {
        let exclude: HashSet<String> = history.iter().map(|a| a.item.id.clone()).collect();
        let mut ranking = rank_candidates(theta, candidates, &exclude, self.config.difficulty_window);
        let ctx = PolicyContext { theta, history };
        for policy in &self.policies {
            if ranking.items.is_empty() {
                break;
            }
            let before = ranking.items.clone();
            let after = policy.apply(&ctx, std::mem::take(&mut ranking.items));
            ranking.items = if after.is_empty() {
                tracing::warn!(policy = policy.name(), "policy emptied the ranking, ignoring it");
                before
            } else {
                after
            };
        }
        ranking
    }

    /// Select the next item to administer.
    pub fn select(&self, theta: f64, candidates: &[ItemParams], history: &[Attempt]) -> Selection {
        let ranking = self.rank(theta, candidates, history);
        match ranking.items.into_iter().next() {
            Some(best) => {
                tracing::debug!(
                    item = %best.item.id,
                    information = best.information,
                    theta,
                    "selected next item"
                );
                Selection::Next(best)
            }
            None => Selection::Exhausted,
        }
    }
}

// ---------------------------------------------------------------------------
// Exposure control
// ---------------------------------------------------------------------------

/// Randomesque exposure control: administer one of the `top_k` best items,
/// chosen with a seeded generator.
///
/// The draw depends only on the seed and the number of items already
/// administered, so replaying a session reproduces its item sequence.
#[derive(Debug, Clone)]
pub struct Randomesque {
    pub top_k: usize,
    pub seed: u64,
}

impl Randomesque {
    pub fn new(top_k: usize, seed: u64) -> Self {
        Self {
            top_k: top_k.max(1),
            seed,
        }
    }
}

impl SelectionPolicy for Randomesque {
    fn name(&self) -> &str {
        "randomesque"
    }

    fn apply(&self, ctx: &PolicyContext<'_>, mut ranked: Vec<RankedItem>) -> Vec<RankedItem> {
        let k = self.top_k.min(ranked.len());
        if k <= 1 {
            return ranked;
        }
        let mut rng = Pcg64::seed_from_u64(self.seed.wrapping_add(ctx.history.len() as u64));
        let pick = rng.random_range(0..k);
        let chosen = ranked.remove(pick);
        ranked.insert(0, chosen);
        ranked
    }
}

/// Drops items whose observed exposure rate exceeds `max_rate`.
///
/// Exposure counts come from the caller (usually aggregated by the item bank
/// across sessions).
#[derive(Debug, Clone)]
pub struct ExposureCap {
    pub max_rate: f64,
    /// Sessions each item has been administered in.
    pub exposures: HashMap<String, u64>,
    /// Sessions observed in total.
    pub sessions: u64,
}

impl ExposureCap {
    pub fn new(max_rate: f64, exposures: HashMap<String, u64>, sessions: u64) -> Self {
        Self {
            max_rate,
            exposures,
            sessions,
        }
    }

    /// Observed exposure rate of one item.
    pub fn rate(&self, item_id: &str) -> f64 {
        if self.sessions == 0 {
            return 0.0;
        }
        self.exposures.get(item_id).copied().unwrap_or(0) as f64 / self.sessions as f64
    }
}

impl SelectionPolicy for ExposureCap {
    fn name(&self) -> &str {
        "exposure-cap"
    }

    fn apply(&self, _ctx: &PolicyContext<'_>, ranked: Vec<RankedItem>) -> Vec<RankedItem> {
        let kept: Vec<RankedItem> = ranked
            .iter()
            .filter(|r| self.rate(&r.item.id) <= self.max_rate)
            .cloned()
            .collect();
        if kept.is_empty() {
            ranked
        } else {
            kept
        }
    }
}

// ---------------------------------------------------------------------------
// Content balancing
// ---------------------------------------------------------------------------

/// Kingsbury–Zara content balancing.
///
/// Finds the content area furthest below its target share of the test so far
/// and floats its items to the front, keeping information order inside each
/// group. Items without a content area are never promoted.
#[derive(Debug, Clone)]
pub struct ContentBalance {
    /// Target proportion of the test per content area.
    pub targets: HashMap<String, f64>,
}

impl ContentBalance {
    pub fn new(targets: HashMap<String, f64>) -> Self {
        Self { targets }
    }

    /// Content area with the largest deficit among those present in
    /// `available`. Ties resolve to the lexicographically smaller area.
    fn neediest_area(&self, history: &[Attempt], available: &HashSet<&str>) -> Option<String> {
        let total = history.len() as f64;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for attempt in history {
            if let Some(area) = attempt.item.content_area.as_deref() {
                *counts.entry(area).or_default() += 1;
            }
        }

        let mut best: Option<(&str, f64)> = None;
        for (area, &target) in &self.targets {
            if !available.contains(area.as_str()) {
                continue;
            }
            let observed = if total > 0.0 {
                counts.get(area.as_str()).copied().unwrap_or(0) as f64 / total
            } else {
                0.0
            };
            let deficit = target - observed;
            let better = match best {
                None => true,
                Some((best_area, best_deficit)) => {
                    deficit > best_deficit
                        || (deficit == best_deficit && area.as_str() < best_area)
                }
            };
            if better {
                best = Some((area.as_str(), deficit));
            }
        }
        best.map(|(area, _)| area.to_string())
    }
}

impl SelectionPolicy for ContentBalance {
    fn name(&self) -> &str {
        "content-balance"
    }

    fn apply(&self, ctx: &PolicyContext<'_>, ranked: Vec<RankedItem>) -> Vec<RankedItem> {
        let available: HashSet<&str> = ranked
            .iter()
            .filter_map(|r| r.item.content_area.as_deref())
            .collect();
        let Some(area) = self.neediest_area(ctx.history, &available) else {
            return ranked;
        };
        let (mut front, back): (Vec<RankedItem>, Vec<RankedItem>) = ranked
            .into_iter()
            .partition(|r| r.item.content_area.as_deref() == Some(area.as_str()));
        front.extend(back);
        front
    }
}
