//! Engine configuration.
//!
//! Loaded from `adaptest.toml`; every table and field is optional.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::estimator::EstimatorConfig;
use crate::model::EstimationMethod;
use crate::scale::ScaleConfig;
use crate::selection::{ContentBalance, ItemSelector, Randomesque, SelectionConfig};
use crate::session::SessionDefaults;
use crate::termination::{MinimumItems, StandardTermination, TerminationPolicy, TimeLimit};

/// Selection settings, including optional exposure control and content
/// balancing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionSettings {
    /// Keep only items within this distance of θ before ranking.
    #[serde(default)]
    pub difficulty_window: Option<f64>,
    /// Randomesque exposure control over the top k items.
    #[serde(default)]
    pub randomesque_top_k: Option<usize>,
    /// Target share of the test per content area.
    #[serde(default)]
    pub content_targets: HashMap<String, f64>,
}

/// Stopping rule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationSettings {
    #[serde(default = "default_method")]
    pub method: EstimationMethod,
    #[serde(default = "default_initial_theta")]
    pub initial_theta: f64,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default = "default_target_se")]
    pub target_se: f64,
    /// Suppress precision stops until this many items were administered.
    #[serde(default)]
    pub min_items: Option<usize>,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    pub time_limit_secs: Option<u64>,
}

fn default_method() -> EstimationMethod {
    EstimationMethod::Eap
}
fn default_initial_theta() -> f64 {
    0.0
}
fn default_max_items() -> usize {
    20
}
fn default_target_se() -> f64 {
    0.3
}

impl Default for TerminationSettings {
    fn default() -> Self {
        Self {
            method: default_method(),
            initial_theta: default_initial_theta(),
            max_items: default_max_items(),
            target_se: default_target_se(),
            min_items: None,
            time_limit_secs: None,
        }
    }
}

/// Top-level adaptest configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptestConfig {
    #[serde(default)]
    pub estimator: EstimatorConfig,
    #[serde(default)]
    pub selection: SelectionSettings,
    #[serde(default)]
    pub termination: TerminationSettings,
    #[serde(default)]
    pub scale: ScaleConfig,
}

impl AdaptestConfig {
    /// Settings for new sessions.
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            initial_theta: self.termination.initial_theta,
            estimation_method: self.termination.method,
            max_items: self.termination.max_items,
            target_se: self.termination.target_se,
            estimator: self.estimator,
        }
    }

    /// Selector with the configured post-filters. `seed` drives randomesque
    /// exposure control.
    pub fn selector(&self, seed: u64) -> ItemSelector {
        let mut selector = ItemSelector::new(SelectionConfig {
            difficulty_window: self.selection.difficulty_window,
        });
        if !self.selection.content_targets.is_empty() {
            selector = selector.with_policy(ContentBalance::new(
                self.selection.content_targets.clone(),
            ));
        }
        if let Some(k) = self.selection.randomesque_top_k {
            selector = selector.with_policy(Randomesque::new(k, seed));
        }
        selector
    }

    /// The configured stopping rule.
    pub fn termination_policy(&self) -> Box<dyn TerminationPolicy> {
        let mut policy: Box<dyn TerminationPolicy> = Box::new(StandardTermination);
        if let Some(min) = self.termination.min_items {
            policy = Box::new(MinimumItems::new(min, policy));
        }
        if let Some(secs) = self.termination.time_limit_secs {
            let limit = chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX));
            policy = Box::new(TimeLimit::new(limit, policy));
        }
        policy
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `adaptest.toml` in the current directory
/// 2. `~/.config/adaptest/config.toml`
///
/// Environment variable overrides: `ADAPTEST_METHOD`, `ADAPTEST_MAX_ITEMS`,
/// `ADAPTEST_TARGET_SE`.
pub fn load_config() -> Result<AdaptestConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<AdaptestConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("adaptest.toml");
        if local.exists() {
            Some(local)
        } else if let Some(home) = dirs_path() {
            let global = home.join("config.toml");
            if global.exists() {
                Some(global)
            } else {
                None
            }
        } else {
            None
        }
    };

    let mut config = match config_path {
        Some(path) => parse_config_file(&path)?,
        None => AdaptestConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config
        .estimator
        .validate()
        .context("invalid [estimator] settings")?;

    Ok(config)
}

fn parse_config_file(path: &Path) -> Result<AdaptestConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    toml::from_str::<AdaptestConfig>(&content)
        .with_context(|| format!("failed to parse config: {}", path.display()))
}

fn apply_env_overrides(
    config: &mut AdaptestConfig,
    var: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(method) = var("ADAPTEST_METHOD") {
        config.termination.method = method
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
            .context("invalid ADAPTEST_METHOD")?;
    }
    if let Some(max_items) = var("ADAPTEST_MAX_ITEMS") {
        config.termination.max_items = max_items
            .parse()
            .with_context(|| format!("invalid ADAPTEST_MAX_ITEMS: {max_items}"))?;
    }
    if let Some(target_se) = var("ADAPTEST_TARGET_SE") {
        config.termination.target_se = target_se
            .parse()
            .with_context(|| format!("invalid ADAPTEST_TARGET_SE: {target_se}"))?;
    }
    Ok(())
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("adaptest"))
}
