//! Subcommand implementations.

pub mod batch;
pub mod init;
pub mod score;
pub mod simulate;
pub mod validate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use adaptest_core::bank::InMemoryItemBank;
use adaptest_core::config::{load_config_from, AdaptestConfig};
use adaptest_core::model::EstimationMethod;
use adaptest_core::parser::{load_item_bank, validate_item_bank};

/// Settings that override the config file for one run.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Config file path
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Estimation method: mle, map, eap
    #[arg(long)]
    pub method: Option<EstimationMethod>,

    /// Maximum test length
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Stop once the standard error falls below this
    #[arg(long)]
    pub target_se: Option<f64>,

    /// Only consider items within this distance of the current ability
    #[arg(long)]
    pub window: Option<f64>,
}

impl Overrides {
    pub fn load(&self) -> Result<AdaptestConfig> {
        let mut config = load_config_from(self.config.as_deref())?;
        if let Some(method) = self.method {
            config.termination.method = method;
        }
        if let Some(max_items) = self.max_items {
            config.termination.max_items = max_items;
        }
        if let Some(target_se) = self.target_se {
            config.termination.target_se = target_se;
        }
        if let Some(window) = self.window {
            config.selection.difficulty_window = Some(window);
        }
        Ok(config)
    }
}

/// Load an item bank, logging calibration warnings.
pub fn open_bank(path: &Path) -> Result<InMemoryItemBank> {
    let set = load_item_bank(path)
        .with_context(|| format!("failed to load item bank: {}", path.display()))?;
    for warning in validate_item_bank(&set) {
        tracing::warn!(bank = %set.id, "{warning}");
    }
    if set.items.is_empty() {
        anyhow::bail!("item bank {} has no items", set.id);
    }
    tracing::debug!(bank = %set.id, items = set.items.len(), "item bank loaded");
    Ok(InMemoryItemBank::from_set(&set))
}

pub fn format_se(se: Option<f64>) -> String {
    se.map(|se| format!("{se:.3}"))
        .unwrap_or_else(|| "-".to_string())
}
