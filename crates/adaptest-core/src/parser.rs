//! TOML item bank parser.
//!
//! Loads item banks from TOML files and directories, and validates their
//! calibrations.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bank::ItemBankSet;
use crate::model::ItemParams;

/// Intermediate TOML structure for parsing item bank files.
#[derive(Debug, Deserialize)]
struct TomlBankFile {
    bank: TomlBankHeader,
    #[serde(default)]
    items: Vec<TomlItem>,
}

#[derive(Debug, Deserialize)]
struct TomlBankHeader {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    /// Guessing parameter for items that don't set one.
    #[serde(default)]
    default_c: f64,
}

#[derive(Debug, Deserialize)]
struct TomlItem {
    id: String,
    a: f64,
    b: f64,
    #[serde(default)]
    c: Option<f64>,
    #[serde(default)]
    content_area: Option<String>,
}

/// Parse a single TOML file into an `ItemBankSet`.
pub fn parse_item_bank(path: &Path) -> Result<ItemBankSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read item bank file: {}", path.display()))?;

    parse_item_bank_str(&content, path)
}

/// Parse a TOML string into an `ItemBankSet`.
pub fn parse_item_bank_str(content: &str, source_path: &Path) -> Result<ItemBankSet> {
    let parsed: TomlBankFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let default_c = parsed.bank.default_c;
    let items = parsed
        .items
        .into_iter()
        .map(|item| ItemParams {
            id: item.id,
            a: item.a,
            b: item.b,
            c: item.c.unwrap_or(default_c),
            content_area: item.content_area,
        })
        .collect();

    Ok(ItemBankSet {
        id: parsed.bank.id,
        name: parsed.bank.name,
        description: parsed.bank.description,
        items,
    })
}

/// Recursively load all `.toml` item bank files from a directory.
pub fn load_bank_directory(dir: &Path) -> Result<Vec<ItemBankSet>> {
    let mut banks = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            banks.extend(load_bank_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_item_bank(&path) {
                Ok(bank) => banks.push(bank),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    banks.sort_by(|l, r| l.id.cmp(&r.id));
    Ok(banks)
}

/// Load a bank file, or every bank in a directory merged into one.
pub fn load_item_bank(path: &Path) -> Result<ItemBankSet> {
    if !path.is_dir() {
        return parse_item_bank(path);
    }
    let banks = load_bank_directory(path)?;
    if banks.is_empty() {
        anyhow::bail!("no item banks found in {}", path.display());
    }
    let name = banks
        .iter()
        .map(|b| b.name.as_str())
        .collect::<Vec<_>>()
        .join(" + ");
    Ok(ItemBankSet {
        id: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "merged".to_string()),
        name,
        description: String::new(),
        items: banks.into_iter().flat_map(|b| b.items).collect(),
    })
}

/// A warning from item bank validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The item ID (if applicable).
    pub item_id: Option<String>,
    /// Warning message.
    pub message: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.item_id {
            Some(id) => write!(f, "[{id}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Validate an item bank for calibration problems.
///
/// Degenerate items still load; the engine clamps them at use, but they
/// should be fixed at ingestion.
pub fn validate_item_bank(bank: &ItemBankSet) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let warn = |item: &ItemParams, message: String| ValidationWarning {
        item_id: Some(item.id.clone()),
        message,
    };

    if bank.items.is_empty() {
        warnings.push(ValidationWarning {
            item_id: None,
            message: "item bank has no items".into(),
        });
    }

    let mut seen_ids = HashSet::new();
    for item in &bank.items {
        if !seen_ids.insert(&item.id) {
            warnings.push(warn(item, format!("duplicate item ID: {}", item.id)));
        }
        if item.id.trim().is_empty() {
            warnings.push(warn(item, "item ID is empty".into()));
        }
        if !(item.a.is_finite() && item.a > 0.0) {
            warnings.push(warn(
                item,
                format!("discrimination a = {} must be positive", item.a),
            ));
        }
        if !item.b.is_finite() {
            warnings.push(warn(item, format!("difficulty b = {} is not finite", item.b)));
        }
        if !(item.c.is_finite() && (0.0..1.0).contains(&item.c)) {
            warnings.push(warn(
                item,
                format!("guessing c = {} must lie in [0, 1)", item.c),
            ));
        }
    }

    warnings
}
