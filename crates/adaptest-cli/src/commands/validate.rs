//! The `adaptest validate` command.

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};

use adaptest_core::bank::ItemBankSet;
use adaptest_core::parser::{load_bank_directory, parse_item_bank, validate_item_bank};

pub fn execute(bank_path: PathBuf) -> Result<()> {
    let banks = if bank_path.is_dir() {
        load_bank_directory(&bank_path)?
    } else {
        vec![parse_item_bank(&bank_path)?]
    };

    let mut table = Table::new();
    table.set_header(vec!["Bank", "Name", "Items", "Difficulty", "Mean a", "Areas", "Warnings"]);

    let mut findings = Vec::new();
    for bank in &banks {
        let warnings = validate_item_bank(bank);
        table.add_row(vec![
            Cell::new(&bank.id),
            Cell::new(&bank.name),
            Cell::new(bank.items.len()),
            Cell::new(difficulty_range(bank)),
            Cell::new(mean_discrimination(bank)),
            Cell::new(content_areas(bank)),
            Cell::new(warnings.len()),
        ]);
        findings.extend(warnings.into_iter().map(|w| (bank.id.as_str(), w)));
    }

    println!("{table}");
    let total_items: usize = banks.iter().map(|b| b.items.len()).sum();
    println!("{} bank(s), {total_items} items", banks.len());

    if findings.is_empty() {
        println!("All item banks valid.");
        return Ok(());
    }
    println!();
    for (bank_id, warning) in &findings {
        println!("  {bank_id}: WARNING {warning}");
    }
    println!("\n{} warning(s) found.", findings.len());
    Ok(())
}

fn difficulty_range(bank: &ItemBankSet) -> String {
    let finite = bank.items.iter().map(|i| i.b).filter(|b| b.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), b| {
        (lo.min(b), hi.max(b))
    });
    if min > max {
        "-".to_string()
    } else {
        format!("{min:.2} .. {max:.2}")
    }
}

fn mean_discrimination(bank: &ItemBankSet) -> String {
    if bank.items.is_empty() {
        return "-".to_string();
    }
    let sum: f64 = bank.items.iter().map(|i| i.a).sum();
    format!("{:.2}", sum / bank.items.len() as f64)
}

fn content_areas(bank: &ItemBankSet) -> String {
    let areas: BTreeSet<&str> = bank
        .items
        .iter()
        .filter_map(|i| i.content_area.as_deref())
        .collect();
    if areas.is_empty() {
        "-".to_string()
    } else {
        areas.into_iter().collect::<Vec<_>>().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptest_core::model::ItemParams;

    fn bank(items: Vec<ItemParams>) -> ItemBankSet {
        ItemBankSet {
            id: "b".into(),
            name: "B".into(),
            description: String::new(),
            items,
        }
    }

    #[test]
    fn summary_columns() {
        let set = bank(vec![
            ItemParams::new("q1", 1.0, -1.5, 0.2).with_content_area("linear"),
            ItemParams::new("q2", 2.0, 0.75, 0.2).with_content_area("functions"),
            ItemParams::new("q3", 1.5, f64::NAN, 0.2).with_content_area("linear"),
        ]);
        assert_eq!(difficulty_range(&set), "-1.50 .. 0.75");
        assert_eq!(mean_discrimination(&set), "1.50");
        assert_eq!(content_areas(&set), "functions, linear");
    }

    #[test]
    fn empty_bank_summary() {
        let set = bank(Vec::new());
        assert_eq!(difficulty_range(&set), "-");
        assert_eq!(mean_discrimination(&set), "-");
        assert_eq!(content_areas(&set), "-");
    }
}
