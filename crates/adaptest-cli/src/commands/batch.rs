//! The `adaptest batch` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};

use adaptest_core::simulation::simulate_batch;

use super::{open_bank, Overrides};

pub fn execute(
    bank_path: PathBuf,
    thetas: String,
    replications: usize,
    seed: u64,
    output: Option<PathBuf>,
    overrides: Overrides,
) -> Result<()> {
    let true_thetas = parse_thetas(&thetas)?;
    if replications == 0 {
        anyhow::bail!("--replications must be at least 1");
    }
    let config = overrides.load()?;
    let bank = open_bank(&bank_path)?;

    eprintln!(
        "adaptest v{}: {} abilities x {} replications ({})",
        env!("CARGO_PKG_VERSION"),
        true_thetas.len(),
        replications,
        config.termination.method
    );

    let report = simulate_batch(&true_thetas, replications, &bank, &config, seed)?;

    let mut table = Table::new();
    table.set_header(vec!["True θ", "Runs", "Mean θ̂", "Bias", "RMSE", "Mean length"]);
    for stats in &report.conditional {
        table.add_row(vec![
            Cell::new(format!("{:.2}", stats.true_theta)),
            Cell::new(stats.runs),
            Cell::new(format!("{:.3}", stats.mean_estimate)),
            Cell::new(format!("{:+.3}", stats.bias)),
            Cell::new(format!("{:.3}", stats.rmse)),
            Cell::new(format!("{:.1}", stats.mean_length)),
        ]);
    }
    println!("{table}");

    if let Some(path) = output {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&path, json)
            .with_context(|| format!("failed to write report: {}", path.display()))?;
        eprintln!("Results saved to: {}", path.display());
    }

    Ok(())
}

fn parse_thetas(input: &str) -> Result<Vec<f64>> {
    let thetas = input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .ok()
                .filter(|t| t.is_finite())
                .with_context(|| format!("invalid ability: {s}"))
        })
        .collect::<Result<Vec<_>>>()?;
    if thetas.is_empty() {
        anyhow::bail!("no abilities given");
    }
    Ok(thetas)
}
