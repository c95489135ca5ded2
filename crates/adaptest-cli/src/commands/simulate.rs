//! The `adaptest simulate` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};
use serde::Serialize;

use adaptest_core::scale::ScoreReport;
use adaptest_core::simulation::{simulate_session, SimulationRun};

use super::{format_se, open_bank, Overrides};

#[derive(Serialize)]
struct SimulationOutput {
    run: SimulationRun,
    score: ScoreReport,
}

pub fn execute(
    bank_path: PathBuf,
    theta: f64,
    seed: u64,
    format: String,
    overrides: Overrides,
) -> Result<()> {
    let config = overrides.load()?;
    let bank = open_bank(&bank_path)?;

    let run = simulate_session(theta, &bank, &config, seed)?;
    let score = ScoreReport::from_theta(run.estimate, run.standard_error, &config.scale);

    if format == "json" {
        let output = SimulationOutput { run, score };
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "Simulated {} session (seed {seed}, max {} items, target SE {})",
        config.termination.method, config.termination.max_items, config.termination.target_se
    );

    let mut table = Table::new();
    table.set_header(vec![
        "True θ", "Estimate", "SE", "Items", "Correct", "Reason", "Score", "Grade",
    ]);
    table.add_row(vec![
        Cell::new(format!("{:.2}", run.true_theta)),
        Cell::new(format!("{:.3}", run.estimate)),
        Cell::new(format_se(run.standard_error)),
        Cell::new(run.items_administered),
        Cell::new(run.correct),
        Cell::new(run.reason),
        Cell::new(format!("{:.1}", score.score)),
        Cell::new(&score.grade),
    ]);

    println!("{table}");
    Ok(())
}
