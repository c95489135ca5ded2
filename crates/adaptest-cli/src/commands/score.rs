//! The `adaptest score` command.

use std::path::PathBuf;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use serde::Serialize;

use adaptest_core::config::load_config_from;
use adaptest_core::scale::ScoreReport;
use adaptest_core::session::Session;
use adaptest_core::traits::SessionStore;
use adaptest_store::FileSessionStore;

use super::format_se;

#[derive(Serialize)]
struct ScoreOutput {
    session_id: String,
    status: String,
    termination_reason: Option<String>,
    items_administered: usize,
    #[serde(flatten)]
    score: ScoreReport,
}

pub async fn execute(
    file: Option<PathBuf>,
    store: Option<PathBuf>,
    session_id: Option<String>,
    format: String,
    config: Option<PathBuf>,
) -> Result<()> {
    let config = load_config_from(config.as_deref())?;

    let session = match (file, store, session_id) {
        (Some(path), _, _) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read session: {}", path.display()))?;
            let blob: serde_json::Value = serde_json::from_str(&content)
                .with_context(|| format!("failed to parse session: {}", path.display()))?;
            Session::deserialize(blob)
                .with_context(|| format!("invalid session in {}", path.display()))?
        }
        (None, Some(dir), Some(id)) => {
            let store = FileSessionStore::open(&dir).await?;
            let stored = store
                .load(&id)
                .await?
                .with_context(|| format!("session {id} not found in {}", dir.display()))?;
            Session::deserialize(stored.blob)
                .with_context(|| format!("invalid stored session {id}"))?
        }
        _ => anyhow::bail!("pass either --file or --store with --session-id"),
    };

    let output = ScoreOutput {
        session_id: session.session_id().to_string(),
        status: session.status().to_string(),
        termination_reason: session.termination_reason().map(|r| r.to_string()),
        items_administered: session.attempt_count(),
        score: session.score(&config.scale),
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Session", "Status", "Items", "θ", "SE", "Score", "Percentile", "Grade",
    ]);
    table.add_row(vec![
        Cell::new(&output.session_id),
        Cell::new(
            output
                .termination_reason
                .as_deref()
                .unwrap_or(output.status.as_str()),
        ),
        Cell::new(output.items_administered),
        Cell::new(format!("{:.3}", output.score.theta)),
        Cell::new(format_se(output.score.standard_error)),
        Cell::new(format!("{:.1}", output.score.score)),
        Cell::new(format!("{:.1}", output.score.percentile)),
        Cell::new(&output.score.grade),
    ]);
    println!("{table}");
    Ok(())
}
