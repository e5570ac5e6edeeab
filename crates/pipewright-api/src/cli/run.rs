//! `pwr run`: execute a plan file against the local store and report node outcomes.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use pipewright_types::execution::NodeExecution;
use pipewright_types::plan::Plan;
use pipewright_types::status::Status;

use crate::state::AppState;

/// Run a plan to completion and print the node-status summary.
///
/// # Examples
///
/// ```bash
/// pwr run release.json
/// pwr run release.json --timeout-secs 60 --json
/// ```
pub async fn run_plan(
    state: &AppState,
    path: &Path,
    timeout_secs: Option<u64>,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    let plan: Plan = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid plan in {}", path.display()))?;

    let handle = state.engine.start_plan(plan).await?;
    tracing::info!(plan_execution_id = %handle.plan_execution_id, "plan started");
    if !json && !quiet {
        println!();
        println!(
            "  {} Plan execution {}",
            style("▶").cyan().bold(),
            style(handle.plan_execution_id).cyan()
        );
    }

    let finished = state.engine.await_plan(handle.plan_execution_id);
    let status = match timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), finished)
            .await
            .with_context(|| format!("Plan did not finish within {secs}s"))??,
        None => finished.await?,
    };

    let nodes = state
        .engine
        .list_node_executions(handle.plan_execution_id, false)
        .await?;

    if json {
        let summary = serde_json::json!({
            "plan_execution_id": handle.plan_execution_id,
            "status": status,
            "nodes": nodes,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        print_summary(status, &nodes);
    }

    if status != Status::Succeeded {
        bail!("plan execution {} finished {status}", handle.plan_execution_id);
    }
    Ok(())
}

fn print_summary(status: Status, nodes: &[NodeExecution]) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Node").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Retry").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Failure").fg(Color::White),
    ]);

    for node in nodes {
        let duration = match (node.started_at, node.ended_at) {
            (Some(started), Some(ended)) => format!("{}ms", (ended - started).num_milliseconds()),
            (Some(_), None) => "running".to_string(),
            _ => "-".to_string(),
        };
        let failure = node
            .failure
            .as_ref()
            .map(|f| f.message.clone())
            .unwrap_or_default();

        table.add_row(vec![
            Cell::new(&node.node_id).fg(Color::Cyan),
            Cell::new(node.status.to_string()).fg(status_color(node.status)),
            Cell::new(node.retry_index.to_string()).fg(Color::DarkGrey),
            Cell::new(duration).fg(Color::DarkGrey),
            Cell::new(failure).fg(Color::Red),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  Finished {} ({} node{})",
        style(status.to_string()).fg(console_color(status)).bold(),
        nodes.len(),
        if nodes.len() == 1 { "" } else { "s" }
    );
    println!();
}

fn status_color(status: Status) -> Color {
    match status {
        Status::Succeeded => Color::Green,
        Status::Failed | Status::Errored | Status::Expired => Color::Red,
        Status::Aborted => Color::Magenta,
        Status::Skipped => Color::DarkGrey,
        Status::Paused | Status::InterventionWaiting => Color::Yellow,
        _ => Color::Blue,
    }
}

fn console_color(status: Status) -> console::Color {
    match status {
        Status::Succeeded => console::Color::Green,
        Status::Aborted => console::Color::Magenta,
        _ => console::Color::Red,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_plan(dir: &TempDir, plan: serde_json::Value) -> std::path::PathBuf {
        let path = dir.path().join("plan.json");
        tokio::fs::write(&path, plan.to_string()).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_run_plan_succeeds() {
        let dir = TempDir::new().unwrap();
        let state = AppState::open(dir.path().join("data")).await.unwrap();
        let path = write_plan(
            &dir,
            serde_json::json!({
                "root_node_id": "root",
                "nodes": [
                    {"id": "root", "step_type": "section", "step_parameters": {"child": "leaf"}},
                    {"id": "leaf", "step_type": "noop"},
                ],
            }),
        )
        .await;

        run_plan(&state, &path, Some(10), true, false).await.unwrap();
        state.engine.shutdown();
    }

    #[tokio::test]
    async fn test_run_plan_reports_unfinished_wait() {
        let dir = TempDir::new().unwrap();
        let state = AppState::open(dir.path().join("data")).await.unwrap();
        let path = write_plan(
            &dir,
            serde_json::json!({
                "root_node_id": "gate",
                "nodes": [{"id": "gate", "step_type": "wait", "step_parameters": {"callback_ids": ["never"]}}],
            }),
        )
        .await;

        let err = run_plan(&state, &path, Some(1), true, true).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
        state.engine.shutdown();
    }

    #[tokio::test]
    async fn test_run_plan_rejects_missing_file() {
        let dir = TempDir::new().unwrap();
        let state = AppState::open(dir.path().join("data")).await.unwrap();
        let err = run_plan(&state, &dir.path().join("absent.json"), None, true, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read plan file"));
    }

    #[test]
    fn test_status_colors() {
        assert_eq!(status_color(Status::Succeeded), Color::Green);
        assert_eq!(status_color(Status::Expired), Color::Red);
        assert_eq!(status_color(Status::TaskWaiting), Color::Blue);
    }
}
