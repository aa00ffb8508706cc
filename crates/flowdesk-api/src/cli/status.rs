//! Dashboard summary command.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Workflow, execution and attempt counts, plus where the data lives.
pub async fn status(state: &AppState, org: Option<&str>, json: bool) -> Result<()> {
    let stats = state.reporting().summary(org).await?;

    if json {
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "organization_id": org,
            "stats": stats,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} Flowdesk v{}", style("▸").bold(), env!("CARGO_PKG_VERSION"));
    if let Some(org) = org {
        println!("  Organization: {}", style(org).cyan());
    }
    println!();

    println!("  {}", style("── Workflows ──").dim());
    println!("  Versions: {}", style(stats.total_workflows).bold());
    println!("  Active:   {}", style(stats.active_workflows).green());
    println!();

    println!("  {}", style("── Executions ──").dim());
    println!("  Total:     {}", style(stats.total_executions).bold());
    println!("  Completed: {}", stats.completed_executions);
    println!();

    println!("  {}", style("── Attempts ──").dim());
    println!("  Applied:  {}", style(stats.applied_attempts).green());
    if stats.rejected_attempts > 0 {
        println!("  Rejected: {}", style(stats.rejected_attempts).yellow());
    }
    println!("  Success:  {:.1}%", stats.success_rate * 100.0);
    println!();

    println!("  {}", style("── System ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Database: {}", style("SQLite (WAL mode)").dim());
    println!();

    Ok(())
}
