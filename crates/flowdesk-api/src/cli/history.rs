//! `fdesk history ...` -- read-only views over the attempt ledger.

use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowdesk_core::repository::{AttemptStore, ExecutionRepository};
use flowdesk_types::execution::{AttemptOutcome, TransitionAttempt};

use super::{parse_id, print_json};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum HistoryCommand {
    /// Every attempt for one execution, oldest first.
    Execution { id: String },

    /// Every attempt against a workflow, oldest first.
    #[command(disable_version_flag = true)]
    Workflow {
        id: String,

        #[arg(long)]
        version: Option<u32>,
    },

    /// Newest attempts for an organization.
    Recent {
        #[arg(long)]
        org: String,

        /// Page size (default from config.toml).
        #[arg(long)]
        limit: Option<u32>,
    },
}

pub async fn handle_history_command(cmd: HistoryCommand, state: &AppState, json: bool) -> Result<()> {
    let attempts = match cmd {
        HistoryCommand::Execution { id } => {
            let id = parse_id(&id)?;
            if state.engine.executions().get_execution(&id).await?.is_none() {
                bail!("execution {id} not found");
            }
            state.engine.attempts().by_execution(&id).await?
        }
        HistoryCommand::Workflow { id, version } => {
            let id = parse_id(&id)?;
            state.engine.attempts().by_workflow(&id, version).await?
        }
        HistoryCommand::Recent { org, limit } => {
            let limit = limit.unwrap_or(state.config.history.recent_limit);
            state.engine.attempts().recent_by_organization(&org, limit).await?
        }
    };

    if json {
        return print_json(&attempts);
    }
    print_attempts(&attempts);
    Ok(())
}

fn print_attempts(attempts: &[TransitionAttempt]) {
    if attempts.is_empty() {
        println!();
        println!("  No attempts recorded.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Requested").fg(Color::Cyan),
            Cell::new("Transition"),
            Cell::new("From"),
            Cell::new("To"),
            Cell::new("Actor"),
            Cell::new("Outcome"),
            Cell::new("Reason"),
        ]);

    for a in attempts {
        let outcome = match a.outcome {
            AttemptOutcome::Applied => Cell::new("applied").fg(Color::Green),
            AttemptOutcome::Rejected => Cell::new("rejected").fg(Color::Red),
        };
        table.add_row(vec![
            Cell::new(a.requested_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&a.transition_id),
            Cell::new(&a.from_status_id),
            Cell::new(a.to_status_id.as_deref().unwrap_or("-")),
            Cell::new(&a.actor_id),
            outcome,
            Cell::new(a.reject_reason.as_ref().map(|r| r.code()).unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!("  {}", style(format!("{} attempt(s)", attempts.len())).dim());
    println!();
}
