//! `fdesk transition` -- request one transition from the command line.

use std::time::Duration;

use anyhow::Result;
use clap::Args;
use console::style;

use flowdesk_core::engine::TransitionRequest;
use flowdesk_types::execution::{Actor, ExecutionRef, FieldContext, PostFunctionOutcome, TransitionAttempt};

use super::{parse_field, print_json};
use crate::state::AppState;

#[derive(Args)]
pub struct TransitionArgs {
    /// Entity type (ticket, incident, change, asset, ...).
    pub entity_type: String,

    /// Entity id within the organization.
    pub entity_id: String,

    /// Transition id from the active workflow.
    pub transition_id: String,

    #[arg(long)]
    pub org: String,

    /// Id of the requesting user.
    #[arg(long)]
    pub actor: String,

    /// Role held by the actor (repeatable).
    #[arg(long = "role")]
    pub roles: Vec<String>,

    /// Permission held by the actor (repeatable).
    #[arg(long = "permission")]
    pub permissions: Vec<String>,

    /// Field value for conditions, as key=value (repeatable).
    #[arg(long = "field", value_parser = parse_field_arg)]
    pub fields: Vec<(String, serde_json::Value)>,

    /// Status id the entity is believed to be in.
    #[arg(long)]
    pub expect: Option<String>,

    /// Post-function timeout for this request, in milliseconds.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

fn parse_field_arg(raw: &str) -> Result<(String, serde_json::Value), String> {
    parse_field(raw).map_err(|e| e.to_string())
}

impl TransitionArgs {
    fn into_request(self) -> TransitionRequest {
        let actor = Actor {
            id: self.actor,
            roles: self.roles,
            permissions: self.permissions,
        };
        let fields: FieldContext = self.fields.into_iter().collect();
        let mut request = TransitionRequest::new(
            ExecutionRef::new(self.org, self.entity_type, self.entity_id),
            self.transition_id,
            actor,
        )
        .with_fields(fields);
        if let Some(expected) = self.expect {
            request = request.expecting(expected);
        }
        if let Some(ms) = self.timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms));
        }
        request
    }
}

pub async fn handle_transition(args: TransitionArgs, state: &AppState, json: bool) -> Result<()> {
    let entity = format!("{}/{}", args.entity_type, args.entity_id);
    let attempt = state.engine.request_transition(args.into_request()).await?;

    if json {
        return print_json(&attempt);
    }

    print_attempt(&entity, &attempt);
    Ok(())
}

fn print_attempt(entity: &str, attempt: &TransitionAttempt) {
    println!();
    match &attempt.reject_reason {
        None => {
            println!(
                "  {} {} {} -> {}",
                style("✓").green().bold(),
                style(entity).cyan(),
                attempt.from_status_id,
                style(attempt.to_status_id.as_deref().unwrap_or("?")).green()
            );
        }
        Some(reason) => {
            println!(
                "  {} {} {} rejected",
                style("✗").red().bold(),
                style(entity).cyan(),
                style(&attempt.transition_id).bold()
            );
            println!("  {} {}", style(reason.code()).red(), reason);
        }
    }

    for result in &attempt.post_function_results {
        match result.outcome {
            PostFunctionOutcome::Applied => {
                let effect = result
                    .effect
                    .as_ref()
                    .and_then(|e| serde_json::to_string(e).ok())
                    .unwrap_or_default();
                println!("    {} {} {}", style("+").green(), result.function_type, style(effect).dim());
            }
            PostFunctionOutcome::Failed => {
                println!(
                    "    {} {} {}",
                    style("!").red(),
                    result.function_type,
                    result.message.as_deref().unwrap_or_default()
                );
            }
        }
    }
    println!("  {}", style(format!("attempt {}", attempt.id)).dim());
    println!();
}
