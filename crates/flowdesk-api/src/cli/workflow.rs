//! `fdesk workflow ...` subcommands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use flowdesk_core::workflow::{DialectHint, export_tabular, parse, validate};
use flowdesk_types::validation::ValidationResult;
use flowdesk_types::workflow::{WorkflowConfig, WorkflowStatus};

use super::{parse_id, print_json};
use crate::state::AppState;

#[derive(Subcommand)]
pub enum WorkflowCommand {
    /// Parse an exported definition and store it as a draft.
    Import {
        /// Path to the tabular or XML export.
        file: PathBuf,

        /// Owning organization.
        #[arg(long)]
        org: String,

        /// Entity type the workflow governs (ticket, incident, change, asset, ...).
        #[arg(long)]
        entity_type: String,

        /// Force a dialect instead of sniffing the file.
        #[arg(long)]
        dialect: Option<DialectHint>,

        /// Store the import as the next version of an existing workflow.
        #[arg(long)]
        revision_of: Option<String>,

        /// Activate the stored version right away.
        #[arg(long)]
        activate: bool,
    },

    /// Parse and validate a file without storing it.
    Validate {
        file: PathBuf,

        #[arg(long)]
        dialect: Option<DialectHint>,
    },

    /// List stored workflow versions.
    #[command(alias = "ls")]
    List {
        #[arg(long)]
        org: Option<String>,
    },

    /// Show one version's statuses and transitions.
    #[command(disable_version_flag = true)]
    Show {
        id: String,

        /// Version to show (default: latest).
        #[arg(long)]
        version: Option<u32>,
    },

    /// Validate and activate a version.
    #[command(disable_version_flag = true)]
    Activate {
        id: String,

        /// Version to activate (default: latest).
        #[arg(long)]
        version: Option<u32>,
    },

    /// Archive a version.
    #[command(disable_version_flag = true)]
    Archive {
        id: String,

        #[arg(long)]
        version: u32,
    },

    /// Write a version back out in the tabular dialect.
    #[command(disable_version_flag = true)]
    Export {
        id: String,

        #[arg(long)]
        version: Option<u32>,

        /// Write to a file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

pub async fn handle_workflow_command(cmd: WorkflowCommand, state: &AppState, json: bool) -> Result<()> {
    match cmd {
        WorkflowCommand::Import {
            file,
            org,
            entity_type,
            dialect,
            revision_of,
            activate,
        } => {
            handle_import(
                state,
                &file,
                ImportScope { org, entity_type },
                dialect,
                revision_of.as_deref(),
                activate,
                json,
            )
            .await
        }
        WorkflowCommand::Validate { file, dialect } => handle_validate(&file, dialect, json).await,
        WorkflowCommand::List { org } => handle_list(state, org.as_deref(), json).await,
        WorkflowCommand::Show { id, version } => handle_show(state, &id, version, json).await,
        WorkflowCommand::Activate { id, version } => handle_activate(state, &id, version, json).await,
        WorkflowCommand::Archive { id, version } => handle_archive(state, &id, version, json).await,
        WorkflowCommand::Export { id, version, output } => {
            handle_export(state, &id, version, output.as_deref()).await
        }
    }
}

struct ImportScope {
    org: String,
    entity_type: String,
}

async fn read_and_parse(file: &Path, dialect: Option<DialectHint>) -> Result<WorkflowConfig> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    parse(&raw, dialect).with_context(|| format!("Failed to parse {}", file.display()))
}

async fn load_version(state: &AppState, id: &str, version: Option<u32>) -> Result<WorkflowConfig> {
    let id = parse_id(id)?;
    let config = match version {
        Some(v) => state.registry.get_by_id_version(&id, v).await?,
        None => state.registry.latest(&id).await?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Import / validate
// ---------------------------------------------------------------------------

async fn handle_import(
    state: &AppState,
    file: &Path,
    scope: ImportScope,
    dialect: Option<DialectHint>,
    revision_of: Option<&str>,
    activate: bool,
    json: bool,
) -> Result<()> {
    let mut parsed = read_and_parse(file, dialect).await?;
    parsed.organization_id = scope.org;
    parsed.entity_type = scope.entity_type;

    let revision_of = revision_of.map(parse_id).transpose()?;
    let stored = state.registry.import(parsed, revision_of.as_ref()).await?;

    let validation = validate(&stored);
    let stored = if activate {
        state.registry.activate(&stored.id, Some(stored.version)).await?
    } else {
        stored
    };

    if json {
        return print_json(&serde_json::json!({
            "workflow": stored,
            "validation": validation,
        }));
    }

    println!();
    println!(
        "  {} Stored '{}' v{} ({})",
        style("*").green().bold(),
        style(&stored.name).cyan(),
        stored.version,
        status_label(stored.status)
    );
    println!("  ID:          {}", stored.id);
    println!("  Scope:       {}/{}", stored.organization_id, stored.entity_type);
    println!("  Statuses:    {}", stored.statuses.len());
    println!("  Transitions: {}", stored.transitions.len());
    print_validation(&validation);
    if stored.status == WorkflowStatus::Draft && validation.ok {
        println!(
            "  Activate with: {}",
            style(format!("fdesk workflow activate {} --version {}", stored.id, stored.version)).dim()
        );
    }
    println!();
    Ok(())
}

async fn handle_validate(file: &Path, dialect: Option<DialectHint>, json: bool) -> Result<()> {
    let config = read_and_parse(file, dialect).await?;
    let result = validate(&config);

    if json {
        print_json(&result)?;
    } else {
        println!();
        println!(
            "  '{}': {} statuses, {} transitions",
            style(&config.name).cyan(),
            config.statuses.len(),
            config.transitions.len()
        );
        print_validation(&result);
        println!();
    }

    if !result.ok {
        bail!("{} validation error(s)", result.errors.len());
    }
    Ok(())
}

fn print_validation(result: &ValidationResult) {
    if result.ok && result.warnings.is_empty() {
        println!("  {} Valid", style("✓").green());
        return;
    }
    for issue in &result.errors {
        println!("  {} {} {}", style("✗").red(), style(issue.code).red().bold(), issue.message);
    }
    for issue in &result.warnings {
        println!("  {} {} {}", style("!").yellow(), style(issue.code).yellow(), issue.message);
    }
}

// ---------------------------------------------------------------------------
// List / show
// ---------------------------------------------------------------------------

async fn handle_list(state: &AppState, org: Option<&str>, json: bool) -> Result<()> {
    let configs = state.registry.list(org).await?;

    if json {
        let out: Vec<_> = configs
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.id,
                    "version": c.version,
                    "name": c.name,
                    "organization_id": c.organization_id,
                    "entity_type": c.entity_type,
                    "status": c.status,
                    "statuses": c.statuses.len(),
                    "transitions": c.transitions.len(),
                    "activated_at": c.activated_at,
                })
            })
            .collect();
        return print_json(&out);
    }

    if configs.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Import one with: {}",
            style("fdesk workflow import <file> --org <org> --entity-type <type>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Status"),
            Cell::new("Scope"),
            Cell::new("Statuses"),
            Cell::new("Transitions"),
            Cell::new("ID"),
        ]);

    for c in &configs {
        table.add_row(vec![
            Cell::new(&c.name),
            Cell::new(format!("v{}", c.version)),
            status_cell(c.status),
            Cell::new(format!("{}/{}", c.organization_id, c.entity_type)),
            Cell::new(c.statuses.len()),
            Cell::new(c.transitions.len()),
            Cell::new(c.id.to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

async fn handle_show(state: &AppState, id: &str, version: Option<u32>, json: bool) -> Result<()> {
    let config = load_version(state, id, version).await?;
    if json {
        return print_json(&config);
    }

    println!();
    println!(
        "  {} v{} ({})",
        style(&config.name).cyan().bold(),
        config.version,
        status_label(config.status)
    );
    if let Some(description) = &config.description {
        println!("  {}", style(description).dim());
    }
    println!("  Scope: {}/{}", config.organization_id, config.entity_type);
    if !config.tags.is_empty() {
        println!("  Tags:  {}", config.tags.join(", "));
    }
    println!();

    let initial = config.initial_status().map(|s| s.id.as_str());
    let mut statuses = Table::new();
    statuses
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_header(vec![Cell::new("Status").fg(Color::Cyan), Cell::new("Id"), Cell::new("Category")]);
    for s in &config.statuses {
        let name = if Some(s.id.as_str()) == initial {
            format!("{} (initial)", s.name)
        } else {
            s.name.clone()
        };
        statuses.add_row(vec![Cell::new(name), Cell::new(&s.id), Cell::new(s.category.as_str())]);
    }
    println!("{statuses}");

    let mut transitions = Table::new();
    transitions
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Transition").fg(Color::Cyan),
            Cell::new("Id"),
            Cell::new("From"),
            Cell::new("To"),
            Cell::new("Conditions"),
            Cell::new("Post-functions"),
        ]);
    let name_of = |id: &str| {
        config
            .status(id)
            .map(|s| s.name.clone())
            .unwrap_or_else(|| format!("?{id}"))
    };
    for t in &config.transitions {
        let conditions: Vec<&str> = t.conditions.iter().map(|c| c.kind.as_str()).collect();
        let functions: Vec<&str> = t.post_functions.iter().map(|f| f.kind.as_str()).collect();
        transitions.add_row(vec![
            Cell::new(&t.name),
            Cell::new(&t.id),
            Cell::new(name_of(&t.from_status_id)),
            Cell::new(name_of(&t.to_status_id)),
            Cell::new(conditions.join("\n")),
            Cell::new(functions.join("\n")),
        ]);
    }
    println!("{transitions}");
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

async fn handle_activate(state: &AppState, id: &str, version: Option<u32>, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let active = match state.registry.activate(&id, version).await {
        Ok(config) => config,
        Err(flowdesk_types::error::RegistryError::NotValid(errors)) if !json => {
            println!();
            for issue in &errors {
                println!("  {} {} {}", style("✗").red(), style(issue.code).red().bold(), issue.message);
            }
            println!();
            bail!("workflow {id} is not valid ({} error(s))", errors.len());
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        return print_json(&active);
    }
    println!();
    println!(
        "  {} '{}' v{} is now active for {}/{}",
        style("✓").green().bold(),
        style(&active.name).cyan(),
        active.version,
        active.organization_id,
        active.entity_type
    );
    println!();
    Ok(())
}

async fn handle_archive(state: &AppState, id: &str, version: u32, json: bool) -> Result<()> {
    let id = parse_id(id)?;
    let changed = state.registry.archive(&id, version).await?;

    if json {
        return print_json(&serde_json::json!({ "id": id, "version": version, "archived": changed }));
    }
    if changed {
        println!("  {} Archived {id} v{version}", style("✓").green());
    } else {
        println!("  {id} v{version} was already archived");
    }
    Ok(())
}

async fn handle_export(state: &AppState, id: &str, version: Option<u32>, output: Option<&Path>) -> Result<()> {
    let config = load_version(state, id, version).await?;
    let text = export_tabular(&config);
    match output {
        Some(path) => {
            tokio::fs::write(path, text)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("  Wrote {} v{} to {}", config.name, config.version, path.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Display helpers
// ---------------------------------------------------------------------------

fn status_label(status: WorkflowStatus) -> console::StyledObject<String> {
    let text = status.to_string();
    match status {
        WorkflowStatus::Active => style(text).green(),
        WorkflowStatus::Draft => style(text).yellow(),
        WorkflowStatus::Archived => style(text).dim(),
    }
}

fn status_cell(status: WorkflowStatus) -> Cell {
    let cell = Cell::new(status.to_string());
    match status {
        WorkflowStatus::Active => cell.fg(Color::Green),
        WorkflowStatus::Draft => cell.fg(Color::Yellow),
        WorkflowStatus::Archived => cell.fg(Color::DarkGrey),
    }
}
