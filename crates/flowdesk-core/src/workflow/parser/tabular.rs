//! Tabular export dialect.
//!
//! ```text
//! <meta name="name">Service Desk</meta>
//! <meta name="jira.update.author.key">admin</meta>
//! workflow-name  step-id  step-name  step-category  transition-id  transition-name  from-step-name  to-step-name  condition
//! ```
//!
//! Columns are tab-separated. Every row names a step, which defines a status
//! on first occurrence. Rows that also carry transition columns define a
//! transition; repeating a transition id adds another condition to it.
//! Statuses are collected from all rows before transitions are resolved, so a
//! row may point at a step defined further down.

use std::fmt::Write as _;

use flowdesk_types::workflow::{Condition, StatusCategory, Transition, WorkflowConfig};
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::reader::Reader;

use super::xml::read_attributes;
use super::{ConfigBuilder, Location, ParseError};

const COLUMNS: usize = 9;
const MIN_COLUMNS: usize = 4;

const HEADER: [&str; COLUMNS] = [
    "workflow-name",
    "step-id",
    "step-name",
    "step-category",
    "transition-id",
    "transition-name",
    "from-step-name",
    "to-step-name",
    "condition",
];

/// Meta keys with a fixed meaning; everything else is kept as a `key=value` tag.
const RESERVED_META: [&str; 5] = ["name", "description", "initial-status", "initial", "tag"];

struct Row {
    line: usize,
    workflow_name: String,
    step_name: String,
    step_category: String,
    transition_id: String,
    transition_name: String,
    from: String,
    to: String,
    condition: String,
}

impl Row {
    fn has_transition(&self) -> bool {
        !(self.transition_id.is_empty()
            && self.transition_name.is_empty()
            && self.from.is_empty()
            && self.to.is_empty())
    }
}

pub(crate) fn parse_tabular(raw: &str) -> Result<WorkflowConfig, ParseError> {
    let mut rows = Vec::new();
    let mut metas: Vec<(usize, String, String)> = Vec::new();
    let mut header_seen = false;

    for (idx, line) in raw.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = line.trim_start_matches('\u{feff}').trim();
        // A data row always has tabs, whatever its first cell says.
        if trimmed.is_empty() || (trimmed.starts_with('#') && !trimmed.contains('\t')) {
            continue;
        }
        if trimmed.starts_with("<meta") {
            let (key, value) = parse_meta_line(trimmed, line_no)?;
            metas.push((line_no, key, value));
            continue;
        }
        if !header_seen && rows.is_empty() && is_header(line) {
            header_seen = true;
            continue;
        }
        rows.push(split_row(line.trim_end_matches('\r'), line_no)?);
    }

    let meta_name = metas
        .iter()
        .find(|(_, k, _)| k == "name")
        .map(|(_, _, v)| v.trim().to_string());
    let name = meta_name
        .filter(|n| !n.is_empty())
        .or_else(|| {
            rows.iter()
                .map(|r| r.workflow_name.clone())
                .find(|n| !n.is_empty())
        })
        .ok_or_else(|| ParseError::MissingAttribute {
            location: Location::Document,
            attribute: "name".to_string(),
        })?;

    let mut builder = ConfigBuilder::new(name);

    // Pass 1: statuses, in first-seen order.
    for row in &rows {
        builder.status(&row.step_name, StatusCategory::from_label(&row.step_category));
    }

    // Pass 2: transitions.
    for row in rows.iter().filter(|r| !r.transition_id.is_empty()) {
        builder.reserve_transition_id(&row.transition_id);
    }
    for row in rows.iter().filter(|r| r.has_transition()) {
        add_transition(&mut builder, row)?;
    }

    for (line_no, key, value) in metas {
        let value = value.trim().to_string();
        match key.as_str() {
            "name" => {}
            "description" => {
                if !value.is_empty() {
                    builder.config_mut().description = Some(value);
                }
            }
            "initial-status" | "initial" => {
                let id = builder
                    .status_id(&value)
                    .ok_or_else(|| ParseError::UnknownStatus {
                        location: Location::Line(line_no),
                        name: value.clone(),
                    })?
                    .to_string();
                builder.config_mut().initial_status_id = Some(id);
            }
            "tag" => builder.config_mut().tags.push(value),
            _ => builder.config_mut().tags.push(format!("{key}={value}")),
        }
    }

    Ok(builder.finish())
}

/// The header is recognised by its first two cells, so a workflow that is
/// itself called "Workflow" still parses as data.
fn is_header(line: &str) -> bool {
    let mut cells = line.split('\t').map(|c| c.trim().to_ascii_lowercase());
    let first = cells.next().unwrap_or_default();
    let second = cells.next().unwrap_or_default();
    matches!(first.as_str(), "workflow-name" | "workflow" | "workflow name")
        && matches!(second.as_str(), "step-id" | "step id")
}

fn split_row(line: &str, line_no: usize) -> Result<Row, ParseError> {
    let mut cells: Vec<String> = line.split('\t').map(|c| c.trim().to_string()).collect();
    if cells.len() < MIN_COLUMNS {
        return Err(ParseError::MalformedRow {
            location: Location::Line(line_no),
            message: format!(
                "expected at least {MIN_COLUMNS} tab-separated columns, found {}",
                cells.len()
            ),
        });
    }
    if cells.len() > COLUMNS {
        return Err(ParseError::MalformedRow {
            location: Location::Line(line_no),
            message: format!("expected at most {COLUMNS} columns, found {}", cells.len()),
        });
    }
    cells.resize(COLUMNS, String::new());

    let mut cells = cells.into_iter();
    let mut next = || cells.next().unwrap_or_default();
    let workflow_name = next();
    let _step_id = next();
    let row = Row {
        line: line_no,
        workflow_name,
        step_name: next(),
        step_category: next(),
        transition_id: next(),
        transition_name: next(),
        from: next(),
        to: next(),
        condition: next(),
    };

    if row.step_name.is_empty() {
        return Err(ParseError::MalformedRow {
            location: Location::Line(line_no),
            message: "step name is empty".to_string(),
        });
    }
    if row.has_transition() {
        for (column, value) in [
            ("transition-name", &row.transition_name),
            ("from-step-name", &row.from),
            ("to-step-name", &row.to),
        ] {
            if value.is_empty() {
                return Err(ParseError::MalformedRow {
                    location: Location::Line(line_no),
                    message: format!("transition row is missing '{column}'"),
                });
            }
        }
    }
    Ok(row)
}

fn add_transition(builder: &mut ConfigBuilder, row: &Row) -> Result<(), ParseError> {
    let resolve = |builder: &ConfigBuilder, name: &str| {
        builder
            .status_id(name)
            .map(str::to_string)
            .ok_or_else(|| ParseError::UnknownStatus {
                location: Location::Line(row.line),
                name: name.to_string(),
            })
    };
    let from = resolve(builder, &row.from)?;
    let to = resolve(builder, &row.to)?;
    let condition = classify_condition_label(&row.condition);

    if !row.transition_id.is_empty() {
        if let Some(existing) = builder.transition_mut(&row.transition_id) {
            if existing.from_status_id != from
                || existing.to_status_id != to
                || existing.name != row.transition_name
            {
                return Err(ParseError::MalformedRow {
                    location: Location::Line(row.line),
                    message: format!(
                        "transition id '{}' reused for a different transition",
                        row.transition_id
                    ),
                });
            }
            existing.conditions.extend(condition);
            return Ok(());
        }
    }

    let id = if row.transition_id.is_empty() {
        builder.next_transition_id()
    } else {
        row.transition_id.clone()
    };
    builder.push_transition(Transition {
        id,
        name: row.transition_name.clone(),
        from_status_id: from,
        to_status_id: to,
        conditions: condition.into_iter().collect(),
        post_functions: Vec::new(),
    });
    Ok(())
}

fn parse_meta_line(line: &str, line_no: usize) -> Result<(String, String), ParseError> {
    let mut reader = Reader::from_str(line);
    let mut key: Option<String> = None;
    let mut value = String::new();

    let syntax = |message: String| ParseError::Syntax {
        location: Location::Line(line_no),
        message,
    };

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"meta" => {
                let attrs = read_attributes(&e).map_err(syntax)?;
                key = attrs.into_iter().find(|(k, _)| k == "name").map(|(_, v)| v);
            }
            Ok(Event::Text(text)) => {
                let text = text
                    .unescape()
                    .map_err(|e| syntax(format!("bad meta value: {e}")))?;
                value.push_str(&text);
            }
            Ok(Event::CData(data)) => {
                value.push_str(&String::from_utf8_lossy(&data.into_inner()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(syntax(format!("bad meta line: {e}"))),
        }
    }

    let key = key.ok_or_else(|| ParseError::MissingAttribute {
        location: Location::Line(line_no),
        attribute: "name".to_string(),
    })?;
    Ok((key, value))
}

// ---------------------------------------------------------------------------
// Condition labels
// ---------------------------------------------------------------------------

/// Map a free-text condition label onto a typed condition.
///
/// Recognized shapes (case-insensitive): `Only Assignee`,
/// `Has permission: X`, `Role: X`, `Field X required`. Anything else is kept
/// verbatim as `legacy.label`. The original text is always retained in the
/// `label` parameter. Blank labels produce no condition.
pub fn classify_condition_label(label: &str) -> Option<Condition> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let lower = label.to_ascii_lowercase();

    let after_prefix = |prefixes: &[&str]| {
        prefixes.iter().find_map(|p| {
            lower
                .starts_with(p)
                .then(|| label[p.len()..].trim().to_string())
                .filter(|rest| !rest.is_empty())
        })
    };

    let condition = if matches!(
        lower.as_str(),
        "only assignee" | "assignee only" | "only the assignee" | "actor is assignee"
    ) {
        Condition::new("actor_is_assignee")
    } else if let Some(permission) = after_prefix(&["has permission:", "permission:"]) {
        Condition::new("actor_has_permission").with_param("permission", permission)
    } else if let Some(role) = after_prefix(&["user in role:", "has role:", "role:"]) {
        Condition::new("actor_has_role").with_param("role", role)
    } else if let Some(field) = lower
        .strip_prefix("field ")
        .and_then(|rest| rest.strip_suffix(" required"))
        .map(|_| label["field ".len()..label.len() - " required".len()].trim())
        .filter(|f| !f.is_empty())
    {
        Condition::new("field_not_empty").with_param("field", field)
    } else {
        Condition::new("legacy.label")
    };

    Some(condition.with_param("label", label))
}

fn condition_label(condition: &Condition) -> String {
    if let Some(label) = condition.param("label") {
        return label.to_string();
    }
    match (condition.kind.as_str(), condition.parameters.iter().next()) {
        ("actor_is_assignee", _) => "Only Assignee".to_string(),
        ("actor_has_permission", _) => format!(
            "Has permission: {}",
            condition.param("permission").unwrap_or_default()
        ),
        ("actor_has_role", _) => format!("Role: {}", condition.param("role").unwrap_or_default()),
        ("field_not_empty", _) => {
            format!("Field {} required", condition.param("field").unwrap_or_default())
        }
        (kind, None) => kind.to_string(),
        (kind, Some(_)) => {
            let params: Vec<String> = condition
                .parameters
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            format!("{kind}({})", params.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Write a config back out in the tabular dialect.
///
/// Every status gets its own row first (preserving order and category), then
/// one row per transition condition. Post-functions have no tabular column
/// and are not exported.
pub fn export_tabular(config: &WorkflowConfig) -> String {
    let mut out = String::new();

    let mut meta = |key: &str, value: &str| {
        let _ = writeln!(
            out,
            "<meta name=\"{}\">{}</meta>",
            escape(key),
            escape(&cell(value))
        );
    };
    meta("name", &config.name);
    if let Some(description) = &config.description {
        meta("description", description);
    }
    if let Some(initial) = config
        .initial_status_id
        .as_deref()
        .and_then(|id| config.status(id))
    {
        meta("initial-status", &initial.name);
    }
    for tag in &config.tags {
        match tag.split_once('=') {
            Some((key, value)) if !key.is_empty() && !RESERVED_META.contains(&key) => {
                meta(key, value)
            }
            _ => meta("tag", tag),
        }
    }

    out.push_str(&HEADER.join("\t"));
    out.push('\n');

    let workflow = cell(&config.name);
    for (idx, status) in config.statuses.iter().enumerate() {
        let _ = writeln!(
            out,
            "{workflow}\t{}\t{}\t{}\t\t\t\t\t",
            idx + 1,
            cell(&status.name),
            status.category
        );
    }

    for transition in &config.transitions {
        let (Some(from), Some(to)) = (
            config.status(&transition.from_status_id),
            config.status(&transition.to_status_id),
        ) else {
            continue;
        };
        let step = config
            .statuses
            .iter()
            .position(|s| s.id == from.id)
            .map(|i| i + 1)
            .unwrap_or_default();
        let labels: Vec<String> = if transition.conditions.is_empty() {
            vec![String::new()]
        } else {
            transition.conditions.iter().map(condition_label).collect()
        };
        for label in labels {
            let _ = writeln!(
                out,
                "{workflow}\t{step}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                cell(&from.name),
                from.category,
                cell(&transition.id),
                cell(&transition.name),
                cell(&from.name),
                cell(&to.name),
                cell(&label)
            );
        }
    }

    out
}

fn cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
