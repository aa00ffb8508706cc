//! Workflow definition types for Flowdesk.
//!
//! Defines the canonical representation of a workflow: both import dialects
//! (tabular and XML exports) converge on `WorkflowConfig`. The executable
//! graph is purely statuses, transitions, conditions, and post-functions;
//! canvas layout never lives here.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle state of a stored workflow version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Editable, not yet runnable.
    Draft,
    /// The runnable version. Immutable.
    Active,
    /// Superseded by a newer active version.
    Archived,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowStatus::Draft => write!(f, "draft"),
            WorkflowStatus::Active => write!(f, "active"),
            WorkflowStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(WorkflowStatus::Draft),
            "active" => Ok(WorkflowStatus::Active),
            "archived" => Ok(WorkflowStatus::Archived),
            other => Err(format!("unknown workflow status: '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Reporting category of a status. Never used for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    New,
    InProgress,
    Done,
    /// The source named a category we could not classify.
    Undefined,
}

impl StatusCategory {
    /// Map free-form category text from an export onto the closed set.
    ///
    /// Matching is case-insensitive and ignores surrounding whitespace.
    /// Unrecognized text maps to `Undefined`.
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "new" | "to_do" | "todo" | "open" => StatusCategory::New,
            "in_progress" | "inprogress" | "indeterminate" => StatusCategory::InProgress,
            "done" | "complete" | "completed" | "closed" => StatusCategory::Done,
            _ => StatusCategory::Undefined,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCategory::New => "new",
            StatusCategory::InProgress => "in_progress",
            StatusCategory::Done => "done",
            StatusCategory::Undefined => "undefined",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Canonical id, unique within the config.
    pub id: String,
    /// Display name. Status identity in imports is by name.
    pub name: String,
    pub category: StatusCategory,
}

// ---------------------------------------------------------------------------
// Conditions and post-functions
// ---------------------------------------------------------------------------

/// A named predicate gating a transition.
///
/// Dispatched by `kind` against the engine's condition table. Unknown kinds
/// are treated as not satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl Condition {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

/// A named side effect executed after a transition's conditions pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFunction {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl PostFunction {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// A named, directed edge between two statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Unique within the config.
    pub id: String,
    pub name: String,
    pub from_status_id: String,
    pub to_status_id: String,
    /// Evaluated in order; all must hold.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Executed strictly in order after the conditions pass.
    #[serde(default)]
    pub post_functions: Vec<PostFunction>,
}

// ---------------------------------------------------------------------------
// WorkflowConfig (canonical definition)
// ---------------------------------------------------------------------------

/// The canonical, versioned workflow definition.
///
/// Identity of a stored definition is `(id, version)`. Once a version is
/// `Active` its content never changes; edits produce a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// UUIDv7 assigned by the registry. `Uuid::nil()` means not yet registered.
    pub id: Uuid,
    pub organization_id: String,
    /// Kind of entity governed (e.g. "ticket", "incident", "change", "asset").
    pub entity_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Monotonically increasing per `id`, starting at 1.
    pub version: u32,
    pub status: WorkflowStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Explicitly designated initial status. Falls back to the first status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_status_id: Option<String>,
    /// Ordered by first appearance in the source.
    pub statuses: Vec<Status>,
    pub transitions: Vec<Transition>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
}

impl WorkflowConfig {
    /// An unregistered draft with no graph yet.
    pub fn draft(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::nil(),
            organization_id: String::new(),
            entity_type: String::new(),
            name: name.into(),
            description: None,
            version: 1,
            status: WorkflowStatus::Draft,
            tags: Vec::new(),
            initial_status_id: None,
            statuses: Vec::new(),
            transitions: Vec::new(),
            created_at: Utc::now(),
            activated_at: None,
        }
    }

    pub fn status(&self, id: &str) -> Option<&Status> {
        self.statuses.iter().find(|s| s.id == id)
    }

    pub fn status_by_name(&self, name: &str) -> Option<&Status> {
        self.statuses.iter().find(|s| s.name == name)
    }

    pub fn transition(&self, id: &str) -> Option<&Transition> {
        self.transitions.iter().find(|t| t.id == id)
    }

    /// The status new executions start in.
    pub fn initial_status(&self) -> Option<&Status> {
        match &self.initial_status_id {
            Some(id) => self.status(id),
            None => self.statuses.first(),
        }
    }

    /// Transitions leaving `status_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, status_id: &'a str) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.from_status_id == status_id)
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }

    /// Dialect-independent description of the graph by status names.
    ///
    /// Edges whose endpoints do not resolve are left out.
    pub fn outline(&self) -> WorkflowOutline {
        let statuses = self.statuses.iter().map(|s| s.name.clone()).collect();
        let edges = self
            .transitions
            .iter()
            .filter_map(|t| {
                let from = self.status(&t.from_status_id)?;
                let to = self.status(&t.to_status_id)?;
                Some((from.name.clone(), to.name.clone()))
            })
            .collect();
        WorkflowOutline { statuses, edges }
    }
}

/// Status names and `from -> to` name edges of a config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOutline {
    pub statuses: BTreeSet<String>,
    pub edges: BTreeSet<(String, String)>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
