//! Workflow definition parser.
//!
//! Two export dialects converge on one `WorkflowConfig`:
//! - `tabular` -- `<meta>` header lines followed by tab-separated transition rows
//! - `xml` -- nested `<workflow>/<steps>/<step>/<actions>/<action>` documents
//!
//! Status identity is by name. Both dialects feed a shared `ConfigBuilder`
//! that deduplicates statuses and hands out canonical ids in first-seen order.
//! A parse either returns a complete config or a `ParseError`; nothing is
//! partially committed.

pub mod tabular;
pub mod xml;

use std::collections::{HashMap, HashSet};
use std::fmt;

use flowdesk_types::workflow::{Status, StatusCategory, Transition, WorkflowConfig};
use thiserror::Error;

pub use tabular::export_tabular;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Where in the source a parse error was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// 1-based line number.
    Line(usize),
    /// Slash-separated element path, with the line it starts on.
    Element { path: String, line: usize },
    Document,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Line(line) => write!(f, "line {line}"),
            Location::Element { path, line } => write!(f, "<{path}> at line {line}"),
            Location::Document => write!(f, "document"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("workflow document is empty")]
    Empty,

    #[error("{location}: {message}")]
    Syntax { location: Location, message: String },

    #[error("{location}: missing required attribute '{attribute}'")]
    MissingAttribute {
        location: Location,
        attribute: String,
    },

    #[error("{location}: malformed row: {message}")]
    MalformedRow { location: Location, message: String },

    #[error("{location}: transition references unknown status '{name}'")]
    UnknownStatus { location: Location, name: String },

    #[error("{location}: invalid XML: {message}")]
    Xml { location: Location, message: String },
}

impl ParseError {
    pub fn location(&self) -> Option<&Location> {
        match self {
            ParseError::Empty => None,
            ParseError::Syntax { location, .. }
            | ParseError::MissingAttribute { location, .. }
            | ParseError::MalformedRow { location, .. }
            | ParseError::UnknownStatus { location, .. }
            | ParseError::Xml { location, .. } => Some(location),
        }
    }
}

// ---------------------------------------------------------------------------
// Dialect selection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialectHint {
    Tabular,
    Xml,
}

impl std::str::FromStr for DialectHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tabular" | "tsv" => Ok(DialectHint::Tabular),
            "xml" => Ok(DialectHint::Xml),
            other => Err(format!("unknown dialect '{other}' (expected tabular or xml)")),
        }
    }
}

/// Guess the dialect of a raw export.
///
/// A document whose first non-blank content is an XML declaration or a
/// `<workflow` element is XML. `<meta` header lines or tab characters mean
/// tabular. Anything else starting with `<` is treated as XML.
pub fn sniff(raw: &str) -> Option<DialectHint> {
    let head = raw.trim_start_matches('\u{feff}').trim_start();
    if head.is_empty() {
        return None;
    }
    if head.starts_with("<?xml") || head.starts_with("<workflow") || head.starts_with("<!--") {
        return Some(DialectHint::Xml);
    }
    if head.starts_with("<meta") || head.contains('\t') {
        return Some(DialectHint::Tabular);
    }
    if head.starts_with('<') {
        return Some(DialectHint::Xml);
    }
    Some(DialectHint::Tabular)
}

/// Parse an exported workflow definition.
///
/// The returned config is unregistered: nil id, version 1, `draft`, with
/// empty organization and entity type for the registry to fill in.
pub fn parse(raw: &str, hint: Option<DialectHint>) -> Result<WorkflowConfig, ParseError> {
    let dialect = match hint {
        Some(hint) => hint,
        None => sniff(raw).ok_or(ParseError::Empty)?,
    };
    tracing::debug!(?dialect, bytes = raw.len(), "parsing workflow definition");

    let config = match dialect {
        DialectHint::Tabular => tabular::parse_tabular(raw)?,
        DialectHint::Xml => xml::parse_xml(raw)?,
    };

    tracing::debug!(
        name = %config.name,
        statuses = config.statuses.len(),
        transitions = config.transitions.len(),
        "parsed workflow definition"
    );
    Ok(config)
}

// ---------------------------------------------------------------------------
// Shared builder
// ---------------------------------------------------------------------------

/// Accumulates statuses and transitions for either dialect.
pub(crate) struct ConfigBuilder {
    config: WorkflowConfig,
    by_name: HashMap<String, usize>,
    /// Explicit transition ids seen anywhere in the document.
    reserved_ids: HashSet<String>,
}

impl ConfigBuilder {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            config: WorkflowConfig::draft(name),
            by_name: HashMap::new(),
            reserved_ids: HashSet::new(),
        }
    }

    pub(crate) fn config_mut(&mut self) -> &mut WorkflowConfig {
        &mut self.config
    }

    /// Register a status by name, returning its canonical id.
    ///
    /// The first occurrence of a name fixes its id and category.
    pub(crate) fn status(&mut self, name: &str, category: StatusCategory) -> String {
        if let Some(&idx) = self.by_name.get(name) {
            return self.config.statuses[idx].id.clone();
        }
        let idx = self.config.statuses.len();
        let id = format!("status-{}", idx + 1);
        self.config.statuses.push(Status {
            id: id.clone(),
            name: name.to_string(),
            category,
        });
        self.by_name.insert(name.to_string(), idx);
        id
    }

    pub(crate) fn status_id(&self, name: &str) -> Option<&str> {
        self.by_name
            .get(name)
            .map(|&idx| self.config.statuses[idx].id.as_str())
    }

    pub(crate) fn transition_mut(&mut self, id: &str) -> Option<&mut Transition> {
        self.config.transitions.iter_mut().find(|t| t.id == id)
    }

    /// Keep an explicit id out of the generated sequence, even if the
    /// transition that carries it has not been pushed yet.
    pub(crate) fn reserve_transition_id(&mut self, id: &str) {
        self.reserved_ids.insert(id.to_string());
    }

    /// First `transition-N` (counting from the number of transitions so far)
    /// that no pushed or reserved transition uses.
    pub(crate) fn next_transition_id(&self) -> String {
        (self.config.transitions.len() + 1..)
            .map(|n| format!("transition-{n}"))
            .find(|id| !self.reserved_ids.contains(id) && !self.config.transitions.iter().any(|t| t.id == *id))
            .unwrap_or_default()
    }

    pub(crate) fn push_transition(&mut self, transition: Transition) {
        self.config.transitions.push(transition);
    }

    pub(crate) fn finish(self) -> WorkflowConfig {
        self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
