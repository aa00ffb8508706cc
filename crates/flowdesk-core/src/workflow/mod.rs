//! Workflow definitions at rest.
//!
//! - `parser` -- tabular and XML export dialects into `WorkflowConfig`, plus tabular export
//! - `validator` -- pure structural checks gating activation
//! - `registry` -- versioned storage and the active-version lookup

pub mod parser;
pub mod registry;
pub mod validator;

pub use parser::{DialectHint, ParseError, export_tabular, parse};
pub use registry::WorkflowRegistry;
pub use validator::validate;
