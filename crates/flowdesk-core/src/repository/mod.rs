//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (flowdesk-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod attempt;
pub mod execution;
pub mod workflow;

pub use attempt::AttemptStore;
pub use execution::ExecutionRepository;
pub use workflow::{PromoteOutcome, WorkflowRepository};
