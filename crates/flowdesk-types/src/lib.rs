//! Shared domain types for Flowdesk.
//!
//! This crate contains the core domain types of the workflow subsystem:
//! the canonical `WorkflowConfig` graph, execution and audit records,
//! validation results, engine events, global configuration, and the
//! associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod validation;
pub mod workflow;
