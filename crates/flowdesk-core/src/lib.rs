//! Business logic and repository trait definitions for Flowdesk.
//!
//! This crate defines the "ports" (repository traits) that the infrastructure
//! layer implements. It depends only on `flowdesk-types` -- never on
//! `flowdesk-infra` or any database/IO crate.

pub mod engine;
pub mod event;
pub mod report;
pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
