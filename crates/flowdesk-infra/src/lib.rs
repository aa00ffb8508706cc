//! Infrastructure layer for Flowdesk.
//!
//! Implements the repository traits defined in `flowdesk-core` on SQLite, and
//! resolves the data directory and `config.toml`.

pub mod config;
pub mod sqlite;
