//! Global configuration types for flowdesk.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls
//! engine timeouts, terminal categories, history paging and the HTTP listener.

use serde::{Deserialize, Serialize};

/// Top-level configuration. Loaded from `~/.flowdesk/config.toml`; all fields have defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub history: HistorySettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Per post-function deadline, in milliseconds.
    #[serde(default = "default_post_function_timeout_ms")]
    pub post_function_timeout_ms: u64,

    /// Per condition deadline, in milliseconds.
    #[serde(default = "default_condition_timeout_ms")]
    pub condition_timeout_ms: u64,

    /// Status categories that mark an execution completed.
    #[serde(default = "default_terminal_categories")]
    pub terminal_categories: Vec<String>,

    /// Register the permissive `legacy.label` condition handler.
    #[serde(default)]
    pub accept_legacy_conditions: bool,
}

fn default_post_function_timeout_ms() -> u64 {
    5_000
}

fn default_condition_timeout_ms() -> u64 {
    2_000
}

fn default_terminal_categories() -> Vec<String> {
    vec!["done".to_string()]
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            post_function_timeout_ms: default_post_function_timeout_ms(),
            condition_timeout_ms: default_condition_timeout_ms(),
            terminal_categories: default_terminal_categories(),
            accept_legacy_conditions: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySettings {
    /// Page size for `recent_by_organization`.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
}

fn default_recent_limit() -> u32 {
    50
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}
