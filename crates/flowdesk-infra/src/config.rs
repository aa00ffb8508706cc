//! Data directory resolution and `config.toml` loading.

use std::path::{Path, PathBuf};

use flowdesk_types::config::GlobalConfig;

/// Resolve the data directory.
///
/// Priority:
/// 1. `FLOWDESK_DATA_DIR` environment variable
/// 2. `~/.flowdesk`
/// 3. `./.flowdesk`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLOWDESK_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".flowdesk");
    }

    PathBuf::from(".flowdesk")
}

/// Load `{data_dir}/config.toml`.
///
/// A missing file yields [`GlobalConfig::default()`]. An unreadable or
/// malformed file logs a warning and also yields the default.
pub async fn load_global_config(data_dir: &Path) -> GlobalConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return GlobalConfig::default();
        }
    };

    match toml::from_str::<GlobalConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", config_path.display());
            GlobalConfig::default()
        }
    }
}
