//! Engine configuration loader.
//!
//! Reads `conductor.toml` from the data directory (`~/.conductor/` by
//! default) into [`EngineConfig`]. A missing or malformed file yields the
//! defaults.

use std::path::Path;

use conductor_types::config::EngineConfig;

/// File name looked up inside the data directory.
pub const CONFIG_FILE: &str = "conductor.toml";

/// Load engine configuration from `{data_dir}/conductor.toml`.
///
/// - Missing file: [`EngineConfig::default()`].
/// - Unreadable or unparsable file: logs a warning and returns the default.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no conductor.toml, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            EngineConfig::default()
        }
    }
}

/// Store URL: the configured one, else `conductor.db` inside `persist_dir`,
/// else `None` for the in-memory store.
pub fn resolve_database_url(config: &EngineConfig, persist_dir: Option<&Path>) -> Option<String> {
    config.database_url.clone().or_else(|| {
        persist_dir.map(|dir| format!("sqlite://{}?mode=rwc", dir.join("conductor.db").display()))
    })
}
