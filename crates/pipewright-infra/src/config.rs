//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.pipewright/` in
//! production) into [`EngineConfig`]. A missing or malformed file falls back
//! to defaults so a fresh install starts without any setup.

use std::path::{Path, PathBuf};

use pipewright_types::config::EngineConfig;

use crate::sqlite::pool::database_url_in;

/// Environment variable that overrides the data directory.
pub const DATA_DIR_ENV: &str = "PIPEWRIGHT_DATA_DIR";

/// Resolve the data directory: `PIPEWRIGHT_DATA_DIR`, then `~/.pipewright`.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var_os(DATA_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pipewright"),
    }
}

/// Create the data directory if needed. SQLite creates the database file but
/// not its parent directories.
pub async fn ensure_data_dir(data_dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_dir).await
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`EngineConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config; omitted fields take their defaults.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config.toml found, using defaults");
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

/// The database URL to open: the config override if set, else the default
/// file inside `data_dir`.
pub fn resolve_database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config
        .database_url
        .clone()
        .unwrap_or_else(|| database_url_in(data_dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.event_bus_capacity, 1024);
        assert!(config.resource_constraints.is_empty());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join("config.toml"),
            r#"
default_task_timeout_secs = 45

[delegate]
base_url = "http://127.0.0.1:9000"
request_timeout_secs = 5

[[resource_constraints]]
key = "deploy"
capacity = 2
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_task_timeout_secs, 45);
        assert_eq!(config.delegate.base_url.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.delegate.request_timeout_secs, 5);
        assert_eq!(config.resource_constraints[0].key, "deploy");
        assert_eq!(config.timeout_sweep_interval_ms, 500);
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join("config.toml"), "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(tmp.path()).await;
        assert_eq!(config.default_task_timeout_secs, 600);
    }

    #[tokio::test]
    async fn ensure_data_dir_creates_nested_dirs() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_data_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn resolve_database_url_prefers_override() {
        let mut config = EngineConfig::default();
        let dir = Path::new("/srv/pw");
        assert_eq!(
            resolve_database_url(&config, dir),
            "sqlite:///srv/pw/pipewright.db?mode=rwc"
        );

        config.database_url = Some("sqlite://elsewhere.db".into());
        assert_eq!(resolve_database_url(&config, dir), "sqlite://elsewhere.db");
    }
}
