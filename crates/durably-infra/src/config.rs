//! Global configuration loader for durably.
//!
//! Reads `config.toml` from the data directory (`~/.durably/` in production)
//! and deserializes it into [`GlobalConfig`]. Falls back to sensible defaults
//! when the file is missing or malformed.

use std::path::{Path, PathBuf};

use durably_types::config::GlobalConfig;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "DURABLY_DATA_DIR";

/// Errors resolving on-disk locations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot determine home directory; set {DATA_DIR_ENV}")]
    NoHomeDir,

    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolve the data directory: `DURABLY_DATA_DIR`, else `~/.durably`.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".durably"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Create the data directory if it does not exist yet.
pub async fn ensure_data_dir(dir: &Path) -> Result<(), ConfigError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ConfigError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })
}

/// Database URL: the configured `database_url`, else `{data_dir}/durably.db`.
pub fn database_url(config: &GlobalConfig, data_dir: &Path) -> String {
    match &config.database_url {
        Some(url) => url.clone(),
        None => format!("sqlite://{}?mode=rwc", data_dir.join("durably.db").display()),
    }
}

/// Load global configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`GlobalConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
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
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            GlobalConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_global_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.condition_max_attempts, 10);
        assert_eq!(config.idempotency_ttl_secs, 86_400);
        assert!(config.endpoints.command_url.is_none());
    }

    #[tokio::test]
    async fn load_global_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(
            &config_path,
            r#"
approval_timeout_secs = 120
condition_poll_interval_secs = 5

[endpoints]
command_url = "http://localhost:9000/command"
"#,
        )
        .await
        .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.approval_timeout_secs, 120);
        assert_eq!(config.condition_poll_interval_secs, 5);
        // Unset fields keep their defaults.
        assert_eq!(config.command_timeout_secs, 3_600);
        assert_eq!(
            config.endpoints.command_url.as_deref(),
            Some("http://localhost:9000/command")
        );
    }

    #[tokio::test]
    async fn load_global_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config_path = tmp.path().join("config.toml");
        tokio::fs::write(&config_path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_global_config(tmp.path()).await;
        assert_eq!(config.approval_timeout_secs, 3_600);
    }

    #[test]
    fn database_url_defaults_to_data_dir() {
        let config = GlobalConfig::default();
        let url = database_url(&config, Path::new("/tmp/durably"));
        assert_eq!(url, "sqlite:///tmp/durably/durably.db?mode=rwc");

        let config = GlobalConfig {
            database_url: Some("sqlite::memory:".to_string()),
            ..GlobalConfig::default()
        };
        assert_eq!(database_url(&config, Path::new("/tmp/durably")), "sqlite::memory:");
    }

    #[tokio::test]
    async fn ensure_data_dir_creates_nested_dirs() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("a").join("b");
        ensure_data_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
    }
}
