use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::AppConfig;

/// Prefix for environment overrides, e.g. `TRELLIS__ROUTING__REDIRECT_STATUS=301`.
pub const ENV_PREFIX: &str = "TRELLIS";

/// Load configuration from a file using the config crate, layered with
/// `TRELLIS__*` environment overrides.
/// Supports multiple formats: YAML, JSON, TOML, INI.
pub async fn load_config(config_path: &str) -> Result<AppConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously
pub fn load_config_sync(config_path: &str) -> Result<AppConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let app_config: AppConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    #[tokio::test]
    async fn test_load_toml_config() {
        let toml_content = r#"
debug = true

[routing]
redirect_trailing_slash = false

[middleware]
queue_capacity = 4
"#;

        let mut temp_file = NamedTempFile::with_suffix(".toml").unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert!(config.debug);
        assert!(!config.routing.redirect_trailing_slash);
        assert_eq!(config.routing.redirect_status, 308);
        assert_eq!(config.middleware.queue_capacity, 4);
    }

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
websocket:
  not_found_close_code: 4404
logging:
  level: debug
  json: true
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config_sync(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.websocket.not_found_close_code, 4404);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config_sync("/definitely/not/here.toml").unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here.toml"));
    }
}
