//! Configuration loading from disk.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {}", ValidationErrors(.0))]
    Validation(Vec<ValidationError>),
}

struct ValidationErrors<'a>(&'a [ValidationError]);

impl fmt::Display for ValidationErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Load and validate proxy entries from a TOML file.
pub fn load_config(path: &Path) -> Result<Vec<ProxyConfig>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&content)
}

/// Parse and validate proxy entries from TOML text, ordered by port.
pub fn parse_config(content: &str) -> Result<Vec<ProxyConfig>, ConfigError> {
    let tables: BTreeMap<String, ProxyConfig> = toml::from_str(content)?;

    let mut errors = Vec::new();
    let mut configs = Vec::with_capacity(tables.len());
    for (key, mut config) in tables {
        match key.trim().parse::<u16>() {
            Ok(port) => {
                config.port = port;
                configs.push(config);
            }
            Err(_) => errors.push(ValidationError::InvalidPortKey(key)),
        }
    }
    configs.sort_by_key(|c| c.port);

    if let Err(mut invalid) = validate_config(&configs) {
        errors.append(&mut invalid);
    }
    if !errors.is_empty() {
        return Err(ConfigError::Validation(errors));
    }
    Ok(configs)
}

/// Validate a single entry built from command-line flags.
pub fn single_entry(config: ProxyConfig) -> Result<Vec<ProxyConfig>, ConfigError> {
    let configs = vec![config];
    validate_config(&configs).map_err(ConfigError::Validation)?;
    Ok(configs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn parses_tables_keyed_by_port() {
        let configs = parse_config(
            r#"
            [9090]
            target = "https://api.example.com/v1"

            [8080]
            target = "http://localhost:9000"
            hold = "1m30s"
            nolog = ["^/health$", "\\.png$"]
            "#,
        )
        .unwrap();

        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].port, 8080);
        assert_eq!(configs[0].hold, Duration::from_secs(90));
        assert_eq!(configs[0].exclude_patterns, vec!["^/health$", "\\.png$"]);
        assert_eq!(configs[1].port, 9090);
        assert_eq!(configs[1].hold, Duration::ZERO);
        assert!(configs[1].exclude_patterns.is_empty());
    }

    #[test]
    fn accepts_exclude_alias() {
        let configs = parse_config(
            r#"
            [8080]
            target = "http://localhost:9000"
            exclude = ["^/ping$"]
            "#,
        )
        .unwrap();
        assert_eq!(configs[0].exclude_patterns, vec!["^/ping$"]);
    }

    #[test]
    fn rejects_bad_hold() {
        let err = parse_config(
            r#"
            [8080]
            target = "http://localhost:9000"
            hold = "soon"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_non_numeric_key_and_equivalent_ports() {
        let err = parse_config(
            r#"
            [web]
            target = "http://localhost:9000"

            [8080]
            target = "http://localhost:9001"

            ["08080"]
            target = "http://localhost:9002"
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.contains(&ValidationError::InvalidPortKey("web".into())));
                assert!(errors.contains(&ValidationError::DuplicatePort(8080)));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/hdproxy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hdproxy.toml");
        fs::write(&path, "[8080]\ntarget = \"http://localhost:9000\"\nhold = \"2s\"\n").unwrap();

        let configs = load_config(&path).unwrap();
        assert_eq!(configs, vec![ProxyConfig::new(8080, "http://localhost:9000").with_hold(Duration::from_secs(2))]);
    }

    #[test]
    fn single_entry_validates_target() {
        assert!(single_entry(ProxyConfig::new(8080, "http://localhost:9000")).is_ok());
        assert!(matches!(
            single_entry(ProxyConfig::new(8080, "::bad::")),
            Err(ConfigError::Validation(_))
        ));
    }
}
