//! YAML configuration for a sync setup.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    core::persona::PersonaConfig,
    runtime::orchestrator::SyncOptions,
    types::{ProviderId, SyncMode},
};

/// Configuration load failure.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File is not valid YAML for its schema.
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// File parsed but failed validation.
    #[error("invalid config: {}", join(.0))]
    Invalid(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Top-level sync configuration.
///
/// ```yaml
/// callsign: KI7MT
/// database: qsosync.db
/// credentials_file: credentials.json
/// personas_file: personas.yaml
/// providers: [eqsl, lotw]
/// mode: both
/// options:
///   max_concurrency: 2
///   retry:
///     max_attempts: 3
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Station callsign the log belongs to.
    #[serde(default)]
    pub callsign: Option<String>,
    /// SQLite database holding the log and sync state.
    pub database: PathBuf,
    /// JSON credential file.
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    /// YAML persona file.
    #[serde(default)]
    pub personas_file: Option<PathBuf>,
    /// Enabled providers, in report order.
    pub providers: Vec<ProviderId>,
    /// Sync direction.
    #[serde(default)]
    pub mode: SyncMode,
    /// Run tuning.
    #[serde(default)]
    pub options: SyncOptions,
}

impl SyncConfig {
    /// Parses and validates YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = serde_yaml::from_str(text)?;
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Serializes back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Loads the persona file. No file configured means no personas.
    pub fn load_personas(&self) -> Result<PersonaConfig, ConfigError> {
        match &self.personas_file {
            Some(path) => PersonaConfig::load(path),
            None => Ok(PersonaConfig::default()),
        }
    }

    /// Every validation failure; empty when the config is usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut fail = |field: &str, message: &str| {
            errors.push(ValidationError {
                field: field.into(),
                message: message.into(),
            })
        };

        if self.providers.is_empty() {
            fail("providers", "at least one provider must be enabled");
        }
        for (idx, p) in self.providers.iter().enumerate() {
            if self.providers[..idx].contains(p) {
                fail("providers", &format!("{p} listed more than once"));
            }
        }
        if self.options.max_concurrency == 0 {
            fail("options.max_concurrency", "must be greater than 0");
        }
        if self.options.retry.max_attempts == 0 {
            fail("options.retry.max_attempts", "must be greater than 0");
        }
        if self.options.call_timeout_ms == 0 {
            fail("options.call_timeout_ms", "must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.options.retry.jitter_factor) {
            fail("options.retry.jitter_factor", "must be between 0 and 1");
        }
        if self.options.page_size == 0 {
            fail("options.page_size", "must be greater than 0");
        }
        if self.options.push_batch_size == 0 {
            fail("options.push_batch_size", "must be greater than 0");
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "database: log.db\nproviders: [qrz]\n";

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = SyncConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(cfg.mode, SyncMode::Pull);
        assert_eq!(cfg.options, SyncOptions::default());
        assert_eq!(cfg.providers, vec![ProviderId::Qrz]);
    }

    #[test]
    fn validation_collects_every_problem() {
        let text = "database: log.db
providers: [eqsl, eqsl]
options:
  max_concurrency: 0
  retry:
    max_attempts: 0
";
        let Err(ConfigError::Invalid(errors)) = SyncConfig::from_yaml_str(text) else {
            panic!("expected validation failure");
        };
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"providers"));
        assert!(fields.contains(&"options.max_concurrency"));
        assert!(fields.contains(&"options.retry.max_attempts"));
    }

    #[test]
    fn personas_load_from_the_configured_file() {
        let cfg = SyncConfig::from_yaml_str(MINIMAL).unwrap();
        assert!(cfg.load_personas().unwrap().personas.is_empty());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("personas.yaml");
        std::fs::write(&path, "version: 1\npersonas:\n  - id: home\n").unwrap();
        let text = format!("{MINIMAL}personas_file: {}\n", path.display());
        let cfg = SyncConfig::from_yaml_str(&text).unwrap();
        let personas = cfg.load_personas().unwrap();
        assert_eq!(personas.personas.len(), 1);
        assert!(personas.get("home").is_some());

        let missing = SyncConfig {
            personas_file: Some(dir.path().join("absent.yaml")),
            ..cfg
        };
        assert!(matches!(missing.load_personas(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn unknown_provider_is_a_parse_error() {
        let err = SyncConfig::from_yaml_str("database: x.db\nproviders: [hamqth]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
