use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{
    config::{ConfigError, ValidationError},
    types::{ProviderId, normalize_call},
};

/// Schema version written by [`PersonaConfig::to_yaml`].
pub const PERSONA_CONFIG_VERSION: u32 = 1;

/// A callsign held over an optional, inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallsignRange {
    /// Callsign, e.g. `"KI7MT"`.
    pub call: String,
    /// First day the callsign was used. Open when absent.
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Last day the callsign was used. Open when absent.
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl CallsignRange {
    /// True when `day` falls inside the range.
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.from.is_none_or(|from| from <= day) && self.to.is_none_or(|to| day <= to)
    }
}

/// Per-provider switches of a persona.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFlags {
    /// Whether this persona syncs with the provider.
    pub enabled: bool,
}

impl Default for ProviderFlags {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// An operating identity: the callsigns it used over time and the providers
/// it syncs with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    /// Stable id referenced by credentials.
    pub id: String,
    /// Display label.
    #[serde(default)]
    pub label: String,
    /// Callsign history.
    #[serde(default)]
    pub callsigns: Vec<CallsignRange>,
    /// Provider switches. Providers not listed are enabled.
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderFlags>,
}

impl Persona {
    /// Callsign in use on `day`. The first matching range wins.
    pub fn callsign_on(&self, day: NaiveDate) -> Option<&str> {
        self.callsigns
            .iter()
            .find(|r| r.covers(day))
            .map(|r| r.call.as_str())
    }

    /// Whether the persona syncs with `provider`.
    pub fn is_enabled(&self, provider: ProviderId) -> bool {
        self.providers
            .get(&provider)
            .copied()
            .unwrap_or_default()
            .enabled
    }
}

/// Root of the persona YAML file.
///
/// ```yaml
/// version: 1
/// personas:
///   - id: KI7MT
///     label: Home station
///     callsigns:
///       - call: KI7MT
///         from: 2015-06-01
///       - call: KD7ABC
///         to: 2015-05-31
///     providers:
///       clublog: { enabled: false }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Schema version; must be positive.
    pub version: u32,
    /// Configured personas.
    #[serde(default)]
    pub personas: Vec<Persona>,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            version: PERSONA_CONFIG_VERSION,
            personas: Vec::new(),
        }
    }
}

impl PersonaConfig {
    /// Parses and validates YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: PersonaConfig = serde_yaml::from_str(text)?;
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

    /// Persona by id.
    pub fn get(&self, id: &str) -> Option<&Persona> {
        self.personas.iter().find(|p| p.id == id)
    }

    /// Every validation failure; empty when the file is usable.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut fail = |field: String, message: &str| {
            errors.push(ValidationError {
                field,
                message: message.into(),
            })
        };

        if self.version == 0 {
            fail("version".into(), "must be greater than 0");
        }
        for (idx, persona) in self.personas.iter().enumerate() {
            let at = format!("personas[{idx}]");
            if persona.id.trim().is_empty() {
                fail(format!("{at}.id"), "must not be empty");
            }
            if self.personas[..idx].iter().any(|p| p.id == persona.id) {
                fail(format!("{at}.id"), "duplicate persona id");
            }
            for (r, range) in persona.callsigns.iter().enumerate() {
                if normalize_call(&range.call).is_empty() {
                    fail(format!("{at}.callsigns[{r}].call"), "must not be empty");
                }
                if let (Some(from), Some(to)) = (range.from, range.to) {
                    if from > to {
                        fail(format!("{at}.callsigns[{r}]"), "from is after to");
                    }
                }
            }
        }
        errors
    }
}
