use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::types::ProviderId;

const SECRET_FIELDS: [&str; 3] = ["password", "api_key", "token"];

/// Credential store failure.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// File could not be read or written.
    #[error("credential file io: {0}")]
    Io(#[from] std::io::Error),
    /// File contents are not valid JSON.
    #[error("credential file format: {0}")]
    Serde(#[from] serde_json::Error),
    /// Lock poisoned.
    #[error("{0}")]
    Message(String),
}

/// Opaque credential fields for one provider.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Provider these credentials belong to.
    pub provider: ProviderId,
    /// Id of the persona these credentials act for, e.g. `"KI7MT"`.
    #[serde(default)]
    pub persona: Option<String>,
    /// Raw fields such as `username`, `password`, `api_key`.
    pub fields: BTreeMap<String, String>,
}

/// Username and password pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserPass<'a> {
    /// Account name.
    pub username: &'a str,
    /// Secret.
    pub password: &'a str,
}

/// Username and API key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiKey<'a> {
    /// Account name.
    pub username: &'a str,
    /// Secret.
    pub api_key: &'a str,
}

impl Credentials {
    /// Credentials with no persona.
    pub fn new<K, V>(provider: ProviderId, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            provider,
            persona: None,
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Sets the persona scope.
    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    /// Non-blank field value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// `username` + `password`, when both are present.
    pub fn user_pass(&self) -> Option<UserPass<'_>> {
        Some(UserPass {
            username: self.get("username")?,
            password: self.get("password")?,
        })
    }

    /// `expires_at` field parsed as RFC 3339, when present.
    pub fn expires_at(&self) -> Option<Result<DateTime<Utc>, chrono::ParseError>> {
        self.get("expires_at")
            .map(|raw| DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc)))
    }

    /// `username` + `api_key`, when both are present.
    pub fn api_key(&self) -> Option<ApiKey<'_>> {
        Some(ApiKey {
            username: self.get("username")?,
            api_key: self.get("api_key")?,
        })
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: BTreeMap<&str, &str> = self
            .fields
            .iter()
            .map(|(k, v)| {
                let shown = if SECRET_FIELDS.contains(&k.as_str()) { "***" } else { v.as_str() };
                (k.as_str(), shown)
            })
            .collect();
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("persona", &self.persona)
            .field("fields", &redacted)
            .finish()
    }
}

/// Non-secret health summary of a credential backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorReport {
    /// True when the backend can be read and written.
    pub ok: bool,
    /// Backend name.
    pub backend: String,
    /// Backend facts such as path and entry count. Never secrets.
    pub details: BTreeMap<String, String>,
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.backend, if self.ok { "ok" } else { "error" })?;
        for (k, v) in &self.details {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

/// Source of per-provider secrets. Read-only during a sync run.
pub trait CredentialStore: Send + Sync {
    /// Credentials for `provider`, if configured.
    fn get(&self, provider: ProviderId) -> Result<Option<Credentials>, CredentialError>;

    /// Stores or replaces credentials.
    fn put(&self, credentials: Credentials) -> Result<(), CredentialError>;

    /// Removes credentials; returns whether an entry existed.
    fn delete(&self, provider: ProviderId) -> Result<bool, CredentialError>;

    /// Providers with stored credentials.
    fn list(&self) -> Result<Vec<ProviderId>, CredentialError>;

    /// Checks that the backend is usable without revealing any secret.
    fn doctor(&self) -> DoctorReport;
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<ProviderId, Credentials>>,
}

impl MemoryCredentialStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store preloaded with `entries`.
    pub fn with(entries: impl IntoIterator<Item = Credentials>) -> Self {
        let map = entries.into_iter().map(|c| (c.provider, c)).collect();
        Self {
            entries: Mutex::new(map),
        }
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<ProviderId, Credentials>>, CredentialError> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::Message("credential store lock poisoned".to_string()))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, provider: ProviderId) -> Result<Option<Credentials>, CredentialError> {
        Ok(self.lock()?.get(&provider).cloned())
    }

    fn put(&self, credentials: Credentials) -> Result<(), CredentialError> {
        self.lock()?.insert(credentials.provider, credentials);
        Ok(())
    }

    fn delete(&self, provider: ProviderId) -> Result<bool, CredentialError> {
        Ok(self.lock()?.remove(&provider).is_some())
    }

    fn list(&self) -> Result<Vec<ProviderId>, CredentialError> {
        let mut ids: Vec<ProviderId> = self.lock()?.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    fn doctor(&self) -> DoctorReport {
        let mut details = BTreeMap::new();
        let ok = match self.list() {
            Ok(ids) => {
                details.insert("entries".to_string(), ids.len().to_string());
                true
            }
            Err(err) => {
                details.insert("error".to_string(), err.to_string());
                false
            }
        };
        DoctorReport {
            ok,
            backend: "memory".to_string(),
            details,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    format_version: u16,
    entries: Vec<Credentials>,
}

const CREDENTIAL_FILE_VERSION: u16 = 1;

/// JSON file of credentials, rewritten whole on every change.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Store backed by `path`; the file is created on first write.
    pub fn open(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<CredentialFile, CredentialError> {
        if !self.path.exists() {
            return Ok(CredentialFile {
                format_version: CREDENTIAL_FILE_VERSION,
                entries: Vec::new(),
            });
        }
        let bytes = fs::read(&self.path)?;
        let file: CredentialFile = serde_json::from_slice(&bytes)?;
        if file.format_version != CREDENTIAL_FILE_VERSION {
            return Err(CredentialError::Message(format!(
                "unsupported credential file version: {}",
                file.format_version
            )));
        }
        Ok(file)
    }

    fn write(&self, file: &CredentialFile) -> Result<(), CredentialError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>, CredentialError> {
        self.lock
            .lock()
            .map_err(|_| CredentialError::Message("credential file lock poisoned".to_string()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, provider: ProviderId) -> Result<Option<Credentials>, CredentialError> {
        let _g = self.guard()?;
        Ok(self
            .read()?
            .entries
            .into_iter()
            .find(|c| c.provider == provider))
    }

    fn put(&self, credentials: Credentials) -> Result<(), CredentialError> {
        let _g = self.guard()?;
        let mut file = self.read()?;
        file.format_version = CREDENTIAL_FILE_VERSION;
        file.entries.retain(|c| c.provider != credentials.provider);
        file.entries.push(credentials);
        file.entries.sort_by_key(|c| c.provider);
        self.write(&file)
    }

    fn delete(&self, provider: ProviderId) -> Result<bool, CredentialError> {
        let _g = self.guard()?;
        let mut file = self.read()?;
        let before = file.entries.len();
        file.entries.retain(|c| c.provider != provider);
        if file.entries.len() == before {
            return Ok(false);
        }
        self.write(&file)?;
        Ok(true)
    }

    fn list(&self) -> Result<Vec<ProviderId>, CredentialError> {
        let _g = self.guard()?;
        Ok(self.read()?.entries.iter().map(|c| c.provider).collect())
    }

    /// Reads the file and writes it back unchanged, creating it if absent.
    fn doctor(&self) -> DoctorReport {
        let mut details = BTreeMap::new();
        details.insert("path".to_string(), self.path.display().to_string());
        let checked = self.guard().and_then(|_g| {
            let file = self.read()?;
            self.write(&file)?;
            Ok(file.entries.len())
        });
        let ok = match checked {
            Ok(entries) => {
                details.insert("entries".to_string(), entries.to_string());
                true
            }
            Err(err) => {
                details.insert("error".to_string(), err.to_string());
                false
            }
        };
        DoctorReport {
            ok,
            backend: "file".to_string(),
            details,
        }
    }
}
