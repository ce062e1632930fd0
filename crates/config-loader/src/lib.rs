//! Persisted m2env settings.
//!
//! Settings live in `.m2envrc` (or `.m2env.json`) in the project directory
//! or any of its ancestors. `M2ENV_CONFIG` points at an explicit file
//! instead. Files are validated against the embedded JSON schema before
//! they are deserialized.

use env_builder::{versions, BuildParameters, ParameterError};
use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

pub const SETTINGS_FILES: [&str; 2] = [".m2envrc", ".m2env.json"];
pub const SETTINGS_ENV: &str = "M2ENV_CONFIG";

const SCHEMA: &str = include_str!("../schema/settings.v1.json");

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Settings file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("IO error on {}: {message}", path.display())]
    Io { path: PathBuf, message: String },

    #[error("JSON parsing failed: {message}")]
    JsonParsingFailed { message: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Settings validation failed: {}", summarize(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("No Magento version configured; run `m2env init` first")]
    NotInitialized,

    #[error(transparent)]
    InvalidParameters(#[from] ParameterError),
}

impl SettingsError {
    /// Missing or unusable settings; nothing was attempted.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SettingsError::NotFound { .. }
                | SettingsError::NotInitialized
                | SettingsError::ValidationFailed { .. }
                | SettingsError::JsonParsingFailed { .. }
                | SettingsError::InvalidParameters(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| {
            if e.json_pointer.is_empty() {
                e.message.clone()
            } else {
                format!("{}: {}", e.json_pointer, e.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magento: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub php: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(
        rename = "servername",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub server_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packages: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composer: Option<PathBuf>,
}

impl Settings {
    /// Read and validate a settings file.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.is_file() {
            return Err(SettingsError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|e| SettingsError::JsonParsingFailed {
                message: e.to_string(),
            })?;

        validate(&value)?;
        debug!("loaded settings from {}", path.display());

        serde_json::from_value(value).map_err(|e| SettingsError::JsonParsingFailed {
            message: e.to_string(),
        })
    }

    /// Locate settings for `start` and load them; `Ok(None)` when there are none.
    pub fn discover(start: &Path) -> Result<Option<(PathBuf, Self)>, SettingsError> {
        match locate(start) {
            Some(path) => Self::load(&path).map(|settings| Some((path, settings))),
            None => Ok(None),
        }
    }

    /// Write pretty-printed JSON, replacing `path` atomically.
    ///
    /// The file holds repository credentials and keeps the owner-only mode
    /// of the temporary file it is persisted from.
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let io_error = |e: std::io::Error| SettingsError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut json =
            serde_json::to_string_pretty(self).map_err(|e| SettingsError::JsonParsingFailed {
                message: e.to_string(),
            })?;
        json.push('\n');

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(io_error)?;
        file.write_all(json.as_bytes()).map_err(io_error)?;
        file.persist(path).map_err(|e| io_error(e.error))?;
        debug!("saved settings to {}", path.display());
        Ok(())
    }

    /// Canonical build parameters, filling unset fields with defaults.
    pub fn to_build_parameters(&self) -> Result<BuildParameters, SettingsError> {
        let magento = self
            .magento
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .ok_or(SettingsError::NotInitialized)?;

        let mut params = match self.php.as_deref() {
            Some(php) => BuildParameters::new(magento, php)?,
            None => BuildParameters::for_magento(magento)?,
        };
        params = params
            .with_credentials(self.username.clone(), self.password.clone())
            .with_packages(self.packages.clone())
            .with_composer(self.composer.clone());
        if let Some(server_name) = &self.server_name {
            params = params.with_server_name(server_name.clone());
        }
        let language = self.language.clone().unwrap_or(params.language.clone());
        let currency = self.currency.clone().unwrap_or(params.currency.clone());
        let timezone = self.timezone.clone().unwrap_or(params.timezone.clone());

        Ok(params.with_locale(language, currency, timezone))
    }

    /// Fill `php` from the Magento version when it was not given explicitly,
    /// and store both in canonical form.
    pub fn normalize_versions(&mut self) -> Result<(), SettingsError> {
        let raw = self.magento.as_deref().ok_or(SettingsError::NotInitialized)?;
        let magento = versions::normalize(raw, versions::DEFAULT_COMPONENTS).ok_or_else(|| {
            ParameterError::InvalidVersion {
                field: "magento",
                value: raw.to_string(),
            }
        })?;

        let php = match self.php.as_deref() {
            Some(raw) => versions::normalize(raw, 2).ok_or_else(|| {
                ParameterError::InvalidVersion {
                    field: "php",
                    value: raw.to_string(),
                }
            })?,
            None => versions::companion_version(&magento).to_string(),
        };

        self.magento = Some(magento);
        self.php = Some(php);
        Ok(())
    }
}

/// `M2ENV_CONFIG` when set, else the nearest settings file at or above `start`.
pub fn locate(start: &Path) -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var(SETTINGS_ENV) {
        if !explicit.trim().is_empty() {
            return Some(PathBuf::from(explicit));
        }
    }
    find_up(start)
}

/// Walk from `start` towards the filesystem root looking for a settings file.
pub fn find_up(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        for name in SETTINGS_FILES {
            let candidate = current.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        if !current.pop() {
            return None;
        }
    }
}

fn validate(value: &Value) -> Result<(), SettingsError> {
    let schema: Value =
        serde_json::from_str(SCHEMA).map_err(|e| SettingsError::SchemaCompilationFailed {
            message: e.to_string(),
        })?;
    let compiled = JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| SettingsError::SchemaCompilationFailed {
            message: e.to_string(),
        })?;

    if let Err(errors) = compiled.validate(value) {
        let errors = errors
            .map(|error| ValidationError {
                json_pointer: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect();
        return Err(SettingsError::ValidationFailed { errors });
    }
    Ok(())
}
