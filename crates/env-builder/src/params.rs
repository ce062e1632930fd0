use std::path::{Path, PathBuf};

use crate::error::ParameterError;
use crate::versions;

pub const DEFAULT_SERVER_NAME: &str = "localhost";
pub const DEFAULT_LANGUAGE: &str = "en_US";
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Everything needed to render and build one environment.
///
/// The two versions are canonical once constructed: Magento as
/// `major.minor.patch`, PHP as `major.minor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildParameters {
    magento: String,
    php: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub server_name: String,
    pub language: String,
    pub currency: String,
    pub timezone: String,
    pub packages: Option<PathBuf>,
    pub composer: Option<PathBuf>,
}

impl BuildParameters {
    pub fn new(magento: &str, php: &str) -> Result<Self, ParameterError> {
        let magento = versions::normalize(magento, versions::DEFAULT_COMPONENTS).ok_or_else(|| {
            ParameterError::InvalidVersion {
                field: "magento",
                value: magento.to_string(),
            }
        })?;
        let php = versions::normalize(php, 2).ok_or_else(|| ParameterError::InvalidVersion {
            field: "php",
            value: php.to_string(),
        })?;

        Ok(Self {
            magento,
            php,
            username: None,
            password: None,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            timezone: DEFAULT_TIMEZONE.to_string(),
            packages: None,
            composer: None,
        })
    }

    /// Like [`BuildParameters::new`], deriving PHP from the Magento version.
    pub fn for_magento(magento: &str) -> Result<Self, ParameterError> {
        let canonical =
            versions::normalize(magento, versions::DEFAULT_COMPONENTS).ok_or_else(|| {
                ParameterError::InvalidVersion {
                    field: "magento",
                    value: magento.to_string(),
                }
            })?;
        Self::new(&canonical, versions::companion_version(&canonical))
    }

    pub fn magento(&self) -> &str {
        &self.magento
    }

    pub fn php(&self) -> &str {
        &self.php
    }

    pub fn with_credentials(mut self, username: Option<String>, password: Option<String>) -> Self {
        self.username = username;
        self.password = password;
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }

    pub fn with_locale(
        mut self,
        language: impl Into<String>,
        currency: impl Into<String>,
        timezone: impl Into<String>,
    ) -> Self {
        self.language = language.into();
        self.currency = currency.into();
        self.timezone = timezone.into();
        self
    }

    pub fn with_packages(mut self, packages: Option<PathBuf>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_composer(mut self, composer: Option<PathBuf>) -> Self {
        self.composer = composer;
        self
    }

    pub fn packages_dir(&self) -> Option<&Path> {
        self.packages.as_deref()
    }

    pub fn composer_dir(&self) -> Option<&Path> {
        self.composer.as_deref()
    }
}
