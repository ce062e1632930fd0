//! Artifact rendering.
//!
//! Every renderer is a pure function of its inputs. Templates live under
//! `templates/` and are embedded at compile time; the only interpolation
//! mechanism is [`TemplateContext`], and values only reach it after passing
//! the validators below.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::RenderError;
use crate::params::BuildParameters;

const DOCKERFILE: &str = include_str!("../templates/Dockerfile.tmpl");
const BUILD_COMPOSE: &str = include_str!("../templates/docker-compose.build.yml.tmpl");
const COMPOSE: &str = include_str!("../templates/docker-compose.yml.tmpl");
const NGINX: &str = include_str!("../templates/nginx.conf.tmpl");
const INSTALL: &str = include_str!("../templates/install.sh.tmpl");
const SUPERVISOR: &str = include_str!("../templates/magento-supervisor.conf.tmpl");
const BASH_HISTORY: &str = include_str!("../templates/bash_history");
const INSTALL_PLUGIN: &str = include_str!("../templates/install_plugin.sh");
const ENTRYPOINT: &str = include_str!("../templates/entrypoint.sh");

pub const DOCKERFILE_NAME: &str = "Dockerfile";
pub const COMPOSE_NAME: &str = "docker-compose.yml";
pub const NGINX_NAME: &str = "nginx.conf";
pub const INSTALL_NAME: &str = "install.sh";
pub const INSTALL_PLUGIN_NAME: &str = "install_plugin.sh";
pub const SUPERVISOR_NAME: &str = "magento-supervisor.conf";
pub const BASH_HISTORY_NAME: &str = ".bash_history";
pub const ENTRYPOINT_NAME: &str = "entrypoint.sh";

const COMPOSER_REPOSITORY: &str = "repo.magento.com";
const DEFAULT_COMPOSER_MOUNT: &str = "./composer";
const DEFAULT_PACKAGES_MOUNT: &str = "./packages";

static SERVER_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?$").unwrap());
static LANGUAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z]{2}_[A-Z]{2}$").unwrap());
static CURRENCY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{3}$").unwrap());
static TIMEZONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_+-]+(?:/[A-Za-z0-9_+-]+)*$").unwrap());
static PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{ \.(\w+) \}\}").unwrap());

/// One generated file: its name and full text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    pub name: &'static str,
    pub content: String,
    pub executable: bool,
}

impl RenderedArtifact {
    fn new(name: &'static str, content: String) -> Self {
        Self {
            name,
            content,
            executable: false,
        }
    }

    fn script(name: &'static str, content: String) -> Self {
        Self {
            name,
            content,
            executable: true,
        }
    }
}

/// Artifacts that persist in the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectArtifacts {
    /// Written at the project root.
    pub compose: RenderedArtifact,
    /// Written inside the `config/` directory.
    pub config: Vec<RenderedArtifact>,
}

/// Placeholder values for `{{ .name }}` substitution.
#[derive(Debug, Default, Clone)]
pub struct TemplateContext {
    values: BTreeMap<&'static str, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.values.insert(key, value.into());
        self
    }

    /// Substitute every known placeholder in one pass. Inserted values are
    /// never rescanned; unknown placeholders are left as they are.
    pub fn render(&self, template: &str) -> String {
        PLACEHOLDER
            .replace_all(template, |caps: &Captures<'_>| match self.values.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Image build instructions for the given PHP version.
pub fn dockerfile(php: &str) -> RenderedArtifact {
    let context = TemplateContext::new().with("php", php);
    RenderedArtifact::new(DOCKERFILE_NAME, context.render(DOCKERFILE))
}

/// Composition file limited to the `app` build target.
pub fn build_compose(php: &str) -> RenderedArtifact {
    let context = TemplateContext::new().with("php", php);
    RenderedArtifact::new(COMPOSE_NAME, context.render(BUILD_COMPOSE))
}

/// Namespace for compose networks and volumes, e.g. `magento2_3_0_php7_1`.
pub fn resource_prefix(magento: &str, php: &str) -> String {
    format!(
        "magento{}_php{}",
        magento.split('.').collect::<Vec<_>>().join("_"),
        php.split('.').collect::<Vec<_>>().join("_")
    )
}

/// The full multi-service composition file.
pub fn compose(params: &BuildParameters) -> RenderedArtifact {
    let auth = serde_json::json!({
        "http-basic": {
            COMPOSER_REPOSITORY: {
                "username": params.username.as_deref().unwrap_or_default(),
                "password": params.password.as_deref().unwrap_or_default(),
            }
        }
    });
    let composer = params
        .composer_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| DEFAULT_COMPOSER_MOUNT.to_string());
    let packages = params
        .packages_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| DEFAULT_PACKAGES_MOUNT.to_string());

    let context = TemplateContext::new()
        .with("prefix", resource_prefix(params.magento(), params.php()))
        .with("php", params.php())
        .with("magento", params.magento())
        .with("composerAuth", yaml_quoted(&format!("COMPOSER_AUTH={}", auth)))
        .with("composerMount", yaml_quoted(&format!("{}:/.composer", composer)))
        .with(
            "packagesMount",
            yaml_quoted(&format!("{}/:/app/packages", packages.trim_end_matches('/'))),
        );

    RenderedArtifact::new(COMPOSE_NAME, context.render(COMPOSE))
}

/// nginx virtual host for Magento, varying only with the server name.
pub fn nginx(params: &BuildParameters) -> Result<RenderedArtifact, RenderError> {
    let context = TemplateContext::new().with(
        "serverName",
        validated("server name", &params.server_name, &SERVER_NAME)?,
    );
    Ok(RenderedArtifact::new(NGINX_NAME, context.render(NGINX)))
}

/// Setup script executed inside the application container.
pub fn install_script(params: &BuildParameters) -> Result<RenderedArtifact, RenderError> {
    let context = TemplateContext::new()
        .with("magento", params.magento())
        .with(
            "serverName",
            validated("server name", &params.server_name, &SERVER_NAME)?,
        )
        .with("language", validated("language", &params.language, &LANGUAGE)?)
        .with("currency", validated("currency", &params.currency, &CURRENCY)?)
        .with("timezone", validated("timezone", &params.timezone, &TIMEZONE)?);
    Ok(RenderedArtifact::script(INSTALL_NAME, context.render(INSTALL)))
}

/// supervisord program keeping the composition up from `project_root`.
pub fn supervisor(project_root: &Path) -> Result<RenderedArtifact, RenderError> {
    let root = project_root.display().to_string();
    if root.chars().any(char::is_control) {
        return Err(RenderError::UnsafeParameter {
            field: "project root",
            value: root,
        });
    }
    let context = TemplateContext::new().with("projectRoot", root);
    Ok(RenderedArtifact::new(
        SUPERVISOR_NAME,
        context.render(SUPERVISOR),
    ))
}

/// Parameterless helpers mounted into the application container.
pub fn static_templates() -> Vec<RenderedArtifact> {
    vec![
        RenderedArtifact::new(BASH_HISTORY_NAME, BASH_HISTORY.to_string()),
        RenderedArtifact::script(INSTALL_PLUGIN_NAME, INSTALL_PLUGIN.to_string()),
        RenderedArtifact::script(ENTRYPOINT_NAME, ENTRYPOINT.to_string()),
    ]
}

/// Artifacts that live only inside the build workspace.
pub fn image_artifacts(params: &BuildParameters) -> Vec<RenderedArtifact> {
    vec![dockerfile(params.php()), build_compose(params.php())]
}

/// Every persistent artifact, validated up front so that nothing is written
/// when a parameter is rejected.
pub fn project_artifacts(
    params: &BuildParameters,
    project_root: &Path,
) -> Result<ProjectArtifacts, RenderError> {
    let mut config = vec![
        nginx(params)?,
        install_script(params)?,
        supervisor(project_root)?,
    ];
    config.extend(static_templates());

    Ok(ProjectArtifacts {
        compose: compose(params),
        config,
    })
}

fn validated(field: &'static str, value: &str, pattern: &Regex) -> Result<String, RenderError> {
    if pattern.is_match(value) {
        Ok(value.to_string())
    } else {
        Err(RenderError::UnsafeParameter {
            field,
            value: value.to_string(),
        })
    }
}

// A JSON string literal is also a valid single-line YAML double-quoted scalar.
fn yaml_quoted(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}
