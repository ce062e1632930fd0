use anyhow::Result;
use clap::Args;
use config_loader::{Settings, SETTINGS_FILES};
use env_builder::render;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use super::Context;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("{} already exists; pass --force to overwrite it", path.display())]
    SettingsExist { path: PathBuf },

    #[error("--{flag} {} is not a directory", path.display())]
    NotADirectory { flag: &'static str, path: PathBuf },
}

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Magento version, e.g. 2.3 or 2.3.1
    #[arg(long)]
    pub magento: String,

    /// PHP version (derived from the Magento version when omitted)
    #[arg(long)]
    pub php: Option<String>,

    /// repo.magento.com public key
    #[arg(long, env = "M2ENV_REPO_USERNAME")]
    pub username: Option<String>,

    /// repo.magento.com private key
    #[arg(long, env = "M2ENV_REPO_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Host directory mounted as local composer packages
    #[arg(long, value_name = "DIR")]
    pub packages: Option<PathBuf>,

    /// Host composer cache directory
    #[arg(long, value_name = "DIR")]
    pub composer: Option<PathBuf>,

    #[arg(long)]
    pub server_name: Option<String>,

    #[arg(long)]
    pub language: Option<String>,

    #[arg(long)]
    pub currency: Option<String>,

    #[arg(long)]
    pub timezone: Option<String>,

    /// Replace an existing settings file
    #[arg(long)]
    pub force: bool,
}

pub fn run(ctx: &Context, args: InitArgs) -> Result<i32> {
    let path = ctx.cwd.join(SETTINGS_FILES[0]);
    if path.exists() && !args.force {
        return Err(InitError::SettingsExist { path }.into());
    }

    let mut settings = Settings {
        magento: Some(args.magento),
        php: args.php,
        username: args.username,
        password: args.password,
        server_name: args.server_name,
        language: args.language,
        currency: args.currency,
        timezone: args.timezone,
        packages: override_dir("packages", args.packages, &ctx.cwd)?,
        composer: override_dir("composer", args.composer, &ctx.cwd)?,
    };
    settings.normalize_versions()?;

    // Reject values the renderers would refuse before anything is saved.
    let params = settings.to_build_parameters()?;
    render::project_artifacts(&params, &ctx.cwd)?;

    settings.save(&path)?;
    info!("wrote {}", path.display());
    println!(
        "Configured Magento {} with PHP {} in {}",
        params.magento(),
        params.php(),
        path.display()
    );
    Ok(0)
}

/// Absolute form of an override directory, which must already exist.
fn override_dir(flag: &'static str, dir: Option<PathBuf>, cwd: &Path) -> Result<Option<PathBuf>> {
    let Some(dir) = dir else {
        return Ok(None);
    };
    let dir = if dir.is_absolute() { dir } else { cwd.join(dir) };
    if !dir.is_dir() {
        return Err(InitError::NotADirectory { flag, path: dir }.into());
    }
    Ok(Some(dir))
}
