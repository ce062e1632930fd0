//! Commands that act on a built environment.

use anyhow::{Context as _, Result};
use env_builder::process::shell_join;
use tracing::info;

use super::{forward, Context};

pub fn build(ctx: &Context) -> Result<i32> {
    let params = ctx.settings()?.to_build_parameters()?;
    let (magento, php) = (params.magento().to_string(), params.php().to_string());

    ctx.orchestrator()
        .build(params)
        .with_context(|| format!("Build of Magento {} / PHP {} failed", magento, php))?;

    println!("Built Magento {} with PHP {} in {}", magento, php, ctx.cwd.display());
    Ok(0)
}

pub fn install(ctx: &Context) -> Result<i32> {
    info!("installing Magento");
    Ok(forward(ctx.orchestrator().install()?))
}

pub fn install_plugin(ctx: &Context, plugin: &str) -> Result<i32> {
    info!(plugin, "installing plugin");
    Ok(forward(ctx.orchestrator().install_plugin(plugin)?))
}

pub fn refresh(ctx: &Context) -> Result<i32> {
    Ok(forward(ctx.orchestrator().refresh()?))
}

pub fn run(ctx: &Context, command: &[String]) -> Result<i32> {
    let line = shell_join(command);
    Ok(forward(ctx.orchestrator().run(&line)?))
}
