pub mod env;
pub mod init;

use anyhow::{Context as _, Result};
use config_loader::{Settings, SettingsError, SETTINGS_FILES};
use env_builder::{BuildError, ExitKind, Orchestrator, ProcessResult, RenderError, ShellRunner};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Exit status for missing or invalid settings and unbuilt projects.
pub const PRECONDITION_EXIT: i32 = 2;
const FAILURE_EXIT: i32 = 1;
const SIGNAL_EXIT_BASE: i32 = 128;

/// Everything a command needs from the invocation.
pub struct Context {
    pub cwd: PathBuf,
    pub compose_bin: String,
    pub timeout: Option<Duration>,
}

impl Context {
    pub fn from_env(compose_bin: String, timeout: Option<u64>) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to read the working directory")?;
        Ok(Self {
            cwd,
            compose_bin,
            timeout: timeout.map(Duration::from_secs),
        })
    }

    pub fn settings(&self) -> Result<Settings> {
        match Settings::discover(&self.cwd)? {
            Some((path, settings)) => {
                debug!("using settings from {}", path.display());
                Ok(settings)
            }
            None => Err(SettingsError::NotFound {
                path: self.cwd.join(SETTINGS_FILES[0]),
            }
            .into()),
        }
    }

    pub fn orchestrator(&self) -> Orchestrator<ShellRunner> {
        let mut runner = ShellRunner::new();
        if let Some(timeout) = self.timeout {
            runner = runner.with_timeout(timeout);
        }
        Orchestrator::new(runner, &self.cwd).with_compose_bin(&self.compose_bin)
    }
}

/// Shell-style exit status for a finished subprocess.
pub fn forward(result: ProcessResult) -> i32 {
    match result.exit {
        ExitKind::Exited(code) => code,
        ExitKind::Signaled(Some(signal)) => SIGNAL_EXIT_BASE + signal,
        ExitKind::Signaled(None) => FAILURE_EXIT,
    }
}

pub fn exit_status(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<BuildError>() {
        if err.is_precondition() || matches!(err, BuildError::Render(_)) {
            return PRECONDITION_EXIT;
        }
    }
    if let Some(err) = err.downcast_ref::<SettingsError>() {
        if err.is_precondition() {
            return PRECONDITION_EXIT;
        }
    }
    if err.downcast_ref::<RenderError>().is_some()
        || err.downcast_ref::<init::InitError>().is_some()
    {
        return PRECONDITION_EXIT;
    }
    FAILURE_EXIT
}
