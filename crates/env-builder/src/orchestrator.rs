//! Build orchestration.
//!
//! [`Orchestrator`] drives one project root: `build` writes the persistent
//! files and builds the image in a throwaway workspace, and the remaining
//! operations run inside the `app` service of an already built project.

use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::error::BuildError;
use crate::params::BuildParameters;
use crate::process::{app_script, CommandRunner, ProcessResult, APP_SERVICE};
use crate::render::{self, RenderedArtifact, COMPOSE_NAME, INSTALL_NAME, INSTALL_PLUGIN_NAME};
use crate::scaffold::{self, ProjectLayout};
use crate::workspace::Workspace;

pub const DEFAULT_COMPOSE_BIN: &str = "docker-compose";

const REFRESH_COMMANDS: [&str; 2] = [
    "php -d memory_limit=2G bin/magento setup:upgrade",
    "php -d memory_limit=2G bin/magento deploy:mode:set production",
];

/// Sequences rendering, scaffolding, the build workspace and subprocesses for
/// one project root. Operations run one at a time.
pub struct Orchestrator<R> {
    runner: R,
    root: PathBuf,
    compose_bin: String,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(runner: R, root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            root: root.into(),
            compose_bin: DEFAULT_COMPOSE_BIN.to_string(),
        }
    }

    pub fn with_compose_bin(mut self, compose_bin: impl Into<String>) -> Self {
        self.compose_bin = compose_bin.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Write the persistent project files and build the application image.
    ///
    /// Nothing touches the disk when a parameter fails validation. The image
    /// build runs inside a fresh workspace that is torn down before this
    /// returns; `Ok` means the build subprocess exited zero.
    #[instrument(skip_all, fields(magento = %params.magento(), php = %params.php()))]
    pub fn build(&self, params: BuildParameters) -> Result<(), BuildError> {
        let project = render::project_artifacts(&params, &self.root)?;
        let image = render::image_artifacts(&params);
        let layout = ProjectLayout::new(&self.root, &params);

        scaffold::write_artifact(&self.root, &project.compose)?;
        layout.provision()?;
        let config_dir = layout.config_dir();
        for artifact in &project.config {
            scaffold::write_artifact(&config_dir, artifact)?;
        }
        info!("project files written to {}", self.root.display());

        self.build_image(&image)
    }

    fn build_image(&self, artifacts: &[RenderedArtifact]) -> Result<(), BuildError> {
        let mut workspace = Workspace::create()?;
        let outcome = self.build_in(&mut workspace, artifacts);
        if let Err(err) = workspace.teardown() {
            warn!(error = %err, "build workspace teardown failed");
        }
        outcome
    }

    fn build_in(
        &self,
        workspace: &mut Workspace,
        artifacts: &[RenderedArtifact],
    ) -> Result<(), BuildError> {
        for artifact in artifacts {
            workspace.write(artifact)?;
        }

        let command = format!("{} build {}", self.compose_bin, APP_SERVICE);
        let _active = workspace.activate()?;
        let result = self.runner.run(&command)?;
        check(command, result)
    }

    /// Run the Magento installer inside the application container.
    pub fn install(&self) -> Result<ProcessResult, BuildError> {
        self.exec(&app_script(INSTALL_NAME, &[]))
    }

    pub fn install_plugin(&self, plugin: &str) -> Result<ProcessResult, BuildError> {
        self.exec(&app_script(INSTALL_PLUGIN_NAME, &[plugin]))
    }

    /// Upgrade the schema and redeploy, stopping at the first failure.
    pub fn refresh(&self) -> Result<ProcessResult, BuildError> {
        let mut last = ProcessResult::exited(0);
        for command in REFRESH_COMMANDS {
            last = self.exec(command)?;
            if !last.success() {
                break;
            }
        }
        Ok(last)
    }

    /// Run an arbitrary command line in the application container. The
    /// result is handed back untouched so callers can forward the exit code.
    pub fn run(&self, command: &str) -> Result<ProcessResult, BuildError> {
        self.exec(command)
    }

    fn exec(&self, command: &str) -> Result<ProcessResult, BuildError> {
        self.ensure_provisioned()?;
        let compose_file = self.root.join(COMPOSE_NAME);
        Ok(self
            .runner
            .run_in_app_container(&self.compose_bin, &compose_file, command)?)
    }

    fn ensure_provisioned(&self) -> Result<(), BuildError> {
        if ProjectLayout::is_provisioned(&self.root) {
            Ok(())
        } else {
            Err(BuildError::NotProvisioned {
                root: self.root.clone(),
            })
        }
    }
}

fn check(command: String, result: ProcessResult) -> Result<(), BuildError> {
    if result.success() {
        Ok(())
    } else {
        Err(BuildError::Subprocess {
            command,
            code: result.code(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ProcessError, SimulatedRunner};
    use serial_test::serial;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    fn params() -> BuildParameters {
        BuildParameters::new("2.3.0", "7.1").unwrap()
    }

    #[test]
    #[serial]
    fn build_runs_compose_build_inside_workspace() {
        let root = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(SimulatedRunner::success(), root.path());
        orchestrator.build(params()).unwrap();

        let calls = orchestrator.runner().invocations();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].command, "docker-compose build app");
        assert_eq!(calls[0].cwd_entries, ["Dockerfile", "docker-compose.yml"]);
        assert_ne!(calls[0].cwd, root.path());
        assert!(!calls[0].cwd.exists());
    }

    #[test]
    #[serial]
    fn build_failure_carries_exit_code_and_still_cleans_up() {
        let root = TempDir::new().unwrap();
        let before = std::env::current_dir().unwrap();
        let orchestrator = Orchestrator::new(SimulatedRunner::failure(17), root.path());

        let err = orchestrator.build(params()).unwrap_err();
        assert!(matches!(err, BuildError::Subprocess { code: 17, .. }));
        assert_eq!(std::env::current_dir().unwrap(), before);
        assert!(!orchestrator.runner().invocations()[0].cwd.exists());
    }

    /// Records where it ran, then reports a timeout.
    #[derive(Default)]
    struct TimingOutRunner {
        cwd: Mutex<Option<PathBuf>>,
    }

    impl CommandRunner for TimingOutRunner {
        fn run(&self, command: &str) -> Result<ProcessResult, ProcessError> {
            *self.cwd.lock().unwrap() = std::env::current_dir().ok();
            Err(ProcessError::TimedOut {
                command: command.to_string(),
                timeout: Duration::from_secs(1),
            })
        }
    }

    #[test]
    #[serial]
    fn runner_error_still_tears_down_the_workspace() {
        let root = TempDir::new().unwrap();
        let before = std::env::current_dir().unwrap();
        let orchestrator = Orchestrator::new(TimingOutRunner::default(), root.path());

        let err = orchestrator.build(params()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Process(ProcessError::TimedOut { .. })
        ));
        assert_eq!(std::env::current_dir().unwrap(), before);

        let workspace = orchestrator.runner().cwd.lock().unwrap().clone().unwrap();
        assert_ne!(workspace, root.path());
        assert!(!workspace.exists());
    }

    #[test]
    #[serial]
    fn unsafe_parameters_fail_before_anything_is_written() {
        let root = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(SimulatedRunner::success(), root.path());
        let err = orchestrator
            .build(params().with_server_name("evil; rm -rf /"))
            .unwrap_err();

        assert!(matches!(err, BuildError::Render(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert!(orchestrator.runner().invocations().is_empty());
    }

    #[test]
    fn run_before_build_is_a_precondition_error() {
        let root = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(SimulatedRunner::success(), root.path());

        let err = orchestrator.run("php -v").unwrap_err();
        assert!(err.is_precondition());
        assert!(orchestrator.install().unwrap_err().is_precondition());
        assert!(orchestrator.refresh().unwrap_err().is_precondition());
        assert!(orchestrator.runner().invocations().is_empty());
    }

    #[test]
    #[serial]
    fn run_forwards_the_exit_code() {
        let root = TempDir::new().unwrap();
        Orchestrator::new(SimulatedRunner::success(), root.path())
            .build(params())
            .unwrap();

        let orchestrator = Orchestrator::new(SimulatedRunner::failure(3), root.path())
            .with_compose_bin("docker compose");
        let result = orchestrator.run("bin/magento cache:flush").unwrap();
        assert_eq!(result.code(), 3);

        let calls = orchestrator.runner().invocations();
        let expected = format!(
            "docker compose -f {} exec -T app gosu application bin/magento cache:flush",
            root.path().join("docker-compose.yml").display()
        );
        assert_eq!(calls[0].command, expected);
    }

    #[test]
    #[serial]
    fn refresh_stops_at_first_failure() {
        let root = TempDir::new().unwrap();
        Orchestrator::new(SimulatedRunner::success(), root.path())
            .build(params())
            .unwrap();

        let orchestrator = Orchestrator::new(SimulatedRunner::failure(1), root.path());
        let result = orchestrator.refresh().unwrap();
        assert!(!result.success());
        assert_eq!(orchestrator.runner().invocations().len(), 1);
    }

    #[test]
    #[serial]
    fn install_plugin_escapes_the_plugin_name() {
        let root = TempDir::new().unwrap();
        let orchestrator = Orchestrator::new(SimulatedRunner::success(), root.path());
        orchestrator.build(params()).unwrap();

        orchestrator.install_plugin("acme/module;id").unwrap();
        let calls = orchestrator.runner().invocations();
        assert!(calls[1]
            .command
            .ends_with("/home/application/install_plugin.sh 'acme/module;id'"));
    }
}
