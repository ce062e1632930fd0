//! Ephemeral build workspace.
//!
//! A [`Workspace`] is a uniquely named directory under the system temporary
//! root that holds the files one image build needs. The process working
//! directory only ever points at it through an [`ActiveWorkspace`] guard,
//! which holds a process-wide lock and puts the previous directory back when
//! dropped. Teardown runs on every path: explicitly via
//! [`Workspace::teardown`], or from `Drop` when a caller bails out early.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::render::RenderedArtifact;
use crate::scaffold;

const PREFIX: &str = "m2env-";

// The working directory is process-global; only one workspace may hold it.
static CWD_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceState {
    Created,
    Populated,
    Active,
    TornDown,
}

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    previous_dir: PathBuf,
    files: Vec<PathBuf>,
    state: WorkspaceState,
    // Set while the working directory points here; cleared by the guard.
    entered: bool,
}

impl Workspace {
    pub fn create() -> Result<Self, BuildError> {
        Self::create_in(env::temp_dir())
    }

    pub fn create_in(parent: impl AsRef<Path>) -> Result<Self, BuildError> {
        let parent = parent.as_ref();
        let previous_dir = env::current_dir().map_err(BuildError::fs("."))?;
        let dir = tempfile::Builder::new()
            .prefix(PREFIX)
            .tempdir_in(parent)
            .map_err(BuildError::fs(parent))?;
        let path = dir.path().to_path_buf();
        debug!("created workspace {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            previous_dir,
            files: Vec::new(),
            state: WorkspaceState::Created,
            entered: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn previous_dir(&self) -> &Path {
        &self.previous_dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    pub fn state(&self) -> WorkspaceState {
        self.state
    }

    pub fn write(&mut self, artifact: &RenderedArtifact) -> Result<PathBuf, BuildError> {
        let path = scaffold::write_artifact(&self.path, artifact)?;
        self.files.push(path.clone());
        if self.state == WorkspaceState::Created {
            self.state = WorkspaceState::Populated;
        }
        Ok(path)
    }

    /// Make the workspace the process working directory until the guard drops.
    pub fn activate(&mut self) -> Result<ActiveWorkspace<'_>, BuildError> {
        let lock = CWD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        env::set_current_dir(&self.path).map_err(BuildError::fs(&self.path))?;
        self.state = WorkspaceState::Active;
        self.entered = true;
        debug!("entered workspace {}", self.path.display());

        Ok(ActiveWorkspace {
            workspace: self,
            _lock: lock,
        })
    }

    /// Remove written files, restore the working directory, remove the
    /// directory. Every step runs; the first failure is returned.
    pub fn teardown(mut self) -> Result<(), BuildError> {
        self.teardown_in_place()
    }

    fn teardown_in_place(&mut self) -> Result<(), BuildError> {
        if self.state == WorkspaceState::TornDown {
            return Ok(());
        }
        let mut failures = Vec::new();

        for file in self.files.drain(..) {
            if let Err(source) = fs::remove_file(&file) {
                warn!(error = %source, "failed to remove {}", file.display());
                failures.push(BuildError::Filesystem { path: file, source });
            }
        }

        // Only a leaked guard leaves `entered` set, and that guard still owns
        // the lock, so the directory is restored without taking it again.
        if self.entered {
            if let Err(source) = env::set_current_dir(&self.previous_dir) {
                warn!(error = %source, "failed to restore {}", self.previous_dir.display());
                failures.push(BuildError::Filesystem {
                    path: self.previous_dir.clone(),
                    source,
                });
            }
            self.entered = false;
        }

        if let Some(dir) = self.dir.take() {
            if let Err(source) = dir.close() {
                warn!(error = %source, "failed to remove {}", self.path.display());
                failures.push(BuildError::Filesystem {
                    path: self.path.clone(),
                    source,
                });
            }
        }

        self.state = WorkspaceState::TornDown;
        debug!("tore down workspace {}", self.path.display());

        match failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(err) = self.teardown_in_place() {
            warn!(error = %err, "workspace teardown on drop failed");
        }
    }
}

/// The workspace as the current directory. Dropping it restores the
/// directory that was current when the workspace was created.
pub struct ActiveWorkspace<'a> {
    workspace: &'a mut Workspace,
    _lock: MutexGuard<'static, ()>,
}

impl ActiveWorkspace<'_> {
    pub fn path(&self) -> &Path {
        self.workspace.path()
    }
}

impl Drop for ActiveWorkspace<'_> {
    fn drop(&mut self) {
        let previous = &self.workspace.previous_dir;
        if let Err(err) = env::set_current_dir(previous) {
            warn!(error = %err, "failed to restore {}", previous.display());
        }
        self.workspace.entered = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn artifact(name: &'static str) -> RenderedArtifact {
        crate::render::RenderedArtifact {
            name,
            content: format!("# {}\n", name),
            executable: false,
        }
    }

    #[test]
    #[serial]
    fn workspace_walks_through_every_state() {
        let mut workspace = Workspace::create().unwrap();
        assert_eq!(workspace.state(), WorkspaceState::Created);
        assert!(workspace
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(PREFIX));

        workspace.write(&artifact("Dockerfile")).unwrap();
        assert_eq!(workspace.state(), WorkspaceState::Populated);

        {
            let active = workspace.activate().unwrap();
            assert_eq!(
                env::current_dir().unwrap().canonicalize().unwrap(),
                active.path().canonicalize().unwrap()
            );
        }
        assert_eq!(workspace.state(), WorkspaceState::Active);

        let path = workspace.path().to_path_buf();
        let previous = workspace.previous_dir().to_path_buf();
        workspace.teardown().unwrap();
        assert!(!path.exists());
        assert_eq!(env::current_dir().unwrap(), previous);
    }

    #[test]
    #[serial]
    fn guard_restores_directory_on_drop() {
        let before = env::current_dir().unwrap();
        let mut workspace = Workspace::create().unwrap();
        drop(workspace.activate().unwrap());
        assert_eq!(env::current_dir().unwrap(), before);
        workspace.teardown().unwrap();
    }

    #[test]
    #[serial]
    fn drop_tears_down_unfinished_workspace() {
        let before = env::current_dir().unwrap();
        let path = {
            let mut workspace = Workspace::create().unwrap();
            workspace.write(&artifact("docker-compose.yml")).unwrap();
            let _active = workspace.activate().unwrap();
            workspace_path_while_active()
        };
        assert!(!path.exists());
        assert_eq!(env::current_dir().unwrap(), before);
    }

    fn workspace_path_while_active() -> PathBuf {
        env::current_dir().unwrap()
    }

    #[test]
    #[serial]
    fn teardown_continues_after_missing_file() {
        let mut workspace = Workspace::create().unwrap();
        let file = workspace.write(&artifact("Dockerfile")).unwrap();
        workspace.write(&artifact("docker-compose.yml")).unwrap();
        fs::remove_file(&file).unwrap();

        let path = workspace.path().to_path_buf();
        let err = workspace.teardown().unwrap_err();
        assert!(matches!(err, BuildError::Filesystem { .. }));
        assert!(!path.exists());
    }

    #[test]
    #[serial]
    fn failed_write_still_removes_the_directory() {
        let before = env::current_dir().unwrap();
        let mut workspace = Workspace::create().unwrap();
        let path = workspace.path().to_path_buf();
        workspace.write(&artifact("Dockerfile")).unwrap();

        let err = workspace.write(&artifact("missing/docker-compose.yml"));
        assert!(matches!(err, Err(BuildError::Filesystem { .. })));
        drop(workspace);

        assert!(!path.exists());
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    #[serial]
    fn failed_activation_leaves_working_directory_alone() {
        let before = env::current_dir().unwrap();
        let mut workspace = Workspace::create().unwrap();
        let path = workspace.path().to_path_buf();
        fs::remove_dir(&path).unwrap();

        assert!(workspace.activate().is_err());
        assert_eq!(env::current_dir().unwrap(), before);
        let _ = workspace.teardown();
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    #[serial]
    fn dropping_another_workspace_while_one_is_active_does_not_block() {
        let before = env::current_dir().unwrap();
        let mut first = Workspace::create().unwrap();
        let mut second = Workspace::create().unwrap();
        drop(second.activate().unwrap());

        let active = first.activate().unwrap();
        let second_path = second.path().to_path_buf();
        drop(second);
        assert!(!second_path.exists());
        assert_eq!(
            env::current_dir().unwrap().canonicalize().unwrap(),
            active.path().canonicalize().unwrap()
        );

        drop(active);
        first.teardown().unwrap();
        assert_eq!(env::current_dir().unwrap(), before);
    }

    #[test]
    #[serial]
    fn workspaces_get_unique_paths() {
        let a = Workspace::create().unwrap();
        let b = Workspace::create().unwrap();
        assert_ne!(a.path(), b.path());
        a.teardown().unwrap();
        b.teardown().unwrap();
    }
}
