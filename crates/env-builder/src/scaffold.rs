//! Persistent project layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::BuildError;
use crate::params::BuildParameters;
use crate::render::{RenderedArtifact, COMPOSE_NAME};

pub const DIR_MODE: u32 = 0o775;
/// The MySQL container writes as its own uid, so its mounts must be world-writable.
pub const SHARED_DIR_MODE: u32 = 0o777;
pub const SCRIPT_MODE: u32 = 0o755;

pub const CONFIG_DIR: &str = "config";
pub const PROJECT_DIR: &str = "project";
pub const RESOURCES_DIR: &str = "resources";
pub const DB_DIR: &str = "resources/db";
pub const DUMP_DIR: &str = "resources/dump";
pub const PACKAGES_DIR: &str = "packages";
pub const COMPOSER_DIR: &str = "composer";

/// Create `path` if missing, then (re)apply `mode`.
///
/// An existing directory is fine; an existing file at `path` is not.
pub fn ensure(path: &Path, mode: u32) -> io::Result<()> {
    match fs::create_dir(path) {
        Ok(()) => debug!("created {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            if !path.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("{} exists and is not a directory", path.display()),
                ));
            }
        }
        Err(err) => return Err(err),
    }

    set_mode(path, mode)
}

/// Write an artifact into `dir`, marking scripts executable.
pub fn write_artifact(dir: &Path, artifact: &RenderedArtifact) -> Result<PathBuf, BuildError> {
    let path = dir.join(artifact.name);
    fs::write(&path, &artifact.content).map_err(BuildError::fs(&path))?;
    if artifact.executable {
        set_mode(&path, SCRIPT_MODE).map_err(BuildError::fs(&path))?;
    }
    debug!("wrote {}", path.display());
    Ok(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutEntry {
    pub path: PathBuf,
    pub mode: u32,
}

/// The directories the composition mounts, rooted at the project directory.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    root: PathBuf,
    entries: Vec<LayoutEntry>,
}

impl ProjectLayout {
    pub fn new(root: impl Into<PathBuf>, params: &BuildParameters) -> Self {
        let root = root.into();
        let mut relative = vec![
            (CONFIG_DIR, DIR_MODE),
            (PROJECT_DIR, DIR_MODE),
            (RESOURCES_DIR, DIR_MODE),
            (DB_DIR, SHARED_DIR_MODE),
            (DUMP_DIR, SHARED_DIR_MODE),
        ];
        if params.packages_dir().is_none() {
            relative.push((PACKAGES_DIR, DIR_MODE));
        }
        if params.composer_dir().is_none() {
            relative.push((COMPOSER_DIR, DIR_MODE));
        }

        let entries = relative
            .into_iter()
            .map(|(path, mode)| LayoutEntry {
                path: root.join(path),
                mode,
            })
            .collect();

        Self { root, entries }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_dir(&self) -> PathBuf {
        self.root.join(CONFIG_DIR)
    }

    pub fn entries(&self) -> &[LayoutEntry] {
        &self.entries
    }

    /// Ensure every entry in order; parents precede their children.
    pub fn provision(&self) -> Result<(), BuildError> {
        for entry in &self.entries {
            ensure(&entry.path, entry.mode).map_err(BuildError::fs(&entry.path))?;
        }
        Ok(())
    }

    /// Whether a previous build left a composition file and config directory.
    pub fn is_provisioned(root: &Path) -> bool {
        root.join(COMPOSE_NAME).is_file() && root.join(CONFIG_DIR).is_dir()
    }
}
