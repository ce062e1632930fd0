//! Error types for parameter construction, rendering and builds.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::process::ProcessError;

#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("{field} version '{value}' cannot be read as a version number")]
    InvalidVersion { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{field} value '{value}' contains characters that are not allowed")]
    UnsafeParameter { field: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Filesystem operation failed on {}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("`{command}` exited with code {code}")]
    Subprocess { command: String, code: i32 },

    #[error("No environment has been built in {}; run `m2env build` first", root.display())]
    NotProvisioned { root: PathBuf },
}

impl BuildError {
    pub(crate) fn fs(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| BuildError::Filesystem { path, source }
    }

    /// True for errors raised before any subprocess was spawned because the
    /// project was never set up.
    pub fn is_precondition(&self) -> bool {
        matches!(self, BuildError::NotProvisioned { .. })
    }
}
