//! Build orchestration for local Magento 2 container environments.
//!
//! Typed [`BuildParameters`] are rendered into artifacts ([`render`]), the
//! persistent project layout is scaffolded ([`scaffold`]), and the image is
//! built by an external compose tool running inside a throwaway
//! [`workspace::Workspace`]. Subprocesses go through a
//! [`process::CommandRunner`], so tests can substitute
//! [`process::SimulatedRunner`].

pub mod error;
pub mod orchestrator;
pub mod params;
pub mod process;
pub mod render;
pub mod scaffold;
pub mod versions;
pub mod workspace;

pub use error::{BuildError, ParameterError, RenderError};
pub use orchestrator::{Orchestrator, DEFAULT_COMPOSE_BIN};
pub use params::BuildParameters;
pub use process::{CommandRunner, ExitKind, ProcessError, ProcessResult, ShellRunner};
