//! Subprocess execution.
//!
//! A [`CommandRunner`] turns one shell command line into one child process
//! and blocks until it exits. Output is relayed while the child runs; none of
//! it is kept.

use std::env;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

pub const APP_SERVICE: &str = "app";
pub const APP_USER: &str = "application";
pub const APP_HOME: &str = "/home/application";

const DEFAULT_SHELL: &str = "/bin/sh";
const FORWARD_BUFFER: usize = 8 * 1024;

/// Destination for relayed child output.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for `{command}`")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` did not finish within {timeout:?} and was killed")]
    TimedOut { command: String, timeout: Duration },
}

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Exited(i32),
    /// Terminated by a signal; the number is absent where the platform hides it.
    Signaled(Option<i32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessResult {
    pub exit: ExitKind,
}

impl ProcessResult {
    pub const SIGNAL_SENTINEL: i32 = -1;

    pub fn exited(code: i32) -> Self {
        Self {
            exit: ExitKind::Exited(code),
        }
    }

    pub fn signaled(signal: Option<i32>) -> Self {
        Self {
            exit: ExitKind::Signaled(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.exit == ExitKind::Exited(0)
    }

    /// The exit code, or [`ProcessResult::SIGNAL_SENTINEL`] after a signal.
    pub fn code(&self) -> i32 {
        match self.exit {
            ExitKind::Exited(code) => code,
            ExitKind::Signaled(_) => Self::SIGNAL_SENTINEL,
        }
    }

    fn from_status(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Self::exited(code),
            None => Self::signaled(signal_of(&status)),
        }
    }
}

#[cfg(unix)]
fn signal_of(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn signal_of(_status: &ExitStatus) -> Option<i32> {
    None
}

pub trait CommandRunner {
    fn run(&self, command: &str) -> Result<ProcessResult, ProcessError>;

    /// Run `command` as the application user inside the running `app` service.
    fn run_in_app_container(
        &self,
        compose_bin: &str,
        compose_file: &Path,
        command: &str,
    ) -> Result<ProcessResult, ProcessError> {
        self.run(&app_container_command(compose_bin, compose_file, command))
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, command: &str) -> Result<ProcessResult, ProcessError> {
        (**self).run(command)
    }
}

/// `<compose> -f <file> exec -T app gosu application <command>`
pub fn app_container_command(compose_bin: &str, compose_file: &Path, command: &str) -> String {
    format!(
        "{} -f {} exec -T {} gosu {} {}",
        compose_bin,
        shell_escape(&compose_file.display().to_string()),
        APP_SERVICE,
        APP_USER,
        command
    )
}

/// Command line for a script mounted in the application user's home.
pub fn app_script(script: &str, args: &[&str]) -> String {
    let mut line = shell_escape(&format!("{}/{}", APP_HOME, script));
    for arg in args {
        line.push(' ');
        line.push_str(&shell_escape(arg));
    }
    line
}

pub fn shell_escape(arg: &str) -> String {
    if arg.is_empty() {
        return "''".to_string();
    }
    if arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', "'\\''"))
}

pub fn shell_join<S: AsRef<str>>(args: &[S]) -> String {
    args.iter()
        .map(|a| shell_escape(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs command lines through `/bin/sh -c`, relaying output as it arrives.
pub struct ShellRunner {
    shell: String,
    timeout: Option<Duration>,
    stdout: OutputSink,
    stderr: OutputSink,
}

impl ShellRunner {
    pub fn new() -> Self {
        let stdout: OutputSink = Arc::new(Mutex::new(io::stdout()));
        let stderr: OutputSink = Arc::new(Mutex::new(io::stderr()));
        Self {
            shell: DEFAULT_SHELL.to_string(),
            timeout: None,
            stdout,
            stderr,
        }
    }

    /// Kill the child if it is still running after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_output(mut self, stdout: OutputSink, stderr: OutputSink) -> Self {
        self.stdout = stdout;
        self.stderr = stderr;
        self
    }

    fn wait(
        &self,
        child: &mut Child,
        command: &str,
    ) -> Result<ExitStatus, ProcessError> {
        let wait_error = |source| ProcessError::Wait {
            command: command.to_string(),
            source,
        };

        let Some(timeout) = self.timeout else {
            return child.wait().map_err(wait_error);
        };

        match child.wait_timeout(timeout).map_err(wait_error)? {
            Some(status) => Ok(status),
            None => {
                warn!(command, ?timeout, "subprocess timed out, killing it");
                if let Err(err) = kill_tree(child) {
                    warn!(error = %err, "failed to kill timed out subprocess");
                }
                let _ = child.wait();
                Err(ProcessError::TimedOut {
                    command: command.to_string(),
                    timeout,
                })
            }
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str) -> Result<ProcessResult, ProcessError> {
        info!(command, "running");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.timeout.is_some() {
            // Timed children lead their own process group.
            own_process_group(&mut cmd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                command: command.to_string(),
                source,
            })?;

        let forwarders: Vec<JoinHandle<()>> = [
            child
                .stdout
                .take()
                .map(|out| forward(out, Arc::clone(&self.stdout))),
            child
                .stderr
                .take()
                .map(|err| forward(err, Arc::clone(&self.stderr))),
        ]
        .into_iter()
        .flatten()
        .collect();

        let status = self.wait(&mut child, command)?;
        for handle in forwarders {
            let _ = handle.join();
        }

        let result = ProcessResult::from_status(status);
        debug!(command, ?result, "finished");
        Ok(result)
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

/// Kill the child and every process in its group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return child.kill();
    };
    // SAFETY: kill(2) with a negative pid only sends a signal to that group.
    if unsafe { libc::kill(-pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        child.kill()
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> io::Result<()> {
    child.kill()
}

fn forward<R: Read + Send + 'static>(mut reader: R, sink: OutputSink) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut buf = [0u8; FORWARD_BUFFER];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let mut out = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    // Keep draining even if the sink breaks so the child never blocks.
                    let _ = out.write_all(&buf[..n]).and_then(|_| out.flush());
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    })
}

/// A recorded call to [`SimulatedRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub cwd: PathBuf,
    /// Sorted file names present in `cwd` when the command ran.
    pub cwd_entries: Vec<String>,
}

/// Deterministic runner used in tests where shelling out is undesirable.
#[derive(Debug)]
pub struct SimulatedRunner {
    result: ProcessResult,
    invocations: Mutex<Vec<Invocation>>,
}

impl SimulatedRunner {
    pub fn success() -> Self {
        Self::with_result(ProcessResult::exited(0))
    }

    pub fn failure(code: i32) -> Self {
        Self::with_result(ProcessResult::exited(code))
    }

    pub fn with_result(result: ProcessResult) -> Self {
        Self {
            result,
            invocations: Mutex::new(Vec::new()),
        }
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CommandRunner for SimulatedRunner {
    fn run(&self, command: &str) -> Result<ProcessResult, ProcessError> {
        let cwd = env::current_dir().unwrap_or_default();
        let mut cwd_entries: Vec<String> = fs::read_dir(&cwd)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        cwd_entries.sort();

        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Invocation {
                command: command.to_string(),
                cwd,
                cwd_entries,
            });
        Ok(self.result)
    }
}
