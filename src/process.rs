//! Data structures for launching and tracking child processes.
//!
//! This module defines what to launch (`ProcessSpec`), which child it is
//! (`Role`), the handle kept while it runs (`ManagedProcess`), and how its
//! life ended (`Completion`, `ShutdownOutcome`).

use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::environment::EnvironmentSet;

/// Which of the two supervised children a process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Frontend,
    Backend,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Frontend => f.write_str("frontend"),
            Role::Backend => f.write_str("backend"),
        }
    }
}

/// Specification for a process to be run.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    /// Child this command belongs to.
    pub role: Role,
    /// The command executable.
    pub program: String,
    /// Arguments for the command.
    pub args: Vec<String>,
    /// Working directory.
    pub cwd: PathBuf,
    /// Complete environment; nothing else is inherited.
    pub env: EnvironmentSet,
    /// Whether the child shares the launcher's stdin.
    pub inherit_stdin: bool,
}

impl ProcessSpec {
    /// Command line as typed in a shell, for messages.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A running child together with the process group it leads.
#[derive(Debug)]
pub struct ManagedProcess {
    pub role: Role,
    pub program: String,
    pub pid: u32,
    /// Process group id, when it could be resolved.
    pub group: Option<u32>,
    pub child: tokio::process::Child,
}

/// Result of a command that was run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Exit code; `None` when the process was ended by a signal.
    pub code: Option<i32>,
}

impl Completion {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for Completion {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// How a `shutdown` call ended a process.
#[derive(Debug)]
pub enum ShutdownOutcome {
    /// There was no process to stop.
    NotStarted,
    /// The process had already exited; no signal was sent.
    AlreadyExited(ExitStatus),
    /// Exited within the grace period after the graceful request.
    Exited(ExitStatus),
    /// Did not exit in time and was force-killed, then reaped.
    Killed(ExitStatus),
    /// Waiting on the process failed; its exit could not be confirmed.
    Lost(String),
}
