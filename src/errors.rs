//! Error types for launching and tearing down children.

use std::path::PathBuf;

use thiserror::Error;

use crate::process::{Completion, Role};

/// A child could not be spawned.
#[derive(Error, Debug)]
#[error("failed to start {role} command `{program}`: {source}")]
pub struct StartError {
    pub role: Role,
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// A started child could not be waited on.
#[derive(Error, Debug)]
#[error("failed to wait for {role} command `{program}`: {source}")]
pub struct WaitError {
    pub role: Role,
    pub program: String,
    #[source]
    pub source: std::io::Error,
}

/// Fatal startup failures. Any of these aborts the run with exit status 1.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to resolve the launcher executable: {0}")]
    Executable(#[source] std::io::Error),

    #[error("{what} directory not found at {}", .path.display())]
    MissingDirectory { what: &'static str, path: PathBuf },

    #[error("{step} failed: {completion}")]
    StepFailed {
        step: String,
        completion: Completion,
    },

    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Wait(#[from] WaitError),
}

/// Cleanup of stale port listeners failed for at least one port.
#[derive(Error, Debug)]
#[error("could not clear ports: {}", .failures.join("; "))]
pub struct OccupantError {
    pub failures: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = LaunchError::MissingDirectory {
            what: "apps",
            path: PathBuf::from("/opt/app/apps"),
        };
        assert_eq!(err.to_string(), "apps directory not found at /opt/app/apps");

        let err = LaunchError::StepFailed {
            step: "bun run build".to_string(),
            completion: Completion { code: Some(1) },
        };
        assert_eq!(err.to_string(), "bun run build failed: exit code 1");

        let err = WaitError {
            role: Role::Frontend,
            program: "bun".to_string(),
            source: std::io::ErrorKind::Interrupted.into(),
        };
        assert!(err.to_string().starts_with("failed to wait for frontend command `bun`: "));

        let err = OccupantError {
            failures: vec!["port 4000: lsof not found".into(), "port 5173: kill 42 failed".into()],
        };
        assert_eq!(
            err.to_string(),
            "could not clear ports: port 4000: lsof not found; port 5173: kill 42 failed"
        );
    }
}
