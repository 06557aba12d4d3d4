//! Process group control.
//!
//! Every child is started as the leader of a fresh OS process group so that
//! teardown reaches anything it spawned in turn (a package manager running a
//! dev server, a backend running a compiler). Shutdown asks the whole group
//! to stop, waits for the grace period, then force-kills the group and reaps
//! the leader.
//!
//! The platform specifics live in private `#[cfg]` helpers; callers only see
//! the [`ProcessGroups`] trait.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Result;
use tokio::process::Command;
use tokio::time::Instant;

use crate::errors::{StartError, WaitError};
use crate::process::{Completion, ManagedProcess, ProcessSpec, ShutdownOutcome};

/// How long a child gets to exit after the graceful request.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[cfg(unix)]
const GROUP_POLL: Duration = Duration::from_millis(50);

/// Starts and stops supervised children.
#[allow(async_fn_in_trait)]
pub trait ProcessGroups {
    /// Handle kept for a running child.
    type Process;

    /// Launches `spec` in its own process group with inherited output.
    fn start(&self, spec: &ProcessSpec) -> Result<Self::Process, StartError>;

    /// Waits for a started process to finish on its own.
    async fn wait(&self, process: &mut Self::Process) -> Result<Completion, WaitError>;

    /// Stops the process group of `process`, escalating after `grace`.
    ///
    /// Returns only once the leader has been reaped. `None` is a no-op.
    async fn shutdown(&self, process: Option<Self::Process>, grace: Duration) -> ShutdownOutcome;
}

/// Real process groups backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessGroups;

impl ProcessGroups for OsProcessGroups {
    type Process = ManagedProcess;

    fn start(&self, spec: &ProcessSpec) -> Result<ManagedProcess, StartError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .env_clear()
            .envs(spec.env.iter())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        if spec.inherit_stdin {
            command.stdin(Stdio::inherit());
        } else {
            command.stdin(Stdio::null());
        }
        command.kill_on_drop(true);
        new_process_group(&mut command);

        let child = command.spawn().map_err(|source| StartError {
            role: spec.role,
            program: spec.program.clone(),
            source,
        })?;
        let pid = child.id().unwrap_or(0);
        let group = process_group_of(pid);
        tracing::debug!(role = %spec.role, pid, ?group, command = %spec.command_line(), "started");

        Ok(ManagedProcess {
            role: spec.role,
            program: spec.program.clone(),
            pid,
            group,
            child,
        })
    }

    async fn wait(&self, process: &mut ManagedProcess) -> Result<Completion, WaitError> {
        let status = process.child.wait().await.map_err(|source| WaitError {
            role: process.role,
            program: process.program.clone(),
            source,
        })?;
        Ok(Completion::from(status))
    }

    async fn shutdown(&self, process: Option<ManagedProcess>, grace: Duration) -> ShutdownOutcome {
        let Some(mut process) = process else {
            return ShutdownOutcome::NotStarted;
        };
        let deadline = Instant::now() + grace;
        if let Ok(Some(status)) = process.child.try_wait() {
            tracing::debug!(role = %process.role, %status, "already exited");
            if process.group.is_some() {
                request_stop(&process);
                reap_group(&process, deadline).await;
            }
            return ShutdownOutcome::AlreadyExited(status);
        }

        request_stop(&process);
        match wait_for_exit(&mut process.child, grace).await {
            Ok(Some(status)) => {
                tracing::debug!(role = %process.role, %status, "exited after stop request");
                reap_group(&process, deadline).await;
                return ShutdownOutcome::Exited(status);
            }
            Ok(None) => {
                tracing::info!(
                    "{} did not exit within {:?}, killing process group",
                    process.role,
                    grace
                );
            }
            Err(err) => {
                tracing::warn!(role = %process.role, error = %err, "waiting for exit failed");
            }
        }

        force_stop(&mut process);
        match process.child.wait().await {
            Ok(status) => ShutdownOutcome::Killed(status),
            Err(err) => ShutdownOutcome::Lost(err.to_string()),
        }
    }
}

async fn wait_for_exit(
    child: &mut tokio::process::Child,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>> {
    if timeout.is_zero() {
        return Ok(None);
    }
    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(Some(status)),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => Ok(None),
    }
}

#[cfg(unix)]
fn new_process_group(command: &mut Command) {
    // SAFETY: only setpgid runs between fork and exec, and it is
    // async-signal-safe.
    unsafe {
        command.pre_exec(|| {
            if libc::setpgid(0, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(windows)]
fn new_process_group(command: &mut Command) {
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    command.creation_flags(CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn new_process_group(_command: &mut Command) {}

#[cfg(unix)]
fn process_group_of(pid: u32) -> Option<u32> {
    if pid == 0 {
        return None;
    }
    // SAFETY: getpgid only reads kernel state for the given pid.
    let (pgid, own) = unsafe { (libc::getpgid(pid as libc::pid_t), libc::getpgrp()) };
    // Never signal our own group, even if the child somehow stayed in it.
    if pgid <= 0 || pgid == own {
        return None;
    }
    Some(pgid as u32)
}

#[cfg(not(unix))]
fn process_group_of(pid: u32) -> Option<u32> {
    // A new Windows process group is identified by its leader's pid.
    (pid != 0).then_some(pid)
}

#[cfg(unix)]
fn request_stop(process: &ManagedProcess) {
    signal_process(process, libc::SIGTERM);
}

#[cfg(unix)]
fn force_stop(process: &mut ManagedProcess) {
    if process.group.is_some() {
        signal_process(process, libc::SIGKILL);
    } else {
        let _ = process.child.start_kill();
    }
}

#[cfg(unix)]
fn signal_process(process: &ManagedProcess, sig: libc::c_int) {
    let target = match process.group {
        Some(pgid) => -(pgid as libc::pid_t),
        None => process.pid as libc::pid_t,
    };
    if target == 0 {
        return;
    }
    // SAFETY: kill has no memory-safety preconditions.
    let rc = unsafe { libc::kill(target, sig) };
    tracing::debug!(role = %process.role, target, sig, rc, "signalled");
}

// Waits until no member of the group is left, or kills the rest once
// `deadline` passes. Members reparented to a non-reaping init linger as
// zombies, which only delays the kill.
#[cfg(unix)]
async fn reap_group(process: &ManagedProcess, deadline: Instant) {
    let Some(pgid) = process.group else {
        return;
    };
    while group_has_members(pgid) {
        if Instant::now() >= deadline {
            tracing::info!("{} left processes behind, killing process group", process.role);
            signal_process(process, libc::SIGKILL);
            return;
        }
        tokio::time::sleep(GROUP_POLL).await;
    }
}

#[cfg(unix)]
fn group_has_members(pgid: u32) -> bool {
    // SAFETY: signal 0 only checks that the group exists.
    unsafe { libc::kill(-(pgid as libc::pid_t), 0) == 0 }
}

#[cfg(not(unix))]
async fn reap_group(_process: &ManagedProcess, _deadline: Instant) {}

#[cfg(windows)]
fn request_stop(process: &ManagedProcess) {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    // Windows has no SIGTERM; CTRL_BREAK is the closest console signal we can emit.
    let Some(group) = process.group else {
        return;
    };
    // SAFETY: plain FFI call taking two integers.
    unsafe {
        let _ = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, group);
    }
}

#[cfg(not(unix))]
fn force_stop(process: &mut ManagedProcess) {
    let _ = process.child.start_kill();
}

#[cfg(all(not(unix), not(windows)))]
fn request_stop(_process: &ManagedProcess) {}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::process::ExitStatusExt;
    use std::path::PathBuf;

    use super::*;
    use crate::environment::EnvironmentSet;
    use crate::process::Role;

    fn shell(script: &str) -> ProcessSpec {
        ProcessSpec {
            role: Role::Backend,
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd: PathBuf::from("/"),
            env: EnvironmentSet::from_process(),
            inherit_stdin: false,
        }
    }

    async fn run(spec: &ProcessSpec) -> Completion {
        let mut process = OsProcessGroups.start(spec).unwrap();
        OsProcessGroups.wait(&mut process).await.unwrap()
    }

    #[tokio::test]
    async fn wait_reports_exit_code() {
        assert_eq!(run(&shell("exit 3")).await.code, Some(3));
    }

    #[tokio::test]
    async fn child_sees_exactly_the_given_environment() {
        let mut spec = shell(r#"test "$APPSTART_TEST_VAR" = "hello" && test -z "$APPSTART_UNSET""#);
        spec.env = [("APPSTART_TEST_VAR", "hello")].into_iter().collect();
        assert!(run(&spec).await.success());
    }

    #[tokio::test]
    async fn child_leads_its_own_group() {
        let process = OsProcessGroups.start(&shell("sleep 30")).unwrap();
        assert_eq!(process.group, Some(process.pid));
        let outcome = OsProcessGroups.shutdown(Some(process), SHUTDOWN_GRACE).await;
        assert!(matches!(outcome, ShutdownOutcome::Exited(_)));
    }

    #[tokio::test]
    async fn cooperative_child_exits_on_graceful_request() {
        let process = OsProcessGroups.start(&shell("sleep 30 & wait")).unwrap();
        let outcome = OsProcessGroups.shutdown(Some(process), SHUTDOWN_GRACE).await;
        match outcome {
            ShutdownOutcome::Exited(status) => assert_eq!(status.signal(), Some(libc::SIGTERM)),
            other => panic!("expected graceful exit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stubborn_child_is_killed_after_grace() {
        let process = OsProcessGroups
            .start(&shell(r#"trap "" TERM; sleep 30"#))
            .unwrap();
        // Let the shell install its trap before the stop request arrives.
        tokio::time::sleep(Duration::from_millis(300)).await;
        let started = std::time::Instant::now();
        let outcome = OsProcessGroups
            .shutdown(Some(process), Duration::from_millis(300))
            .await;
        assert!(started.elapsed() >= Duration::from_millis(300));
        match outcome {
            ShutdownOutcome::Killed(status) => assert_eq!(status.signal(), Some(libc::SIGKILL)),
            other => panic!("expected forced kill, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exited_child_reports_already_exited() {
        let mut process = OsProcessGroups.start(&shell("exit 0")).unwrap();
        OsProcessGroups.wait(&mut process).await.unwrap();
        let outcome = OsProcessGroups.shutdown(Some(process), SHUTDOWN_GRACE).await;
        assert!(matches!(outcome, ShutdownOutcome::AlreadyExited(_)));
    }

    #[tokio::test]
    async fn non_utf8_values_reach_the_child() {
        use std::os::unix::ffi::OsStringExt;

        let mut spec = shell(r#"test "$APPSTART_BYTES" = "$(printf 'caf\351')""#);
        spec.env = EnvironmentSet::new();
        spec.env.insert(
            "APPSTART_BYTES",
            std::ffi::OsString::from_vec(b"caf\xe9".to_vec()),
        );
        assert!(run(&spec).await.success());
    }

    // Group members are watched through /proc; zombies count as gone.
    #[cfg(target_os = "linux")]
    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    async fn gone_within(pid: i32, limit: Duration) -> bool {
        let started = std::time::Instant::now();
        while is_running(pid) {
            if started.elapsed() > limit {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    #[cfg(target_os = "linux")]
    async fn read_pid(path: &std::path::Path) -> i32 {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(path) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no pid written to {}", path.display());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn group_is_stopped_after_its_leader_exited() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > {}; exit 0", pid_file.display());
        let mut process = OsProcessGroups.start(&shell(&script)).unwrap();
        assert!(OsProcessGroups.wait(&mut process).await.unwrap().success());
        let grandchild = read_pid(&pid_file).await;
        assert!(is_running(grandchild));

        let outcome = OsProcessGroups
            .shutdown(Some(process), Duration::from_millis(500))
            .await;

        assert!(matches!(outcome, ShutdownOutcome::AlreadyExited(_)));
        assert!(gone_within(grandchild, Duration::from_secs(2)).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn graceful_request_reaches_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());
        let process = OsProcessGroups.start(&shell(&script)).unwrap();
        let grandchild = read_pid(&pid_file).await;

        let outcome = OsProcessGroups.shutdown(Some(process), SHUTDOWN_GRACE).await;

        assert!(matches!(outcome, ShutdownOutcome::Exited(_)));
        assert!(gone_within(grandchild, Duration::from_secs(3)).await);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn grandchild_ignoring_stop_request_is_killed_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let script = format!(
            r#"(trap "" TERM; sleep 30) & echo $! > {}; wait"#,
            pid_file.display()
        );
        let process = OsProcessGroups.start(&shell(&script)).unwrap();
        let grandchild = read_pid(&pid_file).await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let outcome = OsProcessGroups
            .shutdown(Some(process), Duration::from_millis(400))
            .await;

        assert!(matches!(outcome, ShutdownOutcome::Exited(_)));
        assert!(gone_within(grandchild, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn absent_process_is_a_noop() {
        let outcome = OsProcessGroups.shutdown(None, SHUTDOWN_GRACE).await;
        assert!(matches!(outcome, ShutdownOutcome::NotStarted));
    }

    #[tokio::test]
    async fn missing_binary_is_a_start_error() {
        let mut spec = shell("true");
        spec.role = Role::Frontend;
        spec.program = "appstart-no-such-binary".to_string();
        let err = OsProcessGroups.start(&spec).unwrap_err();
        assert_eq!(err.role, Role::Frontend);
        assert_eq!(err.source.kind(), std::io::ErrorKind::NotFound);
    }
}
