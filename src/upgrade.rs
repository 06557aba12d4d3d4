//! `upgrade` subcommand.
//!
//! Template upgrades are owned by a script shipped with the installation;
//! the launcher only locates it and forwards `--dry-run`.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use tokio::process::Command;

use crate::layout::Layout;

/// Runs the installation's upgrade script and waits for it.
pub async fn run_upgrade(layout: &Layout, dry_run: bool) -> Result<()> {
    let script = layout.upgrade_script();
    if !script.is_file() {
        bail!("upgrade script not found at {}", script.display());
    }

    let mut command = Command::new(&script);
    command
        .current_dir(&layout.root)
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if dry_run {
        command.arg("--dry-run");
    }
    tracing::debug!(script = %script.display(), dry_run, "running upgrade");

    let status = command
        .status()
        .await
        .with_context(|| format!("failed to run {}", script.display()))?;
    if !status.success() {
        bail!("upgrade failed: {status}");
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    fn install_script(layout: &Layout, body: &str) {
        let path = layout.upgrade_script();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn missing_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_upgrade(&Layout::new(dir.path()), false).await.unwrap_err();
        assert!(err.to_string().contains("upgrade script not found"));
    }

    #[tokio::test]
    async fn dry_run_flag_is_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_script(&layout, r#"echo "$@" > args.txt"#);

        run_upgrade(&layout, true).await.unwrap();
        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(args.trim(), "--dry-run");
    }

    #[tokio::test]
    async fn failing_script_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path());
        install_script(&layout, "exit 4");

        let err = run_upgrade(&layout, false).await.unwrap_err();
        assert!(err.to_string().starts_with("upgrade failed"));
    }
}
