//! Commands for the frontend toolchain and the backend runtime.

use std::path::Path;

use crate::build_info::RunMode;
use crate::environment::EnvironmentSet;
use crate::process::{ProcessSpec, Role};

/// Frontend package manager.
pub const FRONTEND_TOOL: &str = "bun";
/// Backend runtime CLI.
pub const BACKEND_TOOL: &str = "encore";

fn spec(role: Role, program: &str, args: &[&str], cwd: &Path, env: EnvironmentSet) -> ProcessSpec {
    ProcessSpec {
        role,
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        cwd: cwd.to_path_buf(),
        env,
        inherit_stdin: false,
    }
}

/// Whether dependencies still need installing.
pub fn needs_install(frontend_dir: &Path) -> bool {
    !frontend_dir.join("node_modules").exists()
}

/// `bun install` in the frontend package.
pub fn install(frontend_dir: &Path, env: EnvironmentSet) -> ProcessSpec {
    spec(Role::Frontend, FRONTEND_TOOL, &["install"], frontend_dir, env)
}

/// `bun run build` in the frontend package.
pub fn build(frontend_dir: &Path, env: EnvironmentSet) -> ProcessSpec {
    spec(Role::Frontend, FRONTEND_TOOL, &["run", "build"], frontend_dir, env)
}

/// Frontend dev server bound to `port`.
pub fn dev_server(frontend_dir: &Path, port: u16, env: EnvironmentSet) -> ProcessSpec {
    let port = port.to_string();
    spec(
        Role::Frontend,
        FRONTEND_TOOL,
        &["run", "dev", "--port", port.as_str()],
        frontend_dir,
        env,
    )
}

/// Backend runtime on `port`, never opening a browser.
pub fn backend(apps_dir: &Path, mode: RunMode, port: u16, env: EnvironmentSet) -> ProcessSpec {
    let port = port.to_string();
    let mut args = vec!["run"];
    if mode == RunMode::Production {
        args.extend(["--env", "production"]);
    }
    args.extend(["--port", port.as_str(), "--browser=never"]);
    let mut command = spec(Role::Backend, BACKEND_TOOL, &args, apps_dir, env);
    command.inherit_stdin = true;
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_args_depend_on_mode() {
        let dir = Path::new("/opt/app/apps");
        let dev = backend(dir, RunMode::Development, 4478, EnvironmentSet::new());
        assert_eq!(dev.command_line(), "encore run --port 4478 --browser=never");
        assert!(dev.inherit_stdin);
        assert_eq!(dev.cwd, dir);

        let prod = backend(dir, RunMode::Production, 4478, EnvironmentSet::new());
        assert_eq!(
            prod.command_line(),
            "encore run --env production --port 4478 --browser=never"
        );
    }

    #[test]
    fn frontend_commands_run_in_the_package() {
        let dir = Path::new("/opt/app/apps/frontend");
        let dev = dev_server(dir, 5651, EnvironmentSet::new());
        assert_eq!(dev.command_line(), "bun run dev --port 5651");
        assert_eq!(dev.role, Role::Frontend);
        assert!(!dev.inherit_stdin);
        assert_eq!(build(dir, EnvironmentSet::new()).command_line(), "bun run build");
        assert_eq!(install(dir, EnvironmentSet::new()).command_line(), "bun install");
    }

    #[test]
    fn install_is_needed_until_node_modules_exists() {
        let dir = tempfile::tempdir().unwrap();
        assert!(needs_install(dir.path()));
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        assert!(!needs_install(dir.path()));
    }
}
