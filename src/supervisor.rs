//! Run sequencing.
//!
//! [`launch`] prepares everything a run needs (layout, ports, `.env`
//! overrides, stale listener cleanup, signal handlers) and hands over to
//! [`Supervisor::run`], which starts the children for the compiled-in mode,
//! blocks until a termination signal and tears the children down again.

use std::time::Duration;

use crate::build_info::{BuildInfo, RunMode};
use crate::commands;
use crate::environment::{compose, EnvironmentSet};
use crate::envfile;
use crate::errors::LaunchError;
use crate::group::{OsProcessGroups, ProcessGroups, SHUTDOWN_GRACE};
use crate::layout::Layout;
use crate::occupants;
use crate::ports::{self, Identity, LaunchConfig, BACKEND_PORT_VAR, FRONTEND_PORT_VAR};
use crate::process::{Completion, ProcessSpec, Role, ShutdownOutcome};
use crate::signals::ShutdownSignal;

/// Pause after teardown so the OS can release the ports before we exit.
pub const PORT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How each child ended.
#[derive(Debug)]
pub struct Teardown {
    pub frontend: ShutdownOutcome,
    pub backend: ShutdownOutcome,
}

/// Runs the launcher for this installation until a termination signal.
pub async fn launch(build: &BuildInfo) -> Result<Teardown, LaunchError> {
    let layout = Layout::from_current_exe()?;
    layout.validate()?;

    let ports = ports::allocate(&Identity::current(), &layout.root, |key| {
        std::env::var(key).ok()
    });
    let overrides = envfile::load(&layout.env_file());

    if let Err(err) =
        occupants::kill_port_occupants(&[ports.frontend_port, ports.backend_port]).await
    {
        tracing::warn!("Failed to kill existing processes: {err}");
    }

    let shutdown = ShutdownSignal::arm().map_err(LaunchError::Signals)?;

    Supervisor::new(
        OsProcessGroups,
        build,
        &layout,
        ports,
        EnvironmentSet::from_process(),
        overrides,
    )
    .run(&shutdown)
    .await
}

/// Owns the children of one run.
pub struct Supervisor<'a, G: ProcessGroups> {
    groups: G,
    build: &'a BuildInfo,
    layout: &'a Layout,
    ports: LaunchConfig,
    base_env: EnvironmentSet,
    overrides: Option<EnvironmentSet>,
    grace: Duration,
    settle: Duration,
}

impl<'a, G: ProcessGroups> Supervisor<'a, G> {
    pub fn new(
        groups: G,
        build: &'a BuildInfo,
        layout: &'a Layout,
        ports: LaunchConfig,
        base_env: EnvironmentSet,
        overrides: Option<EnvironmentSet>,
    ) -> Self {
        Self {
            groups,
            build,
            layout,
            ports,
            base_env,
            overrides,
            grace: SHUTDOWN_GRACE,
            settle: PORT_SETTLE_DELAY,
        }
    }

    /// Overrides the shutdown grace period and the final settle delay.
    pub fn with_timings(mut self, grace: Duration, settle: Duration) -> Self {
        self.grace = grace;
        self.settle = settle;
        self
    }

    /// Starts the children, waits for `shutdown`, then stops them.
    ///
    /// The shutdown signal must already be armed.
    pub async fn run(self, shutdown: &ShutdownSignal) -> Result<Teardown, LaunchError> {
        let name = &self.build.name;
        let frontend = match self.build.mode {
            RunMode::Production => {
                println!("Building {name} frontend app...");
                if !self.build_frontend(shutdown).await? {
                    return Ok(self.interrupted(None).await);
                }
                println!(
                    "Starting {name} in production mode (port {})...",
                    self.ports.backend_port
                );
                None
            }
            RunMode::Development => {
                println!("Starting {name} in development mode:");
                println!("  Frontend: http://localhost:{}", self.ports.frontend_port);
                println!("  API:      http://localhost:{}", self.ports.backend_port);
                self.start_frontend(shutdown).await?
            }
        };

        if shutdown.is_cancelled() {
            return Ok(self.interrupted(frontend).await);
        }

        let backend_spec = commands::backend(
            &self.layout.apps_dir(),
            self.build.mode,
            self.ports.backend_port,
            self.backend_env(),
        );
        let backend = match self.groups.start(&backend_spec) {
            Ok(process) => process,
            Err(err) => {
                self.groups.shutdown(frontend, self.grace).await;
                return Err(err.into());
            }
        };

        shutdown.wait().await;
        println!("\nShutting down...");

        let frontend = self.groups.shutdown(frontend, self.grace).await;
        report(Role::Frontend, &frontend);
        let backend = self.groups.shutdown(Some(backend), self.grace).await;
        report(Role::Backend, &backend);

        tokio::time::sleep(self.settle).await;
        Ok(Teardown { frontend, backend })
    }

    fn toolchain_env(&self) -> EnvironmentSet {
        compose(
            &self.base_env,
            self.overrides.as_ref(),
            std::iter::empty::<(String, String)>(),
        )
    }

    fn frontend_env(&self) -> EnvironmentSet {
        compose(
            &self.base_env,
            self.overrides.as_ref(),
            [(BACKEND_PORT_VAR, self.ports.backend_port.to_string())],
        )
    }

    fn backend_env(&self) -> EnvironmentSet {
        compose(
            &self.base_env,
            self.overrides.as_ref(),
            [
                (FRONTEND_PORT_VAR, self.ports.frontend_port.to_string()),
                (BACKEND_PORT_VAR, self.ports.backend_port.to_string()),
            ],
        )
    }

    // Runs a one-shot step to completion. `None` means the run was
    // interrupted and the step has been stopped.
    async fn run_step(
        &self,
        spec: &ProcessSpec,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<Completion>, LaunchError> {
        let mut process = self.groups.start(spec)?;
        let finished = tokio::select! {
            result = self.groups.wait(&mut process) => Some(result),
            _ = shutdown.wait() => None,
        };
        match finished {
            Some(result) => Ok(Some(result?)),
            None => {
                self.groups.shutdown(Some(process), self.grace).await;
                Ok(None)
            }
        }
    }

    // Production: install if needed, then build. Any failure is fatal.
    // Returns false when interrupted.
    async fn build_frontend(&self, shutdown: &ShutdownSignal) -> Result<bool, LaunchError> {
        let dir = self.layout.require_frontend()?;
        let env = self.toolchain_env();
        let mut steps = Vec::new();
        if commands::needs_install(&dir) {
            steps.push(commands::install(&dir, env.clone()));
        }
        steps.push(commands::build(&dir, env));

        for step in &steps {
            match self.run_step(step, shutdown).await? {
                Some(completion) if completion.success() => {}
                Some(completion) => {
                    return Err(LaunchError::StepFailed {
                        step: step.command_line(),
                        completion,
                    })
                }
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    // Development: dependencies must install, but a dev server that cannot
    // be spawned only costs us the frontend. `Ok(None)` means no frontend.
    async fn start_frontend(
        &self,
        shutdown: &ShutdownSignal,
    ) -> Result<Option<G::Process>, LaunchError> {
        let dir = self.layout.require_frontend()?;

        if commands::needs_install(&dir) {
            println!("Installing frontend dependencies...");
            let install = commands::install(&dir, self.toolchain_env());
            match self.run_step(&install, shutdown).await? {
                Some(completion) if completion.success() => {}
                Some(completion) => {
                    return Err(LaunchError::StepFailed {
                        step: install.command_line(),
                        completion,
                    })
                }
                None => return Ok(None),
            }
        }

        let port = self.ports.frontend_port;
        match self
            .groups
            .start(&commands::dev_server(&dir, port, self.frontend_env()))
        {
            Ok(process) => {
                println!("Frontend dev server started on port {port}");
                Ok(Some(process))
            }
            Err(err) => {
                tracing::warn!("Failed to start frontend dev server: {err}");
                Ok(None)
            }
        }
    }

    async fn interrupted(&self, frontend: Option<G::Process>) -> Teardown {
        println!("\nShutting down...");
        let frontend = self.groups.shutdown(frontend, self.grace).await;
        report(Role::Frontend, &frontend);
        Teardown {
            frontend,
            backend: ShutdownOutcome::NotStarted,
        }
    }
}

fn report(role: Role, outcome: &ShutdownOutcome) {
    match outcome {
        ShutdownOutcome::NotStarted => {}
        ShutdownOutcome::AlreadyExited(status) => {
            tracing::info!("{role} had already exited ({status})")
        }
        ShutdownOutcome::Exited(status) => tracing::debug!("{role} stopped ({status})"),
        ShutdownOutcome::Killed(status) => tracing::info!("{role} was force-killed ({status})"),
        ShutdownOutcome::Lost(err) => tracing::warn!("could not confirm {role} exit: {err}"),
    }
}
