//! Termination signal handling.
//!
//! The OS listeners are registered synchronously in [`ShutdownSignal::arm`],
//! before any child exists, so a signal can never slip in between spawning a
//! child and arming the handler. The first signal cancels a shared token;
//! everything that blocks on the run observes that token.

use std::io;

use tokio_util::sync::CancellationToken;

/// Cancelled exactly once, when the run should tear down.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// A signal that only fires when cancelled by hand.
    pub fn manual() -> Self {
        Self::default()
    }

    /// Registers for SIGINT/SIGTERM (Ctrl+C/Ctrl+Break on Windows).
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm() -> io::Result<Self> {
        let shutdown = Self::manual();
        let token = shutdown.token.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigterm = signal(SignalKind::terminate())?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = sigint.recv() => tracing::debug!("received SIGINT"),
                    _ = sigterm.recv() => tracing::debug!("received SIGTERM"),
                }
                token.cancel();
            });
        }

        #[cfg(windows)]
        {
            let mut ctrl_c = tokio::signal::windows::ctrl_c()?;
            let mut ctrl_break = tokio::signal::windows::ctrl_break()?;
            tokio::spawn(async move {
                tokio::select! {
                    _ = ctrl_c.recv() => tracing::debug!("received Ctrl+C"),
                    _ = ctrl_break.recv() => tracing::debug!("received Ctrl+Break"),
                }
                token.cancel();
            });
        }

        #[cfg(not(any(unix, windows)))]
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });

        Ok(shutdown)
    }

    /// Triggers teardown without an OS signal.
    #[cfg(test)]
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the signal has fired.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}
