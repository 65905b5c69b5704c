//! Daemon lifecycle around the phase controller.
//!
//! Startup opens the display connection and starts the screensaver once.
//! Shutdown always runs in the same order: locker, overlay, screensaver,
//! then the display connection.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CommandSpec, Config};
use crate::controller::{ControllerError, PhaseCommands, PhaseController};
use crate::idle::X11IdleProbe;
use crate::process::{ManagedProcess, ProcessKind, ProcessRunner, TokioRunner};
use crate::screensaver::XScreensaverCommand;

/// Owns the controller and the daemon-wide screensaver process.
pub struct Supervisor {
    controller: PhaseController,
    screensaver: Option<ManagedProcess>,
}

impl Supervisor {
    pub fn new(controller: PhaseController, screensaver: Option<ManagedProcess>) -> Self {
        Self {
            controller,
            screensaver,
        }
    }

    /// Connect to the display, start the screensaver and build the controller.
    ///
    /// `overlay` is the resolved overlay command (configured or built-in).
    pub async fn start(config: &Config, overlay: CommandSpec) -> Result<Self> {
        let display = config.display.clone();

        let probe = X11IdleProbe::connect(display.as_deref())
            .context("Failed to open idle-time source")?;

        let control = XScreensaverCommand::new(
            config.screensaver_command.clone(),
            display.clone(),
            config.one_shot_timeout(),
        );
        if config.replace_running_screensaver
            && let Err(e) = control.exit_running().await
        {
            warn!("Could not stop a running screensaver: {}", e);
        }

        let mut runner = TokioRunner::new(display);
        let screensaver = runner
            .spawn(ProcessKind::Screensaver, &config.screensaver)
            .context("Failed to start screensaver")?;
        info!(
            "Screensaver started (pid {:?}): {}",
            screensaver.pid(),
            config.screensaver
        );

        let controller = PhaseController::new(
            config.timings(),
            PhaseCommands {
                overlay,
                locker: config.locker.clone(),
            },
            Box::new(probe),
            Box::new(control),
            Box::new(runner),
        );

        Ok(Self::new(controller, Some(screensaver)))
    }

    /// Tick the controller until `shutdown` is cancelled or a fatal error
    /// occurs. Cleanup runs in both cases.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        info!("Supervisor running in phase {}", self.controller.phase());

        let result = loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested in phase {}", self.controller.phase());
                break Ok(());
            }
            if let Err(e) = self.controller.tick().await {
                break Err(e);
            }
        };

        self.shutdown().await;
        result
    }

    async fn shutdown(mut self) {
        self.controller.shutdown().await;

        if let Some(mut screensaver) = self.screensaver.take() {
            debug!("Stopping screensaver");
            screensaver.stop().await;
        }

        // Releases the display connection held by the idle probe
        drop(self.controller);
        info!("Shutdown complete");
    }
}
