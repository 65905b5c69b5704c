//! Phase state machine.
//!
//! Three operational phases, driven by cooperative polling:
//!
//! | Current | Condition                          | Action       | Next    |
//! |---------|------------------------------------|--------------|---------|
//! | Idle    | idle >= `idle_timeout`             | spawn overlay| Blanked |
//! | Blanked | screensaver reports non-blanked    | spawn locker | Locked  |
//! | Locked  | locker exited                      | kill overlay | Idle    |
//! | Locked  | idle >= `locked_idle_timeout`      | kill locker  | Blanked |
//!
//! Entering `Blanked` always issues a synchronous "activate" to the
//! screensaver. The overlay stays up across `Blanked` and `Locked` and is only
//! removed when the session returns to `Idle`.

use std::fmt;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info, trace, warn};

use crate::config::{CommandSpec, PhaseTimings};
use crate::idle::{IdleError, IdleProbe};
use crate::process::{ManagedProcess, ProcessError, ProcessKind, ProcessRunner};
use crate::screensaver::{BlankStatus, ScreensaverControl};

/// Operational phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Blanked,
    Locked,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Blanked => "blanked",
            Self::Locked => "locked",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one `Locked` sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockedOutcome {
    /// The locked session stayed idle past `locked_idle_timeout`.
    TimeIsOut,
    /// The locker exited.
    Unlocked,
}

/// A phase change performed by a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Phase,
    pub to: Phase,
}

/// Fatal controller errors. Anything recoverable is handled inside the tick.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Idle(#[from] IdleError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("Locked phase has no locker process")]
    LockerMissing,
}

/// Commands the controller spawns per phase.
#[derive(Debug, Clone)]
pub struct PhaseCommands {
    pub overlay: CommandSpec,
    pub locker: CommandSpec,
}

/// Owns the overlay and locker processes and decides every transition.
pub struct PhaseController {
    phase: Phase,
    timings: PhaseTimings,
    commands: PhaseCommands,
    probe: Box<dyn IdleProbe>,
    screensaver: Box<dyn ScreensaverControl>,
    runner: Box<dyn ProcessRunner>,
    overlay: Option<ManagedProcess>,
    locker: Option<ManagedProcess>,
}

impl PhaseController {
    /// Create a controller in the `Idle` phase. Nothing is spawned yet.
    pub fn new(
        timings: PhaseTimings,
        commands: PhaseCommands,
        probe: Box<dyn IdleProbe>,
        screensaver: Box<dyn ScreensaverControl>,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        Self {
            phase: Phase::Idle,
            timings,
            commands,
            probe,
            screensaver,
            runner,
            overlay: None,
            locker: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn overlay(&self) -> Option<&ManagedProcess> {
        self.overlay.as_ref()
    }

    pub fn locker(&self) -> Option<&ManagedProcess> {
        self.locker.as_ref()
    }

    /// Run one polling iteration of the current phase.
    ///
    /// Returns the transition taken, if any. Errors are fatal.
    pub async fn tick(&mut self) -> Result<Option<Transition>, ControllerError> {
        match self.phase {
            Phase::Idle => self.tick_idle().await,
            Phase::Blanked => self.tick_blanked().await,
            Phase::Locked => self.tick_locked().await,
        }
    }

    /// Sample first, sleep only if the threshold has not been reached.
    async fn tick_idle(&mut self) -> Result<Option<Transition>, ControllerError> {
        if self.probe.idle_time_is_out(self.timings.idle_timeout)? {
            debug!("Idle timeout ({:?}) reached", self.timings.idle_timeout);
            self.spawn_overlay()?;
            return self.enter(Phase::Blanked).await.map(Some);
        }

        sleep(self.timings.idle_poll).await;
        Ok(None)
    }

    async fn tick_blanked(&mut self) -> Result<Option<Transition>, ControllerError> {
        sleep(self.timings.blanked_poll).await;

        match self.screensaver.status().await? {
            BlankStatus::NonBlanked => {
                debug!("Screensaver left blanking");
                self.enter(Phase::Locked).await.map(Some)
            }
            status => {
                trace!("Still blanked ({:?})", status);
                Ok(None)
            }
        }
    }

    async fn tick_locked(&mut self) -> Result<Option<Transition>, ControllerError> {
        sleep(self.timings.locked_poll).await;

        match self.sample_locked()? {
            Some(LockedOutcome::Unlocked) => {
                info!("Locker exited, unlocking");
                self.locker = None;
                if let Some(mut overlay) = self.overlay.take() {
                    overlay.stop().await;
                }
                self.enter(Phase::Idle).await.map(Some)
            }
            Some(LockedOutcome::TimeIsOut) => {
                info!(
                    "Locked session idle for {:?}, restarting blanking",
                    self.timings.locked_idle_timeout
                );
                if let Some(mut locker) = self.locker.take() {
                    locker.stop().await;
                }
                self.enter(Phase::Blanked).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Timeout is checked before liveness: a live locker past the locked
    /// idle threshold is still a timeout.
    fn sample_locked(&mut self) -> Result<Option<LockedOutcome>, ControllerError> {
        if self.probe.idle_time_is_out(self.timings.locked_idle_timeout)? {
            return Ok(Some(LockedOutcome::TimeIsOut));
        }

        let locker = self.locker.as_mut().ok_or(ControllerError::LockerMissing)?;
        if locker.is_alive()? {
            Ok(None)
        } else {
            Ok(Some(LockedOutcome::Unlocked))
        }
    }

    /// Switch phase and run the entry action of the new phase.
    async fn enter(&mut self, next: Phase) -> Result<Transition, ControllerError> {
        let transition = Transition {
            from: self.phase,
            to: next,
        };
        self.phase = next;
        info!("Phase {} -> {}", transition.from, transition.to);

        match next {
            Phase::Idle => {}
            Phase::Blanked => self.screensaver.activate().await?,
            Phase::Locked => self.spawn_locker()?,
        }

        Ok(transition)
    }

    fn spawn_overlay(&mut self) -> Result<(), ControllerError> {
        if let Some(mut stale) = self.overlay.take() {
            warn!("Replacing overlay (pid {:?}) still held from a previous cycle", stale.pid());
            stale.terminate();
        }
        self.overlay = Some(self.runner.spawn(ProcessKind::Overlay, &self.commands.overlay)?);
        Ok(())
    }

    fn spawn_locker(&mut self) -> Result<(), ControllerError> {
        if let Some(mut stale) = self.locker.take() {
            warn!("Replacing locker (pid {:?}) still held from a previous cycle", stale.pid());
            stale.terminate();
        }
        self.locker = Some(self.runner.spawn(ProcessKind::Locker, &self.commands.locker)?);
        Ok(())
    }

    /// Terminate and reap every owned process: locker first, then overlay.
    pub async fn shutdown(&mut self) {
        if let Some(mut locker) = self.locker.take() {
            debug!("Stopping locker");
            locker.stop().await;
        }
        if let Some(mut overlay) = self.overlay.take() {
            debug!("Stopping overlay");
            overlay.stop().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Idle.to_string(), "idle");
        assert_eq!(Phase::Blanked.to_string(), "blanked");
        assert_eq!(Phase::Locked.to_string(), "locked");
    }

    #[test]
    fn test_locker_missing_message() {
        assert_eq!(
            ControllerError::LockerMissing.to_string(),
            "Locked phase has no locker process"
        );
    }
}
