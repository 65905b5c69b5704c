//! Idle-time detection.
//!
//! The probe reports milliseconds since the last input event on the display
//! session. Every call re-samples; nothing is cached.

mod x11;

use std::time::Duration;
use thiserror::Error;
use tracing::trace;

pub use x11::X11IdleProbe;

/// Source of "milliseconds since last input".
///
/// Any error is fatal for the daemon: an unreachable idle source must never
/// be mistaken for "still idle" or "not idle".
pub trait IdleProbe: Send {
    /// Sample the current idle time in milliseconds.
    fn query(&mut self) -> Result<u64, IdleError>;

    /// Returns true once the current idle time has reached `timeout`.
    fn idle_time_is_out(&mut self, timeout: Duration) -> Result<bool, IdleError> {
        let idle_ms = self.query()?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        trace!("Idle sample: {} ms (threshold {} ms)", idle_ms, timeout_ms);
        Ok(idle_ms >= timeout_ms)
    }
}

/// Errors that can occur while querying idle time.
#[derive(Error, Debug)]
pub enum IdleError {
    #[error("Failed to connect to X display: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("X connection lost: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("Idle query failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("X server does not support the MIT-SCREEN-SAVER extension")]
    ExtensionMissing,
}
