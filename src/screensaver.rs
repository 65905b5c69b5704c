//! Screensaver control channel.
//!
//! Two one-shot operations: "activate now" and "what is the blank status".
//! Only an explicit non-blanked report lets the lock sequence advance;
//! anything unexpected is reported as [`BlankStatus::Unknown`].

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use crate::config::CommandSpec;
use crate::process::{self, ProcessError};

/// Blank state as reported by the screensaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlankStatus {
    Blanked,
    NonBlanked,
    /// Output could not be interpreted.
    Unknown,
}

impl BlankStatus {
    /// Interpret `xscreensaver-command -time` output, e.g.
    /// `XScreenSaver 6.06: screen non-blanked since Tue Oct 14 09:12:01 2026`.
    pub fn parse(output: &str) -> Self {
        let output = output.to_ascii_lowercase();
        if output.contains("non-blanked") {
            Self::NonBlanked
        } else if output.contains("blanked") || output.contains("locked") {
            Self::Blanked
        } else {
            Self::Unknown
        }
    }
}

/// Control channel to the running screensaver.
///
/// Errors are reserved for failures to launch the control command at all;
/// everything else degrades to "no change".
#[async_trait]
pub trait ScreensaverControl: Send {
    /// Blank the screen now. Returns once the command has finished.
    async fn activate(&mut self) -> Result<(), ProcessError>;

    /// Query the current blank status.
    async fn status(&mut self) -> Result<BlankStatus, ProcessError>;
}

/// Drives xscreensaver through `xscreensaver-command`.
#[derive(Debug, Clone)]
pub struct XScreensaverCommand {
    program: PathBuf,
    display: Option<String>,
    timeout: Option<Duration>,
}

impl XScreensaverCommand {
    pub fn new(program: PathBuf, display: Option<String>, timeout: Option<Duration>) -> Self {
        Self {
            program,
            display,
            timeout,
        }
    }

    fn command(&self, flag: &str) -> CommandSpec {
        CommandSpec::new(self.program.clone(), [flag])
    }

    /// Run a control flag, treating non-zero exit and timeouts as warnings.
    async fn run_flag(&self, flag: &str) -> Result<(), ProcessError> {
        let command = self.command(flag);
        match process::run_to_completion(&command, self.display.as_deref(), self.timeout).await {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                warn!("`{}` exited with {}", command, status);
                Ok(())
            }
            Err(e @ ProcessError::TimedOut { .. }) => {
                warn!("{}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Ask an already-running screensaver to exit. Best effort.
    pub async fn exit_running(&self) -> Result<(), ProcessError> {
        debug!("Asking any running screensaver to exit");
        self.run_flag("-exit").await
    }
}

#[async_trait]
impl ScreensaverControl for XScreensaverCommand {
    async fn activate(&mut self) -> Result<(), ProcessError> {
        debug!("Activating screensaver");
        self.run_flag("-activate").await
    }

    async fn status(&mut self) -> Result<BlankStatus, ProcessError> {
        let command = self.command("-time");
        let output =
            match process::capture_output(&command, self.display.as_deref(), self.timeout).await {
                Ok(output) => output,
                Err(e @ ProcessError::TimedOut { .. }) => {
                    warn!("{}", e);
                    return Ok(BlankStatus::Unknown);
                }
                Err(e) => return Err(e),
            };

        if !output.status.success() {
            warn!(
                "`{}` exited with {}: {}",
                command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(BlankStatus::Unknown);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let status = BlankStatus::parse(&stdout);
        if status == BlankStatus::Unknown {
            warn!("Unexpected screensaver status: {:?}", stdout.trim());
        } else {
            trace!("Screensaver status: {:?}", status);
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_parse_non_blanked() {
        assert_eq!(
            BlankStatus::parse("XScreenSaver 6.06: screen non-blanked since Tue Oct 14 09:12:01 2026\n"),
            BlankStatus::NonBlanked
        );
    }

    #[test]
    fn test_parse_blanked() {
        assert_eq!(
            BlankStatus::parse("XScreenSaver 6.06: screen blanked since Tue Oct 14 09:12:01 2026\n"),
            BlankStatus::Blanked
        );
    }

    #[test]
    fn test_parse_locked_counts_as_blanked() {
        assert_eq!(
            BlankStatus::parse("XScreenSaver 6.06: screen locked since Tue Oct 14 09:12:01 2026"),
            BlankStatus::Blanked
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(BlankStatus::parse(""), BlankStatus::Unknown);
        assert_eq!(
            BlankStatus::parse("xscreensaver-command: no screensaver is running on display :0"),
            BlankStatus::Unknown
        );
    }

    /// Write an executable shell script standing in for `xscreensaver-command`.
    fn fake_command(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("xscreensaver-command");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    #[serial]
    async fn test_status_from_command() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_command(
            &dir,
            r#"[ "$1" = "-time" ] && echo "XScreenSaver 6.06: screen non-blanked since now""#,
        );

        let mut control = XScreensaverCommand::new(program, None, None);
        assert_eq!(control.status().await.unwrap(), BlankStatus::NonBlanked);
    }

    #[tokio::test]
    #[serial]
    async fn test_status_failure_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_command(&dir, "echo 'screen non-blanked'; exit 1");

        let mut control = XScreensaverCommand::new(program, None, None);
        assert_eq!(control.status().await.unwrap(), BlankStatus::Unknown);
    }

    #[tokio::test]
    #[serial]
    async fn test_status_timeout_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_command(&dir, "sleep 5");

        let mut control =
            XScreensaverCommand::new(program, None, Some(Duration::from_millis(50)));
        assert_eq!(control.status().await.unwrap(), BlankStatus::Unknown);
    }

    #[tokio::test]
    #[serial]
    async fn test_activate_tolerates_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_command(&dir, "exit 3");

        let mut control = XScreensaverCommand::new(program, None, None);
        assert!(control.activate().await.is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_command_is_an_error() {
        let mut control = XScreensaverCommand::new(
            PathBuf::from("/nonexistent/xscreensaver-command"),
            None,
            None,
        );
        assert!(matches!(
            control.activate().await,
            Err(ProcessError::OneShot { .. })
        ));
        assert!(control.status().await.is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_exit_running_passes_exit_flag() {
        let dir = tempfile::tempdir().unwrap();
        let record = dir.path().join("args");
        let program = fake_command(&dir, &format!(r#"echo "$@" > "{}""#, record.display()));

        let control = XScreensaverCommand::new(program, None, None);
        control.exit_running().await.unwrap();

        assert_eq!(std::fs::read_to_string(&record).unwrap(), "-exit\n");
    }

    #[tokio::test]
    #[serial]
    async fn test_exit_running_tolerates_non_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        // What xscreensaver-command does when nothing is running
        let program = fake_command(&dir, "echo 'no screensaver is running' >&2; exit 1");

        let control = XScreensaverCommand::new(program, None, None);
        assert!(control.exit_running().await.is_ok());
    }

    #[tokio::test]
    #[serial]
    async fn test_exit_running_tolerates_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let program = fake_command(&dir, "sleep 5");

        let control = XScreensaverCommand::new(program, None, Some(Duration::from_millis(50)));
        assert!(control.exit_running().await.is_ok());
    }
}
