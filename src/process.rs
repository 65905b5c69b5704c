//! Child process ownership.
//!
//! A [`ManagedProcess`] is owned by exactly one component: whoever spawned it
//! is the only one allowed to signal or reap it. One-shot commands are run
//! through [`run_to_completion`] and [`capture_output`] and never escape the
//! call that started them.

use std::fmt;
use std::future::Future;
use std::io;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Child;
use tracing::{debug, trace, warn};

use crate::config::CommandSpec;

/// Role of a managed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessKind {
    Screensaver,
    Overlay,
    Locker,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screensaver => "screensaver",
            Self::Overlay => "overlay",
            Self::Locker => "locker",
        }
    }
}

impl fmt::Display for ProcessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from spawning, checking or running child processes.
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {kind} `{program}`: {source}")]
    Spawn {
        kind: ProcessKind,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{kind} (pid {pid:?}) was reaped outside its owner")]
    Lost { kind: ProcessKind, pid: Option<u32> },

    #[error("Failed to check {kind} status: {source}")]
    Wait {
        kind: ProcessKind,
        #[source]
        source: io::Error,
    },

    #[error("Failed to run `{program}`: {source}")]
    OneShot {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{program}` did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}

/// The operations the supervisor needs from an OS child process.
#[async_trait]
pub trait ChildProcess: Send {
    fn id(&self) -> Option<u32>;

    /// Non-blocking wait.
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>>;

    /// Send SIGKILL without waiting for the exit.
    fn start_kill(&mut self) -> io::Result<()>;

    /// Block until the child exits and reap it.
    async fn wait(&mut self) -> io::Result<ExitStatus>;
}

#[async_trait]
impl ChildProcess for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        Child::try_wait(self)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }

    async fn wait(&mut self) -> io::Result<ExitStatus> {
        Child::wait(self).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Exited(ExitStatus),
    /// Reaping failed; the pid must not be touched again.
    Gone,
}

/// A spawned child with a single owner.
pub struct ManagedProcess {
    kind: ProcessKind,
    pid: Option<u32>,
    child: Box<dyn ChildProcess>,
    lifecycle: Lifecycle,
}

impl ManagedProcess {
    pub fn new(kind: ProcessKind, child: Box<dyn ChildProcess>) -> Self {
        let pid = child.id();
        Self {
            kind,
            pid,
            child,
            lifecycle: Lifecycle::Running,
        }
    }

    pub fn kind(&self) -> ProcessKind {
        self.kind
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status, once the child has been observed to exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.lifecycle {
            Lifecycle::Exited(status) => Some(status),
            _ => None,
        }
    }

    /// Non-blocking liveness check.
    ///
    /// A child reaped by someone other than its owner is reported as
    /// [`ProcessError::Lost`]; that is a defect, not an exit.
    pub fn is_alive(&mut self) -> Result<bool, ProcessError> {
        if self.lifecycle != Lifecycle::Running {
            return Ok(false);
        }

        match self.child.try_wait() {
            Ok(None) => Ok(true),
            Ok(Some(status)) => {
                debug!("{} (pid {:?}) exited: {}", self.kind, self.pid, status);
                self.lifecycle = Lifecycle::Exited(status);
                Ok(false)
            }
            Err(e) if e.raw_os_error() == Some(libc::ECHILD) => {
                self.lifecycle = Lifecycle::Gone;
                Err(ProcessError::Lost {
                    kind: self.kind,
                    pid: self.pid,
                })
            }
            Err(source) => Err(ProcessError::Wait {
                kind: self.kind,
                source,
            }),
        }
    }

    /// Send SIGKILL. Fire-and-forget; a no-op once the child has exited.
    pub fn terminate(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            trace!("{} (pid {:?}) already exited, not signalling", self.kind, self.pid);
            return;
        }

        match self.child.start_kill() {
            Ok(()) => debug!("Sent SIGKILL to {} (pid {:?})", self.kind, self.pid),
            Err(e) => debug!("{} (pid {:?}) could not be signalled: {}", self.kind, self.pid, e),
        }
    }

    /// Wait for the child to exit so it does not linger as a zombie.
    pub async fn reap(&mut self) -> Option<ExitStatus> {
        if self.lifecycle != Lifecycle::Running {
            return self.exit_status();
        }

        match self.child.wait().await {
            Ok(status) => {
                debug!("Reaped {} (pid {:?}): {}", self.kind, self.pid, status);
                self.lifecycle = Lifecycle::Exited(status);
                Some(status)
            }
            Err(e) => {
                warn!("Failed to reap {} (pid {:?}): {}", self.kind, self.pid, e);
                self.lifecycle = Lifecycle::Gone;
                None
            }
        }
    }

    /// Terminate, then reap.
    pub async fn stop(&mut self) -> Option<ExitStatus> {
        self.terminate();
        self.reap().await
    }
}

impl fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("kind", &self.kind)
            .field("pid", &self.pid)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Process spawn boundary.
pub trait ProcessRunner: Send {
    /// Start a long-lived child. Failure is fatal for the caller.
    fn spawn(
        &mut self,
        kind: ProcessKind,
        command: &CommandSpec,
    ) -> Result<ManagedProcess, ProcessError>;
}

/// Spawns real OS processes through tokio.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner {
    display: Option<String>,
}

impl TokioRunner {
    pub fn new(display: Option<String>) -> Self {
        Self { display }
    }
}

impl ProcessRunner for TokioRunner {
    fn spawn(
        &mut self,
        kind: ProcessKind,
        command: &CommandSpec,
    ) -> Result<ManagedProcess, ProcessError> {
        let child = command
            .to_command(self.display.as_deref())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                kind,
                program: command.to_string(),
                source,
            })?;

        debug!("Spawned {} (pid {:?}): {}", kind, child.id(), command);
        Ok(ManagedProcess::new(kind, Box::new(child)))
    }
}

/// Spawn a one-shot command and block until it exits.
pub async fn run_to_completion(
    command: &CommandSpec,
    display: Option<&str>,
    timeout: Option<Duration>,
) -> Result<ExitStatus, ProcessError> {
    let mut child = command
        .to_command(display)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| one_shot_error(command, source))?;

    trace!("Running one-shot: {}", command);
    bounded(command, timeout, child.wait())
        .await?
        .map_err(|source| one_shot_error(command, source))
}

/// Spawn a one-shot command and collect its output.
pub async fn capture_output(
    command: &CommandSpec,
    display: Option<&str>,
    timeout: Option<Duration>,
) -> Result<Output, ProcessError> {
    let child = command
        .to_command(display)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| one_shot_error(command, source))?;

    trace!("Capturing one-shot: {}", command);
    bounded(command, timeout, child.wait_with_output())
        .await?
        .map_err(|source| one_shot_error(command, source))
}

/// Await `fut`, optionally giving up after `timeout`. A command abandoned
/// here is killed when its child handle drops.
async fn bounded<F, T>(command: &CommandSpec, timeout: Option<Duration>, fut: F) -> Result<T, ProcessError>
where
    F: Future<Output = T>,
{
    match timeout {
        None => Ok(fut.await),
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ProcessError::TimedOut {
                program: command.to_string(),
                timeout: limit,
            }),
    }
}

fn one_shot_error(command: &CommandSpec, source: io::Error) -> ProcessError {
    ProcessError::OneShot {
        program: command.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn sleeper() -> CommandSpec {
        CommandSpec::new("sleep", ["30"])
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_and_terminate() {
        let mut runner = TokioRunner::default();
        let mut process = runner.spawn(ProcessKind::Locker, &sleeper()).unwrap();

        assert_eq!(process.kind(), ProcessKind::Locker);
        assert!(process.pid().is_some());
        assert!(process.is_alive().unwrap());

        process.terminate();
        let status = process.reap().await.expect("sleep should be reaped");
        assert!(!status.success());
        assert!(!process.is_alive().unwrap());
    }

    #[tokio::test]
    #[serial]
    async fn test_terminate_is_idempotent() {
        let mut runner = TokioRunner::default();
        let mut process = runner.spawn(ProcessKind::Overlay, &sleeper()).unwrap();

        let status = process.stop().await;
        assert!(status.is_some());

        // Already dead: no error, no state change
        process.terminate();
        process.terminate();
        assert_eq!(process.exit_status(), status);
        assert!(!process.is_alive().unwrap());
        assert_eq!(process.reap().await, status);
    }

    #[tokio::test]
    #[serial]
    async fn test_is_alive_observes_exit() {
        let mut runner = TokioRunner::default();
        let mut process = runner
            .spawn(ProcessKind::Locker, &CommandSpec::new("true", Vec::<String>::new()))
            .unwrap();

        let mut alive = true;
        for _ in 0..200 {
            alive = process.is_alive().unwrap();
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!alive);
        assert!(process.exit_status().unwrap().success());
    }

    #[tokio::test]
    #[serial]
    async fn test_spawn_missing_program_fails() {
        let mut runner = TokioRunner::default();
        let err = runner
            .spawn(
                ProcessKind::Overlay,
                &CommandSpec::new("/nonexistent/screenlockd-overlay", Vec::<String>::new()),
            )
            .unwrap_err();

        assert!(matches!(
            err,
            ProcessError::Spawn {
                kind: ProcessKind::Overlay,
                ..
            }
        ));
    }

    #[tokio::test]
    #[serial]
    async fn test_child_reaped_elsewhere_is_lost() {
        let mut runner = TokioRunner::default();
        let mut process = runner.spawn(ProcessKind::Locker, &sleeper()).unwrap();
        let pid = libc::pid_t::try_from(process.pid().unwrap()).unwrap();

        // Kill and reap behind the owner's back
        // SAFETY: pid belongs to a child of this test process.
        unsafe {
            libc::kill(pid, libc::SIGKILL);
            libc::waitpid(pid, std::ptr::null_mut(), 0);
        }

        assert!(matches!(
            process.is_alive(),
            Err(ProcessError::Lost {
                kind: ProcessKind::Locker,
                ..
            })
        ));
        // Once lost, the handle is inert
        process.terminate();
        assert!(!process.is_alive().unwrap());
    }

    #[tokio::test]
    #[serial]
    async fn test_run_to_completion_status() {
        let ok = run_to_completion(&CommandSpec::new("true", Vec::<String>::new()), None, None)
            .await
            .unwrap();
        assert!(ok.success());

        let failed = run_to_completion(&CommandSpec::new("false", Vec::<String>::new()), None, None)
            .await
            .unwrap();
        assert!(!failed.success());
    }

    #[tokio::test]
    #[serial]
    async fn test_run_to_completion_missing_program() {
        let err = run_to_completion(
            &CommandSpec::new("/nonexistent/xscreensaver-command", ["-activate"]),
            None,
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::OneShot { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn test_run_to_completion_timeout() {
        let err = run_to_completion(&sleeper(), None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::TimedOut { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn test_capture_output() {
        let output = capture_output(&CommandSpec::new("echo", ["screen", "blanked"]), None, None)
            .await
            .unwrap();
        assert!(output.status.success());
        assert_eq!(String::from_utf8_lossy(&output.stdout), "screen blanked\n");
    }

    #[tokio::test]
    #[serial]
    async fn test_display_is_exported() {
        let output = capture_output(
            &CommandSpec::new("sh", ["-c", "echo $DISPLAY"]),
            Some(":7"),
            None,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout), ":7\n");
    }
}
