//! Configuration loading, merging and defaults for screenlockd.
//!
//! Values come from three layers: built-in defaults, an optional TOML file,
//! and command-line overrides. The merged record is validated once, before
//! the phase controller starts; the core never re-derives defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// An external program plus its argument list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable path (or name resolved through `PATH`).
    pub program: PathBuf,

    /// Arguments passed after the program.
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command with the given arguments.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Build a tokio command, exporting `DISPLAY` when one is configured.
    pub fn to_command(&self, display: Option<&str>) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        if let Some(display) = display {
            command.env("DISPLAY", display);
        }
        command
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Durations the phase controller runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Idle time required before blanking.
    pub idle_timeout: Duration,
    /// Idle time, while locked, after which the locker is force-reset.
    pub locked_idle_timeout: Duration,
    pub idle_poll: Duration,
    pub blanked_poll: Duration,
    pub locked_poll: Duration,
}

/// Main configuration for screenlockd.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Idle time before the screen is blanked, in milliseconds (default: 20500).
    pub idle_timeout_ms: u64,

    /// Idle time while locked before the locker is killed and the
    /// screensaver is re-activated, in milliseconds (default: 2000).
    pub locked_idle_timeout_ms: u64,

    /// Poll interval while waiting for the idle timeout (default: 1200).
    pub idle_poll_ms: u64,

    /// Poll interval while the screensaver is blanked (default: 200).
    pub blanked_poll_ms: u64,

    /// Poll interval while the locker is running (default: 200).
    pub locked_poll_ms: u64,

    /// X display to connect to and export to children.
    /// If unset, `$DISPLAY` is inherited.
    pub display: Option<String>,

    /// Upper bound on one-shot control commands, in milliseconds.
    /// If unset, one-shot commands are waited on indefinitely.
    pub one_shot_timeout_ms: Option<u64>,

    /// Control binary used for `-activate`, `-time` and `-exit`.
    pub screensaver_command: PathBuf,

    /// Ask an already-running screensaver to exit before starting ours.
    pub replace_running_screensaver: bool,

    /// Raise a desktop notification when the daemon aborts.
    pub notify_on_failure: bool,

    /// Screensaver daemon started once at boot.
    pub screensaver: CommandSpec,

    /// Locker spawned on every entry into the locked phase.
    pub locker: CommandSpec,

    /// Overlay command. If unset, the built-in `screenlockd overlay` is used.
    pub overlay: Option<CommandSpec>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 20_500,
            locked_idle_timeout_ms: 2_000,
            idle_poll_ms: 1_200,
            blanked_poll_ms: 200,
            locked_poll_ms: 200,
            display: None,
            one_shot_timeout_ms: None,
            screensaver_command: PathBuf::from("/usr/bin/xscreensaver-command"),
            replace_running_screensaver: true,
            notify_on_failure: true,
            screensaver: CommandSpec::new("/usr/bin/xscreensaver", ["-no-splash"]),
            locker: CommandSpec::new("/usr/bin/slimlock", Vec::<String>::new()),
            overlay: None,
        }
    }
}

/// Values supplied on the command line. `None` means "not provided".
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub idle_timeout_ms: Option<u64>,
    pub locked_idle_timeout_ms: Option<u64>,
    pub idle_poll_ms: Option<u64>,
    pub blanked_poll_ms: Option<u64>,
    pub locked_poll_ms: Option<u64>,
    pub display: Option<String>,
    pub one_shot_timeout_ms: Option<u64>,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from the default path, or return defaults if not found.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            return Self::load(p);
        }

        if let Some(default_path) = Self::default_path()
            && default_path.exists()
        {
            return Self::load(&default_path);
        }

        Ok(Self::default())
    }

    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("screenlockd").join("config.toml"))
    }

    /// Apply command-line values on top of file/default values.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(v) = overrides.idle_timeout_ms {
            self.idle_timeout_ms = v;
        }
        if let Some(v) = overrides.locked_idle_timeout_ms {
            self.locked_idle_timeout_ms = v;
        }
        if let Some(v) = overrides.idle_poll_ms {
            self.idle_poll_ms = v;
        }
        if let Some(v) = overrides.blanked_poll_ms {
            self.blanked_poll_ms = v;
        }
        if let Some(v) = overrides.locked_poll_ms {
            self.locked_poll_ms = v;
        }
        if let Some(ref v) = overrides.display {
            self.display = Some(v.clone());
        }
        if let Some(v) = overrides.one_shot_timeout_ms {
            self.one_shot_timeout_ms = Some(v);
        }
    }

    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_ms == 0 {
            anyhow::bail!("idle_timeout_ms must be greater than zero");
        }
        if self.locked_idle_timeout_ms == 0 {
            anyhow::bail!("locked_idle_timeout_ms must be greater than zero");
        }
        if self.one_shot_timeout_ms == Some(0) {
            anyhow::bail!("one_shot_timeout_ms must be greater than zero when set");
        }

        let mut programs = vec![
            ("screensaver", &self.screensaver.program),
            ("screensaver_command", &self.screensaver_command),
            ("locker", &self.locker.program),
        ];
        if let Some(ref overlay) = self.overlay {
            programs.push(("overlay", &overlay.program));
        }
        for (name, program) in programs {
            if program.as_os_str().is_empty() {
                anyhow::bail!("{name} program path must not be empty");
            }
        }

        for (name, value) in [
            ("idle_poll_ms", self.idle_poll_ms),
            ("blanked_poll_ms", self.blanked_poll_ms),
            ("locked_poll_ms", self.locked_poll_ms),
        ] {
            if value == 0 {
                warn!("{} is 0; the phase will busy-poll", name);
            }
        }

        Ok(())
    }

    /// Durations consumed by the phase controller.
    pub fn timings(&self) -> PhaseTimings {
        PhaseTimings {
            idle_timeout: Duration::from_millis(self.idle_timeout_ms),
            locked_idle_timeout: Duration::from_millis(self.locked_idle_timeout_ms),
            idle_poll: Duration::from_millis(self.idle_poll_ms),
            blanked_poll: Duration::from_millis(self.blanked_poll_ms),
            locked_poll: Duration::from_millis(self.locked_poll_ms),
        }
    }

    pub fn one_shot_timeout(&self) -> Option<Duration> {
        self.one_shot_timeout_ms.map(Duration::from_millis)
    }
}
