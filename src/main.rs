//! screenlockd - idle-activated screen-lock supervisor.
//!
//! Blanks the screen after a period of inactivity, then keeps a locker
//! running until the user authenticates.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use screenlockd::config::{CommandSpec, Config, ConfigOverrides};
use screenlockd::idle::{IdleProbe, X11IdleProbe};
use screenlockd::notify;
use screenlockd::overlay;
use screenlockd::supervisor::Supervisor;

/// Idle-activated screen-lock supervisor.
///
/// Blanks the screen after inactivity, then runs a locker until it exits.
#[derive(Parser, Debug)]
#[command(name = "screenlockd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Command-line values that take precedence over the config file.
#[derive(clap::Args, Debug, Default)]
struct OverrideArgs {
    /// Idle time before blanking, in milliseconds.
    #[arg(short = 'i', long, value_name = "MS")]
    idle_timeout: Option<u64>,

    /// Idle time while locked before the locker is reset, in milliseconds.
    #[arg(long, value_name = "MS")]
    locked_idle_timeout: Option<u64>,

    /// Poll interval while waiting for idle, in milliseconds.
    #[arg(short = 'r', long, value_name = "MS")]
    idle_poll: Option<u64>,

    /// Poll interval while locked, in milliseconds.
    #[arg(short = 'l', long, value_name = "MS")]
    locked_poll: Option<u64>,

    /// Poll interval while blanked, in milliseconds.
    #[arg(short = 'b', long, value_name = "MS")]
    blanked_poll: Option<u64>,

    /// X display to use (defaults to $DISPLAY).
    #[arg(long)]
    display: Option<String>,

    /// Give up on screensaver control commands after this many milliseconds.
    #[arg(long, value_name = "MS")]
    one_shot_timeout: Option<u64>,
}

impl From<&OverrideArgs> for ConfigOverrides {
    fn from(args: &OverrideArgs) -> Self {
        Self {
            idle_timeout_ms: args.idle_timeout,
            locked_idle_timeout_ms: args.locked_idle_timeout,
            idle_poll_ms: args.idle_poll,
            blanked_poll_ms: args.blanked_poll,
            locked_poll_ms: args.locked_poll,
            display: args.display.clone(),
            one_shot_timeout_ms: args.one_shot_timeout,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the black full-screen overlay until killed.
    #[command(hide = true)]
    Overlay,

    /// Print idle-time samples and exit.
    Idle {
        /// Number of samples to print.
        #[arg(long, default_value = "5")]
        count: usize,

        /// Milliseconds between samples.
        #[arg(long, default_value = "1000")]
        interval: u64,
    },

    /// Print the resolved configuration and exit.
    CheckConfig,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args.log_level)?;

    match &args.command {
        Some(Commands::Overlay) => {
            let display = args.overrides.display.clone();
            tokio::task::spawn_blocking(move || overlay::run(display.as_deref()))
                .await
                .context("Overlay task panicked")?
        }
        Some(Commands::Idle { count, interval }) => {
            let config = resolve_config(&args)?;
            run_idle(&config, *count, Duration::from_millis(*interval)).await
        }
        Some(Commands::CheckConfig) => {
            let config = resolve_config(&args)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        None => {
            info!("screenlockd v{} starting", env!("CARGO_PKG_VERSION"));
            let config = resolve_config(&args)?;
            run_daemon(config).await
        }
    }
}

/// Initialize logging with the specified level.
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(format!("screenlockd={level}"))
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    Ok(())
}

/// Defaults, then file, then command line; validated before use.
fn resolve_config(args: &Args) -> Result<Config> {
    let mut config =
        Config::load_or_default(args.config.as_deref()).context("Failed to load configuration")?;
    config.apply_overrides(&ConfigOverrides::from(&args.overrides));
    config.validate().context("Invalid configuration")?;

    debug!("Resolved configuration: {:?}", config);
    Ok(config)
}

/// Print a few idle samples: a quick check that the display is reachable.
async fn run_idle(config: &Config, count: usize, interval: Duration) -> Result<()> {
    let mut probe = X11IdleProbe::connect(config.display.as_deref())?;

    for sample in 1..=count {
        let idle_ms = probe.query()?;
        println!("[{sample}] idle_ms={idle_ms}");
        if sample < count {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(())
}

/// The overlay is this same binary running the `overlay` subcommand.
fn builtin_overlay() -> Result<CommandSpec> {
    let exe = std::env::current_exe().context("Failed to locate own executable")?;
    Ok(CommandSpec::new(exe, ["overlay"]))
}

/// Run the supervisor until SIGINT/SIGTERM or a fatal error.
async fn run_daemon(config: Config) -> Result<()> {
    let overlay = match config.overlay.clone() {
        Some(command) => command,
        None => builtin_overlay()?,
    };
    info!(
        "Configuration loaded (idle_timeout={}ms, locked_idle_timeout={}ms)",
        config.idle_timeout_ms, config.locked_idle_timeout_ms
    );

    let shutdown = CancellationToken::new();
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let token = shutdown.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        token.cancel();
    });

    let result = supervise(&config, overlay, shutdown).await;

    if let Err(ref e) = result {
        error!("{:#}", e);
        if config.notify_on_failure
            && let Err(notify_err) = notify::notify_failure("screenlockd aborted", &format!("{e:#}")).await
        {
            warn!("Failed to raise failure notification: {}", notify_err);
        }
    }

    result
}

async fn supervise(config: &Config, overlay: CommandSpec, shutdown: CancellationToken) -> Result<()> {
    let supervisor = Supervisor::start(config, overlay).await?;
    supervisor.run(shutdown).await.context("Supervisor aborted")
}
