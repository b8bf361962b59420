//! CCUI Daemon - observes agent conversation logs and bridges browser
//! terminals to persistent multiplexer sessions.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! ccuid serve
//!
//! # Start with a fresh change stream
//! ccuid serve --clear
//!
//! # Start in the background
//! ccuid serve -d
//!
//! # Stop the daemon
//! ccuid stop
//!
//! # Check daemon status
//! ccuid status
//!
//! # Enable debug logging
//! RUST_LOG=ccuid=debug ccuid serve
//! ```
//!
//! # Signal Handling
//!
//! SIGTERM/SIGINT trigger a graceful shutdown: tailer and tickers stop,
//! WebSocket subscribers receive `exit`, PTYs are killed (multiplexer
//! sessions persist), remote mounts are released.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ccuid::config::{Config, TerminalKind};
use ccuid::hostterm::HostTerminal;
use ccuid::machines::MountManager;
use ccuid::publisher::{Publisher, StreamStore};
use ccuid::registry::spawn_registry;
use ccuid::server::{run_api_server, run_stream_server, AppState};
use ccuid::tailer::{spawn_tailer, WatchRoot};
use ccuid::terminal::TerminalManager;

/// claude-code-ui daemon
#[derive(Parser, Debug)]
#[command(name = "ccuid", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Serve {
        /// Remove the persisted change stream before starting
        #[arg(long)]
        clear: bool,

        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    let state_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".claude-code-ui");
    state_dir.join("ccuid.pid")
}

/// Returns the path to the log file (daemonized runs).
fn log_file_path() -> PathBuf {
    let state_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".claude-code-ui");
    state_dir.join("ccuid.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

/// Removes the PID file.
fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Checks if a process with the given PID is running.
fn is_process_running(pid: u32) -> bool {
    PathBuf::from(format!("/proc/{pid}")).exists()
}

/// Checks if the daemon is already running, clearing stale PID files.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

/// Sends SIGTERM to the daemon process.
fn stop_daemon(pid: u32) -> Result<()> {
    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
        if result != 0 {
            bail!("Failed to send SIGTERM to process {}", pid);
        }
    }
    #[cfg(not(unix))]
    {
        bail!("Stop command is only supported on Unix systems");
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Default to 'serve' if no subcommand given
    let command = args.command.unwrap_or(Command::Serve {
        clear: false,
        daemon: false,
    });

    match command {
        Command::Serve { clear, daemon } => {
            if let Some(pid) = is_daemon_running() {
                eprintln!("Daemon is already running (PID {pid})");
                eprintln!("Use 'ccuid stop' to stop it first.");
                process::exit(1);
            }

            if daemon {
                // Daemonize before starting the tokio runtime
                daemonize()?;
            }

            write_pid()?;

            let result = run_daemon(clear);

            remove_pid_file();

            result
        }
        Command::Stop => {
            if let Some(pid) = is_daemon_running() {
                println!("Stopping daemon (PID {pid})...");
                stop_daemon(pid)?;

                // Wait for the process to exit (up to 5 seconds)
                for _ in 0..50 {
                    if !is_process_running(pid) {
                        println!("Daemon stopped.");
                        return Ok(());
                    }
                    std::thread::sleep(std::time::Duration::from_millis(100));
                }

                eprintln!("Daemon did not stop within 5 seconds.");
                process::exit(1);
            } else {
                println!("Daemon is not running.");
                Ok(())
            }
        }
        Command::Status => {
            if let Some(pid) = is_daemon_running() {
                println!("Daemon is running (PID {pid})");
                Ok(())
            } else {
                println!("Daemon is not running.");
                process::exit(1);
            }
        }
    }
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = File::create(&log_path).context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

/// Runs the daemon (async entry point and composition root).
///
/// Every service is constructed and owned here; nothing is process-wide
/// state, so tests can assemble the same services around fakes.
#[tokio::main]
async fn run_daemon(clear: bool) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("ccuid=info".parse()?)
                .add_directive("ccui_core=info".parse()?)
                .add_directive("ccui_protocol=info".parse()?),
        )
        .init();

    let config = Config::from_env();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        hostname = %config.hostname,
        "ccuid starting"
    );

    fs::create_dir_all(&config.state_dir).with_context(|| {
        format!(
            "State directory {} is not writable",
            config.state_dir.display()
        )
    })?;

    // Fatal when the stream directory is unusable
    let store = StreamStore::open(config.stream_dir(), clear)
        .context("Failed to open the session change stream")?;

    let cancel = CancellationToken::new();

    // Signal handling
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    // Session derivation core
    let registry = spawn_registry(config.idle_timeout);
    info!("Session registry started");

    let publisher = Publisher::new(store, config.max_age);
    publisher.spawn_event_pump(&registry, cancel.clone());
    info!("State publisher started");

    // Watch roots: local plus whatever mounts succeed
    let mounts = Arc::new(MountManager::load(
        &config.machines_file(),
        config.mounts_dir(),
    ));
    let mut roots = vec![WatchRoot {
        root: config.local_log_root.clone(),
        hostname: config.hostname.clone(),
    }];
    roots.extend(mounts.mount_all().await);

    let tailer = spawn_tailer(roots, registry.clone(), cancel.clone());
    info!("Log tailer started");

    // Terminal bridge
    let terminals = TerminalManager::new(cancel.clone());

    let hostterm = match config.terminal {
        TerminalKind::Iterm2 => HostTerminal::MacITerm,
        TerminalKind::None => HostTerminal::Disabled,
    };

    let state = AppState {
        registry,
        publisher,
        terminals: terminals.clone(),
        mounts: Arc::clone(&mounts),
        hostterm,
        hostname: config.hostname.clone(),
    };

    let stream_addr = SocketAddr::from(([0, 0, 0, 0], config.stream_port));
    let api_addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));

    // Both servers run until cancelled; a bind failure is fatal.
    let served = tokio::try_join!(
        run_stream_server(stream_addr, state.clone(), cancel.clone()),
        run_api_server(api_addr, state.clone(), cancel.clone()),
    );

    // Ordered shutdown: everything token-driven stops first, then PTYs
    // (multiplexer sessions persist), then remote mounts.
    cancel.cancel();
    let _ = tailer.await;
    terminals.kill_all().await;
    mounts.unmount_all().await;

    if let Err(err) = served {
        error!(error = %err, "Server error");
        return Err(err.into());
    }

    info!("ccuid stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
