//! Command-line plumbing shared by the console programs
//!
//! Argument parsing, logging setup, connecting to the configured reader and
//! an interactive line reader for the REPL.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::error::Error;
use crate::reader::{ConnectionManager, ReaderSession};
use crate::transport::SimulatedConnector;

/// Arguments every console program accepts
#[derive(Args, Debug, Clone)]
pub struct ReaderArgs {
    /// Reader hostname or IP address
    pub address: String,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Install the global subscriber; `RUST_LOG` wins over `level`
pub fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            )
            .try_init()?;
    }

    Ok(())
}

/// A connected reader plus the manager that owns its session
pub struct Gateway {
    pub config: AppConfig,
    pub manager: ConnectionManager,
    pub session: ReaderSession,
}

impl Gateway {
    /// Load configuration and connect to `args.address`
    pub async fn connect(args: &ReaderArgs) -> Result<Self, Error> {
        info!("Configuration file: {}", args.config);
        let config = AppConfig::load_or_default(&args.config)
            .await
            .map_err(Error::Config)?;

        let connector = SimulatedConnector::from_config(&config.simulator);
        let manager = ConnectionManager::new(Arc::new(connector));
        let session = manager.connect(&args.address).await?;

        Ok(Self {
            config,
            manager,
            session,
        })
    }

    /// Stop inventory if running, then close every session
    pub async fn shutdown(&self) {
        if self.session.is_connected() {
            if let Err(e) = self.manager.stop(&self.session).await {
                warn!("Stop failed during shutdown: {}", e);
            }
        }
        self.manager.disconnect_all().await;
        info!("Shutdown complete");
    }
}

/// Print `kind: message` for a fatal error
pub fn report_fatal(err: &Error) -> ExitCode {
    eprintln!("{}: {}", err.kind().red().bold(), err);
    ExitCode::FAILURE
}

/// Block until the operator presses Enter or Ctrl+C
pub async fn wait_for_enter(prompt: &str) {
    println!("{}", prompt.bold());
    let read = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)
    });

    tokio::select! {
        result = read => {
            if let Ok(Err(e)) = result {
                warn!("Could not read from stdin: {}", e);
            }
        },
        _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
    }
}

/// Reads REPL lines on a dedicated thread
///
/// The next prompt is shown only once the previous command has been handled,
/// so command output does not interleave with the prompt.
pub struct LineReader {
    lines: mpsc::Receiver<String>,
    ready: std::sync::mpsc::SyncSender<()>,
    awaiting_ack: bool,
}

impl LineReader {
    pub fn spawn(prompt: impl Into<String>) -> Result<Self> {
        let prompt = prompt.into();
        let (line_tx, lines) = mpsc::channel(1);
        let (ready, ready_rx) = std::sync::mpsc::sync_channel::<()>(1);

        std::thread::Builder::new()
            .name("repl".to_string())
            .spawn(move || {
                let mut editor = match DefaultEditor::new() {
                    Ok(editor) => editor,
                    Err(e) => {
                        warn!("Line editor unavailable: {}", e);
                        return;
                    },
                };
                loop {
                    match editor.readline(&prompt) {
                        Ok(line) => {
                            let _ = editor.add_history_entry(line.as_str());
                            if line_tx.blocking_send(line).is_err() || ready_rx.recv().is_err() {
                                break;
                            }
                        },
                        Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                        Err(e) => {
                            debug!("readline failed: {}", e);
                            break;
                        },
                    }
                }
            })?;

        Ok(Self {
            lines,
            ready,
            awaiting_ack: false,
        })
    }

    /// Next line typed, or `None` once input is closed (Ctrl+C, Ctrl+D)
    pub async fn next_line(&mut self) -> Option<String> {
        if self.awaiting_ack {
            let _ = self.ready.send(());
        }
        let line = self.lines.recv().await;
        self.awaiting_ack = line.is_some();
        line
    }
}
