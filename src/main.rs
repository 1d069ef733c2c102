//! `server-composer` binary.
//!
//! Runs a small echo application on the local engine, or controls an
//! instance already running in the background through its pid file.
//!
//! ```text
//! server-composer --config server.toml run      # foreground event loop
//! server-composer --config server.toml stop     # SIGTERM to the recorded pid
//! server-composer --config server.toml reload   # SIGUSR1 to the recorded pid
//! server-composer --config server.toml status
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use server_composer::config::{load_config, ServerConfig};
use server_composer::error::HandlerError;
use server_composer::events::DEFAULT_PRIORITY;
use server_composer::observability::{logging, metrics};
use server_composer::{
    handler_fn, EventCallbackRegistry, EventContext, LocalEngineFactory, RunningServerHandle,
    ServerBuilder, ServerSettings,
};

#[derive(Parser)]
#[command(name = "server-composer", version)]
#[command(about = "Compose and control a multi-protocol server", long_about = None)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(short, long, default_value = "server.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the server in the foreground
    Run,
    /// Stop the background server
    Stop,
    /// Reload the background server's workers
    Reload,
    /// Report whether a server is running
    Status,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("server-composer: {}", err);
            return ExitCode::FAILURE;
        }
    };

    match execute(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "Command failed");
            eprintln!("server-composer: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command, config: ServerConfig) -> Result<(), Box<dyn Error>> {
    let settings = config.server_settings()?;
    let filter = settings
        .log_level()
        .map(|level| level.as_filter().to_string())
        .unwrap_or_else(|| config.observability.log_level.clone());
    if let Err(err) = logging::init_logging(config.observability.log_format, &filter) {
        eprintln!("server-composer: logging unavailable: {}", err);
    }

    let handle = build(&config, settings)?;

    match command {
        Command::Run => {
            if config.observability.metrics_enabled {
                metrics::init_metrics(config.observability.metrics_address.parse()?)?;
            }
            if !handle.start() {
                return Err("event loop exited with an error".into());
            }
        }
        Command::Stop => handle.shutdown()?,
        Command::Reload => handle.reload()?,
        Command::Status => match handle.background_pid() {
            Some(pid) => println!("running (pid {})", pid),
            None => println!("not running"),
        },
    }
    Ok(())
}

fn build(
    config: &ServerConfig,
    settings: ServerSettings,
) -> Result<RunningServerHandle<server_composer::engine::LocalEngine>, Box<dyn Error>> {
    let listeners = config.listener_set(|_| EventCallbackRegistry::new())?;
    // this process exists to serve, so the loop owns SIGTERM/SIGINT/SIGUSR1
    let factory = LocalEngineFactory::new().with_signal_forwarding();
    let handle = ServerBuilder::new(factory, listeners, echo_application()?)
        .with_settings(settings)
        .with_running_mode(config.server.running_mode)
        .make()?;
    Ok(handle)
}

/// Greets HTTP clients and echoes everything else.
fn echo_application() -> Result<EventCallbackRegistry, Box<dyn Error>> {
    let mut callbacks = EventCallbackRegistry::new();

    callbacks.register_server_start_handler(
        handler_fn(|ctx: &EventContext| {
            tracing::info!(port = ?ctx.port(), "Echo application started");
            Ok(())
        }),
        DEFAULT_PRIORITY,
    );
    callbacks.register_request_handler(handler_fn(greet), DEFAULT_PRIORITY);
    for event in ["receive", "message", "packet"] {
        callbacks.register(event, handler_fn(echo))?;
    }
    callbacks.register(
        "task",
        handler_fn(|ctx: &EventContext| {
            if let Some((id, data)) = ctx.task() {
                tracing::info!(task = id, %data, "Task received");
                ctx.reply(data.to_string());
            }
            Ok(())
        }),
    )?;

    Ok(callbacks)
}

fn greet(ctx: &EventContext) -> Result<(), HandlerError> {
    let path = ctx.request().map(|r| r.uri.as_str()).unwrap_or("/");
    let port = ctx.port().unwrap_or_default();
    ctx.set_header("content-type", "text/plain; charset=utf-8");
    ctx.reply(format!("Hello from port {}! You asked for {}\n", port, path));
    Ok(())
}

fn echo(ctx: &EventContext) -> Result<(), HandlerError> {
    if let Some(data) = ctx.data() {
        ctx.reply(data.clone());
    }
    Ok(())
}
