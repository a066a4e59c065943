//! lambdo: consumes an SQS queue and runs each group of events on its own
//! self-destroying Fly Machine.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lambdo::config::{ConfigError, DispatcherConfig, FlyArgs, QueueArgs};
use lambdo::operator::{run_app_command, run_machines_command, AppCommand, MachinesCommand};
use lambdo::queue::{AwsContext, SqsQueue};
use lambdo::{run_consumer, Dispatcher};
use lambdo_machines::{MachinesClient, MachinesError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Environment label that switches logging to JSON
const PRODUCTION: &str = "production";

#[derive(Parser, Debug)]
#[command(name = "lambdo")]
#[command(about = "Turns queued events into self-destroying Fly Machines")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Environment label; `production` switches logs to JSON
    #[arg(long, env = "LAMBDO_ENV", default_value = "local", global = true)]
    env: String,

    #[command(flatten)]
    queue: QueueArgs,

    #[command(flatten)]
    fly: FlyArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume the queue and dispatch machines (the default)
    Run,

    /// Inspect or manage the target app
    #[command(subcommand)]
    App(AppCommand),

    /// Inspect or manage machines of the target app
    #[command(subcommand)]
    Machines(MachinesCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print the error chain to stderr, followed by a hint when one applies
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();

    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");
    for cause in e.chain().skip(1) {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
    }

    if let Some(hint) = hint_for(e) {
        let _ = writeln!(stderr, "\n\x1b[36mHint:\x1b[0m {hint}");
    }

    if std::env::var("RUST_BACKTRACE").is_ok() {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

/// Suggest the next step for failures an operator can act on
fn hint_for(e: &anyhow::Error) -> Option<String> {
    for cause in e.chain() {
        if let Some(config) = cause.downcast_ref::<ConfigError>() {
            return Some(match config {
                ConfigError::Missing { name } => {
                    format!("export {name} or pass the matching flag (see `lambdo --help`)")
                }
                ConfigError::MissingEither { primary, .. } => format!(
                    "export {primary}; the fallback is only present when running on Fly"
                ),
            });
        }

        if let Some(machines) = cause.downcast_ref::<MachinesError>() {
            return match machines {
                MachinesError::AllRegionsFailed { regions } => Some(format!(
                    "no region accepted the machine; check the image and size, or widen \
                     LAMBDO_FLY_FALLBACK_REGIONS (tried {})",
                    regions.join(", ")
                )),
                MachinesError::AppNotFound { app } => {
                    Some(format!("create it with `lambdo --fly-app {app} app ensure`"))
                }
                MachinesError::Status {
                    status: 401 | 403, ..
                } => Some("check that LAMBDO_FLY_TOKEN is valid for this app".to_string()),
                MachinesError::WaitTimeout { .. } => Some(
                    "the machine may still be starting; check it with `lambdo machines status`"
                        .to_string(),
                ),
                _ => None,
            };
        }
    }
    None
}

fn init_tracing(environment: &str) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if environment == PRODUCTION {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.env);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    match args.command.as_ref().unwrap_or(&Command::Run) {
        Command::Run => run_dispatcher(&args, cancel).await,
        Command::App(command) => {
            let fly = args.fly.resolve().context("Invalid configuration")?;
            let client = MachinesClient::new(&fly.api_url, &fly.token)?;
            run_app_command(&client, &fly.app, &fly.org, command, &mut std::io::stdout()).await
        }
        Command::Machines(command) => {
            let fly = args.fly.resolve().context("Invalid configuration")?;
            let client = MachinesClient::new(&fly.api_url, &fly.token)?;
            run_machines_command(&client, &fly.app, command, &cancel, &mut std::io::stdout())
                .await
        }
    }
}

async fn run_dispatcher(args: &Args, cancel: CancellationToken) -> Result<()> {
    let config =
        DispatcherConfig::resolve(&args.queue, &args.fly).context("Invalid configuration")?;

    info!(
        environment = %args.env,
        app = %config.fly.app,
        regions = ?config.fly.regions,
        queue_url = %config.queue.queue_url,
        max_messages = config.queue.max_messages,
        long_poll_seconds = config.queue.long_poll_seconds,
        "Starting lambdo"
    );

    let aws = AwsContext::from_env().await;
    let queue = Arc::new(SqsQueue::new(&aws, config.queue.clone()));
    let machines = Arc::new(
        MachinesClient::new(&config.fly.api_url, &config.fly.token)
            .context("Failed to create Machines API client")?,
    );

    let dispatcher = Dispatcher::new(
        machines,
        queue.clone(),
        config.fly.app.clone(),
        config.fly.regions.clone(),
    );
    run_consumer(dispatcher, queue, config.queue.long_poll_seconds, cancel).await?;

    info!("lambdo stopped");
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, finishing in-flight work");
        cancel.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
