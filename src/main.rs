use anyhow::Context;
use clap::{Parser, Subcommand};
use logpull::config_source::{self, ConfigSource};
use logpull::scheduler::{self, Daemon};
use logpull::secrets::{self, SecretSource};
use logpull::{Runtime, Settings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "logpull")]
#[command(about = "Incremental audit log collector", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, global = true, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured connector once and exit
    Run,
    /// Run connectors forever on their configured frequency
    Daemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!(settings = ?args.settings, "Starting logpull");
    let settings = Settings::load(args.settings.as_deref()).context("loading settings")?;
    info!(
        cache = ?settings.cache,
        output = ?settings.output,
        configs = ?settings.configs,
        workers = settings.scheduler.workers,
        "Configuration summary"
    );

    let runtime = Arc::new(
        Runtime::from_settings(&settings)
            .await
            .context("initializing runtime")?,
    );
    let source = config_source::from_settings(&settings.configs);
    let secrets = settings.secrets.as_ref().map(secrets::from_settings);

    match args.command {
        Command::Run => {
            let mut configs = source.get().await.context("loading connector configurations")?;
            if let Some(secrets) = &secrets {
                configs = secrets.load(configs).await;
            }
            let summary = scheduler::run_batch(runtime, configs, settings.scheduler.workers).await;
            if summary.failed > 0 {
                error!(failed = summary.failed, "some connectors failed");
            }
        }
        Command::Daemon => {
            let mut daemon = Daemon::new(runtime, source, &settings.scheduler);
            if let Some(secrets) = secrets {
                daemon = daemon.with_secrets(secrets);
            }
            daemon.run_until(shutdown_signal()).await?;
        }
    }

    info!("logpull stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("logpull=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logpull=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
