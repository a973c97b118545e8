//! Trigger Hub CLI - runs the trigger server headless.
//!
//! See the `trigger_hub` library for the server itself.

use anyhow::Result;
use mimalloc::MiMalloc;

/// mimalloc handles many small per-connection allocations well.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use trigger_hub::{plugins, Config, Logger, NirsTrigger, Plugin, ServerError, TriggerServer};

const VERSION: &str = env!("CARGO_PKG_VERSION");

// CLI
#[derive(Parser)]
#[command(name = "trigger-hub")]
#[command(version = VERSION)]
#[command(about = "TCP relay for lab trigger and experiment clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server and run until Ctrl-C
    Start {
        /// Path to config.json
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the listen address
        #[arg(long)]
        ip: Option<String>,
        /// Override the listen port
        #[arg(long)]
        port: Option<u16>,
        /// Require a type declaration before any other command
        #[arg(long)]
        force_verify: bool,
        /// Do not install the trigger relay commands
        #[arg(long)]
        no_trigger: bool,
    },
    /// Print the resolved configuration as JSON
    Config {
        /// Path to config.json
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();

    // TRIGGER_HUB_LOG_FILE sends logs to a file instead of stderr
    if let Ok(path) = std::env::var("TRIGGER_HUB_LOG_FILE") {
        match std::fs::File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Failed to create log file at {path}: {e}, logging to stderr"),
        }
    }
    builder.init();
}

async fn run_server(config: Config, with_trigger: bool) -> Result<()> {
    let server = TriggerServer::new(config.server_options(Logger::default()));
    server.register_debug_commands(config.debug_commands.iter().cloned());

    let plugins: Vec<Box<dyn Plugin>> = if with_trigger {
        vec![Box::new(NirsTrigger::new())]
    } else {
        Vec::new()
    };
    plugins::integrate_all(&server, &plugins)?;

    tokio::select! {
        started = server.start() => {
            started?;
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("Interrupted before the listener came up");
            server.shutdown().await;
            return Ok(());
        }
    }

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");

    for plugin in &plugins {
        plugin.strip(&server);
    }
    server.shutdown().await;
    Ok(())
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            ip,
            port,
            force_verify,
            no_trigger,
        } => {
            let mut config = Config::load(config.as_deref())?;
            if let Some(ip) = ip {
                config.ip = ip;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if force_verify {
                config.force_verify = Some(true);
            }

            let runtime = tokio::runtime::Runtime::new()?;
            if let Err(e) = runtime.block_on(run_server(config, !no_trigger)) {
                if matches!(e.downcast_ref::<ServerError>(), Some(ServerError::PermissionDenied(_))) {
                    std::process::exit(1);
                }
                return Err(e);
            }
        }
        Commands::Config { config } => {
            let config = Config::load(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
