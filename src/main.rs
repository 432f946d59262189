use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gso::config::{ConfigDiscovery, RuntimeKind, ServiceConfig};
use gso::service::ServiceContext;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gso")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Game server orchestrator: container lifecycle, console access and metrics")]
struct Args {
    /// Configuration file (skips discovery)
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Address of the metrics endpoint
    #[arg(short = 'l', long = "listen")]
    listen: Option<String>,

    /// Container runtime to use
    #[arg(short = 'r', long = "runtime", value_enum)]
    runtime: Option<RuntimeKind>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the supervisor (default)
    Serve,
    /// Show where configuration is looked up
    ShowConfig {
        /// Print the effective configuration as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Write a default ~/.gso/config.toml
    InitConfig,
}

fn load_config(args: &Args) -> Result<ServiceConfig> {
    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {:?}", path);
            ServiceConfig::from_toml_file(path)?
        }
        None => ConfigDiscovery::discover_config()?,
    };

    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(runtime) = args.runtime {
        config.runtime = runtime;
    }
    Ok(config)
}

async fn serve(config: ServiceConfig) -> Result<()> {
    let addr = config.listen_addr()?;
    let service = Arc::new(
        ServiceContext::from_config(&config)
            .await
            .context("Failed to initialize service")?,
    );
    service.start().await?;

    let http = tokio::spawn(gso::http::serve(
        Arc::clone(&service),
        addr,
        service.shutdown_signal(),
    ));

    let mut stopped = service.shutdown_signal();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
        }
        _ = stopped.wait_for(|stopped| *stopped) => {}
    }

    service.stop().await?;
    match http.await {
        Ok(result) => result?,
        Err(e) => error!("HTTP task ended abnormally: {}", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gso=info")),
        )
        .init();

    let args = Args::parse();

    match &args.command {
        Some(Command::ShowConfig { json: false }) => {
            println!("{}", ConfigDiscovery::discovery_info());
            Ok(())
        }
        Some(Command::ShowConfig { json: true }) => {
            let config = load_config(&args)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Some(Command::InitConfig) => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {}", path.display());
            Ok(())
        }
        Some(Command::Serve) | None => {
            let config = load_config(&args)?;
            info!("Starting gso with {:?} runtime", config.runtime);
            serve(config).await
        }
    }
}
