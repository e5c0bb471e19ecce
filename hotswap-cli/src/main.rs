//! hotswap CLI

mod invoke;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hotswap_config::{load_config, Config};
use hotswap_runtime::{ReloadCoordinator, StagingArea, TickDriver};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "hotswap")]
#[command(about = "Hot reload host for native modules", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every module and reload them as their libraries are rebuilt
    Run {
        /// Path to the module manifest
        #[arg(short, long, default_value = "hotswap.yaml")]
        config: PathBuf,

        /// Log level (trace, debug, info, warn, error); overrides the manifest
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Validate a module manifest
    Validate {
        /// Path to the module manifest
        #[arg(short, long, default_value = "hotswap.yaml")]
        config: PathBuf,
    },

    /// Load one module and call an exported function
    Call {
        /// Path to the module manifest
        #[arg(short, long, default_value = "hotswap.yaml")]
        config: PathBuf,

        /// Module id
        #[arg(short, long)]
        module: String,

        /// Exported function name
        #[arg(short, long)]
        symbol: String,

        /// Arguments, parsed per the declared signature
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Load every module once and print their state as JSON
    Status {
        /// Path to the module manifest
        #[arg(short, long, default_value = "hotswap.yaml")]
        config: PathBuf,
    },

    /// Delete staged library copies
    Clean {
        /// Path to the module manifest
        #[arg(short, long, default_value = "hotswap.yaml")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, log_level } => {
            let config = load(&config)?;
            let level = log_level.unwrap_or_else(|| config.observability.logging.level.clone());
            init_tracing(&level, &config.observability.logging.format)?;
            run(config).await
        }

        Commands::Validate { config: path } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating manifest: {}", path.display());

            match load_config(&path) {
                Ok(cfg) => {
                    tracing::info!("✓ Manifest is valid");
                    tracing::info!("  Staging dir: {}", cfg.runtime.staging_dir().display());
                    tracing::info!("  Poll interval: {:?}", cfg.runtime.poll_interval);
                    tracing::info!("  Watch backend: {:?}", cfg.runtime.watch.backend);
                    for module in &cfg.modules {
                        tracing::info!(
                            "  Module {}{}: {} ({} symbols)",
                            module.id,
                            if module.enabled { "" } else { " [disabled]" },
                            module.path.display(),
                            module.symbols.len()
                        );
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Manifest validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Call {
            config,
            module,
            symbol,
            args,
        } => {
            let config = load(&config)?;
            init_tracing("warn", &config.observability.logging.format)?;

            let declared = config
                .module(&module)
                .with_context(|| format!("module '{module}' is not declared"))?
                .to_descriptor();

            let coordinator = ReloadCoordinator::new(config.runtime.clone());
            coordinator.register_or_refresh(declared)?;

            let bound = coordinator.resolve(&module, &symbol)?;
            // SAFETY: the manifest declares the signature of every symbol.
            let result = unsafe { invoke::invoke(&bound, &args) }?;
            drop(bound);

            println!("{result}");
            coordinator.shutdown();
            Ok(())
        }

        Commands::Status { config } => {
            let config = load(&config)?;
            init_tracing("warn", &config.observability.logging.format)?;

            let coordinator = ReloadCoordinator::new(config.runtime.clone());
            coordinator.discover(&config)?;

            println!("{}", serde_json::to_string_pretty(&coordinator.modules())?);
            coordinator.shutdown();
            Ok(())
        }

        Commands::Clean { config } => {
            let config = load(&config)?;
            let logging = &config.observability.logging;
            init_tracing(&logging.level, &logging.format)?;

            let staging = StagingArea::new(config.runtime.staging_dir());
            let removed = staging
                .purge(&[])
                .with_context(|| format!("failed to clean {}", staging.dir().display()))?;

            println!("Removed {removed} staged copies from {}", staging.dir().display());
            Ok(())
        }

        Commands::Version => {
            println!("hotswap");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<Config> {
    load_config(path).with_context(|| format!("failed to load manifest {}", path.display()))
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting hotswap host");
    tracing::info!(
        staging = %config.runtime.staging_dir().display(),
        poll_interval = ?config.runtime.poll_interval,
        "Configuration loaded"
    );

    let coordinator = Arc::new(ReloadCoordinator::new(config.runtime.clone()));
    let mut events = coordinator.subscribe();

    for (id, outcome) in coordinator.discover(&config)? {
        if let Err(e) = outcome {
            tracing::warn!(module = %id, error = %e, "Module not loaded, waiting for a rebuild");
        }
    }

    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.success => tracing::info!(
                    module = %event.module_id,
                    trigger = ?event.trigger,
                    "Reloaded"
                ),
                Ok(event) => tracing::error!(
                    module = %event.module_id,
                    trigger = ?event.trigger,
                    error = event.error.as_deref().unwrap_or("unknown"),
                    "Reload failed"
                ),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "Reload event stream lagged")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let ticks = TickDriver::new(coordinator.clone(), config.runtime.poll_interval).spawn();
    tracing::info!(modules = coordinator.len(), "Watching for rebuilds, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    tracing::info!("Shutting down");
    ticks.stop().await;
    reporter.abort();
    coordinator.shutdown();

    tracing::info!("Stopped");
    Ok(())
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(filter.into());
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .try_init()?;
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .try_init()?;
    }

    Ok(())
}
