//! Smarter device manager CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use smarter_config::{load_config, HealthCheckConfig, ManagerSettings, SettingsBuilder};
use smarter_discovery::discover;
use smarter_plugin::InstanceFactory;
use smarter_runtime::{EventSources, Orchestrator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "smarter-device-manager")]
#[command(about = "Expose host device files to Kubernetes as extended resources", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a device plugin per discovered device and keep it registered
    Serve {
        #[command(flatten)]
        node: NodeArgs,

        /// Attach GPU control device nodes to GPU allocations
        #[arg(long, env = "SMARTER_PASS_DEVICE_SPECS")]
        pass_device_specs: bool,

        /// Delay between failed restart attempts, in milliseconds
        #[arg(long, default_value_t = 1000)]
        restart_backoff_ms: u64,

        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "info")]
        log_level: String,

        /// Log output format
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
    },

    /// Validate configuration file
    Validate {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/conf.yaml")]
        config: PathBuf,
    },

    /// Print the resources that would be served on this node
    Discover {
        #[command(flatten)]
        node: NodeArgs,
    },

    /// Show version information
    Version,
}

/// Configuration file and node layout
#[derive(Args)]
struct NodeArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/conf.yaml")]
    config: PathBuf,

    /// Directory scanned for device files
    #[arg(long, default_value = "/dev")]
    device_root: PathBuf,

    /// Directory scanned for GPU entries
    #[arg(long, default_value = "/sys/devices")]
    sysfs_root: PathBuf,

    /// Kubelet device plugin directory
    #[arg(long, default_value = smarter_core::DEVICE_PLUGIN_PATH)]
    plugin_dir: PathBuf,

    /// Maximum depth below the device root
    #[arg(long, default_value_t = 10)]
    scan_depth: usize,
}

impl NodeArgs {
    fn settings(&self) -> SettingsBuilder {
        SettingsBuilder::new()
            .device_root(&self.device_root)
            .sysfs_root(&self.sysfs_root)
            .plugin_dir(&self.plugin_dir)
            .scan_depth(self.scan_depth)
            .health_checks(HealthCheckConfig::from_env())
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            node,
            pass_device_specs,
            restart_backoff_ms,
            log_level,
            log_format,
        } => {
            init_tracing(&log_level, log_format)?;

            tracing::info!("Loading smarter-device-manager");

            let settings = node
                .settings()
                .pass_device_specs(pass_device_specs)
                .restart_backoff(Duration::from_millis(restart_backoff_ms))
                .build()?;

            serve(&node.config, settings).await
        }

        Commands::Validate { config } => {
            tracing_subscriber::fmt().with_target(false).init();

            tracing::info!("Validating configuration: {}", config.display());

            match load_config(&config) {
                Ok(cfg) => {
                    tracing::info!("✓ Configuration is valid");
                    for spec in &cfg.devices {
                        tracing::info!(
                            "  {} (up to {} per device)",
                            spec.match_pattern,
                            spec.max_replicas
                        );
                    }
                    Ok(())
                }
                Err(e) => {
                    tracing::error!("✗ Configuration validation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Discover { node } => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();

            let settings = node.settings().build()?;
            let config = load_config(&node.config)
                .with_context(|| format!("failed to load {}", node.config.display()))?;
            let descriptors = discover(&config, &settings)?;

            println!("{}", serde_json::to_string_pretty(&descriptors)?);
            Ok(())
        }

        Commands::Version => {
            println!("Smarter Device Manager");
            println!("Version: {}", env!("CARGO_PKG_VERSION"));
            println!("Device plugin API: {}", smarter_core::DEVICE_PLUGIN_API_VERSION);
            println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
            Ok(())
        }
    }
}

async fn serve(config_path: &Path, settings: ManagerSettings) -> Result<()> {
    tracing::info!(config = %config_path.display(), "Reading configuration file");
    let config = load_config(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let descriptors = discover(&config, &settings).context("device discovery failed")?;
    tracing::info!(resources = descriptors.len(), "Device inventory built");

    let settings = Arc::new(settings);

    tracing::info!(dir = %settings.plugin_dir.display(), "Starting socket directory watcher and signal handlers");
    let sources = EventSources::install(&settings)?;

    let mut orchestrator = Orchestrator::new(
        InstanceFactory::new(Arc::clone(&settings)),
        descriptors,
        settings.restart_backoff,
    );
    orchestrator.run(sources).await?;

    tracing::info!("Smarter device manager stopped");
    Ok(())
}

fn init_tracing(level: &str, format: LogFormat) -> Result<()> {
    let filter = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(filter.into())
        // h2 and tower log every kubelet connection at debug
        .add_directive("h2=warn".parse()?)
        .add_directive("tower=warn".parse()?);

    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
    }

    Ok(())
}
