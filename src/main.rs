//! Logwatch command-line entry point.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result as AnyhowResult};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use logwatch::config::MonitorConfig;
use logwatch::error::{MonitorError, MonitorResult};
use logwatch::generator::Generator;
use logwatch::logging::init_logging;
use logwatch::metrics::MetricsExporter;
use logwatch::{Monitor, MonitorKind, DEFAULT_GENERATOR_PORT, LOGWATCH_FULL_NAME, LOGWATCH_VERSION};

// ============================================================================
// CLI ARGUMENT PARSER
// ============================================================================

/// Logwatch CLI
#[derive(Parser, Debug)]
#[command(
    name = "logwatch",
    author = "AIOps Team",
    version,
    about = "Reconciliation and trend-analysis monitors for a log-ingestion pipeline",
    long_about = "Logwatch compares how many log records producers generated against how \
                  many the analyzer durably processed, adjusts for work still queued, and \
                  publishes consistency and performance metrics."
)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "logwatch.toml", env = "LOGWATCH_CONFIG")]
    pub config: PathBuf,

    /// Log level override
    #[arg(short, long, env = "LOGWATCH_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long, env = "LOGWATCH_DEBUG")]
    pub debug: bool,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the consistency monitor
    Consistency,

    /// Run the performance monitor
    Performance,

    /// Run the synthetic log producer
    Generate,

    /// Validate configuration file
    Validate {
        /// Show full parsed configuration
        #[arg(short, long)]
        verbose: bool,
    },

    /// Generate default configuration file
    GenerateConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show version and build info
    Version,
}

// ============================================================================
// CLI HANDLERS
// ============================================================================

/// Handle the validate subcommand
fn handle_validate(config_path: &Path, verbose: bool) -> MonitorResult<()> {
    println!("Validating configuration file: {}", config_path.display());

    match MonitorConfig::load(config_path, true) {
        Ok(config) => {
            println!("✅ Configuration is valid!");

            if verbose {
                println!("\n📋 Parsed configuration:");
                println!("{}", "=".repeat(60));
                match toml::to_string_pretty(&config) {
                    Ok(s) => println!("{}", s),
                    Err(e) => println!("Failed to serialize: {}", e),
                }
            }

            println!("\n📊 Configuration Summary:");
            println!("  • Store: {} ({}.{})", config.store.url, config.store.database, config.store.collection);
            println!("  • Producers: {}", config.producers.urls.len());
            for url in &config.producers.urls {
                println!("    - {}", url);
            }
            println!("  • Queue: {} at {}", config.queue.name, config.queue.base_url());
            println!("  • Poll interval: {}s", config.monitor.poll_interval_secs);
            println!(
                "  • Ratio thresholds: {}% / {}%",
                config.thresholds.ratio_low, config.thresholds.ratio_high
            );
            println!(
                "  • Latency thresholds: {}ms / {}ms",
                config.thresholds.latency_warning_ms, config.thresholds.latency_critical_ms
            );
            println!("  • Snapshot directory: {}", config.monitor.snapshot_dir.display());
            println!("  • Generator workers: {}", config.generator.workers);

            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed!");
            println!("Error: {}", e);
            Err(MonitorError::Config(e))
        }
    }
}

/// Handle the generate-config subcommand
fn handle_generate_config(output: Option<&Path>) -> MonitorResult<()> {
    let config_str = MonitorConfig::generate_default_config();

    match output {
        Some(path) => {
            fs::write(path, &config_str)?;
            println!("✅ Default configuration written to: {}", path.display());
        }
        None => println!("{}", config_str),
    }

    Ok(())
}

/// Handle the version subcommand
fn handle_version() {
    println!("📈 {} v{}", LOGWATCH_FULL_NAME, LOGWATCH_VERSION);
    println!();
    println!("Build Information:");
    println!("  • Target: {}", std::env::consts::ARCH);
    println!("  • OS: {}", std::env::consts::OS);
    println!("  • Family: {}", std::env::consts::FAMILY);
    println!();
    println!("Monitors:");
    println!("  • consistency  generated vs. processed, queue-adjusted");
    println!("  • performance  processing rate, latency, queue growth, health");
    println!("  • generate     synthetic producer feeding the queue");
    println!();
    println!("License: MIT");
}

// ============================================================================
// RUNTIME
// ============================================================================

/// Resolve once SIGINT or SIGTERM arrives.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!(target: "logwatch::main", "Received SIGTERM"),
                    _ = sigint.recv() => info!(target: "logwatch::main", "Received SIGINT"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(target: "logwatch::main", error = %e, "Failed to install signal handlers, using Ctrl-C only");
            }
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!(target: "logwatch::main", "Received Ctrl-C"),
        Err(e) => {
            error!(target: "logwatch::main", error = %e, "No shutdown signal available");
            std::future::pending::<()>().await;
        }
    }
}

async fn run_monitor(kind: MonitorKind, config: &MonitorConfig, cancel: CancellationToken) -> AnyhowResult<()> {
    let monitor = Monitor::from_config(kind, config).with_context(|| format!("Failed to build {} monitor", kind))?;

    let address = config.metrics.address(monitor.profile().default_metrics_port);
    let (_, exporter) = MetricsExporter::new(monitor.metrics().registry().clone())
        .spawn(&address, cancel.clone())
        .await
        .with_context(|| format!("Failed to start metrics server on {}", address))?;

    let result = monitor.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = exporter.await {
        warn!(target: "logwatch::main", error = %e, "Metrics server task failed");
    }

    result.with_context(|| format!("{} monitor stopped", kind))
}

async fn run_generator(config: &MonitorConfig, cancel: CancellationToken) -> AnyhowResult<()> {
    let generator = Generator::from_config(config).context("Failed to build log generator")?;

    let address = config.metrics.address(DEFAULT_GENERATOR_PORT);
    let (_, exporter) = MetricsExporter::new(generator.metrics().registry().clone())
        .spawn(&address, cancel.clone())
        .await
        .with_context(|| format!("Failed to start metrics server on {}", address))?;

    generator.run(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = exporter.await {
        warn!(target: "logwatch::main", error = %e, "Metrics server task failed");
    }
    Ok(())
}

// ============================================================================
// MAIN ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();

    // Subcommands that don't need logging or sources
    match &cli.command {
        Commands::Version => {
            handle_version();
            return Ok(());
        }
        Commands::GenerateConfig { output } => {
            handle_generate_config(output.as_deref())?;
            return Ok(());
        }
        Commands::Validate { verbose } => {
            handle_validate(&cli.config, *verbose)?;
            return Ok(());
        }
        Commands::Consistency | Commands::Performance | Commands::Generate => {}
    }

    let config = MonitorConfig::load(&cli.config, false)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let mut logging_config = config.logging.clone();
    if let Some(level) = &cli.log_level {
        logging_config.level = level.clone();
    }
    if cli.debug {
        logging_config.level = "debug".into();
    }
    let _logging = init_logging(&logging_config).context("Failed to initialize logging")?;

    info!(target: "logwatch::main", "📈 {} v{}", LOGWATCH_FULL_NAME, LOGWATCH_VERSION);
    if !cli.config.exists() {
        warn!(
            target: "logwatch::main",
            path = %cli.config.display(),
            "Config file not found, using defaults and environment"
        );
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            wait_for_shutdown().await;
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Consistency => run_monitor(MonitorKind::Consistency, &config, cancel).await?,
        Commands::Performance => run_monitor(MonitorKind::Performance, &config, cancel).await?,
        Commands::Generate => run_generator(&config, cancel).await?,
        Commands::Validate { .. } | Commands::GenerateConfig { .. } | Commands::Version => {}
    }

    info!(target: "logwatch::main", "Shutdown complete");
    Ok(())
}
