//! tablecopy CLI - copy table contents between databases in batches.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tablecopy::config::{redact_url, resolve};
use tablecopy::core::ConnectionRole;
use tablecopy::error::{EXIT_CANCELLED, EXIT_TRANSFER_FAILED};
use tablecopy::{
    ConnectionFactory, ConnectionPolicy, ConnectionRegistry, ConnectionSpec, CoordinatorConfig,
    CopyError, DriverRegistry, TransferCoordinator,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "tablecopy")]
#[command(about = "Batch-copy table contents between heterogeneous databases")]
#[command(version)]
struct Cli {
    /// Path to the connection registry (YAML, or JSON with a .json extension).
    /// Without it, connections come from SOURCE_* and TARGET_* variables
    #[arg(short, long, env = "CONFIG_FILE_PATH")]
    config: Option<PathBuf>,

    /// Directory of driver plugins to load in addition to the built-in drivers
    #[arg(long, env = "TABLECOPY_DRIVERS")]
    drivers_dir: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy tables from the source connection to the target connection
    Copy {
        /// Tables to copy, as `table` or `schema.table` [env: SOURCE_TABLE, comma-separated]
        #[arg(env = "SOURCE_TABLE", value_delimiter = ',', hide_env = true)]
        tables: Vec<String>,

        /// Logical name of the source connection
        #[arg(long, default_value = "source")]
        source: String,

        /// Logical name of the target connection
        #[arg(long, default_value = "target")]
        target: String,

        /// Rows per grouped write and commit [default: 10000]
        #[arg(short, long, env = "BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Maximum number of tables copied at once [default: 8]
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Connection sharing between table workers: dedicated, shared or auto
        #[arg(long)]
        connection_policy: Option<ConnectionPolicy>,
    },

    /// List available drivers and skipped plugin artifacts
    Drivers,

    /// Test database connections
    HealthCheck {
        /// Logical name of the source connection
        #[arg(long, default_value = "source")]
        source: String,

        /// Logical name of the target connection
        #[arg(long, default_value = "target")]
        target: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, CopyError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(CopyError::Config)?;

    // Listing drivers needs no connections unless a file was given.
    let connections = match &cli.config {
        Some(path) => {
            let registry = ConnectionRegistry::load(path)?;
            info!("Loaded configuration from {:?}", path);
            Some(registry)
        }
        None if matches!(cli.command, Commands::Drivers) => None,
        None => Some(ConnectionRegistry::from_env()?),
    };

    let drivers_dir = cli.drivers_dir.clone().or_else(|| {
        connections
            .as_ref()
            .and_then(|c| c.settings().drivers_dir.clone())
    });

    match cli.command {
        Commands::Copy {
            tables,
            source,
            target,
            batch_size,
            max_concurrency,
            connection_policy,
        } => {
            let connections = configured(connections)?;
            let (source, target) = connections.require_pair(&source, &target)?;

            let mut config = CoordinatorConfig::from_settings(connections.settings());
            if let Some(n) = batch_size {
                config.batch_size = n;
            }
            if let Some(n) = max_concurrency {
                config.max_concurrency = n;
            }
            if let Some(policy) = connection_policy {
                config.connection_policy = policy;
            }
            config.validate()?;

            let tables: Vec<String> = tables
                .into_iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            if tables.is_empty() {
                return Err(CopyError::Config(
                    "no tables given (pass table names or set SOURCE_TABLE)".into(),
                ));
            }

            let registry = Arc::new(DriverRegistry::discover(drivers_dir.as_deref())?);
            info!(
                "Copying {} tables from '{}' ({}) to '{}' ({}), batch size {}",
                tables.len(),
                source.name,
                redact_url(&source.url),
                target.name,
                redact_url(&target.url),
                config.batch_size
            );

            let cancel = setup_signal_handler();
            let coordinator = TransferCoordinator::new(registry, config);
            let report = coordinator
                .run(&tables, source, target, cancel.clone())
                .await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\n{}", report.summary());
            }

            if report.is_success() {
                Ok(0)
            } else if cancel.is_cancelled() {
                Ok(EXIT_CANCELLED)
            } else {
                Ok(EXIT_TRANSFER_FAILED)
            }
        }

        Commands::Drivers => {
            let registry = DriverRegistry::discover(drivers_dir.as_deref())?;
            print_drivers(&registry, cli.output_json)?;
            Ok(0)
        }

        Commands::HealthCheck { source, target } => {
            let connections = configured(connections)?;
            let registry = DriverRegistry::discover(drivers_dir.as_deref())?;
            let factory = ConnectionFactory::default();

            let mut checks = Vec::new();
            for (name, role) in [(source, ConnectionRole::Source), (target, ConnectionRole::Target)] {
                let spec = connections.get(&name)?;
                checks.push(health_check(&registry, &factory, spec, role).await);
            }
            let healthy = checks.iter().all(|c| c.error.is_none());

            if cli.output_json {
                let json = serde_json::json!({
                    "healthy": healthy,
                    "connections": checks.iter().map(|c| serde_json::json!({
                        "name": c.name,
                        "role": c.role.to_string(),
                        "connected": c.error.is_none(),
                        "latencyMs": c.latency_ms,
                        "error": c.error,
                    })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("Health Check Results:");
                for c in &checks {
                    println!(
                        "  {} '{}': {} ({}ms)",
                        c.role,
                        c.name,
                        if c.error.is_none() { "OK" } else { "FAILED" },
                        c.latency_ms
                    );
                    if let Some(ref err) = c.error {
                        println!("    Error: {}", err);
                    }
                }
                println!(
                    "\n  Overall: {}",
                    if healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !healthy {
                let failed: Vec<&str> = checks
                    .iter()
                    .filter(|c| c.error.is_some())
                    .map(|c| c.name.as_str())
                    .collect();
                return Err(CopyError::connection(failed.join(", "), "health check failed"));
            }
            Ok(0)
        }
    }
}

fn configured(connections: Option<ConnectionRegistry>) -> Result<ConnectionRegistry, CopyError> {
    connections.ok_or_else(|| CopyError::Config("no connections configured".into()))
}

struct HealthCheck {
    name: String,
    role: ConnectionRole,
    latency_ms: u64,
    error: Option<String>,
}

async fn health_check(
    registry: &DriverRegistry,
    factory: &ConnectionFactory,
    spec: &ConnectionSpec,
    role: ConnectionRole,
) -> HealthCheck {
    let start = Instant::now();
    let outcome = open_and_ping(registry, factory, spec, role).await;

    HealthCheck {
        name: spec.name.clone(),
        role,
        latency_ms: start.elapsed().as_millis() as u64,
        error: outcome.err().map(|e| e.to_string()),
    }
}

async fn open_and_ping(
    registry: &DriverRegistry,
    factory: &ConnectionFactory,
    spec: &ConnectionSpec,
    role: ConnectionRole,
) -> Result<(), CopyError> {
    let driver = registry.resolve(&resolve(spec)?.db_type)?;
    let handle = factory.open(driver.as_ref(), spec, role).await?;
    let ping = handle.connection().ping().await;
    handle.close().await;
    ping
}

fn print_drivers(registry: &DriverRegistry, json: bool) -> Result<(), CopyError> {
    if json {
        let drivers: Vec<_> = registry
            .drivers()
            .map(|d| {
                let caps = d.capabilities();
                serde_json::json!({
                    "name": d.name(),
                    "aliases": d.aliases(),
                    "concurrentReads": caps.concurrent_reads,
                    "concurrentWrites": caps.concurrent_writes,
                    "transactional": caps.transactional,
                })
            })
            .collect();
        let skipped: Vec<_> = registry
            .skipped()
            .iter()
            .map(|s| serde_json::json!({ "path": s.path.display().to_string(), "reason": s.reason }))
            .collect();
        let out = serde_json::json!({ "drivers": drivers, "skipped": skipped });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("Drivers:");
    for d in registry.drivers() {
        let caps = d.capabilities();
        let aliases = if d.aliases().is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", d.aliases().join(", "))
        };
        println!(
            "  {}{} - concurrent reads: {}, concurrent writes: {}, transactional: {}",
            d.name(),
            aliases,
            yes_no(caps.concurrent_reads),
            yes_no(caps.concurrent_writes),
            yes_no(caps.transactional)
        );
    }
    if !registry.skipped().is_empty() {
        println!("Skipped plugin artifacts:");
        for s in registry.skipped() {
            println!("  {}: {}", s.path.display(), s.reason);
        }
    }
    Ok(())
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("unknown verbosity '{}'", other)),
    };

    // RUST_LOG wins over --verbosity when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }
    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM. In-flight tables stop at
/// the next row or batch boundary.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, label) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Failed to install {} handler: {}", label, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!("\nReceived {}. Stopping at the next batch boundary...", label);
            token.cancel();
        });
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Stopping at the next batch boundary...");
        token.cancel();
    });

    cancel_token
}
