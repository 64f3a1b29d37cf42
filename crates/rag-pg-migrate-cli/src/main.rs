//! rag-pg-migrate CLI - move a RAG knowledge store into PostgreSQL with Apache AGE.

use clap::{Parser, Subcommand};
use rag_pg_migrate::{
    BatchProgress, Config, DatasetKind, MemoryStore, MigrateError, MigrationReport, Orchestrator,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "rag-pg-migrate")]
#[command(about = "Migrate RAG graph and key-value stores into PostgreSQL with Apache AGE")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for in-flight batches after a shutdown signal
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Override the workspace rows are written under
        #[arg(long)]
        workspace: Option<String>,

        /// Only migrate these data sets (comma separated)
        #[arg(long, value_delimiter = ',')]
        datasets: Option<Vec<DatasetKind>>,

        /// Dry run: run the whole pipeline against an in-memory store
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate row counts between source files and target
    Validate,

    /// Test the target database connection
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?.with_auto_tuning();
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            workspace,
            datasets,
            dry_run,
        } => {
            if let Some(ws) = workspace {
                config.migration.workspace = ws;
            }
            if let Some(selected) = datasets {
                config.migration.datasets = selected;
            }
            config.validate()?;

            let mut orchestrator = if dry_run {
                info!("Dry run: writing to an in-memory store");
                Orchestrator::with_store(config, Arc::new(MemoryStore::new()))
            } else {
                Orchestrator::new(config).await?
            };

            if cli.progress {
                orchestrator = orchestrator.with_progress(spawn_progress_printer());
            }

            let cancel_token = setup_signal_handler(cli.shutdown_timeout)?;
            let report = run_with_shutdown(&orchestrator, cancel_token, cli.shutdown_timeout).await;
            orchestrator.close().await;
            let report = report?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                print_report(&report, dry_run);
            }

            let failed = report.failed();
            if !failed.is_empty() {
                let names: Vec<&str> = failed.iter().map(|d| d.as_str()).collect();
                return Err(MigrateError::dataset(
                    names.join(", "),
                    "one or more data sets did not complete",
                ));
            }
            if report.was_cancelled() {
                return Err(MigrateError::Cancelled);
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let checks = orchestrator.validate().await;
            orchestrator.close().await;
            let checks = checks?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                println!("Validation Results:");
                for check in &checks {
                    match check.verification {
                        Some(v) => println!(
                            "  {:<16} {:>10} / {:<10} {:>6.1}%  {}",
                            check.dataset.as_str(),
                            v.target_count,
                            v.source_count,
                            v.ratio() * 100.0,
                            if v.passed() { "PASS" } else { "INCOMPLETE" }
                        ),
                        None => println!(
                            "  {:<16} source file not found ({})",
                            check.dataset.as_str(),
                            check.source_path.display()
                        ),
                    }
                }
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;
            orchestrator.close().await;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref version) = result.server_version {
                    println!("    Version: {}", version);
                }
                println!(
                    "  Apache AGE: {}",
                    if result.graph_extension { "OK" } else { "MISSING" }
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::Config("Health check failed".to_string()));
            }
        }
    }

    Ok(())
}

/// Run the migration, giving up `shutdown_timeout` seconds after cancellation.
async fn run_with_shutdown(
    orchestrator: &Orchestrator,
    cancel_token: CancellationToken,
    shutdown_timeout: u64,
) -> Result<MigrationReport, MigrateError> {
    let deadline = {
        let token = cancel_token.clone();
        async move {
            token.cancelled().await;
            tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        }
    };

    tokio::select! {
        report = orchestrator.run(Some(cancel_token)) => report,
        _ = deadline => {
            warn!("Shutdown timeout of {}s exceeded, abandoning in-flight batches", shutdown_timeout);
            Err(MigrateError::Cancelled)
        }
    }
}

fn print_report(report: &MigrationReport, dry_run: bool) {
    let status_msg = match (dry_run, report.status()) {
        (true, _) => "Dry run finished!",
        (false, "completed") => "Migration completed!",
        (false, "cancelled") => "Migration cancelled.",
        (false, _) => "Migration finished with failures.",
    };
    println!("\n{}", status_msg);
    println!("  Run ID: {}", report.run_id);
    println!("  Workspace: {}", report.workspace);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Rows: {}", report.rows_migrated());
    for summary in &report.datasets {
        let verdict = match summary.verification {
            Some(v) if v.passed() => "pass",
            Some(_) => "incomplete",
            None => "-",
        };
        println!(
            "  {:<16} {:<17} migrated={} skipped={} coerced={} target={}/{} verdict={}",
            summary.dataset.as_str(),
            summary.status.to_string(),
            summary.migrated_count,
            summary.skipped_count,
            summary.coerced_count,
            summary.target_count,
            summary.source_count,
            verdict
        );
        if let Some(ref err) = summary.error {
            println!("    Error: {}", err);
        }
    }
}

fn spawn_progress_printer() -> mpsc::Sender<BatchProgress> {
    let (tx, mut rx) = mpsc::channel::<BatchProgress>(256);
    tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&progress) {
                eprintln!("{}", line);
            }
        }
    });
    tx
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (Kubernetes/Airflow shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token_int = cancel_token.clone();
    tokio::spawn(async move {
        sigint.recv().await;
        eprintln!(
            "\nReceived SIGINT. Finishing current batches (timeout: {}s)...",
            shutdown_timeout
        );
        token_int.cancel();
    });

    let token_term = cancel_token.clone();
    tokio::spawn(async move {
        sigterm.recv().await;
        eprintln!(
            "\nReceived SIGTERM. Finishing current batches (timeout: {}s)...",
            shutdown_timeout
        );
        token_term.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\nReceived Ctrl-C. Finishing current batches (timeout: {}s)...",
                shutdown_timeout
            );
            token.cancel();
        }
    });

    Ok(cancel_token)
}
