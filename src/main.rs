//! OWEN Cloud Sync - cycle synchronizer for OWEN Cloud devices
//!
//! Polls the device's synchronization counter, acknowledges every genuine
//! measurement cycle by toggling the new-cycle indicator, archives the
//! parameter snapshot to CSV and serves a read-only dashboard.
//!
//! # Usage
//!
//! ```bash
//! # Run the synchronizer and the dashboard
//! OWEN_LOGIN=user OWEN_PASSWORD=secret ./owencloud-sync
//!
//! # Explicit config file, dashboard on another port
//! ./owencloud-sync --config /etc/owen/sync_config.toml --addr 0.0.0.0:8080
//!
//! # Only discover the device and parameter ids, then exit
//! ./owencloud-sync resolve
//! ```
//!
//! # Environment Variables
//!
//! - `OWEN_SYNC_CONFIG`: Path to the TOML config (default: `./sync_config.toml`)
//! - `OWEN_LOGIN` / `OWEN_PASSWORD`: Account credentials
//! - `OWEN_SYNC_CORS_ORIGINS`: Comma-separated origins allowed by the dashboard
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use owencloud_sync::api::{create_app, DashboardState};
use owencloud_sync::storage::ConfigStore;
use owencloud_sync::sync::{resolve, shared_status, Credentials, SharedStatus, SystemClock, TokenCache};
use owencloud_sync::{CloudClient, CsvExporter, JsonConfigStore, ProcessLock, SyncConfig, Synchronizer};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "owencloud-sync")]
#[command(about = "OWEN Cloud cycle synchronizer and CSV archiver")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides OWEN_SYNC_CONFIG lookup)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override the dashboard address (default: "0.0.0.0:5000")
    #[arg(short, long)]
    addr: Option<String>,

    /// Run the synchronizer without the dashboard
    #[arg(long)]
    no_dashboard: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "OWEN_SYNC_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<SubCommand>,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Discover the device and parameter ids, save them and exit
    Resolve,
}

// ============================================================================
// Task Identity
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    Synchronizer,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::Synchronizer => write!(f, "Synchronizer"),
        }
    }
}

// ============================================================================
// Startup Helpers
// ============================================================================

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolve the effective configuration from the config file, the environment
/// and the command line.
fn load_config(args: &CliArgs) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let mut config = SyncConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env_overrides();
            config
        }
        None => SyncConfig::load(),
    };

    if let Some(addr) = &args.addr {
        config.server.addr.clone_from(addr);
    }
    if args.no_dashboard {
        config.server.enabled = false;
    }

    config.validate_for_run().context("Invalid configuration")?;
    Ok(config)
}

fn credentials(config: &SyncConfig) -> Credentials {
    Credentials {
        login: config.cloud.login.clone(),
        password: config.cloud.password.clone(),
    }
}

/// One-shot discovery: log in, resolve ids, persist them.
async fn run_resolve(config: &SyncConfig) -> Result<()> {
    info!("🔎 Resolving device configuration against {}", config.cloud.api_url);

    let client = CloudClient::new(&config.cloud).context("Failed to build cloud client")?;
    let mut tokens = TokenCache::new(
        credentials(config),
        Duration::from_secs(config.polling.token_ttl_secs),
        Arc::new(SystemClock),
    );
    let token = tokens
        .acquire(&client, true)
        .await
        .context("Authentication failed")?;

    let store = JsonConfigStore::new(config.device_config_path());
    let prior = match store.load() {
        Ok(prior) => prior,
        Err(e) => {
            warn!("Ignoring unreadable device config: {}", e);
            None
        }
    };

    let device = resolve(&client, &token, prior.as_ref())
        .await
        .context("Device resolution failed")?;
    store.save(&device).context("Failed to save device config")?;

    info!("✓ Device: {:?}", device.device_id);
    info!("✓ Synchronization parameter: {:?}", device.sync_param_id);
    info!("✓ Indicator parameter: {:?}", device.indicator_param_id);
    info!("✓ {} parameters saved to {}", device.parameter_ids.len(), store.path().display());
    Ok(())
}

// ============================================================================
// Task Spawning
// ============================================================================

/// Spawn the dashboard server task into the JoinSet.
fn spawn_http_server(
    task_set: &mut JoinSet<Result<TaskName>>,
    listener: tokio::net::TcpListener,
    app: axum::Router,
    cancel_token: CancellationToken,
) {
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;

        match result {
            Ok(()) => {
                info!("[HttpServer] Graceful shutdown complete");
                Ok(TaskName::HttpServer)
            }
            Err(e) => {
                error!("[HttpServer] Server error: {}", e);
                Err(anyhow::anyhow!("HTTP server error: {}", e))
            }
        }
    });
}

/// Spawn the synchronization loop task into the JoinSet.
fn spawn_synchronizer(
    task_set: &mut JoinSet<Result<TaskName>>,
    config: &SyncConfig,
    status: SharedStatus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let client = CloudClient::new(&config.cloud).context("Failed to build cloud client")?;
    let mut synchronizer = Synchronizer::new(
        client,
        CsvExporter::new(config.csv_path()),
        JsonConfigStore::new(config.device_config_path()),
        credentials(config),
        config.polling.policy(),
        Duration::from_secs(config.cloud.write_confirm_timeout_secs),
        Arc::new(SystemClock),
    )
    .with_status(status);

    task_set.spawn(async move {
        info!("[Synchronizer] Task starting");

        synchronizer
            .bootstrap(&cancel_token)
            .await
            .context("Synchronizer startup failed")?;
        let summary = synchronizer
            .run(cancel_token)
            .await
            .context("Synchronizer stopped on a fatal error")?;

        info!(
            "[Synchronizer] Stopped after {} iterations, {} cycles, {} write failures",
            summary.iterations, summary.accepted_cycles, summary.write_failures
        );
        Ok(TaskName::Synchronizer)
    });
    Ok(())
}

/// Monitor tasks until all have finished.
///
/// The first task to finish, for any reason, cancels the others. Remaining
/// tasks are still joined so an in-flight iteration completes before exit.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("🔒 Supervisor: All tasks spawned, monitoring...");
    let mut first_error: Option<anyhow::Error> = None;

    while let Some(result) = task_set.join_next().await {
        match result {
            Ok(Ok(task_name)) => {
                info!("🔒 Supervisor: Task {} completed normally", task_name);
            }
            Ok(Err(e)) => {
                error!("🔒 Supervisor: Task failed with error: {:#}", e);
                first_error.get_or_insert(e);
            }
            Err(e) => {
                error!("🔒 Supervisor: Task panicked: {}", e);
                first_error.get_or_insert(anyhow::anyhow!("Task panicked: {}", e));
            }
        }
        if !cancel_token.is_cancelled() {
            info!("🛑 Supervisor: Stopping remaining tasks");
            cancel_token.cancel();
        }
    }

    info!("🔒 Supervisor: All tasks completed");
    first_error.map_or(Ok(()), Err)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.json_logs);

    let config = load_config(&args)?;

    if let Some(SubCommand::Resolve) = &args.command {
        return run_resolve(&config).await;
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  OWEN Cloud Sync v{}", env!("CARGO_PKG_VERSION"));
    info!("  Cycle synchronizer and CSV archiver");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");
    info!("☁️  Cloud: {} (login {})", config.cloud.api_url, config.cloud.login);
    info!("📄 Export: {}", config.csv_path().display());
    info!("⚙️  Device config: {}", config.device_config_path().display());
    info!(
        "⏱️  Polling: {}ms active / {}s idle, window {}-{}s, min cycle {}s",
        config.polling.active_interval_ms,
        config.polling.idle_interval_secs,
        config.polling.active_window_start_secs,
        config.polling.active_window_end_secs,
        config.polling.min_cycle_secs
    );
    info!("");

    info!("🔒 Acquiring process lock...");
    let _process_lock = ProcessLock::acquire(&config.storage.data_dir)
        .context("Failed to acquire process lock")?;
    info!("✓ Process lock acquired");

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let status = shared_status();
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    if config.server.enabled {
        let listener = tokio::net::TcpListener::bind(&config.server.addr)
            .await
            .with_context(|| format!("Failed to bind dashboard to {}", config.server.addr))?;
        let app = create_app(DashboardState::new(
            Arc::clone(&status),
            config.csv_path(),
            config.server.table_rows,
        ));
        info!("🌐 Dashboard: http://{}", config.server.addr);
        spawn_http_server(&mut task_set, listener, app, cancel_token.clone());
    } else {
        info!("🌐 Dashboard: disabled");
    }

    spawn_synchronizer(&mut task_set, &config, status, cancel_token.clone())?;

    let result = run_supervisor(&mut task_set, cancel_token).await;

    info!("");
    match &result {
        Ok(()) => info!("✓ OWEN Cloud Sync shutdown complete"),
        Err(e) => error!("✗ OWEN Cloud Sync stopped: {:#}", e),
    }
    result
}
