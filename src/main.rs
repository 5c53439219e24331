//! sepa_ledger - SEPA settlement backend
//!
//! Serves the SEPA transfer API over the ledger, provisions the suspense and
//! settlement accounts at startup and consumes ledger change events.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sepa_ledger::accounts::CustomerAccountService;
use sepa_ledger::api::{build_router, AppState};
use sepa_ledger::audit::{AuditSink, MemoryAuditLog, PgAuditLog};
use sepa_ledger::cdc::{CdcDispatcher, ChannelBroker};
use sepa_ledger::config::LogFormat;
use sepa_ledger::db;
use sepa_ledger::directory::{
    DirectoryStore, FileDirectoryStore, PgDirectoryStore, SystemAccountDirectory,
};
use sepa_ledger::handlers::{AuditEventHandler, BankingEventHandler};
use sepa_ledger::jobs::{SuspenseMonitor, SuspenseMonitorConfig};
use sepa_ledger::ledger::{IdGenerator, LedgerGateway, MemoryLedger};
use sepa_ledger::sepa::{SepaAccountProvisioner, SepaTransferOrchestrator};
use sepa_ledger::Config;

/// Event types the banking handler follows
const BANKING_EVENT_TYPES: [&str; 5] = [
    "single_phase",
    "two_phase_pending",
    "two_phase_posted",
    "two_phase_voided",
    "two_phase_expired",
];

/// Initialize tracing/logging
fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sepa_ledger=debug,tower_http=debug".into());

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!(environment = %config.environment, "Starting sepa_ledger server");

    // Directory and audit backing
    let pool: Option<PgPool> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::connect(url, config.database_max_connections).await?;
            db::verify_connection(&pool).await?;
            if !db::check_schema(&pool).await? {
                tracing::error!("Database schema is not complete. Please run migrations.");
                return Err(anyhow::anyhow!("Database schema incomplete"));
            }
            tracing::info!("Database connected successfully");
            Some(pool)
        }
        None => None,
    };

    let (store, audit_sink): (Arc<dyn DirectoryStore>, Arc<dyn AuditSink>) = match &pool {
        Some(pool) => (
            Arc::new(PgDirectoryStore::new(pool.clone())),
            Arc::new(PgAuditLog::new(pool.clone())),
        ),
        None => {
            tracing::warn!(
                path = %config.system_accounts_file.display(),
                "No DATABASE_URL; using file directory and in-memory audit log"
            );
            (
                Arc::new(FileDirectoryStore::new(config.system_accounts_file.clone())),
                Arc::new(MemoryAuditLog::new()),
            )
        }
    };

    let directory = Arc::new(SystemAccountDirectory::new(store));
    let loaded = directory.load().await?;
    tracing::info!(entries = loaded, "System account directory loaded");

    // Ledger
    let broker = Arc::new(ChannelBroker::new());
    let engine = Arc::new(MemoryLedger::new().with_cdc(Arc::clone(&broker)));
    let gateway = LedgerGateway::new(engine, Arc::new(IdGenerator::new()), config.retry_policy());

    // SEPA accounts
    let provisioner = Arc::new(SepaAccountProvisioner::new(gateway.clone(), Arc::clone(&directory)));
    let provisioning = provisioner.provision_all().await;
    if !provisioning.is_complete() {
        tracing::error!(errors = ?provisioning.errors, "SEPA account provisioning incomplete");
    }
    let mut validation = provisioner.validate_all().await;
    if !validation.valid {
        // The in-process ledger starts empty while the directory persists
        let restored = provisioner.restore_missing().await;
        if !restored.errors.is_empty() {
            tracing::error!(errors = ?restored.errors, "SEPA account restore incomplete");
        }
        validation = provisioner.validate_all().await;
    }
    if !validation.valid {
        tracing::error!(missing = ?validation.missing, "SEPA account validation failed");
        return Err(anyhow::anyhow!(
            "SEPA accounts missing: {}",
            validation.missing.join(", ")
        ));
    }

    let orchestrator = SepaTransferOrchestrator::new(gateway.clone(), Arc::clone(&directory));
    let accounts = CustomerAccountService::new(gateway, Arc::clone(&directory));
    let banking = Arc::new(BankingEventHandler::new(
        Arc::clone(&directory),
        config.large_transfer_threshold,
    ));

    // CDC
    let dispatcher = if config.cdc_enabled {
        let dispatcher = Arc::new(CdcDispatcher::new(broker, config.cdc_ack_mode));
        dispatcher.register_handler("*", Arc::new(AuditEventHandler::new(audit_sink)))?;
        for event_type in BANKING_EVENT_TYPES {
            dispatcher.register_handler(event_type, banking.clone())?;
        }
        dispatcher.connect().await?;
        dispatcher.start_consuming().await?;
        Some(dispatcher)
    } else {
        tracing::info!("CDC consumption disabled");
        None
    };

    // Background jobs
    let monitor = SuspenseMonitor::with_config(
        Arc::clone(&provisioner),
        orchestrator.clone(),
        SuspenseMonitorConfig {
            interval: config.suspense_monitor_interval,
        },
    )
    .start();

    let state = AppState {
        orchestrator,
        provisioner,
        accounts,
        banking,
    };
    let app = build_router(state, !config.is_production());

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    if let Some(dispatcher) = dispatcher {
        if let Err(e) = dispatcher.disconnect().await {
            tracing::warn!(error = %e, "CDC dispatcher did not disconnect cleanly");
        }
    }
    monitor.abort();
    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database connections closed");
    }
    tracing::info!("Goodbye!");

    Ok(())
}

/// Shutdown signal handler for graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
