//! API server entry point.

use api::SagaLedger;
use api::config::{Config, LogFormat};
use api::error::StartupError;
use domain::User;
use event_bus::InMemoryEventBus;
use ledger::{InMemoryLedger, PostgresLedger};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use saga::{CaptureLimitGateway, InMemoryUserDirectory, serve_user_directory};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Consumer group of the stand-in user directory.
const USER_DIRECTORY_GROUP: &str = "user-directory";

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Serves HTTP over `ledger` until a shutdown signal arrives.
async fn serve<L: SagaLedger>(
    config: &Config,
    bus: &InMemoryEventBus,
    ledger: L,
    metrics_handle: PrometheusHandle,
) -> Result<(), StartupError> {
    let gateway = CaptureLimitGateway::new(config.capture_limit.clone());
    let (state, runtime) = api::create_default_state(bus, ledger, gateway, config).await?;
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, consumers = runtime.consumer_count(), "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime.shutdown();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    // 1. Configuration and tracing
    let config = Config::from_env();
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;
    api::describe_metrics();

    // 3. Event bus and the user directory it answers lookups from
    let bus = InMemoryEventBus::from_config(&config.bus);
    tracing::info!(
        brokers = ?config.bus.brokers,
        client_id = %config.bus.client_id,
        partitions = config.bus.partitions,
        "event bus ready"
    );
    let directory = InMemoryUserDirectory::with_users([User::new("user1"), User::new("user2")]);
    let responder = serve_user_directory(bus.clone(), USER_DIRECTORY_GROUP, directory).await?;

    // 4. Ledgers, services and consumers, then the server
    match config.database_url.as_deref() {
        Some(url) => {
            let ledger = PostgresLedger::connect(url).await?;
            ledger.run_migrations().await?;
            tracing::info!("using PostgreSQL ledger");
            serve(&config, &bus, ledger, metrics_handle).await?;
        }
        None => {
            tracing::info!("using in-memory ledger");
            serve(&config, &bus, InMemoryLedger::new(), metrics_handle).await?;
        }
    }

    responder.abort();
    tracing::info!("server shut down gracefully");
    Ok(())
}
