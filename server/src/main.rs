//! Booking coordinator HTTP server.

use anyhow::Context;
use booking_runtime::metrics::MetricsExporter;
use booking_server::{app, Config};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "booking=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting booking coordinator");

    let config = Config::from_env().context("loading configuration")?;
    info!(address = %config.bind_address(), recovery_interval = ?config.recovery_interval, "Configuration loaded");

    let mut metrics = MetricsExporter::new();
    metrics.install().context("installing metrics recorder")?;

    info!("Connecting to database...");
    let pool = booking_postgres::connect(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to PostgreSQL")?;
    booking_postgres::migrate(&pool).await.context("running migrations")?;
    info!("Database ready");

    let app = app::build(&config, pool, metrics)?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let recovery = app.recovery.spawn(async move {
        let _ = shutdown_rx.wait_for(|stop| *stop).await;
    });

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "Server listening");

    axum::serve(listener, app.router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = recovery.await {
        error!(error = %e, "Recovery job ended abnormally");
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending();

    tokio::select! {
        () = ctrl_c => {
            info!(signal = "SIGINT", "Draining requests and stopping recovery");
        },
        () = terminate => {
            info!(signal = "SIGTERM", "Draining requests and stopping recovery");
        },
    }
}
