use {
    axum::http::StatusCode,
    pix_reconcile::{
        AppState,
        adapters::openpix::verifier::WebhookVerifier,
        config::Config,
        domain::hooks::LoggingHooks,
        infra::postgres::PgPaymentRepository,
        services::worker::{run_reaper, run_worker},
    },
    sqlx::postgres::PgPoolOptions,
    std::{sync::Arc, time::Duration},
    tokio::{signal, sync::watch},
    tower_http::timeout::TimeoutLayer,
    tracing_subscriber::EnvFilter,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().expect("invalid configuration");

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(3))
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");

    let lock_timeout_ms = u64::try_from(config.repo_timeout.as_millis()).unwrap_or(u64::MAX);
    let repo = Arc::new(PgPaymentRepository::new(pool, lock_timeout_ms));

    let state = AppState {
        repo: repo.clone(),
        verifier: Arc::new(WebhookVerifier::new(config.webhook.clone())),
        repo_timeout: config.repo_timeout,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(run_worker(
        repo.clone(),
        Arc::new(LoggingHooks),
        shutdown_rx.clone(),
    ));
    let reaper = tokio::spawn(run_reaper(repo, shutdown_rx));

    // Outer bound for a whole request. 503 so the provider retries.
    let request_timeout = config.repo_timeout * 4;
    let app = pix_reconcile::router(state).layer(TimeoutLayer::with_status_code(
        StatusCode::SERVICE_UNAVAILABLE,
        request_timeout,
    ));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(worker, reaper);
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for ctrl+c");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl+c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
