//! HTTP entrypoint for the control plane: loads configuration, connects the
//! database pool, runs the migration runner (C11), wires `AppState`, and
//! serves the router from [`tfstate_control::http::router`] with graceful
//! shutdown on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tfstate_control::prelude::*;

const REQUEST_ID_HEADER: &str = "x-request-id";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    tracing::info!(
        service = %config.service.name,
        environment = %config.service.environment,
        "starting tfstate-control"
    );

    let pool = tfstate_control::database::create_pool(&config.database).await?;

    if config.database.run_migrations {
        MigrationRunner::new(pool.clone()).run().await?;
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));
    let request_timeout = Duration::from_secs(config.service.request_timeout_secs);

    let app_state = AppState::new(config.clone(), pool);
    let app = tfstate_control::http::router(app_state).layer(
        ServiceBuilder::new()
            .layer(SetSensitiveHeadersLayer::new([http::header::AUTHORIZATION, http::header::COOKIE]))
            .layer(SetRequestIdLayer::new(
                http::HeaderName::from_static(REQUEST_ID_HEADER),
                MakeRequestUuid,
            ))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::new(http::HeaderName::from_static(REQUEST_ID_HEADER)))
            .layer(TimeoutLayer::new(request_timeout))
            .layer(CompressionLayer::new())
            .layer(CorsLayer::permissive())
            .layer(CatchPanicLayer::new()),
    );

    tracing::info!(%addr, "listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("server stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
