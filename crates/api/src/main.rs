use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use parley_api::app::{self, services};
use parley_api::config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os("PARLEY_CONFIG").map(PathBuf::from);
    let config = config::load(config_path.as_deref()).context("loading config")?;
    let log = parley_observability::init(&config.log_settings())?;

    let shutdown = CancellationToken::new();
    let services = Arc::new(
        services::build_services(&config, log, shutdown.clone())
            .await
            .context("building services")?,
    );
    let background = services.start();

    let listener = TcpListener::bind(&config.server.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.addr))?;
    let debug_listener = TcpListener::bind(&config.server.debug_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.debug_addr))?;
    tracing::info!(
        addr = %listener.local_addr()?,
        debug_addr = %debug_listener.local_addr()?,
        env = ?config.global.env,
        "listening"
    );

    tokio::spawn(wait_for_signal(shutdown.clone()));

    let public = axum::serve(listener, app::build_app(Arc::clone(&services)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let debug = axum::serve(debug_listener, app::build_debug_app(Arc::clone(&services)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let servers = async {
        let served = tokio::try_join!(
            async { public.await.context("public server") },
            async { debug.await.context("debug server") },
        );
        shutdown.cancel();
        services.close();
        served
    };

    // A failed background task cancels `shutdown`, which drains the servers.
    let (served, background) = tokio::join!(servers, background.supervise(shutdown.clone()));
    background.context("background tasks")?;
    served?;

    tracing::info!("stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn wait_for_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "installing SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "installing SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
    shutdown.cancel();
}
