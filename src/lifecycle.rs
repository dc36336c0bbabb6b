use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio::{net::TcpListener, signal, sync::oneshot};
use tracing::{error, info, warn};

use crate::app::build_app;
use crate::cli::MigrateDirection;
use crate::config::AppConfig;
use crate::db::{ConnectivityProbe, DbPools, Role, MIGRATOR};
use crate::state::AppState;

/// Exit status used when a second termination request cuts the drain short.
const FORCED_EXIT_CODE: i32 = 130;

/// Probes both databases, serves until terminated, then closes the pools.
/// Returns an error, without binding, when either role is unreachable.
pub async fn run(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let addr = config.app.socket_addr()?;
    let grace = config.app.shutdown_grace;
    let pools = DbPools::connect_lazy(&config.database);

    let connectivity = pools.test_connectivity().await;
    if !connectivity.is_healthy() {
        error!(
            primary = connectivity.primary,
            replica = connectivity.replica,
            "database connectivity check failed; refusing to start"
        );
        close_pools(&pools, grace).await;
        anyhow::bail!("database connectivity check failed");
    }

    if let Err(e) = MIGRATOR.run(pools.handle(Role::Primary)).await {
        warn!(error = %e, "migration failed; continuing");
    }

    let app = build_app(AppState::new(config.clone(), pools.clone()));

    let served = async {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        info!(%addr, environment = %config.app.environment, "listening");
        serve_until(listener, app, grace, termination_requested()).await
    }
    .await;

    if let Err(e) = &served {
        error!(error = ?e, "server stopped with an error");
    }
    close_pools(&pools, grace).await;
    info!("shutdown complete");
    served
}

/// Runs `migrate up` or `migrate down` against the primary, then closes the pools.
pub async fn migrate(config: &AppConfig, direction: MigrateDirection) -> anyhow::Result<()> {
    let pools = DbPools::connect_lazy(&config.database);
    let primary = pools.handle(Role::Primary);

    let result = match direction {
        MigrateDirection::Up => {
            info!("applying pending migrations");
            MIGRATOR.run(primary).await
        }
        MigrateDirection::Down { target } => {
            warn!(target_version = target, "reverting migrations");
            MIGRATOR.undo(primary, target).await
        }
    };

    close_pools(&pools, config.app.shutdown_grace).await;
    result.context("migration failed")?;
    info!(?direction, "migration complete");
    Ok(())
}

async fn close_pools(pools: &DbPools, grace: Duration) {
    if tokio::time::timeout(grace, pools.shutdown()).await.is_err() {
        warn!(grace_secs = grace.as_secs(), "database pools did not close within grace period");
    }
}

/// Serves `app` until `shutdown` resolves, then drains in-flight requests for at
/// most `grace`. A second termination request while draining exits the process.
pub(crate) async fn serve_until<F>(
    listener: TcpListener,
    app: Router,
    grace: Duration,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (drain_tx, drain_rx) = oneshot::channel::<()>();
    let (expired_tx, expired_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        shutdown.await;
        info!(grace_secs = grace.as_secs(), "draining in-flight requests");
        let _ = drain_tx.send(());

        tokio::select! {
            _ = termination_requested() => {
                warn!("second termination request; forcing exit");
                std::process::exit(FORCED_EXIT_CODE);
            }
            _ = tokio::time::sleep(grace) => {
                let _ = expired_tx.send(());
            }
        }
    });

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = drain_rx.await;
        })
        .into_future();

    tokio::select! {
        res = server => res.context("http server"),
        _ = expired_rx => {
            warn!("grace period elapsed; abandoning in-flight requests");
            Ok(())
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
pub(crate) async fn termination_requested() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
