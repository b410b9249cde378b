//! # Sigmaboard Binary
//!
//! The entry point that assembles the application based on compile-time features.

use std::sync::Arc;

use anyhow::Context;
use sb_api::{AppState, Notifier};
use sb_config::Settings;
use secrecy::ExposeSecret;
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[cfg(not(all(feature = "db-sqlite", feature = "storage-local", feature = "identity-simple")))]
compile_error!("sigmaboard needs the db-sqlite, storage-local and identity-simple features");

// Feature-gated imports: each port is filled by exactly one plugin
#[cfg(feature = "db-sqlite")]
use sb_db_sqlite::SqliteContentRepo;

#[cfg(feature = "storage-local")]
use sb_storage_local::LocalMediaStore;

#[cfg(feature = "identity-simple")]
use sb_identity_simple::SimpleIdentityProvider;

fn init_tracing(settings: &Settings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log.filter));
    let json = settings.log.json;
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Waits for Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("loading settings")?;
    init_tracing(&settings);

    if settings.uses_dev_secret() {
        tracing::warn!("using the built-in session secret; set SIGMABOARD__IDENTITY__SESSION_SECRET");
    }

    // 1. Database
    let repo = SqliteContentRepo::new(&settings.database.url, settings.database.max_connections)
        .await
        .context("opening database")?;
    tracing::info!(url = %settings.database.url, "database ready");

    // 2. Media storage
    let store = LocalMediaStore::new(settings.storage.upload_dir.clone(), "/uploads".into());
    store.init().await.context("creating upload directory")?;

    // 3. Identity
    let identity = SimpleIdentityProvider::new(
        settings.identity.session_secret.expose_secret(),
        settings.identity.alias_digits,
        settings.identity.max_alias_attempts,
    );

    // 4. Wrap in AppState (dynamic dispatch over the plugin ports)
    let state = AppState {
        repo: Arc::new(repo),
        store: Arc::new(store),
        identity: Arc::new(identity),
        notifier: Notifier::new(),
        upload_dir: settings.storage.upload_dir.clone(),
        max_upload_bytes: settings.storage.max_upload_bytes,
    };

    let addr = settings.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("sigmaboard listening on http://{addr}");

    axum::serve(listener, sb_api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server shutdown complete");
    Ok(())
}
