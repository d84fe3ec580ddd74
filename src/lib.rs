pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tokio::sync::watch;

use crate::core::{config::Settings, state::AppState, telemetry};
use crate::services::marks_store::PgMarksStore;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = PgMarksStore::new(db_pool.clone());
    let listener_task = store.spawn_listener(shutdown_rx);

    let state = AppState::new(settings, Arc::new(store));
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        optimistic_locking = state.settings().marks().optimistic_locking,
        "Marks engine listening"
    );

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            core::shutdown::shutdown_signal().await;
        })
        .await;

    let _ = shutdown_tx.send(true);
    if let Err(err) = listener_task.await {
        tracing::warn!(error = %err, "Marks change listener did not stop cleanly");
    }
    state.sessions().close_all().await;
    db_pool.close().await;
    tracing::info!("Database pool closed");

    result?;

    Ok(())
}
