//! Backend selection, HTTP server setup and shutdown.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, dev::Server, dev::ServerHandle, middleware::Logger, web};
use anyhow::Context;
use leaselock_core::{LeaseLockManager, LeaseStore, MemoryLeaseStore};
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::config::{Configuration, StoreKind};
use crate::stock::{MemoryStockLedger, StockLedger};

const MEMORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

type Backends = (Arc<dyn LeaseStore>, Arc<dyn StockLedger>);

/// Connect the configured backend, seed the stock and build the shared state.
pub async fn build_state(configuration: &Configuration) -> anyhow::Result<AppState> {
    let store_kind = configuration.store_kind().map_err(anyhow::Error::msg)?;
    let lease_options = configuration
        .lease_options()
        .context("invalid lock configuration")?;

    let (lease_store, ledger) = match store_kind {
        StoreKind::Memory => memory_backends(),
        StoreKind::Redis => redis_backends(&configuration.redis_url()).await?,
    };

    let stock_key = configuration.stock_key();
    let stock = ledger
        .init_if_absent(&stock_key, configuration.initial_stock())
        .await
        .context("failed to seed stock")?;

    let mut manager = LeaseLockManager::with_options(lease_store, lease_options.clone())
        .context("invalid lock configuration")?;
    if let Some(client_id) = configuration.client_id() {
        manager = manager.with_client_id(client_id);
    }

    info!(
        store = %store_kind,
        client_id = %manager.client_id(),
        stock_key = %stock_key,
        stock,
        lease_ms = lease_options.lease_duration.as_millis() as u64,
        wait_ms = lease_options.wait_timeout.as_millis() as u64,
        "Application state ready"
    );

    Ok(AppState {
        manager,
        ledger,
        store_kind,
        lock_key: configuration.lock_key(),
        stock_key,
        lease_options,
        work: configuration.work_duration(),
    })
}

fn memory_backends() -> Backends {
    (
        Arc::new(MemoryLeaseStore::new().with_cleanup(MEMORY_CLEANUP_INTERVAL)),
        Arc::new(MemoryStockLedger::new()),
    )
}

#[cfg(feature = "redis-backend")]
async fn redis_backends(url: &str) -> anyhow::Result<Backends> {
    use leaselock_core::RedisLeaseStore;

    use crate::stock::RedisStockLedger;

    let store = RedisLeaseStore::new(url)
        .await
        .with_context(|| format!("failed to connect to redis at {}", url))?;
    let ledger = RedisStockLedger::new(store.connection());
    Ok((Arc::new(store), Arc::new(ledger)))
}

#[cfg(not(feature = "redis-backend"))]
async fn redis_backends(_url: &str) -> anyhow::Result<Backends> {
    anyhow::bail!("store kind 'redis' requires the redis-backend feature")
}

/// Creates and binds the HTTP server.
///
/// Signal handling is left to [`shutdown_on_ctrl_c`].
pub fn http_server(
    app_state: Arc<AppState>,
    address: String,
    port: u16,
) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(web::Data::from(app_state.clone()))
            .service(api::routes())
    })
    .disable_signals()
    .bind((address, port))?
    .run())
}

/// Stop the server gracefully on Ctrl-C, letting in-flight deductions
/// finish and release their leases.
pub async fn shutdown_on_ctrl_c(handle: ServerHandle) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, shutting down");
            handle.stop(true).await;
        }
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}
