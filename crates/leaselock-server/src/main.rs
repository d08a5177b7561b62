use std::sync::Arc;

use anyhow::anyhow;
use leaselock_server::{config::Configuration, logging, startup};
use tracing::info;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let configuration = Configuration::new()?;

    let _logging_guard = logging::init_logging(&configuration.logging_config())
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))?;

    let app_state = Arc::new(startup::build_state(&configuration).await?);

    let address = configuration.server_address();
    let port = configuration.server_port();
    let server = startup::http_server(app_state, address.clone(), port)?;
    info!("Leaselock server listening on {}:{}", address, port);

    tokio::spawn(startup::shutdown_on_ctrl_c(server.handle()));
    server.await?;

    info!("Leaselock server stopped");
    Ok(())
}
