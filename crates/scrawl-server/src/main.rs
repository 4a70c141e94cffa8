use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use scrawl_server::config::ServerConfig;
use scrawl_server::housekeeper::spawn_housekeeper;
use scrawl_server::store::Store;
use scrawl_server::build_app;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let store = match Store::connect(&config.database.url).await {
        Ok(store) => store,
        Err(e) => {
            tracing::error!("Failed to open database {}: {e}", config.database.url);
            std::process::exit(1);
        },
    };

    let (app, state) = build_app(config, store);

    // Periodic sweep; its first run rehydrates persisted rooms on boot.
    spawn_housekeeper(state.clone());

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {listen_addr}: {e}");
            std::process::exit(1);
        },
    };

    tracing::info!("Scrawl server listening on {listen_addr}");

    let shutdown_state = state.clone();
    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::info!("shutdown requested, notifying rooms");
        shutdown_state.shutdown.cancel();
        shutdown_state
            .registry
            .shutdown_all("server is restarting, please rejoin shortly")
            .await;
        // give room tasks a moment to flush their final state
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    });

    if let Err(e) = serve.await {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}
