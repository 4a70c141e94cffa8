pub mod config;
pub mod engine;
pub mod error;
pub mod housekeeper;
pub mod rate_limit;
pub mod registry;
pub mod state;
pub mod store;
pub mod ws;

use axum::Router;

use config::ServerConfig;
use state::AppState;
use store::Store;

/// Build the router and application state from a config and an opened
/// store.
pub fn build_app(config: ServerConfig, store: Store) -> (Router<()>, AppState) {
    let state = AppState::new(config, store);
    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .with_state(state.clone());
    (app, state)
}
