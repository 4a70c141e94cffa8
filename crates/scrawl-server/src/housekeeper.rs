//! Periodic sweep: bring recently-persisted rooms back into memory, purge
//! long-abandoned store rows, and evict stale rate-limit buckets. The
//! first sweep runs immediately, which doubles as boot-time rehydration.

use std::time::Duration;

use crate::state::AppState;

/// Persisted rooms with no members older than this are deleted.
const STALE_ROOM_AGE: Duration = Duration::from_secs(30 * 60);

/// Rate-limit buckets idle longer than this are evicted.
const STALE_BUCKET_AGE: Duration = Duration::from_secs(300);

pub fn spawn_housekeeper(state: AppState) {
    let shutdown = state.shutdown.clone();
    let sweep_interval = Duration::from_secs(state.config.rooms.sweep_interval_secs);
    let retention_secs = state.config.rooms.retention_mins * 60;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("housekeeper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    sweep(&state, retention_secs).await;
                }
            }
        }
    });
}

async fn sweep(state: &AppState, retention_secs: u64) {
    let revived = state.registry.rehydrate_recent(retention_secs).await;
    if revived > 0 {
        tracing::info!(revived, "rehydrated persisted rooms");
    }

    match state.store.purge_stale_rooms(STALE_ROOM_AGE.as_secs()).await {
        Ok(0) => {},
        Ok(purged) => tracing::info!(purged, "purged stale persisted rooms"),
        Err(e) => tracing::warn!(error = %e, "stale room purge failed"),
    }

    state.connect_limiter.cleanup(STALE_BUCKET_AGE).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use scrawl_core::codes::{new_player_id, new_room_id};
    use scrawl_core::player::Player;
    use scrawl_core::room::{Room, RoomSettings};
    use scrawl_core::time::epoch_secs;

    use crate::config::ServerConfig;
    use crate::store::Store;

    #[tokio::test]
    async fn sweep_revives_recent_and_purges_old() {
        let store = Store::memory().await.unwrap();

        let recent = Room::new(
            new_room_id(),
            "RECENT".into(),
            Player::new(new_player_id(), "Alice".into(), None),
            RoomSettings::default(),
            epoch_secs(),
        );
        store.save_room(&recent).await.unwrap();

        let mut ancient = Room::new(
            new_room_id(),
            "OLDEST".into(),
            Player::new(new_player_id(), "Bob".into(), None),
            RoomSettings::default(),
            epoch_secs(),
        );
        ancient.players.clear();
        ancient.drawer_order.clear();
        ancient.last_activity = epoch_secs() - 7200;
        store.save_room(&ancient).await.unwrap();

        let state = AppState::new(ServerConfig::default(), store.clone());
        sweep(&state, state.config.rooms.retention_mins * 60).await;

        assert!(state.registry.contains_code("RECENT").await);
        assert!(!state.registry.contains_code("OLDEST").await);
        assert!(store.load_room_by_code("OLDEST").await.unwrap().is_none());
    }
}
