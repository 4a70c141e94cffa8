use std::time::Duration;

use serde::Deserialize;

use crate::engine::GameTiming;
use scrawl_core::room;

/// Top-level server configuration, loaded from `scrawl.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub database: DatabaseConfig,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
    pub game: GameConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            database: DatabaseConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
            game: GameConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://scrawl.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    pub max_ws_per_ip: usize,
    /// Messages per second allowed on one connection (token bucket).
    pub ws_rate_limit_per_sec: f64,
    /// Connection attempts per second allowed per IP.
    pub connect_rate_limit_per_sec: f64,
    /// Outbound queue depth per player before slow clients drop messages.
    pub player_message_buffer: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 2048,
            max_ws_per_ip: 8,
            ws_rate_limit_per_sec: 20.0,
            connect_rate_limit_per_sec: 5.0,
            player_message_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// How long an empty room survives before eviction.
    pub empty_grace_ms: u64,
    /// Housekeeper sweep interval.
    pub sweep_interval_secs: u64,
    /// Persisted rooms older than this are not rehydrated.
    pub retention_mins: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            empty_grace_ms: room::EMPTY_ROOM_GRACE.as_millis() as u64,
            sweep_interval_secs: 60,
            retention_mins: 30,
        }
    }
}

/// Gameplay timer durations. Tunable mainly so tests can run the whole
/// state machine in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub start_countdown_ms: u64,
    pub auto_pick_ms: u64,
    pub turn_end_delay_ms: u64,
    pub guess_settle_ms: u64,
    pub tick_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            start_countdown_ms: room::START_COUNTDOWN.as_millis() as u64,
            auto_pick_ms: room::AUTO_PICK_TIMEOUT.as_millis() as u64,
            turn_end_delay_ms: room::TURN_END_DELAY.as_millis() as u64,
            guess_settle_ms: room::GUESS_SETTLE_DELAY.as_millis() as u64,
            tick_ms: 1000,
        }
    }
}

impl ServerConfig {
    /// Load config from `scrawl.toml` if present, then apply env overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("scrawl.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("Loaded configuration from scrawl.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("Failed to parse scrawl.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("No scrawl.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("SCRAWL_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(url) = std::env::var("SCRAWL_DATABASE_URL")
            && !url.is_empty()
        {
            config.database.url = url;
        }

        config
    }

    /// Validate configuration, exiting on fatal misconfiguration.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }
        if self.rooms.sweep_interval_secs == 0 {
            tracing::error!("rooms.sweep_interval_secs must be > 0");
            std::process::exit(1);
        }
        if self.game.tick_ms == 0 {
            tracing::error!("game.tick_ms must be > 0");
            std::process::exit(1);
        }
    }

    pub fn game_timing(&self) -> GameTiming {
        GameTiming {
            start_countdown: Duration::from_millis(self.game.start_countdown_ms),
            auto_pick: Duration::from_millis(self.game.auto_pick_ms),
            turn_end_delay: Duration::from_millis(self.game.turn_end_delay_ms),
            guess_settle: Duration::from_millis(self.game.guess_settle_ms),
            tick: Duration::from_millis(self.game.tick_ms),
            empty_room_grace: Duration::from_millis(self.rooms.empty_grace_ms),
        }
    }
}
