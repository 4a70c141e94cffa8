//! Durable tables for rooms, players, and end-of-game stat updates.
//!
//! Every operation is short and idempotent. The room engine never blocks
//! game progress on the store: failures are logged and in-memory state
//! stays authoritative, rewritten on the next state change.

use std::str::FromStr;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use uuid::Uuid;

use scrawl_core::codes::{PlayerId, RoomId, SessionId};
use scrawl_core::player::Player;
use scrawl_core::room::{Phase, Room, RoomSettings};
use scrawl_core::time::epoch_secs;

use crate::error::StoreError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    id            TEXT PRIMARY KEY,
    code          TEXT NOT NULL,
    host_id       TEXT NOT NULL,
    is_private    INTEGER NOT NULL DEFAULT 0,
    max_players   INTEGER NOT NULL,
    draw_time     INTEGER NOT NULL,
    max_rounds    INTEGER NOT NULL,
    theme         TEXT NOT NULL,
    phase         TEXT NOT NULL,
    player_count  INTEGER NOT NULL DEFAULT 0,
    last_activity INTEGER NOT NULL,
    created_at    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rooms_code ON rooms (code);

CREATE TABLE IF NOT EXISTS players (
    id         TEXT PRIMARY KEY,
    room_id    TEXT NOT NULL,
    user_id    TEXT,
    name       TEXT NOT NULL,
    avatar     TEXT NOT NULL DEFAULT '',
    score      INTEGER NOT NULL DEFAULT 0,
    is_host    INTEGER NOT NULL DEFAULT 0,
    session_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_players_room ON players (room_id);

CREATE TABLE IF NOT EXISTS profiles (
    user_id      TEXT PRIMARY KEY,
    games_played INTEGER NOT NULL DEFAULT 0,
    games_won    INTEGER NOT NULL DEFAULT 0,
    total_score  INTEGER NOT NULL DEFAULT 0
);
"#;

/// A public lobby room, as listed for the room browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicRoom {
    pub code: String,
    pub theme: String,
    pub player_count: u32,
    pub max_players: u8,
}

/// One player's end-of-game stat delta.
#[derive(Debug, Clone)]
pub struct StatUpdate {
    pub user_id: String,
    pub score: u32,
    pub won: bool,
}

/// Aggregate profile row, read back for stat attribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: String,
    pub games_played: u32,
    pub games_won: u32,
    pub total_score: u32,
}

#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at `url` and apply the
    /// schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// An in-memory store for tests. Pinned to one connection so the
    /// database outlives individual checkouts.
    pub async fn memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Write or refresh the room row.
    pub async fn save_room(&self, room: &Room) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO rooms
             (id, code, host_id, is_private, max_players, draw_time, max_rounds,
              theme, phase, player_count, last_activity, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(room.id.to_string())
        .bind(&room.code)
        .bind(room.host_id.to_string())
        .bind(room.settings.is_private as i64)
        .bind(room.settings.max_players as i64)
        .bind(room.settings.draw_time as i64)
        .bind(room.settings.max_rounds as i64)
        .bind(&room.settings.theme)
        .bind(room.phase.as_str())
        .bind(room.players.len() as i64)
        .bind(room.last_activity as i64)
        .bind(room.created_at as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a room and its player rows.
    pub async fn delete_room(&self, room_id: RoomId) -> Result<(), StoreError> {
        let id = room_id.to_string();
        sqlx::query("DELETE FROM players WHERE room_id = ?")
            .bind(&id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM rooms WHERE id = ?")
            .bind(&id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_player(
        &self,
        room_id: RoomId,
        player: &Player,
        session: Option<SessionId>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT OR REPLACE INTO players
             (id, room_id, user_id, name, avatar, score, is_host, session_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(player.id.to_string())
        .bind(room_id.to_string())
        .bind(player.user_id.as_deref())
        .bind(&player.name)
        .bind(&player.avatar)
        .bind(player.score as i64)
        .bind(player.is_host as i64)
        .bind(session.map(|s| s.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_player(&self, player_id: PlayerId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM players WHERE id = ?")
            .bind(player_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load a persisted room by code for rehydration. The room comes back
    /// in lobby with every player disconnected; active game state is never
    /// reconstructed across restarts.
    pub async fn load_room_by_code(&self, code: &str) -> Result<Option<Room>, StoreError> {
        let Some(row) = sqlx::query(
            "SELECT id, code, host_id, is_private, max_players, draw_time, max_rounds,
                    theme, last_activity, created_at
             FROM rooms WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let room_id = parse_uuid(row.get::<String, _>("id"))?;
        let host_id = parse_uuid(row.get::<String, _>("host_id"))?;
        let settings = RoomSettings {
            max_players: row.get::<i64, _>("max_players") as u8,
            draw_time: row.get::<i64, _>("draw_time") as u32,
            max_rounds: row.get::<i64, _>("max_rounds") as u32,
            theme: row.get("theme"),
            is_private: row.get::<i64, _>("is_private") != 0,
        };

        let players = self.load_players(room_id).await?;

        let mut room = Room {
            id: room_id,
            code: row.get("code"),
            host_id,
            settings,
            phase: Phase::Lobby,
            round: 1,
            turn: 0,
            drawer_order: players.iter().map(|p| p.id).collect(),
            players,
            current_drawer: None,
            current_word: None,
            masked_word: String::new(),
            word_choices: Vec::new(),
            time_left: 0,
            guessed: Default::default(),
            chat: Default::default(),
            created_at: row.get::<i64, _>("created_at") as u64,
            last_activity: row.get::<i64, _>("last_activity") as u64,
        };

        // Host row may be stale (e.g. host left just before the crash);
        // make sure exactly one member holds the flag.
        if !room.players.is_empty() && !room.players.iter().any(|p| p.is_host) {
            room.promote_next_host();
        }
        if let Some(host) = room.players.iter().find(|p| p.is_host) {
            room.host_id = host.id;
        }

        Ok(Some(room))
    }

    async fn load_players(&self, room_id: RoomId) -> Result<Vec<Player>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, user_id, name, avatar, score, is_host
             FROM players WHERE room_id = ? ORDER BY rowid",
        )
        .bind(room_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut players = Vec::with_capacity(rows.len());
        for row in rows {
            players.push(Player {
                id: parse_uuid(row.get::<String, _>("id"))?,
                name: row.get("name"),
                avatar: row.get("avatar"),
                score: row.get::<i64, _>("score") as u32,
                is_host: row.get::<i64, _>("is_host") != 0,
                is_drawing: false,
                has_guessed: false,
                is_connected: false,
                user_id: row.get("user_id"),
            });
        }
        Ok(players)
    }

    /// Apply end-of-game stat increments for attributed players.
    pub async fn record_results(&self, updates: &[StatUpdate]) -> Result<(), StoreError> {
        for u in updates {
            sqlx::query(
                "INSERT INTO profiles (user_id, games_played, games_won, total_score)
                 VALUES (?, 1, ?, ?)
                 ON CONFLICT(user_id) DO UPDATE SET
                   games_played = games_played + 1,
                   games_won = games_won + excluded.games_won,
                   total_score = total_score + excluded.total_score",
            )
            .bind(&u.user_id)
            .bind(u.won as i64)
            .bind(u.score as i64)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn load_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query(
            "SELECT user_id, games_played, games_won, total_score
             FROM profiles WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Profile {
            user_id: r.get("user_id"),
            games_played: r.get::<i64, _>("games_played") as u32,
            games_won: r.get::<i64, _>("games_won") as u32,
            total_score: r.get::<i64, _>("total_score") as u32,
        }))
    }

    /// Public lobby rooms, newest activity first.
    pub async fn list_public_rooms(&self) -> Result<Vec<PublicRoom>, StoreError> {
        let rows = sqlx::query(
            "SELECT code, theme, player_count, max_players
             FROM rooms
             WHERE is_private = 0 AND phase = 'lobby'
             ORDER BY last_activity DESC
             LIMIT 50",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| PublicRoom {
                code: r.get("code"),
                theme: r.get("theme"),
                player_count: r.get::<i64, _>("player_count") as u32,
                max_players: r.get::<i64, _>("max_players") as u8,
            })
            .collect())
    }

    /// Codes of persisted rooms active within the retention window, for
    /// rehydration after a restart.
    pub async fn recent_room_codes(&self, retention_secs: u64) -> Result<Vec<String>, StoreError> {
        let cutoff = epoch_secs().saturating_sub(retention_secs) as i64;
        let rows = sqlx::query("SELECT code FROM rooms WHERE last_activity >= ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("code")).collect())
    }

    /// Delete persisted rooms with no members that have been inactive for
    /// longer than `older_than_secs`. Returns the number removed.
    pub async fn purge_stale_rooms(&self, older_than_secs: u64) -> Result<u64, StoreError> {
        let cutoff = epoch_secs().saturating_sub(older_than_secs) as i64;
        sqlx::query(
            "DELETE FROM players WHERE room_id IN
             (SELECT id FROM rooms WHERE player_count = 0 AND last_activity < ?)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        let result =
            sqlx::query("DELETE FROM rooms WHERE player_count = 0 AND last_activity < ?")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

fn parse_uuid(s: String) -> Result<Uuid, StoreError> {
    Uuid::from_str(&s).map_err(|e| {
        StoreError::Database(sqlx::Error::Decode(
            format!("invalid uuid {s:?}: {e}").into(),
        ))
    })
}
