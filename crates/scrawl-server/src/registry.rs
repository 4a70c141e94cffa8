//! In-memory map of live rooms. The registry lock guards only the map
//! shape; each room's contents are guarded by its own serialising task.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, mpsc, oneshot};

use scrawl_core::codes::{PlayerId, RoomId, SessionId, generate_room_code, new_room_id};
use scrawl_core::net::messages::CreateSettings;
use scrawl_core::player::Player;
use scrawl_core::room::{DRAW_TIME_RANGE, MAX_PLAYERS_RANGE, ROUNDS_RANGE, Room, RoomSettings};
use scrawl_core::time::epoch_secs;

use crate::engine::{
    GameTiming, JoinAccepted, JoinRequest, PlayerSender, RoomCommand, RunOutcome, spawn_engine,
};
use crate::error::CommandError;
use crate::store::Store;

/// Attempts at finding an unused room code before giving up.
const MAX_CODE_ATTEMPTS: usize = 100;

/// Pre-join hook. Ban policy lives outside the core; deployments plug
/// their storage in here.
pub trait JoinGate: Send + Sync {
    fn can_join(&self, room: &RoomSummary, identity: &JoinIdentity) -> bool;
}

/// What a gate gets to see about the target room.
#[derive(Debug, Clone)]
pub struct RoomSummary {
    pub room_id: RoomId,
    pub code: String,
}

/// What a gate gets to see about the joiner.
#[derive(Debug, Clone)]
pub struct JoinIdentity {
    pub name: String,
    pub user_id: Option<String>,
}

/// Default gate: everyone may join.
pub struct AllowAll;

impl JoinGate for AllowAll {
    fn can_join(&self, _room: &RoomSummary, _identity: &JoinIdentity) -> bool {
        true
    }
}

struct RoomHandle {
    code: String,
    cmd_tx: mpsc::Sender<RoomCommand>,
}

#[derive(Default)]
struct RegistryMaps {
    by_id: HashMap<RoomId, RoomHandle>,
    by_code: HashMap<String, RoomId>,
}

pub struct RoomRegistry {
    maps: RwLock<RegistryMaps>,
    store: Store,
    timing: GameTiming,
    gate: Box<dyn JoinGate>,
    /// Handle back to ourselves for the per-room retirement tasks.
    weak_self: Weak<RoomRegistry>,
}

impl RoomRegistry {
    pub fn new(store: Store, timing: GameTiming) -> Arc<Self> {
        Self::with_gate(store, timing, Box::new(AllowAll))
    }

    pub fn with_gate(store: Store, timing: GameTiming, gate: Box<dyn JoinGate>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            maps: RwLock::new(RegistryMaps::default()),
            store,
            timing,
            gate,
            weak_self: weak.clone(),
        })
    }

    pub async fn live_count(&self) -> usize {
        self.maps.read().await.by_id.len()
    }

    pub async fn contains_code(&self, code: &str) -> bool {
        self.maps.read().await.by_code.contains_key(code)
    }

    /// Create a room with the given host. The host's connection is
    /// attached before the room task processes anything else.
    pub async fn create_room(
        &self,
        host_name: String,
        avatar: Option<String>,
        user_id: Option<String>,
        settings: CreateSettings,
        session: SessionId,
        sender: PlayerSender,
    ) -> Result<(JoinAccepted, mpsc::Sender<RoomCommand>), CommandError> {
        let settings = build_settings(settings)?;
        let host = {
            let mut p = Player::new(scrawl_core::codes::new_player_id(), host_name, avatar);
            p.user_id = user_id;
            p
        };
        let host_id = host.id;

        let mut maps = self.maps.write().await;
        let code = allocate_code(&maps)?;
        let room_id = new_room_id();
        let room = Room::new(room_id, code.clone(), host, settings, epoch_secs());

        let cmd_tx = self.spawn_entry(&mut maps, room, Some((host_id, session, sender)));
        drop(maps);

        tracing::info!(room = %code, player_id = %host_id, "room created");
        Ok((
            JoinAccepted {
                room_id,
                room_code: code,
                player_id: host_id,
                messages: Vec::new(),
            },
            cmd_tx,
        ))
    }

    /// Join (or reconnect to) a room by code. Missing rooms are lazily
    /// rehydrated from the store before the join is rejected.
    pub async fn join_room(
        &self,
        code: &str,
        name: String,
        avatar: Option<String>,
        rejoin: Option<PlayerId>,
        user_id: Option<String>,
        session: SessionId,
        sender: PlayerSender,
    ) -> Result<(JoinAccepted, mpsc::Sender<RoomCommand>), CommandError> {
        let code = scrawl_core::codes::normalize_room_code(code);
        let Some((room_id, cmd_tx)) = self.lookup_or_rehydrate(&code).await else {
            return Err(CommandError::RoomNotFound);
        };

        let summary = RoomSummary {
            room_id,
            code: code.clone(),
        };
        let identity = JoinIdentity {
            name: name.clone(),
            user_id: user_id.clone(),
        };
        if !self.gate.can_join(&summary, &identity) {
            return Err(CommandError::NotAuthorised);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = RoomCommand::Join(JoinRequest {
            name,
            avatar,
            rejoin,
            user_id,
            session,
            sender,
            reply: reply_tx,
        });
        if cmd_tx.send(request).await.is_err() {
            return Err(CommandError::RoomNotFound);
        }
        match reply_rx.await {
            Ok(result) => result.map(|accepted| (accepted, cmd_tx)),
            Err(_) => Err(CommandError::RoomNotFound),
        }
    }

    async fn lookup_or_rehydrate(
        &self,
        code: &str,
    ) -> Option<(RoomId, mpsc::Sender<RoomCommand>)> {
        {
            let maps = self.maps.read().await;
            if let Some(&room_id) = maps.by_code.get(code)
                && let Some(handle) = maps.by_id.get(&room_id)
            {
                return Some((room_id, handle.cmd_tx.clone()));
            }
        }

        // Not live: try the store. Rooms come back in lobby with every
        // member disconnected; they get the empty-room grace to attract a
        // rejoin before eviction.
        let room = match self.store.load_room_by_code(code).await {
            Ok(Some(room)) => room,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(room = %code, error = %e, "rehydration load failed");
                return None;
            },
        };

        let mut maps = self.maps.write().await;
        // another task may have rehydrated while we read the store
        if let Some(&room_id) = maps.by_code.get(code)
            && let Some(handle) = maps.by_id.get(&room_id)
        {
            return Some((room_id, handle.cmd_tx.clone()));
        }
        let room_id = room.id;
        let cmd_tx = self.spawn_entry(&mut maps, room, None);
        tracing::info!(room = %code, "room rehydrated from store");
        Some((room_id, cmd_tx))
    }

    /// Rehydrate every persisted room within the retention window that is
    /// not live. Returns how many rooms were brought back.
    pub async fn rehydrate_recent(&self, retention_secs: u64) -> usize {
        let codes = match self.store.recent_room_codes(retention_secs).await {
            Ok(codes) => codes,
            Err(e) => {
                tracing::warn!(error = %e, "recent-room scan failed");
                return 0;
            },
        };
        let mut revived = 0;
        for code in codes {
            if self.contains_code(&code).await {
                continue;
            }
            if self.lookup_or_rehydrate(&code).await.is_some() {
                revived += 1;
            }
        }
        revived
    }

    /// Tear a room down explicitly.
    pub async fn destroy(&self, room_id: RoomId) {
        let maps = self.maps.read().await;
        if let Some(handle) = maps.by_id.get(&room_id) {
            let _ = handle.cmd_tx.try_send(RoomCommand::Destroy);
        }
    }

    /// Broadcast a shutdown notice to every room and stop their tasks.
    pub async fn shutdown_all(&self, message: &str) {
        let maps = self.maps.read().await;
        for handle in maps.by_id.values() {
            let _ = handle.cmd_tx.try_send(RoomCommand::Shutdown {
                message: message.to_string(),
            });
        }
    }

    fn spawn_entry(
        &self,
        maps: &mut RegistryMaps,
        room: Room,
        initial: Option<(PlayerId, SessionId, PlayerSender)>,
    ) -> mpsc::Sender<RoomCommand> {
        let room_id = room.id;
        let code = room.code.clone();
        let (cmd_tx, task) = spawn_engine(room, self.store.clone(), self.timing, initial);

        maps.by_code.insert(code.clone(), room_id);
        maps.by_id.insert(
            room_id,
            RoomHandle {
                code: code.clone(),
                cmd_tx: cmd_tx.clone(),
            },
        );

        let registry = self.weak_self.clone();
        tokio::spawn(async move {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(room = %code, error = %e, "room task aborted");
                    RunOutcome::Destroyed
                },
            };
            let Some(registry) = registry.upgrade() else {
                return;
            };
            registry.retire(room_id).await;
            match outcome {
                RunOutcome::Evicted | RunOutcome::Destroyed => {
                    if let Err(e) = registry.store.delete_room(room_id).await {
                        tracing::warn!(room = %code, error = %e, "room delete failed");
                    }
                    tracing::info!(room = %code, "room destroyed");
                },
                RunOutcome::ShutDown => {},
            }
        });

        cmd_tx
    }

    async fn retire(&self, room_id: RoomId) {
        let mut maps = self.maps.write().await;
        if let Some(handle) = maps.by_id.remove(&room_id) {
            maps.by_code.remove(&handle.code);
        }
    }
}

fn allocate_code(maps: &RegistryMaps) -> Result<String, CommandError> {
    for _ in 0..MAX_CODE_ATTEMPTS {
        let code = generate_room_code();
        if !maps.by_code.contains_key(&code) {
            return Ok(code);
        }
    }
    Err(CommandError::CodeExhaustion)
}

/// Turn client-supplied creation settings into validated room settings.
fn build_settings(create: CreateSettings) -> Result<RoomSettings, CommandError> {
    let mut settings = RoomSettings::default();
    if let Some(dt) = create.draw_time {
        if !DRAW_TIME_RANGE.contains(&dt) {
            return Err(CommandError::invalid("draw_time out of range"));
        }
        settings.draw_time = dt;
    }
    if let Some(rounds) = create.rounds {
        if !ROUNDS_RANGE.contains(&rounds) {
            return Err(CommandError::invalid("rounds out of range"));
        }
        settings.max_rounds = rounds;
    }
    if let Some(mp) = create.max_players {
        if !MAX_PLAYERS_RANGE.contains(&mp) {
            return Err(CommandError::invalid("max_players out of range"));
        }
        settings.max_players = mp;
    }
    if let Some(theme) = create.theme {
        settings.theme = theme;
    }
    if let Some(private) = create.is_private {
        settings.is_private = private;
    }
    Ok(settings)
}
