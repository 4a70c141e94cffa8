//! The per-room engine: one task per room owns the room state, consumes
//! commands and timer fires from a single inbox, and fans broadcasts out to
//! member connections. Everything that mutates a room goes through here, so
//! commands and timers are totally ordered per room.

pub mod timers;

use std::collections::HashMap;

use bytes::Bytes;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use scrawl_core::codes::{PlayerId, SessionId, new_player_id};
use scrawl_core::guess::{self, GuessOutcome};
use scrawl_core::net::messages::{
    ChatBroadcastMsg, ChooseWordMsg, CloseGuessMsg, CommandReplyMsg, CorrectGuessMsg, GameEndedMsg,
    GameStartingMsg, HintMsg, HostChangedMsg, MessageType, PlayerDisconnectedMsg, PlayerJoinedMsg,
    PlayerKickedMsg, PlayerSnapshot, RankingEntry, RoomSyncMsg, RoundEndMsg, ServerEvent,
    ServerShutdownMsg, TimeUpdateMsg, TurnEndMsg, TurnStartMsg, WordAssignMsg,
};
use scrawl_core::net::protocol::encode_server_event;
use scrawl_core::player::Player;
use scrawl_core::room::{
    ChatMessage, MAX_CHAT_LENGTH, MIN_PLAYERS, Phase, Room, TurnEndReason, WORD_CHOICES,
};
use scrawl_core::time::epoch_secs;
use scrawl_core::words;

use crate::error::CommandError;
use crate::store::{StatUpdate, Store};

pub use timers::{GameTiming, TimerKind, TimerSet};

/// Per-player sender for outbound binary frames. Bounded so slow clients
/// drop messages instead of exhausting memory.
pub type PlayerSender = mpsc::Sender<Bytes>;

/// Command inbox depth per room.
const COMMAND_BUFFER: usize = 256;

/// A live transport attachment for one player.
struct Connection {
    session: SessionId,
    sender: PlayerSender,
}

/// Who receives an outbound event. The recipient-specific payloads are the
/// drawer's word events, the sender's close-guess notice, and the guessed
/// players' side chat during a turn.
#[derive(Debug, Clone)]
pub enum Audience {
    Everyone,
    Only(PlayerId),
    Except(PlayerId),
    Members(Vec<PlayerId>),
}

impl Audience {
    fn includes(&self, id: PlayerId) -> bool {
        match self {
            Self::Everyone => true,
            Self::Only(only) => *only == id,
            Self::Except(except) => *except != id,
            Self::Members(members) => members.contains(&id),
        }
    }
}

/// A join or reconnect request from the transport adapter.
pub struct JoinRequest {
    pub name: String,
    pub avatar: Option<String>,
    /// A preserved player id makes this a reconnect.
    pub rejoin: Option<PlayerId>,
    /// Account id for stat attribution, supplied by the external auth
    /// collaborator when present.
    pub user_id: Option<String>,
    pub session: SessionId,
    pub sender: PlayerSender,
    pub reply: oneshot::Sender<Result<JoinAccepted, CommandError>>,
}

/// Successful join outcome, echoed in the join reply envelope.
#[derive(Debug, Clone)]
pub struct JoinAccepted {
    pub room_id: scrawl_core::codes::RoomId,
    pub room_code: String,
    pub player_id: PlayerId,
    pub messages: Vec<ChatMessage>,
}

/// Commands consumed by the room task. Timer fires enter the same loop, so
/// a command and a timer can never interleave within one room.
pub enum RoomCommand {
    Join(JoinRequest),
    Leave {
        player_id: PlayerId,
    },
    Disconnect {
        player_id: PlayerId,
        session: SessionId,
    },
    Settings {
        player_id: PlayerId,
        draw_time: Option<u32>,
        max_rounds: Option<u32>,
    },
    Start {
        player_id: PlayerId,
    },
    SelectWord {
        player_id: PlayerId,
        word: String,
    },
    PlayAgain {
        player_id: PlayerId,
    },
    Chat {
        player_id: PlayerId,
        text: String,
    },
    Draw {
        player_id: PlayerId,
        frame: Bytes,
    },
    Kick {
        player_id: PlayerId,
        target: PlayerId,
    },
    Shutdown {
        message: String,
    },
    Destroy,
}

/// Why the room task exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Empty-room grace elapsed; the room should be deleted everywhere.
    Evicted,
    /// Explicit destroy; delete everywhere.
    Destroyed,
    /// Server shutdown; persisted rows are kept for rehydration.
    ShutDown,
}

/// Spawn the serialising task for a room. `initial` attaches the creating
/// host's connection before the first command is processed.
pub fn spawn_engine(
    room: Room,
    store: Store,
    timing: GameTiming,
    initial: Option<(PlayerId, SessionId, PlayerSender)>,
) -> (mpsc::Sender<RoomCommand>, JoinHandle<RunOutcome>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let mut engine = RoomEngine {
        room,
        connections: HashMap::new(),
        timers: TimerSet::new(),
        timing,
        store,
        cmd_rx,
        rng: StdRng::from_os_rng(),
    };
    if let Some((player_id, session, sender)) = initial {
        engine.connections.insert(player_id, Connection { session, sender });
    }
    let task = tokio::spawn(engine.run());
    (cmd_tx, task)
}

enum Step {
    Command(Option<RoomCommand>),
    Timer(TimerKind),
}

struct RoomEngine {
    room: Room,
    connections: HashMap<PlayerId, Connection>,
    timers: TimerSet,
    timing: GameTiming,
    store: Store,
    cmd_rx: mpsc::Receiver<RoomCommand>,
    rng: StdRng,
}

impl RoomEngine {
    async fn run(mut self) -> RunOutcome {
        // Rehydrated rooms start with nobody attached; give them the same
        // grace an abandoned room gets.
        if self.connections.is_empty() {
            self.timers
                .set(TimerKind::Cleanup, self.timing.empty_room_grace);
        } else {
            for p in &mut self.room.players {
                p.is_connected = self.connections.contains_key(&p.id);
            }
            self.broadcast_sync();
        }
        self.persist_room().await;
        for (player, session) in self
            .room
            .players
            .iter()
            .map(|p| (p.clone(), self.connections.get(&p.id).map(|c| c.session)))
            .collect::<Vec<_>>()
        {
            self.persist_player_row(&player, session).await;
        }

        loop {
            let step = match self.timers.next_due() {
                Some((kind, at)) => tokio::select! {
                    cmd = self.cmd_rx.recv() => Step::Command(cmd),
                    _ = tokio::time::sleep_until(at) => Step::Timer(kind),
                },
                None => Step::Command(self.cmd_rx.recv().await),
            };

            let outcome = match step {
                Step::Command(Some(cmd)) => self.handle_command(cmd).await,
                Step::Command(None) => Some(RunOutcome::Destroyed),
                Step::Timer(kind) => {
                    self.timers.cancel(kind);
                    self.handle_timer(kind).await
                },
            };

            if let Some(outcome) = outcome {
                return outcome;
            }

            if let Err(violation) = self.room.validate() {
                tracing::error!(
                    room = %self.room.code,
                    violation = %violation,
                    "room invariant violated; ending game"
                );
                if self.room.phase != Phase::GameEnd {
                    self.enter_game_end(Some("internal error".to_string())).await;
                }
            }
        }
    }

    // -- dispatch ----------------------------------------------------------

    async fn handle_command(&mut self, cmd: RoomCommand) -> Option<RunOutcome> {
        match cmd {
            RoomCommand::Join(req) => self.handle_join(req).await,
            RoomCommand::Leave { player_id } => self.handle_leave(player_id, None).await,
            RoomCommand::Disconnect { player_id, session } => {
                self.handle_disconnect(player_id, session).await
            },
            RoomCommand::Settings {
                player_id,
                draw_time,
                max_rounds,
            } => self.handle_settings(player_id, draw_time, max_rounds).await,
            RoomCommand::Start { player_id } => self.handle_start(player_id),
            RoomCommand::SelectWord { player_id, word } => {
                self.handle_select_word(player_id, word).await
            },
            RoomCommand::PlayAgain { player_id } => self.handle_play_again(player_id).await,
            RoomCommand::Chat { player_id, text } => self.handle_chat(player_id, text).await,
            RoomCommand::Draw { player_id, frame } => self.handle_draw(player_id, frame),
            RoomCommand::Kick { player_id, target } => self.handle_kick(player_id, target).await,
            RoomCommand::Shutdown { message } => {
                self.send(Audience::Everyone, &ServerEvent::ServerShutdown(
                    ServerShutdownMsg { message },
                ));
                self.persist_room().await;
                return Some(RunOutcome::ShutDown);
            },
            RoomCommand::Destroy => return Some(RunOutcome::Destroyed),
        }
        None
    }

    async fn handle_timer(&mut self, kind: TimerKind) -> Option<RunOutcome> {
        match kind {
            TimerKind::StartCountdown => self.begin_game().await,
            TimerKind::AutoPick => {
                if self.room.phase == Phase::Choosing
                    && let Some(word) = self.room.word_choices.first().cloned()
                {
                    self.enter_drawing(word).await;
                }
            },
            TimerKind::Tick => self.handle_tick().await,
            TimerKind::GuessSettle => {
                if self.room.phase == Phase::Drawing {
                    self.enter_round_end(TurnEndReason::AllGuessed).await;
                }
            },
            TimerKind::TurnAdvance => self.advance_turn().await,
            TimerKind::Cleanup => {
                if self.connections.is_empty() {
                    tracing::info!(room = %self.room.code, "empty room grace elapsed, evicting");
                    return Some(RunOutcome::Evicted);
                }
            },
        }
        None
    }

    // -- membership --------------------------------------------------------

    async fn handle_join(&mut self, req: JoinRequest) {
        let JoinRequest {
            name,
            avatar,
            rejoin,
            user_id,
            session,
            sender,
            reply,
        } = req;

        // Reconnect: a preserved member id re-associates the session and
        // restores score and host status untouched.
        if let Some(pid) = rejoin
            && self.room.is_member(pid)
        {
            self.connections.insert(pid, Connection { session, sender });
            if let Some(p) = self.room.player_mut(pid) {
                p.is_connected = true;
            }
            self.timers.cancel(TimerKind::Cleanup);
            let _ = reply.send(Ok(self.join_accepted(pid)));
            tracing::info!(room = %self.room.code, player_id = %pid, "player reconnected");
            self.broadcast_sync();
            self.persist_player(pid).await;
            self.persist_room().await;
            return;
        }

        if self.room.phase != Phase::Lobby || self.timers.is_set(TimerKind::StartCountdown) {
            let _ = reply.send(Err(CommandError::WrongPhase));
            return;
        }
        if self.room.players.len() >= self.room.settings.max_players as usize {
            let _ = reply.send(Err(CommandError::RoomFull));
            return;
        }

        let pid = new_player_id();
        let mut player = Player::new(pid, name, avatar);
        player.user_id = user_id;
        // joining a room inside its empty-room grace takes the host seat
        if self.room.players.is_empty() {
            player.is_host = true;
            self.room.host_id = pid;
        }
        self.room.players.push(player);
        self.room.drawer_order.push(pid);
        self.connections.insert(pid, Connection { session, sender });
        self.timers.cancel(TimerKind::Cleanup);

        let _ = reply.send(Ok(self.join_accepted(pid)));

        if let Some(p) = self.room.player(pid) {
            self.send(
                Audience::Except(pid),
                &ServerEvent::PlayerJoined(PlayerJoinedMsg {
                    player: PlayerSnapshot::from(p),
                }),
            );
        }
        self.broadcast_sync();
        self.persist_player(pid).await;
        self.persist_room().await;
    }

    fn join_accepted(&self, pid: PlayerId) -> JoinAccepted {
        JoinAccepted {
            room_id: self.room.id,
            room_code: self.room.code.clone(),
            player_id: pid,
            messages: self.room.chat.iter().cloned().collect(),
        }
    }

    async fn handle_leave(&mut self, pid: PlayerId, kicked: Option<String>) {
        if !self.room.is_member(pid) {
            return;
        }
        if let Some(reason) = kicked {
            self.send(
                Audience::Only(pid),
                &ServerEvent::PlayerKicked(PlayerKickedMsg { reason }),
            );
        }

        self.connections.remove(&pid);
        let was_host = self.room.host_id == pid;
        let was_drawer = self.room.current_drawer == Some(pid);
        let Some(player) = self.room.remove_player(pid) else {
            return;
        };

        self.send(
            Audience::Everyone,
            &ServerEvent::PlayerDisconnected(PlayerDisconnectedMsg {
                player_id: pid,
                player_name: player.name.clone(),
            }),
        );

        if was_host && let Some(new_host) = self.room.promote_next_host() {
            let name = self
                .room
                .player(new_host)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            self.send(
                Audience::Everyone,
                &ServerEvent::HostChanged(HostChangedMsg {
                    new_host_id: new_host,
                    new_host_name: name,
                }),
            );
        }

        self.react_to_departure(was_drawer).await;

        self.broadcast_sync();
        if let Err(e) = self.store.delete_player(pid).await {
            tracing::warn!(room = %self.room.code, error = %e, "player delete failed");
        }
        self.persist_room().await;

        if self.connections.is_empty() {
            self.timers
                .set(TimerKind::Cleanup, self.timing.empty_room_grace);
        }
    }

    async fn handle_disconnect(&mut self, pid: PlayerId, session: SessionId) {
        // A stale close racing a reconnect must not detach the new session.
        match self.connections.get(&pid) {
            Some(conn) if conn.session == session => {},
            _ => return,
        }
        self.connections.remove(&pid);
        let Some(player) = self.room.player_mut(pid) else {
            return;
        };
        player.is_connected = false;
        let name = player.name.clone();
        let was_drawer = self.room.current_drawer == Some(pid);

        self.send(
            Audience::Everyone,
            &ServerEvent::PlayerDisconnected(PlayerDisconnectedMsg {
                player_id: pid,
                player_name: name,
            }),
        );

        self.react_to_departure(was_drawer).await;

        self.broadcast_sync();
        self.persist_player(pid).await;
        self.persist_room().await;

        if self.connections.is_empty() {
            self.timers
                .set(TimerKind::Cleanup, self.timing.empty_room_grace);
        }
    }

    /// Shared phase reaction after a member leaves or disconnects.
    async fn react_to_departure(&mut self, was_drawer: bool) {
        match self.room.phase {
            Phase::Drawing if was_drawer => {
                self.enter_round_end(TurnEndReason::DrawerLeft).await;
            },
            Phase::Drawing => {
                if self.room.guessers().next().is_none() {
                    self.enter_round_end(TurnEndReason::PlayersLeft).await;
                } else if self.room.all_guessed() && !self.timers.is_set(TimerKind::GuessSettle) {
                    self.timers.cancel(TimerKind::Tick);
                    self.timers
                        .set(TimerKind::GuessSettle, self.timing.guess_settle);
                }
            },
            Phase::Choosing if was_drawer => {
                if self.room.connected_count() < MIN_PLAYERS {
                    self.enter_game_end(Some("too few players".to_string())).await;
                } else {
                    if self.room.turn >= self.room.drawer_order.len() {
                        self.room.turn = 0;
                    }
                    self.enter_choosing().await;
                }
            },
            _ => {},
        }
    }

    async fn handle_kick(&mut self, pid: PlayerId, target: PlayerId) {
        if self.room.host_id != pid {
            self.reply_err(pid, MessageType::PlayerKick, &CommandError::NotAuthorised);
            return;
        }
        if pid == target {
            self.reply_err(
                pid,
                MessageType::PlayerKick,
                &CommandError::invalid("cannot kick yourself"),
            );
            return;
        }
        if !self.room.is_member(target) {
            self.reply_err(pid, MessageType::PlayerKick, &CommandError::NotMember);
            return;
        }
        self.handle_leave(target, Some("kicked by host".to_string()))
            .await;
        self.reply_ok(pid, MessageType::PlayerKick);
    }

    // -- lobby commands ----------------------------------------------------

    async fn handle_settings(
        &mut self,
        pid: PlayerId,
        draw_time: Option<u32>,
        max_rounds: Option<u32>,
    ) {
        if self.room.host_id != pid {
            self.reply_err(pid, MessageType::RoomSettings, &CommandError::NotAuthorised);
            return;
        }
        if self.room.phase != Phase::Lobby || self.timers.is_set(TimerKind::StartCountdown) {
            self.reply_err(pid, MessageType::RoomSettings, &CommandError::WrongPhase);
            return;
        }

        let mut updated = self.room.settings.clone();
        if let Some(dt) = draw_time {
            updated.draw_time = dt;
        }
        if let Some(mr) = max_rounds {
            updated.max_rounds = mr;
        }
        if !updated.is_valid() {
            self.reply_err(
                pid,
                MessageType::RoomSettings,
                &CommandError::invalid("settings out of range"),
            );
            return;
        }

        self.room.settings = updated;
        self.reply_ok(pid, MessageType::RoomSettings);
        self.broadcast_sync();
        self.persist_room().await;
    }

    fn handle_start(&mut self, pid: PlayerId) {
        if self.room.host_id != pid {
            self.reply_err(pid, MessageType::GameStart, &CommandError::NotAuthorised);
            return;
        }
        if self.room.phase != Phase::Lobby || self.timers.is_set(TimerKind::StartCountdown) {
            self.reply_err(pid, MessageType::GameStart, &CommandError::WrongPhase);
            return;
        }
        if self.room.connected_count() < MIN_PLAYERS {
            self.reply_err(
                pid,
                MessageType::GameStart,
                &CommandError::invalid("not enough players"),
            );
            return;
        }

        self.reply_ok(pid, MessageType::GameStart);
        let countdown = self.timing.start_countdown.as_secs() as u32;
        self.send(
            Audience::Everyone,
            &ServerEvent::GameStarting(GameStartingMsg { countdown }),
        );
        self.timers
            .set(TimerKind::StartCountdown, self.timing.start_countdown);
    }

    /// Countdown elapsed: shuffle the drawer order and begin round one.
    async fn begin_game(&mut self) {
        if self.room.phase != Phase::Lobby {
            return;
        }
        if self.room.connected_count() < MIN_PLAYERS {
            tracing::info!(room = %self.room.code, "start aborted, players left during countdown");
            self.broadcast_sync();
            return;
        }

        let mut order: Vec<PlayerId> = self
            .room
            .players
            .iter()
            .filter(|p| p.is_connected)
            .map(|p| p.id)
            .collect();
        order.shuffle(&mut self.rng);
        self.room.drawer_order = order;
        self.room.round = 1;
        self.room.turn = 0;
        self.enter_choosing().await;
    }

    async fn handle_play_again(&mut self, pid: PlayerId) {
        if self.room.host_id != pid {
            self.reply_err(pid, MessageType::PlayAgain, &CommandError::NotAuthorised);
            return;
        }
        if self.room.phase != Phase::GameEnd {
            self.reply_err(pid, MessageType::PlayAgain, &CommandError::WrongPhase);
            return;
        }

        for p in &mut self.room.players {
            p.score = 0;
            p.has_guessed = false;
            p.is_drawing = false;
        }
        self.room.guessed.clear();
        self.room.round = 1;
        self.room.turn = 0;
        self.room.phase = Phase::Lobby;
        self.timers.retain_legal(Phase::Lobby);

        self.reply_ok(pid, MessageType::PlayAgain);
        self.broadcast_sync();
        self.persist_room().await;
    }

    // -- turn lifecycle ----------------------------------------------------

    async fn enter_choosing(&mut self) {
        self.room.phase = Phase::Choosing;
        self.room.current_word = None;
        self.room.masked_word.clear();
        self.room.time_left = 0;
        self.room.guessed.clear();

        if self.room.drawer_order.is_empty() {
            self.enter_game_end(Some("too few players".to_string())).await;
            return;
        }
        if self.room.turn >= self.room.drawer_order.len() {
            self.room.turn = 0;
        }
        let drawer = self.room.drawer_order[self.room.turn];
        self.room.current_drawer = Some(drawer);
        for p in &mut self.room.players {
            p.has_guessed = false;
            p.is_drawing = p.id == drawer;
        }

        self.room.word_choices =
            words::pick_words(&mut self.rng, &self.room.settings.theme, WORD_CHOICES);
        self.send(
            Audience::Only(drawer),
            &ServerEvent::ChooseWord(ChooseWordMsg {
                words: self.room.word_choices.clone(),
            }),
        );

        self.timers.retain_legal(Phase::Choosing);
        self.timers.set(TimerKind::AutoPick, self.timing.auto_pick);

        self.broadcast_sync();
        self.persist_room().await;
    }

    async fn handle_select_word(&mut self, pid: PlayerId, word: String) {
        if self.room.phase != Phase::Choosing {
            self.reply_err(pid, MessageType::SelectWord, &CommandError::WrongPhase);
            return;
        }
        if self.room.current_drawer != Some(pid) {
            self.reply_err(pid, MessageType::SelectWord, &CommandError::NotAuthorised);
            return;
        }
        if !self.room.word_choices.iter().any(|w| *w == word) {
            self.reply_err(
                pid,
                MessageType::SelectWord,
                &CommandError::invalid("word was not offered"),
            );
            return;
        }
        self.enter_drawing(word).await;
    }

    async fn enter_drawing(&mut self, word: String) {
        let Some(drawer) = self.room.current_drawer else {
            return;
        };
        self.room.phase = Phase::Drawing;
        self.room.masked_word = words::mask(&word);
        self.room.time_left = self.room.settings.draw_time;
        self.room.guessed.clear();
        self.room.word_choices.clear();
        let word_length = word.chars().count();
        self.room.current_word = Some(word.clone());

        self.timers.retain_legal(Phase::Drawing);
        self.timers.set(TimerKind::Tick, self.timing.tick);

        self.send(
            Audience::Only(drawer),
            &ServerEvent::WordAssign(WordAssignMsg { word }),
        );
        self.send(
            Audience::Everyone,
            &ServerEvent::TurnStart(TurnStartMsg {
                drawer_id: drawer,
                word_length,
                masked_word: self.room.masked_word.clone(),
                time_left: self.room.time_left,
            }),
        );
        self.broadcast_sync();
        self.persist_room().await;
    }

    async fn handle_tick(&mut self) {
        if self.room.phase != Phase::Drawing {
            return;
        }
        self.room.time_left = self.room.time_left.saturating_sub(1);
        self.send(
            Audience::Everyone,
            &ServerEvent::TimeUpdate(TimeUpdateMsg {
                time_left: self.room.time_left,
            }),
        );

        if words::hint_due(self.room.time_left, self.room.settings.draw_time)
            && let Some(word) = self.room.current_word.clone()
            && let Some(revealed) = words::reveal_one(&mut self.rng, &self.room.masked_word, &word)
        {
            self.room.masked_word = revealed.clone();
            self.send(
                Audience::Everyone,
                &ServerEvent::Hint(HintMsg {
                    masked_word: revealed,
                }),
            );
        }

        if self.room.time_left == 0 {
            self.enter_round_end(TurnEndReason::TimeUp).await;
        } else {
            self.timers.set(TimerKind::Tick, self.timing.tick);
        }
    }

    async fn enter_round_end(&mut self, reason: TurnEndReason) {
        let word = self.room.current_word.take().unwrap_or_default();
        let all_guessed = reason == TurnEndReason::AllGuessed;

        self.room.phase = Phase::RoundEnd;
        self.room.masked_word.clear();
        self.room.time_left = 0;
        self.room.word_choices.clear();
        self.room.current_drawer = None;
        for p in &mut self.room.players {
            p.is_drawing = false;
        }

        self.timers.retain_legal(Phase::RoundEnd);
        self.timers
            .set(TimerKind::TurnAdvance, self.timing.turn_end_delay);

        self.send(
            Audience::Everyone,
            &ServerEvent::TurnEnd(TurnEndMsg {
                word,
                reason,
                all_guessed,
            }),
        );
        self.broadcast_sync();
        self.persist_room().await;
    }

    async fn advance_turn(&mut self) {
        if self.room.phase != Phase::RoundEnd {
            return;
        }
        if self.room.connected_count() < MIN_PLAYERS {
            self.enter_game_end(Some("too few players".to_string())).await;
            return;
        }
        if self.room.turn + 1 < self.room.drawer_order.len() {
            self.room.turn += 1;
            self.enter_choosing().await;
        } else if self.room.round < self.room.settings.max_rounds {
            self.send(
                Audience::Everyone,
                &ServerEvent::RoundEnd(RoundEndMsg {
                    round: self.room.round,
                }),
            );
            self.room.round += 1;
            self.room.turn = 0;
            self.enter_choosing().await;
        } else {
            self.enter_game_end(None).await;
        }
    }

    async fn enter_game_end(&mut self, reason: Option<String>) {
        self.room.phase = Phase::GameEnd;
        self.room.current_word = None;
        self.room.masked_word.clear();
        self.room.word_choices.clear();
        self.room.current_drawer = None;
        self.room.time_left = 0;
        for p in &mut self.room.players {
            p.is_drawing = false;
        }
        self.timers.retain_legal(Phase::GameEnd);

        let rankings = self.rankings();
        self.send(
            Audience::Everyone,
            &ServerEvent::GameEnded(GameEndedMsg {
                rankings: rankings.clone(),
                reason,
            }),
        );
        self.broadcast_sync();
        self.persist_room().await;

        let updates: Vec<StatUpdate> = rankings
            .iter()
            .filter_map(|r| {
                r.user_id.as_ref().map(|uid| StatUpdate {
                    user_id: uid.clone(),
                    score: r.score,
                    won: r.rank == 1,
                })
            })
            .collect();
        if !updates.is_empty()
            && let Err(e) = self.store.record_results(&updates).await
        {
            tracing::warn!(room = %self.room.code, error = %e, "stat update failed");
        }

        if self.connections.is_empty() && !self.timers.is_set(TimerKind::Cleanup) {
            self.timers
                .set(TimerKind::Cleanup, self.timing.empty_room_grace);
        }
    }

    /// Final standings: score descending, ties broken by arrival order.
    fn rankings(&self) -> Vec<RankingEntry> {
        let mut by_score: Vec<&Player> = self.room.players.iter().collect();
        by_score.sort_by(|a, b| b.score.cmp(&a.score));
        by_score
            .into_iter()
            .enumerate()
            .map(|(i, p)| RankingEntry {
                rank: i + 1,
                id: p.id,
                name: p.name.clone(),
                score: p.score,
                user_id: p.user_id.clone(),
            })
            .collect()
    }

    // -- chat and guessing -------------------------------------------------

    async fn handle_chat(&mut self, pid: PlayerId, text: String) {
        let Some(player) = self.room.player(pid) else {
            self.reply_err(pid, MessageType::Chat, &CommandError::NotMember);
            return;
        };
        let trimmed = text.trim().to_string();
        if trimmed.is_empty() || trimmed.chars().count() > MAX_CHAT_LENGTH {
            self.reply_err(
                pid,
                MessageType::Chat,
                &CommandError::invalid("message must be 1-200 characters"),
            );
            return;
        }
        if trimmed.chars().any(char::is_control) {
            self.reply_err(
                pid,
                MessageType::Chat,
                &CommandError::invalid("message contains control characters"),
            );
            return;
        }

        let is_guess = self.room.phase == Phase::Drawing && self.room.current_drawer != Some(pid);
        let already_guessed = player.has_guessed;

        if is_guess && !already_guessed {
            let outcome = self
                .room
                .current_word
                .as_deref()
                .map(|word| guess::evaluate(&trimmed, word));
            match outcome {
                Some(GuessOutcome::Correct) => {
                    self.award_correct_guess(pid).await;
                    return;
                },
                Some(GuessOutcome::Close) => {
                    let msg = self.chat_message(pid, trimmed.clone(), true, true);
                    self.room.push_chat(msg.clone());
                    self.send(
                        Audience::Everyone,
                        &ServerEvent::ChatBroadcast(ChatBroadcastMsg { message: msg }),
                    );
                    self.send(
                        Audience::Only(pid),
                        &ServerEvent::CloseGuess(CloseGuessMsg { message: trimmed }),
                    );
                    return;
                },
                _ => {},
            }
        }

        let msg = self.chat_message(pid, trimmed, is_guess, false);
        if is_guess && already_guessed {
            // A guesser who already has the word could retype it; their
            // chat reaches only the drawer and the other guessed players
            // until the turn ends, and stays out of the shared history a
            // later joiner would replay.
            let audience = Audience::Members(self.guessed_chat_members());
            self.send(
                audience,
                &ServerEvent::ChatBroadcast(ChatBroadcastMsg { message: msg }),
            );
            return;
        }
        self.room.push_chat(msg.clone());
        self.send(
            Audience::Everyone,
            &ServerEvent::ChatBroadcast(ChatBroadcastMsg { message: msg }),
        );
    }

    /// The guessed-chat channel: the drawer plus everyone who has already
    /// guessed this turn.
    fn guessed_chat_members(&self) -> Vec<PlayerId> {
        self.room
            .players
            .iter()
            .filter(|p| p.has_guessed || Some(p.id) == self.room.current_drawer)
            .map(|p| p.id)
            .collect()
    }

    /// The raw text of a correct guess is never broadcast.
    async fn award_correct_guess(&mut self, pid: PlayerId) {
        self.room.guessed.insert(pid);
        let arrival = self.room.guessed.len();
        let points = guess::guesser_points(
            self.room.time_left,
            self.room.settings.draw_time,
            arrival,
        );

        let Some(player) = self.room.player_mut(pid) else {
            return;
        };
        player.has_guessed = true;
        player.score += points;
        let name = player.name.clone();

        let drawer = self.room.current_drawer;
        if let Some(did) = drawer
            && let Some(d) = self.room.player_mut(did)
        {
            d.score += guess::DRAWER_POINTS;
        }

        self.send(
            Audience::Everyone,
            &ServerEvent::CorrectGuess(CorrectGuessMsg {
                player_id: pid,
                player_name: name,
                points,
            }),
        );

        if self.room.all_guessed() {
            self.timers.cancel(TimerKind::Tick);
            self.timers
                .set(TimerKind::GuessSettle, self.timing.guess_settle);
        }

        self.broadcast_sync();
        self.persist_player(pid).await;
        if let Some(did) = drawer {
            self.persist_player(did).await;
        }
        self.persist_room().await;
    }

    fn chat_message(&self, pid: PlayerId, text: String, is_guess: bool, is_close: bool) -> ChatMessage {
        let name = self
            .room
            .player(pid)
            .map(|p| p.name.clone())
            .unwrap_or_default();
        ChatMessage {
            id: uuid::Uuid::new_v4(),
            player_id: pid,
            player_name: name,
            text,
            timestamp: epoch_secs(),
            is_guess,
            is_close,
        }
    }

    // -- drawing relay -----------------------------------------------------

    fn handle_draw(&mut self, pid: PlayerId, frame: Bytes) {
        if self.room.phase != Phase::Drawing || self.room.current_drawer != Some(pid) {
            tracing::debug!(room = %self.room.code, player_id = %pid, "draw frame dropped");
            return;
        }
        self.send_raw(Audience::Except(pid), frame);
    }

    // -- outbound ----------------------------------------------------------

    fn send(&self, audience: Audience, event: &ServerEvent) {
        match encode_server_event(event) {
            Ok(data) => self.send_raw(audience, Bytes::from(data)),
            Err(e) => {
                tracing::error!(room = %self.room.code, error = %e, "failed to encode event");
            },
        }
    }

    fn send_raw(&self, audience: Audience, bytes: Bytes) {
        for (&pid, conn) in &self.connections {
            if audience.includes(pid) && conn.sender.try_send(bytes.clone()).is_err() {
                tracing::debug!(
                    room = %self.room.code,
                    player_id = %pid,
                    "skipping send to slow client"
                );
            }
        }
    }

    fn broadcast_sync(&self) {
        self.send(
            Audience::Everyone,
            &ServerEvent::RoomSync(Box::new(RoomSyncMsg::snapshot(&self.room))),
        );
    }

    fn reply_ok(&self, pid: PlayerId, command: MessageType) {
        self.send(
            Audience::Only(pid),
            &ServerEvent::CommandReply(CommandReplyMsg {
                command,
                success: true,
                error: None,
            }),
        );
    }

    fn reply_err(&self, pid: PlayerId, command: MessageType, err: &CommandError) {
        self.send(
            Audience::Only(pid),
            &ServerEvent::CommandReply(err.reply(command)),
        );
    }

    // -- persistence -------------------------------------------------------

    async fn persist_room(&mut self) {
        self.room.last_activity = epoch_secs();
        if let Err(e) = self.store.save_room(&self.room).await {
            tracing::warn!(room = %self.room.code, error = %e, "room persist failed");
        }
    }

    async fn persist_player(&mut self, pid: PlayerId) {
        let session = self.connections.get(&pid).map(|c| c.session);
        if let Some(player) = self.room.player(pid).cloned() {
            self.persist_player_row(&player, session).await;
        }
    }

    async fn persist_player_row(&self, player: &Player, session: Option<SessionId>) {
        if let Err(e) = self
            .store
            .upsert_player(self.room.id, player, session)
            .await
        {
            tracing::warn!(room = %self.room.code, error = %e, "player persist failed");
        }
    }
}
