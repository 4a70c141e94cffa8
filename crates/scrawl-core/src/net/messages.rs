use serde::{Deserialize, Serialize};

use crate::codes::{PlayerId, RoomId};
use crate::player::Player;
use crate::room::{ChatMessage, Phase, Room, TurnEndReason};

/// Network message type discriminator: the first byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    // Client -> Server
    RoomCreate = 0x01,
    RoomJoin = 0x02,
    RoomLeave = 0x03,
    RoomSettings = 0x04,
    GameStart = 0x05,
    SelectWord = 0x06,
    PlayAgain = 0x07,
    Chat = 0x08,
    PlayerKick = 0x09,

    // Server -> Client
    JoinReply = 0x10,
    CommandReply = 0x11,
    RoomSync = 0x12,
    ChatBroadcast = 0x13,
    PlayerJoined = 0x14,
    PlayerDisconnected = 0x15,
    HostChanged = 0x16,
    GameStarting = 0x17,
    ChooseWord = 0x18,
    WordAssign = 0x19,
    TurnStart = 0x1A,
    TimeUpdate = 0x1B,
    Hint = 0x1C,
    CorrectGuess = 0x1D,
    CloseGuess = 0x1E,
    TurnEnd = 0x1F,
    RoundEnd = 0x20,
    GameEnded = 0x21,
    PlayerKicked = 0x22,
    ServerShutdown = 0x23,

    // Either direction: drawer to server, forwarded verbatim to the room
    DrawStroke = 0x30,
    DrawClear = 0x31,
    DrawUndo = 0x32,
}

impl MessageType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b {
            0x01 => Self::RoomCreate,
            0x02 => Self::RoomJoin,
            0x03 => Self::RoomLeave,
            0x04 => Self::RoomSettings,
            0x05 => Self::GameStart,
            0x06 => Self::SelectWord,
            0x07 => Self::PlayAgain,
            0x08 => Self::Chat,
            0x09 => Self::PlayerKick,
            0x10 => Self::JoinReply,
            0x11 => Self::CommandReply,
            0x12 => Self::RoomSync,
            0x13 => Self::ChatBroadcast,
            0x14 => Self::PlayerJoined,
            0x15 => Self::PlayerDisconnected,
            0x16 => Self::HostChanged,
            0x17 => Self::GameStarting,
            0x18 => Self::ChooseWord,
            0x19 => Self::WordAssign,
            0x1A => Self::TurnStart,
            0x1B => Self::TimeUpdate,
            0x1C => Self::Hint,
            0x1D => Self::CorrectGuess,
            0x1E => Self::CloseGuess,
            0x1F => Self::TurnEnd,
            0x20 => Self::RoundEnd,
            0x21 => Self::GameEnded,
            0x22 => Self::PlayerKicked,
            0x23 => Self::ServerShutdown,
            0x30 => Self::DrawStroke,
            0x31 => Self::DrawClear,
            0x32 => Self::DrawUndo,
            _ => return None,
        })
    }

    /// True for types only the server may emit.
    pub fn is_server_only(&self) -> bool {
        matches!(*self as u8, 0x10..=0x2F)
    }

    /// True for the drawing relay types, whose payloads the server
    /// forwards without decoding.
    pub fn is_draw(&self) -> bool {
        matches!(
            self,
            Self::DrawStroke | Self::DrawClear | Self::DrawUndo
        )
    }
}

// ---------------------------------------------------------------------------
// Client payloads
// ---------------------------------------------------------------------------

/// Settings a host may supply at room creation; absent fields use defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateSettings {
    pub draw_time: Option<u32>,
    pub rounds: Option<u32>,
    pub max_players: Option<u8>,
    pub theme: Option<String>,
    pub is_private: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCreateMsg {
    pub player_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub settings: CreateSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomJoinMsg {
    pub room_code: String,
    pub player_name: String,
    /// A preserved player id makes this a reconnect attempt.
    #[serde(default)]
    pub player_id: Option<PlayerId>,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomLeaveMsg {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettingsMsg {
    pub draw_time: Option<u32>,
    pub max_rounds: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStartMsg {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectWordMsg {
    pub word: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayAgainMsg {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSendMsg {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerKickMsg {
    pub player_id: PlayerId,
}

/// Decoded client events. Draw frames are not represented here: the server
/// authorises them by type byte and relays the raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    RoomCreate(RoomCreateMsg),
    RoomJoin(RoomJoinMsg),
    RoomLeave(RoomLeaveMsg),
    RoomSettings(RoomSettingsMsg),
    GameStart(GameStartMsg),
    SelectWord(SelectWordMsg),
    PlayAgain(PlayAgainMsg),
    Chat(ChatSendMsg),
    PlayerKick(PlayerKickMsg),
}

impl ClientEvent {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::RoomCreate(_) => MessageType::RoomCreate,
            Self::RoomJoin(_) => MessageType::RoomJoin,
            Self::RoomLeave(_) => MessageType::RoomLeave,
            Self::RoomSettings(_) => MessageType::RoomSettings,
            Self::GameStart(_) => MessageType::GameStart,
            Self::SelectWord(_) => MessageType::SelectWord,
            Self::PlayAgain(_) => MessageType::PlayAgain,
            Self::Chat(_) => MessageType::Chat,
            Self::PlayerKick(_) => MessageType::PlayerKick,
        }
    }
}

// ---------------------------------------------------------------------------
// Server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinReplyMsg {
    pub success: bool,
    pub room_id: Option<RoomId>,
    pub room_code: Option<String>,
    pub player_id: Option<PlayerId>,
    /// Recent chat history, oldest first.
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub error: Option<String>,
}

impl JoinReplyMsg {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            room_id: None,
            room_code: None,
            player_id: None,
            messages: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Synchronous reply envelope for commands that can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReplyMsg {
    pub command: MessageType,
    pub success: bool,
    pub error: Option<String>,
}

/// The public projection of one player, as carried in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub is_host: bool,
    pub is_drawing: bool,
    pub has_guessed: bool,
    pub avatar: String,
    pub is_connected: bool,
}

impl From<&Player> for PlayerSnapshot {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            score: p.score,
            is_host: p.is_host,
            is_drawing: p.is_drawing,
            has_guessed: p.has_guessed,
            avatar: p.avatar.clone(),
            is_connected: p.is_connected,
        }
    }
}

/// The public projection of the room itself. Never contains the word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomStateSnapshot {
    pub id: RoomId,
    pub code: String,
    pub phase: Phase,
    pub round: u32,
    pub turn: usize,
    pub max_rounds: u32,
    pub time_left: u32,
    pub draw_time: u32,
    pub current_drawer: Option<PlayerId>,
    pub word_length: Option<usize>,
    pub masked_word: Option<String>,
    pub theme: String,
    pub is_private: bool,
    pub max_players: u8,
}

/// The authoritative room snapshot, emitted on every state-changing event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSyncMsg {
    pub room: RoomStateSnapshot,
    pub players: Vec<PlayerSnapshot>,
}

impl RoomSyncMsg {
    /// Project a room into its shareable snapshot. The secret word itself
    /// is reduced to its length and current mask.
    pub fn snapshot(room: &Room) -> Self {
        let word_length = room
            .current_word
            .as_ref()
            .map(|w| w.chars().count());
        let masked_word = if room.masked_word.is_empty() {
            None
        } else {
            Some(room.masked_word.clone())
        };
        Self {
            room: RoomStateSnapshot {
                id: room.id,
                code: room.code.clone(),
                phase: room.phase,
                round: room.round,
                turn: room.turn,
                max_rounds: room.settings.max_rounds,
                time_left: room.time_left,
                draw_time: room.settings.draw_time,
                current_drawer: room.current_drawer,
                word_length,
                masked_word,
                theme: room.settings.theme.clone(),
                is_private: room.settings.is_private,
                max_players: room.settings.max_players,
            },
            players: room.players.iter().map(PlayerSnapshot::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBroadcastMsg {
    pub message: ChatMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerJoinedMsg {
    pub player: PlayerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDisconnectedMsg {
    pub player_id: PlayerId,
    pub player_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostChangedMsg {
    pub new_host_id: PlayerId,
    pub new_host_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStartingMsg {
    pub countdown: u32,
}

/// Drawer-only: the offered word triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChooseWordMsg {
    pub words: Vec<String>,
}

/// Drawer-only: the word now in play.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordAssignMsg {
    pub word: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnStartMsg {
    pub drawer_id: PlayerId,
    pub word_length: usize,
    pub masked_word: String,
    pub time_left: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeUpdateMsg {
    pub time_left: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintMsg {
    pub masked_word: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectGuessMsg {
    pub player_id: PlayerId,
    pub player_name: String,
    pub points: u32,
}

/// Sender-only: their guess was close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseGuessMsg {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEndMsg {
    /// The answer, revealed to everyone.
    pub word: String,
    pub reason: TurnEndReason,
    pub all_guessed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEndMsg {
    pub round: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: usize,
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEndedMsg {
    pub rankings: Vec<RankingEntry>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerKickedMsg {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerShutdownMsg {
    pub message: String,
}

/// Encoded server events. Draw relays are raw passthrough and never take
/// this form.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    JoinReply(JoinReplyMsg),
    CommandReply(CommandReplyMsg),
    RoomSync(Box<RoomSyncMsg>),
    ChatBroadcast(ChatBroadcastMsg),
    PlayerJoined(PlayerJoinedMsg),
    PlayerDisconnected(PlayerDisconnectedMsg),
    HostChanged(HostChangedMsg),
    GameStarting(GameStartingMsg),
    ChooseWord(ChooseWordMsg),
    WordAssign(WordAssignMsg),
    TurnStart(TurnStartMsg),
    TimeUpdate(TimeUpdateMsg),
    Hint(HintMsg),
    CorrectGuess(CorrectGuessMsg),
    CloseGuess(CloseGuessMsg),
    TurnEnd(TurnEndMsg),
    RoundEnd(RoundEndMsg),
    GameEnded(GameEndedMsg),
    PlayerKicked(PlayerKickedMsg),
    ServerShutdown(ServerShutdownMsg),
}

impl ServerEvent {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::JoinReply(_) => MessageType::JoinReply,
            Self::CommandReply(_) => MessageType::CommandReply,
            Self::RoomSync(_) => MessageType::RoomSync,
            Self::ChatBroadcast(_) => MessageType::ChatBroadcast,
            Self::PlayerJoined(_) => MessageType::PlayerJoined,
            Self::PlayerDisconnected(_) => MessageType::PlayerDisconnected,
            Self::HostChanged(_) => MessageType::HostChanged,
            Self::GameStarting(_) => MessageType::GameStarting,
            Self::ChooseWord(_) => MessageType::ChooseWord,
            Self::WordAssign(_) => MessageType::WordAssign,
            Self::TurnStart(_) => MessageType::TurnStart,
            Self::TimeUpdate(_) => MessageType::TimeUpdate,
            Self::Hint(_) => MessageType::Hint,
            Self::CorrectGuess(_) => MessageType::CorrectGuess,
            Self::CloseGuess(_) => MessageType::CloseGuess,
            Self::TurnEnd(_) => MessageType::TurnEnd,
            Self::RoundEnd(_) => MessageType::RoundEnd,
            Self::GameEnded(_) => MessageType::GameEnded,
            Self::PlayerKicked(_) => MessageType::PlayerKicked,
            Self::ServerShutdown(_) => MessageType::ServerShutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{new_player_id, new_room_id};
    use crate::room::RoomSettings;

    #[test]
    fn snapshot_never_contains_the_word() {
        let players = crate::test_helpers::make_players(2);
        let drawer = players[0].id;
        let mut room = Room::new(
            new_room_id(),
            "ABCDEF".into(),
            players[0].clone(),
            RoomSettings::default(),
            0,
        );
        room.players.push(players[1].clone());
        room.phase = Phase::Drawing;
        room.current_drawer = Some(drawer);
        room.player_mut(drawer).unwrap().is_drawing = true;
        room.current_word = Some("zebra".into());
        room.masked_word = "z____".into();

        let sync = RoomSyncMsg::snapshot(&room);
        assert_eq!(sync.room.word_length, Some(5));
        assert_eq!(sync.room.masked_word.as_deref(), Some("z____"));
        assert_eq!(sync.players.len(), 2);

        // serialized form must not leak the word
        let json = serde_json::to_string(&sync).unwrap();
        assert!(!json.contains("zebra"));
    }

    #[test]
    fn snapshot_word_fields_absent_in_lobby() {
        let players = crate::test_helpers::make_players(1);
        let room = Room::new(
            new_room_id(),
            "ABCDEF".into(),
            players[0].clone(),
            RoomSettings::default(),
            0,
        );
        let sync = RoomSyncMsg::snapshot(&room);
        assert_eq!(sync.room.word_length, None);
        assert_eq!(sync.room.masked_word, None);
        assert_eq!(sync.room.phase, Phase::Lobby);
    }

    #[test]
    fn player_snapshot_excludes_user_id() {
        let mut p = Player::new(new_player_id(), "Alice".into(), None);
        p.user_id = Some("acct-1".into());
        let snap = PlayerSnapshot::from(&p);
        let json = serde_json::to_string(&snap).unwrap();
        assert!(!json.contains("acct-1"));
    }

    #[test]
    fn message_type_bytes_round_trip() {
        for b in 0u8..=255 {
            if let Some(t) = MessageType::from_byte(b) {
                assert_eq!(t as u8, b);
            }
        }
    }

    #[test]
    fn server_only_classification() {
        assert!(MessageType::RoomSync.is_server_only());
        assert!(MessageType::WordAssign.is_server_only());
        assert!(!MessageType::Chat.is_server_only());
        assert!(!MessageType::DrawStroke.is_server_only());
    }

    #[test]
    fn masked_word_placeholder_is_underscore() {
        assert_eq!(crate::words::MASK_CHAR, '_');
    }
}
