use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codes::{PlayerId, RoomId};
use crate::player::Player;
use crate::words;

pub const MIN_PLAYERS: usize = 2;
pub const MAX_PLAYERS_RANGE: std::ops::RangeInclusive<u8> = 2..=10;
pub const DRAW_TIME_RANGE: std::ops::RangeInclusive<u32> = 30..=180;
pub const ROUNDS_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

pub const DEFAULT_MAX_PLAYERS: u8 = 10;
pub const DEFAULT_DRAW_TIME: u32 = 80;
pub const DEFAULT_ROUNDS: u32 = 3;

/// Words offered to the drawer each turn.
pub const WORD_CHOICES: usize = 3;

pub const HINT_INTERVAL_SECS: u32 = 20;
pub const START_COUNTDOWN: Duration = Duration::from_secs(3);
pub const AUTO_PICK_TIMEOUT: Duration = Duration::from_secs(15);
pub const TURN_END_DELAY: Duration = Duration::from_secs(5);
pub const GUESS_SETTLE_DELAY: Duration = Duration::from_secs(1);
pub const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(120);

pub const CHAT_HISTORY_CAP: usize = 100;
pub const MAX_CHAT_LENGTH: usize = 200;

/// Current state of a room's game.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Lobby,
    Choosing,
    Drawing,
    RoundEnd,
    GameEnd,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lobby => "lobby",
            Self::Choosing => "choosing",
            Self::Drawing => "drawing",
            Self::RoundEnd => "round_end",
            Self::GameEnd => "game_end",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "lobby" => Some(Self::Lobby),
            "choosing" => Some(Self::Choosing),
            "drawing" => Some(Self::Drawing),
            "round_end" => Some(Self::RoundEnd),
            "game_end" => Some(Self::GameEnd),
            _ => None,
        }
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnEndReason {
    TimeUp,
    AllGuessed,
    DrawerLeft,
    PlayersLeft,
}

/// Host-configurable room settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub max_players: u8,
    pub draw_time: u32,
    pub max_rounds: u32,
    pub theme: String,
    pub is_private: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_players: DEFAULT_MAX_PLAYERS,
            draw_time: DEFAULT_DRAW_TIME,
            max_rounds: DEFAULT_ROUNDS,
            theme: words::DEFAULT_THEME.to_string(),
            is_private: false,
        }
    }
}

impl RoomSettings {
    /// True when every field is within its allowed range.
    pub fn is_valid(&self) -> bool {
        MAX_PLAYERS_RANGE.contains(&self.max_players)
            && DRAW_TIME_RANGE.contains(&self.draw_time)
            && ROUNDS_RANGE.contains(&self.max_rounds)
    }
}

/// A chat line as stored in the history ring and sent on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub player_id: PlayerId,
    pub player_name: String,
    pub text: String,
    pub timestamp: u64,
    pub is_guess: bool,
    pub is_close: bool,
}

/// A room: a bounded group of players playing one game instance.
///
/// `current_word` is the only secret field; it must never leave the room
/// except through the drawer-only word event and the end-of-turn reveal.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub code: String,
    pub host_id: PlayerId,
    pub settings: RoomSettings,
    pub phase: Phase,
    /// 1-based round counter once a game has started.
    pub round: u32,
    /// Index into `drawer_order` for the current turn.
    pub turn: usize,
    pub players: Vec<Player>,
    pub drawer_order: Vec<PlayerId>,
    pub current_drawer: Option<PlayerId>,
    pub current_word: Option<String>,
    pub masked_word: String,
    pub word_choices: Vec<String>,
    pub time_left: u32,
    pub guessed: HashSet<PlayerId>,
    pub chat: VecDeque<ChatMessage>,
    pub created_at: u64,
    pub last_activity: u64,
}

impl Room {
    pub fn new(id: RoomId, code: String, mut host: Player, settings: RoomSettings, now: u64) -> Self {
        host.is_host = true;
        let host_id = host.id;
        Self {
            id,
            code,
            host_id,
            settings,
            phase: Phase::Lobby,
            round: 1,
            turn: 0,
            drawer_order: vec![host_id],
            players: vec![host],
            current_drawer: None,
            current_word: None,
            masked_word: String::new(),
            word_choices: Vec::new(),
            time_left: 0,
            guessed: HashSet::new(),
            chat: VecDeque::new(),
            created_at: now,
            last_activity: now,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn is_member(&self, id: PlayerId) -> bool {
        self.players.iter().any(|p| p.id == id)
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.is_connected).count()
    }

    /// Non-drawer connected players: the guessers of the current turn.
    pub fn guessers(&self) -> impl Iterator<Item = &Player> {
        self.players
            .iter()
            .filter(|p| p.is_connected && Some(p.id) != self.current_drawer)
    }

    /// True when every connected non-drawer has guessed and there is at
    /// least one of them.
    pub fn all_guessed(&self) -> bool {
        let mut any = false;
        for p in self.guessers() {
            any = true;
            if !p.has_guessed {
                return false;
            }
        }
        any
    }

    /// Append a chat message, evicting the oldest past the history cap.
    pub fn push_chat(&mut self, msg: ChatMessage) {
        self.chat.push_back(msg);
        while self.chat.len() > CHAT_HISTORY_CAP {
            self.chat.pop_front();
        }
    }

    /// Remove a player from membership, drawer order, and the guessed set.
    /// Returns the removed player.
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let idx = self.players.iter().position(|p| p.id == id)?;
        let player = self.players.remove(idx);
        self.drawer_order.retain(|&d| d != id);
        self.guessed.remove(&id);
        Some(player)
    }

    /// Promote the earliest-remaining member to host. Returns the new host
    /// id when a promotion happened.
    pub fn promote_next_host(&mut self) -> Option<PlayerId> {
        let new_host = self.players.first()?.id;
        self.host_id = new_host;
        for p in &mut self.players {
            p.is_host = p.id == new_host;
        }
        Some(new_host)
    }

    /// Check the structural invariants that must hold after every
    /// transition. Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        let drawing: Vec<_> = self.players.iter().filter(|p| p.is_drawing).collect();
        if drawing.len() > 1 {
            return Err("more than one player is drawing".into());
        }
        if let Some(d) = drawing.first()
            && Some(d.id) != self.current_drawer
        {
            return Err("drawing player does not match current drawer".into());
        }
        if matches!(self.phase, Phase::Lobby | Phase::RoundEnd | Phase::GameEnd)
            && !drawing.is_empty()
        {
            return Err(format!("player drawing during {}", self.phase.as_str()));
        }

        match (&self.current_word, self.phase) {
            (Some(w), Phase::Drawing) if !w.is_empty() => {
                let word: Vec<char> = w.chars().collect();
                let masked: Vec<char> = self.masked_word.chars().collect();
                if word.len() != masked.len() {
                    return Err("masked word length mismatch".into());
                }
                for (m, w) in masked.iter().zip(word.iter()) {
                    if *m != words::MASK_CHAR && m != w {
                        return Err("masked word reveals a wrong letter".into());
                    }
                }
            },
            (None, Phase::Drawing) | (Some(_), Phase::Drawing) => {
                return Err("drawing phase without a current word".into());
            },
            (Some(_), _) => return Err("current word set outside drawing".into()),
            (None, _) => {},
        }

        for id in &self.guessed {
            if Some(*id) == self.current_drawer {
                return Err("drawer is in the guessed set".into());
            }
            match self.player(*id) {
                Some(p) if p.has_guessed => {},
                Some(_) => return Err("guessed set member lacks has_guessed".into()),
                None => return Err("guessed set contains a non-member".into()),
            }
        }

        if !self.players.is_empty() {
            let hosts = self.players.iter().filter(|p| p.is_host).count();
            if hosts != 1 {
                return Err(format!("{hosts} hosts in a non-empty room"));
            }
        }

        let mut seen = HashSet::new();
        for id in &self.drawer_order {
            if !seen.insert(*id) {
                return Err("drawer order contains a duplicate".into());
            }
            if !self.is_member(*id) {
                return Err("drawer order references a removed player".into());
            }
        }

        if self.round > self.settings.max_rounds {
            return Err("round exceeds max rounds".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{new_player_id, new_room_id};

    fn room_with(n: usize) -> Room {
        let mut players = crate::test_helpers::make_players(n);
        let host = players.remove(0);
        let mut room = Room::new(
            new_room_id(),
            "ABCDEF".into(),
            host,
            RoomSettings::default(),
            1000,
        );
        for p in players {
            room.drawer_order.push(p.id);
            room.players.push(p);
        }
        room
    }

    fn chat_line(room: &Room, text: &str) -> ChatMessage {
        let p = &room.players[0];
        ChatMessage {
            id: Uuid::new_v4(),
            player_id: p.id,
            player_name: p.name.clone(),
            text: text.into(),
            timestamp: 0,
            is_guess: false,
            is_close: false,
        }
    }

    #[test]
    fn default_settings_are_valid() {
        assert!(RoomSettings::default().is_valid());
    }

    #[test]
    fn out_of_range_settings_rejected() {
        let mut s = RoomSettings::default();
        s.draw_time = 29;
        assert!(!s.is_valid());
        s.draw_time = 181;
        assert!(!s.is_valid());
        s.draw_time = 30;
        s.max_rounds = 0;
        assert!(!s.is_valid());
        s.max_rounds = 11;
        assert!(!s.is_valid());
        s.max_rounds = 10;
        s.max_players = 1;
        assert!(!s.is_valid());
        s.max_players = 11;
        assert!(!s.is_valid());
    }

    #[test]
    fn chat_ring_evicts_oldest() {
        let mut room = room_with(2);
        for i in 0..(CHAT_HISTORY_CAP + 10) {
            room.push_chat(chat_line(&room, &format!("line {i}")));
        }
        assert_eq!(room.chat.len(), CHAT_HISTORY_CAP);
        assert_eq!(room.chat.front().unwrap().text, "line 10");
        assert_eq!(
            room.chat.back().unwrap().text,
            format!("line {}", CHAT_HISTORY_CAP + 9)
        );
    }

    #[test]
    fn remove_player_prunes_everywhere() {
        let mut room = room_with(3);
        let victim = room.players[1].id;
        room.guessed.insert(victim);
        let removed = room.remove_player(victim).unwrap();
        assert_eq!(removed.id, victim);
        assert!(!room.is_member(victim));
        assert!(!room.drawer_order.contains(&victim));
        assert!(!room.guessed.contains(&victim));
    }

    #[test]
    fn promote_next_host_picks_earliest() {
        let mut room = room_with(3);
        let host = room.host_id;
        room.remove_player(host);
        let next = room.players[0].id;
        assert_eq!(room.promote_next_host(), Some(next));
        assert_eq!(room.host_id, next);
        assert_eq!(room.players.iter().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn all_guessed_requires_a_guesser() {
        let mut room = room_with(2);
        room.current_drawer = Some(room.players[0].id);
        // the only non-drawer has not guessed yet
        assert!(!room.all_guessed());
        room.players[1].has_guessed = true;
        assert!(room.all_guessed());
        // disconnected guessers do not count
        room.players[1].is_connected = false;
        assert!(!room.all_guessed());
    }

    #[test]
    fn fresh_room_passes_invariants() {
        let room = room_with(4);
        assert!(room.validate().is_ok());
    }

    #[test]
    fn invariant_catches_word_outside_drawing() {
        let mut room = room_with(2);
        room.current_word = Some("horse".into());
        assert!(room.validate().is_err());
    }

    #[test]
    fn invariant_catches_mask_mismatch() {
        let mut room = room_with(2);
        let drawer = room.players[0].id;
        room.phase = Phase::Drawing;
        room.current_drawer = Some(drawer);
        room.player_mut(drawer).unwrap().is_drawing = true;
        room.current_word = Some("horse".into());
        room.masked_word = "____".into();
        assert!(room.validate().is_err());
        room.masked_word = "_____".into();
        assert!(room.validate().is_ok());
        room.masked_word = "x____".into();
        assert!(room.validate().is_err());
        room.masked_word = "h____".into();
        assert!(room.validate().is_ok());
    }

    #[test]
    fn invariant_catches_two_hosts() {
        let mut room = room_with(2);
        room.players[1].is_host = true;
        assert!(room.validate().is_err());
    }

    #[test]
    fn invariant_catches_drawer_in_guessed_set() {
        let mut room = room_with(2);
        let drawer = room.players[0].id;
        room.phase = Phase::Drawing;
        room.current_drawer = Some(drawer);
        room.player_mut(drawer).unwrap().is_drawing = true;
        room.current_word = Some("cat".into());
        room.masked_word = "___".into();
        room.guessed.insert(drawer);
        assert!(room.validate().is_err());
    }

    #[test]
    fn invariant_catches_stale_drawer_order() {
        let mut room = room_with(3);
        let gone = room.players[2].id;
        room.players.retain(|p| p.id != gone);
        // drawer_order still references the removed player
        assert!(room.validate().is_err());
    }

    #[test]
    fn phase_round_trips_through_str() {
        for phase in [
            Phase::Lobby,
            Phase::Choosing,
            Phase::Drawing,
            Phase::RoundEnd,
            Phase::GameEnd,
        ] {
            assert_eq!(Phase::from_str_opt(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_str_opt("waiting"), None);
    }
}
