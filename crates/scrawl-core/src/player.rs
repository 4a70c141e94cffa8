use serde::{Deserialize, Serialize};

use crate::codes::PlayerId;

/// Maximum player name length after trimming.
pub const MAX_NAME_LENGTH: usize = 20;

/// A member of a room. The transport session handle lives with the room
/// engine's connection table, not here; `is_connected` mirrors it for
/// snapshots and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub avatar: String,
    pub score: u32,
    pub is_host: bool,
    pub is_drawing: bool,
    pub has_guessed: bool,
    pub is_connected: bool,
    /// Optional account id, used only for end-of-game stat attribution.
    #[serde(default)]
    pub user_id: Option<String>,
}

impl Player {
    pub fn new(id: PlayerId, name: String, avatar: Option<String>) -> Self {
        Self {
            id,
            name,
            avatar: avatar.unwrap_or_default(),
            score: 0,
            is_host: false,
            is_drawing: false,
            has_guessed: false,
            is_connected: true,
            user_id: None,
        }
    }
}

/// Validate and normalise a client-supplied player name.
/// Returns the trimmed name, or `None` if empty, too long, or containing
/// control characters.
pub fn validate_name(raw: &str) -> Option<String> {
    let name = raw.trim();
    if name.is_empty()
        || name.chars().count() > MAX_NAME_LENGTH
        || name.chars().any(char::is_control)
    {
        return None;
    }
    Some(name.to_string())
}
