use rand::Rng;
use uuid::Uuid;

/// Opaque identifier for a player.
pub type PlayerId = Uuid;

/// Opaque identifier for a room. Rooms are addressed externally by their
/// short code and internally by this id.
pub type RoomId = Uuid;

/// Opaque identifier for one transport session. A player's session changes
/// across reconnects; the player id does not.
pub type SessionId = Uuid;

pub fn new_player_id() -> PlayerId {
    Uuid::new_v4()
}

pub fn new_room_id() -> RoomId {
    Uuid::new_v4()
}

pub fn new_session_id() -> SessionId {
    Uuid::new_v4()
}

/// Alphabet for room codes. 0/O/1/I are excluded so codes survive being
/// read aloud or scribbled on a whiteboard.
pub const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const ROOM_CODE_LENGTH: usize = 6;

/// Generate a random room code from the unambiguous alphabet.
pub fn generate_room_code() -> String {
    generate_room_code_with(&mut rand::rng())
}

/// Generate a room code using the given RNG (deterministic in tests).
pub fn generate_room_code_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..ROOM_CODE_LENGTH)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Upper-case and trim a client-supplied room code before lookup.
pub fn normalize_room_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Validates that a room code is 6 characters from the code alphabet.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LENGTH
        && code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b))
}
