pub mod codes;
pub mod guess;
pub mod net;
pub mod player;
pub mod room;
pub mod time;
pub mod words;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::codes::new_player_id;
    use crate::player::Player;

    /// Create `n` test players named Player1..PlayerN; the first is host.
    pub fn make_players(n: usize) -> Vec<Player> {
        (0..n)
            .map(|i| {
                let mut p = Player::new(new_player_id(), format!("Player{}", i + 1), None);
                p.is_host = i == 0;
                p
            })
            .collect()
    }
}
