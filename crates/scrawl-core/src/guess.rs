//! Guess arbitration: comparing a chat line to the current word, and the
//! scoring policy for correct guesses.

/// Base points for a correct guess.
pub const BASE_POINTS: u32 = 100;

/// Points the drawer earns per distinct correct guesser per turn.
pub const DRAWER_POINTS: u32 = 25;

/// How a chat line relates to the current word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuessOutcome {
    Correct,
    Close,
    Miss,
}

/// Compare a chat line to the word. Both sides are trimmed and
/// lower-cased; diacritics are not folded.
pub fn evaluate(text: &str, word: &str) -> GuessOutcome {
    let g = text.trim().to_lowercase();
    let w = word.trim().to_lowercase();
    if g == w {
        return GuessOutcome::Correct;
    }
    if is_close(&g, &w) {
        return GuessOutcome::Close;
    }
    GuessOutcome::Miss
}

/// Close-guess heuristic: within one character in length with at most two
/// positional mismatches, or substring containment either way at length 3+.
fn is_close(g: &str, w: &str) -> bool {
    let gc: Vec<char> = g.chars().collect();
    let wc: Vec<char> = w.chars().collect();
    if gc.is_empty() {
        return false;
    }

    let len_diff = gc.len().abs_diff(wc.len());
    if len_diff <= 1 {
        let mismatches = gc.iter().zip(wc.iter()).filter(|(a, b)| a != b).count();
        if mismatches <= 2 {
            return true;
        }
    }

    gc.len() >= 3 && (w.contains(g) || g.contains(w))
}

/// Points for a correct guesser.
///
/// `arrival_index` is the guesser's 1-based position among this turn's
/// correct guessers, counted after they are added to the set.
pub fn guesser_points(time_left: u32, draw_time: u32, arrival_index: usize) -> u32 {
    let time_bonus = if draw_time == 0 {
        0
    } else {
        time_left * BASE_POINTS / draw_time
    };
    let order_bonus = BASE_POINTS.saturating_sub(arrival_index as u32 * 20);
    BASE_POINTS + time_bonus + order_bonus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_is_correct() {
        assert_eq!(evaluate("chat", "chat"), GuessOutcome::Correct);
    }

    #[test]
    fn match_is_case_insensitive_and_trimmed() {
        assert_eq!(evaluate("  ChAt ", "chat"), GuessOutcome::Correct);
        assert_eq!(evaluate("CHAT", "Chat"), GuessOutcome::Correct);
    }

    #[test]
    fn one_letter_off_is_close() {
        // length 4 vs 5, one positional mismatch
        assert_eq!(evaluate("pome", "pomme"), GuessOutcome::Close);
        // same length, two mismatches
        assert_eq!(evaluate("harse", "horse"), GuessOutcome::Close);
        assert_eq!(evaluate("hanse", "horse"), GuessOutcome::Close);
        // three mismatches is a miss
        assert_eq!(evaluate("hanue", "horse"), GuessOutcome::Miss);
    }

    #[test]
    fn substring_containment_is_close() {
        assert_eq!(evaluate("berg", "iceberg"), GuessOutcome::Close);
        assert_eq!(evaluate("icebergs", "iceberg"), GuessOutcome::Close);
        // shorter than 3 characters never counts
        assert_eq!(evaluate("ic", "iceberg"), GuessOutcome::Miss);
    }

    #[test]
    fn unrelated_word_is_miss() {
        assert_eq!(evaluate("banana", "horse"), GuessOutcome::Miss);
        assert_eq!(evaluate("", "horse"), GuessOutcome::Miss);
    }

    #[test]
    fn diacritics_are_not_folded() {
        assert_ne!(evaluate("cafe", "café"), GuessOutcome::Correct);
    }

    #[test]
    fn scoring_matches_formula() {
        // 100 + floor(25/30*100) + (100 - 1*20) = 100 + 83 + 80
        assert_eq!(guesser_points(25, 30, 1), 263);
        // second guesser, full time bonus
        assert_eq!(guesser_points(30, 30, 2), 100 + 100 + 60);
        // order bonus floors at zero from the sixth guesser on
        assert_eq!(guesser_points(0, 80, 6), 100);
        assert_eq!(guesser_points(0, 80, 9), 100);
    }
}
