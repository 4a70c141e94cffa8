use std::time::Duration;

use tokio::time::Instant;

use scrawl_core::room::{self, Phase};

/// The kinds of timer a room can hold, at most one deadline each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Lobby: the 3-second pre-game countdown.
    StartCountdown,
    /// Choosing: forces the first offered word.
    AutoPick,
    /// Drawing: the 1-second clock driving time updates and hints.
    Tick,
    /// Drawing: the short settle after the last guesser succeeds.
    GuessSettle,
    /// Round end: the delay before the next turn begins.
    TurnAdvance,
    /// Any phase: evicts the room once nobody has been connected for the
    /// grace period. Housekeeping, not gameplay.
    Cleanup,
}

impl TimerKind {
    /// Gameplay kinds legal in a phase. `Cleanup` is always legal.
    fn legal_in(self, phase: Phase) -> bool {
        match self {
            Self::Cleanup => true,
            Self::StartCountdown => phase == Phase::Lobby,
            Self::AutoPick => phase == Phase::Choosing,
            Self::Tick | Self::GuessSettle => phase == Phase::Drawing,
            Self::TurnAdvance => phase == Phase::RoundEnd,
        }
    }
}

/// Gameplay timer durations for one room.
#[derive(Debug, Clone, Copy)]
pub struct GameTiming {
    pub start_countdown: Duration,
    pub auto_pick: Duration,
    pub turn_end_delay: Duration,
    pub guess_settle: Duration,
    pub tick: Duration,
    pub empty_room_grace: Duration,
}

impl Default for GameTiming {
    fn default() -> Self {
        Self {
            start_countdown: room::START_COUNTDOWN,
            auto_pick: room::AUTO_PICK_TIMEOUT,
            turn_end_delay: room::TURN_END_DELAY,
            guess_settle: room::GUESS_SETTLE_DELAY,
            tick: Duration::from_secs(1),
            empty_room_grace: room::EMPTY_ROOM_GRACE,
        }
    }
}

/// The room's pending deadlines. Setting a kind replaces its previous
/// deadline; transitions cancel the kinds illegal in the destination phase.
#[derive(Debug, Default)]
pub struct TimerSet {
    deadlines: Vec<(TimerKind, Instant)>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire after `delay`, replacing any previous deadline of
    /// the same kind.
    pub fn set(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        self.deadlines.push((kind, Instant::now() + delay));
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines.retain(|(k, _)| *k != kind);
    }

    pub fn is_set(&self, kind: TimerKind) -> bool {
        self.deadlines.iter().any(|(k, _)| *k == kind)
    }

    /// The earliest pending deadline.
    pub fn next_due(&self) -> Option<(TimerKind, Instant)> {
        self.deadlines.iter().min_by_key(|(_, at)| *at).copied()
    }

    /// Cancel every gameplay timer that is illegal in `phase`.
    pub fn retain_legal(&mut self, phase: Phase) {
        self.deadlines.retain(|(k, _)| k.legal_in(phase));
    }

    /// True when no gameplay timer is armed (the cleanup timer may be).
    pub fn gameplay_idle(&self) -> bool {
        self.deadlines
            .iter()
            .all(|(k, _)| *k == TimerKind::Cleanup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_same_kind() {
        let mut timers = TimerSet::new();
        timers.set(TimerKind::Tick, Duration::from_secs(10));
        timers.set(TimerKind::Tick, Duration::from_secs(1));
        let (kind, at) = timers.next_due().unwrap();
        assert_eq!(kind, TimerKind::Tick);
        assert!(at <= Instant::now() + Duration::from_secs(1));
        assert!(timers.is_set(TimerKind::Tick));
    }

    #[test]
    fn next_due_returns_earliest() {
        let mut timers = TimerSet::new();
        timers.set(TimerKind::TurnAdvance, Duration::from_secs(5));
        timers.set(TimerKind::Cleanup, Duration::from_secs(120));
        timers.set(TimerKind::Tick, Duration::from_secs(1));
        assert_eq!(timers.next_due().unwrap().0, TimerKind::Tick);
        timers.cancel(TimerKind::Tick);
        assert_eq!(timers.next_due().unwrap().0, TimerKind::TurnAdvance);
    }

    #[test]
    fn transition_cancels_illegal_kinds() {
        let mut timers = TimerSet::new();
        timers.set(TimerKind::Tick, Duration::from_secs(1));
        timers.set(TimerKind::GuessSettle, Duration::from_secs(1));
        timers.set(TimerKind::Cleanup, Duration::from_secs(120));
        timers.retain_legal(Phase::RoundEnd);
        assert!(!timers.is_set(TimerKind::Tick));
        assert!(!timers.is_set(TimerKind::GuessSettle));
        // cleanup survives every transition
        assert!(timers.is_set(TimerKind::Cleanup));
    }

    #[test]
    fn game_end_leaves_no_gameplay_timers() {
        let mut timers = TimerSet::new();
        timers.set(TimerKind::StartCountdown, Duration::from_secs(3));
        timers.set(TimerKind::AutoPick, Duration::from_secs(15));
        timers.set(TimerKind::Tick, Duration::from_secs(1));
        timers.set(TimerKind::TurnAdvance, Duration::from_secs(5));
        timers.set(TimerKind::Cleanup, Duration::from_secs(120));
        timers.retain_legal(Phase::GameEnd);
        assert!(timers.gameplay_idle());
        assert!(timers.is_set(TimerKind::Cleanup));
    }

    #[test]
    fn empty_set_has_no_deadline() {
        let timers = TimerSet::new();
        assert!(timers.next_due().is_none());
        assert!(timers.gameplay_idle());
    }
}
