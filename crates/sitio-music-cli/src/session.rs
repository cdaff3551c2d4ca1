//! A scripted memory-game session driving the music engine.
//!
//! The CLI stands in for the game UI: it replays a sequence of game events
//! and reacts to each the way the game does (streaks speed the music up,
//! a miss calms it down, the last pair builds tension, a win plays the
//! fanfare).

use sitio_music_core::{
    Difficulty, MusicEngine, MusicStateName, PlaybackContext, SoundEffect, ToneBackend,
};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Consecutive matches before the music switches to action.
pub const ACTION_STREAK: u32 = 3;

/// Pump interval for simulated time.
const PUMP_STEP: Duration = Duration::from_millis(50);

/// Something the player did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameEvent {
    Flip,
    Match,
    Miss,
    Achievement,
    ToggleMusic,
    /// Shuffle and start over.
    Reset,
    /// Nothing happens for one step.
    Wait,
}

impl GameEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            GameEvent::Flip => "flip",
            GameEvent::Match => "match",
            GameEvent::Miss => "miss",
            GameEvent::Achievement => "achievement",
            GameEvent::ToggleMusic => "toggle",
            GameEvent::Reset => "reset",
            GameEvent::Wait => "wait",
        }
    }

    /// A plausible game: a few matches, one miss, then a streak to the win.
    pub fn default_script(pairs: u32) -> Vec<GameEvent> {
        let mut script = Vec::new();
        for i in 0..pairs {
            if i == 1 {
                script.extend([GameEvent::Flip, GameEvent::Flip, GameEvent::Miss]);
            }
            script.extend([GameEvent::Flip, GameEvent::Flip, GameEvent::Match]);
            if i == 2 {
                script.push(GameEvent::Achievement);
            }
        }
        script.push(GameEvent::Wait);
        script
    }

    /// Parse a whitespace or comma separated list of events.
    pub fn parse_script(text: &str) -> Result<Vec<GameEvent>, String> {
        text.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for GameEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "flip" => Ok(GameEvent::Flip),
            "match" => Ok(GameEvent::Match),
            "miss" | "mismatch" => Ok(GameEvent::Miss),
            "achievement" => Ok(GameEvent::Achievement),
            "toggle" => Ok(GameEvent::ToggleMusic),
            "reset" => Ok(GameEvent::Reset),
            "wait" => Ok(GameEvent::Wait),
            other => Err(format!("unknown game event '{}'", other)),
        }
    }
}

impl fmt::Display for GameEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game bookkeeping that decides which music state to request.
#[derive(Debug, Clone)]
pub struct GameSession {
    pairs: u32,
    pairs_left: u32,
    streak: u32,
    difficulty: Difficulty,
}

impl GameSession {
    pub fn new(pairs: u32, difficulty: Difficulty) -> Self {
        let pairs = pairs.max(1);
        Self {
            pairs,
            pairs_left: pairs,
            streak: 0,
            difficulty,
        }
    }

    pub fn pairs_left(&self) -> u32 {
        self.pairs_left
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    pub fn is_won(&self) -> bool {
        self.pairs_left == 0
    }

    fn context(&self) -> PlaybackContext {
        PlaybackContext::default().with_difficulty(self.difficulty)
    }

    /// The board is dealt: exploration music with the motif on top.
    pub fn begin<B: ToneBackend>(&mut self, engine: &mut MusicEngine<B>, now: Instant) {
        engine.play_theme_snippet(now);
        engine.start(MusicStateName::Exploration, &self.context(), now);
        engine.play_melody_motif(now);
    }

    /// React to one game event.
    pub fn apply<B: ToneBackend>(
        &mut self,
        event: GameEvent,
        engine: &mut MusicEngine<B>,
        now: Instant,
    ) {
        log::debug!(
            "[SESSION] {} (pairs left {}, streak {})",
            event,
            self.pairs_left,
            self.streak
        );
        match event {
            GameEvent::Flip => {
                engine.play_effect(SoundEffect::Flip, now);
            }
            GameEvent::Match => {
                if self.is_won() {
                    log::warn!("[SESSION] Match after the game was won, ignoring");
                    return;
                }
                self.pairs_left -= 1;
                self.streak += 1;
                engine.play_effect(SoundEffect::Match, now);

                if self.is_won() {
                    engine.play_effect(SoundEffect::Complete, now);
                    engine.start(MusicStateName::Victory, &self.context(), now);
                    engine.play_victory_melody(now);
                } else if self.pairs_left == 1 {
                    engine.start(MusicStateName::Tension, &self.context(), now);
                } else if self.streak >= ACTION_STREAK {
                    let context = self.context().with_streak(self.streak);
                    engine.start(MusicStateName::Action, &context, now);
                }
            }
            GameEvent::Miss => {
                self.streak = 0;
                engine.play_effect(SoundEffect::Miss, now);
                if !self.is_won() && self.pairs_left > 1 {
                    engine.start(MusicStateName::Puzzle, &self.context(), now);
                }
            }
            GameEvent::Achievement => {
                engine.play_effect(SoundEffect::Achievement, now);
            }
            GameEvent::ToggleMusic => {
                let enabled = !engine.music_enabled();
                engine.set_music_enabled(enabled, now);
                if enabled && !self.is_won() {
                    engine.start(MusicStateName::Exploration, &self.context(), now);
                }
            }
            GameEvent::Reset => {
                self.pairs_left = self.pairs;
                self.streak = 0;
                engine.start(MusicStateName::Reset, &self.context(), now);
            }
            GameEvent::Wait => {}
        }
    }
}

/// Pump the engine in simulated time from `from` for `seconds`.
pub fn advance<B: ToneBackend>(
    engine: &mut MusicEngine<B>,
    from: Instant,
    seconds: f64,
) -> Instant {
    let end = from + Duration::from_secs_f64(seconds.max(0.0));
    let mut now = from;
    while now < end {
        now = (now + PUMP_STEP).min(end);
        engine.pump(now);
    }
    now
}

/// Replay a whole script in simulated time, `step_seconds` between events,
/// then let the music run for `tail_seconds`. Returns the final instant.
pub fn run_script<B: ToneBackend>(
    engine: &mut MusicEngine<B>,
    session: &mut GameSession,
    script: &[GameEvent],
    start: Instant,
    step_seconds: f64,
    tail_seconds: f64,
) -> Instant {
    session.begin(engine, start);
    let mut now = start;
    for &event in script {
        now = advance(engine, now, step_seconds);
        session.apply(event, engine, now);
    }
    advance(engine, now, tail_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitio_music_core::{BackendCall, EngineConfig, EngineEvent, LoopKind, MemoryBackend};

    fn engine() -> MusicEngine<MemoryBackend> {
        MusicEngine::new(MemoryBackend::new(), EngineConfig::default())
    }

    fn state_changes(rx: &crossbeam_channel::Receiver<EngineEvent>) -> Vec<MusicStateName> {
        rx.try_iter()
            .filter_map(|e| match e {
                EngineEvent::StateChanged { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_parse_script() {
        let script = GameEvent::parse_script("flip, flip match\nmismatch toggle").unwrap();
        assert_eq!(
            script,
            vec![
                GameEvent::Flip,
                GameEvent::Flip,
                GameEvent::Match,
                GameEvent::Miss,
                GameEvent::ToggleMusic
            ]
        );
        assert!(GameEvent::parse_script("flip jump").is_err());
        assert!(GameEvent::parse_script("").unwrap().is_empty());
    }

    #[test]
    fn test_default_script_wins() {
        let script = GameEvent::default_script(6);
        let matches = script.iter().filter(|e| **e == GameEvent::Match).count();
        assert_eq!(matches, 6);
    }

    #[test]
    fn test_game_flow_moods() {
        let t0 = Instant::now();
        let mut engine = engine();
        let rx = engine.subscribe();
        let mut session = GameSession::new(6, Difficulty::Medium);
        let script =
            GameEvent::parse_script("match miss match match match match match").unwrap();
        run_script(&mut engine, &mut session, &script, t0, 2.0, 1.0);

        assert!(session.is_won());
        assert_eq!(
            state_changes(&rx),
            vec![
                MusicStateName::Exploration,
                MusicStateName::Puzzle,
                MusicStateName::Action,
                MusicStateName::Tension,
                MusicStateName::Victory,
            ]
        );
        assert_eq!(engine.scheduler().count_of(LoopKind::Measure), 1);
    }

    #[test]
    fn test_streak_reaches_action_and_miss_resets() {
        let t0 = Instant::now();
        let mut engine = engine();
        let mut session = GameSession::new(8, Difficulty::Easy);
        session.begin(&mut engine, t0);
        for _ in 0..3 {
            session.apply(GameEvent::Match, &mut engine, t0);
        }
        assert_eq!(session.streak(), 3);
        let action = engine.current_state().unwrap();
        assert_eq!(action.name, MusicStateName::Action);
        // 112-124 averaged, plus six for the streak.
        assert_eq!(action.tempo, 124);

        session.apply(GameEvent::Miss, &mut engine, t0);
        assert_eq!(session.streak(), 0);
        assert_eq!(engine.current_state().unwrap().name, MusicStateName::Puzzle);
    }

    #[test]
    fn test_effects_follow_events() {
        let t0 = Instant::now();
        let mut engine = engine();
        let mut session = GameSession::new(3, Difficulty::Easy);
        session.apply(GameEvent::Flip, &mut engine, t0);
        session.apply(GameEvent::Achievement, &mut engine, t0);
        assert_eq!(engine.stats().effects_played, 2);
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_toggle_silences_and_restores() {
        let t0 = Instant::now();
        let mut engine = engine();
        let mut session = GameSession::new(4, Difficulty::Easy);
        session.begin(&mut engine, t0);

        session.apply(GameEvent::ToggleMusic, &mut engine, t0);
        assert!(!engine.is_playing());
        assert_eq!(engine.backend().count(&BackendCall::ReleaseAll), 1);
        let sent = engine.stats().notes_sent;
        session.apply(GameEvent::Match, &mut engine, t0);
        advance(&mut engine, t0, 2.0);
        assert_eq!(engine.stats().notes_sent, sent);

        session.apply(GameEvent::ToggleMusic, &mut engine, t0);
        assert!(engine.is_playing());
    }

    #[test]
    fn test_reset_restores_pairs() {
        let t0 = Instant::now();
        let mut engine = engine();
        let mut session = GameSession::new(2, Difficulty::Hard);
        session.apply(GameEvent::Match, &mut engine, t0);
        session.apply(GameEvent::Match, &mut engine, t0);
        assert!(session.is_won());
        session.apply(GameEvent::Reset, &mut engine, t0);
        assert_eq!(session.pairs_left(), 2);
        assert_eq!(engine.current_state().unwrap().name, MusicStateName::Reset);
    }
}
