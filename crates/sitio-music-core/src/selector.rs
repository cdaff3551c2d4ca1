//! State selection: table lookup plus context adjustments.
//!
//! [`resolve`] is the pure part (lookup, difficulty and streak bumps).
//! [`StateSelector`] commits a resolved state to the transport and is the
//! only writer of tempo and swing.

use crate::states::{Feel, Layer, MusicState, MusicStateName};
use crate::theory::ChordDegree;
use crate::timing::TransportClock;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Largest tempo bonus a streak can earn.
pub const MAX_STREAK_BONUS: u32 = 15;

/// Game difficulty chosen by the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// BPM added to the lower/upper tempo bounds.
    pub fn tempo_bump(self) -> (u32, u32) {
        match self {
            Difficulty::Easy => (0, 0),
            Difficulty::Medium => (3, 5),
            Difficulty::Hard => (8, 12),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            other => Err(format!("unknown difficulty '{}'", other)),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call context supplied by the game host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackContext {
    pub difficulty: Option<Difficulty>,
    pub streak: Option<u32>,
}

impl PlaybackContext {
    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_streak(mut self, streak: u32) -> Self {
        self.streak = Some(streak);
        self
    }
}

/// Streak tempo bonus: two BPM per consecutive match, capped.
pub fn streak_bonus(streak: u32) -> u32 {
    streak.saturating_mul(2).min(MAX_STREAK_BONUS)
}

/// The parameter bundle the scheduler plays from.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedState {
    pub name: MusicStateName,
    /// Tempo range after difficulty and streak adjustments.
    pub tempo_range: (u32, u32),
    /// Rounded average of `tempo_range`.
    pub tempo: u32,
    /// Seconds the transport takes to reach `tempo`.
    pub ramp_seconds: f64,
    pub layers: Vec<Layer>,
    pub progression: Vec<ChordDegree>,
    pub feel: Feel,
    pub swing: f64,
}

impl ResolvedState {
    pub fn has_layer(&self, layer: Layer) -> bool {
        self.layers.contains(&layer)
    }

    /// Chord for a zero-based measure index; the progression cycles.
    pub fn chord_for_measure(&self, measure: u64) -> ChordDegree {
        self.progression[(measure % self.progression.len() as u64) as usize]
    }
}

/// Resolve a state against the table and apply context adjustments.
pub fn resolve(name: MusicStateName, context: &PlaybackContext) -> ResolvedState {
    let base = MusicState::lookup(name);
    let (mut low, mut high) = base.tempo_range;
    let mut layers = base.layers.to_vec();

    if let Some(difficulty) = context.difficulty {
        let (bump_low, bump_high) = difficulty.tempo_bump();
        low += bump_low;
        high += bump_high;
        if difficulty == Difficulty::Hard && layers.len() < 4 && !layers.contains(&Layer::Triangle) {
            layers.push(Layer::Triangle);
        }
    }

    if let Some(streak) = context.streak {
        let bonus = streak_bonus(streak);
        low += bonus;
        high += bonus;
    }

    let tempo = ((low + high) as f64 / 2.0).round() as u32;
    let ramp_seconds = if name == MusicStateName::Victory { 2.0 } else { 1.0 };

    ResolvedState {
        name,
        tempo_range: (low, high),
        tempo,
        ramp_seconds,
        layers,
        progression: base.progression.to_vec(),
        feel: base.feel,
        swing: base.swing,
    }
}

/// Resolve a state given by name; unknown names play exploration.
pub fn resolve_named(name: &str, context: &PlaybackContext) -> ResolvedState {
    resolve(MusicStateName::parse_or_default(name), context)
}

/// Commits resolved states to the transport clock.
#[derive(Debug, Default)]
pub struct StateSelector {
    current: Option<ResolvedState>,
}

impl StateSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name`, ramp the transport to its tempo and set its swing.
    pub fn pick_state(
        &mut self,
        name: MusicStateName,
        context: &PlaybackContext,
        transport: &mut TransportClock,
        now: Instant,
    ) -> ResolvedState {
        let resolved = resolve(name, context);
        transport.ramp_bpm(resolved.tempo as f64, resolved.ramp_seconds, now);
        transport.set_swing(resolved.swing);
        log::info!(
            "[SELECTOR] {} -> {} BPM (range {}-{}, ramp {:.1}s), feel {}, swing {:.2}, layers [{}]",
            resolved.name,
            resolved.tempo,
            resolved.tempo_range.0,
            resolved.tempo_range.1,
            resolved.ramp_seconds,
            resolved.feel,
            resolved.swing,
            resolved
                .layers
                .iter()
                .map(|l| l.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.current = Some(resolved.clone());
        resolved
    }

    /// Shift the transport around the committed tempo (melody phrase changer).
    pub fn nudge_tempo(&self, delta_bpm: f64, transport: &mut TransportClock, now: Instant) {
        let base = self
            .current
            .as_ref()
            .map(|state| state.tempo as f64)
            .unwrap_or_else(|| transport.bpm());
        log::debug!("[SELECTOR] Phrase nudge {:+.1} BPM around {}", delta_bpm, base);
        transport.ramp_bpm(base + delta_bpm, 1.0, now);
    }

    /// Clear swing; called when playback stops.
    pub fn reset_swing(&self, transport: &mut TransportClock) {
        transport.set_swing(0.0);
    }

    /// The last committed state.
    pub fn current(&self) -> Option<&ResolvedState> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(name: MusicStateName) -> ResolvedState {
        resolve(name, &PlaybackContext::default())
    }

    #[test]
    fn test_every_state_resolves_to_playable_bundle() {
        for name in MusicStateName::ALL {
            let state = plain(name);
            assert!(!state.layers.is_empty());
            assert!(!state.progression.is_empty());
        }
    }

    #[test]
    fn test_unknown_state_behaves_like_exploration() {
        let ctx = PlaybackContext::default();
        assert_eq!(
            resolve_named("bogus-state", &ctx),
            resolve(MusicStateName::Exploration, &ctx)
        );
    }

    #[test]
    fn test_hard_difficulty_raises_tempo_bounds() {
        for name in MusicStateName::ALL {
            let base = plain(name);
            let hard = resolve(name, &PlaybackContext::default().with_difficulty(Difficulty::Hard));
            assert!(hard.tempo_range.0 >= base.tempo_range.0 + 8);
            assert!(hard.tempo_range.1 >= base.tempo_range.1 + 12);
        }
    }

    #[test]
    fn test_hard_appends_triangle_only_to_small_ensembles() {
        let hard = PlaybackContext::default().with_difficulty(Difficulty::Hard);

        let puzzle = resolve(MusicStateName::Puzzle, &hard);
        assert_eq!(puzzle.layers.last(), Some(&Layer::Triangle));

        let victory = resolve(MusicStateName::Victory, &hard);
        assert_eq!(victory.layers, plain(MusicStateName::Victory).layers);
    }

    #[test]
    fn test_medium_and_easy_bumps() {
        let base = plain(MusicStateName::Action);
        let medium = resolve(
            MusicStateName::Action,
            &PlaybackContext::default().with_difficulty(Difficulty::Medium),
        );
        let easy = resolve(
            MusicStateName::Action,
            &PlaybackContext::default().with_difficulty(Difficulty::Easy),
        );
        assert_eq!(medium.tempo_range, (base.tempo_range.0 + 3, base.tempo_range.1 + 5));
        assert_eq!(easy, base);
    }

    #[test]
    fn test_streak_bonus_is_exact_and_capped() {
        for name in MusicStateName::ALL {
            let base = plain(name);
            let ten = resolve(name, &PlaybackContext::default().with_streak(10));
            assert_eq!(ten.tempo_range, (base.tempo_range.0 + 15, base.tempo_range.1 + 15));

            let hundred = resolve(name, &PlaybackContext::default().with_streak(100));
            assert_eq!(hundred.tempo_range, ten.tempo_range);
        }
        assert_eq!(streak_bonus(3), 6);
        assert_eq!(streak_bonus(u32::MAX), MAX_STREAK_BONUS);
    }

    #[test]
    fn test_streak_stacks_on_difficulty() {
        let ctx = PlaybackContext::default()
            .with_difficulty(Difficulty::Hard)
            .with_streak(2);
        let state = resolve(MusicStateName::Exploration, &ctx);
        assert_eq!(state.tempo_range, (92 + 8 + 4, 100 + 12 + 4));
        assert_eq!(state.tempo, 110);
    }

    #[test]
    fn test_pick_state_commits_tempo_and_swing() {
        let now = Instant::now();
        let mut transport = TransportClock::new();
        let mut selector = StateSelector::new();

        let victory = selector.pick_state(
            MusicStateName::Victory,
            &PlaybackContext::default(),
            &mut transport,
            now,
        );
        assert_eq!(victory.ramp_seconds, 2.0);
        assert_eq!(transport.bpm(), 126.0);
        assert!((transport.swing() - 0.20).abs() < 1e-9);

        let puzzle = selector.pick_state(
            MusicStateName::Puzzle,
            &PlaybackContext::default(),
            &mut transport,
            now,
        );
        assert_eq!(puzzle.ramp_seconds, 1.0);
        assert_eq!(transport.bpm(), 84.0);
        assert_eq!(selector.current().map(|s| s.name), Some(MusicStateName::Puzzle));
    }

    #[test]
    fn test_chord_for_measure_cycles() {
        let state = plain(MusicStateName::Exploration);
        assert_eq!(state.chord_for_measure(0), ChordDegree::I);
        assert_eq!(state.chord_for_measure(1), ChordDegree::Vi);
        assert_eq!(state.chord_for_measure(4), ChordDegree::I);
    }
}
