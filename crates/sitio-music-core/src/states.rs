//! The static music state table.
//!
//! Each gameplay situation maps to exactly one [`MusicState`]: a tempo range,
//! the instrument layers that play, a chord progression cycled once per
//! measure, a feel tag that selects rhythmic variants, and a swing amount.

use crate::theory::ChordDegree;
use std::fmt;
use std::str::FromStr;

/// Named game situations the host can request music for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MusicStateName {
    Exploration,
    Puzzle,
    Action,
    Victory,
    Tension,
    Reset,
}

impl MusicStateName {
    pub const ALL: [MusicStateName; 6] = [
        MusicStateName::Exploration,
        MusicStateName::Puzzle,
        MusicStateName::Action,
        MusicStateName::Victory,
        MusicStateName::Tension,
        MusicStateName::Reset,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MusicStateName::Exploration => "exploration",
            MusicStateName::Puzzle => "puzzle",
            MusicStateName::Action => "action",
            MusicStateName::Victory => "victory",
            MusicStateName::Tension => "tension",
            MusicStateName::Reset => "reset",
        }
    }

    /// Parse a state name, falling back to `Exploration` for anything unknown.
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_else(|_| {
            log::warn!("[STATES] Unknown music state '{}', using exploration", name);
            MusicStateName::Exploration
        })
    }
}

impl FromStr for MusicStateName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        MusicStateName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == wanted)
            .ok_or_else(|| format!("unknown music state '{}'", s))
    }
}

impl fmt::Display for MusicStateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrument layers of the accompaniment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Layer {
    /// Viola caipira strumming the chords.
    Viola,
    Bass,
    /// Pandeiro.
    Percussion,
    /// Triangulo, the metallic accent.
    Triangle,
    Flute,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::Viola,
        Layer::Bass,
        Layer::Percussion,
        Layer::Triangle,
        Layer::Flute,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Layer::Viola => "viola",
            Layer::Bass => "bass",
            Layer::Percussion => "pandeiro",
            Layer::Triangle => "triangulo",
            Layer::Flute => "flute",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rhythmic feel of a state; selects pattern variants in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feel {
    Toada,
    Moda,
    Baiao,
    Festa,
    Suspense,
    Renovacao,
}

impl Feel {
    pub fn as_str(self) -> &'static str {
        match self {
            Feel::Toada => "toada",
            Feel::Moda => "moda",
            Feel::Baiao => "baiao",
            Feel::Festa => "festa",
            Feel::Suspense => "suspense",
            Feel::Renovacao => "renovacao",
        }
    }

    /// Feels that use the intensified percussion and bass patterns.
    pub fn is_intense(self) -> bool {
        matches!(self, Feel::Baiao | Feel::Festa)
    }
}

impl fmt::Display for Feel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the state table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MusicState {
    pub name: MusicStateName,
    /// Lower/upper BPM bound before context adjustment.
    pub tempo_range: (u32, u32),
    pub layers: &'static [Layer],
    pub progression: &'static [ChordDegree],
    pub feel: Feel,
    /// Off-beat timing offset, 0.0..=0.25.
    pub swing: f64,
}

impl MusicState {
    /// Look up the table entry for a state.
    pub fn lookup(name: MusicStateName) -> &'static MusicState {
        use ChordDegree::*;
        use Layer::*;

        static EXPLORATION: MusicState = MusicState {
            name: MusicStateName::Exploration,
            tempo_range: (92, 100),
            layers: &[Viola, Bass, Flute],
            progression: &[I, Vi, Iv, V],
            feel: Feel::Toada,
            swing: 0.08,
        };
        static PUZZLE: MusicState = MusicState {
            name: MusicStateName::Puzzle,
            tempo_range: (80, 88),
            layers: &[Viola, Bass],
            progression: &[Vi, Iv, I, V],
            feel: Feel::Moda,
            swing: 0.05,
        };
        static ACTION: MusicState = MusicState {
            name: MusicStateName::Action,
            tempo_range: (112, 124),
            layers: &[Viola, Bass, Percussion],
            progression: &[I, V, Vi, Iv],
            feel: Feel::Baiao,
            swing: 0.15,
        };
        static VICTORY: MusicState = MusicState {
            name: MusicStateName::Victory,
            tempo_range: (120, 132),
            layers: &[Viola, Bass, Percussion, Triangle, Flute],
            progression: &[I, Iv, V7, I],
            feel: Feel::Festa,
            swing: 0.20,
        };
        static TENSION: MusicState = MusicState {
            name: MusicStateName::Tension,
            tempo_range: (96, 104),
            layers: &[Viola, Bass, Percussion],
            progression: &[Vi, VOfVi, Vi, FlatVii],
            feel: Feel::Suspense,
            swing: 0.0,
        };
        static RESET: MusicState = MusicState {
            name: MusicStateName::Reset,
            tempo_range: (84, 92),
            layers: &[Viola, Flute],
            progression: &[IvMaj7, I, V7, IMaj7],
            feel: Feel::Renovacao,
            swing: 0.10,
        };

        match name {
            MusicStateName::Exploration => &EXPLORATION,
            MusicStateName::Puzzle => &PUZZLE,
            MusicStateName::Action => &ACTION,
            MusicStateName::Victory => &VICTORY,
            MusicStateName::Tension => &TENSION,
            MusicStateName::Reset => &RESET,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_invariants() {
        for name in MusicStateName::ALL {
            let state = MusicState::lookup(name);
            assert_eq!(state.name, name);
            assert!(!state.layers.is_empty(), "{name} has no layers");
            assert!(!state.progression.is_empty(), "{name} has no progression");
            assert!(state.tempo_range.0 <= state.tempo_range.1);
            assert!((0.0..=0.25).contains(&state.swing));
        }
    }

    #[test]
    fn test_state_names_parse() {
        assert_eq!("victory".parse::<MusicStateName>(), Ok(MusicStateName::Victory));
        assert_eq!(" Tension ".parse::<MusicStateName>(), Ok(MusicStateName::Tension));
        assert!("bogus-state".parse::<MusicStateName>().is_err());
        assert_eq!(
            MusicStateName::parse_or_default("bogus-state"),
            MusicStateName::Exploration
        );
    }

    #[test]
    fn test_feels_are_distinct_per_state() {
        let feels: std::collections::HashSet<Feel> = MusicStateName::ALL
            .iter()
            .map(|name| MusicState::lookup(*name).feel)
            .collect();
        assert_eq!(feels.len(), 6);
    }
}
