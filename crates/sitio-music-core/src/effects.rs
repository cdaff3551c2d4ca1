//! Short game sound effects and the theme snippet.
//!
//! These play immediately on their own voice, outside the loop scheduler.

use crate::events::NoteSource;
use crate::instruments::SampledInstrument;
use crate::states::Layer;
use crate::theory::Pitch;
use std::fmt;
use std::str::FromStr;

/// Feedback sounds for card game events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundEffect {
    Flip,
    Match,
    Miss,
    Complete,
    Achievement,
}

impl SoundEffect {
    pub const ALL: [SoundEffect; 5] = [
        SoundEffect::Flip,
        SoundEffect::Match,
        SoundEffect::Miss,
        SoundEffect::Complete,
        SoundEffect::Achievement,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SoundEffect::Flip => "flip",
            SoundEffect::Match => "match",
            SoundEffect::Miss => "miss",
            SoundEffect::Complete => "complete",
            SoundEffect::Achievement => "achievement",
        }
    }

    pub fn note_names(self) -> &'static [&'static str] {
        match self {
            SoundEffect::Flip => &["C5"],
            SoundEffect::Match => &["C5", "E5", "G5"],
            SoundEffect::Miss => &["C3"],
            SoundEffect::Complete => &["C5", "E5", "G5", "C6"],
            SoundEffect::Achievement => &["F5", "A5", "C6"],
        }
    }

    pub fn pitches(self) -> Vec<Pitch> {
        self.note_names()
            .iter()
            .filter_map(|name| Pitch::parse(name))
            .collect()
    }

    /// Length in beats: sixteenth, eighth, quarter or half note.
    pub fn duration_beats(self) -> f64 {
        match self {
            SoundEffect::Flip => 0.25,
            SoundEffect::Match => 0.5,
            SoundEffect::Miss | SoundEffect::Achievement => 1.0,
            SoundEffect::Complete => 2.0,
        }
    }

    /// Misses thud on the bass; everything else chimes on the viola voice.
    pub fn layer(self) -> Layer {
        match self {
            SoundEffect::Miss => Layer::Bass,
            _ => Layer::Viola,
        }
    }
}

impl FromStr for SoundEffect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        SoundEffect::ALL
            .iter()
            .copied()
            .find(|effect| effect.as_str() == wanted)
            .ok_or_else(|| format!("unknown sound effect '{}'", s))
    }
}

impl fmt::Display for SoundEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The opening theme, played as a quick arpeggio.
pub const THEME_NOTES: [&str; 8] = ["C4", "E4", "G4", "C5", "B4", "G4", "E4", "C4"];

/// Seconds between theme notes.
pub const THEME_SPACING_SECS: f64 = 0.2;

/// Seconds each theme note sounds.
pub const THEME_NOTE_SECS: f64 = 0.3;

/// The theme prefers the sampled guitar and falls back to the viola synth.
pub const THEME_SOURCE: NoteSource = NoteSource::Lead(SampledInstrument::Guitar);

pub fn theme_pitches() -> Vec<Pitch> {
    THEME_NOTES.iter().filter_map(|name| Pitch::parse(name)).collect()
}
