//! Melody parts layered over the accompaniment: the looping motif and the
//! victory fanfare.

use crate::events::{NoteEvent, NoteSource};
use crate::instruments::SampledInstrument;
use crate::patterns::MEASURE_BEATS;
use crate::theory::Scale;

/// Scale degrees of the motif (1 = tonic, 8 = tonic an octave up).
pub const MOTIF_DEGREES: [u8; 15] = [1, 3, 5, 6, 5, 3, 1, 2, 3, 2, 1, 7, 1, 5, 1];

/// Beats per motif note; sums to four measures.
pub const MOTIF_DURATIONS: [f64; 15] = [
    1.0, 0.5, 0.5, 1.0, 1.0, 1.0, 2.0, 1.0, 0.5, 0.5, 1.0, 1.0, 1.0, 1.0, 3.0,
];

/// Beats in one motif cycle.
pub const MOTIF_CYCLE_BEATS: f64 = 16.0;

/// A phrase is eight measures.
pub const PHRASE_BEATS: f64 = 8.0 * MEASURE_BEATS;

/// The motif waits one measure before entering.
pub const MOTIF_LEAD_IN_BEATS: f64 = MEASURE_BEATS;

/// How one phrase colours the motif.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MelodyVariation {
    /// Shift in scale steps.
    pub transpose: i32,
    pub octave: i8,
    pub instrument: SampledInstrument,
}

pub const VARIATIONS: [MelodyVariation; 4] = [
    MelodyVariation {
        transpose: 0,
        octave: 4,
        instrument: SampledInstrument::Guitar,
    },
    MelodyVariation {
        transpose: 2,
        octave: 5,
        instrument: SampledInstrument::Flute,
    },
    MelodyVariation {
        transpose: 4,
        octave: 4,
        instrument: SampledInstrument::Harmonica,
    },
    MelodyVariation {
        transpose: -2,
        octave: 5,
        instrument: SampledInstrument::Accordion,
    },
];

/// Phrase index of a motif cycle.
pub fn phrase_of_cycle(cycle: u64) -> u64 {
    cycle * MOTIF_CYCLE_BEATS as u64 / PHRASE_BEATS as u64
}

pub fn variation_for_phrase(phrase: u64) -> MelodyVariation {
    VARIATIONS[(phrase % VARIATIONS.len() as u64) as usize]
}

/// Notes of one motif cycle.
pub fn motif_cycle_events(cycle: u64, scale: &Scale) -> Vec<NoteEvent> {
    let variation = variation_for_phrase(phrase_of_cycle(cycle));
    let mut beat = 0.0;
    let mut events = Vec::with_capacity(MOTIF_DEGREES.len());
    for (&degree, &duration) in MOTIF_DEGREES.iter().zip(&MOTIF_DURATIONS) {
        let pitch = scale.step_pitch(degree as i32 - 1 + variation.transpose, variation.octave);
        events.push(
            NoteEvent::new(beat, pitch, duration * 0.95, NoteSource::Lead(variation.instrument))
                .with_velocity(0.7),
        );
        beat += duration;
    }
    events
}

/// Tempo nudge of the phrase changer: every fourth phrase, 2 to 5 BPM.
pub fn phrase_nudge(phrase: u64) -> Option<f64> {
    (phrase % 4 == 3).then(|| 2.0 + 3.0 * (phrase as f64).sin().abs())
}

/// Scale degrees of the fanfare, shaped like a birthday song.
pub const VICTORY_DEGREES: [u8; 24] = [
    5, 5, 6, 5, 8, 7, //
    5, 5, 6, 5, 9, 8, //
    5, 5, 12, 10, 8, 7, //
    11, 11, 10, 8, 9, 8,
];

/// Dotted pickup, then quarters and a held note, for each of the four lines.
const VICTORY_LINE_RHYTHM: [f64; 6] = [0.75, 0.25, 1.0, 1.0, 1.0, 2.0];

/// The fanfare starts half a measure after it is requested.
pub const VICTORY_DELAY_BEATS: f64 = MEASURE_BEATS / 2.0;

/// The fanfare stops itself after eight measures.
pub const VICTORY_LENGTH_BEATS: f64 = 8.0 * MEASURE_BEATS;

const VICTORY_OCTAVE: i8 = 4;

/// The whole fanfare; each step is harmonized a third and a fifth above in the scale.
pub fn victory_events(scale: &Scale) -> Vec<NoteEvent> {
    let mut beat = 0.0;
    let mut events = Vec::with_capacity(VICTORY_DEGREES.len());
    for (i, &degree) in VICTORY_DEGREES.iter().enumerate() {
        let duration = VICTORY_LINE_RHYTHM[i % VICTORY_LINE_RHYTHM.len()];
        let step = degree as i32 - 1;
        let pitches = [step, step + 2, step + 4]
            .map(|s| scale.step_pitch(s, VICTORY_OCTAVE))
            .to_vec();
        events.push(
            NoteEvent::chord(beat, pitches, duration * 0.9, NoteSource::Lead(SampledInstrument::Accordion))
                .with_velocity(0.85),
        );
        beat += duration;
    }
    events
}
