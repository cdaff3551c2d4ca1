//! Per-measure accompaniment patterns.
//!
//! [`measure_events`] renders one bar for every active layer of a resolved
//! state. The offset tables are fixed musical content keyed by [`Feel`].

use crate::events::{NoteEvent, NoteSource};
use crate::selector::ResolvedState;
use crate::states::{Feel, Layer};
use crate::theory::{Pitch, Scale};
use crate::timing::{swing_delay, SWING_SUBDIVISION};
use rand::rngs::StdRng;
use rand::Rng;
use std::f64::consts::PI;

/// Beats per measure; the game always plays in 4/4.
pub const MEASURE_BEATS: f64 = 4.0;

/// Octave the chords are voiced in.
pub const CHORD_OCTAVE: i8 = 4;

const FLUTE_OCTAVE: i8 = 5;

const DOWNSTROKE_VELOCITY: f32 = 0.8;
const UPSTROKE_VELOCITY: f32 = 0.6;
/// Upstrokes land slightly late.
const UPSTROKE_DELAY: f64 = 0.02;
const STRUM_JITTER: f64 = 0.01;

/// Pandeiro and triangulo are unpitched; these pick the drum tuning.
const PANDEIRO_PITCH: Pitch = Pitch(43);
const TRIANGULO_PITCH: Pitch = Pitch(91);

/// Viola strum positions within the bar.
pub fn viola_offsets(feel: Feel) -> &'static [f64] {
    match feel {
        Feel::Baiao => &[0.0, 0.75, 1.5, 2.0, 2.75, 3.5],
        Feel::Festa => &[0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.5],
        Feel::Toada | Feel::Moda => &[0.0, 1.0, 1.5, 2.0, 3.0],
        Feel::Suspense => &[0.0, 2.0],
        Feel::Renovacao => &[0.0, 1.0, 2.0, 2.5, 3.0],
    }
}

/// Bass hit positions and lengths.
pub fn bass_pattern(feel: Feel) -> (&'static [f64], &'static [f64]) {
    match feel {
        Feel::Baiao | Feel::Festa => (&[0.0, 1.5, 2.0, 3.0, 3.5], &[1.5, 0.5, 1.0, 0.5, 0.5]),
        Feel::Moda => (&[0.0, 2.0], &[2.0, 2.0]),
        Feel::Suspense => (&[0.0], &[4.0]),
        Feel::Renovacao => (&[0.0, 1.5, 3.0], &[1.5, 1.5, 1.0]),
        Feel::Toada => (&[0.0, 2.0], &[1.0, 1.0]),
    }
}

const PANDEIRO_BASIC: [(f64, f32); 8] = [
    (0.0, 0.9),
    (0.5, 0.3),
    (1.0, 0.6),
    (1.5, 0.3),
    (2.0, 0.8),
    (2.5, 0.3),
    (3.0, 0.6),
    (3.5, 0.3),
];

const PANDEIRO_INTENSE: [f64; 10] = [0.0, 0.25, 0.75, 1.0, 1.5, 2.0, 2.25, 2.75, 3.0, 3.5];

/// Volume swell across a phrase: a slow sine over eight bars.
pub fn breathing(bar: u64) -> f32 {
    (1.0 + 0.08 * (bar as f64 * PI / 4.0).sin()) as f32
}

/// Whether the flute plays on this bar.
pub fn flute_plays(feel: Feel, bar: u64) -> bool {
    match feel {
        Feel::Festa => true,
        Feel::Suspense => bar % 4 == 3,
        Feel::Renovacao => bar % 3 == 0,
        _ => bar % 2 == 1,
    }
}

fn feel_gain(feel: Feel) -> f32 {
    match feel {
        Feel::Festa => 1.2,
        Feel::Suspense => 0.6,
        _ => 1.0,
    }
}

fn is_offbeat(beat: f64) -> bool {
    (beat - beat.round()).abs() > 1e-9
}

/// Notes for one bar of the accompaniment.
pub fn measure_events(
    state: &ResolvedState,
    scale: &Scale,
    bar: u64,
    rng: &mut StdRng,
) -> Vec<NoteEvent> {
    let chord = scale.chord(state.chord_for_measure(bar), CHORD_OCTAVE);
    let mut events = Vec::new();
    for layer in &state.layers {
        match layer {
            Layer::Viola => viola(&mut events, state.feel, &chord, bar, state.swing, rng),
            Layer::Bass => bass(&mut events, state.feel, &chord, state.swing),
            Layer::Percussion => pandeiro(&mut events, state.feel),
            Layer::Triangle => triangulo(&mut events, state.feel),
            Layer::Flute => {
                if flute_plays(state.feel, bar) {
                    flute(&mut events, scale, state, bar);
                }
            }
        }
    }
    events
}

fn viola(
    events: &mut Vec<NoteEvent>,
    feel: Feel,
    chord: &[Pitch],
    bar: u64,
    swing: f64,
    rng: &mut StdRng,
) {
    let offsets = viola_offsets(feel);
    let gain = feel_gain(feel) * breathing(bar);
    for (i, &offset) in offsets.iter().enumerate() {
        let upstroke = i % 2 == 1;
        let next = offsets.get(i + 1).copied().unwrap_or(MEASURE_BEATS);
        // Swing is decided on the grid, humanization goes on top.
        let grid = offset + swing_delay(offset, swing, SWING_SUBDIVISION);
        let jitter = rng.random_range(-STRUM_JITTER..=STRUM_JITTER);
        let (beat, velocity) = if upstroke {
            (grid + UPSTROKE_DELAY + jitter, UPSTROKE_VELOCITY)
        } else {
            (grid + jitter, DOWNSTROKE_VELOCITY)
        };
        // Upstrokes play the chord top-down.
        let mut pitches = chord.to_vec();
        if upstroke {
            pitches.reverse();
        }
        events.push(
            NoteEvent::chord(
                beat.max(0.0),
                pitches,
                (next - offset) * 0.9,
                NoteSource::Layer(Layer::Viola),
            )
            .with_velocity(velocity * gain)
            .straight(),
        );
    }
}

fn bass(events: &mut Vec<NoteEvent>, feel: Feel, chord: &[Pitch], swing: f64) {
    let Some(root) = chord.first().map(|p| p.transpose(-12)) else {
        return;
    };
    let fifth = root.transpose(7);
    let (offsets, durations) = bass_pattern(feel);
    for (i, (&offset, &duration)) in offsets.iter().zip(durations).enumerate() {
        let pitch = if feel.is_intense() && i % 2 == 1 { fifth } else { root };
        let beat = if is_offbeat(offset) {
            offset + swing * 0.25
        } else {
            offset
        };
        let velocity = if i == 0 { 0.9 } else { 0.75 };
        events.push(
            NoteEvent::new(beat, pitch, duration, NoteSource::Layer(Layer::Bass))
                .with_velocity(velocity * feel_gain(feel).min(1.1))
                .straight(),
        );
    }
}

fn pandeiro(events: &mut Vec<NoteEvent>, feel: Feel) {
    let source = NoteSource::Layer(Layer::Percussion);
    if feel.is_intense() {
        // Crescendo towards the next downbeat.
        for &offset in &PANDEIRO_INTENSE {
            let velocity = 0.55 + 0.4 * (offset / MEASURE_BEATS) as f32;
            events.push(NoteEvent::new(offset, PANDEIRO_PITCH, 0.25, source).with_velocity(velocity));
        }
    } else {
        let gain = feel_gain(feel);
        for &(offset, velocity) in &PANDEIRO_BASIC {
            events.push(
                NoteEvent::new(offset, PANDEIRO_PITCH, 0.25, source).with_velocity(velocity * gain),
            );
        }
    }
}

fn triangulo(events: &mut Vec<NoteEvent>, feel: Feel) {
    let source = NoteSource::Layer(Layer::Triangle);
    if feel.is_intense() {
        for step in 0..8 {
            let offset = step as f64 * 0.5;
            let velocity = if is_offbeat(offset) { 0.6 } else { 0.35 };
            events.push(NoteEvent::new(offset, TRIANGULO_PITCH, 0.5, source).with_velocity(velocity));
        }
    } else {
        for (step, offset) in [0.5, 1.5, 2.5, 3.5].into_iter().enumerate() {
            let velocity = 0.4 + 0.05 * step as f32;
            events.push(NoteEvent::new(offset, TRIANGULO_PITCH, 0.5, source).with_velocity(velocity));
        }
    }
}

fn flute(events: &mut Vec<NoteEvent>, scale: &Scale, state: &ResolvedState, bar: u64) {
    let arpeggio = scale.chord(state.chord_for_measure(bar), FLUTE_OCTAVE);
    let gain = breathing(bar) * feel_gain(state.feel);
    for (i, (offset, duration)) in [(0.0, 1.5), (1.5, 0.5), (2.0, 2.0)].into_iter().enumerate() {
        let pitch = arpeggio[i % arpeggio.len()];
        events.push(
            NoteEvent::new(offset, pitch, duration, NoteSource::Layer(Layer::Flute))
                .with_velocity(0.55 * gain),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{resolve, PlaybackContext};
    use crate::states::MusicStateName;
    use rand::SeedableRng;

    fn render(name: MusicStateName, bar: u64) -> Vec<NoteEvent> {
        let state = resolve(name, &PlaybackContext::default());
        let mut rng = StdRng::seed_from_u64(7);
        measure_events(&state, &Scale::default(), bar, &mut rng)
    }

    fn layer_notes(events: &[NoteEvent], layer: Layer) -> Vec<&NoteEvent> {
        events
            .iter()
            .filter(|e| e.source == NoteSource::Layer(layer))
            .collect()
    }

    #[test]
    fn test_baiao_viola_offsets() {
        let events = render(MusicStateName::Action, 0);
        let viola = layer_notes(&events, Layer::Viola);
        assert_eq!(viola.len(), 6);
        for (note, expected) in viola.iter().zip([0.0, 0.75, 1.5, 2.0, 2.75, 3.5]) {
            let grid = expected + swing_delay(expected, 0.15, SWING_SUBDIVISION);
            assert!((note.beat - grid).abs() <= UPSTROKE_DELAY + STRUM_JITTER + 1e-9);
            assert!(!note.swing);
        }
    }

    #[test]
    fn test_viola_offbeats_carry_the_state_swing() {
        // Baiao downstroke at 1.5, action swing 0.15.
        let events = render(MusicStateName::Action, 0);
        let offbeat = layer_notes(&events, Layer::Viola)[2];
        let swung = 1.5 + 0.15 * SWING_SUBDIVISION / 3.0;
        assert!((offbeat.beat - swung).abs() <= STRUM_JITTER + 1e-9);
        assert!(offbeat.beat > 1.5 + STRUM_JITTER);
    }

    #[test]
    fn test_strokes_alternate_velocity() {
        let events = render(MusicStateName::Exploration, 0);
        let viola = layer_notes(&events, Layer::Viola);
        assert!(viola[0].velocity > viola[1].velocity);
        assert!(viola[2].velocity > viola[1].velocity);
    }

    #[test]
    fn test_festa_louder_than_suspense() {
        let festa = render(MusicStateName::Victory, 0);
        let suspense = render(MusicStateName::Tension, 0);
        let loud = layer_notes(&festa, Layer::Viola)[0].velocity;
        let soft = layer_notes(&suspense, Layer::Viola)[0].velocity;
        assert!(loud > soft);
    }

    #[test]
    fn test_bass_is_chord_root_one_octave_down() {
        // Exploration bar 1 plays vi: E4 chord root, E3 bass.
        let events = render(MusicStateName::Exploration, 1);
        let bass = layer_notes(&events, Layer::Bass);
        assert_eq!(bass.len(), 2);
        assert_eq!(bass[0].pitches[0].to_string(), "E3");
        assert_eq!(bass.iter().map(|n| n.duration).collect::<Vec<_>>(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_intense_bass_alternates_fifth_and_swings_offbeats() {
        let events = render(MusicStateName::Action, 0);
        let bass = layer_notes(&events, Layer::Bass);
        assert_eq!(bass.len(), 5);
        assert_eq!(bass[0].pitches[0].to_string(), "G3");
        assert_eq!(bass[1].pitches[0].to_string(), "D4");
        // Off-beat 1.5 shifted by swing 0.15 * 0.25.
        assert!((bass[1].beat - (1.5 + 0.15 * 0.25)).abs() < 1e-9);
        assert_eq!(bass[2].beat, 2.0);
        assert!(!bass[1].swing);
    }

    #[test]
    fn test_suspense_bass_is_one_whole_note() {
        let events = render(MusicStateName::Tension, 0);
        let bass = layer_notes(&events, Layer::Bass);
        assert_eq!(bass.len(), 1);
        assert_eq!(bass[0].duration, 4.0);
    }

    #[test]
    fn test_flute_rules() {
        assert!((0..8).all(|bar| flute_plays(Feel::Festa, bar)));
        assert_eq!((0..8).filter(|bar| flute_plays(Feel::Suspense, *bar)).count(), 2);
        assert!(flute_plays(Feel::Renovacao, 0) && !flute_plays(Feel::Renovacao, 1));
        assert!(!flute_plays(Feel::Toada, 0) && flute_plays(Feel::Toada, 1));

        assert!(layer_notes(&render(MusicStateName::Exploration, 0), Layer::Flute).is_empty());
        assert_eq!(layer_notes(&render(MusicStateName::Exploration, 1), Layer::Flute).len(), 3);
    }

    #[test]
    fn test_percussion_patterns() {
        let action = render(MusicStateName::Action, 0);
        let pandeiro = layer_notes(&action, Layer::Percussion);
        assert_eq!(pandeiro.len(), PANDEIRO_INTENSE.len());
        assert!(pandeiro.windows(2).all(|w| w[0].velocity <= w[1].velocity));

        let tension = render(MusicStateName::Tension, 0);
        assert_eq!(layer_notes(&tension, Layer::Percussion).len(), PANDEIRO_BASIC.len());
        assert!(layer_notes(&tension, Layer::Triangle).is_empty());

        let victory = render(MusicStateName::Victory, 0);
        assert_eq!(layer_notes(&victory, Layer::Triangle).len(), 8);
    }

    #[test]
    fn test_only_active_layers_play() {
        let events = render(MusicStateName::Puzzle, 1);
        assert!(events.iter().all(|e| matches!(
            e.source,
            NoteSource::Layer(Layer::Viola) | NoteSource::Layer(Layer::Bass)
        )));
    }

    #[test]
    fn test_breathing_is_bounded() {
        for bar in 0..16 {
            let b = breathing(bar);
            assert!((0.92..=1.08).contains(&b));
        }
        assert!((breathing(2) - 1.08).abs() < 1e-6);
    }

    #[test]
    fn test_notes_stay_inside_the_bar() {
        for name in MusicStateName::ALL {
            for bar in 0..4 {
                for note in render(name, bar) {
                    assert!(note.beat >= 0.0 && note.beat < MEASURE_BEATS, "{name} bar {bar}");
                }
            }
        }
    }
}
