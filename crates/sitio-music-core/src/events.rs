//! Note events produced by the pattern and melody generators.
//!
//! - [`NoteEvent`] - A note positioned relative to the start of its loop cycle
//! - [`NoteSource`] - Which accompaniment layer or lead instrument asked for it
//! - [`ScheduledNote`] - A note resolved to a voice and a wall-clock instant

use crate::instruments::{SampledInstrument, Voice};
use crate::states::Layer;
use crate::theory::Pitch;
use std::time::Instant;

/// Who a note belongs to, before the instrument provider picks a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteSource {
    /// An accompaniment layer from the state table.
    Layer(Layer),
    /// A melody instrument (sampled when available).
    Lead(SampledInstrument),
}

/// A note to be scheduled at a beat offset within its loop cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct NoteEvent {
    /// Beat offset relative to the cycle start.
    pub beat: f64,
    /// Pitches sounded together; a chord strum has several.
    pub pitches: Vec<Pitch>,
    /// Length in beats.
    pub duration: f64,
    /// 0.0..=1.0
    pub velocity: f32,
    pub source: NoteSource,
    /// Whether transport swing shifts this note when it sits on an off-beat.
    pub swing: bool,
}

impl NoteEvent {
    /// Create a single-pitch note at full velocity.
    pub fn new(beat: f64, pitch: Pitch, duration: f64, source: NoteSource) -> Self {
        Self {
            beat,
            pitches: vec![pitch],
            duration,
            velocity: 1.0,
            source,
            swing: true,
        }
    }

    /// Create a chord event.
    pub fn chord(beat: f64, pitches: Vec<Pitch>, duration: f64, source: NoteSource) -> Self {
        Self {
            beat,
            pitches,
            duration,
            velocity: 1.0,
            source,
            swing: true,
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity.clamp(0.0, 1.0);
        self
    }

    /// Opt out of transport swing (the note carries its own offset).
    pub fn straight(mut self) -> Self {
        self.swing = false;
        self
    }
}

/// A note resolved to a concrete voice and start instant, ready for a backend.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledNote {
    pub voice: Voice,
    pub pitches: Vec<Pitch>,
    /// When the note should sound (before latency compensation).
    pub at: Instant,
    /// Absolute transport beat, for logging and scores.
    pub beat: f64,
    pub duration_secs: f64,
    pub velocity: f32,
}
