//! Sítio Music Core - Reactive procedural music for a Brazilian-folk memory game.
//!
//! The game reports what is happening (exploring, a hot streak, two cards
//! left, victory) and the engine answers with a continuously generated
//! accompaniment in that mood:
//!
//! - **States** - Fixture table of the six musical moods
//! - **Selector** - Resolves a state against difficulty and streak, commits tempo and swing
//! - **Timing** - Transport clock with tempo ramps, swing and latency compensation
//! - **Theory** - Pitches, the G major scale and its chord degrees
//! - **Patterns** - Per-measure viola, bass, pandeiro, triangulo and flute parts
//! - **Melody** - The looping motif with phrase variations, and the victory fanfare
//! - **Effects** - One-shot game sound effects and the theme snippet
//! - **Instruments** - Synth voices, sampled instruments and the shared signal chain
//! - **Scheduler** - Beat-based loop scheduling with lookahead
//! - **Engine** - The owner of all of the above
//! - **Backend** - Where notes go: memory, a live synthesis server over OSC, or a score file
//!
//! # Architecture
//!
//! [`MusicEngine`] is constructed by the host around a [`ToneBackend`]. There
//! is no global state. The host calls [`MusicEngine::pump`] regularly; each
//! pump renders the loop cycles entering the lookahead window and sends the
//! notes that are due. Observers follow along through [`MusicEngine::subscribe`].
//!
//! # Feature Flags
//!
//! - `native` (default) - OSC backend for a SuperCollider-compatible server and score rendering

pub mod backend;
pub mod config;
pub mod effects;
pub mod engine;
pub mod error;
pub mod events;
pub mod instruments;
pub mod melody;
pub mod patterns;
pub mod scheduler;
pub mod selector;
pub mod states;
pub mod theory;
pub mod timing;

pub use backend::{BackendCall, MemoryBackend, ToneBackend};
pub use config::EngineConfig;
pub use effects::SoundEffect;
pub use engine::{EngineEvent, EngineState, EngineStats, MusicEngine};
pub use error::{BackendError, ConfigError};
pub use events::{NoteEvent, NoteSource, ScheduledNote};
pub use instruments::{InstrumentBank, SampledInstrument, SetupReport, Voice};
pub use scheduler::{LoopHandle, LoopKind};
pub use selector::{Difficulty, PlaybackContext, ResolvedState, StateSelector};
pub use states::{Feel, Layer, MusicState, MusicStateName};
pub use theory::{ChordDegree, Pitch, Scale};
pub use timing::{BeatTime, LatencyCompensation, TimeSignature, TransportClock};

#[cfg(feature = "native")]
pub use backend::{OscBackend, OscClient, ScoreBackend, ScoreWriter};
