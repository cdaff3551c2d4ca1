//! Tone generator backends.
//!
//! The engine never synthesizes audio itself. It configures a
//! [`ToneBackend`] once (context, signal chain, voices, samples) and then
//! hands it fully resolved [`ScheduledNote`]s.
//!
//! - [`MemoryBackend`] - records every call; used by tests and dry runs
//! - [`OscBackend`] - live playback on a scsynth-compatible server (native only)
//! - [`ScoreBackend`] - NRT score capture (native only)

use crate::error::{BackendError, Result};
use crate::events::ScheduledNote;
use crate::instruments::{SampleSet, SampledInstrument, SignalChain, SynthVoice, Voice};
use crate::states::Layer;

#[cfg(feature = "native")]
mod osc;
#[cfg(feature = "native")]
mod score;

#[cfg(feature = "native")]
pub use osc::{OscBackend, OscClient};
#[cfg(feature = "native")]
pub use score::{seconds_to_osc_time, ScoreBackend, ScoreWriter};

/// The synthesis collaborator driven by the engine.
pub trait ToneBackend: Send {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Start or resume the audio context.
    fn resume_context(&mut self) -> Result<()>;

    /// Build the shared filter/EQ/compressor/ambience routing.
    fn install_chain(&mut self, chain: &SignalChain) -> Result<()>;

    /// Register one synthesized voice.
    fn install_voice(&mut self, voice: &SynthVoice) -> Result<()>;

    /// Load a sampled instrument.
    fn load_samples(&mut self, samples: &SampleSet) -> Result<()>;

    /// Schedule a note.
    fn play(&mut self, note: &ScheduledNote) -> Result<()>;

    /// Silence everything currently sounding or queued.
    fn release_all(&mut self) -> Result<()>;

    /// Free voices, samples and routing.
    fn teardown(&mut self) -> Result<()>;
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    ResumeContext,
    InstallChain,
    InstallVoice(Layer),
    LoadSamples(SampledInstrument),
    Play(ScheduledNote),
    ReleaseAll,
    Teardown,
}

/// Backend that only records what it was asked to do.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    calls: Vec<BackendCall>,
    block_context: bool,
    fail_samples: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse to resume the context, like a browser waiting for a user gesture.
    pub fn with_blocked_context(mut self) -> Self {
        self.block_context = true;
        self
    }

    /// Reject every sample load.
    pub fn with_failing_samples(mut self) -> Self {
        self.fail_samples = true;
        self
    }

    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Notes played so far, in call order.
    pub fn notes(&self) -> impl Iterator<Item = &ScheduledNote> {
        self.calls.iter().filter_map(|call| match call {
            BackendCall::Play(note) => Some(note),
            _ => None,
        })
    }

    /// Notes played on one voice.
    pub fn notes_on(&self, voice: Voice) -> impl Iterator<Item = &ScheduledNote> {
        self.notes().filter(move |note| note.voice == voice)
    }

    pub fn count(&self, call: &BackendCall) -> usize {
        self.calls.iter().filter(|c| *c == call).count()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl ToneBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn resume_context(&mut self) -> Result<()> {
        self.calls.push(BackendCall::ResumeContext);
        if self.block_context {
            return Err(BackendError::ContextBlocked(
                "waiting for a user gesture".to_string(),
            ));
        }
        Ok(())
    }

    fn install_chain(&mut self, _chain: &SignalChain) -> Result<()> {
        self.calls.push(BackendCall::InstallChain);
        Ok(())
    }

    fn install_voice(&mut self, voice: &SynthVoice) -> Result<()> {
        self.calls.push(BackendCall::InstallVoice(voice.layer));
        Ok(())
    }

    fn load_samples(&mut self, samples: &SampleSet) -> Result<()> {
        self.calls.push(BackendCall::LoadSamples(samples.instrument));
        if self.fail_samples {
            return Err(BackendError::SampleLoad {
                instrument: samples.instrument.to_string(),
                reason: "network unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn play(&mut self, note: &ScheduledNote) -> Result<()> {
        log::trace!(
            "[MEMORY] {} {:?} at beat {:.3}",
            note.voice.name(),
            note.pitches,
            note.beat
        );
        self.calls.push(BackendCall::Play(note.clone()));
        Ok(())
    }

    fn release_all(&mut self) -> Result<()> {
        self.calls.push(BackendCall::ReleaseAll);
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.calls.push(BackendCall::Teardown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theory::Pitch;
    use std::time::Instant;

    #[test]
    fn test_memory_backend_records_calls() {
        let mut backend = MemoryBackend::new();
        backend.resume_context().unwrap();
        backend.install_voice(&SynthVoice::for_layer(Layer::Bass)).unwrap();
        let note = ScheduledNote {
            voice: Voice::Synth(Layer::Bass),
            pitches: vec![Pitch(43)],
            at: Instant::now(),
            beat: 0.0,
            duration_secs: 1.0,
            velocity: 0.8,
        };
        backend.play(&note).unwrap();
        backend.release_all().unwrap();

        assert_eq!(backend.calls().len(), 4);
        assert_eq!(backend.notes().count(), 1);
        assert_eq!(backend.notes_on(Voice::Synth(Layer::Viola)).count(), 0);
        assert_eq!(backend.count(&BackendCall::ReleaseAll), 1);

        backend.clear();
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_failure_switches() {
        let mut backend = MemoryBackend::new().with_blocked_context().with_failing_samples();
        assert!(matches!(
            backend.resume_context(),
            Err(BackendError::ContextBlocked(_))
        ));
        let set = SampleSet {
            instrument: SampledInstrument::Flute,
            files: Vec::new(),
        };
        assert!(matches!(
            backend.load_samples(&set),
            Err(BackendError::SampleLoad { .. })
        ));
    }
}
