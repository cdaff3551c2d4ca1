//! The instrument bank: synthesized voices, the shared signal chain and
//! optional sampled instruments.
//!
//! Setup is best-effort. Every failure is logged and recorded in a
//! [`SetupReport`]; the synthesized voices always remain usable.

use crate::backend::ToneBackend;
use crate::config::EngineConfig;
use crate::events::NoteSource;
use crate::states::Layer;
use crate::theory::Pitch;
use std::fmt;
use std::path::{Path, PathBuf};

/// Oscillator shape of a synthesized voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Sawtooth,
    /// Filtered noise burst (pandeiro skin and jingles).
    Noise,
    /// Inharmonic FM partials (triangulo).
    Metal,
}

impl Waveform {
    pub fn as_str(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Noise => "noise",
            Waveform::Metal => "metal",
        }
    }
}

/// ADSR envelope; times in seconds, sustain as a level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f64,
    pub decay: f64,
    pub sustain: f64,
    pub release: f64,
}

impl Envelope {
    pub const fn new(attack: f64, decay: f64, sustain: f64, release: f64) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }
}

/// Ambience send a voice is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmbienceSend {
    Reverb,
    Delay,
}

/// Fixed timbre of one accompaniment layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthVoice {
    pub layer: Layer,
    pub waveform: Waveform,
    pub envelope: Envelope,
    /// Output level in dB.
    pub level_db: f64,
    pub send: Option<AmbienceSend>,
}

impl SynthVoice {
    pub fn for_layer(layer: Layer) -> Self {
        let (waveform, envelope, level_db, send) = match layer {
            Layer::Viola => (
                Waveform::Triangle,
                Envelope::new(0.005, 0.3, 0.2, 0.8),
                -8.0,
                Some(AmbienceSend::Reverb),
            ),
            Layer::Bass => (Waveform::Sine, Envelope::new(0.02, 0.4, 0.6, 0.6), -6.0, None),
            Layer::Percussion => (Waveform::Noise, Envelope::new(0.001, 0.2, 0.0, 0.2), -10.0, None),
            Layer::Triangle => (Waveform::Metal, Envelope::new(0.001, 0.8, 0.0, 1.2), -18.0, None),
            Layer::Flute => (
                Waveform::Sine,
                Envelope::new(0.08, 0.2, 0.7, 0.5),
                -12.0,
                Some(AmbienceSend::Delay),
            ),
        };
        Self {
            layer,
            waveform,
            envelope,
            level_db,
            send,
        }
    }

    /// All five voices in layer order.
    pub fn all() -> [SynthVoice; 5] {
        Layer::ALL.map(SynthVoice::for_layer)
    }

    /// Synth definition name on the server.
    pub fn synthdef_name(&self) -> String {
        format!("sitio_{}", self.layer.as_str())
    }

    /// Linear gain for `level_db`.
    pub fn amplitude(&self) -> f32 {
        db_to_amp(self.level_db)
    }
}

pub fn db_to_amp(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

/// Shared effects every voice is routed through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalChain {
    /// Warmth lowpass cutoff in Hz.
    pub lowpass_hz: f64,
    /// Low/mid/high EQ gains in dB.
    pub eq_low_db: f64,
    pub eq_mid_db: f64,
    pub eq_high_db: f64,
    pub compressor_threshold_db: f64,
    pub compressor_ratio: f64,
    pub reverb_decay_secs: f64,
    pub reverb_wet: f64,
    /// Delay time in beats (an eighth note).
    pub delay_beats: f64,
    pub delay_feedback: f64,
    pub master_db: f64,
}

impl Default for SignalChain {
    fn default() -> Self {
        Self {
            lowpass_hz: 3500.0,
            eq_low_db: 3.0,
            eq_mid_db: 1.0,
            eq_high_db: -3.0,
            compressor_threshold_db: -18.0,
            compressor_ratio: 3.0,
            reverb_decay_secs: 2.5,
            reverb_wet: 0.2,
            delay_beats: 0.5,
            delay_feedback: 0.18,
            master_db: -6.0,
        }
    }
}

/// Instruments that may be loaded from a soundfont directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampledInstrument {
    Guitar,
    Flute,
    Harmonica,
    Accordion,
}

impl SampledInstrument {
    pub const ALL: [SampledInstrument; 4] = [
        SampledInstrument::Guitar,
        SampledInstrument::Flute,
        SampledInstrument::Harmonica,
        SampledInstrument::Accordion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SampledInstrument::Guitar => "guitar",
            SampledInstrument::Flute => "flute",
            SampledInstrument::Harmonica => "harmonica",
            SampledInstrument::Accordion => "accordion",
        }
    }

    /// Notes a sample set is recorded at; the sampler repitches between them.
    pub fn sample_notes(self) -> &'static [&'static str] {
        match self {
            SampledInstrument::Guitar => &["E2", "A2", "D3", "G3", "B3", "E4"],
            SampledInstrument::Flute => &["C4", "E4", "A4", "C5", "E5", "A5"],
            SampledInstrument::Harmonica => &["C4", "G4", "C5", "G5"],
            SampledInstrument::Accordion => &["C3", "G3", "C4", "G4", "C5"],
        }
    }

    /// Synthesized layer used when the samples are unavailable.
    pub fn synth_fallback(self) -> Layer {
        match self {
            SampledInstrument::Guitar | SampledInstrument::Accordion => Layer::Viola,
            SampledInstrument::Flute | SampledInstrument::Harmonica => Layer::Flute,
        }
    }
}

impl fmt::Display for SampledInstrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sample files found for one instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSet {
    pub instrument: SampledInstrument,
    pub files: Vec<(Pitch, PathBuf)>,
}

impl SampleSet {
    /// Collect `<dir>/<instrument>/<note>.wav` files that exist on disk.
    pub fn scan(dir: &Path, instrument: SampledInstrument) -> Result<Self, String> {
        let instrument_dir = dir.join(instrument.as_str());
        if !instrument_dir.is_dir() {
            return Err(format!("{} not found", instrument_dir.display()));
        }
        let files: Vec<(Pitch, PathBuf)> = instrument
            .sample_notes()
            .iter()
            .filter_map(|note| {
                let pitch = Pitch::parse(note)?;
                let path = instrument_dir.join(format!("{}.wav", note));
                path.is_file().then_some((pitch, path))
            })
            .collect();
        if files.is_empty() {
            return Err(format!("no samples in {}", instrument_dir.display()));
        }
        Ok(Self { instrument, files })
    }
}

/// A concrete sound source on the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Voice {
    Synth(Layer),
    Sampled(SampledInstrument),
}

impl Voice {
    pub fn name(&self) -> String {
        match self {
            Voice::Synth(layer) => format!("synth:{}", layer),
            Voice::Sampled(instrument) => format!("sampled:{}", instrument),
        }
    }
}

/// Maps layers and lead instruments to voices. Chosen once at setup.
pub trait InstrumentProvider: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn voice_for_layer(&self, layer: Layer) -> Voice;

    fn voice_for_lead(&self, instrument: SampledInstrument) -> Voice;

    fn voice_for(&self, source: NoteSource) -> Voice {
        match source {
            NoteSource::Layer(layer) => self.voice_for_layer(layer),
            NoteSource::Lead(instrument) => self.voice_for_lead(instrument),
        }
    }
}

/// Synthesized voices only.
#[derive(Debug, Default, Clone, Copy)]
pub struct SynthProvider;

impl InstrumentProvider for SynthProvider {
    fn name(&self) -> &'static str {
        "synth"
    }

    fn voice_for_layer(&self, layer: Layer) -> Voice {
        Voice::Synth(layer)
    }

    fn voice_for_lead(&self, instrument: SampledInstrument) -> Voice {
        Voice::Synth(instrument.synth_fallback())
    }
}

/// Sampled voices where loaded, synthesized fallback elsewhere.
#[derive(Debug, Clone)]
pub struct SampledProvider {
    loaded: Vec<SampledInstrument>,
}

impl SampledProvider {
    pub fn new(loaded: Vec<SampledInstrument>) -> Self {
        Self { loaded }
    }

    pub fn has(&self, instrument: SampledInstrument) -> bool {
        self.loaded.contains(&instrument)
    }
}

impl InstrumentProvider for SampledProvider {
    fn name(&self) -> &'static str {
        "sampled"
    }

    fn voice_for_layer(&self, layer: Layer) -> Voice {
        let sampled = match layer {
            Layer::Viola => Some(SampledInstrument::Guitar),
            Layer::Flute => Some(SampledInstrument::Flute),
            _ => None,
        };
        match sampled {
            Some(instrument) if self.has(instrument) => Voice::Sampled(instrument),
            _ => Voice::Synth(layer),
        }
    }

    fn voice_for_lead(&self, instrument: SampledInstrument) -> Voice {
        if self.has(instrument) {
            Voice::Sampled(instrument)
        } else {
            Voice::Synth(instrument.synth_fallback())
        }
    }
}

/// Outcome of resuming the audio context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextStatus {
    Running,
    Blocked(String),
}

/// What setup achieved; degradation is visible here instead of as errors.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupReport {
    pub context: ContextStatus,
    /// Whether a soundfont directory was configured at all.
    pub samples_configured: bool,
    pub samples_loaded: Vec<SampledInstrument>,
    pub sample_failures: Vec<(SampledInstrument, String)>,
    /// Chain or voice installation errors.
    pub install_errors: Vec<String>,
    /// Name of the chosen [`InstrumentProvider`].
    pub provider: &'static str,
}

impl SetupReport {
    pub fn is_degraded(&self) -> bool {
        self.context != ContextStatus::Running
            || !self.sample_failures.is_empty()
            || !self.install_errors.is_empty()
    }
}

/// Voices and routing built once per engine.
#[derive(Debug)]
pub struct InstrumentBank {
    provider: Box<dyn InstrumentProvider>,
    chain: SignalChain,
    report: SetupReport,
}

impl InstrumentBank {
    /// Build the bank against a backend. Never fails.
    pub fn setup(backend: &mut dyn ToneBackend, config: &EngineConfig) -> Self {
        log::info!("[INSTRUMENTS] Setting up instrument bank on {}", backend.name());

        let context = match backend.resume_context() {
            Ok(()) => ContextStatus::Running,
            Err(e) => {
                log::warn!("[INSTRUMENTS] Audio context not running: {}", e);
                ContextStatus::Blocked(e.to_string())
            }
        };

        let chain = SignalChain::default();
        let mut install_errors = Vec::new();
        if let Err(e) = backend.install_chain(&chain) {
            log::warn!("[INSTRUMENTS] Signal chain install failed: {}", e);
            install_errors.push(format!("chain: {}", e));
        }
        for voice in SynthVoice::all() {
            if let Err(e) = backend.install_voice(&voice) {
                log::warn!("[INSTRUMENTS] Voice {} install failed: {}", voice.layer, e);
                install_errors.push(format!("{}: {}", voice.layer, e));
            }
        }

        let mut samples_loaded = Vec::new();
        let mut sample_failures = Vec::new();
        let samples_configured = config.soundfont_dir.is_some();
        match &config.soundfont_dir {
            None => log::info!("[INSTRUMENTS] No soundfont directory, using synthesized voices"),
            Some(dir) => {
                for instrument in SampledInstrument::ALL {
                    let loaded = SampleSet::scan(dir, instrument).and_then(|set| {
                        backend.load_samples(&set).map_err(|e| e.to_string())
                    });
                    match loaded {
                        Ok(()) => {
                            log::info!("[INSTRUMENTS] Loaded sampled {}", instrument);
                            samples_loaded.push(instrument);
                        }
                        Err(reason) => {
                            log::warn!(
                                "[INSTRUMENTS] Sampled {} unavailable, falling back to synth: {}",
                                instrument,
                                reason
                            );
                            sample_failures.push((instrument, reason));
                        }
                    }
                }
            }
        }

        let provider: Box<dyn InstrumentProvider> = if samples_loaded.is_empty() {
            Box::new(SynthProvider)
        } else {
            Box::new(SampledProvider::new(samples_loaded.clone()))
        };

        let report = SetupReport {
            context,
            samples_configured,
            samples_loaded,
            sample_failures,
            install_errors,
            provider: provider.name(),
        };
        log::info!(
            "[INSTRUMENTS] Ready: provider={}, degraded={}",
            report.provider,
            report.is_degraded()
        );

        Self {
            provider,
            chain,
            report,
        }
    }

    pub fn provider(&self) -> &dyn InstrumentProvider {
        self.provider.as_ref()
    }

    pub fn voice_for(&self, source: NoteSource) -> Voice {
        self.provider.voice_for(source)
    }

    pub fn chain(&self) -> &SignalChain {
        &self.chain
    }

    pub fn report(&self) -> &SetupReport {
        &self.report
    }

    /// Release the bank's backend resources.
    pub fn teardown(self, backend: &mut dyn ToneBackend) {
        if let Err(e) = backend.teardown() {
            log::warn!("[INSTRUMENTS] Teardown failed: {}", e);
        }
        log::info!("[INSTRUMENTS] Instrument bank disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, MemoryBackend};

    fn write_samples(dir: &Path, instrument: SampledInstrument) {
        let instrument_dir = dir.join(instrument.as_str());
        std::fs::create_dir_all(&instrument_dir).unwrap();
        for note in instrument.sample_notes() {
            std::fs::write(instrument_dir.join(format!("{}.wav", note)), b"RIFF").unwrap();
        }
    }

    #[test]
    fn test_voice_table() {
        let viola = SynthVoice::for_layer(Layer::Viola);
        assert_eq!(viola.waveform, Waveform::Triangle);
        assert_eq!(viola.send, Some(AmbienceSend::Reverb));
        assert_eq!(SynthVoice::for_layer(Layer::Flute).send, Some(AmbienceSend::Delay));
        assert_eq!(SynthVoice::for_layer(Layer::Bass).send, None);
        assert_eq!(viola.synthdef_name(), "sitio_viola");
        assert!((db_to_amp(-6.0) - 0.501).abs() < 0.001);
    }

    #[test]
    fn test_setup_without_soundfont_is_synth_only() {
        let mut backend = MemoryBackend::new();
        let bank = InstrumentBank::setup(&mut backend, &EngineConfig::default());

        let report = bank.report();
        assert_eq!(report.context, ContextStatus::Running);
        assert!(!report.samples_configured);
        assert_eq!(report.provider, "synth");
        assert!(!report.is_degraded());

        let voices = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, BackendCall::InstallVoice(_)))
            .count();
        assert_eq!(voices, 5);
        assert_eq!(bank.voice_for(NoteSource::Layer(Layer::Viola)), Voice::Synth(Layer::Viola));
    }

    #[test]
    fn test_blocked_context_degrades_but_builds_voices() {
        let mut backend = MemoryBackend::new().with_blocked_context();
        let bank = InstrumentBank::setup(&mut backend, &EngineConfig::default());
        assert!(matches!(bank.report().context, ContextStatus::Blocked(_)));
        assert!(bank.report().is_degraded());
        assert_eq!(bank.voice_for(NoteSource::Layer(Layer::Bass)), Voice::Synth(Layer::Bass));
    }

    #[test]
    fn test_partial_soundfont_uses_sampled_provider() {
        let dir = tempfile::tempdir().unwrap();
        write_samples(dir.path(), SampledInstrument::Guitar);

        let mut config = EngineConfig::default();
        config.soundfont_dir = Some(dir.path().to_path_buf());

        let mut backend = MemoryBackend::new();
        let bank = InstrumentBank::setup(&mut backend, &config);
        let report = bank.report();
        assert_eq!(report.provider, "sampled");
        assert_eq!(report.samples_loaded, vec![SampledInstrument::Guitar]);
        assert_eq!(report.sample_failures.len(), 3);

        assert_eq!(
            bank.voice_for(NoteSource::Layer(Layer::Viola)),
            Voice::Sampled(SampledInstrument::Guitar)
        );
        assert_eq!(bank.voice_for(NoteSource::Layer(Layer::Flute)), Voice::Synth(Layer::Flute));
        assert_eq!(
            bank.voice_for(NoteSource::Lead(SampledInstrument::Accordion)),
            Voice::Synth(Layer::Viola)
        );
    }

    #[test]
    fn test_backend_sample_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        for instrument in SampledInstrument::ALL {
            write_samples(dir.path(), instrument);
        }
        let mut config = EngineConfig::default();
        config.soundfont_dir = Some(dir.path().to_path_buf());

        let mut backend = MemoryBackend::new().with_failing_samples();
        let bank = InstrumentBank::setup(&mut backend, &config);
        assert_eq!(bank.report().provider, "synth");
        assert_eq!(bank.report().sample_failures.len(), 4);
    }

    #[test]
    fn test_sample_scan_requires_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("flute")).unwrap();
        assert!(SampleSet::scan(dir.path(), SampledInstrument::Flute).is_err());
        assert!(SampleSet::scan(dir.path(), SampledInstrument::Guitar).is_err());

        write_samples(dir.path(), SampledInstrument::Flute);
        let set = SampleSet::scan(dir.path(), SampledInstrument::Flute).unwrap();
        assert_eq!(set.files.len(), SampledInstrument::Flute.sample_notes().len());
    }
}
