//! Live playback on a SuperCollider-compatible synthesis server over OSC.
//!
//! Voices are expected as preloaded synth definitions named after their
//! layer (`sitio_viola`, ...); sampled instruments play through
//! `sitio_sampler` from buffers loaded with `/b_allocRead`.

use super::ToneBackend;
use crate::error::{BackendError, Result as BackendResult};
use crate::events::ScheduledNote;
use crate::instruments::{SampleSet, SampledInstrument, SignalChain, SynthVoice, Voice};
use crate::states::Layer;
use crate::theory::Pitch;
use crate::timing::LatencyCompensation;
use anyhow::Result;
use rosc::{encoder, OscBundle, OscMessage, OscPacket, OscTime, OscType};
use std::collections::HashMap;
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Group all engine nodes live in.
const MUSIC_GROUP: i32 = 100;
/// Node of the shared effects chain.
const CHAIN_NODE: i32 = 1000;
/// First buffer number used for samples.
const FIRST_BUFFER: i32 = 200;

const ADD_TO_HEAD: i32 = 0;
const ADD_TO_TAIL: i32 = 1;

/// UDP-based OSC client.
#[derive(Clone)]
pub struct OscClient {
    /// None in noop mode.
    sock: Option<Arc<UdpSocket>>,
    /// Target address in "host:port" format.
    pub addr: String,
}

impl OscClient {
    /// Create a client bound to an ephemeral port.
    pub fn new<A: Into<String>>(addr: A) -> Result<Self> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            sock: Some(Arc::new(sock)),
            addr: addr.into(),
        })
    }

    /// Client that accepts every send and transmits nothing.
    pub fn noop() -> Self {
        Self {
            sock: None,
            addr: "noop".to_string(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.sock.is_none()
    }

    pub fn send_msg(&self, path: &str, args: Vec<OscType>) -> Result<()> {
        let sock = match &self.sock {
            Some(s) => s,
            None => return Ok(()),
        };
        let buf = encoder::encode(&Self::msg(path, args))?;
        sock.send_to(&buf, &self.addr)?;
        Ok(())
    }

    /// Send a bundle; `None` means "immediately".
    pub fn send_bundle(&self, timetag: Option<OscTime>, packets: Vec<OscPacket>) -> Result<()> {
        let sock = match &self.sock {
            Some(s) => s,
            None => return Ok(()),
        };
        let bundle = OscBundle {
            timetag: timetag.unwrap_or_else(|| OscTime::from((0, 1))),
            content: packets,
        };
        let buf = encoder::encode(&OscPacket::Bundle(bundle))?;
        sock.send_to(&buf, &self.addr)?;
        Ok(())
    }

    pub fn msg(path: &str, args: Vec<OscType>) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: path.into(),
            args,
        })
    }
}

impl std::fmt::Debug for OscClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OscClient")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

/// NTP timetag for a wall-clock time.
pub(crate) fn system_time_to_ntp(time: SystemTime) -> OscTime {
    let elapsed = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0));
    let ntp_seconds_total = elapsed.as_secs() + 2_208_988_800;
    let ntp_seconds = (ntp_seconds_total % (u32::MAX as u64 + 1)) as u32;
    let fractional = ((elapsed.subsec_nanos() as u64) << 32) / 1_000_000_000u64;
    OscTime::from((ntp_seconds, fractional as u32))
}

/// `/s_new` arguments for one pitch of a note.
pub(crate) fn s_new_args(
    def: &str,
    target: i32,
    controls: &[(&str, f32)],
) -> Vec<OscType> {
    let mut args = vec![
        OscType::String(def.to_string()),
        OscType::Int(-1),
        OscType::Int(ADD_TO_HEAD),
        OscType::Int(target),
    ];
    for (name, value) in controls {
        args.push(OscType::String((*name).to_string()));
        args.push(OscType::Float(*value));
    }
    args
}

/// Maps voices and pitches to `/s_new` messages. Shared with score capture.
#[derive(Debug, Default)]
pub(crate) struct VoiceTable {
    voices: HashMap<Layer, SynthVoice>,
    buffers: HashMap<SampledInstrument, Vec<(Pitch, i32)>>,
    next_buffer: i32,
}

impl VoiceTable {
    pub(crate) fn new() -> Self {
        Self {
            next_buffer: FIRST_BUFFER,
            ..Self::default()
        }
    }

    pub(crate) fn add_voice(&mut self, voice: &SynthVoice) {
        self.voices.insert(voice.layer, *voice);
    }

    /// Assign buffer numbers to a sample set; returns `(bufnum, path)` pairs to load.
    pub(crate) fn add_samples(&mut self, samples: &SampleSet) -> Vec<(i32, String)> {
        let mut loads = Vec::new();
        let mut table = Vec::new();
        for (pitch, path) in &samples.files {
            let bufnum = self.next_buffer;
            self.next_buffer += 1;
            table.push((*pitch, bufnum));
            loads.push((bufnum, path.to_string_lossy().into_owned()));
        }
        self.buffers.insert(samples.instrument, table);
        loads
    }

    pub(crate) fn buffers(&self) -> impl Iterator<Item = i32> + '_ {
        self.buffers.values().flatten().map(|(_, bufnum)| *bufnum)
    }

    /// One `/s_new` message per pitch of the note.
    pub(crate) fn messages(&self, note: &ScheduledNote) -> Vec<OscPacket> {
        let sustain = note.duration_secs as f32;
        note.pitches
            .iter()
            .filter_map(|pitch| {
                let args = match note.voice {
                    Voice::Synth(layer) => {
                        let voice = self
                            .voices
                            .get(&layer)
                            .copied()
                            .unwrap_or_else(|| SynthVoice::for_layer(layer));
                        let env = voice.envelope;
                        s_new_args(
                            &voice.synthdef_name(),
                            MUSIC_GROUP,
                            &[
                                ("freq", pitch.frequency()),
                                ("amp", note.velocity * voice.amplitude()),
                                ("sustain", sustain),
                                ("attack", env.attack as f32),
                                ("decay", env.decay as f32),
                                ("sustainLevel", env.sustain as f32),
                                ("release", env.release as f32),
                            ],
                        )
                    }
                    Voice::Sampled(instrument) => {
                        let table = self.buffers.get(&instrument)?;
                        let (root, bufnum) = table.iter().min_by_key(|(root, _)| {
                            (pitch.midi() as i32 - root.midi() as i32).abs()
                        })?;
                        let rate = 2f32.powf((pitch.midi() as f32 - root.midi() as f32) / 12.0);
                        s_new_args(
                            "sitio_sampler",
                            MUSIC_GROUP,
                            &[
                                ("buf", *bufnum as f32),
                                ("rate", rate),
                                ("amp", note.velocity),
                                ("sustain", sustain),
                            ],
                        )
                    }
                };
                Some(OscClient::msg("/s_new", args))
            })
            .collect()
    }
}

/// `/s_new` for the shared chain node.
pub(crate) fn chain_message(chain: &SignalChain) -> OscPacket {
    let mut args = vec![
        OscType::String("sitio_chain".to_string()),
        OscType::Int(CHAIN_NODE),
        OscType::Int(ADD_TO_TAIL),
        OscType::Int(0),
    ];
    let controls = [
        ("lowpass", chain.lowpass_hz),
        ("eqLow", chain.eq_low_db),
        ("eqMid", chain.eq_mid_db),
        ("eqHigh", chain.eq_high_db),
        ("compThresh", chain.compressor_threshold_db),
        ("compRatio", chain.compressor_ratio),
        ("reverbDecay", chain.reverb_decay_secs),
        ("reverbWet", chain.reverb_wet),
        ("delayBeats", chain.delay_beats),
        ("delayFeedback", chain.delay_feedback),
        ("master", chain.master_db),
    ];
    for (name, value) in controls {
        args.push(OscType::String(name.to_string()));
        args.push(OscType::Float(value as f32));
    }
    OscClient::msg("/s_new", args)
}

pub(crate) fn group_message() -> OscPacket {
    OscClient::msg(
        "/g_new",
        vec![OscType::Int(MUSIC_GROUP), OscType::Int(ADD_TO_HEAD), OscType::Int(0)],
    )
}

pub(crate) fn alloc_read_message(bufnum: i32, path: String) -> OscPacket {
    OscClient::msg(
        "/b_allocRead",
        vec![
            OscType::Int(bufnum),
            OscType::String(path),
            OscType::Int(0),
            OscType::Int(-1),
        ],
    )
}

fn osc_err(e: anyhow::Error) -> BackendError {
    BackendError::Osc(e.to_string())
}

/// Plays notes on a synthesis server with latency-compensated timetags.
#[derive(Debug)]
pub struct OscBackend {
    client: OscClient,
    latency: LatencyCompensation,
    table: VoiceTable,
    ready: bool,
}

impl OscBackend {
    pub fn new(client: OscClient, latency: LatencyCompensation) -> Self {
        Self {
            client,
            latency,
            table: VoiceTable::new(),
            ready: false,
        }
    }

    /// Connect to `addr`.
    pub fn connect(addr: &str, latency: LatencyCompensation) -> Result<Self> {
        Ok(Self::new(OscClient::new(addr)?, latency))
    }

    /// Timetag for an instant, shifted by the latency budget.
    fn timetag_for(&self, at: Instant) -> OscTime {
        let now = Instant::now();
        let ahead = at.saturating_duration_since(now).as_secs_f64() + self.latency.total_seconds();
        system_time_to_ntp(SystemTime::now() + Duration::from_secs_f64(ahead.max(0.0)))
    }
}

impl ToneBackend for OscBackend {
    fn name(&self) -> &str {
        "osc"
    }

    fn resume_context(&mut self) -> BackendResult<()> {
        if self.ready {
            return Ok(());
        }
        self.client
            .send_bundle(None, vec![group_message()])
            .map_err(osc_err)?;
        self.ready = true;
        log::info!("[OSC] Connected to {}", self.client.addr);
        Ok(())
    }

    fn install_chain(&mut self, chain: &SignalChain) -> BackendResult<()> {
        self.client
            .send_bundle(None, vec![chain_message(chain)])
            .map_err(osc_err)
    }

    fn install_voice(&mut self, voice: &SynthVoice) -> BackendResult<()> {
        log::debug!(
            "[OSC] Voice {} -> {} ({}, {:.0} dB)",
            voice.layer,
            voice.synthdef_name(),
            voice.waveform.as_str(),
            voice.level_db
        );
        self.table.add_voice(voice);
        Ok(())
    }

    fn load_samples(&mut self, samples: &SampleSet) -> BackendResult<()> {
        let packets: Vec<OscPacket> = self
            .table
            .add_samples(samples)
            .into_iter()
            .map(|(bufnum, path)| alloc_read_message(bufnum, path))
            .collect();
        self.client.send_bundle(None, packets).map_err(|e| BackendError::SampleLoad {
            instrument: samples.instrument.to_string(),
            reason: e.to_string(),
        })
    }

    fn play(&mut self, note: &ScheduledNote) -> BackendResult<()> {
        if !self.ready {
            return Err(BackendError::NotReady);
        }
        let packets = self.table.messages(note);
        if packets.is_empty() {
            return Ok(());
        }
        self.client
            .send_bundle(Some(self.timetag_for(note.at)), packets)
            .map_err(osc_err)
    }

    fn release_all(&mut self) -> BackendResult<()> {
        if !self.ready {
            return Ok(());
        }
        self.client
            .send_msg("/g_freeAll", vec![OscType::Int(MUSIC_GROUP)])
            .map_err(osc_err)
    }

    fn teardown(&mut self) -> BackendResult<()> {
        if !self.ready {
            return Ok(());
        }
        let mut packets = vec![
            OscClient::msg("/n_free", vec![OscType::Int(MUSIC_GROUP)]),
            OscClient::msg("/n_free", vec![OscType::Int(CHAIN_NODE)]),
        ];
        packets.extend(
            self.table
                .buffers()
                .map(|bufnum| OscClient::msg("/b_free", vec![OscType::Int(bufnum)])),
        );
        self.ready = false;
        self.client.send_bundle(None, packets).map_err(osc_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn note(voice: Voice, pitches: Vec<Pitch>) -> ScheduledNote {
        ScheduledNote {
            voice,
            pitches,
            at: Instant::now(),
            beat: 0.0,
            duration_secs: 0.5,
            velocity: 1.0,
        }
    }

    fn addr_of(packet: &OscPacket) -> &str {
        match packet {
            OscPacket::Message(msg) => &msg.addr,
            OscPacket::Bundle(_) => "bundle",
        }
    }

    #[test]
    fn test_osc_client_creation() {
        assert!(OscClient::new("127.0.0.1:57110").is_ok());
        assert!(OscClient::noop().is_noop());
    }

    #[test]
    fn test_synth_note_becomes_one_message_per_pitch() {
        let mut table = VoiceTable::new();
        table.add_voice(&SynthVoice::for_layer(Layer::Viola));
        let packets = table.messages(&note(
            Voice::Synth(Layer::Viola),
            vec![Pitch(67), Pitch(71), Pitch(74)],
        ));
        assert_eq!(packets.len(), 3);
        match &packets[0] {
            OscPacket::Message(msg) => {
                assert_eq!(msg.addr, "/s_new");
                assert_eq!(msg.args[0], OscType::String("sitio_viola".to_string()));
            }
            OscPacket::Bundle(_) => panic!("expected message"),
        }
    }

    #[test]
    fn test_sampled_note_uses_nearest_buffer() {
        let mut table = VoiceTable::new();
        let loads = table.add_samples(&SampleSet {
            instrument: SampledInstrument::Flute,
            files: vec![
                (Pitch(60), PathBuf::from("/s/flute/C4.wav")),
                (Pitch(72), PathBuf::from("/s/flute/C5.wav")),
            ],
        });
        assert_eq!(loads, vec![
            (FIRST_BUFFER, "/s/flute/C4.wav".to_string()),
            (FIRST_BUFFER + 1, "/s/flute/C5.wav".to_string()),
        ]);

        let packets = table.messages(&note(Voice::Sampled(SampledInstrument::Flute), vec![Pitch(71)]));
        let OscPacket::Message(msg) = &packets[0] else {
            panic!("expected message");
        };
        assert_eq!(msg.args[0], OscType::String("sitio_sampler".to_string()));
        assert_eq!(msg.args[5], OscType::Float((FIRST_BUFFER + 1) as f32));

        // Unloaded instrument produces nothing.
        assert!(table
            .messages(&note(Voice::Sampled(SampledInstrument::Guitar), vec![Pitch(60)]))
            .is_empty());
    }

    #[test]
    fn test_noop_backend_lifecycle() {
        let mut backend = OscBackend::new(OscClient::noop(), LatencyCompensation::default());
        let n = note(Voice::Synth(Layer::Bass), vec![Pitch(43)]);
        assert!(matches!(backend.play(&n), Err(BackendError::NotReady)));

        backend.resume_context().unwrap();
        backend.install_chain(&SignalChain::default()).unwrap();
        backend.play(&n).unwrap();
        backend.release_all().unwrap();
        backend.teardown().unwrap();
        assert!(matches!(backend.play(&n), Err(BackendError::NotReady)));
    }

    #[test]
    fn test_helper_messages() {
        assert_eq!(addr_of(&group_message()), "/g_new");
        assert_eq!(addr_of(&chain_message(&SignalChain::default())), "/s_new");
        assert_eq!(addr_of(&alloc_read_message(3, "x.wav".into())), "/b_allocRead");
    }

    #[test]
    fn test_ntp_epoch_offset() {
        let tag = system_time_to_ntp(UNIX_EPOCH);
        assert_eq!(tag.seconds, 2_208_988_800);
        assert_eq!(tag.fractional, 0);
    }
}
