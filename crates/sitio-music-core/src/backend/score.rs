//! Score capture for NRT (non-realtime) rendering.
//!
//! The score file format is, for each event, a 4-byte big-endian length
//! prefix followed by an encoded OSC bundle. scsynth reads until EOF.

use super::osc::{alloc_read_message, chain_message, group_message, VoiceTable};
use super::ToneBackend;
use crate::error::Result;
use crate::events::ScheduledNote;
use crate::instruments::{SampleSet, SignalChain, SynthVoice};
use rosc::{encoder, OscBundle, OscPacket, OscTime, OscType};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// A captured packet with absolute time in seconds.
#[derive(Debug, Clone)]
pub struct ScoredEvent {
    pub time_seconds: f64,
    pub packet: OscPacket,
}

/// Accumulates timed OSC packets and writes them as a binary score.
#[derive(Debug, Default)]
pub struct ScoreWriter {
    pub events: Vec<ScoredEvent>,
    /// Sample files referenced by `/b_allocRead`, keyed by buffer number.
    pub samples: BTreeMap<i32, String>,
}

impl ScoreWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sample(&mut self, bufnum: i32, path: String) {
        self.samples.insert(bufnum, path);
    }

    /// Add a bundle of packets at the given time.
    pub fn add_bundle(&mut self, time_seconds: f64, packets: Vec<OscPacket>) {
        let bundle = OscPacket::Bundle(OscBundle {
            timetag: seconds_to_osc_time(time_seconds),
            content: packets,
        });
        self.events.push(ScoredEvent {
            time_seconds,
            packet: bundle,
        });
    }

    /// Time of the last event in seconds.
    pub fn duration(&self) -> f64 {
        self.events
            .iter()
            .map(|e| e.time_seconds)
            .fold(0.0, f64::max)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Encode all events in time order, rewriting sample paths with `rewrite`.
    fn encode(&mut self, rewrite: impl Fn(i32, &str) -> String) -> std::io::Result<Vec<u8>> {
        self.events
            .sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));

        let mut data = Vec::new();
        for event in &self.events {
            let packet = rewrite_sample_paths(&event.packet, &rewrite);
            let encoded = encoder::encode(&packet)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            data.extend_from_slice(&(encoded.len() as i32).to_be_bytes());
            data.extend_from_slice(&encoded);
        }
        Ok(data)
    }

    /// Write the score with absolute sample paths.
    pub fn write_to_file(&mut self, path: &Path) -> std::io::Result<()> {
        let data = self.encode(|_, original| original.to_string())?;
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(&data)?;
        writer.flush()?;
        log::info!(
            "[SCORE] Wrote {} events ({:.1}s) to {}",
            self.events.len(),
            self.duration(),
            path.display()
        );
        Ok(())
    }

    /// Write a tar archive holding `score.osc` and a `samples/` directory.
    ///
    /// Sample paths inside the score become archive-relative.
    pub fn write_bundle(&mut self, path: &Path) -> std::io::Result<()> {
        use tar::{Builder, Header};

        let data = self.encode(archive_sample_path)?;

        let mut archive = Builder::new(File::create(path)?);
        let mut header = Header::new_gnu();
        header.set_path("score.osc")?;
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        archive.append(&header, data.as_slice())?;

        let mut packed = 0;
        for (bufnum, original) in &self.samples {
            match std::fs::read(original) {
                Ok(bytes) => {
                    let mut header = Header::new_gnu();
                    header.set_path(archive_sample_path(*bufnum, original))?;
                    header.set_size(bytes.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    archive.append(&header, bytes.as_slice())?;
                    packed += 1;
                }
                Err(e) => log::warn!("[SCORE] Failed to read sample '{}': {}", original, e),
            }
        }
        archive.finish()?;

        log::info!(
            "[SCORE] Wrote bundle with {} events and {} samples to {}",
            self.events.len(),
            packed,
            path.display()
        );
        Ok(())
    }
}

/// Archive location of a sample; buffer numbers keep same-named files apart.
fn archive_sample_path(bufnum: i32, original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("sample.wav");
    format!("samples/{}_{}", bufnum, name)
}

fn rewrite_sample_paths(packet: &OscPacket, rewrite: &impl Fn(i32, &str) -> String) -> OscPacket {
    match packet {
        OscPacket::Message(msg) if msg.addr == "/b_allocRead" && msg.args.len() >= 2 => {
            let mut msg = msg.clone();
            let rewritten = match (&msg.args[0], &msg.args[1]) {
                (OscType::Int(bufnum), OscType::String(path)) => Some(rewrite(*bufnum, path)),
                _ => None,
            };
            if let Some(path) = rewritten {
                msg.args[1] = OscType::String(path);
            }
            OscPacket::Message(msg)
        }
        OscPacket::Message(_) => packet.clone(),
        OscPacket::Bundle(bundle) => OscPacket::Bundle(OscBundle {
            timetag: bundle.timetag,
            content: bundle
                .content
                .iter()
                .map(|p| rewrite_sample_paths(p, rewrite))
                .collect(),
        }),
    }
}

/// Convert score-relative seconds to an OSC timetag.
///
/// The base is 1 second to stay clear of the "immediately" tag.
pub fn seconds_to_osc_time(seconds: f64) -> OscTime {
    let seconds = seconds.max(0.0);
    let secs = 1 + seconds.floor() as u32;
    let frac = ((seconds - seconds.floor()) * (u32::MAX as f64)) as u32;
    OscTime::from((secs, frac))
}

/// Backend that captures everything into a [`ScoreWriter`].
#[derive(Debug)]
pub struct ScoreBackend {
    writer: ScoreWriter,
    table: VoiceTable,
    /// Instant that maps to score time zero.
    origin: Instant,
}

impl ScoreBackend {
    pub fn new(origin: Instant) -> Self {
        Self {
            writer: ScoreWriter::new(),
            table: VoiceTable::new(),
            origin,
        }
    }

    pub fn writer(&self) -> &ScoreWriter {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut ScoreWriter {
        &mut self.writer
    }

    fn seconds_at(&self, at: Instant) -> f64 {
        at.saturating_duration_since(self.origin).as_secs_f64()
    }
}

impl ToneBackend for ScoreBackend {
    fn name(&self) -> &str {
        "score"
    }

    fn resume_context(&mut self) -> Result<()> {
        self.writer.add_bundle(0.0, vec![group_message()]);
        Ok(())
    }

    fn install_chain(&mut self, chain: &SignalChain) -> Result<()> {
        self.writer.add_bundle(0.0, vec![chain_message(chain)]);
        Ok(())
    }

    fn install_voice(&mut self, voice: &SynthVoice) -> Result<()> {
        self.table.add_voice(voice);
        Ok(())
    }

    fn load_samples(&mut self, samples: &SampleSet) -> Result<()> {
        let mut packets = Vec::new();
        for (bufnum, path) in self.table.add_samples(samples) {
            self.writer.add_sample(bufnum, path.clone());
            packets.push(alloc_read_message(bufnum, path));
        }
        self.writer.add_bundle(0.0, packets);
        Ok(())
    }

    fn play(&mut self, note: &ScheduledNote) -> Result<()> {
        let packets = self.table.messages(note);
        if !packets.is_empty() {
            self.writer.add_bundle(self.seconds_at(note.at), packets);
        }
        Ok(())
    }

    /// Nodes in a score free themselves through their envelopes.
    fn release_all(&mut self) -> Result<()> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruments::{SampledInstrument, Voice};
    use crate::states::Layer;
    use crate::theory::Pitch;
    use std::time::Duration;

    #[test]
    fn test_seconds_to_osc_time() {
        let time = seconds_to_osc_time(0.0);
        assert_eq!(time.seconds, 1);
        assert_eq!(time.fractional, 0);

        let time = seconds_to_osc_time(1.5);
        assert_eq!(time.seconds, 2);
        assert!(time.fractional > u32::MAX / 4);
        assert!(time.fractional < (u32::MAX / 4) * 3);
    }

    #[test]
    fn test_score_backend_times_notes_from_origin() {
        let origin = Instant::now();
        let mut backend = ScoreBackend::new(origin);
        backend.resume_context().unwrap();
        backend.install_voice(&SynthVoice::for_layer(Layer::Bass)).unwrap();
        backend
            .play(&ScheduledNote {
                voice: Voice::Synth(Layer::Bass),
                pitches: vec![Pitch(43)],
                at: origin + Duration::from_millis(2500),
                beat: 4.0,
                duration_secs: 1.0,
                velocity: 0.9,
            })
            .unwrap();

        assert_eq!(backend.writer().event_count(), 2);
        assert!((backend.writer().duration() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_score_file_is_length_prefixed() {
        let mut writer = ScoreWriter::new();
        writer.add_bundle(1.0, vec![group_message()]);
        writer.add_bundle(0.0, vec![group_message()]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.osc");
        writer.write_to_file(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let first_len = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        assert_eq!(bytes.len(), 2 * (4 + first_len));
        // Sorted by time.
        assert_eq!(writer.events[0].time_seconds, 0.0);
    }

    #[test]
    fn test_bundle_packs_samples() {
        let dir = tempfile::tempdir().unwrap();
        let sample = dir.path().join("C4.wav");
        std::fs::write(&sample, b"RIFF").unwrap();

        let mut backend = ScoreBackend::new(Instant::now());
        backend
            .load_samples(&SampleSet {
                instrument: SampledInstrument::Flute,
                files: vec![(Pitch(60), sample)],
            })
            .unwrap();

        let out = dir.path().join("session.tar");
        backend.writer_mut().write_bundle(&out).unwrap();

        let mut archive = tar::Archive::new(File::open(&out).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["score.osc".to_string(), "samples/200_C4.wav".to_string()]);
    }
}
