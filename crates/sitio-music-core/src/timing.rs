//! Timing primitives for the transport and scheduling.
//!
//! - [`BeatTime`] - Fixed-point beat representation for precise timing
//! - [`TimeSignature`] - Musical time signature (the game always plays 4/4)
//! - [`TransportClock`] - Transport clock with tempo ramps and swing
//! - [`LatencyCompensation`] - Configurable latency for network/audio compensation

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default swing subdivision in beats (eighth notes).
pub const SWING_SUBDIVISION: f64 = 0.5;

/// How far `swing` delays a grid position. Only off-beats of the
/// subdivision move; anything off the grid is left alone.
pub fn swing_delay(beat: f64, swing: f64, subdivision: f64) -> f64 {
    if swing <= 0.0 || subdivision <= 0.0 {
        return 0.0;
    }
    let position = beat / subdivision;
    let nearest = position.round();
    if (position - nearest).abs() > 1e-6 || (nearest as i64).rem_euclid(2) == 0 {
        return 0.0;
    }
    swing * subdivision / 3.0
}

/// Fixed-point beat representation with 16 fractional bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatTime {
    beats: i64,
}

impl BeatTime {
    const SCALE: i64 = 65_536;

    /// Zero beat time constant.
    pub const ZERO: BeatTime = BeatTime { beats: 0 };

    /// Create a BeatTime from a floating-point beat value.
    #[inline]
    pub fn from_float(value: f64) -> Self {
        Self {
            beats: (value * Self::SCALE as f64).round() as i64,
        }
    }

    /// Convert to a floating-point beat value.
    #[inline]
    pub fn to_float(self) -> f64 {
        self.beats as f64 / Self::SCALE as f64
    }
}

impl std::ops::Add for BeatTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            beats: self.beats.saturating_add(rhs.beats),
        }
    }
}

impl std::ops::Sub for BeatTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            beats: self.beats.saturating_sub(rhs.beats),
        }
    }
}

impl From<f64> for BeatTime {
    fn from(value: f64) -> Self {
        BeatTime::from_float(value)
    }
}

/// Musical time signature (numerator/denominator).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    /// Create a new time signature.
    ///
    /// Values are clamped to at least 1 to prevent division by zero.
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator: numerator.max(1),
            denominator: denominator.max(1),
        }
    }

    /// Calculate the number of quarter-note beats per bar.
    pub fn beats_per_bar(&self) -> f64 {
        self.numerator as f64 * (4.0 / self.denominator as f64)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

/// Latency compensation configuration in milliseconds.
///
/// These values are added to scheduled event times to account for
/// network transmission, server processing, and audio buffering delays.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyCompensation {
    /// Network round-trip latency.
    pub network_latency_ms: f64,
    /// Server-side processing latency.
    pub server_processing_ms: f64,
    /// Audio buffer latency.
    pub audio_buffer_ms: f64,
    /// Additional safety margin.
    pub safety_margin_ms: f64,
}

impl Default for LatencyCompensation {
    fn default() -> Self {
        Self {
            network_latency_ms: 20.0,
            server_processing_ms: 10.0,
            audio_buffer_ms: 2.0,
            safety_margin_ms: 20.0,
        }
    }
}

impl LatencyCompensation {
    /// Total latency in milliseconds.
    pub fn total_ms(&self) -> f64 {
        self.network_latency_ms
            + self.server_processing_ms
            + self.audio_buffer_ms
            + self.safety_margin_ms
    }

    /// Total latency in seconds.
    pub fn total_seconds(&self) -> f64 {
        self.total_ms() / 1000.0
    }
}

/// A linear tempo change between two BPM values.
#[derive(Clone, Debug)]
struct TempoRamp {
    from_bpm: f64,
    to_bpm: f64,
    start: Instant,
    duration: Duration,
}

impl TempoRamp {
    /// Signed offset of `time` from the ramp start, in seconds.
    fn offset(&self, time: Instant) -> f64 {
        if time >= self.start {
            time.duration_since(self.start).as_secs_f64()
        } else {
            -self.start.duration_since(time).as_secs_f64()
        }
    }

    fn bpm_at(&self, time: Instant) -> f64 {
        let x = self.offset(time);
        let d = self.duration.as_secs_f64();
        if x <= 0.0 {
            self.from_bpm
        } else if d <= 0.0 || x >= d {
            self.to_bpm
        } else {
            self.from_bpm + (self.to_bpm - self.from_bpm) * (x / d)
        }
    }

    /// Integral of BPM over seconds from the ramp start to offset `x`.
    fn integral(&self, x: f64) -> f64 {
        let d = self.duration.as_secs_f64();
        if x <= 0.0 {
            self.from_bpm * x
        } else if d <= 0.0 {
            self.to_bpm * x
        } else if x >= d {
            (self.from_bpm + self.to_bpm) * 0.5 * d + self.to_bpm * (x - d)
        } else {
            self.from_bpm * x + (self.to_bpm - self.from_bpm) * x * x / (2.0 * d)
        }
    }

    /// Inverse of [`Self::integral`].
    fn offset_for_integral(&self, value: f64) -> f64 {
        let d = self.duration.as_secs_f64();
        if value <= 0.0 {
            return value / self.from_bpm;
        }
        let ramp_total = (self.from_bpm + self.to_bpm) * 0.5 * d;
        if d <= 0.0 || value >= ramp_total {
            return d.max(0.0) + (value - ramp_total.max(0.0)) / self.to_bpm;
        }
        let a = (self.to_bpm - self.from_bpm) / (2.0 * d);
        if a.abs() < 1e-12 {
            return value / self.from_bpm;
        }
        // Stable form of the quadratic root for either ramp direction.
        2.0 * value / (self.from_bpm + (self.from_bpm * self.from_bpm + 4.0 * a * value).sqrt())
    }

    fn beats_between(&self, from: Instant, to: Instant) -> f64 {
        (self.integral(self.offset(to)) - self.integral(self.offset(from))) / 60.0
    }
}

/// Transport clock shared by the pattern scheduler and the melody player.
///
/// The clock maintains an anchor point (beat position at a specific instant)
/// and integrates the tempo, which may be mid-ramp, to find beat positions
/// at other times. It also owns the swing amount applied to off-beat notes.
#[derive(Clone, Debug)]
pub struct TransportClock {
    bpm: f64,
    ramp: Option<TempoRamp>,
    swing: f64,
    swing_subdivision: f64,
    signature: TimeSignature,
    latency: LatencyCompensation,
    running: bool,
    anchor_instant: Instant,
    anchor_beat: BeatTime,
}

impl Default for TransportClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportClock {
    /// Create a new transport clock at 120 BPM, 4/4 time, stopped at beat 0.
    pub fn new() -> Self {
        Self {
            bpm: 120.0,
            ramp: None,
            swing: 0.0,
            swing_subdivision: SWING_SUBDIVISION,
            signature: TimeSignature::default(),
            latency: LatencyCompensation::default(),
            running: false,
            anchor_instant: Instant::now(),
            anchor_beat: BeatTime::ZERO,
        }
    }

    fn reanchor(&mut self, now: Instant) {
        let beat = self.beat_at(now);
        self.anchor_beat = beat;
        self.anchor_instant = now;
    }

    /// Set the BPM immediately, preserving the current beat position.
    pub fn set_bpm(&mut self, bpm: f64, now: Instant) {
        self.reanchor(now);
        self.ramp = None;
        self.bpm = bpm.clamp(1.0, 999.0);
    }

    /// Ramp linearly from the current BPM to `bpm` over `seconds`.
    pub fn ramp_bpm(&mut self, bpm: f64, seconds: f64, now: Instant) {
        let from_bpm = self.bpm_at(now);
        self.reanchor(now);
        let to_bpm = bpm.clamp(1.0, 999.0);
        self.bpm = to_bpm;
        self.ramp = Some(TempoRamp {
            from_bpm,
            to_bpm,
            start: now,
            duration: Duration::from_secs_f64(seconds.max(0.0)),
        });
    }

    /// Target BPM (the value the tempo settles on after any ramp).
    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Instantaneous BPM at `time`, accounting for an in-flight ramp.
    pub fn bpm_at(&self, time: Instant) -> f64 {
        match &self.ramp {
            Some(ramp) => ramp.bpm_at(time),
            None => self.bpm,
        }
    }

    /// Set the swing amount (0.0 = straight, 1.0 = triplet feel). No ramp.
    pub fn set_swing(&mut self, amount: f64) {
        self.swing = amount.clamp(0.0, 1.0);
    }

    /// Current swing amount.
    pub fn swing(&self) -> f64 {
        self.swing
    }

    /// Set the swing subdivision in beats (0.5 = eighth notes).
    pub fn set_swing_subdivision(&mut self, beats: f64) {
        self.swing_subdivision = beats.max(0.0625);
    }

    /// Shift a beat position that lands on an off-beat of the swing
    /// subdivision. At full swing the off-beat moves to the triplet position.
    pub fn swung(&self, beat: f64) -> f64 {
        beat + swing_delay(beat, self.swing, self.swing_subdivision)
    }

    /// Get the current time signature.
    pub fn time_signature(&self) -> TimeSignature {
        self.signature
    }

    /// Beats in one measure.
    pub fn beats_per_bar(&self) -> f64 {
        self.signature.beats_per_bar()
    }

    /// Start the transport at the given instant.
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.anchor_instant = now;
        self.running = true;
    }

    /// Stop the transport and rewind to beat 0.
    pub fn stop(&mut self, now: Instant) {
        self.anchor_instant = now;
        self.anchor_beat = BeatTime::ZERO;
        self.running = false;
    }

    /// Calculate the beat position at a given instant.
    pub fn beat_at(&self, time: Instant) -> BeatTime {
        if !self.running || time <= self.anchor_instant {
            return self.anchor_beat;
        }

        let beats_elapsed = match &self.ramp {
            Some(ramp) => ramp.beats_between(self.anchor_instant, time),
            None => time.duration_since(self.anchor_instant).as_secs_f64() / 60.0 * self.bpm,
        };
        self.anchor_beat + BeatTime::from_float(beats_elapsed)
    }

    /// Instant at which the transport reaches `beat`.
    ///
    /// Beats already in the past (or a stopped transport) map to the anchor instant.
    pub fn instant_at_beat(&self, beat: f64) -> Instant {
        let delta_beats = beat - self.anchor_beat.to_float();
        if !self.running || delta_beats <= 0.0 {
            return self.anchor_instant;
        }
        let seconds = match &self.ramp {
            Some(ramp) => {
                let anchor_offset = ramp.offset(self.anchor_instant);
                let target = ramp.integral(anchor_offset) + delta_beats * 60.0;
                ramp.offset_for_integral(target) - anchor_offset
            }
            None => delta_beats * 60.0 / self.bpm,
        };
        self.anchor_instant + Duration::from_secs_f64(seconds.max(0.0))
    }

    /// Update the anchor to the current beat position and retire a finished ramp.
    pub fn update(&mut self, now: Instant) -> BeatTime {
        let beat = self.beat_at(now);
        if self.running {
            self.anchor_beat = beat;
            self.anchor_instant = now;
        }
        if let Some(ramp) = &self.ramp {
            if now >= ramp.start + ramp.duration && now >= self.anchor_instant {
                self.ramp = None;
            }
        }
        beat
    }

    /// Get the latency configuration.
    pub fn latency(&self) -> &LatencyCompensation {
        &self.latency
    }

    /// Replace the latency configuration.
    pub fn set_latency(&mut self, latency: LatencyCompensation) {
        self.latency = latency;
    }

    /// Calculate how many beats fit in the given lookahead window.
    pub fn lookahead_beats(&self, lookahead_ms: u64, now: Instant) -> f64 {
        let seconds = lookahead_ms as f64 / 1000.0;
        seconds * (self.bpm_at(now).max(self.bpm) / 60.0)
    }

    /// Check if the transport is running.
    pub fn is_running(&self) -> bool {
        self.running
    }
}
