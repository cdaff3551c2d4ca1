//! The music engine: the one owner of transport, instruments and loops.
//!
//! The host constructs a [`MusicEngine`] around a [`ToneBackend`] and calls
//! it on game events. Scheduling is cooperative: the host calls
//! [`MusicEngine::pump`] regularly (a few times per lookahead window) and
//! the engine sends every note that comes due within the window.
//!
//! Every operation is best-effort. Failures are logged, counted in
//! [`EngineStats`] and published as [`EngineEvent`]s; none reach the caller.

use crate::backend::ToneBackend;
use crate::config::EngineConfig;
use crate::effects::{self, SoundEffect};
use crate::events::ScheduledNote;
use crate::instruments::{InstrumentBank, SetupReport, Voice};
use crate::melody;
use crate::patterns::{self, MEASURE_BEATS};
use crate::scheduler::{DueNote, LoopHandle, LoopKind, LoopScheduler, Window};
use crate::selector::{PlaybackContext, ResolvedState, StateSelector};
use crate::states::MusicStateName;
use crate::theory::Scale;
use crate::timing::TransportClock;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::time::{Duration, Instant};

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running(MusicStateName),
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => f.write_str("idle"),
            EngineState::Running(name) => write!(f, "running({})", name),
        }
    }
}

/// Notifications for observers (UI, logs, tests).
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    SetupCompleted(SetupReport),
    StateChanged {
        from: EngineState,
        to: MusicStateName,
        tempo: u32,
    },
    LoopCreated {
        handle: LoopHandle,
        kind: LoopKind,
    },
    LoopDisposed {
        handle: LoopHandle,
        kind: LoopKind,
    },
    TempoNudged {
        phrase: u64,
        delta_bpm: f64,
        /// Transport beat the ramp started on.
        beat: f64,
    },
    Stopped,
    MusicToggled(bool),
    BackendFailure(String),
    Shutdown,
}

/// Counters for everything the engine did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Measure loops.
    pub loops_created: u64,
    pub loops_disposed: u64,
    /// Motif and victory parts.
    pub parts_created: u64,
    pub parts_disposed: u64,
    pub notes_sent: u64,
    pub notes_failed: u64,
    pub effects_played: u64,
}

/// A phrase-changer tempo shift waiting for its phrase to begin.
#[derive(Debug, Clone, Copy)]
struct PhraseNudge {
    beat: f64,
    phrase: u64,
    delta_bpm: f64,
}

pub struct MusicEngine<B: ToneBackend> {
    backend: B,
    config: EngineConfig,
    scale: Scale,
    transport: TransportClock,
    selector: StateSelector,
    scheduler: LoopScheduler,
    /// Built lazily on first use.
    instruments: Option<InstrumentBank>,
    rng: StdRng,
    state: EngineState,
    active_loop: Option<LoopHandle>,
    melody_part: Option<LoopHandle>,
    victory_part: Option<LoopHandle>,
    pending_nudge: Option<PhraseNudge>,
    music_enabled: bool,
    observers: Vec<Sender<EngineEvent>>,
    stats: EngineStats,
}

impl<B: ToneBackend> MusicEngine<B> {
    pub fn new(backend: B, config: EngineConfig) -> Self {
        let mut transport = TransportClock::new();
        transport.set_latency(config.latency.clone());
        Self {
            backend,
            scale: config.scale(),
            rng: StdRng::seed_from_u64(config.seed),
            music_enabled: config.music_enabled,
            config,
            transport,
            selector: StateSelector::new(),
            scheduler: LoopScheduler::new(),
            instruments: None,
            state: EngineState::Idle,
            active_loop: None,
            melody_part: None,
            victory_part: None,
            pending_nudge: None,
            observers: Vec::new(),
            stats: EngineStats::default(),
        }
    }

    /// Receive engine events. Dropped receivers are pruned on the next event.
    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    fn emit(&mut self, event: EngineEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Build the instrument bank once. Later calls return the first report.
    pub fn setup(&mut self) -> &SetupReport {
        let bank = match self.instruments.take() {
            Some(bank) => bank,
            None => {
                let bank = InstrumentBank::setup(&mut self.backend, &self.config);
                self.emit(EngineEvent::SetupCompleted(bank.report().clone()));
                bank
            }
        };
        self.instruments.insert(bank).report()
    }

    pub fn setup_report(&self) -> Option<&SetupReport> {
        self.instruments.as_ref().map(|bank| bank.report())
    }

    /// Switch to a music state, replacing the running measure loop.
    ///
    /// Returns `None` when music is disabled.
    pub fn start(
        &mut self,
        name: MusicStateName,
        context: &PlaybackContext,
        now: Instant,
    ) -> Option<ResolvedState> {
        if !self.music_enabled {
            log::debug!("[ENGINE] Music disabled, ignoring start({})", name);
            return None;
        }
        self.setup();
        self.transport.update(now);

        let resolved = self
            .selector
            .pick_state(name, context, &mut self.transport, now);

        self.dispose(LoopKind::Measure);
        self.dispose(LoopKind::Victory);

        let start_beat = if self.transport.is_running() {
            next_bar(self.transport.beat_at(now).to_float())
        } else {
            0.0
        };
        let handle = self
            .scheduler
            .create(LoopKind::Measure, start_beat, MEASURE_BEATS, None);
        self.active_loop = Some(handle);
        self.stats.loops_created += 1;
        self.emit(EngineEvent::LoopCreated {
            handle,
            kind: LoopKind::Measure,
        });

        self.transport.start(now);

        let from = self.state;
        self.state = EngineState::Running(name);
        log::info!(
            "[ENGINE] {} -> {} at {} BPM, measure loop from beat {:.1}",
            from,
            self.state,
            resolved.tempo,
            start_beat
        );
        self.emit(EngineEvent::StateChanged {
            from,
            to: name,
            tempo: resolved.tempo,
        });

        self.pump(now);
        Some(resolved)
    }

    /// [`Self::start`] with a state given by name; unknown names play exploration.
    pub fn start_named(
        &mut self,
        name: &str,
        context: &PlaybackContext,
        now: Instant,
    ) -> Option<ResolvedState> {
        self.start(MusicStateName::parse_or_default(name), context, now)
    }

    /// Halt all scheduled playback. Safe to call at any time.
    pub fn stop(&mut self, now: Instant) {
        let was_active = self.state != EngineState::Idle
            || self.active_loop.is_some()
            || self.melody_part.is_some()
            || self.victory_part.is_some();

        self.dispose(LoopKind::Measure);
        self.dispose(LoopKind::Motif);
        self.dispose(LoopKind::Victory);
        self.selector.reset_swing(&mut self.transport);
        self.transport.stop(now);

        if self.instruments.is_some() {
            if let Err(e) = self.backend.release_all() {
                log::warn!("[ENGINE] Release failed: {}", e);
                self.emit(EngineEvent::BackendFailure(e.to_string()));
            }
        }

        self.state = EngineState::Idle;
        if was_active {
            log::info!("[ENGINE] Stopped");
            self.emit(EngineEvent::Stopped);
        }
    }

    /// Start (or restart) the looping melody motif after a one-measure lead-in.
    pub fn play_melody_motif(&mut self, now: Instant) -> Option<LoopHandle> {
        if !self.music_enabled {
            return None;
        }
        self.setup();
        self.dispose(LoopKind::Motif);
        self.wake_transport(LoopKind::Motif, now);

        let start_beat =
            next_bar(self.transport.beat_at(now).to_float()) + melody::MOTIF_LEAD_IN_BEATS;
        let handle = self
            .scheduler
            .create(LoopKind::Motif, start_beat, melody::MOTIF_CYCLE_BEATS, None);
        self.melody_part = Some(handle);
        self.part_created(handle, LoopKind::Motif);
        Some(handle)
    }

    /// Play the victory fanfare once, half a measure from now.
    pub fn play_victory_melody(&mut self, now: Instant) -> Option<LoopHandle> {
        if !self.music_enabled {
            return None;
        }
        self.setup();
        self.dispose(LoopKind::Victory);
        self.wake_transport(LoopKind::Victory, now);

        let start_beat = self.transport.beat_at(now).to_float() + melody::VICTORY_DELAY_BEATS;
        let end_beat = start_beat + melody::VICTORY_LENGTH_BEATS;
        let handle = self.scheduler.create(
            LoopKind::Victory,
            start_beat,
            melody::VICTORY_LENGTH_BEATS,
            Some(end_beat),
        );
        self.victory_part = Some(handle);
        self.part_created(handle, LoopKind::Victory);
        Some(handle)
    }

    /// Melody parts run on the transport even with no accompaniment.
    fn wake_transport(&mut self, kind: LoopKind, now: Instant) {
        if !self.transport.is_running() {
            log::info!("[ENGINE] Starting transport for the {} part", kind.as_str());
            self.transport.start(now);
        }
    }

    fn part_created(&mut self, handle: LoopHandle, kind: LoopKind) {
        self.stats.parts_created += 1;
        log::info!("[ENGINE] {} part #{} created", kind.as_str(), handle.id());
        self.emit(EngineEvent::LoopCreated { handle, kind });
    }

    fn slot_mut(&mut self, kind: LoopKind) -> &mut Option<LoopHandle> {
        match kind {
            LoopKind::Measure => &mut self.active_loop,
            LoopKind::Motif => &mut self.melody_part,
            LoopKind::Victory => &mut self.victory_part,
        }
    }

    /// Dispose the handle held for `kind`, if any.
    fn dispose(&mut self, kind: LoopKind) {
        if kind == LoopKind::Motif {
            self.pending_nudge = None;
        }
        let Some(handle) = self.slot_mut(kind).take() else {
            return;
        };
        self.scheduler.dispose(handle);
        match kind {
            LoopKind::Measure => self.stats.loops_disposed += 1,
            LoopKind::Motif | LoopKind::Victory => self.stats.parts_disposed += 1,
        }
        self.emit(EngineEvent::LoopDisposed { handle, kind });
    }

    /// Send every note due within the lookahead window. Returns the number sent.
    pub fn pump(&mut self, now: Instant) -> usize {
        if !self.transport.is_running() {
            return 0;
        }
        self.transport.update(now);
        self.apply_due_nudge(now);
        let window = Window::at(&self.transport, now, self.config.lookahead_ms);

        for cycle in self.scheduler.cycles_due(window) {
            let events = match cycle.kind {
                LoopKind::Measure => match self.selector.current() {
                    Some(state) => {
                        patterns::measure_events(state, &self.scale, cycle.cycle, &mut self.rng)
                    }
                    None => Vec::new(),
                },
                LoopKind::Motif => {
                    if cycle.cycle % 2 == 0 {
                        let phrase = melody::phrase_of_cycle(cycle.cycle);
                        if let Some(delta_bpm) = melody::phrase_nudge(phrase) {
                            self.pending_nudge = Some(PhraseNudge {
                                beat: cycle.beat,
                                phrase,
                                delta_bpm,
                            });
                        }
                    }
                    melody::motif_cycle_events(cycle.cycle, &self.scale)
                }
                LoopKind::Victory => melody::victory_events(&self.scale),
            };
            log::trace!(
                "[ENGINE] {} cycle {} at beat {:.2}: {} notes",
                cycle.kind.as_str(),
                cycle.cycle,
                cycle.beat,
                events.len()
            );
            self.scheduler.enqueue(&cycle, events);
        }

        let due = self.scheduler.drain_due(window);
        let mut sent = 0;
        for note in &due {
            if self.send(note) {
                sent += 1;
            }
        }

        for (handle, kind) in self.scheduler.retire_finished(window.current) {
            if *self.slot_mut(kind) == Some(handle) {
                *self.slot_mut(kind) = None;
            }
            self.stats.parts_disposed += 1;
            log::info!("[ENGINE] {} part #{} finished", kind.as_str(), handle.id());
            self.emit(EngineEvent::LoopDisposed { handle, kind });
        }

        if self.state == EngineState::Idle && self.scheduler.active_count() == 0 {
            log::debug!("[ENGINE] Last part finished, stopping transport");
            self.transport.stop(now);
        }
        sent
    }

    /// Start the phrase-changer ramp once its phrase has begun.
    fn apply_due_nudge(&mut self, now: Instant) {
        let beat = self.transport.beat_at(now).to_float();
        let Some(nudge) = self.pending_nudge.filter(|n| beat >= n.beat - 1e-9) else {
            return;
        };
        self.pending_nudge = None;
        self.selector
            .nudge_tempo(nudge.delta_bpm, &mut self.transport, now);
        self.emit(EngineEvent::TempoNudged {
            phrase: nudge.phrase,
            delta_bpm: nudge.delta_bpm,
            beat,
        });
    }

    fn send(&mut self, due: &DueNote) -> bool {
        let Some(bank) = &self.instruments else {
            return false;
        };
        let event = &due.event;
        let beat = if event.swing {
            self.transport.swung(due.beat)
        } else {
            due.beat
        };
        let at = self.transport.instant_at_beat(beat);
        let note = ScheduledNote {
            voice: bank.voice_for(event.source),
            pitches: event.pitches.clone(),
            at,
            beat,
            duration_secs: event.duration * 60.0 / self.transport.bpm_at(at),
            velocity: event.velocity,
        };
        self.play_note(&note)
    }

    fn play_note(&mut self, note: &ScheduledNote) -> bool {
        match self.backend.play(note) {
            Ok(()) => {
                self.stats.notes_sent += 1;
                true
            }
            Err(e) => {
                self.stats.notes_failed += 1;
                log::warn!("[ENGINE] Note on {} dropped: {}", note.voice.name(), e);
                self.emit(EngineEvent::BackendFailure(e.to_string()));
                false
            }
        }
    }

    /// Play a game sound effect immediately.
    pub fn play_effect(&mut self, effect: SoundEffect, now: Instant) -> bool {
        if !self.music_enabled {
            return false;
        }
        self.setup();
        let note = ScheduledNote {
            voice: Voice::Synth(effect.layer()),
            pitches: effect.pitches(),
            at: now,
            beat: self.transport.beat_at(now).to_float(),
            duration_secs: effect.duration_beats() * 60.0 / self.transport.bpm_at(now),
            velocity: 0.8,
        };
        log::debug!("[ENGINE] Effect {}", effect);
        let played = self.play_note(&note);
        if played {
            self.stats.effects_played += 1;
        }
        played
    }

    /// Play the opening theme as a quick arpeggio.
    pub fn play_theme_snippet(&mut self, now: Instant) -> usize {
        if !self.music_enabled {
            return 0;
        }
        self.setup();
        let Some(bank) = &self.instruments else {
            return 0;
        };
        let voice = bank.voice_for(effects::THEME_SOURCE);
        let mut sent = 0;
        for (i, pitch) in effects::theme_pitches().into_iter().enumerate() {
            let at = now + Duration::from_secs_f64(i as f64 * effects::THEME_SPACING_SECS);
            let note = ScheduledNote {
                voice,
                pitches: vec![pitch],
                at,
                beat: self.transport.beat_at(at).to_float(),
                duration_secs: effects::THEME_NOTE_SECS,
                velocity: 0.75,
            };
            if self.play_note(&note) {
                sent += 1;
            }
        }
        sent
    }

    /// Turn music on or off. Turning it off stops playback.
    pub fn set_music_enabled(&mut self, enabled: bool, now: Instant) {
        if self.music_enabled == enabled {
            return;
        }
        if !enabled {
            self.stop(now);
        }
        self.music_enabled = enabled;
        log::info!("[ENGINE] Music {}", if enabled { "enabled" } else { "disabled" });
        self.emit(EngineEvent::MusicToggled(enabled));
    }

    pub fn music_enabled(&self) -> bool {
        self.music_enabled
    }

    /// Stop everything and release the instrument bank.
    pub fn shutdown(&mut self, now: Instant) {
        self.stop(now);
        if let Some(bank) = self.instruments.take() {
            bank.teardown(&mut self.backend);
            self.emit(EngineEvent::Shutdown);
        }
    }

    /// Whether a measure loop is active.
    pub fn is_playing(&self) -> bool {
        self.active_loop.is_some()
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn current_state(&self) -> Option<&ResolvedState> {
        match self.state {
            EngineState::Running(_) => self.selector.current(),
            EngineState::Idle => None,
        }
    }

    pub fn transport(&self) -> &TransportClock {
        &self.transport
    }

    pub fn scheduler(&self) -> &LoopScheduler {
        &self.scheduler
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Recover the backend, e.g. to write a captured score.
    pub fn into_backend(self) -> B {
        self.backend
    }
}

impl<B: ToneBackend> fmt::Debug for MusicEngine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MusicEngine")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// First bar boundary at or after `beat`.
fn next_bar(beat: f64) -> f64 {
    (((beat - 1e-6) / MEASURE_BEATS).ceil() * MEASURE_BEATS).max(0.0)
}
