//! Beat-based loop scheduler.
//!
//! Every loop (the measure loop, the melody motif, the victory fanfare)
//! repeats a cycle of fixed length from a start beat, optionally until an
//! end beat. The engine asks which cycles enter the lookahead window,
//! generates their notes once, and enqueues them here; the scheduler then
//! hands out notes as they come due. Disposing a loop drops its queued notes.

use crate::events::NoteEvent;
use crate::timing::{BeatTime, TransportClock};
use std::time::Instant;

/// Identifies what kind of loop is being scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopKind {
    /// The per-measure accompaniment.
    Measure,
    /// The looping melody motif.
    Motif,
    /// The one-shot victory fanfare.
    Victory,
}

impl LoopKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopKind::Measure => "measure",
            LoopKind::Motif => "motif",
            LoopKind::Victory => "victory",
        }
    }
}

/// Exclusive handle to a scheduled loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopHandle(u64);

impl LoopHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

/// The part of the transport timeline a scheduling pass covers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Window {
    pub current: f64,
    pub end: f64,
}

impl Window {
    /// Current beat plus the lookahead at the current tempo.
    pub fn at(clock: &TransportClock, now: Instant, lookahead_ms: u64) -> Self {
        let current = clock.beat_at(now).to_float();
        Self {
            current,
            end: current + clock.lookahead_beats(lookahead_ms, now),
        }
    }
}

/// A loop cycle whose start entered the window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DueCycle {
    pub handle: LoopHandle,
    pub kind: LoopKind,
    /// Zero-based cycle index since the loop started.
    pub cycle: u64,
    /// Absolute beat of the cycle start.
    pub beat: f64,
}

/// A note whose absolute beat entered the window.
#[derive(Clone, Debug, PartialEq)]
pub struct DueNote {
    pub handle: LoopHandle,
    pub kind: LoopKind,
    /// Absolute transport beat.
    pub beat: f64,
    pub event: NoteEvent,
}

#[derive(Debug)]
struct ScheduledLoop {
    handle: LoopHandle,
    kind: LoopKind,
    start_beat: f64,
    cycle_beats: f64,
    end_beat: Option<f64>,
    next_cycle: u64,
    /// Queued notes as (absolute beat, event), unordered.
    pending: Vec<(BeatTime, NoteEvent)>,
}

impl ScheduledLoop {
    fn cycle_start(&self, cycle: u64) -> f64 {
        self.start_beat + cycle as f64 * self.cycle_beats
    }

    fn ended_by(&self, beat: f64) -> bool {
        self.end_beat.is_some_and(|end| beat >= end - 1e-9)
    }
}

/// Loop scheduler with per-loop cycle tracking.
#[derive(Debug, Default)]
pub struct LoopScheduler {
    loops: Vec<ScheduledLoop>,
    next_id: u64,
}

impl LoopScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a loop. `end_beat` makes it one-shot.
    pub fn create(
        &mut self,
        kind: LoopKind,
        start_beat: f64,
        cycle_beats: f64,
        end_beat: Option<f64>,
    ) -> LoopHandle {
        self.next_id += 1;
        let handle = LoopHandle(self.next_id);
        log::debug!(
            "[SCHEDULER] Created {} loop #{} at beat {:.2} (cycle {:.1}, end {:?})",
            kind.as_str(),
            handle.0,
            start_beat,
            cycle_beats,
            end_beat
        );
        self.loops.push(ScheduledLoop {
            handle,
            kind,
            start_beat,
            cycle_beats: cycle_beats.max(0.25),
            end_beat,
            next_cycle: 0,
            pending: Vec::new(),
        });
        handle
    }

    /// Remove a loop and its queued notes. Returns false for unknown handles.
    pub fn dispose(&mut self, handle: LoopHandle) -> bool {
        let before = self.loops.len();
        self.loops.retain(|l| l.handle != handle);
        let removed = self.loops.len() != before;
        if removed {
            log::debug!("[SCHEDULER] Disposed loop #{}", handle.0);
        }
        removed
    }

    pub fn is_active(&self, handle: LoopHandle) -> bool {
        self.loops.iter().any(|l| l.handle == handle)
    }

    pub fn active_count(&self) -> usize {
        self.loops.len()
    }

    pub fn count_of(&self, kind: LoopKind) -> usize {
        self.loops.iter().filter(|l| l.kind == kind).count()
    }

    /// Drop every loop.
    pub fn clear(&mut self) {
        self.loops.clear();
    }

    /// Cycles whose start lies at or before the window end.
    ///
    /// Each cycle is reported once. Cycles that finished entirely before
    /// the current beat are skipped.
    pub fn cycles_due(&mut self, window: Window) -> Vec<DueCycle> {
        let mut due = Vec::new();
        for l in &mut self.loops {
            // Limit iterations per pass.
            for _ in 0..64 {
                let beat = l.cycle_start(l.next_cycle);
                if beat > window.end + 1e-9 || l.ended_by(beat) {
                    break;
                }
                let cycle = l.next_cycle;
                l.next_cycle += 1;
                if beat + l.cycle_beats <= window.current {
                    log::trace!("[SCHEDULER] Skipping stale cycle {} of loop #{}", cycle, l.handle.0);
                    continue;
                }
                due.push(DueCycle {
                    handle: l.handle,
                    kind: l.kind,
                    cycle,
                    beat,
                });
            }
        }
        due.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        due
    }

    /// Queue a cycle's notes. Notes at or past the loop's end beat are dropped.
    pub fn enqueue(&mut self, cycle: &DueCycle, events: Vec<NoteEvent>) {
        let Some(l) = self.loops.iter_mut().find(|l| l.handle == cycle.handle) else {
            return;
        };
        for event in events {
            let beat = cycle.beat + event.beat;
            if l.ended_by(beat) {
                continue;
            }
            l.pending.push((BeatTime::from_float(beat), event));
        }
    }

    /// Take every queued note at or before the window end, in beat order.
    pub fn drain_due(&mut self, window: Window) -> Vec<DueNote> {
        let end = BeatTime::from_float(window.end);
        let mut due = Vec::new();
        for l in &mut self.loops {
            let (ready, waiting): (Vec<_>, Vec<_>) =
                l.pending.drain(..).partition(|(beat, _)| *beat <= end);
            l.pending = waiting;
            due.extend(ready.into_iter().map(|(beat, event)| DueNote {
                handle: l.handle,
                kind: l.kind,
                beat: beat.to_float(),
                event,
            }));
        }
        due.sort_by(|a, b| a.beat.total_cmp(&b.beat));
        due
    }

    /// Remove one-shot loops whose end beat has passed. Returns their handles.
    pub fn retire_finished(&mut self, current_beat: f64) -> Vec<(LoopHandle, LoopKind)> {
        let finished: Vec<(LoopHandle, LoopKind)> = self
            .loops
            .iter()
            .filter(|l| l.ended_by(current_beat) && l.pending.is_empty())
            .map(|l| (l.handle, l.kind))
            .collect();
        for (handle, _) in &finished {
            self.dispose(*handle);
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoteSource;
    use crate::states::Layer;
    use crate::theory::Pitch;

    fn hit(beat: f64) -> NoteEvent {
        NoteEvent::new(beat, Pitch(43), 0.5, NoteSource::Layer(Layer::Bass))
    }

    fn window(current: f64, end: f64) -> Window {
        Window { current, end }
    }

    #[test]
    fn test_each_cycle_reported_once() {
        let mut scheduler = LoopScheduler::new();
        let handle = scheduler.create(LoopKind::Measure, 0.0, 4.0, None);

        let first = scheduler.cycles_due(window(0.0, 0.5));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].handle, handle);
        assert_eq!(first[0].cycle, 0);

        assert!(scheduler.cycles_due(window(0.5, 1.0)).is_empty());

        let next = scheduler.cycles_due(window(3.8, 4.3));
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].cycle, 1);
        assert_eq!(next[0].beat, 4.0);
    }

    #[test]
    fn test_notes_drain_in_beat_order() {
        let mut scheduler = LoopScheduler::new();
        scheduler.create(LoopKind::Measure, 0.0, 4.0, None);
        let cycles = scheduler.cycles_due(window(0.0, 0.5));
        scheduler.enqueue(&cycles[0], vec![hit(2.0), hit(0.0), hit(0.25)]);

        let due = scheduler.drain_due(window(0.0, 0.5));
        assert_eq!(due.iter().map(|n| n.beat).collect::<Vec<_>>(), vec![0.0, 0.25]);

        let later = scheduler.drain_due(window(1.8, 2.3));
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].beat, 2.0);
    }

    #[test]
    fn test_dispose_drops_pending_notes() {
        let mut scheduler = LoopScheduler::new();
        let handle = scheduler.create(LoopKind::Motif, 0.0, 16.0, None);
        let cycles = scheduler.cycles_due(window(0.0, 0.5));
        scheduler.enqueue(&cycles[0], vec![hit(0.0), hit(8.0)]);

        assert!(scheduler.dispose(handle));
        assert!(!scheduler.dispose(handle));
        assert!(scheduler.drain_due(window(0.0, 100.0)).is_empty());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn test_one_shot_loop_ends() {
        let mut scheduler = LoopScheduler::new();
        let handle = scheduler.create(LoopKind::Victory, 2.0, 32.0, Some(34.0));
        let cycles = scheduler.cycles_due(window(0.0, 40.0));
        assert_eq!(cycles.len(), 1);
        scheduler.enqueue(&cycles[0], vec![hit(0.0), hit(31.0), hit(33.0)]);

        // The note past the end beat was dropped.
        assert_eq!(scheduler.drain_due(window(0.0, 40.0)).len(), 2);

        assert!(scheduler.retire_finished(10.0).is_empty());
        assert_eq!(scheduler.retire_finished(34.0), vec![(handle, LoopKind::Victory)]);
        assert!(!scheduler.is_active(handle));
    }

    #[test]
    fn test_stale_cycles_are_skipped() {
        let mut scheduler = LoopScheduler::new();
        scheduler.create(LoopKind::Measure, 0.0, 4.0, None);
        // The first pass happens late, at beat 9.
        let cycles = scheduler.cycles_due(window(9.0, 9.5));
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle, 2);
    }

    #[test]
    fn test_counts_by_kind() {
        let mut scheduler = LoopScheduler::new();
        scheduler.create(LoopKind::Measure, 0.0, 4.0, None);
        scheduler.create(LoopKind::Victory, 0.0, 32.0, Some(32.0));
        assert_eq!(scheduler.count_of(LoopKind::Measure), 1);
        assert_eq!(scheduler.count_of(LoopKind::Motif), 0);
        scheduler.clear();
        assert_eq!(scheduler.active_count(), 0);
    }
}
