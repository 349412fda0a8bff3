//! Beat-domain dispatch for one slot
//!
//! [`SlotPlayer`] walks a tune's merged events against a beat cursor. It knows
//! nothing about wall-clock time: the scheduler converts elapsed time into
//! beats and calls [`SlotPlayer::advance`].

use super::backend::SoundBackend;
use super::types::{ActiveNoteHandle, MusicSlot};
use crate::ast::{NoteEvent, Tune};
use bounded_vec_deque::BoundedVecDeque;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Slack when comparing beat positions
const BEAT_EPSILON: f64 = 1e-9;

/// Beats covered by `elapsed` at `bpm` (quarter notes per minute) and a
/// global tempo multiplier.
pub fn beats_elapsed(elapsed: Duration, bpm: f64, multiplier: f64) -> f64 {
    elapsed.as_secs_f64() * bpm * multiplier / 60.0
}

/// Wall-clock length of `beats`; the inverse of [`beats_elapsed`].
pub fn beats_to_duration(beats: f64, bpm: f64, multiplier: f64) -> Duration {
    if bpm <= 0.0 || multiplier <= 0.0 || beats <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(beats * 60.0 / (bpm * multiplier))
}

/// Velocity actually sent for a note at the given master volume
pub fn dispatch_velocity(velocity: u8, volume: f32) -> u8 {
    (velocity as f32 * volume).round().clamp(0.0, 127.0) as u8
}

pub struct SlotPlayer {
    slot_id: u64,
    tune: Arc<Tune>,
    next_event: usize,
    position: f64,
    active: BoundedVecDeque<ActiveNoteHandle>,
}

impl SlotPlayer {
    pub fn new(slot: &MusicSlot, active_capacity: usize) -> Self {
        SlotPlayer {
            slot_id: slot.id,
            tune: Arc::clone(&slot.tune),
            next_event: 0,
            position: 0.0,
            active: BoundedVecDeque::new(active_capacity.max(1)),
        }
    }

    pub fn slot_id(&self) -> u64 {
        self.slot_id
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn active_notes(&self) -> Vec<ActiveNoteHandle> {
        self.active.iter().copied().collect()
    }

    /// Send a program change for every voice with an instrument
    pub fn start(&mut self, backend: &mut dyn SoundBackend) {
        let mut sent: Vec<u8> = Vec::new();
        for voice in self.tune.ordered_voices() {
            let Some(program) = voice.instrument else {
                continue;
            };
            if voice.muted || sent.contains(&voice.channel) {
                continue;
            }
            sent.push(voice.channel);
            if let Err(e) = backend.program_change(voice.channel, program) {
                warn!("Program change on channel {} failed: {}", voice.channel + 1, e);
            }
        }
    }

    /// Move the cursor forward by `beats`, sending every note-off and note-on
    /// that falls due on the way. At equal times note-offs go first.
    pub fn advance(&mut self, beats: f64, volume: f32, backend: &mut dyn SoundBackend) {
        let target = self.position + beats.max(0.0);
        loop {
            let next_off = self
                .active
                .iter()
                .map(|h| h.end)
                .fold(f64::INFINITY, f64::min);
            let next_on = self
                .tune
                .events
                .get(self.next_event)
                .map_or(f64::INFINITY, |e| e.start);
            let due = next_off.min(next_on);
            if due > target + BEAT_EPSILON {
                break;
            }
            if next_off <= next_on {
                self.release_until(next_off, backend);
            } else {
                let event = self.tune.events[self.next_event].clone();
                self.next_event += 1;
                self.sound(&event, volume, backend);
            }
        }
        self.position = target;
    }

    fn sound(&mut self, event: &NoteEvent, volume: f32, backend: &mut dyn SoundBackend) {
        let velocity = dispatch_velocity(event.velocity, volume);
        if velocity == 0 {
            return;
        }
        if let Some(i) = self
            .active
            .iter()
            .position(|h| h.pitch == event.pitch && h.channel == event.channel)
        {
            if let Some(handle) = self.active.remove(i) {
                note_off(backend, &handle);
            }
        }
        if let Err(e) = backend.note_on(event.channel, event.pitch, velocity) {
            warn!("Note on {} failed: {}", event.pitch, e);
            return;
        }
        let handle = ActiveNoteHandle {
            pitch: event.pitch,
            channel: event.channel,
            end: event.end(),
        };
        if let Some(evicted) = self.active.push_back(handle) {
            debug!("Active note registry full, releasing {}", evicted.pitch);
            note_off(backend, &evicted);
        }
    }

    fn release_until(&mut self, beat: f64, backend: &mut dyn SoundBackend) {
        while let Some(i) = self
            .active
            .iter()
            .position(|h| h.end <= beat + BEAT_EPSILON)
        {
            if let Some(handle) = self.active.remove(i) {
                note_off(backend, &handle);
            }
        }
    }

    /// Note-off for everything still sounding
    pub fn release_all(&mut self, backend: &mut dyn SoundBackend) {
        for handle in self.active.drain(..) {
            note_off(backend, &handle);
        }
    }

    /// Every note has been sent and released, and the cursor has reached
    /// the written end of the tune
    pub fn is_finished(&self) -> bool {
        self.next_event >= self.tune.events.len()
            && self.active.is_empty()
            && self.position + BEAT_EPSILON >= self.tune.duration_beats()
    }

    /// Start over from the first note, for looping slots
    pub fn rewind(&mut self, backend: &mut dyn SoundBackend) {
        self.release_all(backend);
        self.next_event = 0;
        self.position = 0.0;
    }
}

fn note_off(backend: &mut dyn SoundBackend, handle: &ActiveNoteHandle) {
    if let Err(e) = backend.note_off(handle.channel, handle.pitch) {
        warn!("Note off {} failed: {}", handle.pitch, e);
    }
}
