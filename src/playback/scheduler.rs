//! Real-time slot queue
//!
//! [`PlaybackScheduler`] owns a FIFO of [`MusicSlot`]s and a timing thread.
//! Control calls lock the shared state, change it and wake the thread; they
//! never talk to the backend. The thread ticks every few milliseconds, copies
//! what it needs under the lock, then dispatches notes with the lock released.

use super::backend::SoundBackend;
use super::player::{beats_elapsed, SlotPlayer};
use super::types::{MusicSlot, PlaybackStatus, SlotInfo, SlotOptions};
use crate::ast::Tune;
use crate::config::PlayerConfig;
use crate::error::SchedulerError;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Wake {
    Changed,
    Shutdown,
}

/// State guarded by the single scheduler lock
#[derive(Debug)]
struct Shared {
    queue: VecDeque<MusicSlot>,
    current: Option<MusicSlot>,
    paused: bool,
    volume: f32,
    tempo_multiplier: f64,
    position: f64,
    backend_available: bool,
    next_id: u64,
    /// Set by stop; the timing thread drops any pending gap when it sees it
    stopped: bool,
    shut_down: bool,
}

impl Shared {
    /// Make the next queued slot current
    fn advance_queue(&mut self) {
        self.current = self.queue.pop_front();
        self.paused = false;
        self.position = 0.0;
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PlaybackScheduler {
    shared: Arc<Mutex<Shared>>,
    wake: Sender<Wake>,
    handle: Mutex<Option<JoinHandle<()>>>,
    queue_capacity: usize,
}

impl PlaybackScheduler {
    /// Start the timing thread; the backend moves onto it.
    pub fn new(backend: Box<dyn SoundBackend>, config: &PlayerConfig) -> Self {
        let shared = Arc::new(Mutex::new(Shared {
            queue: VecDeque::new(),
            current: None,
            paused: false,
            volume: config.volume,
            tempo_multiplier: config.tempo_multiplier,
            position: 0.0,
            backend_available: backend.is_available(),
            next_id: 1,
            stopped: false,
            shut_down: false,
        }));
        let (sender, receiver) = unbounded();

        let timing = TimingLoop {
            shared: Arc::clone(&shared),
            wake: receiver,
            backend,
            tick: config.tick,
            default_gap: config.gap,
            active_capacity: config.active_note_capacity,
            player: None,
            gap_until: None,
            last_tick: Instant::now(),
        };
        let handle = std::thread::Builder::new()
            .name("abcplay-scheduler".to_string())
            .spawn(move || timing.run());
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start the timing thread: {}", e);
                lock(&shared).shut_down = true;
                None
            }
        };

        PlaybackScheduler {
            shared,
            wake: sender,
            handle: Mutex::new(handle),
            queue_capacity: config.queue_capacity,
        }
    }

    fn wake(&self) {
        // A closed channel means the thread already exited
        let _ = self.wake.send(Wake::Changed);
    }

    /// Queue a tune and return its slot id. Never blocks on playback.
    pub fn enqueue(&self, tune: Tune, options: SlotOptions) -> Result<u64, SchedulerError> {
        if !tune.is_complete() {
            return Err(SchedulerError::IncompleteTune {
                count: tune.diagnostics.len(),
            });
        }
        let id = {
            let mut shared = lock(&self.shared);
            if shared.shut_down {
                return Err(SchedulerError::ShutDown);
            }
            if !shared.backend_available {
                return Err(SchedulerError::BackendUnavailable(
                    "backend is not accepting messages".to_string(),
                ));
            }
            if shared.queue.len() >= self.queue_capacity {
                return Err(SchedulerError::QueueFull {
                    capacity: self.queue_capacity,
                });
            }
            let id = shared.next_id;
            shared.next_id += 1;
            let slot = MusicSlot::new(id, tune, options);
            info!("Queued slot {} ({})", id, slot.title);
            shared.queue.push_back(slot);
            id
        };
        self.wake();
        Ok(id)
    }

    /// Silence everything, halt and drop queued slots
    pub fn stop(&self) {
        {
            let mut shared = lock(&self.shared);
            shared.queue.clear();
            shared.current = None;
            shared.paused = false;
            shared.position = 0.0;
            shared.stopped = true;
        }
        self.wake();
    }

    /// Freeze the cursor; sounding notes are left alone
    pub fn pause(&self) {
        let mut shared = lock(&self.shared);
        if shared.current.is_some() {
            shared.paused = true;
        }
    }

    pub fn resume(&self) {
        lock(&self.shared).paused = false;
        self.wake();
    }

    /// Silence the current slot and move to the next. Returns the skipped id.
    pub fn skip(&self) -> Option<u64> {
        let skipped = {
            let mut shared = lock(&self.shared);
            let skipped = shared.current.as_ref().map(|slot| slot.id);
            shared.advance_queue();
            skipped
        };
        self.wake();
        skipped
    }

    /// Drop a queued slot; removing the playing slot skips it.
    pub fn remove(&self, id: u64) -> Result<(), SchedulerError> {
        {
            let mut shared = lock(&self.shared);
            if shared.current.as_ref().is_some_and(|slot| slot.id == id) {
                shared.advance_queue();
            } else {
                let index = shared
                    .queue
                    .iter()
                    .position(|slot| slot.id == id)
                    .ok_or(SchedulerError::UnknownSlot(id))?;
                shared.queue.remove(index);
                return Ok(());
            }
        }
        self.wake();
        Ok(())
    }

    /// Drop every queued slot, leaving the current one playing. Returns how
    /// many were dropped.
    pub fn clear(&self) -> usize {
        let mut shared = lock(&self.shared);
        let dropped = shared.queue.len();
        shared.queue.clear();
        dropped
    }

    pub fn set_volume(&self, volume: f32) -> Result<(), SchedulerError> {
        if !(0.0..=1.0).contains(&volume) {
            return Err(SchedulerError::InvalidValue(format!(
                "volume must be between 0 and 1, got {}",
                volume
            )));
        }
        lock(&self.shared).volume = volume;
        Ok(())
    }

    /// Set the global tempo multiplier. Notes already sent keep their timing.
    pub fn set_tempo(&self, multiplier: f64) -> Result<(), SchedulerError> {
        if !(multiplier > 0.0 && multiplier.is_finite()) {
            return Err(SchedulerError::InvalidValue(format!(
                "tempo must be positive, got {}",
                multiplier
            )));
        }
        lock(&self.shared).tempo_multiplier = multiplier;
        Ok(())
    }

    pub fn status(&self) -> PlaybackStatus {
        let shared = lock(&self.shared);
        PlaybackStatus {
            queue_size: shared.queue.len(),
            playing: shared.current.is_some() && !shared.paused,
            paused: shared.paused,
            volume: shared.volume,
            tempo_multiplier: shared.tempo_multiplier,
            current: shared.current.as_ref().map(MusicSlot::info),
            position: shared.position,
        }
    }

    /// The current slot, if any, followed by the queued slots in play order
    pub fn list(&self) -> Vec<SlotInfo> {
        let shared = lock(&self.shared);
        shared
            .current
            .iter()
            .chain(shared.queue.iter())
            .map(MusicSlot::info)
            .collect()
    }

    /// Release sounding notes and stop the timing thread
    pub fn shutdown(&self) {
        lock(&self.shared).shut_down = true;
        let _ = self.wake.send(Wake::Shutdown);
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Timing thread panicked");
            }
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// What the loop copies out of the shared state each tick
struct Snapshot {
    slot: Option<MusicSlot>,
    paused: bool,
    volume: f32,
    tempo_multiplier: f64,
}

struct TimingLoop {
    shared: Arc<Mutex<Shared>>,
    wake: Receiver<Wake>,
    backend: Box<dyn SoundBackend>,
    tick: Duration,
    default_gap: Duration,
    active_capacity: usize,
    player: Option<SlotPlayer>,
    gap_until: Option<Instant>,
    last_tick: Instant,
}

impl TimingLoop {
    fn run(mut self) {
        debug!("Timing loop started, tick {:?}", self.tick);
        'ticks: loop {
            match self.wake.recv_timeout(self.tick) {
                Ok(Wake::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(Wake::Changed) | Err(RecvTimeoutError::Timeout) => {}
            }
            while let Ok(wake) = self.wake.try_recv() {
                if wake == Wake::Shutdown {
                    break 'ticks;
                }
            }
            self.tick();
        }
        if let Some(mut player) = self.player.take() {
            player.release_all(self.backend.as_mut());
        }
        debug!("Timing loop stopped");
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;

        let snapshot = self.snapshot(now);

        // The current slot was replaced by stop, skip or remove
        let current_id = snapshot.slot.as_ref().map(|slot| slot.id);
        if self.player.as_ref().map(SlotPlayer::slot_id) != current_id {
            if let Some(mut player) = self.player.take() {
                debug!("Releasing slot {}", player.slot_id());
                player.release_all(self.backend.as_mut());
            }
            if let Some(slot) = &snapshot.slot {
                info!("Playing slot {} ({})", slot.id, slot.title);
                let mut player = SlotPlayer::new(slot, self.active_capacity);
                player.start(self.backend.as_mut());
                player.advance(0.0, snapshot.volume, self.backend.as_mut());
                self.player = Some(player);
                self.publish_position(0.0);
                return;
            }
        }

        let (Some(slot), Some(player)) = (snapshot.slot, self.player.as_mut()) else {
            return;
        };
        if snapshot.paused {
            return;
        }

        let beats = beats_elapsed(elapsed, slot.tune.tempo.bpm, snapshot.tempo_multiplier);
        player.advance(beats, snapshot.volume, self.backend.as_mut());
        let position = player.position();

        if !player.is_finished() {
            self.publish_position(position);
            return;
        }

        if slot.options.looping {
            debug!("Looping slot {}", slot.id);
            player.rewind(self.backend.as_mut());
            self.publish_position(0.0);
            return;
        }

        info!("Finished slot {}", slot.id);
        self.player = None;
        let gap = slot.gap(self.default_gap);
        let mut shared = lock(&self.shared);
        if shared.current.as_ref().map(|s| s.id) == Some(slot.id) {
            shared.current = None;
            shared.paused = false;
            shared.position = 0.0;
            if gap.is_zero() {
                shared.advance_queue();
            } else {
                self.gap_until = Some(now + gap);
            }
        }
    }

    /// Copy the state this tick needs, starting the next slot when idle
    fn snapshot(&mut self, now: Instant) -> Snapshot {
        let available = self.backend.is_available();
        let mut shared = lock(&self.shared);
        if shared.backend_available != available {
            info!("Sound backend available: {}", available);
            shared.backend_available = available;
        }
        if std::mem::take(&mut shared.stopped) {
            self.gap_until = None;
        }
        if shared.current.is_some() {
            self.gap_until = None;
        } else if !shared.queue.is_empty() {
            let gap_over = self.gap_until.map_or(true, |until| now >= until);
            if gap_over {
                self.gap_until = None;
                shared.advance_queue();
            }
        }
        Snapshot {
            slot: shared.current.clone(),
            paused: shared.paused,
            volume: shared.volume,
            tempo_multiplier: shared.tempo_multiplier,
        }
    }

    fn publish_position(&self, position: f64) {
        lock(&self.shared).position = position;
    }
}
