//! # Playback Module
//!
//! Real-time dispatch of parsed tunes to a sound backend.
//!
//! ## Purpose
//! A [`PlaybackScheduler`] holds a FIFO queue of tunes ([`MusicSlot`]s) and
//! plays one at a time on a dedicated timing thread:
//! 1. **Queueing** - `enqueue` returns a slot id at once and never waits for
//!    playback; incomplete tunes, a full queue or a dead backend are refused
//! 2. **Dispatch** - note-on when a note's start beat is reached, note-off at
//!    start + duration, through the [`SoundBackend`] trait
//! 3. **Control** - pause, resume, skip, stop, remove, clear, volume and a
//!    global tempo multiplier, all callable from any thread
//!
//! ## Sub-modules
//! - `types` - MusicSlot, SlotOptions, ActiveNoteHandle, status snapshots
//! - `backend` - SoundBackend trait, RecordingBackend, LogBackend
//! - `player` - Beat-domain note dispatch for a single slot
//! - `scheduler` - The queue, the shared state and the timing thread
//!
//! ## Example
//! ```rust
//! use abcplay::config::PlayerConfig;
//! use abcplay::playback::{PlaybackScheduler, RecordingBackend, SlotOptions};
//!
//! let backend = RecordingBackend::new();
//! let scheduler = PlaybackScheduler::new(Box::new(backend.clone()), &PlayerConfig::default());
//!
//! let tune = abcplay::parse("X:1\nT:Scale\nQ:1/4=600\nK:C\nCDEF|\n");
//! let id = scheduler.enqueue(tune, SlotOptions::default()).unwrap();
//! assert_eq!(id, 1);
//! scheduler.shutdown();
//! ```
//!
//! ## Timing
//!
//! Positions are kept in beats (quarter notes). Each tick converts the wall
//! time since the previous tick into beats:
//!
//! `beats += elapsed_seconds × bpm × multiplier / 60`
//!
//! so a tempo change only affects notes not yet sent. Pausing stops the
//! conversion without releasing sounding notes.
//!
//! ## Cancellation
//!
//! Stop, skip and removing the playing slot send a note-off for every entry
//! in the active-note registry before anything else is played. The registry
//! is bounded; when it is full the oldest note is released to make room.
//! Notes whose velocity works out to zero (muted voices, volume 0) are never
//! sent.

mod types;
mod backend;
mod player;
mod scheduler;


pub use types::{ActiveNoteHandle, MusicSlot, PlaybackStatus, SlotInfo, SlotOptions};
pub use backend::{BackendEvent, LogBackend, RecordingBackend, SoundBackend, TimedEvent};
pub use player::{beats_elapsed, beats_to_duration, dispatch_velocity, SlotPlayer};
pub use scheduler::PlaybackScheduler;
