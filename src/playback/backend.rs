//! Sound backends
//!
//! The scheduler drives anything implementing [`SoundBackend`]. The concrete
//! synthesizer lives outside this crate; two backends are provided here:
//! [`RecordingBackend`] captures every message for inspection and
//! [`LogBackend`] writes them through the `log` facade.

use crate::error::BackendError;
use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Note-on/note-off/program-change sink.
///
/// Channels are 0-based. The backend is moved onto the timing thread and only
/// ever called from there.
pub trait SoundBackend: Send {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) -> Result<(), BackendError>;
    fn note_off(&mut self, channel: u8, pitch: u8) -> Result<(), BackendError>;
    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), BackendError>;

    /// Whether the backend can currently accept messages
    fn is_available(&self) -> bool {
        true
    }
}

/// A message sent to a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum BackendEvent {
    NoteOn { channel: u8, pitch: u8, velocity: u8 },
    NoteOff { channel: u8, pitch: u8 },
    ProgramChange { channel: u8, program: u8 },
}

/// A recorded message with the instant it was received
#[derive(Debug, Clone, Copy)]
pub struct TimedEvent {
    pub event: BackendEvent,
    pub at: Instant,
}

/// Backend that records every message.
///
/// Clones share the same log, so a test can keep one handle while the
/// scheduler owns another.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    events: Arc<Mutex<Vec<TimedEvent>>>,
    available: Arc<AtomicBool>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        RecordingBackend {
            events: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<BackendEvent> {
        self.timed_events().into_iter().map(|t| t.event).collect()
    }

    pub fn timed_events(&self) -> Vec<TimedEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Pitch/channel pairs with a note-on that has not been matched by a note-off
    pub fn sounding(&self) -> Vec<(u8, u8)> {
        let mut sounding: Vec<(u8, u8)> = Vec::new();
        for event in self.events() {
            match event {
                BackendEvent::NoteOn { channel, pitch, .. } => sounding.push((channel, pitch)),
                BackendEvent::NoteOff { channel, pitch } => {
                    if let Some(i) = sounding.iter().position(|&s| s == (channel, pitch)) {
                        sounding.remove(i);
                    }
                }
                BackendEvent::ProgramChange { .. } => {}
            }
        }
        sounding
    }

    fn record(&self, event: BackendEvent) -> Result<(), BackendError> {
        if !self.is_available() {
            return Err(BackendError::Unavailable("recording disabled".to_string()));
        }
        let timed = TimedEvent {
            event,
            at: Instant::now(),
        };
        match self.events.lock() {
            Ok(mut events) => events.push(timed),
            Err(poisoned) => poisoned.into_inner().push(timed),
        }
        Ok(())
    }
}

impl SoundBackend for RecordingBackend {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) -> Result<(), BackendError> {
        self.record(BackendEvent::NoteOn {
            channel,
            pitch,
            velocity,
        })
    }

    fn note_off(&mut self, channel: u8, pitch: u8) -> Result<(), BackendError> {
        self.record(BackendEvent::NoteOff { channel, pitch })
    }

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), BackendError> {
        self.record(BackendEvent::ProgramChange { channel, program })
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// Backend that logs each message at `info` level
#[derive(Debug, Default)]
pub struct LogBackend;

impl SoundBackend for LogBackend {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8) -> Result<(), BackendError> {
        info!("note on  ch {:2} pitch {:3} vel {:3}", channel + 1, pitch, velocity);
        Ok(())
    }

    fn note_off(&mut self, channel: u8, pitch: u8) -> Result<(), BackendError> {
        info!("note off ch {:2} pitch {:3}", channel + 1, pitch);
        Ok(())
    }

    fn program_change(&mut self, channel: u8, program: u8) -> Result<(), BackendError> {
        info!("program  ch {:2} -> {}", channel + 1, program);
        Ok(())
    }
}
