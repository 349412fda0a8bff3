//! Playback type definitions
//!
//! Queue entries, sounding-note handles and the snapshots returned by
//! [`super::PlaybackScheduler::status`] and [`super::PlaybackScheduler::list`].

use crate::ast::Tune;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Per-slot playback options
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotOptions {
    /// Restart from the first note when the slot ends, until skipped or stopped
    pub looping: bool,
    /// Silence after the slot ends; `None` uses the scheduler default
    pub gap_ms: Option<u64>,
}

impl SlotOptions {
    pub fn looping() -> Self {
        SlotOptions {
            looping: true,
            gap_ms: None,
        }
    }
}

/// One queued tune.
///
/// The tune is shared with the timing loop and never modified once queued.
#[derive(Debug, Clone)]
pub struct MusicSlot {
    pub id: u64,
    pub tune: Arc<Tune>,
    pub options: SlotOptions,
    pub title: String,
    pub created: SystemTime,
}

impl MusicSlot {
    pub fn new(id: u64, tune: Tune, options: SlotOptions) -> Self {
        let title = tune.title().unwrap_or("Untitled").to_string();
        MusicSlot {
            id,
            tune: Arc::new(tune),
            options,
            title,
            created: SystemTime::now(),
        }
    }

    pub fn info(&self) -> SlotInfo {
        SlotInfo {
            id: self.id,
            title: self.title.clone(),
            looping: self.options.looping,
            events: self.tune.events.len(),
            duration_beats: self.tune.duration_beats(),
        }
    }

    /// Gap to leave after this slot, falling back to `default`
    pub fn gap(&self, default: Duration) -> Duration {
        self.options.gap_ms.map_or(default, Duration::from_millis)
    }
}

/// A sounding note, released at `end` (in beats) or on stop/skip
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveNoteHandle {
    pub pitch: u8,
    pub channel: u8,
    pub end: f64,
}

/// Summary of one slot, as listed by `LIST`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInfo {
    pub id: u64,
    pub title: String,
    pub looping: bool,
    pub events: usize,
    pub duration_beats: f64,
}

/// Snapshot of the scheduler state
///
/// `queue_size` counts slots waiting behind the current one.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub queue_size: usize,
    pub playing: bool,
    pub paused: bool,
    pub volume: f32,
    pub tempo_multiplier: f64,
    pub current: Option<SlotInfo>,
    /// Beat cursor within the current slot
    pub position: f64,
}
