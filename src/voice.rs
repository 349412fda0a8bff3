//! # Voice Manager
//!
//! Tracks every voice of the tune being parsed and the running time cursor of
//! the active one.
//!
//! ## Lifecycle
//! ```text
//! UNSEEN ──define──> DEFINED ──switch_to──> ACTIVE ──switch away──> SUSPENDED
//!                                              ^                        │
//!                                              └──────switch_to─────────┘
//! ```
//!
//! Switching away from a voice saves its cursor; switching back restores it.
//! Passages of one voice written at different places in the source therefore
//! continue on the same beat axis:
//!
//! ```text
//! V:1        A B          voice 1: 0.0 .. 1.0
//! V:2        C D          voice 2: 0.0 .. 1.0
//! V:1        E F          voice 1: 1.0 .. 2.0
//! ```

use crate::ast::{Clef, VoiceState, VoiceStatus, PERCUSSION_CHANNEL};
use log::{debug, warn};
use std::collections::HashMap;

/// Id of the voice created when notes appear before any voice is defined.
pub const IMPLICIT_VOICE_ID: &str = "1";

/// Attributes given on a `V:` (or `K:`) field, e.g. `V:2 clef=bass program=33`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoiceAttributes {
    pub name: Option<String>,
    pub subname: Option<String>,
    pub clef: Option<Clef>,
    pub transpose: Option<i8>,
    pub octave: Option<i8>,
    pub program: Option<u8>,
    /// 0-based channel
    pub channel: Option<u8>,
    pub volume: Option<f32>,
    pub muted: Option<bool>,
}

impl VoiceAttributes {
    /// Build attributes from `key=value` pairs and bare flag words.
    ///
    /// Unknown keys are ignored. Returns a message describing the first
    /// value that could not be understood.
    pub fn parse(pairs: &[(String, String)], flags: &[String]) -> Result<Self, String> {
        let mut attrs = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "name" | "nm" => attrs.name = Some(value.clone()),
                "subname" | "snm" | "sname" => attrs.subname = Some(value.clone()),
                "clef" => {
                    attrs.clef = Some(
                        Clef::from_str(value).ok_or_else(|| format!("Unknown clef '{}'", value))?,
                    )
                }
                "transpose" | "t" => attrs.transpose = Some(parse_number(key, value)?),
                "octave" => attrs.octave = Some(parse_number(key, value)?),
                "program" | "instrument" => {
                    let program: u8 = parse_number(key, value)?;
                    if program > 127 {
                        return Err(format!("Program {} out of range 0-127", program));
                    }
                    attrs.program = Some(program);
                }
                "channel" => attrs.channel = Some(parse_channel(value)?),
                "volume" | "vol" => attrs.volume = Some(parse_volume(value)?),
                "mute" | "muted" => attrs.muted = Some(parse_flag(value)),
                _ => debug!("Ignoring voice attribute {}={}", key, value),
            }
        }
        for flag in flags {
            match flag.to_ascii_lowercase().as_str() {
                "mute" | "muted" => attrs.muted = Some(true),
                other => match Clef::from_str(other) {
                    Some(clef) => attrs.clef = Some(clef),
                    None => debug!("Ignoring voice flag {}", flag),
                },
            }
        }
        Ok(attrs)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .trim_start_matches('+')
        .parse()
        .map_err(|_| format!("Invalid {} value '{}'", key, value))
}

/// Channels are written 1-16 and stored 0-15.
pub fn parse_channel(value: &str) -> Result<u8, String> {
    let channel: u8 = parse_number("channel", value)?;
    if !(1..=16).contains(&channel) {
        return Err(format!("Channel {} out of range 1-16", channel));
    }
    Ok(channel - 1)
}

/// Volume as 0.0-1.0, or as a MIDI value 0-127.
fn parse_volume(value: &str) -> Result<f32, String> {
    let volume: f32 = parse_number("volume", value)?;
    match volume {
        v if (0.0..=1.0).contains(&v) => Ok(v),
        v if (0.0..=127.0).contains(&v) => Ok(v / 127.0),
        v => Err(format!("Volume {} out of range", v)),
    }
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

/// Per-voice definitions and the running time cursor
#[derive(Debug, Default)]
pub struct VoiceManager {
    voices: HashMap<String, VoiceState>,
    order: Vec<String>,
    active: Option<String>,
    /// Time cursor of the active voice, in beats
    cursor: f64,
    next_channel: u8,
}

impl VoiceManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&VoiceState> {
        self.voices.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut VoiceState> {
        self.voices.get_mut(id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Voice ids in declaration order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    pub fn advance(&mut self, beats: f64) {
        self.cursor += beats;
    }

    fn next_auto_channel(&mut self) -> u8 {
        if self.next_channel == PERCUSSION_CHANNEL {
            self.next_channel += 1;
        }
        if self.next_channel > 15 {
            warn!("More than 15 melodic voices; reusing channels from 1");
            self.next_channel = 0;
        }
        let channel = self.next_channel;
        self.next_channel += 1;
        channel
    }

    fn create(&mut self, id: &str, attrs: &VoiceAttributes) -> VoiceState {
        let mut voice = VoiceState::new(id);
        voice.status = VoiceStatus::Defined;
        voice.channel = match (attrs.channel, attrs.clef) {
            (Some(channel), _) => channel,
            (None, Some(Clef::Percussion)) => PERCUSSION_CHANNEL,
            (None, _) => self.next_auto_channel(),
        };
        debug!("Voice {} created on channel {}", id, voice.channel + 1);
        self.order.push(id.to_string());
        voice
    }

    /// Create a voice or update an existing one with new attributes.
    pub fn define(&mut self, id: &str, attrs: &VoiceAttributes) -> &mut VoiceState {
        if !self.voices.contains_key(id) {
            let created = self.create(id, attrs);
            self.voices.insert(id.to_string(), created);
        }
        let voice = self
            .voices
            .entry(id.to_string())
            .or_insert_with(|| VoiceState::new(id));
        if let Some(name) = &attrs.name {
            voice.name = Some(name.clone());
        }
        if let Some(subname) = &attrs.subname {
            voice.subname = Some(subname.clone());
        }
        if let Some(clef) = attrs.clef {
            voice.clef = clef;
            if clef == Clef::Percussion && !voice.explicit_channel {
                voice.channel = PERCUSSION_CHANNEL;
            }
        }
        if let Some(channel) = attrs.channel {
            voice.channel = channel;
            voice.explicit_channel = true;
        }
        if let Some(transpose) = attrs.transpose {
            voice.transpose = transpose;
        }
        if let Some(octave) = attrs.octave {
            voice.octave = octave;
        }
        if let Some(program) = attrs.program {
            voice.instrument = Some(program);
        }
        if let Some(volume) = attrs.volume {
            voice.volume = volume;
        }
        if let Some(muted) = attrs.muted {
            voice.muted = muted;
        }
        voice
    }

    /// Make `id` the active voice, saving the cursor of the voice being left.
    /// Switching to the already active voice does nothing.
    pub fn switch_to(&mut self, id: &str) {
        if self.active.as_deref() == Some(id) {
            return;
        }
        if let Some(previous) = self.active.take() {
            if let Some(voice) = self.voices.get_mut(&previous) {
                voice.saved_time = self.cursor;
                voice.status = VoiceStatus::Suspended;
            }
        }
        if !self.voices.contains_key(id) {
            let created = self.create(id, &VoiceAttributes::default());
            self.voices.insert(id.to_string(), created);
        }
        if let Some(voice) = self.voices.get_mut(id) {
            self.cursor = voice.saved_time;
            voice.status = VoiceStatus::Active;
        }
        self.active = Some(id.to_string());
    }

    /// The voice notes go to: the active voice, else the first defined
    /// voice, else an implicit voice created on demand.
    pub fn ensure_active(&mut self) -> String {
        if let Some(id) = &self.active {
            return id.clone();
        }
        let id = self
            .order
            .first()
            .cloned()
            .unwrap_or_else(|| IMPLICIT_VOICE_ID.to_string());
        self.switch_to(&id);
        id
    }

    /// The voice that voice-wide settings from `K:` or `%%MIDI` apply to:
    /// the active voice, else the most recently defined one.
    pub fn settings_target(&mut self) -> String {
        if let Some(id) = self.active.as_ref().or(self.order.last()) {
            return id.clone();
        }
        self.define(IMPLICIT_VOICE_ID, &VoiceAttributes::default());
        IMPLICIT_VOICE_ID.to_string()
    }

    /// Bring every voice cursor forward to the latest one.
    pub fn sync_all(&mut self) {
        let latest = self
            .voices
            .iter()
            .filter(|(id, _)| self.active.as_deref() != Some(id.as_str()))
            .map(|(_, v)| v.saved_time)
            .fold(self.cursor, f64::max);
        self.cursor = latest;
        for voice in self.voices.values_mut() {
            voice.saved_time = latest;
        }
    }

    /// Finish the parse and hand over the voices with their declaration order.
    pub fn into_parts(mut self) -> (HashMap<String, VoiceState>, Vec<String>) {
        if let Some(id) = self.active.take() {
            if let Some(voice) = self.voices.get_mut(&id) {
                voice.saved_time = self.cursor;
            }
        }
        (self.voices, self.order)
    }
}
