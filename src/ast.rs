//! # Tune Model Types
//!
//! This module defines the data model produced by the parser and consumed by
//! the playback scheduler.
//!
//! ## Type Hierarchy
//! ```text
//! Tune
//!   ├── header data (reference, titles, composer, meter, unit length, tempo, key)
//!   ├── voices: HashMap<id, VoiceState>
//!   │     └── notes: Vec<NoteEvent>
//!   ├── voice_order: Vec<id> (declaration order, used for tie breaking)
//!   ├── lyrics, part_sequence
//!   ├── events: Vec<NoteEvent> (all voices merged, chronological)
//!   └── diagnostics: Vec<AbcError>
//!
//! NoteEvent
//!   ├── pitch, velocity, channel
//!   ├── start, duration (beats)
//!   ├── voice, part
//!   ├── decorations: Vec<DecorationEvent>
//!   └── is_grace
//! ```
//!
//! ## Time
//! All times are in **beats**, where one beat is a quarter note. A note written
//! with the default length under `L:1/8` therefore lasts 0.5 beats. The tempo
//! is stored as quarter notes per minute so conversion to wall-clock time does
//! not depend on the meter.
//!
//! ## Pitch
//! - Upper-case `C` is middle C (MIDI 60), lower-case `c` is one octave up.
//! - `'` raises and `,` lowers by an octave.
//! - Unmarked notes follow the key signature; explicit accidentals persist
//!   for the same letter and octave until the next bar line.
//!
//! ## Related Modules
//! - `parser` - Creates these types from ABC source
//! - `assembler` - Merges per-voice notes into `Tune::events`
//! - `playback` - Dispatches `NoteEvent`s to a sound backend

use crate::error::AbcError;
use serde::Serialize;
use std::collections::HashMap;

/// Default velocity for notes with no dynamic marking (mezzo-forte).
pub const DEFAULT_VELOCITY: u8 = 80;

/// MIDI channel reserved for percussion.
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Meter from the `M:` field (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Meter {
    pub beats: u8,
    pub beat_type: u8,
    /// `M:none` - no bar length, used for free rhythm.
    pub free: bool,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            beats: 4,
            beat_type: 4,
            free: false,
        }
    }
}

impl Meter {
    /// Parse a meter value like "6/8", "C", "C|", "2+3/8" or "none".
    pub fn from_str(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        match trimmed {
            "C" => return Some(Self::default()),
            "C|" => {
                return Some(Self {
                    beats: 2,
                    beat_type: 2,
                    free: false,
                })
            }
            "none" | "" => {
                return Some(Self {
                    free: true,
                    ..Self::default()
                })
            }
            _ => {}
        }

        let (num, den) = trimmed.split_once('/')?;
        // Complex meters like (2+3)/8 add up their numerators
        let beats: u32 = num
            .trim_matches(|c| c == '(' || c == ')')
            .split('+')
            .map(|part| part.trim().parse::<u32>().ok())
            .sum::<Option<u32>>()?;
        let beat_type: u8 = den.trim().parse().ok()?;
        if beats == 0 || beats > u8::MAX as u32 || beat_type == 0 {
            return None;
        }
        Some(Self {
            beats: beats as u8,
            beat_type,
            free: false,
        })
    }

    /// The meter as a fraction of a whole note (3/4 = 0.75).
    pub fn value(&self) -> f64 {
        self.beats as f64 / self.beat_type as f64
    }

    /// Compound meters group beats in threes: 6/8, 9/8, 12/8.
    pub fn is_compound(&self) -> bool {
        !self.free && self.beats > 3 && self.beats % 3 == 0 && self.beat_type == 8
    }

    /// Length of a bar in beats (quarter notes).
    pub fn bar_beats(&self) -> f64 {
        self.value() * 4.0
    }

    /// The counted beat as a fraction of a whole note. A dotted quarter in
    /// compound time, otherwise one denominator unit.
    pub fn beat_unit(&self) -> f64 {
        if self.is_compound() {
            3.0 / self.beat_type as f64
        } else {
            1.0 / self.beat_type as f64
        }
    }

    /// Default unit note length when no `L:` field is given.
    pub fn default_unit_length(&self) -> f64 {
        if !self.free && self.value() < 0.75 {
            1.0 / 16.0
        } else {
            1.0 / 8.0
        }
    }
}

/// Key mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
}

impl Mode {
    /// Shift in fifths relative to the major key on the same tonic.
    fn fifths_offset(&self) -> i8 {
        match self {
            Mode::Major => 0,
            Mode::Lydian => 1,
            Mode::Mixolydian => -1,
            Mode::Dorian => -2,
            Mode::Minor => -3,
            Mode::Phrygian => -4,
            Mode::Locrian => -5,
        }
    }

    fn from_suffix(s: &str) -> Option<Self> {
        let lower = s.to_ascii_lowercase();
        if lower.is_empty() {
            return Some(Mode::Major);
        }
        if lower == "m" {
            return Some(Mode::Minor);
        }
        let prefix = lower.get(..3).unwrap_or(&lower);
        match prefix {
            "maj" | "ion" => Some(Mode::Major),
            "min" | "aeo" => Some(Mode::Minor),
            "dor" => Some(Mode::Dorian),
            "phr" => Some(Mode::Phrygian),
            "lyd" => Some(Mode::Lydian),
            "mix" => Some(Mode::Mixolydian),
            "loc" => Some(Mode::Locrian),
            _ => None,
        }
    }
}

/// Key signature (number of sharps/flats)
/// Positive = sharps, Negative = flats, Zero = C major / A minor
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct KeySignature {
    pub fifths: i8, // -7 to +7 (flats to sharps)
    pub mode: Mode,
}

/// Order in which sharps are added to a key signature.
const SHARP_ORDER: [NoteName; 7] = [
    NoteName::F,
    NoteName::C,
    NoteName::G,
    NoteName::D,
    NoteName::A,
    NoteName::E,
    NoteName::B,
];

/// Order in which flats are added to a key signature.
const FLAT_ORDER: [NoteName; 7] = [
    NoteName::B,
    NoteName::E,
    NoteName::A,
    NoteName::D,
    NoteName::G,
    NoteName::C,
    NoteName::F,
];

impl KeySignature {
    /// Parse the key part of a `K:` field: "G", "Dm", "Ador", "F# minor",
    /// "Bbmix", "none", "HP" or "Hp". Attributes such as `clef=bass` must
    /// already be stripped.
    pub fn from_str(s: &str) -> Option<Self> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        match compact.as_str() {
            "" | "none" => return Some(Self::default()),
            // Highland pipes: no signature, or F# and C# with G natural
            "HP" => return Some(Self::default()),
            "Hp" => {
                return Some(Self {
                    fifths: 2,
                    mode: Mode::Mixolydian,
                })
            }
            _ => {}
        }

        let mut chars = compact.chars();
        let first = chars.next()?;
        // Key tonics are written in upper case; "c" is not a key.
        if !first.is_ascii_uppercase() {
            return None;
        }
        let tonic = NoteName::from_char(first)?;
        let rest = chars.as_str();
        let (alteration, mode_text) = match rest.chars().next() {
            Some('#') => (7, &rest[1..]),
            Some('b') => (-7, &rest[1..]),
            _ => (0, rest),
        };
        let mode = Mode::from_suffix(mode_text)?;
        let fifths = tonic.major_fifths() + alteration + mode.fifths_offset();
        if !(-7..=7).contains(&fifths) {
            return None;
        }
        Some(Self { fifths, mode })
    }

    /// Returns the implicit accidental for an unmarked note in this key.
    /// Order of sharps: F C G D A E B
    /// Order of flats: B E A D G C F
    pub fn accidental_for_note(&self, note: NoteName) -> Option<Accidental> {
        if self.fifths > 0 && SHARP_ORDER[..self.fifths as usize].contains(&note) {
            Some(Accidental::Sharp)
        } else if self.fifths < 0 && FLAT_ORDER[..(-self.fifths) as usize].contains(&note) {
            Some(Accidental::Flat)
        } else {
            None
        }
    }
}

/// Tempo from the `Q:` field, normalised to quarter notes per minute
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tempo {
    pub bpm: f64,
    /// Optional text such as "Allegro"
    pub text: Option<String>,
}

impl Default for Tempo {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            text: None,
        }
    }
}

impl Tempo {
    /// Parse a tempo value. `beat_unit` is the fraction of a whole note a bare
    /// number refers to (the meter's counted beat).
    ///
    /// Accepts `1/4=120`, `3/8=80`, `1/4 1/8=100`, `120`, `"Allegro" 1/4=120`
    /// and a bare `"Andante"`.
    pub fn from_str(s: &str, beat_unit: f64) -> Option<Self> {
        let mut text = None;
        let mut remainder = String::new();
        let mut in_quote = false;
        let mut quoted = String::new();
        for c in s.chars() {
            match (c, in_quote) {
                ('"', false) => in_quote = true,
                ('"', true) => {
                    in_quote = false;
                    text = Some(std::mem::take(&mut quoted));
                }
                (c, true) => quoted.push(c),
                (c, false) => remainder.push(c),
            }
        }

        let remainder = remainder.trim();
        if remainder.is_empty() {
            return text.map(|text| Self {
                text: Some(text),
                ..Self::default()
            });
        }

        let (units, bpm_text) = match remainder.split_once('=') {
            Some((lhs, rhs)) => {
                let mut total = 0.0;
                for part in lhs.split_whitespace() {
                    total += parse_fraction(part)?;
                }
                (total, rhs.trim())
            }
            None => (beat_unit, remainder),
        };
        let bpm: f64 = bpm_text.parse().ok()?;
        if bpm <= 0.0 || units <= 0.0 {
            return None;
        }
        Some(Self {
            bpm: bpm * units * 4.0,
            text,
        })
    }

    /// Seconds per beat at this tempo.
    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.bpm
    }
}

/// Parse "1/8", "3/8" or "1" as a fraction of a whole note.
pub fn parse_fraction(s: &str) -> Option<f64> {
    let s = s.trim();
    let value = match s.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => s.parse().ok()?,
    };
    (value > 0.0).then_some(value)
}

/// Note names A through G
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NoteName {
    #[default]
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl NoteName {
    /// Accepts upper or lower case letters.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'C' => Some(NoteName::C),
            'D' => Some(NoteName::D),
            'E' => Some(NoteName::E),
            'F' => Some(NoteName::F),
            'G' => Some(NoteName::G),
            'A' => Some(NoteName::A),
            'B' => Some(NoteName::B),
            _ => None,
        }
    }

    /// Semitones above C.
    pub fn semitone(&self) -> i16 {
        match self {
            NoteName::C => 0,
            NoteName::D => 2,
            NoteName::E => 4,
            NoteName::F => 5,
            NoteName::G => 7,
            NoteName::A => 9,
            NoteName::B => 11,
        }
    }

    /// Sharps (+) or flats (-) of the major key on this natural tonic.
    fn major_fifths(&self) -> i8 {
        match self {
            NoteName::C => 0,
            NoteName::G => 1,
            NoteName::D => 2,
            NoteName::A => 3,
            NoteName::E => 4,
            NoteName::B => 5,
            NoteName::F => -1,
        }
    }
}

/// Explicit accidentals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accidental {
    DoubleSharp, // ^^
    Sharp,       // ^
    Natural,     // =
    Flat,        // _
    DoubleFlat,  // __
}

impl Accidental {
    pub fn semitones(&self) -> i16 {
        match self {
            Accidental::DoubleSharp => 2,
            Accidental::Sharp => 1,
            Accidental::Natural => 0,
            Accidental::Flat => -1,
            Accidental::DoubleFlat => -2,
        }
    }
}

/// Clef of a voice. Only the percussion clef changes playback (channel 10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Clef {
    #[default]
    Treble,
    Bass,
    Alto,
    Tenor,
    Percussion,
    None,
}

impl Clef {
    /// Parse "treble", "bass3", "treble-8", "perc", ...
    pub fn from_str(s: &str) -> Option<Self> {
        let name: String = s
            .trim()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect::<String>()
            .to_ascii_lowercase();
        match name.as_str() {
            "treble" | "g" => Some(Clef::Treble),
            "bass" | "f" => Some(Clef::Bass),
            "alto" => Some(Clef::Alto),
            "tenor" => Some(Clef::Tenor),
            "perc" | "percussion" | "drum" => Some(Clef::Percussion),
            "none" => Some(Clef::None),
            _ => None,
        }
    }
}

/// Lifecycle of a voice during a parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceStatus {
    #[default]
    Unseen,
    Defined,
    Active,
    Suspended,
}

/// One independent line of notes within a tune
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceState {
    pub id: String,
    pub name: Option<String>,
    pub subname: Option<String>,
    /// MIDI program
    pub instrument: Option<u8>,
    /// 0-based MIDI channel
    pub channel: u8,
    pub clef: Clef,
    /// Semitones added to every pitch
    pub transpose: i8,
    /// Octaves added to every pitch
    pub octave: i8,
    pub muted: bool,
    /// 0.0 to 1.0, scales note velocity
    pub volume: f32,
    /// Time cursor saved when the voice was switched away from
    pub saved_time: f64,
    pub status: VoiceStatus,
    /// Notes in the order they were written
    pub notes: Vec<NoteEvent>,
    #[serde(skip)]
    pub(crate) explicit_channel: bool,
}

impl VoiceState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            subname: None,
            instrument: None,
            channel: 0,
            clef: Clef::default(),
            transpose: 0,
            octave: 0,
            muted: false,
            volume: 1.0,
            saved_time: 0.0,
            status: VoiceStatus::Unseen,
            notes: Vec::new(),
            explicit_channel: false,
        }
    }

    /// Sounding MIDI pitch for a written pitch in this voice.
    pub fn sounding_pitch(&self, written: i16) -> u8 {
        let total = written + self.transpose as i16 + self.octave as i16 * 12;
        total.clamp(0, 127) as u8
    }

    /// Scale a velocity by this voice's volume; muted voices are silent.
    pub fn scale_velocity(&self, velocity: u8) -> u8 {
        if self.muted {
            return 0;
        }
        (velocity as f32 * self.volume).round().clamp(0.0, 127.0) as u8
    }
}

/// Category of a decoration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecorationKind {
    Dynamic,
    Accent,
    Staccato,
    Tenuto,
    Fermata,
    Trill,
    Ornament,
    Crescendo,
    Diminuendo,
    Bowing,
    Navigation,
    Other,
}

/// Velocity increment per note inside a crescendo or diminuendo span.
pub const HAIRPIN_STEP: i16 = 6;

/// Velocity added by an accent.
pub const ACCENT_BOOST: i16 = 20;

/// A decoration attached to a note
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecorationEvent {
    pub kind: DecorationKind,
    /// Decoration name as written, without delimiters or span markers
    pub variant: String,
    /// Part of an open/close pair such as `!trill(! ... !trill)!`
    pub is_extended_span: bool,
    /// Velocity for dynamics, velocity change for accents and hairpins
    pub intensity: i16,
    pub affects_velocity: bool,
    pub affects_duration: bool,
}

impl DecorationEvent {
    /// Build a decoration from its name (`trill`, `p`, `accent`, `>` ...).
    pub fn from_name(name: &str) -> Self {
        let (kind, intensity) = match name {
            "pppp" => (DecorationKind::Dynamic, 20),
            "ppp" => (DecorationKind::Dynamic, 30),
            "pp" => (DecorationKind::Dynamic, 45),
            "p" => (DecorationKind::Dynamic, 60),
            "mp" => (DecorationKind::Dynamic, 70),
            "mf" => (DecorationKind::Dynamic, 80),
            "f" => (DecorationKind::Dynamic, 95),
            "ff" => (DecorationKind::Dynamic, 110),
            "fff" => (DecorationKind::Dynamic, 120),
            "ffff" => (DecorationKind::Dynamic, 127),
            "sfz" => (DecorationKind::Accent, 30),
            "accent" | ">" | "emphasis" | "L" => (DecorationKind::Accent, ACCENT_BOOST),
            "staccato" | "." => (DecorationKind::Staccato, 0),
            "tenuto" => (DecorationKind::Tenuto, 0),
            "fermata" | "H" | "invertedfermata" => (DecorationKind::Fermata, 0),
            "trill" | "T" => (DecorationKind::Trill, 0),
            "roll" | "~" | "mordent" | "lowermordent" | "M" | "uppermordent" | "pralltriller"
            | "P" | "turn" | "invertedturn" | "slide" | "arpeggio" => (DecorationKind::Ornament, 0),
            "crescendo" | "<" | "cresc" => (DecorationKind::Crescendo, HAIRPIN_STEP),
            "diminuendo" | "dim" | "decresc" => (DecorationKind::Diminuendo, -HAIRPIN_STEP),
            "upbow" | "u" | "downbow" | "v" => (DecorationKind::Bowing, 0),
            "segno" | "S" | "coda" | "O" | "D.C." | "D.S." | "fine" => {
                (DecorationKind::Navigation, 0)
            }
            _ => (DecorationKind::Other, 0),
        };
        Self {
            kind,
            variant: name.to_string(),
            is_extended_span: false,
            intensity,
            affects_velocity: matches!(
                kind,
                DecorationKind::Dynamic
                    | DecorationKind::Accent
                    | DecorationKind::Crescendo
                    | DecorationKind::Diminuendo
            ),
            affects_duration: kind == DecorationKind::Staccato,
        }
    }
}

/// A timed note, the unit of playback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    /// Start in beats from the start of the tune
    pub start: f64,
    /// Sounding duration in beats
    pub duration: f64,
    pub channel: u8,
    pub voice: String,
    pub decorations: Vec<DecorationEvent>,
    pub is_grace: bool,
    /// Named section (`P:`) the note was written in
    pub part: Option<char>,
}

impl NoteEvent {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A parsed tune
#[derive(Debug, Clone, Default)]
pub struct Tune {
    /// `X:` reference number
    pub reference: Option<u32>,
    pub titles: Vec<String>,
    pub composer: Option<String>,
    /// Informational fields kept as written (origin, rhythm, notes, ...)
    pub fields: Vec<(char, String)>,
    pub meter: Meter,
    /// Unit note length as a fraction of a whole note
    pub unit_length: f64,
    pub tempo: Tempo,
    pub key: KeySignature,
    pub voices: HashMap<String, VoiceState>,
    /// Voice ids in declaration order
    pub voice_order: Vec<String>,
    pub lyrics: Vec<String>,
    /// Resolved `P:` play order from the header, if any
    pub part_sequence: Option<Vec<char>>,
    /// Every voice's notes merged in chronological order
    pub events: Vec<NoteEvent>,
    /// Written length in beats, trailing rests included
    pub length: f64,
    pub diagnostics: Vec<AbcError>,
}

impl Tune {
    pub fn title(&self) -> Option<&str> {
        self.titles.first().map(String::as_str)
    }

    /// A tune is complete (and playable) only when parsing produced no errors.
    pub fn is_complete(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn voice(&self, id: &str) -> Option<&VoiceState> {
        self.voices.get(id)
    }

    /// Voices in declaration order.
    pub fn ordered_voices(&self) -> impl Iterator<Item = &VoiceState> {
        self.voice_order.iter().filter_map(|id| self.voices.get(id))
    }

    /// Length in beats: the written end of the longest voice, or the end of
    /// the last sounding note when that is later.
    pub fn duration_beats(&self) -> f64 {
        self.events.iter().map(NoteEvent::end).fold(self.length, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_parsing() {
        assert_eq!(Meter::from_str("3/4").map(|m| m.bar_beats()), Some(3.0));
        assert_eq!(Meter::from_str("C"), Some(Meter::default()));
        assert_eq!(Meter::from_str("C|").map(|m| m.beats), Some(2));
        assert_eq!(Meter::from_str("2+3/8").map(|m| m.beats), Some(5));
        assert!(Meter::from_str("none").is_some_and(|m| m.free));
        assert!(Meter::from_str("x/4").is_none());
    }

    #[test]
    fn test_compound_meter() {
        assert!(Meter::from_str("6/8").unwrap().is_compound());
        assert!(Meter::from_str("12/8").unwrap().is_compound());
        assert!(!Meter::from_str("3/8").unwrap().is_compound());
        assert!(!Meter::from_str("6/4").unwrap().is_compound());
        assert_eq!(Meter::from_str("6/8").unwrap().beat_unit(), 0.375);
    }

    #[test]
    fn test_default_unit_length() {
        assert_eq!(Meter::from_str("2/4").unwrap().default_unit_length(), 1.0 / 16.0);
        assert_eq!(Meter::from_str("3/4").unwrap().default_unit_length(), 1.0 / 8.0);
    }

    #[test]
    fn test_key_signatures() {
        assert_eq!(KeySignature::from_str("G").unwrap().fifths, 1);
        assert_eq!(KeySignature::from_str("Bb").unwrap().fifths, -2);
        assert_eq!(KeySignature::from_str("F#m").unwrap().fifths, 3);
        let dorian = KeySignature::from_str("Ador").unwrap();
        assert_eq!(dorian.fifths, 1);
        assert_eq!(dorian.mode, Mode::Dorian);
        assert_eq!(KeySignature::from_str("D mix").unwrap().fifths, 1);
        assert_eq!(KeySignature::from_str("E minor").unwrap().fifths, 1);
        assert_eq!(KeySignature::from_str("Eb").unwrap().fifths, -3);
        assert!(KeySignature::from_str("H").is_none());
        assert!(KeySignature::from_str("Fb").is_none());
    }

    #[test]
    fn test_accidental_for_note() {
        let d_major = KeySignature::from_str("D").unwrap();
        assert_eq!(d_major.accidental_for_note(NoteName::F), Some(Accidental::Sharp));
        assert_eq!(d_major.accidental_for_note(NoteName::C), Some(Accidental::Sharp));
        assert_eq!(d_major.accidental_for_note(NoteName::G), None);

        let f_major = KeySignature::from_str("F").unwrap();
        assert_eq!(f_major.accidental_for_note(NoteName::B), Some(Accidental::Flat));
        assert_eq!(f_major.accidental_for_note(NoteName::E), None);
    }

    #[test]
    fn test_tempo_parsing() {
        assert_eq!(Tempo::from_str("1/4=120", 0.25).unwrap().bpm, 120.0);
        assert_eq!(Tempo::from_str("1/8=120", 0.25).unwrap().bpm, 60.0);
        // Dotted quarter in 6/8
        assert_eq!(Tempo::from_str("3/8=80", 0.375).unwrap().bpm, 120.0);
        assert_eq!(Tempo::from_str("100", 0.25).unwrap().bpm, 100.0);
        let with_text = Tempo::from_str("\"Allegro\" 1/4=140", 0.25).unwrap();
        assert_eq!(with_text.text.as_deref(), Some("Allegro"));
        assert_eq!(with_text.bpm, 140.0);
        assert!(Tempo::from_str("1/4=0", 0.25).is_none());
    }

    #[test]
    fn test_decoration_classification() {
        let dynamic = DecorationEvent::from_name("ff");
        assert_eq!(dynamic.kind, DecorationKind::Dynamic);
        assert!(dynamic.affects_velocity);
        assert_eq!(dynamic.intensity, 110);

        let staccato = DecorationEvent::from_name(".");
        assert!(staccato.affects_duration);
        assert!(!staccato.affects_velocity);

        assert_eq!(DecorationEvent::from_name("whatever").kind, DecorationKind::Other);
    }

    #[test]
    fn test_voice_pitch_and_velocity() {
        let mut voice = VoiceState::new("1");
        voice.transpose = -2;
        voice.octave = 1;
        assert_eq!(voice.sounding_pitch(60), 70);
        voice.volume = 0.5;
        assert_eq!(voice.scale_velocity(80), 40);
        voice.muted = true;
        assert_eq!(voice.scale_velocity(80), 0);
    }
}
