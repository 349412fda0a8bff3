//! Music line parsing: turns the tokens of one body line into timed
//! [`NoteEvent`]s on the active voice.
//!
//! State that lives across lines (bar accidentals, dynamics, open decoration
//! spans, ties, pending grace notes) is kept per voice. Tuplets, grace braces
//! and chord brackets must close on the line that opened them; anything left
//! open is reported by [`MusicLineParser::end_line`].

use crate::ast::*;
use crate::error::AbcError;
use crate::header::MusicContext;
use crate::lexer::{Token, TokenKind};
use crate::voice::VoiceManager;
use std::collections::HashMap;

/// Share of its written length a grace note sounds for.
const GRACE_SCALE: f64 = 0.5;

/// Grace notes never take more than this share of their principal note.
const MAX_GRACE_SHARE: f64 = 0.5;

/// An open `(p:q:r` group: `p` notes in the time of `q`, for the next `r`
/// notes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TupletContext {
    pub notes: u32,
    pub in_time_of: u32,
    pub remaining: u32,
    pub active: bool,
}

impl TupletContext {
    /// Parse a tuplet token such as `(3`, `(3:2` or `(5::4`.
    ///
    /// A missing or zero `q` is derived from the meter; a missing `r`
    /// defaults to `p`.
    pub fn from_token(text: &str, meter: &Meter) -> Option<Self> {
        let mut parts = text.trim_start_matches('(').split(':');
        let notes: u32 = parts.next()?.parse().ok()?;
        if notes == 0 {
            return None;
        }
        let in_time_of = match parts.next().filter(|q| !q.is_empty()) {
            Some(q) => q.parse().ok()?,
            None => 0,
        };
        let in_time_of = if in_time_of == 0 {
            default_in_time_of(notes, meter)
        } else {
            in_time_of
        };
        let remaining = match parts.next().filter(|r| !r.is_empty()) {
            Some(r) => r.parse().ok()?,
            None => notes,
        };
        Some(Self {
            notes,
            in_time_of,
            remaining,
            active: remaining > 0,
        })
    }

    /// Factor applied to each note's duration.
    pub fn scale(&self) -> f64 {
        self.in_time_of as f64 / self.notes as f64
    }
}

/// How many notes' time a tuplet of `notes` takes when `q` is not written.
pub fn default_in_time_of(notes: u32, meter: &Meter) -> u32 {
    match notes {
        2 | 4 | 8 => 3,
        3 | 6 => 2,
        _ if meter.is_compound() => 3,
        _ => 2,
    }
}

/// Parse a note length suffix: `""` = 1, `"3"`, `"3/2"`, `"/"` = 1/2,
/// `"//"` = 1/4, `"/4"`.
pub fn parse_length(text: &str) -> Option<f64> {
    let digits_end = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let mut length = if digits_end == 0 {
        1.0
    } else {
        text[..digits_end].parse::<f64>().ok()?
    };
    let mut rest = &text[digits_end..];
    while let Some(after_slash) = rest.strip_prefix('/') {
        let end = after_slash
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(after_slash.len());
        let divisor = if end == 0 {
            2.0
        } else {
            after_slash[..end].parse::<f64>().ok()?
        };
        if divisor == 0.0 {
            return None;
        }
        length /= divisor;
        rest = &after_slash[end..];
    }
    (rest.is_empty() && length > 0.0).then_some(length)
}

/// A note as written: accidental, letter, octave and length multiplier
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenNote {
    pub accidental: Option<Accidental>,
    pub letter: NoteName,
    /// Octaves above the one starting at middle C
    pub octave: i16,
    pub length: f64,
}

impl WrittenNote {
    pub fn parse(text: &str) -> Option<Self> {
        let (accidental, rest) = [
            ("^^", Accidental::DoubleSharp),
            ("__", Accidental::DoubleFlat),
            ("^", Accidental::Sharp),
            ("_", Accidental::Flat),
            ("=", Accidental::Natural),
        ]
        .iter()
        .find_map(|(prefix, acc)| text.strip_prefix(prefix).map(|rest| (Some(*acc), rest)))
        .unwrap_or((None, text));

        let mut chars = rest.chars();
        let letter_char = chars.next()?;
        let letter = NoteName::from_char(letter_char)?;
        let mut octave = if letter_char.is_ascii_lowercase() { 1 } else { 0 };
        let rest = chars.as_str();
        let marks_end = rest
            .find(|c: char| c != '\'' && c != ',')
            .unwrap_or(rest.len());
        for mark in rest[..marks_end].chars() {
            octave += if mark == '\'' { 1 } else { -1 };
        }
        let length = parse_length(&rest[marks_end..])?;
        Some(Self {
            accidental,
            letter,
            octave,
            length,
        })
    }

    /// Written MIDI pitch, applying explicit, bar and key accidentals in
    /// that order. Explicit accidentals are remembered until the next bar.
    fn resolve_pitch(
        &self,
        bar_accidentals: &mut HashMap<(NoteName, i16), Accidental>,
        key: &KeySignature,
    ) -> i16 {
        let slot = (self.letter, self.octave);
        let accidental = match self.accidental {
            Some(acc) => {
                bar_accidentals.insert(slot, acc);
                Some(acc)
            }
            None => bar_accidentals
                .get(&slot)
                .copied()
                .or_else(|| key.accidental_for_note(self.letter)),
        };
        60 + self.octave * 12 + self.letter.semitone() + accidental.map_or(0, |a| a.semitones())
    }
}

#[derive(Debug, Clone, Copy)]
struct GraceNote {
    written: i16,
    beats: f64,
}

/// Parser state kept per voice across lines
#[derive(Debug)]
struct VoiceContext {
    bar_accidentals: HashMap<(NoteName, i16), Accidental>,
    velocity: u8,
    spans: Vec<DecorationEvent>,
    graces: Vec<GraceNote>,
    /// Notes of the last note or chord, for ties and broken rhythm
    last_group: Vec<usize>,
    last_advance: f64,
    tied_from: Vec<usize>,
    broken_next: Option<f64>,
}

impl Default for VoiceContext {
    fn default() -> Self {
        Self {
            bar_accidentals: HashMap::new(),
            velocity: DEFAULT_VELOCITY,
            spans: Vec::new(),
            graces: Vec::new(),
            last_group: Vec::new(),
            last_advance: 0.0,
            tied_from: Vec::new(),
            broken_next: None,
        }
    }
}

#[derive(Debug)]
struct ChordState {
    start: f64,
    notes: Vec<usize>,
    first_advance: Option<f64>,
    /// Broken-rhythm and tuplet factors for the whole chord
    factor: f64,
    decorations: Vec<DecorationEvent>,
    graces: Vec<GraceNote>,
}

/// A note ready to be placed on a voice
struct Placement {
    written: i16,
    start: f64,
    advance: f64,
    decorations: Vec<DecorationEvent>,
}

/// Parser for the music lines of a tune body
#[derive(Debug, Default)]
pub struct MusicLineParser {
    voice_contexts: HashMap<String, VoiceContext>,
    /// Tuplets opened on the current line, addressed by index
    tuplets: Vec<TupletContext>,
    /// Indices into `tuplets` of the groups still open, innermost last
    open_tuplets: Vec<usize>,
    grace_group: Option<Vec<GraceNote>>,
    chord: Option<ChordState>,
    pending_decorations: Vec<DecorationEvent>,
    part: Option<char>,
}

fn parse_error(token: &Token, message: String) -> AbcError {
    AbcError::Parse {
        line: token.line,
        column: token.column,
        message,
    }
}

impl MusicLineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Label notes from here on as belonging to part `label`.
    pub fn start_part(&mut self, label: char) {
        self.part = Some(label);
    }

    fn tuplet_scale(&self) -> f64 {
        self.open_tuplets
            .iter()
            .map(|&i| self.tuplets[i].scale())
            .product()
    }

    /// Count one note (or chord, or rest) against the innermost open tuplet.
    /// A finished inner group counts as one note of the group around it.
    fn consume_tuplet_note(&mut self) {
        while let Some(&index) = self.open_tuplets.last() {
            let tuplet = &mut self.tuplets[index];
            tuplet.remaining = tuplet.remaining.saturating_sub(1);
            if tuplet.remaining > 0 {
                return;
            }
            tuplet.active = false;
            self.open_tuplets.pop();
        }
    }

    /// Handle one music token.
    pub fn handle_token(
        &mut self,
        token: &Token,
        voices: &mut VoiceManager,
        context: &MusicContext,
    ) -> Result<(), AbcError> {
        match token.kind {
            TokenKind::Note => self.note(token, voices, context),
            TokenKind::Rest => self.rest(token, voices, context),
            TokenKind::MultiRest => {
                let bars: f64 = match &token.text[1..] {
                    "" => 1.0,
                    digits => digits
                        .parse()
                        .map_err(|_| parse_error(token, format!("Invalid rest '{}'", token.text)))?,
                };
                let id = voices.ensure_active();
                let vctx = self.voice_contexts.entry(id).or_default();
                vctx.last_group.clear();
                vctx.tied_from.clear();
                voices.advance(bars * context.meter.bar_beats());
                Ok(())
            }
            TokenKind::Bar
            | TokenKind::RepeatStart
            | TokenKind::RepeatEnd
            | TokenKind::RepeatBoth
            | TokenKind::Ending => {
                if let Some(id) = voices.active_id() {
                    if let Some(vctx) = self.voice_contexts.get_mut(id) {
                        vctx.bar_accidentals.clear();
                    }
                }
                Ok(())
            }
            TokenKind::ChordStart => self.open_chord(token, voices),
            TokenKind::ChordEnd => self.close_chord(token, voices),
            TokenKind::GraceStart => {
                if self.grace_group.is_some() {
                    return Err(parse_error(token, "Nested grace group".to_string()));
                }
                self.grace_group = Some(Vec::new());
                Ok(())
            }
            TokenKind::GraceEnd => {
                let graces = self
                    .grace_group
                    .take()
                    .ok_or_else(|| parse_error(token, "'}' without matching '{'".to_string()))?;
                let id = voices.ensure_active();
                self.voice_contexts.entry(id).or_default().graces.extend(graces);
                Ok(())
            }
            TokenKind::Tuplet => {
                let tuplet = TupletContext::from_token(&token.text, &context.meter)
                    .ok_or_else(|| parse_error(token, format!("Invalid tuplet '{}'", token.text)))?;
                if tuplet.active {
                    self.tuplets.push(tuplet);
                    self.open_tuplets.push(self.tuplets.len() - 1);
                }
                Ok(())
            }
            TokenKind::Tie => {
                let id = voices.ensure_active();
                let vctx = self.voice_contexts.entry(id).or_default();
                vctx.tied_from = vctx.last_group.clone();
                Ok(())
            }
            TokenKind::BrokenRhythm => self.broken_rhythm(token, voices),
            TokenKind::Decoration => {
                self.pending_decorations
                    .push(DecorationEvent::from_name(&token.text));
                Ok(())
            }
            TokenKind::ExtendedDecoration => self.extended_decoration(token, voices),
            TokenKind::Unknown => Err(parse_error(
                token,
                format!("Unexpected '{}'", token.text),
            )),
            _ => Ok(()),
        }
    }

    fn note(
        &mut self,
        token: &Token,
        voices: &mut VoiceManager,
        context: &MusicContext,
    ) -> Result<(), AbcError> {
        let written = WrittenNote::parse(&token.text)
            .ok_or_else(|| parse_error(token, format!("Invalid note '{}'", token.text)))?;
        let tuplet_scale = self.tuplet_scale();
        let part = self.part;
        let id = voices.ensure_active();
        let cursor = voices.cursor();
        let vctx = self.voice_contexts.entry(id.clone()).or_default();
        let pitch = written.resolve_pitch(&mut vctx.bar_accidentals, &context.key);
        let nominal = 4.0 * context.unit_length * written.length;

        if let Some(group) = &mut self.grace_group {
            group.push(GraceNote {
                written: pitch,
                beats: nominal * GRACE_SCALE,
            });
            return Ok(());
        }

        let mut decorations = std::mem::take(&mut self.pending_decorations);
        let Some(voice) = voices.get_mut(&id) else {
            return Ok(());
        };

        if let Some(chord) = &mut self.chord {
            let advance = nominal * chord.factor;
            chord.first_advance.get_or_insert(advance);
            decorations.extend(chord.decorations.iter().cloned());
            let index = place(
                voice,
                vctx,
                Placement {
                    written: pitch,
                    start: chord.start,
                    advance,
                    decorations,
                },
                part,
            );
            chord.notes.push(index);
            return Ok(());
        }

        let broken = vctx.broken_next.take().unwrap_or(1.0);
        let advance = nominal * broken * tuplet_scale;
        let graces = std::mem::take(&mut vctx.graces);
        let borrowed = place_graces(voice, vctx.velocity, &graces, cursor, advance, part);
        let index = place(
            voice,
            vctx,
            Placement {
                written: pitch,
                start: cursor + borrowed,
                advance: advance - borrowed,
                decorations,
            },
            part,
        );
        vctx.tied_from.clear();
        vctx.last_group = vec![index];
        vctx.last_advance = advance;
        voices.advance(advance);
        self.consume_tuplet_note();
        Ok(())
    }

    fn rest(
        &mut self,
        token: &Token,
        voices: &mut VoiceManager,
        context: &MusicContext,
    ) -> Result<(), AbcError> {
        if self.grace_group.is_some() || self.chord.is_some() {
            return Err(parse_error(
                token,
                "Rest inside a chord or grace group".to_string(),
            ));
        }
        let length = parse_length(&token.text[1..])
            .ok_or_else(|| parse_error(token, format!("Invalid rest '{}'", token.text)))?;
        let tuplet_scale = self.tuplet_scale();
        let id = voices.ensure_active();
        let vctx = self.voice_contexts.entry(id).or_default();
        let broken = vctx.broken_next.take().unwrap_or(1.0);
        let advance = 4.0 * context.unit_length * length * broken * tuplet_scale;
        vctx.last_group.clear();
        vctx.tied_from.clear();
        vctx.last_advance = advance;
        self.pending_decorations.clear();
        voices.advance(advance);
        self.consume_tuplet_note();
        Ok(())
    }

    fn open_chord(&mut self, token: &Token, voices: &mut VoiceManager) -> Result<(), AbcError> {
        if self.chord.is_some() {
            return Err(parse_error(token, "Nested chord".to_string()));
        }
        if self.grace_group.is_some() {
            return Err(parse_error(token, "Chord inside a grace group".to_string()));
        }
        let tuplet_scale = self.tuplet_scale();
        let id = voices.ensure_active();
        let vctx = self.voice_contexts.entry(id).or_default();
        let broken = vctx.broken_next.take().unwrap_or(1.0);
        self.chord = Some(ChordState {
            start: voices.cursor(),
            notes: Vec::new(),
            first_advance: None,
            factor: broken * tuplet_scale,
            decorations: std::mem::take(&mut self.pending_decorations),
            graces: std::mem::take(&mut vctx.graces),
        });
        Ok(())
    }

    fn close_chord(&mut self, token: &Token, voices: &mut VoiceManager) -> Result<(), AbcError> {
        let chord = self
            .chord
            .take()
            .ok_or_else(|| parse_error(token, "']' without matching '['".to_string()))?;
        let multiplier = parse_length(&token.text[1..])
            .ok_or_else(|| parse_error(token, format!("Invalid chord length '{}'", token.text)))?;
        let part = self.part;
        let id = voices.ensure_active();
        let vctx = self.voice_contexts.entry(id.clone()).or_default();
        let advance = chord.first_advance.unwrap_or(0.0) * multiplier;

        if let Some(voice) = voices.get_mut(&id) {
            for &i in &chord.notes {
                voice.notes[i].duration *= multiplier;
            }
            if !chord.graces.is_empty() {
                let borrowed =
                    place_graces(voice, vctx.velocity, &chord.graces, chord.start, advance, part);
                for &i in &chord.notes {
                    let note = &mut voice.notes[i];
                    note.start += borrowed;
                    note.duration = (note.duration - borrowed).max(0.0);
                }
            }
        }

        vctx.tied_from.clear();
        vctx.last_group = chord.notes;
        vctx.last_advance = advance;
        voices.advance(advance);
        self.consume_tuplet_note();
        Ok(())
    }

    /// `a>b` lengthens the note before by 1.5 and shortens the one after to
    /// 0.5; `>>` and `>>>` use 1.75/0.25 and 1.875/0.125, `<` the reverse.
    fn broken_rhythm(&mut self, token: &Token, voices: &mut VoiceManager) -> Result<(), AbcError> {
        let short = 0.5f64.powi(token.text.len() as i32);
        let long = 2.0 - short;
        let (before, after) = if token.text.starts_with('>') {
            (long, short)
        } else {
            (short, long)
        };

        let no_note = || parse_error(token, "Broken rhythm without a preceding note".to_string());
        let id = voices.active_id().map(str::to_string).ok_or_else(no_note)?;
        let vctx = self.voice_contexts.entry(id.clone()).or_default();
        if vctx.last_advance <= 0.0 {
            return Err(no_note());
        }
        // Stretch each note's end relative to where its group started, so
        // notes shifted by grace notes still end on the new beat
        let origin = voices.cursor() - vctx.last_advance;
        if let Some(voice) = voices.get_mut(&id) {
            for &i in &vctx.last_group {
                let note = &mut voice.notes[i];
                let end = origin + (note.end() - origin) * before;
                note.duration = (end - note.start).max(0.0);
            }
        }
        let delta = vctx.last_advance * (before - 1.0);
        vctx.last_advance *= before;
        vctx.broken_next = Some(after);
        voices.advance(delta);
        Ok(())
    }

    fn extended_decoration(
        &mut self,
        token: &Token,
        voices: &mut VoiceManager,
    ) -> Result<(), AbcError> {
        let name = &token.text[1..token.text.len() - 1];
        let span_variant = |base: &str| match base {
            "<" => "crescendo".to_string(),
            ">" => "diminuendo".to_string(),
            other => other.to_string(),
        };

        if let Some(base) = name.strip_suffix('(') {
            let id = voices.ensure_active();
            let mut span = DecorationEvent::from_name(&span_variant(base));
            span.is_extended_span = true;
            self.voice_contexts.entry(id).or_default().spans.push(span);
        } else if let Some(base) = name.strip_suffix(')') {
            let id = voices.ensure_active();
            let variant = span_variant(base);
            let spans = &mut self.voice_contexts.entry(id).or_default().spans;
            match spans.iter().rposition(|s| s.variant == variant) {
                Some(i) => {
                    spans.remove(i);
                }
                None => {
                    return Err(parse_error(
                        token,
                        format!("'{}' closes no open decoration", token.text),
                    ))
                }
            }
        } else {
            self.pending_decorations.push(DecorationEvent::from_name(name));
        }
        Ok(())
    }

    /// Close the current line. Reports and discards any tuplet, grace group
    /// or chord that is still open.
    pub fn end_line(&mut self, line: usize) -> Vec<AbcError> {
        let mut errors: Vec<AbcError> = self
            .open_tuplets
            .iter()
            .map(|&i| {
                let tuplet = &self.tuplets[i];
                AbcError::Structural {
                    line,
                    message: format!(
                        "Tuplet ({} not completed: {} note(s) missing",
                        tuplet.notes, tuplet.remaining
                    ),
                }
            })
            .collect();
        if self.grace_group.take().is_some() {
            errors.push(AbcError::Structural {
                line,
                message: "Unterminated grace group '{'".to_string(),
            });
        }
        if self.chord.take().is_some() {
            errors.push(AbcError::Structural {
                line,
                message: "Unterminated chord '['".to_string(),
            });
        }
        self.tuplets.clear();
        self.open_tuplets.clear();
        self.pending_decorations.clear();
        errors
    }
}

fn clamp_velocity(velocity: i16) -> u8 {
    velocity.clamp(1, 127) as u8
}

/// Put a note on a voice, applying decorations, dynamics and ties. Returns
/// the index of the note in the voice (an earlier note when tied).
fn place(
    voice: &mut VoiceState,
    vctx: &mut VoiceContext,
    placement: Placement,
    part: Option<char>,
) -> usize {
    let mut decorations = placement.decorations;
    decorations.extend(vctx.spans.iter().cloned());

    let mut velocity = vctx.velocity as i16;
    let mut accent = 0;
    let mut staccato = false;
    for decoration in &decorations {
        match decoration.kind {
            DecorationKind::Dynamic => {
                velocity = decoration.intensity;
                vctx.velocity = clamp_velocity(velocity);
            }
            DecorationKind::Accent => accent += decoration.intensity,
            DecorationKind::Crescendo | DecorationKind::Diminuendo => {
                velocity = clamp_velocity(velocity + decoration.intensity) as i16;
                vctx.velocity = velocity as u8;
            }
            DecorationKind::Staccato => staccato = true,
            _ => {}
        }
    }

    let duration = if staccato {
        placement.advance / 2.0
    } else {
        placement.advance
    };
    let pitch = voice.sounding_pitch(placement.written);

    let tied = vctx
        .tied_from
        .iter()
        .copied()
        .find(|&i| voice.notes[i].pitch == pitch);
    if let Some(index) = tied {
        let note = &mut voice.notes[index];
        note.duration = placement.start + duration - note.start;
        return index;
    }

    voice.notes.push(NoteEvent {
        pitch,
        velocity: voice.scale_velocity(clamp_velocity(velocity + accent)),
        start: placement.start,
        duration,
        channel: voice.channel,
        voice: voice.id.clone(),
        decorations,
        is_grace: false,
        part,
    });
    voice.notes.len() - 1
}

/// Place grace notes from `start`, taking time from the principal note.
/// Returns the time borrowed.
fn place_graces(
    voice: &mut VoiceState,
    velocity: u8,
    graces: &[GraceNote],
    start: f64,
    principal: f64,
    part: Option<char>,
) -> f64 {
    let total: f64 = graces.iter().map(|g| g.beats).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let limit = principal * MAX_GRACE_SHARE;
    let factor = if total > limit { limit / total } else { 1.0 };
    let mut time = start;
    for grace in graces {
        let duration = grace.beats * factor;
        voice.notes.push(NoteEvent {
            pitch: voice.sounding_pitch(grace.written),
            velocity: voice.scale_velocity(velocity),
            start: time,
            duration,
            channel: voice.channel,
            voice: voice.id.clone(),
            decorations: Vec::new(),
            is_grace: true,
            part,
        });
        time += duration;
    }
    time - start
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_length() {
        assert_eq!(parse_length(""), Some(1.0));
        assert_eq!(parse_length("3"), Some(3.0));
        assert_eq!(parse_length("3/2"), Some(1.5));
        assert_eq!(parse_length("/"), Some(0.5));
        assert_eq!(parse_length("//"), Some(0.25));
        assert_eq!(parse_length("/4"), Some(0.25));
        assert_eq!(parse_length("0"), None);
        assert_eq!(parse_length("3/0"), None);
    }

    #[test]
    fn test_written_note() {
        let note = WrittenNote::parse("^c'2").unwrap();
        assert_eq!(note.accidental, Some(Accidental::Sharp));
        assert_eq!(note.letter, NoteName::C);
        assert_eq!(note.octave, 2);
        assert_eq!(note.length, 2.0);

        let low = WrittenNote::parse("__B,,/").unwrap();
        assert_eq!(low.accidental, Some(Accidental::DoubleFlat));
        assert_eq!(low.octave, -2);
        assert_eq!(low.length, 0.5);

        assert!(WrittenNote::parse("^").is_none());
    }

    #[test]
    fn test_bar_accidentals_persist_per_octave() {
        let key = KeySignature::from_str("D").unwrap();
        let mut bar = HashMap::new();
        let f = WrittenNote::parse("F").unwrap();
        assert_eq!(f.resolve_pitch(&mut bar, &key), 66);
        let natural = WrittenNote::parse("=F").unwrap();
        assert_eq!(natural.resolve_pitch(&mut bar, &key), 65);
        assert_eq!(f.resolve_pitch(&mut bar, &key), 65);
        // Other octave still follows the key
        let high_f = WrittenNote::parse("f").unwrap();
        assert_eq!(high_f.resolve_pitch(&mut bar, &key), 78);
        bar.clear();
        assert_eq!(f.resolve_pitch(&mut bar, &key), 66);
    }

    #[test]
    fn test_tuplet_defaults() {
        let simple = Meter::from_str("4/4").unwrap();
        let compound = Meter::from_str("6/8").unwrap();

        let triplet = TupletContext::from_token("(3", &simple).unwrap();
        assert_eq!((triplet.notes, triplet.in_time_of, triplet.remaining), (3, 2, 3));
        assert_eq!(TupletContext::from_token("(2", &simple).unwrap().in_time_of, 3);
        assert_eq!(TupletContext::from_token("(5", &simple).unwrap().in_time_of, 2);
        assert_eq!(TupletContext::from_token("(5", &compound).unwrap().in_time_of, 3);

        let explicit = TupletContext::from_token("(3:4:6", &simple).unwrap();
        assert_eq!((explicit.in_time_of, explicit.remaining), (4, 6));

        // q given as 0 or left empty comes from the meter
        assert_eq!(TupletContext::from_token("(3:0", &simple).unwrap().in_time_of, 2);
        let skipped = TupletContext::from_token("(5::4", &compound).unwrap();
        assert_eq!((skipped.in_time_of, skipped.remaining), (3, 4));

        assert!(TupletContext::from_token("(0", &simple).is_none());
    }
}
