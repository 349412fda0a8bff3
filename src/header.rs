//! # Header Fields
//!
//! Applies one-letter fields (`T:Title`, `M:6/8`, `V:1 clef=bass`) and `%%MIDI`
//! directives to the tune being built.
//!
//! The parser starts in [`ParseState::Header`]. The first `K:` field ends the
//! header; after that the same fields may appear in the body as whole lines
//! or inline (`[K:D]`) and change the running [`MusicContext`] instead of the
//! tune's header values.
//!
//! ## Voice fields
//! - In the header, `V:` always defines a voice.
//! - In the body, a `V:` with attributes written before any music still
//!   only defines the voice.
//! - Any other body `V:` switches to the voice, applying its attributes first.

use crate::ast::{parse_fraction, Clef, KeySignature, Meter, Tempo, Tune};
use crate::error::AbcError;
use crate::lexer::{split_words, Token, TokenKind};
use crate::voice::{parse_channel, VoiceAttributes, VoiceManager};
use log::{debug, warn};
use std::iter::Peekable;
use std::str::Chars;

/// Upper bound on a repeat count in a part sequence such as `P:A4B`.
const MAX_PART_REPEAT: u32 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    Header,
    Body,
}

/// Settings that notes are read against. Changed by body fields.
#[derive(Debug, Clone)]
pub struct MusicContext {
    pub key: KeySignature,
    pub meter: Meter,
    /// Unit note length as a fraction of a whole note
    pub unit_length: f64,
    unit_length_set: bool,
}

impl Default for MusicContext {
    fn default() -> Self {
        let meter = Meter::default();
        Self {
            key: KeySignature::default(),
            meter,
            unit_length: meter.default_unit_length(),
            unit_length_set: false,
        }
    }
}

/// What the caller has to do after a field was applied
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEffect {
    None,
    VoiceSwitched(String),
    /// `P:X` in the body starts named section X
    PartStarted(char),
}

/// Parser for field lines, inline fields and directives
#[derive(Debug)]
pub struct HeaderFieldParser {
    state: ParseState,
    context: MusicContext,
    music_started: bool,
    /// Line of the header `P:` field, for part-sequence errors
    part_sequence_line: Option<usize>,
}

impl Default for HeaderFieldParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderFieldParser {
    pub fn new() -> Self {
        Self {
            state: ParseState::Header,
            context: MusicContext::default(),
            music_started: false,
            part_sequence_line: None,
        }
    }

    /// A parser for a body fragment with no header.
    pub fn body_only() -> Self {
        Self {
            state: ParseState::Body,
            ..Self::new()
        }
    }

    pub fn state(&self) -> ParseState {
        self.state
    }

    pub fn context(&self) -> &MusicContext {
        &self.context
    }

    pub fn part_sequence_line(&self) -> Option<usize> {
        self.part_sequence_line
    }

    /// Record that music has been seen in the body.
    pub fn begin_music(&mut self) {
        self.music_started = true;
    }

    /// Apply a field or inline field token.
    pub fn apply_field(
        &mut self,
        token: &Token,
        tune: &mut Tune,
        voices: &mut VoiceManager,
    ) -> Result<FieldEffect, AbcError> {
        let name = match token.kind {
            TokenKind::Field(name) | TokenKind::InlineField(name) => name,
            _ => return Ok(FieldEffect::None),
        };
        let value = token.text.trim();
        let line = token.line;
        let in_header = self.state == ParseState::Header;

        match name {
            'X' => {
                let reference = value
                    .parse()
                    .map_err(|_| metadata(line, format!("Invalid reference number '{}'", value)))?;
                tune.reference = Some(reference);
            }
            'T' => tune.titles.push(value.to_string()),
            'C' if tune.composer.is_none() => tune.composer = Some(value.to_string()),
            'M' => {
                let meter = Meter::from_str(value)
                    .ok_or_else(|| metadata(line, format!("Invalid meter '{}'", value)))?;
                self.context.meter = meter;
                if in_header {
                    tune.meter = meter;
                }
            }
            'L' => {
                let length = parse_fraction(value)
                    .ok_or_else(|| metadata(line, format!("Invalid unit length '{}'", value)))?;
                self.context.unit_length = length;
                self.context.unit_length_set = true;
                if in_header {
                    tune.unit_length = length;
                }
            }
            'Q' => {
                let tempo = Tempo::from_str(value, self.context.meter.beat_unit())
                    .ok_or_else(|| metadata(line, format!("Invalid tempo '{}'", value)))?;
                if !self.music_started {
                    tune.tempo = tempo;
                } else {
                    warn!(
                        "Line {}: tempo change to {} after music started is ignored",
                        line, tempo.bpm
                    );
                }
            }
            'K' => self.apply_key(token, tune, voices)?,
            'V' => return self.apply_voice(token, voices),
            'P' if in_header => {
                let sequence = parse_part_sequence(value).map_err(|m| metadata(line, m))?;
                tune.part_sequence = Some(sequence);
                self.part_sequence_line = Some(line);
            }
            'P' => {
                return match value.chars().next() {
                    Some(label) if label.is_ascii_uppercase() => Ok(FieldEffect::PartStarted(label)),
                    _ => Err(metadata(line, format!("Invalid part label '{}'", value))),
                }
            }
            'w' | 'W' => tune.lyrics.push(value.to_string()),
            other => tune.fields.push((other, value.to_string())),
        }
        Ok(FieldEffect::None)
    }

    fn apply_key(
        &mut self,
        token: &Token,
        tune: &mut Tune,
        voices: &mut VoiceManager,
    ) -> Result<(), AbcError> {
        let mut key_words = Vec::new();
        let mut flags = Vec::new();
        for (i, word) in split_words(&token.text)
            .into_iter()
            .filter(|w| !w.contains('='))
            .enumerate()
        {
            // "K:G bass" carries a clef after the key
            if i > 0 && Clef::from_str(&word).is_some() {
                flags.push(word);
            } else {
                key_words.push(word);
            }
        }
        let key_text = key_words.join(" ");
        let key = KeySignature::from_str(&key_text)
            .ok_or_else(|| metadata(token.line, format!("Unknown key '{}'", key_text)))?;
        self.context.key = key;

        if !token.properties.is_empty() || !flags.is_empty() {
            let attrs = VoiceAttributes::parse(&token.properties, &flags)
                .map_err(|m| metadata(token.line, m))?;
            let target = voices.settings_target();
            voices.define(&target, &attrs);
        }

        if self.state == ParseState::Header {
            tune.key = key;
            if !self.context.unit_length_set {
                self.context.unit_length = self.context.meter.default_unit_length();
            }
            tune.meter = self.context.meter;
            tune.unit_length = self.context.unit_length;
            self.state = ParseState::Body;
            debug!("Header ends at line {}", token.line);
        }
        Ok(())
    }

    fn apply_voice(
        &mut self,
        token: &Token,
        voices: &mut VoiceManager,
    ) -> Result<FieldEffect, AbcError> {
        let words = split_words(&token.text);
        let id = match words.first() {
            Some(id) if !id.contains('=') => id.clone(),
            _ => return Err(metadata(token.line, "Voice field without an id".to_string())),
        };
        let flags: Vec<String> = words[1..]
            .iter()
            .filter(|w| !w.contains('='))
            .cloned()
            .collect();
        let attrs =
            VoiceAttributes::parse(&token.properties, &flags).map_err(|m| metadata(token.line, m))?;
        let is_definition = !token.properties.is_empty() || !flags.is_empty();

        if self.state == ParseState::Header || (is_definition && !self.music_started) {
            voices.define(&id, &attrs);
            return Ok(FieldEffect::None);
        }
        if is_definition {
            voices.define(&id, &attrs);
        }
        voices.switch_to(&id);
        Ok(FieldEffect::VoiceSwitched(id))
    }

    /// Apply a `%%` directive. Only `%%MIDI program|channel|transpose` affect
    /// playback; everything else is formatting and is skipped.
    pub fn apply_directive(
        &mut self,
        text: &str,
        line: usize,
        voices: &mut VoiceManager,
    ) -> Result<(), AbcError> {
        let words: Vec<&str> = text.split_whitespace().collect();
        let (command, args) = match words.as_slice() {
            ["MIDI", command, args @ ..] => (*command, args),
            _ => {
                debug!("Line {}: skipping directive %%{}", line, text);
                return Ok(());
            }
        };

        let number = |s: &str| -> Result<i32, AbcError> {
            s.parse()
                .map_err(|_| metadata(line, format!("Invalid number '{}' in %%MIDI {}", s, command)))
        };

        let mut attrs = VoiceAttributes::default();
        match (command, args) {
            ("program", [program]) => attrs.program = Some(midi_program(number(*program)?, line)?),
            ("program", [channel, program]) => {
                attrs.channel = Some(parse_channel(*channel).map_err(|m| metadata(line, m))?);
                attrs.program = Some(midi_program(number(*program)?, line)?);
            }
            ("channel", [channel]) => {
                attrs.channel = Some(parse_channel(*channel).map_err(|m| metadata(line, m))?)
            }
            ("transpose", [semitones]) => {
                let semitones = number(*semitones)?;
                attrs.transpose = Some(
                    i8::try_from(semitones)
                        .map_err(|_| metadata(line, format!("Transpose {} out of range", semitones)))?,
                );
            }
            _ => {
                debug!("Line {}: skipping directive %%{}", line, text);
                return Ok(());
            }
        }
        let target = voices.settings_target();
        voices.define(&target, &attrs);
        Ok(())
    }
}

fn metadata(line: usize, message: String) -> AbcError {
    AbcError::Metadata { line, message }
}

fn midi_program(value: i32, line: usize) -> Result<u8, AbcError> {
    u8::try_from(value)
        .ok()
        .filter(|p| *p <= 127)
        .ok_or_else(|| metadata(line, format!("Program {} out of range 0-127", value)))
}

/// Expand a part sequence such as `ABAC`, `A2B` or `(AB)2C` into play order.
pub fn parse_part_sequence(text: &str) -> Result<Vec<char>, String> {
    let mut chars = text.chars().peekable();
    let sequence = parse_part_group(&mut chars, 0)?;
    if let Some(c) = chars.next() {
        return Err(format!("Unexpected '{}' in part sequence", c));
    }
    Ok(sequence)
}

fn parse_part_group(chars: &mut Peekable<Chars>, depth: usize) -> Result<Vec<char>, String> {
    let mut sequence = Vec::new();
    while let Some(&c) = chars.peek() {
        let item = match c {
            'A'..='Z' => {
                chars.next();
                vec![c]
            }
            '(' => {
                chars.next();
                let inner = parse_part_group(chars, depth + 1)?;
                if chars.next() != Some(')') {
                    return Err("Unclosed '(' in part sequence".to_string());
                }
                inner
            }
            ')' if depth > 0 => break,
            '.' | ' ' | '\t' => {
                chars.next();
                continue;
            }
            other => return Err(format!("Unexpected '{}' in part sequence", other)),
        };

        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        let count = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<u32>()
                .ok()
                .filter(|n| (1..=MAX_PART_REPEAT).contains(n))
                .ok_or_else(|| format!("Invalid repeat count '{}' in part sequence", digits))?
        };
        for _ in 0..count {
            sequence.extend_from_slice(&item);
        }
    }
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Mode;
    use crate::lexer::tokenize_line;

    fn field(text: &str) -> Token {
        tokenize_line(text, 1).remove(0)
    }

    fn apply(
        parser: &mut HeaderFieldParser,
        tune: &mut Tune,
        voices: &mut VoiceManager,
        text: &str,
    ) -> Result<FieldEffect, AbcError> {
        parser.apply_field(&field(text), tune, voices)
    }

    #[test]
    fn test_header_fields() {
        let mut parser = HeaderFieldParser::new();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        for line in ["X:3", "T:The Kesh", "T:Kesh Jig", "C:Trad.", "R:jig", "M:6/8", "Q:3/8=100"] {
            apply(&mut parser, &mut tune, &mut voices, line).unwrap();
        }
        assert_eq!(parser.state(), ParseState::Header);
        apply(&mut parser, &mut tune, &mut voices, "K:G").unwrap();
        assert_eq!(parser.state(), ParseState::Body);

        assert_eq!(tune.reference, Some(3));
        assert_eq!(tune.title(), Some("The Kesh"));
        assert_eq!(tune.titles.len(), 2);
        assert_eq!(tune.composer.as_deref(), Some("Trad."));
        assert_eq!(tune.fields, vec![('R', "jig".to_string())]);
        assert!(tune.meter.is_compound());
        assert_eq!(tune.unit_length, 1.0 / 8.0);
        assert_eq!(tune.tempo.bpm, 150.0);
        assert_eq!(tune.key.fifths, 1);
    }

    #[test]
    fn test_default_unit_length_from_meter() {
        let mut parser = HeaderFieldParser::new();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        apply(&mut parser, &mut tune, &mut voices, "M:2/4").unwrap();
        apply(&mut parser, &mut tune, &mut voices, "K:D").unwrap();
        assert_eq!(tune.unit_length, 1.0 / 16.0);
    }

    #[test]
    fn test_invalid_values_are_metadata_errors() {
        let mut parser = HeaderFieldParser::new();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        for line in ["M:7/x", "L:0", "Q:fast=1", "K:Hx", "X:abc"] {
            let err = apply(&mut parser, &mut tune, &mut voices, line).unwrap_err();
            assert!(matches!(err, AbcError::Metadata { line: 1, .. }), "{}", line);
        }
    }

    #[test]
    fn test_key_with_mode_and_clef() {
        let mut parser = HeaderFieldParser::new();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        apply(&mut parser, &mut tune, &mut voices, "K:A dor clef=bass transpose=-12").unwrap();
        assert_eq!(tune.key.mode, Mode::Dorian);
        assert_eq!(tune.key.fifths, 1);
        let voice = voices.get("1").unwrap();
        assert_eq!(voice.clef, Clef::Bass);
        assert_eq!(voice.transpose, -12);
    }

    #[test]
    fn test_voice_definition_and_switch() {
        let mut parser = HeaderFieldParser::new();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        let effect = apply(&mut parser, &mut tune, &mut voices, "V:S name=\"Soprano\" program=52").unwrap();
        assert_eq!(effect, FieldEffect::None);
        apply(&mut parser, &mut tune, &mut voices, "K:C").unwrap();
        // Definitions right after K: do not switch
        let effect = apply(&mut parser, &mut tune, &mut voices, "V:B clef=bass").unwrap();
        assert_eq!(effect, FieldEffect::None);
        assert_eq!(voices.active_id(), None);

        parser.begin_music();
        let effect = apply(&mut parser, &mut tune, &mut voices, "V:B").unwrap();
        assert_eq!(effect, FieldEffect::VoiceSwitched("B".to_string()));
        // Attributes after music started apply and switch
        let effect = apply(&mut parser, &mut tune, &mut voices, "V:S volume=0.5").unwrap();
        assert_eq!(effect, FieldEffect::VoiceSwitched("S".to_string()));

        let soprano = voices.get("S").unwrap();
        assert_eq!(soprano.name.as_deref(), Some("Soprano"));
        assert_eq!(soprano.instrument, Some(52));
        assert_eq!(soprano.volume, 0.5);
        assert_eq!(voices.order(), &["S".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_inline_fields_change_context_only() {
        let mut parser = HeaderFieldParser::new();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        apply(&mut parser, &mut tune, &mut voices, "K:C").unwrap();
        let inline = tokenize_line("[K:Bb] [L:1/4]", 5);
        parser.apply_field(&inline[0], &mut tune, &mut voices).unwrap();
        parser.apply_field(&inline[2], &mut tune, &mut voices).unwrap();
        assert_eq!(parser.context().key.fifths, -2);
        assert_eq!(parser.context().unit_length, 0.25);
        assert_eq!(tune.key.fifths, 0);
        assert_eq!(tune.unit_length, 1.0 / 8.0);
    }

    #[test]
    fn test_body_part_label() {
        let mut parser = HeaderFieldParser::body_only();
        let mut tune = Tune::default();
        let mut voices = VoiceManager::new();
        assert_eq!(
            apply(&mut parser, &mut tune, &mut voices, "P:B").unwrap(),
            FieldEffect::PartStarted('B')
        );
    }

    #[test]
    fn test_part_sequences() {
        assert_eq!(parse_part_sequence("ABAC").unwrap(), vec!['A', 'B', 'A', 'C']);
        assert_eq!(parse_part_sequence("A2B").unwrap(), vec!['A', 'A', 'B']);
        assert_eq!(
            parse_part_sequence("(AB)2C").unwrap(),
            vec!['A', 'B', 'A', 'B', 'C']
        );
        assert_eq!(parse_part_sequence("A.B.A").unwrap(), vec!['A', 'B', 'A']);
        assert!(parse_part_sequence("(AB").is_err());
        assert!(parse_part_sequence("A)").is_err());
        assert!(parse_part_sequence("a").is_err());
    }

    #[test]
    fn test_midi_directives() {
        let mut parser = HeaderFieldParser::new();
        let mut voices = VoiceManager::new();
        parser.apply_directive("MIDI program 41", 2, &mut voices).unwrap();
        parser.apply_directive("MIDI channel 4", 3, &mut voices).unwrap();
        parser.apply_directive("MIDI transpose -3", 4, &mut voices).unwrap();
        parser.apply_directive("pagewidth 21cm", 5, &mut voices).unwrap();
        let voice = voices.get("1").unwrap();
        assert_eq!(voice.instrument, Some(41));
        assert_eq!(voice.channel, 3);
        assert_eq!(voice.transpose, -3);

        assert!(parser.apply_directive("MIDI program 300", 6, &mut voices).is_err());
    }
}
