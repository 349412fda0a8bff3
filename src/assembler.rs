//! # Tune Assembly
//!
//! Final stage of a parse:
//! 1. A tune with no voices gets the implicit voice `"1"`.
//! 2. A header part sequence (`P:ABA`) is resolved by copying each named
//!    section's notes, in order, onto the beat axis. Notes written before
//!    the first `P:` label play first.
//! 3. All voices are merged into `Tune::events`, sorted by start time. Notes
//!    starting together keep voice declaration order.

use crate::ast::{NoteEvent, Tune, VoiceState, VoiceStatus};
use crate::error::AbcError;
use crate::voice::IMPLICIT_VOICE_ID;
use log::warn;

/// Tolerance when deciding which section a note starts in.
const SECTION_EPSILON: f64 = 1e-9;

/// A named section of the body, started by `P:X`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartSection {
    pub label: char,
    /// Beat at which the section starts (all voices are in step here)
    pub start: f64,
}

/// Resolve parts and build `tune.events`.
///
/// An undefined part leaves the notes in written order and is returned as
/// an error; the events are built either way.
pub fn assemble(
    tune: &mut Tune,
    sections: &[PartSection],
    sequence_line: usize,
) -> Result<(), AbcError> {
    if tune.voices.is_empty() {
        let mut voice = VoiceState::new(IMPLICIT_VOICE_ID);
        voice.status = VoiceStatus::Defined;
        tune.voices.insert(IMPLICIT_VOICE_ID.to_string(), voice);
        tune.voice_order = vec![IMPLICIT_VOICE_ID.to_string()];
    }

    tune.length = written_end(tune);
    let result = match tune.part_sequence.clone() {
        Some(sequence) if !sequence.is_empty() => {
            expand_parts(tune, sections, &sequence, sequence_line).map(|end| tune.length = end)
        }
        _ => Ok(()),
    };
    tune.events = merge_voices(tune);
    result
}

/// Furthest point any voice reached, rests and note tails included
fn written_end(tune: &Tune) -> f64 {
    tune.voices
        .values()
        .flat_map(|v| v.notes.iter().map(NoteEvent::end).chain([v.saved_time]))
        .fold(0.0, f64::max)
}

fn expand_parts(
    tune: &mut Tune,
    sections: &[PartSection],
    sequence: &[char],
    sequence_line: usize,
) -> Result<f64, AbcError> {
    let tune_end = tune.length;

    // (label, start, end); a label written twice keeps its first section
    let mut ranges: Vec<(char, f64, f64)> = Vec::new();
    for (i, section) in sections.iter().enumerate() {
        if ranges.iter().any(|r| r.0 == section.label) {
            warn!("Part {} is written more than once; using the first", section.label);
            continue;
        }
        let end = sections.get(i + 1).map_or(tune_end, |next| next.start);
        ranges.push((section.label, section.start, end));
    }

    let mut resolved = Vec::with_capacity(sequence.len());
    for label in sequence {
        match ranges.iter().find(|r| r.0 == *label) {
            Some(&range) => resolved.push(range),
            None => {
                return Err(AbcError::Structural {
                    line: sequence_line,
                    message: format!("Part {} is not defined", label),
                })
            }
        }
    }

    let first_start = sections.first().map_or(0.0, |s| s.start);
    let played_end = first_start + resolved.iter().map(|r| r.2 - r.1).sum::<f64>();
    for voice in tune.voices.values_mut() {
        let mut notes: Vec<NoteEvent> = voice
            .notes
            .iter()
            .filter(|n| n.part.is_none())
            .cloned()
            .collect();
        let mut cursor = first_start;
        for &(label, start, end) in &resolved {
            let in_section = voice.notes.iter().filter(|n| {
                n.part == Some(label)
                    && n.start >= start - SECTION_EPSILON
                    && n.start < end - SECTION_EPSILON
            });
            for note in in_section {
                let mut copy = note.clone();
                copy.start += cursor - start;
                notes.push(copy);
            }
            cursor += end - start;
        }
        voice.notes = notes;
    }
    Ok(played_end)
}

/// Every voice's notes in one list, ordered by start. The sort is stable
/// and voices are visited in declaration order, which breaks ties.
pub fn merge_voices(tune: &Tune) -> Vec<NoteEvent> {
    let mut events: Vec<NoteEvent> = tune
        .ordered_voices()
        .flat_map(|voice| voice.notes.iter().cloned())
        .collect();
    events.sort_by(|a, b| a.start.total_cmp(&b.start));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn note(voice: &str, pitch: u8, start: f64) -> NoteEvent {
        NoteEvent {
            pitch,
            velocity: 80,
            start,
            duration: 1.0,
            channel: 0,
            voice: voice.to_string(),
            decorations: Vec::new(),
            is_grace: false,
            part: None,
        }
    }

    #[test]
    fn test_merge_breaks_ties_by_declaration_order() {
        let mut tune = Tune::default();
        let mut low = VoiceState::new("low");
        low.notes = vec![note("low", 48, 0.0), note("low", 50, 1.0)];
        let mut high = VoiceState::new("high");
        high.notes = vec![note("high", 72, 0.0), note("high", 74, 0.5)];
        tune.voices.insert("low".to_string(), low);
        tune.voices.insert("high".to_string(), high);
        tune.voice_order = vec!["high".to_string(), "low".to_string()];

        let pitches: Vec<u8> = merge_voices(&tune).iter().map(|e| e.pitch).collect();
        assert_eq!(pitches, vec![72, 48, 74, 50]);
    }

    #[test]
    fn test_implicit_voice() {
        let mut tune = Tune::default();
        assemble(&mut tune, &[], 0).unwrap();
        assert_eq!(tune.voice_order, vec![IMPLICIT_VOICE_ID.to_string()]);
        assert!(tune.voice(IMPLICIT_VOICE_ID).is_some());
    }

    #[test]
    fn test_part_sequence() {
        let tune = parse("X:1\nP:ABA\nL:1/4\nK:C\nP:A\nC D\nP:B\nE\n");
        assert!(tune.is_complete(), "{:?}", tune.diagnostics);
        let pitches: Vec<u8> = tune.events.iter().map(|e| e.pitch).collect();
        let starts: Vec<f64> = tune.events.iter().map(|e| e.start).collect();
        assert_eq!(pitches, vec![60, 62, 64, 60, 62]);
        assert_eq!(starts, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_part_sequence_length_counts_rests() {
        let tune = parse("X:1\nP:ABA\nL:1/4\nK:C\nP:A\nC z\nP:B\nE z2\n");
        assert!(tune.is_complete(), "{:?}", tune.diagnostics);
        assert_eq!(tune.length, 7.0);
        assert_eq!(tune.duration_beats(), 7.0);
    }

    #[test]
    fn test_trailing_rest_extends_length() {
        let tune = parse("X:1\nL:1/4\nK:C\nC z3\n");
        assert_eq!(tune.events.last().map(NoteEvent::end), Some(1.0));
        assert_eq!(tune.duration_beats(), 4.0);
    }

    #[test]
    fn test_unlabeled_notes_play_first() {
        let tune = parse("X:1\nP:BA\nL:1/4\nK:C\nG\nP:A\nC\nP:B\nE\n");
        let pitches: Vec<u8> = tune.events.iter().map(|e| e.pitch).collect();
        let starts: Vec<f64> = tune.events.iter().map(|e| e.start).collect();
        assert_eq!(pitches, vec![67, 64, 60]);
        assert_eq!(starts, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_parts_keep_voices_in_step() {
        let tune = parse("X:1\nP:BA\nL:1/4\nK:C\nP:A\nV:1\nC D\nV:2\nE\nP:B\nV:1\nF\n");
        assert!(tune.is_complete(), "{:?}", tune.diagnostics);
        // B (2 beats in, 1 long) first, then all of A
        let starts: Vec<(u8, f64)> = tune.events.iter().map(|e| (e.pitch, e.start)).collect();
        assert_eq!(starts, vec![(65, 0.0), (60, 1.0), (64, 1.0), (62, 2.0)]);
    }

    #[test]
    fn test_undefined_part() {
        let tune = parse("X:1\nP:AC\nK:C\nP:A\nC\n");
        assert_eq!(
            tune.diagnostics,
            vec![AbcError::Structural {
                line: 2,
                message: "Part C is not defined".to_string()
            }]
        );
        assert_eq!(tune.events.len(), 1);
    }
}
