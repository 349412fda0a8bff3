//! # Repeat Expansion
//!
//! Repeats are expanded textually before tokenization, so the parser only ever
//! sees straight-through music.
//!
//! - `|: A B :|` plays `A B A B`
//! - `::` closes one repeat and opens the next
//! - `:|` with no opening marker repeats from the start of the section
//! - `|: A |1 B :|2 C` plays `A B A C` (also `[1`, `[2`)
//!
//! The body is split at voice switches (`V:` lines and inline `[V:...]`) and
//! each section is expanded on its own, so a repeat in one voice never swallows
//! text belonging to another.

use crate::error::AbcError;

/// Upper bound on repeat expansions per voice section.
pub const MAX_REPEAT_EXPANSIONS: usize = 64;

/// Upper bound on the size of an expanded section, in bytes.
const MAX_EXPANDED_LEN: usize = 1 << 20;

/// Split a tune into its header (through the first `K:` line) and its body.
///
/// Text with no `K:` line is treated as a body fragment with an empty header.
pub fn split_header(text: &str) -> (&str, &str) {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        offset += line.len();
        if line.trim_start().starts_with("K:") {
            return text.split_at(offset);
        }
    }
    ("", text)
}

/// Expand every repeat in a tune, leaving the header untouched.
pub fn expand_repeats(text: &str) -> Result<String, AbcError> {
    let (header, body) = split_header(text);
    let mut expanded = String::with_capacity(text.len());
    expanded.push_str(header);
    for section in voice_sections(body) {
        expanded.push_str(&expand_section(section)?);
    }
    Ok(expanded)
}

/// Split a body at voice switches. Each section starts with its switch marker.
fn voice_sections(body: &str) -> Vec<&str> {
    let mut boundaries = vec![0];
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        let indent = line.len() - line.trim_start().len();
        if line.trim_start().starts_with("V:") {
            boundaries.push(offset + indent);
        }
        offset += line.len();
    }
    boundaries.extend(body.match_indices("[V:").map(|(i, _)| i));
    boundaries.sort_unstable();
    boundaries.dedup();
    boundaries.push(body.len());

    boundaries
        .windows(2)
        .map(|w| &body[w[0]..w[1]])
        .filter(|s| !s.is_empty())
        .collect()
}

/// Expand the repeats of one voice section.
///
/// Returns the section unchanged when it contains no repeat markers.
pub fn expand_section(section: &str) -> Result<String, AbcError> {
    if !section.contains(":|") && !section.contains("|:") && !section.contains("::") {
        return Ok(section.to_string());
    }

    let mut text = split_double_repeats(section);
    for _ in 0..MAX_REPEAT_EXPANSIONS {
        let Some(end) = text.find(":|") else {
            // Opening markers with nothing to close them are plain bar lines
            return Ok(text.replace("|:", "|"));
        };

        let (prefix_end, content_start) = match text[..end].rfind("|:") {
            Some(open) => (open, open + 2),
            None => {
                let start = music_start(&text);
                (start, start)
            }
        };

        let content = &text[content_start..end];
        let mut rest = &text[end + 2..];
        let (main, first_ending) = split_first_ending(content);
        let mut repeated = String::with_capacity(content.len() * 2);
        match first_ending {
            Some(first) => {
                repeated.push_str(main);
                repeated.push_str(first);
                repeated.push_str(main);
                rest = strip_second_ending(rest);
            }
            None => {
                repeated.push_str(content);
                repeated.push_str(content);
            }
        }

        let mut next = String::with_capacity(text.len() + repeated.len());
        next.push_str(&text[..prefix_end]);
        next.push_str(&repeated);
        next.push_str(rest);
        if next.len() > MAX_EXPANDED_LEN {
            return Err(AbcError::RepeatLimit {
                limit: MAX_REPEAT_EXPANSIONS,
            });
        }
        text = next;
    }

    Err(AbcError::RepeatLimit {
        limit: MAX_REPEAT_EXPANSIONS,
    })
}

/// Rewrite each `::` as `:||:`, leaving tuplets such as `(3::2` alone.
fn split_double_repeats(section: &str) -> String {
    let mut text = String::with_capacity(section.len() + 8);
    let mut rest = section;
    while let Some(i) = rest.find("::") {
        text.push_str(&rest[..i]);
        if ends_in_tuplet_count(&text) {
            text.push_str("::");
        } else {
            text.push_str(":||:");
        }
        rest = &rest[i + 2..];
    }
    text.push_str(rest);
    text
}

/// True when `text` ends with `(` and a note count, as in `(3`.
fn ends_in_tuplet_count(text: &str) -> bool {
    let before_digits = text.trim_end_matches(|c: char| c.is_ascii_digit());
    before_digits.len() < text.len() && before_digits.ends_with('(')
}

/// Offset of the first music in a section, after any leading field lines
/// (`V:1`) or an inline voice switch.
fn music_start(text: &str) -> usize {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let is_field = trimmed.len() >= 2
            && trimmed.as_bytes()[0].is_ascii_alphabetic()
            && trimmed.as_bytes()[1] == b':';
        if is_field {
            offset += line.len();
            continue;
        }
        if trimmed.starts_with("[V:") {
            if let Some(close) = line.find(']') {
                return offset + close + 1;
            }
        }
        break;
    }
    offset
}

/// Split repeat content at a first-ending marker (`|1` or `[1`).
fn split_first_ending(content: &str) -> (&str, Option<&str>) {
    for marker in ["[1", "|1"] {
        if let Some(pos) = content.find(marker) {
            // Keep the bar line before a `|1` in the shared part
            let main_end = if marker == "|1" { pos + 1 } else { pos };
            return (&content[..main_end], Some(&content[pos + 2..]));
        }
    }
    (content, None)
}

/// Drop a second-ending marker (`2` or `[2`) right after the closing repeat.
fn strip_second_ending(rest: &str) -> &str {
    if let Some(stripped) = rest.strip_prefix("[2") {
        stripped
    } else if let Some(stripped) = rest.strip_prefix('2') {
        stripped
    } else if let Some(stripped) = rest.trim_start_matches(' ').strip_prefix("[2") {
        stripped
    } else {
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalized(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_no_markers_is_unchanged() {
        let text = "X:1\nK:G\nA B c d | e f g a |]\n";
        assert_eq!(expand_repeats(text).unwrap(), text);
        assert_eq!(expand_section("A B [CEG] | z2 |").unwrap(), "A B [CEG] | z2 |");
    }

    #[test]
    fn test_simple_repeat() {
        let expanded = expand_section("A B |: C D :|").unwrap();
        assert_eq!(normalized(&expanded), "A B C D C D");
    }

    #[test]
    fn test_repeat_without_opening_marker() {
        let expanded = expand_section("A B :| C").unwrap();
        assert_eq!(normalized(&expanded), "A B A B C");
    }

    #[test]
    fn test_double_repeat() {
        let expanded = expand_section("|: A :: B :|").unwrap();
        assert_eq!(normalized(&expanded), "A A B B");
    }

    #[test]
    fn test_nested_repeat() {
        let expanded = expand_section("|: A |: B :| C :|").unwrap();
        assert_eq!(normalized(&expanded), "A B B C A B B C");
    }

    #[test]
    fn test_endings() {
        let expanded = expand_section("|: A B |1 C :|2 D |").unwrap();
        assert_eq!(normalized(&expanded), "A B | C A B | D |");

        let bracketed = expand_section("|: A [1 C :|[2 D |").unwrap();
        assert_eq!(normalized(&bracketed), "A C A D |");
    }

    #[test]
    fn test_unclosed_opening_becomes_bar() {
        assert_eq!(expand_section("A |: B").unwrap(), "A | B");
    }

    #[test]
    fn test_repeats_stay_inside_voice() {
        let text = "X:1\nK:C\nV:1\nA :|\nV:2\nC D\n";
        let expanded = expand_repeats(text).unwrap();
        assert_eq!(expanded, "X:1\nK:C\nV:1\nA A \nV:2\nC D\n");
    }

    #[test]
    fn test_tuplet_colons_are_not_repeats() {
        assert_eq!(
            expand_section("(3::3 ABc d |]").unwrap(),
            "(3::3 ABc d |]"
        );
        assert_eq!(
            normalized(&expand_section("|: (3::3 ABc :: d :|").unwrap()),
            "(3::3 ABc (3::3 ABc d d"
        );
    }

    #[test]
    fn test_split_header() {
        let (header, body) = split_header("X:1\nT:Tune\nK:D\nabc\n");
        assert_eq!(header, "X:1\nT:Tune\nK:D\n");
        assert_eq!(body, "abc\n");
        assert_eq!(split_header("abc"), ("", "abc"));
    }

    #[test]
    fn test_expansion_limit() {
        // Every repeat doubles everything before it
        let mut text = String::new();
        for _ in 0..40 {
            text.push_str("abcdefgh :|");
        }
        assert_eq!(
            expand_section(&text),
            Err(AbcError::RepeatLimit {
                limit: MAX_REPEAT_EXPANSIONS
            })
        );
    }
}
