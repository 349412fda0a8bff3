//! # Parser Module
//!
//! Runs the whole pipeline over one ABC tune and returns a [`Tune`].
//!
//! ## Pipeline
//! ```text
//! source ──> repeat::expand_repeats ──> per line: lexer::tokenize_line
//!                                           │
//!                 ┌─────────────────────────┼─────────────────────┐
//!                 v                         v                     v
//!          field lines              %% directives            music lines
//!       HeaderFieldParser         HeaderFieldParser        MusicLineParser
//!                 │                         │                     │
//!                 └──────────> VoiceManager (voices, cursors) <───┘
//!                                           │
//!                                           v
//!                                assembler::assemble ──> Tune
//! ```
//!
//! ## Error Handling
//! Parsing never stops early. Every problem becomes an entry in
//! `Tune::diagnostics` with its line (and column where known), and the rest
//! of the tune is still parsed. Line numbers refer to the text after repeat
//! expansion, which only differs from the source when a repeated passage
//! spans several lines.
//!
//! ## Example
//! ```rust
//! use abcplay::parse;
//!
//! let tune = parse("X:1\nT:Scale\nL:1/4\nK:C\nC D E F|\n");
//! assert!(tune.is_complete());
//! assert_eq!(tune.title(), Some("Scale"));
//! assert_eq!(tune.events.len(), 4);
//! assert_eq!(tune.events[3].start, 3.0);
//! ```

mod line;

pub use line::{default_in_time_of, parse_length, MusicLineParser, TupletContext, WrittenNote};

use crate::assembler::{self, PartSection};
use crate::ast::Tune;
use crate::error::AbcError;
use crate::header::{FieldEffect, HeaderFieldParser, ParseState};
use crate::lexer::{tokenize_line, Token, TokenKind};
use crate::repeat::expand_repeats;
use crate::voice::VoiceManager;
use log::debug;

/// Parse one ABC tune. Problems are collected in `Tune::diagnostics`.
pub fn parse(source: &str) -> Tune {
    let mut diagnostics = Vec::new();
    let expanded = match expand_repeats(source) {
        Ok(text) => text,
        Err(e) => {
            diagnostics.push(e);
            source.to_string()
        }
    };

    let mut parser = Parser::new(has_key_field(&expanded));
    parser.diagnostics = diagnostics;
    for (index, line) in expanded.lines().enumerate() {
        parser.parse_line(line, index + 1);
    }
    parser.finish()
}

fn has_key_field(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with("K:"))
}

/// Line-by-line parser for one tune
pub struct Parser {
    header: HeaderFieldParser,
    voices: VoiceManager,
    music: MusicLineParser,
    tune: Tune,
    sections: Vec<PartSection>,
    diagnostics: Vec<AbcError>,
}

impl Parser {
    /// `with_header` is false for a body fragment with no `K:` field.
    pub fn new(with_header: bool) -> Self {
        let header = if with_header {
            HeaderFieldParser::new()
        } else {
            HeaderFieldParser::body_only()
        };
        let tune = Tune {
            unit_length: header.context().unit_length,
            ..Tune::default()
        };
        Self {
            header,
            voices: VoiceManager::new(),
            music: MusicLineParser::new(),
            tune,
            sections: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Parse one source line. `line_no` is 1-based.
    pub fn parse_line(&mut self, line: &str, line_no: usize) {
        let tokens = tokenize_line(line, line_no);
        let Some(first) = tokens.first() else {
            return;
        };

        match first.kind {
            TokenKind::Field(_) => self.apply_field(first),
            TokenKind::Directive => {
                let result = self
                    .header
                    .apply_directive(&first.text, line_no, &mut self.voices);
                if let Err(e) = result {
                    self.diagnostics.push(e);
                }
            }
            TokenKind::Comment => {}
            _ if tokens.iter().all(|t| t.kind == TokenKind::Space) => {}
            _ if self.header.state() == ParseState::Header => {
                self.diagnostics.push(AbcError::Parse {
                    line: line_no,
                    column: first.column,
                    message: "Music before the K: field".to_string(),
                });
            }
            _ => self.parse_music(&tokens, line_no),
        }
    }

    fn parse_music(&mut self, tokens: &[Token], line_no: usize) {
        self.header.begin_music();
        for token in tokens {
            if let TokenKind::InlineField(_) = token.kind {
                self.apply_field(token);
                continue;
            }
            let result = self
                .music
                .handle_token(token, &mut self.voices, self.header.context());
            if let Err(e) = result {
                self.diagnostics.push(e);
            }
        }

        let continued = tokens
            .iter()
            .rev()
            .find(|t| !matches!(t.kind, TokenKind::Space | TokenKind::Comment))
            .is_some_and(|t| t.kind == TokenKind::Continuation);
        if !continued {
            let errors = self.music.end_line(line_no);
            self.diagnostics.extend(errors);
        }
    }

    fn apply_field(&mut self, token: &Token) {
        match self
            .header
            .apply_field(token, &mut self.tune, &mut self.voices)
        {
            Ok(FieldEffect::PartStarted(label)) => {
                self.voices.sync_all();
                debug!(
                    "Part {} starts at beat {} (line {})",
                    label,
                    self.voices.cursor(),
                    token.line
                );
                self.sections.push(PartSection {
                    label,
                    start: self.voices.cursor(),
                });
                self.music.start_part(label);
            }
            Ok(FieldEffect::VoiceSwitched(_)) | Ok(FieldEffect::None) => {}
            Err(e) => self.diagnostics.push(e),
        }
    }

    /// Finish parsing: hand the voices to the assembler and attach the
    /// diagnostics.
    pub fn finish(self) -> Tune {
        let Parser {
            header,
            voices,
            mut tune,
            sections,
            mut diagnostics,
            ..
        } = self;

        let (voices, order) = voices.into_parts();
        tune.voices = voices;
        tune.voice_order = order;
        let sequence_line = header.part_sequence_line().unwrap_or(0);
        if let Err(e) = assembler::assemble(&mut tune, &sections, sequence_line) {
            diagnostics.push(e);
        }
        tune.diagnostics = diagnostics;
        debug!(
            "Parsed {} voice(s), {} event(s), {} diagnostic(s)",
            tune.voices.len(),
            tune.events.len(),
            tune.diagnostics.len()
        );
        tune
    }
}
