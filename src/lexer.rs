//! # Tokenizer
//!
//! Lexes one line of ABC into typed tokens. Structural tokens are matched by
//! longest match first:
//! - `|:`, `:|`, `::`, `[|`, `|]`, `||` before a bare `|`
//! - `!trill!` / `+trill+` before single-character decorations
//! - `(3:2:3` before a bare slur `(`
//! - `[K:G]` inline fields and `[1` endings before a chord `[`
//!
//! A line of the form `X:value` is a single field token, `%%...` is a
//! directive, and anything the lexer does not recognise becomes an
//! [`TokenKind::Unknown`] token. Lexing never fails.

/// Token kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Whole-line field such as `T:Title` or `V:1 clef=bass`
    Field(char),
    /// Inline field such as `[K:D]`
    InlineField(char),
    /// `%%MIDI program 1` and other directives
    Directive,
    Comment,
    Note,
    /// `z` or `x` with optional length
    Rest,
    /// `Z4` or `X` - whole bars of rest
    MultiRest,
    /// `|`, `||`, `|]`, `[|`
    Bar,
    RepeatStart, // |:
    RepeatEnd,   // :|
    RepeatBoth,  // ::
    /// `[1`, `|2` volta markers
    Ending,
    ChordStart, // [
    /// `]` with optional length, e.g. `]2`
    ChordEnd,
    GraceStart, // { or {/
    GraceEnd,   // }
    SlurStart,  // (
    SlurEnd,    // )
    /// `(3`, `(3:2`, `(3:2:3`
    Tuplet,
    Tie,          // -
    BrokenRhythm, // > >> < <<
    /// Single character decoration: . ~ H L M O P S T u v
    Decoration,
    /// `!trill!` or `+trill+`
    ExtendedDecoration,
    /// Quoted chord symbol or annotation
    ChordSymbol,
    /// Trailing `\`
    Continuation,
    Space,
    Unknown,
}

/// A token with its position in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The token text. For fields this is the field value.
    pub text: String,
    pub line: usize,
    pub column: usize,
    /// `key=value` attributes of field tokens (quotes removed)
    pub properties: Vec<(String, String)>,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            kind,
            text: text.into(),
            line,
            column,
            properties: Vec::new(),
        }
    }

    /// Value of a `key=value` attribute.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

const DECORATION_CHARS: &[char] = &['.', '~', 'H', 'L', 'M', 'O', 'P', 'S', 'T', 'u', 'v'];

/// Is this a field line (`T:...`) rather than music? `a:|` is music.
pub fn is_field_line(line: &str) -> bool {
    let bytes = line.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && !matches!(bytes.get(2), Some(b'|') | Some(b':'))
}

/// Split a field value into words, keeping quoted strings together and
/// removing their quotes.
pub fn split_words(value: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    for c in value.chars() {
        match c {
            '"' => in_quote = !in_quote,
            c if c.is_whitespace() && !in_quote => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Extract the `key=value` pairs from a field value.
pub fn field_properties(value: &str) -> Vec<(String, String)> {
    split_words(value)
        .into_iter()
        .filter_map(|word| {
            let (key, val) = word.split_once('=')?;
            Some((key.to_ascii_lowercase(), val.to_string()))
        })
        .collect()
}

/// Remove a trailing `%` comment, honouring `\%` escapes.
fn strip_comment(value: &str) -> &str {
    let mut previous = '\0';
    for (i, c) in value.char_indices() {
        if c == '%' && previous != '\\' {
            return &value[..i];
        }
        previous = c;
    }
    value
}

/// Tokenize a single source line. `line` is the 1-based line number.
pub fn tokenize_line(text: &str, line: usize) -> Vec<Token> {
    Lexer::new(text, line).tokenize()
}

/// Lexer for one line of ABC
pub struct Lexer<'a> {
    input: &'a str,
    position: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, line: usize) -> Self {
        Self {
            input: input.trim_end_matches(['\n', '\r']),
            position: 0,
            line,
            column: 1,
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.position..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.remaining().chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        self.column += 1;
        Some(c)
    }

    fn advance_while(&mut self, pred: impl Fn(char) -> bool) {
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.advance();
        }
    }

    /// Consume a note length: digits, then any number of `/` with optional digits.
    fn advance_length(&mut self) {
        self.advance_while(|c| c.is_ascii_digit());
        while self.peek() == Some('/') {
            self.advance();
            self.advance_while(|c| c.is_ascii_digit());
        }
    }

    pub fn tokenize(&mut self) -> Vec<Token> {
        let line = self.line;

        if self.input.starts_with("%%") {
            return vec![Token::new(TokenKind::Directive, self.input[2..].trim(), line, 1)];
        }
        if self.input.starts_with('%') {
            return vec![Token::new(TokenKind::Comment, self.input, line, 1)];
        }
        if is_field_line(self.input) {
            let name = self.input.as_bytes()[0] as char;
            let value = strip_comment(&self.input[2..]).trim();
            let mut token = Token::new(TokenKind::Field(name), value, line, 1);
            token.properties = field_properties(value);
            return vec![token];
        }

        let mut tokens = Vec::new();
        while let Some(c) = self.peek() {
            let start = self.position;
            let column = self.column;

            let kind = match c {
                ' ' | '\t' | '`' | 'y' => {
                    self.advance_while(|c| matches!(c, ' ' | '\t' | '`' | 'y'));
                    TokenKind::Space
                }
                '%' => {
                    self.position = self.input.len();
                    TokenKind::Comment
                }
                '\\' => {
                    self.advance();
                    TokenKind::Continuation
                }
                '"' => {
                    self.advance();
                    match self.remaining().find('"') {
                        Some(end) => {
                            self.position += end + 1;
                            self.column += self.input[start + 1..self.position].chars().count();
                            TokenKind::ChordSymbol
                        }
                        None => {
                            self.position = self.input.len();
                            TokenKind::Unknown
                        }
                    }
                }
                '!' | '+' => self.lex_extended_decoration(c),
                '[' => self.lex_open_bracket(),
                ']' => {
                    self.advance();
                    self.advance_length();
                    TokenKind::ChordEnd
                }
                '|' => {
                    self.advance();
                    match self.peek() {
                        Some(':') => {
                            self.advance();
                            TokenKind::RepeatStart
                        }
                        Some('|') | Some(']') => {
                            self.advance();
                            TokenKind::Bar
                        }
                        Some(d) if d.is_ascii_digit() => {
                            self.advance();
                            TokenKind::Ending
                        }
                        _ => TokenKind::Bar,
                    }
                }
                ':' => {
                    self.advance();
                    match self.peek() {
                        Some('|') => {
                            self.advance();
                            if matches!(self.peek(), Some('|') | Some(']')) {
                                self.advance();
                            }
                            TokenKind::RepeatEnd
                        }
                        Some(':') => {
                            self.advance();
                            TokenKind::RepeatBoth
                        }
                        _ => TokenKind::Unknown,
                    }
                }
                '(' => {
                    self.advance();
                    if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.advance_while(|c| c.is_ascii_digit());
                        // Up to two `:n` parts, each number optional
                        for _ in 0..2 {
                            if self.peek() != Some(':') {
                                break;
                            }
                            self.advance();
                            self.advance_while(|c| c.is_ascii_digit());
                        }
                        TokenKind::Tuplet
                    } else {
                        TokenKind::SlurStart
                    }
                }
                ')' => {
                    self.advance();
                    TokenKind::SlurEnd
                }
                '{' => {
                    self.advance();
                    if self.peek() == Some('/') {
                        self.advance();
                    }
                    TokenKind::GraceStart
                }
                '}' => {
                    self.advance();
                    TokenKind::GraceEnd
                }
                '-' => {
                    self.advance();
                    TokenKind::Tie
                }
                '>' | '<' => {
                    self.advance_while(|d| d == c);
                    TokenKind::BrokenRhythm
                }
                '^' | '_' | '=' | 'A'..='G' | 'a'..='g' => self.lex_note(),
                'z' | 'x' => {
                    self.advance();
                    self.advance_length();
                    TokenKind::Rest
                }
                'Z' | 'X' => {
                    self.advance();
                    self.advance_while(|c| c.is_ascii_digit());
                    TokenKind::MultiRest
                }
                c if DECORATION_CHARS.contains(&c) => {
                    self.advance();
                    TokenKind::Decoration
                }
                _ => {
                    self.advance();
                    TokenKind::Unknown
                }
            };

            let text = &self.input[start..self.position];
            let mut token = Token::new(kind, text, self.line, column);
            if let TokenKind::InlineField(_) = kind {
                // Value sits between "[K:" and "]"
                token.text = text[3..text.len() - 1].trim().to_string();
                token.properties = field_properties(&token.text);
            }
            tokens.push(token);
        }
        tokens
    }

    fn lex_extended_decoration(&mut self, delimiter: char) -> TokenKind {
        self.advance();
        let rest = self.remaining();
        match rest.find(delimiter) {
            Some(end) if end > 0 && !rest[..end].contains(char::is_whitespace) => {
                let name_chars = rest[..end].chars().count();
                self.position += end + 1;
                self.column += name_chars + 1;
                TokenKind::ExtendedDecoration
            }
            _ => TokenKind::Unknown,
        }
    }

    fn lex_open_bracket(&mut self) -> TokenKind {
        let next = self.peek_nth(1);
        let after = self.peek_nth(2);
        self.advance();
        match (next, after) {
            (Some('|'), _) => {
                self.advance();
                TokenKind::Bar
            }
            (Some(name), Some(':')) if name.is_ascii_alphabetic() => {
                match self.remaining().find(']') {
                    Some(end) => {
                        let chars = self.remaining()[..=end].chars().count();
                        self.position += end + 1;
                        self.column += chars;
                        TokenKind::InlineField(name)
                    }
                    None => TokenKind::Unknown,
                }
            }
            (Some(d), _) if d.is_ascii_digit() => {
                self.advance();
                TokenKind::Ending
            }
            _ => TokenKind::ChordStart,
        }
    }

    fn lex_note(&mut self) -> TokenKind {
        // Accidental: ^ ^^ _ __ =
        match self.peek() {
            Some('^') | Some('_') => {
                let c = self.peek();
                self.advance();
                if self.peek() == c {
                    self.advance();
                }
            }
            Some('=') => {
                self.advance();
            }
            _ => {}
        }
        match self.peek() {
            Some('A'..='G') | Some('a'..='g') => {
                self.advance();
            }
            _ => return TokenKind::Unknown,
        }
        self.advance_while(|c| c == '\'' || c == ',');
        self.advance_length();
        TokenKind::Note
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(line: &str) -> Vec<TokenKind> {
        tokenize_line(line, 1)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Space)
            .map(|t| t.kind)
            .collect()
    }

    fn texts(line: &str) -> Vec<String> {
        tokenize_line(line, 1)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Space)
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_simple_notes() {
        assert_eq!(
            kinds("C D e'"),
            vec![TokenKind::Note, TokenKind::Note, TokenKind::Note]
        );
        assert_eq!(texts("^c'3/2 _B,, =f//"), vec!["^c'3/2", "_B,,", "=f//"]);
    }

    #[test]
    fn test_bars_longest_match() {
        assert_eq!(
            kinds("|: a :| b :: c [| d |] e || f |"),
            vec![
                TokenKind::RepeatStart,
                TokenKind::Note,
                TokenKind::RepeatEnd,
                TokenKind::Note,
                TokenKind::RepeatBoth,
                TokenKind::Note,
                TokenKind::Bar,
                TokenKind::Note,
                TokenKind::Bar,
                TokenKind::Note,
                TokenKind::Bar,
                TokenKind::Note,
                TokenKind::Bar,
            ]
        );
        assert_eq!(texts("[| a |]"), vec!["[|", "a", "|]"]);
    }

    #[test]
    fn test_tuplet_before_slur() {
        assert_eq!(
            kinds("(3abc (a b) (3:2:3 d e f (5::4"),
            vec![
                TokenKind::Tuplet,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::SlurStart,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::SlurEnd,
                TokenKind::Tuplet,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::Tuplet,
            ]
        );
        assert_eq!(texts("(3:2:3 (5::4")[1], "(5::4");
    }

    #[test]
    fn test_extended_decoration_before_single() {
        let tokens: Vec<_> = tokenize_line("!trill!c .d +fermata+e", 1)
            .into_iter()
            .filter(|t| t.kind != TokenKind::Space)
            .collect();
        assert_eq!(tokens[0].kind, TokenKind::ExtendedDecoration);
        assert_eq!(tokens[0].text, "!trill!");
        assert_eq!(tokens[2].kind, TokenKind::Decoration);
        assert_eq!(tokens[4].kind, TokenKind::ExtendedDecoration);
        assert_eq!(tokens[4].text, "+fermata+");
    }

    #[test]
    fn test_unterminated_decoration_is_unknown() {
        assert_eq!(kinds("!trill c")[0], TokenKind::Unknown);
    }

    #[test]
    fn test_chords_and_grace() {
        assert_eq!(
            kinds("[CEG]2 {ag}f {/g}a"),
            vec![
                TokenKind::ChordStart,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::ChordEnd,
                TokenKind::GraceStart,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::GraceEnd,
                TokenKind::Note,
                TokenKind::GraceStart,
                TokenKind::Note,
                TokenKind::GraceEnd,
                TokenKind::Note,
            ]
        );
        assert_eq!(texts("[CE]2")[3], "]2");
    }

    #[test]
    fn test_inline_field_and_ending() {
        let tokens = tokenize_line("[K:D clef=bass] a [1 b |2 c", 7);
        assert_eq!(tokens[0].kind, TokenKind::InlineField('K'));
        assert_eq!(tokens[0].text, "D clef=bass");
        assert_eq!(tokens[0].property("clef"), Some("bass"));
        assert_eq!(tokens[0].line, 7);
        let endings: Vec<_> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Ending)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(endings, vec!["[1", "|2"]);
    }

    #[test]
    fn test_field_line() {
        let tokens = tokenize_line("V:T1 name=\"Tenor One\" clef=treble % comment", 3);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Field('V'));
        assert_eq!(tokens[0].text, "T1 name=\"Tenor One\" clef=treble");
        assert_eq!(tokens[0].property("name"), Some("Tenor One"));
        assert_eq!(tokens[0].property("clef"), Some("treble"));
    }

    #[test]
    fn test_music_line_starting_like_field() {
        assert_eq!(kinds("a:|")[1], TokenKind::RepeatEnd);
    }

    #[test]
    fn test_rests_broken_rhythm_and_ties() {
        assert_eq!(
            kinds("z2 a>b c<<d e-e Z4"),
            vec![
                TokenKind::Rest,
                TokenKind::Note,
                TokenKind::BrokenRhythm,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::BrokenRhythm,
                TokenKind::Note,
                TokenKind::Note,
                TokenKind::Tie,
                TokenKind::Note,
                TokenKind::MultiRest,
            ]
        );
    }

    #[test]
    fn test_unknown_does_not_abort() {
        let tokens = kinds("a & b");
        assert_eq!(
            tokens,
            vec![TokenKind::Note, TokenKind::Unknown, TokenKind::Note]
        );
    }

    #[test]
    fn test_directive_and_comment() {
        assert_eq!(kinds("%%MIDI program 40"), vec![TokenKind::Directive]);
        assert_eq!(texts("%%MIDI program 40"), vec!["MIDI program 40"]);
        assert_eq!(kinds("% just a comment"), vec![TokenKind::Comment]);
        assert_eq!(kinds("abc % trailing"), vec![
            TokenKind::Note,
            TokenKind::Note,
            TokenKind::Note,
            TokenKind::Comment
        ]);
    }

    #[test]
    fn test_columns() {
        let tokens = tokenize_line("\"Am\"c !p!d", 1);
        let columns: Vec<_> = tokens.iter().map(|t| t.column).collect();
        assert_eq!(columns, vec![1, 5, 6, 7, 10]);
    }
}
