//! Tokenizer for the Sovereign assembly dialect
//!
//! Line-oriented: newlines terminate statements and are emitted as
//! tokens; `;` starts a comment running to end of line. Operand kinds
//! are distinguished by prefix:
//!
//! | Form | Token |
//! |------|-------|
//! | `r7` | register (0..=15) |
//! | `#-42` | immediate (signed decimal i64) |
//! | `@00ff` | address (hex digits, kept verbatim) |
//! | `"hi\n"` | string with `\\ \" \n \t` escapes |
//! | `loop:` | label definition |
//! | `loop` | bare identifier (opcode or label reference) |
//!
//! Positions are tracked 0-indexed and reported 1-based in errors.

use sovereign_core::ParseError;

/// What a token is, with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Bare identifier: an opcode at statement position, a label
    /// reference in operand position
    Ident(String),
    /// `name:` at statement position
    LabelDef(String),
    Register(u8),
    Immediate(i64),
    Address(String),
    Str(String),
    Newline,
}

/// A token with source position information (0-indexed)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, line: usize, column: usize) -> Self {
        Token { kind, line, column }
    }
}

/// Build a `ParseError` from 0-indexed coordinates.
fn err(line: usize, column: usize, message: impl Into<String>) -> ParseError {
    ParseError::new(line + 1, column + 1, message)
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 0,
            col: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    fn scan_string(&mut self, start_line: usize, start_col: usize) -> Result<Token, ParseError> {
        let mut out = String::new();
        loop {
            let (line, col) = (self.line, self.col);
            match self.bump() {
                None => {
                    return Err(err(
                        start_line,
                        start_col,
                        "unclosed string literal - missing closing quote",
                    ));
                }
                Some('"') => {
                    return Ok(Token::new(TokenKind::Str(out), start_line, start_col));
                }
                Some('\\') => match self.bump() {
                    Some('\\') => out.push('\\'),
                    Some('"') => out.push('"'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(other) => {
                        return Err(err(line, col, format!("unknown escape '\\{}'", other)));
                    }
                    None => {
                        return Err(err(
                            start_line,
                            start_col,
                            "unclosed string literal - missing closing quote",
                        ));
                    }
                },
                Some('\n') => {
                    return Err(err(
                        start_line,
                        start_col,
                        "unclosed string literal - missing closing quote",
                    ));
                }
                Some(other) => out.push(other),
            }
        }
    }

    fn scan_immediate(&mut self, start_line: usize, start_col: usize) -> Result<Token, ParseError> {
        let mut text = String::new();
        if let Some(sign @ ('+' | '-')) = self.peek() {
            text.push(sign);
            self.bump();
        }
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_digit() {
                break;
            }
            text.push(ch);
            self.bump();
        }
        if text.is_empty() || text == "+" || text == "-" {
            return Err(err(start_line, start_col, "expected digits after '#'"));
        }
        let value: i64 = text.parse().map_err(|_| {
            err(
                start_line,
                start_col,
                format!("immediate #{} does not fit in i64", text),
            )
        })?;
        Ok(Token::new(
            TokenKind::Immediate(value),
            start_line,
            start_col,
        ))
    }

    fn scan_address(&mut self, start_line: usize, start_col: usize) -> Result<Token, ParseError> {
        let mut digits = String::new();
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_hexdigit() {
                break;
            }
            digits.push(ch);
            self.bump();
        }
        if digits.is_empty() {
            return Err(err(start_line, start_col, "expected hex digits after '@'"));
        }
        if let Some(ch) = self.peek()
            && (ch.is_alphanumeric() || ch == '_')
        {
            return Err(err(
                self.line,
                self.col,
                format!("invalid address digit '{}'", ch),
            ));
        }
        Ok(Token::new(
            TokenKind::Address(digits),
            start_line,
            start_col,
        ))
    }

    fn scan_word(&mut self, start_line: usize, start_col: usize) -> Result<Token, ParseError> {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_alphanumeric() && ch != '_' {
                break;
            }
            word.push(ch);
            self.bump();
        }
        // `name:` defines a label bound to the next instruction
        if self.peek() == Some(':') {
            self.bump();
            if !is_valid_label(&word) {
                return Err(err(
                    start_line,
                    start_col,
                    format!("invalid label name '{}'", word),
                ));
            }
            return Ok(Token::new(TokenKind::LabelDef(word), start_line, start_col));
        }
        // `r<decimal>` is a register operand; anything else is an identifier
        if let Some(rest) = word.strip_prefix('r')
            && !rest.is_empty()
            && rest.chars().all(|c| c.is_ascii_digit())
        {
            let n: u32 = rest.parse().map_err(|_| {
                err(
                    start_line,
                    start_col,
                    format!("register number '{}' out of range (r0..r15)", word),
                )
            })?;
            if n > 15 {
                return Err(err(
                    start_line,
                    start_col,
                    format!("register number '{}' out of range (r0..r15)", word),
                ));
            }
            return Ok(Token::new(
                TokenKind::Register(n as u8),
                start_line,
                start_col,
            ));
        }
        Ok(Token::new(TokenKind::Ident(word), start_line, start_col))
    }
}

/// Labels are `[a-z_][a-z0-9_]*`.
fn is_valid_label(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Tokenize a full source string.
pub fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();

    while let Some(ch) = lexer.peek() {
        let (line, col) = (lexer.line, lexer.col);
        match ch {
            ';' => {
                // Comment to end of line; the newline itself is kept
                while lexer.peek().is_some_and(|c| c != '\n') {
                    lexer.bump();
                }
            }
            '\n' => {
                lexer.bump();
                tokens.push(Token::new(TokenKind::Newline, line, col));
            }
            c if c.is_whitespace() => {
                lexer.bump();
            }
            '"' => {
                lexer.bump();
                tokens.push(lexer.scan_string(line, col)?);
            }
            '#' => {
                lexer.bump();
                tokens.push(lexer.scan_immediate(line, col)?);
            }
            '@' => {
                lexer.bump();
                tokens.push(lexer.scan_address(line, col)?);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                tokens.push(lexer.scan_word(line, col)?);
            }
            other => {
                return Err(err(line, col, format!("unexpected character '{}'", other)));
            }
        }
    }
    Ok(tokens)
}
