//! Parser for the Sovereign assembly dialect
//!
//! Two passes over the token stream: statement splitting binds each
//! label definition to the index of the next instruction (forward
//! references are legal, duplicates are not), then every bare-identifier
//! operand is checked against the collected label set. Unresolved label
//! references are a parse failure here, never a runtime one.

use crate::lexer::{Token, TokenKind, tokenize};
use sovereign_core::{Instruction, Operand, ParseError, Program};

/// Parse source text into an executable [`Program`].
///
/// Empty input (or comments/blank lines only) yields an empty program.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    let tokens = tokenize(source)?;

    let mut instructions: Vec<Instruction> = Vec::new();
    let mut labels: Vec<(String, usize)> = Vec::new();
    // Operand-position label references, resolved after the full pass
    let mut label_refs: Vec<(String, usize, usize)> = Vec::new();

    for statement in tokens.split(|t| t.kind == TokenKind::Newline) {
        let mut rest = statement;

        // Leading label definitions all bind to the next instruction
        while let Some((first, tail)) = rest.split_first() {
            match &first.kind {
                TokenKind::LabelDef(name) => {
                    if labels.iter().any(|(n, _)| n == name) {
                        return Err(ParseError::new(
                            first.line + 1,
                            first.column + 1,
                            format!("duplicate label '{}'", name),
                        ));
                    }
                    labels.push((name.clone(), instructions.len()));
                    rest = tail;
                }
                _ => break,
            }
        }

        let Some((head, operand_tokens)) = rest.split_first() else {
            continue;
        };

        let mnemonic = match &head.kind {
            TokenKind::Ident(word) if word.chars().all(|c| c.is_ascii_alphabetic()) => {
                word.to_ascii_uppercase()
            }
            other => {
                return Err(ParseError::new(
                    head.line + 1,
                    head.column + 1,
                    format!("expected opcode, found {}", describe(other)),
                ));
            }
        };

        let mut operands = Vec::with_capacity(operand_tokens.len());
        for token in operand_tokens {
            operands.push(operand_from(token, &mut label_refs)?);
        }

        instructions.push(Instruction::new(mnemonic, operands));
    }

    for (name, line, column) in label_refs {
        if !labels.iter().any(|(n, _)| *n == name) {
            return Err(ParseError::new(
                line + 1,
                column + 1,
                format!("undefined label '{}'", name),
            ));
        }
    }

    Program::new(instructions, labels)
        .map_err(|e| ParseError::new(1, 1, e.to_string()))
}

/// True iff `source` parses.
pub fn validate(source: &str) -> bool {
    parse(source).is_ok()
}

fn operand_from(
    token: &Token,
    label_refs: &mut Vec<(String, usize, usize)>,
) -> Result<Operand, ParseError> {
    match &token.kind {
        TokenKind::Register(n) => Ok(Operand::Register(*n)),
        TokenKind::Immediate(v) => Ok(Operand::Immediate(*v)),
        TokenKind::Address(a) => Ok(Operand::Address(a.clone())),
        TokenKind::Str(s) => Ok(Operand::Str(s.clone())),
        TokenKind::Ident(name) => {
            label_refs.push((name.clone(), token.line, token.column));
            Ok(Operand::Label(name.clone()))
        }
        TokenKind::LabelDef(name) => Err(ParseError::new(
            token.line + 1,
            token.column + 1,
            format!("label definition '{}:' not allowed in operand position", name),
        )),
        TokenKind::Newline => unreachable!("statements are split on newlines"),
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Ident(w) => format!("'{}'", w),
        TokenKind::LabelDef(w) => format!("label '{}:'", w),
        TokenKind::Register(n) => format!("register r{}", n),
        TokenKind::Immediate(v) => format!("immediate #{}", v),
        TokenKind::Address(a) => format!("address @{}", a),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Newline => "end of line".to_string(),
    }
}
