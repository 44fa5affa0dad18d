//! Program model: instructions, operands, and the label map
//!
//! A `Program` is the immutable output of the assembler front-end and the
//! read-only input of the interpreter. Labels are bound to the index of
//! the instruction that follows them; an index equal to the program
//! length marks a trailing label (jumping there terminates naturally).
//!
//! Programs print back to canonical source form, and parsing that form
//! yields a structurally equal program. Tooling and tests rely on the
//! round trip.

use std::collections::HashMap;

/// The kind of an operand position, used for registry arity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    Register,
    Immediate,
    Address,
    Str,
    Label,
}

impl std::fmt::Display for OperandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperandKind::Register => "register",
            OperandKind::Immediate => "immediate",
            OperandKind::Address => "address",
            OperandKind::Str => "string",
            OperandKind::Label => "label",
        };
        write!(f, "{}", name)
    }
}

/// A decoded instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `rN` with N in 0..=15
    Register(u8),
    /// `#N`, signed decimal
    Immediate(i64),
    /// `@hex`, digits kept verbatim as the memory key
    Address(String),
    /// `"..."` with `\\ \" \n \t` escapes
    Str(String),
    /// Bare identifier referencing a label
    Label(String),
}

impl Operand {
    pub fn kind(&self) -> OperandKind {
        match self {
            Operand::Register(_) => OperandKind::Register,
            Operand::Immediate(_) => OperandKind::Immediate,
            Operand::Address(_) => OperandKind::Address,
            Operand::Str(_) => OperandKind::Str,
            Operand::Label(_) => OperandKind::Label,
        }
    }
}

/// Escape a string literal back into source form.
fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register(n) => write!(f, "r{}", n),
            Operand::Immediate(n) => write!(f, "#{}", n),
            Operand::Address(a) => write!(f, "@{}", a),
            Operand::Str(s) => write!(f, "\"{}\"", escape_str(s)),
            Operand::Label(l) => write!(f, "{}", l),
        }
    }
}

/// One instruction: an uppercased mnemonic plus its operands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub mnemonic: String,
    pub operands: Vec<Operand>,
}

impl Instruction {
    pub fn new(mnemonic: impl Into<String>, operands: Vec<Operand>) -> Self {
        Instruction {
            mnemonic: mnemonic.into().to_ascii_uppercase(),
            operands,
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for op in &self.operands {
            write!(f, " {}", op)?;
        }
        Ok(())
    }
}

/// Error constructing a `Program` by hand.
///
/// The parser reports these conditions itself with source positions; the
/// constructor re-checks them for programs built programmatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    DuplicateLabel(String),
    LabelOutOfRange { name: String, index: usize, len: usize },
}

impl std::fmt::Display for ProgramError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramError::DuplicateLabel(name) => {
                write!(f, "duplicate label '{}'", name)
            }
            ProgramError::LabelOutOfRange { name, index, len } => {
                write!(
                    f,
                    "label '{}' binds index {} outside program of length {}",
                    name, index, len
                )
            }
        }
    }
}

impl std::error::Error for ProgramError {}

/// An immutable, executable program.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
}

impl Program {
    /// Build a program from instructions and `(name, index)` label pairs.
    ///
    /// Label indices may equal the instruction count (trailing label).
    pub fn new(
        instructions: Vec<Instruction>,
        labels: impl IntoIterator<Item = (String, usize)>,
    ) -> Result<Self, ProgramError> {
        let len = instructions.len();
        let mut map = HashMap::new();
        for (name, index) in labels {
            if index > len {
                return Err(ProgramError::LabelOutOfRange { name, index, len });
            }
            if map.insert(name.clone(), index).is_some() {
                return Err(ProgramError::DuplicateLabel(name));
            }
        }
        Ok(Program {
            instructions,
            labels: map,
        })
    }

    /// Empty program (valid; runs to natural termination immediately).
    pub fn empty() -> Self {
        Program::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    /// Resolve a label to its instruction index.
    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Label map entries in unspecified order.
    pub fn labels(&self) -> impl Iterator<Item = (&str, usize)> {
        self.labels.iter().map(|(name, idx)| (name.as_str(), *idx))
    }
}

impl std::fmt::Display for Program {
    /// Canonical source form: labels re-attached before the instruction
    /// they bind to, trailing labels at the end, one statement per line.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut by_index: Vec<(usize, &str)> = self
            .labels
            .iter()
            .map(|(name, idx)| (*idx, name.as_str()))
            .collect();
        // Name as tiebreaker so output is deterministic
        by_index.sort();
        let mut next_label = by_index.iter().peekable();

        for (i, instr) in self.instructions.iter().enumerate() {
            while let Some((idx, name)) = next_label.peek() {
                if *idx != i {
                    break;
                }
                writeln!(f, "{}:", name)?;
                next_label.next();
            }
            writeln!(f, "{}", instr)?;
        }
        for (_, name) in next_label {
            writeln!(f, "{}:", name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(m: &str, ops: Vec<Operand>) -> Instruction {
        Instruction::new(m, ops)
    }

    #[test]
    fn test_mnemonic_is_uppercased() {
        let i = instr("push", vec![Operand::Immediate(1)]);
        assert_eq!(i.mnemonic, "PUSH");
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let err = Program::new(
            vec![instr("HALT", vec![])],
            vec![("a".to_string(), 0), ("a".to_string(), 1)],
        )
        .unwrap_err();
        assert_eq!(err, ProgramError::DuplicateLabel("a".to_string()));
    }

    #[test]
    fn test_label_out_of_range_rejected() {
        let err = Program::new(vec![], vec![("end".to_string(), 1)]).unwrap_err();
        assert!(matches!(err, ProgramError::LabelOutOfRange { .. }));
    }

    #[test]
    fn test_trailing_label_allowed() {
        let p = Program::new(vec![instr("HALT", vec![])], vec![("end".to_string(), 1)]).unwrap();
        assert_eq!(p.label_index("end"), Some(1));
    }

    #[test]
    fn test_canonical_print() {
        let p = Program::new(
            vec![
                instr("PUSH", vec![Operand::Immediate(10)]),
                instr("JMP", vec![Operand::Label("top".to_string())]),
            ],
            vec![("top".to_string(), 0)],
        )
        .unwrap();
        assert_eq!(p.to_string(), "top:\nPUSH #10\nJMP top\n");
    }

    #[test]
    fn test_string_operand_escapes() {
        let op = Operand::Str("a\"b\\c\nd\te".to_string());
        assert_eq!(op.to_string(), "\"a\\\"b\\\\c\\nd\\te\"");
    }

    #[test]
    fn test_address_digits_verbatim() {
        // No normalization: 00ff and ff are different keys
        let a = Operand::Address("00ff".to_string());
        let b = Operand::Address("ff".to_string());
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "@00ff");
    }
}
