//! Opcode registry: mnemonic to operation descriptor
//!
//! The 32 built-in operations are a fixed, field-less [`OpCode`] enum
//! dispatched by a single `match` in the interpreter. Extensions
//! registered at runtime carry a boxed executor closure over the VM
//! state instead; both forms share the same descriptor and the same
//! operand validation.

use crate::state::VmState;
use sovereign_core::{Operand, OperandKind, VmError, VmErrorKind};
use std::collections::HashMap;
use std::sync::Arc;

/// Operation category, one per instruction-set quadrant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Stack,
    Arithmetic,
    Control,
    Memory,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Stack => "Stack",
            Category::Arithmetic => "Arithmetic",
            Category::Control => "Control",
            Category::Memory => "Memory",
        };
        write!(f, "{}", name)
    }
}

/// The built-in instruction set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // Stack
    Push,
    Pop,
    Dup,
    Swap,
    Rot,
    Over,
    Drop,
    Clear,
    // Arithmetic / logic
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Not,
    // Control
    Jmp,
    Jz,
    Jnz,
    Call,
    Ret,
    Fork,
    Join,
    Halt,
    // Memory / IO
    Load,
    Store,
    Fopen,
    Fread,
    Fwrite,
    Fclose,
    LlmGen,
    Evolve,
}

/// What an executor asks the dispatch loop to do with the PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Advance past the current instruction
    Advance,
    /// Jump to an absolute instruction index
    Jump(usize),
    /// Stop the machine (`running = false`)
    Halt,
}

/// Executor closure type for runtime-registered extensions.
pub type ExternFn =
    Arc<dyn Fn(&mut VmState, &[Operand]) -> Result<ExecOutcome, VmError> + Send + Sync>;

/// How an operation executes.
#[derive(Clone)]
pub enum Executor {
    Builtin(OpCode),
    External(ExternFn),
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Executor::Builtin(op) => write!(f, "Builtin({:?})", op),
            Executor::External(_) => write!(f, "External(..)"),
        }
    }
}

/// One operand position: the kinds accepted there, and whether the
/// position may be omitted. Optional positions are always trailing.
#[derive(Debug, Clone)]
pub struct OperandSlot {
    pub kinds: Vec<OperandKind>,
    pub required: bool,
}

impl OperandSlot {
    pub fn required(kinds: &[OperandKind]) -> Self {
        OperandSlot {
            kinds: kinds.to_vec(),
            required: true,
        }
    }

    pub fn optional(kinds: &[OperandKind]) -> Self {
        OperandSlot {
            kinds: kinds.to_vec(),
            required: false,
        }
    }
}

/// A registered operation.
#[derive(Debug, Clone)]
pub struct OpDescriptor {
    pub name: String,
    pub category: Category,
    pub operands: Vec<OperandSlot>,
    pub executor: Executor,
}

impl OpDescriptor {
    fn builtin(name: &str, category: Category, operands: Vec<OperandSlot>, op: OpCode) -> Self {
        OpDescriptor {
            name: name.to_string(),
            category,
            operands,
            executor: Executor::Builtin(op),
        }
    }

    /// Validate operand arity and kinds against this descriptor.
    pub fn check_operands(&self, operands: &[Operand]) -> Result<(), VmError> {
        let min = self.operands.iter().filter(|s| s.required).count();
        let max = self.operands.len();
        if operands.len() < min || operands.len() > max {
            let arity = if min == max {
                format!("{}", min)
            } else {
                format!("{}..{}", min, max)
            };
            return Err(VmError::new(
                VmErrorKind::OperandMismatch,
                format!(
                    "operand mismatch: {} takes {} operand(s), found {}",
                    self.name,
                    arity,
                    operands.len()
                ),
            ));
        }
        for (slot, operand) in self.operands.iter().zip(operands) {
            if !slot.kinds.contains(&operand.kind()) {
                let accepted: Vec<String> =
                    slot.kinds.iter().map(|k| k.to_string()).collect();
                return Err(VmError::new(
                    VmErrorKind::OperandMismatch,
                    format!(
                        "operand mismatch: {} expects {} here, found {}",
                        self.name,
                        accepted.join(" or "),
                        operand.kind()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Mnemonic-keyed operation table.
#[derive(Debug, Clone)]
pub struct Registry {
    ops: HashMap<String, OpDescriptor>,
}

impl Registry {
    /// Empty registry. Most callers want [`Registry::with_builtins`].
    pub fn new() -> Self {
        Registry {
            ops: HashMap::new(),
        }
    }

    /// Registry holding the 32 built-in operations.
    pub fn with_builtins() -> Self {
        use Category::*;
        use OperandKind::*;

        let pushable = [Immediate, Str, Address, Register, Label];
        let mut registry = Registry::new();
        let table = vec![
            // Stack (8)
            OpDescriptor::builtin(
                "PUSH",
                Stack,
                vec![OperandSlot::required(&pushable)],
                OpCode::Push,
            ),
            OpDescriptor::builtin(
                "POP",
                Stack,
                vec![OperandSlot::optional(&[Register])],
                OpCode::Pop,
            ),
            OpDescriptor::builtin("DUP", Stack, vec![], OpCode::Dup),
            OpDescriptor::builtin("SWAP", Stack, vec![], OpCode::Swap),
            OpDescriptor::builtin("ROT", Stack, vec![], OpCode::Rot),
            OpDescriptor::builtin("OVER", Stack, vec![], OpCode::Over),
            OpDescriptor::builtin("DROP", Stack, vec![], OpCode::Drop),
            OpDescriptor::builtin("CLEAR", Stack, vec![], OpCode::Clear),
            // Arithmetic / logic (8)
            OpDescriptor::builtin("ADD", Arithmetic, vec![], OpCode::Add),
            OpDescriptor::builtin("SUB", Arithmetic, vec![], OpCode::Sub),
            OpDescriptor::builtin("MUL", Arithmetic, vec![], OpCode::Mul),
            OpDescriptor::builtin("DIV", Arithmetic, vec![], OpCode::Div),
            OpDescriptor::builtin("AND", Arithmetic, vec![], OpCode::And),
            OpDescriptor::builtin("OR", Arithmetic, vec![], OpCode::Or),
            OpDescriptor::builtin("XOR", Arithmetic, vec![], OpCode::Xor),
            OpDescriptor::builtin("NOT", Arithmetic, vec![], OpCode::Not),
            // Control (8)
            OpDescriptor::builtin(
                "JMP",
                Control,
                vec![OperandSlot::required(&[Label])],
                OpCode::Jmp,
            ),
            OpDescriptor::builtin(
                "JZ",
                Control,
                vec![OperandSlot::required(&[Label])],
                OpCode::Jz,
            ),
            OpDescriptor::builtin(
                "JNZ",
                Control,
                vec![OperandSlot::required(&[Label])],
                OpCode::Jnz,
            ),
            OpDescriptor::builtin(
                "CALL",
                Control,
                vec![OperandSlot::required(&[Label])],
                OpCode::Call,
            ),
            OpDescriptor::builtin("RET", Control, vec![], OpCode::Ret),
            OpDescriptor::builtin(
                "FORK",
                Control,
                vec![OperandSlot::required(&[Label])],
                OpCode::Fork,
            ),
            OpDescriptor::builtin("JOIN", Control, vec![], OpCode::Join),
            OpDescriptor::builtin("HALT", Control, vec![], OpCode::Halt),
            // Memory / IO (8)
            OpDescriptor::builtin(
                "LOAD",
                Memory,
                vec![OperandSlot::required(&[Address])],
                OpCode::Load,
            ),
            OpDescriptor::builtin(
                "STORE",
                Memory,
                vec![OperandSlot::required(&[Address])],
                OpCode::Store,
            ),
            OpDescriptor::builtin("FOPEN", Memory, vec![], OpCode::Fopen),
            OpDescriptor::builtin("FREAD", Memory, vec![], OpCode::Fread),
            OpDescriptor::builtin("FWRITE", Memory, vec![], OpCode::Fwrite),
            OpDescriptor::builtin("FCLOSE", Memory, vec![], OpCode::Fclose),
            OpDescriptor::builtin(
                "LLMGEN",
                Memory,
                vec![OperandSlot::required(&[Str])],
                OpCode::LlmGen,
            ),
            OpDescriptor::builtin(
                "EVOLVE",
                Memory,
                vec![OperandSlot::optional(&[Str])],
                OpCode::Evolve,
            ),
        ];
        for descriptor in table {
            registry.register(descriptor);
        }
        registry
    }

    /// Look up a descriptor. Mnemonics are stored uppercased; lookup
    /// canonicalizes, so `get("push")` finds `PUSH`.
    pub fn get(&self, mnemonic: &str) -> Option<&OpDescriptor> {
        self.ops.get(&mnemonic.to_ascii_uppercase())
    }

    /// Register (or replace) an operation.
    pub fn register(&mut self, descriptor: OpDescriptor) {
        self.ops
            .insert(descriptor.name.to_ascii_uppercase(), descriptor);
    }

    /// Descriptors, optionally filtered by category, sorted by name.
    pub fn list(&self, category: Option<Category>) -> Vec<&OpDescriptor> {
        let mut out: Vec<&OpDescriptor> = self
            .ops
            .values()
            .filter(|d| category.is_none_or(|c| d.category == c))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}
