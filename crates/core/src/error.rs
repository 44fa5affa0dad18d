//! Error taxonomy shared across the workspace
//!
//! Every failure carries a machine-readable kind plus a human message.
//! The three top-level families map to the exit codes an embedding
//! driver is expected to use: runtime errors exit 1, parse errors exit
//! 2, configuration errors exit 64 (0 is normal termination).

use serde::{Deserialize, Serialize};

/// Machine-readable classification of a VM failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmErrorKind {
    // Dispatch
    UnknownOpcode,
    OperandMismatch,
    Unimplemented,
    // Stack / memory
    StackUnderflow,
    StackOverflow,
    CallDepthExceeded,
    MemoryLimitExceeded,
    InvalidAddress,
    // Arithmetic
    DivisionByZero,
    ArithmeticOverflow,
    // Control
    UndefinedLabel,
    // Budget
    StepLimitExceeded,
    Cancelled,
    // LLM
    LlmUnavailable,
    LlmTimeout,
    LlmMalformed,
    BridgeInitializationFailed,
    EvolutionFailed,
}

impl VmErrorKind {
    /// Canonical phrase for this kind. Error messages start with this
    /// phrase; the evolution subsystem's categorizer keys off it.
    pub fn label(&self) -> &'static str {
        match self {
            VmErrorKind::UnknownOpcode => "unknown opcode",
            VmErrorKind::OperandMismatch => "operand mismatch",
            VmErrorKind::Unimplemented => "unimplemented opcode",
            VmErrorKind::StackUnderflow => "stack underflow",
            VmErrorKind::StackOverflow => "stack overflow",
            VmErrorKind::CallDepthExceeded => "call depth exceeded",
            VmErrorKind::MemoryLimitExceeded => "memory limit exceeded",
            VmErrorKind::InvalidAddress => "invalid address",
            VmErrorKind::DivisionByZero => "division by zero",
            VmErrorKind::ArithmeticOverflow => "arithmetic overflow",
            VmErrorKind::UndefinedLabel => "undefined label",
            VmErrorKind::StepLimitExceeded => "step limit exceeded",
            VmErrorKind::Cancelled => "cancelled",
            VmErrorKind::LlmUnavailable => "llm unavailable",
            VmErrorKind::LlmTimeout => "llm timeout",
            VmErrorKind::LlmMalformed => "llm response malformed",
            VmErrorKind::BridgeInitializationFailed => "bridge initialization failed",
            VmErrorKind::EvolutionFailed => "evolution failed",
        }
    }

    /// True for kinds raised by exhausting a configured resource cap.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            VmErrorKind::StackOverflow
                | VmErrorKind::CallDepthExceeded
                | VmErrorKind::MemoryLimitExceeded
                | VmErrorKind::StepLimitExceeded
        )
    }
}

impl std::fmt::Display for VmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A runtime failure surfaced by `run` or `step`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmError {
    kind: VmErrorKind,
    message: String,
    /// Program counter of the failing instruction, when known
    pc: Option<usize>,
}

impl VmError {
    pub fn new(kind: VmErrorKind, message: impl Into<String>) -> Self {
        VmError {
            kind,
            message: message.into(),
            pc: None,
        }
    }

    /// Shorthand for a message that is just the kind's label.
    pub fn bare(kind: VmErrorKind) -> Self {
        VmError::new(kind, kind.label())
    }

    /// Attach the program counter of the failing instruction.
    pub fn at(mut self, pc: usize) -> Self {
        self.pc = Some(pc);
        self
    }

    pub fn kind(&self) -> VmErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn pc(&self) -> Option<usize> {
        self.pc
    }

    /// Exit code for an embedding driver.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl std::fmt::Display for VmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pc {
            Some(pc) => write!(f, "{} (pc {})", self.message, pc),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for VmError {}

/// A front-end failure with source position (1-based line and column).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        2
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "parse error at {}:{}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Rejected configuration (a zero limit, an unparsable endpoint).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub message: String,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        ConfigError {
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        64
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "configuration error: {}", self.message)
    }
}

impl std::error::Error for ConfigError {}
