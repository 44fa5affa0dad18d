//! LLM adapter seam
//!
//! The interpreter never talks to a network. The `LLMGEN` and `EVOLVE`
//! executors go through this trait; the concrete implementation lives in
//! `sovereign-evolve`, which also owns sandbox VM construction. Both
//! calls are synchronous with an explicit deadline - the adapter is the
//! single suspension point of an otherwise synchronous machine.

use sovereign_core::{VmError, VmErrorKind};
use std::time::Duration;

/// Why an adapter call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    /// No backend reachable (or none installed)
    Unavailable,
    /// Deadline exceeded
    Timeout,
    /// Backend answered with something unusable
    Malformed,
    /// No generated candidate survived validation
    EvolutionFailed,
}

/// Failure reported by an [`LlmAdapter`] implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn new(kind: AdapterErrorKind, message: impl Into<String>) -> Self {
        AdapterError {
            kind,
            message: message.into(),
        }
    }

    /// The VM-level error this failure surfaces as.
    pub fn into_vm_error(self) -> VmError {
        let kind = match self.kind {
            AdapterErrorKind::Unavailable => VmErrorKind::LlmUnavailable,
            AdapterErrorKind::Timeout => VmErrorKind::LlmTimeout,
            AdapterErrorKind::Malformed => VmErrorKind::LlmMalformed,
            AdapterErrorKind::EvolutionFailed => VmErrorKind::EvolutionFailed,
        };
        VmError::new(kind, format!("{}: {}", kind.label(), self.message))
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AdapterError {}

/// Code generation and repair, as seen from inside the machine.
pub trait LlmAdapter: Send + Sync {
    /// Generate assembly for a natural-language prompt.
    fn generate(&self, prompt: &str, deadline: Duration) -> Result<String, AdapterError>;

    /// Produce a validated replacement for `code` that failed with
    /// `error_text`.
    fn evolve(
        &self,
        code: &str,
        error_text: &str,
        deadline: Duration,
    ) -> Result<String, AdapterError>;
}
