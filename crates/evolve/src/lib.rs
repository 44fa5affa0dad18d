//! Sovereign evolution subsystem
//!
//! Everything between the VM's two LLM instructions and an Ollama
//! endpoint: the async HTTP client, capability-based model selection,
//! the error-pattern store with repair statistics, the sync/async
//! bridge, and sandboxed candidate validation.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use sovereign_evolve::{Evolution, EvolutionAdapter, SyncBridge};
//! use sovereign_vm::{Vm, VmConfig};
//!
//! let bridge = Arc::new(SyncBridge::new());
//! bridge.initialize().unwrap();
//! let evolution = Arc::new(Evolution::from_env().unwrap());
//!
//! let mut vm = Vm::new(VmConfig::from_env()).unwrap();
//! vm.set_adapter(Arc::new(EvolutionAdapter::new(evolution, bridge)));
//! ```
//!
//! The VM depends only on the `LlmAdapter` trait; this crate owns the
//! concrete implementation and the sandbox VM construction, so the two
//! sides never instantiate each other at build time.

pub mod bridge;
pub mod client;
pub mod evolution;
pub mod models;
pub mod patterns;

pub use bridge::{BridgeError, SyncBridge};
pub use client::{
    ChatRequest, ChatResponse, ClientConfig, ClientError, Message, OllamaClient,
    DEFAULT_TEMPERATURE,
};
pub use evolution::{
    ACCEPT_THRESHOLD, CandidateEvaluation, EvoError, Evolution, EvolutionAdapter,
    scrub_code_fences,
};
pub use models::{Capability, ModelRegistry, ModelSpec, default_registry};
pub use patterns::{
    ErrorCategory, ErrorPattern, ErrorPatternStore, EvolutionAttempt, StoreIoError, categorize,
    similarity,
};
