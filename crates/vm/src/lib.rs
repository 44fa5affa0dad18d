//! Sovereign virtual machine
//!
//! A dual-stack, assembly-flavored interpreter with hard resource
//! bounds and two LLM-oriented instructions (`LLMGEN`, `EVOLVE`) that
//! reach an external model through the [`LlmAdapter`] seam.
//!
//! ```
//! use sovereign_vm::{Vm, VmConfig};
//!
//! let mut vm = Vm::new(VmConfig::default()).unwrap();
//! vm.load(sovereign_asm::parse("PUSH #10\nPUSH #32\nADD\nHALT").unwrap()).unwrap();
//! vm.run().unwrap();
//! assert_eq!(vm.dump_state().data_stack, vec![sovereign_core::Value::Int(42)]);
//! ```
//!
//! Execution is single-threaded; the only suspension point is the LLM
//! adapter, and every wait carries a deadline. All caps in
//! [`VmConfig`] are hard: the instruction that would exceed one fails
//! with a typed error instead of truncating.

pub mod adapter;
pub mod config;
pub mod machine;
pub mod registry;
pub mod state;
pub mod trace;

pub use adapter::{AdapterError, AdapterErrorKind, LlmAdapter};
pub use config::VmConfig;
pub use machine::{CancelToken, StepOutcome, Vm};
pub use registry::{Category, ExecOutcome, Executor, OpCode, OpDescriptor, OperandSlot, Registry};
pub use state::{Frame, StateSnapshot, VmState};
pub use trace::init_tracing;
