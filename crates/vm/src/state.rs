//! Mutable VM state: the two stacks, memory, and registers
//!
//! Bounds checks live next to the mutations they guard; every helper
//! verifies its cap or its operand type *before* touching anything, so
//! a failing instruction leaves the state exactly as it found it.

use crate::config::VmConfig;
use serde::Serialize;
use sovereign_core::{Value, VmError, VmErrorKind};
use std::collections::{BTreeMap, HashMap};

pub const REGISTER_COUNT: usize = 16;

/// A control-stack frame. Carries the return program counter only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub return_pc: usize,
}

/// The complete mutable state of one VM instance.
#[derive(Debug)]
pub struct VmState {
    pub(crate) config: VmConfig,
    data: Vec<Value>,
    control: Vec<Frame>,
    memory: HashMap<String, Value>,
    registers: Vec<Value>,
    pub(crate) pc: usize,
    pub(crate) running: bool,
    pub(crate) error_state: Option<VmError>,
    pub(crate) steps: u64,
    memory_bytes: usize,
}

impl VmState {
    pub fn new(config: VmConfig) -> Self {
        VmState {
            config,
            data: Vec::new(),
            control: Vec::new(),
            memory: HashMap::new(),
            registers: vec![Value::Int(0); REGISTER_COUNT],
            pc: 0,
            running: true,
            error_state: None,
            steps: 0,
            memory_bytes: 0,
        }
    }

    /// Return to an equivalent-to-new state, keeping the configuration.
    pub fn reset(&mut self) {
        self.data.clear();
        self.control.clear();
        self.memory.clear();
        self.registers = vec![Value::Int(0); REGISTER_COUNT];
        self.pc = 0;
        self.running = true;
        self.error_state = None;
        self.steps = 0;
        self.memory_bytes = 0;
    }

    // ---- data stack ----

    pub fn push(&mut self, value: Value) -> Result<(), VmError> {
        if self.data.len() >= self.config.max_stack_size {
            return Err(VmError::new(
                VmErrorKind::StackOverflow,
                format!(
                    "stack overflow: data stack at capacity {}",
                    self.config.max_stack_size
                ),
            ));
        }
        self.data.push(value);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<Value, VmError> {
        self.data.pop().ok_or_else(|| {
            VmError::new(
                VmErrorKind::StackUnderflow,
                "stack underflow: pop from empty data stack",
            )
        })
    }

    /// Value `depth` positions below the top (0 = top) without popping.
    pub fn peek(&self, depth: usize) -> Result<&Value, VmError> {
        let len = self.data.len();
        if depth >= len {
            return Err(VmError::new(
                VmErrorKind::StackUnderflow,
                format!(
                    "stack underflow: need {} values, data stack holds {}",
                    depth + 1,
                    len
                ),
            ));
        }
        Ok(&self.data[len - 1 - depth])
    }

    /// Peek and require an integer; the typed failure for arithmetic.
    pub fn peek_int(&self, depth: usize, op: &str) -> Result<i64, VmError> {
        let value = self.peek(depth)?;
        value.as_int().ok_or_else(|| {
            VmError::new(
                VmErrorKind::OperandMismatch,
                format!(
                    "operand mismatch: {} requires Int, found {} on stack",
                    op,
                    value.type_name()
                ),
            )
        })
    }

    /// Peek and require a string.
    pub fn peek_str(&self, depth: usize, op: &str) -> Result<&str, VmError> {
        let value = self.peek(depth)?;
        value.as_str().ok_or_else(|| {
            VmError::new(
                VmErrorKind::OperandMismatch,
                format!(
                    "operand mismatch: {} requires Str, found {} on stack",
                    op,
                    value.type_name()
                ),
            )
        })
    }

    pub fn stack_len(&self) -> usize {
        self.data.len()
    }

    pub fn clear_stack(&mut self) {
        self.data.clear();
    }

    /// In-place swap of the top two values. Depth is pre-checked by the
    /// caller via `peek`.
    pub fn swap_top(&mut self) {
        let len = self.data.len();
        self.data.swap(len - 1, len - 2);
    }

    /// Rotate the third value to the top: `a b c` becomes `b c a`.
    pub fn rotate_top3(&mut self) {
        let len = self.data.len();
        let third = self.data.remove(len - 3);
        self.data.push(third);
    }

    // ---- control stack ----

    pub fn push_frame(&mut self, frame: Frame) -> Result<(), VmError> {
        let depth_cap = self.config.max_control_depth.min(self.config.max_call_depth);
        if self.control.len() >= depth_cap {
            return Err(VmError::new(
                VmErrorKind::CallDepthExceeded,
                format!("call depth exceeded: limit {}", depth_cap),
            ));
        }
        self.control.push(frame);
        Ok(())
    }

    pub fn pop_frame(&mut self) -> Result<Frame, VmError> {
        self.control.pop().ok_or_else(|| {
            VmError::new(
                VmErrorKind::StackUnderflow,
                "stack underflow: RET with empty control stack",
            )
        })
    }

    pub fn control_len(&self) -> usize {
        self.control.len()
    }

    // ---- memory ----

    /// Fail if storing `key` would exceed the memory cap. Overwrites of
    /// existing keys never count against the cap.
    pub fn ensure_store_allowed(&self, key: &str) -> Result<(), VmError> {
        if !self.memory.contains_key(key) && self.memory.len() >= self.config.max_memory_entries {
            return Err(VmError::new(
                VmErrorKind::MemoryLimitExceeded,
                format!(
                    "memory limit exceeded: {} entries at capacity",
                    self.config.max_memory_entries
                ),
            ));
        }
        Ok(())
    }

    pub fn store(&mut self, key: String, value: Value) -> Result<(), VmError> {
        self.ensure_store_allowed(&key)?;
        self.memory_bytes += value.approx_size();
        if let Some(old) = self.memory.insert(key, value) {
            self.memory_bytes = self.memory_bytes.saturating_sub(old.approx_size());
        }
        Ok(())
    }

    pub fn load(&self, key: &str) -> Result<Value, VmError> {
        self.memory.get(key).cloned().ok_or_else(|| {
            VmError::new(
                VmErrorKind::InvalidAddress,
                format!("invalid address: no value at @{}", key),
            )
        })
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    // ---- registers ----

    pub fn register(&self, index: u8) -> &Value {
        &self.registers[index as usize]
    }

    pub fn set_register(&mut self, index: u8, value: Value) {
        self.registers[index as usize] = value;
    }

    // ---- introspection ----

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            data_stack: self.data.clone(),
            control_stack: self.control.clone(),
            memory: self
                .memory
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            registers: self.registers.clone(),
            pc: self.pc,
            running: self.running,
            error: self.error_state.clone(),
            steps: self.steps,
            memory_bytes: self.memory_bytes,
        }
    }
}

/// Deep copy of the VM state for debugging and test assertions.
///
/// Memory is a `BTreeMap` so two snapshots of the same logical state
/// compare and serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub data_stack: Vec<Value>,
    pub control_stack: Vec<Frame>,
    pub memory: BTreeMap<String, Value>,
    pub registers: Vec<Value>,
    pub pc: usize,
    pub running: bool,
    pub error: Option<VmError>,
    pub steps: u64,
    pub memory_bytes: usize,
}

impl StateSnapshot {
    /// The snapshot with error/running/step bookkeeping blanked out,
    /// for before/after comparisons around a failing instruction.
    pub fn observable(&self) -> StateSnapshot {
        StateSnapshot {
            error: None,
            running: true,
            steps: 0,
            ..self.clone()
        }
    }
}
