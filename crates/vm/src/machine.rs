//! The fetch-decode-execute loop
//!
//! Strictly single-threaded and synchronous. Each dispatched step:
//! check the cancel flag, check natural termination, charge the step
//! budget, fetch, look the mnemonic up in the registry, validate
//! operands, execute. The only suspension point is the LLM adapter,
//! reached from the `LLMGEN` and `EVOLVE` executors with a hard
//! deadline.
//!
//! Executors validate before they mutate: a failing instruction leaves
//! the observable state (stacks, memory, registers, PC) exactly as it
//! was, with only `error_state`, `running`, and the step counter
//! changed.

use crate::adapter::LlmAdapter;
use crate::config::VmConfig;
use crate::registry::{ExecOutcome, Executor, OpCode, Registry};
use crate::state::{Frame, StateSnapshot, VmState};
use sovereign_core::{ConfigError, Instruction, Operand, Program, Value, VmError, VmErrorKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

/// Cooperative cancellation flag for a `run` in progress.
///
/// Cloned tokens share the flag; any of them can cancel. The loop
/// checks it at each dispatch boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

/// What one `step` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// An instruction executed; the machine can keep going
    Continue,
    /// `HALT` executed (or the machine was already stopped)
    Halted,
    /// The PC ran off the end of the program (natural termination)
    Finished,
}

/// A Sovereign virtual machine.
pub struct Vm {
    state: VmState,
    program: Program,
    registry: Registry,
    adapter: Option<Arc<dyn LlmAdapter>>,
    cancel: CancelToken,
}

impl Vm {
    /// Build a machine with the built-in instruction set.
    ///
    /// Rejects configurations with zero limits.
    pub fn new(config: VmConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Vm {
            state: VmState::new(config),
            program: Program::empty(),
            registry: Registry::with_builtins(),
            adapter: None,
            cancel: CancelToken::new(),
        })
    }

    /// Load a program and reset the state for a fresh run.
    ///
    /// Label operands of built-in control-flow instructions are
    /// resolved here; parser output is always resolvable, so
    /// `UndefinedLabel` at load is only reachable for hand-built
    /// programs.
    pub fn load(&mut self, program: Program) -> Result<(), VmError> {
        for (index, instruction) in program.instructions().iter().enumerate() {
            let Some(descriptor) = self.registry.get(&instruction.mnemonic) else {
                continue; // surfaces as UnknownOpcode if ever reached
            };
            if let Executor::Builtin(
                OpCode::Jmp | OpCode::Jz | OpCode::Jnz | OpCode::Call | OpCode::Fork,
            ) = descriptor.executor
            {
                for operand in &instruction.operands {
                    if let Operand::Label(name) = operand
                        && program.label_index(name).is_none()
                    {
                        return Err(VmError::new(
                            VmErrorKind::UndefinedLabel,
                            format!("undefined label: '{}' at instruction {}", name, index),
                        ));
                    }
                }
            }
        }
        self.program = program;
        self.state.reset();
        self.cancel.reset();
        Ok(())
    }

    /// Install the LLM adapter used by `LLMGEN` and `EVOLVE`.
    pub fn set_adapter(&mut self, adapter: Arc<dyn LlmAdapter>) {
        self.adapter = Some(adapter);
    }

    /// Registry handle for registering extension opcodes.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Token for cancelling a run from another thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &VmConfig {
        &self.state.config
    }

    /// Run until halt, natural termination, or a typed failure.
    pub fn run(&mut self) -> Result<(), VmError> {
        debug!(program_len = self.program.len(), "run start");
        loop {
            match self.step()? {
                StepOutcome::Continue => {}
                outcome => {
                    debug!(steps = self.state.steps, ?outcome, "run complete");
                    return Ok(());
                }
            }
        }
    }

    /// Dispatch a single instruction.
    pub fn step(&mut self) -> Result<StepOutcome, VmError> {
        if !self.state.running {
            return Ok(StepOutcome::Halted);
        }
        if self.cancel.is_cancelled() {
            return Err(self.fail(VmError::new(
                VmErrorKind::Cancelled,
                "cancelled: external cancel flag set",
            )));
        }
        if self.state.pc >= self.program.len() {
            self.state.running = false;
            return Ok(StepOutcome::Finished);
        }

        // The step budget is charged before execution: the instruction
        // that would be dispatched at the limit is never run.
        self.state.steps += 1;
        if self.state.steps >= self.state.config.max_execution_steps {
            return Err(self.fail(VmError::new(
                VmErrorKind::StepLimitExceeded,
                format!(
                    "step limit exceeded: {} steps",
                    self.state.config.max_execution_steps
                ),
            )));
        }

        let instruction = self.program.get(self.state.pc).cloned().expect("pc bounds checked");
        trace!(pc = self.state.pc, op = %instruction.mnemonic, "dispatch");

        let Some(descriptor) = self.registry.get(&instruction.mnemonic) else {
            let err = VmError::new(
                VmErrorKind::UnknownOpcode,
                format!("unknown opcode: {}", instruction.mnemonic),
            );
            return Err(self.fail(err));
        };
        if let Err(err) = descriptor.check_operands(&instruction.operands) {
            return Err(self.fail(err));
        }
        let executor = descriptor.executor.clone();

        let result = match executor {
            Executor::Builtin(op) => self.exec_builtin(op, &instruction),
            Executor::External(f) => f(&mut self.state, &instruction.operands),
        };

        match result {
            Ok(ExecOutcome::Advance) => {
                self.state.pc += 1;
                Ok(StepOutcome::Continue)
            }
            Ok(ExecOutcome::Jump(target)) => {
                self.state.pc = target;
                Ok(StepOutcome::Continue)
            }
            Ok(ExecOutcome::Halt) => {
                self.state.running = false;
                Ok(StepOutcome::Halted)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Reset the state for a fresh run of the loaded program.
    pub fn reset(&mut self) {
        self.state.reset();
        self.cancel.reset();
    }

    /// Deep snapshot of the current state.
    pub fn dump_state(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Record the failure, stop the machine, and tag the error with the
    /// failing PC.
    fn fail(&mut self, err: VmError) -> VmError {
        let err = err.at(self.state.pc);
        self.state.error_state = Some(err.clone());
        self.state.running = false;
        err
    }

    fn target(&self, operand: &Operand) -> Result<usize, VmError> {
        match operand {
            Operand::Label(name) => self.program.label_index(name).ok_or_else(|| {
                VmError::new(
                    VmErrorKind::UndefinedLabel,
                    format!("undefined label: '{}'", name),
                )
            }),
            other => Err(VmError::new(
                VmErrorKind::OperandMismatch,
                format!("operand mismatch: expected label, found {}", other.kind()),
            )),
        }
    }

    fn exec_builtin(
        &mut self,
        op: OpCode,
        instruction: &Instruction,
    ) -> Result<ExecOutcome, VmError> {
        let operands = &instruction.operands;
        let state = &mut self.state;
        match op {
            // ---- stack ----
            OpCode::Push => {
                let value = match &operands[0] {
                    Operand::Immediate(n) => Value::Int(*n),
                    Operand::Str(s) => Value::Str(s.clone()),
                    Operand::Address(a) => Value::Address(a.clone()),
                    Operand::Label(l) => Value::Label(l.clone()),
                    Operand::Register(r) => state.register(*r).clone(),
                };
                state.push(value)?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Pop => {
                match operands.first() {
                    Some(Operand::Register(r)) => {
                        let value = state.pop()?;
                        state.set_register(*r, value);
                    }
                    _ => {
                        state.pop()?;
                    }
                }
                Ok(ExecOutcome::Advance)
            }
            OpCode::Dup => {
                let top = state.peek(0)?.clone();
                state.push(top)?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Swap => {
                state.peek(1)?;
                state.swap_top();
                Ok(ExecOutcome::Advance)
            }
            OpCode::Rot => {
                state.peek(2)?;
                state.rotate_top3();
                Ok(ExecOutcome::Advance)
            }
            OpCode::Over => {
                let second = state.peek(1)?.clone();
                state.push(second)?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Drop => {
                state.pop()?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Clear => {
                state.clear_stack();
                Ok(ExecOutcome::Advance)
            }

            // ---- arithmetic / logic ----
            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div
            | OpCode::And | OpCode::Or | OpCode::Xor => {
                let name = instruction.mnemonic.as_str();
                // left is deeper in the stack, right is the top
                let right = state.peek_int(0, name)?;
                let left = state.peek_int(1, name)?;
                let result = match op {
                    OpCode::Add => left.checked_add(right),
                    OpCode::Sub => left.checked_sub(right),
                    OpCode::Mul => left.checked_mul(right),
                    OpCode::Div => {
                        if right == 0 {
                            return Err(VmError::new(
                                VmErrorKind::DivisionByZero,
                                format!("division by zero: {} / 0", left),
                            ));
                        }
                        left.checked_div(right)
                    }
                    OpCode::And => Some(left & right),
                    OpCode::Or => Some(left | right),
                    OpCode::Xor => Some(left ^ right),
                    _ => unreachable!(),
                };
                let result = result.ok_or_else(|| {
                    VmError::new(
                        VmErrorKind::ArithmeticOverflow,
                        format!("arithmetic overflow: {} {} {}", left, name, right),
                    )
                })?;
                state.pop()?;
                state.pop()?;
                state.push(Value::Int(result))?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Not => {
                let value = state.peek_int(0, "NOT")?;
                state.pop()?;
                state.push(Value::Int(!value))?;
                Ok(ExecOutcome::Advance)
            }

            // ---- control ----
            OpCode::Jmp => {
                let target = self.target(&operands[0])?;
                Ok(ExecOutcome::Jump(target))
            }
            OpCode::Jz | OpCode::Jnz => {
                let target = self.target(&operands[0])?;
                let name = if op == OpCode::Jz { "JZ" } else { "JNZ" };
                let test = self.state.peek_int(0, name)?;
                // The test value is consumed whether or not we branch
                self.state.pop()?;
                let taken = (test == 0) == (op == OpCode::Jz);
                if taken {
                    Ok(ExecOutcome::Jump(target))
                } else {
                    Ok(ExecOutcome::Advance)
                }
            }
            OpCode::Call => {
                let target = self.target(&operands[0])?;
                let return_pc = self.state.pc + 1;
                self.state.push_frame(Frame { return_pc })?;
                Ok(ExecOutcome::Jump(target))
            }
            OpCode::Ret => {
                let frame = state.pop_frame()?;
                Ok(ExecOutcome::Jump(frame.return_pc))
            }
            OpCode::Halt => Ok(ExecOutcome::Halt),
            OpCode::Fork | OpCode::Join => Err(VmError::new(
                VmErrorKind::Unimplemented,
                format!(
                    "unimplemented opcode: {} is reserved",
                    instruction.mnemonic
                ),
            )),

            // ---- memory / IO ----
            OpCode::Load => {
                let Operand::Address(key) = &operands[0] else {
                    unreachable!("operand kinds validated before execution");
                };
                let value = state.load(key)?;
                state.push(value)?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Store => {
                let Operand::Address(key) = &operands[0] else {
                    unreachable!("operand kinds validated before execution");
                };
                state.peek(0)?;
                state.ensure_store_allowed(key)?;
                let value = state.pop()?;
                state.store(key.clone(), value)?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Fopen | OpCode::Fread | OpCode::Fwrite | OpCode::Fclose => {
                Err(VmError::new(
                    VmErrorKind::Unimplemented,
                    format!(
                        "unimplemented opcode: {} is reserved",
                        instruction.mnemonic
                    ),
                ))
            }
            OpCode::LlmGen => {
                let adapter = self.require_adapter()?;
                let Operand::Str(prompt) = &operands[0] else {
                    unreachable!("operand kinds validated before execution");
                };
                let deadline = self.state.config.llm_request_timeout;
                debug!(pc = self.state.pc, "LLMGEN dispatching to adapter");
                let generated = adapter
                    .generate(prompt, deadline)
                    .map_err(|e| e.into_vm_error())?;
                self.state.push(Value::Str(generated))?;
                Ok(ExecOutcome::Advance)
            }
            OpCode::Evolve => {
                let adapter = self.require_adapter()?;
                // Operands are only read before the suspension; pops
                // happen after a successful return so a timeout leaves
                // the stack untouched.
                let (code, error_text, pops) = match operands.first() {
                    Some(Operand::Str(context)) => {
                        let code = self.state.peek_str(0, "EVOLVE")?.to_string();
                        (code, context.clone(), 1)
                    }
                    _ => {
                        let error_text = self.state.peek_str(0, "EVOLVE")?.to_string();
                        let code = self.state.peek_str(1, "EVOLVE")?.to_string();
                        (code, error_text, 2)
                    }
                };
                let deadline = self.state.config.llm_request_timeout;
                debug!(pc = self.state.pc, "EVOLVE dispatching to adapter");
                let candidate = adapter
                    .evolve(&code, &error_text, deadline)
                    .map_err(|e| e.into_vm_error())?;
                for _ in 0..pops {
                    self.state.pop()?;
                }
                self.state.push(Value::Str(candidate))?;
                Ok(ExecOutcome::Advance)
            }
        }
    }

    fn require_adapter(&self) -> Result<Arc<dyn LlmAdapter>, VmError> {
        self.adapter.clone().ok_or_else(|| {
            VmError::new(
                VmErrorKind::LlmUnavailable,
                "llm unavailable: no adapter installed",
            )
        })
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("pc", &self.state.pc)
            .field("running", &self.state.running)
            .field("steps", &self.state.steps)
            .field("program_len", &self.program.len())
            .field("has_adapter", &self.adapter.is_some())
            .finish()
    }
}
