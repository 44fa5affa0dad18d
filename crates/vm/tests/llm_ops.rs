//! LLMGEN/EVOLVE semantics against a scripted adapter
//!
//! The adapter is the single suspension point; these tests check that
//! whatever it does - answer, time out, or return garbage - the
//! machine state stays consistent.

use sovereign_core::{Value, VmErrorKind};
use sovereign_vm::{AdapterError, AdapterErrorKind, LlmAdapter, Vm, VmConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Adapter that replays a scripted response and records call counts.
struct ScriptedAdapter {
    response: Result<String, AdapterError>,
    generate_calls: AtomicUsize,
    evolve_calls: AtomicUsize,
}

impl ScriptedAdapter {
    fn ok(response: &str) -> Arc<Self> {
        Arc::new(ScriptedAdapter {
            response: Ok(response.to_string()),
            generate_calls: AtomicUsize::new(0),
            evolve_calls: AtomicUsize::new(0),
        })
    }

    fn failing(kind: AdapterErrorKind) -> Arc<Self> {
        Arc::new(ScriptedAdapter {
            response: Err(AdapterError::new(kind, "scripted failure")),
            generate_calls: AtomicUsize::new(0),
            evolve_calls: AtomicUsize::new(0),
        })
    }
}

impl LlmAdapter for ScriptedAdapter {
    fn generate(&self, _prompt: &str, _deadline: Duration) -> Result<String, AdapterError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }

    fn evolve(
        &self,
        _code: &str,
        _error_text: &str,
        _deadline: Duration,
    ) -> Result<String, AdapterError> {
        self.evolve_calls.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

fn vm_with_adapter(source: &str, adapter: Arc<ScriptedAdapter>) -> Vm {
    let mut vm = Vm::new(VmConfig::default()).unwrap();
    vm.set_adapter(adapter);
    vm.load(sovereign_asm::parse(source).unwrap()).unwrap();
    vm
}

#[test]
fn llmgen_pushes_generated_code() {
    let adapter = ScriptedAdapter::ok("PUSH #1\nHALT");
    let mut vm = vm_with_adapter("LLMGEN \"make a one\"\nHALT", adapter.clone());
    vm.run().unwrap();
    assert_eq!(
        vm.dump_state().data_stack,
        vec![Value::Str("PUSH #1\nHALT".to_string())]
    );
    assert_eq!(adapter.generate_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn evolve_with_context_operand_pops_code_only() {
    let adapter = ScriptedAdapter::ok("PUSH #1\nPUSH #1\nADD\nHALT");
    let mut vm = vm_with_adapter(
        "PUSH \"PUSH #10\\nPUSH #0\\nDIV\\nHALT\"\nEVOLVE \"Division by zero\"\nHALT",
        adapter.clone(),
    );
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert_eq!(
        snap.data_stack,
        vec![Value::Str("PUSH #1\nPUSH #1\nADD\nHALT".to_string())]
    );
    assert_eq!(adapter.evolve_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn evolve_without_operand_pops_error_then_code() {
    let adapter = ScriptedAdapter::ok("HALT");
    let mut vm = vm_with_adapter(
        "PUSH \"bad code\"\nPUSH \"stack underflow\"\nEVOLVE\nHALT",
        adapter,
    );
    vm.run().unwrap();
    assert_eq!(
        vm.dump_state().data_stack,
        vec![Value::Str("HALT".to_string())]
    );
}

#[test]
fn evolve_requires_string_operands() {
    let adapter = ScriptedAdapter::ok("HALT");
    let mut vm = vm_with_adapter("PUSH #3\nEVOLVE \"ctx\"\nHALT", adapter.clone());
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::OperandMismatch);
    // The adapter was never reached
    assert_eq!(adapter.evolve_calls.load(Ordering::SeqCst), 0);
    assert_eq!(vm.dump_state().data_stack, vec![Value::Int(3)]);
}

#[test]
fn adapter_timeout_leaves_stack_untouched() {
    let adapter = ScriptedAdapter::failing(AdapterErrorKind::Timeout);
    let mut vm = vm_with_adapter(
        "PUSH \"code\"\nPUSH \"error\"\nEVOLVE\nHALT",
        adapter,
    );
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::LlmTimeout);
    let snap = vm.dump_state();
    assert_eq!(
        snap.data_stack,
        vec![
            Value::Str("code".to_string()),
            Value::Str("error".to_string())
        ]
    );
    assert_eq!(snap.pc, 2);
    assert!(!snap.running);
}

#[test]
fn adapter_fault_kinds_map_to_vm_kinds() {
    let cases = [
        (AdapterErrorKind::Unavailable, VmErrorKind::LlmUnavailable),
        (AdapterErrorKind::Timeout, VmErrorKind::LlmTimeout),
        (AdapterErrorKind::Malformed, VmErrorKind::LlmMalformed),
        (AdapterErrorKind::EvolutionFailed, VmErrorKind::EvolutionFailed),
    ];
    for (fault, expected) in cases {
        let adapter = ScriptedAdapter::failing(fault);
        let mut vm = vm_with_adapter("LLMGEN \"p\"\nHALT", adapter);
        assert_eq!(vm.run().unwrap_err().kind(), expected);
    }
}

#[test]
fn generated_code_can_be_stored_and_reloaded() {
    let adapter = ScriptedAdapter::ok("PUSH #7\nHALT");
    let mut vm = vm_with_adapter(
        "LLMGEN \"seven\"\nSTORE @c0de\nLOAD @c0de\nHALT",
        adapter,
    );
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert_eq!(snap.memory.get("c0de"), Some(&Value::Str("PUSH #7\nHALT".to_string())));
    assert_eq!(snap.data_stack.len(), 1);
}
