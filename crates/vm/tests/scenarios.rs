//! End-to-end scenarios over parsed source programs

use sovereign_core::{Value, VmErrorKind};
use sovereign_vm::{Vm, VmConfig};

fn vm_with(source: &str, config: VmConfig) -> Vm {
    let mut vm = Vm::new(config).unwrap();
    vm.load(sovereign_asm::parse(source).unwrap()).unwrap();
    vm
}

#[test]
fn arithmetic_sanity() {
    let mut vm = vm_with("PUSH #10\nPUSH #32\nADD\nHALT", VmConfig::default());
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert_eq!(snap.data_stack, vec![Value::Int(42)]);
    assert!(!snap.running);
    assert!(snap.error.is_none());
}

#[test]
fn division_by_zero_leaves_operands() {
    let mut vm = vm_with("PUSH #10\nPUSH #0\nDIV\nHALT", VmConfig::default());
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::DivisionByZero);
    let snap = vm.dump_state();
    assert_eq!(snap.data_stack, vec![Value::Int(10), Value::Int(0)]);
    // PC still points at the DIV instruction
    assert_eq!(snap.pc, 2);
    assert_eq!(snap.error.as_ref().unwrap().kind(), VmErrorKind::DivisionByZero);
    assert!(!snap.running);
}

#[test]
fn call_return_discipline() {
    let mut vm = vm_with("CALL f\nHALT\nf:\nPUSH #7\nRET", VmConfig::default());
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert_eq!(snap.data_stack, vec![Value::Int(7)]);
    assert!(snap.control_stack.is_empty());
    assert!(!snap.running);
}

#[test]
fn step_limit_enforced() {
    let mut config = VmConfig::default();
    config.max_execution_steps = 4;
    let mut vm = vm_with("loop:\nPUSH #1\nPOP\nJMP loop", config);
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::StepLimitExceeded);
    let snap = vm.dump_state();
    assert_eq!(snap.steps, 4);
    assert!(snap.data_stack.is_empty());
}

#[test]
fn memory_round_trip() {
    let mut vm = vm_with("PUSH #99\nSTORE @x\nLOAD @x\nHALT", VmConfig::default());
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert_eq!(snap.data_stack, vec![Value::Int(99)]);
    assert_eq!(snap.memory.get("x"), Some(&Value::Int(99)));
    assert_eq!(snap.memory.len(), 1);
}

#[test]
fn stack_underflow_reports_kind() {
    let mut vm = vm_with("POP", VmConfig::default());
    assert_eq!(vm.run().unwrap_err().kind(), VmErrorKind::StackUnderflow);
}

#[test]
fn stack_overflow_at_configured_cap() {
    let mut config = VmConfig::default();
    config.max_stack_size = 2;
    let mut vm = vm_with("PUSH #1\nPUSH #2\nPUSH #3\nHALT", config);
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::StackOverflow);
    let snap = vm.dump_state();
    assert_eq!(snap.data_stack, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(snap.pc, 2);
}

#[test]
fn call_depth_exceeded_on_unbounded_recursion() {
    let mut config = VmConfig::default();
    config.max_call_depth = 8;
    let mut vm = vm_with("f:\nCALL f", config);
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::CallDepthExceeded);
    assert_eq!(vm.dump_state().control_stack.len(), 8);
}

#[test]
fn memory_limit_exceeded_keeps_stack() {
    let mut config = VmConfig::default();
    config.max_memory_entries = 1;
    let mut vm = vm_with("PUSH #1\nSTORE @a\nPUSH #2\nSTORE @b", config);
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), VmErrorKind::MemoryLimitExceeded);
    let snap = vm.dump_state();
    // The failed STORE did not consume its operand
    assert_eq!(snap.data_stack, vec![Value::Int(2)]);
    assert_eq!(snap.memory.len(), 1);
}

#[test]
fn failing_instruction_changes_nothing_observable() {
    let sources = [
        "PUSH #10\nPUSH #0\nDIV",
        "PUSH #1\nADD",
        "PUSH \"s\"\nNOT",
        "LOAD @ffff",
        "RET",
        "FORK f\nf:",
    ];
    for source in sources {
        let mut vm = vm_with(source, VmConfig::default());
        // Run up to (but not including) the last instruction
        let count = sovereign_asm::parse(source).unwrap().len();
        for _ in 0..count.saturating_sub(1) {
            vm.step().unwrap();
        }
        let before = vm.dump_state();
        let err = vm.step().unwrap_err();
        let after = vm.dump_state();
        assert_eq!(
            before.observable(),
            after.observable(),
            "state changed across failing op in {:?} ({:?})",
            source,
            err.kind()
        );
        assert_eq!(after.steps, before.steps + 1);
        assert!(!after.running);
        assert!(after.error.is_some());
    }
}

#[test]
fn empty_program_finishes_cleanly() {
    let mut vm = vm_with("", VmConfig::default());
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert!(!snap.running);
    assert!(snap.error.is_none());
    assert_eq!(snap.steps, 0);
}

#[test]
fn string_values_flow_through_memory() {
    let mut vm = vm_with(
        "PUSH \"hello\\nworld\"\nSTORE @aa\nLOAD @aa\nHALT",
        VmConfig::default(),
    );
    vm.run().unwrap();
    assert_eq!(
        vm.dump_state().data_stack,
        vec![Value::Str("hello\nworld".to_string())]
    );
}

#[test]
fn address_keys_are_textual() {
    // @00ff and @ff do not collide
    let mut vm = vm_with(
        "PUSH #1\nSTORE @00ff\nPUSH #2\nSTORE @ff\nHALT",
        VmConfig::default(),
    );
    vm.run().unwrap();
    let snap = vm.dump_state();
    assert_eq!(snap.memory.get("00ff"), Some(&Value::Int(1)));
    assert_eq!(snap.memory.get("ff"), Some(&Value::Int(2)));
}
