#![allow(dead_code)]

use lunet_compiler::ast::{Block, Chunk};
use lunet_core::value::Value;
use lunet_vm::error::RuntimeError;
use lunet_vm::execute_chunk;
use lunet_vm::vm::{Vm, VmConfig};

/// Run a chunk body on a fresh VM, returning its results and the VM.
pub fn run_with(config: VmConfig, body: Block) -> (Vec<Value>, Vm) {
    let mut vm = Vm::with_config(config);
    let results = execute_chunk(&mut vm, &Chunk { body }, "test")
        .unwrap_or_else(|e| panic!("runtime error: {e}"));
    (results, vm)
}

pub fn run(body: Block) -> (Vec<Value>, Vm) {
    run_with(VmConfig::default(), body)
}

/// Run a chunk body, expecting a runtime error.
pub fn run_err_with(config: VmConfig, body: Block) -> (RuntimeError, Vm) {
    let mut vm = Vm::with_config(config);
    match execute_chunk(&mut vm, &Chunk { body }, "test") {
        Err(e) => (e, vm),
        Ok(vals) => panic!("expected error, got {} results: {:?}", vals.len(), vals),
    }
}

pub fn run_err(body: Block) -> (RuntimeError, Vm) {
    run_err_with(VmConfig::default(), body)
}

/// Error message with string payloads resolved.
pub fn run_err_message(body: Block) -> String {
    let (e, vm) = run_err(body);
    e.message(&vm.strings)
}

/// Config that transfers every loop to its replacement on the first back edge.
pub fn eager_osr() -> VmConfig {
    VmConfig {
        osr_threshold: Some(1),
        ..VmConfig::default()
    }
}

/// Run `f` on a thread with a large stack, for tests that nest many calls.
pub fn on_big_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(256 << 20)
        .spawn(f)
        .unwrap()
        .join()
        .unwrap()
}

/// Check that results[idx] is an integer with the expected value.
pub fn assert_int(results: &[Value], idx: usize, expected: i64) {
    let val = &results[idx];
    let got = val
        .as_integer()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected integer {expected}"));
    assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}");
}

/// Check that results[idx] is a float with the expected value.
pub fn assert_float(results: &[Value], idx: usize, expected: f64) {
    let val = &results[idx];
    let got = val
        .as_float()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected float {expected}"));
    assert!(
        (got - expected).abs() < 1e-10,
        "result[{idx}] = {got}, expected {expected}"
    );
}

pub fn assert_bool(results: &[Value], idx: usize, expected: bool) {
    match &results[idx] {
        Value::Boolean(b) => assert_eq!(*b, expected, "result[{idx}]"),
        other => panic!("result[{idx}] = {other:?}, expected bool {expected}"),
    }
}

pub fn assert_nil(results: &[Value], idx: usize) {
    assert!(results[idx].is_nil(), "result[{idx}] = {:?}, expected nil", results[idx]);
}

/// Check that results[idx] is a string with the expected value.
pub fn assert_str(results: &[Value], idx: usize, expected: &str, vm: &Vm) {
    let val = &results[idx];
    let sid = val
        .as_string_id()
        .unwrap_or_else(|| panic!("result[{idx}] = {val:?}, expected string \"{expected}\""));
    let got = std::str::from_utf8(vm.strings.get_bytes(sid)).unwrap();
    assert_eq!(got, expected, "result[{idx}] = \"{got}\", expected \"{expected}\"");
}

/// Run a chunk body and check its results against expected integers.
pub fn run_check_ints(body: Block, expected: &[i64]) {
    let (results, _) = run(body);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}: {results:?}",
        expected.len(),
        results.len()
    );
    for (i, &e) in expected.iter().enumerate() {
        assert_int(&results, i, e);
    }
}
