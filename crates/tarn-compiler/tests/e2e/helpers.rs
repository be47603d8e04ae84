use tarn_core::value::Value;
use tarn_core::vm::error::VmError;
use tarn_core::vm::Vm;

/// Compile and run source, returning the VM and the top-level return
/// value. Panics on any compile or runtime error.
pub fn run(source: &str) -> (Vm, Value) {
    let mut vm = Vm::new();
    let cb = tarn_compiler::compile(&mut vm, source, "=test")
        .unwrap_or_else(|e| panic!("compile error: {e}"));
    let val = vm
        .run_block(cb)
        .unwrap_or_else(|e| panic!("runtime error: {e}"));
    (vm, val)
}

/// Compile and run source, expecting a runtime error.
pub fn run_err(source: &str) -> VmError {
    let mut vm = Vm::new();
    let cb = tarn_compiler::compile(&mut vm, source, "=test")
        .unwrap_or_else(|e| panic!("compile error: {e}"));
    match vm.run_block(cb) {
        Err(e) => e,
        Ok(val) => panic!("expected a runtime error, got {val:?}"),
    }
}

pub fn assert_num(val: Value, expected: f64) {
    let got = val
        .as_num()
        .unwrap_or_else(|| panic!("expected number {expected}, got {val:?}"));
    assert!(
        (got - expected).abs() < 1e-9,
        "expected {expected}, got {got}"
    );
}

pub fn assert_bool(val: Value, expected: bool) {
    assert_eq!(val.as_bool(), Some(expected), "value was {val:?}");
}

pub fn assert_nil(val: Value) {
    assert!(val.is_nil(), "expected nil, got {val:?}");
}

pub fn assert_str(vm: &Vm, val: Value, expected: &str) {
    let id = val
        .as_string()
        .unwrap_or_else(|| panic!("expected string \"{expected}\", got {val:?}"));
    let got = std::str::from_utf8(vm.strings.get_bytes(id)).unwrap();
    assert_eq!(got, expected);
}
