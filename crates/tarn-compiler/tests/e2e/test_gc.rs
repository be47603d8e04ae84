use super::helpers::*;

#[test]
fn test_collection_triggered_by_allocation_pressure() {
    let mut vm = tarn_core::vm::Vm::new();
    let cb = tarn_compiler::compile(
        &mut vm,
        "let i = 0;\n\
         while (i < 5000) {\n\
           let t = { n: i };\n\
           i = i + 1;\n\
         }\n\
         return i;",
        "=test",
    )
    .unwrap();
    // Lower the threshold so the loop crosses it many times over.
    vm.heap.gc.next_gc = 16 * 1024;
    let val = vm.run_block(cb).unwrap();
    assert_num(val, 5000.0);
    assert!(vm.heap.gc.collections > 0, "collector never ran");
    // Every per-iteration table was garbage; a final cycle reclaims all
    // of them (GC soundness: nothing reachable points at freed slots).
    vm.collect_garbage();
    assert_eq!(vm.heap.count_tables(), 0);
}

#[test]
fn test_reachable_data_survives_collection_pressure() {
    let mut vm = tarn_core::vm::Vm::new();
    let cb = tarn_compiler::compile(
        &mut vm,
        "let keep = {};\n\
         let i = 0;\n\
         while (i < 2000) {\n\
           keep[i] = { n: i };\n\
           let garbage = { g: i };\n\
           i = i + 1;\n\
         }\n\
         return keep[1999].n;",
        "=test",
    )
    .unwrap();
    vm.heap.gc.next_gc = 16 * 1024;
    let val = vm.run_block(cb).unwrap();
    assert_num(val, 1999.0);
    assert!(vm.heap.count_tables() >= 2000);
}

#[test]
fn test_closures_survive_collection() {
    let mut vm = tarn_core::vm::Vm::new();
    let cb = tarn_compiler::compile(
        &mut vm,
        "let mk = fn() { let x = 0; return fn() { x = x + 1; return x; }; };\n\
         let c = mk();\n\
         let i = 0;\n\
         while (i < 3000) {\n\
           let garbage = { g: i };\n\
           i = i + 1;\n\
         }\n\
         c(); c();\n\
         return c();",
        "=test",
    )
    .unwrap();
    vm.heap.gc.next_gc = 16 * 1024;
    let val = vm.run_block(cb).unwrap();
    assert_num(val, 3.0);
    assert!(vm.heap.gc.collections > 0);
}

#[test]
fn test_interned_garbage_strings_are_released() {
    let mut vm = tarn_core::vm::Vm::new();
    let cb = tarn_compiler::compile(
        &mut vm,
        "let i = 0;\n\
         let s = \"\";\n\
         while (i < 200) {\n\
           s = \"prefix\" .. s;\n\
           i = i + 1;\n\
         }\n\
         return i;",
        "=test",
    )
    .unwrap();
    let val = vm.run_block(cb).unwrap();
    assert_num(val, 200.0);
    let before = vm.strings.len();
    // Drop the stack reference to the final string and collect.
    vm.collect_garbage();
    let after = vm.strings.len();
    // Most of the 200 intermediate concatenations were unreachable.
    assert!(after < before, "weak interner kept everything alive");
    assert!(after < 50);
}

#[test]
fn test_globals_keep_objects_alive_under_pressure() {
    let mut vm = tarn_core::vm::Vm::new();
    let cb = tarn_compiler::compile(
        &mut vm,
        "stash = { important: \"data\" };\n\
         let i = 0;\n\
         while (i < 3000) {\n\
           let garbage = { g: i };\n\
           i = i + 1;\n\
         }\n\
         return stash.important;",
        "=test",
    )
    .unwrap();
    vm.heap.gc.next_gc = 16 * 1024;
    let val = vm.run_block(cb).unwrap();
    assert_str(&vm, val, "data");
}
