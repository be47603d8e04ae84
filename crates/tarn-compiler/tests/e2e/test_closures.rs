use super::helpers::*;

#[test]
fn test_counter_closure() {
    let (_, val) = run(
        "let mk = fn() { let x = 0; return fn() { x = x + 1; return x; }; };\n\
         let c = mk();\n\
         c(); c();\n\
         return c();",
    );
    assert_num(val, 3.0);
}

#[test]
fn test_two_closures_share_one_upvalue() {
    // Both closures capture the same local in the same frame, so each
    // sees the other's writes.
    let (_, val) = run(
        "let mk = fn() {\n\
           let n = 0;\n\
           let inc = fn() { n = n + 1; return n; };\n\
           let get = fn() { return n; };\n\
           inc(); inc();\n\
           return get();\n\
         };\n\
         return mk();",
    );
    assert_num(val, 2.0);
}

#[test]
fn test_separate_frames_get_separate_upvalues() {
    let (_, val) = run(
        "let mk = fn() { let x = 0; return fn() { x = x + 1; return x; }; };\n\
         let a = mk();\n\
         let b = mk();\n\
         a(); a();\n\
         return b();",
    );
    assert_num(val, 1.0);
}

#[test]
fn test_closure_outlives_defining_frame() {
    // Property 4: after the defining frame returns, the upvalue holds
    // the value at the moment of closure.
    let (_, val) = run(
        "let mk = fn() { let v = 41; return fn() { return v + 1; }; };\n\
         let f = mk();\n\
         return f();",
    );
    assert_num(val, 42.0);
}

#[test]
fn test_block_scoped_capture_closes_on_scope_exit() {
    let (_, val) = run(
        "let f = nil;\n\
         {\n\
           let captured = 10;\n\
           f = fn() { return captured; };\n\
         }\n\
         return f();",
    );
    assert_num(val, 10.0);
}

#[test]
fn test_capture_chain_through_nesting() {
    // The middle function never uses `x`, so the innermost closure
    // reaches it through the enclosing function's upvalue table.
    let (_, val) = run(
        "let outer = fn() {\n\
           let x = 5;\n\
           let middle = fn() {\n\
             let inner = fn() { return x * 2; };\n\
             return inner;\n\
           };\n\
           return middle();\n\
         };\n\
         return outer()();",
    );
    assert_num(val, 10.0);
}

#[test]
fn test_capture_of_parameter() {
    let (_, val) = run(
        "let adder = fn(n) { return fn(m) { return n + m; }; };\n\
         let add3 = adder(3);\n\
         return add3(4);",
    );
    assert_num(val, 7.0);
}

#[test]
fn test_writes_through_closed_upvalue_persist() {
    let (_, val) = run(
        "let mk = fn() {\n\
           let total = 0;\n\
           return fn(n) { total = total + n; return total; };\n\
         };\n\
         let acc = mk();\n\
         acc(1); acc(10);\n\
         return acc(100);",
    );
    assert_num(val, 111.0);
}
