use super::helpers::*;

#[test]
fn test_call_and_return() {
    let (_, val) = run("let f = fn(a, b) { return a + b; }; return f(3, 4);");
    assert_num(val, 7.0);
}

#[test]
fn test_missing_args_padded_with_nil() {
    let (_, val) = run("let f = fn(a, b, c) { return b; }; return f(1);");
    assert_nil(val);
}

#[test]
fn test_extra_args_dropped() {
    let (_, val) = run("let f = fn(a) { return a; }; return f(1, 2, 3);");
    assert_num(val, 1.0);
}

#[test]
fn test_function_without_return_yields_nil() {
    let (_, val) = run("let f = fn() { let x = 1; }; return f();");
    assert_nil(val);
}

#[test]
fn test_nested_calls() {
    let (_, val) = run(
        "let add = fn(a, b) { return a + b; };\n\
         let twice = fn(x) { return add(x, x); };\n\
         return twice(add(1, 2));",
    );
    assert_num(val, 6.0);
}

#[test]
fn test_functions_are_values() {
    let (_, val) = run(
        "let apply = fn(f, x) { return f(x); };\n\
         return apply(fn(n) { return n * 10; }, 4);",
    );
    assert_num(val, 40.0);
}

#[test]
fn test_recursion() {
    let (_, val) = run(
        "let fac = fn(n) { if (n < 2) { return 1; } return n * fac(n - 1); };\n\
         return fac(6);",
    );
    assert_num(val, 720.0);
}

#[test]
fn test_fibonacci() {
    let (_, val) = run(
        "let fib = fn(n) { if (n < 2) { return n; } return fib(n - 1) + fib(n - 2); };\n\
         return fib(10);",
    );
    assert_num(val, 55.0);
}

#[test]
fn test_arity_normalization_keeps_stack_clean() {
    // Property 8: every call leaves exactly the parameter slots below
    // the first temporary; after the run the stack is empty.
    let (vm, val) = run(
        "let f = fn(a, b) { return a; };\n\
         f(1); f(1, 2, 3, 4); f();\n\
         return f(9, 8, 7);",
    );
    assert_num(val, 9.0);
    assert_eq!(vm.stack_size(), 0);
}

#[test]
fn test_shadowing_param() {
    let (_, val) = run("let f = fn(x) { let y = x * 2; { let x = 100; } return y + x; }; return f(5);");
    assert_num(val, 15.0);
}
