use super::helpers::*;

#[test]
fn test_if_taken() {
    let (_, val) = run("if (1 < 2) { return 1; } return 2;");
    assert_num(val, 1.0);
}

#[test]
fn test_if_not_taken() {
    let (_, val) = run("if (1 > 2) { return 1; } return 2;");
    assert_num(val, 2.0);
}

#[test]
fn test_if_else() {
    let (_, val) = run("if (false) { return 1; } else { return 2; }");
    assert_num(val, 2.0);
}

#[test]
fn test_else_if_chain() {
    let (_, val) = run(
        "let n = 5;\n\
         if (n < 3) { return 1; }\n\
         else if (n < 10) { return 2; }\n\
         else { return 3; }",
    );
    assert_num(val, 2.0);
}

#[test]
fn test_truthiness_in_conditions() {
    // 0 and "" are truthy; only nil and false are falsy.
    let (_, val) = run("if (0) { return 1; } return 2;");
    assert_num(val, 1.0);
    let (_, val) = run("if (\"\") { return 1; } return 2;");
    assert_num(val, 1.0);
    let (_, val) = run("if (nil) { return 1; } return 2;");
    assert_num(val, 2.0);
}

#[test]
fn test_while_loop() {
    let (_, val) = run(
        "let sum = 0;\n\
         let i = 1;\n\
         while (i <= 10) {\n\
           sum += i;\n\
           i += 1;\n\
         }\n\
         return sum;",
    );
    assert_num(val, 55.0);
}

#[test]
fn test_while_never_entered() {
    let (_, val) = run("while (false) { return 1; } return 2;");
    assert_num(val, 2.0);
}

#[test]
fn test_nested_while() {
    let (_, val) = run(
        "let total = 0;\n\
         let i = 0;\n\
         while (i < 3) {\n\
           let j = 0;\n\
           while (j < 4) {\n\
             total += 1;\n\
             j += 1;\n\
           }\n\
           i += 1;\n\
         }\n\
         return total;",
    );
    assert_num(val, 12.0);
}

#[test]
fn test_short_circuit_skips_side_effects() {
    let (_, val) = run(
        "let called = false;\n\
         let touch = fn() { called = true; return true; };\n\
         false and touch();\n\
         return called;",
    );
    assert_bool(val, false);

    let (_, val) = run(
        "let called = false;\n\
         let touch = fn() { called = true; return true; };\n\
         true or touch();\n\
         return called;",
    );
    assert_bool(val, false);
}

#[test]
fn test_block_scoping() {
    let (_, val) = run(
        "let a = 1;\n\
         {\n\
           let a = 2;\n\
           { let a = 3; }\n\
         }\n\
         return a;",
    );
    assert_num(val, 1.0);
}
