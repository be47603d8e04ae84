use super::helpers::*;

#[test]
fn test_let_and_add() {
    let (_, val) = run("let a = 4; let b = 2; return a + b;");
    assert_num(val, 6.0);
}

#[test]
fn test_arithmetic() {
    let (_, val) = run("return 2 + 3 * 4;");
    assert_num(val, 14.0);
    let (_, val) = run("return (2 + 3) * 4;");
    assert_num(val, 20.0);
    let (_, val) = run("return 9 / 2;");
    assert_num(val, 4.5);
    let (_, val) = run("return 9 % 4;");
    assert_num(val, 1.0);
    let (_, val) = run("return 10 - 3 - 2;");
    assert_num(val, 5.0);
}

#[test]
fn test_unary() {
    let (_, val) = run("return -3;");
    assert_num(val, -3.0);
    let (_, val) = run("return --3;");
    assert_num(val, 3.0);
    let (_, val) = run("return !nil;");
    assert_bool(val, true);
    let (_, val) = run("return !0;");
    assert_bool(val, false);
}

#[test]
fn test_bitwise() {
    let (_, val) = run("return 1 << 4;");
    assert_num(val, 16.0);
    let (_, val) = run("return 16 >> 2;");
    assert_num(val, 4.0);
    let (_, val) = run("return 6 & 3;");
    assert_num(val, 2.0);
    let (_, val) = run("return 6 | 3;");
    assert_num(val, 7.0);
}

#[test]
fn test_comparisons() {
    let (_, val) = run("return 1 < 2;");
    assert_bool(val, true);
    let (_, val) = run("return 2 <= 2;");
    assert_bool(val, true);
    let (_, val) = run("return 1 > 2;");
    assert_bool(val, false);
    let (_, val) = run("return 3 >= 4;");
    assert_bool(val, false);
}

#[test]
fn test_equality() {
    let (_, val) = run("return 1 == 1;");
    assert_bool(val, true);
    let (_, val) = run("return 1 != 2;");
    assert_bool(val, true);
    let (_, val) = run("return nil == nil;");
    assert_bool(val, true);
    let (_, val) = run("return true == false;");
    assert_bool(val, false);
    let (_, val) = run("return 1 == \"1\";");
    assert_bool(val, false);
}

#[test]
fn test_string_equality_is_identity() {
    let (_, val) = run("return \"abc\" == \"abc\";");
    assert_bool(val, true);
    let (_, val) = run("return (\"ab\" .. \"c\") == \"abc\";");
    assert_bool(val, true);
}

#[test]
fn test_concat() {
    let (vm, val) = run("return \"foo\" .. \"bar\";");
    assert_str(&vm, val, "foobar");
}

#[test]
fn test_concat_result_is_interned() {
    let (mut vm, val) = run("return \"foo\" .. \"bar\";");
    let canonical = vm.intern(b"foobar");
    assert_eq!(val.raw_bits(), canonical.raw_bits());
}

#[test]
fn test_logical_values() {
    let (_, val) = run("return 1 and 2;");
    assert_num(val, 2.0);
    let (_, val) = run("return nil and 2;");
    assert_nil(val);
    let (_, val) = run("return nil or 3;");
    assert_num(val, 3.0);
    let (_, val) = run("return 1 or 2;");
    assert_num(val, 1.0);
    let (_, val) = run("return false or nil;");
    assert_nil(val);
}

#[test]
fn test_compound_assignment_on_locals() {
    let (_, val) = run("let a = 10; a += 5; a -= 3; a *= 2; a /= 4; a %= 4; return a;");
    assert_num(val, 2.0);
}

#[test]
fn test_assignment_yields_rhs() {
    let (_, val) = run("let a = 0; let b = 0; a = b = 7; return a + b;");
    assert_num(val, 14.0);
}

#[test]
fn test_return_literal_values() {
    let (_, val) = run("return true;");
    assert_bool(val, true);
    let (_, val) = run("return nil;");
    assert_nil(val);
    let (_, val) = run("return 0.5;");
    assert_num(val, 0.5);
}

#[test]
fn test_empty_script_returns_nil() {
    let (_, val) = run("");
    assert_nil(val);
}
