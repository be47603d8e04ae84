use super::helpers::*;

#[test]
fn test_index_then_field_update() {
    let (_, val) = run("let t = {}; t[\"k\"] = 10; t.k = t.k + 5; return t.k;");
    assert_num(val, 15.0);
}

#[test]
fn test_field_and_index_agree() {
    let (_, val) = run("let t = {}; t.a = 1; return t[\"a\"];");
    assert_num(val, 1.0);
}

#[test]
fn test_table_literal_fields() {
    let (_, val) = run("let t = { a: 1, b: 2, [3]: 30 }; return t.a + t.b + t[3];");
    assert_num(val, 33.0);
}

#[test]
fn test_absent_key_reads_nil() {
    let (_, val) = run("let t = {}; return t.missing;");
    assert_nil(val);
}

#[test]
fn test_nil_assignment_deletes() {
    let (_, val) = run("let t = { k: 1 }; t.k = nil; return t.k;");
    assert_nil(val);
}

#[test]
fn test_number_keys() {
    let (_, val) = run("let t = {}; t[1] = 10; t[2.5] = 20; return t[1] + t[2.5];");
    assert_num(val, 30.0);
}

#[test]
fn test_bool_keys() {
    let (_, val) = run("let t = {}; t[true] = 1; t[false] = 2; return t[true] + t[false];");
    assert_num(val, 3.0);
}

#[test]
fn test_tables_as_keys_by_identity() {
    let (_, val) = run(
        "let k1 = {}; let k2 = {};\n\
         let t = {};\n\
         t[k1] = 1; t[k2] = 2;\n\
         return t[k1] + t[k2];",
    );
    assert_num(val, 3.0);
}

#[test]
fn test_nested_tables() {
    let (_, val) = run("let t = { inner: { x: 7 } }; return t.inner.x;");
    assert_num(val, 7.0);
}

#[test]
fn test_compound_assignment_on_fields_and_indexes() {
    let (_, val) = run(
        "let t = { n: 1 };\n\
         t.n += 10;\n\
         t[\"n\"] *= 2;\n\
         return t.n;",
    );
    assert_num(val, 22.0);
}

#[test]
fn test_table_values_can_be_functions() {
    let (_, val) = run(
        "let t = { double: fn(x) { return x * 2; } };\n\
         return t.double(21);",
    );
    assert_num(val, 42.0);
}

#[test]
fn test_string_values() {
    let (vm, val) = run("let t = { greeting: \"hi\" }; return t.greeting .. \"!\";");
    assert_str(&vm, val, "hi!");
}
