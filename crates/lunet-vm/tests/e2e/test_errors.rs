use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::ast::{BinOp, SourceSpan, TableField};
use lunet_core::value::Value;
use lunet_vm::error::ErrorKind;

#[test]
fn e2e_call_nil() {
    let (err, _) = run_err(vec![call_stat(call(name("missing"), vec![]).at(3, 1))]);
    assert!(matches!(&err.kind, ErrorKind::Runtime(m) if m == "attempt to call a nil value"));
    assert_eq!(err.span, SourceSpan::new(3, 1));
    assert_eq!(err.to_string(), "3:1: attempt to call a nil value");
}

#[test]
fn e2e_call_number() {
    assert_eq!(
        run_err_message(vec![local(&["f"], vec![int(1)]), call_stat(call(name("f"), vec![]))]),
        "attempt to call a number value"
    );
}

#[test]
fn e2e_index_nil() {
    assert_eq!(
        run_err_message(vec![local(&["t"], vec![]), ret(vec![index(name("t"), int(1))])]),
        "attempt to index a nil value"
    );
    assert_eq!(
        run_err_message(vec![local(&["t"], vec![]), assign(vec![member(name("t"), "x")], vec![int(1)])]),
        "attempt to index a nil value"
    );
}

#[test]
fn e2e_nil_table_key() {
    assert_eq!(
        run_err_message(vec![
            local(&["t"], vec![table(vec![])]),
            assign(vec![index(name("t"), nil())], vec![int(1)]),
        ]),
        "table index is nil"
    );
    assert_eq!(
        run_err_message(vec![ret(vec![table(vec![TableField::Keyed(
            binary(BinOp::Div, num("0.0"), num("0.0")),
            int(1)
        )])])]),
        "table index is NaN"
    );
}

#[test]
fn e2e_arithmetic_on_nil_has_span() {
    let (err, _) = run_err(vec![
        local(&["x"], vec![]),
        ret(vec![binary(BinOp::Add, name("x"), int(1)).at(2, 10)]),
    ]);
    assert!(matches!(&err.kind, ErrorKind::Runtime(m) if m == "attempt to perform arithmetic on a nil value"));
    assert_eq!(err.span, SourceSpan::new(2, 10));
}

#[test]
fn e2e_division_by_zero() {
    assert_eq!(
        run_err_message(vec![ret(vec![binary(BinOp::IDiv, int(1), int(0))])]),
        "attempt to perform 'n//0'"
    );
    assert_eq!(
        run_err_message(vec![ret(vec![binary(BinOp::Mod, int(1), int(0))])]),
        "attempt to perform 'n%0'"
    );
}

#[test]
fn e2e_compare_errors() {
    assert_eq!(
        run_err_message(vec![ret(vec![binary(BinOp::Lt, table(vec![]), table(vec![]))])]),
        "attempt to compare two table values"
    );
    assert_eq!(
        run_err_message(vec![ret(vec![binary(BinOp::Le, int(1), string("2"))])]),
        "attempt to compare number with string"
    );
}

#[test]
fn e2e_error_with_string_payload() {
    let (err, vm) = run_err(vec![call_stat(call(name("error"), vec![string("boom")]).at(4, 5))]);
    assert_eq!(err.message(&vm.strings), "boom");
    // The native has no position of its own, so the call site supplies one.
    assert_eq!(err.span, SourceSpan::new(4, 5));
}

#[test]
fn e2e_error_with_table_payload() {
    let (err, mut vm) = run_err(vec![
        local(&["e"], vec![table(vec![TableField::Named("code".into(), int(7))])]),
        call_stat(call(name("error"), vec![name("e")])),
    ]);
    assert_eq!(err.message(&vm.strings), "(error object is a table value)");
    let Value::Table(t) = err.to_value(&mut vm.strings) else {
        panic!("payload is not a table");
    };
    let code = vm.strings.intern(b"code");
    assert_eq!(t.borrow().get_str(code), Value::Integer(7));
}

#[test]
fn e2e_error_inside_callee_keeps_inner_span() {
    let (err, _) = run_err(vec![
        local_function(
            "f",
            func_body(&[], false, vec![ret(vec![binary(BinOp::Add, nil(), int(1)).at(2, 12)])]),
        ),
        ret(vec![binary(BinOp::Add, call(name("f"), vec![]).at(5, 8), int(1))]),
    ]);
    assert_eq!(err.span, SourceSpan::new(2, 12));
}

#[test]
fn e2e_assert_failure() {
    assert_eq!(
        run_err_message(vec![call_stat(call(name("assert"), vec![boolean(false)]))]),
        "assertion failed!"
    );
    assert_eq!(
        run_err_message(vec![call_stat(call(name("assert"), vec![nil(), string("custom")]))]),
        "custom"
    );
}

#[test]
fn e2e_for_errors() {
    assert_eq!(
        run_err_message(vec![numeric_for("i", int(1), int(10), Some(int(0)), vec![])]),
        "'for' step is zero"
    );
    assert_eq!(
        run_err_message(vec![numeric_for("i", string("a"), int(10), None, vec![])]),
        "'for' initial value must be a number"
    );
    assert_eq!(
        run_err_message(vec![numeric_for("i", int(1), table(vec![]), None, vec![])]),
        "'for' limit must be a number"
    );
    assert_eq!(
        run_err_message(vec![numeric_for("i", int(1), int(2), Some(boolean(true)), vec![])]),
        "'for' step must be a number"
    );
}

#[test]
fn e2e_compile_error_is_reported() {
    let (err, _) = run_err(vec![brk().at(1, 1)]);
    assert!(matches!(&err.kind, ErrorKind::Runtime(m) if m == "compile error: break outside a loop"));
    assert_eq!(err.span, SourceSpan::new(1, 1));
}

#[test]
fn e2e_bad_argument_to_native() {
    assert_eq!(
        run_err_message(vec![generic_for(
            &["k"],
            vec![call(name("pairs"), vec![nil()])],
            vec![],
        )]),
        "bad argument #1 to 'pairs' (table expected, got nil)"
    );
}
