use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::compiler::CompileErrorKind;

#[test]
fn e2e_break_outside_loop_in_function() {
    // A loop in the enclosing function does not make break legal.
    let err = compile_body_err(vec![while_loop(
        name("c"),
        vec![local_function("f", func_body(&[], false, vec![brk().at(3, 9)]))],
    )]);
    assert_eq!(err.kind, CompileErrorKind::BreakOutsideLoop);
    assert_eq!(err.to_string(), "3:9: break outside a loop");
}

#[test]
fn e2e_unresolved_goto_position() {
    let err = compile_body_err(vec![do_block(vec![goto("missing").at(7, 2)])]);
    assert!(matches!(err.kind, CompileErrorKind::UnresolvedGoto(_)));
    assert_eq!(err.span.line, 7);
}

#[test]
fn e2e_malformed_literals() {
    for text in ["1e", "0xg", "1..2"] {
        let err = compile_body_err(vec![ret(vec![num(text).at(1, 8)])]);
        assert!(matches!(err.kind, CompileErrorKind::MalformedLiteral(_)), "{text}");
        assert!(err.to_string().contains(text), "{err}");
    }
    let err = compile_body_err(vec![ret(vec![string("\\q")])]);
    assert!(err.to_string().contains("invalid escape sequence"));
}

#[test]
fn e2e_vararg_in_fixed_function() {
    let err = compile_body_err(vec![ret(vec![function(
        &["a"],
        false,
        vec![local(&["t"], vec![table(vec![lunet_compiler::ast::TableField::Positional(varargs())])])],
    )])]);
    assert_eq!(err.kind, CompileErrorKind::VarargOutsideVararg);
}

#[test]
fn e2e_call_target_not_assignable() {
    let err = compile_body_err(vec![assign(vec![call(name("f"), vec![])], vec![int(1)])]);
    assert_eq!(err.kind, CompileErrorKind::InvalidAssignTarget);
}

#[test]
fn e2e_expression_statement_rejected() {
    let err = compile_body_err(vec![call_stat(name("x"))]);
    assert_eq!(err.kind, CompileErrorKind::NotAStatement);
}
