use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::ast::{BinOp, Expr, UnOp};

fn bin(op: BinOp, a: Expr, b: Expr) -> Expr {
    binary(op, a, b)
}

#[test]
fn e2e_integer_ops() {
    run_check_ints(
        vec![
            local(&["a", "b"], vec![int(17), int(5)]),
            ret(vec![
                bin(BinOp::Add, name("a"), name("b")),
                bin(BinOp::Sub, name("a"), name("b")),
                bin(BinOp::Mul, name("a"), name("b")),
                bin(BinOp::IDiv, name("a"), name("b")),
                bin(BinOp::Mod, name("a"), name("b")),
                bin(BinOp::IDiv, unary(UnOp::Neg, name("a")), name("b")),
                bin(BinOp::Mod, unary(UnOp::Neg, name("a")), name("b")),
            ]),
        ],
        &[22, 12, 85, 3, 2, -4, 3],
    );
}

#[test]
fn e2e_float_ops() {
    let (r, _) = run(vec![
        local(&["x"], vec![num("7.5")]),
        ret(vec![
            bin(BinOp::Div, int(7), int(2)),
            bin(BinOp::Pow, int(2), int(10)),
            bin(BinOp::Add, name("x"), int(1)),
            bin(BinOp::IDiv, name("x"), int(2)),
            bin(BinOp::Mod, unary(UnOp::Neg, num("5.5")), int(2)),
        ]),
    ]);
    assert_float(&r, 0, 3.5);
    assert_float(&r, 1, 1024.0);
    assert_float(&r, 2, 8.5);
    assert_float(&r, 3, 3.0);
    assert_float(&r, 4, 0.5);
}

#[test]
fn e2e_integer_overflow_wraps() {
    let (r, _) = run(vec![
        local(&["m"], vec![num("9223372036854775807")]),
        ret(vec![bin(BinOp::Add, name("m"), int(1))]),
    ]);
    assert_int(&r, 0, i64::MIN);
}

#[test]
fn e2e_bitwise_ops() {
    run_check_ints(
        vec![
            local(&["a"], vec![num("0xF0")]),
            ret(vec![
                bin(BinOp::BAnd, name("a"), num("0x3C")),
                bin(BinOp::BOr, name("a"), int(1)),
                bin(BinOp::BXor, name("a"), num("0xFF")),
                bin(BinOp::Shl, int(1), int(10)),
                bin(BinOp::Shr, name("a"), int(4)),
                unary(UnOp::BNot, int(0)),
            ]),
        ],
        &[0x30, 0xF1, 0x0F, 1024, 0x0F, -1],
    );
}

#[test]
fn e2e_string_coercion() {
    let (r, _) = run(vec![ret(vec![
        bin(BinOp::Add, string("10"), int(5)),
        bin(BinOp::Mul, string("0.5"), int(4)),
        bin(BinOp::Sub, string(" 0x10 "), int(1)),
    ])]);
    assert_int(&r, 0, 15);
    assert_float(&r, 1, 2.0);
    assert_int(&r, 2, 15);
}

#[test]
fn e2e_concat_formats_numbers() {
    let (r, vm) = run(vec![
        local(&["s"], vec![bin(BinOp::Concat, string("n="), int(42))]),
        ret(vec![
            name("s"),
            bin(BinOp::Concat, string("f="), num("2.0")),
            bin(BinOp::Concat, num("0.1"), string("")),
            bin(BinOp::Concat, int(1), bin(BinOp::Concat, int(2), int(3))),
        ]),
    ]);
    assert_str(&r, 0, "n=42", &vm);
    assert_str(&r, 1, "f=2.0", &vm);
    assert_str(&r, 2, "0.1", &vm);
    assert_str(&r, 3, "123", &vm);
}

#[test]
fn e2e_comparisons() {
    let (r, _) = run(vec![
        local(&["a", "b"], vec![int(1), num("2.5")]),
        ret(vec![
            bin(BinOp::Lt, name("a"), name("b")),
            bin(BinOp::Ge, name("a"), name("b")),
            bin(BinOp::Eq, int(2), num("2.0")),
            bin(BinOp::Ne, string("a"), string("a")),
            bin(BinOp::Lt, string("abc"), string("abd")),
            bin(BinOp::Le, string("b"), string("a")),
        ]),
    ]);
    assert_bool(&r, 0, true);
    assert_bool(&r, 1, false);
    assert_bool(&r, 2, true);
    assert_bool(&r, 3, false);
    assert_bool(&r, 4, true);
    assert_bool(&r, 5, false);
}

#[test]
fn e2e_table_identity_equality() {
    let (r, _) = run(vec![
        local(&["t", "u"], vec![table(vec![]), table(vec![])]),
        local(&["v"], vec![name("t")]),
        ret(vec![
            bin(BinOp::Eq, name("t"), name("u")),
            bin(BinOp::Eq, name("t"), name("v")),
        ]),
    ]);
    assert_bool(&r, 0, false);
    assert_bool(&r, 1, true);
}

#[test]
fn e2e_length_and_not() {
    let (r, _) = run(vec![
        local(
            &["t"],
            vec![table(vec![
                lunet_compiler::ast::TableField::Positional(int(1)),
                lunet_compiler::ast::TableField::Positional(int(2)),
                lunet_compiler::ast::TableField::Positional(int(3)),
            ])],
        ),
        ret(vec![
            unary(UnOp::Len, name("t")),
            unary(UnOp::Len, string("hello")),
            unary(UnOp::Not, nil()),
            unary(UnOp::Not, int(0)),
        ]),
    ]);
    assert_int(&r, 0, 3);
    assert_int(&r, 1, 5);
    assert_bool(&r, 2, true);
    assert_bool(&r, 3, false);
}

#[test]
fn e2e_tostring_of_floats() {
    let (r, vm) = run(vec![ret(vec![
        call(name("tostring"), vec![bin(BinOp::Div, int(1), int(3))]),
        call(name("tostring"), vec![num("1e100")]),
        call(name("tostring"), vec![bin(BinOp::Div, int(10), int(2))]),
    ])]);
    assert_str(&r, 0, "0.33333333333333", &vm);
    assert_str(&r, 1, "1e+100", &vm);
    assert_str(&r, 2, "5.0", &vm);
}
