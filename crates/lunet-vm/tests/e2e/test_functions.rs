use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::ast::{BinOp, Block, Expr, TableField, UnOp};
use lunet_core::value::Value;
use lunet_vm::error::ErrorKind;
use lunet_vm::vm::VmConfig;

fn bin(op: BinOp, a: Expr, b: Expr) -> Expr {
    binary(op, a, b)
}

fn pos(e: Expr) -> TableField {
    TableField::Positional(e)
}

#[test]
fn e2e_multiple_returns_adjust() {
    let three = func_body(&[], false, vec![ret(vec![int(1), int(2), int(3)])]);
    run_check_ints(
        vec![
            local_function("three", three),
            local(&["a", "b"], vec![call(name("three"), vec![])]),
            local(&["c", "d", "e", "f"], vec![int(0), call(name("three"), vec![])]),
            ret(vec![
                name("a"),
                name("b"),
                name("d"),
                name("f"),
                paren(call(name("three"), vec![])),
            ]),
        ],
        &[1, 2, 1, 3, 1],
    );
}

#[test]
fn e2e_missing_values_are_nil() {
    let (r, _) = run(vec![
        local(&["a", "b"], vec![int(1)]),
        local_function("g", func_body(&["x", "y"], false, vec![ret(vec![name("y")])])),
        ret(vec![name("b"), call(name("g"), vec![int(1)])]),
    ]);
    assert_eq!(r.len(), 2);
    assert_nil(&r, 0);
    assert_nil(&r, 1);
}

#[test]
fn e2e_varargs() {
    let count = func_body(
        &[],
        true,
        vec![ret(vec![call(name("select"), vec![string("#"), varargs()])])],
    );
    let second = func_body(&["first"], true, vec![local(&["a", "b"], vec![varargs()]), ret(vec![name("b")])]);
    run_check_ints(
        vec![
            local_function("count", count),
            local_function("second", second),
            ret(vec![
                call(name("count"), vec![]),
                call(name("count"), vec![int(1), nil(), int(3)]),
                call(name("second"), vec![int(10), int(20), int(30)]),
            ]),
        ],
        &[0, 3, 30],
    );
}

#[test]
fn e2e_varargs_forwarding() {
    let pass = func_body(&[], true, vec![ret(vec![varargs()])]);
    run_check_ints(
        vec![
            local_function("pass", pass),
            ret(vec![call(name("pass"), vec![int(4), int(5), int(6)])]),
        ],
        &[4, 5, 6],
    );
}

#[test]
fn e2e_table_constructor_spread() {
    let three = func_body(&[], false, vec![ret(vec![int(1), int(2), int(3)])]);
    let (r, _) = run(vec![
        local_function("three", three),
        local(
            &["t"],
            vec![table(vec![
                pos(int(0)),
                TableField::Named("k".into(), string("v")),
                pos(call(name("three"), vec![])),
            ])],
        ),
        local(&["u"], vec![table(vec![pos(call(name("three"), vec![])), pos(int(9))])]),
        ret(vec![
            unary(UnOp::Len, name("t")),
            index(name("t"), int(4)),
            unary(UnOp::Len, name("u")),
            index(name("u"), int(2)),
        ]),
    ]);
    assert_int(&r, 0, 4);
    assert_int(&r, 1, 3);
    assert_int(&r, 2, 2);
    assert_int(&r, 3, 9);
}

#[test]
fn e2e_keyed_fields_and_members() {
    let (r, vm) = run(vec![
        local(
            &["t"],
            vec![table(vec![
                TableField::Named("name".into(), string("lunet")),
                TableField::Keyed(int(10), boolean(true)),
            ])],
        ),
        assign(vec![member(name("t"), "count")], vec![int(3)]),
        assign(vec![index(name("t"), string("count"))], vec![bin(BinOp::Add, member(name("t"), "count"), int(1))]),
        ret(vec![member(name("t"), "name"), index(name("t"), int(10)), member(name("t"), "count"), member(name("t"), "missing")]),
    ]);
    assert_str(&r, 0, "lunet", &vm);
    assert_bool(&r, 1, true);
    assert_int(&r, 2, 4);
    assert_nil(&r, 3);
}

#[test]
fn e2e_method_calls() {
    // function Account.deposit(self, n) self.balance = self.balance + n return self.balance end
    let deposit = func_body(
        &["n"],
        false,
        vec![
            assign(
                vec![member(name("self"), "balance")],
                vec![bin(BinOp::Add, member(name("self"), "balance"), name("n"))],
            ),
            ret(vec![member(name("self"), "balance")]),
        ],
    );
    run_check_ints(
        vec![
            assign(vec![name("Account")], vec![table(vec![TableField::Named("balance".into(), int(100))])]),
            function_decl(&["Account"], Some("deposit"), deposit),
            call_stat(method_call(name("Account"), "deposit", vec![int(50)])),
            ret(vec![method_call(name("Account"), "deposit", vec![int(25)])]),
        ],
        &[175],
    );
}

#[test]
fn e2e_recursive_fibonacci() {
    let fib = func_body(
        &["n"],
        false,
        vec![
            if_else(vec![(bin(BinOp::Lt, name("n"), int(2)), vec![ret(vec![name("n")])])], None),
            ret(vec![bin(
                BinOp::Add,
                call(name("fib"), vec![bin(BinOp::Sub, name("n"), int(1))]),
                call(name("fib"), vec![bin(BinOp::Sub, name("n"), int(2))]),
            )]),
        ],
    );
    run_check_ints(
        vec![local_function("fib", fib), ret(vec![call(name("fib"), vec![int(20)])])],
        &[6765],
    );
}

/// `local function count(n, acc) if n == 0 then return acc end return count(n - 1, acc + 1) end`
fn tail_counter() -> Block {
    vec![local_function(
        "count",
        func_body(
            &["n", "acc"],
            false,
            vec![
                if_else(vec![(bin(BinOp::Eq, name("n"), int(0)), vec![ret(vec![name("acc")])])], None),
                ret(vec![call(
                    name("count"),
                    vec![bin(BinOp::Sub, name("n"), int(1)), bin(BinOp::Add, name("acc"), int(1))],
                )]),
            ],
        ),
    )]
}

#[test]
fn e2e_deep_tail_recursion() {
    let mut body = tail_counter();
    body.push(ret(vec![call(name("count"), vec![int(100_000), int(0)])]));
    run_check_ints(body, &[100_000]);
}

#[test]
fn e2e_mutual_tail_calls() {
    let is_even = func_body(
        &["n"],
        false,
        vec![
            if_else(vec![(bin(BinOp::Eq, name("n"), int(0)), vec![ret(vec![boolean(true)])])], None),
            ret(vec![call(name("is_odd"), vec![bin(BinOp::Sub, name("n"), int(1))])]),
        ],
    );
    let is_odd = func_body(
        &["n"],
        false,
        vec![
            if_else(vec![(bin(BinOp::Eq, name("n"), int(0)), vec![ret(vec![boolean(false)])])], None),
            ret(vec![call(name("is_even"), vec![bin(BinOp::Sub, name("n"), int(1))])]),
        ],
    );
    let (r, _) = run(vec![
        function_decl(&["is_even"], None, is_even),
        function_decl(&["is_odd"], None, is_odd),
        ret(vec![call(name("is_even"), vec![int(50_001)])]),
    ]);
    assert_bool(&r, 0, false);
}

#[test]
fn e2e_deep_non_tail_recursion_overflows() {
    let message = on_big_stack(|| {
        let body = vec![
            local_function(
                "depth",
                func_body(
                    &["n"],
                    false,
                    vec![
                        if_else(vec![(bin(BinOp::Eq, name("n"), int(0)), vec![ret(vec![int(0)])])], None),
                        ret(vec![bin(
                            BinOp::Add,
                            int(1),
                            call(name("depth"), vec![bin(BinOp::Sub, name("n"), int(1))]),
                        )]),
                    ],
                ),
            ),
            ret(vec![call(name("depth"), vec![int(100_000)])]),
        ];
        let (err, vm) = run_err(body);
        assert!(matches!(err.kind, ErrorKind::StackOverflow));
        err.message(&vm.strings)
    });
    assert_eq!(message, "stack overflow");
}

#[test]
fn e2e_non_tail_recursion_within_limit() {
    let body = vec![
        local_function(
            "depth",
            func_body(
                &["n"],
                false,
                vec![
                    if_else(vec![(bin(BinOp::Eq, name("n"), int(0)), vec![ret(vec![int(0)])])], None),
                    ret(vec![bin(BinOp::Add, int(1), call(name("depth"), vec![bin(BinOp::Sub, name("n"), int(1))]))]),
                ],
            ),
        ),
        ret(vec![call(name("depth"), vec![int(50)])]),
    ];
    let (r, _) = run_with(VmConfig::default(), body);
    assert_int(&r, 0, 50);
}

#[test]
fn e2e_parenthesized_call_is_not_tail() {
    // Through parentheses the call nests, so a small depth limit trips.
    let mut body = tail_counter();
    body.push(ret(vec![call(name("count"), vec![int(50), int(0)])]));
    let config = VmConfig {
        max_call_depth: 5,
        ..VmConfig::default()
    };
    let (r, _) = run_with(config.clone(), body);
    assert_int(&r, 0, 50);

    let nested = vec![
        local_function(
            "count",
            func_body(
                &["n"],
                false,
                vec![
                    if_else(vec![(bin(BinOp::Eq, name("n"), int(0)), vec![ret(vec![int(0)])])], None),
                    ret(vec![paren(call(name("count"), vec![bin(BinOp::Sub, name("n"), int(1))]))]),
                ],
            ),
        ),
        ret(vec![call(name("count"), vec![int(50)])]),
    ];
    let (err, _) = run_err_with(config, nested);
    assert!(matches!(err.kind, ErrorKind::StackOverflow));
}

#[test]
fn e2e_native_in_tail_position() {
    let (r, vm) = run(vec![
        local_function("kind", func_body(&["v"], false, vec![ret(vec![call(name("type"), vec![name("v")])])])),
        ret(vec![call(name("kind"), vec![table(vec![])])]),
    ]);
    assert_str(&r, 0, "table", &vm);
}

#[test]
fn e2e_host_function_registration() {
    let body = vec![ret(vec![call(name("double"), vec![int(21)])])];
    let mut vm = lunet_vm::vm::Vm::new();
    vm.register_native("double", |_, args| match args.first() {
        Some(Value::Integer(i)) => Ok(vec![Value::Integer(i * 2)]),
        _ => Err("integer expected".into()),
    });
    let r = lunet_vm::execute_chunk(&mut vm, &chunk(body), "test").unwrap();
    assert_eq!(r, vec![Value::Integer(42)]);
}
