use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::ast::{BinOp, Expr, FunctionBody, TableField};

fn add(a: Expr, b: Expr) -> Expr {
    binary(BinOp::Add, a, b)
}

fn incr(var: &str) -> lunet_compiler::ast::Stat {
    assign(vec![name(var)], vec![add(name(var), int(1))])
}

/// `function() n = n + 1 return n end`
fn counter_body() -> FunctionBody {
    func_body(&[], false, vec![incr("n"), ret(vec![name("n")])])
}

#[test]
fn e2e_counter_closure() {
    let make = func_body(
        &[],
        false,
        vec![
            local(&["n"], vec![int(0)]),
            ret(vec![function(&[], false, counter_body().body)]),
        ],
    );
    run_check_ints(
        vec![
            local_function("make", make),
            local(&["a", "b"], vec![call(name("make"), vec![]), call(name("make"), vec![])]),
            call_stat(call(name("a"), vec![])),
            call_stat(call(name("a"), vec![])),
            ret(vec![call(name("a"), vec![]), call(name("b"), vec![])]),
        ],
        &[3, 1],
    );
}

#[test]
fn e2e_closures_share_a_cell() {
    // Two closures over the same local see each other's writes.
    let (r, _) = run(vec![
        local(&["n"], vec![int(10)]),
        local_function("inc", func_body(&[], false, vec![incr("n")])),
        local_function("get", func_body(&[], false, vec![ret(vec![name("n")])])),
        call_stat(call(name("inc"), vec![])),
        call_stat(call(name("inc"), vec![])),
        assign(vec![name("n")], vec![add(name("n"), int(100))]),
        ret(vec![call(name("get"), vec![]), name("n")]),
    ]);
    assert_int(&r, 0, 112);
    assert_int(&r, 1, 112);
}

#[test]
fn e2e_fresh_cell_per_iteration() {
    // for i = 1, 3 do fns[i] = function() return i end end
    let (r, _) = run(vec![
        local(&["fns"], vec![table(vec![])]),
        numeric_for(
            "i",
            int(1),
            int(3),
            None,
            vec![assign(
                vec![index(name("fns"), name("i"))],
                vec![function(&[], false, vec![ret(vec![name("i")])])],
            )],
        ),
        ret(vec![
            call(index(name("fns"), int(1)), vec![]),
            call(index(name("fns"), int(2)), vec![]),
            call(index(name("fns"), int(3)), vec![]),
        ]),
    ]);
    assert_int(&r, 0, 1);
    assert_int(&r, 1, 2);
    assert_int(&r, 2, 3);
}

#[test]
fn e2e_fresh_cell_per_while_iteration() {
    let (r, _) = run(vec![
        local(&["fns", "i"], vec![table(vec![]), int(0)]),
        while_loop(
            binary(BinOp::Lt, name("i"), int(2)),
            vec![
                incr("i"),
                local(&["captured"], vec![binary(BinOp::Mul, name("i"), int(10))]),
                assign(
                    vec![index(name("fns"), name("i"))],
                    vec![function(&[], false, vec![incr("captured"), ret(vec![name("captured")])])],
                ),
            ],
        ),
        ret(vec![
            call(index(name("fns"), int(1)), vec![]),
            call(index(name("fns"), int(1)), vec![]),
            call(index(name("fns"), int(2)), vec![]),
        ]),
    ]);
    assert_int(&r, 0, 11);
    assert_int(&r, 1, 12);
    assert_int(&r, 2, 21);
}

#[test]
fn e2e_nested_upvalue_chain() {
    // The innermost function reaches a local two levels out.
    let inner = function(&[], false, vec![incr("x"), ret(vec![name("x")])]);
    let middle = function(&[], false, vec![ret(vec![inner])]);
    run_check_ints(
        vec![
            local(&["x"], vec![int(5)]),
            local(&["f"], vec![call(middle, vec![])]),
            call_stat(call(name("f"), vec![])),
            ret(vec![call(name("f"), vec![]), name("x")]),
        ],
        &[7, 7],
    );
}

#[test]
fn e2e_closure_captures_parameter() {
    let adder = func_body(
        &["k"],
        false,
        vec![ret(vec![function(&["v"], false, vec![ret(vec![add(name("v"), name("k"))])])])],
    );
    run_check_ints(
        vec![
            local_function("adder", adder),
            local(&["add5"], vec![call(name("adder"), vec![int(5)])]),
            ret(vec![call(name("add5"), vec![int(1)]), call(call(name("adder"), vec![int(-2)]), vec![int(2)])]),
        ],
        &[6, 0],
    );
}

#[test]
fn e2e_closures_in_table() {
    // An object built from closures sharing one private counter.
    let make = func_body(
        &[],
        false,
        vec![
            local(&["n"], vec![int(0)]),
            ret(vec![table(vec![
                TableField::Named("inc".into(), function(&[], false, counter_body().body)),
                TableField::Named("get".into(), function(&[], false, vec![ret(vec![name("n")])])),
            ])]),
        ],
    );
    run_check_ints(
        vec![
            local_function("make", make),
            local(&["o"], vec![call(name("make"), vec![])]),
            call_stat(call(member(name("o"), "inc"), vec![])),
            call_stat(call(member(name("o"), "inc"), vec![])),
            ret(vec![call(member(name("o"), "get"), vec![])]),
        ],
        &[2],
    );
}

#[test]
fn e2e_local_function_recursion_sees_itself() {
    let fact = func_body(
        &["n"],
        false,
        vec![
            if_else(vec![(binary(BinOp::Le, name("n"), int(1)), vec![ret(vec![int(1)])])], None),
            ret(vec![binary(
                BinOp::Mul,
                name("n"),
                call(name("fact"), vec![binary(BinOp::Sub, name("n"), int(1))]),
            )]),
        ],
    );
    run_check_ints(
        vec![local_function("fact", fact), ret(vec![call(name("fact"), vec![int(10)])])],
        &[3_628_800],
    );
}
