use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::ast::{BinOp, Expr, Stat, TableField};

fn add_to(var: &str, e: Expr) -> Stat {
    assign(vec![name(var)], vec![binary(BinOp::Add, name(var), e)])
}

fn list(items: &[i64]) -> Expr {
    table(items.iter().map(|&i| TableField::Positional(int(i))).collect())
}

#[test]
fn e2e_ipairs_sum() {
    run_check_ints(
        vec![
            local(&["sum", "n"], vec![int(0), int(0)]),
            generic_for(
                &["i", "v"],
                vec![call(name("ipairs"), vec![list(&[10, 20, 30])])],
                vec![add_to("sum", name("v")), add_to("n", name("i"))],
            ),
            ret(vec![name("sum"), name("n")]),
        ],
        &[60, 6],
    );
}

#[test]
fn e2e_ipairs_stops_at_first_nil() {
    run_check_ints(
        vec![
            local(&["t"], vec![list(&[1, 2, 3, 4])]),
            assign(vec![index(name("t"), int(3))], vec![nil()]),
            local(&["count"], vec![int(0)]),
            generic_for(&["_", "v"], vec![call(name("ipairs"), vec![name("t")])], vec![add_to("count", int(1))]),
            ret(vec![name("count")]),
        ],
        &[2],
    );
}

#[test]
fn e2e_pairs_visits_every_entry() {
    let t = table(vec![
        TableField::Positional(int(1)),
        TableField::Positional(int(2)),
        TableField::Named("a".into(), int(10)),
        TableField::Named("b".into(), int(20)),
        TableField::Keyed(num("1.5"), int(100)),
    ]);
    run_check_ints(
        vec![
            local(&["sum", "keys"], vec![int(0), int(0)]),
            generic_for(
                &["k", "v"],
                vec![call(name("pairs"), vec![t])],
                vec![add_to("sum", name("v")), add_to("keys", int(1))],
            ),
            ret(vec![name("sum"), name("keys")]),
        ],
        &[133, 5],
    );
}

#[test]
fn e2e_next_directly() {
    // for k, v in next, t do ... end
    run_check_ints(
        vec![
            local(&["sum"], vec![int(0)]),
            generic_for(&["k", "v"], vec![name("next"), list(&[4, 5, 6])], vec![add_to("sum", name("v"))]),
            ret(vec![name("sum")]),
        ],
        &[15],
    );
}

#[test]
fn e2e_custom_stateless_iterator() {
    // local function step(limit, i) if i < limit then return i + 1, (i + 1) * (i + 1) end end
    let step = func_body(
        &["limit", "i"],
        false,
        vec![if_else(
            vec![(
                binary(BinOp::Lt, name("i"), name("limit")),
                vec![ret(vec![
                    binary(BinOp::Add, name("i"), int(1)),
                    binary(
                        BinOp::Mul,
                        binary(BinOp::Add, name("i"), int(1)),
                        binary(BinOp::Add, name("i"), int(1)),
                    ),
                ])],
            )],
            None,
        )],
    );
    run_check_ints(
        vec![
            local_function("step", step),
            local(&["sum"], vec![int(0)]),
            generic_for(&["i", "sq"], vec![name("step"), int(4), int(0)], vec![add_to("sum", name("sq"))]),
            ret(vec![name("sum")]),
        ],
        &[30],
    );
}

#[test]
fn e2e_closure_iterator() {
    // An iterator factory returning a closure over its own counter.
    let range = func_body(
        &["n"],
        false,
        vec![
            local(&["i"], vec![int(0)]),
            ret(vec![function(
                &[],
                false,
                vec![
                    add_to("i", int(1)),
                    if_else(vec![(binary(BinOp::Le, name("i"), name("n")), vec![ret(vec![name("i")])])], None),
                ],
            )]),
        ],
    );
    run_check_ints(
        vec![
            local_function("range", range),
            local(&["sum"], vec![int(0)]),
            generic_for(&["v"], vec![call(name("range"), vec![int(5)])], vec![add_to("sum", name("v"))]),
            ret(vec![name("sum")]),
        ],
        &[15],
    );
}

#[test]
fn e2e_break_out_of_generic_for() {
    run_check_ints(
        vec![
            local(&["last"], vec![int(0)]),
            generic_for(
                &["i", "v"],
                vec![call(name("ipairs"), vec![list(&[7, 8, 9])])],
                vec![
                    assign(vec![name("last")], vec![name("v")]),
                    if_else(vec![(binary(BinOp::Eq, name("i"), int(2)), vec![brk()])], None),
                ],
            ),
            ret(vec![name("last")]),
        ],
        &[8],
    );
}

#[test]
fn e2e_nested_generic_for() {
    run_check_ints(
        vec![
            local(&["grid"], vec![table(vec![TableField::Positional(list(&[1, 2])), TableField::Positional(list(&[3, 4]))])]),
            local(&["sum"], vec![int(0)]),
            generic_for(
                &["_", "row"],
                vec![call(name("ipairs"), vec![name("grid")])],
                vec![generic_for(
                    &["_", "v"],
                    vec![call(name("ipairs"), vec![name("row")])],
                    vec![add_to("sum", name("v"))],
                )],
            ),
            ret(vec![name("sum")]),
        ],
        &[10],
    );
}
