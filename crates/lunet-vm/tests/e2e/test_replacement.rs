use super::helpers::*;
use lunet_compiler::ast::build::*;
use lunet_compiler::ast::{BinOp, Block, Expr, Stat};
use lunet_compiler::proto::FunctionProto;
use lunet_core::value::Value;
use lunet_vm::replace::{LoopSite, Predecoded, Replacement, ReplacementTrigger};
use lunet_vm::vm::{Vm, VmConfig};
use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

fn add_to(var: &str, e: Expr) -> Stat {
    assign(vec![name(var)], vec![binary(BinOp::Add, name(var), e)])
}

/// Sums i*i over 1..=n with a while loop, a numeric for and a closure call per step.
fn mixed_loops(n: i64) -> Block {
    vec![
        local(&["acc"], vec![int(0)]),
        local_function(
            "sq",
            func_body(&["x"], false, vec![ret(vec![binary(BinOp::Mul, name("x"), name("x"))])]),
        ),
        numeric_for(
            "i",
            int(1),
            int(n),
            None,
            vec![add_to("acc", call(name("sq"), vec![name("i")]))],
        ),
        local(&["j"], vec![int(0)]),
        while_loop(
            binary(BinOp::Lt, name("j"), int(n)),
            vec![add_to("j", int(1)), add_to("acc", name("j"))],
        ),
        ret(vec![name("acc"), name("j")]),
    ]
}

#[test]
fn e2e_replacement_preserves_results() {
    let (plain, _) = run(mixed_loops(100));
    let (eager, vm) = run_with(eager_osr(), mixed_loops(100));
    assert_eq!(plain, eager);
    assert_int(&eager, 0, 338_350 + 5050);
    assert!(vm.replacement_transfers() > 0);
}

#[test]
fn e2e_no_transfers_by_default() {
    let (_, vm) = run(mixed_loops(50));
    assert_eq!(vm.replacement_transfers(), 0);
}

#[test]
fn e2e_threshold_delays_transfer() {
    let config = VmConfig {
        osr_threshold: Some(1000),
        ..VmConfig::default()
    };
    let (_, vm) = run_with(config.clone(), mixed_loops(10));
    assert_eq!(vm.replacement_transfers(), 0);
    let (r, vm) = run_with(config, mixed_loops(2000));
    assert!(vm.replacement_transfers() > 0);
    let (plain, _) = run(mixed_loops(2000));
    assert_eq!(r, plain);
}

#[test]
fn e2e_replacement_preserves_errors() {
    // The loop faults on its fifth iteration, after the transfer.
    let body = vec![
        local(&["t"], vec![table(vec![])]),
        numeric_for(
            "i",
            int(1),
            int(10),
            None,
            vec![
                if_else(
                    vec![(binary(BinOp::Eq, name("i"), int(5)), vec![assign(vec![name("t")], vec![nil()])])],
                    None,
                ),
                assign(vec![index(name("t"), name("i"))], vec![name("i")]),
            ],
        ),
    ];
    let (plain, plain_vm) = run_err(body.clone());
    let (eager, eager_vm) = run_err_with(eager_osr(), body);
    assert_eq!(plain.message(&plain_vm.strings), eager.message(&eager_vm.strings));
    assert_eq!(plain.span, eager.span);
    assert!(eager_vm.replacement_transfers() > 0);
}

#[test]
fn e2e_replacement_with_closures_and_tail_calls() {
    // Closures created after the transfer still get fresh cells, and a tail
    // call out of a replaced frame continues through the trampoline.
    let body = vec![
        local(&["fns"], vec![table(vec![])]),
        numeric_for(
            "i",
            int(1),
            int(5),
            None,
            vec![assign(
                vec![index(name("fns"), name("i"))],
                vec![function(&[], false, vec![ret(vec![name("i")])])],
            )],
        ),
        local_function(
            "finish",
            func_body(&["k"], false, vec![ret(vec![call(index(name("fns"), name("k")), vec![])])]),
        ),
        local(&["k"], vec![int(0)]),
        while_loop(binary(BinOp::Lt, name("k"), int(3)), vec![add_to("k", int(1))]),
        ret(vec![call(name("finish"), vec![name("k")])]),
    ];
    let (r, vm) = run_with(eager_osr(), body);
    assert_int(&r, 0, 3);
    assert!(vm.replacement_transfers() > 0);
}

#[test]
fn e2e_replacement_under_deep_tail_recursion() {
    // Each tail-called invocation runs a short loop; later invocations reuse
    // the replacement built for the function.
    let count = func_body(
        &["n", "acc"],
        false,
        vec![
            if_else(vec![(binary(BinOp::Eq, name("n"), int(0)), vec![ret(vec![name("acc")])])], None),
            local(&["s"], vec![int(0)]),
            numeric_for("i", int(1), int(3), None, vec![add_to("s", name("i"))]),
            ret(vec![call(
                name("count"),
                vec![binary(BinOp::Sub, name("n"), int(1)), binary(BinOp::Add, name("acc"), name("s"))],
            )]),
        ],
    );
    let body = vec![
        local_function("count", count),
        ret(vec![call(name("count"), vec![int(1000), int(0)])]),
    ];
    let (r, vm) = run_with(eager_osr(), body);
    assert_int(&r, 0, 6000);
    assert!(vm.replacement_transfers() >= 1000);
}

/// Records every back edge it sees and transfers after `after` of them.
struct Recording {
    after: usize,
    sites: Rc<std::cell::RefCell<Vec<LoopSite>>>,
    fired: Rc<Cell<u32>>,
}

impl ReplacementTrigger for Recording {
    fn poll(&mut self, site: LoopSite, proto: &Arc<FunctionProto>) -> Option<Arc<dyn Replacement>> {
        self.sites.borrow_mut().push(site);
        if self.sites.borrow().len() < self.after {
            return None;
        }
        self.fired.set(self.fired.get() + 1);
        Some(Arc::new(Predecoded::new(Arc::clone(proto))))
    }
}

#[test]
fn e2e_custom_trigger() {
    let sites = Rc::new(std::cell::RefCell::new(Vec::new()));
    let fired = Rc::new(Cell::new(0));
    let mut vm = Vm::new();
    vm.set_trigger(Box::new(Recording {
        after: 3,
        sites: Rc::clone(&sites),
        fired: Rc::clone(&fired),
    }));
    let body = vec![
        local(&["i"], vec![int(0)]),
        while_loop(binary(BinOp::Lt, name("i"), int(10)), vec![add_to("i", int(1))]),
        ret(vec![name("i")]),
    ];
    let r = lunet_vm::execute_chunk(&mut vm, &chunk(body), "test").unwrap();
    assert_eq!(r, vec![Value::Integer(10)]);
    // Once transferred, the replacement runs the rest of the invocation.
    assert_eq!(sites.borrow().len(), 3);
    assert_eq!(fired.get(), 1);
    assert_eq!(vm.replacement_transfers(), 1);
    let first = sites.borrow()[0];
    assert!(sites.borrow().iter().all(|s| *s == first));
}
