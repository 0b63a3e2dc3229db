// Integration tests for routefilter: building instruction trees, compiling them and running them on routes

use routefilter::*;
use proptest::prelude::*;
use std::sync::Arc;

const PREF: StaticAttr = StaticAttr::new(FilterType::Int, 1, false);
const SOURCE: StaticAttr = StaticAttr::new(FilterType::Int, 2, true);
const NET: StaticAttr = StaticAttr::new(FilterType::Net, 3, true);
const MED: DynamicAttr = DynamicAttr::new(EaType::Int, 0, FilterType::Int, 4);
const AS_PATH: DynamicAttr = DynamicAttr::new(EaType::AsPath, 0, FilterType::Path, 2);
const COMMUNITY: DynamicAttr = DynamicAttr::new(EaType::IntSet, 0, FilterType::Clist, 8);
const BLACKHOLE: DynamicAttr = DynamicAttr::new(EaType::Bitfield, 3, FilterType::Bool, 30);

fn int(v: i64) -> Inst {
    Inst::constant(Value::Int(v))
}

fn net(s: &str) -> Prefix {
    s.parse().unwrap()
}

fn run(filter: &Filter, route: &mut Route) -> Outcome {
    filter.run(&mut ExecContext::new(route))
}

fn roa_tables() -> RoaTableSet {
    let mut table = RoaTable::new();
    table.add(net("192.0.2.0/24"), 24, 64500);
    let mut set = RoaTableSet::new();
    set.insert("r4", table);
    set
}

#[test]
fn test_single_accept_leaves_route_untouched() {
    let filter = Filter::compile("all", &[Inst::die(Verdict::Accept)]).unwrap();
    let mut route = Route::new().with_static(&PREF, Value::Int(100));
    let before = route.clone();
    let out = run(&filter, &mut route);
    assert_eq!(out.verdict, Verdict::Accept);
    assert!(out.error.is_none());
    assert_eq!(route, before);
}

#[test]
fn test_branch_on_arithmetic() {
    let cond = Inst::binary(Op::Gt, Inst::binary(Op::Add, int(5), int(3)), int(7));
    let filter = Filter::compile(
        "sum",
        &[Inst::condition(cond, vec![Inst::die(Verdict::Accept)], Some(vec![Inst::die(Verdict::Reject)]))],
    )
    .unwrap();
    assert_eq!(run(&filter, &mut Route::new()).verdict, Verdict::Accept);
}

#[test]
fn test_runtime_attribute_type_mismatch() {
    let s = Symbol::new("s");
    let body = [
        Inst::local(s.clone(), 0, Some(Inst::constant(Value::string("x")))),
        Inst::static_set(PREF, Inst::var_get(s, 0)),
        Inst::die(Verdict::Accept),
    ];
    let filter = Filter::compile("bad", &body).unwrap();
    let mut route = Route::new().with_static(&PREF, Value::Int(100));
    let out = run(&filter, &mut route);
    assert_eq!(out.verdict, Verdict::Error);
    assert_eq!(
        out.error,
        Some(EvalError::AttributeTypeMismatch { expected: FilterType::Int, got: FilterType::String })
    );
    assert_eq!(route.static_value(1), Some(&Value::Int(100)));
}

#[test]
fn test_roa_results_are_distinguishable() {
    let check = |prefix: &str, asn: i64| {
        let expr = Inst::generate_roa_check(TableRef::new("r4"), Inst::constant(Value::Net(net(prefix))), int(asn));
        let mut compiler = Compiler::new();
        let line = compiler.compile_expression(&expr).unwrap();
        let tables = roa_tables();
        let mut route = Route::new();
        let mut ctx = ExecContext::new(&mut route).with_roa(&tables);
        Interpreter::new(compiler.program()).eval_value(line, &mut ctx).unwrap()
    };
    assert_eq!(check("192.0.2.0/24", 64500), Value::Roa(RoaResult::Valid));
    assert_eq!(check("198.51.100.0/24", 64500), Value::Roa(RoaResult::Unknown));
    assert_eq!(check("192.0.2.0/24", 64501), Value::Roa(RoaResult::Invalid));
}

#[test]
fn test_roa_without_tables_is_error() {
    let expr = Inst::generate_roa_check(TableRef::new("r4"), Inst::static_get(NET), int(1));
    let filter = Filter::new_where("roa", Inst::binary(Op::Eq, expr, Inst::constant(Value::Roa(RoaResult::Valid)))).unwrap();
    let mut route = Route::new().with_static(&NET, Value::Net(net("10.0.0.0/8")));
    let out = run(&filter, &mut route);
    assert_eq!(out.verdict, Verdict::Error);
    assert_eq!(out.error, Some(EvalError::NoRoaTables));

    let tables = RoaTableSet::new();
    let out = filter.run(&mut ExecContext::new(&mut route).with_roa(&tables));
    assert_eq!(out.error, Some(EvalError::UnknownTable("r4".to_string())));
}

#[test]
fn test_duplicate_test_names_all_run() {
    let mut compiler = Compiler::new();
    let mut suite = TestSuite::new();
    for (i, ok) in [true, false, true].into_iter().enumerate() {
        let line = compiler
            .postfixify(&Inst::assert(Inst::constant(Value::Bool(ok)), "check").at(i as u32 + 1))
            .unwrap();
        suite.register(line, "t_dup", "duplicate");
    }
    let mut log = AssertLog::new();
    let reports = suite.run(compiler.program(), &mut log, EvalOptions::default());
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.outcome.verdict == Verdict::Unknown));
    let failed: Vec<u32> = log.failures().map(|r| r.lineno).collect();
    assert_eq!(failed, vec![2]);
}

#[test]
fn test_community_and_path_modifiers() {
    let body = [
        Inst::generate_complex(InstCode::ClistAdd, COMMUNITY, Inst::constant(Value::Pair(65000, 666))).unwrap(),
        Inst::generate_complex(InstCode::PathPrepend, AS_PATH, int(65000)).unwrap(),
        Inst::generate_complex(InstCode::ClistDelete, COMMUNITY, Inst::constant(Value::Pair(1, 1))).unwrap(),
        Inst::die(Verdict::Accept),
    ];
    let filter = Filter::compile("mods", &body).unwrap();
    let mut route = Route::new()
        .with_dynamic(&AS_PATH, Value::path([64500, 64501]))
        .with_dynamic(&COMMUNITY, Value::clist([(1, 1)]));
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Accept);
    assert_eq!(route.attribute(2), Some(&Value::path([65000, 64500, 64501])));
    assert_eq!(route.attribute(8), Some(&Value::clist([(65000, 666)])));
}

#[test]
fn test_missing_list_attribute_reads_empty() {
    let filter = Filter::compile(
        "mods",
        &[Inst::generate_complex(InstCode::ClistAdd, COMMUNITY, Inst::constant(Value::Pair(1, 2))).unwrap()],
    )
    .unwrap();
    let mut route = Route::new();
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Unknown);
    assert_eq!(route.attribute(8), Some(&Value::clist([(1, 2)])));
}

#[test]
fn test_bitfield_attribute() {
    let body = [
        Inst::dynamic_set(BLACKHOLE, Inst::constant(Value::Bool(true))),
        Inst::condition(Inst::dynamic_get(BLACKHOLE), vec![Inst::die(Verdict::Reject)], None),
        Inst::die(Verdict::Accept),
    ];
    let filter = Filter::compile("bits", &body).unwrap();
    let mut route = Route::new();
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Reject);
    assert_eq!(route.attribute(30), Some(&Value::Int(1 << 3)));

    let unset = Filter::compile("unset", &[Inst::dynamic_unset(BLACKHOLE)]).unwrap();
    run(&unset, &mut route);
    assert_eq!(route.attribute(30), Some(&Value::Int(0)));
}

#[test]
fn test_readonly_static_is_not_written() {
    let filter = Filter::compile("ro", &[Inst::static_set(SOURCE, int(9)), Inst::die(Verdict::Accept)]).unwrap();
    let mut route = Route::new().with_static(&SOURCE, Value::Int(1));
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Accept);
    assert_eq!(route.static_value(2), Some(&Value::Int(1)));
}

#[test]
fn test_prefix_set_and_path_mask() {
    let bogons = PrefixSet::new([
        PrefixPattern::or_longer(net("10.0.0.0/8")),
        PrefixPattern::new(net("192.168.0.0/16"), 16, 24).unwrap(),
    ]);
    let reject_bogons = Inst::condition(
        Inst::binary(Op::Match, Inst::static_get(NET), Inst::constant(Value::PrefixSet(Arc::new(bogons)))),
        vec![Inst::print_and_die(Some(Verdict::Reject), vec![Inst::constant(Value::string("bogon"))])],
        None,
    );
    let mask = PathMask::new([PathMaskItem::AnySeq, PathMaskItem::Asn(64666), PathMaskItem::AnySeq]);
    let reject_path = Inst::condition(
        Inst::binary(Op::Match, Inst::dynamic_get(AS_PATH), Inst::constant(Value::PathMask(Arc::new(mask)))),
        vec![Inst::die(Verdict::Reject)],
        None,
    );
    let filter = Filter::compile("import", &[reject_bogons, reject_path, Inst::die(Verdict::Accept)]).unwrap();

    let mut bogon = Route::new().with_static(&NET, Value::Net(net("10.1.0.0/16")));
    let out = run(&filter, &mut bogon);
    assert_eq!(out.verdict, Verdict::Reject);
    assert_eq!(out.messages, vec!["bogon".to_string()]);

    let mut leaked = Route::new()
        .with_static(&NET, Value::Net(net("203.0.113.0/24")))
        .with_dynamic(&AS_PATH, Value::path([64500, 64666, 64501]));
    let out = run(&filter, &mut leaked);
    assert_eq!(out.verdict, Verdict::Reject);
    assert!(out.messages.is_empty());

    let mut clean = Route::new()
        .with_static(&NET, Value::Net(net("203.0.113.0/24")))
        .with_dynamic(&AS_PATH, Value::path([64500]));
    assert_eq!(run(&filter, &mut clean).verdict, Verdict::Accept);
}

#[test]
fn test_silent_print() {
    let filter = Filter::compile(
        "loud",
        &[Inst::print_and_die(Some(Verdict::Accept), vec![Inst::constant(Value::string("hello"))])],
    )
    .unwrap();
    let mut route = Route::new();
    let opts = EvalOptions { silent: true, ..EvalOptions::default() };
    let out = filter.run(&mut ExecContext::new(&mut route).with_options(opts));
    assert_eq!(out.verdict, Verdict::Accept);
    assert!(out.messages.is_empty());
}

#[test]
fn test_case_statement() {
    let arms = vec![
        CaseArm { items: vec![SetItem::value(Value::Int(1))], body: vec![Inst::static_set(PREF, int(200))] },
        CaseArm {
            items: vec![SetItem::range(Value::Int(2), Value::Int(5))],
            body: vec![Inst::static_set(PREF, int(50))],
        },
    ];
    let body = [
        Inst::switch(Inst::dynamic_get(MED), arms, Some(vec![Inst::die(Verdict::Reject)])),
        Inst::die(Verdict::Accept),
    ];
    let filter = Filter::compile("case", &body).unwrap();
    let mut route = Route::new().with_dynamic(&MED, Value::Int(3));
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Accept);
    assert_eq!(route.static_value(1), Some(&Value::Int(50)));
    let mut route = Route::new().with_dynamic(&MED, Value::Int(9));
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Reject);
}

#[test]
fn test_function_with_locals() {
    let (x, y) = (Symbol::new("x"), Symbol::new("y"));
    let mut compiler = Compiler::new();
    // function bump(x) { int y; y = x * 2; return y + 1; }
    let bump = compiler
        .compile_function(
            1,
            &[
                Inst::local(y.clone(), 1, None),
                Inst::var_set(y.clone(), 1, Inst::binary(Op::Multiply, Inst::var_get(x, 0), int(2))),
                Inst::ret(Inst::binary(Op::Add, Inst::var_get(y, 1), int(1))),
            ],
        )
        .unwrap();
    let root = compiler
        .postfixify(&Inst::static_set(
            PREF,
            Inst::call(Symbol::new("bump"), bump, vec![Inst::static_get(PREF)]),
        ))
        .unwrap();
    let filter = Filter::new("f", Arc::new(compiler.into_program()), root);
    let mut route = Route::new().with_static(&PREF, Value::Int(10));
    assert_eq!(run(&filter, &mut route).verdict, Verdict::Unknown);
    assert_eq!(route.static_value(1), Some(&Value::Int(21)));
}

#[test]
fn test_compile_error_leaves_program_unchanged() {
    let mut compiler = Compiler::new();
    compiler.postfixify(&Inst::die(Verdict::Accept)).unwrap();
    let before = compiler.program().len();
    let bad = Inst::condition(int(1), vec![Inst::die(Verdict::Accept)], None);
    assert!(matches!(compiler.postfixify(&bad), Err(CompileError::TypeMismatch { .. })));
    assert_eq!(compiler.program().len(), before);
}

#[test]
fn test_config_and_route_json() {
    let limits: Limits = serde_json::from_str(r#"{"max_line_len": 16}"#).unwrap();
    let mut compiler = Compiler::with_limits(limits);
    let long: Vec<Inst> = (0..17).map(|_| Inst::dynamic_unset(MED)).collect();
    assert!(matches!(compiler.postfixify_concat(&long), Err(CompileError::LineTooLong { len: 17, max: 16 })));

    let route = Route::new()
        .with_dynamic(&AS_PATH, Value::path([1, 2]))
        .with_dynamic(&COMMUNITY, Value::clist([(3, 4)]));
    let json = serde_json::to_string(&route).unwrap();
    let back: Route = serde_json::from_str(&json).unwrap();
    assert_eq!(route, back);
}

/// Shape of one generated top-level statement. Calls refer to a function
/// compiled into the same program before the statements.
#[derive(Debug, Clone)]
enum Stmt {
    SetPref(i64),
    SetMed(i64, i64),
    UnsetMed,
    Cond(bool),
    AddCommunity(u16),
    CallStatement(i64),
    AssignCall(i64),
    Loop(Vec<u32>),
    ShortCircuit(bool, bool, i64),
    Switch(i64),
    Print(i64),
    LargeCommunity(u32, u32, u32),
    ExtCommunity(u16),
    Roa(u32),
    Assert(bool),
}

fn arb_statement() -> impl Strategy<Value = Stmt> {
    prop_oneof![
        any::<i64>().prop_map(Stmt::SetPref),
        (0i64..100, 0i64..100).prop_map(|(a, b)| Stmt::SetMed(a, b)),
        Just(Stmt::UnsetMed),
        any::<bool>().prop_map(Stmt::Cond),
        any::<u16>().prop_map(Stmt::AddCommunity),
        (0i64..1000).prop_map(Stmt::CallStatement),
        (0i64..1000).prop_map(Stmt::AssignCall),
        prop::collection::vec(any::<u32>(), 0..4).prop_map(Stmt::Loop),
        (any::<bool>(), any::<bool>(), 0i64..10).prop_map(|(a, b, c)| Stmt::ShortCircuit(a, b, c)),
        (0i64..6).prop_map(Stmt::Switch),
        any::<i64>().prop_map(Stmt::Print),
        (any::<u32>(), any::<u32>(), any::<u32>()).prop_map(|(a, b, c)| Stmt::LargeCommunity(a, b, c)),
        any::<u16>().prop_map(Stmt::ExtCommunity),
        prop::sample::select(vec![0u32, 64500, 64501]).prop_map(Stmt::Roa),
        any::<bool>().prop_map(Stmt::Assert),
    ]
}

/// Compiles `double(x) = x + x` and returns its line.
fn compile_double(compiler: &mut Compiler) -> LineId {
    let x = Symbol::new("x");
    compiler
        .compile_function(1, &[Inst::ret(Inst::binary(Op::Add, Inst::var_get(x.clone(), 0), Inst::var_get(x, 0)))])
        .unwrap()
}

fn build(stmt: &Stmt, double: LineId) -> Inst {
    let set_pref = |v| vec![Inst::static_set(PREF, int(v))];
    let call = |v| Inst::call(Symbol::new("double"), double, vec![int(v)]);
    match stmt {
        Stmt::SetPref(v) => Inst::static_set(PREF, int(*v)),
        Stmt::SetMed(a, b) => Inst::dynamic_set(MED, Inst::binary(Op::Add, int(*a), int(*b))),
        Stmt::UnsetMed => Inst::dynamic_unset(MED),
        Stmt::Cond(b) => Inst::condition(
            Inst::constant(Value::Bool(*b)),
            set_pref(1),
            Some(vec![Inst::dynamic_unset(MED)]),
        ),
        Stmt::AddCommunity(c) => {
            Inst::generate_complex(InstCode::ClistAdd, COMMUNITY, Inst::constant(Value::Pair(65000, *c))).unwrap()
        }
        Stmt::CallStatement(v) => Inst::call_statement(Symbol::new("double"), double, vec![int(*v)]),
        Stmt::AssignCall(v) => Inst::dynamic_set(MED, call(*v)),
        Stmt::Loop(asns) => {
            let asn = Symbol::new("asn");
            Inst::for_each(
                asn.clone(),
                0,
                Inst::constant(Value::path(asns.iter().copied())),
                vec![Inst::dynamic_set(MED, Inst::var_get(asn, 0))],
            )
        }
        Stmt::ShortCircuit(a, b, c) => Inst::condition(
            Inst::and(
                Inst::constant(Value::Bool(*a)),
                Inst::or(Inst::constant(Value::Bool(*b)), Inst::binary(Op::Lt, int(*c), int(5))),
            ),
            set_pref(2),
            None,
        ),
        Stmt::Switch(v) => {
            let arms = vec![
                CaseArm { items: vec![SetItem::value(Value::Int(1))], body: set_pref(3) },
                CaseArm {
                    items: vec![SetItem::range(Value::Int(2), Value::Int(3))],
                    body: vec![Inst::dynamic_set(MED, call(*v))],
                },
            ];
            Inst::switch(int(*v), arms, Some(vec![Inst::dynamic_unset(MED)]))
        }
        Stmt::Print(v) => Inst::print_and_die(None, vec![int(*v), Inst::constant(Value::string("done"))]),
        Stmt::LargeCommunity(a, b, c) => {
            let lc = |a: u32, b: u32, c: u32| {
                Inst::op(Op::LcConstruct, vec![int(a.into()), int(b.into()), int(c.into())])
            };
            Inst::condition(Inst::binary(Op::Eq, lc(*a, *b, *c), lc(*a, *b, 1)), set_pref(4), None)
        }
        Stmt::ExtCommunity(c) => {
            let ec = |v: u16| Inst::op(Op::EcConstruct(EcSubtype::Rt), vec![int(65000), int(v.into())]);
            Inst::condition(Inst::binary(Op::Neq, ec(*c), ec(7)), set_pref(5), None)
        }
        Stmt::Roa(asn) => Inst::condition(
            Inst::binary(
                Op::Eq,
                Inst::generate_roa_check(
                    TableRef::new("r4"),
                    Inst::constant(Value::Net(net("192.0.2.0/24"))),
                    int((*asn).into()),
                ),
                Inst::constant(Value::Roa(RoaResult::Valid)),
            ),
            set_pref(6),
            None,
        ),
        Stmt::Assert(b) => Inst::assert(Inst::constant(Value::Bool(*b)), "generated"),
    }
}

/// Compiles the function and the statements into one program.
fn compile_stmts(stmts: &[Stmt]) -> (Compiler, Vec<Inst>) {
    let mut compiler = Compiler::new();
    let double = compile_double(&mut compiler);
    let insts = stmts.iter().map(|s| build(s, double)).collect();
    (compiler, insts)
}

proptest! {
    #[test]
    fn concat_length_is_sum_of_parts(stmts in prop::collection::vec(arb_statement(), 0..12)) {
        let (mut compiler, insts) = compile_stmts(&stmts);
        let mut expected = Vec::new();
        for inst in &insts {
            let id = compiler.postfixify(inst).unwrap();
            let line = compiler.program().line(id).unwrap();
            expected.extend(line.items().iter().map(LineItem::code));
        }
        let joined = compiler.postfixify_concat(&insts).unwrap();
        let codes: Vec<InstCode> = compiler.program().line(joined).unwrap().items().iter().map(LineItem::code).collect();
        prop_assert_eq!(codes, expected);
    }

    #[test]
    fn evaluation_is_deterministic(stmts in prop::collection::vec(arb_statement(), 0..12), pref in any::<i64>()) {
        let (mut compiler, insts) = compile_stmts(&stmts);
        let root = compiler.postfixify_concat(&insts).unwrap();
        let filter = Filter::new("p", Arc::new(compiler.into_program()), root);
        let roa = roa_tables();
        let route = Route::new().with_static(&PREF, Value::Int(pref));
        let (mut a, mut b) = (route.clone(), route);
        let (mut log_a, mut log_b) = (AssertLog::new(), AssertLog::new());
        let oa = filter.run(&mut ExecContext::new(&mut a).with_roa(&roa).with_assert_hook(&mut log_a));
        let ob = filter.run(&mut ExecContext::new(&mut b).with_roa(&roa).with_assert_hook(&mut log_b));
        prop_assert_eq!(oa, ob);
        prop_assert_eq!(a, b);
        prop_assert_eq!(log_a.records(), log_b.records());
    }

    #[test]
    fn top_level_lines_are_stack_balanced(stmts in prop::collection::vec(arb_statement(), 0..12)) {
        let (mut compiler, insts) = compile_stmts(&stmts);
        let id = compiler.postfixify_concat(&insts).unwrap();
        let mut depth = 0usize;
        for item in compiler.program().line(id).unwrap().items() {
            let (pops, pushes) = item.op.stack_effect();
            prop_assert!(depth >= pops, "underflow at {}", item);
            depth = depth - pops + pushes;
        }
        prop_assert_eq!(depth, 0);
    }

    #[test]
    fn arithmetic_never_panics(a in any::<i64>(), b in any::<i64>(), op in prop::sample::select(vec![Op::Add, Op::Subtract, Op::Multiply, Op::Divide])) {
        let mut compiler = Compiler::new();
        let line = compiler.compile_expression(&Inst::binary(op, int(a), int(b))).unwrap();
        let mut route = Route::new();
        let res = Interpreter::new(compiler.program()).eval_value(line, &mut ExecContext::new(&mut route));
        prop_assert!(matches!(res, Ok(Value::Int(_)) | Err(EvalError::Arithmetic(_))));
    }
}
