use criterion::{black_box, criterion_group, criterion_main, Criterion};
use routefilter::*;
use std::sync::Arc;

const PREF: StaticAttr = StaticAttr::new(FilterType::Int, 1, false);
const NET: StaticAttr = StaticAttr::new(FilterType::Net, 3, true);
const MED: DynamicAttr = DynamicAttr::new(EaType::Int, 0, FilterType::Int, 4);
const COMMUNITY: DynamicAttr = DynamicAttr::new(EaType::IntSet, 0, FilterType::Clist, 8);

fn import_filter() -> Vec<Inst> {
    let bogons = PrefixSet::new([
        PrefixPattern::or_longer("10.0.0.0/8".parse().unwrap()),
        PrefixPattern::or_longer("192.168.0.0/16".parse().unwrap()),
    ]);
    vec![
        Inst::condition(
            Inst::binary(Op::Match, Inst::static_get(NET), Inst::constant(Value::PrefixSet(Arc::new(bogons)))),
            vec![Inst::die(Verdict::Reject)],
            None,
        ),
        Inst::condition(
            Inst::and(
                Inst::unary(Op::Defined, Inst::dynamic_get(MED)),
                Inst::binary(Op::Gt, Inst::dynamic_get(MED), Inst::constant(Value::Int(100))),
            ),
            vec![Inst::static_set(PREF, Inst::constant(Value::Int(50)))],
            Some(vec![Inst::static_set(PREF, Inst::constant(Value::Int(200)))]),
        ),
        Inst::generate_complex(InstCode::ClistAdd, COMMUNITY, Inst::constant(Value::Pair(65000, 1))).unwrap(),
        Inst::die(Verdict::Accept),
    ]
}

fn bench_compile_execute(c: &mut Criterion) {
    let body = import_filter();
    let route = Route::new()
        .with_static(&NET, Value::Net("203.0.113.0/24".parse().unwrap()))
        .with_dynamic(&MED, Value::Int(150))
        .with_dynamic(&COMMUNITY, Value::clist([(65000, 2)]));

    c.bench_function("compile", |b| {
        b.iter(|| {
            let _ = Filter::compile("import", black_box(&body));
        })
    });
    let filter = Filter::compile("import", &body).unwrap();
    c.bench_function("execute", |b| {
        b.iter(|| {
            let mut route = route.clone();
            let _ = filter.run(&mut ExecContext::new(black_box(&mut route)));
        })
    });
}

criterion_group!(benches, bench_compile_execute);
criterion_main!(benches);
