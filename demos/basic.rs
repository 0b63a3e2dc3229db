use routefilter::*;
use std::sync::Arc;

const PREF: StaticAttr = StaticAttr::new(FilterType::Int, 1, false);
const NET: StaticAttr = StaticAttr::new(FilterType::Net, 3, true);
const AS_PATH: DynamicAttr = DynamicAttr::new(EaType::AsPath, 0, FilterType::Path, 2);

fn main() -> Result<(), FilterError> {
    // 1. Build the instruction tree for:
    //    if net ~ [ 10.0.0.0/8+ ] then reject "bogon";
    //    bgp_path.prepend(65000);
    //    if bgp_path.len > 3 then preference = 50;
    //    accept;
    let bogons = PrefixSet::new([PrefixPattern::or_longer("10.0.0.0/8".parse::<Prefix>()?)]);
    let body = vec![
        Inst::condition(
            Inst::binary(Op::Match, Inst::static_get(NET), Inst::constant(Value::PrefixSet(Arc::new(bogons)))),
            vec![Inst::print_and_die(Some(Verdict::Reject), vec![Inst::constant(Value::string("bogon"))])],
            None,
        ),
        Inst::generate_complex(InstCode::PathPrepend, AS_PATH, Inst::constant(Value::Int(65000)))
            .expect("prepend is a list modifier"),
        Inst::condition(
            Inst::binary(Op::Gt, Inst::unary(Op::Length, Inst::dynamic_get(AS_PATH)), Inst::constant(Value::Int(3))),
            vec![Inst::static_set(PREF, Inst::constant(Value::Int(50)))],
            None,
        ),
        Inst::die(Verdict::Accept),
    ];

    // 2. Compile it
    let filter = Filter::compile("import", &body)?;
    println!("{}", filter);

    // 3. Run it on a couple of routes
    for (prefix, path) in [("10.1.0.0/16", vec![64500]), ("203.0.113.0/24", vec![64500, 64501, 64502])] {
        let mut route = Route::new()
            .with_static(&NET, Value::Net(prefix.parse()?))
            .with_static(&PREF, Value::Int(100))
            .with_dynamic(&AS_PATH, Value::path(path));
        let outcome = filter.run(&mut ExecContext::new(&mut route));
        println!("{}: {} {:?}", prefix, outcome.verdict, outcome.messages);
        println!("  preference = {:?}", route.static_value(PREF.code));
    }
    Ok(())
}
