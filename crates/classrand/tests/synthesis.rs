use classrand::ir::dtype::int_to_bits;
use classrand::ir::{BinaryOp, ClassId, DType, ExprId, ModuleId, Stmt, VarId};
use classrand::{Diagnostics, Netlist, Simulator, SimulatorOptions, Value, randomize_netlist};
use num_bigint::BigInt;

fn handle_var(nl: &mut Netlist, module: ModuleId, class: ClassId, name: &str) -> VarId {
    let handle = nl.dtypes.add(DType::ClassRef(class));
    nl.add_module_var(module, name, handle)
}

fn call_randomize(nl: &mut Netlist, module: ModuleId, obj: VarId, args: Vec<ExprId>) -> ExprId {
    let from = nl.var_ref(obj);
    let call = nl.method_call(from, "randomize", args);
    nl.add_initial(module, Stmt::Expr(call));
    call
}

fn cmp(nl: &mut Netlist, var: VarId, op: BinaryOp, value: i64) -> ExprId {
    let dtype = nl.var(var).dtype;
    let width = nl.dtypes.width(dtype);
    let lhs = nl.var_ref(var);
    let rhs = nl.const_value(dtype, int_to_bits(&BigInt::from(value), width));
    nl.binary(op, lhs, rhs)
}

fn and(nl: &mut Netlist, lhs: ExprId, rhs: ExprId) -> ExprId {
    nl.binary(BinaryOp::LogAnd, lhs, rhs)
}

fn field(sim: &Simulator, obj: classrand::ObjectId, name: &str) -> i64 {
    i64::try_from(&sim.get_int(obj, name).unwrap()).unwrap()
}

fn run_pass(nl: &mut Netlist) -> classrand::RandomizeSummary {
    let mut diag = Diagnostics::new();
    let summary = randomize_netlist(nl, &mut diag).unwrap();
    assert!(diag.is_empty(), "{:?}", diag.iter().collect::<Vec<_>>());
    summary
}

/// `class Packet; rand bit [7:0] len; constraint c { len > 10; len <= 20; } endclass`
fn packet(nl: &mut Netlist) -> (ClassId, VarId) {
    let class = nl.add_class("Packet", None);
    let u8t = nl.dtypes.basic(8, false);
    let len = nl.add_member_var(class, "len", u8t, true);
    let gt = cmp(nl, len, BinaryOp::GtU, 10);
    let le = cmp(nl, len, BinaryOp::LteU, 20);
    nl.add_constraint(class, "c_len", vec![gt, le]);
    (class, len)
}

#[test]
fn test_packet_len_stays_in_bounds() {
    let mut nl = Netlist::new();
    let (packet, _) = packet(&mut nl);
    let top = nl.add_module("top");
    let p = handle_var(&mut nl, top, packet, "p");
    call_randomize(&mut nl, top, p, vec![]);

    let summary = run_pass(&mut nl);
    assert_eq!(summary.marked, vec![packet]);
    assert_eq!(summary.methods.len(), 1);
    assert!(summary.helpers.is_empty());

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(packet);
    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..500 {
        assert_eq!(sim.randomize(obj).unwrap(), 1);
        let len = field(&sim, obj, "len");
        assert!((11..=20).contains(&len), "len = {len}");
        seen.insert(len);
    }
    assert_eq!(seen.len(), 10);
}

#[test]
fn test_composed_member_is_randomized() {
    let mut nl = Netlist::new();
    let (packet, _) = packet(&mut nl);
    let frame = nl.add_class("Frame", None);
    let packet_handle = nl.dtypes.add(DType::ClassRef(packet));
    nl.add_member_var(frame, "p", packet_handle, true);
    let u4 = nl.dtypes.basic(4, false);
    nl.add_member_var(frame, "id", u4, true);
    let top = nl.add_module("top");
    let f = handle_var(&mut nl, top, frame, "f");
    call_randomize(&mut nl, top, f, vec![]);

    let summary = run_pass(&mut nl);
    assert_eq!(summary.marked, vec![packet, frame]);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let f = sim.new_object(frame);
    let p = sim.new_object(packet);
    sim.set_handle(f, "p", Some(p)).unwrap();
    for _ in 0..100 {
        assert_eq!(sim.randomize(f).unwrap(), 1);
        assert!((11..=20).contains(&field(&sim, p, "len")));
    }
}

#[test]
fn test_composed_failure_propagates() {
    let mut nl = Netlist::new();
    let inner = nl.add_class("Inner", None);
    let u8t = nl.dtypes.basic(8, false);
    let x = nl.add_member_var(inner, "x", u8t, true);
    let gt = cmp(&mut nl, x, BinaryOp::GtU, 10);
    let lt = cmp(&mut nl, x, BinaryOp::LtU, 5);
    let cond = and(&mut nl, gt, lt);
    nl.add_constraint(inner, "never", vec![cond]);
    let outer = nl.add_class("Outer", None);
    let inner_handle = nl.dtypes.add(DType::ClassRef(inner));
    nl.add_member_var(outer, "inner", inner_handle, true);
    let top = nl.add_module("top");
    let o = handle_var(&mut nl, top, outer, "o");
    call_randomize(&mut nl, top, o, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let o = sim.new_object(outer);
    let i = sim.new_object(inner);
    sim.set_handle(o, "inner", Some(i)).unwrap();
    assert_eq!(sim.randomize(i).unwrap(), 0);
    assert_eq!(sim.randomize(o).unwrap(), 0);
}

#[test]
fn test_inline_constraints_use_a_helper() {
    let mut nl = Netlist::new();
    let (packet, len) = packet(&mut nl);
    let top = nl.add_module("top");
    let p = handle_var(&mut nl, top, packet, "p");
    let int = nl.dtypes.int();
    let ok = nl.add_module_var(top, "ok", int);
    let inline = cmp(&mut nl, len, BinaryOp::LtU, 15);
    let from = nl.var_ref(p);
    let call = nl.method_call(from, "randomize", vec![inline]);
    let lhs = nl.var_ref(ok);
    nl.add_initial(top, Stmt::Assign { lhs, rhs: call });

    let summary = run_pass(&mut nl);
    assert_eq!(summary.helpers.len(), 1);
    let helper = summary.helpers[0];
    assert_eq!(nl.func(helper).name, "__Vrandomize0");
    let method = nl.find_member_func(packet, "randomize").unwrap();
    assert_ne!(method, helper);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(packet);
    sim.set_var(p, Value::Handle(Some(obj)));
    for _ in 0..200 {
        sim.run_initial(top).unwrap();
        assert_eq!(sim.var_value(ok).unwrap(), Value::Bits(1u32.into()));
        assert!((11..=14).contains(&field(&sim, obj, "len")));
    }

    // The class method keeps the class constraints only.
    let mut above = false;
    for _ in 0..200 {
        assert_eq!(sim.randomize(obj).unwrap(), 1);
        let len = field(&sim, obj, "len");
        assert!((11..=20).contains(&len));
        above |= len >= 15;
    }
    assert!(above);
}

#[test]
fn test_inline_call_inside_class_method_attaches_helper_to_class() {
    let mut nl = Netlist::new();
    let (packet, len) = packet(&mut nl);
    let driver = nl.add_class("Driver", None);
    let packet_handle = nl.dtypes.add(DType::ClassRef(packet));
    let pkt = nl.add_member_var(driver, "pkt", packet_handle, false);
    let int = nl.dtypes.int();
    let send = nl.add_func("send", classrand::ir::FuncOwner::Class(driver), int);
    let inline = cmp(&mut nl, len, BinaryOp::Eq, 12);
    let from = nl.var_ref(pkt);
    let call = nl.method_call(from, "randomize", vec![inline]);
    let ret = nl.func(send).return_var;
    let lhs = nl.var_ref(ret);
    nl.push_stmt(send, Stmt::Assign { lhs, rhs: call });

    let summary = run_pass(&mut nl);
    let helper = summary.helpers[0];
    assert_eq!(
        nl.func(helper).owner,
        classrand::ir::FuncOwner::Class(driver)
    );
    assert!(nl.func(helper).class_method);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let d = sim.new_object(driver);
    let p = sim.new_object(packet);
    sim.set_handle(d, "pkt", Some(p)).unwrap();
    let result = sim.call_function(send, Some(d), vec![]).unwrap();
    assert_eq!(result, Value::Bits(1u32.into()));
    assert_eq!(field(&sim, p, "len"), 12);
}

#[test]
fn test_derived_randomize_covers_base_members() {
    let mut nl = Netlist::new();
    let base = nl.add_class("Base", None);
    let u8t = nl.dtypes.basic(8, false);
    let a = nl.add_member_var(base, "a", u8t, true);
    let a_lt = cmp(&mut nl, a, BinaryOp::LtU, 10);
    nl.add_constraint(base, "c_a", vec![a_lt]);
    let derived = nl.add_class("Derived", Some(base));
    let b = nl.add_member_var(derived, "b", u8t, true);
    let b_gt = cmp(&mut nl, b, BinaryOp::GtU, 200);
    nl.add_constraint(derived, "c_b", vec![b_gt]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, base, "h");
    call_randomize(&mut nl, top, h, vec![]);

    let summary = run_pass(&mut nl);
    assert_eq!(summary.marked, vec![base, derived]);
    let base_method = nl.find_member_func(base, "randomize").unwrap();
    let derived_method = nl.find_member_func(derived, "randomize").unwrap();
    assert!(nl.func(base_method).is_virtual);
    assert!(nl.func(derived_method).is_virtual);

    // The call through the base handle dispatches to the derived method.
    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(derived);
    sim.set_var(h, Value::Handle(Some(obj)));
    for _ in 0..100 {
        sim.run_initial(top).unwrap();
        assert!(field(&sim, obj, "a") < 10);
        assert!(field(&sim, obj, "b") > 200);
    }
}

#[test]
fn test_unsatisfiable_constraint_returns_zero() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let u8t = nl.dtypes.basic(8, false);
    let x = nl.add_member_var(class, "x", u8t, true);
    let gt = cmp(&mut nl, x, BinaryOp::GtU, 10);
    let lt = cmp(&mut nl, x, BinaryOp::LtU, 5);
    nl.add_constraint(class, "never", vec![gt, lt]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    assert_eq!(sim.randomize(obj).unwrap(), 0);
}

#[test]
fn test_lower_bound_only() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let u8t = nl.dtypes.basic(8, false);
    let x = nl.add_member_var(class, "x", u8t, true);
    let gt = cmp(&mut nl, x, BinaryOp::GtU, 250);
    nl.add_constraint(class, "high", vec![gt]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    for _ in 0..100 {
        assert_eq!(sim.randomize(obj).unwrap(), 1);
        assert!((251..=255).contains(&field(&sim, obj, "x")));
    }
}

#[test]
fn test_wide_field_above_64_bits() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let u100 = nl.dtypes.basic(100, false);
    let x = nl.add_member_var(class, "x", u100, true);
    let threshold = BigInt::from(1) << 80;
    let lhs = nl.var_ref(x);
    let rhs = nl.const_value(u100, int_to_bits(&threshold, 100));
    let gt = nl.binary(BinaryOp::GtU, lhs, rhs);
    nl.add_constraint(class, "big", vec![gt]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    for _ in 0..100 {
        assert_eq!(sim.randomize(obj).unwrap(), 1);
        let value = sim.get_int(obj, "x").unwrap();
        assert!(value > threshold);
        assert!(value < (BigInt::from(1) << 100));
    }
}

#[test]
fn test_signed_negative_bounds() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let s8 = nl.dtypes.basic(8, true);
    let x = nl.add_member_var(class, "x", s8, true);
    let ge = cmp(&mut nl, x, BinaryOp::GteS, -10);
    let le = cmp(&mut nl, x, BinaryOp::LteS, -3);
    nl.add_constraint(class, "neg", vec![ge, le]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    for _ in 0..200 {
        assert_eq!(sim.randomize(obj).unwrap(), 1);
        assert!((-10..=-3).contains(&field(&sim, obj, "x")));
    }
}

#[test]
fn test_disjunction_draws_from_each_branch() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let u8t = nl.dtypes.basic(8, false);
    let x = nl.add_member_var(class, "x", u8t, true);
    let one = cmp(&mut nl, x, BinaryOp::Eq, 1);
    let two = cmp(&mut nl, x, BinaryOp::Eq, 2);
    let cond = nl.binary(BinaryOp::LogOr, one, two);
    nl.add_constraint(class, "pick", vec![cond]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let method = nl.find_member_func(class, "randomize").unwrap();
    assert_eq!(nl.var(nl.func(method).locals[0]).name, "__Vtemp_randomize0");

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    let mut seen = std::collections::BTreeSet::new();
    for _ in 0..100 {
        assert_eq!(sim.randomize(obj).unwrap(), 1);
        seen.insert(field(&sim, obj, "x"));
    }
    assert_eq!(seen.into_iter().collect::<Vec<_>>(), vec![1, 2]);
}

#[test]
fn test_non_rand_target_is_checked_only() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let u8t = nl.dtypes.basic(8, false);
    let y = nl.add_member_var(class, "y", u8t, false);
    let gt = cmp(&mut nl, y, BinaryOp::GtU, 5);
    nl.add_constraint(class, "state", vec![gt]);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    assert_eq!(sim.randomize(obj).unwrap(), 0);
    sim.set_int(obj, "y", 9).unwrap();
    assert_eq!(sim.randomize(obj).unwrap(), 1);
    assert_eq!(field(&sim, obj, "y"), 9);
}

#[test]
fn test_marked_class_without_rand_members_returns_one() {
    let mut nl = Netlist::new();
    let class = nl.add_class("Empty", None);
    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    call_randomize(&mut nl, top, h, vec![]);
    run_pass(&mut nl);

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    assert_eq!(sim.randomize(obj).unwrap(), 1);
}

#[test]
fn test_inline_or_picks_a_disjunct_inside_the_helper() {
    let mut nl = Netlist::new();
    let class = nl.add_class("C", None);
    let u8t = nl.dtypes.basic(8, false);
    let x = nl.add_member_var(class, "x", u8t, true);

    let top = nl.add_module("top");
    let h = handle_var(&mut nl, top, class, "h");
    let int = nl.dtypes.int();
    let ok = nl.add_module_var(top, "ok", int);
    let five = cmp(&mut nl, x, BinaryOp::Eq, 5);
    let high = cmp(&mut nl, x, BinaryOp::GtU, 100);
    let either = nl.binary(BinaryOp::LogOr, five, high);
    let from = nl.var_ref(h);
    let call = nl.method_call(from, "randomize", vec![either]);
    let lhs = nl.var_ref(ok);
    nl.add_initial(top, Stmt::Assign { lhs, rhs: call });

    let other = nl.add_module("other");
    let g = handle_var(&mut nl, other, class, "g");
    call_randomize(&mut nl, other, g, vec![]);

    let summary = run_pass(&mut nl);
    assert_eq!(summary.helpers.len(), 1);
    let helper = summary.helpers[0];
    let locals = &nl.func(helper).locals;
    assert_eq!(locals.len(), 1);
    assert_eq!(nl.var(locals[0]).name, "__Vtemp_randomize0");
    let method = nl.find_member_func(class, "randomize").unwrap();
    assert!(nl.func(method).locals.is_empty());

    let mut sim = Simulator::new(&nl, SimulatorOptions::default());
    let obj = sim.new_object(class);
    sim.set_var(h, Value::Handle(Some(obj)));
    sim.set_var(g, Value::Handle(Some(obj)));
    let (mut saw_five, mut saw_high) = (false, false);
    for _ in 0..200 {
        sim.run_initial(top).unwrap();
        assert_eq!(sim.var_value(ok).unwrap(), Value::Bits(1u32.into()));
        let x = field(&sim, obj, "x");
        assert!(x == 5 || x > 100, "x = {x}");
        saw_five |= x == 5;
        saw_high |= x > 100;
    }
    assert!(saw_five && saw_high);

    // The plain call is unconstrained.
    let mut between = false;
    for _ in 0..200 {
        sim.run_initial(other).unwrap();
        between |= (6..=100).contains(&field(&sim, obj, "x"));
    }
    assert!(between);
}
