//! Integration tests for the optimization pipeline.

use polyscop::prelude::*;
use polyscop::analysis::affinator::{Affinator, Location};
use polyscop::analysis::builder::ScopBuilder;
use polyscop::codegen::ForNode;
use polyscop::config::{ScopOptions, VectorizerKind};
use polyscop::ir::host::{ArrayDecl, BinOpKind, Operand, Pointer};
use polyscop::ir::scev::SymExpr;
use polyscop::transform::Stage;
use std::collections::BTreeSet;

fn scop_of(func: &HostFunction) -> Scop {
    let region = RegionDetector::new(func).detect_function().expect("region");
    let (mut scop, _) = build_scop(func, &region, &ScopOptions::default(), PolyCtx::unlimited());
    detect_reductions(&mut scop, func);
    scop
}

/// for (i = 0; i < N; i++) for (j = 0; j < M; j++) A[i][j] = A[i][j] + B[i];
fn scenario_a() -> HostFunction {
    let mut fb = FunctionBuilder::new("scenario_a");
    let n = fb.arg("N", 64);
    let m = fb.arg("M", 64);
    fb.array(ArrayDecl::new("A", vec![Some(n.clone()), Some(m.clone())]));
    fb.array(ArrayDecl::new("B", vec![Some(n.clone())]));
    let entry = fb.block("entry");
    let outer = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    let inner = fb.counted_loop("j", outer.body, SymExpr::constant(0), m);
    fb.switch_to(inner.body);
    let a = Pointer::new("A", vec![outer.iv.clone(), inner.iv.clone()]);
    let x = fb.load("x", a.clone());
    let y = fb.load("y", Pointer::new("B", vec![outer.iv.clone()]));
    let sum = fb.binop("sum", BinOpKind::Add, Operand::Inst(x), Operand::Inst(y));
    fb.store(a, Operand::Inst(sum));
    fb.br(inner.latch);
    fb.switch_to(inner.exit);
    fb.br(outer.latch);
    fb.switch_to(outer.exit);
    fb.ret();
    fb.build().unwrap()
}

/// for (i = 0; i < N; i++) S[i] = S[i - 1] + 1;
fn scenario_b() -> HostFunction {
    let mut fb = FunctionBuilder::new("scenario_b");
    let n = fb.arg("N", 64);
    fb.array(ArrayDecl::new("S", vec![None]));
    let entry = fb.block("entry");
    let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    let prev = SymExpr::add(l.iv.clone(), SymExpr::constant(-1)).with_nsw();
    let x = fb.load("x", Pointer::new("S", vec![prev]));
    let y = fb.binop("y", BinOpKind::Add, Operand::Inst(x), Operand::Const(1));
    fb.store(Pointer::new("S", vec![l.iv.clone()]), Operand::Inst(y));
    fb.br(l.latch);
    fb.switch_to(l.exit);
    fb.ret();
    fb.build().unwrap()
}

/// for (i = 0; i < N; i++) A[i + p] = 0; with A of size N
fn scenario_d() -> HostFunction {
    let mut fb = FunctionBuilder::new("scenario_d");
    let n = fb.arg("N", 64);
    let p = fb.arg("p", 64);
    fb.array(ArrayDecl::new("A", vec![Some(n.clone())]));
    let entry = fb.block("entry");
    let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    fb.store(Pointer::new("A", vec![SymExpr::add(l.iv.clone(), p).with_nsw()]), Operand::Const(0));
    fb.br(l.latch);
    fb.switch_to(l.exit);
    fb.ret();
    fb.build().unwrap()
}

/// s = A[0]; for (i = 0; i < N; i++) A[0] = A[0] + B[i];
fn sum_reduction() -> HostFunction {
    let mut fb = FunctionBuilder::new("sum");
    let n = fb.arg("N", 64);
    fb.array(ArrayDecl::new("A", vec![Some(SymExpr::constant(1))]));
    fb.array(ArrayDecl::new("B", vec![None]));
    let entry = fb.block("entry");
    let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    let acc = fb.load("acc", Pointer::new("A", vec![SymExpr::constant(0)]));
    let b = fb.load("b", Pointer::new("B", vec![l.iv.clone()]));
    let next = fb.binop("next", BinOpKind::Add, Operand::Inst(acc), Operand::Inst(b));
    fb.store(Pointer::new("A", vec![SymExpr::constant(0)]), Operand::Inst(next));
    fb.br(l.latch);
    fb.switch_to(l.exit);
    fb.ret();
    fb.build().unwrap()
}

const MATMUL: &str = r#"{
    "name": "matmul",
    "context": "[N] -> { : 0 <= N <= 1024 }",
    "statements": [{
        "name": "Stmt_body",
        "domain": "[N] -> { Stmt_body[i, j, k] : 0 <= i < N and 0 <= j < N and 0 <= k < N }",
        "schedule": "[N] -> { Stmt_body[i, j, k] -> [i, j, k] }",
        "accesses": [
            { "kind": "read", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_C[i, j] }" },
            { "kind": "read", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_A[i, k] }" },
            { "kind": "read", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_B[k, j] }" },
            { "kind": "write", "relation": "[N] -> { Stmt_body[i, j, k] -> MemRef_C[i, j] }" }
        ]
    }]
}"#;

fn lex_less(a: &[i64], b: &[i64]) -> bool {
    for (x, y) in a.iter().zip(b) {
        if x != y {
            return x < y;
        }
    }
    false
}

fn first_loop(ast: &Ast) -> &ForNode {
    ast.loops()[0]
}

#[test]
fn test_scenario_a_outer_loop_parallel() {
    let func = scenario_a();
    let scop = scop_of(&func);
    let mut deps = Dependences::new(&Config::default().dependence);
    deps.ensure(&scop).unwrap();
    let validity = deps.get(DepKinds::VALIDITY).unwrap();
    // each instance reads and writes only its own element
    assert!(validity.is_empty());
    let schedule = scop.schedule_map();
    assert!(deps.is_parallel(&schedule, 1, DepKinds::VALIDITY).unwrap());

    let (_, result) = Pipeline::default_pipeline().with_unmodified_codegen(true).run_function(&func).unwrap();
    let ast = result.ast.unwrap();
    let outer = first_loop(&ast);
    assert!(outer.annotation.parallel);
    assert!(outer.annotation.outermost_parallel);
    assert_eq!(ast.loops().iter().filter(|l| l.annotation.outermost_parallel).count(), 1);
}

#[test]
fn test_scenario_b_recurrence_stays_sequential() {
    let func = scenario_b();
    let scop = scop_of(&func);
    let mut deps = Dependences::new(&Config::default().dependence);
    deps.ensure(&scop).unwrap();
    let raw = deps.get(DepKinds::RAW).unwrap();
    let map = raw.get("Stmt_i_body", "Stmt_i_body").unwrap();
    // [N, i, i']
    assert!(map.contains(&[10, 3, 4]));
    assert!(!map.contains(&[10, 3, 5]));
    let schedule = scop.schedule_map();
    assert!(!deps.is_parallel(&schedule, 1, DepKinds::VALIDITY).unwrap());
    assert_eq!(deps.minimal_dependence_distance(&schedule, 1).unwrap(), Some(1));

    let (optimized, result) = Pipeline::default_pipeline().with_unmodified_codegen(true).run_function(&func).unwrap();
    let ast = result.ast.unwrap();
    let lp = first_loop(&ast);
    assert!(!lp.annotation.parallel);
    assert_eq!(lp.annotation.min_dependence_distance, Some(1));
    let code = emit(&ast, &optimized, CEmitter::new(), false).unwrap();
    assert!(code.contains("#pragma minimal dependence distance: 1"));
    assert!(!code.contains("omp parallel"));
}

#[test]
fn test_scenario_c_wrapping_depends_on_nsw() {
    let mut fb = FunctionBuilder::new("scenario_c");
    let n = fb.arg("N", 32);
    fb.array(ArrayDecl::new("A", vec![None]));
    let entry = fb.block("entry");
    let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    fb.store(Pointer::new("A", vec![SymExpr::induction(l.header)]), Operand::Const(0));
    fb.br(l.latch);
    fb.switch_to(l.exit);
    fb.ret();
    let func = fb.build().unwrap();

    let header = l.header;
    let loops = [header];
    let domain = parse_set("[N] -> { [i] : 0 <= i < N }").unwrap();
    let iv = SymExpr::addrec(SymExpr::constant(0).with_bits(32), SymExpr::constant(1).with_bits(32), header).with_nsw();
    let times_four = SymExpr::mul(SymExpr::constant(4).with_bits(32), iv);

    let translate = |expr: &SymExpr| {
        let mut scop = Scop::new("c", PolyCtx::unlimited());
        scop.add_parameter("N", Some(SymExpr::arg("N")), 32);
        let mut aff = Affinator::new(&func, BTreeSet::new());
        assert!(aff.translate(&mut scop, expr, Location::new(&loops).at(header, &domain)).is_affine());
        scop
    };
    let flagged = translate(&times_four.clone().with_nsw());
    assert!(!flagged.assumptions.iter().any(|a| a.kind == AssumptionKind::Wrapping));
    let unflagged = translate(&times_four);
    assert!(unflagged.assumptions.iter().any(|a| a.kind == AssumptionKind::Wrapping));
}

#[test]
fn test_scenario_d_bounds_restrict_parameter() {
    let func = scenario_d();
    let mut scop = scop_of(&func);
    assert!(scop.assumptions.iter().any(|a| a.kind == AssumptionKind::InBounds));
    simplify(&mut scop, Some(&func));
    let rc = scop.run_condition();
    // [N, p]
    assert!(rc.contains(&[10, 0]));
    assert!(!rc.contains(&[10, 1]));
    assert!(!rc.contains(&[10, -1]));
    let restriction = parse_set("[N, p] -> { : p = 0 or N <= 0 }").unwrap();
    assert!(rc.is_subset(&restriction));
}

#[test]
fn test_scenario_e_invariant_loads_share_a_class() {
    // for (i = 0; i < N; i++) A[i] = *P; for (j = 0; j < M; j++) B[j] = *P;
    let mut fb = FunctionBuilder::new("scenario_e");
    let n = fb.arg("N", 64);
    let m = fb.arg("M", 64);
    fb.array(ArrayDecl::new("P", vec![Some(SymExpr::constant(1))]));
    fb.array(ArrayDecl::new("A", vec![None]));
    fb.array(ArrayDecl::new("B", vec![None]));
    let entry = fb.block("entry");
    let first = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    let v0 = fb.load("v0", Pointer::new("P", vec![SymExpr::constant(0)]));
    fb.store(Pointer::new("A", vec![first.iv.clone()]), Operand::Inst(v0));
    fb.br(first.latch);
    fb.switch_to(first.exit);
    let second = fb.counted_loop("j", first.exit, SymExpr::constant(0), m);
    let v1 = fb.load("v1", Pointer::new("P", vec![SymExpr::constant(0)]));
    fb.store(Pointer::new("B", vec![second.iv.clone()]), Operand::Inst(v1));
    fb.br(second.latch);
    fb.switch_to(second.exit);
    fb.ret();
    let func = fb.build().unwrap();

    let scop = scop_of(&func);
    assert_eq!(scop.invariant_classes.len(), 1);
    let class = &scop.invariant_classes[0];
    assert_eq!(class.members, vec![v0, v1]);
    let a = scop.stmt_by_name("Stmt_i_body").unwrap();
    let b = scop.stmt_by_name("Stmt_j_body").unwrap();
    let both = a.domain.params().union(&b.domain.params());
    assert!(class.execution_context.is_equal(&both));
    assert!(class.execution_context.contains(&[1, 0]));
    assert!(class.execution_context.contains(&[0, 1]));
    assert!(!class.execution_context.contains(&[0, 0]));
}

#[test]
fn test_domain_monotonicity_and_idempotent_restriction() {
    let func = scenario_a();
    let region = RegionDetector::new(&func).detect_function().unwrap();
    let options = ScopOptions::default();
    let mut builder = ScopBuilder::new(&func, &region, &options, PolyCtx::unlimited());
    builder.build_domains();
    for b in region.blocks.iter().copied() {
        if let (Some(push), Some(pull)) = (builder.push_domain(b), builder.domain(b)) {
            assert!(pull.is_subset(push), "{}", func.block(b).name);
        }
    }

    let mut scop = scop_of(&func);
    let restriction = parse_set("[N, M] -> { Stmt_j_body[i, j] : i <= 5 }").unwrap();
    let idx = scop.statements.iter().position(|s| s.name == "Stmt_j_body").unwrap();
    let stmt = &mut scop.statements[idx];
    stmt.restrict_domain(&restriction);
    let once = stmt.domain.clone();
    stmt.restrict_domain(&restriction);
    assert!(stmt.domain.is_equal(&once));
}

#[test]
fn test_optimized_schedule_respects_dependences() {
    let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
    let mut deps = Dependences::new(&Config::default().dependence);
    deps.ensure(&scop).unwrap();
    let validity = deps.get(DepKinds::VALIDITY).unwrap();
    assert!(optimize_scop(&mut scop, &mut deps, &Config::default()).is_optimized());

    let n3 = parse_set("[N] -> { : N = 3 }").unwrap();
    let schedule = scop.schedule_map();
    let sched = schedule.maps()[0].intersect_params(&n3);
    let time_of = |point: &[i64]| -> Vec<i64> {
        let mut m = sched.clone();
        for (d, v) in point.iter().enumerate() {
            m = m.fix_in(d, *v);
        }
        let points = m.points(4).unwrap();
        assert_eq!(points.len(), 1);
        points[0][1 + point.len()..].to_vec()
    };
    let mut checked = 0;
    for dep in validity.maps() {
        for pair in dep.intersect_params(&n3).points(10_000).unwrap() {
            let src = &pair[1..4];
            let dst = &pair[4..7];
            assert!(lex_less(&time_of(src), &time_of(dst)), "{:?} -> {:?}", src, dst);
            checked += 1;
        }
    }
    assert!(checked > 0);
}

#[test]
fn test_access_relation_reproduces_array_sizes() {
    let func = scenario_a();
    let scop = scop_of(&func);
    let stmt = scop.stmt_by_name("Stmt_j_body").unwrap();
    let write = stmt.writes().next().unwrap();
    let sizes = parse_set("[N, M] -> { : N = 7 and M = 5 }").unwrap();
    let elements = write.relation.intersect_domain(&stmt.domain).intersect_params(&sizes).range();
    // [N, M | d0, d1]
    assert_eq!(elements.col_extrema(2), (Some(0), Some(6)));
    assert_eq!(elements.col_extrema(3), (Some(0), Some(4)));
    let array = scop.array_by_name("MemRef_A").unwrap();
    assert_eq!(array.n_dims(), 2);
}

#[test]
fn test_simplification_is_idempotent() {
    // for (i = 0; i < N; i++) { A[i] = 1; A[i] = 1; x = B[i]; B[i] = x; }
    let mut fb = FunctionBuilder::new("redundant");
    let n = fb.arg("N", 64);
    fb.array(ArrayDecl::new("A", vec![None]));
    fb.array(ArrayDecl::new("B", vec![None]));
    let entry = fb.block("entry");
    let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
    fb.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(1));
    fb.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(1));
    let x = fb.load("x", Pointer::new("B", vec![l.iv.clone()]));
    fb.store(Pointer::new("B", vec![l.iv.clone()]), Operand::Inst(x));
    fb.br(l.latch);
    fb.switch_to(l.exit);
    fb.ret();
    let func = fb.build().unwrap();

    let mut scop = scop_of(&func);
    let first = simplify(&mut scop, Some(&func));
    assert!(first.changed());
    let accesses: usize = scop.statements.iter().map(|s| s.accesses.len()).sum();
    let second = simplify(&mut scop, Some(&func));
    assert!(!second.changed());
    assert_eq!(scop.statements.iter().map(|s| s.accesses.len()).sum::<usize>(), accesses);
}

#[test]
fn test_reduction_detection_is_deterministic() {
    let func = sum_reduction();
    let marks = |scop: &Scop| -> Vec<(String, String)> {
        scop.statements
            .iter()
            .flat_map(|s| s.accesses.iter().filter(|a| a.is_reduction_like()).map(move |a| (s.name.clone(), a.array_name().to_string())))
            .collect()
    };
    let first = scop_of(&func);
    let second = scop_of(&func);
    assert_eq!(marks(&first).len(), 2);
    assert_eq!(marks(&first), marks(&second));

    let mut again = first.clone();
    detect_reductions(&mut again, &func);
    assert_eq!(marks(&again), marks(&first));

    let mut deps = Dependences::new(&Config::default().dependence);
    deps.ensure(&first).unwrap();
    let schedule = first.schedule_map();
    assert!(deps.is_parallel(&schedule, 1, DepKinds::VALIDITY).unwrap());
    assert!(!deps.is_parallel(&schedule, 1, DepKinds::TC_RED).unwrap());
}

#[test]
fn test_jscop_export_import_round_trip() {
    let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
    quick_optimize_and_check(&mut scop);
    let text = export_jscop(&scop).unwrap();
    // the tiled schedule uses divisions and is reported, not imported
    let (reloaded, _) = scop_from_jscop(&text).unwrap();
    assert_eq!(reloaded.statements.len(), 1);
    assert!(reloaded.domains().is_equal(&scop.domains()));
    assert!(reloaded.accesses().is_equal(&scop.accesses()));

    let (mut fresh, _) = scop_from_jscop(MATMUL).unwrap();
    let mut doc = JscopDocument::parse(&text).unwrap();
    doc.statements[0].accesses[1].relation = "[N] -> { Stmt_body[i, j, k] -> MemRef_A[k, i] }".to_string();
    let result = Pipeline::default_pipeline().with_import(doc).run(&mut fresh, None).unwrap();
    assert!(result.modified);
    let read = &fresh.statements[0].accesses[1];
    assert!(read.latest_relation().contains(&[8, 1, 2, 3, 3, 1]));
}

fn quick_optimize_and_check(scop: &mut Scop) {
    let result = polyscop::transform::quick_optimize(scop).unwrap();
    assert!(result.outcome.is_optimized());
}

#[test]
fn test_mismatched_import_is_reported() {
    let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
    let original = scop.schedule_map();
    let mut doc = JscopDocument::from_scop(&scop);
    doc.statements[0].name = "Stmt_other".to_string();
    let result = Pipeline::default_pipeline().with_import(doc).run(&mut scop, None).unwrap();
    assert_eq!(result.diagnostics.len(), 1);
    assert!(result.diagnostics[0].message.contains("do not match"));
    assert!(result.has_stage(Stage::Import));
    // the optimizer still runs on the region
    assert_eq!(result.modified, !scop.schedule_map().is_equal(&original));
}

#[test]
fn test_run_time_check_guards_optimized_code() {
    let func = scenario_d();
    let (scop, result) = Pipeline::default_pipeline().with_unmodified_codegen(true).run_function(&func).unwrap();
    let ast = result.ast.unwrap();
    assert!(ast.run_condition.is_some());
    let code = emit(&ast, &scop, CEmitter::new(), true).unwrap();
    assert!(code.starts_with("// scenario_d"));
    assert!(code.contains("if ("));
    assert!(code.contains("/* original code */"));
    let unchecked = emit(&ast, &scop, CEmitter::new(), false).unwrap();
    assert!(!unchecked.contains("/* original code */"));
}

#[test]
fn test_infeasible_region_keeps_original_code() {
    let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
    scop.invalidate(AssumptionKind::Complexity, None);
    assert!(scop.is_infeasible());
    let result = Pipeline::default_pipeline().with_unmodified_codegen(true).run(&mut scop, None).unwrap();
    assert!(result.ast.is_none());
    assert!(!result.modified);
}

const COPY: &str = r#"{
    "name": "copy",
    "statements": [{
        "name": "Stmt_copy",
        "domain": "{ Stmt_copy[i, j] : 0 <= i < 64 and 0 <= j < 128 }",
        "schedule": "{ Stmt_copy[i, j] -> [i, j] }",
        "accesses": [
            { "kind": "read", "relation": "{ Stmt_copy[i, j] -> MemRef_B[j, i] }" },
            { "kind": "write", "relation": "{ Stmt_copy[i, j] -> MemRef_A[i, j] }" }
        ]
    }]
}"#;

#[test]
fn test_prevectorization_and_emission() {
    let (mut scop, _) = scop_from_jscop(COPY).unwrap();
    let mut config = Config::default();
    config.vectorizer = VectorizerKind::Polly;
    let result = Pipeline::new(config).run(&mut scop, None).unwrap();
    let ast = result.ast.unwrap();
    let widths: Vec<i64> = ast.loops().iter().filter_map(|l| l.annotation.vector_width).collect();
    assert_eq!(widths, vec![4]);
    let code = emit(&ast, &scop, CEmitter::new(), false).unwrap();
    assert!(code.contains("#pragma simd vectorlength(4)"));
    assert!(code.contains("#pragma omp parallel for"));
}

#[test]
fn test_invalid_options_fall_back() {
    let raw = RawOptions {
        fusion: Some("sideways".to_string()),
        tile_sizes: Some(vec![8, 8]),
        ..Default::default()
    };
    let (config, diags) = Config::from_raw(&raw);
    assert_eq!(diags.len(), 1);
    let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
    let result = Pipeline::new(config).run(&mut scop, None).unwrap();
    assert!(result.outcome.is_optimized());
    let ast = result.ast.unwrap();
    // tile loops step over tiles of 8 iterations
    assert!(ast.loops()[0].upper.to_string().contains('8'));
}
