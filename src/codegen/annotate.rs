//! Parallelism and vectorization facts of generated loops.

use crate::analysis::dependence::{DepKinds, Dependences};
use crate::codegen::{Ast, AstNode, ForNode, LoopAnnotation};
use crate::config::CodegenOptions;
use crate::ir::pir::{ReductionType, Scop};
use crate::polyhedral::UnionMap;
use crate::utils::errors::DependenceError;
use log::debug;
use std::collections::BTreeSet;

struct Annotator<'a> {
    scop: &'a Scop,
    deps: &'a Dependences,
    options: &'a CodegenOptions,
    flat: UnionMap,
}

/// Annotate every loop of `ast` with what the dependences allow.
pub fn annotate(ast: &mut Ast, scop: &Scop, deps: &mut Dependences, options: &CodegenOptions) -> Result<(), DependenceError> {
    deps.ensure(scop)?;
    let annotator = Annotator { scop, deps, options, flat: scop.schedule_map() };
    annotator.node(&mut ast.root, false)
}

impl Annotator<'_> {
    fn node(&self, node: &mut AstNode, in_parallel: bool) -> Result<(), DependenceError> {
        match node {
            AstNode::For(f) => {
                f.annotation = self.annotate_loop(f, in_parallel)?;
                let inner = in_parallel || f.annotation.outermost_parallel;
                self.node(&mut f.body, inner)
            }
            AstNode::If { then, .. } => self.node(then, in_parallel),
            AstNode::Block(children) => {
                for c in children.iter_mut() {
                    self.node(c, in_parallel)?;
                }
                Ok(())
            }
            AstNode::Mark { child, .. } => self.node(child, in_parallel),
            AstNode::User { .. } => Ok(()),
        }
    }

    fn annotate_loop(&self, f: &ForNode, in_parallel: bool) -> Result<LoopAnnotation, DependenceError> {
        let stmts: BTreeSet<String> = f.body.statements().into_iter().collect();
        let mut schedule = UnionMap::empty();
        for map in self.flat.maps() {
            if map.in_name().map_or(false, |n| stmts.contains(n)) {
                schedule.add(map.clone());
            }
        }
        let level = f.level;
        let parallel = self.deps.is_parallel(&schedule, level, DepKinds::VALIDITY)?;
        let reduction_parallel = parallel && !self.deps.is_parallel(&schedule, level, DepKinds::TC_RED)?;
        let innermost = !f.body.contains_loop();
        let mut annotation = LoopAnnotation {
            innermost,
            parallel,
            innermost_parallel: innermost && parallel,
            outermost_parallel: parallel && !reduction_parallel && !in_parallel,
            reduction_parallel,
            ..LoopAnnotation::default()
        };
        if reduction_parallel {
            annotation.reductions = self.reductions(&stmts);
        }
        if !parallel {
            annotation.min_dependence_distance = self.deps.minimal_dependence_distance(&schedule, level)?;
        }
        if let Some(trip) = f.trip_count {
            if parallel && !reduction_parallel && trip > 1 && trip <= self.options.max_vector_width {
                annotation.vector_width = Some(trip);
            }
        }
        annotation.partial_schedule = Some(partial_schedule(&schedule, level));
        debug!(
            "loop {} (level {}): parallel={} reduction={} vector={:?}",
            f.iterator, level, parallel, reduction_parallel, annotation.vector_width
        );
        Ok(annotation)
    }

    /// Reduction operators and arrays written by the statements in `stmts`.
    fn reductions(&self, stmts: &BTreeSet<String>) -> Vec<(String, String)> {
        let mut out = BTreeSet::new();
        for stmt in self.scop.statements.iter().filter(|s| stmts.contains(&s.name)) {
            for access in stmt.accesses.iter().filter(|a| a.is_write() && a.reduction != ReductionType::None) {
                out.insert((access.reduction.symbol().to_string(), self.scop.array(access.array).name.clone()));
            }
        }
        out.into_iter().collect()
    }
}

/// `{ S[x] -> [t_level] }` for every map of `schedule`.
fn partial_schedule(schedule: &UnionMap, level: usize) -> UnionMap {
    let mut out = UnionMap::empty();
    for map in schedule.maps() {
        let n_out = map.n_out();
        if level >= n_out {
            continue;
        }
        let m = map.project_out_out(level + 1, n_out - level - 1).project_out_out(0, level);
        out.add(m);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::AstBuilder;
    use crate::config::{Config, VectorizerKind};
    use crate::transform::jscop::scop_from_jscop;
    use crate::transform::optimizer::optimize_scop;

    const ROWS: &str = r#"{
        "name": "rows",
        "context": "[N, M] -> { : 1 <= N <= 100 and 1 <= M <= 100 }",
        "statements": [{
            "name": "Stmt_S",
            "domain": "[N, M] -> { Stmt_S[i, j] : 0 <= i < N and 1 <= j < M }",
            "schedule": "[N, M] -> { Stmt_S[i, j] -> [i, j] }",
            "accesses": [
                { "kind": "read", "relation": "[N, M] -> { Stmt_S[i, j] -> MemRef_A[i, j - 1] }" },
                { "kind": "write", "relation": "[N, M] -> { Stmt_S[i, j] -> MemRef_A[i, j] }" }
            ]
        }]
    }"#;

    const VECTOR: &str = r#"{
        "name": "vector",
        "statements": [{
            "name": "Stmt_S",
            "domain": "{ Stmt_S[i, j] : 0 <= i < 64 and 0 <= j < 64 }",
            "schedule": "{ Stmt_S[i, j] -> [i, j] }",
            "accesses": [
                { "kind": "read", "relation": "{ Stmt_S[i, j] -> MemRef_B[i, j] }" },
                { "kind": "write", "relation": "{ Stmt_S[i, j] -> MemRef_A[i, j] }" }
            ]
        }]
    }"#;

    #[test]
    fn test_outer_parallel_inner_sequential() {
        let (scop, _) = scop_from_jscop(ROWS).unwrap();
        let mut deps = Dependences::new(&Config::default().dependence);
        let mut ast = AstBuilder::new(&scop).unwrap().build().unwrap();
        annotate(&mut ast, &scop, &mut deps, &CodegenOptions::default()).unwrap();
        let loops = ast.loops();
        assert_eq!(loops.len(), 2);
        assert!(loops[0].annotation.parallel);
        assert!(loops[0].annotation.outermost_parallel);
        assert!(!loops[0].annotation.innermost);
        assert!(!loops[1].annotation.parallel);
        assert!(loops[1].annotation.innermost);
        assert_eq!(loops[1].annotation.min_dependence_distance, Some(1));
        assert!(loops[1].annotation.partial_schedule.is_some());
    }

    #[test]
    fn test_prevectorized_loop_gets_width() {
        let (mut scop, _) = scop_from_jscop(VECTOR).unwrap();
        let mut config = Config::default();
        config.vectorizer = VectorizerKind::Polly;
        let mut deps = Dependences::new(&config.dependence);
        assert!(optimize_scop(&mut scop, &mut deps, &config).is_optimized());
        let mut ast = AstBuilder::new(&scop).unwrap().build().unwrap();
        annotate(&mut ast, &scop, &mut deps, &config.codegen).unwrap();
        let widths: Vec<i64> = ast.loops().iter().filter_map(|l| l.annotation.vector_width).collect();
        assert_eq!(widths, vec![4]);
        // only one loop of the nest runs in parallel threads
        assert_eq!(ast.loops().iter().filter(|l| l.annotation.outermost_parallel).count(), 1);
    }

    #[test]
    fn test_vector_width_limit() {
        let (mut scop, _) = scop_from_jscop(VECTOR).unwrap();
        let mut config = Config::default();
        config.vectorizer = VectorizerKind::Polly;
        config.codegen.max_vector_width = 2;
        let mut deps = Dependences::new(&config.dependence);
        optimize_scop(&mut scop, &mut deps, &config);
        let mut ast = AstBuilder::new(&scop).unwrap().build().unwrap();
        annotate(&mut ast, &scop, &mut deps, &config.codegen).unwrap();
        assert!(ast.loops().iter().all(|l| l.annotation.vector_width.is_none()));
    }
}
