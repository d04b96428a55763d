//! Schedule optimization of one region.
//!
//! Computes a new schedule tree, tiles and pre-vectorizes its bands, checks
//! it against the validity dependences and installs it only when it differs
//! from the current schedule. Every failure leaves the region untouched.

use crate::analysis::dependence::Dependences;
use crate::config::Config;
use crate::ir::pir::Scop;
use crate::transform::scheduler::Scheduler;
use crate::transform::schedule_tree::ScheduleTree;
use crate::transform::tiling::optimize_bands;
use log::{debug, info, warn};
use std::fmt;

/// What [`optimize_scop`] did with a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizeOutcome {
    /// A new schedule was installed
    Optimized,
    /// The new schedule equals the current one
    NotProfitable,
    /// No schedule was computed; the reason is attached
    Skipped(String),
}

impl OptimizeOutcome {
    pub fn is_optimized(&self) -> bool {
        matches!(self, OptimizeOutcome::Optimized)
    }
}

impl fmt::Display for OptimizeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizeOutcome::Optimized => write!(f, "optimized"),
            OptimizeOutcome::NotProfitable => write!(f, "not profitable"),
            OptimizeOutcome::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

/// Compute the optimized schedule of `scop` without installing it.
pub fn compute_schedule(scop: &Scop, deps: &mut Dependences, config: &Config) -> Result<ScheduleTree, String> {
    deps.ensure(scop).map_err(|e| format!("dependences unavailable: {}", e))?;
    let tree = Scheduler::new(&config.schedule, scop.ctx.clone())
        .schedule_scop(scop, deps)
        .map_err(|e| format!("scheduling failed: {}", e))?;
    debug!("scheduler result for {}:\n{}", scop.name, tree);
    let tree = optimize_bands(&tree, &config.tiling, config.vectorizer, config.prevect_width)
        .map_err(|e| format!("band optimization failed: {}", e))?;
    for stmt in &scop.statements {
        if tree.stmt_map(&stmt.name).is_none() {
            return Err(format!("schedule misses statement {}", stmt.name));
        }
    }
    let legal = deps.is_valid_schedule(&tree.to_union_map()).map_err(|e| e.to_string())?;
    if !legal {
        return Err("computed schedule violates a dependence".to_string());
    }
    Ok(tree)
}

/// Optimize the schedule of `scop`.
pub fn optimize_scop(scop: &mut Scop, deps: &mut Dependences, config: &Config) -> OptimizeOutcome {
    if scop.is_infeasible() {
        info!("{}: run-time check is always false, not optimizing", scop.name);
        return OptimizeOutcome::Skipped("infeasible region".to_string());
    }
    if scop.statements.is_empty() {
        return OptimizeOutcome::NotProfitable;
    }
    let tree = match compute_schedule(scop, deps, config) {
        Ok(tree) => tree,
        Err(reason) => {
            warn!("{}: {}", scop.name, reason);
            return OptimizeOutcome::Skipped(reason);
        }
    };
    let old = scop.schedule_map();
    let new = tree.to_union_map();
    if new.is_equal(&old) {
        info!("{}: new schedule equals the old one, not profitable", scop.name);
        return OptimizeOutcome::NotProfitable;
    }
    scop.set_schedule(tree);
    scop.modified = true;
    deps.invalidate();
    info!("{}: installed optimized schedule of depth {}", scop.name, scop.schedule.depth());
    OptimizeOutcome::Optimized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DependenceOptions, VectorizerKind};
    use crate::transform::jscop::scop_from_jscop;
    use crate::transform::tiling::SIMD_MARK;

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

    #[test]
    fn test_matmul_is_tiled() {
        let (mut scop, diags) = scop_from_jscop(MATMUL).unwrap();
        assert!(diags.is_empty());
        let mut deps = Dependences::new(&DependenceOptions::default());
        let outcome = optimize_scop(&mut scop, &mut deps, &Config::default());
        assert_eq!(outcome, OptimizeOutcome::Optimized);
        assert!(scop.modified);
        assert_eq!(scop.schedule.depth(), 6);
        deps.ensure(&scop).unwrap();
        assert!(deps.is_valid_schedule(&scop.schedule_map()).unwrap());
    }

    #[test]
    fn test_unprofitable_without_tiling() {
        let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
        let mut config = Config::default();
        config.tiling.first_level.enabled = false;
        let mut deps = Dependences::new(&config.dependence);
        assert_eq!(optimize_scop(&mut scop, &mut deps, &config), OptimizeOutcome::NotProfitable);
        assert!(!scop.modified);
    }

    #[test]
    fn test_prevect_marks_simd_loop() {
        let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
        let mut config = Config::default();
        config.vectorizer = VectorizerKind::Polly;
        let mut deps = Dependences::new(&config.dependence);
        assert!(optimize_scop(&mut scop, &mut deps, &config).is_optimized());
        assert_eq!(scop.schedule.root.count_marks(SIMD_MARK), 1);
    }

    #[test]
    fn test_infeasible_region_skipped() {
        let (mut scop, _) = scop_from_jscop(MATMUL).unwrap();
        scop.invalidate(crate::ir::pir::AssumptionKind::Complexity, None);
        let mut deps = Dependences::new(&DependenceOptions::default());
        assert!(matches!(optimize_scop(&mut scop, &mut deps, &Config::default()), OptimizeOutcome::Skipped(_)));
    }
}
