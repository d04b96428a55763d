//! Reduction detection.
//!
//! A load/store pair of a block statement is reduction-like when the stored
//! value is computed by one associative and commutative operator from the
//! loaded value, both accesses touch the same element, and nothing else in
//! the statement may touch that element.

use crate::ir::host::{BinOpKind, HostFunction, InstId, InstKind, Operand};
use crate::ir::pir::{MemoryAccess, ReductionType, Scop, ScopStmt};
use log::debug;

/// Mark every reduction-like access pair of `scop`. Returns the number of
/// pairs found.
pub fn detect_reductions(scop: &mut Scop, func: &HostFunction) -> usize {
    let mut found = 0;
    for stmt in &mut scop.statements {
        if !stmt.is_block_stmt() {
            continue;
        }
        let pairs = candidate_pairs(stmt, func);
        for (load, store, kind) in pairs {
            stmt.accesses[load].reduction = kind;
            stmt.accesses[store].reduction = kind;
            debug!("{}: reduction {} on {}", stmt.name, kind.symbol(), stmt.accesses[store].array_name());
            found += 1;
        }
    }
    found
}

fn reduction_type(op: BinOpKind) -> ReductionType {
    match op {
        BinOpKind::Add | BinOpKind::FAdd => ReductionType::Add,
        BinOpKind::Mul | BinOpKind::FMul => ReductionType::Mul,
        BinOpKind::Or => ReductionType::BitOr,
        BinOpKind::Xor => ReductionType::BitXor,
        BinOpKind::And => ReductionType::BitAnd,
        _ => ReductionType::None,
    }
}

/// The single user of `inst`, if it has exactly one.
fn only_user(func: &HostFunction, inst: InstId) -> Option<InstId> {
    match func.users(inst) {
        [user] => Some(*user),
        _ => None,
    }
}

/// Indices of (load, store, operator) triples forming reductions.
fn candidate_pairs(stmt: &ScopStmt, func: &HostFunction) -> Vec<(usize, usize, ReductionType)> {
    let mut pairs = Vec::new();
    for (si, store) in stmt.accesses.iter().enumerate() {
        if !store.is_must_write() || !store.is_array_kind() || !store.affine {
            continue;
        }
        let Some(store_inst) = store.inst else { continue };
        let InstKind::Store { value: Operand::Inst(value), .. } = &func.inst(store_inst).kind else { continue };
        if only_user(func, *value) != Some(store_inst) || !stmt.insts.contains(value) {
            continue;
        }
        let InstKind::BinOp { op, lhs, rhs } = &func.inst(*value).kind else { continue };
        let kind = reduction_type(*op);
        if kind == ReductionType::None {
            continue;
        }
        let operand_load = |operand: &Operand| -> Option<usize> {
            let Operand::Inst(id) = operand else { return None };
            if !matches!(func.inst(*id).kind, InstKind::Load { .. }) || only_user(func, *id) != Some(*value) {
                return None;
            }
            stmt.accesses.iter().position(|a| {
                a.is_read()
                    && a.is_array_kind()
                    && a.affine
                    && a.inst == Some(*id)
                    && a.relation.is_equal(&store.relation)
            })
        };
        let Some(li) = operand_load(lhs).or_else(|| operand_load(rhs)) else { continue };
        if overlaps_other_access(stmt, li, si) {
            debug!("{}: candidate reduction on {} overlaps another access", stmt.name, store.array_name());
            continue;
        }
        pairs.push((li, si, kind));
    }
    pairs
}

/// Whether an access other than the pair may touch an element of the pair.
fn overlaps_other_access(stmt: &ScopStmt, load: usize, store: usize) -> bool {
    let pair: &MemoryAccess = &stmt.accesses[store];
    let elements = pair.relation.intersect_domain(&stmt.domain).range();
    stmt.accesses.iter().enumerate().any(|(i, other)| {
        if i == load || i == store {
            return false;
        }
        if !other.relation.space().range().has_equal_tuples(&pair.relation.space().range()) {
            return false;
        }
        let touched = other.relation.intersect_domain(&stmt.domain).range();
        !touched.intersect(&elements).is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::builder::build_scop;
    use crate::analysis::region::RegionDetector;
    use crate::config::ScopOptions;
    use crate::ir::host::{ArrayDecl, FunctionBuilder, Pointer};
    use crate::ir::scev::SymExpr;
    use crate::polyhedral::PolyCtx;

    /// for (i = 0; i < N; i++) A[0] = A[0] <op> B[i]; with an optional
    /// extra read of `extra`.
    fn kernel(op: BinOpKind, extra: Option<SymExpr>) -> HostFunction {
        let mut fb = FunctionBuilder::new("kernel");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![Some(SymExpr::constant(8))]));
        fb.array(ArrayDecl::new("B", vec![None]));
        fb.array(ArrayDecl::new("C", vec![None]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        let acc = fb.load("acc", Pointer::new("A", vec![SymExpr::constant(0)]));
        let b = fb.load("b", Pointer::new("B", vec![l.iv.clone()]));
        let next = fb.binop("next", op, Operand::Inst(b), Operand::Inst(acc));
        if let Some(sub) = extra {
            let e = fb.load("e", Pointer::new("A", vec![sub]));
            fb.store(Pointer::new("C", vec![l.iv.clone()]), Operand::Inst(e));
        }
        fb.store(Pointer::new("A", vec![SymExpr::constant(0)]), Operand::Inst(next));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        fb.build().unwrap()
    }

    fn detect(func: &HostFunction) -> (Scop, usize) {
        let region = RegionDetector::new(func).detect_function().unwrap();
        let (mut scop, _) = build_scop(func, &region, &ScopOptions::default(), PolyCtx::unlimited());
        let n = detect_reductions(&mut scop, func);
        (scop, n)
    }

    #[test]
    fn test_sum_reduction() {
        let func = kernel(BinOpKind::Add, None);
        let (scop, n) = detect(&func);
        assert_eq!(n, 1);
        let stmt = scop.stmt_by_name("Stmt_i_body").unwrap();
        let marked: Vec<_> = stmt.accesses.iter().filter(|a| a.is_reduction_like()).collect();
        assert_eq!(marked.len(), 2);
        assert!(marked.iter().all(|a| a.reduction == ReductionType::Add && a.array_name() == "MemRef_A"));
    }

    #[test]
    fn test_operators() {
        assert_eq!(detect(&kernel(BinOpKind::FMul, None)).1, 1);
        assert_eq!(detect(&kernel(BinOpKind::Xor, None)).1, 1);
        assert_eq!(detect(&kernel(BinOpKind::Sub, None)).1, 0);
        assert_eq!(detect(&kernel(BinOpKind::SDiv, None)).1, 0);
    }

    #[test]
    fn test_overlapping_access_rejects() {
        let func = kernel(BinOpKind::Add, Some(SymExpr::constant(0)));
        assert_eq!(detect(&func).1, 0);
        let func = kernel(BinOpKind::Add, Some(SymExpr::constant(5)));
        assert_eq!(detect(&func).1, 1);
    }
}
