//! Write and statement simplification.
//!
//! Removes writes that cannot be observed and statements that no longer
//! have any effect. Running the pass on its own result changes nothing.

use crate::ir::host::{HostFunction, InstKind, Operand};
use crate::ir::pir::{MemoryAccess, Scop, ScopStmt};
use log::{debug, info};
use std::fmt;

/// What one run of [`simplify`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimplifyStats {
    pub identical_writes: usize,
    pub redundant_writes: usize,
    pub removed_stmts: usize,
}

impl SimplifyStats {
    pub fn changed(&self) -> bool {
        self.identical_writes + self.redundant_writes + self.removed_stmts > 0
    }
}

impl fmt::Display for SimplifyStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Statistics {{")?;
        writeln!(f, "    Identical writes removed: {}", self.identical_writes)?;
        writeln!(f, "    Redundant writes removed: {}", self.redundant_writes)?;
        writeln!(f, "    Stmts removed: {}", self.removed_stmts)?;
        write!(f, "}}")
    }
}

/// Simplify `scop`. Redundant-write detection needs the host function the
/// region was built from; regions imported from jscop skip it.
pub fn simplify(scop: &mut Scop, func: Option<&HostFunction>) -> SimplifyStats {
    let mut stats = SimplifyStats::default();
    for stmt in &mut scop.statements {
        stats.identical_writes += remove_identical_writes(stmt);
        if let Some(func) = func {
            stats.redundant_writes += remove_redundant_writes(stmt, func);
        }
    }
    stats.removed_stmts = scop.remove_stmts(is_unnecessary);
    if stats.changed() {
        scop.modified = true;
        info!(
            "simplified {}: {} identical writes, {} redundant writes, {} statements",
            scop.name, stats.identical_writes, stats.redundant_writes, stats.removed_stmts
        );
    }
    stats
}

fn is_unnecessary(stmt: &ScopStmt) -> bool {
    let drop = stmt.domain.is_empty() || stmt.accesses.is_empty() || stmt.writes().next().is_none();
    if drop {
        debug!("removing unnecessary statement {}", stmt.name);
    }
    drop
}

fn same_element(a: &MemoryAccess, b: &MemoryAccess) -> bool {
    a.array == b.array && a.latest_relation().is_equal(b.latest_relation())
}

/// Drop a must-write when a later must-write in the same statement stores
/// to exactly the same element and nothing reads the array in between.
fn remove_identical_writes(stmt: &mut ScopStmt) -> usize {
    let mut removed = 0;
    let mut i = 0;
    while i < stmt.accesses.len() {
        let earlier = &stmt.accesses[i];
        let overwritten = earlier.is_must_write()
            && !earlier.is_reduction_like()
            && stmt.accesses[i + 1..]
                .iter()
                .take_while(|a| !(a.is_read() && a.array == earlier.array))
                .any(|a| a.is_must_write() && same_element(a, earlier));
        if overwritten {
            debug!("{}: removing overwritten write to {}", stmt.name, earlier.array_name());
            stmt.accesses.remove(i);
            removed += 1;
        } else {
            i += 1;
        }
    }
    removed
}

/// Drop a must-write that stores the value just loaded from the same
/// element when no other write to the array happens in between.
fn remove_redundant_writes(stmt: &mut ScopStmt, func: &HostFunction) -> usize {
    let mut removed = 0;
    let mut i = 0;
    while i < stmt.accesses.len() {
        if is_redundant_write(&stmt.accesses, i, func) {
            debug!("{}: removing redundant write to {}", stmt.name, stmt.accesses[i].array_name());
            stmt.accesses.remove(i);
            removed += 1;
        } else {
            i += 1;
        }
    }
    removed
}

fn is_redundant_write(accesses: &[MemoryAccess], idx: usize, func: &HostFunction) -> bool {
    let write = &accesses[idx];
    if !write.is_must_write() || !write.is_array_kind() || write.is_reduction_like() {
        return false;
    }
    let Some(store) = write.inst else { return false };
    let InstKind::Store { value: Operand::Inst(value), .. } = &func.inst(store).kind else { return false };
    let Some(ri) = accesses[..idx].iter().position(|a| a.is_read() && a.inst == Some(*value)) else {
        return false;
    };
    same_element(&accesses[ri], write)
        && !accesses[ri + 1..idx].iter().any(|a| a.is_write() && a.array == write.array)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::pir::{AccessType, ArrayId, MemoryKind, ReductionType, StmtId, StmtKind};
    use crate::polyhedral::{parse_map, parse_set, PolyCtx};

    fn access(access_type: AccessType, array: usize, relation: &str) -> MemoryAccess {
        MemoryAccess {
            stmt: StmtId(0),
            access_type,
            array: ArrayId(array),
            kind: MemoryKind::Array,
            subscripts: Vec::new(),
            relation: parse_map(relation).unwrap(),
            new_relation: None,
            reduction: ReductionType::None,
            affine: true,
            inst: None,
            incoming: Vec::new(),
        }
    }

    fn stmt(name: &str, domain: &str, accesses: Vec<MemoryAccess>) -> ScopStmt {
        ScopStmt {
            id: StmtId(0),
            name: name.to_string(),
            kind: StmtKind::Imported,
            domain: parse_set(domain).unwrap(),
            accesses,
            loops: Vec::new(),
            insts: Vec::new(),
        }
    }

    #[test]
    fn test_identical_writes() {
        let mut s = stmt(
            "S",
            "[N] -> { S[i] : 0 <= i < N }",
            vec![
                access(AccessType::MustWrite, 0, "[N] -> { S[i] -> MemRef_A[i] }"),
                access(AccessType::MustWrite, 0, "[N] -> { S[i] -> MemRef_A[i] }"),
                access(AccessType::MustWrite, 1, "[N] -> { S[i] -> MemRef_B[i] }"),
            ],
        );
        assert_eq!(remove_identical_writes(&mut s), 1);
        assert_eq!(s.accesses.len(), 2);
        assert_eq!(remove_identical_writes(&mut s), 0);
    }

    #[test]
    fn test_read_between_writes_keeps_both() {
        let mut s = stmt(
            "S",
            "[N] -> { S[i] : 0 <= i < N }",
            vec![
                access(AccessType::MustWrite, 0, "[N] -> { S[i] -> MemRef_A[i] }"),
                access(AccessType::Read, 0, "[N] -> { S[i] -> MemRef_A[i] }"),
                access(AccessType::MustWrite, 0, "[N] -> { S[i] -> MemRef_A[i] }"),
            ],
        );
        assert_eq!(remove_identical_writes(&mut s), 0);
    }

    #[test]
    fn test_unnecessary_statements_and_idempotence() {
        let mut scop = Scop::new("f", PolyCtx::unlimited());
        scop.statements.push(stmt(
            "S0",
            "[N] -> { S0[i] : 0 <= i < N }",
            vec![access(AccessType::MustWrite, 0, "[N] -> { S0[i] -> MemRef_A[i] }")],
        ));
        scop.statements.push(stmt(
            "S1",
            "[N] -> { S1[i] : 0 <= i < N }",
            vec![access(AccessType::Read, 0, "[N] -> { S1[i] -> MemRef_A[i] }")],
        ));
        scop.statements.push(stmt("S2", "[N] -> { S2[i] : 0 <= i < N and i < 0 }", Vec::new()));
        let stats = simplify(&mut scop, None);
        assert_eq!(stats.removed_stmts, 2);
        assert_eq!(scop.statements.len(), 1);
        assert!(scop.modified);
        let again = simplify(&mut scop, None);
        assert!(!again.changed());
        assert_eq!(scop.statements.len(), 1);
    }

    #[test]
    fn test_redundant_write_from_host() {
        use crate::analysis::builder::build_scop;
        use crate::analysis::region::RegionDetector;
        use crate::config::ScopOptions;
        use crate::ir::host::{ArrayDecl, FunctionBuilder, Pointer};
        use crate::ir::scev::SymExpr;

        // for (i = 0; i < N; i++) { A[i] = A[i]; B[i] = 1; }
        let mut fb = FunctionBuilder::new("copy_self");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![None]));
        fb.array(ArrayDecl::new("B", vec![None]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        let x = fb.load("x", Pointer::new("A", vec![l.iv.clone()]));
        fb.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Inst(x));
        fb.store(Pointer::new("B", vec![l.iv.clone()]), Operand::Const(1));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let region = RegionDetector::new(&func).detect_function().unwrap();
        let (mut scop, _) = build_scop(&func, &region, &ScopOptions::default(), PolyCtx::unlimited());

        let stats = simplify(&mut scop, Some(&func));
        assert_eq!(stats.redundant_writes, 1);
        let s = scop.stmt_by_name("Stmt_i_body").unwrap();
        assert_eq!(s.writes().count(), 1);
        assert!(!simplify(&mut scop, Some(&func)).changed());
    }
}
