//! Detection of static control regions in a host function.
//!
//! A region is single-entry/single-exit, free of irreducible control flow
//! and side-effecting calls, and every loop it contains either has affine
//! bounds or is boxed inside a non-affine subregion. The result is a tree
//! of [`RegionElement`]s the builder turns into statements.

use crate::ir::host::{BlockId, HostFunction, InstId, InstKind, Terminator};
use crate::ir::scev::{SymExpr, ValueRef};
use crate::utils::errors::{ScopError, ScopErrorKind};
use log::{debug, trace};
use std::collections::BTreeSet;

/// What a nested region stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedKind {
    /// The body of an affine loop, named by its header
    Loop(BlockId),
    /// A structured piece of straight-line or branching code
    Affine,
}

/// One element of a detected region.
#[derive(Debug, Clone, PartialEq)]
pub enum RegionElement {
    /// A single block, modeled as one statement
    Block(BlockId),
    /// A non-affine subregion, over-approximated as one statement
    Subregion { entry: BlockId, exit: Option<BlockId>, blocks: Vec<BlockId> },
    NestedRegion { kind: NestedKind, elements: Vec<RegionElement> },
}

impl RegionElement {
    /// Blocks covered, in element order.
    pub fn blocks(&self) -> Vec<BlockId> {
        match self {
            RegionElement::Block(b) => vec![*b],
            RegionElement::Subregion { blocks, .. } => blocks.clone(),
            RegionElement::NestedRegion { elements, .. } => elements.iter().flat_map(|e| e.blocks()).collect(),
        }
    }

    /// Blocks that start a statement.
    pub fn stmt_entries(&self) -> Vec<BlockId> {
        match self {
            RegionElement::Block(b) => vec![*b],
            RegionElement::Subregion { entry, .. } => vec![*entry],
            RegionElement::NestedRegion { elements, .. } => elements.iter().flat_map(|e| e.stmt_entries()).collect(),
        }
    }
}

/// A validated region.
#[derive(Debug, Clone)]
pub struct DetectedRegion {
    pub entry: BlockId,
    /// First block after the region; `None` when the region runs to the
    /// function return
    pub exit: Option<BlockId>,
    pub blocks: BTreeSet<BlockId>,
    pub elements: Vec<RegionElement>,
    /// Headers of loops inside non-affine subregions
    pub boxed_loops: BTreeSet<BlockId>,
    /// Loads whose values feed affine expressions
    pub required_invariant_loads: BTreeSet<InstId>,
    pub error_blocks: BTreeSet<BlockId>,
}

impl DetectedRegion {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// The whole region as one element.
    pub fn root(&self) -> RegionElement {
        RegionElement::NestedRegion { kind: NestedKind::Affine, elements: self.elements.clone() }
    }

    /// Headers of the affine loops surrounding `block` inside the region,
    /// outermost first.
    pub fn loops_of(&self, func: &HostFunction, block: BlockId) -> Vec<BlockId> {
        func.loop_nest(block)
            .into_iter()
            .filter(|h| self.blocks.contains(h) && !self.boxed_loops.contains(h))
            .filter(|h| func.loop_by_header(*h).map_or(false, |l| l.blocks.is_subset(&self.blocks)))
            .collect()
    }

    /// The subregion element containing `block`, if any.
    pub fn subregion_of(&self, block: BlockId) -> Option<&RegionElement> {
        fn find(elements: &[RegionElement], block: BlockId) -> Option<&RegionElement> {
            for e in elements {
                match e {
                    RegionElement::Subregion { blocks, .. } if blocks.contains(&block) => return Some(e),
                    RegionElement::NestedRegion { elements, .. } => {
                        if let Some(found) = find(elements, block) {
                            return Some(found);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        find(&self.elements, block)
    }
}

/// Validates candidate regions of one function.
pub struct RegionDetector<'f> {
    func: &'f HostFunction,
    allow_non_affine: bool,
}

/// Scratch state of one detection.
struct Detection {
    blocks: BTreeSet<BlockId>,
    boxed_loops: BTreeSet<BlockId>,
    required_loads: BTreeSet<InstId>,
    written_arrays: BTreeSet<String>,
}

impl<'f> RegionDetector<'f> {
    pub fn new(func: &'f HostFunction) -> Self {
        Self { func, allow_non_affine: true }
    }

    /// Whether non-affine branches may be boxed into subregions.
    pub fn with_non_affine_subregions(mut self, allow: bool) -> Self {
        self.allow_non_affine = allow;
        self
    }

    /// Treat the whole function as the candidate region.
    pub fn detect_function(&self) -> Result<DetectedRegion, ScopError> {
        self.detect(self.func.entry, None)
    }

    /// Validate the region from `entry` up to (excluding) `exit`.
    pub fn detect(&self, entry: BlockId, exit: Option<BlockId>) -> Result<DetectedRegion, ScopError> {
        let blocks = self.collect_blocks(entry, exit);
        if blocks.is_empty() {
            return Err(ScopError::new(ScopErrorKind::Empty, "region has no blocks"));
        }
        self.check_single_entry(entry, &blocks)?;
        if let Some((from, to)) = self
            .func
            .irreducible_edges()
            .iter()
            .find(|(from, to)| blocks.contains(from) && blocks.contains(to))
        {
            return Err(ScopError::new(
                ScopErrorKind::IrregularControlFlow,
                format!("irreducible control flow on edge {} -> {}", from, to),
            ));
        }
        for l in self.func.loops() {
            if blocks.contains(&l.header) && !l.blocks.is_subset(&blocks) {
                return Err(ScopError::new(
                    ScopErrorKind::NotSingleEntryExit,
                    format!("loop {} leaves the region", l.header),
                ));
            }
        }

        let mut state = Detection {
            blocks: blocks.clone(),
            boxed_loops: BTreeSet::new(),
            required_loads: BTreeSet::new(),
            written_arrays: self.written_arrays(&blocks),
        };
        let order: Vec<BlockId> = self.func.rpo().iter().copied().filter(|b| blocks.contains(b)).collect();
        let elements = self.build_elements(&mut state, &order, &blocks, &[])?;

        let in_subregion: BTreeSet<BlockId> = elements
            .iter()
            .flat_map(|e| subregion_blocks(e))
            .collect();
        for &b in &order {
            for &id in &self.func.block(b).insts {
                if let InstKind::Call { name, may_write: true, .. } = &self.func.inst(id).kind {
                    if !in_subregion.contains(&b) {
                        return Err(ScopError::new(
                            ScopErrorKind::FunctionCall,
                            format!("call to '{}' may write memory", name),
                        ));
                    }
                }
            }
        }

        let error_blocks: BTreeSet<BlockId> = order.iter().copied().filter(|b| self.is_error_block(*b)).collect();
        debug!(
            "detected region {} -> {:?}: {} blocks, {} boxed loops, {} required invariant loads",
            entry,
            exit,
            blocks.len(),
            state.boxed_loops.len(),
            state.required_loads.len()
        );
        Ok(DetectedRegion {
            entry,
            exit,
            blocks,
            elements,
            boxed_loops: state.boxed_loops,
            required_invariant_loads: state.required_loads,
            error_blocks,
        })
    }

    fn collect_blocks(&self, entry: BlockId, exit: Option<BlockId>) -> BTreeSet<BlockId> {
        let mut seen = BTreeSet::new();
        let mut work = vec![entry];
        while let Some(b) = work.pop() {
            if Some(b) == exit || !seen.insert(b) {
                continue;
            }
            work.extend(self.func.successors(b));
        }
        seen
    }

    fn check_single_entry(&self, entry: BlockId, blocks: &BTreeSet<BlockId>) -> Result<(), ScopError> {
        for &b in blocks {
            if b == entry {
                continue;
            }
            for p in self.func.predecessors(b) {
                if self.func.is_reachable(*p) && !blocks.contains(p) {
                    return Err(ScopError::new(
                        ScopErrorKind::NotSingleEntryExit,
                        format!("block {} is entered from {} outside the region", b, p),
                    ));
                }
            }
        }
        Ok(())
    }

    fn written_arrays(&self, blocks: &BTreeSet<BlockId>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for &b in blocks {
            for &id in &self.func.block(b).insts {
                if let InstKind::Store { ptr, .. } = &self.func.inst(id).kind {
                    out.insert(ptr.base.clone());
                }
            }
        }
        out
    }

    /// A block only executed on error paths.
    pub fn is_error_block(&self, block: BlockId) -> bool {
        self.func.is_error_block(block)
    }

    /// Build the elements of `order` (blocks of one loop level) with the
    /// affine loops `loops` around them.
    fn build_elements(
        &self,
        state: &mut Detection,
        order: &[BlockId],
        scope: &BTreeSet<BlockId>,
        loops: &[BlockId],
    ) -> Result<Vec<RegionElement>, ScopError> {
        let mut elements = Vec::new();
        let mut consumed: BTreeSet<BlockId> = BTreeSet::new();
        for &b in order {
            if consumed.contains(&b) || !scope.contains(&b) {
                continue;
            }
            if let Some(l) = self.func.loop_by_header(b).filter(|l| !loops.contains(&l.header)) {
                let mut inner_loops = loops.to_vec();
                inner_loops.push(b);
                if self.loop_is_affine(state, b, &inner_loops) {
                    let body: Vec<BlockId> = order.iter().copied().filter(|x| l.blocks.contains(x)).collect();
                    consumed.extend(l.blocks.iter().copied());
                    let inner = self.build_elements(state, &body, &l.blocks, &inner_loops)?;
                    elements.push(RegionElement::NestedRegion { kind: NestedKind::Loop(b), elements: inner });
                    continue;
                }
                if !self.allow_non_affine {
                    return Err(ScopError::new(
                        ScopErrorKind::NonAffineLoopBound,
                        format!("loop {} has a non-affine bound", b),
                    ));
                }
                let element = self.subregion(state, b, order, scope);
                consumed.extend(element.blocks());
                elements.push(element);
                continue;
            }
            if !self.branch_is_affine(state, b, loops) {
                if !self.allow_non_affine {
                    return Err(ScopError::new(
                        ScopErrorKind::IrregularControlFlow,
                        format!("non-affine branch in {}", b),
                    ));
                }
                let element = self.subregion(state, b, order, scope);
                consumed.extend(element.blocks());
                elements.push(element);
                continue;
            }
            consumed.insert(b);
            elements.push(RegionElement::Block(b));
        }
        Ok(elements)
    }

    /// Box everything from `entry` up to its immediate post-dominator.
    fn subregion(&self, state: &mut Detection, entry: BlockId, order: &[BlockId], scope: &BTreeSet<BlockId>) -> RegionElement {
        let mut exit = self.func.ipdom(entry);
        // a loop header's post-dominator may still be inside its loop
        while let Some(e) = exit {
            match self.func.loop_by_header(entry) {
                Some(l) if l.blocks.contains(&e) => exit = self.func.ipdom(e),
                _ => break,
            }
        }
        let mut covered = BTreeSet::new();
        let mut work = vec![entry];
        while let Some(b) = work.pop() {
            if Some(b) == exit || !scope.contains(&b) || !covered.insert(b) {
                continue;
            }
            work.extend(self.func.successors(b));
        }
        for l in self.func.loops() {
            if covered.contains(&l.header) {
                state.boxed_loops.insert(l.header);
            }
        }
        let blocks: Vec<BlockId> = order.iter().copied().filter(|b| covered.contains(b)).collect();
        trace!("non-affine subregion {} -> {:?} ({} blocks)", entry, exit, blocks.len());
        RegionElement::Subregion { entry, exit, blocks }
    }

    /// The exit conditions of the loop are affine.
    fn loop_is_affine(&self, state: &mut Detection, header: BlockId, loops: &[BlockId]) -> bool {
        let Some(l) = self.func.loop_by_header(header) else { return false };
        let mut exiting: BTreeSet<BlockId> = l.exit_edges(self.func).into_iter().map(|(from, _)| from).collect();
        exiting.extend(l.latches.iter().copied());
        if exiting.is_empty() {
            return false;
        }
        exiting.into_iter().all(|b| {
            // exits from nested loops are checked with their own loop
            let depth_ok = self.func.loop_of(b).map_or(true, |inner| inner.header == header);
            depth_ok && self.branch_is_affine(state, b, loops)
        })
    }

    fn branch_is_affine(&self, state: &mut Detection, block: BlockId, loops: &[BlockId]) -> bool {
        match &self.func.block(block).term {
            Terminator::Br(_) | Terminator::Return | Terminator::Unreachable => true,
            Terminator::CondBr { cond, .. } => match &self.func.inst(*cond).kind {
                InstKind::Cmp { lhs, rhs, .. } => {
                    self.is_affine_expr(state, lhs, loops) && self.is_affine_expr(state, rhs, loops)
                }
                _ => false,
            },
            Terminator::Switch { value, .. } => self.is_affine_expr(state, value, loops),
        }
    }

    /// Structural affinity check; loads feeding an affine expression are
    /// recorded as required invariant loads.
    fn is_affine_expr(&self, state: &mut Detection, expr: &SymExpr, loops: &[BlockId]) -> bool {
        let mut required = BTreeSet::new();
        if !self.check_affine(state, expr, loops, &mut required) {
            return false;
        }
        state.required_loads.extend(required);
        true
    }

    fn check_affine(&self, state: &Detection, expr: &SymExpr, loops: &[BlockId], required: &mut BTreeSet<InstId>) -> bool {
        match expr {
            SymExpr::Constant { .. } => true,
            SymExpr::Unknown { value: ValueRef::Argument(_), .. } => true,
            SymExpr::Unknown { value: ValueRef::Inst(id), .. } => {
                let inst = self.func.inst(*id);
                if !state.blocks.contains(&inst.block) {
                    return true;
                }
                match &inst.kind {
                    InstKind::Load { ptr } if !state.written_arrays.contains(&ptr.base) => {
                        // the address itself must not change inside the region
                        let invariant = ptr.subscripts.iter().all(|s| s.loops().is_empty() && self.check_affine(state, s, &[], required));
                        if invariant {
                            required.insert(*id);
                        }
                        invariant
                    }
                    _ => false,
                }
            }
            SymExpr::Add { ops, .. } | SymExpr::SMax(ops) | SymExpr::SMin(ops) => {
                ops.iter().all(|o| self.check_affine(state, o, loops, required))
            }
            SymExpr::Mul { ops, .. } => {
                let variable = ops.iter().filter(|o| !o.is_constant()).count();
                variable <= 1 && ops.iter().all(|o| self.check_affine(state, o, loops, required))
            }
            SymExpr::AddRec { start, step, loop_header, .. } => {
                loops.contains(loop_header)
                    && !state.boxed_loops.contains(loop_header)
                    && step.is_constant()
                    && self.check_affine(state, start, loops, required)
            }
            SymExpr::SignExtend { op, .. } => self.check_affine(state, op, loops, required),
            SymExpr::SDiv { lhs, rhs } | SymExpr::SRem { lhs, rhs } => {
                rhs.as_constant().map_or(false, |d| d != 0) && self.check_affine(state, lhs, loops, required)
            }
            SymExpr::ZeroExtend { .. } | SymExpr::Truncate { .. } | SymExpr::UDiv { .. } | SymExpr::UMax(_) => false,
        }
    }
}

fn subregion_blocks(element: &RegionElement) -> Vec<BlockId> {
    match element {
        RegionElement::Block(_) => Vec::new(),
        RegionElement::Subregion { blocks, .. } => blocks.clone(),
        RegionElement::NestedRegion { elements, .. } => elements.iter().flat_map(subregion_blocks).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::host::{ArrayDecl, CmpPred, FunctionBuilder, Operand, Pointer};

    #[test]
    fn test_loop_nest_elements() {
        let mut b = FunctionBuilder::new("f");
        let n = b.arg("N", 64);
        b.array(ArrayDecl::new("A", vec![None, Some(n.clone())]));
        let entry = b.block("entry");
        let i = b.counted_loop("i", entry, SymExpr::constant(0), n.clone());
        let j = b.counted_loop("j", i.body, SymExpr::constant(0), n);
        b.store(Pointer::new("A", vec![i.iv.clone(), j.iv.clone()]), Operand::Const(1));
        b.br(j.latch);
        b.switch_to(j.exit);
        b.br(i.latch);
        b.switch_to(i.exit);
        b.ret();
        let func = b.build().unwrap();

        let region = RegionDetector::new(&func).detect_function().unwrap();
        assert!(region.boxed_loops.is_empty());
        assert_eq!(region.loops_of(&func, j.body), vec![i.header, j.header]);
        let outer = region
            .elements
            .iter()
            .find(|e| matches!(e, RegionElement::NestedRegion { kind: NestedKind::Loop(h), .. } if *h == i.header))
            .unwrap();
        assert!(outer.blocks().contains(&j.body));
        assert!(outer.stmt_entries().contains(&j.header));
    }

    #[test]
    fn test_non_affine_branch_becomes_subregion() {
        let mut b = FunctionBuilder::new("f");
        let n = b.arg("N", 64);
        b.array(ArrayDecl::new("A", vec![None]));
        b.array(ArrayDecl::new("B", vec![None]));
        let entry = b.block("entry");
        let l = b.counted_loop("i", entry, SymExpr::constant(0), n);
        let then_bb = b.block("then");
        let join = b.block("join");
        let v = b.load("v", Pointer::new("B", vec![l.iv.clone()]));
        let c = b.cmp("c", CmpPred::Sgt, SymExpr::value(v), SymExpr::constant(0));
        b.cond_br(c, then_bb, join);
        b.switch_to(then_bb);
        b.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(0));
        b.br(join);
        b.switch_to(join);
        b.br(l.latch);
        b.switch_to(l.exit);
        b.ret();
        let func = b.build().unwrap();

        let region = RegionDetector::new(&func).detect_function().unwrap();
        let sub = region.subregion_of(then_bb).unwrap();
        match sub {
            RegionElement::Subregion { entry, exit, blocks } => {
                assert_eq!(*entry, l.body);
                assert_eq!(*exit, Some(join));
                assert!(blocks.contains(&then_bb));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(region.required_invariant_loads.is_empty());

        let strict = RegionDetector::new(&func).with_non_affine_subregions(false).detect_function();
        assert!(strict.is_err());
    }

    #[test]
    fn test_side_effect_call_rejected() {
        let mut b = FunctionBuilder::new("f");
        let entry = b.block("entry");
        b.call("print", true, false);
        b.switch_to(entry);
        b.ret();
        let func = b.build().unwrap();
        let err = RegionDetector::new(&func).detect_function().unwrap_err();
        assert_eq!(err.kind, ScopErrorKind::FunctionCall);
    }

    #[test]
    fn test_loop_bound_from_invariant_load() {
        let mut b = FunctionBuilder::new("f");
        b.array(ArrayDecl::new("Size", vec![Some(SymExpr::constant(1))]));
        b.array(ArrayDecl::new("A", vec![None]));
        let entry = b.block("entry");
        let n = b.load("n", Pointer::new("Size", vec![SymExpr::constant(0)]));
        let l = b.counted_loop("i", entry, SymExpr::constant(0), SymExpr::value(n));
        b.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(0));
        b.br(l.latch);
        b.switch_to(l.exit);
        b.ret();
        let func = b.build().unwrap();

        let region = RegionDetector::new(&func).detect_function().unwrap();
        assert!(region.required_invariant_loads.contains(&n));
        assert!(region.boxed_loops.is_empty());
    }
}
