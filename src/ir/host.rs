//! Host program model.
//!
//! A small control-flow-graph representation of the function that contains
//! the regions to optimize: basic blocks of instructions, natural loops,
//! dominance and post-dominance. Memory is addressed through multi-dimensional
//! array pointers whose subscripts are symbolic expressions.

use crate::ir::scev::{SymExpr, ValueRef};
use crate::utils::errors::{ScopError, ScopErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Index of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub usize);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Index of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstId(pub usize);

/// Element type of arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementType {
    Int(u32),
    Float,
    Double,
}

impl ElementType {
    /// Size in bytes.
    pub fn size(&self) -> u32 {
        match self {
            ElementType::Int(bits) => (bits + 7) / 8,
            ElementType::Float => 4,
            ElementType::Double => 8,
        }
    }

    pub fn name(&self) -> String {
        match self {
            ElementType::Int(bits) => format!("i{}", bits),
            ElementType::Float => "float".to_string(),
            ElementType::Double => "double".to_string(),
        }
    }
}

/// Declared shape of a base array. The outermost size may be unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDecl {
    pub name: String,
    pub element_type: ElementType,
    pub sizes: Vec<Option<SymExpr>>,
}

impl ArrayDecl {
    pub fn new(name: &str, sizes: Vec<Option<SymExpr>>) -> Self {
        Self { name: name.to_string(), element_type: ElementType::Double, sizes }
    }

    pub fn with_type(mut self, element_type: ElementType) -> Self {
        self.element_type = element_type;
        self
    }
}

/// Address of an array element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pointer {
    pub base: String,
    pub subscripts: Vec<SymExpr>,
}

impl Pointer {
    pub fn new(base: &str, subscripts: Vec<SymExpr>) -> Self {
        Self { base: base.to_string(), subscripts }
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Inst(InstId),
    Arg(String),
    Const(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinOpKind {
    /// Associative and commutative operators usable as reductions.
    pub fn is_associative_commutative(&self) -> bool {
        matches!(
            self,
            BinOpKind::Add | BinOpKind::Mul | BinOpKind::And | BinOpKind::Or | BinOpKind::Xor | BinOpKind::FAdd | BinOpKind::FMul
        )
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOpKind::Add | BinOpKind::FAdd => "+",
            BinOpKind::Sub | BinOpKind::FSub => "-",
            BinOpKind::Mul | BinOpKind::FMul => "*",
            BinOpKind::SDiv | BinOpKind::FDiv => "/",
            BinOpKind::SRem => "%",
            BinOpKind::And => "&",
            BinOpKind::Or => "|",
            BinOpKind::Xor => "^",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpPred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl CmpPred {
    /// The predicate that holds exactly when `self` does not.
    pub fn inverse(&self) -> CmpPred {
        match self {
            CmpPred::Eq => CmpPred::Ne,
            CmpPred::Ne => CmpPred::Eq,
            CmpPred::Slt => CmpPred::Sge,
            CmpPred::Sle => CmpPred::Sgt,
            CmpPred::Sgt => CmpPred::Sle,
            CmpPred::Sge => CmpPred::Slt,
            CmpPred::Ult => CmpPred::Uge,
            CmpPred::Ule => CmpPred::Ugt,
            CmpPred::Ugt => CmpPred::Ule,
            CmpPred::Uge => CmpPred::Ult,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, CmpPred::Ult | CmpPred::Ule | CmpPred::Ugt | CmpPred::Uge)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InstKind {
    Load { ptr: Pointer },
    Store { ptr: Pointer, value: Operand },
    BinOp { op: BinOpKind, lhs: Operand, rhs: Operand },
    Phi { incoming: Vec<(BlockId, Operand)> },
    Call { name: String, may_write: bool, no_return: bool },
    Cmp { pred: CmpPred, lhs: SymExpr, rhs: SymExpr },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: InstId,
    pub name: String,
    pub block: BlockId,
    pub kind: InstKind,
}

impl Instruction {
    /// Instruction operands, excluding the symbolic ones.
    pub fn operands(&self) -> Vec<&Operand> {
        match &self.kind {
            InstKind::Store { value, .. } => vec![value],
            InstKind::BinOp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Phi { incoming } => incoming.iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
    }

    /// Symbolic expressions the instruction evaluates.
    pub fn sym_exprs(&self) -> Vec<&SymExpr> {
        match &self.kind {
            InstKind::Load { ptr } | InstKind::Store { ptr, .. } => ptr.subscripts.iter().collect(),
            InstKind::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
            _ => Vec::new(),
        }
    }

    pub fn pointer(&self) -> Option<&Pointer> {
        match &self.kind {
            InstKind::Load { ptr } | InstKind::Store { ptr, .. } => Some(ptr),
            _ => None,
        }
    }

    pub fn is_memory_access(&self) -> bool {
        self.pointer().is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    Br(BlockId),
    CondBr { cond: InstId, then_bb: BlockId, else_bb: BlockId },
    Switch { value: SymExpr, cases: Vec<(i64, BlockId)>, default: BlockId },
    Return,
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(t) => vec![*t],
            Terminator::CondBr { then_bb, else_bb, .. } => vec![*then_bb, *else_bb],
            Terminator::Switch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
            Terminator::Return | Terminator::Unreachable => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: String,
    pub insts: Vec<InstId>,
    pub term: Terminator,
    /// Explicitly marked as only reached on error paths
    pub error: bool,
}

/// A natural loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Loop {
    pub header: BlockId,
    pub latches: Vec<BlockId>,
    pub blocks: BTreeSet<BlockId>,
    /// Index of the enclosing loop
    pub parent: Option<usize>,
    /// Nesting depth, 1 for outermost loops
    pub depth: usize,
}

impl Loop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// Edges leaving the loop.
    pub fn exit_edges(&self, func: &HostFunction) -> Vec<(BlockId, BlockId)> {
        let mut out = Vec::new();
        for &b in &self.blocks {
            for s in func.successors(b) {
                if !self.blocks.contains(&s) {
                    out.push((b, s));
                }
            }
        }
        out
    }
}

/// A function with its control-flow analyses.
#[derive(Debug, Clone)]
pub struct HostFunction {
    pub name: String,
    pub args: Vec<(String, u32)>,
    pub arrays: Vec<ArrayDecl>,
    pub blocks: Vec<BasicBlock>,
    pub insts: Vec<Instruction>,
    pub entry: BlockId,
    preds: Vec<Vec<BlockId>>,
    rpo: Vec<BlockId>,
    rpo_index: Vec<Option<usize>>,
    idom: Vec<Option<BlockId>>,
    ipdom: Vec<Option<BlockId>>,
    loops: Vec<Loop>,
    block_loop: Vec<Option<usize>>,
    irreducible: Vec<(BlockId, BlockId)>,
    users: HashMap<InstId, Vec<InstId>>,
}

impl HostFunction {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0]
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.insts[id.0]
    }

    pub fn block_by_name(&self, name: &str) -> Option<BlockId> {
        self.blocks.iter().find(|b| b.name == name).map(|b| b.id)
    }

    pub fn array(&self, name: &str) -> Option<&ArrayDecl> {
        self.arrays.iter().find(|a| a.name == name)
    }

    pub fn arg_bits(&self, name: &str) -> Option<u32> {
        self.args.iter().find(|(n, _)| n == name).map(|(_, b)| *b)
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.block(id).term.successors()
    }

    pub fn predecessors(&self, id: BlockId) -> &[BlockId] {
        &self.preds[id.0]
    }

    /// Reachable blocks in reverse post-order.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    pub fn rpo_position(&self, id: BlockId) -> Option<usize> {
        self.rpo_index[id.0]
    }

    pub fn is_reachable(&self, id: BlockId) -> bool {
        self.rpo_index[id.0].is_some()
    }

    pub fn idom(&self, id: BlockId) -> Option<BlockId> {
        self.idom[id.0]
    }

    /// Whether `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = Some(b);
        while let Some(c) = cur {
            if c == a {
                return true;
            }
            cur = self.idom[c.0];
        }
        false
    }

    /// Immediate post-dominator; `None` for blocks post-dominated only by
    /// the virtual exit.
    pub fn ipdom(&self, id: BlockId) -> Option<BlockId> {
        self.ipdom[id.0]
    }

    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = Some(b);
        while let Some(c) = cur {
            if c == a {
                return true;
            }
            cur = self.ipdom[c.0];
        }
        false
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    /// Innermost loop containing `id`.
    pub fn loop_of(&self, id: BlockId) -> Option<&Loop> {
        self.block_loop[id.0].map(|i| &self.loops[i])
    }

    pub fn loop_index_of(&self, id: BlockId) -> Option<usize> {
        self.block_loop[id.0]
    }

    pub fn loop_by_header(&self, header: BlockId) -> Option<&Loop> {
        self.loops.iter().find(|l| l.header == header)
    }

    pub fn parent_loop(&self, l: &Loop) -> Option<&Loop> {
        l.parent.map(|p| &self.loops[p])
    }

    /// Headers of the loops around `id`, outermost first.
    pub fn loop_nest(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut cur = self.block_loop[id.0];
        while let Some(i) = cur {
            out.push(self.loops[i].header);
            cur = self.loops[i].parent;
        }
        out.reverse();
        out
    }

    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.loop_by_header(to).map_or(false, |l| l.latches.contains(&from))
    }

    /// Retreating edges whose target does not dominate the source.
    pub fn irreducible_edges(&self) -> &[(BlockId, BlockId)] {
        &self.irreducible
    }

    /// Instructions using the value of `id` as an operand.
    pub fn users(&self, id: InstId) -> &[InstId] {
        self.users.get(&id).map_or(&[], |v| v.as_slice())
    }

    /// Whether the block only runs on an error path: explicitly marked,
    /// ending in `unreachable` or calling a function that does not return.
    pub fn is_error_block(&self, id: BlockId) -> bool {
        let block = self.block(id);
        block.error
            || matches!(block.term, Terminator::Unreachable)
            || block.insts.iter().any(|&i| matches!(self.inst(i).kind, InstKind::Call { no_return: true, .. }))
    }

    /// The bit width of an opaque value.
    pub fn value_bits(&self, value: &ValueRef) -> u32 {
        match value {
            ValueRef::Argument(name) => self.arg_bits(name).unwrap_or(64),
            ValueRef::Inst(_) => 64,
        }
    }

    fn analyze(&mut self) {
        let n = self.blocks.len();
        let succs: Vec<Vec<BlockId>> = self.blocks.iter().map(|b| b.term.successors()).collect();
        self.preds = vec![Vec::new(); n];
        for (b, ss) in succs.iter().enumerate() {
            for s in ss {
                if !self.preds[s.0].contains(&BlockId(b)) {
                    self.preds[s.0].push(BlockId(b));
                }
            }
        }

        // reverse post-order by iterative DFS
        let mut visited = vec![false; n];
        let mut on_stack = vec![false; n];
        let mut post = Vec::new();
        let mut retreating = Vec::new();
        let mut stack: Vec<(usize, usize)> = vec![(self.entry.0, 0)];
        visited[self.entry.0] = true;
        on_stack[self.entry.0] = true;
        while let Some(top) = stack.last_mut() {
            let b = top.0;
            if top.1 < succs[b].len() {
                let s = succs[b][top.1].0;
                top.1 += 1;
                if !visited[s] {
                    visited[s] = true;
                    on_stack[s] = true;
                    stack.push((s, 0));
                } else if on_stack[s] {
                    retreating.push((BlockId(b), BlockId(s)));
                }
            } else {
                on_stack[b] = false;
                post.push(BlockId(b));
                stack.pop();
            }
        }
        post.reverse();
        self.rpo = post;
        self.rpo_index = vec![None; n];
        for (i, b) in self.rpo.iter().enumerate() {
            self.rpo_index[b.0] = Some(i);
        }

        self.idom = compute_idoms(n, &self.rpo, &self.preds, self.entry);

        // post-dominators on the reversed graph, exits joined by a virtual node
        let virt = n;
        let mut rsuccs: Vec<Vec<BlockId>> = vec![Vec::new(); n + 1];
        let mut rpreds: Vec<Vec<BlockId>> = vec![Vec::new(); n + 1];
        for &b in &self.rpo {
            if succs[b.0].is_empty() {
                rsuccs[virt].push(b);
                rpreds[b.0].push(BlockId(virt));
            }
            for s in &succs[b.0] {
                rsuccs[s.0].push(b);
                rpreds[b.0].push(*s);
            }
        }
        let mut rvisited = vec![false; n + 1];
        let mut rpost = Vec::new();
        let mut rstack: Vec<(usize, usize)> = vec![(virt, 0)];
        rvisited[virt] = true;
        while let Some(top) = rstack.last_mut() {
            let b = top.0;
            if top.1 < rsuccs[b].len() {
                let s = rsuccs[b][top.1].0;
                top.1 += 1;
                if !rvisited[s] {
                    rvisited[s] = true;
                    rstack.push((s, 0));
                }
            } else {
                rpost.push(BlockId(b));
                rstack.pop();
            }
        }
        rpost.reverse();
        let pdoms = compute_idoms(n + 1, &rpost, &rpreds, BlockId(virt));
        self.ipdom = pdoms.into_iter().take(n).map(|d| d.filter(|b| b.0 != virt)).collect();

        // natural loops from back edges
        let mut headers: Vec<(BlockId, Vec<BlockId>)> = Vec::new();
        self.irreducible.clear();
        for (from, to) in retreating {
            if self.dominates(to, from) {
                match headers.iter_mut().find(|(h, _)| *h == to) {
                    Some((_, latches)) => latches.push(from),
                    None => headers.push((to, vec![from])),
                }
            } else {
                self.irreducible.push((from, to));
            }
        }
        headers.sort_by_key(|(h, _)| self.rpo_index[h.0]);
        let mut loops: Vec<Loop> = headers
            .into_iter()
            .map(|(header, latches)| {
                let mut blocks = BTreeSet::new();
                blocks.insert(header);
                let mut work = latches.clone();
                while let Some(b) = work.pop() {
                    if blocks.insert(b) {
                        for p in &self.preds[b.0] {
                            if self.rpo_index[p.0].is_some() {
                                work.push(*p);
                            }
                        }
                    }
                }
                Loop { header, latches, blocks, parent: None, depth: 1 }
            })
            .collect();
        // parent: smallest strictly enclosing loop
        for i in 0..loops.len() {
            let mut best: Option<usize> = None;
            for j in 0..loops.len() {
                if i != j
                    && loops[j].blocks.contains(&loops[i].header)
                    && loops[j].blocks.len() > loops[i].blocks.len()
                    && best.map_or(true, |b| loops[j].blocks.len() < loops[b].blocks.len())
                {
                    best = Some(j);
                }
            }
            loops[i].parent = best;
        }
        for i in 0..loops.len() {
            let mut depth = 1;
            let mut cur = loops[i].parent;
            while let Some(p) = cur {
                depth += 1;
                cur = loops[p].parent;
            }
            loops[i].depth = depth;
        }
        self.block_loop = vec![None; n];
        for b in 0..n {
            let mut best: Option<usize> = None;
            for (i, l) in loops.iter().enumerate() {
                if l.blocks.contains(&BlockId(b)) && best.map_or(true, |j| l.depth > loops[j].depth) {
                    best = Some(i);
                }
            }
            self.block_loop[b] = best;
        }
        self.loops = loops;

        self.users.clear();
        for inst in &self.insts {
            for op in inst.operands() {
                if let Operand::Inst(def) = op {
                    self.users.entry(*def).or_default().push(inst.id);
                }
            }
        }
    }
}

/// Cooper-Harvey-Kennedy immediate dominators over `order` (reverse post-order).
fn compute_idoms(n: usize, order: &[BlockId], preds: &[Vec<BlockId>], entry: BlockId) -> Vec<Option<BlockId>> {
    let mut index = vec![usize::MAX; n];
    for (i, b) in order.iter().enumerate() {
        index[b.0] = i;
    }
    let mut idom: Vec<Option<usize>> = vec![None; n];
    idom[entry.0] = Some(entry.0);
    let mut changed = true;
    while changed {
        changed = false;
        for &b in order.iter().skip(1) {
            let mut new_idom: Option<usize> = None;
            for p in &preds[b.0] {
                if index[p.0] == usize::MAX || idom[p.0].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p.0,
                    Some(cur) => {
                        let (mut x, mut y) = (p.0, cur);
                        while x != y {
                            while index[x] > index[y] {
                                x = idom[x].unwrap_or(entry.0);
                            }
                            while index[y] > index[x] {
                                y = idom[y].unwrap_or(entry.0);
                            }
                        }
                        x
                    }
                });
            }
            if new_idom.is_some() && idom[b.0] != new_idom {
                idom[b.0] = new_idom;
                changed = true;
            }
        }
    }
    idom.into_iter()
        .enumerate()
        .map(|(b, d)| d.filter(|&d| d != b).map(BlockId))
        .collect()
}

/// Blocks of a canonical counted loop created by [`FunctionBuilder::counted_loop`].
#[derive(Debug, Clone)]
pub struct CountedLoop {
    pub header: BlockId,
    pub body: BlockId,
    pub latch: BlockId,
    pub exit: BlockId,
    /// `{lower,+,1}<header>`
    pub iv: SymExpr,
}

/// Builder for host functions.
///
/// ```text
/// let mut fb = FunctionBuilder::new("kernel");
/// let n = fb.arg("N", 64);
/// let entry = fb.block("entry");
/// let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
/// fb.switch_to(l.body);
/// fb.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(0));
/// fb.br(l.latch);
/// fb.switch_to(l.exit);
/// fb.ret();
/// let func = fb.build()?;
/// ```
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    args: Vec<(String, u32)>,
    arrays: Vec<ArrayDecl>,
    blocks: Vec<BasicBlock>,
    terminated: Vec<bool>,
    insts: Vec<Instruction>,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
            arrays: Vec::new(),
            blocks: Vec::new(),
            terminated: Vec::new(),
            insts: Vec::new(),
            current: None,
        }
    }

    /// Declare an integer argument and return its symbolic value.
    pub fn arg(&mut self, name: &str, bits: u32) -> SymExpr {
        self.args.push((name.to_string(), bits));
        SymExpr::Unknown { value: ValueRef::Argument(name.to_string()), bits }
    }

    pub fn array(&mut self, decl: ArrayDecl) {
        self.arrays.push(decl);
    }

    /// Create a block; the first one becomes the entry and the insert point.
    pub fn block(&mut self, name: &str) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(BasicBlock {
            id,
            name: name.to_string(),
            insts: Vec::new(),
            term: Terminator::Unreachable,
            error: false,
        });
        self.terminated.push(false);
        if self.current.is_none() {
            self.current = Some(id);
        }
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    pub fn current(&self) -> Option<BlockId> {
        self.current
    }

    pub fn mark_error(&mut self, block: BlockId) {
        self.blocks[block.0].error = true;
    }

    fn push(&mut self, name: &str, kind: InstKind) -> InstId {
        let id = InstId(self.insts.len());
        let block = self.current.unwrap_or(BlockId(0));
        self.insts.push(Instruction { id, name: name.to_string(), block, kind });
        if let Some(b) = self.blocks.get_mut(block.0) {
            b.insts.push(id);
        }
        id
    }

    pub fn load(&mut self, name: &str, ptr: Pointer) -> InstId {
        self.push(name, InstKind::Load { ptr })
    }

    pub fn store(&mut self, ptr: Pointer, value: Operand) -> InstId {
        self.push("", InstKind::Store { ptr, value })
    }

    pub fn binop(&mut self, name: &str, op: BinOpKind, lhs: Operand, rhs: Operand) -> InstId {
        self.push(name, InstKind::BinOp { op, lhs, rhs })
    }

    pub fn phi(&mut self, name: &str, incoming: Vec<(BlockId, Operand)>) -> InstId {
        self.push(name, InstKind::Phi { incoming })
    }

    pub fn call(&mut self, name: &str, may_write: bool, no_return: bool) -> InstId {
        self.push(name, InstKind::Call { name: name.to_string(), may_write, no_return })
    }

    pub fn cmp(&mut self, name: &str, pred: CmpPred, lhs: SymExpr, rhs: SymExpr) -> InstId {
        self.push(name, InstKind::Cmp { pred, lhs, rhs })
    }

    fn terminate(&mut self, term: Terminator) {
        if let Some(b) = self.current {
            self.blocks[b.0].term = term;
            self.terminated[b.0] = true;
        }
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: InstId, then_bb: BlockId, else_bb: BlockId) {
        self.terminate(Terminator::CondBr { cond, then_bb, else_bb });
    }

    pub fn switch(&mut self, value: SymExpr, cases: Vec<(i64, BlockId)>, default: BlockId) {
        self.terminate(Terminator::Switch { value, cases, default });
    }

    pub fn ret(&mut self) {
        self.terminate(Terminator::Return);
    }

    pub fn unreachable(&mut self) {
        self.terminate(Terminator::Unreachable);
    }

    /// Create `for (iv = lower; iv < upper; iv++)` after `preheader`, which is
    /// terminated with a branch to the header. The body is left open; it must
    /// eventually branch to `latch`.
    pub fn counted_loop(&mut self, name: &str, preheader: BlockId, lower: SymExpr, upper: SymExpr) -> CountedLoop {
        let header = self.block(&format!("{}.header", name));
        let body = self.block(&format!("{}.body", name));
        let latch = self.block(&format!("{}.latch", name));
        let exit = self.block(&format!("{}.exit", name));
        let iv = SymExpr::addrec(lower, SymExpr::constant(1), header).with_nsw();

        self.switch_to(preheader);
        self.br(header);
        self.switch_to(header);
        let cond = self.cmp(&format!("{}.cond", name), CmpPred::Slt, iv.clone(), upper);
        self.cond_br(cond, body, exit);
        self.switch_to(latch);
        self.br(header);
        self.switch_to(body);
        CountedLoop { header, body, latch, exit, iv }
    }

    /// Finish the function and compute its control-flow analyses.
    pub fn build(self) -> Result<HostFunction, ScopError> {
        if self.blocks.is_empty() {
            return Err(ScopError::new(ScopErrorKind::Empty, format!("function '{}' has no blocks", self.name)));
        }
        for (b, done) in self.blocks.iter().zip(&self.terminated) {
            if !done {
                return Err(ScopError::new(
                    ScopErrorKind::IrregularControlFlow,
                    format!("block '{}' has no terminator", b.name),
                ));
            }
            for s in b.term.successors() {
                if s.0 >= self.blocks.len() {
                    return Err(ScopError::new(
                        ScopErrorKind::IrregularControlFlow,
                        format!("block '{}' branches to unknown block {}", b.name, s),
                    ));
                }
            }
        }
        let n = self.blocks.len();
        let mut func = HostFunction {
            name: self.name,
            args: self.args,
            arrays: self.arrays,
            blocks: self.blocks,
            insts: self.insts,
            entry: BlockId(0),
            preds: Vec::new(),
            rpo: Vec::new(),
            rpo_index: vec![None; n],
            idom: Vec::new(),
            ipdom: Vec::new(),
            loops: Vec::new(),
            block_loop: Vec::new(),
            irreducible: Vec::new(),
            users: HashMap::new(),
        };
        func.analyze();
        log::trace!(
            "built function '{}': {} blocks, {} loops",
            func.name,
            func.blocks.len(),
            func.loops.len()
        );
        Ok(func)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nest() -> HostFunction {
        let mut fb = FunctionBuilder::new("nest");
        let n = fb.arg("N", 64);
        let entry = fb.block("entry");
        let outer = fb.counted_loop("i", entry, SymExpr::constant(0), n.clone());
        let inner = fb.counted_loop("j", outer.body, SymExpr::constant(0), n);
        fb.switch_to(inner.body);
        fb.store(Pointer::new("A", vec![outer.iv.clone(), inner.iv.clone()]), Operand::Const(0));
        fb.br(inner.latch);
        fb.switch_to(inner.exit);
        fb.br(outer.latch);
        fb.switch_to(outer.exit);
        fb.ret();
        fb.build().unwrap()
    }

    #[test]
    fn test_loops_detected() {
        let f = nest();
        assert_eq!(f.loops().len(), 2);
        let inner_body = f.block_by_name("j.body").unwrap();
        let nest = f.loop_nest(inner_body);
        assert_eq!(nest.len(), 2);
        assert_eq!(f.loop_of(inner_body).unwrap().depth, 2);
        assert!(f.irreducible_edges().is_empty());
    }

    #[test]
    fn test_dominance() {
        let f = nest();
        let entry = f.entry;
        let header = f.block_by_name("i.header").unwrap();
        let body = f.block_by_name("j.body").unwrap();
        let exit = f.block_by_name("i.exit").unwrap();
        assert!(f.dominates(entry, body));
        assert!(f.dominates(header, body));
        assert!(!f.dominates(body, header));
        assert!(f.post_dominates(exit, entry));
        assert_eq!(f.ipdom(header), Some(exit));
    }

    #[test]
    fn test_rpo_starts_at_entry() {
        let f = nest();
        assert_eq!(f.rpo()[0], f.entry);
        assert_eq!(f.rpo().len(), f.blocks.len());
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let mut fb = FunctionBuilder::new("bad");
        fb.block("entry");
        assert!(fb.build().is_err());
    }
}
