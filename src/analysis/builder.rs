//! Construction of the region model from a detected region.
//!
//! Domains are built in two passes over the region in reverse post-order.
//! The push pass propagates the entry domain along forward edges,
//! constraining it by the branch conditions of each edge. The pull pass
//! recomputes every domain from its already final predecessors and bounds
//! loop headers by the conditions of their back edges. Statements, access
//! relations, invariant load classes, scalar accesses and the original
//! schedule are derived from the final domains.

use crate::analysis::affinator::{AffineResult, Affinator, Location};
use crate::analysis::region::{DetectedRegion, NestedKind, RegionElement};
use crate::config::ScopOptions;
use crate::ir::host::{BlockId, ElementType, HostFunction, InstId, InstKind, Operand, Pointer, Terminator};
use crate::ir::pir::{
    AccessType, AssumptionKind, AssumptionSign, InvariantEquivClass, MemoryAccess, MemoryKind, ReductionType,
    Scop, ScopStmt, StmtId, StmtKind,
};
use crate::ir::scev::{SymExpr, ValueRef};
use crate::polyhedral::{parse_set, AffineExpr, Constraint, IntegerMap, IntegerSet, PolyCtx, PwAff, Space};
use crate::transform::schedule_tree::{Band, SchedAff, ScheduleNode, ScheduleTree};
use crate::utils::errors::Diagnostic;
use log::{debug, info, trace};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Build the region model of `region`.
pub fn build_scop(
    func: &HostFunction,
    region: &DetectedRegion,
    options: &ScopOptions,
    ctx: PolyCtx,
) -> (Scop, Vec<Diagnostic>) {
    ScopBuilder::new(func, region, options, ctx).build()
}

/// Builds one [`Scop`]. Domains can be inspected after [`build_domains`]
/// before the model is completed by [`build`].
///
/// [`build_domains`]: ScopBuilder::build_domains
/// [`build`]: ScopBuilder::build
pub struct ScopBuilder<'f> {
    func: &'f HostFunction,
    region: &'f DetectedRegion,
    options: &'f ScopOptions,
    affinator: Affinator<'f>,
    scop: Scop,
    order: Vec<BlockId>,
    /// The block a block's domain is kept on: itself, or its subregion's entry
    node_of: HashMap<BlockId, BlockId>,
    edge_conditions: HashMap<(BlockId, BlockId), IntegerSet>,
    push_domains: HashMap<BlockId, IntegerSet>,
    domains: HashMap<BlockId, IntegerSet>,
    domains_built: bool,
    hoisted: BTreeSet<InstId>,
    diagnostics: Vec<Diagnostic>,
}

impl<'f> ScopBuilder<'f> {
    pub fn new(func: &'f HostFunction, region: &'f DetectedRegion, options: &'f ScopOptions, ctx: PolyCtx) -> Self {
        let affinator = Affinator::new(func, region.blocks.clone())
            .with_ignore_wrapping(options.ignore_integer_wrapping)
            .with_max_pieces(options.max_disjuncts);
        let mut node_of = HashMap::new();
        for &b in &region.blocks {
            let node = match region.subregion_of(b) {
                Some(RegionElement::Subregion { entry, .. }) => *entry,
                _ => b,
            };
            node_of.insert(b, node);
        }
        let order = func.rpo().iter().copied().filter(|b| region.contains(*b)).collect();
        Self {
            func,
            region,
            options,
            affinator,
            scop: Scop::new(&func.name, ctx),
            order,
            node_of,
            edge_conditions: HashMap::new(),
            push_domains: HashMap::new(),
            domains: HashMap::new(),
            domains_built: false,
            hoisted: BTreeSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Domain of `block` after the push pass.
    pub fn push_domain(&self, block: BlockId) -> Option<&IntegerSet> {
        self.push_domains.get(&self.node(block))
    }

    /// Final domain of `block`.
    pub fn domain(&self, block: BlockId) -> Option<&IntegerSet> {
        self.domains.get(&self.node(block))
    }

    pub fn scop(&self) -> &Scop {
        &self.scop
    }

    fn node(&self, block: BlockId) -> BlockId {
        self.node_of.get(&block).copied().unwrap_or(block)
    }

    fn is_subregion_entry(&self, block: BlockId) -> bool {
        matches!(self.region.subregion_of(block), Some(RegionElement::Subregion { entry, .. }) if *entry == block)
    }

    fn loops_of(&self, block: BlockId) -> Vec<BlockId> {
        self.region.loops_of(self.func, block)
    }

    fn universe(&self, n_dim: usize) -> IntegerSet {
        IntegerSet::universe(Space::set(n_dim).with_param_names(self.scop.param_names()))
    }

    /// Compute the domains of every block.
    pub fn build_domains(&mut self) {
        if self.domains_built {
            return;
        }
        self.domains_built = true;
        self.alias_required_loads();
        self.push_pass();
        self.pull_pass();
        self.handle_error_blocks();
        self.record_condition_assumptions();
        for (block, domain) in &self.domains {
            if domain.pieces.len() > self.options.max_disjuncts {
                debug!("domain of {} has {} pieces", block, domain.pieces.len());
                self.scop.invalidate(AssumptionKind::Complexity, Some(*block));
                break;
            }
        }
    }

    /// Complete the region model.
    pub fn build(mut self) -> (Scop, Vec<Diagnostic>) {
        self.build_domains();
        self.build_statements();
        self.build_array_accesses();
        self.hoist_invariant_loads();
        self.build_scalar_accesses();
        let removed = self.scop.remove_stmts(|s| s.domain.is_empty() || s.accesses.is_empty());
        if removed > 0 {
            debug!("removed {} statements without instances or accesses", removed);
        }
        self.apply_user_context();
        self.build_schedule();
        self.scop.align_params();
        info!(
            "built scop {}: {} statements, {} arrays, {} parameters, max loop depth {}",
            self.scop.name,
            self.scop.statements.len(),
            self.scop.arrays.len(),
            self.scop.parameters.len(),
            self.scop.max_loop_depth
        );
        (self.scop, self.diagnostics)
    }

    /// Loads of one address required to be invariant share one parameter,
    /// named after the first of them.
    fn alias_required_loads(&mut self) {
        for (_, members) in self.group_loads(self.region.required_invariant_loads.iter().copied()) {
            let name = self.func.inst(members[0]).name.clone();
            for m in members {
                self.affinator.alias_parameter(ValueRef::Inst(m), &name);
            }
        }
    }

    /// Group loads by address, keeping the lowest instruction first.
    fn group_loads(&self, loads: impl Iterator<Item = InstId>) -> Vec<((String, Vec<SymExpr>), Vec<InstId>)> {
        let mut ids: Vec<InstId> = loads.collect();
        ids.sort();
        let mut groups: Vec<((String, Vec<SymExpr>), Vec<InstId>)> = Vec::new();
        for id in ids {
            let Some(ptr) = self.func.inst(id).pointer() else { continue };
            let key = (ptr.base.clone(), ptr.subscripts.clone());
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(id),
                None => groups.push((key, vec![id])),
            }
        }
        groups
    }

    /// Forward edges leaving a node, as `(from, to)` block pairs.
    fn out_edges(&self, node: BlockId) -> Vec<(BlockId, BlockId)> {
        let sources: Vec<BlockId> = match self.region.subregion_of(node) {
            Some(RegionElement::Subregion { entry, blocks, .. }) if *entry == node => blocks.clone(),
            _ => vec![node],
        };
        let mut edges = Vec::new();
        for from in sources {
            for to in self.func.successors(from) {
                if !self.region.contains(to) || self.func.is_back_edge(from, to) || self.node(to) == node {
                    continue;
                }
                edges.push((from, to));
            }
        }
        edges
    }

    /// The instances of `node` taking the edge `from -> to`, in the space
    /// of `node`. Non-affine or unknown conditions are not constrained.
    fn edge_condition(&mut self, node: BlockId, from: BlockId, to: BlockId) -> IntegerSet {
        if let Some(cond) = self.edge_conditions.get(&(from, to)) {
            return cond.clone();
        }
        let loops = self.loops_of(node);
        let cond = if node != from || self.is_subregion_entry(node) {
            None
        } else {
            match &self.func.block(from).term {
                Terminator::CondBr { cond, then_bb, else_bb } if then_bb != else_bb => {
                    match &self.func.inst(*cond).kind {
                        InstKind::Cmp { pred, lhs, rhs } => {
                            let pred = if to == *then_bb { *pred } else { pred.inverse() };
                            self.affinator.condition(&mut self.scop, pred, lhs, rhs, Location::new(&loops))
                        }
                        _ => None,
                    }
                }
                Terminator::Switch { value, cases, default } => self
                    .affinator
                    .translate(&mut self.scop, value, Location::new(&loops))
                    .affine()
                    .map(|v| switch_condition(&v, cases, *default, to)),
                _ => None,
            }
        };
        let cond = cond.unwrap_or_else(|| self.universe(loops.len()));
        self.edge_conditions.insert((from, to), cond.clone());
        cond
    }

    fn push_pass(&mut self) {
        let entry = self.region.entry;
        let entry_loops = self.loops_of(entry);
        let entry_domain = adjust_domain(&self.universe(0), &[], &entry_loops);
        self.push_domains.insert(entry, entry_domain);

        let order = self.order.clone();
        for b in order {
            if self.node(b) != b {
                continue;
            }
            let Some(domain) = self.push_domains.get(&b).cloned() else {
                trace!("{} is not reached", b);
                continue;
            };
            if self.func.is_error_block(b) {
                continue;
            }
            let loops = self.loops_of(b);
            for (from, to) in self.out_edges(b) {
                let target = self.node(to);
                let cond = self.edge_condition(b, from, to);
                let reached = adjust_domain(&domain.intersect(&cond), &loops, &self.loops_of(target));
                let merged = match self.push_domains.remove(&target) {
                    Some(existing) => existing.union(&reached).coalesce(),
                    None => reached.coalesce(),
                };
                self.push_domains.insert(target, merged);
            }
        }
    }

    fn pull_pass(&mut self) {
        let func = self.func;
        let order = self.order.clone();
        for b in order {
            if self.node(b) != b {
                continue;
            }
            let Some(push) = self.push_domains.get(&b).cloned() else { continue };
            let loops = self.loops_of(b);
            let mut domain = if b == self.region.entry {
                push
            } else {
                let mut from_preds = IntegerSet::empty(self.universe(loops.len()).space);
                for &p in func.predecessors(b) {
                    if !self.region.contains(p) || func.is_back_edge(p, b) {
                        continue;
                    }
                    let pred = self.node(p);
                    if pred == b || func.is_error_block(pred) {
                        continue;
                    }
                    let Some(pred_domain) = self.domains.get(&pred).cloned() else { continue };
                    let cond = self.edge_condition(pred, p, b);
                    let reached = adjust_domain(&pred_domain.intersect(&cond), &self.loops_of(pred), &loops);
                    from_preds = from_preds.union(&reached);
                }
                from_preds.intersect(&push).coalesce()
            };
            if loops.last() == Some(&b) {
                domain = self.bound_loop(b, &domain);
            }
            self.domains.insert(b, domain);
        }
    }

    /// Remove the iterations of a header following one in which no latch
    /// took the back edge.
    fn bound_loop(&mut self, header: BlockId, domain: &IntegerSet) -> IntegerSet {
        let Some(l) = self.func.loop_by_header(header) else { return domain.clone() };
        let loops = self.loops_of(header);
        let mut taken = IntegerSet::empty(domain.space.clone());
        for &latch in &l.latches {
            if !self.region.contains(latch) {
                continue;
            }
            let node = self.node(latch);
            let Some(latch_domain) = self.push_domains.get(&node).cloned() else { continue };
            let cond = self.edge_condition(node, latch, header);
            taken = taken.union(&adjust_domain(&latch_domain.intersect(&cond), &self.loops_of(node), &loops));
        }
        let (not_taken, exact) = domain.subtract_checked(&taken);
        if !exact {
            debug!("loop {} keeps an unbounded domain", header);
            return domain.clone();
        }
        let later = later_iterations(&not_taken);
        let (bounded, exact) = domain.subtract_checked(&later);
        if !exact {
            debug!("loop {} keeps an unbounded domain", header);
            return domain.clone();
        }
        let bounded = bounded.coalesce();
        trace!("bounded loop {}: {}", header, bounded);
        bounded
    }

    /// Error blocks never get statements; reaching one is excluded by a
    /// restriction.
    fn handle_error_blocks(&mut self) {
        let errors: Vec<BlockId> =
            self.order.iter().copied().filter(|b| self.node(*b) == *b && self.func.is_error_block(*b)).collect();
        for b in errors {
            let Some(domain) = self.domains.remove(&b) else { continue };
            if domain.is_empty() {
                continue;
            }
            debug!("error block {} is reachable", b);
            self.scop.add_assumption(AssumptionKind::ErrorBlock, domain, AssumptionSign::Restriction, Some(b));
        }
    }

    /// Translate branch conditions once more at their final domains so
    /// that wrapping and unsigned comparisons are guarded.
    fn record_condition_assumptions(&mut self) {
        let order = self.order.clone();
        for b in order {
            if self.is_subregion_entry(b) {
                continue;
            }
            let Some(domain) = self.domains.get(&b).cloned() else { continue };
            if domain.is_empty() {
                continue;
            }
            let loops = self.loops_of(b);
            let loc = Location::new(&loops).at(b, &domain);
            match &self.func.block(b).term {
                Terminator::CondBr { cond, .. } => {
                    if let InstKind::Cmp { pred, lhs, rhs } = &self.func.inst(*cond).kind {
                        self.affinator.condition(&mut self.scop, *pred, lhs, rhs, loc);
                    }
                }
                Terminator::Switch { value, .. } => {
                    self.affinator.translate(&mut self.scop, value, loc);
                }
                _ => {}
            }
        }
    }

    fn build_statements(&mut self) {
        let mut names: HashSet<String> = HashSet::new();
        let mut entries = Vec::new();
        collect_stmt_entries(&self.region.root(), &mut entries);
        for element in entries {
            let (entry, kind, blocks) = match element {
                RegionElement::Block(b) => (b, StmtKind::Block(b), vec![b]),
                RegionElement::Subregion { entry, blocks, .. } => {
                    (entry, StmtKind::Region { entry, blocks: blocks.clone() }, blocks)
                }
                RegionElement::NestedRegion { .. } => continue,
            };
            let Some(domain) = self.domains.get(&entry).cloned() else { continue };
            let base = format!("Stmt_{}", sanitize(&self.func.block(entry).name));
            let mut name = base.clone();
            let mut n = 0;
            while !names.insert(name.clone()) {
                n += 1;
                name = format!("{}_{}", base, n);
            }
            let insts = blocks.iter().flat_map(|b| self.func.block(*b).insts.iter().copied()).collect();
            let stmt = ScopStmt {
                id: StmtId(self.scop.statements.len()),
                domain: domain.set_tuple_name(Some(name.clone())),
                name,
                kind,
                accesses: Vec::new(),
                loops: self.loops_of(entry),
                insts,
            };
            trace!("statement {} with domain {}", stmt.name, stmt.domain);
            self.scop.statements.push(stmt);
        }
    }

    fn build_array_accesses(&mut self) {
        for idx in 0..self.scop.statements.len() {
            let stmt = &self.scop.statements[idx];
            let (id, entry) = (stmt.id, stmt.entry_block());
            let region_stmt = stmt.is_region_stmt();
            let insts = stmt.insts.clone();
            for inst_id in insts {
                let inst = self.func.inst(inst_id);
                let (ptr, access_type) = match &inst.kind {
                    InstKind::Load { ptr } => (ptr, AccessType::Read),
                    // writes off the statement's entry block may not execute
                    InstKind::Store { ptr, .. } if region_stmt && Some(inst.block) != entry => {
                        (ptr, AccessType::MayWrite)
                    }
                    InstKind::Store { ptr, .. } => (ptr, AccessType::MustWrite),
                    _ => continue,
                };
                let access = self.build_array_access(idx, inst_id, inst.block, ptr, access_type);
                trace!("{}: {}", id, access.relation);
                self.scop.statements[idx].accesses.push(access);
            }
        }
    }

    fn build_array_access(
        &mut self,
        idx: usize,
        inst: InstId,
        block: BlockId,
        ptr: &Pointer,
        access_type: AccessType,
    ) -> MemoryAccess {
        let decl = self.func.array(&ptr.base);
        let element_type = decl.map_or(ElementType::Double, |d| d.element_type);
        let n = ptr.subscripts.len();
        let mut sizes = Vec::with_capacity(n);
        for k in 0..n {
            let size = decl.and_then(|d| d.sizes.get(k).cloned().flatten());
            sizes.push(size.and_then(|s| self.affinator.translate(&mut self.scop, &s, Location::new(&[])).affine()));
        }
        let array = self.scop.get_or_create_array(&ptr.base, MemoryKind::Array, element_type, sizes.clone());
        let array_name = self.scop.array(array).name.clone();
        let (stmt_id, stmt_name) = (self.scop.statements[idx].id, self.scop.statements[idx].name.clone());
        let loops = self.scop.statements[idx].loops.clone();
        let domain = self.scop.statements[idx].domain.clone();

        let mut funcs = Vec::with_capacity(n);
        for s in &ptr.subscripts {
            match self.affinator.translate(&mut self.scop, s, Location::new(&loops).at(block, &domain)) {
                AffineResult::Affine(pw) => funcs.push(pw),
                AffineResult::NonAffine(reason) => {
                    debug!("non-affine subscript of {} in {}: {}", ptr.base, stmt_name, reason);
                    break;
                }
            }
        }
        let params = self.scop.param_names();
        let domain = domain.align_params(&params);
        let range = Space::named_set(&array_name, n);
        let affine_map = if funcs.len() == n { PwAff::list_to_map(&domain.space, range.clone(), &funcs) } else { None };
        let (relation, affine) = match affine_map {
            Some(map) => (map, true),
            None => (IntegerMap::universe(Space::map_from(&domain.space, &range)), false),
        };
        let relation = relation
            .set_in_name(Some(stmt_name))
            .set_out_name(Some(array_name))
            .align_params(&params)
            .intersect_domain(&domain);
        let params = self.scop.param_names();
        let sizes: Vec<Option<AffineExpr>> =
            sizes.iter().map(|s| s.as_ref().and_then(|s| s.align_params(&params).as_affine())).collect();
        let relation = if affine { fold_access(relation.align_params(&params), &sizes) } else { relation };
        if affine {
            self.assume_in_bounds(&relation, &domain, &sizes, block);
        }
        let access_type = match access_type {
            AccessType::MustWrite if !affine => AccessType::MayWrite,
            other => other,
        };
        MemoryAccess {
            stmt: stmt_id,
            access_type,
            array,
            kind: MemoryKind::Array,
            subscripts: ptr.subscripts.clone(),
            relation,
            new_relation: None,
            reduction: ReductionType::None,
            affine,
            inst: Some(inst),
            incoming: Vec::new(),
        }
    }

    /// Assume every accessed element lies inside the array. The outermost
    /// dimension is only checked when its size is known.
    fn assume_in_bounds(
        &mut self,
        relation: &IntegerMap,
        domain: &IntegerSet,
        sizes: &[Option<AffineExpr>],
        block: BlockId,
    ) {
        let params = self.scop.param_names();
        let range = relation.space().range().with_param_names(params.clone());
        let n = range.n_cols();
        let mut outside = IntegerSet::empty(range.clone());
        for (k, size) in sizes.iter().enumerate() {
            let col = range.out_offset() + k;
            if k > 0 || size.is_some() {
                let below = IntegerSet::universe(range.clone()).with_constraint(Constraint::upper_bound(col, -1, n));
                outside = outside.union(&below);
            }
            if let Some(size) = size {
                let above = IntegerSet::universe(range.clone())
                    .with_constraint(Constraint::ge(AffineExpr::var(col, n), size.resized(n)));
                outside = outside.union(&above);
            }
        }
        if outside.is_empty() {
            return;
        }
        let touched = relation.intersect_range(&outside).domain().intersect(domain).params().coalesce();
        if touched.is_empty() {
            return;
        }
        let (inside, exact) = IntegerSet::universe(touched.space.clone()).subtract_checked(&touched);
        if exact {
            self.scop.add_assumption(AssumptionKind::InBounds, inside, AssumptionSign::Assumption, Some(block));
        } else {
            self.scop.add_assumption(AssumptionKind::InBounds, touched, AssumptionSign::Restriction, Some(block));
        }
    }

    /// Replace reads of read-only locations with invariant addresses by
    /// parameters, one per address.
    fn hoist_invariant_loads(&mut self) {
        let written: BTreeSet<String> = self
            .scop
            .statements
            .iter()
            .flat_map(|s| s.writes())
            .map(|a| a.array_name().to_string())
            .collect();
        let mut candidates = Vec::new();
        let mut context_of: HashMap<InstId, IntegerSet> = HashMap::new();
        for stmt in &self.scop.statements {
            for access in stmt.reads() {
                let Some(inst) = access.inst else { continue };
                let invariant = access.affine
                    && access.is_array_kind()
                    && !written.contains(&self.scop.array(access.array).name)
                    && access.subscripts.iter().all(|s| s.loops().is_empty());
                if invariant {
                    candidates.push(inst);
                    context_of.insert(inst, stmt.domain.params());
                }
            }
        }
        let params = self.scop.param_names();
        let mut classes = Vec::new();
        for ((base, subscripts), members) in self.group_loads(candidates.into_iter()) {
            let representative = members[0];
            let name = self.func.inst(representative).name.clone();
            let mut execution_context = IntegerSet::empty(Space::params(params.clone()));
            for m in &members {
                if let Some(ctx) = context_of.get(m) {
                    execution_context = execution_context.union(&ctx.align_params(&params));
                }
            }
            let bits = self.func.value_bits(&ValueRef::Inst(representative));
            let param = self.scop.add_parameter(&name, Some(SymExpr::value(representative)), bits);
            for m in &members {
                self.affinator.alias_parameter(ValueRef::Inst(*m), &param);
                self.hoisted.insert(*m);
            }
            debug!("hoisted {} load(s) of {} into parameter {}", members.len(), base, param);
            classes.push(InvariantEquivClass {
                base,
                subscripts,
                representative,
                members,
                execution_context: execution_context.coalesce(),
                param,
            });
        }
        for stmt in &mut self.scop.statements {
            let hoisted = &self.hoisted;
            stmt.accesses.retain(|a| a.inst.map_or(true, |i| !(a.is_read() && hoisted.contains(&i))));
        }
        self.scop.invariant_classes = classes;

        let modeled: BTreeSet<InstId> = self.scop.statements.iter().flat_map(|s| s.insts.iter().copied()).collect();
        let failed = self
            .region
            .required_invariant_loads
            .iter()
            .find(|id| modeled.contains(*id) && !self.hoisted.contains(*id));
        if let Some(id) = failed {
            let block = self.func.inst(*id).block;
            debug!("required invariant load {} could not be hoisted", self.func.inst(*id).name);
            self.scop.invalidate(AssumptionKind::InvariantLoad, Some(block));
        }
    }

    /// Model values crossing statement boundaries, PHI nodes and values
    /// leaving through the region exit with synthetic arrays.
    fn build_scalar_accesses(&mut self) {
        let func = self.func;
        let mut stmt_of: HashMap<BlockId, usize> = HashMap::new();
        for (idx, stmt) in self.scop.statements.iter().enumerate() {
            match &stmt.kind {
                StmtKind::Block(b) => {
                    stmt_of.insert(*b, idx);
                }
                StmtKind::Region { blocks, .. } => {
                    for b in blocks {
                        stmt_of.insert(*b, idx);
                    }
                }
                StmtKind::Imported => {}
            }
        }
        let stmt_of_inst = |id: InstId| stmt_of.get(&func.inst(id).block).copied();

        for idx in 0..self.scop.statements.len() {
            let insts = self.scop.statements[idx].insts.clone();
            for id in insts {
                let inst = func.inst(id);
                if self.hoisted.contains(&id) {
                    continue;
                }
                let defines = matches!(inst.kind, InstKind::Load { .. } | InstKind::BinOp { .. } | InstKind::Phi { .. });
                if defines {
                    let escapes = func.users(id).iter().any(|&u| {
                        let user = func.inst(u);
                        if matches!(user.kind, InstKind::Phi { .. }) {
                            return false;
                        }
                        !self.region.contains(user.block) || stmt_of.get(&user.block).map_or(false, |&s| s != idx)
                    });
                    if escapes {
                        let elem = self.value_type(id);
                        self.add_scalar_access(idx, &inst.name, MemoryKind::Value, elem, AccessType::MustWrite, id, None);
                    }
                }
                match &inst.kind {
                    InstKind::Phi { incoming } => {
                        let mut written = false;
                        for (pred, value) in incoming {
                            if !self.region.contains(*pred) {
                                continue;
                            }
                            let Some(&ps) = stmt_of.get(pred) else { continue };
                            if ps == idx {
                                continue;
                            }
                            self.add_phi_write(ps, id, MemoryKind::Phi, *pred, value, &stmt_of_inst);
                            written = true;
                        }
                        if written {
                            let elem = self.value_type(id);
                            self.add_scalar_access(idx, &inst.name, MemoryKind::Phi, elem, AccessType::Read, id, None);
                        }
                    }
                    _ => {
                        for op in inst.operands() {
                            if let Operand::Inst(v) = op {
                                self.add_value_read(idx, *v, &stmt_of_inst);
                            }
                        }
                    }
                }
            }
        }

        if let Some(exit) = self.region.exit {
            for &id in &func.block(exit).insts {
                let InstKind::Phi { incoming } = &func.inst(id).kind else { continue };
                for (pred, value) in incoming {
                    if let Some(&ps) = stmt_of.get(pred) {
                        self.add_phi_write(ps, id, MemoryKind::ExitPhi, *pred, value, &stmt_of_inst);
                    }
                }
            }
        }
    }

    fn value_type(&self, id: InstId) -> ElementType {
        match &self.func.inst(id).kind {
            InstKind::Load { ptr } => self.func.array(&ptr.base).map_or(ElementType::Double, |d| d.element_type),
            _ => ElementType::Int(self.func.value_bits(&ValueRef::Inst(id))),
        }
    }

    /// Read of a value defined in another statement.
    fn add_value_read(&mut self, idx: usize, value: InstId, stmt_of_inst: &dyn Fn(InstId) -> Option<usize>) {
        if self.hoisted.contains(&value) || !self.region.contains(self.func.inst(value).block) {
            return;
        }
        match stmt_of_inst(value) {
            Some(def) if def != idx => {
                let name = self.func.inst(value).name.clone();
                let elem = self.value_type(value);
                self.add_scalar_access(idx, &name, MemoryKind::Value, elem, AccessType::Read, value, None);
            }
            _ => {}
        }
    }

    fn add_phi_write(
        &mut self,
        idx: usize,
        phi: InstId,
        kind: MemoryKind,
        pred: BlockId,
        value: &Operand,
        stmt_of_inst: &dyn Fn(InstId) -> Option<usize>,
    ) {
        let stmt = &self.scop.statements[idx];
        let access_type = if stmt.is_region_stmt() && stmt.entry_block() != Some(pred) {
            AccessType::MayWrite
        } else {
            AccessType::MustWrite
        };
        let name = self.func.inst(phi).name.clone();
        let elem = self.value_type(phi);
        self.add_scalar_access(idx, &name, kind, elem, access_type, phi, Some((pred, value.clone())));
        if let Operand::Inst(v) = value {
            self.add_value_read(idx, *v, stmt_of_inst);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_scalar_access(
        &mut self,
        idx: usize,
        base: &str,
        kind: MemoryKind,
        element_type: ElementType,
        access_type: AccessType,
        inst: InstId,
        incoming: Option<(BlockId, Operand)>,
    ) {
        let array = self.scop.get_or_create_array(base, kind, element_type, Vec::new());
        let array_name = self.scop.array(array).name.clone();
        let stmt = &mut self.scop.statements[idx];
        if let Some(existing) =
            stmt.accesses.iter_mut().find(|a| a.array == array && a.is_read() == (access_type == AccessType::Read))
        {
            existing.incoming.extend(incoming);
            return;
        }
        let space = Space::map_from(&stmt.domain.space, &Space::named_set(&array_name, 0))
            .with_in_name(Some(stmt.name.clone()));
        let relation = IntegerMap::universe(space).intersect_domain(&stmt.domain);
        trace!("{} {} of {}", stmt.name, access_type.name(), array_name);
        stmt.accesses.push(MemoryAccess {
            stmt: stmt.id,
            access_type,
            array,
            kind,
            subscripts: Vec::new(),
            relation,
            new_relation: None,
            reduction: ReductionType::None,
            affine: true,
            inst: Some(inst),
            incoming: incoming.into_iter().collect(),
        });
    }

    fn apply_user_context(&mut self) {
        let Some(text) = self.options.user_context.clone() else { return };
        let set = match parse_set(&text) {
            Ok(set) => set,
            Err(e) => {
                self.diagnostics.push(
                    Diagnostic::error(format!("cannot parse user context '{}': {}", text, e))
                        .with_note("the user context is ignored"),
                );
                return;
            }
        };
        let params = self.scop.param_names();
        if set.dim() != 0 {
            self.diagnostics.push(
                Diagnostic::error(format!("user context '{}' has set dimensions", text))
                    .with_note("the user context must only constrain parameters"),
            );
            return;
        }
        if let Some(unknown) = set.space.param_names.iter().find(|p| !params.contains(*p)) {
            self.diagnostics.push(
                Diagnostic::error(format!("user context mentions unknown parameter '{}'", unknown))
                    .with_note(format!("the region parameters are [{}]", params.join(", "))),
            );
            return;
        }
        debug!("user context: {}", set);
        self.scop.context = self.scop.context.intersect(&set.align_params(&params)).coalesce();
    }

    fn build_schedule(&mut self) {
        let params = self.scop.param_names();
        let root = match schedule_node(&self.region.root(), &self.scop, params.len()) {
            Some(ScheduleNode::Filter(_, child)) => *child,
            Some(node) => node,
            None => ScheduleNode::Leaf,
        };
        let tree = ScheduleTree::new(params, self.scop.domains(), root);
        self.scop.set_schedule(tree);
        self.scop.max_loop_depth = self.scop.statements.iter().map(|s| s.depth()).max().unwrap_or(0);
        self.scop.region = Some((self.region.entry, self.region.exit));
    }
}

/// Move `set` from the loops `from` to the loops `to`: dimensions of loops
/// left are projected out, dimensions of loops entered start at zero.
fn adjust_domain(set: &IntegerSet, from: &[BlockId], to: &[BlockId]) -> IntegerSet {
    let common = from.iter().zip(to).take_while(|(a, b)| a == b).count();
    let mut set = set.clone();
    if from.len() > common {
        set = set.project_out(common, from.len() - common);
    }
    if to.len() > common {
        set = set.add_dims(to.len() - common);
        let n = set.space.n_cols();
        for d in common..to.len() {
            let col = set.space.out_offset() + d;
            set.add_constraint(Constraint::ge_zero(AffineExpr::var(col, n)));
        }
    }
    set
}

/// `{ [o, i] : exists i' < i with [o, i'] in set }`
fn later_iterations(set: &IntegerSet) -> IntegerSet {
    let n = set.dim();
    if n == 0 {
        return IntegerSet::empty(set.space.clone());
    }
    let space = Space::map(n, n).with_param_names(set.space.param_names.clone());
    let cols = space.n_cols();
    let (i0, o0) = (space.in_offset(), space.out_offset());
    let mut map = IntegerMap::universe(space);
    for k in 0..n - 1 {
        map = map.with_constraint(Constraint::eq(AffineExpr::var(o0 + k, cols), AffineExpr::var(i0 + k, cols)));
    }
    map = map.with_constraint(Constraint::lt(AffineExpr::var(i0 + n - 1, cols), AffineExpr::var(o0 + n - 1, cols)));
    map.apply_set(&set.clone().set_tuple_name(None))
}

fn switch_condition(value: &PwAff, cases: &[(i64, BlockId)], default: BlockId, to: BlockId) -> IntegerSet {
    let constant = |k: i64| PwAff::constant(value.space.clone(), k);
    let mut cond = IntegerSet::empty(value.space.clone());
    for (k, target) in cases {
        if *target == to {
            cond = cond.union(&value.eq_set(&constant(*k)));
        }
    }
    if to == default {
        let mut other = IntegerSet::universe(value.space.clone());
        for (k, _) in cases {
            other = other.intersect(&value.ne_set(&constant(*k)));
        }
        cond = cond.union(&other);
    }
    cond.coalesce()
}

fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
}

fn collect_stmt_entries(element: &RegionElement, out: &mut Vec<RegionElement>) {
    match element {
        RegionElement::NestedRegion { elements, .. } => {
            for e in elements {
                collect_stmt_entries(e, out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// The original schedule of an element: a sequence of its children, with a
/// one-dimensional band above the children of a loop.
fn schedule_node(element: &RegionElement, scop: &Scop, n_param: usize) -> Option<ScheduleNode> {
    match element {
        RegionElement::Block(b) | RegionElement::Subregion { entry: b, .. } => {
            let names: Vec<String> =
                scop.statements.iter().filter(|s| s.entry_block() == Some(*b)).map(|s| s.name.clone()).collect();
            if names.is_empty() {
                None
            } else {
                Some(ScheduleNode::filter(names, ScheduleNode::Leaf))
            }
        }
        RegionElement::NestedRegion { kind, elements } => {
            let children: Vec<ScheduleNode> = elements.iter().filter_map(|e| schedule_node(e, scop, n_param)).collect();
            if children.is_empty() {
                return None;
            }
            let sequence = ScheduleNode::Sequence(children);
            let stmts = sequence.statements().unwrap_or_default();
            let child = match kind {
                NestedKind::Affine => sequence,
                NestedKind::Loop(header) => {
                    let mut band = Band::new(1);
                    band.permutable = true;
                    for name in &stmts {
                        let Some(stmt) = scop.stmt_by_name(name) else { continue };
                        let Some(d) = stmt.loops.iter().position(|h| h == header) else { continue };
                        let n_cols = n_param + stmt.depth();
                        band = band.with_stmt(name, vec![SchedAff::new(AffineExpr::var(n_param + d, n_cols))]);
                    }
                    ScheduleNode::band(band, sequence)
                }
            };
            Some(ScheduleNode::Filter(stmts, Box::new(child)))
        }
    }
}

/// Fold negative subscripts of an inner dimension with parametric size
/// into the next outer one, so `A[i][j - M]` of `A[][M]` reads as
/// `A[i - 1][j]`. The folded relation is dropped when it needs more
/// pieces than the original.
fn fold_access(relation: IntegerMap, sizes: &[Option<AffineExpr>]) -> IntegerMap {
    let range = relation.space().range();
    let space = Space::map_from(&range, &range);
    let n = space.n_cols();
    let (inp, out_dims) = (space.in_offset(), space.n_dim);
    let identity: Vec<AffineExpr> = (0..out_dims).map(|d| AffineExpr::var(inp + d, n)).collect();
    let mut folded = relation.clone();
    for k in (1..sizes.len().min(out_dims)).rev() {
        let Some(size) = &sizes[k] else { continue };
        if size.is_constant() {
            continue;
        }
        let keep = IntegerMap::from_affine(space.clone(), &identity)
            .with_constraint(Constraint::lower_bound(inp + k, 0, n));
        let mut shifted = identity.clone();
        shifted[k - 1] = shifted[k - 1].add_constant(-1);
        shifted[k] = shifted[k].clone() + size.resized(n);
        let wrap = IntegerMap::from_affine(space.clone(), &shifted)
            .with_constraint(Constraint::upper_bound(inp + k, -1, n));
        folded = folded.apply_range(&keep.union(&wrap));
    }
    let folded = folded.coalesce();
    if folded.pieces().len() > relation.pieces().len() || folded.is_equal(&relation) {
        return relation;
    }
    trace!("folded access {} into {}", relation, folded);
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::region::RegionDetector;
    use crate::ir::host::{ArrayDecl, BinOpKind, CmpPred, FunctionBuilder};

    fn build(func: &HostFunction) -> (Scop, Vec<Diagnostic>) {
        let region = RegionDetector::new(func).detect_function().unwrap();
        build_scop(func, &region, &ScopOptions::default(), PolyCtx::unlimited())
    }

    /// for (i = 0; i < N; i++) for (j = 0; j < M; j++) A[i][j] = A[i][j] + B[i];
    fn scenario_a() -> HostFunction {
        let mut fb = FunctionBuilder::new("scenario_a");
        let n = fb.arg("N", 64);
        let m = fb.arg("M", 64);
        fb.array(ArrayDecl::new("A", vec![None, Some(m.clone())]));
        fb.array(ArrayDecl::new("B", vec![None]));
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

    #[test]
    fn test_loop_nest_domains() {
        let func = scenario_a();
        let (scop, diags) = build(&func);
        assert!(diags.is_empty());
        assert_eq!(scop.param_names(), vec!["N".to_string(), "M".to_string()]);
        let stmt = scop.stmt_by_name("Stmt_j_body").unwrap();
        assert_eq!(stmt.depth(), 2);
        assert!(stmt.domain.contains(&[4, 3, 0, 0]));
        assert!(stmt.domain.contains(&[4, 3, 3, 2]));
        assert!(!stmt.domain.contains(&[4, 3, 4, 0]));
        assert!(!stmt.domain.contains(&[4, 3, 0, 3]));
        assert_eq!(scop.max_loop_depth, 2);
        assert_eq!(stmt.reads().count(), 2);
        assert_eq!(stmt.writes().count(), 1);
        assert!(stmt.accesses.iter().all(|a| a.affine));
    }

    #[test]
    fn test_pull_domain_within_push_domain() {
        let func = scenario_a();
        let region = RegionDetector::new(&func).detect_function().unwrap();
        let options = ScopOptions::default();
        let mut builder = ScopBuilder::new(&func, &region, &options, PolyCtx::unlimited());
        builder.build_domains();
        for &b in &region.blocks {
            if let (Some(push), Some(pull)) = (builder.push_domain(b), builder.domain(b)) {
                assert!(pull.is_subset(push), "{}", func.block(b).name);
            }
        }
        let header = func.block_by_name("i.header").unwrap();
        let bounded = builder.domain(header).unwrap();
        // the header runs once more than the body
        assert!(bounded.contains(&[3, 0, 3]));
        assert!(!bounded.contains(&[3, 0, 4]));
    }

    #[test]
    fn test_original_schedule() {
        let func = scenario_a();
        let (scop, _) = build(&func);
        let flat = scop.schedule.stmt_map("Stmt_j_body").unwrap();
        assert_eq!(flat.n_out(), 5);
        assert!(flat.contains(&[4, 3, 1, 2, 0, 1, 0, 2, 0]));
        let scattering = scop.original_scattering();
        assert_eq!(scattering.maps()[0].n_out(), 2 * scop.max_loop_depth + 1);
    }

    #[test]
    fn test_nonaffine_subscript_downgrades_write() {
        let mut fb = FunctionBuilder::new("indirect");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![None]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        fb.switch_to(l.body);
        let square = SymExpr::Mul { ops: vec![l.iv.clone(), l.iv.clone()], nsw: true };
        fb.store(Pointer::new("A", vec![square]), Operand::Const(1));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let (scop, _) = build(&func);
        let stmt = scop.stmt_by_name("Stmt_i_body").unwrap();
        let write = stmt.writes().next().unwrap();
        assert!(!write.affine);
        assert!(write.is_may_write());
    }

    #[test]
    fn test_out_of_bounds_assumption() {
        // for (i = 0; i < N; i++) A[i + p] = 0; with A of size N
        let mut fb = FunctionBuilder::new("shifted");
        let n = fb.arg("N", 64);
        let p = fb.arg("p", 64);
        fb.array(ArrayDecl::new("A", vec![Some(n.clone())]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        fb.switch_to(l.body);
        fb.store(Pointer::new("A", vec![SymExpr::add(l.iv.clone(), p).with_nsw()]), Operand::Const(0));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let (scop, _) = build(&func);
        assert!(scop.assumptions.iter().any(|a| a.kind == AssumptionKind::InBounds));
        let rc = scop.run_condition();
        // [N, p]
        assert!(rc.contains(&[10, 0]));
        assert!(!rc.contains(&[10, 1]));
        assert!(!rc.contains(&[10, -1]));
    }

    #[test]
    fn test_negative_inner_subscript_folds_into_outer_dimension() {
        // for (i = 0; i < N; i++) for (j = 0; j < M; j++) A[i + 1][j - M] = 0; with A[][M]
        let mut fb = FunctionBuilder::new("folded");
        let n = fb.arg("N", 64);
        let m = fb.arg("M", 64);
        fb.array(ArrayDecl::new("A", vec![None, Some(m.clone())]));
        let entry = fb.block("entry");
        let outer = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        let inner = fb.counted_loop("j", outer.body, SymExpr::constant(0), m.clone());
        fb.switch_to(inner.body);
        let row = SymExpr::add(outer.iv.clone(), SymExpr::constant(1)).with_nsw();
        let col = SymExpr::sub(inner.iv.clone(), m).with_nsw();
        fb.store(Pointer::new("A", vec![row, col]), Operand::Const(0));
        fb.br(inner.latch);
        fb.switch_to(inner.exit);
        fb.br(outer.latch);
        fb.switch_to(outer.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let (scop, _) = build(&func);
        let stmt = scop.stmt_by_name("Stmt_j_body").unwrap();
        let write = stmt.writes().next().unwrap();
        // [N, M, i, j] -> A[i][j]
        assert!(write.relation.contains(&[4, 3, 2, 1, 2, 1]));
        assert!(!write.relation.contains(&[4, 3, 2, 1, 3, -2]));
        assert_eq!(write.relation.pieces().len(), 1);
        assert!(!scop.assumptions.iter().any(|a| a.kind == AssumptionKind::InBounds));
    }

    #[test]
    fn test_conditional_statement() {
        // for (i = 0; i < N; i++) if (i < 5) A[i] = 0;
        let mut fb = FunctionBuilder::new("guarded");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![None]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        let then_bb = fb.block("then");
        fb.switch_to(l.body);
        let c = fb.cmp("c", CmpPred::Slt, l.iv.clone(), SymExpr::constant(5));
        fb.cond_br(c, then_bb, l.latch);
        fb.switch_to(then_bb);
        fb.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(0));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let (scop, _) = build(&func);
        let stmt = scop.stmt_by_name("Stmt_then").unwrap();
        assert!(stmt.domain.contains(&[10, 4]));
        assert!(!stmt.domain.contains(&[10, 5]));
        assert!(!stmt.domain.contains(&[3, 3]));
    }

    #[test]
    fn test_error_block_restriction() {
        // for (i = 0; i < N; i++) { if (i == 100) abort(); A[i] = 0; }
        let mut fb = FunctionBuilder::new("checked");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![None]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        let fail = fb.block("fail");
        let store = fb.block("store");
        fb.switch_to(l.body);
        let c = fb.cmp("c", CmpPred::Eq, l.iv.clone(), SymExpr::constant(100));
        fb.cond_br(c, fail, store);
        fb.switch_to(fail);
        fb.call("abort", false, true);
        fb.unreachable();
        fb.switch_to(store);
        fb.store(Pointer::new("A", vec![l.iv.clone()]), Operand::Const(0));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let (scop, _) = build(&func);
        assert!(scop.stmt_by_name("Stmt_fail").is_none());
        assert!(scop.assumptions.iter().any(|a| a.kind == AssumptionKind::ErrorBlock));
        let rc = scop.run_condition();
        assert!(rc.contains(&[100]));
        assert!(!rc.contains(&[101]));
    }

    #[test]
    fn test_scalar_and_phi_accesses() {
        // s = 0; for (i = 0; i < N; i++) s = s + A[i]; B[0] = s;
        let mut fb = FunctionBuilder::new("sum");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![None]));
        fb.array(ArrayDecl::new("B", vec![Some(SymExpr::constant(1))]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        fb.switch_to(l.body);
        let x = fb.load("x", Pointer::new("A", vec![l.iv.clone()]));
        fb.br(l.latch);
        fb.switch_to(l.header);
        let s = fb.phi("s", vec![(entry, Operand::Const(0))]);
        fb.switch_to(l.latch);
        let next = fb.binop("s.next", BinOpKind::Add, Operand::Inst(s), Operand::Inst(x));
        fb.br(l.header);
        fb.switch_to(l.exit);
        fb.store(Pointer::new("B", vec![SymExpr::constant(0)]), Operand::Inst(s));
        fb.ret();
        let mut func = fb.build().unwrap();
        // the back edge value is defined after the phi
        if let InstKind::Phi { incoming } = &mut func.insts[s.0].kind {
            incoming.push((l.latch, Operand::Inst(next)));
        }
        let (scop, _) = build(&func);
        assert!(scop.array_by_name("MemRef_s__phi").is_some());
        assert!(scop.array_by_name("MemRef_x").is_some());
        let latch = scop.stmt_by_name("Stmt_i_latch").unwrap();
        assert!(latch.accesses.iter().any(|a| a.kind == MemoryKind::Phi && a.is_must_write()));
        assert!(latch.accesses.iter().any(|a| a.kind == MemoryKind::Value && a.is_read()));
        let exit = scop.stmt_by_name("Stmt_i_exit").unwrap();
        assert!(exit.accesses.iter().any(|a| a.kind == MemoryKind::Value && a.is_read()));
    }

    #[test]
    fn test_required_invariant_loads_share_a_class() {
        // for (i = 0; i < *P; i++) A[i] = 0; for (j = 0; j < *P; j++) B[j] = 0;
        let mut fb = FunctionBuilder::new("invariant");
        fb.array(ArrayDecl::new("P", vec![Some(SymExpr::constant(1))]));
        fb.array(ArrayDecl::new("A", vec![None]));
        fb.array(ArrayDecl::new("B", vec![None]));
        let entry = fb.block("entry");
        let p0 = fb.load("p0", Pointer::new("P", vec![SymExpr::constant(0)]));
        let first = fb.counted_loop("i", entry, SymExpr::constant(0), SymExpr::value(p0));
        fb.switch_to(first.body);
        fb.store(Pointer::new("A", vec![first.iv.clone()]), Operand::Const(0));
        fb.br(first.latch);
        fb.switch_to(first.exit);
        let p1 = fb.load("p1", Pointer::new("P", vec![SymExpr::constant(0)]));
        let second = fb.counted_loop("j", first.exit, SymExpr::constant(0), SymExpr::value(p1));
        fb.switch_to(second.body);
        fb.store(Pointer::new("B", vec![second.iv.clone()]), Operand::Const(0));
        fb.br(second.latch);
        fb.switch_to(second.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let (scop, _) = build(&func);
        assert_eq!(scop.invariant_classes.len(), 1);
        let class = &scop.invariant_classes[0];
        assert_eq!(class.members, vec![p0, p1]);
        assert_eq!(class.param, "p0");
        assert_eq!(scop.param_names(), vec!["p0".to_string()]);
        assert!(!scop.is_infeasible());
        let a = scop.stmt_by_name("Stmt_i_body").unwrap();
        let b = scop.stmt_by_name("Stmt_j_body").unwrap();
        assert!(a.domain.contains(&[3, 2]));
        assert!(b.domain.contains(&[3, 2]));
    }

    #[test]
    fn test_user_context() {
        let func = scenario_a();
        let region = RegionDetector::new(&func).detect_function().unwrap();
        let options = ScopOptions { user_context: Some("[N] -> { : N >= 16 }".to_string()), ..Default::default() };
        let (scop, diags) = build_scop(&func, &region, &options, PolyCtx::unlimited());
        assert!(diags.is_empty());
        assert!(!scop.context.contains(&[8, 0]));
        assert!(scop.context.contains(&[16, 0]));

        let options = ScopOptions { user_context: Some("[K] -> { : K >= 16 }".to_string()), ..Default::default() };
        let (scop, diags) = build_scop(&func, &region, &options, PolyCtx::unlimited());
        assert_eq!(diags.len(), 1);
        assert!(scop.context.contains(&[8, 0]));
    }
}
