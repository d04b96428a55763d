//! Data dependence analysis over a region model.
//!
//! Dependences are computed at statement level from the access relations
//! and the current schedule:
//! - RAW: a read of an element after a write to it
//! - WAR: a write to an element after a read of it
//! - WAW: a write to an element after another write to it
//! - RED: dependences between the two accesses of one reduction
//! - TC_RED: every ordered pair of reduction instances on the same element
//!
//! With value-based analysis, a dependence is dropped when a must-write to
//! the same element is scheduled between its source and its sink.

use crate::config::{DependenceAnalysisType, DependenceOptions};
use crate::ir::pir::{ReductionType, Scop};
use crate::polyhedral::{AffineExpr, Constraint, IntegerMap, IntegerSet, PolyCtx, Space, UnionMap};
use crate::utils::errors::{DependenceError, DependenceErrorKind, PolyError};
use log::{debug, info, trace};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

/// Kind of data dependence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependenceKind {
    /// Read-after-write (true/flow dependence)
    Flow,
    /// Write-after-read (anti dependence)
    Anti,
    /// Write-after-write (output dependence)
    Output,
    /// Between the accesses of one reduction
    Reduction,
    /// Transitive closure of the reduction dependences
    ReductionClosure,
}

impl DependenceKind {
    /// Whether a legal schedule must respect this dependence.
    pub fn is_validity(&self) -> bool {
        matches!(self, DependenceKind::Flow | DependenceKind::Anti | DependenceKind::Output)
    }

    /// Get short name for the dependence kind.
    pub fn short_name(&self) -> &'static str {
        match self {
            DependenceKind::Flow => "RAW",
            DependenceKind::Anti => "WAR",
            DependenceKind::Output => "WAW",
            DependenceKind::Reduction => "RED",
            DependenceKind::ReductionClosure => "TC_RED",
        }
    }

    fn bit(&self) -> u8 {
        match self {
            DependenceKind::Flow => 1,
            DependenceKind::Anti => 2,
            DependenceKind::Output => 4,
            DependenceKind::Reduction => 8,
            DependenceKind::ReductionClosure => 16,
        }
    }
}

/// A set of dependence kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepKinds(u8);

impl DepKinds {
    pub const RAW: DepKinds = DepKinds(1);
    pub const WAR: DepKinds = DepKinds(2);
    pub const WAW: DepKinds = DepKinds(4);
    pub const RED: DepKinds = DepKinds(8);
    pub const TC_RED: DepKinds = DepKinds(16);
    /// Dependences every legal schedule must respect
    pub const VALIDITY: DepKinds = DepKinds(1 | 2 | 4);

    pub fn contains(&self, kind: DependenceKind) -> bool {
        self.0 & kind.bit() != 0
    }
}

impl BitOr for DepKinds {
    type Output = DepKinds;

    fn bitor(self, rhs: DepKinds) -> DepKinds {
        DepKinds(self.0 | rhs.0)
    }
}

/// Direction of a dependence in one schedule dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// < (forward dependence, positive distance)
    Lt,
    /// = (same iteration, zero distance)
    Eq,
    /// > (backward dependence, negative distance)
    Gt,
    /// <= (forward or same)
    Le,
    /// >= (backward or same)
    Ge,
    /// * (unknown/any direction)
    Star,
}

impl Direction {
    pub fn to_char(&self) -> char {
        match self {
            Direction::Lt => '<',
            Direction::Eq => '=',
            Direction::Gt => '>',
            Direction::Le => '≤',
            Direction::Ge => '≥',
            Direction::Star => '*',
        }
    }

    /// Check if this direction allows parallelization.
    pub fn allows_parallel(&self) -> bool {
        matches!(self, Direction::Eq)
    }

    /// Compute direction from a distance value.
    pub fn from_distance(dist: i64) -> Direction {
        match dist.cmp(&0) {
            std::cmp::Ordering::Less => Direction::Gt,
            std::cmp::Ordering::Equal => Direction::Eq,
            std::cmp::Ordering::Greater => Direction::Lt,
        }
    }

    /// Direction of distances in `[lo, hi]`; `None` is unbounded.
    pub fn from_range(lo: Option<i64>, hi: Option<i64>) -> Direction {
        match (lo, hi) {
            (Some(l), Some(h)) if l == h => Direction::from_distance(l),
            (Some(l), _) if l > 0 => Direction::Lt,
            (Some(l), _) if l == 0 => Direction::Le,
            (_, Some(h)) if h < 0 => Direction::Gt,
            (_, Some(h)) if h == 0 => Direction::Ge,
            _ => Direction::Star,
        }
    }
}

/// Lifecycle of the dependence information of one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependenceState {
    /// Never computed
    Empty,
    /// Valid for the schedule it was computed with
    Computed,
    /// The schedule changed since the last computation
    Stale,
}

/// Dependence information of one region.
#[derive(Debug, Clone)]
pub struct Dependences {
    options: DependenceOptions,
    state: DependenceState,
    raw: UnionMap,
    war: UnionMap,
    waw: UnionMap,
    red: UnionMap,
    tc_red: UnionMap,
}

/// One access prepared for the pairwise computation.
struct AccessInfo {
    stmt: String,
    array: String,
    relation: IntegerMap,
    must: bool,
    affine: bool,
    reduction: bool,
}

struct DependenceMaps {
    raw: UnionMap,
    war: UnionMap,
    waw: UnionMap,
    red: UnionMap,
    tc_red: UnionMap,
}

impl Dependences {
    pub fn new(options: &DependenceOptions) -> Self {
        Self {
            options: options.clone(),
            state: DependenceState::Empty,
            raw: UnionMap::empty(),
            war: UnionMap::empty(),
            waw: UnionMap::empty(),
            red: UnionMap::empty(),
            tc_red: UnionMap::empty(),
        }
    }

    pub fn state(&self) -> DependenceState {
        self.state
    }

    /// Mark the information outdated after a schedule change.
    pub fn invalidate(&mut self) {
        if self.state == DependenceState::Computed {
            self.state = DependenceState::Stale;
        }
    }

    /// Compute the dependences unless they are current.
    pub fn ensure(&mut self, scop: &Scop) -> Result<(), DependenceError> {
        match self.state {
            DependenceState::Computed => Ok(()),
            DependenceState::Empty | DependenceState::Stale => self.compute(scop),
        }
    }

    /// Compute the dependences of `scop` under its current schedule. When
    /// the operation budget is exhausted nothing is kept.
    pub fn compute(&mut self, scop: &Scop) -> Result<(), DependenceError> {
        let options = self.options.clone();
        let result = scop.ctx.scoped(options.max_operations, |ctx| compute_maps(scop, &options, ctx));
        match result {
            Ok(maps) => {
                self.raw = maps.raw;
                self.war = maps.war;
                self.waw = maps.waw;
                self.red = maps.red;
                self.tc_red = maps.tc_red;
                self.state = DependenceState::Computed;
                info!(
                    "dependences of {}: {} RAW, {} WAR, {} WAW, {} RED",
                    scop.name,
                    self.raw.maps().len(),
                    self.war.maps().len(),
                    self.waw.maps().len(),
                    self.red.maps().len()
                );
                Ok(())
            }
            Err(e) => {
                debug!("dependence computation of {} aborted: {}", scop.name, e);
                *self = Dependences::new(&options);
                Err(DependenceError::new(DependenceErrorKind::Timeout, e.message))
            }
        }
    }

    /// Union of the dependences of the given kinds.
    pub fn get(&self, kinds: DepKinds) -> Result<UnionMap, DependenceError> {
        if self.state != DependenceState::Computed {
            return Err(DependenceError::new(
                DependenceErrorKind::NotComputed,
                "dependences are not computed for the current schedule",
            ));
        }
        let mut result = UnionMap::empty();
        let parts = [
            (DependenceKind::Flow, &self.raw),
            (DependenceKind::Anti, &self.war),
            (DependenceKind::Output, &self.waw),
            (DependenceKind::Reduction, &self.red),
            (DependenceKind::ReductionClosure, &self.tc_red),
        ];
        for (kind, map) in parts {
            if kinds.contains(kind) {
                result = result.union(map);
            }
        }
        Ok(result.coalesce())
    }

    /// Whether every validity dependence is carried forward by `schedule`.
    pub fn is_valid_schedule(&self, schedule: &UnionMap) -> Result<bool, DependenceError> {
        let deps = self.get(DepKinds::VALIDITY)?;
        let schedules = padded_schedules(schedule);
        for dep in deps.maps() {
            let Some(mapped) = to_schedule_space(dep, &schedules) else {
                debug!("schedule misses a statement of dependence {}", dep);
                return Ok(false);
            };
            let forward = IntegerMap::lex_lt(&mapped.space().domain());
            if !mapped.is_subset(&forward) {
                debug!("schedule violates dependence {}", dep);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether no dependence of `kinds` is carried by schedule dimension
    /// `dim`, given that all outer dimensions are executed sequentially.
    /// Dependences of statements missing from `schedule` are ignored, so a
    /// schedule restricted to the statements of one loop answers for that
    /// loop only.
    pub fn is_parallel(&self, schedule: &UnionMap, dim: usize, kinds: DepKinds) -> Result<bool, DependenceError> {
        let deps = self.get(kinds)?;
        let schedules = padded_schedules(schedule);
        for dep in deps.maps() {
            let Some(mapped) = to_schedule_space(dep, &schedules) else { continue };
            let Some(deltas) = deltas_at(&mapped, dim) else { continue };
            if deltas.dim_min(dim) != Some(0) || deltas.dim_max(dim) != Some(0) {
                trace!("dimension {} carries {}", dim, dep);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The smallest distance in dimension `dim` over the validity
    /// dependences not carried by an outer dimension. `None` when there is
    /// no such dependence or the distance is unbounded.
    pub fn minimal_dependence_distance(&self, schedule: &UnionMap, dim: usize) -> Result<Option<i64>, DependenceError> {
        let deps = self.get(DepKinds::VALIDITY)?;
        let schedules = padded_schedules(schedule);
        let mut min: Option<i64> = None;
        for dep in deps.maps() {
            let Some(mapped) = to_schedule_space(dep, &schedules) else { return Ok(None) };
            let Some(deltas) = deltas_at(&mapped, dim) else { continue };
            match deltas.dim_min(dim) {
                Some(d) => min = Some(min.map_or(d, |m| m.min(d))),
                None => return Ok(None),
            }
        }
        Ok(min)
    }

    /// Per-dimension directions of every dependence of `kinds` in the space
    /// of `schedule`.
    pub fn directions(&self, schedule: &UnionMap, kinds: DepKinds) -> Result<Vec<(String, String, Vec<Direction>)>, DependenceError> {
        let deps = self.get(kinds)?;
        let schedules = padded_schedules(schedule);
        let mut result = Vec::new();
        for dep in deps.maps() {
            let Some(mapped) = to_schedule_space(dep, &schedules) else { continue };
            let deltas = mapped.deltas();
            let dirs = (0..deltas.dim())
                .map(|d| {
                    let (lo, hi) = deltas.col_extrema(deltas.space.out_offset() + d);
                    Direction::from_range(lo, hi)
                })
                .collect();
            result.push((
                dep.in_name().unwrap_or("").to_string(),
                dep.out_name().unwrap_or("").to_string(),
                dirs,
            ));
        }
        Ok(result)
    }
}

impl fmt::Display for Dependences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.state != DependenceState::Computed {
            return writeln!(f, "\tn/a");
        }
        writeln!(f, "\tRAW dependences:\n\t\t{}", self.raw)?;
        writeln!(f, "\tWAR dependences:\n\t\t{}", self.war)?;
        writeln!(f, "\tWAW dependences:\n\t\t{}", self.waw)?;
        writeln!(f, "\tReduction dependences:\n\t\t{}", self.red)?;
        writeln!(f, "\tTransitive closure of reduction dependences:\n\t\t{}", self.tc_red)
    }
}

/// Flattened schedules keyed by statement, padded to one width.
fn padded_schedules(schedule: &UnionMap) -> HashMap<String, IntegerMap> {
    let width = schedule.maps().iter().map(|m| m.n_out()).max().unwrap_or(0);
    let mut result = HashMap::new();
    for m in schedule.maps() {
        let Some(name) = m.in_name() else { continue };
        let n = m.n_out();
        let mut padded = m.add_out_dims(width - n);
        for d in n..width {
            padded = padded.fix_out(d, 0);
        }
        result.insert(name.to_string(), padded.set_out_name(None));
    }
    result
}

/// `{ t(s) -> t(t) : s -> t in dep }`
fn to_schedule_space(dep: &IntegerMap, schedules: &HashMap<String, IntegerMap>) -> Option<IntegerMap> {
    let src = schedules.get(dep.in_name()?)?;
    let dst = schedules.get(dep.out_name()?)?;
    Some(dep.apply_domain(src).apply_range(dst))
}

/// Distances of the pairs of `mapped` that agree on the dimensions before
/// `dim`; `None` if there are none.
fn deltas_at(mapped: &IntegerMap, dim: usize) -> Option<IntegerSet> {
    let n = mapped.n_in();
    if dim >= n {
        return None;
    }
    let space = mapped.space().clone();
    let cols = space.n_cols();
    let mut prefix = mapped.clone();
    for k in 0..dim {
        prefix = prefix.with_constraint(Constraint::eq(
            AffineExpr::var(space.in_offset() + k, cols),
            AffineExpr::var(space.out_offset() + k, cols),
        ));
    }
    if prefix.is_empty() {
        return None;
    }
    Some(prefix.deltas())
}

fn precedes(src: &IntegerMap, dst: &IntegerMap) -> IntegerMap {
    let time = src.space().range();
    src.apply_range(&IntegerMap::lex_lt(&time)).apply_range(&dst.reverse())
}

fn compute_maps(scop: &Scop, options: &DependenceOptions, ctx: &PolyCtx) -> Result<DependenceMaps, PolyError> {
    let schedules = padded_schedules(&scop.schedule_map());
    let mut reads = Vec::new();
    let mut writes = Vec::new();
    for stmt in &scop.statements {
        if stmt.domain.is_empty() || !schedules.contains_key(&stmt.name) {
            continue;
        }
        for access in &stmt.accesses {
            let info = AccessInfo {
                stmt: stmt.name.clone(),
                array: access.array_name().to_string(),
                relation: access.latest_relation().intersect_domain(&stmt.domain),
                must: access.is_must_write(),
                affine: access.affine,
                reduction: access.reduction != ReductionType::None,
            };
            if access.is_read() {
                reads.push(info);
            } else {
                writes.push(info);
            }
        }
    }
    let killers: Vec<&AccessInfo> = writes.iter().filter(|w| w.must && w.affine).collect();
    let value_based = options.analysis_type == DependenceAnalysisType::ValueBased;
    let mut orders = OrderCache { schedules: &schedules, cache: HashMap::new() };

    let write_refs: Vec<&AccessInfo> = writes.iter().collect();
    let read_refs: Vec<&AccessInfo> = reads.iter().collect();
    let killers = if value_based { killers } else { Vec::new() };
    let (raw, red_raw) = pairwise(&write_refs, &read_refs, &killers, &mut orders, ctx)?;
    let (war, red_war) = pairwise(&read_refs, &write_refs, &killers, &mut orders, ctx)?;
    let (waw, red_waw) = pairwise(&write_refs, &write_refs, &killers, &mut orders, ctx)?;

    let mut tc_red = UnionMap::empty();
    for w in writes.iter().filter(|w| w.reduction) {
        ctx.charge(w.relation.pieces().len() as u64 + 1)?;
        let order = orders.get(&w.stmt, &w.stmt);
        let same = w.relation.apply_range(&w.relation.reverse()).intersect(&order);
        if !same.is_empty() {
            tc_red.add(same.reverse());
            tc_red.add(same);
        }
    }

    let finish = |m: UnionMap| -> UnionMap {
        let m = if options.simplify { m.intersect_params(&scop.context) } else { m };
        m.coalesce()
    };
    Ok(DependenceMaps {
        raw: finish(raw),
        war: finish(war),
        waw: finish(waw),
        red: finish(red_raw.union(&red_war).union(&red_waw)),
        tc_red: finish(tc_red),
    })
}

/// Schedule order relations between statements, computed once per pair.
struct OrderCache<'s> {
    schedules: &'s HashMap<String, IntegerMap>,
    cache: HashMap<(String, String), IntegerMap>,
}

impl OrderCache<'_> {
    fn get(&mut self, src: &str, dst: &str) -> IntegerMap {
        let key = (src.to_string(), dst.to_string());
        if let Some(order) = self.cache.get(&key) {
            return order.clone();
        }
        let order = match (self.schedules.get(src), self.schedules.get(dst)) {
            (Some(s), Some(d)) => precedes(s, d),
            _ => IntegerMap::empty(Space::map(0, 0)),
        };
        self.cache.insert(key, order.clone());
        order
    }
}

/// Dependences from `sources` to `sinks`, split into ordinary and
/// reduction dependences.
fn pairwise(
    sources: &[&AccessInfo],
    sinks: &[&AccessInfo],
    killers: &[&AccessInfo],
    orders: &mut OrderCache<'_>,
    ctx: &PolyCtx,
) -> Result<(UnionMap, UnionMap), PolyError> {
    let mut normal = UnionMap::empty();
    let mut reduction = UnionMap::empty();
    for src in sources {
        for snk in sinks.iter().filter(|s| s.array == src.array) {
            ctx.charge((src.relation.pieces().len() * snk.relation.pieces().len()) as u64 + 1)?;
            let order = orders.get(&src.stmt, &snk.stmt);
            let mem = src.relation.apply_range(&snk.relation.reverse()).intersect(&order).coalesce();
            if mem.is_empty() {
                continue;
            }
            let mut dep = mem.clone();
            if snk.affine {
                for k in killers.iter().filter(|k| k.array == src.array) {
                    ctx.charge(mem.pieces().len() as u64 + 1)?;
                    let before = src.relation.apply_range(&k.relation.reverse()).intersect(&orders.get(&src.stmt, &k.stmt));
                    let after = k.relation.apply_range(&snk.relation.reverse()).intersect(&orders.get(&k.stmt, &snk.stmt));
                    let kill = before.apply_range(&after);
                    if kill.is_empty() {
                        continue;
                    }
                    let (rest, exact) = dep.subtract_checked(&kill);
                    if exact {
                        dep = rest;
                    } else {
                        trace!("inexact kill of {} -> {} by {}", src.stmt, snk.stmt, k.stmt);
                    }
                }
            }
            if dep.is_empty() {
                continue;
            }
            let dep = dep.coalesce();
            if src.stmt == snk.stmt && src.reduction && snk.reduction {
                reduction.add(dep);
            } else {
                normal.add(dep);
            }
        }
    }
    Ok((normal, reduction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::builder::build_scop;
    use crate::analysis::reduction::detect_reductions;
    use crate::analysis::region::RegionDetector;
    use crate::config::ScopOptions;
    use crate::ir::host::{ArrayDecl, BinOpKind, FunctionBuilder, HostFunction, Operand, Pointer};
    use crate::ir::scev::SymExpr;
    use crate::polyhedral::parse_union_map;

    fn scop_of(func: &HostFunction) -> Scop {
        let region = RegionDetector::new(func).detect_function().unwrap();
        let (mut scop, _) = build_scop(func, &region, &ScopOptions::default(), PolyCtx::unlimited());
        detect_reductions(&mut scop, func);
        scop
    }

    /// for (i = 0; i < N; i++) S[i] = S[i - 1] + 1;
    fn recurrence() -> HostFunction {
        let mut fb = FunctionBuilder::new("recurrence");
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

    /// s = 0; for (i = 0; i < N; i++) A[0] = A[0] + B[i];
    fn sum() -> HostFunction {
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

    #[test]
    fn test_state_machine() {
        let func = recurrence();
        let scop = scop_of(&func);
        let mut deps = Dependences::new(&DependenceOptions::default());
        assert_eq!(deps.state(), DependenceState::Empty);
        assert!(deps.get(DepKinds::RAW).is_err());
        deps.invalidate();
        assert_eq!(deps.state(), DependenceState::Empty);
        deps.ensure(&scop).unwrap();
        assert_eq!(deps.state(), DependenceState::Computed);
        deps.invalidate();
        assert_eq!(deps.state(), DependenceState::Stale);
        assert!(deps.get(DepKinds::RAW).is_err());
        deps.ensure(&scop).unwrap();
        assert_eq!(deps.state(), DependenceState::Computed);
    }

    #[test]
    fn test_recurrence_distance_one() {
        let func = recurrence();
        let scop = scop_of(&func);
        let mut deps = Dependences::new(&DependenceOptions::default());
        deps.compute(&scop).unwrap();
        let raw = deps.get(DepKinds::RAW).unwrap();
        let map = raw.get("Stmt_i_body", "Stmt_i_body").unwrap();
        // [N, i, i']
        assert!(map.contains(&[10, 3, 4]));
        assert!(!map.contains(&[10, 3, 5]));
        let schedule = scop.schedule_map();
        assert!(!deps.is_parallel(&schedule, 1, DepKinds::VALIDITY).unwrap());
        assert_eq!(deps.minimal_dependence_distance(&schedule, 1).unwrap(), Some(1));
        assert!(deps.is_valid_schedule(&schedule).unwrap());
    }

    #[test]
    fn test_memory_based_keeps_killed_dependences() {
        // for (i = 0; i < N; i++) { A[0] = i; B[i] = A[0]; }
        let mut fb = FunctionBuilder::new("overwrite");
        let n = fb.arg("N", 64);
        fb.array(ArrayDecl::new("A", vec![Some(SymExpr::constant(1))]));
        fb.array(ArrayDecl::new("B", vec![None]));
        let entry = fb.block("entry");
        let l = fb.counted_loop("i", entry, SymExpr::constant(0), n);
        fb.store(Pointer::new("A", vec![SymExpr::constant(0)]), Operand::Const(7));
        let v = fb.load("v", Pointer::new("A", vec![SymExpr::constant(0)]));
        let w = fb.binop("w", BinOpKind::Add, Operand::Inst(v), Operand::Const(0));
        fb.store(Pointer::new("B", vec![l.iv.clone()]), Operand::Inst(w));
        fb.br(l.latch);
        fb.switch_to(l.exit);
        fb.ret();
        let func = fb.build().unwrap();
        let scop = scop_of(&func);

        let mut value = Dependences::new(&DependenceOptions::default());
        value.compute(&scop).unwrap();
        let raw = value.get(DepKinds::RAW).unwrap();
        let map = raw.get("Stmt_i_body", "Stmt_i_body").unwrap();
        // only the next instance overwrites A[0] before reading it
        assert!(map.contains(&[10, 1, 2]));
        assert!(!map.contains(&[10, 1, 3]));
        let waw = value.get(DepKinds::WAW).unwrap();
        let map = waw.get("Stmt_i_body", "Stmt_i_body").unwrap();
        assert!(map.contains(&[10, 1, 2]));
        assert!(!map.contains(&[10, 1, 3]));

        let options = DependenceOptions { analysis_type: DependenceAnalysisType::MemoryBased, ..Default::default() };
        let mut memory = Dependences::new(&options);
        memory.compute(&scop).unwrap();
        let waw = memory.get(DepKinds::WAW).unwrap();
        assert!(waw.get("Stmt_i_body", "Stmt_i_body").unwrap().contains(&[10, 1, 3]));
        let raw = memory.get(DepKinds::RAW).unwrap();
        assert!(raw.get("Stmt_i_body", "Stmt_i_body").unwrap().contains(&[10, 1, 3]));
    }

    #[test]
    fn test_reduction_dependences_are_separate() {
        let func = sum();
        let scop = scop_of(&func);
        let mut deps = Dependences::new(&DependenceOptions::default());
        deps.compute(&scop).unwrap();
        assert!(deps.get(DepKinds::VALIDITY).unwrap().is_empty());
        let red = deps.get(DepKinds::RED).unwrap();
        assert!(!red.is_empty());
        let schedule = scop.schedule_map();
        assert!(deps.is_parallel(&schedule, 1, DepKinds::VALIDITY).unwrap());
        assert!(!deps.is_parallel(&schedule, 1, DepKinds::VALIDITY | DepKinds::RED).unwrap());
        let tc = deps.get(DepKinds::TC_RED).unwrap();
        let closure = tc.get("Stmt_i_body", "Stmt_i_body").unwrap();
        assert!(closure.contains(&[10, 1, 5]));
        assert!(closure.contains(&[10, 5, 1]));
    }

    #[test]
    fn test_invalid_schedule_detected() {
        let func = recurrence();
        let scop = scop_of(&func);
        let mut deps = Dependences::new(&DependenceOptions::default());
        deps.compute(&scop).unwrap();
        let reversed = parse_union_map("[N] -> { Stmt_i_body[i] -> [0, -i, 0] }").unwrap();
        assert!(!deps.is_valid_schedule(&reversed).unwrap());
        let shifted = parse_union_map("[N] -> { Stmt_i_body[i] -> [0, i + 5, 0] }").unwrap();
        assert!(deps.is_valid_schedule(&shifted).unwrap());
    }

    #[test]
    fn test_budget_exhaustion() {
        let func = recurrence();
        let scop = scop_of(&func);
        let options = DependenceOptions { max_operations: Some(1), ..Default::default() };
        let mut deps = Dependences::new(&options);
        let err = deps.compute(&scop).unwrap_err();
        assert_eq!(err.kind, DependenceErrorKind::Timeout);
        assert_eq!(deps.state(), DependenceState::Empty);
    }

    #[test]
    fn test_directions() {
        let func = recurrence();
        let scop = scop_of(&func);
        let mut deps = Dependences::new(&DependenceOptions::default());
        deps.compute(&scop).unwrap();
        let dirs = deps.directions(&scop.schedule_map(), DepKinds::RAW).unwrap();
        assert_eq!(dirs.len(), 1);
        assert_eq!(dirs[0].2, vec![Direction::Eq, Direction::Lt, Direction::Eq]);
        assert_eq!(Direction::from_range(Some(0), None), Direction::Le);
        assert_eq!(Direction::Lt.to_char(), '<');
    }
}
