//! Constraint-based affine scheduler.
//!
//! Hyperplanes are found one at a time, Pluto style: for every dependence
//! not yet carried, the difference of the target and source schedule
//! values must be non-negative (validity) and bounded by an affine
//! function of the parameters (proximity). Both conditions are turned into
//! linear constraints on the schedule coefficients with the affine form of
//! Farkas' lemma, and the lexicographically smallest bound is selected.
//! Hyperplanes that weakly satisfy the same dependences form a permutable
//! band; when no further hyperplane exists the statements are split along
//! the strongly connected components of the remaining dependence graph.

use crate::analysis::dependence::{DepKinds, Dependences};
use crate::config::{FusionStrategy, OptimizeOnly, ScheduleOptions};
use crate::ir::pir::Scop;
use crate::polyhedral::{AffineExpr, BasicSet, IntegerMap, IntegerSet, PolyCtx, UnionMap, UnionSet};
use crate::transform::ilp::IlpProblem;
use crate::transform::schedule_tree::{schedule_map, Band, SchedAff, ScheduleNode, ScheduleTree};
use crate::utils::errors::{DependenceError, ScheduleError, ScheduleErrorKind};
use crate::utils::matrix::RationalMatrix;
use log::{debug, trace};
use std::collections::BTreeSet;

/// One statement being scheduled.
#[derive(Debug, Clone)]
struct StmtInfo {
    name: String,
    domain: IntegerSet,
    dim: usize,
    /// Iterator coefficients of the hyperplanes found so far
    rows: Vec<Vec<i64>>,
}

impl StmtInfo {
    fn is_full_rank(&self) -> bool {
        self.dim == 0 || RationalMatrix::from_vec(self.rows.clone()).rank() >= self.dim
    }
}

/// A dependence between two statements, by index.
#[derive(Debug, Clone)]
struct DepEdge {
    src: usize,
    dst: usize,
    rel: IntegerMap,
}

/// An affine form over the columns of a dependence piece whose coefficients
/// are linear in the ILP variables.
#[derive(Debug, Default)]
struct FarkasForm {
    cols: Vec<Vec<(usize, i64)>>,
    constant: Vec<(usize, i64)>,
}

impl FarkasForm {
    fn new(n_cols: usize) -> Self {
        Self { cols: vec![Vec::new(); n_cols], constant: Vec::new() }
    }
}

/// ILP variable layout of one hyperplane search.
struct Layout {
    n_param: usize,
    /// Index of the first coefficient of each member statement
    base: Vec<(usize, usize)>,
    n_vars: usize,
}

impl Layout {
    fn new(n_param: usize, members: &[usize], stmts: &[StmtInfo]) -> Self {
        // [u_params | w | sum | per statement: iterators, constant]
        let mut next = n_param + 2;
        let mut base = Vec::with_capacity(members.len());
        for &m in members {
            base.push((m, next));
            next += stmts[m].dim + 1;
        }
        Self { n_param, base, n_vars: next }
    }

    fn u(&self, p: usize) -> usize {
        p
    }

    fn w(&self) -> usize {
        self.n_param
    }

    fn sum(&self) -> usize {
        self.n_param + 1
    }

    fn coeff(&self, stmt: usize, i: usize) -> usize {
        self.stmt_base(stmt) + i
    }

    fn constant(&self, stmt: usize, dim: usize) -> usize {
        self.stmt_base(stmt) + dim
    }

    fn stmt_base(&self, stmt: usize) -> usize {
        self.base.iter().find(|(s, _)| *s == stmt).map_or(0, |(_, b)| *b)
    }
}

/// Constraint-based scheduler.
pub struct Scheduler {
    options: ScheduleOptions,
    ctx: PolyCtx,
}

impl Scheduler {
    pub fn new(options: &ScheduleOptions, ctx: PolyCtx) -> Self {
        Self { options: options.clone(), ctx }
    }

    pub fn with_fusion(mut self, fusion: FusionStrategy) -> Self {
        self.options.fusion = fusion;
        self
    }

    pub fn with_max_coefficient(mut self, max: Option<i64>) -> Self {
        self.options.max_coefficient = max;
        self
    }

    pub fn with_outer_coincidence(mut self, enable: bool) -> Self {
        self.options.outer_coincidence = enable;
        self
    }

    /// Schedule the statements of `scop` under its computed dependences.
    pub fn schedule_scop(&self, scop: &Scop, deps: &Dependences) -> Result<ScheduleTree, ScheduleError> {
        let not_computed = |e: DependenceError| ScheduleError::new(ScheduleErrorKind::Unschedulable, e.message);
        let validity = deps.get(DepKinds::VALIDITY).map_err(not_computed)?;
        let proximity_kinds = match self.options.optimize_only {
            OptimizeOnly::All => DepKinds::VALIDITY,
            OptimizeOnly::Raw => DepKinds::RAW,
        };
        let mut proximity = deps.get(proximity_kinds).map_err(not_computed)?;
        if self.options.gist_dependences {
            proximity = gist_params(&proximity, &scop.context);
        }
        self.compute(&scop.domains(), &scop.param_names(), &validity, &proximity)
    }

    /// Schedule the statements of `domain`, in their order in `domain`.
    pub fn compute(
        &self,
        domain: &UnionSet,
        params: &[String],
        validity: &UnionMap,
        proximity: &UnionMap,
    ) -> Result<ScheduleTree, ScheduleError> {
        let mut stmts: Vec<StmtInfo> = domain
            .sets()
            .iter()
            .filter_map(|set| {
                let name = set.tuple_name()?.to_string();
                let domain = set.align_params(params);
                Some(StmtInfo { name, dim: domain.dim(), domain, rows: Vec::new() })
            })
            .collect();
        if stmts.is_empty() {
            return Ok(ScheduleTree::empty());
        }
        let validity = edges(validity, &stmts, params);
        let proximity = edges(proximity, &stmts, params);
        debug!(
            "scheduling {} statements with {} validity and {} proximity dependences",
            stmts.len(),
            validity.len(),
            proximity.len()
        );
        let members: Vec<usize> = (0..stmts.len()).collect();
        let root = self.ctx.scoped(self.options.max_operations, |ctx| {
            self.schedule_component(ctx, params, &mut stmts, &members, validity, proximity)
        })?;
        Ok(ScheduleTree::new(params.to_vec(), domain.clone(), root))
    }

    fn schedule_component(
        &self,
        ctx: &PolyCtx,
        params: &[String],
        stmts: &mut [StmtInfo],
        members: &[usize],
        validity: Vec<DepEdge>,
        proximity: Vec<DepEdge>,
    ) -> Result<ScheduleNode, ScheduleError> {
        let all_full = members.iter().all(|&m| stmts[m].is_full_rank());
        let split_first = self.options.fusion == FusionStrategy::Min && members.len() > 1;
        if all_full || split_first {
            let sccs = scc_order(members, &validity);
            if sccs.len() > 1 || (all_full && members.len() > 1) {
                return self.split(ctx, params, stmts, sccs, validity, proximity);
            }
            if all_full {
                if !validity.is_empty() {
                    return Err(ScheduleError::new(
                        ScheduleErrorKind::Unschedulable,
                        format!("dependences of {} remain after a full schedule", stmts[members[0]].name),
                    ));
                }
                return Ok(ScheduleNode::Leaf);
            }
        }

        let band = self.find_band(ctx, params, stmts, members, &validity, &proximity)?;
        let Some(band) = band else {
            let sccs = scc_order(members, &validity);
            if sccs.len() > 1 {
                return self.split(ctx, params, stmts, sccs, validity, proximity);
            }
            let names: Vec<&str> = members.iter().map(|&m| stmts[m].name.as_str()).collect();
            return Err(ScheduleError::new(
                ScheduleErrorKind::Unschedulable,
                format!("no schedule hyperplane for {{ {} }}", names.join("; ")),
            ));
        };

        let validity = residual(&validity, stmts, params, &band);
        let proximity = residual(&proximity, stmts, params, &band);
        let child = self.schedule_component(ctx, params, stmts, members, validity, proximity)?;
        Ok(ScheduleNode::band(band, child))
    }

    /// Sequence the components in `sccs`, each scheduled on its own.
    fn split(
        &self,
        ctx: &PolyCtx,
        params: &[String],
        stmts: &mut [StmtInfo],
        sccs: Vec<Vec<usize>>,
        validity: Vec<DepEdge>,
        proximity: Vec<DepEdge>,
    ) -> Result<ScheduleNode, ScheduleError> {
        if sccs.len() == 1 {
            let names: Vec<&str> = sccs[0].iter().map(|&m| stmts[m].name.as_str()).collect();
            return Err(ScheduleError::new(
                ScheduleErrorKind::Unschedulable,
                format!("cyclic dependences between {{ {} }}", names.join("; ")),
            ));
        }
        trace!("splitting into {} components", sccs.len());
        let mut children = Vec::with_capacity(sccs.len());
        for scc in sccs {
            let inside = |e: &DepEdge| scc.contains(&e.src) && scc.contains(&e.dst);
            let v: Vec<DepEdge> = validity.iter().filter(|e| inside(e)).cloned().collect();
            let p: Vec<DepEdge> = proximity.iter().filter(|e| inside(e)).cloned().collect();
            let names: Vec<String> = scc.iter().map(|&m| stmts[m].name.clone()).collect();
            let child = self.schedule_component(ctx, params, stmts, &scc, v, p)?;
            children.push(ScheduleNode::filter(names, child));
        }
        Ok(ScheduleNode::Sequence(children))
    }

    /// Find a permutable band for `members`; `None` if not even one
    /// hyperplane exists.
    fn find_band(
        &self,
        ctx: &PolyCtx,
        params: &[String],
        stmts: &mut [StmtInfo],
        members: &[usize],
        validity: &[DepEdge],
        proximity: &[DepEdge],
    ) -> Result<Option<Band>, ScheduleError> {
        let n_param = params.len();
        let mut rows: Vec<Vec<(usize, Vec<i64>, i64)>> = Vec::new();
        let mut coincident = Vec::new();
        loop {
            if members.iter().all(|&m| stmts[m].is_full_rank()) {
                break;
            }
            let want_zero = self.options.outer_coincidence && rows.is_empty();
            let mut found = None;
            if want_zero {
                found = self.find_hyperplane(ctx, n_param, stmts, members, validity, proximity, true)?;
            }
            if found.is_none() {
                found = self.find_hyperplane(ctx, n_param, stmts, members, validity, proximity, false)?;
            }
            let Some(row) = found else { break };
            let is_coincident = self.is_coincident(stmts, params, validity, &row);
            for (m, coeffs, _) in &row {
                stmts[*m].rows.push(coeffs.clone());
            }
            debug!("band member {}: {}coincident", rows.len(), if is_coincident { "" } else { "not " });
            rows.push(row);
            coincident.push(is_coincident);
            if !is_coincident && !self.options.maximize_band_depth {
                break;
            }
        }
        if rows.is_empty() {
            return Ok(None);
        }
        let mut band = Band::new(rows.len());
        band.permutable = true;
        band.coincident = coincident;
        for &m in members {
            let stmt = &stmts[m];
            let affs: Vec<SchedAff> = rows
                .iter()
                .map(|row| {
                    let (_, coeffs, constant) = row.iter().find(|(s, _, _)| *s == m).cloned().unwrap_or_default();
                    sched_aff(n_param, &coeffs, constant)
                })
                .collect();
            band = band.with_stmt(&stmt.name, affs);
        }
        Ok(Some(band))
    }

    /// Solve for one hyperplane: per member statement its iterator
    /// coefficients and constant term.
    #[allow(clippy::too_many_arguments)]
    fn find_hyperplane(
        &self,
        ctx: &PolyCtx,
        n_param: usize,
        stmts: &[StmtInfo],
        members: &[usize],
        validity: &[DepEdge],
        proximity: &[DepEdge],
        zero_distance: bool,
    ) -> Result<Option<Vec<(usize, Vec<i64>, i64)>>, ScheduleError> {
        let layout = Layout::new(n_param, members, stmts);
        let mut ilp = IlpProblem::new(layout.n_vars);

        for e in validity {
            for piece in e.rel.pieces().iter().filter(|p| !p.is_empty()) {
                add_farkas(&mut ilp, piece, &distance_form(&layout, stmts, e, piece, 1));
                if zero_distance {
                    add_farkas(&mut ilp, piece, &distance_form(&layout, stmts, e, piece, -1));
                }
            }
        }
        for e in proximity {
            for piece in e.rel.pieces().iter().filter(|p| !p.is_empty()) {
                add_farkas(&mut ilp, piece, &bound_form(&layout, stmts, e, piece));
            }
        }

        let mut sum = vec![(layout.sum(), -1)];
        for &m in members {
            for i in 0..stmts[m].dim {
                sum.push((layout.coeff(m, i), 1));
                if let Some(max) = self.options.max_coefficient {
                    ilp.add_upper_bound(layout.coeff(m, i), max);
                }
            }
            if let Some(max) = self.options.max_constant_term {
                ilp.add_upper_bound(layout.constant(m, stmts[m].dim), max);
            }
        }
        ilp.add_eq(sum, 0);

        let order = lexmin_order(&layout, stmts, members);
        let solve = |ilp: &IlpProblem| -> Result<Option<Vec<i64>>, ScheduleError> {
            ilp.lexmin(&order, ctx)
                .map_err(|e| ScheduleError::new(ScheduleErrorKind::Unschedulable, e.message))
        };

        let mut independence = ilp.clone();
        let complements: Vec<(usize, Vec<Vec<i64>>)> = members
            .iter()
            .filter(|&&m| !stmts[m].is_full_rank())
            .map(|&m| (m, orthogonal_rows(&stmts[m])))
            .collect();
        for (m, rows) in &complements {
            let mut total: Vec<(usize, i64)> = Vec::new();
            for h in rows {
                let terms: Vec<(usize, i64)> =
                    h.iter().enumerate().filter(|(_, c)| **c != 0).map(|(i, c)| (layout.coeff(*m, i), *c)).collect();
                total.extend(terms.iter().copied());
                independence.add_ge(terms, 0);
            }
            independence.add_ge(total, -1);
        }
        let mut solution = solve(&independence)?;

        // Any single orthogonal direction, in either sign
        let max_rows = complements.iter().map(|(_, r)| r.len()).max().unwrap_or(0);
        let mut option = 0;
        while solution.is_none() && option < 2 * max_rows {
            let sign = if option % 2 == 0 { 1 } else { -1 };
            let mut attempt = ilp.clone();
            for (m, rows) in &complements {
                let h = &rows[(option / 2) % rows.len()];
                let terms =
                    h.iter().enumerate().filter(|(_, c)| **c != 0).map(|(i, c)| (layout.coeff(*m, i), sign * c)).collect();
                attempt.add_ge(terms, -1);
            }
            solution = solve(&attempt)?;
            option += 1;
        }

        let Some(x) = solution else { return Ok(None) };
        trace!("hyperplane with proximity bound {}", x[layout.w()]);
        Ok(Some(
            members
                .iter()
                .map(|&m| {
                    let dim = stmts[m].dim;
                    let coeffs = (0..dim).map(|i| x[layout.coeff(m, i)]).collect();
                    (m, coeffs, x[layout.constant(m, dim)])
                })
                .collect(),
        ))
    }

    /// Whether `row` has distance zero on every dependence in `deps`.
    fn is_coincident(&self, stmts: &[StmtInfo], params: &[String], deps: &[DepEdge], row: &[(usize, Vec<i64>, i64)]) -> bool {
        let map_of = |s: usize| -> Option<IntegerMap> {
            let (_, coeffs, constant) = row.iter().find(|(m, _, _)| *m == s)?;
            Some(schedule_map(&stmts[s].domain, params, &[sched_aff(params.len(), coeffs, *constant)]))
        };
        deps.iter().all(|e| {
            let (Some(src), Some(dst)) = (map_of(e.src), map_of(e.dst)) else { return false };
            let deltas = e.rel.apply_domain(&src).apply_range(&dst).deltas();
            deltas.is_empty() || (deltas.dim_min(0) == Some(0) && deltas.dim_max(0) == Some(0))
        })
    }
}

fn sched_aff(n_param: usize, coeffs: &[i64], constant: i64) -> SchedAff {
    let mut all = vec![0; n_param];
    all.extend_from_slice(coeffs);
    SchedAff::new(AffineExpr::from_coeffs(all, constant))
}

fn gist_params(deps: &UnionMap, context: &IntegerSet) -> UnionMap {
    let mut result = UnionMap::empty();
    for m in deps.maps() {
        result.add(m.gist_params(context));
    }
    result
}

/// Statement-indexed dependences, one edge per relation.
fn edges(deps: &UnionMap, stmts: &[StmtInfo], params: &[String]) -> Vec<DepEdge> {
    let index = |name: Option<&str>| stmts.iter().position(|s| Some(s.name.as_str()) == name);
    deps.maps()
        .iter()
        .filter(|m| !m.is_empty())
        .filter_map(|m| {
            let src = index(m.in_name())?;
            let dst = index(m.out_name())?;
            Some(DepEdge { src, dst, rel: m.align_params(params) })
        })
        .collect()
}

/// `sign * (phi_dst(t) - phi_src(s))`
fn distance_form(layout: &Layout, stmts: &[StmtInfo], e: &DepEdge, piece: &BasicSet, sign: i64) -> FarkasForm {
    let mut form = FarkasForm::new(piece.n_total());
    let np = layout.n_param;
    let (ds, dt) = (stmts[e.src].dim, stmts[e.dst].dim);
    for i in 0..ds {
        form.cols[np + i].push((layout.coeff(e.src, i), -sign));
    }
    for j in 0..dt {
        form.cols[np + ds + j].push((layout.coeff(e.dst, j), sign));
    }
    form.constant.push((layout.constant(e.dst, dt), sign));
    form.constant.push((layout.constant(e.src, ds), -sign));
    form
}

/// `u . p + w - (phi_dst(t) - phi_src(s))`
fn bound_form(layout: &Layout, stmts: &[StmtInfo], e: &DepEdge, piece: &BasicSet) -> FarkasForm {
    let mut form = distance_form(layout, stmts, e, piece, -1);
    for p in 0..layout.n_param {
        form.cols[p].push((layout.u(p), 1));
    }
    form.constant.push((layout.w(), 1));
    form
}

/// Require `form >= 0` on every point of `piece`: the form must equal a
/// non-negative combination of the constraints of the piece plus a
/// non-negative constant.
fn add_farkas(ilp: &mut IlpProblem, piece: &BasicSet, form: &FarkasForm) {
    let mut multipliers: Vec<(usize, i64, usize)> = Vec::new();
    for (k, c) in piece.constraints.iter().enumerate() {
        if c.is_equality() {
            multipliers.push((ilp.add_rational_var(), 1, k));
            multipliers.push((ilp.add_rational_var(), -1, k));
        } else {
            multipliers.push((ilp.add_rational_var(), 1, k));
        }
    }
    for col in 0..piece.n_total() {
        let mut row = form.cols.get(col).cloned().unwrap_or_default();
        for &(var, sign, k) in &multipliers {
            let a = piece.constraints[k].coeff(col);
            if a != 0 {
                row.push((var, -sign * a));
            }
        }
        if !row.is_empty() {
            ilp.add_eq(row, 0);
        }
    }
    let mut row = form.constant.clone();
    for &(var, sign, k) in &multipliers {
        let c = piece.constraints[k].expr.constant;
        if c != 0 {
            row.push((var, -sign * c));
        }
    }
    ilp.add_ge(row, 0);
}

/// Minimize the proximity bound first, then the coefficient sum, then per
/// statement the iterator coefficients from the innermost outwards and the
/// constant term.
fn lexmin_order(layout: &Layout, stmts: &[StmtInfo], members: &[usize]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..layout.n_param).map(|p| layout.u(p)).collect();
    order.push(layout.w());
    order.push(layout.sum());
    for &m in members {
        let dim = stmts[m].dim;
        order.extend((0..dim).rev().map(|i| layout.coeff(m, i)));
        order.push(layout.constant(m, dim));
    }
    order
}

/// Basis of the directions orthogonal to the hyperplanes found so far,
/// each row oriented to have a non-negative sum.
fn orthogonal_rows(stmt: &StmtInfo) -> Vec<Vec<i64>> {
    let matrix = if stmt.rows.is_empty() {
        RationalMatrix::zeros(0, stmt.dim)
    } else {
        RationalMatrix::from_vec(stmt.rows.clone())
    };
    matrix
        .orthogonal_complement()
        .into_iter()
        .map(|h| {
            let sum: i64 = h.iter().sum();
            let first = h.iter().copied().find(|c| *c != 0).unwrap_or(0);
            if sum < 0 || (sum == 0 && first < 0) {
                h.iter().map(|c| -c).collect()
            } else {
                h
            }
        })
        .collect()
}

/// The part of each dependence whose endpoints get equal values in every
/// member of `band`.
fn residual(deps: &[DepEdge], stmts: &[StmtInfo], params: &[String], band: &Band) -> Vec<DepEdge> {
    let map_of = |s: usize| -> Option<IntegerMap> {
        let stmt = &stmts[s];
        Some(schedule_map(&stmt.domain, params, band.partial.get(&stmt.name)?))
    };
    deps.iter()
        .filter_map(|e| {
            let src = map_of(e.src)?;
            let dst = map_of(e.dst)?;
            let same_time = src.apply_range(&dst.reverse());
            let rel = e.rel.intersect(&same_time).coalesce();
            if rel.is_empty() {
                None
            } else {
                Some(DepEdge { src: e.src, dst: e.dst, rel })
            }
        })
        .collect()
}

/// Strongly connected components of the dependence graph over `members`,
/// in a topological order that prefers the original statement order.
fn scc_order(members: &[usize], deps: &[DepEdge]) -> Vec<Vec<usize>> {
    let n = members.len();
    let pos = |s: usize| members.iter().position(|&m| m == s);
    let mut reach = vec![vec![false; n]; n];
    for (i, row) in reach.iter_mut().enumerate() {
        row[i] = true;
    }
    for e in deps {
        if let (Some(a), Some(b)) = (pos(e.src), pos(e.dst)) {
            reach[a][b] = true;
        }
    }
    for k in 0..n {
        for i in 0..n {
            if reach[i][k] {
                for j in 0..n {
                    if reach[k][j] {
                        reach[i][j] = true;
                    }
                }
            }
        }
    }
    let mut component = vec![usize::MAX; n];
    let mut sccs: Vec<Vec<usize>> = Vec::new();
    for i in 0..n {
        if component[i] != usize::MAX {
            continue;
        }
        let id = sccs.len();
        let scc: Vec<usize> = (0..n).filter(|&j| reach[i][j] && reach[j][i]).collect();
        for &j in &scc {
            component[j] = id;
        }
        sccs.push(scc);
    }

    let mut preds: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); sccs.len()];
    for e in deps {
        if let (Some(a), Some(b)) = (pos(e.src), pos(e.dst)) {
            if component[a] != component[b] {
                preds[component[b]].insert(component[a]);
            }
        }
    }
    let mut done = vec![false; sccs.len()];
    let mut ordered = Vec::with_capacity(sccs.len());
    while ordered.len() < sccs.len() {
        // components are numbered by their first member
        let Some(next) = (0..sccs.len()).find(|&c| !done[c] && preds[c].iter().all(|&p| done[p])) else { break };
        done[next] = true;
        ordered.push(sccs[next].iter().map(|&j| members[j]).collect());
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::{parse_set, parse_union_map};

    fn domain(sets: &[&str]) -> UnionSet {
        let mut u = UnionSet::empty();
        for s in sets {
            u.add(parse_set(s).unwrap());
        }
        u
    }

    fn is_valid(tree: &ScheduleTree, deps: &UnionMap) -> bool {
        let schedule = tree.to_union_map();
        deps.maps().iter().all(|dep| {
            let src = schedule.maps().iter().find(|m| m.in_name() == dep.in_name());
            let dst = schedule.maps().iter().find(|m| m.in_name() == dep.out_name());
            let (Some(src), Some(dst)) = (src, dst) else { return false };
            let mapped = dep.apply_domain(src).apply_range(dst);
            mapped.is_subset(&IntegerMap::lex_lt(&mapped.space().domain()))
        })
    }

    #[test]
    fn test_parallel_outer_loop() {
        let dom = domain(&["[N, M] -> { S[i, j] : 0 <= i < N and 0 <= j < M }"]);
        let deps = parse_union_map("[N, M] -> { S[i, j] -> S[i, j + 1] : 0 <= i < N and 0 <= j < M - 1 }").unwrap();
        let params = vec!["N".to_string(), "M".to_string()];
        let tree = Scheduler::new(&ScheduleOptions::default(), PolyCtx::unlimited())
            .compute(&dom, &params, &deps, &deps)
            .unwrap();
        let ScheduleNode::Band(band, _) = &tree.root else { panic!("expected a band: {}", tree) };
        assert_eq!(band.n_member, 2);
        assert_eq!(band.coincident, vec![true, false]);
        let s = tree.stmt_map("S").unwrap();
        assert!(s.contains(&[10, 10, 2, 3, 2, 3]));
        assert!(is_valid(&tree, &deps));
    }

    #[test]
    fn test_recurrence_not_coincident() {
        let dom = domain(&["[N] -> { S[i] : 0 <= i < N }"]);
        let deps = parse_union_map("[N] -> { S[i] -> S[i + 1] : 0 <= i < N - 1 }").unwrap();
        let tree = Scheduler::new(&ScheduleOptions::default(), PolyCtx::unlimited())
            .compute(&dom, &["N".to_string()], &deps, &deps)
            .unwrap();
        let mut coincident = Vec::new();
        tree.root.for_each_band(&mut |b| coincident.extend(b.coincident.iter().copied()));
        assert_eq!(coincident, vec![false]);
        assert!(is_valid(&tree, &deps));
    }

    #[test]
    fn test_skewed_dependence() {
        // distance (1, -1) needs a skewed or outer-carried schedule
        let dom = domain(&["[N] -> { S[i, j] : 0 <= i < N and 0 <= j < N }"]);
        let deps = parse_union_map("[N] -> { S[i, j] -> S[i + 1, j - 1] : 0 <= i < N - 1 and 1 <= j < N }").unwrap();
        let tree = Scheduler::new(&ScheduleOptions::default(), PolyCtx::unlimited())
            .compute(&dom, &["N".to_string()], &deps, &deps)
            .unwrap();
        assert!(is_valid(&tree, &deps));
        assert_eq!(tree.stmt_map("S").unwrap().n_out(), 2);
    }

    #[test]
    fn test_fusion_strategies() {
        let dom = domain(&["[N] -> { S0[i] : 0 <= i < N }", "[N] -> { S1[i] : 0 <= i < N }"]);
        let deps = parse_union_map("[N] -> { S0[i] -> S1[i] : 0 <= i < N }").unwrap();
        let params = vec!["N".to_string()];

        let fused = Scheduler::new(&ScheduleOptions::default(), PolyCtx::unlimited())
            .with_fusion(FusionStrategy::Max)
            .compute(&dom, &params, &deps, &deps)
            .unwrap();
        let ScheduleNode::Band(band, child) = &fused.root else { panic!("expected a fused band: {}", fused) };
        assert_eq!(band.partial.len(), 2);
        assert!(band.coincident[0]);
        assert!(matches!(child.as_ref(), ScheduleNode::Sequence(c) if c.len() == 2));
        assert!(is_valid(&fused, &deps));

        let split = Scheduler::new(&ScheduleOptions::default(), PolyCtx::unlimited())
            .with_fusion(FusionStrategy::Min)
            .compute(&dom, &params, &deps, &deps)
            .unwrap();
        let ScheduleNode::Sequence(children) = &split.root else { panic!("expected a sequence: {}", split) };
        assert_eq!(children.len(), 2);
        assert_eq!(children[0].statements().unwrap().into_iter().next().as_deref(), Some("S0"));
        assert!(is_valid(&split, &deps));
    }

    #[test]
    fn test_reversed_order_respects_dependences() {
        // S1 is listed first but depends on S0
        let dom = domain(&["[N] -> { S1[i] : 0 <= i < N }", "[N] -> { S0[i] : 0 <= i < N }"]);
        let deps = parse_union_map("[N] -> { S0[i] -> S1[j] : 0 <= i < N and 0 <= j < N }").unwrap();
        let tree = Scheduler::new(&ScheduleOptions::default(), PolyCtx::unlimited())
            .compute(&dom, &["N".to_string()], &deps, &deps)
            .unwrap();
        assert!(is_valid(&tree, &deps));
    }

    #[test]
    fn test_budget_exhaustion() {
        let dom = domain(&["[N] -> { S[i] : 0 <= i < N }"]);
        let deps = parse_union_map("[N] -> { S[i] -> S[i + 1] : 0 <= i < N - 1 }").unwrap();
        let mut options = ScheduleOptions::default();
        options.max_operations = Some(1);
        let err = Scheduler::new(&options, PolyCtx::unlimited())
            .compute(&dom, &["N".to_string()], &deps, &deps)
            .unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::Unschedulable);
    }

    #[test]
    fn test_scc_order() {
        let deps = vec![
            DepEdge { src: 2, dst: 0, rel: IntegerMap::universe(crate::polyhedral::Space::map(0, 0)) },
            DepEdge { src: 0, dst: 1, rel: IntegerMap::universe(crate::polyhedral::Space::map(0, 0)) },
            DepEdge { src: 1, dst: 0, rel: IntegerMap::universe(crate::polyhedral::Space::map(0, 0)) },
        ];
        assert_eq!(scc_order(&[0, 1, 2], &deps), vec![vec![2], vec![0, 1]]);
    }
}
