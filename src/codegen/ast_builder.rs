//! Scanning a schedule tree into a loop AST.
//!
//! Every statement is lifted into its time-extended domain
//! `{ [q_0, ..., q_{D-1}, x] : x in domain, q_k = floor(e_k(x) / div_k) }`
//! over the flattened schedule rows. The tree is then walked once: a band
//! member becomes a loop over `q_k` (iterator value `mul_k * q_k`), bounded
//! by the projection of the time-extended domains onto `q_0..q_k`; a
//! sequence child fixes `q_k` to its position; a leaf recovers the
//! original iterators from the schedule rows and guards the statement by
//! whatever the enclosing loops do not already imply.

use crate::codegen::{Ast, AstExpr, AstNode, AstOp, ForNode, LoopAnnotation};
use crate::ir::pir::Scop;
use crate::polyhedral::basic::{BasicSet, Bound};
use crate::polyhedral::{AffineExpr, Constraint, IntegerSet, Space};
use crate::transform::schedule_tree::{SchedAff, ScheduleNode};
use crate::transform::tiling::SIMD_MARK;
use crate::utils::errors::{CodegenError, CodegenErrorKind};
use crate::utils::matrix::{Rational, RationalMatrix};
use log::{debug, trace, warn};
use num_integer::Integer;
use std::collections::{BTreeMap, BTreeSet};

/// The value of one schedule row inside the generated code: `q = expr / mul`,
/// where the division is exact.
#[derive(Debug, Clone)]
struct LevelValue {
    expr: AstExpr,
    mul: i64,
}

impl LevelValue {
    fn exact(expr: AstExpr) -> Self {
        Self { expr, mul: 1 }
    }

    /// `coeff * q` as an AST expression.
    fn term(&self, coeff: i64) -> AstExpr {
        if coeff % self.mul == 0 {
            self.expr.clone().scale(coeff / self.mul)
        } else {
            self.expr.clone().floor_div(self.mul).scale(coeff)
        }
    }
}

/// Convert an affine expression over the columns of `piece` (or plain space
/// columns when `piece` is `None`). Division locals become `floord`;
/// `None` when a column has no value or a local is not a division.
fn aff_to_ast(expr: &AffineExpr, piece: Option<&BasicSet>, values: &[Option<LevelValue>]) -> Option<AstExpr> {
    let mut acc: Option<AstExpr> = None;
    for (col, &coeff) in expr.coeffs.iter().enumerate() {
        if coeff == 0 {
            continue;
        }
        let term = if col < values.len() {
            values[col].as_ref()?.term(coeff)
        } else {
            let piece = piece?;
            let local = piece.locals.get(col - values.len())?;
            let div = local.div.as_ref()?;
            aff_to_ast(&div.num, Some(piece), values)?.floor_div(div.den).scale(coeff)
        };
        acc = Some(match acc {
            None => term,
            Some(a) => a.add(term),
        });
    }
    Some(match acc {
        None => AstExpr::Int(expr.constant),
        Some(a) => a.add(AstExpr::Int(expr.constant)),
    })
}

/// `c.expr >= 0` (or `= 0`) as a comparison with positive terms on both
/// sides.
fn constraint_to_cond(c: &Constraint, piece: Option<&BasicSet>, values: &[Option<LevelValue>]) -> Option<AstExpr> {
    let n = c.expr.n_cols();
    let mut lhs = AffineExpr::zero(n);
    let mut rhs = AffineExpr::zero(n);
    for (col, &v) in c.expr.coeffs.iter().enumerate() {
        if v > 0 {
            lhs.coeffs[col] = v;
        } else if v < 0 {
            rhs.coeffs[col] = -v;
        }
    }
    if c.expr.constant > 0 {
        lhs.constant = c.expr.constant;
    } else {
        rhs.constant = -c.expr.constant;
    }
    let op = if c.is_equality() { AstOp::Eq } else { AstOp::Ge };
    Some(AstExpr::op(op, vec![aff_to_ast(&lhs, piece, values)?, aff_to_ast(&rhs, piece, values)?]))
}

/// A disjunction of conjunctions for the pieces of `set`. `None` when a
/// piece uses an opaque local.
fn set_to_cond(set: &IntegerSet, values: &[Option<LevelValue>]) -> Option<AstExpr> {
    let mut disjuncts = Vec::new();
    for piece in &set.pieces {
        if piece.is_empty() {
            continue;
        }
        let mut conjuncts = Vec::new();
        for c in &piece.constraints {
            if is_div_definition(piece, c) {
                continue;
            }
            conjuncts.push(constraint_to_cond(c, Some(piece), values)?);
        }
        match AstExpr::fold(AstOp::And, conjuncts) {
            Some(cond) => disjuncts.push(cond),
            // an unconstrained piece makes the whole condition true
            None => return Some(AstExpr::Int(1)),
        }
    }
    Some(AstExpr::fold(AstOp::Or, disjuncts).unwrap_or(AstExpr::Int(0)))
}

/// Whether `c` is one of the two inequalities defining a division local.
fn is_div_definition(piece: &BasicSet, c: &Constraint) -> bool {
    if c.is_equality() {
        return false;
    }
    let n_space = piece.n_space();
    piece.locals.iter().enumerate().any(|(i, l)| {
        let Some(div) = &l.div else { return false };
        let col = n_space + i;
        let num = div.num.resized(c.expr.n_cols());
        let lower = num.clone() - AffineExpr::var(col, c.expr.n_cols()).scale(div.den);
        let upper = lower.scale(-1).add_constant(div.den - 1);
        c.expr == lower || c.expr == upper
    })
}

/// Whether the bound uses a local that is opaque or defined through `col`.
fn bound_is_usable(piece: &BasicSet, bound: &Bound, col: usize) -> bool {
    let n_space = piece.n_space();
    (0..piece.locals.len()).all(|i| {
        bound.expr.coeff(n_space + i) == 0 || local_avoids(piece, i, col)
    })
}

fn local_avoids(piece: &BasicSet, local: usize, col: usize) -> bool {
    let Some(div) = &piece.locals[local].div else { return false };
    if div.num.coeff(col) != 0 {
        return false;
    }
    let n_space = piece.n_space();
    (0..local).all(|j| div.num.coeff(n_space + j) == 0 || local_avoids(piece, j, col))
}

/// Per-statement data of the scan.
#[derive(Debug, Clone)]
struct StmtScan {
    /// Flattened schedule rows over `[params | stmt dims]`
    entries: Vec<SchedAff>,
    /// Domain over `[params | stmt dims]`, anonymous tuple
    domain: IntegerSet,
    /// `proj[m]`: the time-extended domain projected onto `q_0..q_{m-1}`
    proj: Vec<IntegerSet>,
    /// `proj[m]` without opaque locals; loop bounds are read from these,
    /// the exact guards at the leaves remove the extra points
    bounds: Vec<IntegerSet>,
}

/// State threaded down the tree walk.
#[derive(Debug, Clone)]
struct WalkState {
    /// Values of the rows fixed by enclosing nodes
    values: Vec<LevelValue>,
    /// Facts implied by the enclosing loops, over `[params | q_0..q_{D-1}]`
    known: IntegerSet,
    /// The next loop is the vector loop of a SIMD mark
    simd: bool,
    /// Loops of the current band carry the unroll hint
    unroll: bool,
}

/// Builds the loop AST of a region from its current schedule.
pub struct AstBuilder<'a> {
    scop: &'a Scop,
    params: Vec<String>,
    depth: usize,
    stmts: BTreeMap<String, StmtScan>,
}

impl<'a> AstBuilder<'a> {
    pub fn new(scop: &'a Scop) -> Result<Self, CodegenError> {
        let params = scop.param_names();
        let tree = scop.schedule.align_params(&params);
        let depth = tree.depth();
        let np = params.len();
        let mut stmts = BTreeMap::new();
        for stmt in &scop.statements {
            let entries = tree.stmt_entries(&stmt.name).ok_or_else(|| {
                CodegenError::new(
                    CodegenErrorKind::BoundGeneration,
                    format!("statement {} is not scheduled", stmt.name),
                )
            })?;
            let domain = stmt.domain.align_params(&params).set_tuple_name(None);
            if domain.is_empty() {
                debug!("{} has an empty domain, nothing to scan", stmt.name);
                continue;
            }
            let n = domain.dim();
            let mut extended = domain.insert_dims(0, depth);
            let n_cols = extended.space.n_cols();
            for (k, entry) in entries.iter().enumerate() {
                let expr = entry.expr.resized(np + n).insert_cols(np, depth).resized(n_cols);
                let q = AffineExpr::var(np + k, n_cols);
                if entry.div == 1 {
                    extended.add_constraint(Constraint::eq_zero(q - expr));
                } else {
                    // div * q <= e <= div * q + div - 1
                    extended.add_constraint(Constraint::ge_zero(expr.clone() - q.scale(entry.div)));
                    extended.add_constraint(Constraint::ge_zero(
                        q.scale(entry.div).add_constant(entry.div - 1) - expr,
                    ));
                }
            }
            let mut proj = Vec::with_capacity(depth + 1);
            for m in 0..=depth {
                let dropped = extended.project_out(m, depth - m + n).coalesce();
                proj.push(dropped);
            }
            trace!("{} scans as {}", stmt.name, proj[depth]);
            let bounds = proj.iter().map(IntegerSet::relax_opaque_locals).collect();
            stmts.insert(stmt.name.clone(), StmtScan { entries, domain, proj, bounds });
        }
        Ok(Self { scop, params, depth, stmts })
    }

    fn leaf_space(&self) -> Space {
        Space::set(self.depth).with_param_names(self.params.clone())
    }

    /// Column values of `[params | q_0..q_{m-1}]` for the given levels.
    fn column_values(&self, values: &[LevelValue]) -> Vec<Option<LevelValue>> {
        self.params
            .iter()
            .map(|p| Some(LevelValue::exact(AstExpr::id(p))))
            .chain(values.iter().cloned().map(Some))
            .collect()
    }

    /// Build the AST of the current schedule.
    pub fn build(&self) -> Result<Ast, CodegenError> {
        let active: BTreeSet<String> = self.stmts.keys().cloned().collect();
        let known = self.scop.context.lift_params_to(&self.leaf_space());
        let state = WalkState { values: Vec::new(), known, simd: false, unroll: false };
        let root = self
            .walk(&self.scop.schedule.root, &active, state)?
            .unwrap_or(AstNode::Block(Vec::new()));
        let run_condition = self.run_condition();
        debug!("built AST for {} with {} loops", self.scop.name, count_loops(&root));
        Ok(Ast { params: self.params.clone(), run_condition, root })
    }

    /// The run-time check, simplified under the known context.
    fn run_condition(&self) -> Option<AstExpr> {
        let cond = self.scop.run_condition().gist(&self.scop.context.align_params(&self.params));
        if cond.is_universe() {
            return None;
        }
        let values = self.column_values(&[]);
        match set_to_cond(&cond, &values) {
            Some(expr) => Some(expr),
            None => {
                warn!("{}: run-time check is not expressible, always using the original code", self.scop.name);
                Some(AstExpr::Int(0))
            }
        }
    }

    fn walk(
        &self,
        node: &ScheduleNode,
        active: &BTreeSet<String>,
        state: WalkState,
    ) -> Result<Option<AstNode>, CodegenError> {
        if active.is_empty() {
            return Ok(None);
        }
        match node {
            ScheduleNode::Band(band, child) => {
                let mut st = state;
                st.unroll = band.unroll;
                self.band_member(band.n_member, 0, child, active, st)
            }
            ScheduleNode::Sequence(children) => {
                let level = state.values.len();
                let mut remaining = active.clone();
                let mut out = Vec::new();
                for (pos, c) in children.iter().enumerate() {
                    let here: BTreeSet<String> = match c.statements() {
                        Some(s) => remaining.intersection(&s).cloned().collect(),
                        None => remaining.clone(),
                    };
                    remaining.retain(|s| !here.contains(s));
                    if here.is_empty() {
                        continue;
                    }
                    let mut st = state.clone();
                    st.values.push(LevelValue::exact(AstExpr::Int(pos as i64)));
                    st.known = fix_level(&st.known, level, pos as i64);
                    if let Some(n) = self.walk(c, &here, st)? {
                        out.push(n);
                    }
                }
                Ok(match out.len() {
                    0 => None,
                    1 => out.pop(),
                    _ => Some(AstNode::Block(out)),
                })
            }
            ScheduleNode::Filter(stmts, child) => {
                let here: BTreeSet<String> = active.intersection(stmts).cloned().collect();
                self.walk(child, &here, state)
            }
            ScheduleNode::Mark(name, child) => {
                let mut st = state;
                if name == SIMD_MARK {
                    st.simd = true;
                }
                Ok(self
                    .walk(child, active, st)?
                    .map(|c| AstNode::Mark { name: name.clone(), child: Box::new(c) }))
            }
            ScheduleNode::Leaf => self.leaf(active, state),
        }
    }

    /// Emit the loop of band member `member` and everything below it.
    fn band_member(
        &self,
        n_member: usize,
        member: usize,
        child: &ScheduleNode,
        active: &BTreeSet<String>,
        mut state: WalkState,
    ) -> Result<Option<AstNode>, CodegenError> {
        if member == n_member {
            state.unroll = false;
            return self.walk(child, active, state);
        }
        let k = state.values.len();
        let values = self.column_values(&state.values);
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        let mut strides = BTreeSet::new();
        let mut pieces: Vec<&BasicSet> = Vec::new();
        let mut per_stmt: Vec<(String, Vec<(AstExpr, AstExpr)>)> = Vec::new();
        for name in active {
            let Some(scan) = self.stmts.get(name) else { continue };
            strides.insert(scan.entries[k].mul);
            per_stmt.push((name.clone(), Vec::new()));
            for piece in &scan.bounds[k + 1].pieces {
                let (lo, up) = loop_bounds(piece, k, &values).ok_or_else(|| {
                    CodegenError::new(
                        CodegenErrorKind::BoundGeneration,
                        format!("no bounds for schedule dimension {} of {}", k, name),
                    )
                })?;
                if let Some((_, bounds)) = per_stmt.last_mut() {
                    bounds.push((lo.clone(), up.clone()));
                }
                lowers.push(lo);
                uppers.push(up);
                pieces.push(piece);
            }
        }
        if pieces.is_empty() {
            return Ok(None);
        }
        if let Some(groups) = constant_groups(&per_stmt) {
            if groups.len() > 1 {
                trace!("dimension {} separates {} statement groups", k, groups.len());
                let mut out = Vec::new();
                for (value, stmts) in groups {
                    let mut st = state.clone();
                    st.values.push(LevelValue::exact(AstExpr::Int(value)));
                    st.known = fix_level(&st.known, k, value);
                    if let Some(n) = self.band_member(n_member, member + 1, child, &stmts, st)? {
                        out.push(n);
                    }
                }
                return Ok(Some(AstNode::Block(out)));
            }
        }
        if strides.len() != 1 {
            return Err(CodegenError::new(
                CodegenErrorKind::BoundGeneration,
                format!("statements disagree on the stride of dimension {}", k),
            ));
        }
        let stride = strides.into_iter().next().unwrap_or(1);
        let lower = AstExpr::fold(AstOp::Min, lowers).unwrap_or(AstExpr::Int(0));
        let upper = AstExpr::fold(AstOp::Max, uppers).unwrap_or(AstExpr::Int(0));

        if let Some(facts) = self.level_facts(&pieces, k) {
            state.known = state.known.intersect(&facts);
        }

        if lower == upper {
            trace!("dimension {} is fixed to {}", k, lower);
            state.values.push(LevelValue::exact(lower));
            return self.band_member(n_member, member + 1, child, active, state);
        }

        let trip_count = if state.simd { self.trip_count(active, k) } else { None };
        state.simd = false;
        let unroll = state.unroll;
        let iterator = format!("c{}", k);
        state.values.push(LevelValue { expr: AstExpr::id(&iterator), mul: stride });
        let body = self
            .band_member(n_member, member + 1, child, active, state)?
            .unwrap_or(AstNode::Block(Vec::new()));
        Ok(Some(AstNode::For(ForNode {
            iterator,
            init: lower.scale(stride),
            upper: upper.scale(stride),
            stride,
            body: Box::new(body),
            level: k,
            trip_count,
            unroll,
            annotation: LoopAnnotation::default(),
        })))
    }

    /// Constraints on `q_k` that hold for every iteration of the loop, when
    /// the loop scans a single polyhedron.
    fn level_facts(&self, pieces: &[&BasicSet], k: usize) -> Option<IntegerSet> {
        let first = pieces.first()?;
        let same = pieces.iter().skip(1).all(|p| {
            IntegerSet::from_basic((*p).clone()).is_equal(&IntegerSet::from_basic((*first).clone()))
        });
        if !same {
            return None;
        }
        let col = self.params.len() + k;
        let mut facts = BasicSet::universe(first.space.clone());
        let n_space = first.n_space();
        let uses_locals = |c: &Constraint| (n_space..c.expr.n_cols()).any(|i| c.expr.coeff(i) != 0);
        match fixing_equality(first, col) {
            // only the equality is enforced by a fixed dimension
            Some((idx, _)) => {
                let c = &first.constraints[idx];
                if !uses_locals(c) {
                    facts.add_constraint(Constraint::new(c.expr.resized(n_space), c.kind));
                }
            }
            None => {
                for c in &first.constraints {
                    if c.coeff(col) != 0 && !uses_locals(c) {
                        facts.add_constraint(Constraint::new(c.expr.resized(n_space), c.kind));
                    }
                }
            }
        }
        Some(IntegerSet::from_basic(facts).add_dims(self.depth - k - 1))
    }

    /// Constant number of iterations of loop `k` for every value of the
    /// enclosing loops, if there is one.
    fn trip_count(&self, active: &BTreeSet<String>, k: usize) -> Option<i64> {
        let space = Space::set(k + 1).with_param_names(self.params.clone());
        let mut scanned = IntegerSet::empty(space.clone());
        for name in active {
            if let Some(scan) = self.stmts.get(name) {
                scanned = scanned.union(&scan.proj[k + 1]);
            }
        }
        let scanned = scanned.intersect_params(&self.scop.context.align_params(&self.params));
        if scanned.is_empty() {
            return None;
        }
        // pairs (prefix, q, q') of two iterations of the same loop instance
        let first = scanned.add_dims(1);
        let second = scanned.insert_dims(k, 1);
        let pairs = first.intersect(&second);
        let np = self.params.len();
        let n = np + k + 2;
        let mut spans = pairs.add_dims(1);
        let d = AffineExpr::var(np + k + 2, n + 1);
        let delta = AffineExpr::var(np + k + 1, n + 1) - AffineExpr::var(np + k, n + 1);
        spans.add_constraint(Constraint::eq_zero(d - delta));
        let span = spans.dim_max(k + 2)?;
        // every loop instance must reach the full span
        let mut full = pairs;
        full.add_constraint(Constraint::eq_zero(
            AffineExpr::var(np + k + 1, n) - AffineExpr::var(np + k, n).add_constant(span),
        ));
        let reaching = full.project_out(k, 2);
        let prefixes = scanned.project_out(k, 1);
        if !prefixes.is_subset(&reaching) {
            debug!("trip count of dimension {} varies", k);
            return None;
        }
        Some(span + 1)
    }

    fn leaf(&self, active: &BTreeSet<String>, mut state: WalkState) -> Result<Option<AstNode>, CodegenError> {
        while state.values.len() < self.depth {
            let level = state.values.len();
            state.values.push(LevelValue::exact(AstExpr::Int(0)));
            state.known = fix_level(&state.known, level, 0);
        }
        let mut out = Vec::new();
        for name in active {
            let Some(scan) = self.stmts.get(name) else { continue };
            let args = self.recover_iterators(name, scan, &state.values)?;
            let user = AstNode::User { stmt: name.clone(), args: args.iter().map(|(e, _, _)| e.clone()).collect() };
            let guard = scan.proj[self.depth].gist(&state.known);
            if guard.is_empty() {
                trace!("{} never executes here", name);
                continue;
            }
            if guard.is_universe() {
                out.push(user);
                continue;
            }
            let values = self.column_values(&state.values);
            let cond = match set_to_cond(&guard, &values) {
                Some(cond) => cond,
                None => self.exact_guard(name, scan, &state.values, &args)?,
            };
            out.push(AstNode::If { cond, then: Box::new(user) });
        }
        Ok(match out.len() {
            0 => None,
            1 => out.pop(),
            _ => Some(AstNode::Block(out)),
        })
    }

    /// The original iterators as expressions of the row values, each with
    /// the divisor it was scaled by.
    fn recover_iterators(
        &self,
        name: &str,
        scan: &StmtScan,
        values: &[LevelValue],
    ) -> Result<Vec<(AstExpr, AffineExpr, i64)>, CodegenError> {
        let np = self.params.len();
        let n = scan.domain.dim();
        if n == 0 {
            return Ok(Vec::new());
        }
        // pick n independent rows of the form q_k = a.x + b.p + c
        let mut chosen: Vec<usize> = Vec::new();
        let mut rows: Vec<Vec<i64>> = Vec::new();
        for (k, entry) in scan.entries.iter().enumerate() {
            if entry.div != 1 || rows.len() == n {
                continue;
            }
            let coeffs: Vec<i64> = (0..n).map(|i| entry.expr.coeff(np + i)).collect();
            let mut candidate = rows.clone();
            candidate.push(coeffs.clone());
            if RationalMatrix::from_vec(candidate).rank() == rows.len() + 1 {
                rows.push(coeffs);
                chosen.push(k);
            }
        }
        if rows.len() < n {
            return Err(CodegenError::new(
                CodegenErrorKind::IteratorRecovery,
                format!("schedule of {} is not invertible", name),
            ));
        }
        let mut augmented: Vec<Vec<i64>> = Vec::with_capacity(n);
        for (i, row) in rows.iter().enumerate() {
            let mut r = row.clone();
            r.extend((0..n).map(|j| i64::from(i == j)));
            augmented.push(r);
        }
        let (rref, pivots) = RationalMatrix::from_vec(augmented).row_echelon();
        if pivots.len() < n || pivots[..n].iter().enumerate().any(|(i, &p)| i != p) {
            return Err(CodegenError::new(
                CodegenErrorKind::IteratorRecovery,
                format!("schedule of {} is singular", name),
            ));
        }
        let depth = self.depth;
        let col_values = self.column_values(values);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            // x_i = sum_j inv[i][j] * (q_{k_j} - b_j.p - c_j)
            let mut coeffs = vec![Rational::from_integer(0); np + depth];
            let mut constant = Rational::from_integer(0);
            for (j, &k) in chosen.iter().enumerate() {
                let w = rref.get(i, n + j).copied().unwrap_or_else(|| Rational::from_integer(0));
                if w == Rational::from_integer(0) {
                    continue;
                }
                coeffs[np + k] += w;
                let entry = &scan.entries[k];
                for (p, c) in coeffs.iter_mut().enumerate().take(np) {
                    *c -= w * Rational::from_integer(entry.expr.coeff(p) as i128);
                }
                constant -= w * Rational::from_integer(entry.expr.constant as i128);
            }
            let lcm = coeffs.iter().chain(std::iter::once(&constant)).fold(1i128, |acc, r| acc.lcm(r.denom()));
            let scale = |r: &Rational| -> Result<i64, CodegenError> {
                i64::try_from((r * Rational::from_integer(lcm)).to_integer()).map_err(|_| {
                    CodegenError::new(CodegenErrorKind::IteratorRecovery, "iterator coefficient overflow")
                })
            };
            let expr = AffineExpr::from_coeffs(
                coeffs.iter().map(&scale).collect::<Result<Vec<_>, _>>()?,
                scale(&constant)?,
            );
            let den = i64::try_from(lcm)
                .map_err(|_| CodegenError::new(CodegenErrorKind::IteratorRecovery, "iterator divisor overflow"))?;
            let ast = aff_to_ast(&expr, None, &col_values)
                .ok_or_else(|| CodegenError::new(CodegenErrorKind::IteratorRecovery, "missing row value"))?
                .floor_div(den);
            out.push((ast, expr, den));
        }
        Ok(out)
    }

    /// Guard built from the domain itself with the recovered iterators
    /// substituted, used when the projected guard keeps opaque locals.
    fn exact_guard(
        &self,
        name: &str,
        scan: &StmtScan,
        values: &[LevelValue],
        args: &[(AstExpr, AffineExpr, i64)],
    ) -> Result<AstExpr, CodegenError> {
        let mut x_values: Vec<Option<LevelValue>> =
            self.params.iter().map(|p| Some(LevelValue::exact(AstExpr::id(p)))).collect();
        x_values.extend(args.iter().map(|(e, _, _)| Some(LevelValue::exact(e.clone()))));
        let not_expressible = || {
            CodegenError::new(
                CodegenErrorKind::BoundGeneration,
                format!("domain of {} is not expressible as a guard", name),
            )
        };
        let mut conjuncts = vec![set_to_cond(&scan.domain, &x_values).ok_or_else(not_expressible)?];
        let col_values = self.column_values(values);
        for (_, expr, den) in args {
            if *den > 1 {
                let num = aff_to_ast(expr, None, &col_values).ok_or_else(not_expressible)?;
                conjuncts.push(AstExpr::op(
                    AstOp::Eq,
                    vec![AstExpr::op(AstOp::Mod, vec![num, AstExpr::Int(*den)]), AstExpr::Int(0)],
                ));
            }
        }
        for (k, entry) in scan.entries.iter().enumerate() {
            let row = aff_to_ast(&entry.expr.resized(x_values.len()), None, &x_values)
                .ok_or_else(not_expressible)?
                .floor_div(entry.div);
            let q = values[k].term(1);
            if q != row {
                conjuncts.push(AstExpr::op(AstOp::Eq, vec![q, row]));
            }
        }
        AstExpr::fold(AstOp::And, conjuncts).ok_or_else(not_expressible)
    }
}

/// `max` of the lower and `min` of the upper bounds of `q_k` in one piece.
fn loop_bounds(piece: &BasicSet, k: usize, values: &[Option<LevelValue>]) -> Option<(AstExpr, AstExpr)> {
    let col = values.len();
    let (lower, upper) = piece.col_bounds(col);
    // q_k has no value while its own bounds are built
    let mut with_self = values.to_vec();
    with_self.push(None);
    let convert = |bounds: Vec<Bound>, ceil: bool| -> Vec<AstExpr> {
        bounds
            .into_iter()
            .filter(|b| bound_is_usable(piece, b, col))
            .filter_map(|b| {
                let expr = if ceil { b.expr.add_constant(b.den - 1) } else { b.expr.clone() };
                Some(aff_to_ast(&expr, Some(piece), &with_self)?.floor_div(b.den))
            })
            .collect()
    };
    if let Some((_, rest)) = fixing_equality(piece, col) {
        if let Some(v) = aff_to_ast(&rest, Some(piece), &with_self) {
            return Some((v.clone(), v));
        }
    }
    let lo = AstExpr::fold(AstOp::Max, convert(lower, true))?;
    let up = AstExpr::fold(AstOp::Min, convert(upper, false))?;
    trace!("q{}: {} .. {}", k, lo, up);
    Some((lo, up))
}

/// An equality `q = rest` with a unit coefficient on `col` whose locals do
/// not depend on `col`, with its constraint index.
fn fixing_equality(piece: &BasicSet, col: usize) -> Option<(usize, AffineExpr)> {
    let n_space = piece.n_space();
    piece.constraints.iter().enumerate().find_map(|(idx, c)| {
        if !c.is_equality() || c.coeff(col).abs() != 1 {
            return None;
        }
        let mut rest = c.expr.scale(-c.coeff(col));
        rest.set_coeff(col, 0);
        let usable = (n_space..rest.n_cols()).all(|i| rest.coeff(i) == 0 || local_avoids(piece, i - n_space, col));
        usable.then_some((idx, rest))
    })
}

/// Statements grouped by the constant value of a dimension, ascending.
/// `None` unless every statement is fixed to a single constant.
fn constant_groups(per_stmt: &[(String, Vec<(AstExpr, AstExpr)>)]) -> Option<BTreeMap<i64, BTreeSet<String>>> {
    let mut groups: BTreeMap<i64, BTreeSet<String>> = BTreeMap::new();
    for (name, bounds) in per_stmt {
        let mut value = None;
        for (lo, up) in bounds {
            let v = lo.as_int()?;
            if up.as_int() != Some(v) || value.map_or(false, |w| w != v) {
                return None;
            }
            value = Some(v);
        }
        groups.entry(value?).or_default().insert(name.clone());
    }
    Some(groups)
}

/// Add `q_level = value` to a set over `[params | q]`.
fn fix_level(known: &IntegerSet, level: usize, value: i64) -> IntegerSet {
    known.fix_dim(level, value)
}

fn count_loops(node: &AstNode) -> usize {
    let mut n = 0;
    node.for_each_loop(&mut |_| n += 1);
    n
}
