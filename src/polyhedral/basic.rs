//! Basic sets: conjunctions of affine constraints with local variables.
//!
//! A [`BasicSet`] is the convex building block of every set and relation.
//! Its columns are `[params | in | out | locals]`. A local is either a
//! division `q = floor(num / den)`, which is a function of the other
//! columns, or an opaque existential left behind by a projection that could
//! not be eliminated exactly.

use crate::polyhedral::constraint::{Constraint, ConstraintKind, Normalized};
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::omega::{Feasibility, Int, Row, System};
use crate::polyhedral::space::Space;

/// A division `floor(num / den)` over the columns of the owning basic set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Div {
    /// Numerator over all columns (zero on this local and later ones)
    pub num: AffineExpr,
    /// Positive denominator
    pub den: i64,
}

/// A local (existentially quantified) column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Local {
    /// Definition when the local is a known division
    pub div: Option<Div>,
}

/// A lower or upper bound `floor/ceil(expr / den)` of one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    /// Numerator over all columns of the basic set
    pub expr: AffineExpr,
    /// Positive denominator
    pub den: i64,
}

/// A conjunction of constraints over a space plus local columns.
#[derive(Debug, Clone)]
pub struct BasicSet {
    /// The space
    pub space: Space,
    /// Local columns, after the space columns
    pub locals: Vec<Local>,
    /// Constraints over all columns
    pub constraints: Vec<Constraint>,
}

impl BasicSet {
    /// The universe of a space.
    pub fn universe(space: Space) -> Self {
        Self { space, locals: Vec::new(), constraints: Vec::new() }
    }

    /// The empty basic set of a space.
    pub fn empty(space: Space) -> Self {
        let n = space.n_cols();
        let mut bset = Self::universe(space);
        bset.constraints.push(Constraint::ge_zero(AffineExpr::constant(-1, n)));
        bset
    }

    /// Number of space columns.
    pub fn n_space(&self) -> usize {
        self.space.n_cols()
    }

    /// Number of columns including locals.
    pub fn n_total(&self) -> usize {
        self.space.n_cols() + self.locals.len()
    }

    /// Column of local `i`.
    pub fn local_col(&self, i: usize) -> usize {
        self.n_space() + i
    }

    /// Add a constraint (resized to the current number of columns).
    pub fn add_constraint(&mut self, c: Constraint) {
        let n = self.n_total();
        self.constraints.push(Constraint::new(c.expr.resized(n), c.kind));
    }

    /// Add `expr >= 0`.
    pub fn add_ineq(&mut self, expr: AffineExpr) {
        self.add_constraint(Constraint::ge_zero(expr));
    }

    /// Add `expr = 0`.
    pub fn add_eq(&mut self, expr: AffineExpr) {
        self.add_constraint(Constraint::eq_zero(expr));
    }

    /// Builder-style constraint addition.
    pub fn with_constraint(mut self, c: Constraint) -> Self {
        self.add_constraint(c);
        self
    }

    fn push_column(&mut self, local: Local) -> usize {
        let n = self.n_total();
        for c in self.constraints.iter_mut() {
            c.expr = c.expr.resized(n + 1);
        }
        for l in self.locals.iter_mut() {
            if let Some(div) = l.div.as_mut() {
                div.num = div.num.resized(n + 1);
            }
        }
        self.locals.push(local);
        n
    }

    /// Add a division local `floor(num / den)` and return its column.
    /// An identical existing division is reused.
    pub fn add_div(&mut self, num: AffineExpr, den: i64) -> usize {
        let num = num.resized(self.n_total());
        for (i, l) in self.locals.iter().enumerate() {
            if let Some(div) = &l.div {
                if div.den == den && div.num.resized(self.n_total()) == num {
                    return self.local_col(i);
                }
            }
        }
        let col = self.push_column(Local { div: Some(Div { num: num.clone(), den }) });
        let n = self.n_total();
        let num = num.resized(n);
        let q = AffineExpr::var(col, n);
        // num - den*q >= 0  and  den*q + den - 1 - num >= 0
        self.add_ineq(num.clone() - q.scale(den));
        self.add_ineq(q.scale(den).add_constant(den - 1) - num);
        col
    }

    /// Add an opaque existential local and return its column.
    pub fn add_exists(&mut self) -> usize {
        self.push_column(Local { div: None })
    }

    /// Whether `c` is one of the two defining constraints of division `local`.
    fn is_div_constraint(&self, c: &Constraint, local: usize) -> bool {
        let div = match &self.locals[local].div {
            Some(d) => d,
            None => return false,
        };
        if c.kind != ConstraintKind::Inequality {
            return false;
        }
        let n = self.n_total();
        let col = self.local_col(local);
        let q = AffineExpr::var(col, n);
        let num = div.num.resized(n);
        let lower = num.clone() - q.scale(div.den);
        let upper = q.scale(div.den).add_constant(div.den - 1) - num;
        let expr = c.expr.resized(n);
        expr == lower || expr == upper
    }

    fn is_any_div_constraint(&self, c: &Constraint) -> bool {
        (0..self.locals.len()).any(|i| self.is_div_constraint(c, i))
    }

    /// Convert to a solver system over all columns.
    pub fn to_system(&self) -> System {
        let n = self.n_total();
        let mut sys = System::new(n);
        for c in &self.constraints {
            let expr = c.expr.resized(n);
            let row = Row::new(
                expr.coeffs.iter().map(|&x| x as Int).collect(),
                expr.constant as Int,
            );
            match c.kind {
                ConstraintKind::Equality => sys.add_eq(row),
                ConstraintKind::Inequality => sys.add_ineq(row),
            }
        }
        sys
    }

    fn constraints_from_system(sys: &System) -> Option<Vec<Constraint>> {
        let to_expr = |row: &Row| -> Option<AffineExpr> {
            let coeffs: Option<Vec<i64>> = row.coeffs.iter().map(|&c| i64::try_from(c).ok()).collect();
            Some(AffineExpr::from_coeffs(coeffs?, i64::try_from(row.constant).ok()?))
        };
        let mut out = Vec::with_capacity(sys.eqs.len() + sys.ineqs.len());
        for row in &sys.eqs {
            out.push(Constraint::eq_zero(to_expr(row)?));
        }
        for row in &sys.ineqs {
            out.push(Constraint::ge_zero(to_expr(row)?));
        }
        Some(out)
    }

    /// Whether a constraint is trivially violated.
    pub fn is_obviously_empty(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.normalize() == Normalized::Infeasible)
    }

    /// Integer feasibility of this basic set.
    pub fn feasibility(&self) -> Feasibility {
        if self.is_obviously_empty() {
            return Feasibility::Empty;
        }
        self.to_system().check()
    }

    /// Whether the basic set is (provably) empty.
    pub fn is_empty(&self) -> bool {
        self.feasibility().is_empty()
    }

    /// Whether the basic set has no constraints besides division definitions.
    pub fn is_universe(&self) -> bool {
        self.constraints.iter().all(|c| {
            c.normalize() == Normalized::Trivial || self.is_any_div_constraint(c)
        })
    }

    /// Whether a point (values of the space columns) belongs to the set.
    pub fn contains(&self, point: &[i64]) -> bool {
        let mut sys = self.to_system();
        for (col, &v) in point.iter().enumerate().take(self.n_space()) {
            sys = sys.fix(col, v as Int);
        }
        !sys.check().is_empty()
    }

    /// Any integer point of the space columns, if one can be found.
    pub fn sample(&self) -> Option<Vec<i64>> {
        if self.is_empty() {
            return None;
        }
        let mut sys = self.to_system();
        let mut point = Vec::with_capacity(self.n_space());
        for col in 0..self.n_space() {
            let range = sys.var_range(col)?;
            let start = match (range.lower, range.upper) {
                (Some(l), _) => l,
                (None, Some(u)) => u,
                (None, None) => 0,
            };
            let mut found = None;
            for step in 0..512 {
                let candidates = [start + step, start - step];
                for &cand in candidates.iter() {
                    if let Some(l) = range.lower {
                        if cand < l {
                            continue;
                        }
                    }
                    if let Some(u) = range.upper {
                        if cand > u {
                            continue;
                        }
                    }
                    let fixed = sys.fix(col, cand);
                    if fixed.check() == Feasibility::NonEmpty {
                        found = Some((cand, fixed));
                        break;
                    }
                }
                if found.is_some() {
                    break;
                }
            }
            let (value, fixed) = found?;
            sys = fixed;
            point.push(i64::try_from(value).ok()?);
        }
        Some(point)
    }

    /// Intersect with a basic set over the same space.
    pub fn intersect(&self, other: &BasicSet) -> BasicSet {
        let mut result = self.clone();
        let base = result.n_total();
        let n_space = self.n_space();
        let extra = other.locals.len();
        for c in result.constraints.iter_mut() {
            c.expr = c.expr.resized(base + extra);
        }
        for l in result.locals.iter_mut() {
            if let Some(d) = l.div.as_mut() {
                d.num = d.num.resized(base + extra);
            }
        }
        let map: Vec<usize> = (0..other.n_total())
            .map(|i| if i < n_space { i } else { base + (i - n_space) })
            .collect();
        for l in &other.locals {
            let div = l.div.as_ref().map(|d| Div { num: d.num.remap(&map, base + extra), den: d.den });
            result.locals.push(Local { div });
        }
        for c in &other.constraints {
            result.constraints.push(Constraint::new(c.expr.remap(&map, base + extra), c.kind));
        }
        result
    }

    /// Re-express this basic set in `new_space`, sending space column `i`
    /// to column `map[i]` of the new space. Locals follow the new space columns.
    pub fn remap_space(&self, new_space: Space, map: &[usize]) -> BasicSet {
        let old_space = self.n_space();
        let new_n_space = new_space.n_cols();
        let n_total = new_n_space + self.locals.len();
        let full: Vec<usize> = (0..self.n_total())
            .map(|i| if i < old_space { map[i] } else { new_n_space + (i - old_space) })
            .collect();
        BasicSet {
            space: new_space,
            locals: self
                .locals
                .iter()
                .map(|l| Local {
                    div: l.div.as_ref().map(|d| Div { num: d.num.remap(&full, n_total), den: d.den }),
                })
                .collect(),
            constraints: self
                .constraints
                .iter()
                .map(|c| Constraint::new(c.expr.remap(&full, n_total), c.kind))
                .collect(),
        }
    }

    /// Align parameters to `params`. Current parameters missing from
    /// `params` are kept after them.
    pub fn align_params(&self, params: &[String]) -> BasicSet {
        if self.space.param_names == params {
            return self.clone();
        }
        let Some(map) = self.space.column_map_to_params(params) else {
            return self.align_params(&self.space.params_covering(params));
        };
        let space = self.space.clone().with_param_names(params.to_vec());
        self.remap_space(space, &map)
    }

    /// Turn the space columns `[first, first + n)` into locals and try to
    /// eliminate them. `new_space` is the space without those columns.
    pub fn project_out(&self, first: usize, n: usize, new_space: Space) -> BasicSet {
        if n == 0 {
            let mut r = self.clone();
            r.space = new_space;
            return r;
        }
        let old_space = self.n_space();
        let new_n_space = old_space - n;
        let n_locals = self.locals.len();
        let n_total = self.n_total();
        // space cols before `first` keep position, cols after shift left,
        // existing locals follow, projected cols go last
        let full: Vec<usize> = (0..n_total)
            .map(|i| {
                if i < first {
                    i
                } else if i < first + n {
                    new_n_space + n_locals + (i - first)
                } else if i < old_space {
                    i - n
                } else {
                    new_n_space + (i - old_space)
                }
            })
            .collect();
        let mut locals: Vec<Local> = self
            .locals
            .iter()
            .map(|l| Local {
                div: l.div.as_ref().map(|d| Div { num: d.num.remap(&full, n_total), den: d.den }),
            })
            .collect();
        for _ in 0..n {
            locals.push(Local { div: None });
        }
        let mut result = BasicSet {
            space: new_space,
            locals,
            constraints: self
                .constraints
                .iter()
                .map(|c| Constraint::new(c.expr.remap(&full, n_total), c.kind))
                .collect(),
        };
        result.eliminate_locals();
        result
    }

    /// Remove column `col` (which must not occur in any constraint or division).
    fn remove_col(&mut self, col: usize) {
        let local = col - self.n_space();
        self.locals.remove(local);
        for c in self.constraints.iter_mut() {
            c.expr = c.expr.remove_cols(col, 1);
        }
        for l in self.locals.iter_mut() {
            if let Some(d) = l.div.as_mut() {
                d.num = d.num.remove_cols(col, 1);
            }
        }
    }

    fn col_occurs(&self, col: usize) -> bool {
        self.constraints.iter().any(|c| c.coeff(col) != 0)
            || self
                .locals
                .iter()
                .any(|l| l.div.as_ref().map_or(false, |d| d.num.coeff(col) != 0))
    }

    /// Try to eliminate opaque locals exactly, recover divisions from the
    /// remaining ones and drop unused locals.
    pub fn eliminate_locals(&mut self) {
        if self.is_obviously_empty() {
            let space = self.space.clone();
            *self = BasicSet::empty(space);
            return;
        }
        let mut progress = true;
        while progress {
            progress = false;
            let n_space = self.n_space();
            for local in (0..self.locals.len()).rev() {
                let col = n_space + local;
                if self.locals[local].div.is_some() {
                    continue;
                }
                if !self.col_occurs(col) {
                    self.remove_col(col);
                    progress = true;
                    break;
                }
                if self.try_eliminate(col) {
                    progress = true;
                    break;
                }
                if self.try_recover_div(local) {
                    progress = true;
                    break;
                }
            }
        }
        self.drop_unused_divs();
        self.simplify();
    }

    fn try_eliminate(&mut self, col: usize) -> bool {
        // substitution also rewrites division numerators
        if let Some(eq) = self
            .constraints
            .iter()
            .find(|c| c.is_equality() && c.coeff(col).abs() == 1)
            .cloned()
        {
            let a = eq.coeff(col);
            let mut value = eq.expr.scale(-a);
            value.set_coeff(col, 0);
            for c in self.constraints.iter_mut() {
                c.expr = c.expr.substitute(col, &value);
            }
            for l in self.locals.iter_mut() {
                if let Some(d) = l.div.as_mut() {
                    d.num = d.num.substitute(col, &value);
                }
            }
            self.constraints.retain(|c| c.normalize() != Normalized::Trivial);
            self.remove_col(col);
            return true;
        }
        if self.locals.iter().any(|l| l.div.as_ref().map_or(false, |d| d.num.coeff(col) != 0)) {
            return false;
        }
        let sys = self.to_system();
        match sys.eliminate_exact(col) {
            Some(reduced) => match Self::constraints_from_system(&reduced) {
                Some(constraints) => {
                    self.constraints = constraints;
                    self.remove_col(col);
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Recognize `a*q = e` and `e <= a*q <= e + a - 1` patterns.
    fn try_recover_div(&mut self, local: usize) -> bool {
        let col = self.local_col(local);
        let n = self.n_total();
        let depends_on_opaque = |expr: &AffineExpr, locals: &[Local], n_space: usize| {
            locals
                .iter()
                .enumerate()
                .any(|(i, l)| i != local && l.div.is_none() && expr.coeff(n_space + i) != 0)
        };
        let n_space = self.n_space();
        for c in &self.constraints {
            let a = c.coeff(col);
            if c.is_equality() && a != 0 {
                // a*q + rest = 0  =>  q = (-rest)/a exactly
                let mut rest = c.expr.clone();
                rest.set_coeff(col, 0);
                let num = if a > 0 { -rest } else { rest };
                if depends_on_opaque(&num, &self.locals, n_space) {
                    continue;
                }
                self.locals[local].div = Some(Div { num: num.resized(n), den: a.abs() });
                self.reorder_divs();
                return true;
            }
        }
        // pair of inequalities  a*q - e >= 0  and  -a*q + e + a - 1 >= 0
        let ineqs: Vec<&Constraint> = self
            .constraints
            .iter()
            .filter(|c| c.is_inequality() && c.coeff(col) != 0)
            .collect();
        for lower in ineqs.iter().filter(|c| c.coeff(col) > 0) {
            let a = lower.coeff(col);
            for upper in ineqs.iter().filter(|c| c.coeff(col) == -a) {
                let sum = lower.expr.clone() + upper.expr.clone();
                if sum.is_constant() && sum.constant == a - 1 {
                    // a*q >= e, so q = ceil(e/a) = floor((e + a - 1)/a) with e = a*q - lower
                    let mut e = -lower.expr.clone();
                    e.set_coeff(col, 0);
                    let num = e.add_constant(a - 1);
                    if depends_on_opaque(&num, &self.locals, n_space) {
                        continue;
                    }
                    self.locals[local].div = Some(Div { num: num.resized(n), den: a });
                    self.reorder_divs();
                    return true;
                }
            }
        }
        false
    }

    /// Divisions must only refer to earlier columns; move locals so that this holds.
    fn reorder_divs(&mut self) {
        let n_space = self.n_space();
        let n_locals = self.locals.len();
        let mut placed: Vec<usize> = Vec::with_capacity(n_locals);
        let mut remaining: Vec<usize> = (0..n_locals).collect();
        while !remaining.is_empty() {
            let pos = remaining.iter().position(|&i| match &self.locals[i].div {
                None => true,
                Some(d) => (0..n_locals)
                    .filter(|&j| d.num.coeff(n_space + j) != 0)
                    .all(|j| placed.contains(&j)),
            });
            match pos {
                Some(p) => placed.push(remaining.remove(p)),
                None => {
                    // cyclic definitions: forget the divisions that close the cycle
                    for &i in &remaining {
                        self.locals[i].div = None;
                    }
                    placed.extend(remaining.drain(..));
                }
            }
        }
        if placed.iter().enumerate().all(|(k, &i)| k == i) {
            return;
        }
        let n_total = self.n_total();
        let mut full: Vec<usize> = (0..n_total).collect();
        for (k, &i) in placed.iter().enumerate() {
            full[n_space + i] = n_space + k;
        }
        let old_locals = std::mem::take(&mut self.locals);
        let mut new_locals: Vec<Local> = vec![Local { div: None }; n_locals];
        for (i, l) in old_locals.into_iter().enumerate() {
            let target = full[n_space + i] - n_space;
            new_locals[target] = Local {
                div: l.div.map(|d| Div { num: d.num.remap(&full, n_total), den: d.den }),
            };
        }
        self.locals = new_locals;
        for c in self.constraints.iter_mut() {
            c.expr = c.expr.remap(&full, n_total);
        }
    }

    /// Remove divisions that only occur in their own defining constraints.
    fn drop_unused_divs(&mut self) {
        loop {
            let mut removed = false;
            for local in (0..self.locals.len()).rev() {
                if self.locals[local].div.is_none() {
                    continue;
                }
                let col = self.local_col(local);
                let used_elsewhere = self
                    .constraints
                    .iter()
                    .any(|c| c.coeff(col) != 0 && !self.is_div_constraint(c, local))
                    || self
                        .locals
                        .iter()
                        .any(|l| l.div.as_ref().map_or(false, |d| d.num.coeff(col) != 0));
                if !used_elsewhere {
                    let keep: Vec<Constraint> = self
                        .constraints
                        .iter()
                        .filter(|c| c.coeff(col) == 0)
                        .cloned()
                        .collect();
                    self.constraints = keep;
                    self.remove_col(col);
                    removed = true;
                    break;
                }
            }
            if !removed {
                break;
            }
        }
    }

    /// Normalize constraints, drop duplicates and trivially true rows,
    /// merge opposite inequalities into equalities.
    pub fn simplify(&mut self) {
        let n = self.n_total();
        let mut ineq_best: Vec<Constraint> = Vec::new();
        let mut eqs: Vec<Constraint> = Vec::new();
        for c in &self.constraints {
            let c = Constraint::new(c.expr.resized(n), c.kind);
            match c.normalize() {
                Normalized::Trivial => {}
                Normalized::Infeasible => {
                    let space = self.space.clone();
                    *self = BasicSet::empty(space);
                    return;
                }
                Normalized::Constraint(mut nc) => {
                    if nc.is_equality() {
                        // canonical sign: first non-zero coefficient positive
                        if nc.expr.coeffs.iter().find(|&&x| x != 0).map_or(false, |&x| x < 0) {
                            nc.expr = -nc.expr;
                        }
                        if !eqs.contains(&nc) {
                            eqs.push(nc);
                        }
                    } else if let Some(prev) = ineq_best.iter_mut().find(|p| p.expr.coeffs == nc.expr.coeffs) {
                        if nc.expr.constant < prev.expr.constant {
                            prev.expr.constant = nc.expr.constant;
                        }
                    } else {
                        ineq_best.push(nc);
                    }
                }
            }
        }
        // equalities with the same coefficients but different constants
        for i in 0..eqs.len() {
            for j in (i + 1)..eqs.len() {
                if eqs[i].expr.coeffs == eqs[j].expr.coeffs && eqs[i].expr.constant != eqs[j].expr.constant {
                    let space = self.space.clone();
                    *self = BasicSet::empty(space);
                    return;
                }
            }
        }
        let mut ineqs: Vec<Constraint> = Vec::new();
        let mut consumed = vec![false; ineq_best.len()];
        for i in 0..ineq_best.len() {
            if consumed[i] {
                continue;
            }
            let neg: Vec<i64> = ineq_best[i].expr.coeffs.iter().map(|c| -c).collect();
            let partner = (i + 1..ineq_best.len()).find(|&j| !consumed[j] && ineq_best[j].expr.coeffs == neg);
            if let Some(j) = partner {
                let gap = ineq_best[i].expr.constant + ineq_best[j].expr.constant;
                if gap < 0 {
                    let space = self.space.clone();
                    *self = BasicSet::empty(space);
                    return;
                }
                if gap == 0 {
                    consumed[j] = true;
                    let mut eq = ineq_best[i].clone();
                    eq.kind = ConstraintKind::Equality;
                    if eq.expr.coeffs.iter().find(|&&x| x != 0).map_or(false, |&x| x < 0) {
                        eq.expr = -eq.expr;
                    }
                    if !eqs.contains(&eq) {
                        eqs.push(eq);
                    }
                    continue;
                }
            }
            ineqs.push(ineq_best[i].clone());
        }
        // inequalities implied by an equality with the same coefficients
        ineqs.retain(|ineq| {
            !eqs.iter().any(|eq| {
                (eq.expr.coeffs == ineq.expr.coeffs && ineq.expr.constant >= eq.expr.constant)
                    || (eq.expr.coeffs.iter().zip(ineq.expr.coeffs.iter()).all(|(a, b)| *a == -*b)
                        && ineq.expr.constant >= -eq.expr.constant)
            })
        });
        self.constraints = eqs;
        self.constraints.extend(ineqs);
    }

    /// Remove constraints implied by the others (and by `context`, which
    /// must be over the same space).
    pub fn gist(&self, context: &BasicSet) -> BasicSet {
        if self.is_empty() {
            return self.clone();
        }
        let mut current = self.clone();
        let mut idx = 0;
        while idx < current.constraints.len() {
            let c = current.constraints[idx].clone();
            if current.is_any_div_constraint(&c) {
                idx += 1;
                continue;
            }
            let mut without = current.clone();
            without.constraints.remove(idx);
            let base = without.intersect(context);
            let redundant = c.negate_pieces().into_iter().all(|neg| {
                let mut test = base.clone();
                test.add_constraint(neg);
                test.is_empty()
            });
            if redundant {
                current = without;
            } else {
                idx += 1;
            }
        }
        current.drop_unused_divs();
        current
    }

    /// Locals whose meaning is lost under negation (opaque ones and
    /// divisions that depend on them).
    fn tainted_locals(&self) -> Vec<bool> {
        let n_space = self.n_space();
        let mut tainted: Vec<bool> = self.locals.iter().map(|l| l.div.is_none()).collect();
        let mut changed = true;
        while changed {
            changed = false;
            for (i, l) in self.locals.iter().enumerate() {
                if tainted[i] {
                    continue;
                }
                if let Some(d) = &l.div {
                    if (0..self.locals.len()).any(|j| tainted[j] && d.num.coeff(n_space + j) != 0) {
                        tainted[i] = true;
                        changed = true;
                    }
                }
            }
        }
        tainted
    }

    /// The complement as a list of basic sets, plus whether it is exact.
    /// Constraints over opaque locals are dropped before negating, which
    /// makes the complement smaller than the true one.
    pub fn complement(&self) -> (Vec<BasicSet>, bool) {
        let tainted = self.tainted_locals();
        let n_space = self.n_space();
        let mut skeleton = BasicSet::universe(self.space.clone());
        // keep the clean divisions, in order, with their defining constraints
        let mut col_map: Vec<Option<usize>> = (0..self.n_total())
            .map(|i| if i < n_space { Some(i) } else { None })
            .collect();
        for (i, l) in self.locals.iter().enumerate() {
            if tainted[i] {
                continue;
            }
            if let Some(d) = &l.div {
                let map: Vec<usize> = col_map.iter().map(|m| m.unwrap_or(0)).collect();
                let num = d.num.remap(&map, skeleton.n_total());
                let col = skeleton.add_div(num, d.den);
                col_map[n_space + i] = Some(col);
            }
        }
        let mut exact = true;
        let mut pieces = Vec::new();
        for c in &self.constraints {
            let uses_tainted = (0..self.locals.len()).any(|j| tainted[j] && c.coeff(n_space + j) != 0);
            if uses_tainted {
                exact = false;
                continue;
            }
            if self.is_any_div_constraint(c) {
                continue;
            }
            let map: Vec<usize> = col_map.iter().map(|m| m.unwrap_or(0)).collect();
            let expr = c.expr.remap(&map, skeleton.n_total());
            for neg in Constraint::new(expr, c.kind).negate_pieces() {
                let mut piece = skeleton.clone();
                piece.add_constraint(neg);
                pieces.push(piece);
            }
        }
        (pieces, exact)
    }

    /// Fix a space column to a value.
    pub fn fix(&self, col: usize, value: i64) -> BasicSet {
        let mut result = self.clone();
        let n = result.n_total();
        result.add_eq(AffineExpr::var(col, n).add_constant(-value));
        result
    }

    /// Lower and upper bounds of a column, read directly off the constraints.
    pub fn col_bounds(&self, col: usize) -> (Vec<Bound>, Vec<Bound>) {
        let mut lower = Vec::new();
        let mut upper = Vec::new();
        for c in &self.constraints {
            let a = c.coeff(col);
            if a == 0 {
                continue;
            }
            let mut rest = c.expr.clone();
            rest.set_coeff(col, 0);
            // a*x + rest >= 0
            if c.is_equality() {
                let den = a.abs();
                let expr = if a > 0 { -rest } else { rest };
                lower.push(Bound { expr: expr.clone(), den });
                upper.push(Bound { expr, den });
            } else if a > 0 {
                lower.push(Bound { expr: -rest, den: a });
            } else {
                upper.push(Bound { expr: rest, den: -a });
            }
        }
        (lower, upper)
    }

    /// Whether every local is a division (no opaque existentials).
    pub fn has_opaque_locals(&self) -> bool {
        self.locals.iter().any(|l| l.div.is_none())
    }

    /// Eliminate the opaque locals over the rationals. The result contains
    /// `self` and has only division locals; divisions over an opaque local
    /// are eliminated with it.
    pub fn relax_opaque_locals(&self) -> BasicSet {
        if !self.has_opaque_locals() {
            return self.clone();
        }
        let mut result = self.clone();
        for (local, tainted) in self.tainted_locals().into_iter().enumerate() {
            if tainted {
                result.locals[local].div = None;
            }
        }
        let n_space = result.n_space();
        for local in (0..result.locals.len()).rev() {
            if result.locals[local].div.is_some() {
                continue;
            }
            let col = n_space + local;
            let reduced = result
                .to_system()
                .eliminate_rational(col)
                .and_then(|sys| Self::constraints_from_system(&sys));
            result.constraints = match reduced {
                Some(constraints) => constraints,
                // too large to combine: forget the column's constraints
                None => result.constraints.iter().filter(|c| c.coeff(col) == 0).cloned().collect(),
            };
            result.remove_col(col);
        }
        result.simplify();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(lo: i64, hi: i64) -> BasicSet {
        let mut b = BasicSet::universe(Space::set(1));
        b.add_constraint(Constraint::lower_bound(0, lo, 1));
        b.add_constraint(Constraint::upper_bound(0, hi, 1));
        b
    }

    #[test]
    fn test_interval_emptiness() {
        assert!(!interval(0, 3).is_empty());
        assert!(interval(4, 3).is_empty());
        assert!(interval(0, 3).contains(&[2]));
        assert!(!interval(0, 3).contains(&[4]));
    }

    #[test]
    fn test_div_local() {
        // { [i] : exists q = floor(i/4): 4q = i, 0 <= i <= 10 } = multiples of 4
        let mut b = interval(0, 10);
        let q = b.add_div(AffineExpr::var(0, 1), 4);
        let n = b.n_total();
        b.add_eq(AffineExpr::var(0, n) - AffineExpr::var(q, n).scale(4));
        assert!(b.contains(&[8]));
        assert!(!b.contains(&[6]));
        let (pieces, exact) = b.complement();
        assert!(exact);
        let in_complement = |x: i64| pieces.iter().any(|p| p.contains(&[x]));
        assert!(in_complement(6));
        assert!(in_complement(12));
        assert!(!in_complement(4));
    }

    #[test]
    fn test_project_out_keeps_stride() {
        // { [i, j] : i = 2j, 0 <= j <= 5 } projected on i gives even numbers in [0, 10]
        let mut b = BasicSet::universe(Space::set(2));
        b.add_eq(AffineExpr::from_coeffs(vec![1, -2], 0));
        b.add_constraint(Constraint::lower_bound(1, 0, 2));
        b.add_constraint(Constraint::upper_bound(1, 5, 2));
        let p = b.project_out(1, 1, Space::set(1));
        assert!(p.contains(&[4]));
        assert!(!p.contains(&[5]));
        assert!(!p.contains(&[12]));
        assert!(!p.has_opaque_locals());
    }

    #[test]
    fn test_relax_opaque_locals_over_approximates() {
        // { [x] : exists e: x <= 3e <= x + 1, 0 <= x <= 10 }
        let mut b = interval(0, 10);
        let e = b.add_exists();
        let n = b.n_total();
        b.add_ineq(AffineExpr::var(e, n).scale(3) - AffineExpr::var(0, n));
        b.add_ineq(AffineExpr::var(0, n).add_constant(1) - AffineExpr::var(e, n).scale(3));
        let relaxed = b.relax_opaque_locals();
        assert!(!relaxed.has_opaque_locals());
        for x in 0..=10 {
            if b.contains(&[x]) {
                assert!(relaxed.contains(&[x]));
            }
        }
        assert!(!relaxed.contains(&[11]));
        assert!(!relaxed.contains(&[-1]));
    }

    #[test]
    fn test_simplify_merges_opposite_inequalities() {
        let mut b = interval(3, 3);
        b.simplify();
        assert_eq!(b.constraints.len(), 1);
        assert!(b.constraints[0].is_equality());
    }

    #[test]
    fn test_gist_removes_implied_bound() {
        // { i : 0 <= i <= 10 and i >= -5 } gist universe removes i >= -5
        let mut b = interval(0, 10);
        b.add_constraint(Constraint::lower_bound(0, -5, 1));
        let g = b.gist(&BasicSet::universe(Space::set(1)));
        assert_eq!(g.constraints.len(), 2);
    }

    #[test]
    fn test_sample_finds_point() {
        let mut b = interval(5, 9);
        b.add_eq(AffineExpr::from_coeffs(vec![1], -7));
        assert_eq!(b.sample(), Some(vec![7]));
    }
}
