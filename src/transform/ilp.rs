//! Small integer linear programs for the scheduler.
//!
//! Every variable is non-negative. The first `n_int` variables must take
//! integer values; the remaining ones (Farkas multipliers) are rational.
//! Problems are solved by a two-phase primal simplex over exact rationals
//! with Bland's rule. The lexicographic minimum of the relaxation is found
//! in a single tableau; when it is not integral, depth-first branch and
//! bound minimizes the objectives one at a time.

use crate::polyhedral::PolyCtx;
use crate::utils::errors::PolyError;
use crate::utils::matrix::{Rational, RationalMatrix};
use log::trace;
use num_traits::{One, Signed, Zero};

/// One constraint `coeffs . x + constant (= | >=) 0`, with sparse
/// coefficients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlpRow {
    pub coeffs: Vec<(usize, i64)>,
    pub constant: i64,
    pub eq: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IlpProblem {
    n_int: usize,
    n_vars: usize,
    rows: Vec<IlpRow>,
}

/// Extra bound of a branch-and-bound node.
#[derive(Debug, Clone, Copy)]
enum Branch {
    AtMost(usize, i64),
    AtLeast(usize, i64),
}

/// A simplex tableau in canonical form: `basis[i]` is the column holding
/// the unit vector of row `i`. Columns are the structural variables, one
/// surplus per inequality, one artificial per row and the right-hand side.
struct Tableau {
    t: RationalMatrix,
    basis: Vec<usize>,
    n_struct: usize,
    rhs: usize,
    /// Columns that may still enter the basis
    allowed: Vec<bool>,
}

impl Tableau {
    /// Phase 1 on `rows` (`coeffs . x (= | >=) rhs`); `None` when
    /// infeasible.
    fn feasible(
        n_struct: usize,
        rows: Vec<(Vec<Rational>, Rational, bool)>,
        ctx: &PolyCtx,
    ) -> Result<Option<Tableau>, PolyError> {
        let m = rows.len();
        let n_surplus = rows.iter().filter(|r| !r.2).count();
        let art0 = n_struct + n_surplus;
        let rhs = art0 + m;
        let mut t = RationalMatrix::zeros(m, rhs + 1);
        let mut basis = Vec::with_capacity(m);
        let mut surplus = n_struct;
        for (i, (coeffs, b, is_eq)) in rows.into_iter().enumerate() {
            let sign = if b.is_negative() { -Rational::one() } else { Rational::one() };
            for (j, c) in coeffs.into_iter().enumerate() {
                if !c.is_zero() {
                    t.set(i, j, c * sign);
                }
            }
            if !is_eq {
                t.set(i, surplus, -sign);
                surplus += 1;
            }
            t.set(i, art0 + i, Rational::one());
            t.set(i, rhs, b * sign);
            basis.push(art0 + i);
        }
        let mut tableau = Tableau { t, basis, n_struct, rhs, allowed: vec![true; rhs] };

        let cost: Vec<Rational> = (0..rhs).map(|j| if j >= art0 { Rational::one() } else { Rational::zero() }).collect();
        if !tableau.optimize(&cost, ctx)? {
            return Ok(None);
        }
        let infeasibility = (0..m)
            .filter(|&i| tableau.basis[i] >= art0)
            .fold(Rational::zero(), |acc, i| acc + tableau.value_in_row(i));
        if infeasibility.is_positive() {
            return Ok(None);
        }
        // drive the remaining zero artificials out of the basis
        for i in 0..m {
            if tableau.basis[i] < art0 {
                continue;
            }
            if let Some(j) = (0..art0).find(|&j| tableau.entry(i, j).map_or(false, |v| !v.is_zero())) {
                tableau.pivot(i, j);
            }
        }
        for allowed in &mut tableau.allowed[art0..] {
            *allowed = false;
        }
        Ok(Some(tableau))
    }

    fn entry(&self, i: usize, j: usize) -> Option<Rational> {
        self.t.get(i, j).copied()
    }

    fn value_in_row(&self, i: usize) -> Rational {
        self.entry(i, self.rhs).unwrap_or_default()
    }

    fn pivot(&mut self, i: usize, j: usize) {
        self.t.pivot(i, j);
        self.basis[i] = j;
    }

    fn reduced_cost(&self, cost: &[Rational], j: usize) -> Rational {
        let mut reduced = cost.get(j).copied().unwrap_or_default();
        for (i, &b) in self.basis.iter().enumerate() {
            let cb = cost.get(b).copied().unwrap_or_default();
            if cb.is_zero() {
                continue;
            }
            let a = self.entry(i, j).unwrap_or_default();
            if !a.is_zero() {
                reduced -= cb * a;
            }
        }
        reduced
    }

    /// Primal simplex on `cost` with Bland's rule; `false` when unbounded.
    fn optimize(&mut self, cost: &[Rational], ctx: &PolyCtx) -> Result<bool, PolyError> {
        loop {
            ctx.charge(1)?;
            let entering = (0..self.rhs)
                .filter(|&j| self.allowed[j] && !self.basis.contains(&j))
                .find(|&j| self.reduced_cost(cost, j).is_negative());
            let Some(j) = entering else { return Ok(true) };
            let mut leaving: Option<(usize, Rational)> = None;
            for i in 0..self.basis.len() {
                let a = self.entry(i, j).unwrap_or_default();
                if !a.is_positive() {
                    continue;
                }
                let ratio = self.value_in_row(i) / a;
                let better = match &leaving {
                    None => true,
                    Some((k, r)) => ratio < *r || (ratio == *r && self.basis[i] < self.basis[*k]),
                };
                if better {
                    leaving = Some((i, ratio));
                }
            }
            let Some((i, _)) = leaving else { return Ok(false) };
            self.pivot(i, j);
        }
    }

    /// Minimize `target` and keep it at its optimum: nonbasic columns with
    /// a positive reduced cost may no longer enter.
    fn minimize_and_fix(&mut self, target: usize, ctx: &PolyCtx) -> Result<bool, PolyError> {
        let cost: Vec<Rational> =
            (0..self.rhs).map(|j| if j == target { Rational::one() } else { Rational::zero() }).collect();
        if !self.optimize(&cost, ctx)? {
            return Ok(false);
        }
        for j in 0..self.rhs {
            if self.allowed[j] && !self.basis.contains(&j) && self.reduced_cost(&cost, j).is_positive() {
                self.allowed[j] = false;
            }
        }
        Ok(true)
    }

    fn solution(&self) -> Vec<Rational> {
        let mut x = vec![Rational::zero(); self.n_struct];
        for (i, &b) in self.basis.iter().enumerate() {
            if b < self.n_struct {
                x[b] = self.value_in_row(i);
            }
        }
        x
    }
}

impl IlpProblem {
    /// A problem with `n_int` integer variables.
    pub fn new(n_int: usize) -> Self {
        Self { n_int, n_vars: n_int, rows: Vec::new() }
    }

    pub fn n_vars(&self) -> usize {
        self.n_vars
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Add a rational variable and return its index.
    pub fn add_rational_var(&mut self) -> usize {
        self.n_vars += 1;
        self.n_vars - 1
    }

    pub fn add_ge(&mut self, coeffs: Vec<(usize, i64)>, constant: i64) {
        self.rows.push(IlpRow { coeffs, constant, eq: false });
    }

    pub fn add_eq(&mut self, coeffs: Vec<(usize, i64)>, constant: i64) {
        self.rows.push(IlpRow { coeffs, constant, eq: true });
    }

    /// `x_var <= bound`
    pub fn add_upper_bound(&mut self, var: usize, bound: i64) {
        self.add_ge(vec![(var, -1)], bound);
    }

    /// Lexicographically smallest solution, minimizing the variables of
    /// `order` one after the other (all must be integer variables). Returns
    /// the integer variables of the optimum, `None` when infeasible.
    pub fn lexmin(&self, order: &[usize], ctx: &PolyCtx) -> Result<Option<Vec<i64>>, PolyError> {
        let Some(mut tableau) = Tableau::feasible(self.n_vars, self.dense_rows(&[]), ctx)? else {
            return Ok(None);
        };
        let mut bounded = true;
        for &v in order {
            if !tableau.minimize_and_fix(v, ctx)? {
                bounded = false;
                break;
            }
        }
        if bounded {
            if let Some(point) = self.integer_point(&tableau.solution()) {
                return Ok(Some(point));
            }
        }
        trace!("relaxation is fractional, branching");
        self.lexmin_by_branching(order, ctx)
    }

    fn lexmin_by_branching(&self, order: &[usize], ctx: &PolyCtx) -> Result<Option<Vec<i64>>, PolyError> {
        let mut fixed: Vec<Branch> = Vec::new();
        let mut last = None;
        let targets: Vec<Option<usize>> =
            if order.is_empty() { vec![None] } else { order.iter().map(|&v| Some(v)).collect() };
        for target in targets {
            match self.minimize(target, &fixed, ctx)? {
                None => return Ok(None),
                Some((value, point)) => {
                    if let Some(v) = target {
                        fixed.push(Branch::AtMost(v, value));
                        fixed.push(Branch::AtLeast(v, value));
                    }
                    last = Some(point);
                }
            }
        }
        Ok(last)
    }

    /// Integer minimum of `target` (any feasible point when `None`).
    fn minimize(
        &self,
        target: Option<usize>,
        fixed: &[Branch],
        ctx: &PolyCtx,
    ) -> Result<Option<(i64, Vec<i64>)>, PolyError> {
        let mut best: Option<(i64, Vec<i64>)> = None;
        let mut stack: Vec<Vec<Branch>> = vec![fixed.to_vec()];
        while let Some(bounds) = stack.pop() {
            ctx.charge(1)?;
            let Some(mut tableau) = Tableau::feasible(self.n_vars, self.dense_rows(&bounds), ctx)? else {
                continue;
            };
            if let Some(t) = target {
                if !tableau.minimize_and_fix(t, ctx)? {
                    continue;
                }
            }
            let solution = tableau.solution();
            let value = target.map_or(Rational::zero(), |t| solution[t]);
            if let Some((b, _)) = &best {
                if value.ceil() >= Rational::from_integer(*b as i128) {
                    continue;
                }
            }
            match (0..self.n_int).find(|&v| !solution[v].is_integer()) {
                None => {
                    let Some(point) = self.integer_point(&solution) else { continue };
                    let value = target.map_or(0, |t| point[t]);
                    trace!("integer point with objective {}", value);
                    best = Some((value, point));
                    if target.is_none() {
                        break;
                    }
                }
                Some(v) => {
                    let floor = solution[v].floor().to_integer();
                    let (Ok(lo), Ok(hi)) = (i64::try_from(floor), i64::try_from(floor + 1)) else { continue };
                    let mut up = bounds.clone();
                    up.push(Branch::AtLeast(v, hi));
                    let mut down = bounds;
                    down.push(Branch::AtMost(v, lo));
                    stack.push(up);
                    stack.push(down);
                }
            }
        }
        Ok(best)
    }

    fn integer_point(&self, solution: &[Rational]) -> Option<Vec<i64>> {
        solution[..self.n_int]
            .iter()
            .map(|r| if r.is_integer() { i64::try_from(r.to_integer()).ok() } else { None })
            .collect()
    }

    /// Dense `coeffs . x (= | >=) rhs` rows of the problem plus `bounds`.
    fn dense_rows(&self, bounds: &[Branch]) -> Vec<(Vec<Rational>, Rational, bool)> {
        let n = self.n_vars;
        let mut rows = Vec::with_capacity(self.rows.len() + bounds.len());
        for row in &self.rows {
            let mut coeffs = vec![Rational::zero(); n];
            for &(v, c) in &row.coeffs {
                coeffs[v] += Rational::from_integer(c as i128);
            }
            rows.push((coeffs, Rational::from_integer(-(row.constant as i128)), row.eq));
        }
        for b in bounds {
            let mut coeffs = vec![Rational::zero(); n];
            match *b {
                Branch::AtLeast(v, lo) => {
                    coeffs[v] = Rational::one();
                    rows.push((coeffs, Rational::from_integer(lo as i128), false));
                }
                Branch::AtMost(v, hi) => {
                    coeffs[v] = -Rational::one();
                    rows.push((coeffs, Rational::from_integer(-(hi as i128)), false));
                }
            }
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_minimum() {
        // x0 + x1 >= 3, x0 <= 1: lexmin (x0, x1) = (0, 3)
        let mut ilp = IlpProblem::new(2);
        ilp.add_ge(vec![(0, 1), (1, 1)], -3);
        ilp.add_upper_bound(0, 1);
        let sol = ilp.lexmin(&[0, 1], &PolyCtx::unlimited()).unwrap().unwrap();
        assert_eq!(sol, vec![0, 3]);
        let sol = ilp.lexmin(&[1, 0], &PolyCtx::unlimited()).unwrap().unwrap();
        assert_eq!(sol, vec![1, 2]);
    }

    #[test]
    fn test_integrality() {
        // 2 x0 = 2 x1 + 1 has no integer solution
        let mut ilp = IlpProblem::new(2);
        ilp.add_eq(vec![(0, 2), (1, -2)], -1);
        ilp.add_upper_bound(0, 10);
        ilp.add_upper_bound(1, 10);
        assert!(ilp.lexmin(&[0, 1], &PolyCtx::unlimited()).unwrap().is_none());

        // 3 x0 >= 4: x0 = 2
        let mut ilp = IlpProblem::new(1);
        ilp.add_ge(vec![(0, 3)], -4);
        assert_eq!(ilp.lexmin(&[0], &PolyCtx::unlimited()).unwrap(), Some(vec![2]));
    }

    #[test]
    fn test_rational_multipliers() {
        // x0 = 2 * l with rational l >= 1/2
        let mut ilp = IlpProblem::new(1);
        let l = ilp.add_rational_var();
        ilp.add_eq(vec![(0, 1), (l, -2)], 0);
        ilp.add_ge(vec![(l, 2)], -1);
        assert_eq!(ilp.lexmin(&[0], &PolyCtx::unlimited()).unwrap(), Some(vec![1]));
    }

    #[test]
    fn test_lexicographic_order() {
        // x0 + 2 x1 >= 4
        let mut ilp = IlpProblem::new(2);
        ilp.add_ge(vec![(0, 1), (1, 2)], -4);
        assert_eq!(ilp.lexmin(&[0, 1], &PolyCtx::unlimited()).unwrap(), Some(vec![0, 2]));
        assert_eq!(ilp.lexmin(&[1, 0], &PolyCtx::unlimited()).unwrap(), Some(vec![4, 0]));
    }

    #[test]
    fn test_infeasible_and_budget() {
        let mut ilp = IlpProblem::new(1);
        ilp.add_ge(vec![(0, -1)], -1);
        assert!(ilp.lexmin(&[0], &PolyCtx::unlimited()).unwrap().is_none());

        let mut ilp = IlpProblem::new(2);
        ilp.add_ge(vec![(0, 1), (1, 1)], -3);
        assert!(ilp.lexmin(&[0, 1], &PolyCtx::with_max_operations(1)).is_err());
    }
}
