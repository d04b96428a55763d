//! Integer feasibility and variable elimination.
//!
//! The solver works on a flat [`System`] of equalities and inequalities over
//! integer variables. Feasibility follows the Omega test: equalities are
//! removed by substitution (after unimodular column steps when no unit
//! coefficient is available), inequalities by Fourier-Motzkin elimination,
//! which is exact whenever one side of the eliminated variable only has unit
//! coefficients. Otherwise the real and dark shadows are compared and the
//! remaining gap is split into a bounded number of splinters.
//!
//! Answers that would exceed the row, coefficient or splinter limits come
//! back as [`Feasibility::Unknown`]; callers treat that as "maybe non-empty".

use num_integer::Integer;
use std::collections::HashMap;

/// Wide integer used inside the solver.
pub type Int = i128;

const MAX_ROWS: usize = 600;
const MAX_COEFF: Int = 1 << 62;
const MAX_DEPTH: usize = 6;
const MAX_SPLINTERS: usize = 96;
const MAX_LEXMIN_STEPS: usize = 20_000;

/// One row: `coeffs . x + constant` compared against zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    /// Coefficient per variable
    pub coeffs: Vec<Int>,
    /// Constant term
    pub constant: Int,
}

impl Row {
    /// Build a row from coefficients and constant.
    pub fn new(coeffs: Vec<Int>, constant: Int) -> Self {
        Self { coeffs, constant }
    }

    /// Coefficient of variable `v`.
    pub fn coeff(&self, v: usize) -> Int {
        self.coeffs.get(v).copied().unwrap_or(0)
    }

    fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    fn coeff_gcd(&self) -> Int {
        self.coeffs.iter().fold(0, |g, &c| g.gcd(&c))
    }

    /// `ka * self + kb * other`
    fn combine(&self, ka: Int, other: &Row, kb: Int) -> Row {
        let coeffs = self
            .coeffs
            .iter()
            .zip(other.coeffs.iter())
            .map(|(&a, &b)| ka * a + kb * b)
            .collect();
        Row::new(coeffs, ka * self.constant + kb * other.constant)
    }

    fn too_large(&self) -> bool {
        self.constant.abs() > MAX_COEFF || self.coeffs.iter().any(|c| c.abs() > MAX_COEFF)
    }

    /// Replace variable `v` using the equality `eq` whose coefficient of `v` is +1 or -1.
    fn substitute_unit(&self, v: usize, eq: &Row) -> Row {
        let c = self.coeff(v);
        if c == 0 {
            return self.clone();
        }
        // eq: a*x_v + rest = 0 with a = +-1, so x_v = -a*rest
        let a = eq.coeff(v);
        self.combine(1, eq, -c * a)
    }

    /// Evaluate at a point.
    pub fn evaluate(&self, point: &[Int]) -> Int {
        self.coeffs
            .iter()
            .zip(point.iter())
            .fold(self.constant, |acc, (&c, &x)| acc + c * x)
    }
}

/// Result of an integer feasibility test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feasibility {
    /// No integer point exists
    Empty,
    /// At least one integer point exists
    NonEmpty,
    /// The test gave up before reaching an answer
    Unknown,
}

impl Feasibility {
    /// Conservative emptiness: only a proven `Empty` counts.
    pub fn is_empty(self) -> bool {
        self == Feasibility::Empty
    }
}

/// A conjunction of equalities and inequalities over `n_vars` variables.
#[derive(Debug, Clone, Default)]
pub struct System {
    /// Number of variables
    pub n_vars: usize,
    /// Rows that must be zero
    pub eqs: Vec<Row>,
    /// Rows that must be non-negative
    pub ineqs: Vec<Row>,
}

/// Inclusive bounds of one variable; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarRange {
    /// Smallest value (if bounded below)
    pub lower: Option<Int>,
    /// Largest value (if bounded above)
    pub upper: Option<Int>,
}

impl System {
    /// An empty (unconstrained) system.
    pub fn new(n_vars: usize) -> Self {
        Self { n_vars, eqs: Vec::new(), ineqs: Vec::new() }
    }

    /// Add `row = 0`.
    pub fn add_eq(&mut self, row: Row) {
        self.eqs.push(row);
    }

    /// Add `row >= 0`.
    pub fn add_ineq(&mut self, row: Row) {
        self.ineqs.push(row);
    }

    fn n_rows(&self) -> usize {
        self.eqs.len() + self.ineqs.len()
    }

    /// Normalize rows over integers; `Err` when a row is infeasible.
    fn normalize_integer(&mut self) -> Result<(), ()> {
        let mut eqs = Vec::with_capacity(self.eqs.len());
        for row in self.eqs.drain(..) {
            let g = row.coeff_gcd().abs();
            if g == 0 {
                if row.constant != 0 {
                    return Err(());
                }
                continue;
            }
            if row.constant % g != 0 {
                return Err(());
            }
            if g == 1 {
                eqs.push(row);
            } else {
                eqs.push(Row::new(row.coeffs.iter().map(|c| c / g).collect(), row.constant / g));
            }
        }
        self.eqs = eqs;
        let mut ineqs = Vec::with_capacity(self.ineqs.len());
        for row in self.ineqs.drain(..) {
            let g = row.coeff_gcd().abs();
            if g == 0 {
                if row.constant < 0 {
                    return Err(());
                }
                continue;
            }
            if g == 1 {
                ineqs.push(row);
            } else {
                ineqs.push(Row::new(
                    row.coeffs.iter().map(|c| c / g).collect(),
                    Integer::div_floor(&row.constant, &g),
                ));
            }
        }
        self.ineqs = ineqs;
        Ok(())
    }

    /// Normalize rows over rationals (no rounding); `Err` when infeasible.
    fn normalize_rational(&mut self) -> Result<(), ()> {
        let reduce = |row: Row| -> Row {
            let g = row.coeff_gcd().gcd(&row.constant).abs();
            if g > 1 {
                Row::new(row.coeffs.iter().map(|c| c / g).collect(), row.constant / g)
            } else {
                row
            }
        };
        let mut eqs = Vec::with_capacity(self.eqs.len());
        for row in self.eqs.drain(..) {
            if row.is_constant() {
                if row.constant != 0 {
                    return Err(());
                }
                continue;
            }
            eqs.push(reduce(row));
        }
        self.eqs = eqs;
        let mut ineqs = Vec::with_capacity(self.ineqs.len());
        for row in self.ineqs.drain(..) {
            if row.is_constant() {
                if row.constant < 0 {
                    return Err(());
                }
                continue;
            }
            ineqs.push(reduce(row));
        }
        self.ineqs = ineqs;
        self.dedup_parallel()
    }

    /// Keep the tightest of parallel inequalities and turn opposite pairs
    /// with a zero gap into equalities.
    fn dedup_parallel(&mut self) -> Result<(), ()> {
        let mut best: HashMap<Vec<Int>, Int> = HashMap::new();
        let mut order: Vec<Vec<Int>> = Vec::new();
        for row in &self.ineqs {
            match best.get_mut(&row.coeffs) {
                Some(c) => {
                    if row.constant < *c {
                        *c = row.constant;
                    }
                }
                None => {
                    best.insert(row.coeffs.clone(), row.constant);
                    order.push(row.coeffs.clone());
                }
            }
        }
        let mut ineqs = Vec::with_capacity(order.len());
        let mut consumed: Vec<bool> = vec![false; order.len()];
        for (idx, coeffs) in order.iter().enumerate() {
            if consumed[idx] {
                continue;
            }
            let constant = best[coeffs];
            let neg: Vec<Int> = coeffs.iter().map(|c| -c).collect();
            if let Some(&other) = best.get(&neg) {
                if constant + other < 0 {
                    return Err(());
                }
                if constant + other == 0 {
                    if let Some(pos) = order.iter().position(|c| *c == neg) {
                        consumed[pos] = true;
                    }
                    self.eqs.push(Row::new(coeffs.clone(), constant));
                    continue;
                }
            }
            ineqs.push(Row::new(coeffs.clone(), constant));
        }
        self.ineqs = ineqs;
        Ok(())
    }

    fn overflowed(&self) -> bool {
        self.n_rows() > MAX_ROWS
            || self.eqs.iter().any(Row::too_large)
            || self.ineqs.iter().any(Row::too_large)
    }

    fn occurs(&self, v: usize) -> bool {
        self.eqs.iter().any(|r| r.coeff(v) != 0) || self.ineqs.iter().any(|r| r.coeff(v) != 0)
    }

    /// Substitute variable `v` out of every row using equality `idx` (unit coefficient).
    fn substitute_eq(&mut self, idx: usize, v: usize) {
        let eq = self.eqs.remove(idx);
        for row in self.eqs.iter_mut() {
            *row = row.substitute_unit(v, &eq);
        }
        for row in self.ineqs.iter_mut() {
            *row = row.substitute_unit(v, &eq);
        }
    }

    /// Remove one equality, possibly after unimodular column steps.
    /// Only valid for feasibility, since it changes the meaning of columns.
    fn reduce_equality(&mut self) {
        let (idx, v) = match self.pick_equality() {
            Some(p) => p,
            None => return,
        };
        let a = self.eqs[idx].coeff(v);
        if a.abs() == 1 {
            self.substitute_eq(idx, v);
            return;
        }
        let other = (0..self.n_vars).find(|&j| j != v && self.eqs[idx].coeff(j) != 0);
        let j = match other {
            Some(j) => j,
            None => return,
        };
        let b = self.eqs[idx].coeff(j);
        let ext = a.extended_gcd(&b);
        let (g, p, q) = (ext.gcd, ext.x, ext.y);
        // x_v = p*y - (b/g)*z, x_j = q*y + (a/g)*z is unimodular
        let (bg, ag) = (b / g, a / g);
        let transform = |row: &mut Row| {
            let cv = row.coeff(v);
            let cj = row.coeff(j);
            if cv == 0 && cj == 0 {
                return;
            }
            row.coeffs[v] = cv * p + cj * q;
            row.coeffs[j] = -cv * bg + cj * ag;
        };
        for row in self.eqs.iter_mut() {
            transform(row);
        }
        for row in self.ineqs.iter_mut() {
            transform(row);
        }
    }

    /// Choose an equality and the variable with the smallest coefficient in it.
    fn pick_equality(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize, Int)> = None;
        for (idx, row) in self.eqs.iter().enumerate() {
            for (v, &c) in row.coeffs.iter().enumerate() {
                if c == 0 {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, _, bc)) => c.abs() < bc,
                };
                if better {
                    best = Some((idx, v, c.abs()));
                }
            }
        }
        best.map(|(idx, v, _)| (idx, v))
    }

    /// Drop every inequality over a variable that is bounded on one side only.
    fn drop_one_sided(&mut self) -> bool {
        let mut changed = false;
        for v in 0..self.n_vars {
            let mut pos = false;
            let mut neg = false;
            for row in &self.ineqs {
                let c = row.coeff(v);
                pos |= c > 0;
                neg |= c < 0;
            }
            if pos != neg {
                self.ineqs.retain(|r| r.coeff(v) == 0);
                changed = true;
            }
        }
        changed
    }

    /// Pick the next variable for Fourier-Motzkin; returns (var, exact).
    fn choose_fm_var(&self) -> Option<(usize, bool)> {
        let mut best: Option<(usize, bool, usize)> = None;
        for v in 0..self.n_vars {
            let mut n_lower = 0usize;
            let mut n_upper = 0usize;
            let mut unit_lower = true;
            let mut unit_upper = true;
            for row in &self.ineqs {
                let c = row.coeff(v);
                if c > 0 {
                    n_lower += 1;
                    unit_lower &= c == 1;
                } else if c < 0 {
                    n_upper += 1;
                    unit_upper &= c == -1;
                }
            }
            if n_lower == 0 && n_upper == 0 {
                continue;
            }
            let exact = unit_lower || unit_upper;
            let cost = n_lower * n_upper;
            let better = match best {
                None => true,
                Some((_, bexact, bcost)) => (exact && !bexact) || (exact == bexact && cost < bcost),
            };
            if better {
                best = Some((v, exact, cost));
            }
        }
        best.map(|(v, exact, _)| (v, exact))
    }

    /// Fourier-Motzkin elimination of `v`; `dark` computes the dark shadow.
    fn fourier_motzkin(&self, v: usize, dark: bool) -> System {
        let mut out = System::new(self.n_vars);
        out.eqs = self.eqs.clone();
        let mut lowers = Vec::new();
        let mut uppers = Vec::new();
        for row in &self.ineqs {
            let c = row.coeff(v);
            if c > 0 {
                lowers.push(row);
            } else if c < 0 {
                uppers.push(row);
            } else {
                out.ineqs.push(row.clone());
            }
        }
        for l in &lowers {
            let a = l.coeff(v);
            for u in &uppers {
                let b = -u.coeff(v);
                let mut row = l.combine(b, u, a);
                if dark {
                    row.constant -= (a - 1) * (b - 1);
                }
                out.ineqs.push(row);
            }
        }
        out
    }

    /// Integer feasibility.
    pub fn check(&self) -> Feasibility {
        check_rec(self.clone(), 0)
    }

    /// Exactly eliminate variable `v`, keeping the meaning of all other
    /// columns. Returns `None` when no exact elimination step applies.
    pub fn eliminate_exact(&self, v: usize) -> Option<System> {
        let mut sys = self.clone();
        // gcd tightening often turns `a*v` rows into unit ones
        if sys.normalize_integer().is_err() {
            let mut empty = System::new(self.n_vars);
            empty.add_ineq(Row::new(vec![0; self.n_vars], -1));
            return Some(empty);
        }
        if let Some(idx) = sys.eqs.iter().position(|r| r.coeff(v).abs() == 1) {
            sys.substitute_eq(idx, v);
            return Some(sys);
        }
        if sys.eqs.iter().any(|r| r.coeff(v) != 0) {
            return None;
        }
        let mut n_lower = 0;
        let mut n_upper = 0;
        let mut unit_lower = true;
        let mut unit_upper = true;
        for row in &sys.ineqs {
            let c = row.coeff(v);
            if c > 0 {
                n_lower += 1;
                unit_lower &= c == 1;
            } else if c < 0 {
                n_upper += 1;
                unit_upper &= c == -1;
            }
        }
        if n_lower == 0 || n_upper == 0 {
            sys.ineqs.retain(|r| r.coeff(v) == 0);
            return Some(sys);
        }
        if !(unit_lower || unit_upper) {
            return None;
        }
        let out = sys.fourier_motzkin(v, false);
        if out.overflowed() {
            return None;
        }
        Some(out)
    }

    /// Eliminate `v` over the rationals (real shadow). Exact for rational
    /// variables; an over-approximation of the integer projection otherwise.
    pub fn eliminate_rational(&self, v: usize) -> Option<System> {
        let mut sys = self.clone();
        if let Some(idx) = sys.eqs.iter().position(|r| r.coeff(v) != 0) {
            let eq = sys.eqs.remove(idx);
            let a = eq.coeff(v);
            let sign = a.signum();
            let scale = a.abs();
            let apply = |row: &Row| -> Row {
                let c = row.coeff(v);
                if c == 0 {
                    row.clone()
                } else {
                    row.combine(scale, &eq, -c * sign)
                }
            };
            sys.eqs = sys.eqs.iter().map(apply).collect();
            sys.ineqs = sys.ineqs.iter().map(apply).collect();
        } else {
            sys = sys.fourier_motzkin(v, false);
        }
        if sys.normalize_rational().is_err() {
            let mut empty = System::new(self.n_vars);
            empty.add_ineq(Row::new(vec![0; self.n_vars], -1));
            return Some(empty);
        }
        if sys.overflowed() {
            return None;
        }
        Some(sys)
    }

    /// Over-approximated range of `v` after eliminating every other variable
    /// over the rationals. `None` when the relaxation is empty or too large.
    pub fn var_range(&self, v: usize) -> Option<VarRange> {
        let mut sys = self.clone();
        if sys.normalize_rational().is_err() {
            return None;
        }
        for other in 0..self.n_vars {
            if other == v || !sys.occurs(other) {
                continue;
            }
            sys = sys.eliminate_rational(other)?;
        }
        let mut lower: Option<Int> = None;
        let mut upper: Option<Int> = None;
        for row in &sys.eqs {
            let a = row.coeff(v);
            if a == 0 {
                if row.constant != 0 {
                    return None;
                }
                continue;
            }
            if row.constant % a != 0 {
                return None;
            }
            let value = -row.constant / a;
            lower = Some(lower.map_or(value, |l: Int| l.max(value)));
            upper = Some(upper.map_or(value, |u: Int| u.min(value)));
        }
        for row in &sys.ineqs {
            let a = row.coeff(v);
            if a > 0 {
                let bound = -Integer::div_floor(&row.constant, &a);
                lower = Some(lower.map_or(bound, |l: Int| l.max(bound)));
            } else if a < 0 {
                let bound = Integer::div_floor(&row.constant, &-a);
                upper = Some(upper.map_or(bound, |u: Int| u.min(bound)));
            } else if row.constant < 0 {
                return None;
            }
        }
        if let (Some(l), Some(u)) = (lower, upper) {
            if l > u {
                return None;
            }
        }
        Some(VarRange { lower, upper })
    }

    /// Fix variable `v` to `value`.
    pub fn fix(&self, v: usize, value: Int) -> System {
        let mut sys = self.clone();
        let mut coeffs = vec![0; self.n_vars];
        coeffs[v] = 1;
        sys.eqs.push(Row::new(coeffs, -value));
        sys
    }

    /// Lexicographically smallest integer point, minimizing variables in
    /// the given `order` first. Every variable in `order` must be bounded
    /// below; variables not listed are free existentials.
    pub fn lexmin(&self, order: &[usize]) -> Option<Vec<Int>> {
        if self.check().is_empty() {
            return None;
        }
        let mut sys = self.clone();
        let mut point = vec![0; self.n_vars];
        let mut steps = 0usize;
        for &v in order {
            let range = sys.var_range(v)?;
            let mut value = range.lower?;
            loop {
                steps += 1;
                if steps > MAX_LEXMIN_STEPS {
                    return None;
                }
                if let Some(u) = range.upper {
                    if value > u {
                        return None;
                    }
                }
                let candidate = sys.fix(v, value);
                if !candidate.check().is_empty() {
                    sys = candidate;
                    break;
                }
                value += 1;
            }
            point[v] = value;
        }
        for row in &self.eqs {
            if is_fully_fixed(row, order) && row.evaluate(&point) != 0 {
                return None;
            }
        }
        for row in &self.ineqs {
            if is_fully_fixed(row, order) && row.evaluate(&point) < 0 {
                return None;
            }
        }
        Some(point)
    }

    /// Lexicographically largest integer point (see [`System::lexmin`]).
    pub fn lexmax(&self, order: &[usize]) -> Option<Vec<Int>> {
        let mut negated = self.clone();
        for row in negated.eqs.iter_mut().chain(negated.ineqs.iter_mut()) {
            for &v in order {
                row.coeffs[v] = -row.coeffs[v];
            }
        }
        let mut point = negated.lexmin(order)?;
        for &v in order {
            point[v] = -point[v];
        }
        Some(point)
    }
}

fn is_fully_fixed(row: &Row, order: &[usize]) -> bool {
    row.coeffs
        .iter()
        .enumerate()
        .all(|(v, &c)| c == 0 || order.contains(&v))
}

fn check_rec(mut sys: System, depth: usize) -> Feasibility {
    let mut rounds = 0usize;
    loop {
        rounds += 1;
        if rounds > MAX_ROWS * 8 {
            return Feasibility::Unknown;
        }
        if sys.normalize_integer().is_err() {
            return Feasibility::Empty;
        }
        if sys.overflowed() {
            return Feasibility::Unknown;
        }
        if !sys.eqs.is_empty() {
            sys.reduce_equality();
            continue;
        }
        if sys.dedup_parallel().is_err() {
            return Feasibility::Empty;
        }
        if !sys.eqs.is_empty() {
            continue;
        }
        if sys.ineqs.is_empty() {
            return Feasibility::NonEmpty;
        }
        if sys.drop_one_sided() {
            continue;
        }
        let (v, exact) = match sys.choose_fm_var() {
            Some(choice) => choice,
            None => return Feasibility::NonEmpty,
        };
        if exact {
            sys = sys.fourier_motzkin(v, false);
            continue;
        }
        if depth >= MAX_DEPTH {
            return Feasibility::Unknown;
        }
        let real = sys.fourier_motzkin(v, false);
        if check_rec(real, depth + 1) == Feasibility::Empty {
            return Feasibility::Empty;
        }
        let dark = sys.fourier_motzkin(v, true);
        if check_rec(dark, depth + 1) == Feasibility::NonEmpty {
            return Feasibility::NonEmpty;
        }
        return splinter(&sys, v, depth);
    }
}

/// Search the strip between the real and the dark shadow.
fn splinter(sys: &System, v: usize, depth: usize) -> Feasibility {
    let max_upper = sys
        .ineqs
        .iter()
        .map(|r| -r.coeff(v))
        .filter(|&b| b > 0)
        .max()
        .unwrap_or(1);
    let mut count = 0usize;
    let mut unknown = false;
    for lower in sys.ineqs.iter().filter(|r| r.coeff(v) > 0) {
        let a = lower.coeff(v);
        let limit = (max_upper * a - a - max_upper) / max_upper;
        if limit < 0 {
            continue;
        }
        for i in 0..=limit {
            count += 1;
            if count > MAX_SPLINTERS {
                return Feasibility::Unknown;
            }
            let mut piece = sys.clone();
            let mut eq = lower.clone();
            eq.constant -= i;
            piece.eqs.push(eq);
            match check_rec(piece, depth + 1) {
                Feasibility::NonEmpty => return Feasibility::NonEmpty,
                Feasibility::Unknown => unknown = true,
                Feasibility::Empty => {}
            }
        }
    }
    if unknown {
        Feasibility::Unknown
    } else {
        Feasibility::Empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(coeffs: &[Int], constant: Int) -> Row {
        Row::new(coeffs.to_vec(), constant)
    }

    #[test]
    fn test_simple_box_is_feasible() {
        let mut sys = System::new(2);
        sys.add_ineq(row(&[1, 0], 0));
        sys.add_ineq(row(&[-1, 0], 10));
        sys.add_ineq(row(&[0, 1], -3));
        sys.add_ineq(row(&[0, -1], 3));
        assert_eq!(sys.check(), Feasibility::NonEmpty);
    }

    #[test]
    fn test_contradictory_bounds() {
        let mut sys = System::new(1);
        sys.add_ineq(row(&[1], -5));
        sys.add_ineq(row(&[-1], 4));
        assert_eq!(sys.check(), Feasibility::Empty);
    }

    #[test]
    fn test_parity_equality_is_empty() {
        // 2x = 2y + 1 has no integer solution
        let mut sys = System::new(2);
        sys.add_eq(row(&[2, -2], -1));
        assert_eq!(sys.check(), Feasibility::Empty);
    }

    #[test]
    fn test_non_unit_equality() {
        // 3x + 5y = 7 with 0 <= x, y <= 10: x = 4, y = -1 is out, x = 9, y = -4 out...
        // 3*4 + 5*(-1) = 7; with y >= 0: 3x = 7 - 5y -> y = 2 gives x = -1; none in box.
        let mut sys = System::new(2);
        sys.add_eq(row(&[3, 5], -7));
        sys.add_ineq(row(&[1, 0], 0));
        sys.add_ineq(row(&[0, 1], 0));
        sys.add_ineq(row(&[-1, 0], 10));
        sys.add_ineq(row(&[0, -1], 10));
        assert_eq!(sys.check(), Feasibility::Empty);
        // 3x + 5y = 8 has x = 1, y = 1
        let mut ok = System::new(2);
        ok.add_eq(row(&[3, 5], -8));
        ok.add_ineq(row(&[1, 0], 0));
        ok.add_ineq(row(&[0, 1], 0));
        assert_eq!(ok.check(), Feasibility::NonEmpty);
    }

    #[test]
    fn test_integer_gap_needs_splinters() {
        // 1 <= 3x - 3y... classic: 2 <= 3x <= 2 + ... choose 3x in [1, 2] => empty over integers
        let mut sys = System::new(1);
        sys.add_ineq(row(&[3], -1));
        sys.add_ineq(row(&[-3], 2));
        assert_eq!(sys.check(), Feasibility::Empty);
        // 27 <= 11x + 13y <= 45, -10 <= 7x - 9y <= 4 is the Omega paper example (feasible: none?)
        let mut omega = System::new(2);
        omega.add_ineq(row(&[11, 13], -27));
        omega.add_ineq(row(&[-11, -13], 45));
        omega.add_ineq(row(&[7, -9], 10));
        omega.add_ineq(row(&[-7, 9], 4));
        assert_eq!(omega.check(), Feasibility::Empty);
    }

    #[test]
    fn test_eliminate_exact_unit() {
        // exists y: x = 2y + 1 and 0 <= y <= 3 cannot be eliminated exactly
        let mut sys = System::new(2);
        sys.add_eq(row(&[1, -2], -1));
        sys.add_ineq(row(&[0, 1], 0));
        sys.add_ineq(row(&[0, -1], 3));
        assert!(sys.eliminate_exact(1).is_none());
        // but x can be eliminated
        let projected = sys.eliminate_exact(0).expect("unit coefficient");
        assert!(projected.eqs.is_empty());
    }

    #[test]
    fn test_eliminate_exact_after_tightening() {
        // 32t - 3 <= 4q <= 32t + 31 tightens to 8t <= q <= 8t + 7
        let mut sys = System::new(2);
        sys.add_ineq(row(&[-32, 4], 3));
        sys.add_ineq(row(&[32, -4], 31));
        sys.add_ineq(row(&[0, 4], 3));
        sys.add_ineq(row(&[0, -4], 127));
        let projected = sys.eliminate_exact(1).expect("unit after tightening");
        // 0 <= t <= 3 remains
        let range = projected.var_range(0).expect("bounded");
        assert_eq!(range.lower, Some(0));
        assert_eq!(range.upper, Some(3));
    }

    #[test]
    fn test_var_range_and_lexmin() {
        // 2 <= x <= 7, x + y = 9, y >= 4  =>  x in [2, 5]
        let mut sys = System::new(2);
        sys.add_ineq(row(&[1, 0], -2));
        sys.add_ineq(row(&[-1, 0], 7));
        sys.add_eq(row(&[1, 1], -9));
        sys.add_ineq(row(&[0, 1], -4));
        let range = sys.var_range(0).expect("bounded");
        assert_eq!(range.lower, Some(2));
        assert_eq!(range.upper, Some(5));
        assert_eq!(sys.lexmin(&[0, 1]), Some(vec![2, 7]));
        assert_eq!(sys.lexmax(&[0, 1]), Some(vec![5, 4]));
    }

    #[test]
    fn test_rational_elimination_keeps_fractional_points() {
        // 1 <= 2l, 2l <= 1: l = 1/2 is a rational solution, so after
        // eliminating l the system is feasible.
        let mut sys = System::new(1);
        sys.add_ineq(row(&[2], -1));
        sys.add_ineq(row(&[-2], 1));
        let projected = sys.eliminate_rational(0).expect("small");
        assert!(projected.ineqs.iter().all(|r| r.constant >= 0));
    }
}
