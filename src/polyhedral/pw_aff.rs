//! Piecewise quasi-affine functions.
//!
//! A [`PwAff`] is a list of pieces, each a basic set (the condition) and an
//! affine expression over the parameters, set dimensions and the piece's own
//! division locals. The pieces of one function have disjoint conditions.

use crate::polyhedral::basic::BasicSet;
use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::map::IntegerMap;
use crate::polyhedral::set::IntegerSet;
use crate::polyhedral::space::Space;
use std::fmt;

/// One piece of a piecewise function.
#[derive(Debug, Clone)]
pub struct PwPiece {
    /// Where this piece applies
    pub domain: BasicSet,
    /// Value over the columns of `domain` (including its locals)
    pub expr: AffineExpr,
}

/// A piecewise quasi-affine function on a set space.
#[derive(Debug, Clone)]
pub struct PwAff {
    /// The domain space
    pub space: Space,
    /// Pieces with pairwise disjoint domains
    pub pieces: Vec<PwPiece>,
}

/// Comparison operators producing sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `>=`
    Ge,
    /// `>`
    Gt,
}

impl PwAff {
    /// The function with a single piece `expr` (over `[params | dims]`) on
    /// the universe of `space`.
    pub fn from_affine(space: Space, expr: AffineExpr) -> Self {
        let expr = expr.resized(space.n_cols());
        Self {
            pieces: vec![PwPiece { domain: BasicSet::universe(space.clone()), expr }],
            space,
        }
    }

    /// A constant function.
    pub fn constant(space: Space, value: i64) -> Self {
        let n = space.n_cols();
        Self::from_affine(space, AffineExpr::constant(value, n))
    }

    /// The value of set dimension `dim`.
    pub fn dim(space: Space, dim: usize) -> Self {
        let n = space.n_cols();
        let col = space.out_offset() + dim;
        Self::from_affine(space, AffineExpr::var(col, n))
    }

    /// The value of parameter `name` (added to the space if missing).
    pub fn param(space: Space, name: &str) -> Self {
        let space = if space.param_index(name).is_some() {
            space
        } else {
            let mut params = space.param_names.clone();
            params.push(name.to_string());
            space.with_param_names(params)
        };
        let n = space.n_cols();
        let col = space.param_index(name).unwrap_or(0);
        Self::from_affine(space, AffineExpr::var(col, n))
    }

    /// A function with no pieces (undefined everywhere).
    pub fn undefined(space: Space) -> Self {
        Self { space, pieces: Vec::new() }
    }

    /// Number of pieces.
    pub fn n_piece(&self) -> usize {
        self.pieces.len()
    }

    /// The constant value if every piece is the same constant.
    pub fn as_constant(&self) -> Option<i64> {
        let first = self.pieces.first()?.expr.as_constant()?;
        if self.pieces.iter().all(|p| p.expr.as_constant() == Some(first)) {
            Some(first)
        } else {
            None
        }
    }

    /// The single affine expression (over `[params | dims]`) when the
    /// function has one piece on the universe without divisions.
    pub fn as_affine(&self) -> Option<AffineExpr> {
        if self.pieces.len() != 1 {
            return None;
        }
        let piece = &self.pieces[0];
        if !piece.domain.locals.is_empty() || !piece.domain.is_universe() {
            return None;
        }
        Some(piece.expr.resized(self.space.n_cols()))
    }

    /// Align to a parameter list. Current parameters missing from `params`
    /// are kept after them.
    pub fn align_params(&self, params: &[String]) -> PwAff {
        if self.space.param_names == params {
            return self.clone();
        }
        let Some(map) = self.space.column_map_to_params(params) else {
            return self.align_params(&self.space.params_covering(params));
        };
        let space = self.space.clone().with_param_names(params.to_vec());
        let n_new = space.n_cols();
        let pieces = self
            .pieces
            .iter()
            .map(|p| {
                let old_space = p.domain.n_space();
                let full: Vec<usize> = (0..p.domain.n_total())
                    .map(|i| if i < old_space { map[i] } else { n_new + (i - old_space) })
                    .collect();
                PwPiece {
                    domain: p.domain.remap_space(space.clone(), &map),
                    expr: p.expr.remap(&full, n_new + p.domain.locals.len()),
                }
            })
            .collect();
        PwAff { space, pieces }
    }

    fn align_pair(a: &PwAff, b: &PwAff) -> (PwAff, PwAff) {
        let params = a.space.merged_params(&b.space);
        (a.align_params(&params), b.align_params(&params))
    }

    /// Combine two functions piece by piece on the intersection of their
    /// domains. The closure receives the joint domain and both expressions
    /// over its columns, and returns the resulting pieces.
    fn combine<F>(a: &PwAff, b: &PwAff, mut f: F) -> PwAff
    where
        F: FnMut(&BasicSet, &AffineExpr, &AffineExpr) -> Vec<PwPiece>,
    {
        let (a, b) = Self::align_pair(a, b);
        let mut pieces = Vec::new();
        for pa in &a.pieces {
            for pb in &b.pieces {
                let joint = pa.domain.intersect(&pb.domain);
                if joint.is_empty() {
                    continue;
                }
                let n = joint.n_total();
                let n_space = pa.domain.n_space();
                let base = pa.domain.n_total();
                let map: Vec<usize> = (0..pb.domain.n_total())
                    .map(|i| if i < n_space { i } else { base + (i - n_space) })
                    .collect();
                let ea = pa.expr.resized(n);
                let eb = pb.expr.remap(&map, n);
                pieces.extend(f(&joint, &ea, &eb));
            }
        }
        PwAff { space: a.space, pieces }
    }

    /// Sum.
    pub fn add(&self, other: &PwAff) -> PwAff {
        Self::combine(self, other, |d, a, b| {
            vec![PwPiece { domain: d.clone(), expr: a.clone() + b.clone() }]
        })
    }

    /// Difference.
    pub fn sub(&self, other: &PwAff) -> PwAff {
        self.add(&other.neg())
    }

    /// Negation.
    pub fn neg(&self) -> PwAff {
        self.scale(-1)
    }

    /// Multiplication by a constant.
    pub fn scale(&self, factor: i64) -> PwAff {
        PwAff {
            space: self.space.clone(),
            pieces: self
                .pieces
                .iter()
                .map(|p| PwPiece { domain: p.domain.clone(), expr: p.expr.scale(factor) })
                .collect(),
        }
    }

    /// Add a constant.
    pub fn add_constant(&self, value: i64) -> PwAff {
        PwAff {
            space: self.space.clone(),
            pieces: self
                .pieces
                .iter()
                .map(|p| PwPiece { domain: p.domain.clone(), expr: p.expr.add_constant(value) })
                .collect(),
        }
    }

    /// Product, defined only when one side is constant on every piece.
    pub fn mul(&self, other: &PwAff) -> Option<PwAff> {
        let const_a = self.pieces.iter().all(|p| p.expr.is_constant());
        let const_b = other.pieces.iter().all(|p| p.expr.is_constant());
        if !const_a && !const_b {
            return None;
        }
        Some(Self::combine(self, other, |d, a, b| {
            let expr = if a.is_constant() { b.scale(a.constant) } else { a.scale(b.constant) };
            vec![PwPiece { domain: d.clone(), expr }]
        }))
    }

    /// Pointwise minimum.
    pub fn min(&self, other: &PwAff) -> PwAff {
        self.select_by(other, true)
    }

    /// Pointwise maximum.
    pub fn max(&self, other: &PwAff) -> PwAff {
        self.select_by(other, false)
    }

    fn select_by(&self, other: &PwAff, take_min: bool) -> PwAff {
        Self::combine(self, other, |d, a, b| {
            // first piece keeps `a` where it wins (ties go to `a`)
            let wins = if take_min {
                Constraint::le(a.clone(), b.clone())
            } else {
                Constraint::ge(a.clone(), b.clone())
            };
            let mut da = d.clone();
            da.add_constraint(wins.clone());
            let mut db = d.clone();
            db.add_constraint(wins.negate());
            let mut out = Vec::new();
            if !da.is_empty() {
                out.push(PwPiece { domain: da, expr: a.clone() });
            }
            if !db.is_empty() {
                out.push(PwPiece { domain: db, expr: b.clone() });
            }
            out
        })
    }

    /// `floor(self / d)` for a non-zero constant `d`.
    pub fn floor_div(&self, d: i64) -> PwAff {
        if d == 1 {
            return self.clone();
        }
        let (num_sign, den) = if d < 0 { (-1, -d) } else { (1, d) };
        PwAff {
            space: self.space.clone(),
            pieces: self
                .pieces
                .iter()
                .map(|p| {
                    let mut domain = p.domain.clone();
                    let col = domain.add_div(p.expr.scale(num_sign), den);
                    let n = domain.n_total();
                    PwPiece { domain, expr: AffineExpr::var(col, n) }
                })
                .collect(),
        }
    }

    /// `self mod d` (non-negative remainder) for a positive constant `d`.
    pub fn modulo(&self, d: i64) -> PwAff {
        let d = d.abs();
        PwAff {
            space: self.space.clone(),
            pieces: self
                .pieces
                .iter()
                .map(|p| {
                    let mut domain = p.domain.clone();
                    let col = domain.add_div(p.expr.clone(), d);
                    let n = domain.n_total();
                    let expr = p.expr.resized(n) - AffineExpr::var(col, n).scale(d);
                    PwPiece { domain, expr }
                })
                .collect(),
        }
    }

    /// Quotient rounded toward zero, for a positive constant `d`.
    pub fn tdiv_q(&self, d: i64) -> PwAff {
        let d = d.abs();
        let mut pieces = Vec::new();
        for p in &self.pieces {
            // e >= 0: floor(e/d)
            let mut pos = p.domain.clone();
            pos.add_constraint(Constraint::ge_zero(p.expr.clone()));
            if !pos.is_empty() {
                let col = pos.add_div(p.expr.clone(), d);
                let n = pos.n_total();
                pieces.push(PwPiece { domain: pos, expr: AffineExpr::var(col, n) });
            }
            // e < 0: -floor(-e/d)
            let mut neg = p.domain.clone();
            neg.add_constraint(Constraint::ge_zero(p.expr.clone()).negate());
            if !neg.is_empty() {
                let col = neg.add_div(-p.expr.clone(), d);
                let n = neg.n_total();
                pieces.push(PwPiece { domain: neg, expr: -AffineExpr::var(col, n) });
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Remainder with the sign of the dividend, for a positive constant `d`.
    pub fn tdiv_r(&self, d: i64) -> PwAff {
        self.sub(&self.tdiv_q(d).scale(d.abs()))
    }

    /// The set where `self op other`.
    pub fn cmp_set(&self, other: &PwAff, op: CmpOp) -> IntegerSet {
        let (a, b) = Self::align_pair(self, other);
        let mut result = IntegerSet::empty(a.space.clone());
        for pa in &a.pieces {
            for pb in &b.pieces {
                let joint = pa.domain.intersect(&pb.domain);
                let n = joint.n_total();
                let n_space = pa.domain.n_space();
                let base = pa.domain.n_total();
                let map: Vec<usize> = (0..pb.domain.n_total())
                    .map(|i| if i < n_space { i } else { base + (i - n_space) })
                    .collect();
                let ea = pa.expr.resized(n);
                let eb = pb.expr.remap(&map, n);
                let constraints: Vec<Vec<Constraint>> = match op {
                    CmpOp::Lt => vec![vec![Constraint::lt(ea, eb)]],
                    CmpOp::Le => vec![vec![Constraint::le(ea, eb)]],
                    CmpOp::Eq => vec![vec![Constraint::eq(ea, eb)]],
                    CmpOp::Ge => vec![vec![Constraint::ge(ea, eb)]],
                    CmpOp::Gt => vec![vec![Constraint::lt(eb, ea)]],
                    CmpOp::Ne => vec![
                        vec![Constraint::lt(ea.clone(), eb.clone())],
                        vec![Constraint::lt(eb, ea)],
                    ],
                };
                for conj in constraints {
                    let mut piece = joint.clone();
                    for c in conj {
                        piece.add_constraint(c);
                    }
                    if !piece.is_empty() {
                        result.pieces.push(piece);
                    }
                }
            }
        }
        result
    }

    /// `self < other`.
    pub fn lt_set(&self, other: &PwAff) -> IntegerSet {
        self.cmp_set(other, CmpOp::Lt)
    }

    /// `self <= other`.
    pub fn le_set(&self, other: &PwAff) -> IntegerSet {
        self.cmp_set(other, CmpOp::Le)
    }

    /// `self = other`.
    pub fn eq_set(&self, other: &PwAff) -> IntegerSet {
        self.cmp_set(other, CmpOp::Eq)
    }

    /// `self != other`.
    pub fn ne_set(&self, other: &PwAff) -> IntegerSet {
        self.cmp_set(other, CmpOp::Ne)
    }

    /// `self >= other`.
    pub fn ge_set(&self, other: &PwAff) -> IntegerSet {
        self.cmp_set(other, CmpOp::Ge)
    }

    /// `self > other`.
    pub fn gt_set(&self, other: &PwAff) -> IntegerSet {
        self.cmp_set(other, CmpOp::Gt)
    }

    /// The set where the function is defined.
    pub fn domain(&self) -> IntegerSet {
        IntegerSet { space: self.space.clone(), pieces: self.pieces.iter().map(|p| p.domain.clone()).collect() }
    }

    /// Restrict the function to a set over its domain space.
    pub fn intersect_domain(&self, set: &IntegerSet) -> PwAff {
        let params = self.space.merged_params(&set.space);
        let this = self.align_params(&params);
        let set = set.align_params(&params);
        let mut pieces = Vec::new();
        for p in &this.pieces {
            for s in &set.pieces {
                let domain = p.domain.intersect(s);
                if domain.is_empty() {
                    continue;
                }
                let n = domain.n_total();
                pieces.push(PwPiece { domain, expr: p.expr.resized(n) });
            }
        }
        PwAff { space: this.space, pieces }
    }

    /// The set of points where evaluating the function in `bits`-bit signed
    /// arithmetic would leave the representable range.
    pub fn out_of_range_set(&self, bits: u32) -> IntegerSet {
        let mut result = IntegerSet::empty(self.space.clone());
        if bits == 0 || bits > 64 {
            return result;
        }
        for p in &self.pieces {
            let (below, above) = if bits == 64 {
                halved_range_violations(&p.domain, &p.expr)
            } else {
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << (bits - 1)) - 1;
                let mut below = p.domain.clone();
                below.add_constraint(Constraint::lt(p.expr.clone(), AffineExpr::constant(min, 0)));
                let mut above = p.domain.clone();
                above.add_constraint(Constraint::lt(AffineExpr::constant(max, 0), p.expr.clone()));
                (below, above)
            };
            result.pieces.extend([below, above].into_iter().filter(|b| !b.is_empty()));
        }
        result
    }

    /// The graph `{ [x] -> [f(x)] }` in the map space `domain -> range` (arity 1).
    pub fn to_map(&self, range: Space) -> IntegerMap {
        Self::list_to_map(&self.space, range, std::slice::from_ref(self))
            .unwrap_or_else(|| IntegerMap::empty(Space::map_from(&self.space, &Space::set(1))))
    }

    /// The map `{ x -> [f0(x), f1(x), ...] }` built from one function per
    /// output dimension, or `None` when the piece product exceeds `limit`.
    pub fn list_to_map(domain: &Space, range: Space, funcs: &[PwAff]) -> Option<IntegerMap> {
        const LIMIT: usize = 4096;
        let mut params = domain.param_names.clone();
        for f in funcs {
            for name in &f.space.param_names {
                if !params.contains(name) {
                    params.push(name.clone());
                }
            }
        }
        let funcs: Vec<PwAff> = funcs.iter().map(|f| f.align_params(&params)).collect();
        let dom_space = domain.clone().with_param_names(params.clone());
        let map_space = Space::map_from(&dom_space, &range).with_param_names(params.clone());
        let np = params.len();
        let n_in = dom_space.n_dim;
        let n_out = funcs.len();
        let dom_map: Vec<usize> = (0..dom_space.n_cols()).collect();
        // partial products over the map space, one output fixed per round
        let mut partial: Vec<BasicSet> = vec![BasicSet::universe(map_space.clone())];
        for (k, f) in funcs.iter().enumerate() {
            let mut next = Vec::new();
            for base in &partial {
                for p in &f.pieces {
                    let lifted = p.domain.remap_space(map_space.clone(), &dom_map);
                    let offset = base.n_total();
                    let mut joint = base.intersect(&lifted);
                    let n = joint.n_total();
                    let full: Vec<usize> = (0..p.domain.n_total())
                        .map(|i| if i < dom_space.n_cols() { i } else { offset + (i - dom_space.n_cols()) })
                        .collect();
                    let value = p.expr.remap(&full, n);
                    joint.add_eq(value - AffineExpr::var(np + n_in + k, n));
                    if !joint.is_empty() {
                        next.push(joint);
                    }
                    if next.len() > LIMIT {
                        return None;
                    }
                }
            }
            partial = next;
        }
        debug_assert_eq!(map_space.n_dim, n_out);
        Some(IntegerMap::from_set_repr(IntegerSet { space: map_space, pieces: partial }))
    }
}

impl fmt::Display for PwAff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.to_map(Space::set(1));
        write!(f, "{}", map)
    }
}

/// `expr < -2^63` and `expr > 2^63 - 1` on `domain`. Neither bound fits an
/// `i64` constant, so both are stated on `q = floor(expr / 2)`:
/// `q < -2^62` and `q >= 2^62`.
fn halved_range_violations(domain: &BasicSet, expr: &AffineExpr) -> (BasicSet, BasicSet) {
    let half = 1i64 << 62;
    let restrict = |lower: bool| {
        let mut b = domain.clone();
        let q = b.add_div(expr.clone(), 2);
        let n = b.n_total();
        let c = if lower {
            Constraint::lt(AffineExpr::var(q, n), AffineExpr::constant(-half, n))
        } else {
            Constraint::lower_bound(q, half, n)
        };
        b.add_constraint(c);
        b
    };
    (restrict(true), restrict(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Space {
        Space::set(1).with_param_names(vec!["N".into()])
    }

    #[test]
    fn test_add_and_scale() {
        let i = PwAff::dim(space(), 0);
        let n = PwAff::param(space(), "N");
        let f = i.scale(2).add(&n).add_constant(1);
        let e = f.as_affine().map(|e| e.coeffs);
        assert_eq!(e, Some(vec![1, 2]));
    }

    #[test]
    fn test_mul_requires_constant_side() {
        let i = PwAff::dim(space(), 0);
        let n = PwAff::param(space(), "N");
        assert!(i.mul(&n).is_none());
        let three = PwAff::constant(space(), 3);
        assert!(i.mul(&three).is_some());
    }

    #[test]
    fn test_min_splits_domain() {
        let i = PwAff::dim(space(), 0);
        let n = PwAff::param(space(), "N");
        let m = i.min(&n);
        assert_eq!(m.n_piece(), 2);
        // i <= N holds at (N=5, i=3)
        let le = i.le_set(&n);
        assert!(le.contains(&[5, 3]));
        assert!(!le.contains(&[5, 6]));
    }

    #[test]
    fn test_floor_div_and_mod() {
        let i = PwAff::dim(Space::set(1), 0);
        let q = i.floor_div(4);
        let m = i.modulo(4);
        let map_q = q.to_map(Space::set(1));
        let map_m = m.to_map(Space::set(1));
        assert!(map_q.contains(&[-1, -1]));
        assert!(map_q.contains(&[9, 2]));
        assert!(map_m.contains(&[-1, 3]));
        assert!(map_m.contains(&[9, 1]));
    }

    #[test]
    fn test_tdiv_rounds_toward_zero() {
        let i = PwAff::dim(Space::set(1), 0);
        let q = i.tdiv_q(4).to_map(Space::set(1));
        assert!(q.contains(&[-5, -1]));
        assert!(q.contains(&[5, 1]));
        let r = i.tdiv_r(4).to_map(Space::set(1));
        assert!(r.contains(&[-5, -1]));
    }

    #[test]
    fn test_out_of_range_set() {
        let i = PwAff::dim(Space::set(1), 0);
        let f = i.scale(4);
        let wrap = f.out_of_range_set(8);
        assert!(wrap.contains(&[32]));
        assert!(!wrap.contains(&[31]));
        assert!(wrap.contains(&[-33]));
        assert!(!wrap.contains(&[-32]));
    }

    #[test]
    fn test_out_of_range_set_of_64_bit_values() {
        let f = PwAff::dim(Space::set(1), 0).scale(4);
        let wrap = f.out_of_range_set(64);
        assert!(!wrap.is_empty());
        let fits = IntegerSet::rectangular(&[(-(1i64 << 61), (1i64 << 61) - 1)]);
        assert!(wrap.intersect(&fits).is_empty());
        let top = IntegerSet::rectangular(&[(1i64 << 61, 1i64 << 61)]);
        assert!(!wrap.intersect(&top).is_empty());
        let bottom = IntegerSet::rectangular(&[(-(1i64 << 61) - 1, -(1i64 << 61) - 1)]);
        assert!(!wrap.intersect(&bottom).is_empty());
        assert!(f.out_of_range_set(128).is_empty());
    }
}
