//! Integer relations for schedules, access relations and dependences.
//!
//! An [`IntegerMap`] is a union of basic sets over a map space
//! `[params] -> { In[...] -> Out[...] }`.

use crate::polyhedral::basic::BasicSet;
use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::set::{fmt_body, fmt_empty_body, IntegerSet};
use crate::polyhedral::space::{Space, SpaceKind};
use std::fmt;

/// A relation between two integer tuples.
#[derive(Debug, Clone)]
pub struct IntegerMap {
    rel: IntegerSet,
}

impl IntegerMap {
    /// Wrap a union of basic sets over a map space.
    pub fn from_set_repr(rel: IntegerSet) -> Self {
        debug_assert!(rel.space.is_map());
        Self { rel }
    }

    /// The underlying union of basic sets.
    pub fn as_set_repr(&self) -> &IntegerSet {
        &self.rel
    }

    /// The empty relation.
    pub fn empty(space: Space) -> Self {
        Self { rel: IntegerSet::empty(space) }
    }

    /// The universal relation.
    pub fn universe(space: Space) -> Self {
        Self { rel: IntegerSet::universe(space) }
    }

    /// A relation with a single basic set.
    pub fn from_basic(basic: BasicSet) -> Self {
        Self { rel: IntegerSet::from_basic(basic) }
    }

    /// The function `in -> [outputs]`, with each output an affine expression
    /// over `[params | in]` columns of `space`.
    pub fn from_affine(space: Space, outputs: &[AffineExpr]) -> Self {
        debug_assert_eq!(outputs.len(), space.n_dim);
        let n = space.n_cols();
        let mut basic = BasicSet::universe(space.clone());
        let out = space.out_offset();
        for (k, e) in outputs.iter().enumerate() {
            basic.add_eq(e.resized(n) - AffineExpr::var(out + k, n));
        }
        Self::from_basic(basic)
    }

    /// The identity relation on a set space.
    pub fn identity(set_space: &Space) -> Self {
        let space = set_space.identity_map();
        let np = space.n_param();
        let outputs: Vec<AffineExpr> = (0..space.n_in).map(|k| AffineExpr::var(np + k, space.n_cols())).collect();
        Self::from_affine(space, &outputs)
    }

    /// `{ a -> b : a ≺ b }` (strict lexicographic order) on a set space.
    pub fn lex_lt(set_space: &Space) -> Self {
        Self::lex_order(set_space, set_space.n_dim, true)
    }

    /// `{ a -> b : a ≼ b }` on a set space.
    pub fn lex_le(set_space: &Space) -> Self {
        Self::lex_order(set_space, set_space.n_dim, false)
    }

    /// `{ a -> b : a ≻ b }` on a set space.
    pub fn lex_gt(set_space: &Space) -> Self {
        Self::lex_lt(set_space).reverse()
    }

    /// Lexicographic order between two tuples compared on their first `depth` dimensions.
    pub fn lex_order(set_space: &Space, depth: usize, strict: bool) -> Self {
        let space = set_space.identity_map();
        Self::lex_order_between(space, depth, strict)
    }

    /// Lexicographic order on the first `depth` dimensions of the input and
    /// output tuples of `space`.
    pub fn lex_order_between(space: Space, depth: usize, strict: bool) -> Self {
        let n = space.n_cols();
        let i0 = space.in_offset();
        let o0 = space.out_offset();
        let mut pieces = Vec::new();
        for k in 0..depth {
            let mut b = BasicSet::universe(space.clone());
            for j in 0..k {
                b.add_eq(AffineExpr::var(o0 + j, n) - AffineExpr::var(i0 + j, n));
            }
            b.add_constraint(Constraint::lt(AffineExpr::var(i0 + k, n), AffineExpr::var(o0 + k, n)));
            pieces.push(b);
        }
        if !strict {
            let mut b = BasicSet::universe(space.clone());
            for j in 0..depth {
                b.add_eq(AffineExpr::var(o0 + j, n) - AffineExpr::var(i0 + j, n));
            }
            pieces.push(b);
        }
        Self { rel: IntegerSet { space, pieces } }
    }

    /// The relation `domain × range`.
    pub fn from_domain_and_range(domain: &IntegerSet, range: &IntegerSet) -> Self {
        let params = domain.space.merged_params(&range.space);
        let d = domain.align_params(&params);
        let r = range.align_params(&params);
        let space = Space::map_from(&d.space, &r.space).with_param_names(params.clone());
        let np = params.len();
        let n_in = d.dim();
        let dmap: Vec<usize> = (0..d.space.n_cols()).collect();
        let rmap: Vec<usize> = (0..r.space.n_cols()).map(|c| if c < np { c } else { c + n_in }).collect();
        let mut pieces = Vec::new();
        for pd in &d.pieces {
            let ld = pd.remap_space(space.clone(), &dmap);
            for pr in &r.pieces {
                let lr = pr.remap_space(space.clone(), &rmap);
                let mut p = ld.intersect(&lr);
                p.simplify();
                pieces.push(p);
            }
        }
        Self { rel: IntegerSet { space, pieces } }
    }

    /// The space.
    pub fn space(&self) -> &Space {
        &self.rel.space
    }

    /// The basic sets.
    pub fn pieces(&self) -> &[BasicSet] {
        &self.rel.pieces
    }

    /// Number of input dimensions.
    pub fn n_in(&self) -> usize {
        self.rel.space.n_in
    }

    /// Number of output dimensions.
    pub fn n_out(&self) -> usize {
        self.rel.space.n_dim
    }

    /// Name of the input tuple.
    pub fn in_name(&self) -> Option<&str> {
        self.rel.space.in_name.as_deref()
    }

    /// Name of the output tuple.
    pub fn out_name(&self) -> Option<&str> {
        self.rel.space.out_name.as_deref()
    }

    /// Rename the input tuple.
    pub fn set_in_name(self, name: Option<String>) -> Self {
        let space = self.rel.space.clone().with_in_name(name);
        Self { rel: self.rel.with_space(space) }
    }

    /// Rename the output tuple.
    pub fn set_out_name(self, name: Option<String>) -> Self {
        let space = self.rel.space.clone().with_out_name(name);
        Self { rel: self.rel.with_space(space) }
    }

    /// Add a constraint over the space columns.
    pub fn with_constraint(self, c: Constraint) -> Self {
        Self { rel: self.rel.with_constraint(c) }
    }

    /// Align to a parameter list.
    pub fn align_params(&self, params: &[String]) -> Self {
        Self { rel: self.rel.align_params(params) }
    }

    /// Whether the relation is empty.
    pub fn is_empty(&self) -> bool {
        self.rel.is_empty()
    }

    /// Whether a pair (params, input, output values) is in the relation.
    pub fn contains(&self, point: &[i64]) -> bool {
        self.rel.contains(point)
    }

    /// Intersection.
    pub fn intersect(&self, other: &IntegerMap) -> Self {
        Self { rel: self.rel.intersect(&other.rel) }
    }

    /// Union.
    pub fn union(&self, other: &IntegerMap) -> Self {
        Self { rel: self.rel.union(&other.rel) }
    }

    /// Difference (see [`IntegerSet::subtract_checked`]).
    pub fn subtract_checked(&self, other: &IntegerMap) -> (Self, bool) {
        let (rel, exact) = self.rel.subtract_checked(&other.rel);
        (Self { rel }, exact)
    }

    /// Difference.
    pub fn subtract(&self, other: &IntegerMap) -> Self {
        self.subtract_checked(other).0
    }

    /// Whether `self` is contained in `other`.
    pub fn is_subset(&self, other: &IntegerMap) -> bool {
        self.rel.is_subset(&other.rel)
    }

    /// Whether both relations contain the same pairs.
    pub fn is_equal(&self, other: &IntegerMap) -> bool {
        self.rel.is_equal(&other.rel)
    }

    /// Coalesce.
    pub fn coalesce(&self) -> Self {
        Self { rel: self.rel.coalesce() }
    }

    /// Simplify assuming `context` (a relation in the same space).
    pub fn gist(&self, context: &IntegerMap) -> Self {
        Self { rel: self.rel.gist(&context.rel) }
    }

    /// Simplify assuming `domain` holds for the input tuple.
    pub fn gist_domain(&self, domain: &IntegerSet) -> Self {
        let ctx = Self::from_domain_and_range(domain, &IntegerSet::universe(self.space().range()));
        self.gist(&ctx)
    }

    /// Simplify assuming the parameter set `context` holds.
    pub fn gist_params(&self, context: &IntegerSet) -> Self {
        Self { rel: self.rel.gist_params(context) }
    }

    /// Intersect with a parameter set.
    pub fn intersect_params(&self, params: &IntegerSet) -> Self {
        Self { rel: self.rel.intersect_params(params) }
    }

    /// Swap input and output tuples.
    pub fn reverse(&self) -> Self {
        let space = self.rel.space.reverse();
        let np = space.n_param();
        let n_in = self.n_in();
        let n_out = self.n_out();
        let map: Vec<usize> = (0..self.rel.space.n_cols())
            .map(|c| {
                if c < np {
                    c
                } else if c < np + n_in {
                    c + n_out
                } else {
                    c - n_in
                }
            })
            .collect();
        Self {
            rel: IntegerSet {
                pieces: self.rel.pieces.iter().map(|p| p.remap_space(space.clone(), &map)).collect(),
                space,
            },
        }
    }

    /// The set of input tuples related to something.
    pub fn domain(&self) -> IntegerSet {
        let space = self.rel.space.domain();
        self.rel.project_cols(self.rel.space.out_offset(), self.n_out(), space)
    }

    /// The set of output tuples related to something.
    pub fn range(&self) -> IntegerSet {
        let space = self.rel.space.range();
        self.rel.project_cols(self.rel.space.in_offset(), self.n_in(), space)
    }

    /// The parameter values for which the relation is non-empty.
    pub fn params(&self) -> IntegerSet {
        self.rel.params()
    }

    /// Embed a set over the input tuple into the relation space.
    fn lift_domain(&self, set: &IntegerSet) -> IntegerSet {
        let space = self.rel.space.clone();
        let map: Vec<usize> = (0..set.space.n_cols()).collect();
        IntegerSet {
            pieces: set.pieces.iter().map(|p| p.remap_space(space.clone(), &map)).collect(),
            space,
        }
    }

    /// Embed a set over the output tuple into the relation space.
    fn lift_range(&self, set: &IntegerSet) -> IntegerSet {
        let space = self.rel.space.clone();
        let np = space.n_param();
        let n_in = self.n_in();
        let map: Vec<usize> = (0..set.space.n_cols()).map(|c| if c < np { c } else { c + n_in }).collect();
        IntegerSet {
            pieces: set.pieces.iter().map(|p| p.remap_space(space.clone(), &map)).collect(),
            space,
        }
    }

    /// Restrict the input tuple to `set`.
    pub fn intersect_domain(&self, set: &IntegerSet) -> Self {
        let params = self.rel.space.merged_params(&set.space);
        let this = self.align_params(&params);
        let set = set.align_params(&params);
        let lifted = this.lift_domain(&set);
        Self { rel: this.rel.intersect(&lifted) }
    }

    /// Restrict the output tuple to `set`.
    pub fn intersect_range(&self, set: &IntegerSet) -> Self {
        let params = self.rel.space.merged_params(&set.space);
        let this = self.align_params(&params);
        let set = set.align_params(&params);
        let lifted = this.lift_range(&set);
        Self { rel: this.rel.intersect(&lifted) }
    }

    /// Remove the pairs whose input lies in `set`.
    pub fn subtract_domain(&self, set: &IntegerSet) -> Self {
        let params = self.rel.space.merged_params(&set.space);
        let this = self.align_params(&params);
        let set = set.align_params(&params);
        let lifted = this.lift_domain(&set);
        Self { rel: this.rel.subtract(&lifted) }
    }

    /// Composition: `{ x -> z : exists y : x -> y in self and y -> z in other }`.
    pub fn apply_range(&self, other: &IntegerMap) -> Self {
        let params = self.rel.space.merged_params(&other.rel.space);
        let a = self.align_params(&params);
        let b = other.align_params(&params);
        let np = params.len();
        let n_x = a.n_in();
        let n_y = a.n_out();
        let n_z = b.n_out();
        // work space [params | x | y z], then project y out
        let big = Space::map(n_x, n_y + n_z).with_param_names(params.clone());
        let amap: Vec<usize> = (0..a.rel.space.n_cols()).collect();
        let bmap: Vec<usize> = (0..b.rel.space.n_cols())
            .map(|c| if c < np { c } else { c + n_x })
            .collect();
        let target = Space::map(n_x, n_z)
            .with_param_names(params)
            .with_in_name(a.rel.space.in_name.clone())
            .with_out_name(b.rel.space.out_name.clone());
        let mut pieces = Vec::new();
        for pa in &a.rel.pieces {
            let la = pa.remap_space(big.clone(), &amap);
            for pb in &b.rel.pieces {
                let lb = pb.remap_space(big.clone(), &bmap);
                let mut joined = la.intersect(&lb);
                joined.simplify();
                if joined.is_empty() {
                    continue;
                }
                let projected = joined.project_out(np + n_x, n_y, target.clone());
                if !projected.is_obviously_empty() {
                    pieces.push(projected);
                }
            }
        }
        Self { rel: IntegerSet { space: target, pieces } }
    }

    /// `other ∘ self⁻¹` on inputs: `{ y -> z : exists x : x -> y in self^-1 ... }`,
    /// i.e. apply `other` to the input tuple.
    pub fn apply_domain(&self, other: &IntegerMap) -> Self {
        self.reverse().apply_range(other).reverse()
    }

    /// The image of a set under this relation.
    pub fn apply_set(&self, set: &IntegerSet) -> IntegerSet {
        self.intersect_domain(set).range()
    }

    /// Differences `out - in` for relations with equal arities.
    pub fn deltas(&self) -> IntegerSet {
        let np = self.rel.space.n_param();
        let n = self.n_in().min(self.n_out());
        let n_in = self.n_in();
        let n_out = self.n_out();
        let work = Space::set(n_in + n_out + n).with_param_names(self.rel.space.param_names.clone());
        let map: Vec<usize> = (0..self.rel.space.n_cols()).collect();
        let result_space = Space::set(n).with_param_names(self.rel.space.param_names.clone());
        let mut pieces = Vec::new();
        for p in &self.rel.pieces {
            let mut w = p.remap_space(work.clone(), &map);
            let total = w.n_total();
            for k in 0..n {
                let d = AffineExpr::var(np + n_in + n_out + k, total);
                let diff = AffineExpr::var(np + n_in + k, total) - AffineExpr::var(np + k, total);
                w.add_eq(diff - d);
            }
            w.simplify();
            if w.is_empty() {
                continue;
            }
            pieces.push(w.project_out(np, n_in + n_out, result_space.clone()));
        }
        IntegerSet { space: result_space, pieces }
    }

    /// Fix an input dimension.
    pub fn fix_in(&self, dim: usize, value: i64) -> Self {
        let col = self.rel.space.in_offset() + dim;
        let n = self.rel.space.n_cols();
        self.clone().with_constraint(Constraint::eq_zero(AffineExpr::var(col, n).add_constant(-value)))
    }

    /// Fix an output dimension.
    pub fn fix_out(&self, dim: usize, value: i64) -> Self {
        let col = self.rel.space.out_offset() + dim;
        let n = self.rel.space.n_cols();
        self.clone().with_constraint(Constraint::eq_zero(AffineExpr::var(col, n).add_constant(-value)))
    }

    /// Require input dimension `i` to equal output dimension `o`.
    pub fn equate(&self, i: usize, o: usize) -> Self {
        let n = self.rel.space.n_cols();
        let a = AffineExpr::var(self.rel.space.in_offset() + i, n);
        let b = AffineExpr::var(self.rel.space.out_offset() + o, n);
        self.clone().with_constraint(Constraint::eq(a, b))
    }

    /// Project out `n` output dimensions starting at `first`.
    pub fn project_out_out(&self, first: usize, n: usize) -> Self {
        let mut space = self.rel.space.clone();
        space.n_dim -= n;
        space.dim_names.clear();
        Self { rel: self.rel.project_cols(self.rel.space.out_offset() + first, n, space) }
    }

    /// Project out `n` input dimensions starting at `first`.
    pub fn project_out_in(&self, first: usize, n: usize) -> Self {
        let mut space = self.rel.space.clone();
        space.n_in -= n;
        space.dim_names.clear();
        Self { rel: self.rel.project_cols(self.rel.space.in_offset() + first, n, space) }
    }

    /// Append `n` unconstrained output dimensions.
    pub fn add_out_dims(&self, n: usize) -> Self {
        let mut space = self.rel.space.clone();
        space.n_dim += n;
        space.dim_names.clear();
        let map: Vec<usize> = (0..self.rel.space.n_cols()).collect();
        Self {
            rel: IntegerSet {
                pieces: self.rel.pieces.iter().map(|p| p.remap_space(space.clone(), &map)).collect(),
                space,
            },
        }
    }

    /// The relation as a set over the concatenated tuple `[in, out]`.
    pub fn wrap(&self) -> IntegerSet {
        let mut space = self.rel.space.clone();
        space.kind = SpaceKind::Set;
        space.n_dim += space.n_in;
        space.n_in = 0;
        space.in_name = None;
        space.dim_names.clear();
        let map: Vec<usize> = (0..self.rel.space.n_cols()).collect();
        IntegerSet {
            pieces: self.rel.pieces.iter().map(|p| p.remap_space(space.clone(), &map)).collect(),
            space,
        }
    }

    /// Whether every input is related to at most one output.
    pub fn is_single_valued(&self) -> bool {
        // self^-1 . self must be contained in the identity on the range
        let composed = self.reverse().apply_range(self);
        let identity = IntegerMap::identity(&self.space().range()).align_params(&composed.space().param_names);
        composed.is_subset(&identity)
    }

    /// Exact bounds `(min, max)` of output dimension `k`, when bounded.
    pub fn out_extrema(&self, k: usize) -> (Option<i64>, Option<i64>) {
        self.rel.col_extrema(self.rel.space.out_offset() + k)
    }

    /// Enumerate the pairs of a bounded relation.
    pub fn points(&self, limit: usize) -> Option<Vec<Vec<i64>>> {
        self.rel.points(limit)
    }
}

impl fmt::Display for IntegerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let space = &self.rel.space;
        if !space.param_names.is_empty() {
            write!(f, "[{}] -> ", space.param_names.join(", "))?;
        }
        let body = fmt_body(space, &self.rel.pieces);
        if body.is_empty() {
            write!(f, "{{ {} }}", fmt_empty_body(space))
        } else {
            write!(f, "{{ {} }}", body.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shift(n: i64) -> IntegerMap {
        // { [i] -> [i + n] : 0 <= i <= 9 }
        let space = Space::map(1, 1);
        let m = IntegerMap::from_affine(space, &[AffineExpr::from_coeffs(vec![1, 0], n)]);
        m.intersect_domain(&IntegerSet::rectangular(&[(0, 9)]))
    }

    #[test]
    fn test_from_affine_and_contains() {
        let m = shift(2);
        assert!(m.contains(&[3, 5]));
        assert!(!m.contains(&[3, 6]));
        assert!(!m.contains(&[10, 12]));
    }

    #[test]
    fn test_apply_range_composes() {
        let m = shift(1).apply_range(&shift(1));
        assert!(m.contains(&[0, 2]));
        assert!(!m.contains(&[9, 11]));
        assert!(m.contains(&[8, 10]));
    }

    #[test]
    fn test_domain_range_reverse() {
        let m = shift(3);
        assert!(m.domain().is_equal(&IntegerSet::rectangular(&[(0, 9)])));
        assert!(m.range().is_equal(&IntegerSet::rectangular(&[(3, 12)])));
        assert!(m.reverse().contains(&[5, 2]));
    }

    #[test]
    fn test_deltas() {
        let d = shift(4).deltas();
        assert!(d.is_equal(&IntegerSet::rectangular(&[(4, 4)])));
    }

    #[test]
    fn test_lex_order() {
        let lt = IntegerMap::lex_lt(&Space::set(2));
        assert!(lt.contains(&[0, 5, 1, 0]));
        assert!(lt.contains(&[1, 0, 1, 1]));
        assert!(!lt.contains(&[1, 1, 1, 1]));
        let le = IntegerMap::lex_le(&Space::set(2));
        assert!(le.contains(&[1, 1, 1, 1]));
        assert!(!le.contains(&[2, 0, 1, 9]));
    }

    #[test]
    fn test_single_valued() {
        assert!(shift(1).is_single_valued());
        let any = IntegerMap::from_domain_and_range(
            &IntegerSet::rectangular(&[(0, 3)]),
            &IntegerSet::rectangular(&[(0, 3)]),
        );
        assert!(!any.is_single_valued());
    }

    #[test]
    fn test_display_named_map() {
        let space = Space::named_map("S", 1, "A", 1);
        let m = IntegerMap::from_affine(space, &[AffineExpr::from_coeffs(vec![1, 0], 1)]);
        assert_eq!(m.to_string(), "{ S[i0] -> A[o0] : i0 + 1 = o0 }");
    }
}
