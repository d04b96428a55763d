//! Integer sets: finite unions of basic sets over one space.
//!
//! The operations here are column based and work for set, parameter and
//! relation spaces alike; [`crate::polyhedral::IntegerMap`] builds the
//! relation-specific operations on top of them.

use crate::polyhedral::basic::BasicSet;
use crate::polyhedral::constraint::Constraint;
use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::space::Space;
use std::fmt;

/// Upper bound on the number of pieces kept by a subtraction before coalescing.
const MAX_PIECES: usize = 256;

/// A finite union of basic sets.
#[derive(Debug, Clone)]
pub struct IntegerSet {
    /// The space
    pub space: Space,
    /// The disjuncts
    pub pieces: Vec<BasicSet>,
}

impl IntegerSet {
    /// The empty set.
    pub fn empty(space: Space) -> Self {
        Self { space, pieces: Vec::new() }
    }

    /// The universe.
    pub fn universe(space: Space) -> Self {
        Self { pieces: vec![BasicSet::universe(space.clone())], space }
    }

    /// A set with a single basic set.
    pub fn from_basic(basic: BasicSet) -> Self {
        Self { space: basic.space.clone(), pieces: vec![basic] }
    }

    /// A box `lo[k] <= x_k <= hi[k]` in an anonymous set space.
    pub fn rectangular(bounds: &[(i64, i64)]) -> Self {
        let n = bounds.len();
        let mut basic = BasicSet::universe(Space::set(n));
        for (k, &(lo, hi)) in bounds.iter().enumerate() {
            basic.add_constraint(Constraint::lower_bound(k, lo, n));
            basic.add_constraint(Constraint::upper_bound(k, hi, n));
        }
        Self::from_basic(basic)
    }

    /// Number of set (output) dimensions.
    pub fn dim(&self) -> usize {
        self.space.n_dim
    }

    /// Number of parameters.
    pub fn n_param(&self) -> usize {
        self.space.n_param()
    }

    /// Tuple name of the set.
    pub fn tuple_name(&self) -> Option<&str> {
        self.space.out_name.as_deref()
    }

    /// Rename the tuple.
    pub fn set_tuple_name(mut self, name: Option<String>) -> Self {
        self.space.out_name = name.clone();
        for p in self.pieces.iter_mut() {
            p.space.out_name = name.clone();
        }
        self
    }

    /// Replace the space by an equal-arity one (renames tuples).
    pub(crate) fn with_space(mut self, space: Space) -> Self {
        for p in self.pieces.iter_mut() {
            p.space = space.clone();
        }
        self.space = space;
        self
    }

    /// Add a constraint over the space columns to every piece.
    pub fn add_constraint(&mut self, c: Constraint) {
        for p in self.pieces.iter_mut() {
            p.add_constraint(c.clone());
        }
    }

    /// Builder-style constraint addition.
    pub fn with_constraint(mut self, c: Constraint) -> Self {
        self.add_constraint(c);
        self
    }

    /// Align to the parameter list `params`. Current parameters missing
    /// from `params` are kept after them.
    pub fn align_params(&self, params: &[String]) -> IntegerSet {
        if self.space.param_names == params {
            return self.clone();
        }
        let params = self.space.params_covering(params);
        let space = self.space.clone().with_param_names(params.clone());
        IntegerSet {
            pieces: self.pieces.iter().map(|p| p.align_params(&params)).collect(),
            space,
        }
    }

    /// Add a parameter if it is not present yet.
    pub fn add_param(&self, name: &str) -> IntegerSet {
        if self.space.param_index(name).is_some() {
            return self.clone();
        }
        let mut params = self.space.param_names.clone();
        params.push(name.to_string());
        self.align_params(&params)
    }

    /// Bring two objects to a common parameter list.
    pub fn align_pair(a: &IntegerSet, b: &IntegerSet) -> (IntegerSet, IntegerSet) {
        let params = a.space.merged_params(&b.space);
        (a.align_params(&params), b.align_params(&params))
    }

    /// Whether the set is provably empty.
    pub fn is_empty(&self) -> bool {
        self.pieces.iter().all(|p| p.is_empty())
    }

    /// Whether the set has no constraints in some piece.
    pub fn is_universe(&self) -> bool {
        self.pieces.iter().any(|p| p.is_universe())
    }

    /// Whether a point (parameter values followed by tuple values) lies in the set.
    pub fn contains(&self, point: &[i64]) -> bool {
        self.pieces.iter().any(|p| p.contains(point))
    }

    /// Any point of the set, as parameter values followed by tuple values.
    pub fn sample(&self) -> Option<Vec<i64>> {
        self.pieces.iter().find_map(|p| p.sample())
    }

    /// Intersection.
    pub fn intersect(&self, other: &IntegerSet) -> IntegerSet {
        let (a, b) = Self::align_pair(self, other);
        let mut pieces = Vec::new();
        for pa in &a.pieces {
            for pb in &b.pieces {
                let mut p = pa.intersect(pb);
                p.simplify();
                if !p.is_obviously_empty() {
                    pieces.push(p);
                }
            }
        }
        IntegerSet { space: a.space, pieces }
    }

    /// Intersect with a set over the parameters only.
    pub fn intersect_params(&self, params: &IntegerSet) -> IntegerSet {
        let lifted = params.lift_params_to(&self.space);
        self.intersect(&lifted)
    }

    /// Embed a parameter set into `space` (tuple columns unconstrained).
    pub fn lift_params_to(&self, space: &Space) -> IntegerSet {
        let params = self.space.merged_params(space);
        let aligned = self.align_params(&params);
        let target = space.clone().with_param_names(params.clone());
        let map: Vec<usize> = (0..aligned.space.n_cols()).collect();
        IntegerSet {
            pieces: aligned.pieces.iter().map(|p| p.remap_space(target.clone(), &map)).collect(),
            space: target,
        }
    }

    /// Union.
    pub fn union(&self, other: &IntegerSet) -> IntegerSet {
        let (a, b) = Self::align_pair(self, other);
        let mut pieces = a.pieces;
        pieces.extend(b.pieces);
        IntegerSet { space: a.space, pieces }
    }

    /// Set difference together with a flag telling whether it is exact.
    /// When `other` carries opaque locals the result is a subset of the
    /// true difference.
    pub fn subtract_checked(&self, other: &IntegerSet) -> (IntegerSet, bool) {
        let (a, b) = Self::align_pair(self, other);
        let mut current: Vec<BasicSet> = a.pieces.into_iter().filter(|p| !p.is_empty()).collect();
        let mut exact = true;
        for pb in &b.pieces {
            if current.is_empty() {
                break;
            }
            if pb.is_empty() {
                continue;
            }
            let (complement, ok) = pb.complement();
            exact &= ok;
            let mut next = Vec::new();
            for pa in &current {
                // pieces that do not meet `pb` survive untouched
                if pa.intersect(pb).is_empty() {
                    next.push(pa.clone());
                    continue;
                }
                for c in &complement {
                    let mut p = pa.intersect(c);
                    p.simplify();
                    if !p.is_empty() {
                        next.push(p);
                    }
                }
            }
            if next.len() > MAX_PIECES {
                next = IntegerSet { space: a.space.clone(), pieces: next }.coalesce().pieces;
            }
            current = next;
        }
        (IntegerSet { space: a.space, pieces: current }, exact)
    }

    /// Set difference (see [`IntegerSet::subtract_checked`]).
    pub fn subtract(&self, other: &IntegerSet) -> IntegerSet {
        self.subtract_checked(other).0
    }

    /// Complement with respect to the universe of the space.
    pub fn complement(&self) -> IntegerSet {
        IntegerSet::universe(self.space.clone()).subtract(self)
    }

    /// Whether `self` is a subset of `other`. Answers `false` when the
    /// difference cannot be computed exactly.
    pub fn is_subset(&self, other: &IntegerSet) -> bool {
        let (diff, exact) = self.subtract_checked(other);
        exact && diff.is_empty()
    }

    /// Whether both sets contain the same points.
    pub fn is_equal(&self, other: &IntegerSet) -> bool {
        self.space.has_equal_tuples(&other.space) && self.is_subset(other) && other.is_subset(self)
    }

    /// Whether the sets share a point.
    pub fn intersects(&self, other: &IntegerSet) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Project out `n` space columns starting at column `first`, giving an
    /// object in `new_space`.
    pub(crate) fn project_cols(&self, first: usize, n: usize, new_space: Space) -> IntegerSet {
        let pieces = self
            .pieces
            .iter()
            .filter(|p| !p.is_obviously_empty())
            .map(|p| p.project_out(first, n, new_space.clone()))
            .filter(|p| !p.is_obviously_empty())
            .collect();
        IntegerSet { space: new_space, pieces }
    }

    /// Project out `n` set dimensions starting at `first`.
    pub fn project_out(&self, first: usize, n: usize) -> IntegerSet {
        let mut space = self.space.clone();
        if space.dim_names.len() == space.n_in + space.n_dim {
            space.dim_names.drain(space.n_in + first..space.n_in + first + n);
        } else {
            space.dim_names.clear();
        }
        space.n_dim -= n;
        self.project_cols(self.space.out_offset() + first, n, space)
    }

    /// A superset without opaque locals, see [`BasicSet::relax_opaque_locals`].
    pub fn relax_opaque_locals(&self) -> IntegerSet {
        IntegerSet {
            space: self.space.clone(),
            pieces: self.pieces.iter().map(BasicSet::relax_opaque_locals).collect(),
        }
    }

    /// Project out a parameter.
    pub fn project_out_param(&self, name: &str) -> IntegerSet {
        match self.space.param_index(name) {
            Some(idx) => {
                let mut space = self.space.clone();
                space.param_names.remove(idx);
                self.project_cols(idx, 1, space)
            }
            None => self.clone(),
        }
    }

    /// The parameter values for which the set is non-empty.
    pub fn params(&self) -> IntegerSet {
        let np = self.n_param();
        let n = self.space.n_in + self.space.n_dim;
        self.project_cols(np, n, self.space.params_space())
    }

    /// Append `n` unconstrained set dimensions.
    pub fn add_dims(&self, n: usize) -> IntegerSet {
        self.insert_dims(self.dim(), n)
    }

    /// Insert `n` unconstrained set dimensions before dimension `pos`.
    pub fn insert_dims(&self, pos: usize, n: usize) -> IntegerSet {
        let mut space = self.space.clone();
        space.n_dim += n;
        space.dim_names.clear();
        let at = self.space.out_offset() + pos;
        let map: Vec<usize> = (0..self.space.n_cols())
            .map(|i| if i < at { i } else { i + n })
            .collect();
        IntegerSet {
            pieces: self.pieces.iter().map(|p| p.remap_space(space.clone(), &map)).collect(),
            space,
        }
    }

    /// Fix a set dimension to a value.
    pub fn fix_dim(&self, dim: usize, value: i64) -> IntegerSet {
        let col = self.space.out_offset() + dim;
        let n = self.space.n_cols();
        self.clone().with_constraint(Constraint::eq_zero(AffineExpr::var(col, n).add_constant(-value)))
    }

    /// Fix a parameter to a value.
    pub fn fix_param(&self, name: &str, value: i64) -> IntegerSet {
        let aligned = self.add_param(name);
        let col = aligned.space.param_index(name).unwrap_or(0);
        let n = aligned.space.n_cols();
        aligned.with_constraint(Constraint::eq_zero(AffineExpr::var(col, n).add_constant(-value)))
    }

    /// Remove empty pieces, simplify the others and drop pieces contained
    /// in another piece.
    pub fn coalesce(&self) -> IntegerSet {
        let mut pieces: Vec<BasicSet> = Vec::new();
        for p in &self.pieces {
            let mut p = p.clone();
            p.simplify();
            if p.is_empty() {
                continue;
            }
            let p = p.gist(&BasicSet::universe(p.space.clone()));
            pieces.push(p);
        }
        let mut keep = vec![true; pieces.len()];
        for i in 0..pieces.len() {
            for j in 0..pieces.len() {
                if i == j || !keep[j] || !keep[i] {
                    continue;
                }
                let single_i = IntegerSet::from_basic(pieces[i].clone());
                let single_j = IntegerSet::from_basic(pieces[j].clone());
                if single_i.is_subset(&single_j) {
                    keep[i] = false;
                }
            }
        }
        IntegerSet {
            space: self.space.clone(),
            pieces: pieces.into_iter().zip(keep).filter(|(_, k)| *k).map(|(p, _)| p).collect(),
        }
    }

    /// Simplify `self` assuming `context` holds (both over the same space).
    /// Only a single-piece context is used for simplification.
    pub fn gist(&self, context: &IntegerSet) -> IntegerSet {
        let (a, ctx) = Self::align_pair(self, context);
        let ctx = ctx.coalesce();
        let base = match ctx.pieces.len() {
            0 => return IntegerSet::empty(a.space),
            1 => ctx.pieces[0].clone(),
            _ => BasicSet::universe(a.space.clone()),
        };
        IntegerSet {
            pieces: a
                .pieces
                .iter()
                .filter(|p| !p.intersect(&base).is_empty())
                .map(|p| p.gist(&base))
                .collect(),
            space: a.space,
        }
    }

    /// Simplify `self` assuming the parameter set `context` holds.
    pub fn gist_params(&self, context: &IntegerSet) -> IntegerSet {
        let lifted = context.lift_params_to(&self.space);
        self.gist(&lifted)
    }

    /// Exact minimum and maximum of a space column over the set, `None` for
    /// an unbounded direction or an empty set.
    pub fn col_extrema(&self, col: usize) -> (Option<i64>, Option<i64>) {
        let mut lo: Option<i64> = None;
        let mut hi: Option<i64> = None;
        let mut any = false;
        let mut lo_unbounded = false;
        let mut hi_unbounded = false;
        for p in &self.pieces {
            if p.is_empty() {
                continue;
            }
            any = true;
            let sys = p.to_system();
            match sys.lexmin(&[col]).and_then(|v| i64::try_from(v[col]).ok()) {
                Some(v) => lo = Some(lo.map_or(v, |l| l.min(v))),
                None => lo_unbounded = true,
            }
            match sys.lexmax(&[col]).and_then(|v| i64::try_from(v[col]).ok()) {
                Some(v) => hi = Some(hi.map_or(v, |h| h.max(v))),
                None => hi_unbounded = true,
            }
        }
        if !any {
            return (None, None);
        }
        (
            if lo_unbounded { None } else { lo },
            if hi_unbounded { None } else { hi },
        )
    }

    /// Exact maximum of a set dimension (see [`IntegerSet::col_extrema`]).
    pub fn dim_max(&self, dim: usize) -> Option<i64> {
        self.col_extrema(self.space.out_offset() + dim).1
    }

    /// Exact minimum of a set dimension.
    pub fn dim_min(&self, dim: usize) -> Option<i64> {
        self.col_extrema(self.space.out_offset() + dim).0
    }

    /// Lexicographic minimum over the space columns, tuple dimensions
    /// first, for a bounded set.
    pub fn lexmin(&self) -> Option<Vec<i64>> {
        self.lex_opt(false)
    }

    /// Lexicographic maximum (see [`IntegerSet::lexmin`]).
    pub fn lexmax(&self) -> Option<Vec<i64>> {
        self.lex_opt(true)
    }

    fn lex_opt(&self, max: bool) -> Option<Vec<i64>> {
        let np = self.n_param();
        let n = self.space.n_cols();
        let order: Vec<usize> = (np..n).chain(0..np).collect();
        let mut best: Option<Vec<i64>> = None;
        for p in &self.pieces {
            let sys = p.to_system();
            let point = if max { sys.lexmax(&order) } else { sys.lexmin(&order) };
            let point = match point {
                Some(pt) => pt,
                None => continue,
            };
            let ordered: Option<Vec<i64>> = order.iter().map(|&c| i64::try_from(point[c]).ok()).collect();
            let ordered = ordered?;
            let better = match &best {
                None => true,
                Some(b) => if max { ordered > *b } else { ordered < *b },
            };
            if better {
                best = Some(ordered);
            }
        }
        best.map(|v| {
            let mut out = v[n - np..].to_vec();
            out.extend_from_slice(&v[..n - np]);
            out
        })
    }

    /// Enumerate all points of a bounded set (parameter values followed by
    /// tuple values), giving up beyond `limit` points.
    pub fn points(&self, limit: usize) -> Option<Vec<Vec<i64>>> {
        let n = self.space.n_cols();
        let mut bounds = Vec::with_capacity(n);
        for col in 0..n {
            let (lo, hi) = self.col_extrema(col);
            bounds.push((lo?, hi?));
        }
        let mut result = Vec::new();
        if self.is_empty() {
            return Some(result);
        }
        let mut point: Vec<i64> = bounds.iter().map(|b| b.0).collect();
        loop {
            if self.pieces.iter().any(|p| contains_point(p, &point)) {
                result.push(point.clone());
                if result.len() > limit {
                    return None;
                }
            }
            let mut k = n;
            loop {
                if k == 0 {
                    return Some(result);
                }
                k -= 1;
                if point[k] < bounds[k].1 {
                    point[k] += 1;
                    break;
                }
                point[k] = bounds[k].0;
            }
        }
    }

    /// Names of all space columns, for printing.
    pub(crate) fn column_names(space: &Space) -> Vec<String> {
        let mut names = space.param_names.clone();
        for k in 0..(space.n_in + space.n_dim) {
            names.push(space.dim_name(k));
        }
        names
    }
}

/// Point membership without going through the solver when the basic set
/// has no locals.
fn contains_point(p: &BasicSet, point: &[i64]) -> bool {
    if p.locals.is_empty() {
        p.constraints.iter().all(|c| c.is_satisfied(point))
    } else {
        p.contains(point)
    }
}

/// Print one basic set's constraints, divisions written inline.
pub(crate) fn fmt_basic_constraints(p: &BasicSet, names: &[String]) -> String {
    let n_space = p.n_space();
    let mut col_names: Vec<String> = names.to_vec();
    let mut opaque = Vec::new();
    for (i, l) in p.locals.iter().enumerate() {
        match &l.div {
            Some(d) => {
                let num = d.num.resized(n_space + i).to_string_with_names(&col_names);
                col_names.push(format!("floor(({})/{})", num, d.den));
            }
            None => {
                let name = format!("e{}", opaque.len());
                opaque.push(name.clone());
                col_names.push(name);
            }
        }
    }
    let mut parts: Vec<String> = Vec::new();
    for c in &p.constraints {
        let is_def = (0..p.locals.len()).any(|i| {
            let col = n_space + i;
            match &p.locals[i].div {
                Some(d) => {
                    let n = p.n_total();
                    let q = AffineExpr::var(col, n);
                    let num = d.num.resized(n);
                    c.is_inequality()
                        && (c.expr.resized(n) == num.clone() - q.scale(d.den)
                            || c.expr.resized(n) == q.scale(d.den).add_constant(d.den - 1) - num)
                }
                None => false,
            }
        });
        if !is_def {
            parts.push(c.to_string_with_names(&col_names));
        }
    }
    let body = parts.join(" and ");
    if opaque.is_empty() {
        body
    } else {
        format!("exists ({} : {})", opaque.join(", "), if body.is_empty() { "true".to_string() } else { body })
    }
}

pub(crate) fn fmt_tuple(name: &Option<String>, names: &[String]) -> String {
    format!("{}[{}]", name.as_deref().unwrap_or(""), names.join(", "))
}

/// The body of an empty set or map of `space`, e.g. `S[i0] : false`.
pub(crate) fn fmt_empty_body(space: &Space) -> String {
    let names = IntegerSet::column_names(space);
    let np = space.n_param();
    if space.is_params() {
        ": false".to_string()
    } else if space.is_map() {
        format!(
            "{} -> {} : false",
            fmt_tuple(&space.in_name, &names[np..np + space.n_in]),
            fmt_tuple(&space.out_name, &names[np + space.n_in..])
        )
    } else {
        format!("{} : false", fmt_tuple(&space.out_name, &names[np..]))
    }
}

/// Format the `{ ... }` body of a set or map (without the parameter prefix).
pub(crate) fn fmt_body(space: &Space, pieces: &[BasicSet]) -> Vec<String> {
    let names = IntegerSet::column_names(space);
    let np = space.n_param();
    let tuple = if space.is_params() {
        String::new()
    } else if space.is_map() {
        format!(
            "{} -> {}",
            fmt_tuple(&space.in_name, &names[np..np + space.n_in]),
            fmt_tuple(&space.out_name, &names[np + space.n_in..])
        )
    } else {
        fmt_tuple(&space.out_name, &names[np..])
    };
    let live: Vec<&BasicSet> = pieces.iter().filter(|p| !p.is_obviously_empty()).collect();
    live.iter()
        .map(|p| {
            let cons = fmt_basic_constraints(p, &names);
            if cons.is_empty() {
                if space.is_params() { ":".to_string() } else { tuple.clone() }
            } else if space.is_params() {
                format!(": {}", cons)
            } else {
                format!("{} : {}", tuple, cons)
            }
        })
        .collect()
}

impl fmt::Display for IntegerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.space.param_names.is_empty() {
            write!(f, "[{}] -> ", self.space.param_names.join(", "))?;
        }
        let body = fmt_body(&self.space, &self.pieces);
        if body.is_empty() {
            write!(f, "{{ {} }}", fmt_empty_body(&self.space))
        } else {
            write!(f, "{{ {} }}", body.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interval(lo: i64, hi: i64) -> IntegerSet {
        IntegerSet::rectangular(&[(lo, hi)])
    }

    #[test]
    fn test_union_and_subtract() {
        let a = interval(0, 10);
        let b = interval(3, 5);
        let diff = a.subtract(&b);
        assert!(diff.contains(&[2]));
        assert!(!diff.contains(&[4]));
        assert!(diff.contains(&[6]));
        assert!(diff.union(&b).is_equal(&a));
    }

    #[test]
    fn test_subset_and_equality() {
        assert!(interval(2, 3).is_subset(&interval(0, 10)));
        assert!(!interval(0, 11).is_subset(&interval(0, 10)));
        assert!(interval(0, 3).union(&interval(4, 7)).is_equal(&interval(0, 7)));
    }

    #[test]
    fn test_params_projection() {
        // [N] -> { [i] : 0 <= i < N } has points iff N >= 1
        let space = Space::set(1).with_param_names(vec!["N".into()]);
        let mut b = BasicSet::universe(space.clone());
        b.add_constraint(Constraint::lower_bound(1, 0, 2));
        b.add_ineq(AffineExpr::from_coeffs(vec![1, -1], -1));
        let set = IntegerSet::from_basic(b);
        let params = set.params();
        assert!(params.space.is_params());
        assert!(params.contains(&[1]));
        assert!(!params.contains(&[0]));
    }

    #[test]
    fn test_complement_of_empty_is_universe() {
        let empty = IntegerSet::empty(Space::set(1));
        assert!(empty.complement().is_universe());
        assert!(interval(0, 3).complement().contains(&[-1]));
    }

    #[test]
    fn test_extrema_and_points() {
        let set = interval(2, 4).union(&interval(7, 8));
        assert_eq!(set.dim_min(0), Some(2));
        assert_eq!(set.dim_max(0), Some(8));
        assert_eq!(set.points(100).map(|p| p.len()), Some(5));
        assert_eq!(set.lexmin(), Some(vec![2]));
        assert_eq!(set.lexmax(), Some(vec![8]));
    }

    #[test]
    fn test_coalesce_drops_contained_pieces() {
        let set = interval(0, 10).union(&interval(2, 3)).union(&IntegerSet::empty(Space::set(1)));
        assert_eq!(set.coalesce().pieces.len(), 1);
    }

    #[test]
    fn test_display() {
        let set = interval(0, 3).set_tuple_name(Some("S".into()));
        assert_eq!(set.to_string(), "{ S[i0] : i0 >= 0 and 3 >= i0 }");
        assert_eq!(IntegerSet::empty(Space::set(1)).to_string(), "{ [i0] : false }");
    }
}
