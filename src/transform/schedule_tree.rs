//! Schedule trees.
//!
//! A schedule is a tree over the statement instances of a region:
//!
//! ```text
//! Sequence
//! ├── Filter { Stmt_a }
//! │   └── Band [i]             one quasi-affine function per member
//! │       └── Sequence
//! │           ├── Filter { Stmt_b } -> Leaf
//! │           └── Filter { Stmt_c } -> Mark("SIMD") -> Band -> Leaf
//! └── Filter { Stmt_d } -> Leaf
//! ```
//!
//! Flattening the tree yields one relation per statement from its
//! instances to a timestamp; a sequence contributes the position of the
//! child containing the statement, a band its member functions.

use crate::polyhedral::{AffineExpr, BasicSet, IntegerMap, IntegerSet, Space, UnionMap, UnionSet};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One band member for one statement: `mul * floor(expr / div)`, with
/// `expr` over `[params | statement dims]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedAff {
    pub expr: AffineExpr,
    pub div: i64,
    pub mul: i64,
}

impl SchedAff {
    pub fn new(expr: AffineExpr) -> Self {
        Self { expr, div: 1, mul: 1 }
    }

    pub fn constant(value: i64, n_cols: usize) -> Self {
        Self::new(AffineExpr::constant(value, n_cols))
    }

    /// `floor(self / size)`, the tile loop of a rectangular tiling. Only
    /// meaningful for unscaled members.
    pub fn tile(&self, size: i64) -> Self {
        debug_assert_eq!(self.mul, 1);
        Self { expr: self.expr.clone(), div: self.div * size, mul: 1 }
    }

    /// `size * floor(self / size)`, a strip-mined loop stepping by `size`.
    pub fn strip_mine(&self, size: i64) -> Self {
        Self { expr: self.expr.clone(), div: self.div * size, mul: size }
    }

    pub fn is_constant(&self) -> bool {
        self.expr.is_constant()
    }

    pub fn evaluate(&self, cols: &[i64]) -> i64 {
        self.mul * crate::polyhedral::expr::floor_div(self.expr.evaluate(cols), self.div)
    }

    /// Whether the value depends on statement dimension `dim` (columns after
    /// `n_param`).
    pub fn involves_dim(&self, n_param: usize, dim: usize) -> bool {
        self.expr.coeff(n_param + dim) != 0
    }

    /// Reorder the columns for a new parameter list, which must name every
    /// parameter of `from`.
    pub fn align(&self, from: &Space, params: &[String]) -> Option<SchedAff> {
        let map = from.column_map_to_params(params)?;
        let n = params.len() + from.n_dim;
        Some(SchedAff { expr: self.expr.resized(from.n_cols()).remap(&map, n), div: self.div, mul: self.mul })
    }
}

impl fmt::Display for SchedAff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.mul, self.div) {
            (_, 1) if self.mul == 1 => write!(f, "{}", self.expr),
            (_, 1) => write!(f, "{}*({})", self.mul, self.expr),
            (1, d) => write!(f, "floor(({})/{})", self.expr, d),
            (m, d) => write!(f, "{}*floor(({})/{})", m, self.expr, d),
        }
    }
}

/// A permutable group of schedule dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub n_member: usize,
    /// Member functions per statement name
    pub partial: BTreeMap<String, Vec<SchedAff>>,
    pub permutable: bool,
    /// Members carrying no dependence
    pub coincident: Vec<bool>,
    /// Ask code generation to unroll the loops of this band
    pub unroll: bool,
}

impl Band {
    pub fn new(n_member: usize) -> Self {
        Self { n_member, partial: BTreeMap::new(), permutable: false, coincident: vec![false; n_member], unroll: false }
    }

    pub fn with_stmt(mut self, stmt: &str, members: Vec<SchedAff>) -> Self {
        self.partial.insert(stmt.to_string(), members);
        self
    }

    /// Keep only members in `range`.
    pub fn members(&self, range: std::ops::Range<usize>) -> Band {
        Band {
            n_member: range.len(),
            partial: self.partial.iter().map(|(k, v)| (k.clone(), v[range.clone()].to_vec())).collect(),
            permutable: self.permutable,
            coincident: self.coincident[range].to_vec(),
            unroll: self.unroll,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleNode {
    Band(Band, Box<ScheduleNode>),
    /// Children are executed in order; each child is a filter
    Sequence(Vec<ScheduleNode>),
    Filter(BTreeSet<String>, Box<ScheduleNode>),
    Mark(String, Box<ScheduleNode>),
    Leaf,
}

impl ScheduleNode {
    pub fn filter(stmts: impl IntoIterator<Item = String>, child: ScheduleNode) -> Self {
        ScheduleNode::Filter(stmts.into_iter().collect(), Box::new(child))
    }

    pub fn band(band: Band, child: ScheduleNode) -> Self {
        ScheduleNode::Band(band, Box::new(child))
    }

    pub fn mark(name: &str, child: ScheduleNode) -> Self {
        ScheduleNode::Mark(name.to_string(), Box::new(child))
    }

    /// Statements reached below this node, if restricted by a filter.
    pub fn statements(&self) -> Option<BTreeSet<String>> {
        match self {
            ScheduleNode::Filter(stmts, _) => Some(stmts.clone()),
            ScheduleNode::Band(band, child) => {
                child.statements().or_else(|| Some(band.partial.keys().cloned().collect()))
            }
            ScheduleNode::Mark(_, child) => child.statements(),
            ScheduleNode::Sequence(children) => {
                let mut out = BTreeSet::new();
                for c in children {
                    out.extend(c.statements()?);
                }
                Some(out)
            }
            ScheduleNode::Leaf => None,
        }
    }

    /// Schedule values for `stmt` along the path to its leaf.
    fn entries(&self, stmt: &str, n_cols: usize, out: &mut Vec<SchedAff>) -> bool {
        match self {
            ScheduleNode::Band(band, child) => {
                match band.partial.get(stmt) {
                    Some(members) => out.extend(members.iter().cloned()),
                    None => out.extend((0..band.n_member).map(|_| SchedAff::constant(0, n_cols))),
                }
                child.entries(stmt, n_cols, out)
            }
            ScheduleNode::Sequence(children) => {
                for (pos, c) in children.iter().enumerate() {
                    let contains = c.statements().map_or(true, |s| s.contains(stmt));
                    if contains {
                        out.push(SchedAff::constant(pos as i64, n_cols));
                        return c.entries(stmt, n_cols, out);
                    }
                }
                false
            }
            ScheduleNode::Filter(stmts, child) => stmts.contains(stmt) && child.entries(stmt, n_cols, out),
            ScheduleNode::Mark(_, child) => child.entries(stmt, n_cols, out),
            ScheduleNode::Leaf => true,
        }
    }

    /// Number of schedule dimensions on the deepest path.
    pub fn depth(&self) -> usize {
        match self {
            ScheduleNode::Band(band, child) => band.n_member + child.depth(),
            ScheduleNode::Sequence(children) => 1 + children.iter().map(|c| c.depth()).max().unwrap_or(0),
            ScheduleNode::Filter(_, child) | ScheduleNode::Mark(_, child) => child.depth(),
            ScheduleNode::Leaf => 0,
        }
    }

    /// Visit every band, outermost first.
    pub fn for_each_band<F: FnMut(&Band)>(&self, f: &mut F) {
        match self {
            ScheduleNode::Band(band, child) => {
                f(band);
                child.for_each_band(f);
            }
            ScheduleNode::Sequence(children) => children.iter().for_each(|c| c.for_each_band(f)),
            ScheduleNode::Filter(_, child) | ScheduleNode::Mark(_, child) => child.for_each_band(f),
            ScheduleNode::Leaf => {}
        }
    }

    pub fn count_marks(&self, name: &str) -> usize {
        match self {
            ScheduleNode::Mark(m, child) => usize::from(m == name) + child.count_marks(name),
            ScheduleNode::Band(_, child) | ScheduleNode::Filter(_, child) => child.count_marks(name),
            ScheduleNode::Sequence(children) => children.iter().map(|c| c.count_marks(name)).sum(),
            ScheduleNode::Leaf => 0,
        }
    }

    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            ScheduleNode::Band(band, child) => {
                let coincident: Vec<&str> = band.coincident.iter().map(|c| if *c { "1" } else { "0" }).collect();
                writeln!(
                    f,
                    "{}band: {} member(s), permutable: {}, coincident: [{}]{}",
                    pad,
                    band.n_member,
                    u8::from(band.permutable),
                    coincident.join(", "),
                    if band.unroll { ", unroll" } else { "" }
                )?;
                child.fmt_indent(f, indent + 1)
            }
            ScheduleNode::Sequence(children) => {
                writeln!(f, "{}sequence:", pad)?;
                for c in children {
                    c.fmt_indent(f, indent + 1)?;
                }
                Ok(())
            }
            ScheduleNode::Filter(stmts, child) => {
                let names: Vec<&str> = stmts.iter().map(|s| s.as_str()).collect();
                writeln!(f, "{}filter: {{ {} }}", pad, names.join("; "))?;
                child.fmt_indent(f, indent + 1)
            }
            ScheduleNode::Mark(name, child) => {
                writeln!(f, "{}mark: \"{}\"", pad, name)?;
                child.fmt_indent(f, indent + 1)
            }
            ScheduleNode::Leaf => writeln!(f, "{}leaf", pad),
        }
    }
}

/// A schedule tree rooted at the statement domains.
#[derive(Debug, Clone)]
pub struct ScheduleTree {
    /// Parameter columns of every band member
    pub params: Vec<String>,
    pub domain: UnionSet,
    pub root: ScheduleNode,
}

/// Trees are equal when their nodes are and their domains hold the same points.
impl PartialEq for ScheduleTree {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.root == other.root && self.domain.is_equal(&other.domain)
    }
}

impl ScheduleTree {
    pub fn new(params: Vec<String>, domain: UnionSet, root: ScheduleNode) -> Self {
        Self { params, domain, root }
    }

    /// The empty schedule of an empty region.
    pub fn empty() -> Self {
        Self { params: Vec::new(), domain: UnionSet::empty(), root: ScheduleNode::Leaf }
    }

    pub fn depth(&self) -> usize {
        self.root.depth()
    }

    /// Timestamp functions of `stmt`, padded with zeros to `depth()`.
    pub fn stmt_entries(&self, stmt: &str) -> Option<Vec<SchedAff>> {
        let domain = self.domain.get(stmt)?;
        let n_cols = self.params.len() + domain.dim();
        let mut out = Vec::new();
        if !self.root.entries(stmt, n_cols, &mut out) {
            return None;
        }
        let depth = self.depth();
        while out.len() < depth {
            out.push(SchedAff::constant(0, n_cols));
        }
        Some(out)
    }

    /// The schedule relation of one statement: `{ S[x] -> [t] }`, restricted
    /// to its domain.
    pub fn stmt_map(&self, stmt: &str) -> Option<IntegerMap> {
        let domain = self.domain.get(stmt)?;
        let entries = self.stmt_entries(stmt)?;
        Some(schedule_map(domain, &self.params, &entries))
    }

    /// The flattened schedule of every statement.
    pub fn to_union_map(&self) -> UnionMap {
        let mut result = UnionMap::empty();
        for set in self.domain.sets() {
            if let Some(name) = set.tuple_name() {
                if let Some(map) = self.stmt_map(name) {
                    result.add(map);
                }
            }
        }
        result
    }

    /// Realign every band member to a new (larger) parameter list.
    pub fn align_params(&self, params: &[String]) -> ScheduleTree {
        fn walk(node: &ScheduleNode, domain: &UnionSet, from: &[String], to: &[String]) -> ScheduleNode {
            match node {
                ScheduleNode::Band(band, child) => {
                    let mut band = band.clone();
                    for (stmt, members) in band.partial.iter_mut() {
                        let n_dim = domain.get(stmt).map_or(0, |s| s.dim());
                        let space = Space::set(n_dim).with_param_names(from.to_vec());
                        if let Some(aligned) = members.iter().map(|m| m.align(&space, to)).collect::<Option<Vec<_>>>() {
                            *members = aligned;
                        }
                    }
                    ScheduleNode::band(band, walk(child, domain, from, to))
                }
                ScheduleNode::Sequence(children) => {
                    ScheduleNode::Sequence(children.iter().map(|c| walk(c, domain, from, to)).collect())
                }
                ScheduleNode::Filter(stmts, child) => {
                    ScheduleNode::Filter(stmts.clone(), Box::new(walk(child, domain, from, to)))
                }
                ScheduleNode::Mark(name, child) => ScheduleNode::Mark(name.clone(), Box::new(walk(child, domain, from, to))),
                ScheduleNode::Leaf => ScheduleNode::Leaf,
            }
        }
        if self.params == params {
            return self.clone();
        }
        ScheduleTree {
            params: params.to_vec(),
            domain: self.domain.clone(),
            root: walk(&self.root, &self.domain, &self.params, params),
        }
    }

    /// Restrict the tree to statements in `keep`.
    pub fn retain_stmts(&self, keep: &BTreeSet<String>) -> ScheduleTree {
        fn walk(node: &ScheduleNode, keep: &BTreeSet<String>) -> Option<ScheduleNode> {
            match node {
                ScheduleNode::Band(band, child) => {
                    let mut band = band.clone();
                    band.partial.retain(|k, _| keep.contains(k));
                    if band.partial.is_empty() {
                        return None;
                    }
                    Some(ScheduleNode::band(band, walk(child, keep)?))
                }
                ScheduleNode::Sequence(children) => {
                    let kept: Vec<ScheduleNode> = children.iter().filter_map(|c| walk(c, keep)).collect();
                    if kept.is_empty() {
                        None
                    } else {
                        Some(ScheduleNode::Sequence(kept))
                    }
                }
                ScheduleNode::Filter(stmts, child) => {
                    let stmts: BTreeSet<String> = stmts.intersection(keep).cloned().collect();
                    if stmts.is_empty() {
                        return None;
                    }
                    Some(ScheduleNode::Filter(stmts, Box::new(walk(child, keep)?)))
                }
                ScheduleNode::Mark(name, child) => Some(ScheduleNode::Mark(name.clone(), Box::new(walk(child, keep)?))),
                ScheduleNode::Leaf => Some(ScheduleNode::Leaf),
            }
        }
        let mut domain = UnionSet::empty();
        for set in self.domain.sets() {
            if set.tuple_name().map_or(false, |n| keep.contains(n)) {
                domain.add(set.clone());
            }
        }
        ScheduleTree {
            params: self.params.clone(),
            domain,
            root: walk(&self.root, keep).unwrap_or(ScheduleNode::Leaf),
        }
    }

    /// Replace the domain of every statement (e.g. after simplification).
    pub fn with_domain(mut self, domain: UnionSet) -> Self {
        self.domain = domain;
        self
    }
}

impl fmt::Display for ScheduleTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "domain: \"{}\"", self.domain)?;
        self.root.fmt_indent(f, 1)
    }
}

/// Build `{ S[x] -> [t0, ...] }` from per-dimension functions over
/// `[params | dims]` of `domain`, with `params` naming their parameter columns.
pub fn schedule_map(domain: &IntegerSet, params: &[String], entries: &[SchedAff]) -> IntegerMap {
    let mut all_params = domain.space.param_names.clone();
    for p in params {
        if !all_params.contains(p) {
            all_params.push(p.clone());
        }
    }
    let domain = domain.align_params(&all_params);
    let n_in = domain.dim();
    let n_out = entries.len();
    let map_space = Space::map_from(&domain.space, &Space::set(n_out)).with_param_names(all_params.clone());
    let from = Space::set(n_in).with_param_names(params.to_vec());
    let np = all_params.len();
    let mut basic = BasicSet::universe(map_space);
    for (k, entry) in entries.iter().enumerate() {
        // all_params covers params
        let Some(aligned) = entry.align(&from, &all_params) else { continue };
        let n = basic.n_total();
        let expr = aligned.expr.resized(np + n_in).resized(n);
        let out_col = np + n_in + k;
        if aligned.div == 1 {
            basic.add_eq(AffineExpr::var(out_col, n) - expr.scale(aligned.mul));
        } else {
            let q = basic.add_div(expr, aligned.div);
            let n = basic.n_total();
            basic.add_eq(AffineExpr::var(out_col, n) - AffineExpr::var(q, n).scale(aligned.mul));
        }
    }
    IntegerMap::from_basic(basic).intersect_domain(&domain)
}

/// Recover per-dimension functions from a single-valued relation whose
/// output dimensions are each fixed by an equality.
pub fn affs_from_map(map: &IntegerMap) -> Option<Vec<SchedAff>> {
    let map = map.coalesce();
    let pieces = map.pieces();
    if pieces.len() != 1 {
        return None;
    }
    let piece = &pieces[0];
    if !piece.locals.is_empty() {
        return None;
    }
    let space = map.space();
    let np = space.n_param();
    let n_in = space.n_in;
    let mut out = Vec::with_capacity(map.n_out());
    for k in 0..map.n_out() {
        let col = np + n_in + k;
        let eq = piece.constraints.iter().find(|c| {
            c.is_equality()
                && c.coeff(col).abs() == 1
                && (0..map.n_out()).all(|o| o == k || c.coeff(np + n_in + o) == 0)
        })?;
        // col = -(rest) / coeff
        let sign = -eq.coeff(col);
        let mut expr = eq.expr.scale(sign);
        expr.set_coeff(col, 0);
        out.push(SchedAff::new(expr.resized(np + n_in)));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::parse_set;

    fn domains() -> UnionSet {
        let mut u = UnionSet::empty();
        u.add(parse_set("[N] -> { S[i] : 0 <= i < N }").unwrap());
        u.add(parse_set("[N] -> { T[i, j] : 0 <= i < N and 0 <= j < N }").unwrap());
        u
    }

    fn original() -> ScheduleTree {
        let params = vec!["N".to_string()];
        let s_band = Band::new(1).with_stmt("S", vec![SchedAff::new(AffineExpr::var(1, 2))]);
        let t_outer = Band::new(1).with_stmt("T", vec![SchedAff::new(AffineExpr::var(1, 3))]);
        let t_inner = Band::new(1).with_stmt("T", vec![SchedAff::new(AffineExpr::var(2, 3))]);
        let root = ScheduleNode::Sequence(vec![
            ScheduleNode::filter(["S".to_string()], ScheduleNode::band(s_band, ScheduleNode::Leaf)),
            ScheduleNode::filter(
                ["T".to_string()],
                ScheduleNode::band(t_outer, ScheduleNode::band(t_inner, ScheduleNode::Leaf)),
            ),
        ]);
        ScheduleTree::new(params, domains(), root)
    }

    #[test]
    fn test_flatten_pads_to_depth() {
        let tree = original();
        assert_eq!(tree.depth(), 3);
        let s = tree.stmt_map("S").unwrap();
        assert_eq!(s.n_out(), 3);
        assert!(s.contains(&[5, 2, 0, 2, 0]));
        let t = tree.stmt_map("T").unwrap();
        assert!(t.contains(&[5, 1, 3, 1, 1, 3]));
    }

    #[test]
    fn test_tiled_member() {
        let aff = SchedAff::new(AffineExpr::var(1, 2)).tile(32);
        assert_eq!(aff.evaluate(&[0, 70]), 2);
        let strip = SchedAff::new(AffineExpr::var(1, 2)).strip_mine(4);
        assert_eq!(strip.evaluate(&[0, 7]), 4);
    }

    #[test]
    fn test_affs_from_map() {
        let map = crate::polyhedral::parse_map("[N] -> { S[i, j] -> [j, i + 1] }").unwrap();
        let affs = affs_from_map(&map).unwrap();
        assert_eq!(affs.len(), 2);
        assert_eq!(affs[0].evaluate(&[9, 3, 4]), 4);
        assert_eq!(affs[1].evaluate(&[9, 3, 4]), 4);
    }

    #[test]
    fn test_equality_compares_domain_points() {
        let tree = original();
        let mut rewritten = UnionSet::empty();
        rewritten.add(parse_set("[N] -> { S[i] : i >= 0 and N - 1 >= i }").unwrap());
        rewritten.add(parse_set("[N] -> { T[i, j] : 0 <= i < N and 0 <= j <= N - 1 }").unwrap());
        assert_eq!(tree, ScheduleTree::new(tree.params.clone(), rewritten, tree.root.clone()));
        assert_ne!(tree, ScheduleTree::new(tree.params.clone(), domains(), ScheduleNode::Leaf));
    }

    #[test]
    fn test_align_needs_every_parameter() {
        let from = Space::set(1).with_param_names(vec!["N".to_string()]);
        let aff = SchedAff::new(AffineExpr::from_coeffs(vec![2, 1], 0));
        let moved = aff.align(&from, &["M".to_string(), "N".to_string()]).unwrap();
        assert_eq!(moved.evaluate(&[7, 3, 1]), 7);
        assert!(aff.align(&from, &["M".to_string()]).is_none());
    }

    #[test]
    fn test_retain_stmts() {
        let tree = original();
        let keep: BTreeSet<String> = ["T".to_string()].into_iter().collect();
        let kept = tree.retain_stmts(&keep);
        assert!(kept.stmt_map("S").is_none());
        assert!(kept.stmt_map("T").is_some());
    }
}
