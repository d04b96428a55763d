//! Loop tiling and pre-vectorization of schedule bands.
//!
//! Tiling (also called blocking) splits a permutable band into a band of
//! tile loops and a band of point loops:
//! ```text
//! for i = 0 to N:                 for ti = 0 to N / T:
//!   for j = 0 to M:       =>        for tj = 0 to M / T:
//!     A[i][j] = ...                   for i = T * ti to min(T * ti + T, N):
//!                                       for j = T * tj to min(T * tj + T, M):
//!                                         A[i][j] = ...
//! ```
//! Pre-vectorization strip-mines one coincident point loop by the vector
//! width and sinks the resulting constant trip-count loop innermost. With
//! the `polly` vectorizer the sunk loop sits below a `"SIMD"` mark.

use crate::config::{TileLevel, TilingOptions, VectorizerKind};
use crate::transform::schedule_tree::{Band, ScheduleNode, ScheduleTree};
use crate::utils::errors::{ScheduleError, ScheduleErrorKind};
use log::debug;
use std::collections::BTreeSet;

/// Mark placed above a strip-mined vector loop.
pub const SIMD_MARK: &str = "SIMD";

/// Rectangular tiling of one band.
#[derive(Debug, Clone)]
pub struct Tiling {
    /// Tile sizes for each member (starting from outermost)
    pub tile_sizes: Vec<i64>,
    /// Size of members beyond `tile_sizes`
    pub default_size: i64,
    /// Prefix of the marks around the tile and point bands
    pub label: String,
}

impl Tiling {
    /// Create a new tiling with the specified tile sizes.
    pub fn new(tile_sizes: Vec<i64>) -> Self {
        let default_size = tile_sizes.last().copied().unwrap_or(32);
        Self { tile_sizes, default_size, label: "1st level tiling".to_string() }
    }

    /// Create a tiling with a uniform tile size.
    pub fn with_default_size(size: i64) -> Self {
        Self { tile_sizes: Vec::new(), default_size: size, label: "1st level tiling".to_string() }
    }

    pub fn from_level(level: &TileLevel, label: &str) -> Self {
        Self { tile_sizes: level.sizes.clone(), default_size: level.default_size, label: label.to_string() }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn size(&self, member: usize) -> i64 {
        self.tile_sizes.get(member).copied().unwrap_or(self.default_size)
    }

    /// Split `band` into its tile band and its point band.
    pub fn tile_band(&self, band: &Band) -> Result<(Band, Band), ScheduleError> {
        let sizes: Vec<i64> = (0..band.n_member).map(|d| self.size(d)).collect();
        if let Some(bad) = sizes.iter().find(|s| **s <= 0) {
            return Err(ScheduleError::new(
                ScheduleErrorKind::InvalidTileSize,
                format!("tile size {} is not positive", bad),
            ));
        }
        let mut tile = band.clone();
        for members in tile.partial.values_mut() {
            for (m, size) in members.iter_mut().zip(&sizes) {
                *m = m.tile(*size);
            }
        }
        tile.permutable = true;
        let mut point = band.clone();
        point.permutable = true;
        debug!("{}: tiling {} members with sizes {:?}", self.label, band.n_member, sizes);
        Ok((tile, point))
    }
}

/// Whether `band` is an innermost permutable band with several members.
pub fn is_tileable(band: &Band, child: &ScheduleNode) -> bool {
    band.permutable && band.n_member > 1 && !contains_band(child)
}

fn contains_band(node: &ScheduleNode) -> bool {
    let mut found = false;
    node.for_each_band(&mut |_| found = true);
    found
}

/// Strip-mine the innermost coincident member of `band` by `width` and
/// sink the vector loop below the remaining members, under a SIMD mark
/// when `simd` is set.
pub fn prevect_band(band: Band, child: ScheduleNode, width: i64, simd: bool) -> Result<ScheduleNode, ScheduleError> {
    let Some(dim) = (0..band.n_member).rev().find(|&d| band.coincident[d]) else {
        return Ok(ScheduleNode::band(band, child));
    };
    if width <= 0 {
        return Err(ScheduleError::new(
            ScheduleErrorKind::InvalidTileSize,
            format!("vector width {} is not positive", width),
        ));
    }
    debug!("pre-vectorizing member {} with width {}", dim, width);
    let vector = band.members(dim..dim + 1);
    let mut strip = vector.clone();
    for members in strip.partial.values_mut() {
        for m in members.iter_mut() {
            *m = m.strip_mine(width);
        }
    }

    let mut node = sink_vector_loop(child, &vector, simd);
    if dim + 1 < band.n_member {
        node = ScheduleNode::band(band.members(dim + 1..band.n_member), node);
    }
    node = ScheduleNode::band(strip, node);
    if dim > 0 {
        node = ScheduleNode::band(band.members(0..dim), node);
    }
    Ok(node)
}

/// Place `vector` above every leaf of `node`.
fn sink_vector_loop(node: ScheduleNode, vector: &Band, simd: bool) -> ScheduleNode {
    match node {
        ScheduleNode::Leaf => {
            let band = ScheduleNode::band(vector.clone(), ScheduleNode::Leaf);
            if simd {
                ScheduleNode::mark(SIMD_MARK, band)
            } else {
                band
            }
        }
        ScheduleNode::Filter(stmts, child) => {
            let restricted = restrict_band(vector, &stmts);
            ScheduleNode::Filter(stmts, Box::new(sink_vector_loop(*child, &restricted, simd)))
        }
        ScheduleNode::Sequence(children) => {
            ScheduleNode::Sequence(children.into_iter().map(|c| sink_vector_loop(c, vector, simd)).collect())
        }
        ScheduleNode::Mark(name, child) => ScheduleNode::Mark(name, Box::new(sink_vector_loop(*child, vector, simd))),
        ScheduleNode::Band(band, child) => ScheduleNode::Band(band, Box::new(sink_vector_loop(*child, vector, simd))),
    }
}

fn restrict_band(band: &Band, stmts: &BTreeSet<String>) -> Band {
    let mut band = band.clone();
    band.partial.retain(|name, _| stmts.contains(name));
    band
}

/// Tiling levels and pre-vectorization of one tileable band.
fn standard_band_opts(
    band: Band,
    child: ScheduleNode,
    options: &TilingOptions,
    vectorizer: VectorizerKind,
    prevect_width: i64,
) -> Result<ScheduleNode, ScheduleError> {
    // register tile points are unrolled into straight-line code
    let levels = [
        (&options.first_level, "1st level tiling", false),
        (&options.second_level, "2nd level tiling", false),
        (&options.register, "Register tiling", true),
    ];
    let mut outer: Vec<(String, Band, String)> = Vec::new();
    let mut point = band;
    for (level, label, unroll) in levels {
        if !level.enabled {
            continue;
        }
        let (tile, mut inner) = Tiling::from_level(level, label).tile_band(&point)?;
        inner.unroll = unroll;
        outer.push((format!("{} - Tiles", label), tile, format!("{} - Points", label)));
        point = inner;
    }
    let mut node = match vectorizer {
        VectorizerKind::None => ScheduleNode::band(point, child),
        kind => prevect_band(point, child, prevect_width, kind == VectorizerKind::Polly)?,
    };
    for (tiles, tile, points) in outer.into_iter().rev() {
        node = ScheduleNode::mark(&tiles, ScheduleNode::band(tile, ScheduleNode::mark(&points, node)));
    }
    Ok(node)
}

fn optimize_node(
    node: ScheduleNode,
    options: &TilingOptions,
    vectorizer: VectorizerKind,
    prevect_width: i64,
) -> Result<ScheduleNode, ScheduleError> {
    Ok(match node {
        ScheduleNode::Band(band, child) if is_tileable(&band, &child) => {
            standard_band_opts(band, *child, options, vectorizer, prevect_width)?
        }
        ScheduleNode::Band(band, child) => {
            ScheduleNode::Band(band, Box::new(optimize_node(*child, options, vectorizer, prevect_width)?))
        }
        ScheduleNode::Sequence(children) => ScheduleNode::Sequence(
            children
                .into_iter()
                .map(|c| optimize_node(c, options, vectorizer, prevect_width))
                .collect::<Result<_, _>>()?,
        ),
        ScheduleNode::Filter(stmts, child) => {
            ScheduleNode::Filter(stmts, Box::new(optimize_node(*child, options, vectorizer, prevect_width)?))
        }
        ScheduleNode::Mark(name, child) => {
            ScheduleNode::Mark(name, Box::new(optimize_node(*child, options, vectorizer, prevect_width)?))
        }
        ScheduleNode::Leaf => ScheduleNode::Leaf,
    })
}

/// Tile every innermost tileable band of `tree` and pre-vectorize it when
/// `vectorizer` asks for it.
pub fn optimize_bands(
    tree: &ScheduleTree,
    options: &TilingOptions,
    vectorizer: VectorizerKind,
    prevect_width: i64,
) -> Result<ScheduleTree, ScheduleError> {
    let root = optimize_node(tree.root.clone(), options, vectorizer, prevect_width)?;
    Ok(ScheduleTree::new(tree.params.clone(), tree.domain.clone(), root))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::{parse_set, AffineExpr, UnionSet};
    use crate::transform::schedule_tree::SchedAff;

    fn nest(coincident: Vec<bool>) -> ScheduleTree {
        let mut domain = UnionSet::empty();
        domain.add(parse_set("[N] -> { S[i, j] : 0 <= i < N and 0 <= j < N }").unwrap());
        let mut band = Band::new(2).with_stmt(
            "S",
            vec![SchedAff::new(AffineExpr::var(1, 3)), SchedAff::new(AffineExpr::var(2, 3))],
        );
        band.permutable = true;
        band.coincident = coincident;
        ScheduleTree::new(vec!["N".to_string()], domain, ScheduleNode::band(band, ScheduleNode::Leaf))
    }

    #[test]
    fn test_tiling_schedule() {
        let tree = optimize_bands(&nest(vec![true, false]), &TilingOptions::default(), VectorizerKind::None, 4).unwrap();
        // Should have 4 output dimensions: ti, tj, i, j
        assert_eq!(tree.depth(), 4);
        assert_eq!(tree.root.count_marks("1st level tiling - Tiles"), 1);
        let s = tree.stmt_map("S").unwrap();
        assert!(s.contains(&[100, 40, 5, 1, 0, 40, 5]));
        assert!(!s.contains(&[100, 40, 5, 0, 0, 40, 5]));
    }

    #[test]
    fn test_invalid_tile_size() {
        let mut options = TilingOptions::default();
        options.first_level.sizes = vec![32, 0];
        let err = optimize_bands(&nest(vec![false, false]), &options, VectorizerKind::None, 4).unwrap_err();
        assert_eq!(err.kind, ScheduleErrorKind::InvalidTileSize);
    }

    #[test]
    fn test_second_level_and_register_tiling() {
        let mut options = TilingOptions::default();
        options.second_level.enabled = true;
        options.register.enabled = true;
        let tree = optimize_bands(&nest(vec![false, false]), &options, VectorizerKind::None, 4).unwrap();
        assert_eq!(tree.depth(), 8);
        assert_eq!(tree.root.count_marks("2nd level tiling - Points"), 1);
        assert_eq!(tree.root.count_marks("Register tiling - Tiles"), 1);
        let mut unrolled = Vec::new();
        tree.root.for_each_band(&mut |b| unrolled.push(b.unroll));
        assert_eq!(unrolled, vec![false, false, false, true]);
    }

    #[test]
    fn test_prevect_strip_mines_coincident_member() {
        let mut options = TilingOptions::default();
        options.first_level.enabled = false;
        let tree = optimize_bands(&nest(vec![true, false]), &options, VectorizerKind::Polly, 4).unwrap();
        assert_eq!(tree.root.count_marks(SIMD_MARK), 1);
        // [4 * floor(i / 4), j, i]
        let s = tree.stmt_map("S").unwrap();
        assert!(s.contains(&[100, 6, 3, 4, 3, 6]));
        assert!(!s.contains(&[100, 6, 3, 6, 3, 6]));
    }

    #[test]
    fn test_basic_vectorizer_strip_mines_without_mark() {
        let mut options = TilingOptions::default();
        options.first_level.enabled = false;
        let tree = optimize_bands(&nest(vec![true, false]), &options, VectorizerKind::Basic, 4).unwrap();
        assert_eq!(tree.root.count_marks(SIMD_MARK), 0);
        assert_eq!(tree.depth(), 3);
        let s = tree.stmt_map("S").unwrap();
        assert!(s.contains(&[100, 6, 3, 4, 3, 6]));
        assert!(!s.contains(&[100, 6, 3, 6, 3, 6]));
        let untouched = optimize_bands(&nest(vec![true, false]), &options, VectorizerKind::None, 4).unwrap();
        assert_eq!(untouched.depth(), 2);
    }

    #[test]
    fn test_single_member_band_untouched() {
        let mut domain = UnionSet::empty();
        domain.add(parse_set("[N] -> { S[i] : 0 <= i < N }").unwrap());
        let mut band = Band::new(1).with_stmt("S", vec![SchedAff::new(AffineExpr::var(1, 2))]);
        band.permutable = true;
        let tree = ScheduleTree::new(vec!["N".to_string()], domain, ScheduleNode::band(band, ScheduleNode::Leaf));
        let tiled = optimize_bands(&tree, &TilingOptions::default(), VectorizerKind::Polly, 4).unwrap();
        assert_eq!(tiled, tree);
    }

    #[test]
    fn test_tile_band_sizes() {
        let tiling = Tiling::new(vec![8]).with_label("test");
        assert_eq!(tiling.size(0), 8);
        assert_eq!(tiling.size(3), 8);
        assert_eq!(Tiling::with_default_size(16).size(2), 16);
    }
}
