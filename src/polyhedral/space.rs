//! Polyhedral spaces describe the dimensions of sets and relations.
//!
//! A space has three groups of columns, always laid out in this order:
//! - Parameter dimensions (symbolic constants, identified by name)
//! - Input dimensions (relations only)
//! - Output/set dimensions
//!
//! Tuples carry an optional name (`Stmt_bb3`, `MemRef_A`), which is how
//! union sets and union maps tell their members apart.

use serde::{Serialize, Deserialize};
use std::fmt;

/// What kind of object a space describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpaceKind {
    /// A set over parameters only: `[N] -> { : N > 0 }`
    Params,
    /// A set with one (possibly anonymous) tuple
    Set,
    /// A relation between an input and an output tuple
    Map,
}

/// A polyhedral space describes the dimensionality and structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    /// What kind of object this is
    pub kind: SpaceKind,
    /// Names of parameters
    pub param_names: Vec<String>,
    /// Number of input dimensions (relations only)
    pub n_in: usize,
    /// Number of set/output dimensions
    pub n_dim: usize,
    /// Name of the input tuple
    pub in_name: Option<String>,
    /// Name of the output (or set) tuple
    pub out_name: Option<String>,
    /// Names of input followed by output dimensions (optional, for printing)
    pub dim_names: Vec<String>,
}

impl PartialEq for Space {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.param_names == other.param_names
            && self.n_in == other.n_in
            && self.n_dim == other.n_dim
            && self.in_name == other.in_name
            && self.out_name == other.out_name
    }
}

impl Eq for Space {}

impl Space {
    /// A parameter-only space.
    pub fn params(param_names: Vec<String>) -> Self {
        Self {
            kind: SpaceKind::Params,
            param_names,
            n_in: 0,
            n_dim: 0,
            in_name: None,
            out_name: None,
            dim_names: Vec::new(),
        }
    }

    /// Create a new anonymous set space with the given dimensions.
    pub fn set(n_dim: usize) -> Self {
        Self {
            kind: SpaceKind::Set,
            param_names: Vec::new(),
            n_in: 0,
            n_dim,
            in_name: None,
            out_name: None,
            dim_names: Vec::new(),
        }
    }

    /// Create a named set space.
    pub fn named_set(name: &str, n_dim: usize) -> Self {
        Self::set(n_dim).with_out_name(Some(name.to_string()))
    }

    /// Create a new anonymous map space.
    pub fn map(n_in: usize, n_out: usize) -> Self {
        Self {
            kind: SpaceKind::Map,
            param_names: Vec::new(),
            n_in,
            n_dim: n_out,
            in_name: None,
            out_name: None,
            dim_names: Vec::new(),
        }
    }

    /// Create a map space between two named tuples.
    pub fn named_map(in_name: &str, n_in: usize, out_name: &str, n_out: usize) -> Self {
        Self::map(n_in, n_out)
            .with_in_name(Some(in_name.to_string()))
            .with_out_name(Some(out_name.to_string()))
    }

    /// Create a map space from a domain and a range set space.
    pub fn map_from(domain: &Space, range: &Space) -> Self {
        let mut space = Self::map(domain.n_dim, range.n_dim)
            .with_in_name(domain.out_name.clone())
            .with_out_name(range.out_name.clone())
            .with_param_names(domain.param_names.clone());
        if !domain.dim_names.is_empty() && !range.dim_names.is_empty() {
            space.dim_names = domain.dim_names[domain.n_in..]
                .iter()
                .chain(range.dim_names[range.n_in..].iter())
                .cloned()
                .collect();
        }
        space
    }

    /// Set parameter names.
    pub fn with_param_names(mut self, names: Vec<String>) -> Self {
        self.param_names = names;
        self
    }

    /// Set the input tuple name.
    pub fn with_in_name(mut self, name: Option<String>) -> Self {
        self.in_name = name;
        self
    }

    /// Set the output tuple name.
    pub fn with_out_name(mut self, name: Option<String>) -> Self {
        self.out_name = name;
        self
    }

    /// Set dimension names (input dimensions first).
    pub fn with_dim_names(mut self, names: Vec<String>) -> Self {
        self.dim_names = names;
        self
    }

    /// Check if this is a set space (no input tuple).
    pub fn is_set(&self) -> bool {
        self.kind != SpaceKind::Map
    }

    /// Check if this is a map space.
    pub fn is_map(&self) -> bool {
        self.kind == SpaceKind::Map
    }

    /// Check if this is a parameter space.
    pub fn is_params(&self) -> bool {
        self.kind == SpaceKind::Params
    }

    /// Number of parameters.
    pub fn n_param(&self) -> usize {
        self.param_names.len()
    }

    /// Get the number of output/set dimensions.
    pub fn dim(&self) -> usize {
        self.n_dim
    }

    /// Number of columns occupied by parameters and tuple dimensions.
    pub fn n_cols(&self) -> usize {
        self.n_param() + self.n_in + self.n_dim
    }

    /// Column of the first input dimension.
    pub fn in_offset(&self) -> usize {
        self.n_param()
    }

    /// Column of the first output/set dimension.
    pub fn out_offset(&self) -> usize {
        self.n_param() + self.n_in
    }

    /// Index of a parameter by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|p| p == name)
    }

    /// Get the name of a parameter.
    pub fn param_name(&self, idx: usize) -> Option<&str> {
        self.param_names.get(idx).map(|s| s.as_str())
    }

    /// Name of the `idx`-th tuple dimension (inputs first), with a default.
    pub fn dim_name(&self, idx: usize) -> String {
        if let Some(name) = self.dim_names.get(idx) {
            return name.clone();
        }
        if self.is_map() {
            if idx < self.n_in {
                format!("i{}", idx)
            } else {
                format!("o{}", idx - self.n_in)
            }
        } else {
            format!("i{}", idx)
        }
    }

    /// The domain of a map space (a set space over the input tuple).
    pub fn domain(&self) -> Space {
        let mut space = Space::set(self.n_in)
            .with_out_name(self.in_name.clone())
            .with_param_names(self.param_names.clone());
        if self.dim_names.len() == self.n_in + self.n_dim {
            space.dim_names = self.dim_names[..self.n_in].to_vec();
        }
        space
    }

    /// The range of a map space (a set space over the output tuple).
    pub fn range(&self) -> Space {
        let mut space = Space::set(self.n_dim)
            .with_out_name(self.out_name.clone())
            .with_param_names(self.param_names.clone());
        if self.dim_names.len() == self.n_in + self.n_dim {
            space.dim_names = self.dim_names[self.n_in..].to_vec();
        }
        space
    }

    /// The parameter space of this space.
    pub fn params_space(&self) -> Space {
        Space::params(self.param_names.clone())
    }

    /// Swap input and output tuples.
    pub fn reverse(&self) -> Space {
        let mut space = Space::map(self.n_dim, self.n_in)
            .with_in_name(self.out_name.clone())
            .with_out_name(self.in_name.clone())
            .with_param_names(self.param_names.clone());
        if self.dim_names.len() == self.n_in + self.n_dim {
            space.dim_names = self.dim_names[self.n_in..]
                .iter()
                .chain(self.dim_names[..self.n_in].iter())
                .cloned()
                .collect();
        }
        space
    }

    /// The identity map space over this set space.
    pub fn identity_map(&self) -> Space {
        Space::map_from(self, self)
    }

    /// Whether the tuples of two spaces agree (names and arities), ignoring parameters.
    pub fn has_equal_tuples(&self, other: &Space) -> bool {
        self.kind == other.kind
            && self.n_in == other.n_in
            && self.n_dim == other.n_dim
            && self.in_name == other.in_name
            && self.out_name == other.out_name
    }

    /// The union of the parameter names of both spaces, keeping the order of `self`.
    pub fn merged_params(&self, other: &Space) -> Vec<String> {
        let mut names = self.param_names.clone();
        for name in &other.param_names {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    /// Map every column of `self` to its position in a space with
    /// parameters `params` (tuple columns keep their relative order).
    /// `None` when `params` lacks a parameter of `self`.
    pub(crate) fn column_map_to_params(&self, params: &[String]) -> Option<Vec<usize>> {
        let mut map = Vec::with_capacity(self.n_cols());
        for name in &self.param_names {
            map.push(params.iter().position(|p| p == name)?);
        }
        for i in 0..(self.n_in + self.n_dim) {
            map.push(params.len() + i);
        }
        Some(map)
    }

    /// `params` followed by the parameters of `self` it lacks.
    pub(crate) fn params_covering(&self, params: &[String]) -> Vec<String> {
        let mut names = params.to_vec();
        for name in &self.param_names {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.param_names.is_empty() {
            write!(f, "[{}] -> ", self.param_names.join(", "))?;
        }
        let tuple = |f: &mut fmt::Formatter<'_>, name: &Option<String>, n: usize| {
            write!(f, "{}[{}]", name.as_deref().unwrap_or(""), n)
        };
        match self.kind {
            SpaceKind::Params => write!(f, "{{ : }}"),
            SpaceKind::Set => {
                write!(f, "{{ ")?;
                tuple(f, &self.out_name, self.n_dim)?;
                write!(f, " }}")
            }
            SpaceKind::Map => {
                write!(f, "{{ ")?;
                tuple(f, &self.in_name, self.n_in)?;
                write!(f, " -> ")?;
                tuple(f, &self.out_name, self.n_dim)?;
                write!(f, " }}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_space() {
        let space = Space::named_set("S", 3);
        assert!(space.is_set());
        assert!(!space.is_map());
        assert_eq!(space.dim(), 3);
        assert_eq!(space.out_offset(), 0);
    }

    #[test]
    fn test_map_space_columns() {
        let space = Space::named_map("S", 2, "A", 1)
            .with_param_names(vec!["N".to_string()]);
        assert_eq!(space.n_cols(), 4);
        assert_eq!(space.in_offset(), 1);
        assert_eq!(space.out_offset(), 3);
        assert_eq!(space.domain().out_name.as_deref(), Some("S"));
        assert_eq!(space.range().out_name.as_deref(), Some("A"));
    }

    #[test]
    fn test_reverse_swaps_tuples() {
        let space = Space::named_map("S", 2, "A", 1);
        let rev = space.reverse();
        assert_eq!(rev.in_name.as_deref(), Some("A"));
        assert_eq!(rev.n_in, 1);
        assert_eq!(rev.n_dim, 2);
    }

    #[test]
    fn test_merged_params_keeps_order() {
        let a = Space::set(1).with_param_names(vec!["N".into(), "M".into()]);
        let b = Space::set(1).with_param_names(vec!["K".into(), "N".into()]);
        assert_eq!(a.merged_params(&b), vec!["N", "M", "K"]);
        assert_eq!(b.column_map_to_params(&a.merged_params(&b)), Some(vec![2, 0, 3]));
    }

    #[test]
    fn test_column_map_needs_every_parameter() {
        let space = Space::set(1).with_param_names(vec!["N".into(), "M".into()]);
        assert_eq!(space.column_map_to_params(&["N".to_string()]), None);
        assert_eq!(space.params_covering(&["K".to_string(), "N".to_string()]), vec!["K", "N", "M"]);
    }

    #[test]
    fn test_dim_names_default() {
        let space = Space::map(1, 1);
        assert_eq!(space.dim_name(0), "i0");
        assert_eq!(space.dim_name(1), "o0");
    }
}
