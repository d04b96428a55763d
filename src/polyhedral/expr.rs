//! Affine expressions for polyhedral representation.
//!
//! An affine expression is a linear combination of columns plus a constant:
//! `aff(x) = c0 + c1*x1 + c2*x2 + ... + cn*xn`
//!
//! The meaning of each column (parameter, input dimension, output dimension,
//! local variable) is given by the object that owns the expression.

use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::fmt;
use std::ops::{Add, Sub, Neg};

/// Integer floor division (rounds toward negative infinity).
pub fn floor_div(a: i64, b: i64) -> i64 {
    Integer::div_floor(&a, &b)
}

/// Integer ceiling division (rounds toward positive infinity).
pub fn ceil_div(a: i64, b: i64) -> i64 {
    -Integer::div_floor(&-a, &b)
}

/// An affine expression: constant + sum(coeff[i] * col[i])
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AffineExpr {
    /// Constant term
    pub constant: i64,
    /// Coefficients for each column
    pub coeffs: Vec<i64>,
}

impl AffineExpr {
    /// Create a zero expression over `n_cols` columns.
    pub fn zero(n_cols: usize) -> Self {
        Self { constant: 0, coeffs: vec![0; n_cols] }
    }

    /// Create a constant expression.
    pub fn constant(value: i64, n_cols: usize) -> Self {
        Self { constant: value, coeffs: vec![0; n_cols] }
    }

    /// Create an expression for a single column.
    pub fn var(col: usize, n_cols: usize) -> Self {
        let mut expr = Self::zero(n_cols);
        if col < n_cols {
            expr.coeffs[col] = 1;
        }
        expr
    }

    /// Create an expression from raw coefficients and a constant.
    pub fn from_coeffs(coeffs: Vec<i64>, constant: i64) -> Self {
        Self { constant, coeffs }
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.coeffs.len()
    }

    /// Check if this is a constant expression.
    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    /// Check if this expression is zero.
    pub fn is_zero(&self) -> bool {
        self.constant == 0 && self.is_constant()
    }

    /// Get the constant value if this is a constant expression.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// Get coefficient of a column.
    pub fn coeff(&self, col: usize) -> i64 {
        self.coeffs.get(col).copied().unwrap_or(0)
    }

    /// Set coefficient of a column.
    pub fn set_coeff(&mut self, col: usize, value: i64) {
        if col < self.coeffs.len() {
            self.coeffs[col] = value;
        }
    }

    /// Whether any column in `range` has a non-zero coefficient.
    pub fn involves(&self, first: usize, n: usize) -> bool {
        self.coeffs
            .iter()
            .skip(first)
            .take(n)
            .any(|&c| c != 0)
    }

    /// Evaluate the expression at a point (missing columns count as zero).
    pub fn evaluate(&self, values: &[i64]) -> i64 {
        self.coeffs
            .iter()
            .zip(values.iter())
            .fold(self.constant, |acc, (&c, &v)| acc + c * v)
    }

    /// Scale the expression by a constant.
    pub fn scale(&self, factor: i64) -> Self {
        Self {
            constant: self.constant * factor,
            coeffs: self.coeffs.iter().map(|&c| c * factor).collect(),
        }
    }

    /// Add a constant.
    pub fn add_constant(&self, value: i64) -> Self {
        let mut result = self.clone();
        result.constant += value;
        result
    }

    /// GCD of all column coefficients (0 for a constant expression).
    pub fn coeff_gcd(&self) -> i64 {
        self.coeffs.iter().fold(0i64, |g, &c| g.gcd(&c))
    }

    /// Divide coefficients and constant by their common GCD.
    pub fn normalize(&self) -> Self {
        let g = self.coeff_gcd().gcd(&self.constant);
        if g <= 1 {
            return self.clone();
        }
        Self {
            constant: self.constant / g,
            coeffs: self.coeffs.iter().map(|&c| c / g).collect(),
        }
    }

    /// Resize to `n_cols` columns, truncating or padding with zeros.
    pub fn resized(&self, n_cols: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        coeffs.resize(n_cols, 0);
        Self { constant: self.constant, coeffs }
    }

    /// Insert `n` zero columns at `pos`.
    pub fn insert_cols(&self, pos: usize, n: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        let pos = pos.min(coeffs.len());
        coeffs.splice(pos..pos, std::iter::repeat(0).take(n));
        Self { constant: self.constant, coeffs }
    }

    /// Remove `n` columns starting at `pos`.
    pub fn remove_cols(&self, pos: usize, n: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        let end = (pos + n).min(coeffs.len());
        if pos < end {
            coeffs.drain(pos..end);
        }
        Self { constant: self.constant, coeffs }
    }

    /// Move column `i` to position `map[i]` in an expression of `n_cols` columns.
    pub fn remap(&self, map: &[usize], n_cols: usize) -> Self {
        let mut coeffs = vec![0; n_cols];
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                if let Some(&to) = map.get(i) {
                    coeffs[to] += c;
                }
            }
        }
        Self { constant: self.constant, coeffs }
    }

    /// Replace column `col` by `value` (an expression over the same columns).
    pub fn substitute(&self, col: usize, value: &AffineExpr) -> Self {
        let c = self.coeff(col);
        if c == 0 {
            return self.clone();
        }
        let mut result = self.clone();
        result.coeffs[col] = 0;
        result.constant += c * value.constant;
        for (i, &v) in value.coeffs.iter().enumerate() {
            if i < result.coeffs.len() {
                result.coeffs[i] += c * v;
            }
        }
        result
    }

    /// Format using the given column names.
    pub fn to_string_with_names(&self, names: &[String]) -> String {
        let mut parts: Vec<String> = Vec::new();
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let name = names.get(i).cloned().unwrap_or_else(|| format!("c{}", i));
            let term = match c {
                1 => name,
                -1 => format!("-{}", name),
                _ => format!("{}{}", c, name),
            };
            parts.push(term);
        }
        if self.constant != 0 || parts.is_empty() {
            parts.push(self.constant.to_string());
        }
        let mut out = String::new();
        for (idx, part) in parts.iter().enumerate() {
            if idx == 0 {
                out.push_str(part);
            } else if let Some(stripped) = part.strip_prefix('-') {
                out.push_str(" - ");
                out.push_str(stripped);
            } else {
                out.push_str(" + ");
                out.push_str(part);
            }
        }
        out
    }
}

impl Add for AffineExpr {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        let n = self.coeffs.len().max(other.coeffs.len());
        let mut coeffs = vec![0; n];
        for (i, c) in coeffs.iter_mut().enumerate() {
            *c = self.coeff(i) + other.coeff(i);
        }
        Self { constant: self.constant + other.constant, coeffs }
    }
}

impl Sub for AffineExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + (-other)
    }
}

impl Neg for AffineExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_names(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_and_ceil_division() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(ceil_div(7, 2), 4);
        assert_eq!(ceil_div(-7, 2), -3);
    }

    #[test]
    fn test_evaluate_and_arith() {
        let i = AffineExpr::var(0, 2);
        let n = AffineExpr::var(1, 2);
        let e = i.scale(2) + n - AffineExpr::constant(1, 2);
        assert_eq!(e.evaluate(&[3, 10]), 15);
        assert_eq!(e.to_string_with_names(&["i".into(), "N".into()]), "2i + N - 1");
    }

    #[test]
    fn test_substitute() {
        // 3x + y with x := y + 2 gives 4y + 6
        let e = AffineExpr::from_coeffs(vec![3, 1], 0);
        let v = AffineExpr::from_coeffs(vec![0, 1], 2);
        let r = e.substitute(0, &v);
        assert_eq!(r.coeffs, vec![0, 4]);
        assert_eq!(r.constant, 6);
    }

    #[test]
    fn test_insert_remove_remap() {
        let e = AffineExpr::from_coeffs(vec![1, 2], 5);
        let wider = e.insert_cols(1, 2);
        assert_eq!(wider.coeffs, vec![1, 0, 0, 2]);
        assert_eq!(wider.remove_cols(1, 2), e);
        let swapped = e.remap(&[1, 0], 2);
        assert_eq!(swapped.coeffs, vec![2, 1]);
    }

    #[test]
    fn test_normalize() {
        let e = AffineExpr::from_coeffs(vec![4, 6], 8);
        let n = e.normalize();
        assert_eq!(n.coeffs, vec![2, 3]);
        assert_eq!(n.constant, 4);
    }
}
