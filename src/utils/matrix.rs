//! Rational matrices for the scheduler.
//!
//! Entries are exact rationals over `i128`, which keeps the simplex tableaux
//! of the scheduling problems and the orthogonal-complement computations
//! free of rounding.

use num_integer::Integer;
use num_rational::Ratio;
use num_traits::{One, Zero};
use std::fmt;

/// Exact rational used by matrix and solver code.
pub type Rational = Ratio<i128>;

/// A dense matrix with rational entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RationalMatrix {
    data: Vec<Vec<Rational>>,
    rows: usize,
    cols: usize,
}

impl RationalMatrix {
    /// Create a new matrix with the given dimensions, initialized to zero.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { data: vec![vec![Rational::zero(); cols]; rows], rows, cols }
    }

    /// Create an identity matrix.
    pub fn identity(n: usize) -> Self {
        let mut mat = Self::zeros(n, n);
        for i in 0..n {
            mat.data[i][i] = Rational::one();
        }
        mat
    }

    /// Create a matrix from integer rows.
    pub fn from_vec(data: Vec<Vec<i64>>) -> Self {
        let rows = data.len();
        let cols = data.first().map_or(0, |r| r.len());
        let data = data
            .into_iter()
            .map(|row| row.into_iter().map(|v| Rational::from_integer(v as i128)).collect())
            .collect();
        Self { data, rows, cols }
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&Rational> {
        self.data.get(row)?.get(col)
    }

    pub fn set(&mut self, row: usize, col: usize, value: Rational) {
        if row < self.rows && col < self.cols {
            self.data[row][col] = value;
        }
    }

    pub fn set_int(&mut self, row: usize, col: usize, value: i64) {
        self.set(row, col, Rational::from_integer(value as i128));
    }

    pub fn row(&self, row: usize) -> Option<&[Rational]> {
        self.data.get(row).map(|r| r.as_slice())
    }

    /// Append a row; it is padded or truncated to the column count.
    pub fn push_row(&mut self, mut row: Vec<Rational>) {
        row.resize(self.cols, Rational::zero());
        self.data.push(row);
        self.rows += 1;
    }

    /// Append a zero column.
    pub fn push_col(&mut self) {
        for row in &mut self.data {
            row.push(Rational::zero());
        }
        self.cols += 1;
    }

    pub fn transpose(&self) -> Self {
        let mut result = Self::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                result.data[j][i] = self.data[i][j];
            }
        }
        result
    }

    pub fn mul_vec(&self, vec: &[Rational]) -> Option<Vec<Rational>> {
        if self.cols != vec.len() {
            return None;
        }
        Some(
            self.data
                .iter()
                .map(|row| row.iter().zip(vec).fold(Rational::zero(), |acc, (a, b)| acc + a * b))
                .collect(),
        )
    }

    /// Gauss-Jordan pivot on `(row, col)`: scale the row to a unit pivot
    /// and clear the column everywhere else. The pivot must be non-zero.
    pub fn pivot(&mut self, row: usize, col: usize) {
        let p = self.data[row][col];
        if p.is_zero() {
            return;
        }
        for v in self.data[row].iter_mut() {
            *v /= p;
        }
        let pivot_row = self.data[row].clone();
        for (i, r) in self.data.iter_mut().enumerate() {
            if i == row {
                continue;
            }
            let factor = r[col];
            if factor.is_zero() {
                continue;
            }
            for (v, pv) in r.iter_mut().zip(&pivot_row) {
                *v -= factor * pv;
            }
        }
    }

    /// Reduced row echelon form and the pivot column of each non-zero row.
    pub fn row_echelon(&self) -> (Self, Vec<usize>) {
        let mut m = self.clone();
        let mut pivots = Vec::new();
        let mut r = 0;
        for c in 0..m.cols {
            if r >= m.rows {
                break;
            }
            let Some(k) = (r..m.rows).find(|&k| !m.data[k][c].is_zero()) else { continue };
            m.data.swap(r, k);
            m.pivot(r, c);
            pivots.push(c);
            r += 1;
        }
        (m, pivots)
    }

    pub fn rank(&self) -> usize {
        self.row_echelon().1.len()
    }

    /// Integer basis of the orthogonal complement of the row space: rows
    /// `h` with `h . r = 0` for every row `r`.
    pub fn orthogonal_complement(&self) -> Vec<Vec<i64>> {
        let (rref, pivots) = self.row_echelon();
        let mut basis = Vec::new();
        for free in (0..self.cols).filter(|c| !pivots.contains(c)) {
            let mut v = vec![Rational::zero(); self.cols];
            v[free] = Rational::one();
            for (r, &p) in pivots.iter().enumerate() {
                v[p] = -rref.data[r][free];
            }
            if let Some(ints) = to_integer_vector(&v) {
                basis.push(ints);
            }
        }
        basis
    }

    pub fn is_integer(&self) -> bool {
        self.data.iter().all(|row| row.iter().all(|r| r.is_integer()))
    }
}

impl fmt::Display for RationalMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[")?;
        for row in &self.data {
            write!(f, "  [")?;
            for (j, val) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, ", ")?;
                }
                if val.is_integer() {
                    write!(f, "{}", val.numer())?;
                } else {
                    write!(f, "{}/{}", val.numer(), val.denom())?;
                }
            }
            writeln!(f, "]")?;
        }
        write!(f, "]")
    }
}

/// Scale a rational vector to the primitive integer vector with the same
/// direction. `None` when an entry does not fit `i64`.
pub fn to_integer_vector(v: &[Rational]) -> Option<Vec<i64>> {
    let lcm = v.iter().fold(1i128, |acc, r| acc.lcm(r.denom()));
    let ints: Vec<i128> = v.iter().map(|r| (r * Rational::from_integer(lcm)).to_integer()).collect();
    let gcd = ints.iter().fold(0i128, |g, x| g.gcd(x));
    let gcd = if gcd == 0 { 1 } else { gcd };
    ints.iter().map(|x| i64::try_from(x / gcd).ok()).collect()
}

/// The GCD of a vector of integers.
pub fn vector_gcd(v: &[i64]) -> i64 {
    v.iter().fold(0, |acc, &x| acc.gcd(&x))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_creation() {
        let m = RationalMatrix::from_vec(vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(m.nrows(), 2);
        assert_eq!(m.ncols(), 3);
        assert_eq!(m.transpose().nrows(), 3);
    }

    #[test]
    fn test_rank() {
        let m = RationalMatrix::from_vec(vec![vec![1, 2], vec![2, 4]]);
        assert_eq!(m.rank(), 1);
        assert_eq!(RationalMatrix::identity(3).rank(), 3);
    }

    #[test]
    fn test_orthogonal_complement() {
        let m = RationalMatrix::from_vec(vec![vec![1, 0, 0]]);
        let h = m.orthogonal_complement();
        assert_eq!(h, vec![vec![0, 1, 0], vec![0, 0, 1]]);

        let m = RationalMatrix::from_vec(vec![vec![1, 1]]);
        assert_eq!(m.orthogonal_complement(), vec![vec![-1, 1]]);

        let empty = RationalMatrix::zeros(0, 2);
        assert_eq!(empty.orthogonal_complement().len(), 2);
    }

    #[test]
    fn test_pivot() {
        let mut m = RationalMatrix::from_vec(vec![vec![2, 4, 6], vec![1, 3, 5]]);
        m.pivot(0, 0);
        assert_eq!(m.get(0, 1), Some(&Rational::from_integer(2)));
        assert_eq!(m.get(1, 0), Some(&Rational::zero()));
        assert_eq!(m.get(1, 1), Some(&Rational::from_integer(1)));
    }

    #[test]
    fn test_integer_vector() {
        let v = vec![Rational::new(1, 2), Rational::new(-3, 4)];
        assert_eq!(to_integer_vector(&v), Some(vec![2, -3]));
        assert_eq!(vector_gcd(&[4, 6, 8]), 2);
    }
}
