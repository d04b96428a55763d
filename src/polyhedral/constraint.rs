//! Linear constraints for polyhedral representation.
//!
//! A constraint is a linear inequality or equality over integer columns:
//! - Inequality: expr >= 0
//! - Equality: expr = 0

use crate::polyhedral::expr::{floor_div, AffineExpr};
use num_integer::Integer;
use serde::{Serialize, Deserialize};
use std::fmt;

/// A linear constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    /// The affine expression (constraint is: expr >= 0 or expr = 0)
    pub expr: AffineExpr,
    /// Kind of constraint
    pub kind: ConstraintKind,
}

/// Kind of constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Greater than or equal: expr >= 0
    Inequality,
    /// Equal: expr = 0
    Equality,
}

/// Outcome of normalizing a constraint over integer columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// Holds for every point
    Trivial,
    /// Holds for no point
    Infeasible,
    /// An equivalent constraint with coprime coefficients
    Constraint(Constraint),
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(expr: AffineExpr, kind: ConstraintKind) -> Self {
        Self { expr, kind }
    }

    /// Create an inequality constraint: expr >= 0
    pub fn ge_zero(expr: AffineExpr) -> Self {
        Self::new(expr, ConstraintKind::Inequality)
    }

    /// Create an equality constraint: expr = 0
    pub fn eq_zero(expr: AffineExpr) -> Self {
        Self::new(expr, ConstraintKind::Equality)
    }

    /// Create a constraint: lhs >= rhs
    pub fn ge(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(lhs - rhs)
    }

    /// Create a constraint: lhs <= rhs
    pub fn le(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(rhs - lhs)
    }

    /// Create a constraint: lhs < rhs, i.e. rhs - lhs - 1 >= 0 over integers
    pub fn lt(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(rhs - lhs - AffineExpr::constant(1, 0))
    }

    /// Create a constraint: lhs = rhs
    pub fn eq(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::eq_zero(lhs - rhs)
    }

    /// Create a lower bound constraint: col >= lower
    pub fn lower_bound(col: usize, lower: i64, n_cols: usize) -> Self {
        Self::ge_zero(AffineExpr::var(col, n_cols).add_constant(-lower))
    }

    /// Create an upper bound constraint: col <= upper
    pub fn upper_bound(col: usize, upper: i64, n_cols: usize) -> Self {
        Self::ge_zero((-AffineExpr::var(col, n_cols)).add_constant(upper))
    }

    /// Check if this is an equality constraint.
    pub fn is_equality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Equality)
    }

    /// Check if this is an inequality constraint.
    pub fn is_inequality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Inequality)
    }

    /// Coefficient of a column.
    pub fn coeff(&self, col: usize) -> i64 {
        self.expr.coeff(col)
    }

    /// Check if this constraint is satisfied by the given point.
    pub fn is_satisfied(&self, values: &[i64]) -> bool {
        let value = self.expr.evaluate(values);
        match self.kind {
            ConstraintKind::Inequality => value >= 0,
            ConstraintKind::Equality => value == 0,
        }
    }

    /// The integer negation of an inequality: `-expr - 1 >= 0`.
    ///
    /// Equalities have a two-piece negation, see [`Constraint::negate_pieces`].
    pub fn negate(&self) -> Self {
        Self::ge_zero((-self.expr.clone()).add_constant(-1))
    }

    /// The negation as a disjunction of inequalities.
    pub fn negate_pieces(&self) -> Vec<Constraint> {
        match self.kind {
            ConstraintKind::Inequality => vec![self.negate()],
            ConstraintKind::Equality => vec![
                Self::ge_zero(self.expr.add_constant(-1)),
                Self::ge_zero((-self.expr.clone()).add_constant(-1)),
            ],
        }
    }

    /// Normalize over integer columns: divide by the coefficient GCD,
    /// tightening the constant of inequalities.
    pub fn normalize(&self) -> Normalized {
        let g = self.expr.coeff_gcd().abs();
        if g == 0 {
            let holds = match self.kind {
                ConstraintKind::Inequality => self.expr.constant >= 0,
                ConstraintKind::Equality => self.expr.constant == 0,
            };
            return if holds { Normalized::Trivial } else { Normalized::Infeasible };
        }
        if g == 1 {
            return Normalized::Constraint(self.clone());
        }
        let coeffs = self.expr.coeffs.iter().map(|&c| c / g).collect();
        let constant = match self.kind {
            ConstraintKind::Inequality => floor_div(self.expr.constant, g),
            ConstraintKind::Equality => {
                if !self.expr.constant.is_multiple_of(&g) {
                    return Normalized::Infeasible;
                }
                self.expr.constant / g
            }
        };
        Normalized::Constraint(Self::new(AffineExpr::from_coeffs(coeffs, constant), self.kind))
    }

    /// Format with column names as `lhs >= rhs` or `lhs = rhs`, moving
    /// negative terms to the right-hand side.
    pub fn to_string_with_names(&self, names: &[String]) -> String {
        let n = self.expr.n_cols();
        let mut lhs = AffineExpr::zero(n);
        let mut rhs = AffineExpr::zero(n);
        for (i, &c) in self.expr.coeffs.iter().enumerate() {
            if c > 0 {
                lhs.coeffs[i] = c;
            } else if c < 0 {
                rhs.coeffs[i] = -c;
            }
        }
        if self.expr.constant > 0 {
            lhs.constant = self.expr.constant;
        } else {
            rhs.constant = -self.expr.constant;
        }
        let op = match self.kind {
            ConstraintKind::Inequality => ">=",
            ConstraintKind::Equality => "=",
        };
        format!(
            "{} {} {}",
            lhs.to_string_with_names(names),
            op,
            rhs.to_string_with_names(names)
        )
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_names(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(coeffs: Vec<i64>, constant: i64) -> AffineExpr {
        AffineExpr::from_coeffs(coeffs, constant)
    }

    #[test]
    fn test_bounds_satisfied() {
        let lb = Constraint::lower_bound(0, 0, 1);
        let ub = Constraint::upper_bound(0, 9, 1);
        assert!(lb.is_satisfied(&[0]));
        assert!(!lb.is_satisfied(&[-1]));
        assert!(ub.is_satisfied(&[9]));
        assert!(!ub.is_satisfied(&[10]));
    }

    #[test]
    fn test_normalize_tightens_inequality() {
        // 2x - 3 >= 0  ==>  x - 2 >= 0
        let c = Constraint::ge_zero(expr(vec![2], -3));
        match c.normalize() {
            Normalized::Constraint(n) => {
                assert_eq!(n.expr.coeffs, vec![1]);
                assert_eq!(n.expr.constant, -2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_normalize_detects_infeasible_equality() {
        // 2x + 1 = 0 has no integer solution
        let c = Constraint::eq_zero(expr(vec![2], 1));
        assert_eq!(c.normalize(), Normalized::Infeasible);
        let t = Constraint::ge_zero(expr(vec![0], 3));
        assert_eq!(t.normalize(), Normalized::Trivial);
    }

    #[test]
    fn test_negate_pieces() {
        let c = Constraint::eq_zero(expr(vec![1], -2));
        let pieces = c.negate_pieces();
        assert_eq!(pieces.len(), 2);
        assert!(pieces[0].is_satisfied(&[3]));
        assert!(pieces[1].is_satisfied(&[1]));
        assert!(!pieces[0].is_satisfied(&[2]) && !pieces[1].is_satisfied(&[2]));
    }

    #[test]
    fn test_display_moves_negative_terms() {
        let c = Constraint::ge_zero(expr(vec![-1, 1], -1));
        assert_eq!(c.to_string_with_names(&["i".into(), "N".into()]), "N >= i + 1");
    }
}
