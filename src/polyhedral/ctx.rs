//! Shared operation budget for expensive polyhedral computations.

use crate::utils::errors::{PolyError, PolyErrorKind};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Budget {
    max_operations: Cell<Option<u64>>,
    used: Cell<u64>,
}

/// Handle to a budget shared by every stage working on one Scop.
///
/// Cloning the context shares the counter. Exceeding the budget makes
/// [`PolyCtx::charge`] fail; callers are expected to abandon the current
/// computation and fall back to a conservative result.
#[derive(Debug, Clone, Default)]
pub struct PolyCtx {
    budget: Rc<Budget>,
}

impl PolyCtx {
    /// A context without limit.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// A context that allows `max_operations` units of work.
    pub fn with_max_operations(max_operations: u64) -> Self {
        let ctx = Self::default();
        ctx.set_max_operations(Some(max_operations));
        ctx
    }

    pub fn set_max_operations(&self, max: Option<u64>) {
        self.budget.max_operations.set(max);
    }

    pub fn max_operations(&self) -> Option<u64> {
        self.budget.max_operations.get()
    }

    /// Units consumed so far.
    pub fn used(&self) -> u64 {
        self.budget.used.get()
    }

    pub fn reset(&self) {
        self.budget.used.set(0);
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.max_operations(), Some(max) if self.used() >= max)
    }

    /// Consume `units` of work.
    pub fn charge(&self, units: u64) -> Result<(), PolyError> {
        let used = self.used().saturating_add(units);
        self.budget.used.set(used);
        match self.max_operations() {
            Some(max) if used > max => Err(PolyError::new(
                PolyErrorKind::BudgetExceeded,
                format!("operation budget of {} exceeded", max),
            )),
            _ => Ok(()),
        }
    }

    /// Run `f` with a temporary limit of `max_operations` fresh units,
    /// restoring the previous limit afterwards.
    pub fn scoped<T>(&self, max_operations: Option<u64>, f: impl FnOnce(&PolyCtx) -> T) -> T {
        let saved_max = self.max_operations();
        let saved_used = self.used();
        self.reset();
        self.set_max_operations(max_operations);
        let result = f(self);
        self.set_max_operations(saved_max);
        self.budget.used.set(saved_used.saturating_add(self.used()));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_shared_between_clones() {
        let ctx = PolyCtx::with_max_operations(10);
        let other = ctx.clone();
        assert!(ctx.charge(6).is_ok());
        assert!(other.charge(4).is_ok());
        let err = ctx.charge(1).unwrap_err();
        assert_eq!(err.kind, PolyErrorKind::BudgetExceeded);
        assert!(other.is_exhausted());
    }

    #[test]
    fn test_scoped_limit_restores() {
        let ctx = PolyCtx::unlimited();
        ctx.charge(100).unwrap();
        let failed = ctx.scoped(Some(5), |c| c.charge(6).is_err());
        assert!(failed);
        assert_eq!(ctx.max_operations(), None);
        assert_eq!(ctx.used(), 106);
    }
}
