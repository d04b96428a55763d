//! Symbolic scalar expressions.
//!
//! A [`SymExpr`] describes how an integer value evolves across loop
//! iterations: constants, opaque values, sums, products, add-recurrences
//! `{start,+,step}<loop>` and the cast/min/max/division forms an
//! optimizing compiler keeps around for induction variables.

use crate::ir::host::{BlockId, InstId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// An opaque value a symbolic expression can refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueRef {
    /// A function argument
    Argument(String),
    /// The result of an instruction
    Inst(InstId),
}

impl fmt::Display for ValueRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueRef::Argument(name) => write!(f, "%{}", name),
            ValueRef::Inst(id) => write!(f, "%v{}", id.0),
        }
    }
}

/// Symbolic integer expression with bit widths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymExpr {
    Constant { value: i64, bits: u32 },
    Unknown { value: ValueRef, bits: u32 },
    Add { ops: Vec<SymExpr>, nsw: bool },
    Mul { ops: Vec<SymExpr>, nsw: bool },
    /// `{start,+,step}<loop>`, the loop named by its header block
    AddRec { start: Box<SymExpr>, step: Box<SymExpr>, loop_header: BlockId, nsw: bool },
    SignExtend { op: Box<SymExpr>, bits: u32 },
    ZeroExtend { op: Box<SymExpr>, bits: u32 },
    Truncate { op: Box<SymExpr>, bits: u32 },
    SMax(Vec<SymExpr>),
    SMin(Vec<SymExpr>),
    UMax(Vec<SymExpr>),
    UDiv { lhs: Box<SymExpr>, rhs: Box<SymExpr> },
    SDiv { lhs: Box<SymExpr>, rhs: Box<SymExpr> },
    SRem { lhs: Box<SymExpr>, rhs: Box<SymExpr> },
}

impl SymExpr {
    /// A 64-bit constant.
    pub fn constant(value: i64) -> Self {
        SymExpr::Constant { value, bits: 64 }
    }

    /// A 64-bit function argument.
    pub fn arg(name: &str) -> Self {
        SymExpr::Unknown { value: ValueRef::Argument(name.to_string()), bits: 64 }
    }

    /// The 64-bit value of an instruction.
    pub fn value(inst: InstId) -> Self {
        SymExpr::Unknown { value: ValueRef::Inst(inst), bits: 64 }
    }

    /// Sum without a no-signed-wrap guarantee.
    pub fn add(lhs: SymExpr, rhs: SymExpr) -> Self {
        SymExpr::Add { ops: vec![lhs, rhs], nsw: false }
    }

    pub fn sub(lhs: SymExpr, rhs: SymExpr) -> Self {
        Self::add(lhs, Self::mul(Self::constant(-1), rhs))
    }

    /// Product without a no-signed-wrap guarantee.
    pub fn mul(lhs: SymExpr, rhs: SymExpr) -> Self {
        SymExpr::Mul { ops: vec![lhs, rhs], nsw: false }
    }

    /// `{start,+,step}<loop_header>`.
    pub fn addrec(start: SymExpr, step: SymExpr, loop_header: BlockId) -> Self {
        SymExpr::AddRec { start: Box::new(start), step: Box::new(step), loop_header, nsw: false }
    }

    /// The canonical induction variable `{0,+,1}<loop_header>`, marked nsw.
    pub fn induction(loop_header: BlockId) -> Self {
        Self::addrec(Self::constant(0), Self::constant(1), loop_header).with_nsw()
    }

    pub fn sext(op: SymExpr, bits: u32) -> Self {
        SymExpr::SignExtend { op: Box::new(op), bits }
    }

    pub fn zext(op: SymExpr, bits: u32) -> Self {
        SymExpr::ZeroExtend { op: Box::new(op), bits }
    }

    pub fn trunc(op: SymExpr, bits: u32) -> Self {
        SymExpr::Truncate { op: Box::new(op), bits }
    }

    pub fn sdiv(lhs: SymExpr, rhs: SymExpr) -> Self {
        SymExpr::SDiv { lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn srem(lhs: SymExpr, rhs: SymExpr) -> Self {
        SymExpr::SRem { lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn udiv(lhs: SymExpr, rhs: SymExpr) -> Self {
        SymExpr::UDiv { lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    /// Mark an add, mul or add-recurrence as never wrapping in signed arithmetic.
    pub fn with_nsw(self) -> Self {
        match self {
            SymExpr::Add { ops, .. } => SymExpr::Add { ops, nsw: true },
            SymExpr::Mul { ops, .. } => SymExpr::Mul { ops, nsw: true },
            SymExpr::AddRec { start, step, loop_header, .. } => {
                SymExpr::AddRec { start, step, loop_header, nsw: true }
            }
            other => other,
        }
    }

    /// Change the bit width of a leaf.
    pub fn with_bits(self, bits: u32) -> Self {
        match self {
            SymExpr::Constant { value, .. } => SymExpr::Constant { value, bits },
            SymExpr::Unknown { value, .. } => SymExpr::Unknown { value, bits },
            other => other,
        }
    }

    /// Whether the expression carries the no-signed-wrap flag.
    pub fn is_nsw(&self) -> bool {
        match self {
            SymExpr::Add { nsw, .. } | SymExpr::Mul { nsw, .. } | SymExpr::AddRec { nsw, .. } => *nsw,
            _ => false,
        }
    }

    pub fn bit_width(&self) -> u32 {
        match self {
            SymExpr::Constant { bits, .. }
            | SymExpr::Unknown { bits, .. }
            | SymExpr::SignExtend { bits, .. }
            | SymExpr::ZeroExtend { bits, .. }
            | SymExpr::Truncate { bits, .. } => *bits,
            SymExpr::Add { ops, .. }
            | SymExpr::Mul { ops, .. }
            | SymExpr::SMax(ops)
            | SymExpr::SMin(ops)
            | SymExpr::UMax(ops) => ops.first().map_or(64, |o| o.bit_width()),
            SymExpr::AddRec { start, .. } => start.bit_width(),
            SymExpr::UDiv { lhs, .. } | SymExpr::SDiv { lhs, .. } | SymExpr::SRem { lhs, .. } => lhs.bit_width(),
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        match self {
            SymExpr::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    /// Direct sub-expressions.
    pub fn operands(&self) -> Vec<&SymExpr> {
        match self {
            SymExpr::Constant { .. } | SymExpr::Unknown { .. } => Vec::new(),
            SymExpr::Add { ops, .. }
            | SymExpr::Mul { ops, .. }
            | SymExpr::SMax(ops)
            | SymExpr::SMin(ops)
            | SymExpr::UMax(ops) => ops.iter().collect(),
            SymExpr::AddRec { start, step, .. } => vec![start, step],
            SymExpr::SignExtend { op, .. } | SymExpr::ZeroExtend { op, .. } | SymExpr::Truncate { op, .. } => {
                vec![op]
            }
            SymExpr::UDiv { lhs, rhs } | SymExpr::SDiv { lhs, rhs } | SymExpr::SRem { lhs, rhs } => vec![lhs, rhs],
        }
    }

    /// Every opaque value referenced.
    pub fn unknowns(&self) -> BTreeSet<ValueRef> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let SymExpr::Unknown { value, .. } = e {
                out.insert(value.clone());
            }
        });
        out
    }

    /// Headers of every loop an add-recurrence refers to.
    pub fn loops(&self) -> BTreeSet<BlockId> {
        let mut out = BTreeSet::new();
        self.visit(&mut |e| {
            if let SymExpr::AddRec { loop_header, .. } = e {
                out.insert(*loop_header);
            }
        });
        out
    }

    /// Pre-order walk.
    pub fn visit<F: FnMut(&SymExpr)>(&self, f: &mut F) {
        f(self);
        for op in self.operands() {
            op.visit(f);
        }
    }

    /// Evaluate with the given values for unknowns and loop iteration counts,
    /// in unbounded arithmetic.
    pub fn evaluate(
        &self,
        value_of: &dyn Fn(&ValueRef) -> Option<i64>,
        iteration_of: &dyn Fn(BlockId) -> Option<i64>,
    ) -> Option<i64> {
        let v = match self {
            SymExpr::Constant { value, .. } => *value,
            SymExpr::Unknown { value, .. } => value_of(value)?,
            SymExpr::Add { ops, .. } => {
                let mut sum = 0i64;
                for op in ops {
                    sum = sum.checked_add(op.evaluate(value_of, iteration_of)?)?;
                }
                sum
            }
            SymExpr::Mul { ops, .. } => {
                let mut prod = 1i64;
                for op in ops {
                    prod = prod.checked_mul(op.evaluate(value_of, iteration_of)?)?;
                }
                prod
            }
            SymExpr::AddRec { start, step, loop_header, .. } => {
                let it = iteration_of(*loop_header)?;
                let s = start.evaluate(value_of, iteration_of)?;
                let d = step.evaluate(value_of, iteration_of)?;
                s.checked_add(d.checked_mul(it)?)?
            }
            SymExpr::SignExtend { op, .. } | SymExpr::ZeroExtend { op, .. } | SymExpr::Truncate { op, .. } => {
                op.evaluate(value_of, iteration_of)?
            }
            SymExpr::SMax(ops) | SymExpr::UMax(ops) => {
                let mut best = None;
                for op in ops {
                    let v = op.evaluate(value_of, iteration_of)?;
                    best = Some(best.map_or(v, |b: i64| b.max(v)));
                }
                best?
            }
            SymExpr::SMin(ops) => {
                let mut best = None;
                for op in ops {
                    let v = op.evaluate(value_of, iteration_of)?;
                    best = Some(best.map_or(v, |b: i64| b.min(v)));
                }
                best?
            }
            SymExpr::UDiv { lhs, rhs } | SymExpr::SDiv { lhs, rhs } => {
                lhs.evaluate(value_of, iteration_of)?.checked_div(rhs.evaluate(value_of, iteration_of)?)?
            }
            SymExpr::SRem { lhs, rhs } => {
                lhs.evaluate(value_of, iteration_of)?.checked_rem(rhs.evaluate(value_of, iteration_of)?)?
            }
        };
        Some(v)
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, ops: &[SymExpr], sep: &str| -> fmt::Result {
            write!(f, "(")?;
            for (i, op) in ops.iter().enumerate() {
                if i > 0 {
                    write!(f, "{}", sep)?;
                }
                write!(f, "{}", op)?;
            }
            write!(f, ")")
        };
        match self {
            SymExpr::Constant { value, .. } => write!(f, "{}", value),
            SymExpr::Unknown { value, .. } => write!(f, "{}", value),
            SymExpr::Add { ops, nsw } => {
                join(f, ops, " + ")?;
                if *nsw {
                    write!(f, "<nsw>")?;
                }
                Ok(())
            }
            SymExpr::Mul { ops, nsw } => {
                join(f, ops, " * ")?;
                if *nsw {
                    write!(f, "<nsw>")?;
                }
                Ok(())
            }
            SymExpr::AddRec { start, step, loop_header, nsw } => {
                write!(f, "{{{},+,{}}}<{}>", start, step, loop_header)?;
                if *nsw {
                    write!(f, "<nsw>")?;
                }
                Ok(())
            }
            SymExpr::SignExtend { op, bits } => write!(f, "(sext i{} {})", bits, op),
            SymExpr::ZeroExtend { op, bits } => write!(f, "(zext i{} {})", bits, op),
            SymExpr::Truncate { op, bits } => write!(f, "(trunc i{} {})", bits, op),
            SymExpr::SMax(ops) => {
                write!(f, "smax")?;
                join(f, ops, ", ")
            }
            SymExpr::SMin(ops) => {
                write!(f, "smin")?;
                join(f, ops, ", ")
            }
            SymExpr::UMax(ops) => {
                write!(f, "umax")?;
                join(f, ops, ", ")
            }
            SymExpr::UDiv { lhs, rhs } => write!(f, "({} /u {})", lhs, rhs),
            SymExpr::SDiv { lhs, rhs } => write!(f, "({} /s {})", lhs, rhs),
            SymExpr::SRem { lhs, rhs } => write!(f, "({} %s {})", lhs, rhs),
        }
    }
}
