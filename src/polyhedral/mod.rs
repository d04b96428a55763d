//! Polyhedral data structures and operations.
//!
//! This module provides the integer-set engine the rest of the crate is
//! built on:
//! - Affine expressions and constraints over `[params | in | out | locals]`
//! - Basic sets with integer division locals, solved by an Omega-style core
//! - Unions of basic sets, relations and named unions of both
//! - Piecewise quasi-affine functions
//! - A reader for the textual notation printed by `Display`

pub mod space;
pub mod expr;
pub mod constraint;
pub mod omega;
pub mod basic;
pub mod set;
pub mod map;
pub mod union;
pub mod pw_aff;
pub mod parse;
pub mod ctx;

pub use space::{Space, SpaceKind};
pub use expr::AffineExpr;
pub use constraint::{Constraint, ConstraintKind};
pub use basic::BasicSet;
pub use set::IntegerSet;
pub use map::IntegerMap;
pub use union::{UnionMap, UnionSet};
pub use pw_aff::{CmpOp, PwAff};
pub use parse::{parse_map, parse_set, parse_union_map, parse_union_set};
pub use ctx::PolyCtx;
