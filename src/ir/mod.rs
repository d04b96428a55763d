//! Intermediate representations.
//!
//! Two levels:
//! - Host IR: the control-flow graph the regions are detected in, with
//!   symbolic expressions for loop bounds and subscripts
//! - PIR: the polyhedral model of a detected region (`Scop`)

pub mod scev;
pub mod host;
pub mod pir;

pub use host::{BlockId, ElementType, FunctionBuilder, HostFunction, InstId};
pub use pir::*;
pub use scev::{SymExpr, ValueRef};
