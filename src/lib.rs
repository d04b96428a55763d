//! # polyscop - Polyhedral region modeling and schedule optimization
//!
//! A polyhedral optimizer for affine loop nests:
//! - Region detection and construction of the region model (Scop)
//! - Affine translation of symbolic expressions with recorded assumptions
//! - Exact dependence analysis with reduction support
//! - Pluto-style scheduling, tiling and pre-vectorization
//! - Annotated AST generation with a run-time check
//!
//! ## Architecture
//!
//! ```text
//! Host IR → Region detection → Scop → Dependences → Schedule → AST → Emitter
//!                                 ↑
//!                          JSON scop import
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use polyscop::prelude::*;
//!
//! let (mut scop, _) = scop_from_jscop(&std::fs::read_to_string("matmul.jscop")?)?;
//! let result = Pipeline::new(Config::default()).run(&mut scop, None)?;
//! if let Some(ast) = &result.ast {
//!     println!("{}", emit(ast, &scop, CEmitter::new(), true)?);
//! }
//! ```

#![warn(clippy::all)]

pub mod polyhedral;
pub mod ir;
pub mod analysis;
pub mod transform;
pub mod codegen;
pub mod config;
pub mod utils;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::analysis::{
        build_scop, detect_reductions, simplify, DepKinds, DependenceKind, Dependences, RegionDetector,
    };
    pub use crate::codegen::{annotate, emit, Ast, AstBuilder, AstNode, CEmitter, CodeEmitter};
    pub use crate::config::{Config, RawOptions};
    pub use crate::ir::host::{FunctionBuilder, HostFunction};
    pub use crate::ir::pir::{AccessType, AssumptionKind, MemoryAccess, Scop, ScopStmt};
    pub use crate::polyhedral::{
        parse_map, parse_set, AffineExpr, Constraint, IntegerMap, IntegerSet, PolyCtx, Space, UnionMap, UnionSet,
    };
    pub use crate::transform::{
        export_jscop, import_jscop, optimize_scop, scop_from_jscop, JscopDocument, OptimizeOutcome, Pipeline,
        PipelineResult, ScheduleTree,
    };
    pub use crate::utils::errors::*;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
