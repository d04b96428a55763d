//! Utility modules shared by the analyses and transformations.
//!
//! - Error types and diagnostics
//! - Exact rational matrices

pub mod errors;
pub mod matrix;

pub use errors::*;
