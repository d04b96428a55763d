//! Analysis passes over host functions and region models.

pub mod affinator;
pub mod region;
pub mod builder;
pub mod dependence;
pub mod reduction;
pub mod simplify;

pub use affinator::{AffineResult, Affinator, Location};
pub use builder::{build_scop, ScopBuilder};
pub use dependence::{DepKinds, DependenceKind, DependenceState, Dependences, Direction};
pub use reduction::detect_reductions;
pub use region::{DetectedRegion, RegionDetector, RegionElement};
pub use simplify::{simplify, SimplifyStats};
