//! Schedule transformations of region models.
//!
//! The scheduler computes a new schedule tree from the dependences, the
//! tiling pass restructures its bands and the optimizer installs the result
//! when it is legal and differs from the current schedule. Schedules and
//! access relations can also be exchanged through the JSON scop format.

pub mod schedule_tree;
pub mod ilp;
pub mod scheduler;
pub mod tiling;
pub mod optimizer;
pub mod jscop;
pub mod pipeline;

pub use jscop::{export_jscop, import_jscop, scop_from_jscop, JscopDocument};
pub use optimizer::{compute_schedule, optimize_scop, OptimizeOutcome};
pub use pipeline::{quick_optimize, Pipeline, PipelineResult, Stage};
pub use schedule_tree::{Band, SchedAff, ScheduleNode, ScheduleTree};
pub use scheduler::Scheduler;
pub use tiling::{optimize_bands, SIMD_MARK};
