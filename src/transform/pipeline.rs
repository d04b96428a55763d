//! Optimization pipeline of one region.
//!
//! The stages run in a fixed order over one region model: detection and
//! model construction (when starting from a host function), reduction
//! detection, simplification, dependence analysis, an optional schedule
//! import, schedule optimization, AST generation and annotation. Every stage
//! either refines the model or leaves it as it was; a stage that cannot
//! complete ends the run with the original schedule in place.

use crate::analysis::builder::build_scop;
use crate::analysis::dependence::Dependences;
use crate::analysis::reduction::detect_reductions;
use crate::analysis::region::RegionDetector;
use crate::analysis::simplify::{simplify, SimplifyStats};
use crate::codegen::{annotate, Ast, AstBuilder};
use crate::config::Config;
use crate::ir::host::HostFunction;
use crate::ir::pir::Scop;
use crate::polyhedral::PolyCtx;
use crate::transform::jscop::{import_jscop, JscopDocument};
use crate::transform::optimizer::{optimize_scop, OptimizeOutcome};
use crate::utils::errors::{Diagnostic, PolyScopError};
use log::{debug, info, warn};
use std::fmt;

/// A stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Find maximal regions of static control
    Detection,
    /// Build domains, accesses and assumptions of a region
    ModelBuilding,
    /// Mark reduction-like accesses
    Reductions,
    /// Drop empty statements and dead accesses
    Simplification,
    /// Compute RAW, WAR and WAW dependences
    Dependences,
    /// Replace schedules and accesses from an exchange document
    Import,
    /// Compute a new schedule tree
    Optimization,
    /// Generate the loop AST and the run-time check
    AstGeneration,
    /// Attach parallel and vector annotations to the AST
    Annotation,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Detection => "detection",
            Stage::ModelBuilding => "model-building",
            Stage::Reductions => "reductions",
            Stage::Simplification => "simplification",
            Stage::Dependences => "dependences",
            Stage::Import => "import",
            Stage::Optimization => "optimization",
            Stage::AstGeneration => "ast-generation",
            Stage::Annotation => "annotation",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineResult {
    /// Stages that completed, in order
    pub applied_stages: Vec<Stage>,
    /// Whether the region model was changed by any stage
    pub modified: bool,
    pub outcome: OptimizeOutcome,
    pub simplify: SimplifyStats,
    /// Number of accesses marked as reduction-like
    pub reductions: usize,
    /// The annotated AST; `None` when the original code stays in place
    pub ast: Option<Ast>,
    /// Dependences of the final schedule, when they could be computed
    pub dependences: Option<Dependences>,
    pub diagnostics: Vec<Diagnostic>,
}

impl PipelineResult {
    fn new() -> Self {
        Self {
            applied_stages: Vec::new(),
            modified: false,
            outcome: OptimizeOutcome::NotProfitable,
            simplify: SimplifyStats::default(),
            reductions: 0,
            ast: None,
            dependences: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.applied_stages.contains(&stage)
    }
}

/// Optimization pipeline.
pub struct Pipeline {
    config: Config,
    import: Option<JscopDocument>,
    codegen_unmodified: bool,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration.
    pub fn new(config: Config) -> Self {
        Self { config, import: None, codegen_unmodified: false }
    }

    /// Create a pipeline with default configuration.
    pub fn default_pipeline() -> Self {
        Self::new(Config::default())
    }

    /// Apply `doc` to the region before scheduling. An imported schedule
    /// replaces the optimizer.
    pub fn with_import(mut self, doc: JscopDocument) -> Self {
        self.import = Some(doc);
        self
    }

    /// Generate an AST even when no stage modified the region.
    pub fn with_unmodified_codegen(mut self, enabled: bool) -> Self {
        self.codegen_unmodified = enabled;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Detect the region of `func`, build its model and optimize it.
    pub fn run_function(&self, func: &HostFunction) -> Result<(Scop, PipelineResult), PolyScopError> {
        let region = RegionDetector::new(func)
            .with_non_affine_subregions(self.config.scop.allow_non_affine)
            .detect_function()?;
        let (mut scop, diagnostics) = build_scop(func, &region, &self.config.scop, PolyCtx::unlimited());
        info!("{}: built region model with {} statement(s)", scop.name, scop.statements.len());
        let reductions = detect_reductions(&mut scop, func);

        let mut result = self.run(&mut scop, Some(func))?;
        let mut stages = vec![Stage::Detection, Stage::ModelBuilding, Stage::Reductions];
        stages.append(&mut result.applied_stages);
        result.applied_stages = stages;
        result.reductions = reductions;
        let mut all = diagnostics;
        all.append(&mut result.diagnostics);
        result.diagnostics = all;
        Ok((scop, result))
    }

    /// Run the stages after model construction on `scop`.
    ///
    /// Without `func`, simplification only removes what the region model
    /// alone proves redundant.
    pub fn run(&self, scop: &mut Scop, func: Option<&HostFunction>) -> Result<PipelineResult, PolyScopError> {
        let mut result = PipelineResult::new();

        if scop.is_infeasible() {
            info!("{}: run-time check is always false, keeping the original code", scop.name);
            result.outcome = OptimizeOutcome::Skipped("infeasible region".to_string());
            return Ok(result);
        }

        result.simplify = simplify(scop, func);
        if result.simplify.changed() {
            debug!("{}: simplification: {:?}", scop.name, result.simplify);
        }
        result.applied_stages.push(Stage::Simplification);

        let mut deps = Dependences::new(&self.config.dependence);
        if let Err(e) = deps.ensure(scop) {
            warn!("{}: dependences unavailable: {}", scop.name, e);
            result.outcome = OptimizeOutcome::Skipped(format!("dependences unavailable: {}", e));
            result.modified = scop.modified;
            return Ok(result);
        }
        result.applied_stages.push(Stage::Dependences);

        let mut imported_schedule = false;
        if let Some(doc) = &self.import {
            let before = scop.schedule_map();
            result.diagnostics.extend(import_jscop(scop, &mut deps, doc));
            imported_schedule = !scop.schedule_map().is_equal(&before);
            result.applied_stages.push(Stage::Import);
        }

        result.outcome = if imported_schedule {
            info!("{}: using the imported schedule", scop.name);
            OptimizeOutcome::Skipped("schedule imported".to_string())
        } else {
            optimize_scop(scop, &mut deps, &self.config)
        };
        if result.outcome.is_optimized() {
            result.applied_stages.push(Stage::Optimization);
        }
        result.modified = scop.modified;

        if result.modified || self.codegen_unmodified {
            match AstBuilder::new(scop).and_then(|builder| builder.build()) {
                Ok(mut ast) => {
                    result.applied_stages.push(Stage::AstGeneration);
                    annotate(&mut ast, scop, &mut deps, &self.config.codegen)?;
                    result.applied_stages.push(Stage::Annotation);
                    result.ast = Some(ast);
                }
                Err(e) => {
                    warn!("{}: no AST: {}", scop.name, e);
                    result.diagnostics.push(
                        Diagnostic::error(format!("code generation failed: {}", e))
                            .with_note("the original code is kept"),
                    );
                }
            }
        } else {
            debug!("{}: region unchanged, no AST generated", scop.name);
        }
        result.dependences = Some(deps);
        Ok(result)
    }
}

/// Optimize `scop` with the default configuration.
pub fn quick_optimize(scop: &mut Scop) -> Result<PipelineResult, PolyScopError> {
    Pipeline::default_pipeline().run(scop, None)
}
