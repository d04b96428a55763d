//! polyscop command line interface
//!
//! Usage:
//!   polyscop [OPTIONS] <input-file>
//!   polyscop --help
//!
//! Examples:
//!   polyscop matmul.jscop                          # Optimize with defaults
//!   polyscop --vectorizer=polly matmul.jscop       # Pre-vectorize the point loops
//!   polyscop --tile-sizes=64,64,32 gemm.jscop      # Custom tile sizes
//!   polyscop --import=manual.jscop gemm.jscop      # Use a hand-written schedule
//!   polyscop --emit=jscop -o out.jscop gemm.jscop  # Export the optimized region

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info, warn};
use polyscop::codegen::{emit, CEmitter};
use polyscop::config::{Config, RawOptions};
use polyscop::ir::pir::Scop;
use polyscop::transform::{export_jscop, scop_from_jscop, JscopDocument, Pipeline, PipelineResult};
use std::fs;
use std::path::PathBuf;

/// polyscop - polyhedral optimization of affine regions
#[derive(Parser, Debug)]
#[command(name = "polyscop")]
#[command(version)]
#[command(about = "Polyhedral dependence analysis and schedule optimization of JSON scops", long_about = None)]
struct Cli {
    /// Region to optimize (.jscop format)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Configuration file (JSON); the flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Apply the context, schedule and accesses of this file before scheduling
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Fusion strategy (min, max)
    #[arg(long)]
    fusion: Option<String>,

    /// Maximize the depth of the outermost band (yes, no)
    #[arg(long)]
    maximize_band_depth: Option<String>,

    /// Dependences to optimize for (all, raw)
    #[arg(long)]
    optimize_only: Option<String>,

    /// Dependence analysis type (value-based, memory-based)
    #[arg(long)]
    analysis_type: Option<String>,

    /// Simplify dependences against the domains (yes, no)
    #[arg(long)]
    simplify_deps: Option<String>,

    /// Vectorizer (none, basic, polly)
    #[arg(long)]
    vectorizer: Option<String>,

    /// Require a coincident outermost band (yes, no)
    #[arg(long)]
    outer_coincidence: Option<String>,

    /// Bound on schedule coefficients, -1 for none
    #[arg(long, allow_hyphen_values = true)]
    max_coefficient: Option<i64>,

    /// Bound on schedule constant terms, -1 for none
    #[arg(long, allow_hyphen_values = true)]
    max_constant_term: Option<i64>,

    /// First-level tiling (yes, no)
    #[arg(long)]
    tiling: Option<String>,

    /// Default first-level tile size
    #[arg(long)]
    tile_size: Option<i64>,

    /// First-level tile sizes (comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    tile_sizes: Option<Vec<i64>>,

    /// Second-level tiling (yes, no)
    #[arg(long)]
    second_level_tiling: Option<String>,

    /// Register tiling (yes, no)
    #[arg(long)]
    register_tiling: Option<String>,

    /// Width of the pre-vectorized loops
    #[arg(long)]
    prevect_width: Option<i64>,

    /// Extra constraints on the parameters, e.g. "[N] -> { : N > 16 }"
    #[arg(long)]
    context: Option<String>,

    /// Operation budget of dependence analysis, 0 for none
    #[arg(long)]
    max_operations: Option<i64>,

    /// What to emit
    #[arg(long, default_value = "all")]
    emit: EmitKind,

    /// Generate code even when the schedule is unchanged
    #[arg(long)]
    always_codegen: bool,

    /// Print the access relations of each statement in the generated code
    #[arg(long)]
    print_accesses: bool,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmitKind {
    /// The region model
    Scop,
    /// Dependences
    Deps,
    /// The final schedule
    Schedule,
    /// Annotated pseudo-C
    Code,
    /// The final region in the JSON scop format
    Jscop,
    /// Dependences, schedule and code
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("polyscop v{}", polyscop::VERSION);
    debug!("Input file: {:?}", cli.input);

    let text = fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?;
    let (mut scop, diags) =
        scop_from_jscop(&text).with_context(|| format!("Failed to parse scop from {:?}", cli.input))?;
    for diag in &diags {
        warn!("{}", diag.message);
    }

    let config = build_config(&cli)?;
    debug!("Configuration: {:?}", config);

    let mut pipeline = Pipeline::new(config).with_unmodified_codegen(cli.always_codegen);
    if let Some(path) = &cli.import {
        let doc_text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read import file: {:?}", path))?;
        let doc = JscopDocument::parse(&doc_text).with_context(|| format!("Failed to parse {:?}", path))?;
        pipeline = pipeline.with_import(doc);
    }

    info!("Optimizing {}...", scop.name);
    let result = match pipeline.run(&mut scop, None) {
        Ok(result) => result,
        Err(e) => {
            error!("Optimization failed: {}", e);
            write_output(&cli.output, &format!("// {}: original code kept\n", scop.name))?;
            return Ok(());
        }
    };
    for diag in &result.diagnostics {
        warn!("{}", diag.message);
        for note in &diag.notes {
            warn!("  note: {}", note);
        }
    }
    info!("{}: {} (stages: {:?})", scop.name, result.outcome, result.applied_stages);

    let output = render(&cli, &scop, &result, pipeline.config().codegen.emit_run_condition)?;
    write_output(&cli.output, &output)
}

fn build_config(cli: &Cli) -> Result<Config> {
    let base = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration file: {:?}", path))?;
            Config::from_json(&text).with_context(|| format!("Invalid configuration file: {:?}", path))?
        }
        None => Config::default(),
    };
    let raw = RawOptions {
        fusion: cli.fusion.clone(),
        maximize_band_depth: cli.maximize_band_depth.clone(),
        optimize_only: cli.optimize_only.clone(),
        analysis_type: cli.analysis_type.clone(),
        simplify_deps: cli.simplify_deps.clone(),
        vectorizer: cli.vectorizer.clone(),
        outer_coincidence: cli.outer_coincidence.clone(),
        max_coefficient: cli.max_coefficient,
        max_constant_term: cli.max_constant_term,
        tiling: cli.tiling.clone(),
        tile_size: cli.tile_size,
        tile_sizes: cli.tile_sizes.clone(),
        second_level_tiling: cli.second_level_tiling.clone(),
        register_tiling: cli.register_tiling.clone(),
        prevect_width: cli.prevect_width,
        context: cli.context.clone(),
        max_operations: cli.max_operations,
        ..Default::default()
    };
    // invalid values are logged by `with_raw` and replaced by the base value
    let (config, _) = base.with_raw(&raw);
    Ok(config)
}

fn render(cli: &Cli, scop: &Scop, result: &PipelineResult, with_check: bool) -> Result<String> {
    let mut out = String::new();
    let all = cli.emit == EmitKind::All;
    if cli.emit == EmitKind::Scop {
        out.push_str(&format!("{}\n", scop));
    }
    if all || cli.emit == EmitKind::Deps {
        match &result.dependences {
            Some(deps) => out.push_str(&format!("{}\n", deps)),
            None => out.push_str("// dependences unavailable\n"),
        }
    }
    if all || cli.emit == EmitKind::Schedule {
        out.push_str(&format!("// schedule ({}):\n{}\n", result.outcome, scop.schedule));
    }
    if all || cli.emit == EmitKind::Code {
        match &result.ast {
            Some(ast) => {
                let emitter = CEmitter::new().with_accesses(cli.print_accesses);
                out.push_str(&emit(ast, scop, emitter, with_check).context("Failed to emit code")?);
            }
            None => out.push_str(&format!("// {}: original code kept ({})\n", scop.name, result.outcome)),
        }
    }
    if cli.emit == EmitKind::Jscop {
        out.push_str(&export_jscop(scop).context("Failed to export scop")?);
        out.push('\n');
    }
    Ok(out)
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content)
                .with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            print!("{}", content);
        }
    }
    Ok(())
}
