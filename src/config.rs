//! Pipeline configuration.
//!
//! [`Config`] is immutable once built and passed by reference into every
//! stage. [`RawOptions`] holds the string-valued form used by the command
//! line and configuration files; [`Config::from_raw`] validates it and
//! substitutes defaults for anything it cannot use, reporting each
//! substitution as a diagnostic.

use crate::utils::errors::Diagnostic;
use serde::{Deserialize, Serialize};

/// Which dependences the scheduler optimizes proximity for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizeOnly {
    /// RAW, WAR and WAW
    All,
    /// RAW only
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FusionStrategy {
    Min,
    Max,
}

/// How flow dependences are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DependenceAnalysisType {
    /// Exact last-writer dependences; intermediate writes kill older ones
    ValueBased,
    /// Every earlier write to the same element is a source
    MemoryBased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorizerKind {
    None,
    /// Strip-mine parallel point loops for a later loop vectorizer
    Basic,
    /// Strip-mine parallel point loops and mark them for straight-line vector code
    Polly,
}

/// Region modeling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopOptions {
    /// Do not record `WRAPPING` restrictions
    pub ignore_integer_wrapping: bool,
    /// Extra constraints on the parameters, e.g. `[N] -> { : N > 16 }`
    pub user_context: Option<String>,
    /// Box non-affine branches and loops into subregions
    pub allow_non_affine: bool,
    /// Ceiling on pieces of translated expressions
    pub max_disjuncts: usize,
}

impl Default for ScopOptions {
    fn default() -> Self {
        Self {
            ignore_integer_wrapping: false,
            user_context: None,
            allow_non_affine: true,
            max_disjuncts: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependenceOptions {
    pub analysis_type: DependenceAnalysisType,
    /// Coalesce dependence relations
    pub simplify: bool,
    /// Operation budget of one dependence computation
    pub max_operations: Option<u64>,
}

impl Default for DependenceOptions {
    fn default() -> Self {
        Self {
            analysis_type: DependenceAnalysisType::ValueBased,
            simplify: true,
            max_operations: Some(500_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    pub optimize_only: OptimizeOnly,
    pub fusion: FusionStrategy,
    pub maximize_band_depth: bool,
    /// Bound on schedule coefficients; `None` for unbounded
    pub max_coefficient: Option<i64>,
    /// Bound on schedule constant terms; `None` for unbounded
    pub max_constant_term: Option<i64>,
    /// Require the outermost band to carry no dependence when possible
    pub outer_coincidence: bool,
    /// Simplify proximity dependences against the domains
    pub gist_dependences: bool,
    /// Operation budget of one scheduling run
    pub max_operations: Option<u64>,
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            optimize_only: OptimizeOnly::All,
            fusion: FusionStrategy::Min,
            maximize_band_depth: true,
            max_coefficient: Some(20),
            max_constant_term: Some(20),
            outer_coincidence: false,
            gist_dependences: true,
            max_operations: Some(1_000_000),
        }
    }
}

/// One level of rectangular tiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileLevel {
    pub enabled: bool,
    pub default_size: i64,
    /// Per-dimension sizes; dimensions beyond the list use `default_size`
    pub sizes: Vec<i64>,
}

impl TileLevel {
    pub fn new(enabled: bool, default_size: i64) -> Self {
        Self { enabled, default_size, sizes: Vec::new() }
    }

    /// The tile size of band member `dim`.
    pub fn size(&self, dim: usize) -> i64 {
        self.sizes.get(dim).copied().unwrap_or(self.default_size)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingOptions {
    pub first_level: TileLevel,
    pub second_level: TileLevel,
    pub register: TileLevel,
}

impl Default for TilingOptions {
    fn default() -> Self {
        Self {
            first_level: TileLevel::new(true, 32),
            second_level: TileLevel::new(false, 16),
            register: TileLevel::new(false, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodegenOptions {
    /// Longest constant trip count of a loop marked for vectorization
    pub max_vector_width: i64,
    /// Emit the run-time check around the optimized code
    pub emit_run_condition: bool,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self { max_vector_width: 16, emit_run_condition: true }
    }
}

/// Configuration of the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scop: ScopOptions,
    pub dependence: DependenceOptions,
    pub schedule: ScheduleOptions,
    pub tiling: TilingOptions,
    pub vectorizer: VectorizerKind,
    /// Strip-mine width when a vectorizer is selected
    pub prevect_width: i64,
    pub codegen: CodegenOptions,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scop: ScopOptions::default(),
            dependence: DependenceOptions::default(),
            schedule: ScheduleOptions::default(),
            tiling: TilingOptions::default(),
            vectorizer: VectorizerKind::None,
            prevect_width: 4,
            codegen: CodegenOptions::default(),
        }
    }
}

/// Unvalidated options, as given on a command line or in a file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawOptions {
    /// `"min"` or `"max"`
    pub fusion: Option<String>,
    /// `"yes"` or `"no"`
    pub maximize_band_depth: Option<String>,
    /// `"all"` or `"raw"`
    pub optimize_only: Option<String>,
    /// `"value-based"` or `"memory-based"`
    pub analysis_type: Option<String>,
    /// `"yes"` or `"no"`
    pub simplify_deps: Option<String>,
    /// `"none"`, `"basic"` or `"polly"`
    pub vectorizer: Option<String>,
    /// `"yes"` or `"no"`
    pub outer_coincidence: Option<String>,
    pub max_coefficient: Option<i64>,
    pub max_constant_term: Option<i64>,
    pub tiling: Option<String>,
    pub tile_size: Option<i64>,
    pub tile_sizes: Option<Vec<i64>>,
    pub second_level_tiling: Option<String>,
    pub second_level_tile_size: Option<i64>,
    pub second_level_tile_sizes: Option<Vec<i64>>,
    pub register_tiling: Option<String>,
    pub register_tile_size: Option<i64>,
    pub register_tile_sizes: Option<Vec<i64>>,
    pub prevect_width: Option<i64>,
    pub ignore_integer_wrapping: Option<String>,
    pub context: Option<String>,
    pub max_operations: Option<i64>,
}

/// Parse a yes/no option, pushing a diagnostic on anything else.
fn parse_flag(name: &str, value: &Option<String>, default: bool, diags: &mut Vec<Diagnostic>) -> bool {
    match value.as_deref() {
        None => default,
        Some("yes") | Some("true") | Some("on") => true,
        Some("no") | Some("false") | Some("off") => false,
        Some(other) => {
            diags.push(
                Diagnostic::warning(format!("invalid value '{}' for option '{}'", other, name))
                    .with_note(format!("expected 'yes' or 'no'; using '{}'", if default { "yes" } else { "no" })),
            );
            default
        }
    }
}

fn parse_choice<T: Copy>(
    name: &str,
    value: &Option<String>,
    choices: &[(&str, T)],
    default: T,
    diags: &mut Vec<Diagnostic>,
) -> T {
    let Some(value) = value.as_deref() else { return default };
    if let Some((_, v)) = choices.iter().find(|(n, _)| *n == value) {
        return *v;
    }
    let expected: Vec<&str> = choices.iter().map(|(n, _)| *n).collect();
    diags.push(
        Diagnostic::warning(format!("invalid value '{}' for option '{}'", value, name))
            .with_note(format!("expected one of: {}", expected.join(", "))),
    );
    default
}

fn parse_positive(name: &str, value: Option<i64>, default: i64, diags: &mut Vec<Diagnostic>) -> i64 {
    match value {
        None => default,
        Some(v) if v > 0 => v,
        Some(v) => {
            diags.push(
                Diagnostic::warning(format!("option '{}' must be positive, got {}", name, v))
                    .with_note(format!("using {}", default)),
            );
            default
        }
    }
}

fn parse_sizes(name: &str, value: &Option<Vec<i64>>, default: &[i64], diags: &mut Vec<Diagnostic>) -> Vec<i64> {
    match value {
        None => default.to_vec(),
        Some(sizes) if sizes.iter().all(|s| *s > 0) => sizes.clone(),
        Some(sizes) => {
            diags.push(
                Diagnostic::warning(format!("option '{}' has a non-positive size in {:?}", name, sizes))
                    .with_note("using the default size for every dimension"),
            );
            Vec::new()
        }
    }
}

fn parse_bound(name: &str, value: Option<i64>, default: Option<i64>, diags: &mut Vec<Diagnostic>) -> Option<i64> {
    match value {
        None => default,
        Some(-1) => None,
        Some(v) if v >= 0 => Some(v),
        Some(v) => {
            diags.push(Diagnostic::warning(format!("option '{}' must be -1 or non-negative, got {}", name, v)));
            default
        }
    }
}

impl Config {
    /// Validate raw options. Invalid values never fail: each is reported
    /// and replaced by its default.
    pub fn from_raw(raw: &RawOptions) -> (Config, Vec<Diagnostic>) {
        Config::default().with_raw(raw)
    }

    /// Like [`Config::from_raw`], with `self` supplying the values of unset
    /// and invalid options.
    pub fn with_raw(&self, raw: &RawOptions) -> (Config, Vec<Diagnostic>) {
        let mut diags = Vec::new();
        let defaults = self;
        let d = &mut diags;

        let schedule = ScheduleOptions {
            optimize_only: parse_choice(
                "optimize-only",
                &raw.optimize_only,
                &[("all", OptimizeOnly::All), ("raw", OptimizeOnly::Raw)],
                defaults.schedule.optimize_only,
                d,
            ),
            fusion: parse_choice(
                "fusion",
                &raw.fusion,
                &[("min", FusionStrategy::Min), ("max", FusionStrategy::Max)],
                defaults.schedule.fusion,
                d,
            ),
            maximize_band_depth: parse_flag(
                "maximize-band-depth",
                &raw.maximize_band_depth,
                defaults.schedule.maximize_band_depth,
                d,
            ),
            max_coefficient: parse_bound("max-coefficient", raw.max_coefficient, defaults.schedule.max_coefficient, d),
            max_constant_term: parse_bound(
                "max-constant-term",
                raw.max_constant_term,
                defaults.schedule.max_constant_term,
                d,
            ),
            outer_coincidence: parse_flag(
                "outer-coincidence",
                &raw.outer_coincidence,
                defaults.schedule.outer_coincidence,
                d,
            ),
            ..defaults.schedule.clone()
        };

        let max_operations = match raw.max_operations {
            None => defaults.dependence.max_operations,
            Some(v) if v <= 0 => None,
            Some(v) => Some(v as u64),
        };
        let dependence = DependenceOptions {
            analysis_type: parse_choice(
                "analysis-type",
                &raw.analysis_type,
                &[
                    ("value-based", DependenceAnalysisType::ValueBased),
                    ("memory-based", DependenceAnalysisType::MemoryBased),
                ],
                defaults.dependence.analysis_type,
                d,
            ),
            simplify: parse_flag("simplify-deps", &raw.simplify_deps, defaults.dependence.simplify, d),
            max_operations,
        };

        let tiling = TilingOptions {
            first_level: TileLevel {
                enabled: parse_flag("tiling", &raw.tiling, defaults.tiling.first_level.enabled, d),
                default_size: parse_positive("tile-size", raw.tile_size, defaults.tiling.first_level.default_size, d),
                sizes: parse_sizes("tile-sizes", &raw.tile_sizes, &defaults.tiling.first_level.sizes, d),
            },
            second_level: TileLevel {
                enabled: parse_flag(
                    "second-level-tiling",
                    &raw.second_level_tiling,
                    defaults.tiling.second_level.enabled,
                    d,
                ),
                default_size: parse_positive(
                    "second-level-tile-size",
                    raw.second_level_tile_size,
                    defaults.tiling.second_level.default_size,
                    d,
                ),
                sizes: parse_sizes("second-level-tile-sizes", &raw.second_level_tile_sizes, &defaults.tiling.second_level.sizes, d),
            },
            register: TileLevel {
                enabled: parse_flag("register-tiling", &raw.register_tiling, defaults.tiling.register.enabled, d),
                default_size: parse_positive(
                    "register-tile-size",
                    raw.register_tile_size,
                    defaults.tiling.register.default_size,
                    d,
                ),
                sizes: parse_sizes("register-tile-sizes", &raw.register_tile_sizes, &defaults.tiling.register.sizes, d),
            },
        };

        let scop = ScopOptions {
            ignore_integer_wrapping: parse_flag(
                "ignore-integer-wrapping",
                &raw.ignore_integer_wrapping,
                defaults.scop.ignore_integer_wrapping,
                d,
            ),
            user_context: raw.context.clone().or_else(|| defaults.scop.user_context.clone()),
            ..defaults.scop.clone()
        };

        let vectorizer = parse_choice(
            "vectorizer",
            &raw.vectorizer,
            &[("none", VectorizerKind::None), ("basic", VectorizerKind::Basic), ("polly", VectorizerKind::Polly)],
            defaults.vectorizer,
            d,
        );
        let prevect_width = parse_positive("prevect-width", raw.prevect_width, defaults.prevect_width, d);

        let config = Config {
            scop,
            dependence,
            schedule,
            tiling,
            vectorizer,
            prevect_width,
            codegen: defaults.codegen.clone(),
        };
        for diag in &diags {
            log::warn!("{}", diag.message);
        }
        (config, diags)
    }

    /// Load a configuration file in JSON form.
    pub fn from_json(text: &str) -> Result<Config, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tiling.first_level.size(0), 32);
        assert!(!config.tiling.second_level.enabled);
        assert_eq!(config.tiling.second_level.default_size, 16);
        assert_eq!(config.tiling.register.default_size, 2);
        assert_eq!(config.prevect_width, 4);
        assert_eq!(config.codegen.max_vector_width, 16);
        assert_eq!(config.schedule.fusion, FusionStrategy::Min);
    }

    #[test]
    fn test_from_raw_valid() {
        let raw = RawOptions {
            fusion: Some("max".to_string()),
            optimize_only: Some("raw".to_string()),
            vectorizer: Some("polly".to_string()),
            tile_sizes: Some(vec![64, 8]),
            max_coefficient: Some(-1),
            ..Default::default()
        };
        let (config, diags) = Config::from_raw(&raw);
        assert!(diags.is_empty());
        assert_eq!(config.schedule.fusion, FusionStrategy::Max);
        assert_eq!(config.schedule.optimize_only, OptimizeOnly::Raw);
        assert_eq!(config.vectorizer, VectorizerKind::Polly);
        assert_eq!(config.tiling.first_level.size(0), 64);
        assert_eq!(config.tiling.first_level.size(1), 8);
        assert_eq!(config.tiling.first_level.size(2), 32);
        assert_eq!(config.schedule.max_coefficient, None);
    }

    #[test]
    fn test_invalid_values_fall_back_with_diagnostics() {
        let raw = RawOptions {
            fusion: Some("maximal".to_string()),
            maximize_band_depth: Some("maybe".to_string()),
            tile_size: Some(0),
            vectorizer: Some("avx".to_string()),
            ..Default::default()
        };
        let (config, diags) = Config::from_raw(&raw);
        assert_eq!(diags.len(), 4);
        assert_eq!(config.schedule.fusion, FusionStrategy::Min);
        assert!(config.schedule.maximize_band_depth);
        assert_eq!(config.tiling.first_level.default_size, 32);
        assert_eq!(config.vectorizer, VectorizerKind::None);
    }

    #[test]
    fn test_raw_options_layer_over_base() {
        let mut base = Config::default();
        base.prevect_width = 8;
        base.tiling.first_level.sizes = vec![16, 16];
        let raw = RawOptions { tile_size: Some(64), prevect_width: Some(-2), ..Default::default() };
        let (config, diags) = base.with_raw(&raw);
        assert_eq!(diags.len(), 1);
        assert_eq!(config.prevect_width, 8);
        assert_eq!(config.tiling.first_level.sizes, vec![16, 16]);
        assert_eq!(config.tiling.first_level.default_size, 64);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = Config::default();
        config.schedule.fusion = FusionStrategy::Max;
        let text = serde_json::to_string(&config).unwrap();
        assert_eq!(Config::from_json(&text).unwrap(), config);
        let partial = Config::from_json(r#"{ "prevect_width": 8 }"#).unwrap();
        assert_eq!(partial.prevect_width, 8);
        assert_eq!(partial.tiling, TilingOptions::default());
    }
}
