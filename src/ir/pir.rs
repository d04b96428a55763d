//! Polyhedral Intermediate Representation (PIR).
//!
//! The region model ("Scop") describes a static control part in polyhedral form:
//! - Statements with iteration domains
//! - Memory accesses with access relations
//! - Arrays, including synthetic ones for scalars and PHI nodes
//! - Parameters, the context and the recorded assumptions
//! - The schedule tree and the invariant-load equivalence classes

use crate::ir::host::{BlockId, ElementType, InstId, Operand};
use crate::ir::scev::SymExpr;
use crate::polyhedral::{AffineExpr, Constraint, IntegerMap, IntegerSet, PolyCtx, PwAff, Space, UnionMap, UnionSet};
use crate::transform::schedule_tree::ScheduleTree;
use crate::utils::errors::{ImportError, ImportErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique identifier for statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StmtId(pub usize);

impl fmt::Display for StmtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Index of an array in [`Scop::arrays`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayId(pub usize);

/// What a (possibly synthetic) array stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    /// A real array in memory
    Array,
    /// A scalar defined in one statement and used in another
    Value,
    /// The incoming values of a PHI node
    Phi,
    /// A PHI node in the region exit
    ExitPhi,
}

/// Kind of memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    Read,
    MustWrite,
    MayWrite,
}

impl AccessType {
    pub fn name(&self) -> &'static str {
        match self {
            AccessType::Read => "read",
            AccessType::MustWrite => "write",
            AccessType::MayWrite => "may_write",
        }
    }
}

/// Reduction operator of a reduction-like access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReductionType {
    None,
    Add,
    Mul,
    BitOr,
    BitXor,
    BitAnd,
}

impl ReductionType {
    pub fn symbol(&self) -> &'static str {
        match self {
            ReductionType::None => "NONE",
            ReductionType::Add => "+",
            ReductionType::Mul => "*",
            ReductionType::BitOr => "|",
            ReductionType::BitXor => "^",
            ReductionType::BitAnd => "&",
        }
    }
}

/// Information about an array.
#[derive(Debug, Clone)]
pub struct ScopArrayInfo {
    pub id: ArrayId,
    /// Tuple name used in access relations, e.g. `MemRef_A`
    pub name: String,
    /// Host base array or value name
    pub base_name: String,
    pub kind: MemoryKind,
    pub element_type: ElementType,
    /// Size per dimension over the parameters; `None` when unbounded
    pub sizes: Vec<Option<PwAff>>,
    /// Array whose elements hold the base pointer of this one
    pub base_origin: Option<ArrayId>,
}

impl ScopArrayInfo {
    pub fn n_dims(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_array_kind(&self) -> bool {
        self.kind == MemoryKind::Array
    }

    /// Grow the known sizes. Returns false when the new shape is incompatible
    /// (same rank but different sizes).
    pub fn update_sizes(&mut self, sizes: Vec<Option<PwAff>>) -> bool {
        if sizes.len() < self.sizes.len() {
            return true;
        }
        if sizes.len() == self.sizes.len() {
            for (a, b) in self.sizes.iter().zip(&sizes) {
                match (a, b) {
                    (None, None) => {}
                    (Some(x), Some(y)) => {
                        if x.as_constant().is_some() && x.as_constant() != y.as_constant() {
                            return false;
                        }
                    }
                    _ => return false,
                }
            }
            return true;
        }
        self.sizes = sizes;
        true
    }

    pub fn space(&self) -> Space {
        Space::named_set(&self.name, self.n_dims())
    }
}

impl fmt::Display for ScopArrayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.element_type.name(), self.name)?;
        for size in &self.sizes {
            match size {
                None => write!(f, "[*]")?,
                Some(s) => match (s.as_constant(), s.as_affine()) {
                    (Some(c), _) => write!(f, "[{}]", c)?,
                    (None, Some(e)) => {
                        let names = s.space.param_names.clone();
                        write!(f, "[{}]", e.to_string_with_names(&names))?
                    }
                    _ => write!(f, "[{}]", s)?,
                },
            }
        }
        match self.kind {
            MemoryKind::Array => Ok(()),
            MemoryKind::Value => write!(f, "; // MemoryKind::Value"),
            MemoryKind::Phi => write!(f, "; // MemoryKind::PHI"),
            MemoryKind::ExitPhi => write!(f, "; // MemoryKind::ExitPHI"),
        }
    }
}

/// One memory reference of a statement.
#[derive(Debug, Clone)]
pub struct MemoryAccess {
    pub stmt: StmtId,
    pub access_type: AccessType,
    pub array: ArrayId,
    pub kind: MemoryKind,
    /// Subscript per array dimension (empty for scalars)
    pub subscripts: Vec<SymExpr>,
    /// `{ Stmt[i] -> MemRef_A[o] }`
    pub relation: IntegerMap,
    /// Replacement relation set by later passes
    pub new_relation: Option<IntegerMap>,
    pub reduction: ReductionType,
    /// Whether the relation is exact (all subscripts affine)
    pub affine: bool,
    /// The host load, store or PHI
    pub inst: Option<InstId>,
    /// Incoming (block, value) pairs of a PHI write
    pub incoming: Vec<(BlockId, Operand)>,
}

impl MemoryAccess {
    pub fn is_read(&self) -> bool {
        self.access_type == AccessType::Read
    }

    pub fn is_write(&self) -> bool {
        !self.is_read()
    }

    pub fn is_must_write(&self) -> bool {
        self.access_type == AccessType::MustWrite
    }

    pub fn is_may_write(&self) -> bool {
        self.access_type == AccessType::MayWrite
    }

    pub fn is_array_kind(&self) -> bool {
        self.kind == MemoryKind::Array
    }

    pub fn is_scalar_kind(&self) -> bool {
        !self.is_array_kind()
    }

    pub fn is_reduction_like(&self) -> bool {
        self.reduction != ReductionType::None
    }

    /// Name of the accessed array tuple.
    pub fn array_name(&self) -> &str {
        self.relation.out_name().unwrap_or("")
    }

    /// The replacement relation if any, else the original one.
    pub fn latest_relation(&self) -> &IntegerMap {
        self.new_relation.as_ref().unwrap_or(&self.relation)
    }

    /// Check a replacement relation against the original.
    pub fn validate_new_relation(&self, map: &IntegerMap, array: &ScopArrayInfo, domain: &IntegerSet) -> Result<(), ImportError> {
        if map.in_name() != self.relation.in_name() || map.n_in() != self.relation.n_in() {
            return Err(ImportError::new(
                ImportErrorKind::StatementMismatch,
                format!(
                    "new access relation domain {:?}[{}] does not match {:?}[{}]",
                    map.in_name(),
                    map.n_in(),
                    self.relation.in_name(),
                    self.relation.n_in()
                ),
            ));
        }
        if let Some(unknown) = map.space().param_names.iter().find(|p| !self.relation.space().param_names.contains(p)) {
            return Err(ImportError::new(
                ImportErrorKind::DimensionMismatch,
                format!("new access relation uses unknown parameter {}", unknown),
            ));
        }
        if map.out_name() != Some(array.name.as_str()) || map.n_out() != array.n_dims() {
            return Err(ImportError::new(
                ImportErrorKind::DimensionMismatch,
                format!("new access relation does not access {} with {} dimension(s)", array.name, array.n_dims()),
            ));
        }
        let covered = map.domain();
        if !domain.is_subset(&covered) {
            return Err(ImportError::new(
                ImportErrorKind::DimensionMismatch,
                "new access relation does not cover the original domain",
            ));
        }
        Ok(())
    }

    /// Distances between the elements touched by consecutive instances in
    /// `schedule` order (innermost dimension advanced by one).
    pub fn stride(&self, schedule: &IntegerMap, domain: &IntegerSet) -> IntegerSet {
        let sched = schedule.intersect_domain(domain);
        let n = sched.n_out();
        let time = sched.space().range();
        let mut next = IntegerMap::universe(time.identity_map());
        let np = time.n_param();
        let cols = np + 2 * n;
        for k in 0..n {
            let offset = if k + 1 == n { 1 } else { 0 };
            let expr = AffineExpr::var(np + n + k, cols) - AffineExpr::var(np + k, cols);
            next = next.with_constraint(Constraint::eq_zero(expr.add_constant(-offset)));
        }
        let access = self.latest_relation().intersect_domain(domain);
        // x -> y with y scheduled right after x
        let succ = sched.apply_range(&next).apply_range(&sched.reverse());
        // A(x) -> A(y)
        let pairs = access.reverse().apply_range(&succ).apply_range(&access);
        pairs.deltas()
    }

    fn stride_is(&self, schedule: &IntegerMap, domain: &IntegerSet, value: i64) -> bool {
        let stride = self.stride(schedule, domain);
        if stride.is_empty() {
            return value == 0;
        }
        let n = stride.dim();
        let mut expected = IntegerSet::universe(stride.space.clone());
        for d in 0..n {
            expected = expected.fix_dim(d, if d + 1 == n { value } else { 0 });
        }
        stride.is_subset(&expected)
    }

    pub fn is_stride_zero(&self, schedule: &IntegerMap, domain: &IntegerSet) -> bool {
        self.stride_is(schedule, domain, 0)
    }

    pub fn is_stride_one(&self, schedule: &IntegerMap, domain: &IntegerSet) -> bool {
        self.stride_is(schedule, domain, 1)
    }
}

impl fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MemoryKind::Array => "MemoryKind::Array",
            MemoryKind::Value => "MemoryKind::Value",
            MemoryKind::Phi => "MemoryKind::PHI",
            MemoryKind::ExitPhi => "MemoryKind::ExitPHI",
        };
        writeln!(
            f,
            "{}Access := [Reduction Type: {}] [Scalar: {}]",
            match self.access_type {
                AccessType::Read => "Read",
                AccessType::MustWrite => "MustWrite",
                AccessType::MayWrite => "MayWrite",
            },
            self.reduction.symbol(),
            u8::from(self.is_scalar_kind())
        )?;
        write!(f, "    {} {}", self.relation, kind)?;
        if let Some(new) = &self.new_relation {
            write!(f, "\n    new: {}", new)?;
        }
        Ok(())
    }
}

/// What a statement covers in the host function.
#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// A single basic block
    Block(BlockId),
    /// A non-affine subregion approximated as a whole
    Region { entry: BlockId, blocks: Vec<BlockId> },
    /// A statement read from an exchange file
    Imported,
}

/// A statement of the region.
#[derive(Debug, Clone)]
pub struct ScopStmt {
    pub id: StmtId,
    pub name: String,
    pub kind: StmtKind,
    /// `{ Stmt[i, j, ...] : ... }`, one dimension per surrounding loop
    pub domain: IntegerSet,
    pub accesses: Vec<MemoryAccess>,
    /// Headers of the surrounding loops, outermost first
    pub loops: Vec<BlockId>,
    /// Instructions of the statement in program order
    pub insts: Vec<InstId>,
}

impl ScopStmt {
    pub fn depth(&self) -> usize {
        self.domain.dim()
    }

    pub fn is_block_stmt(&self) -> bool {
        matches!(self.kind, StmtKind::Block(_))
    }

    pub fn is_region_stmt(&self) -> bool {
        matches!(self.kind, StmtKind::Region { .. })
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        match &self.kind {
            StmtKind::Block(b) => Some(*b),
            StmtKind::Region { entry, .. } => Some(*entry),
            StmtKind::Imported => None,
        }
    }

    pub fn contains_block(&self, block: BlockId) -> bool {
        match &self.kind {
            StmtKind::Block(b) => *b == block,
            StmtKind::Region { blocks, .. } => blocks.contains(&block),
            StmtKind::Imported => false,
        }
    }

    pub fn reads(&self) -> impl Iterator<Item = &MemoryAccess> {
        self.accesses.iter().filter(|a| a.is_read())
    }

    pub fn writes(&self) -> impl Iterator<Item = &MemoryAccess> {
        self.accesses.iter().filter(|a| a.is_write())
    }

    /// Restrict the domain. Domains only ever shrink.
    pub fn restrict_domain(&mut self, set: &IntegerSet) {
        self.domain = self.domain.intersect(set).coalesce();
        for access in &mut self.accesses {
            access.relation = access.relation.intersect_domain(&self.domain);
        }
    }
}

impl fmt::Display for ScopStmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}", self.name)?;
        writeln!(f, "    Domain :=")?;
        writeln!(f, "      {};", self.domain)?;
        for access in &self.accesses {
            for line in access.to_string().lines() {
                writeln!(f, "    {}", line)?;
            }
        }
        Ok(())
    }
}

/// A symbolic parameter of the region.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// The expression the parameter stands for
    pub expr: Option<SymExpr>,
    pub bits: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssumptionKind {
    Aliasing,
    InBounds,
    Wrapping,
    Unsigned,
    Complexity,
    ErrorBlock,
    InvariantLoad,
    Delinearization,
}

impl AssumptionKind {
    pub fn name(&self) -> &'static str {
        match self {
            AssumptionKind::Aliasing => "No-aliasing",
            AssumptionKind::InBounds => "Inbounds",
            AssumptionKind::Wrapping => "No-overflows",
            AssumptionKind::Unsigned => "Signed-unsigned",
            AssumptionKind::Complexity => "Low complexity",
            AssumptionKind::ErrorBlock => "No-error",
            AssumptionKind::InvariantLoad => "Invariant load",
            AssumptionKind::Delinearization => "Delinearization",
        }
    }
}

/// Whether a recorded set must hold or must not hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AssumptionSign {
    Assumption,
    Restriction,
}

/// A recorded assumption over the parameters.
#[derive(Debug, Clone)]
pub struct Assumption {
    pub kind: AssumptionKind,
    pub sign: AssumptionSign,
    pub set: IntegerSet,
    pub block: Option<BlockId>,
}

/// Loads of one address hoisted into a single parameter.
#[derive(Debug, Clone)]
pub struct InvariantEquivClass {
    /// Base array and subscripts of the shared address
    pub base: String,
    pub subscripts: Vec<SymExpr>,
    pub representative: InstId,
    pub members: Vec<InstId>,
    /// Parameter values under which the hoisted load must be valid
    pub execution_context: IntegerSet,
    /// Parameter standing for the loaded value
    pub param: String,
}

/// A static control part in polyhedral form.
#[derive(Debug, Clone)]
pub struct Scop {
    pub name: String,
    pub ctx: PolyCtx,
    pub parameters: Vec<Parameter>,
    /// Known facts over the parameters
    pub context: IntegerSet,
    /// Must hold for the optimized code to be valid
    pub assumed_context: IntegerSet,
    /// Must not hold for the optimized code to be valid
    pub invalid_context: IntegerSet,
    pub assumptions: Vec<Assumption>,
    pub arrays: Vec<ScopArrayInfo>,
    pub statements: Vec<ScopStmt>,
    pub invariant_classes: Vec<InvariantEquivClass>,
    pub schedule: ScheduleTree,
    /// Entry and exit of the host region
    pub region: Option<(BlockId, Option<BlockId>)>,
    pub max_loop_depth: usize,
    /// Set once a transformation changed the schedule or accesses
    pub modified: bool,
}

impl Scop {
    pub fn new(name: &str, ctx: PolyCtx) -> Self {
        let params = Space::params(Vec::new());
        Self {
            name: name.to_string(),
            ctx,
            parameters: Vec::new(),
            context: IntegerSet::universe(params.clone()),
            assumed_context: IntegerSet::universe(params.clone()),
            invalid_context: IntegerSet::empty(params),
            assumptions: Vec::new(),
            arrays: Vec::new(),
            statements: Vec::new(),
            invariant_classes: Vec::new(),
            schedule: ScheduleTree::empty(),
            region: None,
            max_loop_depth: 0,
            modified: false,
        }
    }

    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn param_space(&self) -> Space {
        Space::params(self.param_names())
    }

    pub fn param_by_expr(&self, expr: &SymExpr) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.expr.as_ref() == Some(expr))
    }

    /// Register a parameter, returning its name. Re-registering an
    /// expression returns the existing name.
    pub fn add_parameter(&mut self, name: &str, expr: Option<SymExpr>, bits: u32) -> String {
        if let Some(e) = &expr {
            if let Some(p) = self.param_by_expr(e) {
                return p.name.clone();
            }
        }
        if let Some(p) = self.parameters.iter().find(|p| p.name == name) {
            return p.name.clone();
        }
        log::debug!("new parameter {} ({} bits)", name, bits);
        self.parameters.push(Parameter { name: name.to_string(), expr, bits });
        self.align_params();
        // 64-bit parameters already span every value the model evaluates;
        // their overflow is covered by the WRAPPING restrictions
        if (1..64).contains(&bits) {
            let space = &self.context.space;
            let (col, n) = (space.n_param() - 1, space.n_cols());
            self.context.add_constraint(Constraint::lower_bound(col, -(1i64 << (bits - 1)), n));
            self.context.add_constraint(Constraint::upper_bound(col, (1i64 << (bits - 1)) - 1, n));
        }
        name.to_string()
    }

    /// Bring every set and relation to the current parameter list.
    pub fn align_params(&mut self) {
        let params = self.param_names();
        self.context = self.context.align_params(&params);
        self.assumed_context = self.assumed_context.align_params(&params);
        self.invalid_context = self.invalid_context.align_params(&params);
        for stmt in &mut self.statements {
            stmt.domain = stmt.domain.align_params(&params);
            for access in &mut stmt.accesses {
                access.relation = access.relation.align_params(&params);
                if let Some(new) = &access.new_relation {
                    access.new_relation = Some(new.align_params(&params));
                }
            }
        }
        self.schedule = self.schedule.align_params(&params);
        self.schedule.domain = self.domains();
    }

    pub fn stmt(&self, id: StmtId) -> Option<&ScopStmt> {
        self.statements.iter().find(|s| s.id == id)
    }

    pub fn stmt_mut(&mut self, id: StmtId) -> Option<&mut ScopStmt> {
        self.statements.iter_mut().find(|s| s.id == id)
    }

    pub fn stmt_by_name(&self, name: &str) -> Option<&ScopStmt> {
        self.statements.iter().find(|s| s.name == name)
    }

    pub fn stmts_for_block(&self, block: BlockId) -> impl Iterator<Item = &ScopStmt> {
        self.statements.iter().filter(move |s| s.contains_block(block))
    }

    pub fn array(&self, id: ArrayId) -> &ScopArrayInfo {
        &self.arrays[id.0]
    }

    pub fn array_by_name(&self, name: &str) -> Option<&ScopArrayInfo> {
        self.arrays.iter().find(|a| a.name == name)
    }

    /// Look up or create the array for `base_name` of `kind`. Sizes only grow.
    pub fn get_or_create_array(
        &mut self,
        base_name: &str,
        kind: MemoryKind,
        element_type: ElementType,
        sizes: Vec<Option<PwAff>>,
    ) -> ArrayId {
        let name = match kind {
            MemoryKind::Array | MemoryKind::Value => format!("MemRef_{}", base_name),
            MemoryKind::Phi => format!("MemRef_{}__phi", base_name),
            MemoryKind::ExitPhi => format!("MemRef_{}__exit", base_name),
        };
        if let Some(existing) = self.arrays.iter_mut().find(|a| a.name == name) {
            if !existing.update_sizes(sizes) {
                log::warn!("array {} accessed with inconsistent shapes", name);
            }
            return existing.id;
        }
        let id = ArrayId(self.arrays.len());
        log::trace!("new array {} ({:?})", name, kind);
        self.arrays.push(ScopArrayInfo {
            id,
            name,
            base_name: base_name.to_string(),
            kind,
            element_type,
            sizes,
            base_origin: None,
        });
        id
    }

    /// Union of all statement domains.
    pub fn domains(&self) -> UnionSet {
        let mut result = UnionSet::empty();
        for stmt in &self.statements {
            result.add(stmt.domain.clone());
        }
        result
    }

    fn collect_accesses<F: Fn(&MemoryAccess) -> bool>(&self, filter: F) -> UnionMap {
        let mut result = UnionMap::empty();
        for stmt in &self.statements {
            for access in stmt.accesses.iter().filter(|a| filter(a)) {
                result.add(access.latest_relation().intersect_domain(&stmt.domain));
            }
        }
        result.coalesce()
    }

    pub fn reads(&self) -> UnionMap {
        self.collect_accesses(|a| a.is_read())
    }

    pub fn must_writes(&self) -> UnionMap {
        self.collect_accesses(|a| a.is_must_write())
    }

    pub fn may_writes(&self) -> UnionMap {
        self.collect_accesses(|a| a.is_may_write())
    }

    pub fn writes(&self) -> UnionMap {
        self.collect_accesses(|a| a.is_write())
    }

    pub fn accesses(&self) -> UnionMap {
        self.collect_accesses(|_| true)
    }

    /// The flattened schedule restricted to the statement domains.
    pub fn schedule_map(&self) -> UnionMap {
        self.schedule.to_union_map()
    }

    pub fn set_schedule(&mut self, tree: ScheduleTree) {
        self.schedule = tree.align_params(&self.param_names()).with_domain(self.domains());
    }

    /// Record an assumption over the parameters. Assumptions implied by the
    /// context and restrictions disjoint from it are not recorded.
    pub fn add_assumption(&mut self, kind: AssumptionKind, set: IntegerSet, sign: AssumptionSign, block: Option<BlockId>) {
        let params = self.param_names();
        let mut set = set.params().align_params(&params);
        for p in &set.space.param_names.clone() {
            if !params.contains(p) {
                set = set.project_out_param(p);
            }
        }
        let effective = match sign {
            AssumptionSign::Assumption => !self.context.is_subset(&set),
            AssumptionSign::Restriction => self.context.intersects(&set),
        };
        if !effective {
            log::trace!("skipping ineffective {:?} {}", sign, kind.name());
            return;
        }
        log::debug!(
            "{} {}: {}",
            kind.name(),
            if sign == AssumptionSign::Assumption { "assumption" } else { "restriction" },
            set
        );
        match sign {
            AssumptionSign::Assumption => {
                self.assumed_context = self.assumed_context.intersect(&set).coalesce();
            }
            AssumptionSign::Restriction => {
                self.invalid_context = self.invalid_context.union(&set).coalesce();
            }
        }
        self.assumptions.push(Assumption { kind, sign, set, block });
    }

    /// `assumed ∧ ¬invalid` over the parameters.
    pub fn run_condition(&self) -> IntegerSet {
        let params = self.param_names();
        self.assumed_context
            .align_params(&params)
            .subtract(&self.invalid_context.align_params(&params))
            .coalesce()
    }

    /// Whether no parameter value satisfies the run-time check.
    pub fn is_infeasible(&self) -> bool {
        self.run_condition().intersect(&self.context).is_empty()
    }

    /// Mark the region as never profitable to execute.
    pub fn invalidate(&mut self, kind: AssumptionKind, block: Option<BlockId>) {
        let empty = IntegerSet::empty(self.param_space());
        log::info!("invalidating region {}: {}", self.name, kind.name());
        self.assumed_context = empty.clone();
        self.assumptions.push(Assumption { kind, sign: AssumptionSign::Assumption, set: empty, block });
    }

    /// The legacy `[β0, i0, β1, i1, ..., βd]` scattering of the original
    /// schedule, padded to `2 * max_loop_depth + 1` dimensions.
    pub fn original_scattering(&self) -> UnionMap {
        let flat = self.schedule.to_union_map();
        let width = 2 * self.max_loop_depth + 1;
        let mut result = UnionMap::empty();
        for map in flat.maps() {
            let n = map.n_out();
            let padded = if n < width {
                let mut m = map.add_out_dims(width - n);
                for d in n..width {
                    m = m.fix_out(d, 0);
                }
                m
            } else {
                map.clone()
            };
            result.add(padded);
        }
        result
    }

    pub fn remove_stmts<F: Fn(&ScopStmt) -> bool>(&mut self, should_remove: F) -> usize {
        let before = self.statements.len();
        self.statements.retain(|s| !should_remove(s));
        let removed = before - self.statements.len();
        if removed > 0 {
            let keep = self.statements.iter().map(|s| s.name.clone()).collect();
            self.schedule = self.schedule.retain_stmts(&keep).with_domain(self.domains());
        }
        removed
    }
}

impl fmt::Display for Scop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Function: {}", self.name)?;
        writeln!(f, "Max Loop Depth:  {}", self.max_loop_depth)?;
        writeln!(f, "Invariant Accesses: {{")?;
        for class in &self.invariant_classes {
            writeln!(f, "  ReadAccess := {}[...] -> {}", class.base, class.param)?;
            writeln!(f, "    Execution Context: {}", class.execution_context)?;
        }
        writeln!(f, "}}")?;
        writeln!(f, "Context:")?;
        writeln!(f, "{}", self.context)?;
        writeln!(f, "Assumed Context:")?;
        writeln!(f, "{}", self.assumed_context)?;
        writeln!(f, "Invalid Context:")?;
        writeln!(f, "{}", self.invalid_context)?;
        let params: Vec<String> = self.parameters.iter().map(|p| p.name.clone()).collect();
        writeln!(f, "Parameters: {}", params.join(", "))?;
        writeln!(f, "Arrays {{")?;
        for array in &self.arrays {
            writeln!(f, "    {}", array)?;
        }
        writeln!(f, "}}")?;
        writeln!(f, "Statements {{")?;
        for stmt in &self.statements {
            write!(f, "{}", stmt)?;
        }
        writeln!(f, "}}")?;
        writeln!(f, "Schedule:")?;
        write!(f, "{}", self.schedule)
    }
}
