//! JSON scop exchange format.
//!
//! ```json
//! {
//!   "name": "kernel",
//!   "context": "[N] -> { : N >= 0 }",
//!   "statements": [{
//!     "name": "Stmt_body",
//!     "domain": "[N] -> { Stmt_body[i] : 0 <= i < N }",
//!     "schedule": "[N] -> { Stmt_body[i] -> [i] }",
//!     "accesses": [{ "kind": "write", "relation": "[N] -> { Stmt_body[i] -> MemRef_A[i] }" }]
//!   }]
//! }
//! ```
//!
//! A document can either describe a whole region ([`scop_from_jscop`]) or
//! override the schedule and access relations of an existing one
//! ([`import_jscop`]). Overrides that do not fit the region are reported
//! as diagnostics and ignored.

use crate::analysis::dependence::Dependences;
use crate::ir::host::ElementType;
use crate::ir::pir::{AccessType, MemoryAccess, MemoryKind, ReductionType, Scop, ScopStmt, StmtId, StmtKind};
use crate::polyhedral::{parse_map, parse_set, AffineExpr, IntegerMap, PolyCtx, Space};
use crate::transform::schedule_tree::{affs_from_map, Band, SchedAff, ScheduleNode, ScheduleTree};
use crate::utils::errors::{Diagnostic, ImportError, ImportErrorKind};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JscopAccess {
    /// `read`, `write` or `may_write`
    pub kind: String,
    pub relation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JscopStatement {
    pub name: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub accesses: Vec<JscopAccess>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JscopDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub statements: Vec<JscopStatement>,
}

impl JscopDocument {
    pub fn parse(text: &str) -> Result<Self, ImportError> {
        serde_json::from_str(text).map_err(|e| ImportError::new(ImportErrorKind::Malformed, e.to_string()))
    }

    /// Describe `scop` with its current schedule and latest access relations.
    pub fn from_scop(scop: &Scop) -> Self {
        let statements = scop
            .statements
            .iter()
            .map(|stmt| JscopStatement {
                name: stmt.name.clone(),
                domain: stmt.domain.to_string(),
                schedule: scop.schedule.stmt_map(&stmt.name).map(|m| m.to_string()),
                accesses: stmt
                    .accesses
                    .iter()
                    .map(|a| JscopAccess { kind: access_kind_name(a.access_type).to_string(), relation: a.latest_relation().to_string() })
                    .collect(),
            })
            .collect();
        JscopDocument { name: scop.name.clone(), context: Some(scop.context.to_string()), statements }
    }

    pub fn to_json(&self) -> Result<String, ImportError> {
        serde_json::to_string_pretty(self).map_err(|e| ImportError::new(ImportErrorKind::Malformed, e.to_string()))
    }
}

fn access_kind_name(kind: AccessType) -> &'static str {
    match kind {
        AccessType::Read => "read",
        AccessType::MustWrite => "write",
        AccessType::MayWrite => "may_write",
    }
}

fn parse_access_kind(kind: &str) -> Option<AccessType> {
    match kind {
        "read" => Some(AccessType::Read),
        "write" | "must_write" => Some(AccessType::MustWrite),
        "may_write" => Some(AccessType::MayWrite),
        _ => None,
    }
}

fn malformed(what: &str, err: impl std::fmt::Display) -> ImportError {
    ImportError::new(ImportErrorKind::Malformed, format!("{}: {}", what, err))
}

/// Export `scop` as a JSON document.
pub fn export_jscop(scop: &Scop) -> Result<String, ImportError> {
    JscopDocument::from_scop(scop).to_json()
}

/// Build a region from a document. Statements keep the document order;
/// arrays are created from the tuple names of the access relations.
/// A schedule that cannot be represented is replaced by the default one
/// and reported.
pub fn scop_from_jscop(text: &str) -> Result<(Scop, Vec<Diagnostic>), ImportError> {
    let doc = JscopDocument::parse(text)?;
    let mut diagnostics = Vec::new();
    let name = if doc.name.is_empty() { "jscop" } else { doc.name.as_str() };
    let mut scop = Scop::new(name, PolyCtx::unlimited());

    let context = match &doc.context {
        Some(text) => Some(parse_set(text).map_err(|e| malformed("context", e))?),
        None => None,
    };
    if let Some(ctx) = &context {
        if !ctx.space.is_params() {
            return Err(ImportError::new(ImportErrorKind::Malformed, "context must be a parameter set"));
        }
    }

    let mut domains = Vec::with_capacity(doc.statements.len());
    for stmt in &doc.statements {
        let domain = parse_set(&stmt.domain).map_err(|e| malformed(&format!("domain of {}", stmt.name), e))?;
        if domain.tuple_name() != Some(stmt.name.as_str()) {
            return Err(ImportError::new(
                ImportErrorKind::StatementMismatch,
                format!("domain tuple {:?} does not match statement {}", domain.tuple_name(), stmt.name),
            ));
        }
        domains.push(domain);
    }

    let mut param_names: Vec<String> = Vec::new();
    let spaces = context.iter().map(|c| &c.space).chain(domains.iter().map(|d| &d.space));
    for space in spaces {
        for p in &space.param_names {
            if !param_names.contains(p) {
                param_names.push(p.clone());
            }
        }
    }
    for p in &param_names {
        scop.add_parameter(p, None, 0);
    }
    if let Some(ctx) = context {
        scop.context = ctx.align_params(&param_names);
    }

    for (idx, (stmt, domain)) in doc.statements.iter().zip(domains).enumerate() {
        let id = StmtId(idx);
        let mut accesses = Vec::with_capacity(stmt.accesses.len());
        for access in &stmt.accesses {
            let Some(access_type) = parse_access_kind(&access.kind) else {
                return Err(ImportError::new(
                    ImportErrorKind::Malformed,
                    format!("unknown access kind '{}' in {}", access.kind, stmt.name),
                ));
            };
            let relation =
                parse_map(&access.relation).map_err(|e| malformed(&format!("access of {}", stmt.name), e))?;
            if relation.in_name() != Some(stmt.name.as_str()) || relation.n_in() != domain.dim() {
                return Err(ImportError::new(
                    ImportErrorKind::StatementMismatch,
                    format!("access relation {} does not start at {}", access.relation, stmt.name),
                ));
            }
            let Some(array_name) = relation.out_name().map(str::to_string) else {
                return Err(ImportError::new(
                    ImportErrorKind::Malformed,
                    format!("access relation {} has no array tuple", access.relation),
                ));
            };
            let array = match scop.array_by_name(&array_name) {
                Some(existing) => existing.id,
                None => {
                    let base = array_name.strip_prefix("MemRef_").unwrap_or(&array_name);
                    let sizes = vec![None; relation.n_out()];
                    let id = scop.get_or_create_array(base, MemoryKind::Array, ElementType::Double, sizes);
                    scop.arrays[id.0].name = array_name.clone();
                    id
                }
            };
            accesses.push(MemoryAccess {
                stmt: id,
                access_type,
                array,
                kind: MemoryKind::Array,
                subscripts: Vec::new(),
                relation,
                new_relation: None,
                reduction: ReductionType::None,
                affine: true,
                inst: None,
                incoming: Vec::new(),
            });
        }
        scop.statements.push(ScopStmt {
            id,
            name: stmt.name.clone(),
            kind: StmtKind::Imported,
            domain,
            accesses,
            loops: Vec::new(),
            insts: Vec::new(),
        });
    }
    scop.align_params();
    scop.max_loop_depth = scop.statements.iter().map(|s| s.depth()).max().unwrap_or(0);

    let mut maps = BTreeMap::new();
    let mut complete = true;
    for stmt in &doc.statements {
        match stmt.schedule.as_deref().map(parse_map) {
            Some(Ok(map)) => {
                maps.insert(stmt.name.clone(), map);
            }
            Some(Err(e)) => {
                diagnostics.push(Diagnostic::error(format!("cannot parse schedule of {}: {}", stmt.name, e)));
                complete = false;
            }
            None => complete = false,
        }
    }
    let imported = if complete { tree_from_maps(&scop, &maps) } else { None };
    let tree = match imported {
        Some(tree) => tree,
        None => {
            if complete {
                diagnostics.push(
                    Diagnostic::warning("imported schedule is not representable")
                        .with_note("using the statement order with identity loops instead"),
                );
            }
            default_schedule(&scop)
        }
    };
    scop.set_schedule(tree);
    info!("imported region {} with {} statement(s)", scop.name, scop.statements.len());
    Ok((scop, diagnostics))
}

/// A schedule tree whose flattening is `maps`: a single band over all
/// statements, padded with zero members to the widest timestamp.
fn tree_from_maps(scop: &Scop, maps: &BTreeMap<String, IntegerMap>) -> Option<ScheduleTree> {
    let params = scop.param_names();
    let mut members = BTreeMap::new();
    let mut width = 0;
    for stmt in &scop.statements {
        let map = maps.get(&stmt.name)?;
        if map.in_name() != Some(stmt.name.as_str()) || map.n_in() != stmt.depth() {
            warn!("schedule of {} does not match its domain", stmt.name);
            return None;
        }
        let from = Space::set(stmt.depth()).with_param_names(map.space().param_names.clone());
        let affs: Vec<SchedAff> = affs_from_map(map)?.iter().map(|a| a.align(&from, &params)).collect::<Option<_>>()?;
        width = width.max(affs.len());
        members.insert(stmt.name.clone(), affs);
    }
    if width == 0 {
        return Some(ScheduleTree::new(params, scop.domains(), ScheduleNode::Leaf));
    }
    let mut band = Band::new(width);
    for stmt in &scop.statements {
        let Some(mut affs) = members.remove(&stmt.name) else { continue };
        let n_cols = params.len() + stmt.depth();
        affs.resize(width, SchedAff::constant(0, n_cols));
        band = band.with_stmt(&stmt.name, affs);
    }
    Some(ScheduleTree::new(params, scop.domains(), ScheduleNode::band(band, ScheduleNode::Leaf)))
}

/// Statements in document order, each under an identity band.
fn default_schedule(scop: &Scop) -> ScheduleTree {
    let params = scop.param_names();
    let np = params.len();
    let children: Vec<ScheduleNode> = scop
        .statements
        .iter()
        .map(|stmt| {
            let n = stmt.depth();
            let child = if n == 0 {
                ScheduleNode::Leaf
            } else {
                let mut band = Band::new(n);
                let affs = (0..n).map(|d| SchedAff::new(AffineExpr::var(np + d, np + n))).collect();
                band.permutable = true;
                ScheduleNode::band(band.with_stmt(&stmt.name, affs), ScheduleNode::Leaf)
            };
            ScheduleNode::filter([stmt.name.clone()], child)
        })
        .collect();
    let root = if children.len() == 1 {
        children.into_iter().next().unwrap_or(ScheduleNode::Leaf)
    } else {
        ScheduleNode::Sequence(children)
    };
    ScheduleTree::new(params, scop.domains(), root)
}

/// Apply the context, schedule and access relations of `doc` to `scop`.
///
/// A document naming other statements than the region is reported and
/// leaves the region untouched. Otherwise every part that does not fit is
/// reported and skipped.
pub fn import_jscop(scop: &mut Scop, deps: &mut Dependences, doc: &JscopDocument) -> Vec<Diagnostic> {
    if doc.statements.len() != scop.statements.len()
        || doc.statements.iter().any(|s| scop.stmt_by_name(&s.name).is_none())
    {
        warn!("{}: jscop document does not describe this region", scop.name);
        return vec![Diagnostic::error(format!(
            "document statements do not match the {} statement(s) of {}",
            scop.statements.len(),
            scop.name
        ))
        .with_note("nothing was imported")];
    }
    let mut diagnostics = Vec::new();
    if let Some(text) = &doc.context {
        if let Err(d) = import_context(scop, text) {
            diagnostics.push(d);
        }
    }
    if let Err(d) = import_schedule(scop, deps, doc) {
        diagnostics.push(d);
    }
    diagnostics.extend(import_accesses(scop, doc));
    if !diagnostics.is_empty() {
        debug!("jscop import of {}: {} diagnostic(s)", scop.name, diagnostics.len());
    }
    diagnostics
}

fn import_context(scop: &mut Scop, text: &str) -> Result<(), Diagnostic> {
    let context = parse_set(text).map_err(|e| Diagnostic::error(format!("cannot parse context: {}", e)))?;
    let params = scop.param_names();
    let mut given = context.space.param_names.clone();
    let mut expected = params.clone();
    given.sort();
    expected.sort();
    if !context.space.is_params() || given != expected {
        return Err(Diagnostic::error("imported context has different parameters")
            .with_note(format!("the region parameters are [{}]", params.join(", "))));
    }
    scop.context = scop.context.intersect(&context.align_params(&params)).coalesce();
    Ok(())
}

fn import_schedule(scop: &mut Scop, deps: &mut Dependences, doc: &JscopDocument) -> Result<(), Diagnostic> {
    let mut maps = BTreeMap::new();
    for stmt in &doc.statements {
        let Some(text) = &stmt.schedule else { return Ok(()) };
        let map = parse_map(text)
            .map_err(|e| Diagnostic::error(format!("cannot parse schedule of {}: {}", stmt.name, e)))?;
        maps.insert(stmt.name.clone(), map);
    }
    let tree = tree_from_maps(scop, &maps).ok_or_else(|| Diagnostic::error("imported schedule does not fit the region"))?;
    let flat = tree.to_union_map();
    deps.ensure(scop).map_err(|e| Diagnostic::error(format!("dependences unavailable: {}", e)))?;
    let legal = deps
        .is_valid_schedule(&flat)
        .map_err(|e| Diagnostic::error(format!("cannot check imported schedule: {}", e)))?;
    if !legal {
        return Err(Diagnostic::error("imported schedule violates dependences").with_note("keeping the current schedule"));
    }
    if flat.is_equal(&scop.schedule_map()) {
        return Ok(());
    }
    scop.set_schedule(tree);
    scop.modified = true;
    deps.invalidate();
    info!("{}: imported schedule installed", scop.name);
    Ok(())
}

fn import_accesses(scop: &mut Scop, doc: &JscopDocument) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let mut updates: Vec<(usize, usize, IntegerMap)> = Vec::new();
    for (s, stmt) in scop.statements.iter().enumerate() {
        let Some(entry) = doc.statements.iter().find(|d| d.name == stmt.name) else { continue };
        if entry.accesses.is_empty() {
            continue;
        }
        if entry.accesses.len() != stmt.accesses.len() {
            diagnostics.push(Diagnostic::error(format!(
                "{} has {} access(es), the document lists {}",
                stmt.name,
                stmt.accesses.len(),
                entry.accesses.len()
            )));
            continue;
        }
        for (a, (access, new)) in stmt.accesses.iter().zip(&entry.accesses).enumerate() {
            let map = match parse_map(&new.relation) {
                Ok(map) => map.align_params(&scop.param_names()),
                Err(e) => {
                    diagnostics.push(Diagnostic::error(format!("cannot parse access of {}: {}", stmt.name, e)));
                    continue;
                }
            };
            let Some(array) = map.out_name().and_then(|n| scop.array_by_name(n)) else {
                diagnostics.push(Diagnostic::error(format!("access of {} names an unknown array", stmt.name)));
                continue;
            };
            if let Err(e) = access.validate_new_relation(&map, array, &stmt.domain) {
                diagnostics.push(Diagnostic::error(e.to_string()).with_note(format!("keeping {}", access.latest_relation())));
                continue;
            }
            if !map.is_equal(access.latest_relation()) {
                updates.push((s, a, map));
            }
        }
    }
    if !updates.is_empty() {
        info!("{}: {} access relation(s) replaced", scop.name, updates.len());
        scop.modified = true;
    }
    for (s, a, map) in updates {
        scop.statements[s].accesses[a].new_relation = Some(map);
    }
    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DependenceOptions;

    const COPY: &str = r#"{
        "name": "copy",
        "context": "[N] -> { : N >= 1 }",
        "statements": [{
            "name": "Stmt_copy",
            "domain": "[N] -> { Stmt_copy[i] : 0 <= i < N }",
            "schedule": "[N] -> { Stmt_copy[i] -> [i] }",
            "accesses": [
                { "kind": "read", "relation": "[N] -> { Stmt_copy[i] -> MemRef_B[i] }" },
                { "kind": "write", "relation": "[N] -> { Stmt_copy[i] -> MemRef_A[i] }" }
            ]
        }]
    }"#;

    const SHIFT: &str = r#"{
        "name": "shift",
        "statements": [{
            "name": "S",
            "domain": "[N] -> { S[i] : 1 <= i < N }",
            "schedule": "[N] -> { S[i] -> [i] }",
            "accesses": [
                { "kind": "read", "relation": "[N] -> { S[i] -> MemRef_A[i - 1] }" },
                { "kind": "write", "relation": "[N] -> { S[i] -> MemRef_A[i] }" }
            ]
        }]
    }"#;

    #[test]
    fn test_scop_from_jscop() {
        let (scop, diags) = scop_from_jscop(COPY).unwrap();
        assert!(diags.is_empty());
        assert_eq!(scop.param_names(), vec!["N".to_string()]);
        assert_eq!(scop.statements.len(), 1);
        assert_eq!(scop.arrays.len(), 2);
        assert!(scop.array_by_name("MemRef_A").is_some());
        assert!(scop.context.contains(&[5]));
        assert!(!scop.context.contains(&[0]));
        let sched = scop.schedule_map();
        assert!(sched.maps()[0].contains(&[10, 3, 3]));
    }

    #[test]
    fn test_export_round_trip() {
        let (scop, _) = scop_from_jscop(COPY).unwrap();
        let text = export_jscop(&scop).unwrap();
        let (again, diags) = scop_from_jscop(&text).unwrap();
        assert!(diags.is_empty());
        assert!(again.schedule_map().is_equal(&scop.schedule_map()));
        assert!(again.accesses().is_equal(&scop.accesses()));
        assert!(again.context.is_equal(&scop.context));
    }

    #[test]
    fn test_malformed_documents() {
        assert_eq!(scop_from_jscop("{").unwrap_err().kind, ImportErrorKind::Malformed);
        let wrong_tuple = COPY.replace("{ Stmt_copy[i] : 0", "{ Other[i] : 0");
        assert_eq!(scop_from_jscop(&wrong_tuple).unwrap_err().kind, ImportErrorKind::StatementMismatch);
    }

    #[test]
    fn test_unrepresentable_schedule_falls_back() {
        let text = COPY.replace("Stmt_copy[i] -> [i] }", "Stmt_copy[i] -> [o] : o >= i }");
        let (scop, diags) = scop_from_jscop(&text).unwrap();
        assert_eq!(diags.len(), 1);
        assert!(scop.schedule_map().maps()[0].contains(&[10, 4, 4]));
    }

    #[test]
    fn test_import_rejects_illegal_schedule() {
        let (mut scop, _) = scop_from_jscop(SHIFT).unwrap();
        let mut deps = Dependences::new(&DependenceOptions::default());
        let mut doc = JscopDocument::from_scop(&scop);
        doc.statements[0].schedule = Some("[N] -> { S[i] -> [-i] }".to_string());
        let diags = import_jscop(&mut scop, &mut deps, &doc);
        assert_eq!(diags.len(), 1);
        assert!(!scop.modified);
        assert!(scop.schedule_map().maps()[0].contains(&[10, 3, 3]));
    }

    #[test]
    fn test_import_of_other_region_is_reported() {
        let (mut scop, _) = scop_from_jscop(SHIFT).unwrap();
        let mut deps = Dependences::new(&DependenceOptions::default());
        let mut doc = JscopDocument::from_scop(&scop);
        doc.statements[0].name = "T".to_string();
        doc.statements[0].schedule = Some("[N] -> { T[i] -> [-i] }".to_string());
        let diags = import_jscop(&mut scop, &mut deps, &doc);
        assert_eq!(diags.len(), 1);
        assert!(!scop.modified);
        assert!(scop.schedule_map().maps()[0].contains(&[10, 3, 3]));
    }

    #[test]
    fn test_parametric_round_trip_without_context() {
        let (scop, _) = scop_from_jscop(SHIFT).unwrap();
        assert!(scop.context.is_universe());
        let text = export_jscop(&scop).unwrap();
        assert!(text.contains("[N] -> { : }"));
        let (again, diags) = scop_from_jscop(&text).unwrap();
        assert!(diags.is_empty());
        assert_eq!(again.param_names(), vec!["N".to_string()]);
        assert!(again.context.is_equal(&scop.context));
        assert!(again.domains().is_equal(&scop.domains()));
        assert!(again.schedule_map().is_equal(&scop.schedule_map()));
        assert!(again.accesses().is_equal(&scop.accesses()));

        let mut reimported = again;
        let mut deps = Dependences::new(&DependenceOptions::default());
        let doc = JscopDocument::from_scop(&scop);
        assert!(import_jscop(&mut reimported, &mut deps, &doc).is_empty());
        assert!(!reimported.modified);
    }

    #[test]
    fn test_import_accesses() {
        let (mut scop, _) = scop_from_jscop(COPY).unwrap();
        let mut deps = Dependences::new(&DependenceOptions::default());
        let mut doc = JscopDocument::from_scop(&scop);
        doc.statements[0].accesses[0].relation = "[N] -> { Stmt_copy[i] -> MemRef_B[0] }".to_string();
        doc.statements[0].accesses[1].relation = "[N] -> { Stmt_copy[i] -> MemRef_A[i, i] }".to_string();
        let diags = import_jscop(&mut scop, &mut deps, &doc);
        assert_eq!(diags.len(), 1);
        assert!(scop.modified);
        let read = &scop.statements[0].accesses[0];
        assert!(read.new_relation.is_some());
        assert!(read.latest_relation().contains(&[10, 7, 0]));
        assert!(scop.statements[0].accesses[1].new_relation.is_none());
    }

    #[test]
    fn test_import_rejects_access_with_unknown_parameter() {
        let (mut scop, _) = scop_from_jscop(COPY).unwrap();
        let mut deps = Dependences::new(&DependenceOptions::default());
        let mut doc = JscopDocument::from_scop(&scop);
        doc.statements[0].accesses[0].relation = "[N, M] -> { Stmt_copy[i] -> MemRef_B[i + M] }".to_string();
        let diags = import_jscop(&mut scop, &mut deps, &doc);
        assert_eq!(diags.len(), 1);
        assert!(diags[0].to_string().contains("unknown parameter M"));
        assert!(!scop.modified);
        let read = &scop.statements[0].accesses[0];
        assert!(read.new_relation.is_none());
        assert_eq!(read.latest_relation().space().param_names, vec!["N".to_string()]);
        assert!(read.latest_relation().contains(&[10, 3, 3]));
    }

    #[test]
    fn test_import_context() {
        let (mut scop, _) = scop_from_jscop(COPY).unwrap();
        let mut deps = Dependences::new(&DependenceOptions::default());
        let mut doc = JscopDocument::from_scop(&scop);
        doc.context = Some("[N] -> { : N <= 100 }".to_string());
        assert!(import_jscop(&mut scop, &mut deps, &doc).is_empty());
        assert!(!scop.context.contains(&[200]));
        assert!(scop.context.contains(&[50]));

        doc.context = Some("[M] -> { : M <= 100 }".to_string());
        assert_eq!(import_jscop(&mut scop, &mut deps, &doc).len(), 1);
    }
}
