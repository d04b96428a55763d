//! Pseudo-C rendering of generated code.
//!
//! Loops carry their annotations as pragmas, statement instances are
//! printed as calls with the original iterators, followed by the access
//! relations in effect when `with_accesses` is set.

use crate::codegen::node_builder::{CodeEmitter, UserStmt};
use crate::codegen::{AstExpr, ForNode};
use crate::ir::pir::Scop;

/// Indentation-aware line writer.
struct CodeFormatter {
    output: String,
    indent_level: usize,
    indent_str: &'static str,
}

impl CodeFormatter {
    fn new(indent_str: &'static str) -> Self {
        Self { output: String::new(), indent_level: 0, indent_str }
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn writeln(&mut self, line: &str) {
        for _ in 0..self.indent_level {
            self.output.push_str(self.indent_str);
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn finish(self) -> String {
        self.output
    }
}

/// Emits pseudo-C text.
pub struct CEmitter {
    f: CodeFormatter,
    with_accesses: bool,
}

impl CEmitter {
    pub fn new() -> Self {
        Self { f: CodeFormatter::new("  "), with_accesses: false }
    }

    /// Print the access relations below every statement call.
    pub fn with_accesses(mut self, enabled: bool) -> Self {
        self.with_accesses = enabled;
        self
    }
}

impl Default for CEmitter {
    fn default() -> Self {
        Self::new()
    }
}

fn loop_pragmas(node: &ForNode) -> Vec<String> {
    let a = &node.annotation;
    let mut out = Vec::new();
    if a.outermost_parallel {
        out.push("#pragma omp parallel for".to_string());
    }
    if let Some(width) = a.vector_width {
        out.push(format!("#pragma simd vectorlength({})", width));
    } else if a.innermost_parallel && !a.reduction_parallel {
        out.push("#pragma simd".to_string());
    }
    if a.reduction_parallel {
        let list: Vec<String> = a.reductions.iter().map(|(op, array)| format!("reduction ({} : {})", op, array)).collect();
        out.push(format!("#pragma known-parallel {}", list.join(" ")).trim_end().to_string());
    }
    if !a.parallel {
        if let Some(d) = a.min_dependence_distance {
            out.push(format!("#pragma minimal dependence distance: {}", d));
        }
    }
    if node.unroll {
        out.push("#pragma unroll".to_string());
    }
    out
}

impl CodeEmitter for CEmitter {
    type Output = String;

    fn begin_region(&mut self, scop: &Scop, check: Option<&AstExpr>) {
        self.f.writeln(&format!("// {}", scop.name));
        if let Some(cond) = check {
            self.f.writeln(&format!("if ({}) {{", cond));
            self.f.indent();
        }
    }

    fn end_region(&mut self, _scop: &Scop, check: Option<&AstExpr>) {
        if check.is_some() {
            self.f.dedent();
            self.f.writeln("} else {");
            self.f.indent();
            self.f.writeln("/* original code */");
            self.f.dedent();
            self.f.writeln("}");
        }
    }

    fn begin_for(&mut self, node: &ForNode) {
        for pragma in loop_pragmas(node) {
            self.f.writeln(&pragma);
        }
        self.f.writeln(&format!(
            "for (int {it} = {}; {it} <= {}; {it} += {}) {{",
            node.init,
            node.upper,
            node.stride,
            it = node.iterator
        ));
        self.f.indent();
    }

    fn end_for(&mut self, _node: &ForNode) {
        self.f.dedent();
        self.f.writeln("}");
    }

    fn begin_if(&mut self, cond: &AstExpr) {
        self.f.writeln(&format!("if ({}) {{", cond));
        self.f.indent();
    }

    fn end_if(&mut self) {
        self.f.dedent();
        self.f.writeln("}");
    }

    fn mark(&mut self, name: &str) {
        self.f.writeln(&format!("// {}", name));
    }

    fn user(&mut self, stmt: UserStmt<'_>) {
        let args: Vec<String> = stmt.args.iter().map(|a| a.to_string()).collect();
        self.f.writeln(&format!("{}({});", stmt.stmt.name, args.join(", ")));
        if self.with_accesses {
            for access in stmt.accesses() {
                self.f.writeln(&format!("//   {} {}", access.access_type.name(), access.latest_relation()));
            }
        }
    }

    fn finish(self) -> String {
        self.f.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dependence::Dependences;
    use crate::codegen::{annotate, emit, AstBuilder};
    use crate::config::Config;
    use crate::ir::pir::{AssumptionKind, AssumptionSign};
    use crate::polyhedral::parse_set;
    use crate::transform::jscop::scop_from_jscop;
    use crate::transform::optimizer::optimize_scop;

    const ROWS: &str = r#"{
        "name": "rows",
        "context": "[N] -> { : 1 <= N <= 100 }",
        "statements": [{
            "name": "Stmt_S",
            "domain": "[N] -> { Stmt_S[i, j] : 0 <= i < N and 1 <= j < N }",
            "schedule": "[N] -> { Stmt_S[i, j] -> [i, j] }",
            "accesses": [
                { "kind": "read", "relation": "[N] -> { Stmt_S[i, j] -> MemRef_A[i, j - 1] }" },
                { "kind": "write", "relation": "[N] -> { Stmt_S[i, j] -> MemRef_A[i, j] }" }
            ]
        }]
    }"#;

    fn render(scop: &Scop, with_check: bool) -> String {
        let config = Config::default();
        let mut deps = Dependences::new(&config.dependence);
        let mut ast = AstBuilder::new(scop).unwrap().build().unwrap();
        annotate(&mut ast, scop, &mut deps, &config.codegen).unwrap();
        emit(&ast, scop, CEmitter::new().with_accesses(true), with_check).unwrap()
    }

    #[test]
    fn test_loop_nest_with_pragmas() {
        let (scop, _) = scop_from_jscop(ROWS).unwrap();
        let code = render(&scop, true);
        assert!(code.starts_with("// rows\n"));
        assert!(code.contains("#pragma omp parallel for\nfor (int c0 = 0; c0 <= N - 1; c0 += 1) {"));
        assert!(code.contains("  #pragma minimal dependence distance: 1\n  for (int c1 = 1; c1 <= N - 1; c1 += 1) {"));
        assert!(code.contains("    Stmt_S(c0, c1);"));
        assert!(code.contains("//   write"));
        assert!(!code.contains("original code"));
    }

    #[test]
    fn test_register_tile_points_are_unrolled() {
        let (mut scop, _) = scop_from_jscop(ROWS).unwrap();
        let mut config = Config::default();
        config.tiling.register.enabled = true;
        let mut deps = Dependences::new(&config.dependence);
        assert!(optimize_scop(&mut scop, &mut deps, &config).is_optimized());
        let ast = AstBuilder::new(&scop).unwrap().build().unwrap();
        let loops = ast.loops();
        assert!(loops.iter().any(|l| l.unroll));
        assert!(loops.iter().filter(|l| l.unroll).all(|l| l.level >= 4));
        assert!(loops.iter().filter(|l| l.level < 4).all(|l| !l.unroll));
        let code = render(&scop, false);
        assert!(code.contains("#pragma unroll
"));
    }

    #[test]
    fn test_run_time_check_guards_region() {
        let (mut scop, _) = scop_from_jscop(ROWS).unwrap();
        let assumed = parse_set("[N] -> { : N <= 50 }").unwrap();
        scop.add_assumption(AssumptionKind::InBounds, assumed, AssumptionSign::Assumption, None);
        let code = render(&scop, true);
        assert!(code.contains("if (50 >= N) {"));
        assert!(code.contains("} else {\n  /* original code */\n}"));
        // without the check the region is emitted as is
        assert!(!render(&scop, false).contains("original code"));
    }
}
