//! Driving a code emitter over an annotated AST.
//!
//! The emitter sees the structure of the generated code only; everything a
//! statement instance needs (its domain, its current access relations and
//! the original iterators as expressions of the loop iterators) is handed
//! over in [`UserStmt`].

use crate::codegen::{Ast, AstExpr, AstNode, ForNode};
use crate::ir::pir::{MemoryAccess, Scop, ScopStmt};
use crate::utils::errors::{CodegenError, CodegenErrorKind};

/// One statement instance reached by the generated code.
pub struct UserStmt<'a> {
    pub stmt: &'a ScopStmt,
    /// Original iterators, outermost first
    pub args: &'a [AstExpr],
}

impl<'a> UserStmt<'a> {
    /// Accesses of the statement; `latest_relation` is the one to emit.
    pub fn accesses(&self) -> impl Iterator<Item = &'a MemoryAccess> {
        self.stmt.accesses.iter()
    }
}

/// Receives the generated code, outermost node first.
pub trait CodeEmitter {
    type Output;

    /// Start of the optimized code. `check` is the run-time condition that
    /// must hold for it to execute.
    fn begin_region(&mut self, scop: &Scop, check: Option<&AstExpr>);
    /// End of the optimized code; the original code runs otherwise.
    fn end_region(&mut self, scop: &Scop, check: Option<&AstExpr>);
    fn begin_for(&mut self, node: &ForNode);
    fn end_for(&mut self, node: &ForNode);
    fn begin_if(&mut self, cond: &AstExpr);
    fn end_if(&mut self);
    fn mark(&mut self, name: &str);
    fn user(&mut self, stmt: UserStmt<'_>);
    fn finish(self) -> Self::Output;
}

/// Walk `ast` and feed `emitter`. `with_check` controls whether the run-time
/// condition is handed to the emitter.
pub fn emit<E: CodeEmitter>(ast: &Ast, scop: &Scop, mut emitter: E, with_check: bool) -> Result<E::Output, CodegenError> {
    let check = if with_check { ast.run_condition.as_ref() } else { None };
    emitter.begin_region(scop, check);
    emit_node(&ast.root, scop, &mut emitter)?;
    emitter.end_region(scop, check);
    Ok(emitter.finish())
}

fn emit_node<E: CodeEmitter>(node: &AstNode, scop: &Scop, emitter: &mut E) -> Result<(), CodegenError> {
    match node {
        AstNode::For(f) => {
            emitter.begin_for(f);
            emit_node(&f.body, scop, emitter)?;
            emitter.end_for(f);
        }
        AstNode::If { cond, then } => {
            emitter.begin_if(cond);
            emit_node(then, scop, emitter)?;
            emitter.end_if();
        }
        AstNode::Block(children) => {
            for c in children {
                emit_node(c, scop, emitter)?;
            }
        }
        AstNode::Mark { name, child } => {
            emitter.mark(name);
            emit_node(child, scop, emitter)?;
        }
        AstNode::User { stmt, args } => {
            let stmt = scop.stmt_by_name(stmt).ok_or_else(|| {
                CodegenError::new(CodegenErrorKind::IteratorRecovery, format!("unknown statement {}", stmt))
            })?;
            emitter.user(UserStmt { stmt, args });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::AstBuilder;
    use crate::transform::jscop::scop_from_jscop;

    /// Records the event sequence.
    #[derive(Default)]
    struct Trace(Vec<String>);

    impl CodeEmitter for Trace {
        type Output = Vec<String>;

        fn begin_region(&mut self, _: &Scop, check: Option<&AstExpr>) {
            self.0.push(format!("region {}", check.map(|c| c.to_string()).unwrap_or_default()));
        }
        fn end_region(&mut self, _: &Scop, _: Option<&AstExpr>) {
            self.0.push("end region".into());
        }
        fn begin_for(&mut self, node: &ForNode) {
            self.0.push(format!("for {}", node.iterator));
        }
        fn end_for(&mut self, _: &ForNode) {
            self.0.push("end for".into());
        }
        fn begin_if(&mut self, cond: &AstExpr) {
            self.0.push(format!("if {}", cond));
        }
        fn end_if(&mut self) {
            self.0.push("end if".into());
        }
        fn mark(&mut self, name: &str) {
            self.0.push(format!("mark {}", name));
        }
        fn user(&mut self, stmt: UserStmt<'_>) {
            self.0.push(format!("{} {} accesses", stmt.stmt.name, stmt.accesses().count()));
        }
        fn finish(self) -> Vec<String> {
            self.0
        }
    }

    #[test]
    fn test_event_order() {
        let text = r#"{
            "name": "copy",
            "statements": [{
                "name": "Stmt_S",
                "domain": "[N] -> { Stmt_S[i] : 0 <= i < N }",
                "schedule": "[N] -> { Stmt_S[i] -> [i] }",
                "accesses": [
                    { "kind": "read", "relation": "[N] -> { Stmt_S[i] -> MemRef_B[i] }" },
                    { "kind": "write", "relation": "[N] -> { Stmt_S[i] -> MemRef_A[i] }" }
                ]
            }]
        }"#;
        let (scop, _) = scop_from_jscop(text).unwrap();
        let ast = AstBuilder::new(&scop).unwrap().build().unwrap();
        let events = emit(&ast, &scop, Trace::default(), true).unwrap();
        assert_eq!(events, vec!["region ", "for c0", "Stmt_S 2 accesses", "end for", "end region"]);
    }
}
