//! Code generation from schedule trees.
//!
//! The optimized (or original) schedule of a region is scanned into a loop
//! AST ([`ast_builder`]), the loops are annotated with parallelism and
//! vectorization facts ([`annotate`]) and the result is handed to an
//! emitter ([`node_builder`]). [`c`] is a reference emitter printing
//! pseudo-C.

pub mod ast_builder;
pub mod annotate;
pub mod node_builder;
pub mod c;

pub use annotate::annotate;
pub use ast_builder::AstBuilder;
pub use c::CEmitter;
pub use node_builder::{emit, CodeEmitter};

use crate::polyhedral::UnionMap;
use std::fmt;

/// Operators of AST expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstOp {
    Add,
    Sub,
    Mul,
    /// Division rounding towards negative infinity
    FloorDiv,
    /// Remainder with the sign of the divisor
    Mod,
    Min,
    Max,
    Neg,
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
    And,
    Or,
}

impl AstOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            AstOp::Add => "+",
            AstOp::Sub => "-",
            AstOp::Mul => "*",
            AstOp::FloorDiv => "floord",
            AstOp::Mod => "%",
            AstOp::Min => "min",
            AstOp::Max => "max",
            AstOp::Neg => "-",
            AstOp::Lt => "<",
            AstOp::Le => "<=",
            AstOp::Eq => "==",
            AstOp::Ge => ">=",
            AstOp::Gt => ">",
            AstOp::And => "&&",
            AstOp::Or => "||",
        }
    }
}

/// An expression in the generated AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstExpr {
    Int(i64),
    /// Loop iterator or parameter
    Id(String),
    Op(AstOp, Vec<AstExpr>),
}

impl AstExpr {
    pub fn id(name: &str) -> Self {
        AstExpr::Id(name.to_string())
    }

    pub fn op(op: AstOp, args: Vec<AstExpr>) -> Self {
        AstExpr::Op(op, args)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AstExpr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// `a + b` with constant folding of zero. Negative terms become
    /// subtractions.
    pub fn add(self, other: AstExpr) -> Self {
        match (self.as_int(), other.as_int()) {
            (Some(a), Some(b)) => return AstExpr::Int(a + b),
            (Some(0), _) => return other,
            (_, Some(0)) => return self,
            (_, Some(b)) if b < 0 => return AstExpr::Op(AstOp::Sub, vec![self, AstExpr::Int(-b)]),
            _ => {}
        }
        match other {
            AstExpr::Op(AstOp::Neg, mut args) if args.len() == 1 => {
                let arg = args.remove(0);
                AstExpr::Op(AstOp::Sub, vec![self, arg])
            }
            AstExpr::Op(AstOp::Mul, args) if matches!(args.first(), Some(AstExpr::Int(k)) if *k < 0) => {
                let k = args[0].as_int().unwrap_or(-1);
                let rest = args[1..].to_vec();
                let term = match rest.len() {
                    1 => rest[0].clone().scale(-k),
                    _ => AstExpr::Op(AstOp::Mul, std::iter::once(AstExpr::Int(-k)).chain(rest).collect()),
                };
                AstExpr::Op(AstOp::Sub, vec![self, term])
            }
            other => AstExpr::Op(AstOp::Add, vec![self, other]),
        }
    }

    /// `k * self` with folding of zero and one.
    pub fn scale(self, k: i64) -> Self {
        match (k, self.as_int()) {
            (_, Some(v)) => AstExpr::Int(k * v),
            (0, _) => AstExpr::Int(0),
            (1, _) => self,
            (-1, _) => AstExpr::Op(AstOp::Neg, vec![self]),
            _ => AstExpr::Op(AstOp::Mul, vec![AstExpr::Int(k), self]),
        }
    }

    /// `floor(self / d)` for a positive constant `d`.
    pub fn floor_div(self, d: i64) -> Self {
        match (d, self.as_int()) {
            (1, _) => self,
            (_, Some(v)) => AstExpr::Int(crate::polyhedral::expr::floor_div(v, d)),
            _ => AstExpr::Op(AstOp::FloorDiv, vec![self, AstExpr::Int(d)]),
        }
    }

    /// Fold a list with a binary min/max/and/or operator; a single element
    /// is returned as is.
    pub fn fold(op: AstOp, mut args: Vec<AstExpr>) -> Option<Self> {
        args.dedup();
        if matches!(op, AstOp::Min | AstOp::Max) && args.len() > 1 {
            let ints: Option<Vec<i64>> = args.iter().map(|a| a.as_int()).collect();
            if let Some(ints) = ints {
                let folded = if op == AstOp::Min { ints.iter().min() } else { ints.iter().max() };
                return folded.map(|v| AstExpr::Int(*v));
            }
        }
        match args.len() {
            0 => None,
            1 => args.pop(),
            _ => Some(AstExpr::Op(op, args)),
        }
    }
}

impl AstExpr {
    fn precedence(&self) -> u8 {
        match self {
            AstExpr::Int(v) if *v < 0 => 6,
            AstExpr::Int(_) | AstExpr::Id(_) => 8,
            AstExpr::Op(op, _) => match op {
                AstOp::Or => 1,
                AstOp::And => 2,
                AstOp::Lt | AstOp::Le | AstOp::Eq | AstOp::Ge | AstOp::Gt => 3,
                AstOp::Add | AstOp::Sub => 4,
                AstOp::Mul | AstOp::Mod => 5,
                AstOp::Neg => 6,
                AstOp::FloorDiv | AstOp::Min | AstOp::Max => 7,
            },
        }
    }
}

impl fmt::Display for AstExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstExpr::Int(v) => write!(f, "{}", v),
            AstExpr::Id(name) => write!(f, "{}", name),
            AstExpr::Op(op, args) => match op {
                AstOp::FloorDiv | AstOp::Min | AstOp::Max => {
                    let parts: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                    write!(f, "{}({})", op.symbol(), parts.join(", "))
                }
                AstOp::Neg => match args.first() {
                    Some(arg) if arg.precedence() > 6 => write!(f, "-{}", arg),
                    Some(arg) => write!(f, "-({})", arg),
                    None => write!(f, "0"),
                },
                _ => {
                    let own = self.precedence();
                    // left-associative: a right operand of equal precedence
                    // needs parentheses unless the operator is associative
                    let associative = matches!(op, AstOp::Add | AstOp::Mul | AstOp::And | AstOp::Or);
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, " {} ", op.symbol())?;
                        }
                        let p = arg.precedence();
                        if p < own || (i > 0 && p == own && !associative) {
                            write!(f, "({})", arg)?;
                        } else {
                            write!(f, "{}", arg)?;
                        }
                    }
                    Ok(())
                }
            },
        }
    }
}

/// Facts attached to a loop.
#[derive(Debug, Clone, Default)]
pub struct LoopAnnotation {
    /// No loop nested inside
    pub innermost: bool,
    /// Carries no validity dependence
    pub parallel: bool,
    pub innermost_parallel: bool,
    /// Parallel and not nested in another outermost-parallel loop
    pub outermost_parallel: bool,
    /// Parallel only when reductions are privatized
    pub reduction_parallel: bool,
    /// `(operator, array)` of the reductions a reduction-parallel loop has
    /// to privatize
    pub reductions: Vec<(String, String)>,
    /// Smallest distance of the dependences carried by a sequential loop
    pub min_dependence_distance: Option<i64>,
    /// Fixed vector width when the loop is emitted as straight-line
    /// vector code
    pub vector_width: Option<i64>,
    /// `{ S[x] -> [t] }` of this loop dimension for the statements inside
    pub partial_schedule: Option<UnionMap>,
}

#[derive(Debug, Clone)]
pub struct ForNode {
    pub iterator: String,
    pub init: AstExpr,
    /// Inclusive upper bound of the iterator
    pub upper: AstExpr,
    pub stride: i64,
    pub body: Box<AstNode>,
    /// Schedule dimension scanned by the loop
    pub level: usize,
    /// Constant trip count, computed for loops below a SIMD mark
    pub trip_count: Option<i64>,
    /// Unroll hint of a register tiling point loop
    pub unroll: bool,
    pub annotation: LoopAnnotation,
}

#[derive(Debug, Clone)]
pub enum AstNode {
    For(ForNode),
    If { cond: AstExpr, then: Box<AstNode> },
    Block(Vec<AstNode>),
    /// One statement instance; `args` gives the original iterators
    User { stmt: String, args: Vec<AstExpr> },
    Mark { name: String, child: Box<AstNode> },
}

impl AstNode {
    pub fn for_each_loop<F: FnMut(&ForNode)>(&self, f: &mut F) {
        match self {
            AstNode::For(node) => {
                f(node);
                node.body.for_each_loop(f);
            }
            AstNode::If { then, .. } => then.for_each_loop(f),
            AstNode::Block(children) => children.iter().for_each(|c| c.for_each_loop(f)),
            AstNode::Mark { child, .. } => child.for_each_loop(f),
            AstNode::User { .. } => {}
        }
    }

    /// Statements executed somewhere below this node.
    pub fn statements(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_statements(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_statements(&self, out: &mut Vec<String>) {
        match self {
            AstNode::For(node) => node.body.collect_statements(out),
            AstNode::If { then, .. } => then.collect_statements(out),
            AstNode::Block(children) => children.iter().for_each(|c| c.collect_statements(out)),
            AstNode::Mark { child, .. } => child.collect_statements(out),
            AstNode::User { stmt, .. } => out.push(stmt.clone()),
        }
    }

    pub fn contains_loop(&self) -> bool {
        let mut found = false;
        self.for_each_loop(&mut |_| found = true);
        found
    }
}

/// The AST of one region.
#[derive(Debug, Clone)]
pub struct Ast {
    /// Parameters read by the generated code
    pub params: Vec<String>,
    /// Run-time check selecting the optimized code; `None` when it always
    /// holds
    pub run_condition: Option<AstExpr>,
    pub root: AstNode,
}

impl Ast {
    pub fn loops(&self) -> Vec<&ForNode> {
        fn walk<'a>(node: &'a AstNode, out: &mut Vec<&'a ForNode>) {
            match node {
                AstNode::For(f) => {
                    out.push(f);
                    walk(&f.body, out);
                }
                AstNode::If { then, .. } => walk(then, out),
                AstNode::Block(children) => children.iter().for_each(|c| walk(c, out)),
                AstNode::Mark { child, .. } => walk(child, out),
                AstNode::User { .. } => {}
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expr_folding() {
        let e = AstExpr::id("c0").add(AstExpr::Int(0));
        assert_eq!(e, AstExpr::id("c0"));
        assert_eq!(AstExpr::Int(3).scale(4), AstExpr::Int(12));
        assert_eq!(AstExpr::id("N").scale(1), AstExpr::id("N"));
        assert_eq!(AstExpr::Int(-7).floor_div(2), AstExpr::Int(-4));
        assert_eq!(AstExpr::id("c0").add(AstExpr::Int(-1)).to_string(), "c0 - 1");
        assert_eq!(AstExpr::id("N").add(AstExpr::id("c0").scale(-32)).to_string(), "N - 32 * c0");
    }

    #[test]
    fn test_display_parenthesizes() {
        let sum = AstExpr::id("a").add(AstExpr::id("b"));
        let diff = AstExpr::op(AstOp::Sub, vec![AstExpr::id("x"), sum.clone()]);
        assert_eq!(diff.to_string(), "x - (a + b)");
        let cond = AstExpr::op(
            AstOp::And,
            vec![
                AstExpr::op(AstOp::Ge, vec![AstExpr::id("N"), AstExpr::Int(1)]),
                AstExpr::op(AstOp::Or, vec![AstExpr::id("p"), AstExpr::id("q")]),
            ],
        );
        assert_eq!(cond.to_string(), "N >= 1 && (p || q)");
        assert_eq!(sum.scale(2).to_string(), "2 * (a + b)");
    }

    #[test]
    fn test_fold() {
        assert!(AstExpr::fold(AstOp::Min, vec![]).is_none());
        let single = AstExpr::fold(AstOp::Min, vec![AstExpr::id("N"), AstExpr::id("N")]).unwrap();
        assert_eq!(single, AstExpr::id("N"));
        let both = AstExpr::fold(AstOp::Max, vec![AstExpr::Int(0), AstExpr::id("N")]).unwrap();
        assert_eq!(both.to_string(), "max(0, N)");
        assert_eq!(AstExpr::fold(AstOp::Min, vec![AstExpr::Int(3), AstExpr::Int(1)]), Some(AstExpr::Int(1)));
    }
}
