//! Error types for the polyhedral region optimizer.
//!
//! Errors are organized by the phase that produces them. Modeling failures
//! (non-affine expressions, unschedulable regions) are not errors: they are
//! ordinary result values of the stages that detect them.

use thiserror::Error;
use std::fmt;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum PolyScopError {
    /// Error inside the polyhedral engine
    #[error("Polyhedral error: {0}")]
    Poly(#[from] PolyError),

    /// Error while parsing set/map notation
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error while building a region model
    #[error("Scop error: {0}")]
    Scop(#[from] ScopError),

    /// Error during dependence analysis
    #[error("Dependence analysis error: {0}")]
    Dependence(#[from] DependenceError),

    /// Error during scheduling
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Error while importing an external scop description
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Error during code generation
    #[error("Code generation error: {0}")]
    Codegen(#[from] CodegenError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Error inside the polyhedral engine.
#[derive(Error, Debug, Clone)]
pub struct PolyError {
    /// The error message
    pub message: String,
    /// The kind of error
    pub kind: PolyErrorKind,
}

impl PolyError {
    /// Create a new engine error.
    pub fn new(kind: PolyErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for PolyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolyErrorKind {
    /// The operation budget of the context was exhausted
    BudgetExceeded,
    /// The operation is not supported on this object
    Unsupported,
}

/// Error while parsing set/map notation.
#[derive(Error, Debug, Clone)]
pub struct ParseError {
    /// The error message
    pub message: String,
    /// Byte offset in the input
    pub offset: usize,
    /// The kind of parse error
    pub kind: ParseErrorKind,
    /// Expected tokens (if applicable)
    pub expected: Vec<String>,
    /// What was found
    pub found: Option<String>,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)?;
        if !self.expected.is_empty() {
            write!(f, " (expected: {})", self.expected.join(", "))?;
        }
        if let Some(ref found) = self.found {
            write!(f, " (found: {})", found)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Unexpected character
    UnexpectedChar,
    /// Unexpected token
    UnexpectedToken,
    /// Expected an expression
    ExpectedExpression,
    /// A product of two non-constant terms
    NonAffine,
    /// Tuples of one object disagree in arity or kind
    InconsistentSpace,
    /// Unexpected end of input
    UnexpectedEof,
}

/// Error while building a region model.
#[derive(Error, Debug, Clone)]
pub struct ScopError {
    /// The error message
    pub message: String,
    /// The kind of error
    pub kind: ScopErrorKind,
}

impl ScopError {
    /// Create a new region model error.
    pub fn new(kind: ScopErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for ScopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopErrorKind {
    /// Irreducible or otherwise irregular control flow
    IrregularControlFlow,
    /// Loop bound that cannot be expressed affinely
    NonAffineLoopBound,
    /// Call with side effects outside a non-affine subregion
    FunctionCall,
    /// The region is not single-entry/single-exit
    NotSingleEntryExit,
    /// The region contains nothing to model
    Empty,
}

/// Error during dependence analysis.
#[derive(Error, Debug, Clone)]
pub struct DependenceError {
    /// The error message
    pub message: String,
    /// The kind of dependence error
    pub kind: DependenceErrorKind,
}

impl DependenceError {
    pub fn new(kind: DependenceErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for DependenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependenceErrorKind {
    /// The operation budget was exhausted
    Timeout,
    /// The requested dependences were never computed
    NotComputed,
}

/// Error during scheduling.
#[derive(Error, Debug, Clone)]
pub struct ScheduleError {
    /// The error message
    pub message: String,
    /// The kind of schedule error
    pub kind: ScheduleErrorKind,
}

impl ScheduleError {
    pub fn new(kind: ScheduleErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleErrorKind {
    /// Invalid tile size
    InvalidTileSize,
    /// No schedule was found within the limits
    Unschedulable,
}

/// Error while importing an external scop description.
#[derive(Error, Debug, Clone)]
pub struct ImportError {
    /// The error message
    pub message: String,
    /// The kind of import error
    pub kind: ImportErrorKind,
}

impl ImportError {
    /// Create a new import error.
    pub fn new(kind: ImportErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for ImportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportErrorKind {
    /// The document is not valid JSON or lacks a field
    Malformed,
    /// Statement names do not match the region
    StatementMismatch,
    /// Parameters or arities do not match
    DimensionMismatch,
}

/// Error during code generation.
#[derive(Error, Debug, Clone)]
pub struct CodegenError {
    /// The error message
    pub message: String,
    /// The kind of codegen error
    pub kind: CodegenErrorKind,
}

impl CodegenError {
    pub fn new(kind: CodegenErrorKind, message: impl Into<String>) -> Self {
        Self { message: message.into(), kind }
    }
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodegenErrorKind {
    /// Failed to generate loop bounds
    BoundGeneration,
    /// A schedule dimension could not be inverted
    IteratorRecovery,
}

/// A diagnostic message with severity level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity level
    pub severity: DiagnosticSeverity,
    /// Message
    pub message: String,
    /// Additional notes
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    /// Error - the affected input is ignored
    Error,
    /// Warning - a default is used instead
    Warning,
    /// Note - informational message
    Note,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Create a new warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    /// Add a note to the diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            DiagnosticSeverity::Error => "error",
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Note => "note",
        };
        write!(f, "{}: {}", level, self.message)?;
        for note in &self.notes {
            write!(f, "\n  note: {}", note)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParseError {
            message: "Unexpected token".to_string(),
            offset: 5,
            kind: ParseErrorKind::UnexpectedToken,
            expected: vec!["identifier".to_string()],
            found: Some("number".to_string()),
        };
        let s = format!("{}", err);
        assert!(s.contains("Unexpected token"));
        assert!(s.contains("identifier"));
    }

    #[test]
    fn test_conversion_into_top_level() {
        let err: PolyScopError = PolyError::new(PolyErrorKind::BudgetExceeded, "out of budget").into();
        assert!(err.to_string().contains("out of budget"));
    }

    #[test]
    fn test_diagnostic_notes() {
        let d = Diagnostic::warning("invalid fusion strategy 'mid'").with_note("using 'max'");
        assert_eq!(d.severity, DiagnosticSeverity::Warning);
        assert!(d.to_string().contains("note: using 'max'"));
    }
}
