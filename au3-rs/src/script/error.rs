//! Fatal script errors.
//!
//! Soft errors never come through here: they travel as the `error` /
//! `extended` pair of a [`CallResult`](super::functions::CallResult) and are
//! read by scripts through `@error` and `@extended`.

use std::fmt;

use thiserror::Error;

/// What went wrong.  Location information lives on [`ScriptError`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    // ── Lexical ───────────────────────────────────────────────────────────────
    #[error("unterminated string")]
    UnterminatedString,
    #[error("illegal character '{0}'")]
    IllegalCharacter(char),
    #[error("invalid number")]
    InvalidNumber,
    #[error("expected a name after '{0}'")]
    MissingName(char),

    // ── Expression syntax ─────────────────────────────────────────────────────
    #[error("missing closing parenthesis \")\"")]
    MissingCloseParen,
    #[error("missing operator between operands")]
    MissingOperator,
    #[error("unbalanced closing parenthesis \")\"")]
    UnbalancedCloseParen,
    #[error("expected an expression")]
    ExpectedExpression,
    #[error("expected {0}")]
    Expected(&'static str),
    #[error("unexpected text after statement")]
    TrailingTokens,
    #[error("\"{0}\" cannot start a statement")]
    UnexpectedKeyword(&'static str),

    // ── Names and calls ───────────────────────────────────────────────────────
    #[error("variable used without being declared: ${0}")]
    UndeclaredVariable(String),
    #[error("unknown macro: @{0}")]
    UnknownMacro(String),
    #[error("unknown function name: {0}")]
    UnknownFunction(String),
    #[error("duplicate function name: {0}")]
    DuplicateFunction(String),
    #[error("incorrect number of parameters in call to {name}: got {given}, expected {min}..={max}")]
    Arity {
        name: String,
        given: usize,
        min: usize,
        max: usize,
    },
    #[error("recursion level has been exceeded ({0})")]
    RecursionLimit(usize),
    #[error("badly formatted \"Func\" statement: {0}")]
    BadFunctionHeader(&'static str),

    // ── Variables and arrays ──────────────────────────────────────────────────
    #[error("subscript used with non-array variable")]
    NotAnArray,
    #[error("array has incorrect number of subscripts or subscript is out of range")]
    BadSubscript,
    #[error("invalid array dimensions: {0}")]
    BadDimensions(&'static str),
    #[error("an array cannot be stored in an array element")]
    NestedArray,
    #[error("cannot assign to constant ${0}")]
    AssignToConstant(String),

    // ── Block structure ───────────────────────────────────────────────────────
    #[error("\"{found}\" statement with no matching \"{opener}\"")]
    Unmatched {
        found: &'static str,
        opener: &'static str,
    },
    #[error("\"{opener}\" statement is missing its \"{closer}\"")]
    Unclosed {
        opener: &'static str,
        closer: &'static str,
    },
    #[error("\"{0}\" used outside of a loop")]
    NotInLoop(&'static str),
    #[error("\"Return\" is not allowed outside of a function")]
    ReturnOutsideFunction,
    #[error("\"Func\" cannot be declared inside another function or block")]
    NestedFunc,

    // ── Sources ───────────────────────────────────────────────────────────────
    #[error("cannot open include file {path}: {reason}")]
    Include { path: String, reason: String },

    // ── Control ───────────────────────────────────────────────────────────────
    /// Not a fault: `Exit` or a host quit happened inside a nested call and
    /// the statement that made the call must not continue.
    #[error("script is quitting")]
    Quitting,
}

/// The source line a fatal error is attributed to.
#[derive(Debug, Clone, PartialEq)]
pub struct LineInfo {
    /// Name of the source unit (main script or include file).
    pub unit: String,
    /// 1-based line number within `unit`.
    pub line: usize,
    /// The logical line text as it was lexed.
    pub text: String,
}

/// An unrecoverable error: execution stops and the host is told why.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptError {
    pub kind: ErrorKind,
    /// 1-based column, when the failing construct has one.
    pub column: Option<usize>,
    pub line: Option<LineInfo>,
}

impl ScriptError {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, column: None, line: None }
    }

    /// Attach a column on the current line.  An error that already carries
    /// a line came from another line (a called function's body), and a
    /// column from here would point into the wrong text.
    pub fn at_column(mut self, column: usize) -> Self {
        if self.line.is_none() {
            self.column.get_or_insert(column);
        }
        self
    }

    /// Attach a line unless a more precise (inner) one is already present.
    pub fn with_line(mut self, info: impl FnOnce() -> LineInfo) -> Self {
        if self.line.is_none() {
            self.line = Some(info());
        }
        self
    }

    /// Multi-line diagnostic in the classic "line, caret, message" layout.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if let Some(info) = &self.line {
            out.push_str(&format!("{} (line {}):\n\n", info.unit, info.line));
            out.push_str(&format!("    {}\n", info.text.trim_end()));
            if let Some(col) = self.column {
                out.push_str(&format!("    {}^ ERROR\n", " ".repeat(col.saturating_sub(1))));
            }
            out.push('\n');
        }
        out.push_str(&format!("Error: {}", self.kind));
        out
    }
}

impl From<ErrorKind> for ScriptError {
    fn from(kind: ErrorKind) -> Self {
        ScriptError::new(kind)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.line, self.column) {
            (Some(info), Some(col)) => {
                write!(f, "{} line {}, column {}: {}", info.unit, info.line, col, self.kind)
            }
            (Some(info), None) => write!(f, "{} line {}: {}", info.unit, info.line, self.kind),
            (None, _) => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for ScriptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

/// Lexing failure for one line.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("line {line}, column {column}: {kind}")]
pub struct LexError {
    pub kind: ErrorKind,
    /// Global (0-based) line index.
    pub line: usize,
    /// 1-based column where the offending token starts.
    pub column: usize,
}

impl From<LexError> for ScriptError {
    fn from(e: LexError) -> Self {
        ScriptError::new(e.kind).at_column(e.column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_location_wins() {
        let err = ScriptError::new(ErrorKind::MissingOperator)
            .with_line(|| LineInfo { unit: "inner.au3".into(), line: 3, text: "x".into() })
            .with_line(|| LineInfo { unit: "outer.au3".into(), line: 9, text: "y".into() });
        assert_eq!(err.line.unwrap().unit, "inner.au3");
    }

    #[test]
    fn report_has_caret_under_column() {
        let err = ScriptError::new(ErrorKind::MissingCloseParen)
            .at_column(6)
            .with_line(|| LineInfo { unit: "t.au3".into(), line: 1, text: "$x = (1 + 2".into() });
        let report = err.report();
        assert!(report.contains("t.au3 (line 1)"));
        assert!(report.contains("         ^ ERROR"));
        assert!(report.ends_with("Error: missing closing parenthesis \")\""));
    }

    #[test]
    fn column_is_not_borrowed_from_the_caller() {
        let located = ScriptError::new(ErrorKind::UnknownMacro("NOPE".into()))
            .with_line(|| LineInfo { unit: "t.au3".into(), line: 2, text: "  Return @Nope".into() })
            .at_column(10);
        assert_eq!(located.column, None);

        let bare = ScriptError::new(ErrorKind::MissingOperator).at_column(4).at_column(10);
        assert_eq!(bare.column, Some(4));
    }

    #[test]
    fn display_without_location() {
        let err = ScriptError::new(ErrorKind::UnknownMacro("FOO".into()));
        assert_eq!(err.to_string(), "unknown macro: @FOO");
    }
}
