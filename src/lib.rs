//! minilisp - a tail-call-eliminating evaluator for a minimal applicative Lisp
//!
//! This crate evaluates a small, purely applicative Lisp dialect built from
//! symbols, fixed-width integers and cons cells. Programs are single
//! expressions:
//!
//! ```scheme
//! (letrec ((fact (lambda (n) (if (== n 0) 1 (* n (fact (- n 1)))))))
//!   (fact 5))                       ; => 120
//! (cons 1 (cons 2 nil))             ; => (1 2)
//! (prog2 (print 1) (quote done))    ; prints 1, => done
//! ```
//!
//! ## Language
//!
//! - Special forms: `quote`, `list`, `prog2`, `if`, `lambda`, `letrec`
//! - Primitives: `car`/`head`, `cdr`/`tail`, `cons`, `null?`, `atom?`, `not`,
//!   `and`, `or`, `==`/`eq?`, `+`, `-`, `*`, `/`, `<`, `>`, `print`
//! - `nil` is both the empty list and false; every other value is true and
//!   predicates answer with the symbol `t`
//! - `and`/`or` are ordinary primitives: both operands are always evaluated
//!
//! ## Tail calls
//!
//! The evaluator is an explicit loop over the current expression and
//! environment. `if` branches, the second operand of `prog2`, the body of
//! `letrec` and the body of an applied closure are entered by replacing the
//! loop state rather than recursing, so tail-recursive programs run in
//! constant host stack. Non-tail nesting is bounded by [`MAX_EVAL_DEPTH`]
//! and reported as an error instead of overflowing the stack.
//!
//! ## Modules
//!
//! - `ast`: the expression model and its printed form
//! - `scheme`: the reader, turning text into one expression
//! - `evaluator`: environments, closures and the evaluation loop
//! - `builtinops`: the primitive table

use std::fmt;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum number of nested non-tail evaluations.
/// Tail positions reuse the current evaluation and are not counted.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Why the reader rejected its input
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// A character or token that cannot start or continue an expression
    InvalidSyntax,
    /// Input ran out inside an expression, or held no expression at all
    Incomplete,
    /// Lists nested deeper than the configured limit
    TooDeeplyNested,
    /// Something other than whitespace follows the expression
    TrailingContent,
}

/// A location in the reader's input. Lines and columns start at 1;
/// columns count characters, not bytes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SourcePosition {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    /// Position of the byte `offset` in `input`, clamped to its end
    pub fn locate(input: &str, offset: usize) -> Self {
        let offset = offset.min(input.len());
        let before = &input[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rsplit('\n')
            .next()
            .map_or(0, |current| current.chars().count())
            + 1;
        SourcePosition {
            offset,
            line,
            column,
        }
    }
}

/// Reader failure with enough detail to point at the problem
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub position: Option<SourcePosition>,
    /// Part of the offending line around the error
    pub context: Option<String>,
    /// The character the reader stopped at; `None` at end of input
    pub found: Option<char>,
}

impl ParseError {
    /// An error with no location
    pub fn new(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            position: None,
            context: None,
            found: None,
        }
    }

    /// An error located at byte `offset` of `input`
    pub fn at(kind: ParseErrorKind, message: impl Into<String>, input: &str, offset: usize) -> Self {
        const WINDOW: usize = 40;

        let position = SourcePosition::locate(input, offset);
        let line_text = input.lines().nth(position.line - 1).unwrap_or_default();
        let skipped = (position.column - 1).saturating_sub(WINDOW / 2);
        let excerpt: String = line_text.chars().skip(skipped).take(WINDOW).collect();
        let context = if skipped > 0 {
            format!("...{excerpt}")
        } else {
            excerpt
        };

        ParseError {
            found: input[position.offset..].chars().next(),
            position: Some(position),
            context: Some(context),
            ..ParseError::new(kind, message)
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(SourcePosition { line, column, .. }) = self.position {
            write!(f, " at line {line}, column {column}")?;
        }
        if let Some(found) = self.found {
            write!(f, "\n  found: {found:?}")?;
        }
        match &self.context {
            Some(context) if !context.is_empty() => write!(f, "\n  near: {context}"),
            _ => Ok(()),
        }
    }
}

/// Faults raised while reading or evaluating an expression.
///
/// Every fault stops the evaluation that raised it; nothing is retried or
/// suppressed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    #[error("Unbound identifier: {0}")]
    UnboundIdentifier(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("ArityError: {}", describe_arity(*expected, *got, expression.as_deref()))]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Unknown primitive: {0}")]
    UnknownPrimitive(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
}

impl Error {
    /// Wrong argument count, no expression known
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Wrong argument count in the given expression
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }
}

fn describe_arity(expected: usize, got: usize, expression: Option<&str>) -> String {
    match expression {
        Some(expr) => format!("expression {expr}: expected {expected} arguments, got {got}"),
        None => format!("function expected {expected} arguments but got {got}"),
    }
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::ParseError(error)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod scheme;

pub use ast::Expr;
pub use evaluator::{Interpreter, create_global_env, eval_in_env, evaluate};
pub use scheme::parse_scheme;
