//! This module defines the expression tree shared by the reader, the evaluator
//! and the printer. The main enum, [`Expr`], covers atoms (symbols and
//! integers), cons cells, the empty list, and the two function values the
//! evaluator produces: closures and primitives. Expressions are immutable once
//! built and cheap to clone; cons cells are reference counted.
//!
//! Ergonomic helpers such as [`val`], [`sym`] and [`nil`] are provided for
//! building trees in code and tests, together with conversions from Rust
//! integers, booleans, arrays and vectors. The `Display` impl is the printer.

use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::Error;
use crate::builtinops::BuiltinOp;
use crate::evaluator::environment::Environment;
use crate::evaluator::reclaim::{Garbage, reclaim, sole_owner};

/// Type alias for integer values in the interpreter
pub type NumberType = i64;

/// Characters allowed in a token besides ASCII letters and digits
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "<=>?_*/+-";

/// Name of the symbol predicates return for true
pub const TRUE_SYMBOL: &str = "t";

/// Check whether a character can appear in a token
pub(crate) fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Core expression type
///
/// `Nil` doubles as the empty list and as false. Everything else is true.
#[derive(Clone)]
pub enum Expr {
    /// The empty list, also false
    Nil,
    /// Symbols (identifiers), compared by name
    Symbol(Rc<str>),
    /// Fixed-width integers
    Integer(NumberType),
    /// A cons cell
    Pair(Rc<Pair>),
    /// A function value produced by `lambda`
    Closure(Rc<Closure>),
    /// A primitive from the builtin table
    Builtin(&'static BuiltinOp),
}

/// A cons cell holding a head and a tail
pub struct Pair {
    head: Expr,
    tail: Expr,
}

impl Pair {
    pub fn head(&self) -> &Expr {
        &self.head
    }

    pub fn tail(&self) -> &Expr {
        &self.tail
    }

    pub(crate) fn take_parts(&mut self) -> (Expr, Expr) {
        (
            mem::replace(&mut self.head, Expr::Nil),
            mem::replace(&mut self.tail, Expr::Nil),
        )
    }
}

// Lists nested through either side would otherwise drop one call per cell.
impl Drop for Pair {
    fn drop(&mut self) {
        if sole_owner(&self.head) || sole_owner(&self.tail) {
            let (head, tail) = self.take_parts();
            reclaim([Garbage::Expr(head), Garbage::Expr(tail)]);
        }
    }
}

/// User-defined function: formal parameters, body and the environment
/// captured when the `lambda` was evaluated
pub struct Closure {
    pub(crate) params: Vec<Rc<str>>,
    pub(crate) body: Expr,
    pub(crate) env: Environment,
}

impl Closure {
    pub fn params(&self) -> &[Rc<str>] {
        &self.params
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub(crate) fn take_parts(&mut self) -> (Expr, Environment) {
        (mem::replace(&mut self.body, Expr::Nil), mem::take(&mut self.env))
    }
}

// A closure may own the only reference to a chain of scopes whose frames
// hold further closures.
impl Drop for Closure {
    fn drop(&mut self) {
        if self.env.sole_owner() || sole_owner(&self.body) {
            let (body, env) = self.take_parts();
            reclaim([Garbage::Expr(body), Garbage::Env(env)]);
        }
    }
}

impl Expr {
    /// Build a symbol
    pub fn symbol(name: &str) -> Expr {
        Expr::Symbol(Rc::from(name))
    }

    /// Build a cons cell
    pub fn cons(head: Expr, tail: Expr) -> Expr {
        Expr::Pair(Rc::new(Pair { head, tail }))
    }

    /// The canonical true value
    pub fn t() -> Expr {
        Expr::symbol(TRUE_SYMBOL)
    }

    /// Head of a pair. Any other variant is a type error.
    pub fn head(&self) -> Result<&Expr, Error> {
        match self {
            Expr::Pair(pair) => Ok(&pair.head),
            other => Err(Error::TypeError(format!("head of non-pair: {other}"))),
        }
    }

    /// Tail of a pair. Any other variant is a type error.
    pub fn tail(&self) -> Result<&Expr, Error> {
        match self {
            Expr::Pair(pair) => Ok(&pair.tail),
            other => Err(Error::TypeError(format!("tail of non-pair: {other}"))),
        }
    }

    pub fn second(&self) -> Result<&Expr, Error> {
        self.tail()?.head()
    }

    pub fn third(&self) -> Result<&Expr, Error> {
        self.tail()?.tail()?.head()
    }

    pub fn fourth(&self) -> Result<&Expr, Error> {
        self.tail()?.tail()?.tail()?.head()
    }

    /// Check if this is the empty list (nil)
    pub fn is_nil(&self) -> bool {
        matches!(self, Expr::Nil)
    }

    /// Symbols and integers are atoms; lists and function values are not
    pub fn is_atom(&self) -> bool {
        matches!(self, Expr::Symbol(_) | Expr::Integer(_))
    }

    /// Only nil is false
    pub fn is_truthy(&self) -> bool {
        !self.is_nil()
    }

    /// Language-level equality used by `==`.
    ///
    /// Symbols compare by name, integers by value and nil equals nil.
    /// Pairs and function values are never equal to anything, not even
    /// to a pair with identical contents.
    pub fn same_value(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Symbol(a), Expr::Symbol(b)) => a == b,
            (Expr::Integer(a), Expr::Integer(b)) => a == b,
            (Expr::Nil, Expr::Nil) => true,
            _ => false,
        }
    }

    /// Iterate over the elements of a list. Iteration stops at the first
    /// tail that is not a pair; see [`Expr::to_vec`] for a checked variant.
    pub fn iter(&self) -> ListIter<'_> {
        ListIter { current: self }
    }

    /// Collect the elements of a proper list
    pub fn to_vec(&self) -> Result<Vec<Expr>, Error> {
        let mut items = self.iter();
        let elements: Vec<Expr> = items.by_ref().cloned().collect();
        if items.rest().is_nil() {
            Ok(elements)
        } else {
            Err(Error::TypeError(format!("expected a list, got {self}")))
        }
    }
}

/// Borrowing iterator over list elements
pub struct ListIter<'a> {
    current: &'a Expr,
}

impl<'a> ListIter<'a> {
    /// What is left of the list: nil once a proper list is used up, the
    /// dotted tail of an improper one
    pub fn rest(&self) -> &'a Expr {
        self.current
    }
}

impl<'a> Iterator for ListIter<'a> {
    type Item = &'a Expr;

    fn next(&mut self) -> Option<Self::Item> {
        match self.current {
            Expr::Pair(pair) => {
                self.current = &pair.tail;
                Some(&pair.head)
            }
            _ => None,
        }
    }
}

impl FromIterator<Expr> for Expr {
    fn from_iter<I: IntoIterator<Item = Expr>>(iter: I) -> Self {
        let elements: Vec<Expr> = iter.into_iter().collect();
        elements
            .into_iter()
            .rev()
            .fold(Expr::Nil, |tail, head| Expr::cons(head, tail))
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Nil => write!(f, "Nil"),
            Expr::Symbol(s) => write!(f, "Symbol({s})"),
            Expr::Integer(n) => write!(f, "Integer({n})"),
            Expr::Pair(_) => write!(f, "Pair{self}"),
            Expr::Closure(closure) => {
                write!(f, "Closure(params={:?}, body={})", closure.params, closure.body)
            }
            Expr::Builtin(op) => write!(f, "Builtin({})", op.name),
        }
    }
}

/// Printer work left over while descending into a list
enum Pending<'a> {
    /// Remaining elements of an open list
    Rest(&'a Expr),
    /// Closing parenthesis after a dotted tail
    Close,
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pending: Vec<Pending<'_>> = Vec::new();
        let mut next = Some(self);
        loop {
            match next.take() {
                Some(Expr::Pair(pair)) => {
                    f.write_str("(")?;
                    pending.push(Pending::Rest(&pair.tail));
                    next = Some(&pair.head);
                    continue;
                }
                Some(Expr::Nil) => f.write_str("()")?,
                Some(Expr::Symbol(s)) => f.write_str(s)?,
                Some(Expr::Integer(n)) => write!(f, "{n}")?,
                Some(Expr::Closure(_)) => f.write_str("#<closure>")?,
                Some(Expr::Builtin(op)) => write!(f, "#<builtin:{}>", op.name)?,
                None => {}
            }

            match pending.pop() {
                None => return Ok(()),
                Some(Pending::Rest(Expr::Nil) | Pending::Close) => f.write_str(")")?,
                Some(Pending::Rest(Expr::Pair(pair))) => {
                    f.write_str(" ")?;
                    pending.push(Pending::Rest(&pair.tail));
                    next = Some(&pair.head);
                }
                // Dotted tails print but do not read back
                Some(Pending::Rest(other)) => {
                    f.write_str(" . ")?;
                    pending.push(Pending::Close);
                    next = Some(other);
                }
            }
        }
    }
}

/// Structural equality for Rust-side comparisons (tests, tooling).
/// The language itself compares with [`Expr::same_value`].
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some(pair) = pending.pop() {
            let same = match pair {
                (Expr::Nil, Expr::Nil) => true,
                (Expr::Symbol(a), Expr::Symbol(b)) => a == b,
                (Expr::Integer(a), Expr::Integer(b)) => a == b,
                (Expr::Pair(a), Expr::Pair(b)) => {
                    if !Rc::ptr_eq(a, b) {
                        pending.push((&a.tail, &b.tail));
                        pending.push((&a.head, &b.head));
                    }
                    true
                }
                (Expr::Closure(a), Expr::Closure(b)) => Rc::ptr_eq(a, b),
                (Expr::Builtin(a), Expr::Builtin(b)) => a.name == b.name,
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

impl From<bool> for Expr {
    fn from(b: bool) -> Self {
        if b { Expr::t() } else { Expr::Nil }
    }
}

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::symbol(name)
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Expr {
            fn from(n: $int_type) -> Self {
                Expr::Integer(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Expr>> From<Vec<T>> for Expr {
    fn from(v: Vec<T>) -> Self {
        v.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Expr>, const N: usize> From<[T; N]> for Expr {
    fn from(arr: [T; N]) -> Self {
        arr.into_iter().map(Into::into).collect()
    }
}

impl TryFrom<Expr> for NumberType {
    type Error = Error;

    fn try_from(expr: Expr) -> Result<NumberType, Error> {
        if let Expr::Integer(n) = expr {
            Ok(n)
        } else {
            Err(Error::TypeError(format!("expected integer, got {expr}")))
        }
    }
}

/// Helper function for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Expr {
    Expr::symbol(name.as_ref())
}

/// Helper function for creating expressions from anything convertible.
/// Strings become symbols, vectors and arrays become proper lists.
pub fn val<T: Into<Expr>>(value: T) -> Expr {
    value.into()
}

/// Helper function for the empty list
pub fn nil() -> Expr {
    Expr::Nil
}
