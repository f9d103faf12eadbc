//! The primitive table.
//!
//! Every primitive is defined once, in a process-wide registry built on first
//! use and never modified afterwards. Each entry records the surface names it
//! is bound to in the outermost environment, its argument count and its
//! implementation:
//!
//! ```scheme
//! (car (quote (1 2)))   ; head of a list        => 1
//! (cons 1 nil)          ; build a pair          => (1)
//! (== (quote a) (quote a))                      ; => t
//! (/ 7 2)               ; integer division      => 3
//! ```
//!
//! Primitives receive their arguments already evaluated, as an owned vector.
//! Most are plain typed Rust functions wired through the adapter layer in
//! `evaluator::intooperation`, which checks the argument count and converts
//! each argument, so `(+ 1 (quote a))` is a type error and `(+ 1)` an arity
//! error before the function body runs.
//!
//! `and` and `or` live here as ordinary primitives. Their operands are
//! evaluated like any other arguments, so both sides always run.
//!
//! ## Adding New Operations
//!
//! 1. Implement the function with typed parameters (`Expr` or `NumberType`)
//! 2. Add a `BuiltinOp` entry to `BUILTIN_OPS` with its surface names
//! 3. Add test cases to `test_builtin_function_implementations`

use crate::Error;
use crate::ast::{Expr, NumberType};
use crate::evaluator::intooperation::{IntoOperation, OperationFn, output_operation};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, LazyLock};

/// Definition of a primitive operation
pub struct BuiltinOp {
    /// Canonical name, used when printing the primitive
    pub name: &'static str,
    /// Tokens bound to this primitive in the outermost environment
    pub surface_ids: &'static [&'static str],
    /// Expected number of arguments
    pub arity: usize,
    func: Arc<OperationFn>,
}

impl std::fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("name", &self.name)
            .field("surface_ids", &self.surface_ids)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl BuiltinOp {
    /// Apply this primitive to evaluated arguments
    pub fn call(&self, args: Vec<Expr>, output: &mut dyn Write) -> Result<Expr, Error> {
        (self.func)(args, output)
    }
}

//
// Primitive implementations
//

fn builtin_head(list: Expr) -> Result<Expr, Error> {
    list.head().cloned()
}

fn builtin_tail(list: Expr) -> Result<Expr, Error> {
    list.tail().cloned()
}

fn builtin_cons(head: Expr, tail: Expr) -> Expr {
    Expr::cons(head, tail)
}

fn builtin_is_empty_list(value: Expr) -> bool {
    value.is_nil()
}

fn builtin_is_atom(value: Expr) -> bool {
    value.is_atom()
}

fn builtin_not(value: Expr) -> bool {
    value.is_nil()
}

fn builtin_and(first: Expr, second: Expr) -> bool {
    first.is_truthy() && second.is_truthy()
}

fn builtin_or(first: Expr, second: Expr) -> bool {
    first.is_truthy() || second.is_truthy()
}

fn builtin_same_value(first: Expr, second: Expr) -> bool {
    first.same_value(&second)
}

macro_rules! checked_arithmetic {
    ($name:ident, $method:ident, $op_str:expr) => {
        fn $name(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
            a.$method(b)
                .ok_or_else(|| Error::EvalError(concat!("Integer overflow in ", $op_str).into()))
        }
    };
}

checked_arithmetic!(builtin_add, checked_add, "addition");
checked_arithmetic!(builtin_sub, checked_sub, "subtraction");
checked_arithmetic!(builtin_mul, checked_mul, "multiplication");

fn builtin_div(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    if b == 0 {
        return Err(Error::DivisionByZero);
    }
    a.checked_div(b)
        .ok_or_else(|| Error::EvalError("Integer overflow in division".into()))
}

fn builtin_lt(a: NumberType, b: NumberType) -> bool {
    a < b
}

fn builtin_gt(a: NumberType, b: NumberType) -> bool {
    a > b
}

fn builtin_print(mut args: Vec<Expr>, output: &mut dyn Write) -> Result<Expr, Error> {
    let value = args.pop().unwrap_or(Expr::Nil);
    writeln!(output, "{value}")
        .and_then(|()| output.flush())
        .map_err(|e| Error::EvalError(format!("print failed: {e}")))?;
    Ok(value)
}

/// Global registry of all primitives, built once on first access.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn unary<A, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<(A,)>,
    {
        f.into_operation()
    }

    fn binary<A, B, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<(A, B)>,
    {
        f.into_operation()
    }

    vec![
        // List operations
        BuiltinOp {
            name: "head",
            surface_ids: &["car", "head"],
            arity: 1,
            func: unary::<Expr, _>(builtin_head),
        },
        BuiltinOp {
            name: "tail",
            surface_ids: &["cdr", "tail"],
            arity: 1,
            func: unary::<Expr, _>(builtin_tail),
        },
        BuiltinOp {
            name: "cons",
            surface_ids: &["cons"],
            arity: 2,
            func: binary::<Expr, Expr, _>(builtin_cons),
        },
        // Predicates
        BuiltinOp {
            name: "isEmptyList",
            surface_ids: &["null?"],
            arity: 1,
            func: unary::<Expr, _>(builtin_is_empty_list),
        },
        BuiltinOp {
            name: "isAtom",
            surface_ids: &["atom?"],
            arity: 1,
            func: unary::<Expr, _>(builtin_is_atom),
        },
        BuiltinOp {
            name: "sameValue",
            surface_ids: &["==", "eq?"],
            arity: 2,
            func: binary::<Expr, Expr, _>(builtin_same_value),
        },
        // Logic, no short-circuit: both operands arrive evaluated
        BuiltinOp {
            name: "not",
            surface_ids: &["not"],
            arity: 1,
            func: unary::<Expr, _>(builtin_not),
        },
        BuiltinOp {
            name: "and",
            surface_ids: &["and"],
            arity: 2,
            func: binary::<Expr, Expr, _>(builtin_and),
        },
        BuiltinOp {
            name: "or",
            surface_ids: &["or"],
            arity: 2,
            func: binary::<Expr, Expr, _>(builtin_or),
        },
        // Arithmetic
        BuiltinOp {
            name: "add",
            surface_ids: &["+"],
            arity: 2,
            func: binary::<NumberType, NumberType, _>(builtin_add),
        },
        BuiltinOp {
            name: "subtract",
            surface_ids: &["-"],
            arity: 2,
            func: binary::<NumberType, NumberType, _>(builtin_sub),
        },
        BuiltinOp {
            name: "multiply",
            surface_ids: &["*"],
            arity: 2,
            func: binary::<NumberType, NumberType, _>(builtin_mul),
        },
        BuiltinOp {
            name: "divide",
            surface_ids: &["/"],
            arity: 2,
            func: binary::<NumberType, NumberType, _>(builtin_div),
        },
        // Comparison
        BuiltinOp {
            name: "lessThan",
            surface_ids: &["<"],
            arity: 2,
            func: binary::<NumberType, NumberType, _>(builtin_lt),
        },
        BuiltinOp {
            name: "greaterThan",
            surface_ids: &[">"],
            arity: 2,
            func: binary::<NumberType, NumberType, _>(builtin_gt),
        },
        // Output
        BuiltinOp {
            name: "print",
            surface_ids: &["print"],
            arity: 1,
            func: output_operation(1, builtin_print),
        },
    ]
});

/// Map from surface name to primitive
static BUILTIN_BY_SURFACE_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter()
            .flat_map(|op| op.surface_ids.iter().map(move |id| (*id, op)))
            .collect()
    });

/// All primitives, in registry order
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a primitive by one of its surface names
pub fn find_builtin_op(id: &str) -> Result<&'static BuiltinOp, Error> {
    BUILTIN_BY_SURFACE_ID
        .get(id)
        .copied()
        .ok_or_else(|| Error::UnknownPrimitive(id.to_owned()))
}

/// Look up a primitive by surface name and apply it to a proper list of
/// already-evaluated arguments
pub fn call_builtin(id: &str, args: &Expr, output: &mut dyn Write) -> Result<Expr, Error> {
    find_builtin_op(id)?.call(args.to_vec()?, output)
}
