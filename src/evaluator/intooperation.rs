//! Adapters from typed Rust functions to the erased [`OperationFn`] stored
//! in each `BuiltinOp`. Primitives are written as
//! `fn(i64, i64) -> Result<i64, Error>` and leave argument counting and type
//! checking to this layer.

use crate::Error;
use crate::ast::{Expr, NumberType};
use std::io::Write;
use std::sync::Arc;

/// Canonical erased primitive signature.
///
/// Primitives receive ownership of their evaluated arguments and the
/// output sink used by `print`.
pub(crate) type OperationFn =
    dyn Fn(Vec<Expr>, &mut dyn Write) -> Result<Expr, Error> + Send + Sync;

/// Conversion of a single evaluated argument into a typed parameter.
pub(crate) trait FromParam: Sized {
    fn from_arg(value: &mut Expr) -> Result<Self, Error>;
}

impl FromParam for Expr {
    fn from_arg(value: &mut Expr) -> Result<Self, Error> {
        // Move the argument out so primitives can keep it without cloning
        Ok(std::mem::replace(value, Expr::Nil))
    }
}

impl FromParam for NumberType {
    fn from_arg(value: &mut Expr) -> Result<Self, Error> {
        NumberType::try_from(std::mem::replace(value, Expr::Nil))
    }
}

/// Normalizes primitive return types to `Result<Expr, Error>`.
pub(crate) trait IntoValueResult {
    fn into_value_result(self) -> Result<Expr, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Expr>,
{
    fn into_value_result(self) -> Result<Expr, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Expr>,
{
    fn into_value_result(self) -> Result<Expr, Error> {
        Ok(self.into())
    }
}

/// Converts a typed Rust function into the erased [`OperationFn`],
/// parameterized by its argument tuple type.
pub(crate) trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// Implements `IntoOperation` for a fixed arity. The argument count is
/// checked first, then each argument is converted in order, so the first
/// ill-typed argument determines the reported error.
macro_rules! impl_into_operation_for_arity {
    ($arity:expr, $( $v:ident, $p:ident : $A:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            F: Fn( $( $A ),+ ) -> R + Send + Sync + 'static,
            $( $A: FromParam, )+
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |mut args: Vec<Expr>, _output: &mut dyn Write| {
                    let len = args.len();
                    match args.as_mut_slice() {
                        &mut [ $( ref mut $v ),+ ] => {
                            $(
                                let $p: $A = <$A as FromParam>::from_arg($v)?;
                            )+

                            let result: R = (self)( $( $p ),+ );
                            result.into_value_result()
                        }
                        _ => Err(Error::arity_error($arity, len)),
                    }
                })
            }
        }
    };
}

impl_into_operation_for_arity!(1, v0, p0: A1);
impl_into_operation_for_arity!(2, v0, p0: A1, v1, p1: A2);

/// Wraps a primitive that writes to the output sink. Only the argument
/// count is checked; the function destructures its own arguments.
pub(crate) fn output_operation<F>(arity: usize, func: F) -> Arc<OperationFn>
where
    F: Fn(Vec<Expr>, &mut dyn Write) -> Result<Expr, Error> + Send + Sync + 'static,
{
    Arc::new(move |args: Vec<Expr>, output: &mut dyn Write| {
        if args.len() != arity {
            return Err(Error::arity_error(arity, args.len()));
        }
        func(args, output)
    })
}
