//! The evaluator.
//!
//! [`Interpreter::eval_in_env`] is a loop over the pair (current expression,
//! current environment). Forms whose value is the value of a sub-expression
//! in tail position (`if` branches, the second operand of `prog2`, the body
//! of `letrec`, the body of an applied closure) replace the loop state and
//! go round again instead of recursing. Everything else (tests, operands,
//! `letrec` right-hand sides) is an ordinary nested call, counted against
//! [`EvalConfig::max_depth`].

pub mod environment;
pub(crate) mod intooperation;
pub(crate) mod reclaim;

use std::io::{self, Write};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Closure, Expr, TRUE_SYMBOL};
use crate::builtinops::get_builtin_ops;
use crate::{Error, MAX_EVAL_DEPTH};
use environment::{Environment, Frame};
use reclaim::collect_cycles;

/// Evaluator settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalConfig {
    /// Deepest nesting of non-tail evaluations before giving up
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_depth: MAX_EVAL_DEPTH,
        }
    }
}

/// Create the outermost environment: every primitive under each of its
/// surface names, plus the constants `nil` and `t`.
pub fn create_global_env() -> Environment {
    let constants: [(Rc<str>, Expr); 2] = [
        (Rc::from("nil"), Expr::Nil),
        (Rc::from(TRUE_SYMBOL), Expr::t()),
    ];
    let primitives = get_builtin_ops().iter().flat_map(|op| {
        op.surface_ids
            .iter()
            .map(move |id| (Rc::from(*id), Expr::Builtin(op)))
    });

    Environment::from_bindings(constants.into_iter().chain(primitives))
}

/// Evaluate an expression against the primitive environment, printing to stdout
pub fn evaluate(expr: &Expr) -> Result<Expr, Error> {
    Interpreter::new().eval(expr)
}

/// Evaluate an expression in a given environment, printing to stdout
pub fn eval_in_env(expr: &Expr, env: &Environment) -> Result<Expr, Error> {
    Interpreter::new().eval_in_env(expr, env)
}

/// Fewest tracked frames worth tracing for cycles
const MIN_COLLECTION_THRESHOLD: usize = 64;

/// Closed `letrec` frames that may sit on reference cycles. A closure bound
/// by `letrec` captured the frame it is bound in, directly or through a
/// list, so these frames are traced from time to time and released once
/// nothing outside their cycles refers to them.
#[derive(Debug)]
struct LetrecFrames {
    frames: Vec<Rc<Frame>>,
    /// Collect when this many frames are tracked
    next_collection: usize,
    /// Most frames tracked at once
    peak: usize,
}

impl Default for LetrecFrames {
    fn default() -> Self {
        LetrecFrames {
            frames: Vec::new(),
            next_collection: MIN_COLLECTION_THRESHOLD,
            peak: 0,
        }
    }
}

impl LetrecFrames {
    fn track(&mut self, frame: Rc<Frame>) {
        self.frames.push(frame);
        self.peak = self.peak.max(self.frames.len());
    }

    fn collect_if_due(&mut self) {
        if self.frames.len() >= self.next_collection {
            self.collect();
        }
    }

    fn collect(&mut self) -> usize {
        if self.frames.is_empty() {
            return 0;
        }
        let released = collect_cycles(&mut self.frames);
        self.next_collection = (2 * self.frames.len()).max(MIN_COLLECTION_THRESHOLD);
        debug!(
            released,
            tracked = self.frames.len(),
            peak = self.peak,
            "collected letrec frames"
        );
        released
    }
}

// Frames still referenced from outside when the session ends stay with
// whoever holds those references.
impl Drop for LetrecFrames {
    fn drop(&mut self) {
        self.collect();
    }
}

/// An evaluation session.
///
/// Owns the output sink used by `print` and keeps track of the `letrec`
/// frames created while evaluating, releasing them once they are garbage.
/// Closures returned from a session stay usable after it ends.
pub struct Interpreter<W: Write = io::Stdout> {
    global: Environment,
    output: W,
    config: EvalConfig,
    letrec_frames: LetrecFrames,
}

impl Interpreter<io::Stdout> {
    pub fn new() -> Self {
        Interpreter::with_output(io::stdout())
    }
}

impl Default for Interpreter<io::Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Interpreter<W> {
    /// A session whose `print` output goes to `output`
    pub fn with_output(output: W) -> Self {
        Interpreter {
            global: create_global_env(),
            output,
            config: EvalConfig::default(),
            letrec_frames: LetrecFrames::default(),
        }
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    /// The primitive environment this session evaluates against
    pub fn global_env(&self) -> &Environment {
        &self.global
    }

    pub fn output(&self) -> &W {
        &self.output
    }

    /// End the session and hand back the output sink
    pub fn into_output(self) -> W {
        let Interpreter { output, .. } = self;
        output
    }

    /// Evaluate against the primitive environment
    pub fn eval(&mut self, expr: &Expr) -> Result<Expr, Error> {
        let global = self.global.clone();
        self.eval_in_env(expr, &global)
    }

    /// Evaluate in the given environment
    pub fn eval_in_env(&mut self, expr: &Expr, env: &Environment) -> Result<Expr, Error> {
        debug!(expression = %expr, "evaluating");
        let result = self.eval_with_depth(expr, env, 0);
        self.letrec_frames.collect();
        result
    }

    fn eval_with_depth(
        &mut self,
        expr: &Expr,
        env: &Environment,
        depth: usize,
    ) -> Result<Expr, Error> {
        if depth >= self.config.max_depth {
            return Err(Error::EvalError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.config.max_depth
            )));
        }

        let mut expr = expr.clone();
        let mut env = env.clone();

        loop {
            let (operator, operands) = match &expr {
                Expr::Symbol(name) => return env.lookup(name),
                Expr::Integer(_) | Expr::Nil | Expr::Closure(_) | Expr::Builtin(_) => {
                    return Ok(expr.clone());
                }
                Expr::Pair(pair) => (pair.head().clone(), pair.tail().clone()),
            };

            if let Expr::Symbol(keyword) = &operator {
                match &**keyword {
                    "quote" => {
                        let [quoted] = form_operands("quote", &expr, &operands)?;
                        return Ok(quoted);
                    }
                    "list" => return self.eval_list(&operands, &env, depth),
                    "prog2" => {
                        let [first, second] = form_operands("prog2", &expr, &operands)?;
                        self.eval_with_depth(&first, &env, depth + 1)?;
                        expr = second;
                        continue;
                    }
                    "if" => {
                        let [test, consequent, alternative] =
                            form_operands("if", &expr, &operands)?;
                        let condition = self.eval_with_depth(&test, &env, depth + 1)?;
                        expr = if condition.is_truthy() {
                            consequent
                        } else {
                            alternative
                        };
                        continue;
                    }
                    "lambda" => {
                        let [formals, body] = form_operands("lambda", &expr, &operands)?;
                        return Ok(Expr::Closure(Rc::new(Closure {
                            params: parse_formals(&formals)?,
                            body,
                            env,
                        })));
                    }
                    "letrec" => {
                        let [bindings, body] = form_operands("letrec", &expr, &operands)?;
                        env = self.eval_letrec(&bindings, &env, depth)?;
                        expr = body;
                        continue;
                    }
                    _ => {}
                }
            }

            // Application
            let function = self.eval_with_depth(&operator, &env, depth + 1)?;
            let args = self.eval_operands(&operands, &env, depth)?;

            match function {
                Expr::Builtin(op) => {
                    return op
                        .call(args, &mut self.output)
                        .map_err(|err| add_context(err, &expr));
                }
                Expr::Closure(closure) => {
                    if closure.params.len() != args.len() {
                        return Err(Error::arity_error_with_expr(
                            closure.params.len(),
                            args.len(),
                            expr.to_string(),
                        ));
                    }
                    trace!(params = closure.params.len(), "tail call into closure body");
                    env = closure.env.extend(closure.params.clone(), args)?;
                    expr = closure.body.clone();
                    self.letrec_frames.collect_if_due();
                }
                other => {
                    return Err(add_context(
                        Error::TypeError(format!("Cannot apply non-function: {other}")),
                        &expr,
                    ));
                }
            }
        }
    }

    /// Evaluate each operand left to right
    fn eval_operands(
        &mut self,
        operands: &Expr,
        env: &Environment,
        depth: usize,
    ) -> Result<Vec<Expr>, Error> {
        let operands = operands.to_vec()?;
        let mut values = Vec::with_capacity(operands.len());
        for operand in &operands {
            values.push(self.eval_with_depth(operand, env, depth + 1)?);
        }
        Ok(values)
    }

    fn eval_list(&mut self, operands: &Expr, env: &Environment, depth: usize) -> Result<Expr, Error> {
        Ok(self.eval_operands(operands, env, depth)?.into_iter().collect())
    }

    /// Evaluate `letrec` bindings and return the environment for its body.
    ///
    /// The new frame is pushed before any right-hand side is evaluated, so
    /// lambdas among them capture it while it is still open and see the
    /// finished bindings once it is closed.
    fn eval_letrec(
        &mut self,
        bindings: &Expr,
        env: &Environment,
        depth: usize,
    ) -> Result<Environment, Error> {
        let frame = Frame::open();
        let inner = env.extend_with(frame.clone());

        let mut names = Vec::new();
        let mut values = Vec::new();
        for binding in bindings.to_vec()? {
            let [name, value_expr] = form_operands("letrec binding", &binding, &binding)?;
            let Expr::Symbol(name) = name else {
                return Err(Error::TypeError(format!(
                    "letrec binding name must be a symbol, got {name}"
                )));
            };
            values.push(self.eval_with_depth(&value_expr, &inner, depth + 1)?);
            names.push(name);
        }

        debug!(names = ?names, "closing letrec frame");
        frame.close(names, values)?;
        if frame.may_form_cycle() {
            self.letrec_frames.track(frame);
        }
        Ok(inner)
    }
}

/// Destructure the operands of a special form into exactly `N` expressions
fn form_operands<const N: usize>(
    form: &str,
    expr: &Expr,
    operands: &Expr,
) -> Result<[Expr; N], Error> {
    let items = operands
        .to_vec()
        .map_err(|_| Error::TypeError(format!("malformed {form}: {expr}")))?;
    let got = items.len();
    items
        .try_into()
        .map_err(|_| Error::arity_error_with_expr(N, got, expr.to_string()))
}

/// Formal parameters must be a proper list of symbols
fn parse_formals(formals: &Expr) -> Result<Vec<Rc<str>>, Error> {
    formals
        .to_vec()
        .map_err(|_| Error::TypeError(format!("lambda parameters must be a list, got {formals}")))?
        .into_iter()
        .map(|param| match param {
            Expr::Symbol(name) => Ok(name),
            other => Err(Error::TypeError(format!(
                "lambda parameters must be symbols, got {other}"
            ))),
        })
        .collect()
}

/// Attach the failing application to type and arity errors
fn add_context(error: Error, expr: &Expr) -> Error {
    match error {
        Error::TypeError(msg) => {
            Error::TypeError(format!("{msg}\n  Context: while evaluating: {expr}"))
        }
        Error::ArityError {
            expected,
            got,
            expression: None,
        } => Error::arity_error_with_expr(expected, got, expr.to_string()),
        other => other,
    }
}
