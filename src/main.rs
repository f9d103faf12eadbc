use std::io::{self, Read};

use anyhow::Context;
use minilisp::evaluator::Interpreter;
use minilisp::scheme::parse_scheme;
use tracing_subscriber::EnvFilter;

/// Read one expression from stdin, echo it, evaluate it, print the result.
/// Any fault ends the run with a message on stderr and exit status 1.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .context("failed to read standard input")?;

    let expr = parse_scheme(&source)?;
    println!("{expr}");

    let mut interpreter = Interpreter::new();
    let result = interpreter.eval(&expr)?;
    println!("{result}");

    Ok(())
}
