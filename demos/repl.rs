//! Interactive minilisp session.
//!
//! An expression may span several lines: while the input so far is an
//! unfinished expression the prompt changes and more lines are read.

use minilisp::ast::Expr;
use minilisp::evaluator::Interpreter;
use minilisp::evaluator::environment::Environment;
use minilisp::scheme::parse_scheme;
use minilisp::{Error, ParseErrorKind};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

const PROMPT: &str = "minilisp> ";
const CONTINUATION_PROMPT: &str = "      ..> ";

enum Command {
    Help,
    Env,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Option<Command> {
        match line {
            ":help" => Some(Command::Help),
            ":env" => Some(Command::Env),
            ":quit" | ":exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

fn main() -> rustyline::Result<()> {
    println!("minilisp: a small Lisp with letrec and proper tail calls");
    println!("Enter S-expressions like: (letrec ((sq (lambda (x) (* x x)))) (sq 7))");
    println!("Type :help for more commands, or Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new()?;
    let mut interpreter = Interpreter::new();
    let mut pending = String::new();

    loop {
        let prompt = if pending.is_empty() {
            PROMPT
        } else {
            CONTINUATION_PROMPT
        };

        let line = match rl.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) if !pending.is_empty() => {
                // Ctrl+C abandons an unfinished expression
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(err) => return Err(err),
        };

        if pending.is_empty() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(command) = Command::parse(trimmed) {
                let _ = rl.add_history_entry(trimmed);
                match command {
                    Command::Help => print_help(),
                    Command::Env => print_environment(interpreter.global_env()),
                    Command::Quit => break,
                }
                continue;
            }
        }

        pending.push_str(&line);
        pending.push('\n');

        let expr = match parse_scheme(&pending) {
            Err(Error::ParseError(e)) if e.kind == ParseErrorKind::Incomplete => continue,
            parsed => parsed,
        };
        let _ = rl.add_history_entry(pending.trim_end());
        pending.clear();

        match expr.and_then(|expr| interpreter.eval(&expr)) {
            Ok(result) => println!("{result}"),
            Err(e) => println!("Error: {e}"),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  :help         - Show this help message");
    println!("  :env          - List the primitives and constants");
    println!("  :quit, :exit  - Leave the session (or Ctrl+D)");
    println!("  Ctrl+C        - Discard an unfinished multi-line expression");
    println!();
    println!("Special forms:");
    println!("  (quote x)  (list a b ...)  (prog2 a b)  (if test then else)");
    println!("  (lambda (params ...) body)  (letrec ((name value) ...) body)");
    println!();
    println!("nil is the empty list and false; every other value is true.");
    println!("Predicates answer t or nil. and/or always evaluate both operands.");
    println!();
    println!("Examples:");
    println!("  (cons 1 (cons 2 nil))");
    println!("  (letrec ((f (lambda (n) (if (== n 0) 1 (* n (f (- n 1))))))) (f 10))");
    println!();
}

fn print_environment(env: &Environment) {
    let (primitives, constants): (Vec<_>, Vec<_>) = env
        .bindings()
        .into_iter()
        .partition(|(_, value)| matches!(value, Expr::Builtin(_)));

    if !primitives.is_empty() {
        println!("Primitives ({}):", primitives.len());
        for row in primitives.chunks(4) {
            let cells: Vec<String> = row
                .iter()
                .map(|(name, value)| format!("{:<24}", format!("{name} {value}")))
                .collect();
            println!("  {}", cells.concat().trim_end());
        }
        println!();
    }

    if !constants.is_empty() {
        println!("Constants ({}):", constants.len());
        for (name, value) in constants {
            println!("  {name} = {value}");
        }
    }
}
