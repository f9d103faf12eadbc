use minilisp::ast::{Expr, nil, sym, val};
use minilisp::evaluator::{EvalConfig, Interpreter};
use minilisp::{Error, create_global_env, eval_in_env, evaluate, parse_scheme};

/// Expected outcome of a whole program
#[derive(Debug)]
enum TestResult {
    Success(Expr),
    /// Evaluation succeeds and writes exactly this through `print`
    Output(&'static str, Expr),
    /// Fails with an error whose message contains this text
    SpecificError(&'static str),
}
use TestResult::*;

fn success<T: Into<Expr>>(value: T) -> TestResult {
    Success(value.into())
}

fn run_program(source: &str) -> (Result<Expr, Error>, String) {
    let mut interpreter = Interpreter::with_output(Vec::new());
    let result = parse_scheme(source).and_then(|expr| interpreter.eval(&expr));
    let printed = String::from_utf8(interpreter.into_output()).unwrap_or_default();
    (result, printed)
}

fn run_tests(test_cases: Vec<(&str, TestResult)>) {
    for (i, (source, expected)) in test_cases.into_iter().enumerate() {
        let test_id = format!("Program #{} {source:?}", i + 1);
        let (result, printed) = run_program(source);
        match (&result, &expected) {
            (Ok(actual), Success(value)) => assert_eq!(actual, value, "{test_id}"),
            (Ok(actual), Output(text, value)) => {
                assert_eq!(actual, value, "{test_id}");
                assert_eq!(printed, *text, "{test_id}: printed output");
            }
            (Err(err), SpecificError(fragment)) => {
                let message = err.to_string();
                assert!(
                    message.contains(fragment),
                    "{test_id}: error {message:?} does not mention {fragment:?}"
                );
            }
            _ => panic!("{test_id}: expected {expected:?}, got {result:?}"),
        }
    }
}

#[test]
fn test_list_processing() {
    run_tests(vec![
        (
            "(letrec ((append (lambda (a b) \
                         (if (null? a) b (cons (car a) (append (cdr a) b)))))) \
                 (append (quote (1 2)) (quote (3 4))))",
            success([1, 2, 3, 4]),
        ),
        (
            "(letrec ((reverse (lambda (xs acc) \
                          (if (null? xs) acc (reverse (cdr xs) (cons (car xs) acc)))))) \
                 (reverse (list 1 2 3) nil))",
            success([3, 2, 1]),
        ),
        (
            "(letrec ((map (lambda (f xs) \
                          (if (null? xs) nil (cons (f (car xs)) (map f (cdr xs))))))) \
                 (map (lambda (x) (* x x)) (list 1 2 3 4)))",
            success([1, 4, 9, 16]),
        ),
        (
            "(letrec ((length (lambda (xs n) (if (null? xs) n (length (cdr xs) (+ n 1)))))) \
                 (length (quote (a b c d e)) 0))",
            success(5),
        ),
        ("(cons (quote a) (quote b))", success(Expr::cons(sym("a"), sym("b")))),
        ("(atom? (quote a))", success(sym("t"))),
        ("(atom? 3)", success(sym("t"))),
        ("(atom? nil)", success(nil())),
        ("(atom? (list 1))", success(nil())),
        ("(null? (cdr (list 1)))", success(sym("t"))),
    ]);
}

#[test]
fn test_higher_order_functions() {
    run_tests(vec![
        (
            "(letrec ((compose (lambda (f g) (lambda (x) (f (g x))))) \
                      (inc (lambda (x) (+ x 1))) \
                      (dbl (lambda (x) (* x 2)))) \
                 ((compose inc dbl) 5))",
            success(11),
        ),
        (
            "(letrec ((fold (lambda (f acc xs) \
                         (if (null? xs) acc (fold f (f acc (car xs)) (cdr xs)))))) \
                 (fold + 0 (list 1 2 3 4 5 6 7 8 9 10)))",
            success(55),
        ),
        (
            "(letrec ((make-adder (lambda (n) (lambda (x) (+ x n)))) \
                      (add5 (make-adder 5))) \
                 (add5 10))",
            success(15),
        ),
    ]);
}

#[test]
fn test_printing() {
    run_tests(vec![
        ("(print (quote hello))", Output("hello\n", sym("hello"))),
        ("(print (list 1 (list 2) nil))", Output("(1 (2) ())\n", val(vec![val(1), val([2]), nil()]))),
        (
            "(prog2 (print 1) (prog2 (print 2) 3))",
            Output("1\n2\n", val(3)),
        ),
        (
            "(letrec ((count (lambda (n) \
                          (if (> n 3) (quote done) (prog2 (print n) (count (+ n 1))))))) \
                 (count 1))",
            Output("1\n2\n3\n", sym("done")),
        ),
        // Operands are evaluated left to right
        ("(+ (print 1) (print 2))", Output("1\n2\n", val(3))),
        ("(and (print nil) (print t))", Output("()\nt\n", nil())),
    ]);
}

#[test]
fn test_error_messages() {
    run_tests(vec![
        ("(car 5)", SpecificError("Type error")),
        ("(car 5)", SpecificError("while evaluating: (car 5)")),
        ("(cons 1)", SpecificError("expression (cons 1): expected 2 arguments, got 1")),
        ("missing", SpecificError("Unbound identifier: missing")),
        ("(/ 1 0)", SpecificError("Division by zero")),
        ("(1 2 3)", SpecificError("Cannot apply non-function: 1")),
        ("(+ 1", SpecificError("Unexpected end of input")),
        ("(+ 1 2))", SpecificError("Unexpected remaining input")),
        (
            "(- -9223372036854775807 2)",
            SpecificError("Integer overflow"),
        ),
    ]);
}

#[test]
fn test_deep_tail_recursion() {
    let program = "(letrec ((loop (lambda (n acc) \
                        (if (== n 0) acc (loop (- n 1) (+ acc 1)))))) \
                    (loop 1000000 0))";
    let (result, _) = run_program(program);
    assert_eq!(result, Ok(val(1_000_000)));
}

#[test]
fn test_deep_non_tail_recursion_faults_cleanly() {
    let program = "(letrec ((depth (lambda (n) (if (== n 0) 0 (+ 1 (depth (- n 1))))))) \
                    (depth 100000))";
    let (result, _) = run_program(program);
    assert!(matches!(result, Err(Error::EvalError(_))), "{result:?}");

    // The same program within the limit
    let (result, _) = run_program(&program.replace("100000", "100"));
    assert_eq!(result, Ok(val(100)));
}

#[test]
fn test_eval_config() {
    let expr = parse_scheme(
        "(letrec ((depth (lambda (n) (if (== n 0) 0 (+ 1 (depth (- n 1))))))) (depth 50))",
    )
    .unwrap_or_else(|e| panic!("{e}"));

    let mut small = Interpreter::with_output(Vec::new()).with_config(EvalConfig { max_depth: 20 });
    assert!(small.eval(&expr).is_err());

    let mut default = Interpreter::with_output(Vec::new());
    assert_eq!(default.eval(&expr), Ok(val(50)));
}

#[test]
fn test_session_survives_faults() {
    let mut interpreter = Interpreter::with_output(Vec::new());
    let programs = ["(car nil)", "(+ 1 2)", "undefined", "(print 4)"];
    let results: Vec<bool> = programs
        .iter()
        .map(|source| parse_scheme(source).and_then(|expr| interpreter.eval(&expr)).is_ok())
        .collect();
    assert_eq!(results, vec![false, true, false, true]);
    assert_eq!(interpreter.output().as_slice(), b"4\n");
}

#[test]
fn test_returned_closures_stay_callable() {
    let programs = [
        "(letrec ((count (lambda (n acc) (if (== n 0) acc (count (- n 1) (+ acc 1)))))) count)",
        "(letrec ((even? (lambda (n) (if (== n 0) t (odd? (- n 1))))) \
                  (odd? (lambda (n) (if (== n 0) nil (even? (- n 1)))))) \
             (list even? odd?))",
    ];
    let closures: Vec<Expr> = programs
        .iter()
        .map(|source| parse_scheme(source).and_then(|expr| evaluate(&expr)))
        .collect::<Result<_, _>>()
        .unwrap_or_else(|e| panic!("{e}"));

    let env = create_global_env()
        .extend(vec!["count".into(), "pair".into()], closures)
        .unwrap_or_else(|e| panic!("{e}"));
    let cases = vec![
        ("(count 1000 0)", val(1000)),
        ("((car pair) 10)", sym("t")),
        ("((car (cdr pair)) 10)", nil()),
    ];
    for (source, expected) in cases {
        let result = parse_scheme(source).and_then(|expr| eval_in_env(&expr, &env));
        assert_eq!(result, Ok(expected), "{source}");
    }
}

#[test]
fn test_deep_data_from_tail_loops() {
    run_tests(vec![
        (
            "(letrec ((wrap (lambda (n acc) (if (== n 0) acc (wrap (- n 1) (list acc)))))) \
                 (atom? (car (car (wrap 200000 (quote x))))))",
            success(nil()),
        ),
        (
            "(letrec ((wrap (lambda (n acc) (if (== n 0) acc (wrap (- n 1) (list acc))))) \
                      (unwrap (lambda (n xs) (if (== n 0) xs (unwrap (- n 1) (car xs)))))) \
                 (unwrap 200000 (wrap 200000 (quote x))))",
            success(sym("x")),
        ),
        (
            "(letrec ((compose-all (lambda (n f) \
                          (if (== n 0) f (compose-all (- n 1) (lambda (x) (+ 1 (f x)))))))) \
                 (prog2 (compose-all 200000 (lambda (x) x)) (quote freed)))",
            success(sym("freed")),
        ),
    ]);
}
