use nom::{
    IResult, Parser,
    bytes::complete::take_while1,
    character::complete::{char, multispace0},
    combinator::cut,
    error::ErrorKind,
    multi::many0,
    sequence::preceded,
};

use crate::ast::{Expr, NumberType, is_token_char};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Reader settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Deepest list nesting accepted
    pub max_depth: usize,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            max_depth: MAX_PARSE_DEPTH,
        }
    }
}

/// Convert nom parsing errors to structured parse errors
fn parse_error_from_nom(
    input: &str,
    error: nom::Err<nom::error::Error<&str>>,
    config: ParseConfig,
) -> ParseError {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            if e.code == ErrorKind::TooLarge {
                return ParseError::at(
                    ParseErrorKind::TooDeeplyNested,
                    format!(
                        "Expression too deeply nested (max depth: {})",
                        config.max_depth
                    ),
                    input,
                    position,
                );
            }
            if e.input.trim_start().is_empty() {
                return ParseError::at(
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input",
                    input,
                    position,
                );
            }
            let remaining: String = e.input.chars().take(10).collect();
            ParseError::at(
                ParseErrorKind::InvalidSyntax,
                format!("Invalid syntax near '{remaining}'"),
                input,
                position,
            )
        }
        nom::Err::Incomplete(_) => {
            ParseError::new(ParseErrorKind::Incomplete, "Incomplete input")
        }
    }
}

/// Turn a token into an integer if it reads as one, otherwise a symbol
fn atom_from_token(token: &str) -> Expr {
    match token.parse::<NumberType>() {
        Ok(n) => Expr::Integer(n),
        Err(_) => Expr::symbol(token),
    }
}

/// Parse a token: a maximal run of token characters
fn parse_atom(input: &str) -> IResult<&str, Expr> {
    let (input, token) = take_while1(is_token_char).parse(input)?;
    Ok((input, atom_from_token(token)))
}

/// Parse a list after its opening parenthesis. `()` reads as nil.
fn parse_list(input: &str, depth: usize, config: ParseConfig) -> IResult<&str, Expr> {
    let (input, _) = char('(').parse(input)?;
    let (input, elements) =
        many0(preceded(multispace0, |input| parse_sexpr(input, depth + 1, config))).parse(input)?;
    let (input, _) = multispace0.parse(input)?;
    // Once a list is open, a missing ')' is fatal rather than a reason to backtrack
    let (input, _) = cut(char(')')).parse(input)?;

    Ok((input, elements.into_iter().collect()))
}

/// Parse one expression, without leading whitespace
fn parse_sexpr(input: &str, depth: usize, config: ParseConfig) -> IResult<&str, Expr> {
    if depth >= config.max_depth {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    if input.starts_with('(') {
        parse_list(input, depth, config)
    } else {
        parse_atom(input)
    }
}

/// Parse a complete expression from input with default settings.
pub fn parse_scheme(input: &str) -> Result<Expr, Error> {
    parse_scheme_with_config(input, ParseConfig::default())
}

/// Parse exactly one expression. Surrounding whitespace is allowed, anything
/// else after the expression is an error.
pub fn parse_scheme_with_config(input: &str, config: ParseConfig) -> Result<Expr, Error> {
    let parsed = preceded(multispace0, |input| parse_sexpr(input, 0, config))
        .parse(input)
        .map_err(|e| parse_error_from_nom(input, e, config))?;

    match parsed {
        (remaining, expr) if remaining.trim_start().is_empty() => Ok(expr),
        (remaining, _) => {
            let position = input.len() - remaining.trim_start().len();
            Err(ParseError::at(
                ParseErrorKind::TrailingContent,
                format!("Unexpected remaining input: '{}'", remaining.trim()),
                input,
                position,
            )
            .into())
        }
    }
}
