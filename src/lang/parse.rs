//! Parser for the embedded language (C2): expressions and statement headers.
//!
//! Combinator idiom lifted directly from `slumber_template::parse` — `alt`,
//! `cut_err`, `StrContext`/`StrContextValue`, the `ws()` whitespace wrapper,
//! and `delimited_list`/`quoted_literal` helpers are all adapted from there.
//! The expression grammar (literals, arrays, objects, calls) is a direct
//! descendant of that file's `Expression` grammar, extended here with
//! operators and the statement forms the teacher has no use for.

use super::ast::{BinOp, BoolOp, CompareOp, Expr, Stmt, Target, UnaryOp};
use crate::error::LangParseError;
use crate::Value;
use std::convert;
use winnow::ascii::{dec_int, escaped, float, multispace0};
use winnow::combinator::{
    alt, cut_err, delimited, eof, fail, opt, peek, preceded, repeat,
    separated, separated_pair, terminated,
};
use winnow::error::{ContextError, StrContext, StrContextValue};
use winnow::stream::Accumulate;
use winnow::token::{one_of, take_till, take_while};
use winnow::{ModalParser, ModalResult, Parser};

/// Parse a single statement header or expression-statement from a directive
/// body (the text between `%(` and `)`, excluding the type-spec). Per
/// DESIGN.md's Open Question (i), only the first statement in the body is
/// considered; callers that need the whole body split on top-level `;` first
/// if that's ever added, but the spec treats multi-statement bodies as
/// out of scope.
pub fn parse_stmt(body: &str) -> Result<Stmt, LangParseError> {
    statement.parse(body).map_err(LangParseError::from)
}

/// Parse a standalone expression, e.g. for a bare `%(expr)` directive or an
/// `include()` argument
pub fn parse_expr(body: &str) -> Result<Expr, LangParseError> {
    terminated(expression, multispace0)
        .parse(body)
        .map_err(LangParseError::from)
}

/// Parse the header of a block-opening statement down to its trailing `:`
/// (the block body itself is assembled by the cursor-stack parser, C4, from
/// subsequent chunks — this function never sees it)
fn statement(input: &mut &str) -> ModalResult<Stmt> {
    alt((
        if_header,
        elif_header,
        else_header,
        for_header,
        while_header,
        with_header,
        try_header,
        except_header,
        finally_header,
        def_header,
        import_stmt,
        assign_stmt,
        expression.map(Stmt::Expr),
    ))
    .context(ctx_label("statement"))
    .parse_next(input)
}

/// Match a reserved word only at a real word boundary — not consumed (and
/// not committing via `cut_err`) if it's actually the prefix of a longer
/// identifier, e.g. `else` must not match inside `elsewhere`. Lets `alt` in
/// `statement` fall through to `expression`/`identifier` for those instead
/// of hard-failing the whole directive.
fn keyword<'a>(kw: &'static str) -> impl ModalParser<&'a str, &'a str, ContextError> {
    terminated(kw, peek(word_boundary))
}

fn word_boundary(input: &mut &str) -> ModalResult<()> {
    alt((eof.void(), one_of(|c: char| !(c.is_alphanumeric() || c == '_')).void())).parse_next(input)
}

fn if_header(input: &mut &str) -> ModalResult<Stmt> {
    preceded((keyword("if"), multispace0), cut_err(terminated(expression, ws(":"))))
        .map(|cond| Stmt::If { cond, body: Vec::new(), orelse: Vec::new() })
        .context(ctx_label("if"))
        .parse_next(input)
}

/// `elif` headers are parsed as a plain `If`; the cursor-stack parser (C4)
/// is responsible for nesting it inside the preceding branch's `orelse`
fn elif_header(input: &mut &str) -> ModalResult<Stmt> {
    preceded((keyword("elif"), multispace0), cut_err(terminated(expression, ws(":"))))
        .map(|cond| Stmt::If { cond, body: Vec::new(), orelse: Vec::new() })
        .context(ctx_label("elif"))
        .parse_next(input)
}

fn else_header(input: &mut &str) -> ModalResult<Stmt> {
    terminated(ws(keyword("else")), cut_err(":"))
        .map(|_| Stmt::Pass)
        .context(ctx_label("else"))
        .parse_next(input)
}

fn for_header(input: &mut &str) -> ModalResult<Stmt> {
    preceded(
        (keyword("for"), multispace0),
        cut_err((
            identifier,
            preceded(ws("in"), expression),
            preceded(ws(":"), eof),
        )),
    )
    .map(|(target, iter, _)| Stmt::For {
        target,
        iter,
        body: Vec::new(),
        orelse: Vec::new(),
    })
    .context(ctx_label("for"))
    .parse_next(input)
}

fn while_header(input: &mut &str) -> ModalResult<Stmt> {
    preceded((keyword("while"), multispace0), cut_err(terminated(expression, ws(":"))))
        .map(|cond| Stmt::While { cond, body: Vec::new(), orelse: Vec::new() })
        .context(ctx_label("while"))
        .parse_next(input)
}

fn with_header(input: &mut &str) -> ModalResult<Stmt> {
    preceded(
        (keyword("with"), multispace0),
        cut_err((
            expression,
            opt(preceded(ws("as"), identifier)),
            preceded(ws(":"), eof),
        )),
    )
    .map(|(ctx, target, _)| Stmt::With { ctx, target, body: Vec::new() })
    .context(ctx_label("with"))
    .parse_next(input)
}

fn try_header(input: &mut &str) -> ModalResult<Stmt> {
    terminated(ws(keyword("try")), cut_err(":"))
        .map(|_| Stmt::Try {
            body: Vec::new(),
            handler: Vec::new(),
            finally: Vec::new(),
        })
        .context(ctx_label("try"))
        .parse_next(input)
}

fn except_header(input: &mut &str) -> ModalResult<Stmt> {
    // Bare `except:`; a typed clause isn't part of this language
    terminated(ws(keyword("except")), cut_err(":"))
        .map(|_| Stmt::Pass)
        .context(ctx_label("except"))
        .parse_next(input)
}

fn finally_header(input: &mut &str) -> ModalResult<Stmt> {
    terminated(ws(keyword("finally")), cut_err(":"))
        .map(|_| Stmt::Pass)
        .context(ctx_label("finally"))
        .parse_next(input)
}

fn def_header(input: &mut &str) -> ModalResult<Stmt> {
    preceded(
        (keyword("def"), multispace0),
        cut_err((
            identifier,
            delimited_list('(', identifier, ')'),
            preceded(ws(":"), eof),
        )),
    )
    .map(|(name, params, _): (String, Vec<String>, _)| Stmt::FunctionDef {
        name,
        params,
        body: Vec::new(),
    })
    .context(ctx_label("def"))
    .parse_next(input)
}

fn import_stmt(input: &mut &str) -> ModalResult<Stmt> {
    preceded(
        (keyword("import"), multispace0),
        cut_err((identifier, opt(preceded(ws("as"), identifier)))),
    )
    .map(|(module, alias)| Stmt::Import { module, alias })
    .context(ctx_label("import"))
    .parse_next(input)
}

/// Assignment: `name = expr`, `name[i] = expr`, `name.attr = expr`. Tried
/// after all keyword-led headers, before falling back to a bare expression,
/// since `name = expr` would otherwise parse as a malformed expression.
fn assign_stmt(input: &mut &str) -> ModalResult<Stmt> {
    (assign_target, preceded(ws("="), expression))
        .map(|(target, value)| Stmt::Assign { target, value })
        .parse_next(input)
}

/// An assignment target is a name optionally followed by attribute/subscript
/// trailers, the last of which becomes the target itself (`a.b.c = x` targets
/// `.c` on `a.b`; `a.b[0] = x` targets `[0]` on `a.b`).
fn assign_target(input: &mut &str) -> ModalResult<Target> {
    let name = identifier.parse_next(input)?;
    let trailers: Vec<Trailer> = repeat(0.., trailer_no_call).parse_next(input)?;
    peek(ws("=")).parse_next(input)?;

    let mut base = Expr::Name(name.clone());
    let Some((last, prefix)) = trailers.split_last() else {
        return Ok(Target::Name(name));
    };
    for trailer in prefix {
        base = match trailer.clone() {
            Trailer::Attribute(attr) => Expr::Attribute { value: Box::new(base), attr },
            Trailer::Subscript(index) => {
                Expr::Subscript { value: Box::new(base), index: Box::new(index) }
            }
            Trailer::Call { .. } => unreachable!("trailer_no_call excludes calls"),
        };
    }
    Ok(match last.clone() {
        Trailer::Attribute(attr) => Target::Attribute { value: Box::new(base), attr },
        Trailer::Subscript(index) => {
            Target::Subscript { value: Box::new(base), index: Box::new(index) }
        }
        Trailer::Call { .. } => unreachable!("trailer_no_call excludes calls"),
    })
}

fn trailer_no_call(input: &mut &str) -> ModalResult<Trailer> {
    alt((
        preceded(".", cut_err(identifier)).map(Trailer::Attribute),
        delimited("[", cut_err(expression), "]").map(Trailer::Subscript),
    ))
    .parse_next(input)
}

/// Parse an expression, the top of the precedence ladder (`or`)
fn expression(input: &mut &str) -> ModalResult<Expr> {
    bool_or.context(ctx_label("expression")).parse_next(input)
}

fn bool_or(input: &mut &str) -> ModalResult<Expr> {
    let first = bool_and.parse_next(input)?;
    let rest: Vec<Expr> = repeat(0.., preceded(ws("or"), bool_and)).parse_next(input)?;
    Ok(fold_bool(BoolOp::Or, first, rest))
}

fn bool_and(input: &mut &str) -> ModalResult<Expr> {
    let first = not_expr.parse_next(input)?;
    let rest: Vec<Expr> = repeat(0.., preceded(ws("and"), not_expr)).parse_next(input)?;
    Ok(fold_bool(BoolOp::And, first, rest))
}

fn fold_bool(op: BoolOp, first: Expr, rest: Vec<Expr>) -> Expr {
    if rest.is_empty() {
        return first;
    }
    let mut values = vec![first];
    values.extend(rest);
    Expr::BoolOp { op, values }
}

fn not_expr(input: &mut &str) -> ModalResult<Expr> {
    alt((
        preceded(("not", multispace0), cut_err(not_expr))
            .map(|operand| Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand) }),
        comparison,
    ))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let left = additive.parse_next(input)?;
    let rhs: Option<(CompareOp, Expr)> = opt((compare_op, additive)).parse_next(input)?;
    Ok(match rhs {
        Some((op, right)) => {
            Expr::Compare { left: Box::new(left), op, right: Box::new(right) }
        }
        None => left,
    })
}

fn compare_op(input: &mut &str) -> ModalResult<CompareOp> {
    ws(alt((
        "==".value(CompareOp::Eq),
        "!=".value(CompareOp::Ne),
        "<=".value(CompareOp::Le),
        ">=".value(CompareOp::Ge),
        "<".value(CompareOp::Lt),
        ">".value(CompareOp::Gt),
        ("not", multispace0, "in").value(CompareOp::NotIn),
        "in".value(CompareOp::In),
    )))
    .parse_next(input)
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = multiplicative.parse_next(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (ws(alt(("+".value(BinOp::Add), "-".value(BinOp::Sub)))), multiplicative),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let first = unary.parse_next(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (
            ws(alt((
                "*".value(BinOp::Mul),
                "/".value(BinOp::Div),
                "%".value(BinOp::Mod),
            ))),
            unary,
        ),
    )
    .parse_next(input)?;
    Ok(fold_binary(first, rest))
}

fn fold_binary(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter().fold(first, |left, (op, right)| Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    alt((
        preceded(("-", multispace0), cut_err(unary))
            .map(|operand| Expr::Unary { op: UnaryOp::Negate, operand: Box::new(operand) }),
        postfix,
    ))
    .parse_next(input)
}

#[derive(Clone)]
enum Trailer {
    Attribute(String),
    Subscript(Expr),
    Call { args: Vec<Expr>, kwargs: Vec<(String, Expr)> },
}

fn trailer(input: &mut &str) -> ModalResult<Trailer> {
    alt((
        preceded(".", cut_err(identifier)).map(Trailer::Attribute),
        delimited("[", cut_err(expression), "]").map(Trailer::Subscript),
        call_args.map(|(args, kwargs)| Trailer::Call { args, kwargs }),
    ))
    .parse_next(input)
}

/// Parse the primary expression (atom) followed by any chain of
/// attribute/subscript/call trailers, e.g. `a.b[0](x)`
fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let base = primary.parse_next(input)?;
    let trailers: Vec<Trailer> = repeat(0.., trailer).parse_next(input)?;
    Ok(trailers.into_iter().fold(base, |acc, trailer| match trailer {
        Trailer::Attribute(attr) => {
            Expr::Attribute { value: Box::new(acc), attr }
        }
        Trailer::Subscript(index) => {
            Expr::Subscript { value: Box::new(acc), index: Box::new(index) }
        }
        Trailer::Call { args, kwargs } => {
            Expr::Call { func: Box::new(acc), args, kwargs }
        }
    }))
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws(alt((
        literal.map(Expr::Literal),
        list_literal.map(Expr::List),
        dict_literal.map(Expr::Dict),
        delimited("(", expression, ")"),
        identifier.map(Expr::Name),
        fail.context(ctx_expected("literal"))
            .context(ctx_expected("list"))
            .context(ctx_expected("name")),
    )))
    .parse_next(input)
}

fn literal(input: &mut &str) -> ModalResult<Value> {
    alt((
        "None".value(Value::Null),
        "True".value(Value::Boolean(true)),
        "False".value(Value::Boolean(false)),
        preceded(
            peek((
                opt('-'),
                take_while(1.., |c: char| c.is_ascii_digit()),
                one_of(['.', 'e', 'E']),
            )),
            float.map(Value::Float),
        ),
        dec_int.map(Value::Integer),
        string_literal.map(Value::String),
    ))
    .parse_next(input)
}

fn string_literal(input: &mut &str) -> ModalResult<String> {
    alt((
        quoted_literal('\'', convert::identity, convert::identity),
        quoted_literal('"', convert::identity, convert::identity),
    ))
    .context(ctx_label("string literal"))
    .parse_next(input)
}

fn list_literal(input: &mut &str) -> ModalResult<Vec<Expr>> {
    delimited_list('[', expression, ']').context(ctx_label("list")).parse_next(input)
}

fn dict_literal(input: &mut &str) -> ModalResult<Vec<(Expr, Expr)>> {
    delimited_list('{', separated_pair(expression, ws(":"), expression), '}')
        .context(ctx_label("dict"))
        .parse_next(input)
}

type CallArgs = (Vec<Expr>, Vec<(String, Expr)>);

/// Parse a function call's argument list: `(a, b, k=v)`
fn call_args(input: &mut &str) -> ModalResult<CallArgs> {
    enum Argument {
        Position(Expr),
        Keyword(String, Expr),
    }
    fn argument(input: &mut &str) -> ModalResult<Argument> {
        alt((
            separated_pair(identifier, ws("="), expression)
                .map(|(name, value)| Argument::Keyword(name, value)),
            expression.map(Argument::Position),
        ))
        .parse_next(input)
    }
    let arguments: Vec<Argument> = delimited_list('(', argument, ')').parse_next(input)?;
    let mut args = Vec::new();
    let mut kwargs = Vec::new();
    for argument in arguments {
        match argument {
            Argument::Position(expr) => args.push(expr),
            Argument::Keyword(name, expr) => kwargs.push((name, expr)),
        }
    }
    Ok((args, kwargs))
}

fn identifier(input: &mut &str) -> ModalResult<String> {
    fn is_first(c: char) -> bool {
        c.is_alphabetic() || c == '_'
    }
    fn is_rest(c: char) -> bool {
        is_first(c) || c.is_ascii_digit()
    }
    (take_while(1, is_first), cut_err(take_while(0.., is_rest)))
        .take()
        .verify(|s: &str| !is_keyword(s))
        .map(str::to_owned)
        .context(ctx_label("identifier"))
        .parse_next(input)
}

fn is_keyword(s: &str) -> bool {
    matches!(
        s,
        "if" | "elif"
            | "else"
            | "for"
            | "while"
            | "with"
            | "as"
            | "try"
            | "except"
            | "finally"
            | "def"
            | "import"
            | "and"
            | "or"
            | "not"
            | "in"
            | "None"
            | "True"
            | "False"
    )
}

fn delimited_list<'a, O, Acc, F>(
    open: char,
    parser: F,
    close: char,
) -> impl ModalParser<&'a str, Acc, ContextError>
where
    F: ModalParser<&'a str, O, ContextError>,
    Acc: Accumulate<O>,
{
    preceded(
        open,
        cut_err(terminated(
            ws(terminated(separated(0.., parser, ws(",")), opt(ws(",")))),
            close
                .context(StrContext::Expected(StrContextValue::CharLiteral(close))),
        )),
    )
}

fn quoted_literal<'a, ContentsOutput, EscapeOutput>(
    quote_char: char,
    map_contents: impl (Fn(&'a str) -> ContentsOutput) + Copy,
    map_escape: impl (Fn(char) -> EscapeOutput) + Copy,
) -> impl ModalParser<&'a str, String, ContextError>
where
    String: Accumulate<ContentsOutput> + Accumulate<EscapeOutput>,
{
    preceded(
        quote_char,
        cut_err(terminated(
            escaped(
                take_till(1.., move |c| c == quote_char || c == '\\')
                    .map(map_contents),
                '\\',
                alt((
                    "\\".value('\\'),
                    "n".value('\n'),
                    "r".value('\r'),
                    "t".value('\t'),
                    quote_char,
                ))
                .map(map_escape),
            ),
            cut_err(
                quote_char
                    .context(StrContext::Expected(StrContextValue::CharLiteral(quote_char))),
            ),
        )),
    )
}

fn ws<'a, O, F>(parser: F) -> impl ModalParser<&'a str, O, ContextError>
where
    F: ModalParser<&'a str, O, ContextError>,
{
    delimited(multispace0, parser, multispace0)
}

fn ctx_label(label: &'static str) -> StrContext {
    StrContext::Label(label)
}

fn ctx_expected(expected: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::int("42", Expr::Literal(Value::Integer(42)))]
    #[case::float("1.5", Expr::Literal(Value::Float(1.5)))]
    #[case::string("'hi'", Expr::Literal(Value::String("hi".into())))]
    #[case::name("x", Expr::Name("x".into()))]
    #[case::bool_true("True", Expr::Literal(Value::Boolean(true)))]
    #[case::none_lit("None", Expr::Literal(Value::Null))]
    fn test_parse_expr_atom(#[case] source: &str, #[case] expected: Expr) {
        assert_eq!(parse_expr(source).unwrap(), expected);
    }

    #[test]
    fn test_parse_expr_arithmetic_precedence() {
        // 1 + 2 * 3 == 1 + (2 * 3)
        let expr = parse_expr("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinOp::Add,
                left: Box::new(Expr::Literal(Value::Integer(1))),
                right: Box::new(Expr::Binary {
                    op: BinOp::Mul,
                    left: Box::new(Expr::Literal(Value::Integer(2))),
                    right: Box::new(Expr::Literal(Value::Integer(3))),
                }),
            }
        );
    }

    #[test]
    fn test_parse_expr_bool_precedence() {
        // a or b and c == a or (b and c)
        let expr = parse_expr("a or b and c").unwrap();
        assert_eq!(
            expr,
            Expr::BoolOp {
                op: BoolOp::Or,
                values: vec![
                    Expr::Name("a".into()),
                    Expr::BoolOp {
                        op: BoolOp::And,
                        values: vec![Expr::Name("b".into()), Expr::Name("c".into())],
                    },
                ],
            }
        );
    }

    #[test]
    fn test_parse_expr_call_and_attribute() {
        let expr = parse_expr("a.b(1, k=2)").unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                func: Box::new(Expr::Attribute {
                    value: Box::new(Expr::Name("a".into())),
                    attr: "b".into(),
                }),
                args: vec![Expr::Literal(Value::Integer(1))],
                kwargs: vec![("k".into(), Expr::Literal(Value::Integer(2)))],
            }
        );
    }

    #[test]
    fn test_parse_expr_subscript() {
        let expr = parse_expr("items[0]").unwrap();
        assert_eq!(
            expr,
            Expr::Subscript {
                value: Box::new(Expr::Name("items".into())),
                index: Box::new(Expr::Literal(Value::Integer(0))),
            }
        );
    }

    #[test]
    fn test_parse_expr_comparison_and_not() {
        let expr = parse_expr("not x == y").unwrap();
        assert_eq!(
            expr,
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(Expr::Compare {
                    left: Box::new(Expr::Name("x".into())),
                    op: CompareOp::Eq,
                    right: Box::new(Expr::Name("y".into())),
                }),
            }
        );
    }

    #[test]
    fn test_parse_stmt_if_header() {
        let stmt = parse_stmt("if x:").unwrap();
        assert_eq!(
            stmt,
            Stmt::If { cond: Expr::Name("x".into()), body: Vec::new(), orelse: Vec::new() }
        );
    }

    #[test]
    fn test_parse_stmt_for_header() {
        let stmt = parse_stmt("for item in items:").unwrap();
        assert_eq!(
            stmt,
            Stmt::For {
                target: "item".into(),
                iter: Expr::Name("items".into()),
                body: Vec::new(),
                orelse: Vec::new(),
            }
        );
    }

    #[test]
    fn test_parse_stmt_assign() {
        let stmt = parse_stmt("x = 1").unwrap();
        assert_eq!(
            stmt,
            Stmt::Assign {
                target: Target::Name("x".into()),
                value: Expr::Literal(Value::Integer(1)),
            }
        );
    }

    #[test]
    fn test_parse_stmt_subscript_assign() {
        let stmt = parse_stmt("args['k'] = 1").unwrap();
        assert_eq!(
            stmt,
            Stmt::Assign {
                target: Target::Subscript {
                    value: Box::new(Expr::Name("args".into())),
                    index: Box::new(Expr::Literal(Value::String("k".into()))),
                },
                value: Expr::Literal(Value::Integer(1)),
            }
        );
    }

    #[test]
    fn test_parse_stmt_def_header() {
        let stmt = parse_stmt("def greet(name):").unwrap();
        assert_eq!(
            stmt,
            Stmt::FunctionDef {
                name: "greet".into(),
                params: vec!["name".into()],
                body: Vec::new(),
            }
        );
    }

    #[test]
    fn test_parse_stmt_bare_expr() {
        let stmt = parse_stmt("f(1)").unwrap();
        assert!(matches!(stmt, Stmt::Expr(Expr::Call { .. })));
    }
}
