//! IR assembler (C4): consumes the lexer's chunk stream and builds the
//! `execute` body as a tree of [`Stmt`]s via a cursor stack.
//!
//! No direct teacher analogue (the teacher parses a flat `Vec<TemplateChunk>`
//! with no tree structure at all, since its templates have no control flow).
//! The cursor-stack design here is this implementation's own, following the
//! proof recorded in DESIGN.md: `ASCEND`/`ELSE_DESCEND` only ever need to
//! mutate the last statement of the frame being ascended *into*, so a plain
//! `Vec<CursorFrame>` suffices without `Rc<RefCell<_>>` tree mutation.

use crate::builders;
use crate::error::FormatError;
use crate::lang::{self, EscapeKind, Expr, Stmt};
use crate::lexer::{self, Chunk};
use crate::Value;

/// The compiled-but-unrewritten IR for a template's `execute` body
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

/// Where a popped [`CursorFrame`]'s statements attach on the new top frame's
/// last statement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    /// The function body root; never attached anywhere, only ever the
    /// bottom of the stack
    Root,
    Body,
    OrElse,
    Handler,
    Finally,
}

struct CursorFrame {
    stmts: Vec<Stmt>,
    slot: Slot,
}

/// Parse a complete template source into its IR module (pre-rewrite)
pub fn parse_module(source: &str) -> Result<Module, FormatError> {
    let chunks = lexer::lex(source)?;
    let mut parser = Parser {
        stack: vec![CursorFrame { stmts: Vec::new(), slot: Slot::Root }],
        close_counts: Vec::new(),
        buffer: String::new(),
        lineno: 1,
    };
    parser.run(&chunks)?;
    parser.finish()
}

struct Parser {
    stack: Vec<CursorFrame>,
    /// How many `ascend`s the next close marker must perform, one entry per
    /// currently open block (bumped by `elif`, per spec §4.2 rule 5)
    close_counts: Vec<usize>,
    buffer: String,
    lineno: usize,
}

impl Parser {
    fn run(&mut self, chunks: &[Chunk<'_>]) -> Result<(), FormatError> {
        for chunk in chunks {
            match chunk {
                Chunk::Raw(text) => {
                    self.buffer.push_str(text);
                    self.lineno += count_lines(text);
                }
                Chunk::Directive { body, type_spec } => {
                    self.directive(body, *type_spec)?;
                    self.lineno += count_lines(body);
                }
                Chunk::Close => self.close()?,
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Module, FormatError> {
        self.flush_buffer();
        if self.stack.len() != 1 {
            return Err(FormatError::UnclosedBlock { count: self.stack.len() - 1 });
        }
        Ok(Module { body: self.stack.pop().expect("root frame always present").stmts })
    }

    fn flush_buffer(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        self.append_stmt(Stmt::Yield(Expr::Literal(Value::String(text))));
    }

    fn append_stmt(&mut self, stmt: Stmt) {
        self.stack.last_mut().expect("root frame always present").stmts.push(stmt);
    }

    fn push_frame(&mut self, slot: Slot) {
        self.stack.push(CursorFrame { stmts: Vec::new(), slot });
    }

    /// `ASCEND`/`ELSE_DESCEND`'s shared half: pop the current frame and
    /// attach its statements into the appropriate field of the new top
    /// frame's last statement
    fn ascend(&mut self) -> Result<(), FormatError> {
        if self.stack.len() < 2 {
            return Err(FormatError::UnexpectedClose { line: self.lineno });
        }
        let frame = self.stack.pop().expect("checked len >= 2");
        let parent = self.stack.last_mut().expect("checked len >= 2");
        let target = parent
            .stmts
            .last_mut()
            .ok_or(FormatError::UnexpectedClose { line: self.lineno })?;
        attach(target, frame.slot, frame.stmts, self.lineno)
    }

    fn directive(&mut self, body: &str, type_spec: Option<&str>) -> Result<(), FormatError> {
        self.flush_buffer();
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        if starts_with_keyword(trimmed, "elif") {
            let stmt = self.parse_header(trimmed)?;
            self.ascend()?;
            self.push_frame(Slot::OrElse);
            self.append_stmt(stmt);
            if let Some(spec) = type_spec {
                self.append_stmt(Stmt::Yield(builders::string_lit(spec)));
            }
            self.push_frame(Slot::Body);
            *self.close_counts.last_mut().ok_or(FormatError::UnexpectedClose {
                line: self.lineno,
            })? += 1;
            return Ok(());
        }
        if starts_with_keyword(trimmed, "else") {
            self.parse_header(trimmed)?;
            self.ascend()?;
            self.push_frame(Slot::OrElse);
            if let Some(spec) = type_spec {
                self.append_stmt(Stmt::Yield(builders::string_lit(spec)));
            }
            return Ok(());
        }
        if starts_with_keyword(trimmed, "except") {
            self.parse_header(trimmed)?;
            self.ascend()?;
            self.push_frame(Slot::Handler);
            if let Some(spec) = type_spec {
                self.append_stmt(Stmt::Yield(builders::string_lit(spec)));
            }
            return Ok(());
        }
        if starts_with_keyword(trimmed, "finally") {
            self.parse_header(trimmed)?;
            self.ascend()?;
            self.push_frame(Slot::Finally);
            if let Some(spec) = type_spec {
                self.append_stmt(Stmt::Yield(builders::string_lit(spec)));
            }
            return Ok(());
        }

        let stmt = self.parse_header(trimmed)?;
        if trimmed.ends_with(':') {
            self.append_stmt(stmt);
            if let Some(spec) = type_spec {
                self.append_stmt(Stmt::Yield(builders::string_lit(spec)));
            }
            self.push_frame(Slot::Body);
            self.close_counts.push(1);
        } else if let Some(spec) = type_spec {
            for stmt in wrap_type_spec(stmt, spec) {
                self.append_stmt(stmt);
            }
        } else {
            self.append_stmt(stmt);
        }
        Ok(())
    }

    fn parse_header(&self, text: &str) -> Result<Stmt, FormatError> {
        lang::parse_stmt(text)
            .map_err(|err| FormatError::Directive(err.at_line(self.lineno)))
    }

    fn close(&mut self) -> Result<(), FormatError> {
        self.flush_buffer();
        let count = self
            .close_counts
            .pop()
            .ok_or(FormatError::UnexpectedClose { line: self.lineno })?;
        for _ in 0..count {
            self.ascend()?;
        }
        Ok(())
    }
}

/// True if `trimmed` opens with `keyword` followed by a word boundary (end
/// of input, or a non-identifier character) rather than continuing into a
/// longer identifier — so a plain directive like `%(elsewhere)s` isn't
/// mistaken for an `else` clause.
fn starts_with_keyword(trimmed: &str, keyword: &str) -> bool {
    trimmed.strip_prefix(keyword).is_some_and(|rest| {
        !rest.starts_with(|c: char| c.is_alphanumeric() || c == '_')
    })
}

/// §4.4: wrap an expression-statement's value per its type-spec, or (if the
/// statement carries no value) reinsert the spec text as literal output
fn wrap_type_spec(stmt: Stmt, spec: &str) -> Vec<Stmt> {
    match stmt {
        Stmt::Expr(expr) | Stmt::Yield(expr) => {
            let wrapped = if spec.contains('q') {
                Expr::Escape { value: Box::new(expr), kind: EscapeKind::Quote }
            } else if spec.contains('m') {
                Expr::Escape { value: Box::new(expr), kind: EscapeKind::Multiline }
            } else {
                Expr::Format { value: Box::new(expr), spec: spec.to_string() }
            };
            vec![Stmt::Yield(wrapped)]
        }
        other => vec![other, Stmt::Yield(builders::string_lit(spec))],
    }
}

fn attach(target: &mut Stmt, slot: Slot, stmts: Vec<Stmt>, line: usize) -> Result<(), FormatError> {
    match (target, slot) {
        (Stmt::If { body, .. }, Slot::Body)
        | (Stmt::For { body, .. }, Slot::Body)
        | (Stmt::While { body, .. }, Slot::Body)
        | (Stmt::With { body, .. }, Slot::Body)
        | (Stmt::Try { body, .. }, Slot::Body)
        | (Stmt::FunctionDef { body, .. }, Slot::Body) => {
            *body = stmts;
            Ok(())
        }
        (Stmt::If { orelse, .. }, Slot::OrElse)
        | (Stmt::For { orelse, .. }, Slot::OrElse)
        | (Stmt::While { orelse, .. }, Slot::OrElse) => {
            *orelse = stmts;
            Ok(())
        }
        (Stmt::Try { handler, .. }, Slot::Handler) => {
            *handler = stmts;
            Ok(())
        }
        (Stmt::Try { finally, .. }, Slot::Finally) => {
            *finally = stmts;
            Ok(())
        }
        (_, Slot::Root) => unreachable!("Root is never pushed as a pop target"),
        _ => Err(FormatError::UnexpectedClose { line }),
    }
}

fn count_lines(s: &str) -> usize {
    s.matches('\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn module(source: &str) -> Module {
        parse_module(source).unwrap()
    }

    #[test]
    fn test_plain_text_only() {
        let m = module("hello world");
        assert_eq!(
            m.body,
            vec![Stmt::Yield(Expr::Literal(Value::String("hello world".into())))]
        );
    }

    #[test]
    fn test_bare_expression_stays_expr() {
        let m = module("%(name)");
        assert_eq!(m.body, vec![Stmt::Expr(Expr::Name("name".into()))]);
    }

    #[test]
    fn test_type_spec_wraps_as_yield() {
        let m = module("%(name)s");
        assert_eq!(
            m.body,
            vec![Stmt::Yield(Expr::Format {
                value: Box::new(Expr::Name("name".into())),
                spec: "s".into(),
            })]
        );
    }

    #[test]
    fn test_if_block() {
        let m = module("a%(if x:)b%/c");
        assert_eq!(
            m.body,
            vec![
                Stmt::Yield(Expr::Literal(Value::String("a".into()))),
                Stmt::If {
                    cond: Expr::Name("x".into()),
                    body: vec![Stmt::Yield(Expr::Literal(Value::String("b".into())))],
                    orelse: vec![],
                },
                Stmt::Yield(Expr::Literal(Value::String("c".into()))),
            ]
        );
    }

    #[test]
    fn test_if_else_block() {
        let m = module("%(if x:)a%(else:)b%/");
        assert_eq!(
            m.body,
            vec![Stmt::If {
                cond: Expr::Name("x".into()),
                body: vec![Stmt::Yield(Expr::Literal(Value::String("a".into())))],
                orelse: vec![Stmt::Yield(Expr::Literal(Value::String("b".into())))],
            }]
        );
    }

    #[test]
    fn test_if_elif_else_block() {
        let m = module("%(if x:)a%(elif y:)b%(else:)c%/");
        let expected = Stmt::If {
            cond: Expr::Name("x".into()),
            body: vec![Stmt::Yield(Expr::Literal(Value::String("a".into())))],
            orelse: vec![Stmt::If {
                cond: Expr::Name("y".into()),
                body: vec![Stmt::Yield(Expr::Literal(Value::String("b".into())))],
                orelse: vec![Stmt::Yield(Expr::Literal(Value::String("c".into())))],
            }],
        };
        assert_eq!(m.body, vec![expected]);
    }

    #[test]
    fn test_for_loop_block() {
        let m = module("%(for x in items:)<%(x)>%/");
        assert_eq!(
            m.body,
            vec![Stmt::For {
                target: "x".into(),
                iter: Expr::Name("items".into()),
                body: vec![
                    Stmt::Yield(Expr::Literal(Value::String("<".into()))),
                    Stmt::Expr(Expr::Name("x".into())),
                    Stmt::Yield(Expr::Literal(Value::String(">".into()))),
                ],
                orelse: vec![],
            }]
        );
    }

    #[test]
    fn test_try_except_finally_block() {
        let m = module("%(try:)a%(except:)b%(finally:)c%/");
        assert_eq!(
            m.body,
            vec![Stmt::Try {
                body: vec![Stmt::Yield(Expr::Literal(Value::String("a".into())))],
                handler: vec![Stmt::Yield(Expr::Literal(Value::String("b".into())))],
                finally: vec![Stmt::Yield(Expr::Literal(Value::String("c".into())))],
            }]
        );
    }

    #[test]
    fn test_plain_directive_not_mistaken_for_elif() {
        let m = module("%(elif_count)d");
        assert_eq!(
            m.body,
            vec![Stmt::Yield(Expr::Format {
                value: Box::new(Expr::Name("elif_count".into())),
                spec: "d".into(),
            })]
        );
    }

    #[test]
    fn test_plain_directive_not_mistaken_for_else() {
        let m = module("%(elsewhere)s");
        assert_eq!(
            m.body,
            vec![Stmt::Yield(Expr::Format {
                value: Box::new(Expr::Name("elsewhere".into())),
                spec: "s".into(),
            })]
        );
    }

    #[test]
    fn test_plain_directive_not_mistaken_for_except() {
        let m = module("%(exception_count)d");
        assert_eq!(
            m.body,
            vec![Stmt::Yield(Expr::Format {
                value: Box::new(Expr::Name("exception_count".into())),
                spec: "d".into(),
            })]
        );
    }

    #[test]
    fn test_plain_directive_not_mistaken_for_finally() {
        let m = module("%(finally_ready)s");
        assert_eq!(
            m.body,
            vec![Stmt::Yield(Expr::Format {
                value: Box::new(Expr::Name("finally_ready".into())),
                spec: "s".into(),
            })]
        );
    }

    #[test]
    fn test_unexpected_close() {
        let err = parse_module("a%/b").unwrap_err();
        assert!(matches!(err, FormatError::UnexpectedClose { .. }));
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse_module("%(if x:)a").unwrap_err();
        assert!(matches!(err, FormatError::UnclosedBlock { count: 1 }));
    }

    #[test]
    fn test_empty_directive_skipped() {
        // The empty directive produces no statement of its own, but it still
        // flushes surrounding text as two separate yields rather than merging
        // across it.
        let m = module("a%()b");
        assert_eq!(
            m.body,
            vec![
                Stmt::Yield(Expr::Literal(Value::String("a".into()))),
                Stmt::Yield(Expr::Literal(Value::String("b".into()))),
            ]
        );
    }
}
