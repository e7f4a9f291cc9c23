//! The embedded language (C2): a small statement-and-expression language
//! templates are compiled against. Grounded in the teacher's expression
//! grammar (`expression.rs`) and the `original_source/suba.py` reliance on
//! Python syntax, but this implementation's own since the distilled spec
//! leaves the embedded language an opaque "external collaborator".

pub mod ast;
mod exec;
mod parse;

pub use ast::{BinOp, BoolOp, CompareOp, EscapeKind, Expr, Stmt, Target, UnaryOp};
pub use exec::Interpreter;
pub use parse::{parse_expr, parse_stmt};
