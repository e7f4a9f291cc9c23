//! AST synthesis helpers (C3): small constructors for IR nodes the parser
//! (C4) and rewriter (C5) need to splice in, rather than building them out of
//! line at each call site. Grounded in the teacher's `Expression::call`/
//! `Expression::Pipe` builder-style construction in `expression.rs`, where a
//! higher-level operation (a pipe) is synthesized from its parts instead of
//! parsed from text.

use crate::lang::{CompareOp, Expr};
use crate::Value;
use std::path::Path;
use std::time::SystemTime;

/// A string literal expression
pub fn string_lit(s: impl Into<String>) -> Expr {
    Expr::Literal(Value::String(s.into()))
}

/// An attribute access: `value.attr`
pub fn attribute(value: Expr, attr: &str) -> Expr {
    Expr::Attribute { value: Box::new(value), attr: attr.to_string() }
}

/// `os.path.getmtime(path)`, the only recognized member of the synthetic
/// `os` namespace (§4.3.1's host builtins)
pub fn os_path_getmtime(path: Expr) -> Expr {
    let os_path = attribute(Expr::Name("os".to_string()), "path");
    Expr::Call {
        func: Box::new(attribute(os_path, "getmtime")),
        args: vec![path],
        kwargs: Vec::new(),
    }
}

/// Builds the freshness-check expression for an included file (§4.6): `true`
/// when the file's current mtime is newer than the mtime captured at include
/// time. Evaluated directly by the execution driver (C8) rather than
/// threaded through a `ResourceModified` yield — see SPEC_FULL.md §5.1 for
/// why this implementation hoists the check instead of simulating a
/// first-yielded sentinel.
pub fn mtime_check(path: &Path, captured: SystemTime) -> Expr {
    let captured_secs = captured
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Expr::Compare {
        left: Box::new(os_path_getmtime(string_lit(path.to_string_lossy()))),
        op: CompareOp::Gt,
        right: Box::new(Expr::Literal(Value::Float(captured_secs))),
    }
}
