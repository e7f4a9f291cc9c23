//! Include resolver (C6): path-sandboxed file resolution for `include()`
//! calls encountered by the rewriter (§4.6).

use crate::builders;
use crate::cache::{self, SourceId};
use crate::error::FormatError;
use crate::lang::{Expr, Stmt};
use crate::parser;
use crate::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Resolve an `include(filename[, root][, root=path])` call: sandbox and
/// join the path, read and parse the file (through the include cache), and
/// build its freshness-check expression.
///
/// Returns the freshness check and the included template's raw (unrewritten)
/// body; the caller (rewriter pass (d)) splices the body in place and
/// recurses the transform into it.
pub fn resolve(args: &[Expr], kwargs: &[(String, Expr)], caller_root: &Path) -> Result<(Expr, Vec<Stmt>), FormatError> {
    let (filename, root_override) = include_arguments(args, kwargs)?;
    let base = root_override.unwrap_or_else(|| caller_root.to_path_buf());
    let relative = sandbox_path(&filename)?;
    let path = base.join(relative);

    let mtime = fs::metadata(&path)
        .and_then(|meta| meta.modified())
        .map_err(|source| FormatError::Io { path: path.clone(), source })?;
    let id: SourceId = cache::hash_file(&path, mtime);
    let body = cache::get_or_compile_include(id, || {
        let text = fs::read_to_string(&path)
            .map_err(|source| FormatError::Io { path: path.clone(), source })?;
        Ok(parser::parse_module(&text)?.body)
    })?;

    let freshness = builders::mtime_check(&path, mtime);
    Ok((freshness, (*body).clone()))
}

fn include_arguments(
    args: &[Expr],
    kwargs: &[(String, Expr)],
) -> Result<(String, Option<PathBuf>), FormatError> {
    let first = args.first().ok_or(FormatError::IncludeMissingFilename)?;
    let filename = string_literal(first)?;

    let root_override = if let Some(second) = args.get(1) {
        Some(PathBuf::from(string_literal(second)?))
    } else if let Some((_, expr)) = kwargs.iter().find(|(name, _)| name == "root") {
        Some(PathBuf::from(string_literal(expr)?))
    } else {
        None
    };
    Ok((filename, root_override))
}

fn string_literal(expr: &Expr) -> Result<String, FormatError> {
    match expr {
        Expr::Literal(Value::String(s)) => Ok(s.clone()),
        other => Err(FormatError::IncludeInvalidRoot(expr_kind(other))),
    }
}

fn expr_kind(expr: &Expr) -> &'static str {
    match expr {
        Expr::Literal(_) => "a non-string literal",
        Expr::Name(_) => "a name",
        Expr::List(_) => "a list",
        Expr::Dict(_) => "a dict",
        Expr::Attribute { .. } => "an attribute access",
        Expr::Subscript { .. } => "a subscript",
        Expr::Call { .. } => "a call",
        Expr::Unary { .. } => "a unary expression",
        Expr::Binary { .. } => "a binary expression",
        Expr::Compare { .. } => "a comparison",
        Expr::BoolOp { .. } => "a boolean expression",
        Expr::Join(_) => "a join expression",
        Expr::Format { .. } => "a format expression",
        Expr::Escape { .. } => "an escape expression",
    }
}

/// Reject or strip `..`/empty components so an include can never read
/// outside its base directory (spec §4.6).
fn sandbox_path(filename: &str) -> Result<PathBuf, FormatError> {
    let mut out = PathBuf::new();
    for component in Path::new(filename).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(FormatError::IncludePathEscapesRoot(filename.to_string()));
            }
        }
    }
    if out.as_os_str().is_empty() {
        return Err(FormatError::IncludeMissingFilename);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::Stmt;

    fn string_lit(s: &str) -> Expr {
        Expr::Literal(Value::String(s.to_string()))
    }

    #[test]
    fn test_sandbox_path_rejects_parent_dir() {
        let err = sandbox_path("../etc/passwd").unwrap_err();
        assert!(matches!(err, FormatError::IncludePathEscapesRoot(_)));
    }

    #[test]
    fn test_sandbox_path_rejects_absolute() {
        let err = sandbox_path("/etc/passwd").unwrap_err();
        assert!(matches!(err, FormatError::IncludePathEscapesRoot(_)));
    }

    #[test]
    fn test_sandbox_path_strips_current_dir() {
        let path = sandbox_path("./a/./b.txt").unwrap();
        assert_eq!(path, PathBuf::from("a/b.txt"));
    }

    #[test]
    fn test_sandbox_path_rejects_empty() {
        let err = sandbox_path("").unwrap_err();
        assert!(matches!(err, FormatError::IncludeMissingFilename));
    }

    #[test]
    fn test_resolve_reads_and_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("partial.txt"), "hello %(name)").unwrap();

        let args = vec![string_lit("partial.txt")];
        let (freshness, body) = resolve(&args, &[], dir.path()).unwrap();

        assert!(matches!(freshness, Expr::Compare { .. }));
        assert_eq!(
            body,
            vec![
                Stmt::Yield(Expr::Literal(Value::String("hello ".into()))),
                Stmt::Expr(Expr::Name("name".into())),
            ]
        );
    }

    #[test]
    fn test_resolve_missing_filename_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve(&[], &[], dir.path()).unwrap_err();
        assert!(matches!(err, FormatError::IncludeMissingFilename));
    }

    #[test]
    fn test_resolve_caches_repeat_includes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("shared.txt"), "x").unwrap();
        let args = vec![string_lit("shared.txt")];
        let (_, first) = resolve(&args, &[], dir.path()).unwrap();
        let (_, second) = resolve(&args, &[], dir.path()).unwrap();
        assert_eq!(first, second);
    }
}
