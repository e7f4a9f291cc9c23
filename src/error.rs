//! Error types for template parsing and rendering

use crate::Value;
use std::path::PathBuf;
use thiserror::Error;
use winnow::error::{ContextError, ParseError};

/// A malformed template: unmatched directives, stray close markers, malformed
/// `include` calls. Always fatal; parsing does not continue after this.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("Unmatched %( at byte offset {offset}")]
    UnmatchedOpen { offset: usize },

    #[error("Unexpected %/ with no open block (line {line})")]
    UnexpectedClose { line: usize },

    #[error("Unclosed block(s): {count} block(s) never reached a matching %/")]
    UnclosedBlock { count: usize },

    #[error("include() requires at least one argument (the filename)")]
    IncludeMissingFilename,

    #[error("include() base path argument must be a string literal, got {0}")]
    IncludeInvalidRoot(&'static str),

    #[error("include path `{0}` escapes the template root")]
    IncludePathEscapesRoot(String),

    #[error("error parsing directive body: {0}")]
    Directive(#[from] LangParseError),

    #[error("error reading template file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error decoding template file {path} as UTF-8")]
    InvalidEncoding { path: PathBuf },

    #[error("render() requires exactly one of `text` or `filename`")]
    NoSource,

    #[error("malformed element selector: {0}")]
    ElementsParse(String),
}

/// An error parsing a fragment of the embedded language. The string is
/// produced by winnow; we additionally carry a line/offset pair so the caller
/// can correct it to point into the outer template source (spec §4.2).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct LangParseError {
    pub message: String,
    /// Line within the template source, 1-indexed. Filled in by the parser
    /// once it knows where this fragment started; `0` until then.
    pub line: usize,
}

impl LangParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), line: 0 }
    }

    /// Attach (or correct) the template line number this error occurred at
    pub fn at_line(mut self, line: usize) -> Self {
        self.line = line;
        self
    }
}

impl From<ParseError<&str, ContextError>> for LangParseError {
    fn from(error: ParseError<&str, ContextError>) -> Self {
        Self::new(error.to_string())
    }
}

/// Any error that can occur while rendering a compiled template. These
/// messages are shown with additional context from the caller, so they should
/// stay brief.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("unknown name `{name}`")]
    NameUnknown { name: String },

    #[error("unknown function `{name}`")]
    FunctionUnknown { name: String },

    #[error("{0}")]
    Value(#[from] ValueError),

    #[error("division by zero")]
    DivideByZero,

    #[error("cannot iterate over {0}")]
    NotIterable(&'static str),

    #[error("error parsing directive: {0}")]
    Parse(#[from] LangParseError),

    #[error("error resolving include: {0}")]
    Format(#[from] Box<FormatError>),

    #[error("error reading included file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Escape hatch for host-builtin failures that don't fit another variant
    #[error("{0}")]
    Other(String),
}

impl From<FormatError> for RenderError {
    fn from(error: FormatError) -> Self {
        Self::Format(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Use anyhow to get the error message to include the whole chain, not
    /// just the outermost `FormatError::Io` message.
    #[test]
    fn test_io_error_chain_includes_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "no such file");
        let error = FormatError::Io { path: PathBuf::from("missing.txt"), source };
        let chained = format!("{:#}", anyhow::Error::from(error));
        assert!(chained.contains("error reading template file missing.txt"));
        assert!(chained.contains("no such file"));
    }
}

/// A type error encountered while evaluating an expression, e.g. indexing a
/// value that isn't a container, or comparing incompatible types
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("expected {expected}, got {actual}")]
    Type { expected: &'static str, actual: Value },

    #[error("no field `{key}` on {actual}")]
    NoSuchKey { key: String, actual: Value },

    #[error("index {index} out of range for {actual}")]
    IndexOutOfRange { index: i64, actual: Value },
}
