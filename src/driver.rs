//! Execution driver (C8): ties parsing, rewriting, the IR cache, and the
//! evaluator together into the public `render` entry point (§4.7, §5.1).

use crate::cache::{self, SourceId};
use crate::error::{FormatError, RenderError};
use crate::parser;
use crate::rewriter::{self, CompiledModule};
use crate::Value;
use indexmap::IndexMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where the template source comes from (§6).
#[derive(Clone, Debug)]
pub enum Source {
    Text(String),
    File(PathBuf),
}

/// Inputs to a single `render` call (§6).
#[derive(Clone, Debug)]
pub struct RenderOptions {
    pub source: Source,
    /// Base directory for `filename` and for resolving `include` calls
    /// that don't specify their own root.
    pub root: PathBuf,
    pub strip_whitespace: bool,
    pub skip_cache: bool,
    pub args: IndexMap<String, Value>,
}

impl RenderOptions {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            source: Source::Text(text.into()),
            root: PathBuf::from("."),
            strip_whitespace: false,
            skip_cache: false,
            args: IndexMap::new(),
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: Source::File(path.into()),
            root: PathBuf::from("."),
            strip_whitespace: false,
            skip_cache: false,
            args: IndexMap::new(),
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_args(mut self, args: IndexMap<String, Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_skip_cache(mut self, skip_cache: bool) -> Self {
        self.skip_cache = skip_cache;
        self
    }

    pub fn with_strip_whitespace(mut self, strip_whitespace: bool) -> Self {
        self.strip_whitespace = strip_whitespace;
        self
    }
}

/// The rendered output of a template: a sequence of fragments already
/// evaluated eagerly (§5.1), presented to the caller as a lazy-looking
/// sequence via `IntoIterator`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered(pub Vec<String>);

impl Rendered {
    pub fn to_string_joined(&self) -> String {
        self.0.concat()
    }
}

impl IntoIterator for Rendered {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl std::fmt::Display for Rendered {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for fragment in &self.0 {
            f.write_str(fragment)?;
        }
        Ok(())
    }
}

/// Render a template per the options given (§4.7, §6).
pub fn render(options: RenderOptions) -> Result<Rendered, RenderError> {
    let (text, source_root) = load_source(&options.source, &options.root)?;
    let call_site_root = match &options.source {
        Source::File(path) => {
            let full = options.root.join(path);
            full.parent().map_or_else(|| source_root.clone(), Path::to_path_buf)
        }
        Source::Text(_) => source_root,
    };

    let mut skip_cache = options.skip_cache;
    loop {
        let id = identity(&options.source, &options.root, &text);
        let module = compile_cached(&text, &call_site_root, id, skip_cache)?;

        if preamble_is_stale(&module)? {
            debug!(?id, "include went stale, recompiling");
            skip_cache = true;
            continue;
        }

        let mut interpreter = crate::lang::Interpreter::new(options.args.clone());
        let fragments = interpreter.exec(&module.body);
        let mut out = Vec::with_capacity(fragments.len());
        for fragment in fragments {
            out.push(maybe_strip(fragment?, options.strip_whitespace));
        }
        return Ok(Rendered(out));
    }
}

fn load_source(source: &Source, root: &Path) -> Result<(String, PathBuf), RenderError> {
    match source {
        Source::Text(text) => Ok((text.clone(), root.to_path_buf())),
        Source::File(path) => {
            let full = root.join(path);
            let text = fs::read_to_string(&full)
                .map_err(|source| FormatError::Io { path: full.clone(), source })?;
            Ok((text, root.to_path_buf()))
        }
    }
}

fn identity(source: &Source, root: &Path, text: &str) -> SourceId {
    match source {
        Source::Text(_) => cache::hash_text(text),
        Source::File(path) => {
            let full = root.join(path);
            let mtime =
                fs::metadata(&full).and_then(|meta| meta.modified()).unwrap_or(std::time::UNIX_EPOCH);
            cache::hash_file(&full, mtime)
        }
    }
}

fn compile_cached(
    text: &str,
    root: &Path,
    id: SourceId,
    skip_cache: bool,
) -> Result<Arc<CompiledModule>, RenderError> {
    cache::get_or_compile_top(id, skip_cache, || {
        let parsed = parser::parse_module(text)?;
        let compiled = rewriter::rewrite(parsed.body, root)?;
        Ok(compiled)
    })
}

/// §5.1: evaluate the preamble checks before running the body, short
/// circuiting a stale include without running any of the template body.
fn preamble_is_stale(module: &CompiledModule) -> Result<bool, RenderError> {
    let mut interpreter = crate::lang::Interpreter::new(IndexMap::new());
    for check in &module.preamble {
        if interpreter.eval(check)?.to_bool() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn maybe_strip(fragment: String, strip_whitespace: bool) -> String {
    if !strip_whitespace {
        return fragment;
    }
    strip_whitespace_literal(&fragment)
}

/// Every newline, plus any run of tabs/spaces/newlines immediately following
/// it, is removed; a newline followed by non-whitespace collapses onto that
/// character. Mirrors the embedded language's own `strip_whitespace`.
fn strip_whitespace_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut remove = false;
    for c in s.chars() {
        if c == '\n' {
            remove = true;
        }
        if remove && !matches!(c, '\n' | '\t' | ' ') {
            remove = false;
        }
        if !remove {
            out.push(c);
        }
    }
    out
}
