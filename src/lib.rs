//! A text template engine with a lexer, embedded statement language, a
//! rewriting pass that turns naked template expressions into a generator
//! body, an include resolver, and a process-global compiled-IR cache — plus
//! an independent CSS-like element synthesizer.

mod builders;
mod cache;
mod driver;
pub mod elements;
pub mod error;
pub mod format;
mod include;
pub mod lang;
mod lexer;
mod parser;
mod rewriter;
mod value;

pub use driver::{render, RenderOptions, Rendered, Source};
pub use elements::ElementsOutput;
pub use error::{FormatError, LangParseError, RenderError, ValueError};
pub use value::Value;
use std::sync::Arc;

/// Parse and serialize a CSS-like selector expression (C9), independent of
/// the template engine proper.
pub fn render_elements(selector: &str) -> Result<Arc<ElementsOutput>, FormatError> {
    elements::build(selector)
}
