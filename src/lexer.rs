//! Chunk lexer (C1): splits template source into a stream of raw text,
//! directives, and close markers.
//!
//! This is a hand-rolled linear scan rather than a `winnow` combinator chain.
//! That's the same tradeoff the teacher's own raw-text parser documents in
//! `parse.rs`: "this is inefficient because it means we'll copy into the
//! accumulating string one char at a time... potential optimization if perf
//! is a problem". A `%` can appear anywhere, so the lexer has no fixed-width
//! lookahead to hand to a combinator; a plain scan is the idiomatic starting
//! point here too.

use crate::error::FormatError;

/// One lexed unit of template source
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk<'a> {
    /// Literal text with no leading `%`. The lexer never emits an empty
    /// `Raw` chunk.
    Raw(&'a str),
    /// A `%(...)` directive. `body` is the fragment between the parens
    /// (parens excluded, since every consumer wants the inner text).
    /// `type_spec` is the conversion-specifier suffix, if any.
    Directive { body: &'a str, type_spec: Option<&'a str> },
    /// A `%/` close-block marker
    Close,
}

/// Length of a valid conversion-specifier prefix at the start of `s`: flags
/// and width/precision digits, then exactly one conversion character (spec
/// §3 Chunk: `[0-9.#0+ -]*[diouxXeEfFgGcrsqm]`). Returns 0 if `s` doesn't
/// start with a valid specifier.
fn type_spec_len(s: &str) -> usize {
    let mut end = 0;
    for (i, c) in s.char_indices() {
        if matches!(c, '0'..='9' | '.' | '#' | '+' | ' ' | '-') {
            end = i + c.len_utf8();
            continue;
        }
        if matches!(
            c,
            'd' | 'i' | 'o' | 'u' | 'x' | 'X' | 'e' | 'E' | 'f' | 'F' | 'g'
                | 'G' | 'c' | 'r' | 's' | 'q' | 'm'
        ) {
            return i + c.len_utf8();
        }
        break;
    }
    let _ = end;
    0
}

/// Lex a template source into its full chunk stream. Lexing is whole-source
/// (not incremental) because the parser needs to see the entire stream to
/// validate block balance (spec Non-goals: no partial/streaming parsing).
pub fn lex(source: &str) -> Result<Vec<Chunk<'_>>, FormatError> {
    let mut chunks = Vec::new();
    let mut raw_start = 0;
    let mut pos = 0;

    while let Some(offset) = source[pos..].find('%') {
        let percent = pos + offset;
        push_raw(&mut chunks, source, raw_start, percent);

        let after_percent = percent + 1;
        match source[after_percent..].chars().next() {
            Some('(') => {
                let (body, after_close) = scan_parens(source, after_percent)?;
                let spec_len = type_spec_len(&source[after_close..]);
                let type_spec = if spec_len > 0 {
                    Some(&source[after_close..after_close + spec_len])
                } else {
                    None
                };
                chunks.push(Chunk::Directive { body, type_spec });
                pos = after_close + spec_len;
                raw_start = pos;
            }
            Some('/') => {
                chunks.push(Chunk::Close);
                pos = after_percent + 1;
                raw_start = pos;
            }
            _ => {
                // Literal percent: `%X` where X is anything but `(` or `/`.
                // The `%` itself renders literally; resume scanning right
                // after it so `X` is picked up by the next raw-text flush.
                chunks.push(Chunk::Raw("%"));
                pos = after_percent;
                raw_start = pos;
            }
        }
    }

    push_raw(&mut chunks, source, raw_start, source.len());
    Ok(chunks)
}

fn push_raw<'a>(chunks: &mut Vec<Chunk<'a>>, source: &'a str, start: usize, end: usize) {
    if start < end {
        chunks.push(Chunk::Raw(&source[start..end]));
    }
}

/// Find the matching `)` for the `(` at `open_pos` by depth-counted scan,
/// skipping over parens inside quoted strings (so an `include('a)b')` call
/// doesn't prematurely close). Returns the body text (excluding both parens)
/// and the byte offset right after the closing paren.
fn scan_parens(source: &str, open_pos: usize) -> Result<(&str, usize), FormatError> {
    debug_assert_eq!(&source[open_pos..open_pos + 1], "(");
    let mut depth = 0usize;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    for (i, c) in source[open_pos..].char_indices() {
        let abs = open_pos + i;
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => in_string = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((&source[open_pos + 1..abs], abs + 1));
                }
            }
            _ => {}
        }
    }
    Err(FormatError::UnmatchedOpen { offset: open_pos })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn raw(s: &str) -> Chunk<'_> {
        Chunk::Raw(s)
    }

    fn directive(body: &str) -> Chunk<'_> {
        Chunk::Directive { body, type_spec: None }
    }

    #[test]
    fn test_plain_text() {
        let chunks = lex("hello world").unwrap();
        assert_eq!(chunks, vec![raw("hello world")]);
    }

    #[test]
    fn test_literal_percent() {
        // Each bare `%` (not followed by `(` or `/`) is its own literal
        // chunk; consecutive `%`s are not collapsed (matches the original
        // `gen_chunks` doctest for "abc%()def%%g").
        let chunks = lex("100%% done").unwrap();
        assert_eq!(chunks, vec![raw("100"), raw("%"), raw("%"), raw(" done")]);
    }

    #[test]
    fn test_literal_percent_other_char() {
        let chunks = lex("a%Xb").unwrap();
        assert_eq!(chunks, vec![raw("a"), raw("%"), raw("Xb")]);
    }

    #[test]
    fn test_directive() {
        let chunks = lex("<p>%(name)s</p>").unwrap();
        assert_eq!(
            chunks,
            vec![
                raw("<p>"),
                Chunk::Directive { body: "name", type_spec: Some("s") },
                raw("</p>"),
            ]
        );
    }

    #[test]
    fn test_directive_nested_parens() {
        let chunks = lex("%(f(1, 2))").unwrap();
        assert_eq!(chunks, vec![directive("f(1, 2)")]);
    }

    #[test]
    fn test_directive_paren_in_string() {
        let chunks = lex(r#"%(f(")"))"#).unwrap();
        assert_eq!(chunks, vec![directive(r#"f(")")"#)]);
    }

    #[test]
    fn test_close_marker() {
        let chunks = lex("%(if x:)a%/b").unwrap();
        assert_eq!(
            chunks,
            vec![
                Chunk::Directive { body: "if x:", type_spec: None },
                raw("a"),
                Chunk::Close,
                raw("b"),
            ]
        );
    }

    #[test]
    fn test_unmatched_open() {
        let err = lex("%(hello").unwrap_err();
        assert!(matches!(err, FormatError::UnmatchedOpen { .. }));
    }

    #[rstest]
    #[case::simple("name", "s", Some("s"))]
    #[case::precision("x", ".2f", Some(".2f"))]
    #[case::quote("value", "q", Some("q"))]
    #[case::multiline("s", "m", Some("m"))]
    #[case::none("s", "", None)]
    fn test_type_spec(
        #[case] name: &str,
        #[case] after_directive: &str,
        #[case] expected: Option<&str>,
    ) {
        let source = format!("%({name}){after_directive}");
        let chunks = lex(&source).unwrap();
        let Chunk::Directive { type_spec, .. } = chunks[0] else {
            panic!("expected directive")
        };
        assert_eq!(type_spec, expected);
    }
}
