//! CSS-like element synthesizer (C9): standalone from the template engine
//! proper. Parses a compact selector expression into a tree of element and
//! text nodes, then serializes it.
//!
//! Tokenizing follows the same hand-rolled linear-scan idiom as the chunk
//! lexer (C1) rather than a `winnow` combinator chain — there's no recursive
//! grammar here either, just a sequence of single-character/bare-word
//! tokens. Tree assembly reuses the cursor-stack shape from the IR assembler
//! (C4): `Descend`/`Ascend`/`Reset` move a stack of open ancestor positions
//! exactly the way block-open/close markers move the parser's frame stack.

use crate::error::FormatError;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// The synthesizer's output: a single root serializes to one string,
/// multiple (comma-separated) roots serialize to one string each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ElementsOutput {
    Single(String),
    Many(Vec<String>),
}

static MEMO: LazyLock<Mutex<HashMap<String, Arc<ElementsOutput>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Build and serialize a selector expression, memoizing identical inputs.
pub fn build(selector: &str) -> Result<Arc<ElementsOutput>, FormatError> {
    let mut guard = MEMO.lock().expect("elements cache mutex poisoned");
    if let Some(hit) = guard.get(selector) {
        return Ok(Arc::clone(hit));
    }
    let output = Arc::new(parse_and_serialize(selector)?);
    guard.insert(selector.to_string(), Arc::clone(&output));
    Ok(output)
}

#[cfg(test)]
pub fn clear_memo() {
    MEMO.lock().expect("elements cache mutex poisoned").clear();
}

#[derive(Debug, Clone, PartialEq)]
enum Token<'a> {
    Tag(&'a str),
    Id(&'a str),
    Class(&'a str),
    Attr(&'a str, String),
    Text(String),
    Descend,
    Ascend,
    Reset,
}

#[derive(Debug, Default)]
struct Node {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String)>,
    text: Option<String>,
    children: Vec<usize>,
    parent: Option<usize>,
}

impl Node {
    fn serialize(&self, arena: &[Node]) -> String {
        if let Some(text) = &self.text {
            return text.clone();
        }
        let tag = self.tag.as_deref().unwrap_or("div");
        let mut out = format!("<{tag}");
        if let Some(id) = &self.id {
            out.push_str(&format!(" id=\"{id}\""));
        }
        if !self.classes.is_empty() {
            out.push_str(&format!(" class=\"{}\"", self.classes.join(" ")));
        }
        for (key, value) in &self.attrs {
            out.push_str(&format!(" {key}=\"{value}\""));
        }
        out.push('>');
        for &child in &self.children {
            out.push_str(&arena[child].serialize(arena));
        }
        out.push_str(&format!("</{tag}>"));
        out
    }
}

fn parse_and_serialize(selector: &str) -> Result<ElementsOutput, FormatError> {
    let tokens = tokenize(selector)?;
    let mut arena: Vec<Node> = Vec::new();
    let mut roots: Vec<usize> = Vec::new();
    // The node new tags/text attach under. Anchored on the node itself
    // (not a separate stack), so `Ascend` can walk exactly one step up the
    // tree via that node's own `parent` link.
    let mut anchor: Option<usize> = None;
    let mut current: Option<usize> = None;

    let attach = |arena: &mut Vec<Node>, anchor: Option<usize>, roots: &mut Vec<usize>, idx: usize| {
        arena[idx].parent = anchor;
        if let Some(parent) = anchor {
            arena[parent].children.push(idx);
        } else {
            roots.push(idx);
        }
    };

    for token in tokens {
        match token {
            Token::Tag(name) => {
                let idx = arena.len();
                arena.push(Node { tag: Some(name.to_string()), ..Node::default() });
                attach(&mut arena, anchor, &mut roots, idx);
                current = Some(idx);
            }
            Token::Id(value) => {
                let idx = current.ok_or_else(|| {
                    FormatError::ElementsParse(format!("`#{value}` with no preceding tag"))
                })?;
                arena[idx].id = Some(value.to_string());
            }
            Token::Class(value) => {
                let idx = current.ok_or_else(|| {
                    FormatError::ElementsParse(format!("`.{value}` with no preceding tag"))
                })?;
                arena[idx].classes.push(value.to_string());
            }
            Token::Attr(key, value) => {
                let idx = current.ok_or_else(|| {
                    FormatError::ElementsParse(format!("`[{key}=...]` with no preceding tag"))
                })?;
                arena[idx].attrs.push((key.to_string(), value));
            }
            Token::Text(value) => {
                let idx = arena.len();
                arena.push(Node { text: Some(value), ..Node::default() });
                attach(&mut arena, anchor, &mut roots, idx);
                current = Some(idx);
            }
            Token::Descend => {
                let idx = current
                    .ok_or_else(|| FormatError::ElementsParse("descend with no current element".into()))?;
                anchor = Some(idx);
            }
            Token::Ascend => {
                // Re-parent the next node as a sibling of the anchor, one
                // level up; a no-op if the anchor is already a root.
                anchor = anchor.and_then(|idx| arena[idx].parent);
            }
            Token::Reset => {
                anchor = None;
                current = None;
            }
        }
    }

    let strings: Vec<String> = roots.iter().map(|&idx| arena[idx].serialize(&arena)).collect();
    match strings.len() {
        1 => Ok(ElementsOutput::Single(strings.into_iter().next().expect("len checked == 1"))),
        _ => Ok(ElementsOutput::Many(strings)),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token<'_>>, FormatError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos] as char;
        match c {
            ' ' | '\t' | '\n' => {
                pos += 1;
                while pos < bytes.len() && matches!(bytes[pos] as char, ' ' | '\t' | '\n') {
                    pos += 1;
                }
                // Whitespace only completes (and descends into) a pending
                // tag - not after text, and not when nothing's pending
                // (e.g. right after `+`/`,`).
                let completes_tag = matches!(
                    tokens.last(),
                    Some(Token::Tag(_)) | Some(Token::Id(_)) | Some(Token::Class(_)) | Some(Token::Attr(_, _))
                );
                if completes_tag {
                    tokens.push(Token::Descend);
                }
            }
            '+' => {
                tokens.push(Token::Ascend);
                pos += 1;
            }
            ',' => {
                tokens.push(Token::Reset);
                pos += 1;
            }
            '#' => {
                let (word, next) = take_word(input, pos + 1)?;
                tokens.push(Token::Id(word));
                pos = next;
            }
            '.' => {
                let (word, next) = take_word(input, pos + 1)?;
                tokens.push(Token::Class(word));
                pos = next;
            }
            '\'' | '"' => {
                let (text, next) = take_quoted(input, pos, c)?;
                tokens.push(Token::Text(text));
                pos = next;
            }
            '[' => {
                let (key, value, next) = take_attr(input, pos + 1)?;
                tokens.push(Token::Attr(key, value));
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let (word, next) = take_word(input, pos)?;
                tokens.push(Token::Tag(word));
                pos = next;
            }
            other => {
                return Err(FormatError::ElementsParse(format!("unexpected character `{other}`")));
            }
        }
    }
    Ok(tokens)
}

fn take_word(input: &str, start: usize) -> Result<(&str, usize), FormatError> {
    let rest = &input[start..];
    let end = rest
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
        .map_or(rest.len(), |(i, _)| i);
    if end == 0 {
        return Err(FormatError::ElementsParse(format!(
            "expected a name at byte offset {start}"
        )));
    }
    Ok((&rest[..end], start + end))
}

fn take_quoted(input: &str, start: usize, quote: char) -> Result<(String, usize), FormatError> {
    let mut chars = input[start + 1..].char_indices();
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                out.push(escaped);
                continue;
            }
        }
        if c == quote {
            return Ok((out, start + 1 + i + c.len_utf8()));
        }
        out.push(c);
    }
    Err(FormatError::ElementsParse(format!("unterminated quote starting at byte offset {start}")))
}

/// Parse `key=value]`, where `value` may itself be quoted (and may then
/// contain `]`/`,`/`+`/space freely).
fn take_attr(input: &str, start: usize) -> Result<(&str, String, usize), FormatError> {
    let (key, after_key) = take_word(input, start)?;
    let rest = &input[after_key..];
    let Some(rest) = rest.strip_prefix('=') else {
        return Err(FormatError::ElementsParse(format!(
            "expected `=` after attribute name `{key}`"
        )));
    };
    let value_start = after_key + 1;
    let first = rest.chars().next();
    let (value, after_value) = if matches!(first, Some('\'') | Some('"')) {
        let quote = first.expect("checked Some above");
        let (text, next) = take_quoted(input, value_start, quote)?;
        (text, next)
    } else {
        let end = rest.find(']').ok_or_else(|| {
            FormatError::ElementsParse(format!("unterminated `[{key}=...` starting at byte offset {start}"))
        })?;
        (rest[..end].to_string(), value_start + end)
    };
    let tail = &input[after_value..];
    let Some(tail) = tail.strip_prefix(']') else {
        return Err(FormatError::ElementsParse(format!(
            "expected `]` to close attribute `{key}`"
        )));
    };
    let _ = tail;
    Ok((key, value, after_value + 1))
}
