//! `${…}` delimiter scanning.
//!
//! Splits a string into literal and expression segments. Brace depth and
//! string literals inside an expression body are tracked so `}` characters
//! inside quoted strings or nested braces do not terminate the expression.

use crate::error::{Error, Result};

/// One piece of a scanned string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Expression body, delimiters stripped.
    Expression(String),
}

/// Split `input` into literal and expression segments.
pub fn scan(input: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, ch)) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some((_, '{'))) {
            chars.next();
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Expression(read_body(&mut chars, offset)?));
        } else {
            literal.push(ch);
        }
    }
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// When the entire input is a single expression, return its body.
pub fn standalone(input: &str) -> Result<Option<String>> {
    let mut segments = scan(input)?;
    if segments.len() == 1 {
        if let Segment::Expression(body) = segments.remove(0) {
            return Ok(Some(body));
        }
    }
    Ok(None)
}

/// Whether the input holds at least one well-formed expression.
pub fn has_expressions(input: &str) -> bool {
    match scan(input) {
        Ok(segments) => segments
            .iter()
            .any(|s| matches!(s, Segment::Expression(_))),
        // An unterminated delimiter still counts as expression-like input.
        Err(_) => true,
    }
}

fn read_body(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    start: usize,
) -> Result<String> {
    let mut body = String::new();
    let mut depth = 1usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (_, ch) in chars.by_ref() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            body.push(ch);
            continue;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                body.push(ch);
            }
            '{' => {
                depth += 1;
                body.push(ch);
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(body);
                }
                body.push(ch);
            }
            _ => body.push(ch),
        }
    }
    Err(Error::Unterminated { offset: start })
}
