//! Field path encoding.
//!
//! Paths are dotted by default (`spec.replicas`); a field name containing a
//! dot, or an empty name, is bracket-quoted (`metadata.annotations["a.b/c"]`)
//! so paths can be decoded back without ambiguity. Array elements use
//! numeric brackets (`spec.containers[0]`).

use serde_json::Value;

use crate::error::{Error, Result};

/// One decoded path step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Append a field name to a path.
pub fn join(path: &str, field: &str) -> String {
    if field.is_empty() || field.contains('.') {
        format!("{path}[{field:?}]")
    } else if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

/// Append an array index to a path.
pub fn join_index(path: &str, index: usize) -> String {
    format!("{path}[{index}]")
}

/// Decode a path into segments.
pub fn parse(path: &str) -> Result<Vec<PathSegment>> {
    let err = |message: &str| Error::Path {
        path: path.to_string(),
        message: message.to_string(),
    };

    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    let mut expect_field = true;

    while let Some(&ch) = chars.peek() {
        match ch {
            '.' => {
                chars.next();
                expect_field = true;
            }
            '[' => {
                chars.next();
                match chars.peek() {
                    Some('"') => {
                        chars.next();
                        let mut name = String::new();
                        let mut escaped = false;
                        loop {
                            match chars.next() {
                                Some(c) if escaped => {
                                    name.push(c);
                                    escaped = false;
                                }
                                Some('\\') => escaped = true,
                                Some('"') => break,
                                Some(c) => name.push(c),
                                None => return Err(err("unterminated quoted field")),
                            }
                        }
                        if chars.next() != Some(']') {
                            return Err(err("expected ']' after quoted field"));
                        }
                        segments.push(PathSegment::Field(name));
                    }
                    Some(c) if c.is_ascii_digit() => {
                        let mut digits = String::new();
                        while let Some(&c) = chars.peek() {
                            if c.is_ascii_digit() {
                                digits.push(c);
                                chars.next();
                            } else {
                                break;
                            }
                        }
                        if chars.next() != Some(']') {
                            return Err(err("expected ']' after index"));
                        }
                        let index = digits
                            .parse::<usize>()
                            .map_err(|_| err("index out of range"))?;
                        segments.push(PathSegment::Index(index));
                    }
                    _ => return Err(err("expected quoted field or index after '['")),
                }
                expect_field = false;
            }
            _ => {
                if !expect_field {
                    return Err(err("expected '.' or '[' between segments"));
                }
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' || c == '[' {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                segments.push(PathSegment::Field(name));
                expect_field = false;
            }
        }
    }
    Ok(segments)
}

/// Read the value at a decoded path.
pub fn get<'a>(doc: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments {
        current = match segment {
            PathSegment::Field(name) => current.get(name.as_str())?,
            PathSegment::Index(i) => current.get(i)?,
        };
    }
    Some(current)
}

/// Replace the value at a decoded path. Every intermediate container must
/// already exist; extraction only yields paths present in the template.
pub fn set(doc: &mut Value, segments: &[PathSegment], value: Value) -> Result<()> {
    let rendered = || {
        let mut p = String::new();
        for segment in segments {
            match segment {
                PathSegment::Field(name) => p = join(&p, name),
                PathSegment::Index(i) => p = join_index(&p, *i),
            }
        }
        p
    };

    let Some((last, parents)) = segments.split_last() else {
        *doc = value;
        return Ok(());
    };
    let mut current = doc;
    for segment in parents {
        current = match segment {
            PathSegment::Field(name) => current.get_mut(name.as_str()),
            PathSegment::Index(i) => current.get_mut(i),
        }
        .ok_or_else(|| Error::Path {
            path: rendered(),
            message: "intermediate value is missing".to_string(),
        })?;
    }
    match last {
        PathSegment::Field(name) => {
            let map = current.as_object_mut().ok_or_else(|| Error::Path {
                path: rendered(),
                message: "parent is not an object".to_string(),
            })?;
            map.insert(name.clone(), value);
        }
        PathSegment::Index(i) => {
            let slot = current.get_mut(i).ok_or_else(|| Error::Path {
                path: rendered(),
                message: "array element is missing".to_string(),
            })?;
            *slot = value;
        }
    }
    Ok(())
}
