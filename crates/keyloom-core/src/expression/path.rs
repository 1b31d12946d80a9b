//! Attribute paths with object-path and list-index segments (`addresses[0].street`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

/// One step of an attribute path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathSegment {
    Attribute(String),
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Attribute(name) => write!(f, "{name}"),
            PathSegment::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Parse a field path such as `"a.b[2].c"`.
///
/// The path must start with an attribute name; `"[0].x"`, empty segments
/// (`"a..b"`, `"a."`) and non-numeric indexes are rejected.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, UpdateError> {
    let invalid = || UpdateError::InvalidPath(path.to_string());

    let mut segments = Vec::new();
    let mut chars = path.chars().peekable();
    // True when the next token must be an attribute name (start, or after '.').
    let mut expect_name = true;

    while let Some(&c) = chars.peek() {
        match c {
            '[' => {
                if segments.is_empty() || expect_name {
                    return Err(invalid());
                }
                chars.next();
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => return Err(invalid()),
                    }
                }
                let index = digits.parse::<usize>().map_err(|_| invalid())?;
                segments.push(PathSegment::Index(index));
            }
            '.' => {
                if expect_name {
                    return Err(invalid());
                }
                chars.next();
                expect_name = true;
            }
            _ => {
                if !expect_name {
                    return Err(invalid());
                }
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' || c == '[' || c == ']' {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if name.is_empty() {
                    return Err(invalid());
                }
                segments.push(PathSegment::Attribute(name));
                expect_name = false;
            }
        }
    }

    if segments.is_empty() || expect_name {
        return Err(invalid());
    }
    Ok(segments)
}

/// Render a parsed path back to its textual form.
pub fn format_path(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 && matches!(segment, PathSegment::Attribute(_)) {
            out.push('.');
        }
        out.push_str(&segment.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str) -> PathSegment {
        PathSegment::Attribute(name.to_string())
    }

    #[test]
    fn test_simple() {
        assert_eq!(parse_path("name").unwrap(), vec![attr("name")]);
    }

    #[test]
    fn test_nested_and_indexed() {
        assert_eq!(
            parse_path("addresses[0].street").unwrap(),
            vec![attr("addresses"), PathSegment::Index(0), attr("street")]
        );
        assert_eq!(
            parse_path("grid[1][12]").unwrap(),
            vec![attr("grid"), PathSegment::Index(1), PathSegment::Index(12)]
        );
    }

    #[test]
    fn test_leading_index_rejected() {
        assert!(matches!(
            parse_path("[0].street"),
            Err(UpdateError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_malformed_rejected() {
        for bad in ["", "a.", ".a", "a..b", "a[", "a[x]", "a[]", "a.[0]", "a]b", "a[0]b"] {
            assert!(parse_path(bad).is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn test_format_roundtrip() {
        for path in ["a", "a.b", "a[3].b", "a[1][2]"] {
            assert_eq!(format_path(&parse_path(path).unwrap()), path);
        }
    }
}
