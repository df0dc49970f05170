//! Placeholder parsing and substitution for attribute templates.
//!
//! Attribute values, mapping expressions and asserts reference other values
//! through `${...}` placeholders. This module parses template strings into
//! segments and substitutes resolved values through a [`Resolver`].
//!
//! # Placeholder Formats
//!
//! - `${key}` - a key of the current scope (unit attribute, or a bare unit id
//!   in global scope)
//! - `${name[key]}` - a key of a named capability (unit scope) or unit
//!   (global scope)
//! - `${unit[capability[key]]}` - a key of a capability of another unit
//! - `${dcc.*}` - a predefined run-time property, kept verbatim
//!
//! # Escaping
//!
//! `$${` produces a literal `${`. A `$` not followed by `{` passes through
//! unchanged, so shell variables like `$HOME` need no escaping.
//!
//! # Example
//!
//! ```
//! use dcc_lib::placeholder::{parse, Segment, Placeholder};
//!
//! let segments = parse("jdbc:${db[host]}:$PORT").unwrap();
//! assert_eq!(segments, vec![
//!     Segment::Literal("jdbc:".to_string()),
//!     Segment::Placeholder(Placeholder::Indexed { scope: "db".to_string(), key: "host".to_string() }),
//!     Segment::Literal(":$PORT".to_string()),
//! ]);
//! ```

use thiserror::Error;
use tracing::debug;

use crate::consts::PREDEFINED_PREFIX;
use crate::error::ConfigError;

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  /// `${key}`
  Key(String),

  /// `${scope[key]}`
  Indexed { scope: String, key: String },

  /// `${unit[capability[key]]}`
  Nested {
    unit: String,
    capability: String,
    key: String,
  },

  /// `${dcc.*}` - filled in by the executor at run time
  Predefined(String),
}

impl Placeholder {
  /// Render the placeholder back to its source form.
  pub fn to_source(&self) -> String {
    match self {
      Placeholder::Key(key) | Placeholder::Predefined(key) => format!("${{{key}}}"),
      Placeholder::Indexed { scope, key } => format!("${{{scope}[{key}]}}"),
      Placeholder::Nested { unit, capability, key } => format!("${{{unit}[{capability}[{key}]]}}"),
    }
  }
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaceholderError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("empty placeholder at position {0}")]
  Empty(usize),

  #[error("malformed placeholder: {0}")]
  Malformed(String),
}

/// Resolves placeholders against the evaluation state.
///
/// `Ok(None)` means the reference does not resolve (missing unit, optional
/// capability, unset key); it is substituted with nothing.
pub trait Resolver {
  fn resolve(&mut self, placeholder: &Placeholder) -> Result<Option<String>, ConfigError>;
}

/// Parse a string containing placeholders into segments.
///
/// # Errors
///
/// Returns an error if a placeholder is unclosed, empty, or nests deeper
/// than `unit[capability[key]]`.
pub fn parse(input: &str) -> Result<Vec<Segment>, PlaceholderError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if let Some((_, '{')) = chars.peek() {
          // Escaped: $${ -> ${
          chars.next();
          literal.push_str("${");
        } else {
          literal.push_str("$$");
        }
      }
      Some((_, '{')) => {
        chars.next();

        let mut content = String::new();
        let mut found_close = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            found_close = true;
            break;
          }
          content.push(c);
        }

        if !found_close {
          return Err(PlaceholderError::Unclosed(pos));
        }

        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }
        segments.push(Segment::Placeholder(parse_placeholder_content(&content, pos)?));
      }
      _ => literal.push('$'),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

/// Parse the content between `${` and `}`.
fn parse_placeholder_content(content: &str, pos: usize) -> Result<Placeholder, PlaceholderError> {
  let content = content.trim();
  if content.is_empty() {
    return Err(PlaceholderError::Empty(pos));
  }

  let Some(open) = content.find('[') else {
    if content.contains(']') {
      return Err(PlaceholderError::Malformed(content.to_string()));
    }
    if content.starts_with(PREDEFINED_PREFIX) {
      return Ok(Placeholder::Predefined(content.to_string()));
    }
    return Ok(Placeholder::Key(content.to_string()));
  };

  let malformed = || PlaceholderError::Malformed(content.to_string());

  let scope = name(&content[..open]).ok_or_else(malformed)?;
  let inner = content[open + 1..].strip_suffix(']').ok_or_else(malformed)?;

  match inner.find('[') {
    None => Ok(Placeholder::Indexed {
      scope,
      key: name(inner).ok_or_else(malformed)?,
    }),
    Some(inner_open) => {
      let capability = name(&inner[..inner_open]).ok_or_else(malformed)?;
      let key = inner[inner_open + 1..].strip_suffix(']').ok_or_else(malformed)?;
      Ok(Placeholder::Nested {
        unit: scope,
        capability,
        key: name(key).ok_or_else(malformed)?,
      })
    }
  }
}

fn name(raw: &str) -> Option<String> {
  let trimmed = raw.trim();
  if trimmed.is_empty() || trimmed.contains(['[', ']']) {
    return None;
  }
  Some(trimmed.to_string())
}

/// Substitute all placeholders in a string using the provided resolver.
///
/// Unresolved placeholders are removed; predefined ones are kept verbatim.
pub fn substitute(input: &str, resolver: &mut impl Resolver) -> Result<Result<String, PlaceholderError>, ConfigError> {
  match parse(input) {
    Ok(segments) => substitute_segments(&segments, resolver).map(Ok),
    Err(e) => Ok(Err(e)),
  }
}

/// Substitute placeholders in pre-parsed segments.
pub fn substitute_segments(segments: &[Segment], resolver: &mut impl Resolver) -> Result<String, ConfigError> {
  let mut result = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => result.push_str(s),
      Segment::Placeholder(p @ Placeholder::Predefined(_)) => result.push_str(&p.to_source()),
      Segment::Placeholder(p) => match resolver.resolve(p)? {
        Some(value) => result.push_str(&value),
        None => debug!(placeholder = %p.to_source(), "placeholder did not resolve"),
      },
    }
  }

  Ok(result)
}

/// Placeholders left in an already resolved value, excluding predefined ones.
pub fn unresolved(value: &str) -> Vec<String> {
  match parse(value) {
    Ok(segments) => segments
      .into_iter()
      .filter_map(|s| match s {
        Segment::Placeholder(Placeholder::Predefined(_)) | Segment::Literal(_) => None,
        Segment::Placeholder(p) => Some(p.to_source()),
      })
      .collect(),
    // A malformed leftover is still a leftover.
    Err(_) if value.contains("${") => vec![value.to_string()],
    Err(_) => Vec::new(),
  }
}

/// The value with every predefined placeholder removed.
///
/// Used to decide whether a mandatory value carries any content of its own.
pub fn strip_predefined(value: &str) -> String {
  match parse(value) {
    Ok(segments) => segments
      .into_iter()
      .map(|s| match s {
        Segment::Literal(l) => l,
        Segment::Placeholder(Placeholder::Predefined(_)) => String::new(),
        Segment::Placeholder(p) => p.to_source(),
      })
      .collect(),
    Err(_) => value.to_string(),
  }
}
