//! Flat property sources (solution and deployment properties).
//!
//! Sources are loaded from `.properties` files or from YAML/JSON documents.
//! Nested document maps are flattened into dotted keys, so
//!
//! ```yaml
//! db:
//!   port: 6000
//! ```
//!
//! becomes `db.port=6000`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::document::DocumentError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySource {
  name: String,
  values: BTreeMap<String, String>,
}

impl PropertySource {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      values: BTreeMap::new(),
    }
  }

  pub fn from_pairs<K: Into<String>, V: Into<String>>(
    name: impl Into<String>,
    pairs: impl IntoIterator<Item = (K, V)>,
  ) -> Self {
    Self {
      name: name.into(),
      values: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
    }
  }

  /// Load a source from disk, choosing the format by file extension.
  pub fn load(name: impl Into<String>, path: &Path) -> Result<Self, DocumentError> {
    let content = fs::read_to_string(path).map_err(|e| DocumentError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;

    let values = match path.extension().and_then(|e| e.to_str()) {
      Some("yaml" | "yml") => {
        let value: serde_yaml::Value = serde_yaml::from_str(&content).map_err(|e| DocumentError::Yaml {
          path: path.to_path_buf(),
          source: e,
        })?;
        flatten_yaml(&value)
      }
      Some("json") => {
        let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| DocumentError::Json {
          path: path.to_path_buf(),
          source: e,
        })?;
        flatten_json(&value)
      }
      _ => parse_properties(&content),
    };

    Ok(Self {
      name: name.into(),
      values,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.values.get(key).map(String::as_str)
  }

  pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
    self.values.insert(key.into(), value.into());
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.values.keys().map(String::as_str)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }
}

/// Parse `.properties` content: `key=value` or `key: value`, `#`/`!` comments,
/// backslash escapes and trailing-backslash line continuation.
pub fn parse_properties(content: &str) -> BTreeMap<String, String> {
  let mut values = BTreeMap::new();
  let mut logical = String::new();

  for raw in content.lines() {
    let line = raw.trim_start();
    if logical.is_empty() && (line.is_empty() || line.starts_with('#') || line.starts_with('!')) {
      continue;
    }

    let continued = ends_with_odd_backslashes(line);
    logical.push_str(if continued { &line[..line.len() - 1] } else { line });
    if continued {
      continue;
    }

    let entry = std::mem::take(&mut logical);
    let (key, value) = split_entry(&entry);
    values.insert(unescape(key), unescape(value.trim_start()));
  }

  if !logical.is_empty() {
    let (key, value) = split_entry(&logical);
    values.insert(unescape(key), unescape(value.trim_start()));
  }

  values
}

fn ends_with_odd_backslashes(line: &str) -> bool {
  line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_entry(entry: &str) -> (&str, &str) {
  let mut escaped = false;
  for (i, c) in entry.char_indices() {
    match c {
      _ if escaped => escaped = false,
      '\\' => escaped = true,
      '=' | ':' => return (entry[..i].trim_end(), &entry[i + 1..]),
      c if c.is_whitespace() => return (&entry[..i], entry[i..].trim_start().trim_start_matches(['=', ':'])),
      _ => {}
    }
  }
  (entry, "")
}

fn unescape(raw: &str) -> String {
  let mut out = String::with_capacity(raw.len());
  let mut chars = raw.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some('r') => out.push('\r'),
      Some('f') => out.push('\u{c}'),
      Some('u') => match hex_unit(&mut chars) {
        Some(high @ 0xD800..=0xDBFF) => {
          let mut rest = chars.clone();
          let low = if rest.next() == Some('\\') && rest.next() == Some('u') {
            hex_unit(&mut rest)
          } else {
            None
          };
          match low {
            Some(low @ 0xDC00..=0xDFFF) => {
              chars = rest;
              out.extend(char::decode_utf16([high, low]).map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER)));
            }
            _ => out.push(char::REPLACEMENT_CHARACTER),
          }
        }
        Some(unit) => out.push(char::from_u32(u32::from(unit)).unwrap_or(char::REPLACEMENT_CHARACTER)),
        // Not an escape sequence, keep the `u`.
        None => out.push('u'),
      },
      Some(other) => out.push(other),
      None => {}
    }
  }
  out
}

/// Consume four hex digits as one UTF-16 code unit, or nothing.
fn hex_unit(chars: &mut std::str::Chars<'_>) -> Option<u16> {
  let digits: String = chars.clone().take(4).collect();
  if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
    return None;
  }
  let unit = u16::from_str_radix(&digits, 16).ok()?;
  chars.nth(3);
  Some(unit)
}

fn escape(raw: &str, is_key: bool) -> String {
  let mut out = String::with_capacity(raw.len());
  for c in raw.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      '\r' => out.push_str("\\r"),
      '=' | ':' | ' ' if is_key => {
        out.push('\\');
        out.push(c);
      }
      // Agents read payloads as ISO-8859-1.
      c if c < ' ' || c > '~' => {
        for unit in c.encode_utf16(&mut [0; 2]) {
          out.push_str(&format!("\\u{unit:04X}"));
        }
      }
      _ => out.push(c),
    }
  }
  out
}

/// Serialize a property map to `.properties` bytes, sorted by key.
pub fn to_properties_bytes<'a>(values: impl IntoIterator<Item = (&'a String, &'a String)>) -> Vec<u8> {
  let mut out = String::new();
  for (key, value) in values {
    out.push_str(&escape(key, true));
    out.push('=');
    out.push_str(&escape(value, false));
    out.push('\n');
  }
  out.into_bytes()
}

fn flatten_yaml(value: &serde_yaml::Value) -> BTreeMap<String, String> {
  let mut out = BTreeMap::new();
  flatten_yaml_into("", value, &mut out);
  out
}

fn flatten_yaml_into(prefix: &str, value: &serde_yaml::Value, out: &mut BTreeMap<String, String>) {
  use serde_yaml::Value;

  match value {
    Value::Mapping(map) => {
      for (k, v) in map {
        let key = match k {
          Value::String(s) => s.clone(),
          Value::Number(n) => n.to_string(),
          Value::Bool(b) => b.to_string(),
          _ => continue,
        };
        flatten_yaml_into(&join(prefix, &key), v, out);
      }
    }
    Value::Null => {
      out.insert(prefix.to_string(), String::new());
    }
    Value::Bool(b) => {
      out.insert(prefix.to_string(), b.to_string());
    }
    Value::Number(n) => {
      out.insert(prefix.to_string(), n.to_string());
    }
    Value::String(s) => {
      out.insert(prefix.to_string(), s.clone());
    }
    Value::Sequence(items) => {
      let joined: Vec<String> = items
        .iter()
        .filter_map(|item| match item {
          Value::String(s) => Some(s.clone()),
          Value::Number(n) => Some(n.to_string()),
          Value::Bool(b) => Some(b.to_string()),
          _ => None,
        })
        .collect();
      out.insert(prefix.to_string(), joined.join(","));
    }
    Value::Tagged(tagged) => flatten_yaml_into(prefix, &tagged.value, out),
  }
}

fn flatten_json(value: &serde_json::Value) -> BTreeMap<String, String> {
  let mut out = BTreeMap::new();
  flatten_json_into("", value, &mut out);
  out
}

fn flatten_json_into(prefix: &str, value: &serde_json::Value, out: &mut BTreeMap<String, String>) {
  use serde_json::Value;

  match value {
    Value::Object(map) => {
      for (k, v) in map {
        flatten_json_into(&join(prefix, k), v, out);
      }
    }
    Value::Null => {
      out.insert(prefix.to_string(), String::new());
    }
    Value::String(s) => {
      out.insert(prefix.to_string(), s.clone());
    }
    Value::Array(items) => {
      let joined: Vec<String> = items
        .iter()
        .map(|item| match item {
          Value::String(s) => s.clone(),
          other => other.to_string(),
        })
        .collect();
      out.insert(prefix.to_string(), joined.join(","));
    }
    other => {
      out.insert(prefix.to_string(), other.to_string());
    }
  }
}

fn join(prefix: &str, key: &str) -> String {
  if prefix.is_empty() {
    key.to_string()
  } else {
    format!("{prefix}.{key}")
  }
}
