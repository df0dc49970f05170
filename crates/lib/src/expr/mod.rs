//! Inline expressions (`%{...}`) evaluated after placeholder substitution.
//!
//! The language is deliberately small: literals, dotted property paths
//! looked up in the current property bag, arithmetic, string concatenation,
//! comparisons, boolean logic and a ternary. It covers derived attributes
//! (`%{port + 1}`) and boolean asserts (`'${a}' != '${b}'`) and nothing more.
//!
//! ```
//! use std::collections::BTreeMap;
//! use dcc_lib::expr::{evaluate, render, Value};
//!
//! let mut bag = BTreeMap::new();
//! bag.insert("http.port".to_string(), "8080".to_string());
//!
//! assert_eq!(evaluate("http.port + 1", &bag).unwrap(), Value::Number(8081.0));
//! assert_eq!(render("admin on %{http.port + 1}", &bag).unwrap(), "admin on 8081");
//! ```

mod parser;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use parser::{BinaryOp, Expr, UnaryOp};

pub use parser::parse;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
  #[error("unexpected character '{0}' at position {1}")]
  UnexpectedChar(char, usize),

  #[error("unterminated string literal")]
  UnterminatedString,

  #[error("unexpected token '{0}'")]
  UnexpectedToken(String),

  #[error("unexpected end of expression")]
  UnexpectedEnd,

  #[error("unclosed expression at position {0}")]
  Unclosed(usize),

  #[error("type error: {0}")]
  Type(String),

  #[error("division by zero")]
  DivisionByZero,
}

/// Property lookups available to an expression.
pub trait Context {
  fn lookup(&self, path: &str) -> Option<String>;
}

impl Context for BTreeMap<String, String> {
  fn lookup(&self, path: &str) -> Option<String> {
    self.get(path).cloned()
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Number(f64),
  Text(String),
}

impl Value {
  fn as_number(&self) -> Option<f64> {
    match self {
      Value::Number(n) => Some(*n),
      Value::Text(s) => s.trim().parse().ok(),
      _ => None,
    }
  }

  /// Truthiness used by `&&`, `||`, `!` and the ternary.
  pub fn truthy(&self) -> bool {
    match self {
      Value::Null => false,
      Value::Bool(b) => *b,
      Value::Number(n) => *n != 0.0,
      Value::Text(s) => !(s.is_empty() || s.eq_ignore_ascii_case("false")),
    }
  }

  /// A strict boolean reading: only booleans and "true"/"false" text qualify.
  pub fn as_bool(&self) -> Option<bool> {
    match self {
      Value::Bool(b) => Some(*b),
      Value::Text(s) if s.trim().eq_ignore_ascii_case("true") => Some(true),
      Value::Text(s) if s.trim().eq_ignore_ascii_case("false") => Some(false),
      _ => None,
    }
  }

  pub fn is_null(&self) -> bool {
    matches!(self, Value::Null)
  }
}

impl fmt::Display for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Value::Null => Ok(()),
      Value::Bool(b) => write!(f, "{b}"),
      Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
      Value::Number(n) => write!(f, "{n}"),
      Value::Text(s) => f.write_str(s),
    }
  }
}

/// Parse and evaluate a complete expression.
pub fn evaluate(source: &str, ctx: &impl Context) -> Result<Value, ExprError> {
  let expr = parse(source)?;
  eval(&expr, ctx)
}

/// Whether a string contains inline expressions at all.
pub fn has_expressions(template: &str) -> bool {
  template.contains("%{")
}

/// Evaluate every `%{...}` segment of a template and splice the results in.
pub fn render(template: &str, ctx: &impl Context) -> Result<String, ExprError> {
  let mut out = String::new();
  let mut rest = template;
  let mut offset = 0;

  while let Some(start) = rest.find("%{") {
    out.push_str(&rest[..start]);
    let body_start = start + 2;
    let end = closing_brace(&rest[body_start..]).ok_or(ExprError::Unclosed(offset + start))?;
    let value = evaluate(&rest[body_start..body_start + end], ctx)?;
    out.push_str(&value.to_string());
    let consumed = body_start + end + 1;
    offset += consumed;
    rest = &rest[consumed..];
  }

  out.push_str(rest);
  Ok(out)
}

/// Index of the `}` closing an expression body, skipping quoted strings.
fn closing_brace(body: &str) -> Option<usize> {
  let mut quote: Option<char> = None;
  for (i, c) in body.char_indices() {
    match (quote, c) {
      (Some(q), c) if c == q => quote = None,
      (Some(_), _) => {}
      (None, '\'' | '"') => quote = Some(c),
      (None, '}') => return Some(i),
      _ => {}
    }
  }
  None
}

fn eval(expr: &Expr, ctx: &impl Context) -> Result<Value, ExprError> {
  match expr {
    Expr::Literal(v) => Ok(v.clone()),
    Expr::Path(path) => Ok(ctx.lookup(path).map(Value::Text).unwrap_or(Value::Null)),
    Expr::Unary(op, inner) => {
      let v = eval(inner, ctx)?;
      match op {
        UnaryOp::Not => Ok(Value::Bool(!v.truthy())),
        UnaryOp::Neg => v
          .as_number()
          .map(|n| Value::Number(-n))
          .ok_or_else(|| ExprError::Type(format!("cannot negate '{v}'"))),
      }
    }
    Expr::Binary(BinaryOp::And, lhs, rhs) => {
      Ok(Value::Bool(eval(lhs, ctx)?.truthy() && eval(rhs, ctx)?.truthy()))
    }
    Expr::Binary(BinaryOp::Or, lhs, rhs) => Ok(Value::Bool(eval(lhs, ctx)?.truthy() || eval(rhs, ctx)?.truthy())),
    Expr::Binary(op, lhs, rhs) => binary(*op, eval(lhs, ctx)?, eval(rhs, ctx)?),
    Expr::Conditional(cond, then, otherwise) => {
      if eval(cond, ctx)?.truthy() {
        eval(then, ctx)
      } else {
        eval(otherwise, ctx)
      }
    }
  }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, ExprError> {
  let numbers = lhs.as_number().zip(rhs.as_number());

  match op {
    BinaryOp::Add => match numbers {
      Some((a, b)) => Ok(Value::Number(a + b)),
      None => Ok(Value::Text(format!("{lhs}{rhs}"))),
    },
    BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
      let (a, b) = numbers.ok_or_else(|| ExprError::Type(format!("'{lhs}' and '{rhs}' are not both numbers")))?;
      match op {
        BinaryOp::Sub => Ok(Value::Number(a - b)),
        BinaryOp::Mul => Ok(Value::Number(a * b)),
        _ if b == 0.0 => Err(ExprError::DivisionByZero),
        BinaryOp::Div => Ok(Value::Number(a / b)),
        _ => Ok(Value::Number(a % b)),
      }
    }
    BinaryOp::Eq => Ok(Value::Bool(equals(&lhs, &rhs))),
    BinaryOp::Ne => Ok(Value::Bool(!equals(&lhs, &rhs))),
    BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
      if lhs.is_null() || rhs.is_null() {
        return Err(ExprError::Type("cannot order null".to_string()));
      }
      let ordering = match numbers {
        Some((a, b)) => a.partial_cmp(&b),
        None => Some(lhs.to_string().cmp(&rhs.to_string())),
      }
      .ok_or_else(|| ExprError::Type("incomparable values".to_string()))?;
      Ok(Value::Bool(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
      }))
    }
    BinaryOp::And | BinaryOp::Or => unreachable!("short-circuit operators are evaluated in eval"),
  }
}

fn equals(lhs: &Value, rhs: &Value) -> bool {
  match (lhs, rhs) {
    (Value::Null, Value::Null) => true,
    (Value::Null, _) | (_, Value::Null) => false,
    _ => match lhs.as_number().zip(rhs.as_number()) {
      Some((a, b)) => a == b,
      None => lhs.to_string() == rhs.to_string(),
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn bag(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  #[test]
  fn arithmetic_over_looked_up_values() {
    let ctx = bag(&[("port", "8080"), ("replicas", "3")]);
    assert_eq!(evaluate("port + 1", &ctx).unwrap(), Value::Number(8081.0));
    assert_eq!(evaluate("replicas * 2 - 1", &ctx).unwrap(), Value::Number(5.0));
    assert_eq!(evaluate("(replicas + 1) % 3", &ctx).unwrap(), Value::Number(1.0));
  }

  #[test]
  fn concatenation_when_text_is_involved() {
    let ctx = bag(&[("host", "db01")]);
    assert_eq!(evaluate("host + ':' + 5432", &ctx).unwrap(), Value::Text("db01:5432".to_string()));
  }

  #[test]
  fn comparisons_and_logic() {
    let ctx = bag(&[("port", "8080"), ("ssl", "true")]);
    assert_eq!(evaluate("port > 1024 && ssl == true", &ctx).unwrap(), Value::Bool(true));
    assert_eq!(evaluate("not (port >= 9000) and '8080' == port", &ctx).unwrap(), Value::Bool(true));
    assert_eq!(evaluate("'10' < '9'", &ctx).unwrap(), Value::Bool(false));
    assert_eq!(evaluate("'abc' < 'abd'", &ctx).unwrap(), Value::Bool(true));
  }

  #[test]
  fn missing_paths_are_null() {
    let ctx = bag(&[]);
    assert_eq!(evaluate("missing", &ctx).unwrap(), Value::Null);
    assert_eq!(evaluate("missing == null", &ctx).unwrap(), Value::Bool(true));
    assert!(evaluate("missing < 3", &ctx).is_err());
  }

  #[test]
  fn ternary_picks_branch() {
    let ctx = bag(&[("env", "prod")]);
    assert_eq!(
      evaluate("env == 'prod' ? 'https' : 'http'", &ctx).unwrap(),
      Value::Text("https".to_string())
    );
  }

  #[test]
  fn render_splices_segments() {
    let ctx = bag(&[("port", "8080")]);
    assert_eq!(render("http://h:%{port}/ and %{port + 1}", &ctx).unwrap(), "http://h:8080/ and 8081");
    assert_eq!(render("no expressions", &ctx).unwrap(), "no expressions");
    assert_eq!(render("%{'}'}", &ctx).unwrap(), "}");
  }

  #[test]
  fn errors() {
    let ctx = bag(&[]);
    assert!(matches!(render("%{1 +", &ctx), Err(ExprError::Unclosed(0))));
    assert!(matches!(evaluate("1 / 0", &ctx), Err(ExprError::DivisionByZero)));
    assert!(matches!(evaluate("'a' - 1", &ctx), Err(ExprError::Type(_))));
    assert!(evaluate("Hello world, this is prose.", &ctx).is_err());
  }

  #[test]
  fn number_display_drops_integral_fraction() {
    assert_eq!(Value::Number(3.0).to_string(), "3");
    assert_eq!(Value::Number(2.5).to_string(), "2.5");
  }
}
