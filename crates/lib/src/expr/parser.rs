use super::{ExprError, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Not,
  Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Or,
  And,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  Add,
  Sub,
  Mul,
  Div,
  Rem,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Literal(Value),
  Path(String),
  Unary(UnaryOp, Box<Expr>),
  Binary(BinaryOp, Box<Expr>, Box<Expr>),
  Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
  Number(f64),
  Str(String),
  Ident(String),
  Op(&'static str),
  LParen,
  RParen,
  Question,
  Colon,
}

impl Token {
  fn describe(&self) -> String {
    match self {
      Token::Number(n) => n.to_string(),
      Token::Str(s) => format!("'{s}'"),
      Token::Ident(s) => s.clone(),
      Token::Op(op) => op.to_string(),
      Token::LParen => "(".to_string(),
      Token::RParen => ")".to_string(),
      Token::Question => "?".to_string(),
      Token::Colon => ":".to_string(),
    }
  }
}

const OPERATORS: &[&str] = &["&&", "||", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "!"];

fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
  let mut tokens = Vec::new();
  let chars: Vec<(usize, char)> = source.char_indices().collect();
  let mut i = 0;

  while i < chars.len() {
    let (pos, c) = chars[i];

    if c.is_whitespace() {
      i += 1;
      continue;
    }

    match c {
      '(' => tokens.push(Token::LParen),
      ')' => tokens.push(Token::RParen),
      '?' => tokens.push(Token::Question),
      ':' => tokens.push(Token::Colon),
      '\'' | '"' => {
        let mut text = String::new();
        i += 1;
        loop {
          let Some(&(_, ch)) = chars.get(i) else {
            return Err(ExprError::UnterminatedString);
          };
          if ch == c {
            break;
          }
          text.push(ch);
          i += 1;
        }
        tokens.push(Token::Str(text));
      }
      c if c.is_ascii_digit() => {
        let start = i;
        while chars.get(i).is_some_and(|(_, ch)| ch.is_ascii_digit() || *ch == '.') {
          i += 1;
        }
        let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
        let number = text.parse().map_err(|_| ExprError::UnexpectedToken(text.clone()))?;
        tokens.push(Token::Number(number));
        continue;
      }
      c if c.is_alphabetic() || c == '_' => {
        let start = i;
        while chars
          .get(i)
          .is_some_and(|(_, ch)| ch.is_alphanumeric() || *ch == '_' || *ch == '.')
        {
          i += 1;
        }
        let word: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
        tokens.push(match word.as_str() {
          "and" => Token::Op("&&"),
          "or" => Token::Op("||"),
          "not" => Token::Op("!"),
          _ => Token::Ident(word),
        });
        continue;
      }
      _ => {
        let rest = &source[pos..];
        let op = OPERATORS
          .iter()
          .find(|op| rest.starts_with(**op))
          .copied()
          .ok_or(ExprError::UnexpectedChar(c, pos))?;
        tokens.push(Token::Op(op));
        i += op.chars().count();
        continue;
      }
    }
    i += 1;
  }

  Ok(tokens)
}

/// Parse an expression into a syntax tree.
pub fn parse(source: &str) -> Result<Expr, ExprError> {
  let tokens = tokenize(source)?;
  let mut parser = Parser { tokens, pos: 0 };
  let expr = parser.conditional()?;
  match parser.peek() {
    None => Ok(expr),
    Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
  }
}

struct Parser {
  tokens: Vec<Token>,
  pos: usize,
}

impl Parser {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn eat_op(&mut self, ops: &[&str]) -> Option<&'static str> {
    match self.peek() {
      Some(Token::Op(op)) if ops.contains(op) => {
        let op = *op;
        self.pos += 1;
        Some(op)
      }
      _ => None,
    }
  }

  fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
    match self.next() {
      Some(token) if token == expected => Ok(()),
      Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
      None => Err(ExprError::UnexpectedEnd),
    }
  }

  fn conditional(&mut self) -> Result<Expr, ExprError> {
    let cond = self.or()?;
    if self.peek() != Some(&Token::Question) {
      return Ok(cond);
    }
    self.pos += 1;
    let then = self.conditional()?;
    self.expect(Token::Colon)?;
    let otherwise = self.conditional()?;
    Ok(Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)))
  }

  fn or(&mut self) -> Result<Expr, ExprError> {
    let mut lhs = self.and()?;
    while self.eat_op(&["||"]).is_some() {
      lhs = Expr::Binary(BinaryOp::Or, Box::new(lhs), Box::new(self.and()?));
    }
    Ok(lhs)
  }

  fn and(&mut self) -> Result<Expr, ExprError> {
    let mut lhs = self.equality()?;
    while self.eat_op(&["&&"]).is_some() {
      lhs = Expr::Binary(BinaryOp::And, Box::new(lhs), Box::new(self.equality()?));
    }
    Ok(lhs)
  }

  fn equality(&mut self) -> Result<Expr, ExprError> {
    let mut lhs = self.comparison()?;
    while let Some(op) = self.eat_op(&["==", "!="]) {
      let op = if op == "==" { BinaryOp::Eq } else { BinaryOp::Ne };
      lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.comparison()?));
    }
    Ok(lhs)
  }

  fn comparison(&mut self) -> Result<Expr, ExprError> {
    let mut lhs = self.additive()?;
    while let Some(op) = self.eat_op(&["<", "<=", ">", ">="]) {
      let op = match op {
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        _ => BinaryOp::Ge,
      };
      lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.additive()?));
    }
    Ok(lhs)
  }

  fn additive(&mut self) -> Result<Expr, ExprError> {
    let mut lhs = self.multiplicative()?;
    while let Some(op) = self.eat_op(&["+", "-"]) {
      let op = if op == "+" { BinaryOp::Add } else { BinaryOp::Sub };
      lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.multiplicative()?));
    }
    Ok(lhs)
  }

  fn multiplicative(&mut self) -> Result<Expr, ExprError> {
    let mut lhs = self.unary()?;
    while let Some(op) = self.eat_op(&["*", "/", "%"]) {
      let op = match op {
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Rem,
      };
      lhs = Expr::Binary(op, Box::new(lhs), Box::new(self.unary()?));
    }
    Ok(lhs)
  }

  fn unary(&mut self) -> Result<Expr, ExprError> {
    match self.eat_op(&["!", "-"]) {
      Some("!") => Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?))),
      Some(_) => Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?))),
      None => self.primary(),
    }
  }

  fn primary(&mut self) -> Result<Expr, ExprError> {
    match self.next() {
      Some(Token::Number(n)) => Ok(Expr::Literal(Value::Number(n))),
      Some(Token::Str(s)) => Ok(Expr::Literal(Value::Text(s))),
      Some(Token::Ident(word)) => Ok(match word.as_str() {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" => Expr::Literal(Value::Null),
        _ => Expr::Path(word),
      }),
      Some(Token::LParen) => {
        let inner = self.conditional()?;
        self.expect(Token::RParen)?;
        Ok(inner)
      }
      Some(token) => Err(ExprError::UnexpectedToken(token.describe())),
      None => Err(ExprError::UnexpectedEnd),
    }
  }
}
