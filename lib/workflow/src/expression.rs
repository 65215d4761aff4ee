//! Guard and condition expressions.
//!
//! A small boolean language over JSON values:
//!
//! ```text
//! expr    := and ("||" and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | compare
//! compare := primary (("==" | "!=" | "<" | "<=" | ">" | ">=") primary)?
//! primary := number | string | true | false | null | path | "(" expr ")"
//! path    := ident ("." ident | "[" number "]" | "[" string "]")*
//! ```
//!
//! Paths start at one of three roots: `$` (the current value), `run` (the
//! run input) or `nodes` (committed node outputs keyed by node id). Any other
//! leading identifier is looked up under `$`. Missing values are `null`.

use crate::node::NodeId;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Error from parsing an expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionError {
    pub expression: String,
    /// Byte offset of the offending token.
    pub position: usize,
    pub message: String,
}

impl fmt::Display for ExpressionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid expression `{}` at offset {}: {}",
            self.expression, self.position, self.message
        )
    }
}

impl std::error::Error for ExpressionError {}

/// Values an expression can see.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    /// Bound to `$`: an edge's source output, or a logic node's input.
    pub current: &'a JsonValue,
    /// Bound to `run`.
    pub run: &'a JsonValue,
    /// Bound to `nodes`.
    pub nodes: &'a HashMap<NodeId, JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(JsonValue),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Not,
    And,
    Or,
    Op(CompareOp),
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    /// Parses an expression.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first token that does not fit the
    /// grammar.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let root = parser.parse_or()?;
        if let Some((_, at)) = parser.tokens.get(parser.pos) {
            return Err(parser.error(*at, "unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Returns the original text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates to a JSON value.
    #[must_use]
    pub fn evaluate(&self, scope: &Scope<'_>) -> JsonValue {
        eval(&self.root, scope)
    }

    /// Evaluates and applies truthiness.
    #[must_use]
    pub fn evaluate_bool(&self, scope: &Scope<'_>) -> bool {
        truthy(&self.evaluate(scope))
    }
}

/// `null`, `false`, `0`, `""` and `[]` are false; everything else is true.
#[must_use]
pub fn truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(items) => !items.is_empty(),
        JsonValue::Object(_) => true,
    }
}

fn eval(expr: &Expr, scope: &Scope<'_>) -> JsonValue {
    match expr {
        Expr::Literal(value) => value.clone(),
        Expr::Path(segments) => resolve(segments, scope),
        Expr::Not(inner) => JsonValue::Bool(!truthy(&eval(inner, scope))),
        Expr::And(lhs, rhs) => {
            JsonValue::Bool(truthy(&eval(lhs, scope)) && truthy(&eval(rhs, scope)))
        }
        Expr::Or(lhs, rhs) => {
            JsonValue::Bool(truthy(&eval(lhs, scope)) || truthy(&eval(rhs, scope)))
        }
        Expr::Compare(op, lhs, rhs) => {
            JsonValue::Bool(compare(*op, &eval(lhs, scope), &eval(rhs, scope)))
        }
    }
}

fn resolve(segments: &[Segment], scope: &Scope<'_>) -> JsonValue {
    let (base, rest) = match segments.first() {
        Some(Segment::Key(root)) if root == "$" => (Some(scope.current), &segments[1..]),
        Some(Segment::Key(root)) if root == "run" => (Some(scope.run), &segments[1..]),
        Some(Segment::Key(root)) if root == "nodes" => match segments.get(1) {
            Some(Segment::Key(id)) => (scope.nodes.get(id.as_str()), &segments[2..]),
            _ => (None, &segments[0..0]),
        },
        _ => (Some(scope.current), segments),
    };

    let mut value = base;
    for segment in rest {
        value = value.and_then(|v| match segment {
            Segment::Key(key) => v.get(key.as_str()),
            Segment::Index(index) => v.get(*index),
        });
    }
    value.cloned().unwrap_or(JsonValue::Null)
}

fn values_equal(lhs: &JsonValue, rhs: &JsonValue) -> bool {
    match (lhs, rhs) {
        (JsonValue::Number(a), JsonValue::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(op: CompareOp, lhs: &JsonValue, rhs: &JsonValue) -> bool {
    let ordering = match op {
        CompareOp::Eq => return values_equal(lhs, rhs),
        CompareOp::Ne => return !values_equal(lhs, rhs),
        _ => match (lhs, rhs) {
            (JsonValue::Number(a), JsonValue::Number(b)) => match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
            (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        return false;
    };
    match op {
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
        CompareOp::Eq | CompareOp::Ne => false,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '-'
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExpressionError> {
    let error = |position: usize, message: &str| ExpressionError {
        expression: source.to_string(),
        position,
        message: message.to_string(),
    };

    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();
    while let Some(&(at, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let starts_number = c.is_ascii_digit()
            || (c == '-' && source[at + 1..].starts_with(|n: char| n.is_ascii_digit()));
        if starts_number {
            let mut end = at + c.len_utf8();
            chars.next();
            while let Some(&(i, n)) = chars.peek() {
                if n.is_ascii_digit() || n == '.' {
                    end = i + n.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let number = source[at..end]
                .parse::<f64>()
                .map_err(|_| error(at, "malformed number"))?;
            tokens.push((Token::Number(number), at));
            continue;
        }

        if c == '"' || c == '\'' {
            chars.next();
            let mut text = String::new();
            let mut closed = false;
            while let Some((_, n)) = chars.next() {
                match n {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => text.push('\n'),
                        Some((_, 't')) => text.push('\t'),
                        Some((_, escaped)) => text.push(escaped),
                        None => break,
                    },
                    n if n == c => {
                        closed = true;
                        break;
                    }
                    n => text.push(n),
                }
            }
            if !closed {
                return Err(error(at, "unterminated string"));
            }
            tokens.push((Token::Str(text), at));
            continue;
        }

        if is_ident_start(c) {
            let mut ident = String::new();
            while let Some(&(_, n)) = chars.peek() {
                if is_ident_continue(n) {
                    ident.push(n);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((Token::Ident(ident), at));
            continue;
        }

        chars.next();
        let next = chars.peek().map(|&(_, n)| n);
        let token = match (c, next) {
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            ('[', _) => Token::LBracket,
            (']', _) => Token::RBracket,
            ('.', _) => Token::Dot,
            ('!', Some('=')) => {
                chars.next();
                Token::Op(CompareOp::Ne)
            }
            ('!', _) => Token::Not,
            ('=', Some('=')) => {
                chars.next();
                Token::Op(CompareOp::Eq)
            }
            ('<', Some('=')) => {
                chars.next();
                Token::Op(CompareOp::Le)
            }
            ('<', _) => Token::Op(CompareOp::Lt),
            ('>', Some('=')) => {
                chars.next();
                Token::Op(CompareOp::Ge)
            }
            ('>', _) => Token::Op(CompareOp::Gt),
            ('&', Some('&')) => {
                chars.next();
                Token::And
            }
            ('|', Some('|')) => {
                chars.next();
                Token::Or
            }
            _ => return Err(error(at, &format!("unexpected character '{c}'"))),
        };
        tokens.push((token, at));
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, position: usize, message: &str) -> ExpressionError {
        ExpressionError {
            expression: self.source.to_string(),
            position,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(token, _)| token)
    }

    fn next(&mut self) -> Option<(Token, usize)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn next_or_eof(&mut self, expected: &str) -> Result<(Token, usize), ExpressionError> {
        let end = self.source.len();
        self.next()
            .ok_or_else(|| self.error(end, &format!("expected {expected}, found end of input")))
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.parse_primary()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let (token, at) = self.next_or_eof("a value")?;
        match token {
            Token::Number(n) => Ok(Expr::Literal(number_literal(n))),
            Token::Str(s) => Ok(Expr::Literal(JsonValue::String(s))),
            Token::LParen => {
                let inner = self.parse_or()?;
                match self.next_or_eof("')'")? {
                    (Token::RParen, _) => Ok(inner),
                    (_, at) => Err(self.error(at, "expected ')'")),
                }
            }
            Token::Ident(ident) => match ident.as_str() {
                "true" => Ok(Expr::Literal(JsonValue::Bool(true))),
                "false" => Ok(Expr::Literal(JsonValue::Bool(false))),
                "null" => Ok(Expr::Literal(JsonValue::Null)),
                _ => self.parse_path(ident),
            },
            _ => Err(self.error(at, "expected a value")),
        }
    }

    fn parse_path(&mut self, first: String) -> Result<Expr, ExpressionError> {
        let mut segments = vec![Segment::Key(first)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next_or_eof("a field name")? {
                        (Token::Ident(key), _) => segments.push(Segment::Key(key)),
                        (_, at) => return Err(self.error(at, "expected a field name")),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let segment = match self.next_or_eof("an index")? {
                        (Token::Number(n), _) if n >= 0.0 && n.fract() == 0.0 => {
                            Segment::Index(n as usize)
                        }
                        (Token::Str(key), _) => Segment::Key(key),
                        (_, at) => return Err(self.error(at, "expected an index or quoted key")),
                    };
                    match self.next_or_eof("']'")? {
                        (Token::RBracket, _) => segments.push(segment),
                        (_, at) => return Err(self.error(at, "expected ']'")),
                    }
                }
                _ => return Ok(Expr::Path(segments)),
            }
        }
    }
}

fn number_literal(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        JsonValue::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval_with(expr: &str, current: JsonValue) -> JsonValue {
        let run = json!({ "user": "ada" });
        let mut nodes = HashMap::new();
        nodes.insert(NodeId::from("fetch"), json!({ "status": 200, "items": [1, 2] }));
        let scope = Scope {
            current: &current,
            run: &run,
            nodes: &nodes,
        };
        Expression::parse(expr).expect("parse").evaluate(&scope)
    }

    #[test]
    fn bare_paths_read_the_current_value() {
        assert_eq!(eval_with("score > 70", json!({ "score": 85 })), json!(true));
        assert_eq!(eval_with("score > 70", json!({ "score": 12 })), json!(false));
        assert_eq!(eval_with("$.a.b[1]", json!({ "a": { "b": [0, 7] } })), json!(7));
    }

    #[test]
    fn roots_reach_run_input_and_node_outputs() {
        assert_eq!(eval_with("run.user == 'ada'", json!(null)), json!(true));
        assert_eq!(eval_with("nodes.fetch.status == 200", json!(null)), json!(true));
        assert_eq!(eval_with("nodes[\"fetch\"].items[1]", json!(null)), json!(2));
        assert_eq!(eval_with("nodes.absent.status", json!(null)), json!(null));
    }

    #[test]
    fn boolean_operators_and_precedence() {
        let current = json!({ "a": true, "b": false, "n": 0 });
        assert_eq!(eval_with("a && !b", current.clone()), json!(true));
        assert_eq!(eval_with("b || n || a", current.clone()), json!(true));
        assert_eq!(eval_with("!(a && b) && a", current.clone()), json!(true));
        assert_eq!(eval_with("a && b || a", current), json!(true));
    }

    #[test]
    fn missing_values_and_mismatched_types() {
        assert_eq!(eval_with("missing == null", json!({})), json!(true));
        assert_eq!(eval_with("name > 3", json!({ "name": "x" })), json!(false));
        assert_eq!(eval_with("1 == 1.0", json!(null)), json!(true));
        assert_eq!(eval_with("'b' >= 'a'", json!(null)), json!(true));
        assert_eq!(eval_with("delta < -1.5", json!({ "delta": -2 })), json!(true));
    }

    #[test]
    fn truthiness() {
        assert!(!truthy(&json!(null)));
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!([])));
        assert!(truthy(&json!({})));
        assert!(truthy(&json!("no")));
    }

    #[test]
    fn parse_errors_point_at_the_problem() {
        let err = Expression::parse("score >").expect_err("incomplete");
        assert_eq!(err.position, 7);

        let err = Expression::parse("a = 1").expect_err("single equals");
        assert_eq!(err.position, 2);

        let err = Expression::parse("'open").expect_err("unterminated");
        assert_eq!(err.position, 0);

        assert!(Expression::parse("a b").is_err());
        assert!(Expression::parse("").is_err());
    }
}
