//! Boolean and arithmetic expressions used by `condition` steps and `while`
//! loops.
//!
//! ```text
//! expr    := or
//! or      := and ( "||" and )*
//! and     := eq ( "&&" eq )*
//! eq      := cmp ( ("==" | "!=") cmp )*
//! cmp     := sum ( ("<" | "<=" | ">" | ">=") sum )*
//! sum     := product ( ("+" | "-") product )*
//! product := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("!" | "-") unary | primary
//! primary := number | string | true | false | null | name | "${" name "}" | "(" expr ")"
//! ```

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ScriptError, ValidationError};
use crate::value::Operator;

/// A parsed expression, evaluated against an execution's variable scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Variable(String),
    Not(Box<Node>),
    Negate(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Compare(Operator),
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

impl Expression {
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidExpression`] when the text does not
    /// follow the grammar.
    pub fn parse(source: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: String| ValidationError::InvalidExpression {
            expression: source.to_string(),
            reason,
        };
        let tokens = tokenize(source).map_err(invalid)?;
        if tokens.is_empty() {
            return Err(invalid("empty expression".to_string()));
        }
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.or().map_err(invalid)?;
        if let Some(token) = parser.peek() {
            return Err(invalid(format!("unexpected trailing {token:?}")));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// # Errors
    ///
    /// Returns [`ScriptError::Expression`] for an unknown variable, a type
    /// mismatch in arithmetic or a division by zero.
    pub fn evaluate(&self, scope: &Map<String, Value>) -> Result<Value, ScriptError> {
        eval(&self.root, scope).map_err(|message| ScriptError::Expression {
            expression: self.source.clone(),
            message,
        })
    }

    /// Evaluate and reduce the result with [`truthy`].
    ///
    /// # Errors
    ///
    /// See [`Expression::evaluate`].
    pub fn evaluate_bool(&self, scope: &Map<String, Value>) -> Result<bool, ScriptError> {
        self.evaluate(scope).map(|v| truthy(&v))
    }
}

impl FromStr for Expression {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// `null`, `false`, `0`, `""`, `[]` and `{}` are false; everything else is true.
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

// ── Lexer ─────────────────────────────────────────────────────

const OPERATORS: [&str; 14] = [
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
];

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else if c == '$' && chars.get(i + 1) == Some(&'{') {
            let close = chars[i..]
                .iter()
                .position(|&ch| ch == '}')
                .ok_or("unterminated ${")?;
            let name: String = chars[i + 2..i + close].iter().collect();
            if name.is_empty() {
                return Err("empty ${} reference".to_string());
            }
            tokens.push(Token::Ident(name));
            i += close + 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let number = text.parse().map_err(|_| format!("bad number {text:?}"))?;
            tokens.push(Token::Number(number));
        } else if c == '"' || c == '\'' {
            let mut text = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => return Err("unterminated string".to_string()),
                    Some(&ch) if ch == c => break,
                    Some('\\') => {
                        let escaped = chars.get(i + 1).ok_or("unterminated string")?;
                        text.push(*escaped);
                        i += 2;
                    }
                    Some(&ch) => {
                        text.push(ch);
                        i += 1;
                    }
                }
            }
            i += 1;
            tokens.push(Token::Str(text));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
            let op: &'static str = OPERATORS
                .iter()
                .copied()
                .find(|op| rest.starts_with(op))
                .ok_or_else(|| format!("unexpected character {c:?}"))?;
            tokens.push(Token::Op(op));
            i += op.chars().count();
        }
    }
    Ok(tokens)
}

// ── Parser ────────────────────────────────────────────────────

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

    fn eat(&mut self, ops: &[&'static str]) -> Option<&'static str> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn binary(
        &mut self,
        ops: &[&'static str],
        operand: fn(&mut Self) -> Result<Node, String>,
    ) -> Result<Node, String> {
        let mut left = operand(self)?;
        while let Some(op) = self.eat(ops) {
            let right = operand(self)?;
            left = Node::Binary(binary_op(op), Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Node, String> {
        self.binary(&["||"], Self::and)
    }

    fn and(&mut self) -> Result<Node, String> {
        self.binary(&["&&"], Self::equality)
    }

    fn equality(&mut self) -> Result<Node, String> {
        self.binary(&["==", "!="], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Node, String> {
        self.binary(&["<", "<=", ">", ">="], Self::sum)
    }

    fn sum(&mut self) -> Result<Node, String> {
        self.binary(&["+", "-"], Self::product)
    }

    fn product(&mut self) -> Result<Node, String> {
        self.binary(&["*", "/", "%"], Self::unary)
    }

    fn unary(&mut self) -> Result<Node, String> {
        match self.eat(&["!", "-"]) {
            Some("!") => Ok(Node::Not(Box::new(self.unary()?))),
            Some(_) => Ok(Node::Negate(Box::new(self.unary()?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Node::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Node::Literal(Value::String(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Node::Literal(Value::Bool(true)),
                "false" => Node::Literal(Value::Bool(false)),
                "null" => Node::Literal(Value::Null),
                _ => Node::Variable(name),
            }),
            Some(Token::LParen) => {
                let inner = self.or()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("missing closing parenthesis".to_string()),
                }
            }
            Some(token) => Err(format!("unexpected {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn binary_op(op: &str) -> BinaryOp {
    match op {
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Compare(Operator::Eq),
        "!=" => BinaryOp::Compare(Operator::Ne),
        "<" => BinaryOp::Compare(Operator::Lt),
        "<=" => BinaryOp::Compare(Operator::Le),
        ">" => BinaryOp::Compare(Operator::Gt),
        ">=" => BinaryOp::Compare(Operator::Ge),
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        _ => BinaryOp::Rem,
    }
}

/// Whole numbers stay integers so `index == 2` and `count + 1` keep their encoding.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

// ── Evaluation ────────────────────────────────────────────────

fn eval(node: &Node, scope: &Map<String, Value>) -> Result<Value, String> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Variable(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| format!("unknown variable {name:?}")),
        Node::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Node::Negate(inner) => {
            let v = eval(inner, scope)?;
            let n = v.as_f64().ok_or_else(|| format!("cannot negate {v}"))?;
            Ok(number(-n))
        }
        Node::Binary(BinaryOp::Or, l, r) => {
            Ok(Value::Bool(truthy(&eval(l, scope)?) || truthy(&eval(r, scope)?)))
        }
        Node::Binary(BinaryOp::And, l, r) => {
            Ok(Value::Bool(truthy(&eval(l, scope)?) && truthy(&eval(r, scope)?)))
        }
        Node::Binary(BinaryOp::Compare(op), l, r) => {
            Ok(Value::Bool(op.compare(&eval(l, scope)?, &eval(r, scope)?)))
        }
        Node::Binary(op, l, r) => arithmetic(*op, &eval(l, scope)?, &eval(r, scope)?),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, String> {
    if op == BinaryOp::Add && (l.is_string() || r.is_string()) {
        return Ok(Value::String(format!("{}{}", plain(l), plain(r))));
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(format!("arithmetic on non-numbers {l} and {r}"));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err("division by zero".to_string()),
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(number(result))
}

/// Strings without their JSON quotes, everything else as JSON.
#[must_use]
pub fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
