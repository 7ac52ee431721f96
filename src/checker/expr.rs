//! Sandboxed boolean expressions
//!
//! A checker written as a bare expression (`x > 0 && x < 100`) is compiled here
//! into a small AST and evaluated against the cell's converted value, bound to the
//! single free variable `x`. Only literals, `x`, member/index access, a handful of
//! pure functions, and arithmetic/comparison/boolean operators exist; there is no
//! way to reach anything outside the value being checked.

use std::fmt;

use crate::value::{format_number, Value, DEFAULT_PRECISION};

/// Nesting limit for parentheses, calls and unary chains
const MAX_NESTING: usize = 64;

const FUNCTIONS: &[&str] = &["len", "abs", "floor", "ceil", "min", "max"];

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ExprError {
    pub message: String,
    /// Byte offset into the source, when known
    pub offset: Option<usize>,
}

impl ExprError {
    fn at(offset: usize, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: Some(offset),
        }
    }

    fn eval(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            offset: None,
        }
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(f, "{} (at offset {})", self.message, offset),
            None => write!(f, "{}", self.message),
        }
    }
}

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Sym(&'static str),
    Eof,
}

const SYMBOLS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "-", "*", "/", "%",
    "(", ")", "[", "]", ".", ",",
];

fn lex(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    'outer: while i < bytes.len() {
        let c = bytes[i] as char;
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && bytes.get(i + 1).map_or(false, |b| b.is_ascii_digit())) {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                i += 1;
                if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
                    i += 1;
                }
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let text = &src[start..i];
            let n = text
                .parse::<f64>()
                .map_err(|_| ExprError::at(start, format!("invalid number '{}'", text)))?;
            tokens.push((Token::Number(n), start));
            continue;
        }
        if c == '"' || c == '\'' {
            let start = i;
            let mut out = String::new();
            let mut chars = src[i + 1..].char_indices();
            while let Some((offset, ch)) = chars.next() {
                match ch {
                    '\\' => match chars.next() {
                        Some((_, 'n')) => out.push('\n'),
                        Some((_, 't')) => out.push('\t'),
                        Some((_, other)) => out.push(other),
                        None => break,
                    },
                    ch if ch == c => {
                        tokens.push((Token::Str(out), start));
                        i = i + 1 + offset + ch.len_utf8();
                        continue 'outer;
                    }
                    ch => out.push(ch),
                }
            }
            return Err(ExprError::at(start, "unterminated string"));
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            tokens.push((Token::Ident(src[start..i].to_string()), start));
            continue;
        }
        match SYMBOLS.iter().find(|s| src[i..].starts_with(**s)) {
            Some(sym) => {
                tokens.push((Token::Sym(*sym), i));
                i += sym.len();
            }
            None => {
                let ch = src[i..].chars().next().unwrap_or(c);
                return Err(ExprError::at(i, format!("unexpected character '{}'", ch)));
            }
        }
    }
    tokens.push((Token::Eof, src.len()));
    Ok(tokens)
}

// =============================================================================
// AST
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
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
enum Node {
    Literal(Value),
    Var,
    Member(Box<Node>, String),
    Index(Box<Node>, Box<Node>),
    Call(String, Vec<Node>),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

/// A compiled checker expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    source: String,
    root: Node,
}

// =============================================================================
// Parser
// =============================================================================

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Token::Sym(s) if *s == sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Token::Ident(s) if s == word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_sym(&mut self, sym: &str) -> Result<(), ExprError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(ExprError::at(self.offset(), format!("expected '{}'", sym)))
        }
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.nesting += 1;
        if self.nesting > MAX_NESTING {
            return Err(ExprError::at(self.offset(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_and()?;
        while self.eat_sym("||") || self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Node::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_equality()?;
        while self.eat_sym("&&") || self.eat_keyword("and") {
            let right = self.parse_equality()?;
            left = Node::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.eat_sym("===") || self.eat_sym("==") {
                BinaryOp::Eq
            } else if self.eat_sym("!==") || self.eat_sym("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat_sym("<=") {
                BinaryOp::Le
            } else if self.eat_sym(">=") {
                BinaryOp::Ge
            } else if self.eat_sym("<") {
                BinaryOp::Lt
            } else if self.eat_sym(">") {
                BinaryOp::Gt
            } else {
                break;
            };
            let right = self.parse_additive()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_sym("+") {
                BinaryOp::Add
            } else if self.eat_sym("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_sym("*") {
                BinaryOp::Mul
            } else if self.eat_sym("/") {
                BinaryOp::Div
            } else if self.eat_sym("%") {
                BinaryOp::Rem
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Node::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Node, ExprError> {
        let op = if self.eat_sym("!") || self.eat_keyword("not") {
            Some(UnaryOp::Not)
        } else if self.eat_sym("-") {
            Some(UnaryOp::Neg)
        } else {
            None
        };
        match op {
            Some(op) => {
                self.enter()?;
                let operand = self.parse_unary()?;
                self.nesting -= 1;
                Ok(Node::Unary(op, Box::new(operand)))
            }
            None => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Node, ExprError> {
        let mut node = self.parse_primary()?;
        loop {
            if self.eat_sym(".") {
                let offset = self.offset();
                match self.advance() {
                    Token::Ident(name) => node = Node::Member(Box::new(node), name),
                    _ => return Err(ExprError::at(offset, "expected member name after '.'")),
                }
            } else if self.eat_sym("[") {
                self.enter()?;
                let index = self.parse_or()?;
                self.nesting -= 1;
                self.expect_sym("]")?;
                node = Node::Index(Box::new(node), Box::new(index));
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Node, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Token::Number(n) => Ok(Node::Literal(Value::Number(n))),
            Token::Str(s) => Ok(Node::Literal(Value::String(s))),
            Token::Sym("(") => {
                self.enter()?;
                let inner = self.parse_or()?;
                self.nesting -= 1;
                self.expect_sym(")")?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "x" => Ok(Node::Var),
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "null" => Ok(Node::Literal(Value::Null)),
                f if FUNCTIONS.contains(&f) => {
                    self.expect_sym("(")?;
                    self.enter()?;
                    let mut args = Vec::new();
                    if !self.eat_sym(")") {
                        loop {
                            args.push(self.parse_or()?);
                            if self.eat_sym(")") {
                                break;
                            }
                            self.expect_sym(",")?;
                        }
                    }
                    self.nesting -= 1;
                    Ok(Node::Call(name, args))
                }
                other => Err(ExprError::at(
                    offset,
                    format!("unknown identifier '{}' (the checked value is 'x')", other),
                )),
            },
            Token::Eof => Err(ExprError::at(offset, "unexpected end of expression")),
            other => Err(ExprError::at(offset, format!("unexpected token {:?}", other))),
        }
    }
}

impl Expr {
    /// Compile an expression over the free variable `x`
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            nesting: 0,
        };
        let root = parser.parse_or()?;
        if *parser.peek() != Token::Eof {
            return Err(ExprError::at(parser.offset(), "unexpected trailing input"));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with `x` bound to `value`
    pub fn evaluate(&self, value: &Value) -> Result<Value, ExprError> {
        eval(&self.root, value.unwrapped())
    }

    /// Evaluate and test the result for truthiness
    pub fn test(&self, value: &Value) -> Result<bool, ExprError> {
        self.evaluate(value).map(|v| truthy(&v))
    }
}

// =============================================================================
// Evaluation
// =============================================================================

pub fn truthy(value: &Value) -> bool {
    match value.unwrapped() {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => *n != 0.0 && !n.is_nan(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n, DEFAULT_PRECISION),
        other => other.to_string(),
    }
}

fn number(value: &Value, what: &str) -> Result<f64, ExprError> {
    match value {
        Value::Number(n) => Ok(*n),
        Value::String(s) => crate::value::parse_number(s)
            .ok_or_else(|| ExprError::eval(format!("{} expects a number, got '{}'", what, s))),
        other => Err(ExprError::eval(format!("{} expects a number, got {}", what, other.kind()))),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<bool, ExprError> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => {
            let a = number(left, "comparison")?;
            let b = number(right, "comparison")?;
            a.partial_cmp(&b)
                .ok_or_else(|| ExprError::eval("cannot compare NaN"))?
        }
    };
    Ok(match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    })
}

fn eval(node: &Node, x: &Value) -> Result<Value, ExprError> {
    match node {
        Node::Literal(v) => Ok(v.clone()),
        Node::Var => Ok(x.clone()),
        Node::Member(target, name) => {
            let target = eval(target, x)?;
            match target.unwrapped() {
                Value::Object(o) => Ok(o.get(name).map(|v| v.unwrapped().clone()).unwrap_or(Value::Null)),
                Value::String(s) if name == "length" => Ok(Value::Number(s.chars().count() as f64)),
                Value::Array(a) if name == "length" => Ok(Value::Number(a.len() as f64)),
                other => Err(ExprError::eval(format!("cannot read '{}' of {}", name, other.kind()))),
            }
        }
        Node::Index(target, index) => {
            let target = eval(target, x)?;
            let index = eval(index, x)?;
            match (target.unwrapped(), index.unwrapped()) {
                (Value::Array(a), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => {
                    Ok(a.items.get(*n as usize).map(|v| v.unwrapped().clone()).unwrap_or(Value::Null))
                }
                (Value::Object(o), key) => Ok(o
                    .get(&text(key))
                    .map(|v| v.unwrapped().clone())
                    .unwrap_or(Value::Null)),
                (t, i) => Err(ExprError::eval(format!("cannot index {} with {}", t.kind(), i.kind()))),
            }
        }
        Node::Call(name, args) => {
            let values = args
                .iter()
                .map(|a| eval(a, x))
                .collect::<Result<Vec<_>, _>>()?;
            call(name, &values)
        }
        Node::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!truthy(&eval(operand, x)?))),
        Node::Unary(UnaryOp::Neg, operand) => Ok(Value::Number(-number(&eval(operand, x)?, "'-'")?)),
        Node::Binary(BinaryOp::Or, left, right) => {
            let l = eval(left, x)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, x)?)))
        }
        Node::Binary(BinaryOp::And, left, right) => {
            let l = eval(left, x)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, x)?)))
        }
        Node::Binary(op, left, right) => {
            let l = eval(left, x)?;
            let r = eval(right, x)?;
            binary(*op, &l, &r)
        }
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(r))),
        BinaryOp::Ne => Ok(Value::Bool(!l.loose_eq(r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => Ok(Value::Bool(compare(op, l, r)?)),
        BinaryOp::Add => match (l, r) {
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!("{}{}", text(l), text(r)))),
            _ => Ok(Value::Number(number(l, "'+'")? + number(r, "'+'")?)),
        },
        BinaryOp::Sub => Ok(Value::Number(number(l, "'-'")? - number(r, "'-'")?)),
        BinaryOp::Mul => Ok(Value::Number(number(l, "'*'")? * number(r, "'*'")?)),
        BinaryOp::Div | BinaryOp::Rem => {
            let a = number(l, "division")?;
            let b = number(r, "division")?;
            if b == 0.0 {
                return Err(ExprError::eval("division by zero"));
            }
            Ok(Value::Number(if op == BinaryOp::Div { a / b } else { a % b }))
        }
        BinaryOp::Or => Ok(Value::Bool(truthy(l) || truthy(r))),
        BinaryOp::And => Ok(Value::Bool(truthy(l) && truthy(r))),
    }
}

fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    let arity = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(ExprError::eval(format!("{}() takes {} argument(s), got {}", name, n, args.len())))
        }
    };
    match name {
        "len" => {
            arity(1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
                Value::Array(a) => Ok(Value::Number(a.len() as f64)),
                Value::Object(o) => Ok(Value::Number(o.len() as f64)),
                other => Err(ExprError::eval(format!("len() of {}", other.kind()))),
            }
        }
        "abs" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], "abs()")?.abs()))
        }
        "floor" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], "floor()")?.floor()))
        }
        "ceil" => {
            arity(1)?;
            Ok(Value::Number(number(&args[0], "ceil()")?.ceil()))
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExprError::eval(format!("{}() needs at least one argument", name)));
            }
            let mut best = number(&args[0], name)?;
            for arg in &args[1..] {
                let n = number(arg, name)?;
                best = if name == "min" { best.min(n) } else { best.max(n) };
            }
            Ok(Value::Number(best))
        }
        other => Err(ExprError::eval(format!("unknown function '{}'", other))),
    }
}
