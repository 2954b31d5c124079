//! Built-in expression engine
//!
//! Supports a small, JavaScript-flavoured subset that covers typical entity
//! filters:
//!
//! ```text
//! entity.entity_class == "proxy" && entity.labels.region != 'us'
//! entity.system.os == "linux" || !entity.deregister
//! entity.subscriptions.includes("network") && entity.rack.startsWith("r1")
//! entity.last_seen >= 1700000000
//! ```
//!
//! Expressions are parsed in full before anything is evaluated, so a
//! malformed expression always yields [`ExpressionError::Syntax`] regardless
//! of the bindings. Referencing an undefined variable or attribute yields
//! [`ExpressionError::Evaluation`].

use std::cmp::Ordering;

use serde_json::Value;

use super::{Bindings, BooleanExpressionEvaluator, ExpressionError, truthy};

/// Stateless evaluator for the built-in expression language
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleEvaluator;

impl SimpleEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Parse `expression` without evaluating it
    pub fn check_syntax(&self, expression: &str) -> Result<(), ExpressionError> {
        parse(expression).map(|_| ())
    }
}

impl BooleanExpressionEvaluator for SimpleEvaluator {
    fn evaluate(&self, expression: &str, bindings: &Bindings<'_>) -> Result<bool, ExpressionError> {
        let ast = parse(expression)?;
        let value = eval(&ast, bindings)?;
        Ok(truthy(&value))
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    Not,
    Minus,
    And,
    Or,
    Cmp(CmpOp),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

fn syntax(msg: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax(msg.into())
}

fn evaluation(msg: impl Into<String>) -> ExpressionError {
    ExpressionError::Evaluation(msg.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match c {
            c if c.is_whitespace() => i += 1,
            // `.5` is a number unless it follows an operand (`entity.ports.0`)
            '.' if next.is_some_and(|n| n.is_ascii_digit()) && !follows_operand(&tokens) => {
                let (num, end) = lex_number(&chars, i)?;
                tokens.push(Token::Num(num));
                i = end;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '&' if next == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if next == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Eq));
                // accept `===` as well
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ne));
                i += if chars.get(i + 2) == Some(&'=') { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Le));
                i += 2;
            }
            '<' => {
                tokens.push(Token::Cmp(CmpOp::Lt));
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Cmp(CmpOp::Ge));
                i += 2;
            }
            '>' => {
                tokens.push(Token::Cmp(CmpOp::Gt));
                i += 1;
            }
            '"' | '\'' => {
                let (s, end) = lex_string(&chars, i)?;
                tokens.push(Token::Str(s));
                i = end;
            }
            c if c.is_ascii_digit() => {
                let (num, end) = lex_number(&chars, i)?;
                tokens.push(Token::Num(num));
                i = end;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(syntax(format!("unexpected character '{other}' at {i}"))),
        }
    }

    Ok(tokens)
}

fn follows_operand(tokens: &[Token]) -> bool {
    matches!(
        tokens.last(),
        Some(Token::Ident(_) | Token::Str(_) | Token::Num(_) | Token::RParen)
    )
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), ExpressionError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;

    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| syntax("unterminated escape sequence"))?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    Err(syntax(format!("unterminated string starting at {start}")))
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), ExpressionError> {
    let mut i = start;
    let mut seen_dot = false;

    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() => i += 1,
            // only a dot followed by a digit continues the number
            '.' if !seen_dot && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()) => {
                seen_dot = true;
                i += 1;
            }
            _ => break,
        }
    }

    let text: String = chars[start..i].iter().collect();
    text.parse::<f64>()
        .map(|n| (n, i))
        .map_err(|_| syntax(format!("invalid number '{text}'")))
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    Member(Box<Expr>, String),
    Call {
        target: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
}

/// Deepest nesting of `!`, `-`, parentheses and call arguments
const MAX_NESTING: usize = 64;

/// Longest expression accepted, in tokens; bounds the depth of operator chains
const MAX_TOKENS: usize = 1024;

fn parse(expression: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(expression)?;
    if tokens.is_empty() {
        return Err(syntax("empty expression"));
    }
    if tokens.len() > MAX_TOKENS {
        return Err(syntax(format!(
            "expression too long ({} tokens, at most {MAX_TOKENS})",
            tokens.len()
        )));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.or()?;

    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(syntax(format!("unexpected token {token:?}"))),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(syntax(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    /// Parse `f` one nesting level deeper
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExpressionError>,
    ) -> Result<T, ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(syntax("expression nested too deeply"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.comparison()?;
        while self.eat(&Token::And) {
            let rhs = self.comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let lhs = self.unary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.unary()?;
            if matches!(self.peek(), Some(Token::Cmp(_))) {
                return Err(syntax("chained comparisons are not supported"));
            }
            return Ok(Expr::Cmp(op, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&Token::Not) {
            return Ok(Expr::Not(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat(&Token::Minus) {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;

        while self.eat(&Token::Dot) {
            let name = match self.advance() {
                Some(Token::Ident(name)) => name,
                // numeric segments index into arrays: `entity.ports.0`
                Some(Token::Num(n)) if n.fract() == 0.0 && n >= 0.0 => format!("{n}"),
                other => return Err(syntax(format!("expected member name, found {other:?}"))),
            };

            if self.eat(&Token::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.nested(Self::or)?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                expr = Expr::Call {
                    target: Box::new(expr),
                    method: name,
                    args,
                };
            } else {
                expr = Expr::Member(Box::new(expr), name);
            }
        }

        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Ident(ident)) => Ok(match ident.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Var(ident),
            }),
            Some(Token::LParen) => {
                let inner = self.nested(Self::or)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(other) => Err(syntax(format!("unexpected token {other:?}"))),
            None => Err(syntax("unexpected end of expression")),
        }
    }
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval(expr: &Expr, bindings: &Bindings<'_>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Var(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| evaluation(format!("{name} is not defined"))),
        Expr::Member(target, name) => {
            let target = eval(target, bindings)?;
            member(&target, name)
                .cloned()
                .ok_or_else(|| evaluation(format!("property '{name}' is undefined")))
        }
        Expr::Call {
            target,
            method,
            args,
        } => {
            let target = eval(target, bindings)?;
            let args = args
                .iter()
                .map(|arg| eval(arg, bindings))
                .collect::<Result<Vec<_>, _>>()?;
            call(&target, method, &args)
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, bindings)?))),
        Expr::Neg(inner) => match eval(inner, bindings)? {
            Value::Number(n) => Ok(n.as_f64().map_or(Value::Null, |f| number(-f))),
            other => Err(evaluation(format!("cannot negate {other}"))),
        },
        Expr::And(lhs, rhs) => {
            if !truthy(&eval(lhs, bindings)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(rhs, bindings)?)))
        }
        Expr::Or(lhs, rhs) => {
            if truthy(&eval(lhs, bindings)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(rhs, bindings)?)))
        }
        Expr::Cmp(op, lhs, rhs) => {
            let lhs = eval(lhs, bindings)?;
            let rhs = eval(rhs, bindings)?;
            compare(*op, &lhs, &rhs).map(Value::Bool)
        }
    }
}

fn member<'a>(target: &'a Value, name: &str) -> Option<&'a Value> {
    match target {
        Value::Object(map) => map.get(name),
        Value::Array(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn call(target: &Value, method: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    let arg = match args {
        [arg] => arg,
        _ => {
            return Err(evaluation(format!(
                "{method}() expects exactly one argument, got {}",
                args.len()
            )));
        }
    };

    let result = match (method, target, arg) {
        ("includes", Value::Array(items), needle) => items.iter().any(|v| loose_eq(v, needle)),
        ("includes", Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
        ("startsWith", Value::String(s), Value::String(prefix)) => s.starts_with(prefix.as_str()),
        ("endsWith", Value::String(s), Value::String(suffix)) => s.ends_with(suffix.as_str()),
        ("includes" | "startsWith" | "endsWith", target, arg) => {
            return Err(evaluation(format!(
                "{method}() is not applicable to {target} with argument {arg}"
            )));
        }
        (other, _, _) => return Err(evaluation(format!("{other} is not a function"))),
    };

    Ok(Value::Bool(result))
}

fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => lhs == rhs,
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, ExpressionError> {
    match op {
        CmpOp::Eq => Ok(loose_eq(lhs, rhs)),
        CmpOp::Ne => Ok(!loose_eq(lhs, rhs)),
        CmpOp::Lt => order(lhs, rhs).map(|o| o == Ordering::Less),
        CmpOp::Le => order(lhs, rhs).map(|o| o != Ordering::Greater),
        CmpOp::Gt => order(lhs, rhs).map(|o| o == Ordering::Greater),
        CmpOp::Ge => order(lhs, rhs).map(|o| o != Ordering::Less),
    }
}

fn order(lhs: &Value, rhs: &Value) -> Result<Ordering, ExpressionError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .zip(b.as_f64())
            .and_then(|(a, b)| a.partial_cmp(&b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
    .ok_or_else(|| evaluation(format!("cannot order {lhs} and {rhs}")))
}
