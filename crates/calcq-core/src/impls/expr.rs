//! ExprEvaluator - 算術式の評価エンジン
//!
//! 字句解析 → 優先順位つき再帰下降で AST → 評価、の 3 段です。
//!
//! # 文法（優先順位の低い順）
//! - `||`
//! - `&&`
//! - `==` `!=` `<` `<=` `>` `>=`
//! - `+` `-`
//! - `*` `/` `%`
//! - `**`（右結合）
//! - 単項 `-` `!`
//! - 数値・`true`/`false`・文字列（'..' / ".."）・パラメータ名・`( .. )`
//!
//! パラメータは一切与えないので、識別子は評価時エラーになります。
//! 括弧・単項演算子・二項演算子の入れ子は `MAX_DEPTH` までで、超えると compile エラーです
//! （parse / eval / drop がすべて再帰なので木の高さを制限する）。
//! 除算は IEEE-754 に従い、0 除算は無限大を返します。

use std::fmt;

use crate::domain::EvalError;
use crate::ports::Evaluator;

#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for ExprEvaluator {
    fn evaluate(&self, formula: &str) -> Result<f64, EvalError> {
        let expr = compile(formula).map_err(|message| EvalError::Compile {
            formula: formula.to_string(),
            message,
        })?;

        let value = eval(&expr).map_err(|message| EvalError::Evaluate {
            formula: formula.to_string(),
            message,
        })?;

        match value {
            Value::Number(n) => Ok(n),
            other => Err(EvalError::NotANumber {
                formula: formula.to_string(),
                kind: other.kind(),
            }),
        }
    }
}

// ========================================
// Lexer
// ========================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
}

const OPERATORS: [&str; 16] = [
    "**", "&&", "||", "==", "!=", "<=", ">=", "+", "-", "*", "/", "%", "<", ">", "!", "=",
];

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number literal '{text}'"))?;
            tokens.push(Token::Number(n));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let start = i + 1;
            let end = chars[start..]
                .iter()
                .position(|&ch| ch == quote)
                .map(|offset| start + offset)
                .ok_or_else(|| "unclosed string literal".to_string())?;
            tokens.push(Token::Str(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }

        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
                continue;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
                continue;
            }
            _ => {}
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let op: &'static str = OPERATORS
            .iter()
            .copied()
            .find(|op| rest.starts_with(op))
            .ok_or_else(|| format!("unexpected character '{c}'"))?;
        if op == "=" {
            return Err("unexpected '=', did you mean '=='?".to_string());
        }
        tokens.push(Token::Op(op));
        i += op.len();
    }

    Ok(tokens)
}

// ========================================
// Parser
// ========================================

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Bool(bool),
    Str(String),
    Param(String),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
}

/// (優先順位, 右結合か)
fn binary_precedence(op: &str) -> Option<(u8, bool)> {
    match op {
        "||" => Some((1, false)),
        "&&" => Some((2, false)),
        "==" | "!=" | "<" | "<=" | ">" | ">=" => Some((3, false)),
        "+" | "-" => Some((4, false)),
        "*" | "/" | "%" => Some((5, false)),
        "**" => Some((6, true)),
        _ => None,
    }
}

const UNARY_PRECEDENCE: u8 = 7;

/// 構文木の高さと parser の再帰の深さの上限
const MAX_DEPTH: usize = 256;

fn too_deep() -> String {
    format!("expression nested too deeply (limit {MAX_DEPTH})")
}

/// Parsed node with the height of its subtree.
type Parsed = (Expr, usize);

fn node_height(children: &[usize]) -> Result<usize, String> {
    let height = 1 + children.iter().copied().max().unwrap_or(0);
    if height > MAX_DEPTH {
        return Err(too_deep());
    }
    Ok(height)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    nesting: usize,
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

    fn parse_expr(&mut self, min_precedence: u8) -> Result<Parsed, String> {
        self.nesting += 1;
        if self.nesting > MAX_DEPTH {
            return Err(too_deep());
        }
        let parsed = self.parse_binary(min_precedence);
        self.nesting -= 1;
        parsed
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Parsed, String> {
        let (mut lhs, mut height) = self.parse_prefix()?;

        while let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            let Some((precedence, right_assoc)) = binary_precedence(op) else {
                return Err(format!("unexpected operator '{op}'"));
            };
            if precedence < min_precedence {
                break;
            }
            self.pos += 1;
            let next_min = if right_assoc { precedence } else { precedence + 1 };
            let (rhs, rhs_height) = self.parse_expr(next_min)?;
            height = node_height(&[height, rhs_height])?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok((lhs, height))
    }

    fn parse_prefix(&mut self) -> Result<Parsed, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok((Expr::Number(n), 1)),
            Some(Token::Str(s)) => Ok((Expr::Str(s), 1)),
            Some(Token::Ident(name)) => Ok((
                match name.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    _ => Expr::Param(name),
                },
                1,
            )),
            Some(Token::Op(op @ ("-" | "!"))) => {
                let (operand, operand_height) = self.parse_expr(UNARY_PRECEDENCE)?;
                let height = node_height(&[operand_height])?;
                Ok((Expr::Unary(op, Box::new(operand)), height))
            }
            Some(Token::LParen) => {
                let inner = self.parse_expr(0)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("unbalanced parenthesis".to_string()),
                }
            }
            Some(Token::RParen) => Err("unexpected ')'".to_string()),
            Some(Token::Op(op)) => Err(format!("unexpected operator '{op}'")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn compile(formula: &str) -> Result<Expr, String> {
    let tokens = tokenize(formula)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        nesting: 0,
    };
    let (expr, _height) = parser.parse_expr(0)?;
    if let Some(token) = parser.peek() {
        return Err(format!("unexpected token {token:?} after expression"));
    }
    Ok(expr)
}

// ========================================
// Evaluation
// ========================================

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Bool(bool),
    Str(String),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => f.write_str(s),
        }
    }
}

fn eval(expr: &Expr) -> Result<Value, String> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Param(name) => Err(format!("no parameter '{name}' found")),
        Expr::Unary(op, operand) => match (*op, eval(operand)?) {
            ("-", Value::Number(n)) => Ok(Value::Number(-n)),
            ("!", Value::Bool(b)) => Ok(Value::Bool(!b)),
            (op, v) => Err(format!("cannot apply '{op}' to {}", v.kind())),
        },
        Expr::Binary(op @ ("&&" | "||"), lhs, rhs) => {
            let Value::Bool(l) = eval(lhs)? else {
                return Err(format!("left side of '{op}' must be a bool"));
            };
            // 短絡評価
            if (*op == "&&" && !l) || (*op == "||" && l) {
                return Ok(Value::Bool(l));
            }
            match eval(rhs)? {
                Value::Bool(r) => Ok(Value::Bool(r)),
                _ => Err(format!("right side of '{op}' must be a bool")),
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(op, eval(lhs)?, eval(rhs)?),
    }
}

fn binary(op: &str, lhs: Value, rhs: Value) -> Result<Value, String> {
    use Value::{Bool, Number, Str};

    match (op, lhs, rhs) {
        ("+", Number(l), Number(r)) => Ok(Number(l + r)),
        ("+", l @ Str(_), r) | ("+", l, r @ Str(_)) => Ok(Str(format!("{l}{r}"))),
        ("-", Number(l), Number(r)) => Ok(Number(l - r)),
        ("*", Number(l), Number(r)) => Ok(Number(l * r)),
        ("/", Number(l), Number(r)) => Ok(Number(l / r)),
        ("%", Number(l), Number(r)) => Ok(Number(l % r)),
        ("**", Number(l), Number(r)) => Ok(Number(l.powf(r))),
        ("<", Number(l), Number(r)) => Ok(Bool(l < r)),
        ("<=", Number(l), Number(r)) => Ok(Bool(l <= r)),
        (">", Number(l), Number(r)) => Ok(Bool(l > r)),
        (">=", Number(l), Number(r)) => Ok(Bool(l >= r)),
        ("<", Str(l), Str(r)) => Ok(Bool(l < r)),
        ("<=", Str(l), Str(r)) => Ok(Bool(l <= r)),
        (">", Str(l), Str(r)) => Ok(Bool(l > r)),
        (">=", Str(l), Str(r)) => Ok(Bool(l >= r)),
        ("==", l, r) => Ok(Bool(l == r)),
        ("!=", l, r) => Ok(Bool(l != r)),
        (op, l, r) => Err(format!(
            "cannot apply '{op}' to {} and {}",
            l.kind(),
            r.kind()
        )),
    }
}
