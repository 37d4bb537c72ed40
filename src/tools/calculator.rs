//! Calculator tool - evaluates arithmetic expressions
//!
//! Supports `+`, `-`, `*`, `/`, `%`, exponentiation with `**` or `^`,
//! parentheses and unary signs. Nothing else is evaluated.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{Metadata, ToolError};
use crate::tools::registry::{Tool, ToolOutput};

/// Tool name the calculator registers under
pub const CALCULATOR: &str = "calculator";

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        CALCULATOR
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports +, -, *, /, %, ** (power), parentheses and decimal numbers."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, arguments: Value, _metadata: &Metadata) -> Result<ToolOutput, ToolError> {
        let expr = arguments["expression"].as_str().ok_or_else(|| {
            ToolError::invalid_arguments(CALCULATOR, "missing 'expression' argument")
        })?;

        let value = evaluate(expr).map_err(|e| ToolError::execution(CALCULATOR, e))?;
        Ok(ToolOutput::text(format_number(value)))
    }
}

/// Render whole numbers without a trailing `.0`
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Evaluate an arithmetic expression string
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let result = parser.expr()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(format!("unexpected {tok:?} at token {}", parser.pos));
    }
    if !result.is_finite() {
        return Err("result is not a finite number".into());
    }
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '0'..='9' | '.' => {
                let mut number = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        number.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = number
                    .parse()
                    .map_err(|_| format!("invalid number '{number}'"))?;
                tokens.push(Token::Number(n));
                continue;
            }
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => {
                chars.next();
                if chars.peek() == Some(&'*') {
                    chars.next();
                    tokens.push(Token::Pow);
                } else {
                    tokens.push(Token::Star);
                }
                continue;
            }
            '/' => Token::Slash,
            '%' => Token::Percent,
            '^' => Token::Pow,
            '(' => Token::LParen,
            ')' => Token::RParen,
            other => return Err(format!("unexpected character '{other}'")),
        };
        chars.next();
        tokens.push(token);
    }

    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    Ok(tokens)
}

/// Deepest nesting of parentheses and unary signs accepted
const MAX_DEPTH: usize = 256;

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut left = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.bump();
                    left += self.term()?;
                }
                Some(Token::Minus) => {
                    self.bump();
                    left -= self.term()?;
                }
                _ => return Ok(left),
            }
        }
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(op @ (Token::Star | Token::Slash | Token::Percent)) => op,
                _ => return Ok(left),
            };
            self.bump();
            let right = self.unary()?;
            left = match op {
                Token::Star => left * right,
                _ if right == 0.0 => return Err("division by zero".into()),
                Token::Slash => left / right,
                _ => left % right,
            };
        }
    }

    // unary = ('-' | '+') unary | power
    // all recursion passes through here
    fn unary(&mut self) -> Result<f64, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression nested too deeply".into());
        }
        self.depth += 1;
        let value = self.unary_inner();
        self.depth -= 1;
        value
    }

    fn unary_inner(&mut self) -> Result<f64, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.bump();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // power = primary ('**' unary)?, right associative
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Pow) {
            self.bump();
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // primary = NUMBER | '(' expr ')'
    fn primary(&mut self) -> Result<f64, String> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("expected closing parenthesis".into()),
                }
            }
            Some(tok) => Err(format!("unexpected {tok:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}
