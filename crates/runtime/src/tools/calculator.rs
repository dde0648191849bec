//! Arithmetic calculator tool.
//!
//! Expressions are parsed with a small recursive-descent parser; nothing but
//! arithmetic is ever evaluated.
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | '(' expr ')' | 'sqrt' '(' expr ')'
//! ```

use crate::tools::{Tool, ToolError};
use async_trait::async_trait;

/// Deepest parenthesis/unary nesting accepted.
const MAX_DEPTH: usize = 64;

/// Evaluates arithmetic expressions such as `2+2` or `sqrt(16)`.
#[derive(Debug, Default)]
pub struct Calculator;

#[async_trait]
impl Tool for Calculator {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression (e.g., 2+2, sqrt(16))."
    }

    async fn call(&self, argument: &str) -> Result<String, ToolError> {
        evaluate(argument).map(format_number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Sqrt,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ToolError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut end = start;
                let mut prev = c;
                while let Some(&(i, d)) = chars.peek() {
                    let exponent_sign = (d == '+' || d == '-') && (prev == 'e' || prev == 'E');
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                        end = i + d.len_utf8();
                        prev = d;
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[start..end];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ToolError::InvalidInput(format!("bad number `{literal}`")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(i, d)) = chars.peek() {
                    if d.is_alphanumeric() || d == '_' {
                        end = i + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match &input[start..end] {
                    "sqrt" => tokens.push(Token::Sqrt),
                    name => {
                        return Err(ToolError::InvalidInput(format!(
                            "unsupported name `{name}`"
                        )));
                    }
                }
            }
            '*' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '*'))) {
                    chars.next();
                    tokens.push(Token::Caret);
                } else {
                    tokens.push(Token::Star);
                }
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '/' => Token::Slash,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    other => {
                        return Err(ToolError::InvalidInput(format!(
                            "unexpected character `{other}`"
                        )));
                    }
                };
                chars.next();
                tokens.push(token);
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.peek();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), ToolError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ToolError::InvalidInput(format!(
                "expected {expected:?}, found {token:?}"
            ))),
            None => Err(ToolError::InvalidInput(format!(
                "expected {expected:?}, found end of input"
            ))),
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ToolError>,
    ) -> Result<T, ToolError> {
        if self.depth >= MAX_DEPTH {
            return Err(ToolError::InvalidInput("expression nested too deeply".into()));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ToolError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(ToolError::Execution("division by zero".into()));
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> Result<f64, ToolError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.advance();
                self.nested(|p| p.unary()).map(|v| -v)
            }
            Some(Token::Plus) => {
                self.advance();
                self.nested(|p| p.unary())
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, ToolError> {
        let base = self.primary()?;
        if self.peek() == Some(Token::Caret) {
            self.advance();
            let exponent = self.nested(|p| p.unary())?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, ToolError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.nested(|p| p.expr())?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Sqrt) => {
                self.expect(Token::LParen)?;
                let value = self.nested(|p| p.expr())?;
                self.expect(Token::RParen)?;
                if value < 0.0 {
                    return Err(ToolError::Execution("math domain error".into()));
                }
                Ok(value.sqrt())
            }
            Some(token) => Err(ToolError::InvalidInput(format!("unexpected {token:?}"))),
            None => Err(ToolError::InvalidInput("unexpected end of input".into())),
        }
    }
}

/// Parse and evaluate an arithmetic expression.
pub fn evaluate(input: &str) -> Result<f64, ToolError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ToolError::InvalidInput("empty expression".into()));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if let Some(token) = parser.peek() {
        return Err(ToolError::InvalidInput(format!("unexpected {token:?}")));
    }
    if !value.is_finite() {
        return Err(ToolError::Execution("result is not a finite number".into()));
    }
    Ok(value)
}

/// Integral values print without a fractional part.
fn format_number(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        format!("{value:e}")
    } else if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn calc(input: &str) -> Result<String, ToolError> {
        Calculator.call(input).await
    }

    #[tokio::test]
    async fn evaluates_basic_arithmetic() {
        assert_eq!(calc("2+2").await.unwrap(), "4");
        assert_eq!(calc("7/2").await.unwrap(), "3.5");
        assert_eq!(calc("2 + 3 * 4").await.unwrap(), "14");
        assert_eq!(calc("(2 + 3) * 4").await.unwrap(), "20");
        assert_eq!(calc("10 - 4 - 3").await.unwrap(), "3");
        assert_eq!(calc("sqrt(16)").await.unwrap(), "4");
        assert_eq!(calc("1.5e2 + 0.5").await.unwrap(), "150.5");
    }

    #[tokio::test]
    async fn power_is_right_associative_and_binds_tighter_than_minus() {
        assert_eq!(calc("2^3^2").await.unwrap(), "512");
        assert_eq!(calc("2**10").await.unwrap(), "1024");
        assert_eq!(calc("-2^2").await.unwrap(), "-4");
        assert_eq!(calc("2^-1").await.unwrap(), "0.5");
    }

    #[tokio::test]
    async fn rejects_names_and_code() {
        for input in ["import os", "__import__('os')", "x + 1", "sqrt", "2; 3", "open('f')"] {
            assert!(
                matches!(calc(input).await, Err(ToolError::InvalidInput(_))),
                "{input} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn rejects_malformed_expressions() {
        for input in ["", "   ", "2 +", "(1 + 2", "1 2", "1..2", "*3", "sqrt 4"] {
            assert!(
                matches!(calc(input).await, Err(ToolError::InvalidInput(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn reports_math_errors() {
        assert_eq!(
            calc("1/0").await,
            Err(ToolError::Execution("division by zero".into()))
        );
        assert_eq!(
            calc("sqrt(-1)").await,
            Err(ToolError::Execution("math domain error".into()))
        );
        assert!(matches!(calc("10^400").await, Err(ToolError::Execution(_))));
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let input = format!("{}1{}", "(".repeat(500), ")".repeat(500));
        assert!(matches!(evaluate(&input), Err(ToolError::InvalidInput(_))));
        let unary = format!("{}1", "-".repeat(500));
        assert!(matches!(evaluate(&unary), Err(ToolError::InvalidInput(_))));
    }

    #[test]
    fn formats_extreme_magnitudes_in_exponent_form() {
        assert_eq!(format_number(1e20), "1e20");
        assert_eq!(format_number(0.00001), "1e-5");
        assert_eq!(format_number(0.0), "0");
        assert_eq!(format_number(-3.0), "-3");
    }
}
