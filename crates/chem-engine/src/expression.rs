//! Raw → engineering-unit conversion expressions
//!
//! An expression over the single variable `x`, e.g. `(x - 400) * 0.125` or
//! `max(0, ln(x) * 12.5)`. Supported:
//! - numbers (`12`, `0.5`, `1e-3`), the variable `x`, the constant `pi`
//! - `+ - * / ^` with the usual precedence, `^` right-associative
//! - unary minus, parentheses
//! - `sqrt abs ln log exp` (one argument), `min max` (two arguments)
//!
//! A conversion never fails the sample: [`Expression::evaluate_or_raw`]
//! returns the raw input when the expression cannot be evaluated.

use thiserror::Error;

/// Expression parse or evaluation failure
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("unexpected character '{0}' at {1}")]
    UnexpectedChar(char, usize),

    #[error("unexpected {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("{name} takes {expected} argument(s), got {found}")]
    Arity {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    let exponent_sign = (c == '-' || c == '+')
                        && literal.ends_with(['e', 'E']);
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExpressionError::UnexpectedChar(c, pos))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            _ => {
                let token = match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '^' => Token::Caret,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(ExpressionError::UnexpectedChar(other, pos)),
                };
                tokens.push(token);
                chars.next();
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Sqrt,
    Abs,
    Ln,
    Log,
    Exp,
    Min,
    Max,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "sqrt" => Function::Sqrt,
            "abs" => Function::Abs,
            "ln" => Function::Ln,
            "log" => Function::Log,
            "exp" => Function::Exp,
            "min" => Function::Min,
            "max" => Function::Max,
            _ => return None,
        })
    }

    fn arity(&self) -> usize {
        match self {
            Function::Min | Function::Max => 2,
            _ => 1,
        }
    }

    fn apply(&self, args: &[f64]) -> f64 {
        match self {
            Function::Sqrt => args[0].sqrt(),
            Function::Abs => args[0].abs(),
            Function::Ln => args[0].ln(),
            Function::Log => args[0].log10(),
            Function::Exp => args[0].exp(),
            Function::Min => args[0].min(args[1]),
            Function::Max => args[0].max(args[1]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Number(f64),
    Variable,
    Negate(Box<Node>),
    Binary(Box<Node>, Op, Box<Node>),
    Call(Function, Vec<Node>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
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

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_expr(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_term()?;
            lhs = Node::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_term(&mut self) -> Result<Node, ExpressionError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => return Ok(lhs),
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Node::Binary(Box::new(lhs), op, Box::new(rhs));
        }
    }

    fn parse_unary(&mut self) -> Result<Node, ExpressionError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.advance();
            return Ok(Node::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Node, ExpressionError> {
        let base = self.parse_primary()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.advance();
            let exponent = self.parse_unary()?;
            return Ok(Node::Binary(Box::new(base), Op::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Node, ExpressionError> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(Node::Number(value)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "x" | "X" => Ok(Node::Variable),
                "pi" => Ok(Node::Number(std::f64::consts::PI)),
                _ => self.parse_call(name),
            },
            Some(token) => Err(ExpressionError::UnexpectedToken(format!("{:?}", token))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Node, ExpressionError> {
        let function =
            Function::lookup(&name).ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
        self.expect(Token::LParen)?;

        let mut args = vec![self.parse_expr()?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.advance();
            args.push(self.parse_expr()?);
        }
        self.expect(Token::RParen)?;

        if args.len() != function.arity() {
            return Err(ExpressionError::Arity {
                name,
                expected: function.arity(),
                found: args.len(),
            });
        }
        Ok(Node::Call(function, args))
    }
}

fn eval(node: &Node, x: f64) -> f64 {
    match node {
        Node::Number(value) => *value,
        Node::Variable => x,
        Node::Negate(inner) => -eval(inner, x),
        Node::Binary(lhs, op, rhs) => {
            let (a, b) = (eval(lhs, x), eval(rhs, x));
            match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div => a / b,
                Op::Pow => a.powf(b),
            }
        }
        Node::Call(function, args) => {
            let values: Vec<f64> = args.iter().map(|arg| eval(arg, x)).collect();
            function.apply(&values)
        }
    }
}

/// A parsed conversion expression
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
}

impl Expression {
    /// Parse an expression over `x`
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
        };
        let root = parser.parse_expr()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::UnexpectedToken(format!("{:?}", token)));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// Source text as configured
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate at `x`; a NaN or infinite result is an error
    pub fn evaluate(&self, x: f64) -> Result<f64, ExpressionError> {
        let value = eval(&self.root, x);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExpressionError::NonFinite)
        }
    }

    /// Evaluate at `x`, falling back to `x` itself
    pub fn evaluate_or_raw(&self, x: f64) -> f64 {
        self.evaluate(x).unwrap_or(x)
    }
}

/// Parse and evaluate in one go, returning `x` on any failure
pub fn evaluate_or_raw(source: &str, x: f64) -> f64 {
    Expression::parse(source)
        .map(|e| e.evaluate_or_raw(x))
        .unwrap_or(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval_at(source: &str, x: f64) -> f64 {
        Expression::parse(source).unwrap().evaluate(x).unwrap()
    }

    #[test]
    fn test_precedence() {
        assert_eq!(eval_at("1 + 2 * 3", 0.0), 7.0);
        assert_eq!(eval_at("(1 + 2) * 3", 0.0), 9.0);
        assert_eq!(eval_at("2 ^ 3 ^ 2", 0.0), 512.0);
        assert_eq!(eval_at("-x ^ 2", 3.0), -9.0);
        assert_eq!(eval_at("10 - 4 - 3", 0.0), 3.0);
    }

    #[test]
    fn test_linear_conversion() {
        assert_eq!(eval_at("(x - 400) * 0.125", 1200.0), 100.0);
        assert_eq!(eval_at("x/1000", 2500.0), 2.5);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_at("sqrt(x)", 16.0), 4.0);
        assert_eq!(eval_at("max(0, x)", -5.0), 0.0);
        assert_eq!(eval_at("min(x, 10)", 42.0), 10.0);
        assert_eq!(eval_at("abs(x)", -2.5), 2.5);
        assert!((eval_at("log(x)", 1000.0) - 3.0).abs() < 1e-12);
        assert!((eval_at("ln(exp(x))", 1.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_scientific_literal() {
        assert_eq!(eval_at("x * 1e-3", 2000.0), 2.0);
        assert_eq!(eval_at("2.5E2", 0.0), 250.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Expression::parse("x +"),
            Err(ExpressionError::UnexpectedEnd)
        ));
        assert!(matches!(
            Expression::parse("foo(x)"),
            Err(ExpressionError::UnknownFunction(_))
        ));
        assert!(matches!(
            Expression::parse("max(x)"),
            Err(ExpressionError::Arity { expected: 2, found: 1, .. })
        ));
        assert!(matches!(
            Expression::parse("x # 2"),
            Err(ExpressionError::UnexpectedChar('#', 2))
        ));
        assert!(Expression::parse("(x").is_err());
        assert!(Expression::parse("x x").is_err());
    }

    #[test]
    fn test_fails_closed() {
        assert_eq!(evaluate_or_raw("x * (", 42.0), 42.0);
        assert_eq!(evaluate_or_raw("1 / (x - 1)", 1.0), 1.0);
        assert_eq!(evaluate_or_raw("sqrt(x)", -4.0), -4.0);
        assert_eq!(evaluate_or_raw("x * 2", 21.0), 42.0);
    }
}
