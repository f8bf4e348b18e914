//! Safe arithmetic expression evaluator.
//!
//! User-authored math expressions (`({{ltp}} * {{lotSize}}) + 100`) are
//! interpolated by the caller and then evaluated here. The grammar is
//! deliberately tiny: numeric literals, `+ - * / % **`, unary sign, and
//! parentheses. There are no identifiers, calls, comparisons, or string
//! operations — any token outside the grammar is rejected with a typed
//! error, never silently skipped. Expressions are parsed to an AST first
//! and only then folded, so nothing resembling `eval` is involved.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic, PartialEq)]
pub enum ExprError {
    #[error("empty expression")]
    #[diagnostic(code(tradeweave::expr::empty))]
    Empty,

    #[error("unsupported expression: unexpected {found:?} at offset {offset}")]
    #[diagnostic(
        code(tradeweave::expr::unsupported),
        help("Only numbers, + - * / % **, unary sign, and parentheses are allowed.")
    )]
    Unsupported { found: String, offset: usize },

    #[error("invalid expression syntax at offset {offset}")]
    #[diagnostic(code(tradeweave::expr::syntax))]
    Syntax { offset: usize },

    #[error("division by zero")]
    #[diagnostic(code(tradeweave::expr::division_by_zero))]
    DivisionByZero,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    LParen,
    RParen,
}

#[derive(Debug, PartialEq)]
enum Expr {
    Number(f64),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum UnaryOp {
    Neg,
    Pos,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

/// Evaluate an arithmetic expression to a double.
pub fn evaluate(expression: &str) -> Result<f64, ExprError> {
    let tokens = lex(expression)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::Syntax { offset: parser.pos });
    }
    eval(&ast)
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    tokens.push(Token::StarStar);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
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
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i < bytes.len() && bytes[i] == b'.' {
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text = &input[start..i];
                let value = text.parse::<f64>().map_err(|_| ExprError::Unsupported {
                    found: text.to_string(),
                    offset: start,
                })?;
                tokens.push(Token::Number(value));
            }
            other => {
                // Identifiers, quotes, comparison operators, anything else:
                // refuse outright. This is the safety boundary.
                return Err(ExprError::Unsupported {
                    found: other.to_string(),
                    offset: i,
                });
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.peek();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    // expression := term (('+' | '-') term)*
    fn expression(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.term()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary()?;
        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    // unary := ('+' | '-') unary | power
    // Power binds tighter than a leading sign: -2 ** 2 == -(2 ** 2).
    fn unary(&mut self) -> Result<Expr, ExprError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            Some(Token::Plus) => {
                self.bump();
                Ok(Expr::Unary(UnaryOp::Pos, Box::new(self.unary()?)))
            }
            _ => self.power(),
        }
    }

    // power := primary ('**' unary)?   (right-associative)
    fn power(&mut self) -> Result<Expr, ExprError> {
        let base = self.primary()?;
        if self.peek() == Some(Token::StarStar) {
            self.bump();
            let exponent = self.unary()?;
            return Ok(Expr::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.bump() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::LParen) => {
                let inner = self.expression()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Syntax { offset: self.pos }),
                }
            }
            _ => Err(ExprError::Syntax { offset: self.pos }),
        }
    }
}

fn eval(expr: &Expr) -> Result<f64, ExprError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Unary(op, inner) => {
            let value = eval(inner)?;
            Ok(match op {
                UnaryOp::Neg => -value,
                UnaryOp::Pos => value,
            })
        }
        Expr::Binary(op, left, right) => {
            let l = eval(left)?;
            let r = eval(right)?;
            match op {
                BinaryOp::Add => Ok(l + r),
                BinaryOp::Sub => Ok(l - r),
                BinaryOp::Mul => Ok(l * r),
                BinaryOp::Div => {
                    if r == 0.0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(l / r)
                    }
                }
                BinaryOp::Mod => {
                    if r == 0.0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(l % r)
                    }
                }
                BinaryOp::Pow => Ok(l.powf(r)),
            }
        }
    }
}
