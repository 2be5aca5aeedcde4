//! Minimal arithmetic-formula compiler for [`crate::accessor::math`] (spec
//! §4.9). The original plugin embeds `exprtk`, a C++ expression-template
//! library with no Rust equivalent in this crate's dependency stack; rather
//! than fabricate a dependency on an unvetted formula crate, this is a small
//! hand-written recursive-descent parser covering the operators and
//! functions the plugin's formulas actually need: `+ - * / ^`, unary minus,
//! parentheses, named variables, and a handful of unary math functions.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaError {
    UnexpectedEnd,
    UnexpectedToken(String),
    UnknownVariable(String),
    UnknownFunction(String),
}

impl fmt::Display for FormulaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaError::UnexpectedEnd => write!(f, "unexpected end of formula"),
            FormulaError::UnexpectedToken(t) => write!(f, "unexpected token '{t}'"),
            FormulaError::UnknownVariable(v) => write!(f, "unknown variable '{v}'"),
            FormulaError::UnknownFunction(n) => write!(f, "unknown function '{n}'"),
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(char, Box<Expr>, Box<Expr>),
    Call(String, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(src: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() || c == '.' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let value: f64 = text
                .parse()
                .map_err(|_| FormulaError::UnexpectedToken(text.clone()))?;
            tokens.push(Token::Num(value));
        } else if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else if "+-*/^".contains(c) {
            tokens.push(Token::Op(c));
            i += 1;
        } else if c == '(' {
            tokens.push(Token::LParen);
            i += 1;
        } else if c == ')' {
            tokens.push(Token::RParen);
            i += 1;
        } else {
            return Err(FormulaError::UnexpectedToken(c.to_string()));
        }
    }
    Ok(tokens)
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
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn parse_expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.next();
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_pow()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.next();
            let rhs = self.parse_pow()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_pow(&mut self) -> Result<Expr, FormulaError> {
        let base = self.parse_unary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.next();
            let exp = self.parse_pow()?; // right-associative
            return Ok(Expr::Bin('^', Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr, FormulaError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.next();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        if let Some(Token::Op('+')) = self.peek() {
            self.next();
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, FormulaError> {
        match self.next().ok_or(FormulaError::UnexpectedEnd)? {
            Token::Num(n) => Ok(Expr::Num(n)),
            Token::Ident(name) => {
                if let Some(Token::LParen) = self.peek() {
                    self.next();
                    let arg = self.parse_expr()?;
                    match self.next() {
                        Some(Token::RParen) => Ok(Expr::Call(name, Box::new(arg))),
                        _ => Err(FormulaError::UnexpectedToken(")".into())),
                    }
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(FormulaError::UnexpectedToken(")".into())),
                }
            }
            other => Err(FormulaError::UnexpectedToken(format!("{other:?}"))),
        }
    }
}

fn eval(expr: &Expr, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
    Ok(match expr {
        Expr::Num(n) => *n,
        Expr::Var(name) => *vars
            .get(name)
            .ok_or_else(|| FormulaError::UnknownVariable(name.clone()))?,
        Expr::Neg(e) => -eval(e, vars)?,
        Expr::Bin(op, l, r) => {
            let (a, b) = (eval(l, vars)?, eval(r, vars)?);
            match op {
                '+' => a + b,
                '-' => a - b,
                '*' => a * b,
                '/' => a / b,
                '^' => a.powf(b),
                _ => unreachable!(),
            }
        }
        Expr::Call(name, arg) => {
            let x = eval(arg, vars)?;
            match name.as_str() {
                "sin" => x.sin(),
                "cos" => x.cos(),
                "tan" => x.tan(),
                "sqrt" => x.sqrt(),
                "abs" => x.abs(),
                "exp" => x.exp(),
                "ln" => x.ln(),
                "log10" => x.log10(),
                _ => return Err(FormulaError::UnknownFunction(name.clone())),
            }
        }
    })
}

/// A formula compiled once and evaluated repeatedly against different
/// variable bindings.
#[derive(Debug, Clone)]
pub struct Formula {
    expr: Expr,
}

impl Formula {
    pub fn compile(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(FormulaError::UnexpectedToken(format!("{:?}", parser.tokens[parser.pos])));
        }
        Ok(Formula { expr })
    }

    pub fn evaluate(&self, vars: &HashMap<String, f64>) -> Result<f64, FormulaError> {
        eval(&self.expr, vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_arithmetic_with_precedence() {
        let f = Formula::compile("2 + 3 * 4").unwrap();
        assert_eq!(f.evaluate(&HashMap::new()).unwrap(), 14.0);
    }

    #[test]
    fn right_associative_power_and_parens() {
        let f = Formula::compile("2 ^ (1 + 2)").unwrap();
        assert_eq!(f.evaluate(&HashMap::new()).unwrap(), 8.0);
    }

    #[test]
    fn variables_and_functions() {
        let f = Formula::compile("sqrt(x) + y").unwrap();
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), 16.0);
        vars.insert("y".to_string(), 1.0);
        assert_eq!(f.evaluate(&vars).unwrap(), 5.0);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let f = Formula::compile("x + 1").unwrap();
        assert!(f.evaluate(&HashMap::new()).is_err());
    }
}
