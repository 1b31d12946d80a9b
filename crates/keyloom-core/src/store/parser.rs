//! Parser for the native condition, key-condition and update expression
//! language accepted by [`MemoryStore`](super::MemoryStore).
//!
//! Placeholders are resolved while parsing, so the resulting trees refer to
//! real attribute names and values.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StoreError;
use crate::expression::{CompiledExpression, PathSegment};
use crate::types::Value;

/// Maximum nesting depth of parentheses and `NOT`.
const MAX_EXPRESSION_DEPTH: usize = 32;

pub(crate) type Path = Vec<PathSegment>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Path(Path),
    Value(Value),
    Size(Box<Operand>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CondExpr {
    Compare(Comparator, Operand, Operand),
    Between(Operand, Operand, Operand),
    In(Operand, Vec<Operand>),
    BeginsWith(Operand, Operand),
    Contains(Operand, Operand),
    Exists(Path),
    NotExists(Path),
    And(Box<CondExpr>, Box<CondExpr>),
    Or(Box<CondExpr>, Box<CondExpr>),
    Not(Box<CondExpr>),
}

/// Right-hand side of a `SET` action.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SetValue {
    Operand(Operand),
    IfNotExists(Path, Box<SetValue>),
    ListAppend(Box<SetValue>, Box<SetValue>),
    Plus(Box<SetValue>, Box<SetValue>),
    Minus(Box<SetValue>, Box<SetValue>),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct UpdateExpr {
    pub set: Vec<(Path, SetValue)>,
    pub remove: Vec<Path>,
    pub add: Vec<(Path, Value)>,
    pub delete: Vec<(Path, Value)>,
}

impl UpdateExpr {
    /// Every path the update writes to.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.set
            .iter()
            .map(|(p, _)| p)
            .chain(self.remove.iter())
            .chain(self.add.iter().map(|(p, _)| p))
            .chain(self.delete.iter().map(|(p, _)| p))
    }
}

/// Parse a condition, filter or key-condition expression. An absent
/// expression parses to `None` (always true).
pub(crate) fn parse_condition(expr: &CompiledExpression) -> Result<Option<CondExpr>, StoreError> {
    let Some(text) = expr.expression.as_deref() else {
        return Ok(None);
    };
    let mut parser = Parser::new(text, &expr.names, &expr.values)?;
    let condition = parser.parse_or(0)?;
    parser.expect_end()?;
    Ok(Some(condition))
}

/// Parse an update expression (`SET … REMOVE … ADD … DELETE …`).
pub(crate) fn parse_update(expr: &CompiledExpression) -> Result<UpdateExpr, StoreError> {
    let mut update = UpdateExpr::default();
    let Some(text) = expr.expression.as_deref() else {
        return Ok(update);
    };
    let mut parser = Parser::new(text, &expr.names, &expr.values)?;
    let mut seen = BTreeSet::new();

    while !parser.at_end() {
        let clause = match parser.next() {
            Some(Token::Ident(word)) => word.to_ascii_uppercase(),
            other => return Err(invalid(format!("expected update clause, found {other:?}"))),
        };
        if !seen.insert(clause.clone()) {
            return Err(invalid(format!("the {clause} clause appears more than once")));
        }
        loop {
            match clause.as_str() {
                "SET" => {
                    let path = parser.parse_path()?;
                    parser.expect(&Token::Eq)?;
                    let value = parser.parse_set_value(0)?;
                    update.set.push((path, value));
                }
                "REMOVE" => update.remove.push(parser.parse_path()?),
                "ADD" => {
                    let path = parser.parse_path()?;
                    let value = parser.parse_value()?;
                    update.add.push((path, value));
                }
                "DELETE" => {
                    let path = parser.parse_path()?;
                    let value = parser.parse_value()?;
                    update.delete.push((path, value));
                }
                _ => return Err(invalid(format!("unknown update clause {clause}"))),
            }
            if !parser.eat(&Token::Comma) {
                break;
            }
        }
    }
    Ok(update)
}

fn invalid(message: impl Into<String>) -> StoreError {
    StoreError::Validation(message.into())
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    /// `#name` placeholder, stored with its prefix.
    Name(String),
    /// `:value` placeholder, stored with its prefix.
    Placeholder(String),
    Number(usize),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(input: &str) -> Result<Vec<Token>, StoreError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            '=' => Some(Token::Eq),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            _ => None,
        };
        if let Some(token) = single {
            chars.next();
            tokens.push(token);
            continue;
        }

        match c {
            '<' => {
                chars.next();
                let token = match chars.peek() {
                    Some('>') => Token::Ne,
                    Some('=') => Token::Le,
                    _ => Token::Lt,
                };
                if token != Token::Lt {
                    chars.next();
                }
                tokens.push(token);
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            '#' | ':' => {
                chars.next();
                let mut word = String::from(c);
                while let Some(&w) = chars.peek() {
                    if !is_word_char(w) {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                if word.len() == 1 {
                    return Err(invalid(format!("empty placeholder after '{c}'")));
                }
                tokens.push(if c == '#' {
                    Token::Name(word)
                } else {
                    Token::Placeholder(word)
                });
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let n = digits
                    .parse()
                    .map_err(|_| invalid(format!("invalid list index {digits}")))?;
                tokens.push(Token::Number(n));
            }
            c if is_word_char(c) => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if !is_word_char(w) {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                tokens.push(Token::Ident(word));
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Recursive-descent parser
// ---------------------------------------------------------------------------

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'a BTreeMap<String, String>,
    values: &'a BTreeMap<String, Value>,
}

impl<'a> Parser<'a> {
    fn new(
        text: &str,
        names: &'a BTreeMap<String, String>,
        values: &'a BTreeMap<String, Value>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            tokens: tokenize(text)?,
            pos: 0,
            names,
            values,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), StoreError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(invalid(format!(
                "expected {token:?}, found {:?}",
                self.peek()
            )))
        }
    }

    fn expect_end(&self) -> Result<(), StoreError> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(invalid(format!("unexpected token {token:?}"))),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    /// Lower-cased function name when the next tokens are `name (`.
    fn peek_function(&self) -> Option<String> {
        match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
            (Some(Token::Ident(name)), Some(Token::LParen)) => Some(name.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn parse_or(&mut self, depth: usize) -> Result<CondExpr, StoreError> {
        let mut left = self.parse_and(depth)?;
        while self.eat_keyword("OR") {
            let right = self.parse_and(depth)?;
            left = CondExpr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self, depth: usize) -> Result<CondExpr, StoreError> {
        let mut left = self.parse_not(depth)?;
        while self.eat_keyword("AND") {
            let right = self.parse_not(depth)?;
            left = CondExpr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self, depth: usize) -> Result<CondExpr, StoreError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(invalid("expression nesting is too deep"));
        }
        if self.eat_keyword("NOT") {
            return Ok(CondExpr::Not(Box::new(self.parse_not(depth + 1)?)));
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> Result<CondExpr, StoreError> {
        if self.eat(&Token::LParen) {
            let inner = self.parse_or(depth + 1)?;
            self.expect(&Token::RParen)?;
            return Ok(inner);
        }

        match self.peek_function().as_deref() {
            Some("attribute_exists") => {
                self.pos += 2;
                let path = self.parse_path()?;
                self.expect(&Token::RParen)?;
                return Ok(CondExpr::Exists(path));
            }
            Some("attribute_not_exists") => {
                self.pos += 2;
                let path = self.parse_path()?;
                self.expect(&Token::RParen)?;
                return Ok(CondExpr::NotExists(path));
            }
            Some(function @ ("begins_with" | "contains")) => {
                let begins = function == "begins_with";
                self.pos += 2;
                let subject = self.parse_operand()?;
                self.expect(&Token::Comma)?;
                let operand = self.parse_operand()?;
                self.expect(&Token::RParen)?;
                return Ok(if begins {
                    CondExpr::BeginsWith(subject, operand)
                } else {
                    CondExpr::Contains(subject, operand)
                });
            }
            _ => {}
        }

        let left = self.parse_operand()?;

        if self.eat_keyword("BETWEEN") {
            let lo = self.parse_operand()?;
            if !self.eat_keyword("AND") {
                return Err(invalid("expected AND in BETWEEN"));
            }
            let hi = self.parse_operand()?;
            return Ok(CondExpr::Between(left, lo, hi));
        }

        if self.eat_keyword("IN") {
            self.expect(&Token::LParen)?;
            let mut candidates = vec![self.parse_operand()?];
            while self.eat(&Token::Comma) {
                candidates.push(self.parse_operand()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(CondExpr::In(left, candidates));
        }

        let comparator = match self.next() {
            Some(Token::Eq) => Comparator::Eq,
            Some(Token::Ne) => Comparator::Ne,
            Some(Token::Lt) => Comparator::Lt,
            Some(Token::Le) => Comparator::Le,
            Some(Token::Gt) => Comparator::Gt,
            Some(Token::Ge) => Comparator::Ge,
            other => return Err(invalid(format!("expected comparator, found {other:?}"))),
        };
        let right = self.parse_operand()?;
        Ok(CondExpr::Compare(comparator, left, right))
    }

    fn parse_operand(&mut self) -> Result<Operand, StoreError> {
        if self.peek_function().as_deref() == Some("size") {
            self.pos += 2;
            let inner = self.parse_operand()?;
            self.expect(&Token::RParen)?;
            return Ok(Operand::Size(Box::new(inner)));
        }
        if matches!(self.peek(), Some(Token::Placeholder(_))) {
            return Ok(Operand::Value(self.parse_value()?));
        }
        Ok(Operand::Path(self.parse_path()?))
    }

    fn parse_value(&mut self) -> Result<Value, StoreError> {
        match self.next() {
            Some(Token::Placeholder(p)) => self
                .values
                .get(&p)
                .cloned()
                .ok_or_else(|| invalid(format!("undefined value placeholder {p}"))),
            other => Err(invalid(format!("expected value placeholder, found {other:?}"))),
        }
    }

    fn parse_attribute_name(&mut self) -> Result<String, StoreError> {
        match self.next() {
            Some(Token::Ident(word)) => Ok(word),
            Some(Token::Name(n)) => self
                .names
                .get(&n)
                .cloned()
                .ok_or_else(|| invalid(format!("undefined attribute name placeholder {n}"))),
            other => Err(invalid(format!("expected attribute name, found {other:?}"))),
        }
    }

    fn parse_path(&mut self) -> Result<Path, StoreError> {
        let mut path = vec![PathSegment::Attribute(self.parse_attribute_name()?)];
        loop {
            if self.eat(&Token::Dot) {
                path.push(PathSegment::Attribute(self.parse_attribute_name()?));
            } else if self.eat(&Token::LBracket) {
                match self.next() {
                    Some(Token::Number(n)) => path.push(PathSegment::Index(n)),
                    other => return Err(invalid(format!("expected list index, found {other:?}"))),
                }
                self.expect(&Token::RBracket)?;
            } else {
                return Ok(path);
            }
        }
    }

    fn parse_set_value(&mut self, depth: usize) -> Result<SetValue, StoreError> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(invalid("expression nesting is too deep"));
        }
        let left = self.parse_set_operand(depth)?;
        if self.eat(&Token::Plus) {
            let right = self.parse_set_operand(depth)?;
            return Ok(SetValue::Plus(Box::new(left), Box::new(right)));
        }
        if self.eat(&Token::Minus) {
            let right = self.parse_set_operand(depth)?;
            return Ok(SetValue::Minus(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_set_operand(&mut self, depth: usize) -> Result<SetValue, StoreError> {
        match self.peek_function().as_deref() {
            Some("if_not_exists") => {
                self.pos += 2;
                let path = self.parse_path()?;
                self.expect(&Token::Comma)?;
                let fallback = self.parse_set_value(depth + 1)?;
                self.expect(&Token::RParen)?;
                Ok(SetValue::IfNotExists(path, Box::new(fallback)))
            }
            Some("list_append") => {
                self.pos += 2;
                let first = self.parse_set_value(depth + 1)?;
                self.expect(&Token::Comma)?;
                let second = self.parse_set_value(depth + 1)?;
                self.expect(&Token::RParen)?;
                Ok(SetValue::ListAppend(Box::new(first), Box::new(second)))
            }
            _ => Ok(SetValue::Operand(self.parse_operand()?)),
        }
    }
}
