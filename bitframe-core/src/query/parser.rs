//! Query parser
//!
//! Grammar:
//!
//! ```text
//! query := call*
//! call  := NAME '(' [arg (',' arg)*] ')'
//! arg   := call | NAME '=' value        (nested calls come first)
//! value := number | "string" | true | false | null | NAME
//! ```
//!
//! Calls are separated by whitespace or newlines. Errors carry the 1-based
//! line and column of the offending character.

use super::{Call, Query, Value};
use crate::{Error, Result};

/// Query language parser
pub struct QueryParser<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> QueryParser<'a> {
    /// Parse query text into calls
    pub fn parse(src: &'a str) -> Result<Query> {
        let mut parser = Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
        };

        let mut calls = Vec::new();
        loop {
            parser.skip_whitespace();
            if parser.peek().is_none() {
                break;
            }
            let name = parser.parse_ident("call name")?;
            parser.skip_whitespace();
            calls.push(parser.parse_call(name)?);
        }
        Ok(Query { calls })
    }

    /// Parse the parenthesized part of a call whose name was consumed
    fn parse_call(&mut self, name: String) -> Result<Call> {
        self.expect('(')?;

        let mut call = Call::new(name);
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(call);
        }

        loop {
            self.skip_whitespace();
            let (line, column) = (self.line, self.column);
            let key = self.parse_ident("argument")?;
            self.skip_whitespace();

            match self.peek() {
                Some('(') => {
                    if !call.args.is_empty() {
                        return Err(Error::Parse {
                            line,
                            column,
                            message: "nested calls must come before arguments".into(),
                        });
                    }
                    let child = self.parse_call(key)?;
                    call.children.push(child);
                }
                Some('=') => {
                    self.bump();
                    self.skip_whitespace();
                    let value = self.parse_value()?;
                    if call.args.contains_key(&key) {
                        return Err(Error::Parse {
                            line,
                            column,
                            message: format!("duplicate argument {:?}", key),
                        });
                    }
                    call.args.insert(key, value);
                }
                _ => return Err(self.error("expected '=' or '('")),
            }

            self.skip_whitespace();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {
                    self.bump();
                    return Ok(call);
                }
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.peek() {
            Some('"') => self.parse_string().map(Value::String),
            Some(c) if c == '-' || c.is_ascii_digit() => self.parse_number(),
            Some(c) if is_ident_start(c) => {
                let ident = self.parse_ident("value")?;
                Ok(match ident.as_str() {
                    "true" => Value::Bool(true),
                    "false" => Value::Bool(false),
                    "null" => Value::Null,
                    _ => Value::String(ident),
                })
            }
            Some(_) => Err(self.error("expected a value")),
            None => Err(self.error("unexpected end of query")),
        }
    }

    fn parse_number(&mut self) -> Result<Value> {
        let (line, column) = (self.line, self.column);
        let start = self.pos;
        let mut is_float = false;

        if self.peek() == Some('-') {
            self.bump();
        }
        self.take_digits();
        if self.peek() == Some('.') {
            is_float = true;
            self.bump();
            self.take_digits();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            is_float = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.take_digits();
        }

        let text = &self.src[start..self.pos];
        let invalid = |message: String| Error::Parse {
            line,
            column,
            message,
        };

        if is_float {
            match text.parse::<f64>() {
                Ok(v) if v.is_finite() => Ok(Value::Float(v)),
                Ok(_) => Err(invalid(format!("number out of range {:?}", text))),
                Err(_) => Err(invalid(format!("invalid number {:?}", text))),
            }
        } else if text.starts_with('-') {
            text.parse::<i64>()
                .map(Value::Int)
                .map_err(|_| invalid(format!("invalid integer {:?}", text)))
        } else {
            text.parse::<u64>()
                .map(Value::Uint)
                .map_err(|_| invalid(format!("invalid integer {:?}", text)))
        }
    }

    fn parse_string(&mut self) -> Result<String> {
        let (line, column) = (self.line, self.column);
        self.expect('"')?;

        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => return Err(self.error(&format!("invalid escape '\\{}'", c))),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }

        Err(Error::Parse {
            line,
            column,
            message: "unterminated string".into(),
        })
    }

    fn parse_ident(&mut self, what: &str) -> Result<String> {
        match self.peek() {
            Some(c) if is_ident_start(c) => {}
            Some(c) => return Err(self.error(&format!("expected {}, found {:?}", what, c))),
            None => return Err(self.error(&format!("expected {}, found end of query", what))),
        }

        let start = self.pos;
        while matches!(self.peek(), Some(c) if is_ident_char(c)) {
            self.bump();
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn take_digits(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(&format!("expected '{}', found {:?}", want, c))),
            None => Err(self.error(&format!("expected '{}', found end of query", want))),
        }
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: &str) -> Error {
        Error::Parse {
            line: self.line,
            column: self.column,
            message: message.to_string(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}
