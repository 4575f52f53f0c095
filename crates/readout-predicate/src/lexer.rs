//! Tokenizer for the condition language

use readout_core::Value;
use std::fmt;
use thiserror::Error;

/// Comparison operators of the condition language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Le,
    Ge,
    Ne,
    Lt,
    Gt,
    Eq,
}

impl CmpOp {
    /// The operator's source text, also used in predicate signatures.
    pub fn as_str(self) -> &'static str {
        match self {
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Eq => "=",
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed lexeme of the condition language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Name(String),
    Op(CmpOp),
    Literal(Value),
    At,
    Arrow,
    State(String),
}

/// Tokenization errors, with byte offsets into the condition string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("expected a name at byte {pos}")]
    ExpectedName { pos: usize },

    #[error("expected a comparison operator or '@' at byte {pos}")]
    ExpectedOperator { pos: usize },

    #[error("expected a state name at byte {pos}")]
    ExpectedState { pos: usize },

    #[error("expected a literal value at byte {pos}")]
    ExpectedLiteral { pos: usize },

    #[error("unexpected trailing input at byte {pos}")]
    TrailingInput { pos: usize },
}

/// Tokenize a condition string.
///
/// The lexer is stateful: after the leading name it expects either a
/// comparison operator followed by a literal, or `@` followed by a state
/// and an optional `-> state`. Whitespace is skipped everywhere and the
/// entire input must be consumed.
///
/// Literals are typed in order: float (`[0-9]*\.[0-9]+`), then integer
/// (`[0-9]+`), then a bare name-shaped string. `"3"` therefore lexes as
/// an integer, not a string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, LexError> {
    let mut scanner = Scanner::new(input);
    let mut tokens = Vec::new();

    scanner.skip_ws();
    let name = scanner
        .take_name()
        .ok_or(LexError::ExpectedName { pos: scanner.pos })?;
    tokens.push(Token::Name(name.to_string()));

    scanner.skip_ws();
    if scanner.take("@") {
        tokens.push(Token::At);
        scanner.skip_ws();
        let state = scanner
            .take_name()
            .ok_or(LexError::ExpectedState { pos: scanner.pos })?;
        tokens.push(Token::State(state.to_string()));
        scanner.skip_ws();
        if scanner.take("->") {
            tokens.push(Token::Arrow);
            scanner.skip_ws();
            let to_state = scanner
                .take_name()
                .ok_or(LexError::ExpectedState { pos: scanner.pos })?;
            tokens.push(Token::State(to_state.to_string()));
        }
    } else if let Some(op) = scanner.take_op() {
        tokens.push(Token::Op(op));
        scanner.skip_ws();
        let literal = scanner
            .take_literal()
            .ok_or(LexError::ExpectedLiteral { pos: scanner.pos })?;
        tokens.push(Token::Literal(literal));
    } else {
        return Err(LexError::ExpectedOperator { pos: scanner.pos });
    }

    scanner.skip_ws();
    if !scanner.at_end() {
        return Err(LexError::TrailingInput { pos: scanner.pos });
    }
    Ok(tokens)
}

struct Scanner<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start();
        self.pos += rest.len() - trimmed.len();
    }

    /// Consume `text` if the input starts with it.
    fn take(&mut self, text: &str) -> bool {
        if self.rest().starts_with(text) {
            self.pos += text.len();
            true
        } else {
            false
        }
    }

    /// Consume a name: `[A-Za-z_][A-Za-z0-9_]*`.
    fn take_name(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let end = chars
            .find(|(_, c)| !c.is_ascii_alphanumeric() && *c != '_')
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        self.pos += end;
        Some(&rest[..end])
    }

    /// Consume a comparison operator, longest match first.
    fn take_op(&mut self) -> Option<CmpOp> {
        const OPS: [(&str, CmpOp); 6] = [
            ("<=", CmpOp::Le),
            (">=", CmpOp::Ge),
            ("!=", CmpOp::Ne),
            ("<", CmpOp::Lt),
            (">", CmpOp::Gt),
            ("=", CmpOp::Eq),
        ];
        for (text, op) in OPS {
            if self.take(text) {
                return Some(op);
            }
        }
        None
    }

    /// Consume a literal: float, else integer, else bare name string.
    fn take_literal(&mut self) -> Option<Value> {
        let rest = self.rest();
        let bytes = rest.as_bytes();

        let mut int_end = 0;
        while int_end < bytes.len() && bytes[int_end].is_ascii_digit() {
            int_end += 1;
        }

        // Float: [0-9]*\.[0-9]+
        if int_end < bytes.len() && bytes[int_end] == b'.' {
            let mut frac_end = int_end + 1;
            while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
                frac_end += 1;
            }
            if frac_end > int_end + 1 {
                if let Ok(parsed) = rest[..frac_end].parse::<f64>() {
                    self.pos += frac_end;
                    return Some(Value::Float(parsed));
                }
            }
        }

        // Integer: [0-9]+
        if int_end > 0 {
            if let Ok(parsed) = rest[..int_end].parse::<i64>() {
                self.pos += int_end;
                return Some(Value::Int(parsed));
            }
            return None;
        }

        self.take_name().map(Value::from)
    }
}
