//! Nested-expression grammar parser
//!
//! Turns raw design or netlist text into a generic tree of [`SExp`] nodes.
//! The parser has no domain knowledge: every list head is kept, including
//! ones no extractor understands, so newer file revisions still parse.
//!
//! Nesting is handled with an explicit stack rather than recursion, so
//! arbitrarily deep inputs cannot overflow the call stack.

use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Malformed input at line {line}, column {column} (byte {offset}): {message}")]
    Malformed {
        offset: usize,
        line: usize,
        column: usize,
        message: String,
    },
}

impl ParseError {
    /// Byte offset of the failure
    pub fn offset(&self) -> usize {
        match self {
            ParseError::Malformed { offset, .. } => *offset,
        }
    }

    /// 1-based line of the failure
    pub fn line(&self) -> usize {
        match self {
            ParseError::Malformed { line, .. } => *line,
        }
    }
}

/// A node of the parsed tree
#[derive(Debug, Clone, PartialEq)]
pub enum SExp {
    /// Unquoted token that is not a number, e.g. `wire` or `passive`
    Atom(String),
    /// Quoted string with escapes already resolved
    Str(String),
    /// Unquoted numeric token. `raw` keeps the original spelling so pin
    /// numbers like `01` survive.
    Number { value: f64, raw: String },
    List(Vec<SExp>),
}

impl SExp {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            SExp::Atom(s) => Some(s),
            _ => None,
        }
    }

    /// Textual value of any scalar node (atom, string or number).
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SExp::Atom(s) | SExp::Str(s) => Some(s),
            SExp::Number { raw, .. } => Some(raw),
            SExp::List(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SExp::Number { value, .. } => Some(*value),
            SExp::Atom(s) | SExp::Str(s) => s.trim().parse::<f64>().ok(),
            SExp::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExp]> {
        match self {
            SExp::List(items) => Some(items),
            _ => None,
        }
    }

    /// The leading atom of a list, e.g. `wire` for `(wire (pts ...))`.
    pub fn head(&self) -> Option<&str> {
        self.as_list()
            .and_then(|items| items.first())
            .and_then(|first| first.as_atom())
    }

    pub fn is_head(&self, key: &str) -> bool {
        self.head() == Some(key)
    }

    /// Element `index` of a list; index 0 is the head.
    pub fn arg(&self, index: usize) -> Option<&SExp> {
        self.as_list().and_then(|items| items.get(index))
    }

    /// First direct child list whose head is `key`.
    pub fn child(&self, key: &str) -> Option<&SExp> {
        self.children(key).next()
    }

    /// All direct child lists whose head is `key`.
    pub fn children<'a, 'k>(&'a self, key: &'k str) -> impl Iterator<Item = &'a SExp> + 'k
    where
        'a: 'k,
    {
        self.as_list()
            .unwrap_or(&[])
            .iter()
            .filter(move |item| item.is_head(key))
    }

    /// Scalar value of a `(key VALUE ...)` child.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.child(key).and_then(|c| c.arg(1)).and_then(|v| v.as_str())
    }

    /// True if the list contains the bare atom `flag`, e.g. `hide` or `power`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.as_list()
            .unwrap_or(&[])
            .iter()
            .any(|item| item.as_atom() == Some(flag) || item.is_head(flag))
    }
}

impl fmt::Display for SExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SExp::Atom(s) => write!(f, "{}", s),
            SExp::Number { raw, .. } => write!(f, "{}", raw),
            SExp::Str(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        _ => write!(f, "{}", ch)?,
                    }
                }
                write!(f, "\"")
            }
            SExp::List(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, ")")
            }
        }
    }
}

pub struct SExpParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> SExpParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Parse the first top-level expression.
    pub fn parse(&mut self) -> Result<SExp, ParseError> {
        let mut nodes = self.parse_document()?;
        if nodes.is_empty() {
            return Err(self.malformed(self.input.len(), "empty input"));
        }
        Ok(nodes.swap_remove(0))
    }

    /// Parse every top-level expression in the input.
    pub fn parse_document(&mut self) -> Result<Vec<SExp>, ParseError> {
        // Open lists, innermost last, with the offset of their '('
        let mut stack: Vec<(usize, Vec<SExp>)> = Vec::new();
        let mut top = Vec::new();

        loop {
            self.skip_whitespace();
            let Some(&byte) = self.input.as_bytes().get(self.pos) else {
                break;
            };

            let node = match byte {
                b'(' => {
                    stack.push((self.pos, Vec::new()));
                    self.pos += 1;
                    continue;
                }
                b')' => {
                    let Some((_, items)) = stack.pop() else {
                        return Err(self.malformed(self.pos, "unexpected ')' without matching '('"));
                    };
                    self.pos += 1;
                    SExp::List(items)
                }
                b'"' => self.parse_string()?,
                _ => self.parse_token(),
            };

            match stack.last_mut() {
                Some((_, items)) => items.push(node),
                None => top.push(node),
            }
        }

        if let Some((open, _)) = stack.last() {
            return Err(self.malformed(*open, "unclosed '(' (unbalanced parentheses)"));
        }

        Ok(top)
    }

    fn parse_string(&mut self) -> Result<SExp, ParseError> {
        let start = self.pos;
        let mut s = String::new();
        let mut escaped = false;

        // Skip the opening quote
        for (i, ch) in self.input[start + 1..].char_indices() {
            if escaped {
                match ch {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    _ => s.push(ch),
                }
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                self.pos = start + 1 + i + 1;
                return Ok(SExp::Str(s));
            } else {
                s.push(ch);
            }
        }

        Err(self.malformed(start, "unterminated quoted string"))
    }

    fn parse_token(&mut self) -> SExp {
        let bytes = self.input.as_bytes();
        let start = self.pos;
        while let Some(&b) = bytes.get(self.pos) {
            if b.is_ascii_whitespace() || b == b'(' || b == b')' || b == b'"' {
                break;
            }
            self.pos += 1;
        }
        let token = &self.input[start..self.pos];

        if looks_numeric(token) {
            if let Ok(value) = token.parse::<f64>() {
                return SExp::Number {
                    value,
                    raw: token.to_string(),
                };
            }
        }
        SExp::Atom(token.to_string())
    }

    fn skip_whitespace(&mut self) {
        let bytes = self.input.as_bytes();
        while bytes.get(self.pos).is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn malformed(&self, offset: usize, message: &str) -> ParseError {
        let before = &self.input[..offset.min(self.input.len())];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map(|nl| before.len() - nl)
            .unwrap_or(before.len() + 1);
        ParseError::Malformed {
            offset,
            line,
            column,
            message: message.to_string(),
        }
    }
}

fn looks_numeric(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_ascii_digit() => true,
        Some('-') | Some('+') | Some('.') => chars
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == '.'),
        _ => false,
    }
}
