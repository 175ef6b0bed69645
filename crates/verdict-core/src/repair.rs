//! Lenient JSON reader for model output.
//!
//! Accepts what models commonly emit around strict JSON: trailing or missing commas, unquoted
//! keys and string values, single-quoted and typographic (`“…”`, `‘…’`) strings, `//` and `/* */`
//! comments, Python-style `True`/`False`/`None`, raw newlines inside strings and numbers like
//! `+1`, `.5` or `2.`.
//!
//! [`parse_lenient`] never invents closing brackets, so truncated output is an error.
//! [`parse_lenient_prefix`] instead closes every open container after its last complete member.

use serde_json::{Map, Number, Value};
use thiserror::Error;

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at byte {offset}")]
pub struct RepairError {
    pub offset: usize,
    pub message: String,
}

/// Parse one JSON value from `input`, tolerating the malformations listed in the module docs
pub fn parse_lenient(input: &str) -> Result<Value, RepairError> {
    let mut reader = Reader::new(input, false);
    let value = reader.value(0)?;
    reader.skip_trivia()?;
    if reader.pos < reader.src.len() {
        return Err(reader.error("trailing characters after JSON value"));
    }
    Ok(value)
}

/// Parse the object or array that `input` starts with, closing it at the first point it stops
/// making sense. Members that were cut off are dropped and anything after the stop is ignored.
/// An empty result counts as a failure.
pub fn parse_lenient_prefix(input: &str) -> Result<Value, RepairError> {
    let mut reader = Reader::new(input, true);
    reader.skip_trivia()?;
    if !matches!(reader.peek(), Some('{' | '[')) {
        return Err(reader.error("expected an object or array"));
    }
    match reader.value(0)? {
        Value::Object(map) if map.is_empty() => Err(reader.error("no complete member")),
        Value::Array(items) if items.is_empty() => Err(reader.error("no complete element")),
        value => Ok(value),
    }
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    /// Close open containers on error instead of failing
    close_open: bool,
    /// Set once a container was closed early; every enclosing container closes too
    closed_early: bool,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str, close_open: bool) -> Self {
        Self {
            src,
            pos: 0,
            close_open,
            closed_early: false,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, message: impl Into<String>) -> RepairError {
        RepairError {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek().filter(|c| pred(*c)) {
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    /// Whitespace, BOMs and comments
    fn skip_trivia(&mut self) -> Result<(), RepairError> {
        loop {
            let rest = self.rest();
            if rest.starts_with("//") {
                match rest.find('\n') {
                    Some(i) => self.pos += i + 1,
                    None => self.pos = self.src.len(),
                }
            } else if let Some(body) = rest.strip_prefix("/*") {
                match body.find("*/") {
                    Some(i) => self.pos += i + 4,
                    None => return Err(self.error("unterminated block comment")),
                }
            } else if let Some(c) = self.peek().filter(|c| c.is_whitespace() || *c == '\u{feff}') {
                self.pos += c.len_utf8();
            } else {
                return Ok(());
            }
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value, RepairError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.skip_trivia()?;
        match self.peek() {
            Some('{') => self.object(depth),
            Some('[') => self.array(depth),
            Some(quote) if is_quote(quote) => self.string(quote).map(Value::String),
            Some(c) if c.is_ascii_digit() || matches!(c, '-' | '+' | '.') => self.number(),
            Some(c) if is_ident_start(c) => self.literal(depth),
            Some(c) => Err(self.error(format!("unexpected character '{c}'"))),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn object(&mut self, depth: usize) -> Result<Value, RepairError> {
        self.bump();
        let mut map = Map::new();
        loop {
            match self.member(depth) {
                Ok(Some((key, value))) => {
                    map.insert(key, value);
                }
                Ok(None) => return Ok(Value::Object(map)),
                Err(e) => return self.close_or_fail(e, Value::Object(map)),
            }
            if self.closed_early {
                return Ok(Value::Object(map));
            }
        }
    }

    /// Next `key: value` pair, or `None` at the closing brace
    fn member(&mut self, depth: usize) -> Result<Option<(String, Value)>, RepairError> {
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => return Err(self.error("unterminated object")),
                Some('}') => {
                    self.bump();
                    return Ok(None);
                }
                // stray, leading and trailing commas
                Some(',') => {
                    self.bump();
                }
                Some(_) => break,
            }
        }

        let key = self.key()?;
        self.skip_trivia()?;
        if self.peek() != Some(':') {
            return Err(self.error(format!("expected ':' after key \"{key}\"")));
        }
        self.bump();
        let value = self.value(depth + 1)?;
        Ok(Some((key, value)))
    }

    fn array(&mut self, depth: usize) -> Result<Value, RepairError> {
        self.bump();
        let mut items = Vec::new();
        loop {
            match self.element(depth) {
                Ok(Some(value)) => items.push(value),
                Ok(None) => return Ok(Value::Array(items)),
                Err(e) => return self.close_or_fail(e, Value::Array(items)),
            }
            if self.closed_early {
                return Ok(Value::Array(items));
            }
        }
    }

    /// Next element, or `None` at the closing bracket
    fn element(&mut self, depth: usize) -> Result<Option<Value>, RepairError> {
        loop {
            self.skip_trivia()?;
            match self.peek() {
                None => return Err(self.error("unterminated array")),
                Some(']') => {
                    self.bump();
                    return Ok(None);
                }
                Some(',') => {
                    self.bump();
                }
                Some(_) => return self.value(depth + 1).map(Some),
            }
        }
    }

    fn close_or_fail(&mut self, err: RepairError, partial: Value) -> Result<Value, RepairError> {
        if self.close_open {
            self.closed_early = true;
            Ok(partial)
        } else {
            Err(err)
        }
    }

    fn key(&mut self) -> Result<String, RepairError> {
        match self.peek() {
            Some(quote) if is_quote(quote) => self.string(quote),
            Some(c) if is_key_char(c) => Ok(self.take_while(is_key_char).to_string()),
            _ => Err(self.error("expected object key")),
        }
    }

    fn string(&mut self, quote: char) -> Result<String, RepairError> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(RepairError {
                    offset: start,
                    message: "unterminated string".to_string(),
                });
            };
            match c {
                c if closes(quote, c) => return Ok(out),
                '\\' => self.escape(&mut out)?,
                c => out.push(c),
            }
        }
    }

    fn escape(&mut self, out: &mut String) -> Result<(), RepairError> {
        let Some(c) = self.bump() else {
            return Err(self.error("unterminated escape"));
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'u' => {
                let code = self.hex4()?;
                if (0xD800..0xDC00).contains(&code) {
                    out.push(self.low_surrogate(code));
                } else {
                    out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
            }
            // quotes, backslash, slash and anything unknown stand for themselves
            other => out.push(other),
        }
        Ok(())
    }

    fn low_surrogate(&mut self, high: u32) -> char {
        let saved = self.pos;
        if self.rest().starts_with("\\u") {
            self.pos += 2;
            if let Ok(low) = self.hex4() {
                if (0xDC00..0xE000).contains(&low) {
                    let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
                    return char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER);
                }
            }
        }
        self.pos = saved;
        char::REPLACEMENT_CHARACTER
    }

    fn hex4(&mut self) -> Result<u32, RepairError> {
        let digits = self
            .rest()
            .get(..4)
            .filter(|d| d.chars().all(|c| c.is_ascii_hexdigit()))
            .ok_or_else(|| self.error("invalid \\u escape"))?;
        let code = u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid \\u escape"))?;
        self.pos += 4;
        Ok(code)
    }

    fn number(&mut self) -> Result<Value, RepairError> {
        let start = self.pos;
        let raw =
            self.take_while(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'));
        let mut text = raw.strip_prefix('+').unwrap_or(raw).to_string();
        if text.starts_with('.') {
            text.insert(0, '0');
        } else if text.starts_with("-.") {
            text.insert(1, '0');
        }
        if text.ends_with('.') {
            text.push('0');
        }
        serde_json::from_str::<Number>(&text)
            .map(Value::Number)
            .map_err(|_| RepairError {
                offset: start,
                message: format!("invalid number '{raw}'"),
            })
    }

    /// Keyword literal, or inside a container an unquoted string running to the next `,` `}` `]`
    /// or newline. Bare words at the top level are prose, not JSON.
    fn literal(&mut self, depth: usize) -> Result<Value, RepairError> {
        let start = self.pos;
        match self.take_while(is_key_char) {
            "true" | "True" => Ok(Value::Bool(true)),
            "false" | "False" => Ok(Value::Bool(false)),
            "null" | "None" | "undefined" => Ok(Value::Null),
            word if depth == 0 => Err(RepairError {
                offset: start,
                message: format!("unexpected bare word '{word}'"),
            }),
            _ => {
                self.pos = start;
                let run = self.take_while(|c| !matches!(c, ',' | '}' | ']' | '\n' | '\r'));
                let text = run.trim_end();
                self.pos = start + text.len();
                Ok(Value::String(text.to_string()))
            }
        }
    }
}

fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’')
}

/// Typographic quotes close with either curly form
fn closes(open: char, c: char) -> bool {
    match open {
        '“' | '”' => matches!(c, '“' | '”'),
        '‘' | '’' => matches!(c, '‘' | '’'),
        _ => c == open,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_key_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '-')
}
