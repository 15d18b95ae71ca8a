//! Meta value codec.
//!
//! WordPress stores composite meta values using PHP's tagged serialization
//! grammar. Values are encoded with [`MetaValue::to_storage`] and every read goes
//! through [`MetaValue::from_storage`], which decodes tagged values and returns
//! anything else (including malformed tagged values) as the raw string.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A decoded meta, option or attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetaValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<(ArrayKey, MetaValue)>),
    Object {
        class: String,
        properties: Vec<(String, MetaValue)>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::String(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::String(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

/// JSON arrays become list arrays and objects become string-keyed arrays.
impl From<serde_json::Value> for MetaValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => MetaValue::Null,
            Value::Bool(flag) => MetaValue::Bool(flag),
            Value::Number(number) => match number.as_i64() {
                Some(int) => MetaValue::Int(int),
                None => MetaValue::Float(number.as_f64().unwrap_or_default()),
            },
            Value::String(text) => MetaValue::String(text),
            Value::Array(items) => MetaValue::list(items.into_iter().map(MetaValue::from)),
            Value::Object(map) => MetaValue::Array(
                map.into_iter()
                    .map(|(key, item)| (ArrayKey::Str(key), MetaValue::from(item)))
                    .collect(),
            ),
        }
    }
}

impl MetaValue {
    /// Build a list-style array (`0 => a, 1 => b, ...`).
    pub fn list(items: impl IntoIterator<Item = MetaValue>) -> Self {
        MetaValue::Array(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| (ArrayKey::Int(index as i64), item))
                .collect(),
        )
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, MetaValue::Array(_) | MetaValue::Object { .. })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(value) => Some(value),
            _ => None,
        }
    }

    /// Integer view of the value; numeric strings count, as they do in WordPress.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(value) => Some(*value),
            MetaValue::String(value) => value.trim().parse().ok(),
            MetaValue::Bool(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// Scalar rendering used when a value is written into a text column.
    pub fn to_plain_string(&self) -> Option<String> {
        match self {
            MetaValue::Null => Some(String::new()),
            MetaValue::Bool(true) => Some("1".to_string()),
            MetaValue::Bool(false) => Some(String::new()),
            MetaValue::Int(value) => Some(value.to_string()),
            MetaValue::Float(value) => Some(format_float(*value)),
            MetaValue::String(value) => Some(value.clone()),
            MetaValue::Array(_) | MetaValue::Object { .. } => None,
        }
    }

    /// Encode the value for a `meta_value` / `option_value` column.
    ///
    /// Scalars are stored flat; composites are serialized. A string that would
    /// itself parse as a tagged value is serialized again so it reads back as a
    /// string.
    pub fn to_storage(&self) -> String {
        match self {
            MetaValue::String(value) if is_serialized(value) => self.serialize(),
            other => other.to_plain_string().unwrap_or_else(|| other.serialize()),
        }
    }

    /// Decode a stored column value. Never fails: anything that is not a
    /// well-formed tagged value comes back as [`MetaValue::String`].
    pub fn from_storage(raw: &str) -> Self {
        if !is_serialized(raw) {
            return MetaValue::String(raw.to_string());
        }
        match unserialize(raw.trim()) {
            Ok(value) => value,
            Err(_) => MetaValue::String(raw.to_string()),
        }
    }

    /// Serialize using the tagged grammar.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        write_value(&mut out, self);
        out
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value == f64::INFINITY {
        "INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        value.to_string()
    }
}

fn write_str(out: &mut String, value: &str) {
    let _ = write!(out, "s:{}:\"{}\";", value.len(), value);
}

fn write_key(out: &mut String, key: &ArrayKey) {
    match key {
        ArrayKey::Int(index) => {
            let _ = write!(out, "i:{index};");
        }
        ArrayKey::Str(name) => write_str(out, name),
    }
}

fn write_value(out: &mut String, value: &MetaValue) {
    match value {
        MetaValue::Null => out.push_str("N;"),
        MetaValue::Bool(flag) => {
            let _ = write!(out, "b:{};", u8::from(*flag));
        }
        MetaValue::Int(number) => {
            let _ = write!(out, "i:{number};");
        }
        MetaValue::Float(number) => {
            let _ = write!(out, "d:{};", format_float(*number));
        }
        MetaValue::String(text) => write_str(out, text),
        MetaValue::Array(entries) => {
            let _ = write!(out, "a:{}:{{", entries.len());
            for (key, item) in entries {
                write_key(out, key);
                write_value(out, item);
            }
            out.push('}');
        }
        MetaValue::Object { class, properties } => {
            let _ = write!(out, "O:{}:\"{}\":{}:{{", class.len(), class, properties.len());
            for (name, item) in properties {
                write_str(out, name);
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

/// Structural check for the tagged grammar, mirroring WordPress' `is_serialized`.
pub fn is_serialized(data: &str) -> bool {
    let data = data.trim();
    if data == "N;" {
        return true;
    }
    let bytes = data.as_bytes();
    if bytes.len() < 4 || bytes[1] != b':' {
        return false;
    }
    match bytes[0] {
        b'a' | b'O' | b's' => {
            let rest = &data[2..];
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            digits > 0
                && rest.as_bytes().get(digits) == Some(&b':')
                && matches!(bytes.last(), Some(b';') | Some(b'}'))
        }
        b'b' | b'i' | b'd' => {
            if bytes.last() != Some(&b';') {
                return false;
            }
            let body = &bytes[2..bytes.len() - 1];
            !body.is_empty()
                && body
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'-' | b'+'))
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub offset: usize,
    pub reason: &'static str,
}

/// Strict decoder for the tagged grammar; the whole input must be consumed.
pub fn unserialize(input: &str) -> Result<MetaValue, DecodeError> {
    let mut parser = Parser {
        input: input.as_bytes(),
        pos: 0,
        depth: 0,
    };
    let value = parser.value()?;
    if parser.pos != parser.input.len() {
        return Err(parser.error("trailing data"));
    }
    Ok(value)
}

/// Deepest array/object nesting the decoder accepts.
pub const MAX_NESTING: usize = 512;

struct Parser<'a> {
    input: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &'static str) -> DecodeError {
        DecodeError {
            offset: self.pos,
            reason,
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), DecodeError> {
        if self.input.get(self.pos) == Some(&byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error("unexpected byte"))
        }
    }

    fn until(&mut self, terminator: u8) -> Result<&'a str, DecodeError> {
        let input: &'a [u8] = self.input;
        let start = self.pos;
        let len = input[start..]
            .iter()
            .position(|b| *b == terminator)
            .ok_or_else(|| self.error("unterminated token"))?;
        self.pos = start + len + 1;
        std::str::from_utf8(&input[start..start + len]).map_err(|_| self.error("invalid utf-8"))
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        self.until(b':')?
            .parse()
            .map_err(|_| self.error("invalid length"))
    }

    fn quoted(&mut self, len: usize) -> Result<String, DecodeError> {
        self.expect(b'"')?;
        let bytes = self
            .pos
            .checked_add(len)
            .and_then(|end| self.input.get(self.pos..end))
            .ok_or_else(|| self.error("string shorter than declared"))?;
        let end = self.pos + bytes.len();
        let text = std::str::from_utf8(bytes)
            .map_err(|_| self.error("invalid utf-8"))?
            .to_string();
        self.pos = end;
        self.expect(b'"')?;
        Ok(text)
    }

    fn tag(&mut self) -> Result<u8, DecodeError> {
        let tag = *self
            .input
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(tag)
    }

    fn enter(&mut self) -> Result<(), DecodeError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn value(&mut self) -> Result<MetaValue, DecodeError> {
        let tag = self.tag()?;
        if tag == b'N' {
            self.expect(b';')?;
            return Ok(MetaValue::Null);
        }
        self.expect(b':')?;
        match tag {
            b'b' => match self.until(b';')? {
                "0" => Ok(MetaValue::Bool(false)),
                "1" => Ok(MetaValue::Bool(true)),
                _ => Err(self.error("invalid boolean")),
            },
            b'i' => self
                .until(b';')?
                .parse()
                .map(MetaValue::Int)
                .map_err(|_| self.error("invalid integer")),
            b'd' => {
                let raw = self.until(b';')?;
                let number = match raw {
                    "NAN" => f64::NAN,
                    "INF" => f64::INFINITY,
                    "-INF" => f64::NEG_INFINITY,
                    other => other.parse().map_err(|_| self.error("invalid float"))?,
                };
                Ok(MetaValue::Float(number))
            }
            b's' => {
                let len = self.length()?;
                let text = self.quoted(len)?;
                self.expect(b';')?;
                Ok(MetaValue::String(text))
            }
            b'a' => {
                let count = self.length()?;
                self.expect(b'{')?;
                self.enter()?;
                let mut entries = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let key = match self.value()? {
                        MetaValue::Int(index) => ArrayKey::Int(index),
                        MetaValue::String(name) => ArrayKey::Str(name),
                        _ => return Err(self.error("invalid array key")),
                    };
                    entries.push((key, self.value()?));
                }
                self.expect(b'}')?;
                self.depth -= 1;
                Ok(MetaValue::Array(entries))
            }
            b'O' => {
                let len = self.length()?;
                let class = self.quoted(len)?;
                self.expect(b':')?;
                let count = self.length()?;
                self.expect(b'{')?;
                self.enter()?;
                let mut properties = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    let name = match self.value()? {
                        MetaValue::String(name) => name,
                        _ => return Err(self.error("invalid property name")),
                    };
                    properties.push((name, self.value()?));
                }
                self.expect(b'}')?;
                self.depth -= 1;
                Ok(MetaValue::Object { class, properties })
            }
            _ => Err(self.error("unknown tag")),
        }
    }
}
