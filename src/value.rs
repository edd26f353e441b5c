//! Parameter values and their text encoding.
//!
//! Parameters travel out-of-band in the server's text input format, so a
//! value is never spliced into SQL. Arrays use the `{a,b,...}` array literal
//! syntax and binary values the lossless `\x` hex form.

use std::fmt::Write;

use crate::error::{Error, Result};

/// A value bound to a positional parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Json(serde_json::Value),
}

impl Value {
    /// Build an array value from anything convertible to values.
    pub fn array<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Value::Array(items.into_iter().map(Into::into).collect())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Text input form of this value; `None` for NULL.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            Value::Null => return None,
            Value::Bool(v) => (if *v { "true" } else { "false" }).to_string(),
            Value::Short(v) => v.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Float(v) => format_float(f64::from(*v), v.to_string()),
            Value::Double(v) => format_float(*v, v.to_string()),
            Value::Text(v) => v.clone(),
            Value::Bytes(v) => encode_hex(v),
            Value::Array(items) => {
                let mut out = String::new();
                write_array(items, &mut out);
                out
            }
            Value::Json(v) => v.to_string(),
        };
        Some(text)
    }
}

fn format_float(v: f64, display: String) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        (if v > 0.0 { "Infinity" } else { "-Infinity" }).to_string()
    } else {
        display
    }
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        // Writing to a String cannot fail
        let _ = write!(out, "{:02x}", b);
    }
    out
}

fn write_array(items: &[Value], out: &mut String) {
    out.push('{');
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match item {
            Value::Null => out.push_str("NULL"),
            Value::Array(inner) => write_array(inner, out),
            Value::Bool(_)
            | Value::Short(_)
            | Value::Int(_)
            | Value::Long(_)
            | Value::Float(_)
            | Value::Double(_) => {
                if let Some(text) = item.to_text() {
                    out.push_str(&text);
                }
            }
            Value::Text(_) | Value::Bytes(_) | Value::Json(_) => {
                if let Some(text) = item.to_text() {
                    write_quoted(&text, out);
                }
            }
        }
    }
    out.push('}');
}

/// Double-quoted array element with `"` and `\` escaped.
fn write_quoted(text: &str, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}

/// Decode a bytea text payload.
///
/// Accepts the hex form (`\x` followed by two hex digits per byte) and the
/// older escape form (`\\` and `\nnn` octal sequences).
pub fn decode_bytea(text: &[u8]) -> Result<Vec<u8>> {
    match text {
        [b'\\', b'x', hex @ ..] => decode_hex(hex),
        _ => decode_escape(text),
    }
}

fn decode_hex(hex: &[u8]) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::Decode(format!(
            "odd number of hex digits in bytea payload ({})",
            hex.len()
        )));
    }
    hex.chunks_exact(2)
        .map(|pair| -> Result<u8> { Ok((hex_digit(pair[0])? << 4) | hex_digit(pair[1])?) })
        .collect()
}

fn hex_digit(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::Decode(format!(
            "invalid hex digit {:?} in bytea payload",
            c as char
        ))),
    }
}

fn decode_escape(text: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    let mut i = 0;
    while i < text.len() {
        if text[i] != b'\\' {
            out.push(text[i]);
            i += 1;
            continue;
        }
        match text.get(i + 1..i + 4) {
            Some([b'\\', ..]) => {
                out.push(b'\\');
                i += 2;
            }
            // The first digit stops at 3 so the value fits in a byte.
            Some(&[a, b, c]) if (b'0'..=b'3').contains(&a) && is_octal(b) && is_octal(c) => {
                out.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                i += 4;
            }
            _ if text.get(i + 1) == Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            _ => {
                return Err(Error::Decode(
                    "invalid escape sequence in bytea payload".to_string(),
                ))
            }
        }
    }
    Ok(out)
}

fn is_octal(c: u8) -> bool {
    (b'0'..=b'7').contains(&c)
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Short(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Bytes(v.to_vec())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
