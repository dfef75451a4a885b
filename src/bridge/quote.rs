//! Literal quoting for generated host source
//!
//! Every piece of local data that ends up inside generated source passes
//! through one of these functions. Strings become single-quoted Python
//! literals in which backslash, quote, and every non-printable character are
//! escaped, so a payload can never close the literal or start a new statement.
//! `$` is escaped as well, so quoted text never contains a callback
//! placeholder.

use serde_json::{Map, Number, Value};

/// Quote a string as a host string literal
pub fn string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' => out.push_str("\\x24"),
            c if c.is_ascii_graphic() || c == ' ' => out.push(c),
            c if (c as u32) < 0x100 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c if (c as u32) < 0x10000 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push_str(&format!("\\U{:08x}", c as u32)),
        }
    }
    out.push('\'');
    out
}

/// Quote a boolean
pub fn boolean(flag: bool) -> &'static str {
    if flag { "True" } else { "False" }
}

/// The host's null literal
pub fn null() -> &'static str {
    "None"
}

/// Quote a signed integer
pub fn integer(value: i64) -> String {
    value.to_string()
}

/// Quote a JSON number, keeping integers integral
pub fn number(value: &Number) -> String {
    if let Some(int) = value.as_i64() {
        int.to_string()
    } else if let Some(uint) = value.as_u64() {
        uint.to_string()
    } else {
        float(value.as_f64().unwrap_or(0.0))
    }
}

/// Quote a float; non-finite values are spelled through `float()`
pub fn float(value: f64) -> String {
    if value.is_nan() {
        "float('nan')".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "float('inf')".to_string()
        } else {
            "float('-inf')".to_string()
        }
    } else {
        // `{:?}` always keeps a decimal point or exponent, so the host reads a float.
        format!("{value:?}")
    }
}

/// Quote a list of already-quoted elements
pub fn list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    format!("[{}]", parts.join(", "))
}

/// Quote a list of strings
pub fn string_list<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    list(items.into_iter().map(|s| string(s.as_ref())))
}

/// Quote a mapping with string keys
pub fn mapping(entries: &Map<String, Value>) -> String {
    let parts: Vec<String> = entries
        .iter()
        .map(|(key, value)| format!("{}: {}", string(key), json(value)))
        .collect();
    format!("{{{}}}", parts.join(", "))
}

/// Quote an arbitrary JSON value as a native host literal
pub fn json(value: &Value) -> String {
    match value {
        Value::Null => null().to_string(),
        Value::Bool(flag) => boolean(*flag).to_string(),
        Value::Number(num) => number(num),
        Value::String(text) => string(text),
        Value::Array(items) => list(items.iter().map(json)),
        Value::Object(entries) => mapping(entries),
    }
}
