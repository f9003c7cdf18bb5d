//! Canonical JSON encoding.
//!
//! Byte-exact with the firmware serializer: object keys sorted by code
//! point, `,` and `:` separators with no whitespace, non-ASCII text
//! emitted as raw UTF-8. The HMAC is computed over these bytes, so any
//! divergence here rejects every device.

use std::fmt::Write;

use serde_json::Value;

/// Field carrying the message signature; never part of the signed bytes.
pub const SIGNATURE_FIELD: &str = "signature";

/// Encode a JSON value canonically.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// The payload minus its top-level signature field.
pub fn strip_signature(payload: &Value) -> Value {
    match payload {
        Value::Object(map) => {
            let mut map = map.clone();
            map.remove(SIGNATURE_FIELD);
            Value::Object(map)
        }
        other => other.clone(),
    }
}

/// Bytes covered by the signature.
pub fn signing_bytes(payload: &Value) -> Vec<u8> {
    canonical_json(&strip_signature(payload)).into_bytes()
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => write_float(out, f),
            _ => {
                let _ = write!(out, "{}", n);
            }
        },
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.into_iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key]);
            }
            out.push('}');
        }
    }
}

/// Shortest round-trip digits, laid out like the firmware's float repr:
/// positional for decimal exponents in `-4..16` (always with a fraction),
/// otherwise `d.ddde±XX` with at least two exponent digits.
fn write_float(out: &mut String, f: f64) {
    let scientific = format!("{:e}", f);
    let (mantissa, exponent) = match scientific.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (scientific.as_str(), 0),
    };

    if (-4..16).contains(&exponent) {
        let positional = format!("{}", f);
        out.push_str(&positional);
        if !positional.contains('.') {
            out.push_str(".0");
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        let _ = write!(out, "{}e{}{:02}", mantissa, sign, exponent.unsigned_abs());
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
