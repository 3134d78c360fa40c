//! Cell values and the deterministic encodings for array/point/line/bigint
//! columns.

use std::fmt;

/// A single column value. Distinct from `serde_json::Value` so a `BigInt`
/// can be carried without going through `f64` and losing precision.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    BigInt(String),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Array(Vec<CellValue>),
    Json(serde_json::Value),
    Point(f64, f64),
    Line(f64, f64, f64),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::BigInt(s) => write!(f, "{s}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Bytes(b) => write!(f, "0x{}", hex_encode(b)),
            Self::Array(items) => write!(f, "{}", encode_array(items)),
            Self::Json(v) => write!(f, "{v}"),
            Self::Point(x, y) => write!(f, "({x},{y})"),
            Self::Line(a, b, c) => write!(f, "({a},{b},{c})"),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Text columns strip trailing NUL bytes on write; this models that on the
/// write path so a `Text` `CellValue` can never carry a stray NUL once it's
/// passed through here.
pub fn strip_trailing_nul(s: &str) -> String {
    s.trim_end_matches('\0').to_string()
}

/// A JSON value is rejected if it contains an integer outside what f64 can
/// represent exactly (`+-2^53`), since JSON has no native bigint type.
pub fn json_rejects_bigint(value: &serde_json::Value) -> Option<String> {
    const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.unsigned_abs() as i64 > MAX_SAFE_INTEGER {
                    return Some(n.to_string());
                }
            } else if n.is_u64() {
                if let Some(u) = n.as_u64() {
                    if u > MAX_SAFE_INTEGER as u64 {
                        return Some(n.to_string());
                    }
                }
            }
            None
        }
        serde_json::Value::Array(items) => items.iter().find_map(json_rejects_bigint),
        serde_json::Value::Object(map) => map.values().find_map(json_rejects_bigint),
        _ => None,
    }
}

/// Length-prefixed encoding for an array of text, chosen (per an explicit
/// Open Question) over an escaped-delimiter scheme: `len:value` repeated,
/// so any UTF-8 string — including one containing `:` or any other
/// delimiter candidate — round-trips without an escaping pass.
pub fn encode_text_array(items: &[String]) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&item.len().to_string());
        out.push(':');
        out.push_str(item);
    }
    out
}

pub fn decode_text_array(encoded: &str) -> Result<Vec<String>, String> {
    let mut items = Vec::new();
    let bytes = encoded.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let colon = encoded[i..]
            .find(':')
            .ok_or_else(|| format!("malformed array encoding at offset {i}: missing length prefix"))?;
        let len: usize = encoded[i..i + colon]
            .parse()
            .map_err(|_| format!("malformed array encoding at offset {i}: non-numeric length"))?;
        let start = i + colon + 1;
        let end = start + len;
        if end > encoded.len() {
            return Err(format!("malformed array encoding: declared length {len} exceeds remaining input"));
        }
        items.push(encoded[start..end].to_string());
        i = end;
    }
    Ok(items)
}

fn encode_array(items: &[CellValue]) -> String {
    let rendered: Vec<String> = items.iter().map(|v| v.to_string()).collect();
    encode_text_array(&rendered)
}

/// Tagged JSON representation used to persist a [`CellValue`] in a backend
/// that only speaks JSON natively (the `postgres` backend's `data` column).
impl CellValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::json!({"t": "bool", "v": b}),
            Self::Int(i) => serde_json::json!({"t": "int", "v": i}),
            Self::BigInt(s) => serde_json::json!({"t": "bigint", "v": s}),
            Self::Float(f) => serde_json::json!({"t": "float", "v": f}),
            Self::Text(s) => serde_json::json!({"t": "text", "v": s}),
            Self::Bytes(b) => serde_json::json!({"t": "bytes", "v": hex_encode(b)}),
            Self::Array(items) => serde_json::json!({"t": "array", "v": items.iter().map(Self::to_json).collect::<Vec<_>>()}),
            Self::Json(v) => serde_json::json!({"t": "json", "v": v}),
            Self::Point(x, y) => serde_json::json!({"t": "point", "v": [x, y]}),
            Self::Line(a, b, c) => serde_json::json!({"t": "line", "v": [a, b, c]}),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::Null);
        }
        let tag = value.get("t").and_then(|t| t.as_str()).ok_or("missing type tag")?;
        let v = value.get("v").ok_or("missing value field")?;
        match tag {
            "bool" => Ok(Self::Bool(v.as_bool().ok_or("expected bool")?)),
            "int" => Ok(Self::Int(v.as_i64().ok_or("expected int")?)),
            "bigint" => Ok(Self::BigInt(v.as_str().ok_or("expected string")?.to_string())),
            "float" => Ok(Self::Float(v.as_f64().ok_or("expected float")?)),
            "text" => Ok(Self::Text(v.as_str().ok_or("expected string")?.to_string())),
            "bytes" => {
                let hex = v.as_str().ok_or("expected hex string")?;
                let bytes = (0..hex.len())
                    .step_by(2)
                    .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string()))
                    .collect::<Result<Vec<u8>, String>>()?;
                Ok(Self::Bytes(bytes))
            }
            "array" => {
                let items = v.as_array().ok_or("expected array")?;
                Ok(Self::Array(items.iter().map(Self::from_json).collect::<Result<Vec<_>, _>>()?))
            }
            "json" => Ok(Self::Json(v.clone())),
            "point" => {
                let coords = v.as_array().ok_or("expected [x, y]")?;
                Ok(Self::Point(coords[0].as_f64().ok_or("expected x")?, coords[1].as_f64().ok_or("expected y")?))
            }
            "line" => {
                let coords = v.as_array().ok_or("expected [a, b, c]")?;
                Ok(Self::Line(
                    coords[0].as_f64().ok_or("expected a")?,
                    coords[1].as_f64().ok_or("expected b")?,
                    coords[2].as_f64().ok_or("expected c")?,
                ))
            }
            other => Err(format!("unknown CellValue tag '{other}'")),
        }
    }
}
