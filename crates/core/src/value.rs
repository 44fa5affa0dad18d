//! Runtime values for the Sovereign VM
//!
//! A `Value` is what lives on the data stack, in memory cells, and in
//! registers. Arithmetic and logic opcodes operate on the `Int` variant
//! only; handing them anything else is a typed failure, never a panic.

use serde::{Deserialize, Serialize};

/// A single runtime value.
///
/// Addresses keep their textual hexadecimal form: `@00ff` and `@ff` are
/// distinct keys even though they denote the same number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Value {
    /// Signed 64-bit integer
    Int(i64),
    /// String (owned, UTF-8)
    Str(String),
    /// Memory address key (hex digits, kept verbatim)
    Address(String),
    /// Label reference (textual)
    Label(String),
}

impl Value {
    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Str(_) => "Str",
            Value::Address(_) => "Address",
            Value::Label(_) => "Label",
        }
    }

    /// The integer payload, if this is an `Int`
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// The string payload, if this is a `Str`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Approximate in-memory size in bytes, used by the VM's
    /// memory-usage counter. Not exact; only has to be monotone in
    /// payload size.
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Int(_) => 8,
            Value::Str(s) | Value::Address(s) | Value::Label(s) => 8 + s.len(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Address(a) => write!(f, "@{}", a),
            Value::Label(l) => write!(f, "{}", l),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_int_only_on_int() {
        assert_eq!(Value::Int(-3).as_int(), Some(-3));
        assert_eq!(Value::Str("3".into()).as_int(), None);
        assert_eq!(Value::Address("ff".into()).as_int(), None);
    }

    #[test]
    fn test_approx_size_tracks_payload() {
        assert_eq!(Value::Int(0).approx_size(), 8);
        assert!(Value::Str("hello".into()).approx_size() > Value::Str("h".into()).approx_size());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Str("a\"b".into()).to_string(), "\"a\\\"b\"");
        assert_eq!(Value::Address("00ff".into()).to_string(), "@00ff");
        assert_eq!(Value::Label("loop".into()).to_string(), "loop");
    }

    #[test]
    fn test_serde_round_trip() {
        let v = Value::Str("payload".into());
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
