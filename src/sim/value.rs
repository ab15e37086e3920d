//! Tagged return values exchanged between the simulator and the executive.
//!
//! The core never introspects a [`ReturnValue`]'s payload beyond its tag; it
//! is copied by value into outgoing responses and into the lookup-now cache.
//! This is deliberately a flat sum type, not a class hierarchy of response
//! kinds.

use std::fmt;

/// The scalar or array type a script declares for a command/state, used by
/// the [`super::script::ScriptReader`] to know how to parse a literal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Boolean,
    Integer,
    Real,
    String,
    BooleanArray,
    IntegerArray,
    RealArray,
    StringArray,
}

impl ValueType {
    /// Parse a type-name token from a script declaration line, e.g. `Integer`.
    pub fn from_token(tok: &str) -> Option<Self> {
        Some(match tok {
            "Boolean" => ValueType::Boolean,
            "Integer" => ValueType::Integer,
            "Real" => ValueType::Real,
            "String" => ValueType::String,
            "BooleanArray" => ValueType::BooleanArray,
            "IntegerArray" => ValueType::IntegerArray,
            "RealArray" => ValueType::RealArray,
            "StringArray" => ValueType::StringArray,
            _ => return None,
        })
    }
}

/// A tagged value carried by a [`super::agenda::ResponseMessage`].
///
/// Variants: unknown; boolean; integer; real; string; and homogeneous
/// arrays of each.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Unknown,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(String),
    BooleanArray(Vec<bool>),
    IntegerArray(Vec<i64>),
    RealArray(Vec<f64>),
    StringArray(Vec<String>),
}

impl ReturnValue {
    /// Parse a single scalar token against a declared [`ValueType`].
    pub fn parse_scalar(ty: ValueType, token: &str) -> Option<Self> {
        Some(match ty {
            ValueType::Boolean => ReturnValue::Boolean(parse_bool(token)?),
            ValueType::Integer => ReturnValue::Integer(token.parse().ok()?),
            ValueType::Real => ReturnValue::Real(token.parse().ok()?),
            ValueType::String => ReturnValue::String(token.to_string()),
            // Arrays are not parsed one token at a time; see parse_array.
            ValueType::BooleanArray | ValueType::IntegerArray | ValueType::RealArray
            | ValueType::StringArray => return None,
        })
    }

    /// Parse a whitespace-separated sequence of element tokens against a
    /// declared array [`ValueType`].
    pub fn parse_array(ty: ValueType, tokens: &[&str]) -> Option<Self> {
        Some(match ty {
            ValueType::BooleanArray => {
                ReturnValue::BooleanArray(tokens.iter().map(|t| parse_bool(t)).collect::<Option<_>>()?)
            }
            ValueType::IntegerArray => ReturnValue::IntegerArray(
                tokens.iter().map(|t| t.parse().ok()).collect::<Option<_>>()?,
            ),
            ValueType::RealArray => ReturnValue::RealArray(
                tokens.iter().map(|t| t.parse().ok()).collect::<Option<_>>()?,
            ),
            ValueType::StringArray => {
                ReturnValue::StringArray(tokens.iter().map(|t| t.to_string()).collect())
            }
            ValueType::Boolean | ValueType::Integer | ValueType::Real | ValueType::String => {
                return None
            }
        })
    }

    pub fn is_array_type(ty: ValueType) -> bool {
        matches!(
            ty,
            ValueType::BooleanArray
                | ValueType::IntegerArray
                | ValueType::RealArray
                | ValueType::StringArray
        )
    }
}

fn parse_bool(token: &str) -> Option<bool> {
    match token {
        "true" | "TRUE" | "1" => Some(true),
        "false" | "FALSE" | "0" => Some(false),
        _ => None,
    }
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnValue::Unknown => write!(f, "UNKNOWN"),
            ReturnValue::Boolean(b) => write!(f, "{b}"),
            ReturnValue::Integer(i) => write!(f, "{i}"),
            ReturnValue::Real(r) => write!(f, "{r}"),
            ReturnValue::String(s) => write!(f, "{s}"),
            ReturnValue::BooleanArray(v) => write_seq(f, v),
            ReturnValue::IntegerArray(v) => write_seq(f, v),
            ReturnValue::RealArray(v) => write_seq(f, v),
            ReturnValue::StringArray(v) => write_seq(f, v),
        }
    }
}

fn write_seq<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
