//! Scalar field values that facts can hold.

use serde::{Deserialize, Serialize};

/// A scalar field value.
///
/// Facts carry only scalars; relationships between facts are expressed as
/// predecessor edges, never as field values.
///
/// # Examples
///
/// ```
/// use kyrofact::FieldValue;
///
/// let name = FieldValue::from("Dallas");
/// assert!(name.is_string());
/// assert_eq!(name.as_str(), Some("Dallas"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum FieldValue {
    Boolean(bool),
    Number(f64),
    String(String),
    #[default]
    Null,
}

impl FieldValue {
    /// True for a string.
    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    /// True for a number.
    pub const fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }

    /// True for a boolean.
    pub const fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean(_))
    }

    /// True for null.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The number, if this is one.
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// The boolean, if this is one.
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Null => "null",
        }
    }

    /// Canonical JSON text for hashing.
    ///
    /// Integral numbers print without a fractional part and non-finite
    /// numbers collapse to `null`, matching JSON number rules.
    pub(crate) fn canonical(&self) -> String {
        match self {
            Self::Boolean(v) => v.to_string(),
            Self::Number(v) => canonical_number(*v),
            Self::String(v) => serde_json::Value::String(v.clone()).to_string(),
            Self::Null => "null".to_string(),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn canonical_number(v: f64) -> String {
    if !v.is_finite() {
        return "null".to_string();
    }
    if v.fract() == 0.0 && v.abs() < 1e15 {
        return format!("{}", v as i64);
    }
    format!("{v}")
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<i64> for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}
