// ── Query key model ──
//
// Keys are the only addressing mechanism in the engine. A key is an
// ordered sequence of plain values; equality is structural and recursive,
// never derived from an incidental text serialization.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::Serialize;

use crate::error::QueryError;

// ── KeyPart ─────────────────────────────────────────────────────────

/// One element of a [`QueryKey`].
///
/// Numbers follow JSON semantics: `Int(1)` and `Float(1.0)` are the same
/// value. Records are canonicalised by field name, so field insertion order
/// never affects equality or hashing.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum KeyPart {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<KeyPart>),
    Record(BTreeMap<String, KeyPart>),
}

impl KeyPart {
    /// Build a record part from `(field, value)` pairs.
    pub fn record<K, V>(fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<KeyPart>,
    {
        Self::Record(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// `-0.0` folds into `0.0` and every NaN payload into one.
fn canonical_bits(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        (f + 0.0).to_bits()
    }
}

/// The `i64` a float is exactly equal to, if any.
#[allow(
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::as_conversions,
    clippy::cast_precision_loss
)]
fn integral(f: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    if f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => canonical_bits(*a) == canonical_bits(*b),
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => {
                integral(*b) == Some(*a)
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Record(a), Self::Record(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for KeyPart {}

impl Hash for KeyPart {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            // Integral floats must hash like the equal Int.
            Self::Float(f) => {
                if let Some(i) = integral(*f) {
                    2u8.hash(state);
                    i.hash(state);
                } else {
                    3u8.hash(state);
                    canonical_bits(*f).hash(state);
                }
            }
            Self::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            Self::List(items) => {
                5u8.hash(state);
                items.hash(state);
            }
            Self::Record(fields) => {
                6u8.hash(state);
                fields.hash(state);
            }
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

// ── Conversions ─────────────────────────────────────────────────────

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        Self::Str(s.clone())
    }
}

impl From<bool> for KeyPart {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_small_int {
    ($($t:ty),*) => {
        $(
            impl From<$t> for KeyPart {
                fn from(v: $t) -> Self {
                    Self::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_small_int!(i8, i16, i32, i64, u8, u16, u32);

#[allow(clippy::as_conversions, clippy::cast_precision_loss)]
impl From<u64> for KeyPart {
    fn from(v: u64) -> Self {
        i64::try_from(v).map_or(Self::Float(v as f64), Self::Int)
    }
}

impl From<usize> for KeyPart {
    fn from(v: usize) -> Self {
        u64::try_from(v).map_or(Self::Null, Self::from)
    }
}

impl From<f64> for KeyPart {
    fn from(f: f64) -> Self {
        integral(f).map_or(Self::Float(f), Self::Int)
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<KeyPart>> From<Vec<T>> for KeyPart {
    fn from(items: Vec<T>) -> Self {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<KeyPart>> From<BTreeMap<String, T>> for KeyPart {
    fn from(fields: BTreeMap<String, T>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
    }
}

impl From<&serde_json::Value> for KeyPart {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_u64().map(Self::from))
                .or_else(|| n.as_f64().map(Self::from))
                .unwrap_or(Self::Null),
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::List(items.iter().map(Self::from).collect()),
            Value::Object(fields) => Self::Record(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<serde_json::Value> for KeyPart {
    fn from(value: serde_json::Value) -> Self {
        Self::from(&value)
    }
}

// ── QueryKey ────────────────────────────────────────────────────────

/// Ordered, structurally compared address of one query.
///
/// Build with [`query_key!`](crate::query_key) or by chaining
/// [`with`](Self::with).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a part, builder style.
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn push(&mut self, part: impl Into<KeyPart>) {
        self.0.push(part.into());
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, KeyPart> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `pattern` is an elementwise, length-respecting prefix of
    /// this key. The empty pattern is a prefix of every key.
    pub fn starts_with(&self, pattern: &QueryKey) -> bool {
        self.0.starts_with(&pattern.0)
    }

    /// Parse a key from a JSON array such as `["allergies","detail","a1"]`.
    pub fn parse_json(text: &str) -> Result<Self, QueryError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| QueryError::Validation {
                message: format!("query key is not valid JSON: {e}"),
            })?;
        match value {
            serde_json::Value::Array(items) => Ok(items.iter().map(KeyPart::from).collect()),
            other => Err(QueryError::Validation {
                message: format!("query key must be a JSON array, got {other}"),
            }),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl From<Vec<KeyPart>> for QueryKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

impl FromIterator<KeyPart> for QueryKey {
    fn from_iter<I: IntoIterator<Item = KeyPart>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a QueryKey {
    type Item = &'a KeyPart;
    type IntoIter = std::slice::Iter<'a, KeyPart>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Build a [`QueryKey`] from values convertible into [`KeyPart`].
///
/// ```
/// use medquery_core::query_key;
///
/// let key = query_key!["allergies", "detail", "a1"];
/// assert!(key.starts_with(&query_key!["allergies"]));
/// ```
#[macro_export]
macro_rules! query_key {
    () => {
        $crate::QueryKey::new()
    };
    ($($part:expr),+ $(,)?) => {
        $crate::QueryKey::from(vec![$($crate::KeyPart::from($part)),+])
    };
}
