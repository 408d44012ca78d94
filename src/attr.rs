//! Log attributes: the key/value pairs carried by a [`Record`](crate::Record).
//!
//! ```rust
//! use cloudlog::Attr;
//!
//! let attrs = [
//!     Attr::string("animal", "bear"),
//!     Attr::uint("count", 3),
//!     Attr::group("owner", [Attr::string("name", "alice")]),
//! ];
//! # let _ = attrs;
//! ```

use std::panic::Location;

use chrono::{DateTime, Utc};

// ── Value ─────────────────────────────────────────────────────────────────────

/// The value half of an [`Attr`].
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    /// Nested attributes, rendered as a JSON object.
    Group(Vec<Attr>),
    /// Call-site information; only ever produced for the builtin source key.
    Source(Source),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self { Self::String(v.to_owned()) }
}

impl From<String> for Value {
    fn from(v: String) -> Self { Self::String(v) }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self { Self::Int(v) }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self { Self::Int(v.into()) }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self { Self::Uint(v) }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self { Self::Uint(v.into()) }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self { Self::Bool(v) }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self { Self::Time(v) }
}

impl From<Source> for Value {
    fn from(v: Source) -> Self { Self::Source(v) }
}

impl From<Vec<Attr>> for Value {
    fn from(v: Vec<Attr>) -> Self { Self::Group(v) }
}

// ── Attr ──────────────────────────────────────────────────────────────────────

/// A single key/value pair attached to a log record.
///
/// An attribute whose key is empty is dropped when the record is rendered.
#[derive(Clone, Debug, PartialEq)]
pub struct Attr {
    pub key: String,
    pub value: Value,
}

impl Attr {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Value::String(value.into()))
    }

    pub fn int(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, Value::Int(value))
    }

    pub fn uint(key: impl Into<String>, value: u64) -> Self {
        Self::new(key, Value::Uint(value))
    }

    pub fn float(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, Value::Float(value))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }

    /// A named group of attributes. A group with an empty key is inlined into
    /// its parent instead of nesting.
    pub fn group(key: impl Into<String>, attrs: impl IntoIterator<Item = Attr>) -> Self {
        Self::new(key, Value::Group(attrs.into_iter().collect()))
    }
}

// ── Source ────────────────────────────────────────────────────────────────────

/// Where a log call was made.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Source {
    pub file: String,
    pub line: u32,
    /// Rust has no stable way to name the enclosing function at runtime, so
    /// this is only set when the caller supplies it.
    pub function: Option<String>,
}

impl Source {
    /// Captures the location of the outermost `#[track_caller]` frame.
    #[track_caller]
    pub fn caller() -> Self {
        let location = Location::caller();
        Self {
            file: location.file().to_owned(),
            line: location.line(),
            function: None,
        }
    }

    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }
}
