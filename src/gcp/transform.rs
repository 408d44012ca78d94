//! Renames the encoder's builtin fields to Cloud Logging's names.
//!
//! | encoder key | Cloud Logging key                        |
//! |-------------|------------------------------------------|
//! | `level`     | `severity`                               |
//! | `msg`       | `message`                                |
//! | `time`      | `timestamp`                              |
//! | `source`    | `logging.googleapis.com/sourceLocation`  |
//!
//! The renames only apply at the top level. A `level` key nested in a group
//! is an ordinary attribute and goes to the user hook like everything else.
//! The user hook never sees the four builtins: callers cannot intercept the
//! fields Cloud Logging relies on.

use std::sync::Arc;

use crate::attr::{Attr, Value};
use crate::json::{LEVEL_KEY, MESSAGE_KEY, SOURCE_KEY, TIME_KEY};
use crate::sink::ReplaceAttr;

pub const SEVERITY_KEY: &str = "severity";
pub const MESSAGE: &str = "message";
pub const TIMESTAMP_KEY: &str = "timestamp";
pub const SOURCE_LOCATION_KEY: &str = "logging.googleapis.com/sourceLocation";

/// Wraps an optional user hook with the builtin renames.
pub fn replace_attr(user: Option<ReplaceAttr>) -> ReplaceAttr {
    Arc::new(move |groups: &[String], attr: Attr| transform(groups, attr, user.as_ref()))
}

/// Applies the builtin renames, or defers to `user` for every other attribute.
pub fn transform(groups: &[String], attr: Attr, user: Option<&ReplaceAttr>) -> Attr {
    if groups.is_empty() {
        match attr.key.as_str() {
            LEVEL_KEY => return Attr::new(SEVERITY_KEY, attr.value),
            MESSAGE_KEY => return Attr::new(MESSAGE, attr.value),
            TIME_KEY => return Attr::new(TIMESTAMP_KEY, attr.value),
            SOURCE_KEY => return source_location(attr.value),
            _ => {}
        }
    }

    match user {
        Some(replace) => replace(groups, attr),
        None => attr,
    }
}

/// Cloud Logging wants the line number as a string.
fn source_location(value: Value) -> Attr {
    let Value::Source(source) = value else {
        return Attr::new(SOURCE_LOCATION_KEY, value);
    };

    let mut fields = vec![
        Attr::string("file", source.file),
        Attr::string("line", source.line.to_string()),
    ];
    if let Some(function) = source.function {
        fields.push(Attr::string("function", function));
    }
    Attr::group(SOURCE_LOCATION_KEY, fields)
}
