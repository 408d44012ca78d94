//! The log record handed to a [`Sink`](crate::Sink).

use chrono::{DateTime, Utc};
use tracing::Level;

use crate::attr::{Attr, Source};

/// One structured log entry.
///
/// `attrs` are rendered under whatever groups the receiving sink has open
/// (see [`Sink::with_group`](crate::Sink::with_group)); `root_attrs` always
/// land at the top level of the rendered object. Trace correlation fields go
/// in `root_attrs` so log viewers find them regardless of grouping.
#[derive(Clone, Debug)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub level: Level,
    pub message: String,
    pub source: Option<Source>,
    pub attrs: Vec<Attr>,
    pub root_attrs: Vec<Attr>,
}

impl Record {
    /// A record stamped with the current time.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            level,
            message: message.into(),
            source: None,
            attrs: Vec::new(),
            root_attrs: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_attrs(mut self, attrs: impl IntoIterator<Item = Attr>) -> Self {
        self.attrs.extend(attrs);
        self
    }

    pub fn add_attrs(&mut self, attrs: impl IntoIterator<Item = Attr>) {
        self.attrs.extend(attrs);
    }

    pub fn add_root_attrs(&mut self, attrs: impl IntoIterator<Item = Attr>) {
        self.root_attrs.extend(attrs);
    }
}
