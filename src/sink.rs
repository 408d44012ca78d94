//! The structured-encoder boundary.

use std::sync::Arc;

use tracing::Level;

use crate::attr::Attr;
use crate::context::Context;
use crate::error::Error;
use crate::record::Record;

/// Rewrites one attribute before it is rendered.
///
/// Receives the path of groups enclosing the attribute (empty at the top
/// level) and returns the attribute to render in its place. Returning an
/// attribute with an empty key drops it. Never called for groups themselves,
/// only for their members.
pub type ReplaceAttr = Arc<dyn Fn(&[String], Attr) -> Attr + Send + Sync>;

/// Destination for [`Record`]s.
///
/// Derived sinks (`with_attrs`, `with_group`) share the parent's output and
/// configuration; deriving never mutates the parent.
pub trait Sink: Send + Sync {
    /// Whether records at `level` would be written at all.
    fn enabled(&self, level: Level) -> bool;

    /// Renders and writes one record.
    ///
    /// `cx` is the context of the call that produced the record; encoders that
    /// do not care about request state ignore it.
    fn emit(&self, cx: &Context, record: Record) -> Result<(), Error>;

    /// A sink that adds `attrs` to every record, under any groups already open.
    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Sink>;

    /// A sink that nests every later attribute under `name`.
    fn with_group(&self, name: &str) -> Arc<dyn Sink>;
}
