//! Line-delimited JSON encoder.
//!
//! Every record becomes one JSON object on its own line:
//!
//! ```text
//! {"time":"2026-01-02T03:04:05.123456789Z","level":"INFO","msg":"hello","animal":"bear"}
//! ```
//!
//! The builtin fields are written first, in the order `time`, `level`,
//! `source` (only with [`JsonOptions::add_source`]), `msg`. They pass through
//! the [`ReplaceAttr`] hook like any other top-level attribute, which is how
//! [`GcpSink`](crate::GcpSink) renames them.
//!
//! Builtins always win their output key. A top-level attribute whose
//! (replaced) key lands on a builtin's key keeps its original key instead; if
//! that is taken too it is dropped.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::SecondsFormat;
use serde_json::{Map, Value as JsonValue};
use tracing::{Level, debug};

use crate::attr::{Attr, Value};
use crate::context::Context;
use crate::error::Error;
use crate::record::Record;
use crate::sink::{ReplaceAttr, Sink};

pub const TIME_KEY: &str = "time";
pub const LEVEL_KEY: &str = "level";
pub const MESSAGE_KEY: &str = "msg";
pub const SOURCE_KEY: &str = "source";

// ── Options ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct JsonOptions {
    /// Minimum level written. Defaults to `INFO`.
    pub level: Level,
    /// Render the call site of each record under [`SOURCE_KEY`].
    pub add_source: bool,
    pub replace_attr: Option<ReplaceAttr>,
}

impl Default for JsonOptions {
    fn default() -> Self {
        Self { level: Level::INFO, add_source: false, replace_attr: None }
    }
}

// ── JsonSink ──────────────────────────────────────────────────────────────────

/// Scope opened by `with_attrs` / `with_group`, replayed on every record.
#[derive(Clone, Debug)]
enum Frame {
    Attrs(Vec<Attr>),
    Group(String),
}

/// A [`Sink`] writing one JSON object per line to any [`Write`].
#[derive(Clone)]
pub struct JsonSink {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    opts: Arc<JsonOptions>,
    frames: Vec<Frame>,
}

impl JsonSink {
    pub fn new(writer: impl Write + Send + 'static, opts: JsonOptions) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
            opts: Arc::new(opts),
            frames: Vec::new(),
        }
    }

    pub fn stdout(opts: JsonOptions) -> Self {
        Self::new(io::stdout(), opts)
    }

    fn derive(&self, frame: Frame) -> Arc<dyn Sink> {
        let mut derived = self.clone();
        derived.frames.push(frame);
        Arc::new(derived)
    }

    fn render(&self, record: Record) -> Map<String, JsonValue> {
        let mut out = Map::new();
        let mut groups = Vec::new();

        self.insert(&mut out, &mut groups, &[], Attr::new(TIME_KEY, record.time));
        self.insert(&mut out, &mut groups, &[], Attr::string(LEVEL_KEY, record.level.to_string()));
        if self.opts.add_source {
            if let Some(source) = record.source {
                self.insert(&mut out, &mut groups, &[], Attr::new(SOURCE_KEY, source));
            }
        }
        self.insert(&mut out, &mut groups, &[], Attr::string(MESSAGE_KEY, record.message));

        // Output keys of the builtins, after replacement.
        let reserved: Vec<String> = out.keys().cloned().collect();

        self.insert_scoped(&self.frames, &mut groups, &reserved, record.attrs, &mut out);

        for attr in record.root_attrs {
            self.insert(&mut out, &mut groups, &reserved, attr);
        }
        out
    }

    /// Replays `frames`, then writes `tail` under the innermost open group.
    /// Groups that end up empty are left out.
    fn insert_scoped(
        &self,
        frames: &[Frame],
        groups: &mut Vec<String>,
        reserved: &[String],
        tail: Vec<Attr>,
        out: &mut Map<String, JsonValue>,
    ) {
        for (i, frame) in frames.iter().enumerate() {
            match frame {
                Frame::Attrs(attrs) => {
                    for attr in attrs {
                        self.insert(out, groups, reserved, attr.clone());
                    }
                }
                Frame::Group(name) => {
                    groups.push(name.clone());
                    let mut inner = Map::new();
                    self.insert_scoped(&frames[i + 1..], groups, reserved, tail, &mut inner);
                    groups.pop();
                    if !inner.is_empty() {
                        if groups.is_empty() && reserved.contains(name) {
                            debug!(key = %name, "group shadows a builtin field, dropped");
                            return;
                        }
                        out.insert(name.clone(), JsonValue::Object(inner));
                    }
                    return;
                }
            }
        }
        for attr in tail {
            self.insert(out, groups, reserved, attr);
        }
    }

    fn insert(
        &self,
        out: &mut Map<String, JsonValue>,
        groups: &mut Vec<String>,
        reserved: &[String],
        attr: Attr,
    ) {
        if let Value::Group(members) = attr.value {
            if attr.key.is_empty() {
                for member in members {
                    self.insert(out, groups, reserved, member);
                }
                return;
            }
            if groups.is_empty() && reserved.contains(&attr.key) {
                debug!(key = %attr.key, "group shadows a builtin field, dropped");
                return;
            }
            groups.push(attr.key.clone());
            let mut inner = Map::new();
            for member in members {
                self.insert(&mut inner, groups, reserved, member);
            }
            groups.pop();
            if !inner.is_empty() {
                out.insert(attr.key, JsonValue::Object(inner));
            }
            return;
        }

        let original = (groups.is_empty() && !reserved.is_empty()).then(|| attr.key.clone());
        let attr = match &self.opts.replace_attr {
            Some(replace) => replace(groups.as_slice(), attr),
            None => attr,
        };
        if attr.key.is_empty() {
            return;
        }

        let key = match original {
            Some(original) if reserved.contains(&attr.key) => {
                if reserved.contains(&original) {
                    debug!(key = %original, "attribute shadows a builtin field, dropped");
                    return;
                }
                original
            }
            _ => attr.key,
        };
        out.insert(key, to_json(attr.value));
    }
}

impl Sink for JsonSink {
    fn enabled(&self, level: Level) -> bool {
        // tracing orders levels by verbosity: ERROR < WARN < INFO < DEBUG.
        level <= self.opts.level
    }

    fn emit(&self, _cx: &Context, record: Record) -> Result<(), Error> {
        let mut line = serde_json::to_vec(&JsonValue::Object(self.render(record)))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(&line)?;
        Ok(())
    }

    fn with_attrs(&self, attrs: Vec<Attr>) -> Arc<dyn Sink> {
        if attrs.is_empty() {
            return Arc::new(self.clone());
        }
        self.derive(Frame::Attrs(attrs))
    }

    fn with_group(&self, name: &str) -> Arc<dyn Sink> {
        if name.is_empty() {
            return Arc::new(self.clone());
        }
        self.derive(Frame::Group(name.to_owned()))
    }
}

fn to_json(value: Value) -> JsonValue {
    match value {
        Value::String(s) => JsonValue::String(s),
        Value::Int(i) => JsonValue::from(i),
        Value::Uint(u) => JsonValue::from(u),
        // JSON has no NaN or infinity.
        Value::Float(f) => serde_json::Number::from_f64(f)
            .map_or_else(|| JsonValue::String(f.to_string()), JsonValue::Number),
        Value::Bool(b) => JsonValue::Bool(b),
        Value::Time(t) => JsonValue::String(t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        Value::Group(attrs) => {
            let mut map = Map::new();
            for attr in attrs.into_iter().filter(|a| !a.key.is_empty()) {
                map.insert(attr.key, to_json(attr.value));
            }
            JsonValue::Object(map)
        }
        Value::Source(source) => {
            let mut map = Map::new();
            map.insert("file".to_owned(), JsonValue::String(source.file));
            map.insert("line".to_owned(), JsonValue::from(source.line));
            if let Some(function) = source.function {
                map.insert("function".to_owned(), JsonValue::String(function));
            }
            JsonValue::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::Source;
    use crate::testing::SharedBuf;

    fn emit_one(sink: &dyn Sink, record: Record) {
        sink.emit(&Context::background(), record).unwrap();
    }

    fn sink(opts: JsonOptions) -> (JsonSink, SharedBuf) {
        let buf = SharedBuf::default();
        (JsonSink::new(buf.clone(), opts), buf)
    }

    #[test]
    fn writes_builtins_then_attrs_on_one_line() {
        let (sink, buf) = sink(JsonOptions::default());
        let record = Record::new(Level::WARN, "careful").with_attrs([Attr::string("animal", "bear")]);
        emit_one(&sink, record);

        let out = buf.contents();
        assert!(out.ends_with('\n'));
        assert_eq!(out.lines().count(), 1);

        let keys: Vec<String> = buf.records()[0].as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["time", "level", "msg", "animal"]);

        let rec = &buf.records()[0];
        assert_eq!(rec["level"], "WARN");
        assert_eq!(rec["msg"], "careful");
        assert!(rec["time"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn source_is_written_only_when_enabled() {
        let record = || Record::new(Level::INFO, "m").with_source(Source::caller());

        let (plain, buf) = sink(JsonOptions::default());
        emit_one(&plain, record());
        assert!(buf.records()[0].get(SOURCE_KEY).is_none());

        let (with_source, buf) = sink(JsonOptions { add_source: true, ..JsonOptions::default() });
        emit_one(&with_source, record());
        let src = &buf.records()[0][SOURCE_KEY];
        assert!(src["file"].as_str().unwrap().ends_with("json.rs"));
        assert!(src["line"].as_u64().unwrap() > 0);
    }

    #[test]
    fn enabled_respects_minimum_level() {
        let (sink, _) = sink(JsonOptions { level: Level::WARN, ..JsonOptions::default() });
        assert!(sink.enabled(Level::ERROR));
        assert!(sink.enabled(Level::WARN));
        assert!(!sink.enabled(Level::INFO));
        assert!(!sink.enabled(Level::DEBUG));
    }

    #[test]
    fn groups_nest_later_attrs_and_empty_groups_vanish() {
        let (root, buf) = sink(JsonOptions::default());
        let scoped = root
            .with_attrs(vec![Attr::string("service", "zoo")])
            .with_group("req")
            .with_attrs(vec![Attr::int("id", 7)])
            .with_group("empty");

        emit_one(&*scoped, Record::new(Level::INFO, "m"));
        emit_one(&*scoped, Record::new(Level::INFO, "m").with_attrs([Attr::bool("ok", true)]));

        let records = buf.records();
        assert_eq!(records[0]["service"], "zoo");
        assert_eq!(records[0]["req"]["id"], 7);
        assert!(records[0]["req"].get("empty").is_none());
        assert_eq!(records[1]["req"]["empty"]["ok"], true);
    }

    #[test]
    fn root_attrs_ignore_open_groups() {
        let (root, buf) = sink(JsonOptions::default());
        let scoped = root.with_group("g");

        let mut record = Record::new(Level::INFO, "m").with_attrs([Attr::int("inner", 1)]);
        record.add_root_attrs([Attr::int("outer", 2)]);
        emit_one(&*scoped, record);

        let rec = &buf.records()[0];
        assert_eq!(rec["g"]["inner"], 1);
        assert_eq!(rec["outer"], 2);
    }

    #[test]
    fn replace_attr_sees_group_path_and_can_drop() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_hook = Arc::clone(&seen);
        let replace: ReplaceAttr = Arc::new(move |groups: &[String], attr: Attr| {
            seen_in_hook.lock().unwrap().push((groups.join("."), attr.key.clone()));
            if attr.key == "secret" { Attr::string("", "") } else { attr }
        });
        let (sink, buf) = sink(JsonOptions { replace_attr: Some(replace), ..JsonOptions::default() });

        let record = Record::new(Level::INFO, "m").with_attrs([
            Attr::string("secret", "hunter2"),
            Attr::group("g", [Attr::int("b", 2)]),
        ]);
        emit_one(&sink, record);

        let rec = &buf.records()[0];
        assert!(rec.get("secret").is_none());
        assert_eq!(rec["g"]["b"], 2);

        let seen = seen.lock().unwrap();
        assert!(seen.contains(&(String::new(), "level".to_owned())));
        assert!(seen.contains(&("g".to_owned(), "b".to_owned())));
        assert!(!seen.iter().any(|(_, key)| key == "g"));
    }

    #[test]
    fn empty_key_group_is_inlined() {
        let (sink, buf) = sink(JsonOptions::default());
        emit_one(&sink, Record::new(Level::INFO, "m").with_attrs([Attr::group("", [Attr::int("a", 1)])]));
        assert_eq!(buf.records()[0]["a"], 1);
    }

    #[test]
    fn builtins_keep_their_keys() {
        let rename: ReplaceAttr = Arc::new(|groups: &[String], attr: Attr| {
            if groups.is_empty() && attr.key == MESSAGE_KEY { Attr::new("message", attr.value) } else { attr }
        });
        let (sink, buf) = sink(JsonOptions { replace_attr: Some(rename), ..JsonOptions::default() });

        let record = Record::new(Level::INFO, "Server Request").with_attrs([
            Attr::string("msg", "user text"),
            Attr::string("level", "shadow"),
            Attr::group("g", [Attr::string("msg", "nested")]),
        ]);
        emit_one(&sink, record);

        let rec = &buf.records()[0];
        assert_eq!(rec["message"], "Server Request");
        assert_eq!(rec["msg"], "user text");
        assert_eq!(rec["level"], "INFO");
        assert_eq!(rec["g"]["msg"], "nested");
    }

    #[test]
    fn non_finite_floats_render_as_strings() {
        assert_eq!(to_json(Value::Float(f64::NAN)), JsonValue::String("NaN".into()));
        assert_eq!(to_json(Value::Float(1.5)), JsonValue::from(1.5));
    }
}
