use crate::entity::{LoggableEntity, LoggableId};
use serde::Serialize;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Severity of a log event, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl Level {
    /// Parse a level name such as `INFO`, `warn` or `critical`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warning),
            "error" => Some(Level::Error),
            "critical" | "fatal" => Some(Level::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }

    /// Closest `tracing` level, used for target filters.
    pub fn to_tracing(self) -> tracing::Level {
        match self {
            Level::Debug => tracing::Level::DEBUG,
            Level::Info => tracing::Level::INFO,
            Level::Warning => tracing::Level::WARN,
            Level::Error | Level::Critical => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<tracing::Level> for Level {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warning,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => Level::Debug,
            log::Level::Info => Level::Info,
            log::Level::Warn => Level::Warning,
            log::Level::Error => Level::Error,
        }
    }
}

/// Name of the logger call that produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Exception,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Debug => "debug",
            Method::Info => "info",
            Method::Warning => "warning",
            Method::Error => "error",
            Method::Critical => "critical",
            Method::Exception => "exception",
        }
    }

    /// `exception` logs at error level.
    pub fn level(&self) -> Level {
        match self {
            Method::Debug => Level::Debug,
            Method::Info => Level::Info,
            Method::Warning => Level::Warning,
            Method::Error | Method::Exception => Level::Error,
            Method::Critical => Level::Critical,
        }
    }
}

impl From<Level> for Method {
    fn from(level: Level) -> Self {
        match level {
            Level::Debug => Method::Debug,
            Level::Info => Method::Info,
            Level::Warning => Method::Warning,
            Level::Error => Method::Error,
            Level::Critical => Method::Critical,
        }
    }
}

/// Value of a single event field.
///
/// `Path`, `Id` and `Entity` exist so that processors can rewrite them
/// before rendering; renderers still cope with them if they survive.
#[derive(Clone)]
pub enum FieldValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Json(serde_json::Value),
    Path(PathBuf),
    Id(Arc<dyn LoggableId>),
    Entity(Arc<dyn LoggableEntity>),
}

impl FieldValue {
    /// Wrap a typed identifier.
    pub fn id<T: LoggableId + 'static>(id: T) -> Self {
        FieldValue::Id(Arc::new(id))
    }

    /// Wrap a persisted domain object. The simplifier replaces it with
    /// `<key>_id` before rendering.
    pub fn entity<T: LoggableEntity + 'static>(entity: T) -> Self {
        FieldValue::Entity(Arc::new(entity))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Like [`FieldValue::to_json`], but an identifier whose `Display` fails
    /// is an error instead of `null`.
    pub fn try_to_json(&self) -> Result<serde_json::Value, fmt::Error> {
        match self {
            FieldValue::Id(id) => format_id(id.as_ref()).map(serde_json::Value::String),
            other => Ok(other.to_json()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::I64(n) => Value::from(*n),
            FieldValue::U64(n) => Value::from(*n),
            FieldValue::F64(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(n.to_string())),
            FieldValue::Str(s) => Value::String(s.clone()),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Path(p) => Value::String(p.display().to_string()),
            FieldValue::Id(id) => format_id(id.as_ref())
                .map(Value::String)
                .unwrap_or(Value::Null),
            FieldValue::Entity(e) => Value::String(format!("<{}>", e.entity_name())),
        }
    }
}

/// Text of a panic payload: the `&str` or `String` it was raised with.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Format an identifier, surfacing a failing `Display` as an error instead
/// of the panic `to_string` would raise.
pub(crate) fn format_id(id: &dyn LoggableId) -> Result<String, fmt::Error> {
    use fmt::Write;
    let mut text = String::new();
    write!(text, "{}", id)?;
    Ok(text)
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Path(p) => write!(f, "{}", p.display()),
            FieldValue::Id(id) => write!(f, "{}", id),
            FieldValue::Entity(e) => write!(f, "<{}>", e.entity_name()),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("Null"),
            FieldValue::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            FieldValue::I64(n) => f.debug_tuple("I64").field(n).finish(),
            FieldValue::U64(n) => f.debug_tuple("U64").field(n).finish(),
            FieldValue::F64(n) => f.debug_tuple("F64").field(n).finish(),
            FieldValue::Str(s) => f.debug_tuple("Str").field(s).finish(),
            FieldValue::Json(v) => f.debug_tuple("Json").field(v).finish(),
            FieldValue::Path(p) => f.debug_tuple("Path").field(p).finish(),
            FieldValue::Id(id) => match format_id(id.as_ref()) {
                Ok(text) => f.debug_tuple("Id").field(&text).finish(),
                Err(_) => f.write_str("Id(<unprintable>)"),
            },
            FieldValue::Entity(e) => f.debug_tuple("Entity").field(&e.entity_name()).finish(),
        }
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_json() == other.to_json()
    }
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    FieldValue::$variant(value.into())
                }
            }
        )*
    };
}

field_value_from! {
    bool => Bool,
    i8 => I64,
    i16 => I64,
    i32 => I64,
    i64 => I64,
    u8 => U64,
    u16 => U64,
    u32 => U64,
    u64 => U64,
    f32 => F64,
    f64 => F64,
    String => Str,
    &str => Str,
    serde_json::Value => Json,
    PathBuf => Path,
    &Path => Path,
}

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::U64(value as u64)
    }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self {
        FieldValue::Str(value.clone())
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One stack frame of a captured backtrace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub name: String,
    pub filename: Option<String>,
    pub lineno: Option<u32>,
}

/// An error attached to an event with `exception(..)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub message: String,
    /// Messages of `source()` errors, outermost first.
    pub causes: Vec<Cause>,
    pub frames: Vec<Frame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cause {
    pub type_name: String,
    pub message: String,
}

impl ExceptionInfo {
    /// Capture an error together with a backtrace of the call site.
    ///
    /// Frames are only collected when backtraces are enabled
    /// (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`).
    pub fn from_error<E: Error + 'static>(error: &E) -> Self {
        Self::from_dyn(short_type_name(std::any::type_name::<E>()), error)
    }

    /// Capture a type-erased error. `type_name` is shown as the exception type.
    pub fn from_dyn(type_name: impl Into<String>, error: &(dyn Error + 'static)) -> Self {
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(Cause {
                type_name: debug_type_name(cause),
                message: cause.to_string(),
            });
            source = cause.source();
        }

        ExceptionInfo {
            type_name: type_name.into(),
            message: error.to_string(),
            causes,
            frames: parse_backtrace(&Backtrace::capture()),
        }
    }

    /// Build an exception from a panic payload or other non-`Error` failure.
    pub fn from_message(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        ExceptionInfo {
            type_name: type_name.into(),
            message: message.into(),
            causes: Vec::new(),
            frames: parse_backtrace(&Backtrace::capture()),
        }
    }
}

/// `std::num::ParseIntError` -> `ParseIntError`, `anyhow::Error` -> `Error`.
pub(crate) fn short_type_name(full: &str) -> String {
    let head = full.split('<').next().unwrap_or(full);
    head.rsplit("::").next().unwrap_or(head).to_string()
}

/// Best-effort type name of a type-erased error from its `Debug` output.
pub(crate) fn debug_type_name(error: &(dyn Error + 'static)) -> String {
    let debug = format!("{:?}", error);
    let name: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_uppercase()) {
        "Error".to_string()
    } else {
        name
    }
}

pub(crate) fn parse_backtrace(backtrace: &Backtrace) -> Vec<Frame> {
    if backtrace.status() != BacktraceStatus::Captured {
        return Vec::new();
    }
    parse_backtrace_text(&backtrace.to_string())
}

fn parse_backtrace_text(text: &str) -> Vec<Frame> {
    let mut frames: Vec<Frame> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(frame) = frames.last_mut() {
                let mut parts = location.rsplitn(3, ':');
                let _column = parts.next();
                let lineno = parts.next().and_then(|l| l.parse().ok());
                frame.filename = parts.next().map(str::to_string);
                frame.lineno = lineno;
            }
        } else if let Some((index, name)) = line.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) && !index.is_empty() {
                frames.push(Frame {
                    name: name.to_string(),
                    filename: None,
                    lineno: None,
                });
            }
        }
    }
    frames
}

/// A single log event flowing through the pipeline.
#[derive(Debug, Clone, Default)]
pub struct LogEvent {
    /// The log message, rendered under the `event` key.
    pub event: String,
    pub fields: BTreeMap<String, FieldValue>,
    pub exc_info: Option<ExceptionInfo>,
    /// Attach the current call stack as `stack` when rendering.
    pub stack_info: bool,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        LogEvent {
            event: event.into(),
            ..Default::default()
        }
    }

    pub fn with_fields<I, K>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        for (key, value) in fields {
            self.fields.insert(key.into(), value);
        }
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Insert only if the key is not present yet.
    pub fn set_default(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.entry(key.into()).or_insert_with(|| value.into());
    }
}
