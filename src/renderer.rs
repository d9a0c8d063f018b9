//! Terminal renderers: sorted JSON for deployed environments, a coloured
//! single-line format for consoles.

use crate::error::ProcessorError;
use crate::processor::Renderer;
use crate::record::{ExceptionInfo, FieldValue, Level, LogEvent, Method};
use colored::{ColoredString, Colorize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Keys the console renderer prints in fixed positions instead of as `key=value`.
const RESERVED_KEYS: &[&str] = &["timestamp", "level", "logger", "stack", "exception"];

/// One JSON object per event with lexicographically sorted keys.
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, _logger: &str, _method: Method, event: &LogEvent) -> Result<Vec<u8>, ProcessorError> {
        // BTreeMap keeps top-level key order stable regardless of serde_json features.
        let mut object = BTreeMap::new();
        for (key, value) in &event.fields {
            object.insert(key.as_str(), value.try_to_json()?);
        }
        object.insert("event", serde_json::Value::String(event.event.clone()));

        if let Some(exc) = &event.exc_info {
            let mut text = String::new();
            PlainTraceback.format(exc, &mut text)?;
            object
                .entry("exception")
                .or_insert(serde_json::Value::String(text));
        }

        Ok(serde_json::to_vec(&object)?)
    }
}

/// Renders an [`ExceptionInfo`] for the console.
pub trait ExceptionFormatter: Send + Sync {
    fn format(&self, exc: &ExceptionInfo, out: &mut String) -> std::fmt::Result;
}

/// Error, causes and frames as plain text.
pub struct PlainTraceback;

impl ExceptionFormatter for PlainTraceback {
    fn format(&self, exc: &ExceptionInfo, out: &mut String) -> std::fmt::Result {
        write!(out, "{}: {}", exc.type_name, exc.message)?;
        if !exc.causes.is_empty() {
            write!(out, "\n\nCaused by:")?;
            for (i, cause) in exc.causes.iter().enumerate() {
                write!(out, "\n    {}: {}: {}", i, cause.type_name, cause.message)?;
            }
        }
        if !exc.frames.is_empty() {
            write!(out, "\n\nStack backtrace:")?;
            for (i, frame) in exc.frames.iter().enumerate() {
                write!(out, "\n  {:>3}: {}", i, frame.name)?;
                if let (Some(file), Some(line)) = (&frame.filename, frame.lineno) {
                    write!(out, "\n             at {}:{}", file, line)?;
                }
            }
        }
        Ok(())
    }
}

/// Aligned frame table followed by the error line, innermost cause last.
#[cfg(feature = "pretty-tracebacks")]
pub struct PrettyTraceback {
    pub colors: bool,
}

#[cfg(feature = "pretty-tracebacks")]
impl ExceptionFormatter for PrettyTraceback {
    fn format(&self, exc: &ExceptionInfo, out: &mut String) -> std::fmt::Result {
        let locations: Vec<String> = exc
            .frames
            .iter()
            .map(|f| match (&f.filename, f.lineno) {
                (Some(file), Some(line)) => format!("{}:{}", file, line),
                (Some(file), None) => file.clone(),
                _ => "<unknown>".to_string(),
            })
            .collect();
        let width = locations.iter().map(String::len).max().unwrap_or(0);

        if !exc.frames.is_empty() {
            writeln!(out, "{}", paint("Traceback (most recent call first):", self.colors, |s| s.dimmed()))?;
            for (location, frame) in locations.iter().zip(&exc.frames) {
                let padded = format!("    {:<width$}", location, width = width);
                writeln!(
                    out,
                    "{}  {}",
                    paint(&padded, self.colors, |s| s.dimmed()),
                    paint(&frame.name, self.colors, |s| s.bold())
                )?;
            }
        }

        for cause in exc.causes.iter().rev() {
            writeln!(
                out,
                "{}: {}",
                paint(&cause.type_name, self.colors, |s| s.red()),
                cause.message
            )?;
            writeln!(out, "{}", paint("  which caused:", self.colors, |s| s.dimmed()))?;
        }

        write!(
            out,
            "{}: {}",
            paint(&exc.type_name, self.colors, |s| s.red().bold()),
            exc.message
        )
    }
}

/// The richest exception formatter compiled in.
///
/// Falls back to [`PlainTraceback`] without the `pretty-tracebacks` feature.
pub fn default_exception_formatter(colors: bool) -> Box<dyn ExceptionFormatter> {
    #[cfg(feature = "pretty-tracebacks")]
    {
        Box::new(PrettyTraceback { colors })
    }

    #[cfg(not(feature = "pretty-tracebacks"))]
    {
        let _ = colors;
        Box::new(PlainTraceback)
    }
}

/// `timestamp [level   ] event   [logger] key=value ...`
///
/// Fields are sorted by key. Stack and exception output follow on new
/// lines. `colored` additionally suppresses ANSI codes when stdout is not a
/// terminal or `NO_COLOR` is set.
pub struct ConsoleRenderer {
    colors: bool,
    pad_event: usize,
    exception_formatter: Box<dyn ExceptionFormatter>,
}

impl ConsoleRenderer {
    pub fn new(colors: bool) -> Self {
        Self {
            colors,
            pad_event: 30,
            exception_formatter: Box::new(PlainTraceback),
        }
    }

    pub fn with_exception_formatter(mut self, formatter: Box<dyn ExceptionFormatter>) -> Self {
        self.exception_formatter = formatter;
        self
    }

    pub fn with_pad_event(mut self, pad_event: usize) -> Self {
        self.pad_event = pad_event;
        self
    }

    fn level_style(&self, level: &str) -> String {
        let padded = format!("{:<8}", level);
        match Level::parse(level) {
            Some(Level::Critical) | Some(Level::Error) => paint(&padded, self.colors, |s| s.red().bold()),
            Some(Level::Warning) => paint(&padded, self.colors, |s| s.yellow().bold()),
            Some(Level::Info) | Some(Level::Debug) => paint(&padded, self.colors, |s| s.green().bold()),
            None => padded,
        }
    }
}

impl Renderer for ConsoleRenderer {
    fn render(&self, _logger: &str, method: Method, event: &LogEvent) -> Result<Vec<u8>, ProcessorError> {
        let mut out = String::new();

        if let Some(ts) = event.get("timestamp") {
            write!(out, "{} ", paint(&text(ts)?, self.colors, |s| s.dimmed()))?;
        }

        let level = event
            .get("level")
            .map(text)
            .transpose()?
            .unwrap_or_else(|| method.level().as_str().to_string());
        write!(out, "[{}] ", self.level_style(&level))?;

        let pairs: Vec<(&String, &FieldValue)> = event
            .fields
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .collect();

        let message = if pairs.is_empty() {
            event.event.clone()
        } else {
            format!("{:<width$}", event.event, width = self.pad_event)
        };
        write!(out, "{}", paint(&message, self.colors, |s| s.bold()))?;

        if let Some(logger) = event.get("logger") {
            write!(out, " [{}]", paint(&text(logger)?, self.colors, |s| s.blue().bold()))?;
        }

        for (key, value) in pairs {
            write!(
                out,
                " {}={}",
                paint(key, self.colors, |s| s.cyan()),
                paint(&text(value)?, self.colors, |s| s.magenta())
            )?;
        }

        if let Some(stack) = event.get("stack") {
            write!(out, "\n{}", stack)?;
        }

        if let Some(exc) = &event.exc_info {
            out.push('\n');
            self.exception_formatter.format(exc, &mut out)?;
        } else if let Some(exception) = event.get("exception") {
            write!(out, "\n{}", exception)?;
        }

        Ok(out.into_bytes())
    }
}

/// `Display` a value, propagating a formatting error.
fn text(value: &FieldValue) -> Result<String, ProcessorError> {
    let mut out = String::new();
    write!(out, "{}", value)?;
    Ok(out)
}

fn paint(text: &str, colors: bool, style: fn(&str) -> ColoredString) -> String {
    if colors {
        style(text).to_string()
    } else {
        text.to_string()
    }
}
