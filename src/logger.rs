use crate::config::LoggingConfig;
use crate::context::{self, ContextGuard};
use crate::error::InitError;
use crate::failure::FailureReporter;
use crate::processor::Pipeline;
use crate::record::{ExceptionInfo, FieldValue, Level, LogEvent, Method};
use std::error::Error;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriter};

/// Fields passed to a log call.
pub type Fields = Vec<(String, FieldValue)>;

/// Build a [`Fields`] list from `key = value` pairs.
///
/// ```rust,ignore
/// log.info("user signed in", fields!(user = FieldValue::entity(user), attempts = 3));
/// ```
#[macro_export]
macro_rules! fields {
    () => {
        ::std::vec::Vec::<(::std::string::String, $crate::record::FieldValue)>::new()
    };
    ($($key:ident = $value:expr),+ $(,)?) => {
        ::std::vec![$((
            ::std::string::String::from(::std::stringify!($key)),
            $crate::record::FieldValue::from($value),
        )),+]
    };
}

const ROOT_LOGGER: &str = "root";

struct Shared {
    config: LoggingConfig,
    pipeline: Arc<Pipeline>,
    writer: BoxMakeWriter,
}

/// Handle returned by [`crate::init::configure_logger`].
///
/// Cheap to clone. Every call builds a fresh [`LogEvent`], runs it through
/// the shared pipeline and writes one line to the configured output.
///
/// ```rust,ignore
/// let _guard = log.context(fields!(request_id = "abc123"));
/// log.info("within context", fields!());
///
/// log.bind(fields!(user_id = "user123"));
/// log.info("with bound context", fields!());
/// log.clear();
/// ```
#[derive(Clone)]
pub struct Logger {
    shared: Arc<Shared>,
    name: Option<Arc<str>>,
    threshold: Level,
    bound: Arc<Fields>,
}

impl Logger {
    /// Build a logger writing to stdout, or to the configured log file.
    /// If that file cannot be opened the logger writes to stdout and logs a
    /// warning. Installs nothing globally.
    pub fn new(config: LoggingConfig) -> Result<Self, InitError> {
        LoggerBuilder::new(config).build()
    }

    pub fn builder(config: LoggingConfig) -> LoggerBuilder {
        LoggerBuilder::new(config)
    }

    pub fn config(&self) -> &LoggingConfig {
        &self.shared.config
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.shared.pipeline
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(ROOT_LOGGER)
    }

    /// A logger reporting under `name`. Noisy-logger overrides for that
    /// name apply to its level.
    pub fn named(&self, name: impl Into<String>) -> Logger {
        let name: String = name.into();
        Logger {
            shared: Arc::clone(&self.shared),
            threshold: self.shared.config.effective_level(&name),
            name: Some(Arc::from(name)),
            bound: Arc::clone(&self.bound),
        }
    }

    /// A logger that adds `fields` to each of its events.
    pub fn with_fields(&self, fields: Fields) -> Logger {
        let mut bound = (*self.bound).clone();
        bound.extend(fields);
        Logger {
            bound: Arc::new(bound),
            ..self.clone()
        }
    }

    pub fn is_enabled(&self, level: Level) -> bool {
        level >= self.threshold
    }

    pub fn debug(&self, message: impl Into<String>, fields: Fields) {
        self.log(Method::Debug, message, fields);
    }

    pub fn info(&self, message: impl Into<String>, fields: Fields) {
        self.log(Method::Info, message, fields);
    }

    pub fn warning(&self, message: impl Into<String>, fields: Fields) {
        self.log(Method::Warning, message, fields);
    }

    pub fn error(&self, message: impl Into<String>, fields: Fields) {
        self.log(Method::Error, message, fields);
    }

    pub fn critical(&self, message: impl Into<String>, fields: Fields) {
        self.log(Method::Critical, message, fields);
    }

    /// Log at error level with `error` attached as the exception.
    pub fn exception<E: Error + 'static>(&self, message: impl Into<String>, error: &E, fields: Fields) {
        if !self.is_enabled(Method::Exception.level()) {
            return;
        }
        let mut event = LogEvent::new(message).with_fields(fields);
        event.exc_info = Some(ExceptionInfo::from_error(error));
        self.log_event(Method::Exception, event);
    }

    pub fn log(&self, method: Method, message: impl Into<String>, fields: Fields) {
        if !self.is_enabled(method.level()) {
            return;
        }
        self.log_event(method, LogEvent::new(message).with_fields(fields));
    }

    /// Emit a prebuilt event, e.g. one with `stack_info` set.
    pub fn log_event(&self, method: Method, mut event: LogEvent) {
        if !self.is_enabled(method.level()) {
            return;
        }
        for (key, value) in self.bound.iter() {
            event.set_default(key.clone(), value.clone());
        }
        if let Some(name) = &self.name {
            event.set_default("logger_name", name.as_ref());
        }
        self.emit(self.name(), method, event);
    }

    /// Run a record from another logging facility through the pipeline.
    /// Level filtering already happened upstream.
    pub(crate) fn emit(&self, logger: &str, method: Method, event: LogEvent) {
        if let Some(mut line) = self.shared.pipeline.run(logger, method, event) {
            line.push(b'\n');
            // Output errors are not the caller's problem.
            let _ = self.shared.writer.make_writer().write_all(&line);
        }
    }

    /// Bind fields to the current task until [`clear`](Self::clear).
    pub fn bind(&self, fields: Fields) {
        context::bind(fields);
    }

    /// Remove every field bound to the current task.
    pub fn clear(&self) {
        context::clear();
    }

    /// Bind fields until the returned guard is dropped.
    pub fn context(&self, fields: Fields) -> ContextGuard {
        context::bound(fields)
    }

    /// Run `future` with `fields` bound for its whole duration.
    pub async fn scope<F: Future>(&self, fields: Fields, future: F) -> F::Output {
        context::scope(fields, future).await
    }
}

/// Assembles a [`Logger`] with a custom writer, pipeline or failure reporter.
pub struct LoggerBuilder {
    config: LoggingConfig,
    writer: Option<BoxMakeWriter>,
    reporter: Option<FailureReporter>,
    pipeline: Option<Arc<Pipeline>>,
}

impl LoggerBuilder {
    pub fn new(config: LoggingConfig) -> Self {
        Self {
            config,
            writer: None,
            reporter: None,
            pipeline: None,
        }
    }

    pub fn writer<W>(mut self, writer: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        self.writer = Some(BoxMakeWriter::new(writer));
        self
    }

    pub fn failure_reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Use a hand-built pipeline instead of the standard one.
    pub fn pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn build(self) -> Result<Logger, InitError> {
        let (writer, fallback) = match self.writer {
            Some(writer) => (writer, None),
            None => default_writer(&self.config),
        };

        let config = self.config;
        let pipeline = match self.pipeline {
            Some(pipeline) => pipeline,
            None => Pipeline::for_config(
                &config,
                self.reporter.unwrap_or_else(FailureReporter::stderr),
            ),
        };

        let logger = Logger {
            threshold: config.level,
            shared: Arc::new(Shared {
                config,
                pipeline,
                writer,
            }),
            name: None,
            bound: Arc::new(Vec::new()),
        };
        if let Some(err) = fallback {
            logger.warning(
                "log file could not be opened, writing to stdout",
                fields!(error = err.to_string()),
            );
        }
        Ok(logger)
    }
}

/// stdout, or the log file in append mode outside production and staging.
///
/// A log file that cannot be opened falls back to stdout; the error comes
/// back alongside so the caller can log it.
fn default_writer(config: &LoggingConfig) -> (BoxMakeWriter, Option<InitError>) {
    let Some(path) = config.effective_log_path() else {
        return (BoxMakeWriter::new(io::stdout), None);
    };
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => (BoxMakeWriter::new(Mutex::new(file)), None),
        Err(source) => {
            let err = InitError::LogFile {
                path: path.display().to_string(),
                source,
            };
            (BoxMakeWriter::new(io::stdout), Some(err))
        }
    }
}

/// In-memory output shared between clones, for capturing log lines.
#[derive(Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_string).collect()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory writer poisoned"))?;
        buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemoryWriter {
    type Writer = MemoryWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
