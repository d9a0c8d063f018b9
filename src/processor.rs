//! Event processors and the pipeline that chains them to a renderer.

use crate::config::LoggingConfig;
use crate::context;
use crate::error::{PipelineError, ProcessorError};
use crate::failure::{FailureReporter, ProcessorFailure};
use crate::record::{format_id, panic_message, FieldValue, LogEvent, Method};
use crate::renderer::{default_exception_formatter, ConsoleRenderer, JsonRenderer};
use crate::request;
use chrono::{SecondsFormat, Utc};
use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Position of a processor in the pipeline.
///
/// Stages must be non-decreasing from the first processor to the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Level annotation and context merges.
    Annotate,
    /// Rewriting domain values into plain ones.
    Simplify,
    /// Timestamps, stack info and other derived fields.
    Decorate,
    /// Turning `exc_info` into output fields.
    FormatException,
}

/// What the pipeline should do after a processor ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Drop,
}

/// A step that transforms an event before rendering.
///
/// `logger` is the logger name (or target for bridged records) and
/// `method` the call that produced the event. A processor never produces
/// output; that is the [`Renderer`]'s job.
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage {
        Stage::Decorate
    }

    fn process(
        &self,
        logger: &str,
        method: Method,
        event: &mut LogEvent,
    ) -> Result<Action, ProcessorError>;
}

/// Terminal step turning an event into one line of output (no newline).
pub trait Renderer: Send + Sync {
    fn render(&self, logger: &str, method: Method, event: &LogEvent) -> Result<Vec<u8>, ProcessorError>;
}

/// Adds `level`, named after the calling method (`exception` becomes `error`).
pub struct AddLogLevel;

impl Processor for AddLogLevel {
    fn name(&self) -> &'static str {
        "add_log_level"
    }

    fn stage(&self) -> Stage {
        Stage::Annotate
    }

    fn process(&self, _logger: &str, method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        event.insert("level", method.level().as_str());
        Ok(Action::Continue)
    }
}

/// Merges the task's bound context. Fields passed to the log call win.
pub struct MergeBoundContext;

impl Processor for MergeBoundContext {
    fn name(&self) -> &'static str {
        "merge_bound_context"
    }

    fn stage(&self) -> Stage {
        Stage::Annotate
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        for (key, value) in context::snapshot() {
            event.set_default(key, value);
        }
        Ok(Action::Continue)
    }
}

/// Moves a `logger_name` field to `logger`, unless `logger` is already set.
pub struct LoggerName;

impl Processor for LoggerName {
    fn name(&self) -> &'static str {
        "logger_name"
    }

    fn stage(&self) -> Stage {
        Stage::Annotate
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        if let Some(name) = event.remove("logger_name") {
            if !matches!(name, FieldValue::Null) {
                event.set_default("logger", name);
            }
        }
        Ok(Action::Continue)
    }
}

/// Merges the active HTTP request's context. No-op outside a request.
pub struct AddRequestContext;

impl Processor for AddRequestContext {
    fn name(&self) -> &'static str {
        "add_request_context"
    }

    fn stage(&self) -> Stage {
        Stage::Annotate
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        if let Some(data) = request::data() {
            for (key, value) in data {
                event.set_default(key, value);
            }
        }
        Ok(Action::Continue)
    }
}

/// Renders path values relative to the working directory with `/` separators.
pub struct PrettifyPaths {
    base: Option<PathBuf>,
}

impl PrettifyPaths {
    pub fn new() -> Self {
        Self {
            base: std::env::current_dir().ok(),
        }
    }

    pub fn relative_to(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn prettify(&self, path: &Path) -> String {
        let relative = self
            .base
            .as_deref()
            .and_then(|base| path.strip_prefix(base).ok())
            .unwrap_or(path);
        relative.to_string_lossy().replace('\\', "/")
    }
}

impl Default for PrettifyPaths {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PrettifyPaths {
    fn name(&self) -> &'static str {
        "prettify_paths"
    }

    fn stage(&self) -> Stage {
        Stage::Simplify
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        for value in event.fields.values_mut() {
            if let FieldValue::Path(path) = value {
                *value = FieldValue::Str(self.prettify(path));
            }
        }
        Ok(Action::Continue)
    }
}

/// Replaces entity fields `key` with `key_id` and identifier wrappers with
/// their text form.
///
/// Only the entity's detached-safe accessor is used. If it fails, or an
/// identifier's `Display` returns an error, the field is dropped from the event and the first error is returned so the
/// pipeline can report it.
pub struct SimplifyEntities;

impl Processor for SimplifyEntities {
    fn name(&self) -> &'static str {
        "simplify_entities"
    }

    fn stage(&self) -> Stage {
        Stage::Simplify
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        let mut first_error = None;
        let keys: Vec<String> = event
            .fields
            .iter()
            .filter(|(_, v)| matches!(v, FieldValue::Entity(_) | FieldValue::Id(_)))
            .map(|(k, _)| k.clone())
            .collect();

        for key in keys {
            match event.remove(&key) {
                Some(FieldValue::Entity(entity)) => match entity.detached_id() {
                    Ok(id) => {
                        event.insert(format!("{key}_id"), id);
                    }
                    Err(source) => {
                        first_error.get_or_insert(ProcessorError::Entity { field: key, source });
                    }
                },
                Some(FieldValue::Id(id)) => match format_id(id.as_ref()) {
                    Ok(text) => {
                        event.insert(key, text);
                    }
                    Err(_) => {
                        first_error.get_or_insert(ProcessorError::Unprintable { field: key });
                    }
                },
                Some(other) => {
                    event.insert(key, other);
                }
                None => {}
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(Action::Continue),
        }
    }
}

/// Adds an ISO-8601 UTC `timestamp`.
pub struct TimeStamper {
    pub key: &'static str,
}

impl Default for TimeStamper {
    fn default() -> Self {
        Self { key: "timestamp" }
    }
}

impl Processor for TimeStamper {
    fn name(&self) -> &'static str {
        "timestamper"
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        event.insert(self.key, Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
        Ok(Action::Continue)
    }
}

/// Attaches the current call stack as `stack` when the event asked for it.
pub struct StackInfoRenderer;

impl Processor for StackInfoRenderer {
    fn name(&self) -> &'static str {
        "stack_info"
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        if std::mem::take(&mut event.stack_info) {
            event.insert("stack", Backtrace::force_capture().to_string());
        }
        Ok(Action::Continue)
    }
}

/// Turns `exc_info` into a structured `exception` field.
///
/// Only the outermost and innermost frames are kept, `max_frames` total.
pub struct ExceptionDictRenderer {
    pub max_frames: usize,
}

impl Default for ExceptionDictRenderer {
    fn default() -> Self {
        Self { max_frames: 5 }
    }
}

impl ExceptionDictRenderer {
    fn bounded<T: Clone>(&self, frames: &[T]) -> Vec<T> {
        if frames.len() <= self.max_frames {
            return frames.to_vec();
        }
        let tail = self.max_frames / 2;
        let head = self.max_frames - tail;
        frames[..head]
            .iter()
            .chain(frames[frames.len() - tail..].iter())
            .cloned()
            .collect()
    }
}

impl Processor for ExceptionDictRenderer {
    fn name(&self) -> &'static str {
        "exception_dict"
    }

    fn stage(&self) -> Stage {
        Stage::FormatException
    }

    fn process(&self, _logger: &str, _method: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        let Some(exc) = event.exc_info.take() else {
            return Ok(Action::Continue);
        };

        let mut stacks = vec![serde_json::json!({
            "exc_type": exc.type_name,
            "exc_value": exc.message,
            "is_cause": false,
            "frames": serde_json::to_value(self.bounded(&exc.frames))?,
        })];
        for cause in &exc.causes {
            stacks.push(serde_json::json!({
                "exc_type": cause.type_name,
                "exc_value": cause.message,
                "is_cause": true,
                "frames": [],
            }));
        }

        event.insert("exception", serde_json::Value::Array(stacks));
        Ok(Action::Continue)
    }
}

/// Ordered processors followed by exactly one renderer.
///
/// Built once at startup and shared read-only afterwards.
pub struct Pipeline {
    processors: Vec<Box<dyn Processor>>,
    renderer: Box<dyn Renderer>,
    reporter: FailureReporter,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Standard pipeline for a configuration.
    ///
    /// Console rendering in development and test, sorted JSON in
    /// production and staging.
    pub fn for_config(config: &LoggingConfig, reporter: FailureReporter) -> Arc<Pipeline> {
        let mut processors: Vec<Box<dyn Processor>> = vec![
            Box::new(AddLogLevel),
            Box::new(MergeBoundContext),
            Box::new(LoggerName),
            Box::new(AddRequestContext),
            Box::new(PrettifyPaths::new()),
            Box::new(SimplifyEntities),
            Box::new(TimeStamper::default()),
            Box::new(StackInfoRenderer),
        ];

        let renderer: Box<dyn Renderer> = if config.environment.uses_json() {
            processors.push(Box::new(ExceptionDictRenderer::default()));
            Box::new(JsonRenderer)
        } else {
            let colors = config.colors();
            Box::new(
                ConsoleRenderer::new(colors)
                    .with_exception_formatter(default_exception_formatter(colors)),
            )
        };

        Arc::new(Pipeline {
            processors,
            renderer,
            reporter,
        })
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.processors.iter().map(|p| p.stage()).collect()
    }

    pub fn processor_names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn reporter(&self) -> &FailureReporter {
        &self.reporter
    }

    /// Run an event through every processor and the renderer.
    ///
    /// Returns `None` if a processor dropped the event. Processor failures,
    /// panics included, are reported and never returned; the event carries
    /// on in whatever state the failing processor left it.
    pub fn run(&self, logger: &str, method: Method, mut event: LogEvent) -> Option<Vec<u8>> {
        for processor in &self.processors {
            match isolate(|| processor.process(logger, method, &mut event)) {
                Ok(Action::Continue) => {}
                Ok(Action::Drop) => return None,
                Err(err) => self.report(processor.name(), logger, &event, &err),
            }
        }

        match isolate(|| self.renderer.render(logger, method, &event)) {
            Ok(line) => Some(line),
            Err(err) => {
                self.report("renderer", logger, &event, &err);
                Some(event.event.clone().into_bytes())
            }
        }
    }

    fn report(&self, processor: &str, logger: &str, event: &LogEvent, err: &ProcessorError) {
        self.reporter.report(ProcessorFailure::new(processor, logger, &event.event, err));
    }
}

/// Run one pipeline step, turning a panic into a [`ProcessorError`].
fn isolate<T>(step: impl FnOnce() -> Result<T, ProcessorError>) -> Result<T, ProcessorError> {
    panic::catch_unwind(AssertUnwindSafe(step))
        .unwrap_or_else(|payload| Err(ProcessorError::Panicked(panic_message(payload.as_ref()))))
}

/// Assembles a [`Pipeline`], checking stage order and the renderer.
#[derive(Default)]
pub struct PipelineBuilder {
    processors: Vec<Box<dyn Processor>>,
    renderer: Option<Box<dyn Renderer>>,
    reporter: Option<FailureReporter>,
}

impl PipelineBuilder {
    pub fn processor<P: Processor + 'static>(mut self, processor: P) -> Self {
        self.processors.push(Box::new(processor));
        self
    }

    pub fn renderer<R: Renderer + 'static>(mut self, renderer: R) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn reporter(mut self, reporter: FailureReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn build(self) -> Result<Pipeline, PipelineError> {
        for pair in self.processors.windows(2) {
            let (previous, next) = (&pair[0], &pair[1]);
            if next.stage() < previous.stage() {
                return Err(PipelineError::OutOfOrder {
                    processor: next.name().to_string(),
                    stage: next.stage(),
                    previous: previous.name().to_string(),
                    previous_stage: previous.stage(),
                });
            }
        }

        let renderer = self.renderer.ok_or(PipelineError::MissingRenderer)?;
        Ok(Pipeline {
            processors: self.processors,
            renderer,
            reporter: self.reporter.unwrap_or_else(FailureReporter::stderr),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{LoggableEntity, LoggableId};
    use crate::env::Environment;
    use crate::error::EntityError;
    use crate::fields;
    use std::fmt;

    struct User {
        id: Option<u32>,
        detached: bool,
    }

    impl LoggableEntity for User {
        fn entity_name(&self) -> &str {
            "User"
        }

        fn detached_id(&self) -> Result<Option<String>, EntityError> {
            if self.detached {
                Err(EntityError::Detached)
            } else {
                Ok(self.id.map(|id| id.to_string()))
            }
        }
    }

    struct OrderId(&'static str);

    impl fmt::Display for OrderId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "order_{}", self.0)
        }
    }

    impl LoggableId for OrderId {}

    struct BrokenId;

    impl fmt::Display for BrokenId {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    impl LoggableId for BrokenId {}

    fn run(processor: &dyn Processor, event: &mut LogEvent) -> Result<Action, ProcessorError> {
        processor.process("test", Method::Info, event)
    }

    #[test]
    fn entities_become_id_fields() {
        let mut event = LogEvent::new("saved").with_fields(fields!(
            user = FieldValue::entity(User { id: Some(7), detached: false }),
            order = FieldValue::id(OrderId("01h")),
        ));
        run(&SimplifyEntities, &mut event).unwrap();
        assert!(!event.contains_key("user"));
        assert_eq!(event.get("user_id"), Some(&FieldValue::from("7")));
        assert_eq!(event.get("order"), Some(&FieldValue::from("order_01h")));
    }

    #[test]
    fn unsaved_entity_has_null_id() {
        let mut event = LogEvent::new("new").with_fields(fields!(
            user = FieldValue::entity(User { id: None, detached: false }),
        ));
        run(&SimplifyEntities, &mut event).unwrap();
        assert_eq!(event.get("user_id"), Some(&FieldValue::Null));
    }

    #[test]
    fn unprintable_id_is_dropped_and_reported() {
        let mut event = LogEvent::new("odd").with_fields(fields!(
            order = FieldValue::id(BrokenId),
            other = "kept",
        ));
        let err = run(&SimplifyEntities, &mut event).unwrap_err();
        assert!(matches!(err, ProcessorError::Unprintable { ref field } if field == "order"));
        assert!(!event.contains_key("order"));
        assert!(event.contains_key("other"));
    }

    #[test]
    fn detached_entity_is_dropped_and_reported() {
        let mut event = LogEvent::new("late").with_fields(fields!(
            user = FieldValue::entity(User { id: Some(1), detached: true }),
            other = "kept",
        ));
        let err = run(&SimplifyEntities, &mut event).unwrap_err();
        assert!(matches!(err, ProcessorError::Entity { ref field, .. } if field == "user"));
        assert!(!event.contains_key("user"));
        assert!(!event.contains_key("user_id"));
        assert!(event.contains_key("other"));
    }

    #[test]
    fn logger_name_moves_to_logger() {
        let mut event = LogEvent::new("x").with_fields(fields!(logger_name = "custom"));
        run(&LoggerName, &mut event).unwrap();
        assert_eq!(event.get("logger"), Some(&FieldValue::from("custom")));
        assert!(!event.contains_key("logger_name"));
    }

    #[test]
    fn logger_name_keeps_existing_logger() {
        let mut event = LogEvent::new("x").with_fields(fields!(logger_name = "custom", logger = "set"));
        run(&LoggerName, &mut event).unwrap();
        assert_eq!(event.get("logger"), Some(&FieldValue::from("set")));
    }

    #[test]
    fn paths_are_relative_with_forward_slashes() {
        let base = PathBuf::from("/srv/app");
        let mut event = LogEvent::new("x").with_fields(fields!(
            file = PathBuf::from("/srv/app/test/file.txt"),
            elsewhere = PathBuf::from("/etc/hosts"),
        ));
        run(&PrettifyPaths::relative_to(base), &mut event).unwrap();
        assert_eq!(event.get("file"), Some(&FieldValue::from("test/file.txt")));
        assert_eq!(event.get("elsewhere"), Some(&FieldValue::from("/etc/hosts")));
    }

    #[test]
    fn exception_frames_are_bounded() {
        let renderer = ExceptionDictRenderer::default();
        let frames: Vec<u32> = (0..12).collect();
        assert_eq!(renderer.bounded(&frames), vec![0, 1, 2, 10, 11]);
        assert_eq!(renderer.bounded(&frames[..3]), vec![0, 1, 2]);
    }

    #[test]
    fn exception_dict_includes_causes() {
        let mut event = LogEvent::new("failed");
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        event.exc_info = Some(crate::record::ExceptionInfo::from_error(&err));
        run(&ExceptionDictRenderer::default(), &mut event).unwrap();
        let exception = event.get("exception").unwrap().to_json();
        assert_eq!(exception[0]["exc_type"], "Error");
        assert_eq!(exception[0]["exc_value"], "disk on fire");
        assert!(event.exc_info.is_none());
    }

    #[test]
    fn out_of_order_processors_are_rejected() {
        let result = Pipeline::builder()
            .processor(SimplifyEntities)
            .processor(AddLogLevel)
            .renderer(JsonRenderer)
            .build();
        assert!(matches!(result, Err(PipelineError::OutOfOrder { .. })));
    }

    #[test]
    fn renderer_is_required() {
        let result = Pipeline::builder().processor(AddLogLevel).build();
        assert!(matches!(result, Err(PipelineError::MissingRenderer)));
    }

    #[test]
    fn standard_pipeline_orders_exception_formatting_last() {
        let prod = Pipeline::for_config(
            &LoggingConfig::for_environment(Environment::Production),
            FailureReporter::stderr(),
        );
        assert_eq!(prod.processor_names().last(), Some(&"exception_dict"));

        let dev = Pipeline::for_config(&LoggingConfig::default(), FailureReporter::stderr());
        assert!(!dev.processor_names().contains(&"exception_dict"));
        assert_eq!(dev.processor_names()[0], "add_log_level");

        for pipeline in [prod, dev] {
            let stages = pipeline.stages();
            assert!(stages.windows(2).all(|w| w[0] <= w[1]));
        }
    }

    struct DropDebug;

    impl Processor for DropDebug {
        fn name(&self) -> &'static str {
            "drop_debug"
        }

        fn process(&self, _logger: &str, method: Method, _event: &mut LogEvent) -> Result<Action, ProcessorError> {
            Ok(if method == Method::Debug { Action::Drop } else { Action::Continue })
        }
    }

    #[test]
    fn processors_can_drop_events() {
        let pipeline = Pipeline::builder()
            .processor(DropDebug)
            .renderer(JsonRenderer)
            .build()
            .unwrap();
        assert!(pipeline.run("t", Method::Debug, LogEvent::new("x")).is_none());
        assert!(pipeline.run("t", Method::Info, LogEvent::new("x")).is_some());
    }

    #[test]
    fn processor_failure_does_not_stop_the_event() {
        let (reporter, failures) = FailureReporter::in_memory();
        let pipeline = Pipeline::builder()
            .processor(SimplifyEntities)
            .renderer(JsonRenderer)
            .reporter(reporter)
            .build()
            .unwrap();
        let event = LogEvent::new("still here").with_fields(fields!(
            user = FieldValue::entity(User { id: Some(1), detached: true }),
        ));
        let line = pipeline.run("t", Method::Info, event).unwrap();
        assert!(String::from_utf8(line).unwrap().contains("still here"));
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].processor, "simplify_entities");
    }

    struct Exploding;

    impl Processor for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn process(&self, _: &str, _: Method, event: &mut LogEvent) -> Result<Action, ProcessorError> {
            event.insert("touched", true);
            panic!("processor blew up");
        }
    }

    #[test]
    fn panicking_processor_is_reported_and_the_event_continues() {
        let (reporter, failures) = FailureReporter::in_memory();
        let pipeline = Pipeline::builder()
            .processor(Exploding)
            .renderer(JsonRenderer)
            .reporter(reporter)
            .build()
            .unwrap();
        let line = pipeline.run("t", Method::Info, LogEvent::new("survived")).unwrap();
        let data: serde_json::Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(data["event"], "survived");
        assert_eq!(data["touched"], true);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].processor, "exploding");
        assert!(failures[0].error.contains("processor blew up"));
    }

    fn render_unprintable<R: Renderer + 'static>(renderer: R) -> (Vec<u8>, Vec<String>) {
        let (reporter, failures) = FailureReporter::in_memory();
        let pipeline = Pipeline::builder()
            .renderer(renderer)
            .reporter(reporter)
            .build()
            .unwrap();
        let event = LogEvent::new("raw").with_fields(fields!(order = FieldValue::id(BrokenId)));
        let line = pipeline.run("t", Method::Info, event).unwrap();
        let reported = failures.lock().unwrap().iter().map(|f| f.processor.clone()).collect();
        (line, reported)
    }

    #[test]
    fn unprintable_id_reaching_a_renderer_falls_back_to_the_message() {
        for (line, reported) in [
            render_unprintable(JsonRenderer),
            render_unprintable(ConsoleRenderer::new(false)),
        ] {
            assert_eq!(line, b"raw");
            assert_eq!(reported, vec!["renderer".to_string()]);
        }
    }
}
