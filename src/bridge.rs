//! Routes foreign log output through the structured pipeline.
//!
//! `tracing` events reach [`PipelineLayer`] directly; records emitted with
//! the `log` facade are forwarded to `tracing` by [`install_log_bridge`] and
//! end up in the same layer. Panics are logged by the hook from
//! [`install_panic_hook`].

use crate::config::{LoggingConfig, ASYNC_RUNTIME_TARGETS};
use crate::context::ContextMap;
use crate::error::InitError;
use crate::fields;
use crate::logger::Logger;
use crate::record::{
    debug_type_name, panic_message, ExceptionInfo, FieldValue, Level, LogEvent, Method,
};
use std::error::Error;
use std::fmt;
use std::panic::{self, PanicHookInfo};
use std::sync::RwLock;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_log::{LogTracer, NormalizeEvent};
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// `tracing_subscriber` layer that renders every event with the logger's
/// pipeline and writer.
///
/// The event target becomes the `logger` field. Fields of enclosing spans
/// are merged in, the event's own fields taking precedence.
pub struct PipelineLayer {
    logger: Logger,
}

impl PipelineLayer {
    pub fn new(logger: Logger) -> Self {
        Self { logger }
    }
}

/// Fields recorded on a span, kept in its extensions.
struct SpanFields(ContextMap);

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.into_fields()));
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut visitor = FieldVisitor::default();
        values.record(&mut visitor);
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<SpanFields>() {
            Some(SpanFields(fields)) => fields.extend(visitor.into_fields()),
            None => extensions.insert(SpanFields(visitor.into_fields())),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        // `log` records carry their real target and location in fields.
        let normalized = event.normalized_metadata();
        let meta = normalized.as_ref().unwrap_or_else(|| event.metadata());
        let target = meta.target();

        let level = Level::from(*meta.level());
        if level < self.logger.config().effective_level(target) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut log_event = LogEvent::new(visitor.message.take().unwrap_or_default());
        log_event.stack_info = visitor.stack_info;
        log_event.exc_info = visitor.exc_info.take();
        log_event.fields = visitor.into_fields();

        if let Some(scope) = ctx.event_scope(event) {
            // Leaf first, so inner spans shadow outer ones.
            for span in scope {
                if let Some(SpanFields(fields)) = span.extensions().get::<SpanFields>() {
                    for (key, value) in fields {
                        log_event.set_default(key.clone(), value.clone());
                    }
                }
            }
        }
        log_event.set_default("logger_name", target);

        let method = if log_event.exc_info.is_some() && level == Level::Error {
            Method::Exception
        } else {
            Method::from(level)
        };
        self.logger.emit(target, method, log_event);
    }
}

#[derive(Default)]
struct FieldVisitor {
    fields: ContextMap,
    message: Option<String>,
    stack_info: bool,
    exc_info: Option<ExceptionInfo>,
}

impl FieldVisitor {
    fn into_fields(self) -> ContextMap {
        self.fields
    }

    fn insert(&mut self, field: &Field, value: FieldValue) {
        let name = field.name();
        // Location metadata of bridged `log` records.
        if name.starts_with("log.") {
            return;
        }
        self.fields.insert(name.to_string(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.insert(field, FieldValue::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, FieldValue::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, FieldValue::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, FieldValue::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "stack_info" {
            self.stack_info = value;
        } else {
            self.insert(field, FieldValue::from(value));
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if self.exc_info.is_none() {
            self.exc_info = Some(ExceptionInfo::from_dyn(debug_type_name(value), value));
        }
        self.insert(field, FieldValue::from(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        } else {
            self.insert(field, FieldValue::from(format!("{:?}", value)));
        }
    }
}

/// Per-target filter applying the configured level, the noisy-logger
/// demotions and the async runtime's own threshold.
pub fn target_filter(config: &LoggingConfig) -> Targets {
    let mut targets = Targets::new().with_default(level_filter(config.level));

    let overridden = config
        .logger_overrides
        .iter()
        .map(|o| o.target.as_str())
        .chain(ASYNC_RUNTIME_TARGETS.iter().copied());
    for target in overridden {
        targets = targets.with_target(target, level_filter(config.effective_level(target)));
    }
    targets
}

fn level_filter(level: Level) -> LevelFilter {
    LevelFilter::from_level(level.to_tracing())
}

/// Forward records of the `log` facade to `tracing`.
pub fn install_log_bridge() -> Result<(), InitError> {
    LogTracer::init()?;
    Ok(())
}

static PANIC_LOGGER: RwLock<Option<Logger>> = RwLock::new(None);

/// Log panics at critical level through `logger`, then run the previously
/// installed hook.
///
/// Installing again swaps the logger and logs a warning instead of
/// stacking another hook. A hook set later with [`std::panic::set_hook`]
/// replaces this one silently; that is not detected.
pub fn install_panic_hook(logger: &Logger) {
    let replaced = {
        let mut slot = PANIC_LOGGER.write().unwrap_or_else(|e| e.into_inner());
        slot.replace(logger.clone()).is_some()
    };
    if replaced {
        logger.warning("panic hook has been overridden", fields!());
        return;
    }

    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Ok(slot) = PANIC_LOGGER.read() {
            if let Some(logger) = slot.as_ref() {
                log_panic(logger, info);
            }
        }
        previous(info);
    }));
}

fn log_panic(logger: &Logger, info: &PanicHookInfo<'_>) {
    let mut event = LogEvent::new("uncaught panic");
    event.exc_info = Some(ExceptionInfo::from_message("panic", panic_message(info.payload())));
    if let Some(location) = info.location() {
        event.insert("location", format!("{}:{}", location.file(), location.line()));
    }
    if let Some(name) = std::thread::current().name() {
        event.insert("thread", name);
    }
    logger.log_event(Method::Critical, event);
}
