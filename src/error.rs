use std::io;

/// Error type returned by [`crate::init::configure_logger_with`].
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("a global tracing subscriber is already installed")]
    SubscriberAlreadySet(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("log bridge could not be installed: {0}")]
    LogBridge(#[from] log::SetLoggerError),

    /// Not returned: logged as a warning when the logger falls back to stdout.
    #[error("could not open log file {path}: {source}")]
    LogFile {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Error raised by a processor while transforming an event.
///
/// These never reach the caller of a log method; the pipeline hands them
/// to the failure reporter.
#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    #[error("could not simplify field `{field}`: {source}")]
    Entity {
        field: String,
        #[source]
        source: EntityError,
    },

    #[error("identifier in field `{field}` could not be formatted")]
    Unprintable { field: String },

    #[error("could not serialize event: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("could not format event: {0}")]
    Format(#[from] std::fmt::Error),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Error returned by a detached-safe entity accessor.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EntityError {
    #[error("attribute `{0}` expired and is not loaded")]
    Expired(String),

    #[error("entity is detached from its session")]
    Detached,

    #[error("attribute state lock poisoned")]
    Poisoned,
}

/// Error returned when assembling a [`crate::processor::Pipeline`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("pipeline has no renderer")]
    MissingRenderer,

    #[error("processor `{processor}` ({stage:?}) must run before `{previous}` ({previous_stage:?})")]
    OutOfOrder {
        processor: String,
        stage: crate::processor::Stage,
        previous: String,
        previous_stage: crate::processor::Stage,
    },
}
