use crate::bridge::{install_log_bridge, install_panic_hook, target_filter, PipelineLayer};
use crate::config::LoggingConfig;
use crate::error::InitError;
use crate::fields;
use crate::logger::Logger;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// Configure logging from the process environment.
///
/// **Behavior**
///
/// Equivalent to calling [`configure_logger_with`] with
/// [`LoggingConfig::from_env`]. This is the recommended entrypoint for
/// typical services.
pub fn configure_logger() -> Result<Logger, InitError> {
    configure_logger_with(LoggingConfig::from_env())
}

/// Build the logger for `config` and make it the process-wide default.
///
/// **Parameters**
/// - `config`: environment, level, output and noisy-logger overrides.
///
/// **Effects**
///
/// - installs a [`Registry`] combined with a filtered [`PipelineLayer`] as
///   the global `tracing` subscriber, so `tracing` events render exactly
///   like calls on the returned [`Logger`];
/// - forwards the `log` facade into that subscriber. If another `log`
///   implementation is already registered, a warning is logged and
///   configuration continues;
/// - logs panics at critical level.
///
/// A log file that cannot be opened is not an error: output goes to stdout
/// and the first line is a warning naming the file.
///
/// **Errors**
///
/// [`InitError::SubscriberAlreadySet`] if a global subscriber exists.
pub fn configure_logger_with(config: LoggingConfig) -> Result<Logger, InitError> {
    let logger = Logger::new(config)?;
    install_global(&logger)?;

    if let Err(err) = install_log_bridge() {
        logger.warning(
            "log records are not bridged",
            fields!(error = err.to_string()),
        );
    }
    install_panic_hook(&logger);

    Ok(logger)
}

/// Install `logger` as the global `tracing` subscriber only.
pub fn install_global(logger: &Logger) -> Result<(), InitError> {
    let layer = PipelineLayer::new(logger.clone()).with_filter(target_filter(logger.config()));
    let subscriber = Registry::default().with(layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
