use crate::env::{
    env_flag, env_or, env_present, Environment, ASYNC_DEBUG_ENV, LOG_LEVEL_ENV, LOG_PATH_ENV,
    NO_COLOR_ENV,
};
use crate::record::Level;
use std::path::PathBuf;

/// A library logger that is too chatty by default, or that was set up
/// before our logging is initialized.
///
/// **Fields**
/// - `target`: `tracing`/`log` target prefix, e.g. `reqwest`.
/// - `demotions`: `(configured, effective)` pairs. When the process log
///   level equals `configured`, this target is filtered at `effective`
///   instead. An override without demotions is still routed through the
///   pipeline but keeps the process level.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggerOverride {
    pub target: String,
    pub demotions: Vec<(Level, Level)>,
}

impl LoggerOverride {
    pub fn new(target: impl Into<String>) -> Self {
        LoggerOverride {
            target: target.into(),
            demotions: Vec::new(),
        }
    }

    pub fn demote(mut self, from: Level, to: Level) -> Self {
        self.demotions.push((from, to));
        self
    }

    /// Level this target is filtered at when the process runs at `level`.
    pub fn level_for(&self, level: Level) -> Level {
        self.demotions
            .iter()
            .find(|(from, _)| *from == level)
            .map(|(_, to)| *to)
            .unwrap_or(level)
    }
}

/// Targets emitted by the async runtime itself.
pub const ASYNC_RUNTIME_TARGETS: &[&str] = &["tokio", "runtime"];

/// Noisy library loggers adjusted by default.
pub fn default_logger_overrides() -> Vec<LoggerOverride> {
    vec![
        LoggerOverride::new("hyper"),
        LoggerOverride::new("reqwest").demote(Level::Info, Level::Warning),
        LoggerOverride::new("rustls").demote(Level::Info, Level::Warning),
    ]
}

/// Logging configuration, built once at process start.
///
/// **Fields**
/// - `environment`: selects the renderer (JSON for production/staging,
///   console otherwise) and the output writer.
/// - `level`: minimum level for emitted events.
/// - `log_path`: append console output to this file instead of stdout.
///   Ignored in production and staging.
/// - `no_color`: disable ANSI colours in the console renderer.
/// - `async_runtime_debug`: keep the async runtime's own loggers at the
///   process level instead of holding them to warnings.
/// - `logger_overrides`: noisy library loggers and their demotions.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub environment: Environment,
    pub level: Level,
    pub log_path: Option<PathBuf>,
    pub no_color: bool,
    pub async_runtime_debug: bool,
    pub logger_overrides: Vec<LoggerOverride>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Development)
    }
}

impl LoggingConfig {
    /// Defaults for `environment` without reading any variable.
    pub fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            level: Level::Info,
            log_path: None,
            no_color: false,
            async_runtime_debug: false,
            logger_overrides: default_logger_overrides(),
        }
    }

    /// Read the configuration from the process environment.
    ///
    /// Unset or invalid values fall back to their defaults; this never fails.
    pub fn from_env() -> Self {
        let environment = Environment::from_env();
        let level = Level::parse(&env_or(LOG_LEVEL_ENV, "INFO")).unwrap_or(Level::Info);
        let log_path = std::env::var_os(LOG_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Self {
            level,
            log_path,
            no_color: env_present(NO_COLOR_ENV),
            async_runtime_debug: env_flag(ASYNC_DEBUG_ENV),
            ..Self::for_environment(environment)
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_no_color(mut self, no_color: bool) -> Self {
        self.no_color = no_color;
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn colors(&self) -> bool {
        !self.no_color
    }

    /// The file console output is redirected to, if any.
    pub fn effective_log_path(&self) -> Option<&PathBuf> {
        if self.environment.uses_json() {
            None
        } else {
            self.log_path.as_ref()
        }
    }

    /// Level a given target is filtered at, after overrides.
    ///
    /// The most specific matching override wins.
    pub fn effective_level(&self, target: &str) -> Level {
        if !self.async_runtime_debug
            && ASYNC_RUNTIME_TARGETS
                .iter()
                .any(|t| target_matches(t, target))
        {
            return self.level.max(Level::Warning);
        }

        self.logger_overrides
            .iter()
            .filter(|o| target_matches(&o.target, target))
            .max_by_key(|o| o.target.len())
            .map(|o| o.level_for(self.level))
            .unwrap_or(self.level)
    }
}

fn target_matches(prefix: &str, target: &str) -> bool {
    target == prefix
        || target
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::"))
}
