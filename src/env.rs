//! Environment variable names read by this crate, plus the classifier
//! that turns `PYTHON_ENV` into an [`Environment`].
//!
//! These are purely helpers; the pipeline itself only ever sees an
//! already-built [`crate::config::LoggingConfig`].

use std::fmt;
use std::str::FromStr;

/// Minimum level for the structured logger, e.g. `DEBUG` or `warning`.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Optional file that receives log output in non-production modes.
pub const LOG_PATH_ENV: &str = "PYTHON_LOG_PATH";

/// When truthy, the async runtime's own loggers are not silenced.
pub const ASYNC_DEBUG_ENV: &str = "PYTHONASYNCIODEBUG";

/// Presence (any value) disables ANSI colours.
pub const NO_COLOR_ENV: &str = "NO_COLOR";

/// Selects the [`Environment`].
pub const ENVIRONMENT_ENV: &str = "PYTHON_ENV";

/// Container application name, used by [`is_job_monitor`].
pub const CONTAINER_APP_NAME_ENV: &str = "CONTAINER_APP_NAME";

/// Set by CI providers.
pub const CI_ENV: &str = "CI";

const JOB_MONITOR_APP_NAME: &str = "prod-jmon";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read an environment variable as a boolean flag.
///
/// Unset, empty or unrecognised values are `false`.
pub fn env_flag(key: &str) -> bool {
    std::env::var(key).map(|v| parse_flag(&v)).unwrap_or(false)
}

/// `true` if the variable is set at all, regardless of its value.
pub fn env_present(key: &str) -> bool {
    std::env::var_os(key).is_some()
}

pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on" | "y" | "t"
    )
}

/// Deployment mode of the process. Read once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    /// Classify a configuration string. Unknown values fall back to
    /// [`Environment::Development`].
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    /// Classify the current process from `PYTHON_ENV`.
    pub fn from_env() -> Self {
        Self::parse(&env_or(ENVIRONMENT_ENV, "development"))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        *self == Environment::Production
    }

    pub fn is_staging(&self) -> bool {
        *self == Environment::Staging
    }

    pub fn is_test(&self) -> bool {
        *self == Environment::Test
    }

    pub fn is_development(&self) -> bool {
        *self == Environment::Development
    }

    /// Production and staging render JSON; everything else renders for a console.
    pub fn uses_json(&self) -> bool {
        self.is_production() || self.is_staging()
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Environment::parse(s))
    }
}

/// Running the test suite outside of CI.
pub fn is_local_testing(environment: Environment) -> bool {
    environment.is_test() && !env_flag(CI_ENV)
}

/// Whether this container is the production job monitor.
pub fn is_job_monitor() -> bool {
    env_or(CONTAINER_APP_NAME_ENV, "") == JOB_MONITOR_APP_NAME
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_environments_case_insensitively() {
        assert_eq!(Environment::parse("PRODUCTION"), Environment::Production);
        assert_eq!(Environment::parse("staging"), Environment::Staging);
        assert_eq!(Environment::parse(" Test "), Environment::Test);
        assert_eq!(Environment::parse("development"), Environment::Development);
    }

    #[test]
    fn unknown_environment_falls_back_to_development() {
        assert_eq!(Environment::parse("qa"), Environment::Development);
        assert_eq!(Environment::parse(""), Environment::Development);
        assert_eq!("nonsense".parse::<Environment>().unwrap(), Environment::Development);
    }

    #[test]
    fn json_rendering_only_for_deployed_modes() {
        assert!(Environment::Production.uses_json());
        assert!(Environment::Staging.uses_json());
        assert!(!Environment::Development.uses_json());
        assert!(!Environment::Test.uses_json());
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag("True"));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for env in [
            Environment::Development,
            Environment::Test,
            Environment::Staging,
            Environment::Production,
        ] {
            assert_eq!(Environment::parse(&env.to_string()), env);
        }
    }
}
