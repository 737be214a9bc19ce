//! # Settings
//!
//! Process-level configuration that is not part of the route DSL.

use std::env;
use std::fmt;

/// Environment variable selecting the runtime environment
pub const ENV_VAR: &str = "GALETTE_ENV";

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Local development (default)
    #[default]
    Development,
    /// Test suites
    Test,
    /// Deployed service
    Production,
}

impl Environment {
    /// Read the environment from `GALETTE_ENV`
    ///
    /// Unset or unrecognized values select `Development`.
    #[must_use]
    pub fn from_env() -> Self {
        env::var(ENV_VAR).map_or(Self::Development, |value| Self::parse(&value))
    }

    /// Parse an environment name
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "test" => Self::Test,
            _ => Self::Development,
        }
    }

    /// Whether this is the production environment
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        };
        f.write_str(name)
    }
}

/// API-wide settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Runtime environment
    pub environment: Environment,
    /// Include backtraces in unhandled-fault payloads
    pub expose_backtrace: bool,
}

impl Settings {
    /// Settings for an environment; backtraces are exposed outside
    /// production
    #[must_use]
    pub const fn for_environment(environment: Environment) -> Self {
        Self {
            environment,
            expose_backtrace: !environment.is_production(),
        }
    }

    /// Settings from the process environment
    #[must_use]
    pub fn from_env() -> Self {
        Self::for_environment(Environment::from_env())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_env()
    }
}
