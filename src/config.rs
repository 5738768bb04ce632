//! Registry configuration.
//!
//! [`Config`] controls the optional behaviours of a [`Registry`](crate::Registry):
//! strict validation of listener keys and the dispatch journal. Values can be
//! set in code with the builder methods or read from the environment (and an
//! optional `.env` file) with [`Config::from_env`].

use crate::error::{OpbusError, Result};

/// Environment variable enabling strict listener validation.
pub const ENV_STRICT_LISTENERS: &str = "OPBUS_STRICT_LISTENERS";

/// Environment variable setting the dispatch journal capacity.
pub const ENV_JOURNAL_CAPACITY: &str = "OPBUS_JOURNAL_CAPACITY";

/// Configuration for a [`Registry`](crate::Registry)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    /// Reject start listeners on unregistered argument types and finish
    /// listeners on unregistered result types.
    pub strict_listeners: bool,
    /// Number of dispatch records kept by the journal. Zero disables it.
    pub journal_capacity: usize,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Unset variables keep their default values.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_STRICT_LISTENERS) {
            config.strict_listeners = parse_flag(ENV_STRICT_LISTENERS, &raw)?;
        }

        if let Some(raw) = lookup(ENV_JOURNAL_CAPACITY) {
            config.journal_capacity = raw.trim().parse().map_err(|_| {
                OpbusError::ConfigError(format!(
                    "{} must be an unsigned integer, got {:?}",
                    ENV_JOURNAL_CAPACITY, raw
                ))
            })?;
        }

        Ok(config)
    }

    pub fn with_strict_listeners(mut self, strict: bool) -> Self {
        self.strict_listeners = strict;
        self
    }

    pub fn with_journal_capacity(mut self, capacity: usize) -> Self {
        self.journal_capacity = capacity;
        self
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(OpbusError::ConfigError(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}
