//! Server configuration: plain values consumed by the lifecycle at startup.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use trellis_core::Failure;

use crate::network::NetworkConfig;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server name, used in logs.
    pub name: String,
    /// Listen parameters for the transport adapter.
    pub network: NetworkConfig,
    /// How many times each warmup sample is dispatched.
    pub warmup_iterations: usize,
    /// Upper bound on waiting for in-flight dispatches during shutdown.
    pub drain_timeout: Duration,
    /// Deadline applied by servers that install a `TimeoutFilter` from config.
    pub default_request_timeout: Duration,
    /// Concurrency limit for servers that install a `LoadShedFilter` from config.
    pub max_concurrent_requests: usize,
    /// Named application flags.
    pub flags: Flags,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "trellis".to_string(),
            network: NetworkConfig::default(),
            warmup_iterations: 1,
            drain_timeout: Duration::from_secs(30),
            default_request_timeout: Duration::from_secs(30),
            max_concurrent_requests: 1000,
            flags: Flags::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
struct Flag {
    default: String,
    help: String,
    value: Option<String>,
}

/// Named flags with defaults, overridable by `name=value` assignments.
///
/// A flag must be defined before it can be set or read; reading returns the
/// assigned value, or the default when unassigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags {
    flags: BTreeMap<String, Flag>,
}

impl Flags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a flag.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if `name` is already defined.
    pub fn define(
        &mut self,
        name: impl Into<String>,
        default: impl fmt::Display,
        help: impl Into<String>,
    ) -> Result<&mut Self, Failure> {
        let name = name.into();
        if self.flags.contains_key(&name) {
            return Err(Failure::configuration(format!(
                "flag `{name}` is defined twice"
            )));
        }
        self.flags.insert(
            name,
            Flag {
                default: default.to_string(),
                help: help.into(),
                value: None,
            },
        );
        Ok(self)
    }

    /// Assigns a value to a defined flag.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if `name` is not defined.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<(), Failure> {
        let flag = self
            .flags
            .get_mut(name)
            .ok_or_else(|| Failure::configuration(format!("undefined flag `{name}`")))?;
        flag.value = Some(value.into());
        Ok(())
    }

    /// Current value: the assigned one, or the default.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.flags
            .get(name)
            .map(|flag| flag.value.as_deref().unwrap_or(&flag.default))
    }

    /// Parses the current value of `name`.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure if the flag is undefined or its
    /// value does not parse as `T`.
    pub fn parse<T>(&self, name: &str) -> Result<T, Failure>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self
            .get(name)
            .ok_or_else(|| Failure::configuration(format!("undefined flag `{name}`")))?;
        raw.parse().map_err(|e| {
            Failure::configuration(format!("invalid value `{raw}` for flag `{name}`: {e}"))
        })
    }

    /// Applies `name=value` assignments in order.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` failure for a malformed assignment or an
    /// undefined flag. Assignments before the bad one stay applied.
    pub fn apply_assignments<I, S>(&mut self, assignments: I) -> Result<(), Failure>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for assignment in assignments {
            let assignment = assignment.as_ref();
            let (name, value) = assignment.split_once('=').ok_or_else(|| {
                Failure::configuration(format!(
                    "flag assignment `{assignment}` must have the form name=value"
                ))
            })?;
            self.set(name.trim(), value.trim())?;
        }
        Ok(())
    }

    /// Iterates `(name, current value, help)` in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.flags.iter().map(|(name, flag)| {
            (
                name.as_str(),
                flag.value.as_deref().unwrap_or(&flag.default),
                flag.help.as_str(),
            )
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use trellis_core::FailureKind;

    use super::*;

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.name, "trellis");
        assert_eq!(config.warmup_iterations, 1);
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert_eq!(config.max_concurrent_requests, 1000);
        assert!(config.flags.is_empty());
    }

    #[test]
    fn flag_default_then_override() {
        let mut flags = Flags::new();
        flags.define("magicNum", 26, "magic number").unwrap();
        assert_eq!(flags.get("magicNum"), Some("26"));
        assert_eq!(flags.parse::<u32>("magicNum").unwrap(), 26);

        flags.apply_assignments(["magicNum=42"]).unwrap();
        assert_eq!(flags.parse::<u32>("magicNum").unwrap(), 42);
    }

    #[test]
    fn duplicate_and_undefined_flags_fail() {
        let mut flags = Flags::new();
        flags.define("a", "x", "").unwrap();
        assert_eq!(
            flags.define("a", "y", "").unwrap_err().kind(),
            FailureKind::Configuration
        );
        assert_eq!(
            flags.set("missing", "1").unwrap_err().kind(),
            FailureKind::Configuration
        );
        assert!(flags.get("missing").is_none());
    }

    #[test]
    fn malformed_assignment_and_bad_parse_fail() {
        let mut flags = Flags::new();
        flags.define("n", 1, "a number").unwrap();
        assert!(flags.apply_assignments(["n"]).is_err());

        flags.set("n", "not-a-number").unwrap();
        let err = flags.parse::<u32>("n").unwrap_err();
        assert_eq!(err.kind(), FailureKind::Configuration);
        assert!(err.message().contains("not-a-number"));
    }

    #[test]
    fn iter_reports_current_values_in_name_order() {
        let mut flags = Flags::new();
        flags
            .define("b", 2, "second")
            .unwrap()
            .define("a", 1, "first")
            .unwrap();
        flags.set("b", "20").unwrap();

        let listed: Vec<_> = flags.iter().collect();
        assert_eq!(listed, vec![("a", "1", "first"), ("b", "20", "second")]);
    }
}
