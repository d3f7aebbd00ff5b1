//! Dispatcher configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Settings for building a [`Dispatcher`](crate::Dispatcher).
///
/// Deserializable so it can be embedded in a larger service config; missing
/// fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Label used in log records.
    pub id: String,

    /// Number of worker tasks. Must be at least 1.
    pub workers: usize,

    /// Buffered tasks before `submit` waits. 0 means direct hand-off.
    pub queue_capacity: usize,

    /// Default limit for `submit`. `None` waits indefinitely.
    pub submit_timeout_ms: Option<u64>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            workers: 4,
            queue_capacity: 64,
            submit_timeout_ms: None,
        }
    }
}

impl DispatcherConfig {
    /// Read settings from `{prefix}_ID`, `{prefix}_WORKERS`,
    /// `{prefix}_QUEUE_CAPACITY` and `{prefix}_SUBMIT_TIMEOUT_MS`.
    /// Unset variables keep their defaults.
    pub fn from_env(prefix: &str) -> Result<Self, DispatchError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    fn from_lookup(
        prefix: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, DispatchError> {
        let var = |name: &str| lookup(&format!("{prefix}_{name}"));
        let mut config = Self::default();

        if let Some(id) = var("ID") {
            config.id = id;
        }
        if let Some(raw) = var("WORKERS") {
            config.workers = parse_number(prefix, "WORKERS", &raw)?;
        }
        if let Some(raw) = var("QUEUE_CAPACITY") {
            config.queue_capacity = parse_number(prefix, "QUEUE_CAPACITY", &raw)?;
        }
        if let Some(raw) = var("SUBMIT_TIMEOUT_MS") {
            config.submit_timeout_ms = Some(parse_number(prefix, "SUBMIT_TIMEOUT_MS", &raw)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.workers == 0 {
            return Err(DispatchError::InvalidConfig(format!(
                "dispatcher `{}` needs at least one worker",
                self.id
            )));
        }
        if self.submit_timeout_ms == Some(0) {
            return Err(DispatchError::InvalidConfig(format!(
                "dispatcher `{}` submit timeout must be greater than zero",
                self.id
            )));
        }
        Ok(())
    }

    pub fn submit_timeout(&self) -> Option<Duration> {
        self.submit_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number<T: std::str::FromStr>(
    prefix: &str,
    name: &str,
    raw: &str,
) -> Result<T, DispatchError> {
    raw.trim().parse().map_err(|_| {
        DispatchError::InvalidConfig(format!("{prefix}_{name}: expected a number, got `{raw}`"))
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rstest::rstest;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = DispatcherConfig::from_lookup("APP", lookup(&[])).unwrap();
        assert_eq!(config, DispatcherConfig::default());
    }

    #[test]
    fn reads_prefixed_variables() {
        let config = DispatcherConfig::from_lookup(
            "APP",
            lookup(&[
                ("APP_ID", "ingest"),
                ("APP_WORKERS", "10"),
                ("APP_QUEUE_CAPACITY", " 0 "),
                ("APP_SUBMIT_TIMEOUT_MS", "1500"),
            ]),
        )
        .unwrap();

        assert_eq!(config.id, "ingest");
        assert_eq!(config.workers, 10);
        assert_eq!(config.queue_capacity, 0);
        assert_eq!(config.submit_timeout(), Some(Duration::from_millis(1500)));
    }

    #[rstest]
    #[case::not_a_number(&[("APP_WORKERS", "many")])]
    #[case::negative(&[("APP_QUEUE_CAPACITY", "-1")])]
    #[case::zero_workers(&[("APP_WORKERS", "0")])]
    #[case::zero_timeout(&[("APP_SUBMIT_TIMEOUT_MS", "0")])]
    fn rejects_bad_values(#[case] vars: &[(&str, &str)]) {
        let err = DispatcherConfig::from_lookup("APP", lookup(vars)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidConfig(_)));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: DispatcherConfig =
            serde_json::from_str(r#"{"id":"mail","workers":2}"#).unwrap();
        assert_eq!(config.id, "mail");
        assert_eq!(config.workers, 2);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(config.submit_timeout_ms, None);
    }
}
