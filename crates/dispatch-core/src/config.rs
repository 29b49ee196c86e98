use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::models::{DispatchError, DispatchErrorKind, DispatchResult};

pub const DEBOUNCE_MS_ENV: &str = "DISPATCH_DEBOUNCE_MS";
pub const MAX_CONCURRENCY_ENV: &str = "DISPATCH_MAX_CONCURRENCY";
pub const GROUP_TIMEOUT_MS_ENV: &str = "DISPATCH_GROUP_TIMEOUT_MS";
pub const LOG_FILTER_ENV: &str = "DISPATCH_LOG";

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatchConfig {
    pub debounce_delay_ms: u64,
    pub worker_max_concurrency: Option<usize>,
    pub group_timeout_ms: Option<u64>,
    pub log_filter: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            debounce_delay_ms: 300,
            worker_max_concurrency: None,
            group_timeout_ms: None,
            log_filter: "info".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn from_json_str(raw: &str) -> DispatchResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|error| {
            DispatchError::new(
                DispatchErrorKind::InvalidInput,
                format!("invalid dispatch config: {error}"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `DISPATCH_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> DispatchResult<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> DispatchResult<Self> {
        if let Some(raw) = lookup(DEBOUNCE_MS_ENV) {
            self.debounce_delay_ms = parse_number(DEBOUNCE_MS_ENV, &raw)?;
        }
        if let Some(raw) = lookup(MAX_CONCURRENCY_ENV) {
            self.worker_max_concurrency = Some(parse_number(MAX_CONCURRENCY_ENV, &raw)?);
        }
        if let Some(raw) = lookup(GROUP_TIMEOUT_MS_ENV) {
            self.group_timeout_ms = Some(parse_number(GROUP_TIMEOUT_MS_ENV, &raw)?);
        }
        if let Some(raw) = lookup(LOG_FILTER_ENV) {
            self.log_filter = raw;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> DispatchResult<()> {
        if self.worker_max_concurrency == Some(0) {
            return Err(invalid_input(
                "worker_max_concurrency must be greater than zero when provided",
            ));
        }
        if self.group_timeout_ms == Some(0) {
            return Err(invalid_input(
                "group_timeout_ms must be greater than zero when provided",
            ));
        }
        EnvFilter::try_new(&self.log_filter).map_err(|error| {
            invalid_input(&format!(
                "log_filter '{}' is not a valid filter: {error}",
                self.log_filter
            ))
        })?;
        Ok(())
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn group_timeout(&self) -> Option<Duration> {
        self.group_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: &str) -> DispatchResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| invalid_input(&format!("{name} must be a non-negative integer, got '{raw}'")))
}

fn invalid_input(message: &str) -> DispatchError {
    DispatchError::new(DispatchErrorKind::InvalidInput, message)
}
