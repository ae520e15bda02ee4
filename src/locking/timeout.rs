// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{Result, TableLockError};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_FAST_FAIL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 5;

/// Timing knobs for the acquisition loop.
///
/// `fast_fail_timeout` bounds each `LOCK TABLE` attempt and is also the minimum
/// age of a transaction reported as a blocker. After a timed-out attempt the
/// loop sleeps `fast_fail_timeout * retry_multiplier`. `poll_interval` is the
/// sleep between blocker scans and defaults to the fast-fail timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    fast_fail_timeout: Duration,
    retry_multiplier: u32,
    poll_interval: Duration,
}

impl LockSettings {
    pub fn new(fast_fail_timeout: Duration, retry_multiplier: u32) -> Result<Self> {
        if fast_fail_timeout.is_zero() {
            return Err(TableLockError::InvalidConfig(
                "fast-fail timeout must be greater than zero".to_string(),
            ));
        }
        if retry_multiplier == 0 {
            return Err(TableLockError::InvalidConfig(
                "retry_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            fast_fail_timeout,
            retry_multiplier,
            poll_interval: fast_fail_timeout,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn fast_fail_timeout(&self) -> Duration {
        self.fast_fail_timeout
    }

    pub fn retry_multiplier(&self) -> u32 {
        self.retry_multiplier
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Sleep after a timed-out lock attempt.
    pub fn retry_delay(&self) -> Duration {
        self.fast_fail_timeout.saturating_mul(self.retry_multiplier)
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            fast_fail_timeout: DEFAULT_FAST_FAIL_TIMEOUT,
            retry_multiplier: DEFAULT_RETRY_MULTIPLIER,
            poll_interval: DEFAULT_FAST_FAIL_TIMEOUT,
        }
    }
}

/// Source precedence used when resolving the effective fast-fail timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockTimeoutSource {
    #[default]
    Default,
    Config,
    Cli,
}

impl fmt::Display for LockTimeoutSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            LockTimeoutSource::Default => "built-in default",
            LockTimeoutSource::Config => "configuration",
            LockTimeoutSource::Cli => "CLI flag",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeoutResolution {
    pub value: Duration,
    pub source: LockTimeoutSource,
}

/// Error produced when parsing a timeout override fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeoutParseError {
    message: String,
}

impl fmt::Display for LockTimeoutParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LockTimeoutParseError {}

impl LockTimeoutParseError {
    fn invalid_value(value: &str) -> Self {
        Self {
            message: format!(
                "Lock timeout value '{value}' is invalid. Use a positive number of milliseconds, \
                 optionally suffixed with 'ms' or 's'."
            ),
        }
    }
}

impl From<LockTimeoutParseError> for TableLockError {
    fn from(err: LockTimeoutParseError) -> Self {
        TableLockError::InvalidConfig(err.to_string())
    }
}

/// Parses `500`, `500ms` or `5s` into a non-zero duration.
pub fn parse_timeout_override(value: &str) -> std::result::Result<Duration, LockTimeoutParseError> {
    let trimmed = value.trim();
    let parsed = if let Some(millis) = trimmed.strip_suffix("ms") {
        millis.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = trimmed.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else {
        trimmed.parse::<u64>().ok().map(Duration::from_millis)
    };

    match parsed {
        Some(duration) if !duration.is_zero() => Ok(duration),
        _ => Err(LockTimeoutParseError::invalid_value(trimmed)),
    }
}

/// Resolves the effective timeout based on CLI > config > default precedence.
pub struct LockTimeoutResolver<'a> {
    cli_override: Option<&'a str>,
    config_value: Duration,
    default_value: Duration,
}

impl<'a> LockTimeoutResolver<'a> {
    pub fn new(cli_override: Option<&'a str>, config_value: Duration, default_value: Duration) -> Self {
        Self {
            cli_override,
            config_value,
            default_value,
        }
    }

    pub fn resolve(self) -> std::result::Result<LockTimeoutResolution, LockTimeoutParseError> {
        if let Some(cli_value) = self.cli_override {
            let value = parse_timeout_override(cli_value)?;
            return Ok(LockTimeoutResolution {
                value,
                source: LockTimeoutSource::Cli,
            });
        }

        if self.config_value != self.default_value {
            return Ok(LockTimeoutResolution {
                value: self.config_value,
                source: LockTimeoutSource::Config,
            });
        }

        Ok(LockTimeoutResolution {
            value: self.default_value,
            source: LockTimeoutSource::Default,
        })
    }
}

/// Server-side setting that bounds a single lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutSetting {
    LockTimeout,
    /// Servers older than 9.3 have no `lock_timeout`.
    StatementTimeout,
}

impl TimeoutSetting {
    pub fn name(&self) -> &'static str {
        match self {
            TimeoutSetting::LockTimeout => "lock_timeout",
            TimeoutSetting::StatementTimeout => "statement_timeout",
        }
    }

    pub fn show_sql(&self) -> String {
        format!("SHOW {}", self.name())
    }

    pub fn set_sql(&self, timeout: Duration) -> String {
        format!("SET {} = '{}ms'", self.name(), timeout.as_millis())
    }

    /// Restores a value previously read with `SHOW`.
    pub fn restore_sql(&self, previous: &str) -> String {
        format!("SET {} = '{}'", self.name(), previous.replace('\'', "''"))
    }
}

pub fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.1}s", duration.as_secs_f32())
    } else {
        format!("{:.0}ms", duration.as_millis())
    }
}
