use std::fmt::{Display, Formatter};
use std::time::Duration;

use thiserror::Error;

/// Largest power of two applied to an exponential base delay.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Delay strategy between two attempts of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    /// Retry as soon as a worker is free.
    #[default]
    None,
    /// Wait the same delay before every retry.
    Fixed(Duration),
    /// Wait `base * 2^(attempts_made - 1)` before the next retry.
    Exponential(Duration),
}

impl Backoff {
    /// Delay to wait after `attempts_made` attempts have failed.
    pub fn delay_for_attempt(&self, attempts_made: i16) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) => *delay,
            Backoff::Exponential(base) => {
                let exponent = (attempts_made.max(1) as u32 - 1).min(MAX_BACKOFF_EXPONENT);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }

    pub fn backoff_type(&self) -> BackoffType {
        match self {
            Backoff::None => BackoffType::None,
            Backoff::Fixed(_) => BackoffType::Fixed,
            Backoff::Exponential(_) => BackoffType::Exponential,
        }
    }

    pub fn base_delay(&self) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(delay) | Backoff::Exponential(delay) => *delay,
        }
    }

    /// Rebuilds a backoff from its stored columns.
    pub fn from_parts(backoff_type: BackoffType, delay_ms: i64) -> Backoff {
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        match backoff_type {
            BackoffType::None => Backoff::None,
            BackoffType::Fixed => Backoff::Fixed(delay),
            BackoffType::Exponential => Backoff::Exponential(delay),
        }
    }
}

/// Discriminant of [`Backoff`] as persisted in the `backoff_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackoffType {
    #[default]
    None,
    Fixed,
    Exponential,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown backoff type '{0}'")]
pub struct UnknownBackoffTypeError(pub String);

impl BackoffType {
    pub const fn as_str(self) -> &'static str {
        match self {
            BackoffType::None => "none",
            BackoffType::Fixed => "fixed",
            BackoffType::Exponential => "exponential",
        }
    }
}

impl Display for BackoffType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for BackoffType {
    type Error = UnknownBackoffTypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "none" => Ok(BackoffType::None),
            "fixed" => Ok(BackoffType::Fixed),
            "exponential" => Ok(BackoffType::Exponential),
            _ => Err(UnknownBackoffTypeError(value)),
        }
    }
}

/// How many times a job may run and how long to wait between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i16,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn new(max_attempts: i16, backoff: Backoff) -> Self {
        RetryPolicy {
            max_attempts,
            backoff,
        }
    }
}
