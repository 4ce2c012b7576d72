use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::ValidationError;

/// Instant stored and rendered in UTC.
///
/// Inputs with another offset are shifted to UTC on parse, so ordering and
/// equality always compare the same clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UtcDateTime(OffsetDateTime);

impl UtcDateTime {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        OffsetDateTime::parse(input.trim(), &Rfc3339)
            .map(|parsed| Self(parsed.to_offset(UtcOffset::UTC)))
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: input.to_owned(),
            })
    }

    pub fn from_unix_seconds(seconds: i64) -> Result<Self, ValidationError> {
        OffsetDateTime::from_unix_timestamp(seconds)
            .map(Self)
            .map_err(|_| ValidationError::InvalidTimestamp {
                value: seconds.to_string(),
            })
    }

    /// Saturates at the calendar bounds of `time`.
    pub fn saturating_add(self, duration: Duration) -> Self {
        let delta = time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
        Self(
            self.0
                .checked_add(delta)
                .unwrap_or_else(|| PrimitiveDateTime::MAX.assume_utc()),
        )
    }

    pub fn saturating_sub(self, duration: Duration) -> Self {
        let delta = time::Duration::try_from(duration).unwrap_or(time::Duration::MAX);
        Self(
            self.0
                .checked_sub(delta)
                .unwrap_or_else(|| PrimitiveDateTime::MIN.assume_utc()),
        )
    }

    /// Elapsed time from `earlier` to `self`, zero when `earlier` is later.
    pub fn duration_since(self, earlier: Self) -> Duration {
        Duration::try_from(self.0 - earlier.0).unwrap_or(Duration::ZERO)
    }

    pub fn format_rfc3339(self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }
}

impl fmt::Display for UtcDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_rfc3339())
    }
}

impl TryFrom<String> for UtcDateTime {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UtcDateTime> for String {
    fn from(value: UtcDateTime) -> Self {
        value.format_rfc3339()
    }
}
