//! Cron schedule wrapper: a parsed expression bound to a time zone.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::error::TimerError;

/// An immutable cron schedule. Occurrences are evaluated in the schedule's
/// time zone and reported as UTC timestamps.
///
/// The expression uses the 6-field form understood by the `cron` crate
/// (`sec min hour day-of-month month day-of-week`, with an optional seventh
/// year field). Standard 5-field expressions are accepted as well and are
/// normalized by prepending a `0` seconds field.
#[derive(Debug, Clone)]
pub struct Schedule {
    expression: String,
    inner: cron::Schedule,
    zone: Tz,
}

impl Schedule {
    /// Parse `expression` and bind it to `zone`.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::InvalidExpression`] when the expression cannot
    /// be parsed.
    pub fn parse(expression: impl Into<String>, zone: Tz) -> Result<Self, TimerError> {
        let expression = normalize(&expression.into());
        let inner = cron::Schedule::from_str(&expression)?;
        Ok(Schedule {
            expression,
            inner,
            zone,
        })
    }

    /// Parse `expression` evaluated in UTC.
    pub fn parse_utc(expression: impl Into<String>) -> Result<Self, TimerError> {
        Self::parse(expression, chrono_tz::UTC)
    }

    /// The normalized expression this schedule was parsed from.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The time zone occurrences are evaluated in.
    pub fn zone(&self) -> Tz {
        self.zone
    }

    /// The next occurrence strictly after `after`, or `None` when the
    /// schedule has no future occurrence. Evaluated fresh on every call.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = after.with_timezone(&self.zone);
        self.inner
            .after(&local)
            .next()
            .map(|occurrence| occurrence.with_timezone(&Utc))
    }
}

/// Normalize a standard 5-field cron expression to the 6-field form by
/// prepending a seconds field. 6- and 7-field expressions pass through.
fn normalize(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}
