//! Calendar expressions and next-fire evaluation.
//!
//! An expression has five whitespace-separated fields:
//! `minute hour day-of-month month day-of-week`. Each field is either `*` or
//! a single value. Day-of-week runs 0-7 with both 0 and 7 meaning Sunday.
//! Every field that is not `*` must match. `@hourly`, `@daily`, `@midnight`,
//! `@weekly` and `@monthly` are accepted as shortcuts.

use std::fmt;
use std::str::FromStr;

use batchsettle_common::{SettleError, Timestamp};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors raised while parsing a calendar expression.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CalendarError {
    #[error("Calendar expression is empty")]
    Empty,

    #[error("Expected 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Expression '{0}' never fires")]
    NeverFires(String),

    #[error("Unknown shortcut '{0}'")]
    UnknownShortcut(String),
}

impl From<CalendarError> for SettleError {
    fn from(e: CalendarError) -> Self {
        SettleError::invalid("expression", e.to_string())
    }
}

/// One field of a calendar expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalendarField {
    /// `*`: every value.
    Any,
    /// A single value.
    At(u32),
}

impl CalendarField {
    fn parse(field: &'static str, value: &str, min: u32, max: u32) -> Result<Self, CalendarError> {
        if value == "*" {
            return Ok(CalendarField::Any);
        }

        let parsed: u32 = value.parse().map_err(|_| CalendarError::InvalidField {
            field,
            value: value.to_string(),
            reason: "expected '*' or a number".to_string(),
        })?;

        if parsed < min || parsed > max {
            return Err(CalendarError::InvalidField {
                field,
                value: value.to_string(),
                reason: format!("must be between {min} and {max}"),
            });
        }

        Ok(CalendarField::At(parsed))
    }

    fn to_cron(self) -> String {
        match self {
            CalendarField::Any => "*".to_string(),
            CalendarField::At(v) => v.to_string(),
        }
    }
}

const WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A parsed calendar expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarExpression {
    source: String,
    pub minute: CalendarField,
    pub hour: CalendarField,
    pub day_of_month: CalendarField,
    pub month: CalendarField,
    pub day_of_week: CalendarField,
}

impl CalendarExpression {
    /// Parse an expression or shortcut.
    pub fn parse(expression: &str) -> Result<Self, CalendarError> {
        let source = expression.trim();
        if source.is_empty() {
            return Err(CalendarError::Empty);
        }

        let fields = match source {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            other if other.starts_with('@') => {
                return Err(CalendarError::UnknownShortcut(other.to_string()))
            }
            other => other,
        };

        let parts: Vec<&str> = fields.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(CalendarError::FieldCount(parts.len()));
        }

        let expression = Self {
            source: source.to_string(),
            minute: CalendarField::parse("minute", parts[0], 0, 59)?,
            hour: CalendarField::parse("hour", parts[1], 0, 23)?,
            day_of_month: CalendarField::parse("day-of-month", parts[2], 1, 31)?,
            month: CalendarField::parse("month", parts[3], 1, 12)?,
            day_of_week: CalendarField::parse("day-of-week", parts[4], 0, 7)?,
        };

        if !expression.can_fire() {
            return Err(CalendarError::NeverFires(expression.source));
        }

        Ok(expression)
    }

    /// Every hour on the hour.
    pub fn hourly() -> Self {
        Self {
            source: "@hourly".to_string(),
            minute: CalendarField::At(0),
            hour: CalendarField::Any,
            day_of_month: CalendarField::Any,
            month: CalendarField::Any,
            day_of_week: CalendarField::Any,
        }
    }

    /// The expression as written.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Six-field `cron` form with seconds pinned to zero.
    pub fn to_cron(&self) -> String {
        let day_of_week = match self.day_of_week {
            CalendarField::Any => "*".to_string(),
            CalendarField::At(d) => WEEKDAYS[(d % 7) as usize].to_string(),
        };
        format!(
            "0 {} {} {} {} {}",
            self.minute.to_cron(),
            self.hour.to_cron(),
            self.day_of_month.to_cron(),
            self.month.to_cron(),
            day_of_week,
        )
    }

    /// Reject days that no month in the expression has.
    fn can_fire(&self) -> bool {
        match (self.day_of_month, self.month) {
            (CalendarField::At(day), CalendarField::At(2)) => day <= 29,
            (CalendarField::At(31), CalendarField::At(m)) => !matches!(m, 4 | 6 | 9 | 11),
            _ => true,
        }
    }
}

impl FromStr for CalendarExpression {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CalendarExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Computes when a calendar expression next fires.
pub trait CalendarEvaluator: Send + Sync {
    /// First fire time strictly after `after`, if any.
    fn next_after(&self, expression: &CalendarExpression, after: Timestamp) -> Option<Timestamp>;
}

/// Evaluator backed by the `cron` crate, in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct CronCalendar;

impl CalendarEvaluator for CronCalendar {
    fn next_after(&self, expression: &CalendarExpression, after: Timestamp) -> Option<Timestamp> {
        let cron_expr = expression.to_cron();
        match Schedule::from_str(&cron_expr) {
            Ok(schedule) => schedule.after(&after).next(),
            Err(e) => {
                warn!(expression = %expression, cron = %cron_expr, error = %e, "Calendar expression rejected by evaluator");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike, Utc, Weekday};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_parse_fields() {
        let expr = CalendarExpression::parse("30 2 * * 1").unwrap();
        assert_eq!(expr.minute, CalendarField::At(30));
        assert_eq!(expr.hour, CalendarField::At(2));
        assert_eq!(expr.day_of_month, CalendarField::Any);
        assert_eq!(expr.day_of_week, CalendarField::At(1));
        assert_eq!(expr.to_cron(), "0 30 2 * * Mon");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(CalendarExpression::parse("  "), Err(CalendarError::Empty));
        assert_eq!(
            CalendarExpression::parse("0 * * *"),
            Err(CalendarError::FieldCount(4))
        );
        assert!(matches!(
            CalendarExpression::parse("60 * * * *"),
            Err(CalendarError::InvalidField { field: "minute", .. })
        ));
        assert!(matches!(
            CalendarExpression::parse("*/5 * * * *"),
            Err(CalendarError::InvalidField { .. })
        ));
        assert_eq!(
            CalendarExpression::parse("@yearly"),
            Err(CalendarError::UnknownShortcut("@yearly".to_string()))
        );
        assert!(matches!(
            CalendarExpression::parse("0 0 30 2 *"),
            Err(CalendarError::NeverFires(_))
        ));
        assert!(matches!(
            CalendarExpression::parse("0 0 31 4 *"),
            Err(CalendarError::NeverFires(_))
        ));
    }

    #[test]
    fn test_error_maps_to_invalid_argument() {
        let err: SettleError = CalendarExpression::parse("").unwrap_err().into();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_hourly_fires_at_top_of_next_hour() {
        let calendar = CronCalendar;
        let now = at(2024, 3, 1, 10, 15, 30);

        for expr in [
            CalendarExpression::hourly(),
            CalendarExpression::parse("@hourly").unwrap(),
            CalendarExpression::parse("0 * * * *").unwrap(),
        ] {
            assert_eq!(calendar.next_after(&expr, now), Some(at(2024, 3, 1, 11, 0, 0)));
        }

        // Strictly after: exactly on the hour moves to the next one.
        let on_the_hour = at(2024, 3, 1, 11, 0, 0);
        assert_eq!(
            calendar.next_after(&CalendarExpression::hourly(), on_the_hour),
            Some(at(2024, 3, 1, 12, 0, 0))
        );
    }

    #[test]
    fn test_day_of_week_sunday_aliases() {
        let calendar = CronCalendar;
        // 2024-03-01 is a Friday.
        let now = at(2024, 3, 1, 10, 0, 0);

        for expr in ["0 9 * * 0", "0 9 * * 7", "@weekly"] {
            let next = calendar
                .next_after(&CalendarExpression::parse(expr).unwrap(), now)
                .unwrap();
            assert_eq!(next.weekday(), Weekday::Sun, "{expr}");
            assert_eq!(next.day(), 3);
        }
    }

    #[test]
    fn test_monthly_and_leap_day() {
        let calendar = CronCalendar;
        let now = at(2024, 3, 1, 10, 0, 0);

        let monthly = CalendarExpression::parse("@monthly").unwrap();
        assert_eq!(calendar.next_after(&monthly, now), Some(at(2024, 4, 1, 0, 0, 0)));

        let leap = CalendarExpression::parse("45 6 29 2 *").unwrap();
        let next = calendar.next_after(&leap, now).unwrap();
        assert_eq!((next.year(), next.month(), next.day()), (2028, 2, 29));
        assert_eq!((next.hour(), next.minute()), (6, 45));
    }
}
