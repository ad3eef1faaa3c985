//! ISO 8601 duration parsing and application to timestamps.

use chrono::{DateTime, Months};

use crate::error::{PulseError, PulseResult};

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60.0 * MS_PER_SECOND;
const MS_PER_HOUR: f64 = 60.0 * MS_PER_MINUTE;
const MS_PER_DAY: f64 = 24.0 * MS_PER_HOUR;
const MS_PER_WEEK: f64 = 7.0 * MS_PER_DAY;
// Average Gregorian month, used only for fractional month remainders.
const MS_PER_MONTH: f64 = 30.436875 * MS_PER_DAY;

/// A parsed `P[n]Y[n]M[n]W[n]DT[n]H[n]M[n]S` duration. Negative durations
/// keep non-negative components and clear the `positive` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Iso8601Duration {
    pub positive: bool,
    pub years: f64,
    pub months: f64,
    pub weeks: f64,
    pub days: f64,
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
}

impl Iso8601Duration {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        years: f64,
        months: f64,
        weeks: f64,
        days: f64,
        hours: f64,
        minutes: f64,
        seconds: f64,
        positive: bool,
    ) -> Self {
        Self {
            positive,
            years,
            months,
            weeks,
            days,
            hours,
            minutes,
            seconds,
        }
    }

    /// A duration of `millis` milliseconds.
    pub fn from_millis(millis: f64) -> Self {
        Self::new(
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            millis.abs() / MS_PER_SECOND,
            millis >= 0.0,
        )
    }

    /// Parse the standard grammar with an optional leading `-`. Absent
    /// components are zero; malformed input fails with no partial result.
    pub fn parse(input: &str) -> PulseResult<Self> {
        let fail = || PulseError::InvalidDuration(input.to_string());

        let mut rest = input;
        let positive = match rest.strip_prefix('-') {
            Some(stripped) => {
                rest = stripped;
                false
            }
            None => true,
        };
        rest = rest.strip_prefix('P').ok_or_else(fail)?;

        let mut duration = Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, positive);
        let mut in_time = false;
        let mut seen_component = false;

        while !rest.is_empty() {
            if !in_time && rest.starts_with('T') {
                in_time = true;
                rest = &rest[1..];
                continue;
            }
            let number_len = rest
                .find(|c: char| !c.is_ascii_digit() && c != '.')
                .ok_or_else(fail)?;
            if number_len == 0 {
                return Err(fail());
            }
            let value: f64 = rest[..number_len].parse().map_err(|_| fail())?;
            let designator = rest[number_len..].chars().next().ok_or_else(fail)?;
            rest = &rest[number_len + designator.len_utf8()..];

            match (in_time, designator) {
                (false, 'Y') => duration.years = value,
                (false, 'M') => duration.months = value,
                (false, 'W') => duration.weeks = value,
                (false, 'D') => duration.days = value,
                (true, 'H') => duration.hours = value,
                (true, 'M') => duration.minutes = value,
                (true, 'S') => duration.seconds = value,
                _ => return Err(fail()),
            }
            seen_component = true;
        }

        if !seen_component {
            return Err(fail());
        }
        Ok(duration)
    }

    /// Apply the duration to an epoch-milliseconds timestamp. Whole years
    /// and months use calendar arithmetic; weeks and below are fixed
    /// length. Subtracts when the duration is negative.
    pub fn apply_to(&self, epoch_ms: i64) -> i64 {
        let Some(date) = DateTime::from_timestamp_millis(epoch_ms) else {
            return epoch_ms;
        };

        let total_months = self.years.mul_add(12.0, self.months).max(0.0);
        let whole_months = total_months.trunc().min(u32::MAX as f64) as u32;
        let shifted = if self.positive {
            date.checked_add_months(Months::new(whole_months))
        } else {
            date.checked_sub_months(Months::new(whole_months))
        }
        .unwrap_or(date);

        let fixed_ms = total_months.fract() * MS_PER_MONTH
            + self.weeks * MS_PER_WEEK
            + self.days * MS_PER_DAY
            + self.hours * MS_PER_HOUR
            + self.minutes * MS_PER_MINUTE
            + self.seconds * MS_PER_SECOND;
        let signed_ms = if self.positive { fixed_ms } else { -fixed_ms };

        shifted.timestamp_millis() + signed_ms.round() as i64
    }
}
