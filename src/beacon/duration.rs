//! ISO 8601 duration parsing and comparison for age filters.
//!
//! Comparing calendar durations is imprecise by nature: a month has no fixed
//! number of days. Values are therefore compared through an approximate
//! total (a year counted as 365.25 days, a month as one twelfth of that), so
//! `P40Y` and `P480M` compare equal and mixed-unit values order sensibly.

use std::cmp::Ordering;

use anyhow::{Result, bail};

use crate::beacon::model::FilterOperator;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IsoDuration {
    pub years: f64,
    pub months: f64,
    pub weeks: f64,
    pub days: f64,
    pub hours: f64,
    pub minutes: f64,
    pub seconds: f64,
}

impl IsoDuration {
    /// Parses `PnYnMnWnDTnHnMnS` (each component optional, at least one
    /// required; `W` may be combined per the standard's extended usage).
    pub fn parse(value: &str) -> Result<Self> {
        let rest = value
            .strip_prefix('P')
            .ok_or_else(|| anyhow::anyhow!("an ISO 8601 duration must begin with 'P': {value}"))?;
        if rest.is_empty() {
            bail!("empty ISO 8601 duration: {value}");
        }

        let mut duration = Self::default();
        let mut in_time = false;
        let mut number = String::new();
        let mut component_count = 0;

        for c in rest.chars() {
            match c {
                'T' => {
                    if in_time || !number.is_empty() {
                        bail!("misplaced 'T' in ISO 8601 duration: {value}");
                    }
                    in_time = true;
                }
                '0'..='9' | '.' | ',' => number.push(if c == ',' { '.' } else { c }),
                designator => {
                    if number.is_empty() {
                        bail!("missing number before '{designator}' in: {value}");
                    }
                    let parsed: f64 = number.parse()?;
                    number.clear();
                    component_count += 1;

                    match (in_time, designator) {
                        (false, 'Y') => duration.years = parsed,
                        (false, 'M') => duration.months = parsed,
                        (false, 'W') => duration.weeks = parsed,
                        (false, 'D') => duration.days = parsed,
                        (true, 'H') => duration.hours = parsed,
                        (true, 'M') => duration.minutes = parsed,
                        (true, 'S') => duration.seconds = parsed,
                        _ => bail!("unexpected designator '{designator}' in: {value}"),
                    }
                }
            }
        }

        if !number.is_empty() {
            bail!("trailing number without designator in: {value}");
        }
        if component_count == 0 {
            bail!("no components in ISO 8601 duration: {value}");
        }

        Ok(duration)
    }

    /// Approximate total in seconds, used only for ordering.
    fn approx_seconds(&self) -> f64 {
        const DAY: f64 = 86_400.0;
        const YEAR: f64 = 365.25 * DAY;
        self.years * YEAR
            + self.months * (YEAR / 12.0)
            + self.weeks * 7.0 * DAY
            + self.days * DAY
            + self.hours * 3_600.0
            + self.minutes * 60.0
            + self.seconds
    }

    fn compare(&self, other: &Self) -> Ordering {
        self.approx_seconds()
            .partial_cmp(&other.approx_seconds())
            .unwrap_or(Ordering::Equal)
    }

    /// Applies the filter comparator with this duration on the left-hand
    /// side: `filter <op> other`.
    pub fn matches(&self, operator: FilterOperator, other: &Self) -> bool {
        let ordering = self.compare(other);
        match operator {
            FilterOperator::Equal => ordering == Ordering::Equal,
            FilterOperator::NotEqual => ordering != Ordering::Equal,
            FilterOperator::Less => ordering == Ordering::Less,
            FilterOperator::LessOrEqual => ordering != Ordering::Greater,
            FilterOperator::Greater => ordering == Ordering::Greater,
            FilterOperator::GreaterOrEqual => ordering != Ordering::Less,
        }
    }
}

impl std::fmt::Display for IsoDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P")?;
        for (value, designator) in [
            (self.years, 'Y'),
            (self.months, 'M'),
            (self.weeks, 'W'),
            (self.days, 'D'),
        ] {
            if value != 0.0 {
                write!(f, "{value}{designator}")?;
            }
        }
        if self.hours != 0.0 || self.minutes != 0.0 || self.seconds != 0.0 {
            write!(f, "T")?;
            for (value, designator) in [
                (self.hours, 'H'),
                (self.minutes, 'M'),
                (self.seconds, 'S'),
            ] {
                if value != 0.0 {
                    write!(f, "{value}{designator}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_forms() {
        let d = IsoDuration::parse("P25Y4M").unwrap();
        assert_eq!(d.years, 25.0);
        assert_eq!(d.months, 4.0);

        let d = IsoDuration::parse("P3W").unwrap();
        assert_eq!(d.weeks, 3.0);

        let d = IsoDuration::parse("P1DT12H").unwrap();
        assert_eq!(d.days, 1.0);
        assert_eq!(d.hours, 12.0);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(IsoDuration::parse("40Y").is_err());
        assert!(IsoDuration::parse("P").is_err());
        assert!(IsoDuration::parse("PY").is_err());
        assert!(IsoDuration::parse("P1H").is_err(), "H requires the T prefix");
        assert!(IsoDuration::parse("P40Y7").is_err());
    }

    #[test]
    fn test_year_month_equivalence() {
        let years = IsoDuration::parse("P40Y").unwrap();
        let months = IsoDuration::parse("P480M").unwrap();
        assert!(years.matches(FilterOperator::Equal, &months));
    }

    #[test]
    fn test_comparator_direction() {
        let filter = IsoDuration::parse("P40Y").unwrap();
        let younger = IsoDuration::parse("P25Y").unwrap();
        let older = IsoDuration::parse("P60Y").unwrap();

        // filter > value:
        assert!(filter.matches(FilterOperator::Greater, &younger));
        assert!(!filter.matches(FilterOperator::Greater, &older));
        // filter <= value:
        assert!(filter.matches(FilterOperator::LessOrEqual, &older));
        assert!(filter.matches(FilterOperator::LessOrEqual, &filter));
    }
}
