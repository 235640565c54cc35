use std::fmt;
use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use crate::error::SraGraphError;

/// Placeholder stored by callers that could not normalize a date.
pub const UNKNOWN: &str = "unknown";

static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[Tt]|\s+)?\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:\s*(?:[Zz]|(?i:utc|gmt)|[+-]\d{2}:?\d{2}))?")
        .expect("time-of-day pattern compiles")
});

/// Calendar date in `yyyy-mm-dd` form. Days are only range-checked against 1..=31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanDate {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl fmt::Display for CleanDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

#[derive(Debug, Clone)]
pub struct DateNormalizer {
    current_year: i32,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl DateNormalizer {
    pub fn new() -> Self {
        Self::with_current_year(chrono::Local::now().year())
    }

    pub fn with_current_year(current_year: i32) -> Self {
        Self { current_year }
    }

    /// Normalizes to `yyyy-mm-dd`, or `unknown` when no rule applies.
    pub fn normalize_or_unknown(&self, raw: &str) -> String {
        match self.normalize(raw) {
            Ok(date) => date.to_string(),
            Err(err) => {
                tracing::warn!("{err}; storing nothing for this value");
                UNKNOWN.to_string()
            }
        }
    }

    pub fn normalize(&self, raw: &str) -> Result<CleanDate, SraGraphError> {
        let value = raw.trim();
        let invalid = || SraGraphError::InvalidDate(raw.to_string());

        if value.contains(':') {
            let stripped = TIME_OF_DAY.replace(value, " ");
            let stripped = stripped.trim();
            if stripped.is_empty() || stripped == value {
                return Err(invalid());
            }
            return self.normalize(stripped);
        }

        match value.matches('/').count() {
            1 => {
                let (from, to) = value.split_once('/').ok_or_else(invalid)?;
                if from.trim().len() == to.trim().len() {
                    return self.normalize(to);
                }
                return self.month_year(from, to).ok_or_else(invalid);
            }
            2 => return self.day_month_year(&split3(value, '/')).ok_or_else(invalid),
            _ => {}
        }

        for delim in ['-', '.'] {
            match value.matches(delim).count() {
                1 => {
                    let (first, second) = value.split_once(delim).ok_or_else(invalid)?;
                    return self.month_year(first, second).ok_or_else(invalid);
                }
                2 => return self.day_month_year(&split3(value, delim)).ok_or_else(invalid),
                _ => {}
            }
        }

        let words: Vec<&str> = value.split_whitespace().collect();
        match words.as_slice() {
            [first, second] => self.month_year(first, second).ok_or_else(invalid),
            [day, month, year] => self
                .day_month_year(&[*day, *month, *year])
                .ok_or_else(invalid),
            [single] if single.chars().all(|ch| ch.is_ascii_digit()) => {
                let year = self.fix_year(single).ok_or_else(invalid)?;
                Ok(CleanDate {
                    year,
                    month: 1,
                    day: 1,
                })
            }
            _ => Err(invalid()),
        }
    }

    fn month_year(&self, first: &str, second: &str) -> Option<CleanDate> {
        let attempt = |month: &str, year: &str| {
            Some(CleanDate {
                year: self.fix_year(year)?,
                month: fix_month(month)?,
                day: 1,
            })
        };
        attempt(first, second).or_else(|| attempt(second, first))
    }

    fn day_month_year(&self, parts: &[&str; 3]) -> Option<CleanDate> {
        let [a, b, c] = *parts;
        let attempt = |day: &str, month: &str, year: &str| {
            Some(CleanDate {
                year: self.fix_year(year)?,
                month: fix_month(month)?,
                day: fix_day(day)?,
            })
        };
        attempt(a, b, c)
            .or_else(|| attempt(b, a, c))
            .or_else(|| attempt(c, b, a))
    }

    fn fix_year(&self, raw: &str) -> Option<i32> {
        let raw = raw.trim();
        if raw.is_empty() || !raw.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        let year: i32 = raw.parse().ok()?;
        match year.to_string().len() {
            4 if (1900..=self.current_year).contains(&year) => Some(year),
            2 if year <= self.current_year % 100 => Some(2000 + year),
            2 => Some(1900 + year),
            1 => Some(2000 + year),
            _ => None,
        }
    }
}

fn split3(value: &str, delim: char) -> [&str; 3] {
    let mut parts = value.splitn(3, delim);
    [
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
        parts.next().unwrap_or_default(),
    ]
}

fn fix_month(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let month = if !raw.is_empty() && raw.chars().all(|ch| ch.is_ascii_digit()) {
        raw.parse().ok()?
    } else {
        let name = raw.strip_suffix('.').unwrap_or(raw).to_ascii_lowercase();
        month_by_name(&name)?
    };
    (1..=12).contains(&month).then_some(month)
}

fn month_by_name(name: &str) -> Option<u32> {
    let month = match name {
        "jan" | "january" => 1,
        "feb" | "february" => 2,
        "mar" | "march" => 3,
        "apr" | "april" => 4,
        "may" => 5,
        "jun" | "june" => 6,
        "jul" | "july" => 7,
        "aug" | "august" => 8,
        "sep" | "sept" | "september" => 9,
        "oct" | "october" => 10,
        "nov" | "november" => 11,
        "dec" | "december" => 12,
        _ => return None,
    };
    Some(month)
}

fn fix_day(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let day: u32 = raw.parse().ok()?;
    (1..=31).contains(&day).then_some(day)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn normalizer() -> DateNormalizer {
        DateNormalizer::with_current_year(2024)
    }

    #[test]
    fn iso_date_survives() {
        assert_eq!(normalizer().normalize_or_unknown("2021-03-15"), "2021-03-15");
    }

    #[test]
    fn month_names_with_period() {
        assert_eq!(normalizer().normalize_or_unknown("15.Apr..2021"), UNKNOWN);
        assert_eq!(normalizer().normalize_or_unknown("Sept. 2019"), "2019-09-01");
        assert_eq!(normalizer().normalize_or_unknown("Jan-2020"), "2020-01-01");
    }

    #[test]
    fn future_four_digit_year_rejected() {
        assert_matches!(
            normalizer().normalize("2031"),
            Err(SraGraphError::InvalidDate(_))
        );
    }

    #[test]
    fn two_digit_year_pivots_on_current_year() {
        assert_eq!(normalizer().normalize_or_unknown("3/24"), "2024-03-01");
        assert_eq!(normalizer().normalize_or_unknown("3/98"), "1998-03-01");
    }

    #[test]
    fn time_of_day_is_dropped() {
        assert_eq!(
            normalizer().normalize_or_unknown("2019-05-03T10:00:00Z"),
            "2019-05-03"
        );
        assert_eq!(normalizer().normalize_or_unknown("10:30 2019-05-03"), "2019-05-03");
        assert_eq!(normalizer().normalize_or_unknown("12:00"), UNKNOWN);
    }
}
