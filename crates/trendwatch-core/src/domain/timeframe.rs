use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Month};

use crate::ValidationError;

const MAX_RANGE_DAYS: i64 = 365;

/// Fixed relative windows accepted by the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TimeframePreset {
    #[serde(rename = "now 1-H")]
    PastHour,
    #[serde(rename = "now 4-H")]
    PastFourHours,
    #[serde(rename = "now 1-d")]
    PastDay,
    #[serde(rename = "now 7-d")]
    PastWeek,
    #[serde(rename = "today 1-m")]
    PastMonth,
    #[serde(rename = "today 3-m")]
    PastQuarter,
    #[serde(rename = "today 6-m")]
    PastHalfYear,
    #[serde(rename = "today 12-m")]
    PastYear,
    #[serde(rename = "today 5-y")]
    PastFiveYears,
    #[serde(rename = "today 50-y")]
    AllTime,
}

impl TimeframePreset {
    pub const ALL: [Self; 10] = [
        Self::PastHour,
        Self::PastFourHours,
        Self::PastDay,
        Self::PastWeek,
        Self::PastMonth,
        Self::PastQuarter,
        Self::PastHalfYear,
        Self::PastYear,
        Self::PastFiveYears,
        Self::AllTime,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PastHour => "now 1-H",
            Self::PastFourHours => "now 4-H",
            Self::PastDay => "now 1-d",
            Self::PastWeek => "now 7-d",
            Self::PastMonth => "today 1-m",
            Self::PastQuarter => "today 3-m",
            Self::PastHalfYear => "today 6-m",
            Self::PastYear => "today 12-m",
            Self::PastFiveYears => "today 5-y",
            Self::AllTime => "today 50-y",
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::PastHour => "Past hour",
            Self::PastFourHours => "Past 4 hours",
            Self::PastDay => "Past day",
            Self::PastWeek => "Past 7 days",
            Self::PastMonth => "Past 30 days",
            Self::PastQuarter => "Past 90 days",
            Self::PastHalfYear => "Past 6 months",
            Self::PastYear => "Past 12 months",
            Self::PastFiveYears => "Past 5 years",
            Self::AllTime => "2004 - present",
        }
    }

    /// Window length in days (30-day months), used to pick the nearest preset.
    const fn approx_days(self) -> u32 {
        match self {
            Self::PastHour | Self::PastFourHours | Self::PastDay => 1,
            Self::PastWeek => 7,
            Self::PastMonth => 30,
            Self::PastQuarter => 90,
            Self::PastHalfYear => 180,
            Self::PastYear => 360,
            Self::PastFiveYears => 1_800,
            Self::AllTime => 18_000,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|preset| preset.as_str() == token)
    }
}

/// A validated upstream timeframe.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Preset(TimeframePreset),
    /// Inclusive calendar range. `monthly` keeps the `YYYY-MM` spelling.
    Range {
        start: Date,
        end: Date,
        monthly: bool,
    },
}

impl Timeframe {
    /// Strict parse: only canonical tokens and in-range literal ranges.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::timeframe(input, "timeframe cannot be empty"));
        }

        if let Some(preset) = TimeframePreset::from_token(trimmed) {
            return Ok(Self::Preset(preset));
        }

        if let Some((start, end)) = trimmed.split_once(':') {
            return parse_range(input, start.trim(), end.trim());
        }

        Err(ValidationError::timeframe(
            input,
            "expected a token such as 'today 3-m' or a range 'YYYY-MM-DD:YYYY-MM-DD'",
        ))
    }

    /// Parse, converting recognisable but unsupported short forms to the
    /// nearest supported token.
    pub fn normalize(input: &str) -> Result<NormalizedTimeframe, ValidationError> {
        match Self::parse(input) {
            Ok(timeframe) => Ok(NormalizedTimeframe {
                timeframe,
                original: input.trim().to_owned(),
                conversion_note: None,
            }),
            Err(strict_error) => {
                let trimmed = input.trim();
                if trimmed.contains(':') {
                    return Err(strict_error);
                }
                let Some((preset, note)) = convert_short_form(trimmed) else {
                    return Err(strict_error);
                };
                Ok(NormalizedTimeframe {
                    timeframe: Self::Preset(preset),
                    original: trimmed.to_owned(),
                    conversion_note: Some(note),
                })
            }
        }
    }

    pub fn token(&self) -> String {
        match self {
            Self::Preset(preset) => preset.as_str().to_owned(),
            Self::Range {
                start,
                end,
                monthly: true,
            } => format!(
                "{:04}-{:02}:{:04}-{:02}",
                start.year(),
                u8::from(start.month()),
                end.year(),
                u8::from(end.month())
            ),
            Self::Range { start, end, .. } => {
                format!("{}:{}", format_date(*start), format_date(*end))
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            Self::Preset(preset) => preset.description().to_owned(),
            Self::Range { start, end, .. } => {
                format!("{} to {}", format_date(*start), format_date(*end))
            }
        }
    }
}

impl Display for Timeframe {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.token())
    }
}

impl FromStr for Timeframe {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

/// Result of [`Timeframe::normalize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTimeframe {
    pub timeframe: Timeframe,
    pub original: String,
    pub conversion_note: Option<String>,
}

impl NormalizedTimeframe {
    pub fn was_converted(&self) -> bool {
        self.conversion_note.is_some()
    }
}

fn parse_range(input: &str, start: &str, end: &str) -> Result<Timeframe, ValidationError> {
    let monthly = start.len() == 7 && end.len() == 7;
    let (start_date, end_date) = if monthly {
        let (start_year, start_month) = parse_year_month(input, start)?;
        let (end_year, end_month) = parse_year_month(input, end)?;
        let first = calendar_date(input, start_year, start_month, 1)?;
        let last_day = time::util::days_in_year_month(end_year, end_month);
        (first, calendar_date(input, end_year, end_month, last_day)?)
    } else {
        (parse_day(input, start)?, parse_day(input, end)?)
    };

    if end_date < start_date {
        return Err(ValidationError::timeframe(input, "range ends before it starts"));
    }

    let span = (end_date - start_date).whole_days();
    if !(1..=MAX_RANGE_DAYS).contains(&span) {
        return Err(ValidationError::timeframe(
            input,
            format!("range spans {span} days, expected 1 to {MAX_RANGE_DAYS}"),
        ));
    }

    Ok(Timeframe::Range {
        start: start_date,
        end: end_date,
        monthly,
    })
}

fn parse_year_month(input: &str, value: &str) -> Result<(i32, Month), ValidationError> {
    let mut parts = value.split('-');
    let (Some(year), Some(month), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(ValidationError::timeframe(input, format!("'{value}' is not YYYY-MM")));
    };
    let year = parse_number::<i32>(input, year, 4)?;
    let month = parse_number::<u8>(input, month, 2)?;
    let month = Month::try_from(month)
        .map_err(|_| ValidationError::timeframe(input, format!("invalid month in '{value}'")))?;
    Ok((year, month))
}

fn parse_day(input: &str, value: &str) -> Result<Date, ValidationError> {
    let mut parts = value.split('-');
    let (Some(year), Some(month), Some(day), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ValidationError::timeframe(input, format!("'{value}' is not YYYY-MM-DD")));
    };
    let year = parse_number::<i32>(input, year, 4)?;
    let month = parse_number::<u8>(input, month, 2)?;
    let day = parse_number::<u8>(input, day, 2)?;
    let month = Month::try_from(month)
        .map_err(|_| ValidationError::timeframe(input, format!("invalid month in '{value}'")))?;
    calendar_date(input, year, month, day)
}

fn parse_number<T: FromStr>(input: &str, digits: &str, width: usize) -> Result<T, ValidationError> {
    if digits.len() != width || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(ValidationError::timeframe(input, format!("'{digits}' is not a {width}-digit number")));
    }
    digits
        .parse()
        .map_err(|_| ValidationError::timeframe(input, format!("'{digits}' is out of range")))
}

fn calendar_date(input: &str, year: i32, month: Month, day: u8) -> Result<Date, ValidationError> {
    Date::from_calendar_date(year, month, day)
        .map_err(|_| ValidationError::timeframe(input, format!("{year:04}-{month} has no day {day}")))
}

fn format_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Maps `now N-U` / `today N-U` spellings onto supported presets.
fn convert_short_form(token: &str) -> Option<(TimeframePreset, String)> {
    let (anchor, amount) = token.split_once(char::is_whitespace)?;
    let (count, unit) = amount.trim().split_once('-')?;
    let count: u32 = count.parse().ok()?;
    let unit = unit.to_ascii_lowercase();

    let preset = match (anchor.to_ascii_lowercase().as_str(), unit.as_str()) {
        ("now", "h") => TimeframePreset::PastWeek,
        ("now", "d") if count > 7 => TimeframePreset::PastMonth,
        ("now", "d") if count <= 1 => TimeframePreset::PastDay,
        ("now", "d") => TimeframePreset::PastWeek,
        ("today" | "now", "m") => nearest(&TimeframePreset::ALL[4..], count.saturating_mul(30)),
        ("today" | "now", "y") => nearest(&TimeframePreset::ALL[7..], count.saturating_mul(365)),
        ("today", "d") => nearest(&TimeframePreset::ALL[3..], count),
        _ => return None,
    };

    let note = format!(
        "'{token}' is not a supported timeframe; using '{}' ({})",
        preset.as_str(),
        preset.description()
    );
    Some((preset, note))
}

/// Closest preset by approximate length; ties go to the longer window.
fn nearest(candidates: &[TimeframePreset], days: u32) -> TimeframePreset {
    candidates
        .iter()
        .copied()
        .min_by_key(|preset| {
            let distance = preset.approx_days().abs_diff(days);
            (distance, std::cmp::Reverse(preset.approx_days()))
        })
        .unwrap_or(TimeframePreset::PastQuarter)
}
