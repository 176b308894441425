use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use strum::{EnumIter, IntoEnumIterator, IntoStaticStr};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Month, OffsetDateTime};

/// Storage key format for a single day: zero-padded `YYYY-MM-DD`.
pub const DATE_KEY_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

static MONTH_ARG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(-?\d{4})-(\d{1,2})\s*$").expect("valid month argument pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    #[error("'{0}' is not a month, expected YYYY-MM")]
    InvalidMonth(String),
    #[error("'{0}' is not a date, expected YYYY-MM-DD")]
    InvalidDate(String),
}

/// A calendar month, anchored on its first day so it can never hold an invalid month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    first: Date,
}

impl YearMonth {
    pub fn new(year: i32, month: Month) -> Option<Self> {
        Date::from_calendar_date(year, month, 1)
            .ok()
            .map(|first| Self { first })
    }

    /// Builds a month from a zero-based month index (`0` = January).
    pub fn from_index(year: i32, index: u8) -> Option<Self> {
        let month = Month::try_from(index.checked_add(1)?).ok()?;
        Self::new(year, month)
    }

    pub fn containing(date: Date) -> Self {
        Self {
            first: date.replace_day(1).unwrap_or(date),
        }
    }

    pub fn current() -> Self {
        Self::containing(today_local())
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> Month {
        self.first.month()
    }

    /// Zero-based month number in `0..=11`.
    pub fn month_index(&self) -> u8 {
        u8::from(self.first.month()) - 1
    }

    pub fn first_day(&self) -> Date {
        self.first
    }

    pub fn days_in_month(&self) -> u8 {
        time::util::days_in_year_month(self.year(), self.month())
    }

    pub fn day(&self, day: u8) -> Option<Date> {
        self.first.replace_day(day).ok()
    }

    pub fn previous(&self) -> Option<Self> {
        self.first.previous_day().map(Self::containing)
    }

    pub fn next(&self) -> Option<Self> {
        self.day(self.days_in_month())
            .and_then(|last| last.next_day())
            .map(Self::containing)
    }

    pub fn contains(&self, date: Date) -> bool {
        date.year() == self.year() && date.month() == self.month()
    }

    /// The `YYYY-MM` prefix shared by every date key in this month.
    pub fn key_prefix(&self) -> String {
        let key = date_key(self.first);
        key[..key.len() - 3].to_string()
    }

    /// Inclusive lower and exclusive upper key bounds covering every day of the month.
    pub fn key_range(&self) -> (String, String) {
        let prefix = self.key_prefix();
        (format!("{prefix}-01"), format!("{prefix}-32"))
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.month(), self.year())
    }
}

impl FromStr for YearMonth {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CalendarError::InvalidMonth(s.to_string());
        let caps = MONTH_ARG.captures(s).ok_or_else(invalid)?;
        let year: i32 = caps[1].parse().map_err(|_| invalid())?;
        let month: u8 = caps[2].parse().map_err(|_| invalid())?;
        let month = Month::try_from(month).map_err(|_| invalid())?;
        Self::new(year, month).ok_or_else(invalid)
    }
}

pub fn today_local() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

pub fn date_key(date: Date) -> String {
    date.format(DATE_KEY_FORMAT).unwrap_or_else(|_| {
        format!(
            "{:04}-{:02}-{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    })
}

/// Parses a canonical `YYYY-MM-DD` key. Non-padded or otherwise non-canonical input is rejected
/// so that lexical order on keys stays chronological.
pub fn parse_date_key(input: &str) -> Result<Date, CalendarError> {
    Date::parse(input, DATE_KEY_FORMAT)
        .ok()
        .filter(|date| date_key(*date) == input)
        .ok_or_else(|| CalendarError::InvalidDate(input.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, IntoStaticStr)]
pub enum WeekdayColumn {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl WeekdayColumn {
    pub fn labels() -> Vec<&'static str> {
        Self::iter().map(Into::into).collect()
    }
}

/// Geometry of one month laid out in a Monday-first, 7-column grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonthGrid {
    pub month: YearMonth,
    /// Blank cells before day 1 (Monday = 0 … Sunday = 6).
    pub weekday_offset: u8,
    pub days_in_month: u8,
}

impl MonthGrid {
    pub fn days(&self) -> impl Iterator<Item = Date> + '_ {
        (1..=self.days_in_month).filter_map(|day| self.month.day(day))
    }

    pub fn cell_count(&self) -> usize {
        usize::from(self.weekday_offset) + usize::from(self.days_in_month)
    }

    pub fn week_rows(&self) -> usize {
        self.cell_count().div_ceil(7)
    }
}

pub fn grid_for(month: YearMonth) -> MonthGrid {
    MonthGrid {
        month,
        weekday_offset: month.first_day().weekday().number_days_from_monday(),
        days_in_month: month.days_in_month(),
    }
}

/// The month currently on screen. Only `prev` and `next` move it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarCursor {
    current: YearMonth,
}

impl CalendarCursor {
    pub fn new(start: YearMonth) -> Self {
        Self { current: start }
    }

    pub fn starting_today() -> Self {
        Self::new(YearMonth::current())
    }

    pub fn current(&self) -> YearMonth {
        self.current
    }

    pub fn prev(&mut self) -> YearMonth {
        match self.current.previous() {
            Some(month) => self.current = month,
            None => tracing::warn!(month = %self.current, "no earlier month is representable"),
        }
        self.current
    }

    pub fn next(&mut self) -> YearMonth {
        match self.current.next() {
            Some(month) => self.current = month,
            None => tracing::warn!(month = %self.current, "no later month is representable"),
        }
        self.current
    }

    pub fn grid(&self) -> MonthGrid {
        grid_for(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn ym(year: i32, index: u8) -> YearMonth {
        YearMonth::from_index(year, index).expect("valid month")
    }

    #[test]
    fn prev_rolls_back_into_december() {
        let mut cursor = CalendarCursor::new(ym(2025, 0));
        let month = cursor.prev();
        assert_eq!((month.year(), month.month_index()), (2024, 11));
    }

    #[test]
    fn next_rolls_forward_into_january() {
        let mut cursor = CalendarCursor::new(ym(2024, 11));
        let month = cursor.next();
        assert_eq!((month.year(), month.month_index()), (2025, 0));
    }

    #[test]
    fn a_full_year_of_steps_returns_to_the_start() {
        let start = ym(2023, 5);
        let mut cursor = CalendarCursor::new(start);
        for _ in 0..12 {
            cursor.next();
        }
        assert_eq!(cursor.current(), ym(2024, 5));
        for _ in 0..24 {
            cursor.prev();
        }
        assert_eq!(cursor.current(), ym(2022, 5));
    }

    #[test]
    fn leap_february_has_twenty_nine_days() {
        assert_eq!(grid_for(ym(2024, 1)).days_in_month, 29);
        assert_eq!(grid_for(ym(2023, 1)).days_in_month, 28);
        assert_eq!(grid_for(ym(2000, 1)).days_in_month, 29);
        assert_eq!(grid_for(ym(1900, 1)).days_in_month, 28);
    }

    #[test]
    fn january_2025_starts_on_wednesday() {
        let grid = grid_for(ym(2025, 0));
        assert_eq!(grid.weekday_offset, 2);
        assert_eq!(grid.days_in_month, 31);
        assert_eq!(grid.week_rows(), 5);
    }

    #[test]
    fn sunday_first_day_is_pushed_to_last_column() {
        // 1 September 2024 was a Sunday.
        let grid = grid_for(ym(2024, 8));
        assert_eq!(grid.weekday_offset, 6);
        assert_eq!(grid.week_rows(), 6);
    }

    #[test]
    fn grid_days_cover_the_whole_month() {
        let grid = grid_for(ym(2024, 3));
        let days: Vec<Date> = grid.days().collect();
        assert_eq!(days.len(), 30);
        assert_eq!(days.first().copied(), Some(date!(2024 - 04 - 01)));
        assert_eq!(days.last().copied(), Some(date!(2024 - 04 - 30)));
    }

    #[test]
    fn key_prefix_and_range_are_zero_padded() {
        let month = ym(2025, 2);
        assert_eq!(month.key_prefix(), "2025-03");
        assert_eq!(
            month.key_range(),
            ("2025-03-01".to_string(), "2025-03-32".to_string())
        );
        assert_eq!(date_key(date!(2025 - 03 - 05)), "2025-03-05");
    }

    #[test]
    fn parses_month_arguments() {
        assert_eq!("2025-03".parse::<YearMonth>(), Ok(ym(2025, 2)));
        assert_eq!("2025-3".parse::<YearMonth>(), Ok(ym(2025, 2)));
        assert!("2025-13".parse::<YearMonth>().is_err());
        assert!("March".parse::<YearMonth>().is_err());
    }

    #[test]
    fn date_keys_must_be_canonical() {
        assert_eq!(parse_date_key("2024-02-29"), Ok(date!(2024 - 02 - 29)));
        assert!(parse_date_key("2023-02-29").is_err());
        assert!(parse_date_key("2024-2-9").is_err());
        assert!(parse_date_key("yesterday").is_err());
    }

    #[test]
    fn title_names_month_and_year() {
        assert_eq!(ym(2025, 2).to_string(), "March 2025");
    }

    #[test]
    fn header_is_monday_first() {
        assert_eq!(
            WeekdayColumn::labels(),
            vec!["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]
        );
    }
}
