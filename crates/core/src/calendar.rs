use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Earliest year accepted for a receipt date.
pub const MIN_YEAR: i32 = 1900;
/// Latest year accepted for a receipt date.
pub const MAX_YEAR: i32 = 2100;

pub fn is_leap_year(year: i32) -> bool {
    NaiveDate::from_ymd_opt(year, 2, 29).is_some()
}

/// Number of days in `month` of `year`, or `None` for an invalid month.
pub fn days_in_month(year: i32, month: u32) -> Option<u32> {
    (28..=31).rev().find(|&day| NaiveDate::from_ymd_opt(year, month, day).is_some())
}

/// Build a date from its parts, enforcing the accepted year window.
pub fn validate_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Render a date as `YYYY-MM-DD`.
pub fn format_date(year: i32, month: u32, day: u32) -> String {
    format!("{year:04}-{month:02}-{day:02}")
}

/// Japanese imperial eras, oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Era {
    Meiji,
    Taisho,
    Showa,
    Heisei,
    Reiwa,
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Era::Meiji => write!(f, "明治"),
            Era::Taisho => write!(f, "大正"),
            Era::Showa => write!(f, "昭和"),
            Era::Heisei => write!(f, "平成"),
            Era::Reiwa => write!(f, "令和"),
        }
    }
}

impl Era {
    /// Gregorian year corresponding to year 1 (元年) of the era.
    pub fn first_year(self) -> i32 {
        match self {
            Era::Meiji => 1868,
            Era::Taisho => 1912,
            Era::Showa => 1926,
            Era::Heisei => 1989,
            Era::Reiwa => 2019,
        }
    }

    /// Accepts the kanji name (`令和`) or the single-letter romaji abbreviation (`R`).
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix.trim() {
            "明治" | "M" | "m" => Some(Era::Meiji),
            "大正" | "T" | "t" => Some(Era::Taisho),
            "昭和" | "S" | "s" => Some(Era::Showa),
            "平成" | "H" | "h" => Some(Era::Heisei),
            "令和" | "R" | "r" => Some(Era::Reiwa),
            _ => None,
        }
    }

    /// Convert an era year (1-based) to the Gregorian year.
    pub fn to_gregorian(self, era_year: u32) -> Option<i32> {
        if era_year == 0 {
            return None;
        }
        Some(self.first_year() + era_year as i32 - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn leap_years() {
        assert!(is_leap_year(2024));
        assert!(is_leap_year(2000));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
    }

    #[test]
    fn february_length_follows_leap_rule() {
        assert_eq!(days_in_month(2024, 2), Some(29));
        assert_eq!(days_in_month(2023, 2), Some(28));
        assert_eq!(days_in_month(2100, 2), Some(28));
        assert_eq!(days_in_month(2024, 13), None);
    }

    #[test]
    fn validate_rejects_out_of_window_years() {
        assert!(validate_date(1899, 12, 31).is_none());
        assert!(validate_date(2101, 1, 1).is_none());
        assert!(validate_date(1900, 1, 1).is_some());
        assert!(validate_date(2100, 12, 31).is_some());
    }

    #[test]
    fn month_lengths_match_validation() {
        for year in [1900, 2000, 2023, 2024, 2100] {
            for month in 1..=12 {
                let last = days_in_month(year, month).unwrap();
                assert!(validate_date(year, month, last).is_some(), "{year}-{month}");
                assert!(validate_date(year, month, last + 1).is_none(), "{year}-{month}");
            }
        }
    }

    #[test]
    fn validate_rejects_impossible_days() {
        assert!(validate_date(2023, 2, 29).is_none());
        assert!(validate_date(2024, 4, 31).is_none());
        assert!(validate_date(2024, 1, 0).is_none());
        assert_eq!(validate_date(2024, 2, 29).unwrap().day(), 29);
    }

    #[test]
    fn format_pads_components() {
        assert_eq!(format_date(2024, 7, 4), "2024-07-04");
        assert_eq!(format_date(1999, 12, 31), "1999-12-31");
    }

    #[test]
    fn era_conversion() {
        assert_eq!(Era::Reiwa.to_gregorian(1), Some(2019));
        assert_eq!(Era::Reiwa.to_gregorian(6), Some(2024));
        assert_eq!(Era::Heisei.to_gregorian(31), Some(2019));
        assert_eq!(Era::Showa.to_gregorian(64), Some(1989));
        assert_eq!(Era::Reiwa.to_gregorian(0), None);
    }

    #[test]
    fn era_prefixes() {
        assert_eq!(Era::from_prefix("R"), Some(Era::Reiwa));
        assert_eq!(Era::from_prefix("平成"), Some(Era::Heisei));
        assert_eq!(Era::from_prefix("X"), None);
        assert_eq!(Era::Showa.to_string(), "昭和");
    }
}
