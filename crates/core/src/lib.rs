pub mod calendar;
pub mod money;
pub mod numerals;

pub use calendar::{days_in_month, format_date, is_leap_year, validate_date, Era, MAX_YEAR, MIN_YEAR};
pub use money::{Amount, AmountError, MAX_AMOUNT};
pub use numerals::{is_kanji_numeral, kanji_to_number};
