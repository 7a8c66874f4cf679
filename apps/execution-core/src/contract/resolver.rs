//! Expiry resolution for encoded derivative identifiers.
//!
//! Identifiers look like `UNDERLYING` + `YY` + expiry marker + strike digits
//! + `CE`/`PE` (or `FUT` with no strike):
//!
//! ```text
//! IDX25072524000CE    explicit weekly: 2025-07-25, strike 24000
//! IDX25-072524000CE   same, with a separator after the year
//! IDX24OCT25000CE     monthly October 2024, strike 25000
//! IDX24OCT2425000CE   weekly 2024-10-24 if that is IDX's weekly weekday
//! IDX24OCTFUT         monthly future
//! ```
//!
//! After a month token the first two digits may be a day or the start of
//! the strike. They are read as a day only when the resulting date falls on
//! the underlying's weekly expiry weekday
//! ([`matches_weekly_expiry`]) and the strike left over does not start with
//! a zero. Otherwise the monthly branch governs.

use chrono::{Datelike, Days, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ExpiryCalendar;

const MONTH_TOKENS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Errors from identifier resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// Not an option or future (plain equity, index, ...).
    #[error("'{0}' is not a derivative contract")]
    NotDerivative(String),

    /// Looked like a derivative but did not parse.
    #[error("malformed contract identifier '{identifier}': {reason}")]
    Malformed {
        /// The identifier as given.
        identifier: String,
        /// What was wrong.
        reason: &'static str,
    },

    /// Parsed, but the encoded date does not exist.
    #[error("invalid expiry date {year}-{month:02}-{day:02} in '{identifier}'")]
    InvalidDate {
        /// The identifier as given.
        identifier: String,
        /// Encoded year.
        year: i32,
        /// Encoded month.
        month: u32,
        /// Encoded day.
        day: u32,
    },
}

/// Expiry class of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExpiryKind {
    /// Dated weekly contract.
    Weekly,
    /// Last-weekday-of-month contract.
    Monthly,
}

/// Instrument type from the identifier suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentKind {
    /// `CE` suffix.
    Call,
    /// `PE` suffix.
    Put,
    /// `FUT` suffix.
    Future,
}

/// A fully resolved contract identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Underlying family (uppercase).
    pub underlying: String,
    /// Expiry date.
    pub expiry: NaiveDate,
    /// Weekly or monthly.
    pub kind: ExpiryKind,
    /// Strike price for options.
    pub strike: Option<u64>,
    /// Option type or future.
    pub instrument: InstrumentKind,
}

/// Resolves identifiers against a configured [`ExpiryCalendar`].
#[derive(Debug, Clone, Default)]
pub struct ContractResolver {
    calendar: ExpiryCalendar,
}

impl ContractResolver {
    /// Create a resolver for `calendar`.
    #[must_use]
    pub const fn new(calendar: ExpiryCalendar) -> Self {
        Self { calendar }
    }

    /// The weekday table in use.
    #[must_use]
    pub const fn calendar(&self) -> &ExpiryCalendar {
        &self.calendar
    }

    /// Resolve `identifier` to its contract details.
    pub fn resolve(&self, identifier: &str) -> Result<ContractSpec, ContractError> {
        resolve_contract(identifier, &self.calendar)
    }

    /// Whether `identifier` expires on `today`.
    pub fn expires_on(&self, identifier: &str, today: NaiveDate) -> Result<bool, ContractError> {
        Ok(self.resolve(identifier)?.expiry == today)
    }

    /// Calendar days from `today` to expiry (negative once expired).
    pub fn days_to_expiry(&self, identifier: &str, today: NaiveDate) -> Result<i64, ContractError> {
        Ok((self.resolve(identifier)?.expiry - today).num_days())
    }
}

/// Whether `date` falls on `underlying`'s weekly expiry weekday.
#[must_use]
pub fn matches_weekly_expiry(underlying: &str, date: NaiveDate, calendar: &ExpiryCalendar) -> bool {
    date.weekday() == calendar.weekly_weekday(underlying)
}

/// Last `weekday` on or before the final day of `year`-`month`.
#[must_use]
pub fn monthly_expiry(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last_day = first_of_next.pred_opt()?;
    let back = (7 + last_day.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
    last_day.checked_sub_days(Days::new(u64::from(back)))
}

/// Resolve `identifier` against `calendar`.
pub fn resolve_contract(
    identifier: &str,
    calendar: &ExpiryCalendar,
) -> Result<ContractSpec, ContractError> {
    let normalized = identifier.trim().to_ascii_uppercase();
    let malformed = |reason| ContractError::Malformed {
        identifier: identifier.to_string(),
        reason,
    };

    let (body, instrument) = if let Some(body) = normalized.strip_suffix("FUT") {
        (body, InstrumentKind::Future)
    } else if let Some(body) = normalized.strip_suffix("CE") {
        (body, InstrumentKind::Call)
    } else if let Some(body) = normalized.strip_suffix("PE") {
        (body, InstrumentKind::Put)
    } else {
        return Err(ContractError::NotDerivative(identifier.to_string()));
    };

    let Some(year_start) = body.find(|c: char| c.is_ascii_digit()) else {
        return Err(ContractError::NotDerivative(identifier.to_string()));
    };
    let (underlying, rest) = body.split_at(year_start);
    if underlying.is_empty() || !underlying.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(malformed("underlying must be letters"));
    }

    let year = rest
        .get(..2)
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<i32>().ok())
        .ok_or_else(|| malformed("missing two-digit year"))?
        + 2000;
    let rest = &rest[2..];

    let after_separator = rest.strip_prefix(['-', '_', '/']);
    let marker = after_separator.unwrap_or(rest);

    if marker.starts_with(|c: char| c.is_ascii_digit()) {
        return resolve_explicit_weekly(identifier, underlying, year, marker, instrument);
    }
    if after_separator.is_some() {
        return Err(malformed("separator must be followed by month and day digits"));
    }

    let month = marker
        .get(..3)
        .and_then(|token| MONTH_TOKENS.iter().position(|m| *m == token))
        .map(|index| index as u32 + 1)
        .ok_or_else(|| malformed("unknown month token"))?;
    let digits = &marker[3..];
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("strike must be digits"));
    }

    if let Some(weekly) = weekly_from_leading_day(underlying, year, month, digits, instrument, calendar)
    {
        return Ok(weekly);
    }

    let expiry = monthly_expiry(year, month, calendar.monthly_weekday(underlying))
        .ok_or_else(|| malformed("month out of range"))?;
    Ok(ContractSpec {
        underlying: underlying.to_string(),
        expiry,
        kind: ExpiryKind::Monthly,
        strike: parse_strike(identifier, digits, instrument)?,
        instrument,
    })
}

/// `YY[sep]MMDD<strike>`: the date is spelled out, no weekday check.
fn resolve_explicit_weekly(
    identifier: &str,
    underlying: &str,
    year: i32,
    marker: &str,
    instrument: InstrumentKind,
) -> Result<ContractSpec, ContractError> {
    let malformed = |reason| ContractError::Malformed {
        identifier: identifier.to_string(),
        reason,
    };
    if marker.len() < 4 || !marker.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed("weekly expiry needs MMDD digits"));
    }
    let month: u32 = marker[..2]
        .parse()
        .map_err(|_| malformed("invalid month digits"))?;
    let day: u32 = marker[2..4]
        .parse()
        .map_err(|_| malformed("invalid day digits"))?;
    let expiry =
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| ContractError::InvalidDate {
            identifier: identifier.to_string(),
            year,
            month,
            day,
        })?;

    Ok(ContractSpec {
        underlying: underlying.to_string(),
        expiry,
        kind: ExpiryKind::Weekly,
        strike: parse_strike(identifier, &marker[4..], instrument)?,
        instrument,
    })
}

/// Read the first two digits after a month token as a weekly expiry day,
/// if and only if the date lands on the weekly expiry weekday.
fn weekly_from_leading_day(
    underlying: &str,
    year: i32,
    month: u32,
    digits: &str,
    instrument: InstrumentKind,
    calendar: &ExpiryCalendar,
) -> Option<ContractSpec> {
    let day: u32 = digits.get(..2)?.parse().ok()?;
    let strike_digits = &digits[2..];
    let strike_plausible = match instrument {
        InstrumentKind::Future => strike_digits.is_empty(),
        InstrumentKind::Call | InstrumentKind::Put => {
            !strike_digits.is_empty() && !strike_digits.starts_with('0')
        }
    };
    if !strike_plausible {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    if !matches_weekly_expiry(underlying, date, calendar) {
        return None;
    }

    let strike = if strike_digits.is_empty() {
        None
    } else {
        Some(strike_digits.parse().ok()?)
    };
    Some(ContractSpec {
        underlying: underlying.to_string(),
        expiry: date,
        kind: ExpiryKind::Weekly,
        strike,
        instrument,
    })
}

fn parse_strike(
    identifier: &str,
    digits: &str,
    instrument: InstrumentKind,
) -> Result<Option<u64>, ContractError> {
    let malformed = |reason| ContractError::Malformed {
        identifier: identifier.to_string(),
        reason,
    };
    match (instrument, digits.is_empty()) {
        (InstrumentKind::Future, true) => Ok(None),
        (InstrumentKind::Future, false) => Err(malformed("futures carry no strike")),
        (_, true) => Err(malformed("option is missing its strike")),
        (_, false) => digits
            .parse()
            .map(Some)
            .map_err(|_| malformed("strike out of range")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> ExpiryCalendar {
        ExpiryCalendar::uniform(Weekday::Thu)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_explicit_weekly() {
        let spec = resolve_contract("IDX25072524000CE", &calendar()).unwrap();
        assert_eq!(spec.expiry, date(2025, 7, 25));
        assert_eq!(spec.kind, ExpiryKind::Weekly);
        assert_eq!(spec.strike, Some(24000));
        assert_eq!(spec.instrument, InstrumentKind::Call);
    }

    #[test]
    fn test_explicit_weekly_with_separator() {
        let spec = resolve_contract("IDX25-072524000PE", &calendar()).unwrap();
        assert_eq!(spec.expiry, date(2025, 7, 25));
        assert_eq!(spec.instrument, InstrumentKind::Put);
    }

    #[test]
    fn test_monthly_last_thursday() {
        let spec = resolve_contract("IDX24OCT25000CE", &calendar()).unwrap();
        assert_eq!(spec.expiry, date(2024, 10, 31));
        assert_eq!(spec.kind, ExpiryKind::Monthly);
        assert_eq!(spec.strike, Some(25000));
    }

    #[test]
    fn test_leading_day_on_weekly_weekday_is_weekly() {
        // 2024-10-24 is a Thursday
        let spec = resolve_contract("IDX24OCT2425000CE", &calendar()).unwrap();
        assert_eq!(spec.expiry, date(2024, 10, 24));
        assert_eq!(spec.kind, ExpiryKind::Weekly);
        assert_eq!(spec.strike, Some(25000));
    }

    #[test]
    fn test_leading_day_off_weekly_weekday_is_monthly() {
        // 2024-10-25 is a Friday, so every digit is strike
        let spec = resolve_contract("IDX24OCT2552000CE", &calendar()).unwrap();
        assert_eq!(spec.expiry, date(2024, 10, 31));
        assert_eq!(spec.kind, ExpiryKind::Monthly);
        assert_eq!(spec.strike, Some(2_552_000));

        let friday = ExpiryCalendar::uniform(Weekday::Fri);
        let spec = resolve_contract("IDX24OCT2552000CE", &friday).unwrap();
        assert_eq!(spec.expiry, date(2024, 10, 25));
        assert_eq!(spec.kind, ExpiryKind::Weekly);
        assert_eq!(spec.strike, Some(52000));
    }

    #[test]
    fn test_strike_with_leading_zero_is_not_weekly() {
        let spec = resolve_contract("IDX24OCT24000CE", &calendar()).unwrap();
        assert_eq!(spec.kind, ExpiryKind::Monthly);
        assert_eq!(spec.strike, Some(24000));
    }

    #[test]
    fn test_monthly_future() {
        let spec = resolve_contract("IDX24DECFUT", &calendar()).unwrap();
        assert_eq!(spec.expiry, date(2024, 12, 26));
        assert_eq!(spec.strike, None);
        assert_eq!(spec.instrument, InstrumentKind::Future);
    }

    #[test]
    fn test_monthly_expiry_when_month_ends_on_weekday() {
        // October 2024 ends on a Thursday
        assert_eq!(monthly_expiry(2024, 10, Weekday::Thu), Some(date(2024, 10, 31)));
        assert_eq!(monthly_expiry(2024, 10, Weekday::Tue), Some(date(2024, 10, 29)));
        assert_eq!(monthly_expiry(2024, 13, Weekday::Tue), None);
    }

    #[test]
    fn test_matches_weekly_expiry() {
        let calendar = calendar().with_weekly("BANKIDX", Weekday::Wed);
        assert!(matches_weekly_expiry("IDX", date(2024, 10, 24), &calendar));
        assert!(!matches_weekly_expiry("BANKIDX", date(2024, 10, 24), &calendar));
        assert!(matches_weekly_expiry("BANKIDX", date(2024, 10, 23), &calendar));
    }

    #[test]
    fn test_equity_is_not_derivative() {
        assert!(matches!(
            resolve_contract("RELIANCE", &calendar()),
            Err(ContractError::NotDerivative(_))
        ));
        assert!(matches!(
            resolve_contract("INFY", &calendar()),
            Err(ContractError::NotDerivative(_))
        ));
    }

    #[test]
    fn test_invalid_explicit_date() {
        assert!(matches!(
            resolve_contract("IDX25023024000CE", &calendar()),
            Err(ContractError::InvalidDate { month: 2, day: 30, .. })
        ));
    }

    #[test]
    fn test_malformed_identifiers() {
        for identifier in ["IDX2XOCT25000CE", "IDX24XYZ25000CE", "IDX24OCTCE", "IDX24OCT100FUT"] {
            assert!(
                matches!(
                    resolve_contract(identifier, &calendar()),
                    Err(ContractError::Malformed { .. })
                ),
                "{identifier} should be malformed"
            );
        }
    }

    #[test]
    fn test_resolver_expires_on() {
        let resolver = ContractResolver::new(calendar());
        assert!(resolver.expires_on("IDX24OCT25000CE", date(2024, 10, 31)).unwrap());
        assert!(!resolver.expires_on("IDX24OCT25000CE", date(2024, 10, 30)).unwrap());
        assert_eq!(
            resolver.days_to_expiry("IDX24OCT25000CE", date(2024, 10, 21)).unwrap(),
            10
        );
    }
}
