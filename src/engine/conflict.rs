use chrono::{Datelike, NaiveDate};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

pub(crate) fn validate_date(date: NaiveDate) -> Result<(), EngineError> {
    if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&date.year()) {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    Ok(())
}

/// Turn raw check-in/check-out dates into a bookable stay.
pub(crate) fn validate_stay(check_in: NaiveDate, check_out: NaiveDate) -> Result<Stay, EngineError> {
    if check_out <= check_in {
        return Err(EngineError::InvalidRange {
            start: check_in,
            end: check_out,
        });
    }
    validate_date(check_in)?;
    validate_date(check_out)?;
    let stay = Stay::new(check_in, check_out);
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    Ok(stay)
}

/// Turn an inclusive calendar window into a half-open query window.
pub(crate) fn validate_window(first: NaiveDate, last: NaiveDate) -> Result<Stay, EngineError> {
    if last < first {
        return Err(EngineError::InvalidRange {
            start: first,
            end: last,
        });
    }
    validate_date(first)?;
    validate_date(last)?;
    let window = Stay::from_inclusive(first, last)
        .ok_or(EngineError::LimitExceeded("date out of range"))?;
    if window.nights() > MAX_AVAILABILITY_DAYS {
        return Err(EngineError::LimitExceeded("availability window too wide"));
    }
    Ok(window)
}

/// First reservation on the cabin sharing a night with `stay`.
///
/// Half-open overlap: `a.check_in < b.check_out && b.check_in < a.check_out`.
/// A reservation checking out on `stay.check_in` is not a conflict.
pub(crate) fn first_conflict<'a>(cabin: &'a CabinState, stay: &Stay) -> Option<&'a Reservation> {
    cabin.overlapping(stay).find(|r| r.stay.overlaps(stay))
}

pub(crate) fn check_no_overlap(cabin: &CabinState, stay: &Stay) -> Result<(), EngineError> {
    match first_conflict(cabin, stay) {
        Some(existing) => Err(EngineError::DoubleBooked(existing.id)),
        None => Ok(()),
    }
}
