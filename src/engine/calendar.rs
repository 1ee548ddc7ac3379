use chrono::NaiveDate;

use crate::model::*;

// ── Occupancy grid ────────────────────────────────────────────────

/// Per-day occupancy of one cabin over the inclusive window `[first, last]`.
///
/// Every day starts free. Each reservation marks its nights
/// `[check_in, check_out - 1]` occupied; the check-out day is left alone.
/// A day is occupied if any reservation marks it.
///
/// Returns an empty grid when `first > last`.
pub fn occupancy_grid(cabin: &CabinState, first: NaiveDate, last: NaiveDate) -> Vec<DayStatus> {
    if first > last {
        return Vec::new();
    }
    let mut days: Vec<DayStatus> = first
        .iter_days()
        .take_while(|d| *d <= last)
        .map(|date| DayStatus {
            date,
            occupancy: Occupancy::Free,
        })
        .collect();

    // The last representable date cannot be turned into a half-open window;
    // the grid would be meaningless there anyway.
    let Some(window) = Stay::from_inclusive(first, last) else {
        return days;
    };

    for reservation in cabin.overlapping(&window) {
        let Some(nights) = reservation.stay.clamp_to(&window) else {
            continue;
        };
        for night in nights.nights_iter() {
            let offset = (night - first).num_days();
            if let Ok(idx) = usize::try_from(offset)
                && let Some(day) = days.get_mut(idx)
            {
                day.occupancy = Occupancy::Occupied;
            }
        }
    }

    days
}
