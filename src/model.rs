use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in minor units (cents). Non-negative for every stored payment.
pub type Cents = i64;

/// Half-open run of nights `[check_in, check_out)`.
///
/// The guest sleeps on `check_in`, `check_in + 1`, … `check_out - 1`. The
/// check-out day itself is free and can be someone else's check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must be before check_out");
        Self { check_in, check_out }
    }

    /// Inclusive calendar window `[first, last]` as a half-open stay.
    /// `None` when `last` is the final representable date.
    pub fn from_inclusive(first: NaiveDate, last: NaiveDate) -> Option<Self> {
        last.succ_opt().map(|end| Self::new(first, end))
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    /// Every occupied night, in order.
    pub fn nights_iter(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.check_out;
        self.check_in.iter_days().take_while(move |d| *d < end)
    }

    /// Intersection with `other`, if any night is shared.
    pub fn clamp_to(&self, other: &Stay) -> Option<Stay> {
        let check_in = self.check_in.max(other.check_in);
        let check_out = self.check_out.min(other.check_out);
        (check_in < check_out).then(|| Stay::new(check_in, check_out))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    Other,
}

impl PaymentMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "cash" => Some(Self::Cash),
            "card" => Some(Self::Card),
            "transfer" => Some(Self::Transfer),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Card => "card",
            Self::Transfer => "transfer",
            Self::Other => "other",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render cents as a decimal amount, e.g. `15050` → `"150.50"`.
pub fn format_cents(amount: Cents) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parse a decimal amount with at most two fraction digits into cents.
/// Accepts `150`, `150.5`, `150.50`, `.75` and a leading minus.
pub fn parse_cents(text: &str) -> Option<Cents> {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
    if (whole.is_empty() && frac.is_empty())
        || frac.len() > 2
        || !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let frac: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().ok()? * 10,
        _ => frac.parse().ok()?,
    };
    let cents = whole.checked_mul(100)?.checked_add(frac)?;
    Some(if negative { -cents } else { cents })
}

/// A committed claim on a cabin. Never mutated after admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub cabin_id: Ulid,
    pub stay: Stay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub id: Ulid,
    pub reservation_id: Ulid,
    pub amount: Cents,
    pub method: PaymentMethod,
    pub recorded_on: NaiveDate,
}

impl Payment {
    pub fn falls_in_month(&self, month: u32, year: i32) -> bool {
        self.recorded_on.month() == month && self.recorded_on.year() == year
    }
}

#[derive(Debug, Clone)]
pub struct CabinState {
    pub id: Ulid,
    pub name: String,
    /// Number of guests the cabin sleeps. Informational; a cabin holds
    /// one reservation per night regardless.
    pub capacity: u32,
    /// Reservations on this cabin, sorted by `stay.check_in`.
    pub reservations: Vec<Reservation>,
}

impl CabinState {
    pub fn new(id: Ulid, name: String, capacity: u32) -> Self {
        Self {
            id,
            name,
            capacity,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by check-in.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.stay.check_in, |r| r.stay.check_in)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Reservations sharing at least one night with `window`.
    /// Binary search skips everything checking in on or after `window.check_out`.
    pub fn overlapping(&self, window: &Stay) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.check_in < window.check_out);
        self.reservations
            .get(..right_bound)
            .unwrap_or_default()
            .iter()
            .filter(move |r| r.stay.check_out > window.check_in)
    }
}

#[derive(Debug, Clone)]
pub struct GuestState {
    pub id: Ulid,
    pub name: String,
    pub document: String,
    pub phone: Option<String>,
    /// Ids of reservations held by this guest.
    pub reservations: Vec<Ulid>,
}

impl GuestState {
    pub fn new(id: Ulid, name: String, document: String, phone: Option<String>) -> Self {
        Self {
            id,
            name,
            document,
            phone,
            reservations: Vec::new(),
        }
    }
}

/// WAL record format. One event is one atomic state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CabinCreated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    CabinDeleted {
        id: Ulid,
    },
    GuestCreated {
        id: Ulid,
        name: String,
        document: String,
        phone: Option<String>,
    },
    GuestDeleted {
        id: Ulid,
    },
    ReservationAdmitted {
        id: Ulid,
        guest_id: Ulid,
        cabin_id: Ulid,
        stay: Stay,
    },
    /// Cascade delete: the payments go with the reservation in one record.
    ReservationDeleted {
        id: Ulid,
        guest_id: Ulid,
        cabin_id: Ulid,
        payment_ids: Vec<Ulid>,
    },
    PaymentRecorded {
        id: Ulid,
        reservation_id: Ulid,
        amount: Cents,
        method: PaymentMethod,
        recorded_on: NaiveDate,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Free,
    Occupied,
}

impl Occupancy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Occupancy::Free => "free",
            Occupancy::Occupied => "occupied",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayStatus {
    pub date: NaiveDate,
    pub occupancy: Occupancy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabinInfo {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestInfo {
    pub id: Ulid,
    pub name: String,
    pub document: String,
    pub phone: Option<String>,
}

/// Reservation joined with guest and cabin names, for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationView {
    pub id: Ulid,
    pub guest_id: Ulid,
    pub guest_name: String,
    pub cabin_id: Ulid,
    pub cabin_name: String,
    pub stay: Stay,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabinAvailability {
    pub cabin: CabinInfo,
    pub days: Vec<DayStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevenueReport {
    pub month: u32,
    pub year: i32,
    pub payments: Vec<Payment>,
    pub total: Cents,
}
