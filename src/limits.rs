// Hard limits on what one engine accepts. Exceeding any of them is a
// LimitExceeded error, never a panic.

pub const MAX_CABINS: usize = 10_000;
pub const MAX_GUESTS: usize = 1_000_000;
pub const MAX_RESERVATIONS_PER_CABIN: usize = 100_000;
pub const MAX_PAYMENTS_PER_RESERVATION: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_DOCUMENT_LEN: usize = 64;
pub const MAX_PHONE_LEN: usize = 32;

/// Longest single reservation, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;
/// Widest availability grid, in days.
pub const MAX_AVAILABILITY_DAYS: i64 = 732;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;

/// 10 billion in currency units.
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000_000;
