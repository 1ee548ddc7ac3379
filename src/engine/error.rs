use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::Cents;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid date range: {end} is not after {start}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("cabin is already booked for those dates (reservation {0})")]
    DoubleBooked(Ulid),
    #[error("cannot delete {0}: it still has reservations")]
    HasActiveReservations(Ulid),
    #[error("capacity must be a positive number of guests")]
    InvalidCapacity,
    #[error("amount must be non-negative, got {0} cents")]
    InvalidAmount(Cents),
    #[error("month must be between 1 and 12, got {0}")]
    InvalidMonth(u32),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "22007",
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::DoubleBooked(_) => "23P01",
            EngineError::HasActiveReservations(_) => "23503",
            EngineError::InvalidCapacity
            | EngineError::InvalidAmount(_)
            | EngineError::InvalidMonth(_) => "22023",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::Storage(_) => "58030",
        }
    }

    /// Short label for the admissions metric.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::DoubleBooked(_) => "double_booked",
            EngineError::HasActiveReservations(_) => "has_active_reservations",
            EngineError::InvalidCapacity => "invalid_capacity",
            EngineError::InvalidAmount(_) => "invalid_amount",
            EngineError::InvalidMonth(_) => "invalid_month",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Storage(_) => "storage",
        }
    }
}
