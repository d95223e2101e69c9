use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{BookingStatus, ClosedReason, DateParseError, TimeOfDay, TimeParseError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },
    #[error("business closed on {date} ({reason})")]
    BusinessClosed { date: NaiveDate, reason: ClosedReason },
    #[error("slot {date} {time} is not available")]
    SlotUnavailable { date: NaiveDate, time: TimeOfDay },
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("storage error: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn date(e: DateParseError) -> Self {
        Self::validation("date", e.to_string())
    }

    pub fn time(field: &'static str, e: TimeParseError) -> Self {
        Self::validation(field, e.to_string())
    }

    /// Stable code for the boundary layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "INVALID_INPUT",
            EngineError::BusinessClosed { .. } => "BUSINESS_CLOSED",
            EngineError::SlotUnavailable { .. } => "SLOT_TAKEN",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
