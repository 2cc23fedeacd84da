use bistro_core::{StoreError, ValidationErrors};
use bistro_shared::ReservationStatus;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    #[error("Slot already taken: table {table_id} on {date} at {}", .time.format("%H:%M"))]
    SlotConflict {
        table_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        BookingError::Validation(ValidationErrors::single(field, message))
    }
}

impl From<ValidationErrors> for BookingError {
    fn from(errors: ValidationErrors) -> Self {
        BookingError::Validation(errors)
    }
}

impl From<StoreError> for BookingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SlotConflict {
                table_id,
                date,
                time,
            } => BookingError::SlotConflict {
                table_id,
                date,
                time,
            },
            StoreError::NotFound { entity, id } => BookingError::NotFound { entity, id },
            other => BookingError::Internal(other.to_string()),
        }
    }
}

pub type BookingResult<T> = Result<T, BookingError>;
