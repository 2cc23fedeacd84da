pub mod repository;
pub mod validation;

use bistro_shared::ReservationStatus;
use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

pub use repository::{
    restored_state, Applied, MaintenanceChange, ReservationStore, TableEffect, TableRegistry,
};
pub use validation::{FieldError, RequestValidator, ShapeValidator, ValidatedBooking, ValidationErrors};

/// Failures raised by the persistence layer. Only `SlotConflict` and
/// `DuplicateCode` carry domain meaning; the rest are infrastructure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Slot already taken: table {table_id} on {date} at {}", .time.format("%H:%M"))]
    SlotConflict {
        table_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    },
    #[error("Confirmation code already issued: {0}")]
    DuplicateCode(String),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("Reservation {id} is no longer {expected}")]
    StaleState {
        id: Uuid,
        expected: ReservationStatus,
    },
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn reservation_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "Reservation",
            id: id.to_string(),
        }
    }

    pub fn table_not_found(id: impl ToString) -> Self {
        StoreError::NotFound {
            entity: "Table",
            id: id.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
