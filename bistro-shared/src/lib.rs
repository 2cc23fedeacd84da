pub mod models;
pub mod pii;
pub mod serde_helpers;

pub use models::{
    BookingRequest, Envelope, EnvelopeType, EventKind, EventPayload, NotificationEvent,
    ParseStatusError, Reservation, ReservationStatus, Slot, Table, TableStatus,
};
