pub mod events;
pub mod reservation;
pub mod table;

pub use events::{Envelope, EnvelopeType, EventKind, EventPayload, NotificationEvent};
pub use reservation::{BookingRequest, ParseStatusError, Reservation, ReservationStatus, Slot};
pub use table::{Table, TableStatus};
