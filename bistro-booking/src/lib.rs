pub mod availability;
pub mod codes;
pub mod error;
pub mod lifecycle;
pub mod service;
pub mod sweeper;

pub use availability::{Availability, AvailabilityChecker};
pub use codes::{CodeGenerator, RandomCodes};
pub use error::{BookingError, BookingResult};
pub use service::BookingService;
pub use sweeper::NoShowSweeper;

#[cfg(test)]
pub(crate) mod testing;
