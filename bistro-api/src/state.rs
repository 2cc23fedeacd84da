use std::sync::Arc;

use bistro_booking::{AvailabilityChecker, BookingService};
use bistro_core::{ReservationStore, ShapeValidator, TableRegistry};
use bistro_notify::NotificationBroker;
use bistro_store::app_config::BookingRules;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

impl AuthConfig {
    /// An empty secret turns the staff gate off (local development).
    pub fn is_enabled(&self) -> bool {
        !self.secret.is_empty()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub bookings: Arc<BookingService>,
    pub availability: Arc<AvailabilityChecker>,
    pub broker: Arc<NotificationBroker>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        tables: Arc<dyn TableRegistry>,
        broker: Arc<NotificationBroker>,
        rules: &BookingRules,
        auth: AuthConfig,
    ) -> Self {
        let validator = ShapeValidator {
            max_party_size: rules.max_party_size,
        };
        let bookings = BookingService::new(reservations.clone(), tables.clone(), broker.clone())
            .with_validator(Arc::new(validator))
            .with_code_prefix(&rules.code_prefix);
        let availability = AvailabilityChecker::new(reservations, tables)
            .with_offsets(&rules.alternate_offsets_minutes);

        Self {
            bookings: Arc::new(bookings),
            availability: Arc::new(availability),
            broker,
            auth,
        }
    }
}
