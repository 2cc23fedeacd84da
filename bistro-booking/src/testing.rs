use std::sync::Arc;

use bistro_core::TableRegistry;
use bistro_notify::{NotificationBroker, Outbound, SubscriberHandle};
use bistro_shared::{BookingRequest, Table};
use bistro_store::MemoryStore;
use uuid::Uuid;

use crate::BookingService;

/// Floor plan used across the booking tests: numbers 1-7 with the
/// capacities of the default configuration.
pub fn floor_plan() -> Vec<Table> {
    [
        (1, 2, "window"),
        (2, 2, "window"),
        (3, 4, "main"),
        (4, 4, "main"),
        (5, 4, "main"),
        (6, 6, "terrace"),
        (7, 8, "private"),
    ]
    .into_iter()
    .map(|(number, capacity, location)| Table::new(number, capacity, location))
    .collect()
}

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub broker: Arc<NotificationBroker>,
    pub service: BookingService,
}

impl Fixture {
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::with_tables(floor_plan()));
        let broker = Arc::new(NotificationBroker::default());
        let service = BookingService::new(store.clone(), store.clone(), broker.clone());
        Self {
            store,
            broker,
            service,
        }
    }

    pub async fn table(&self, number: u32) -> Table {
        self.store.get_by_number(number).await.unwrap()
    }
}

/// Party of four on 2024-01-20 at 19:30.
pub fn booking_request(table: Option<Uuid>) -> BookingRequest {
    BookingRequest {
        customer_name: "Ada Lovelace".to_string(),
        customer_email: "ada@example.com".to_string(),
        customer_phone: "+44 20 7946 0018".to_string(),
        date: "2024-01-20".to_string(),
        time: "19:30".to_string(),
        party_size: 4,
        special_requests: None,
        table_preference: table,
    }
}

/// Everything queued for the subscriber so far.
pub fn drain(handle: &mut SubscriberHandle) -> Vec<Outbound> {
    std::iter::from_fn(|| handle.try_recv()).collect()
}
