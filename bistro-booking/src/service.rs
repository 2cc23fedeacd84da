use std::sync::Arc;

use bistro_core::{
    Applied, MaintenanceChange, RequestValidator, ReservationStore, ShapeValidator, StoreError,
    TableRegistry, ValidatedBooking,
};
use bistro_notify::NotificationBroker;
use bistro_shared::pii::Masked;
use bistro_shared::{
    BookingRequest, NotificationEvent, Reservation, ReservationStatus, Table, TableStatus,
};
use chrono::{NaiveDateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::codes::{CodeGenerator, RandomCodes};
use crate::error::{BookingError, BookingResult};
use crate::lifecycle::{self, Step};

/// Attempts at issuing a confirmation code before giving up
const MAX_CODE_ATTEMPTS: usize = 5;

/// Re-reads after a lost compare-and-set before giving up
const MAX_STALE_RETRIES: usize = 3;

/// Orchestrates reservation intake and the status lifecycle.
///
/// Every write goes through a single store call that performs the slot check
/// and the write together. Events are published after the write commits;
/// broker failures never reach the caller.
pub struct BookingService {
    reservations: Arc<dyn ReservationStore>,
    tables: Arc<dyn TableRegistry>,
    broker: Arc<NotificationBroker>,
    validator: Arc<dyn RequestValidator>,
    codes: Arc<dyn CodeGenerator>,
}

impl BookingService {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        tables: Arc<dyn TableRegistry>,
        broker: Arc<NotificationBroker>,
    ) -> Self {
        Self {
            reservations,
            tables,
            broker,
            validator: Arc::new(ShapeValidator::default()),
            codes: Arc::new(RandomCodes::default()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn RequestValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_code_generator(mut self, codes: Arc<dyn CodeGenerator>) -> Self {
        self.codes = codes;
        self
    }

    pub fn with_code_prefix(self, prefix: &str) -> Self {
        self.with_code_generator(Arc::new(RandomCodes::new(prefix)))
    }

    // ========================================================================
    // Intake
    // ========================================================================

    /// Validates and books a new pending reservation.
    ///
    /// A preferred table is bound immediately and claims the slot, but the
    /// table itself stays available until the reservation is confirmed.
    pub async fn create(&self, request: &BookingRequest) -> BookingResult<Reservation> {
        let booking = self.validator.validate(request).map_err(|errors| {
            debug!(%errors, "Booking request rejected");
            BookingError::Validation(errors)
        })?;

        if let Some(table_id) = booking.table_preference {
            let table = self.tables.get(table_id).await?;
            check_table_fits(&table, booking.party_size)?;
        }

        let mut reservation = new_reservation(booking);

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            reservation.confirmation_code = self.codes.generate();

            match self.reservations.insert(&reservation).await {
                Ok(()) => {
                    info!(
                        reservation_id = %reservation.id,
                        code = %reservation.confirmation_code,
                        email = %Masked(&reservation.customer_email),
                        phone = %Masked(&reservation.customer_phone),
                        party_size = reservation.party_size,
                        table_id = ?reservation.table_id,
                        "Reservation created"
                    );
                    self.broker
                        .publish(&NotificationEvent::new_reservation(reservation.clone()))
                        .await;
                    return Ok(reservation);
                }
                Err(StoreError::DuplicateCode(code)) => {
                    debug!(attempt, code = %code, "Confirmation code collision, regenerating");
                }
                Err(err @ StoreError::SlotConflict { .. }) => {
                    warn!(error = %err, "Booking rejected");
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(BookingError::Internal(format!(
            "no unique confirmation code after {MAX_CODE_ATTEMPTS} attempts"
        )))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Moves a reservation to `target` and applies the table side effect in
    /// the same store write. Asking for the current non-terminal status
    /// returns the record unchanged.
    pub async fn change_status(
        &self,
        id: Uuid,
        target: ReservationStatus,
    ) -> BookingResult<Reservation> {
        for _ in 0..MAX_STALE_RETRIES {
            let current = self.get(id).await?;

            let effect = match lifecycle::plan(current.status, target) {
                Ok(Step::Stay) => return Ok(current),
                Ok(Step::Advance(effect)) => effect,
                Err(err) => {
                    warn!(reservation_id = %id, error = %err, "Transition rejected");
                    return Err(err);
                }
            };

            match self
                .reservations
                .transition(id, current.status, target, effect)
                .await
            {
                Ok(applied) => {
                    info!(
                        reservation_id = %id,
                        from = %current.status,
                        to = %target,
                        "Reservation status changed"
                    );
                    return Ok(self.announce(applied, Some(current.status)).await);
                }
                Err(StoreError::StaleState { .. }) => {
                    debug!(reservation_id = %id, "Status moved underneath us, re-reading");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(BookingError::Internal(format!(
            "reservation {id} kept changing during update"
        )))
    }

    /// Binds a pending or confirmed reservation to `table_id`, re-checking
    /// the slot in the same store write.
    pub async fn assign_table(&self, id: Uuid, table_id: Uuid) -> BookingResult<Reservation> {
        for _ in 0..MAX_STALE_RETRIES {
            let current = self.get(id).await?;
            if !matches!(
                current.status,
                ReservationStatus::Pending | ReservationStatus::Confirmed
            ) {
                return Err(BookingError::validation(
                    "status",
                    format!("cannot assign a table to a {} reservation", current.status),
                ));
            }

            let table = self.tables.get(table_id).await?;
            check_table_fits(&table, current.party_size)?;

            match self
                .reservations
                .bind_table(id, current.status, table_id)
                .await
            {
                Ok(mut applied) => {
                    info!(
                        reservation_id = %id,
                        table = table.number,
                        "Table assigned"
                    );
                    if !applied.tables.iter().any(|t| t.id == table_id) {
                        applied.tables.push(table);
                    }
                    return Ok(self.announce(applied, None).await);
                }
                Err(StoreError::StaleState { .. }) => {
                    debug!(reservation_id = %id, "Status moved underneath us, re-reading");
                }
                Err(err @ StoreError::SlotConflict { .. }) => {
                    warn!(error = %err, "Table assignment rejected");
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(BookingError::Internal(format!(
            "reservation {id} kept changing during update"
        )))
    }

    /// Publishes the outcome of a store write and hands back the reservation.
    async fn announce(&self, applied: Applied, previous: Option<ReservationStatus>) -> Reservation {
        let Applied { reservation, tables } = applied;

        if let Some(previous) = previous {
            self.broker
                .publish(&NotificationEvent::status_changed(reservation.clone(), previous))
                .await;
        }
        for table in tables {
            debug!(table = table.number, status = %table.status, "Table updated");
            self.broker.publish(&NotificationEvent::table_updated(table)).await;
        }

        reservation
    }

    // ========================================================================
    // Tables
    // ========================================================================

    /// Operator override. Entering maintenance keeps the occupant reference;
    /// leaving it restores whatever the table's bookings still imply.
    pub async fn set_maintenance(&self, table_id: Uuid, on: bool) -> BookingResult<Table> {
        let MaintenanceChange { table, changed } = self.tables.set_maintenance(table_id, on).await?;
        if !changed {
            return Ok(table);
        }

        info!(
            table = table.number,
            status = %table.status,
            "Maintenance flag changed"
        );
        self.broker
            .publish(&NotificationEvent::table_updated(table.clone()))
            .await;
        Ok(table)
    }

    pub async fn list_tables(&self, status: Option<TableStatus>) -> BookingResult<Vec<Table>> {
        let tables = match status {
            Some(status) => self.tables.list_by_status(status).await?,
            None => self.tables.list().await?,
        };
        Ok(tables)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn get(&self, id: Uuid) -> BookingResult<Reservation> {
        self.reservations
            .get(id)
            .await?
            .ok_or_else(|| StoreError::reservation_not_found(id).into())
    }

    pub async fn find_by_code(&self, code: &str) -> BookingResult<Reservation> {
        let code = code.trim().to_ascii_uppercase();
        self.reservations
            .find_by_code(&code)
            .await?
            .ok_or(BookingError::NotFound {
                entity: "Reservation",
                id: code,
            })
    }

    pub async fn list(&self) -> BookingResult<Vec<Reservation>> {
        Ok(self.reservations.list().await?)
    }

    /// Pending or confirmed reservations starting at or before `cutoff`.
    pub async fn overdue(&self, cutoff: NaiveDateTime) -> BookingResult<Vec<Reservation>> {
        Ok(self.reservations.list_overdue(cutoff).await?)
    }
}

fn check_table_fits(table: &Table, party_size: u32) -> BookingResult<()> {
    if table.is_under_maintenance() {
        return Err(BookingError::validation(
            "tableId",
            format!("table {} is under maintenance", table.number),
        ));
    }
    if !table.can_seat(party_size) {
        return Err(BookingError::validation(
            "partySize",
            format!(
                "party of {party_size} exceeds capacity of table {} ({})",
                table.number, table.capacity
            ),
        ));
    }
    Ok(())
}

fn new_reservation(booking: ValidatedBooking) -> Reservation {
    let now = Utc::now();
    Reservation {
        id: Uuid::new_v4(),
        confirmation_code: String::new(),
        customer_name: booking.customer_name,
        customer_email: booking.customer_email,
        customer_phone: booking.customer_phone,
        date: booking.date,
        time: booking.time,
        party_size: booking.party_size,
        table_id: booking.table_preference,
        special_requests: booking.special_requests,
        status: ReservationStatus::Pending,
        created_at: now,
        updated_at: now,
    }
}
