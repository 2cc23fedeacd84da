use async_trait::async_trait;
use bistro_shared::{Reservation, ReservationStatus, Table, TableStatus};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::StoreResult;

/// What a reservation transition does to its bound table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableEffect {
    /// Hold the table for the reservation (only if it is free)
    Reserve,
    /// Mark the table occupied by the reservation
    Occupy,
    /// Free the table if the reservation is the one holding it
    Release,
}

impl TableEffect {
    /// Resolves the new `(status, occupant)` pair for `table`, or `None`
    /// when the table must be left untouched. Maintenance always wins.
    pub fn resolve(self, table: &Table, reservation_id: Uuid) -> Option<(TableStatus, Option<Uuid>)> {
        if table.is_under_maintenance() {
            return None;
        }

        let next = match self {
            TableEffect::Reserve if table.status == TableStatus::Available => {
                (TableStatus::Reserved, Some(reservation_id))
            }
            TableEffect::Reserve => return None,
            TableEffect::Occupy => (TableStatus::Occupied, Some(reservation_id)),
            TableEffect::Release if table.reservation_id == Some(reservation_id) => {
                (TableStatus::Available, None)
            }
            TableEffect::Release => return None,
        };

        if next == (table.status, table.reservation_id) {
            None
        } else {
            Some(next)
        }
    }
}

/// The state a table returns to when maintenance is cleared.
///
/// `holders` are the confirmed or seated reservations bound to the table. A
/// seated party wins, then a confirmed one; within each, the retained
/// occupant goes first and the earliest booking after it.
pub fn restored_state(occupant: Option<Uuid>, holders: &[Reservation]) -> (TableStatus, Option<Uuid>) {
    let first_with = |status: ReservationStatus| {
        holders
            .iter()
            .filter(|r| r.status == status)
            .min_by_key(|r| (Some(r.id) != occupant, r.date, r.time))
    };

    if let Some(seated) = first_with(ReservationStatus::Seated) {
        (TableStatus::Occupied, Some(seated.id))
    } else if let Some(confirmed) = first_with(ReservationStatus::Confirmed) {
        (TableStatus::Reserved, Some(confirmed.id))
    } else {
        (TableStatus::Available, None)
    }
}

/// Outcome of a maintenance toggle. `changed` is false when the table was
/// already in the requested mode.
#[derive(Debug, Clone)]
pub struct MaintenanceChange {
    pub table: Table,
    pub changed: bool,
}

/// Result of an atomic write: the reservation after the write and every
/// table whose state changed inside the same unit.
#[derive(Debug, Clone)]
pub struct Applied {
    pub reservation: Reservation,
    pub tables: Vec<Table>,
}

/// Repository for reservation records.
///
/// Every write method is a single indivisible unit against the no-double-booking
/// rule: implementations must not split the slot check from the write.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Inserts a new reservation, failing with `SlotConflict` when another
    /// active reservation holds the same slot and `DuplicateCode` when the
    /// confirmation code is taken.
    async fn insert(&self, reservation: &Reservation) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<Reservation>>;

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Reservation>>;

    /// All reservations, oldest first.
    async fn list(&self) -> StoreResult<Vec<Reservation>>;

    /// Active reservations with a bound table at exactly this date and time.
    async fn list_active_at(&self, date: NaiveDate, time: NaiveTime) -> StoreResult<Vec<Reservation>>;

    /// Pending or confirmed reservations starting at or before `cutoff`.
    async fn list_overdue(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Reservation>>;

    /// Compare-and-set status change. Fails with `StaleState` if the stored
    /// status is no longer `expected`. The table effect, if any, is applied
    /// to the bound table in the same unit.
    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        target: ReservationStatus,
        effect: Option<TableEffect>,
    ) -> StoreResult<Applied>;

    /// Binds the reservation to `table_id` after re-checking the slot.
    /// A previously bound table is released; a confirmed reservation
    /// reserves the new table.
    async fn bind_table(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        table_id: Uuid,
    ) -> StoreResult<Applied>;
}

/// Registry of physical tables. Pure state, no domain validation.
#[async_trait]
pub trait TableRegistry: Send + Sync {
    async fn get(&self, id: Uuid) -> StoreResult<Table>;

    async fn get_by_number(&self, number: u32) -> StoreResult<Table>;

    async fn set_status(
        &self,
        id: Uuid,
        status: TableStatus,
        occupant: Option<Uuid>,
    ) -> StoreResult<Table>;

    /// Sets or clears the maintenance flag. Reading the table, reading the
    /// reservations it restores to and the write form one unit with every
    /// reservation write. Entering maintenance keeps the occupant reference.
    async fn set_maintenance(&self, id: Uuid, on: bool) -> StoreResult<MaintenanceChange>;

    async fn list_by_status(&self, status: TableStatus) -> StoreResult<Vec<Table>>;

    /// All tables ordered by display number.
    async fn list(&self) -> StoreResult<Vec<Table>>;

    /// Out-of-band provisioning. A table with the same number keeps its id
    /// and status and takes the new capacity and location.
    async fn provision(&self, table: Table) -> StoreResult<Table>;
}
