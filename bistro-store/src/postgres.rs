use async_trait::async_trait;
use bistro_core::{
    restored_state, Applied, MaintenanceChange, ReservationStore, StoreError, StoreResult, TableEffect,
    TableRegistry,
};
use bistro_shared::{Reservation, ReservationStatus, Slot, Table, TableStatus};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{PgConnection, PgExecutor, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::DbClient;

/// Partial unique index over active slots (see migrations)
const SLOT_INDEX: &str = "reservations_active_slot_idx";
const CODE_KEY: &str = "reservations_confirmation_code_key";

const ACTIVE_FILTER: &str = "status IN ('pending', 'confirmed', 'seated')";

/// PostgreSQL-backed reservation store and table registry.
///
/// No-double-booking is enforced by the partial unique index; the table row
/// lock taken inside each write transaction serializes writers per table.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_client(db: &DbClient) -> Self {
        Self::new(db.pool.clone())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    confirmation_code: String,
    customer_name: String,
    customer_email: String,
    customer_phone: String,
    date: NaiveDate,
    time: NaiveTime,
    party_size: i32,
    table_id: Option<Uuid>,
    special_requests: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = StoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        Ok(Reservation {
            id: row.id,
            confirmation_code: row.confirmation_code,
            customer_name: row.customer_name,
            customer_email: row.customer_email,
            customer_phone: row.customer_phone,
            date: row.date,
            time: row.time,
            party_size: u32::try_from(row.party_size)
                .map_err(|_| StoreError::Backend(format!("negative party size on {}", row.id)))?,
            table_id: row.table_id,
            special_requests: row.special_requests,
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Backend(format!("reservation {}: {e}", row.id)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TableRow {
    id: Uuid,
    number: i32,
    capacity: i32,
    location: String,
    status: String,
    reservation_id: Option<Uuid>,
}

impl TryFrom<TableRow> for Table {
    type Error = StoreError;

    fn try_from(row: TableRow) -> Result<Self, Self::Error> {
        let invalid = |field: &str| StoreError::Backend(format!("table {}: invalid {field}", row.id));
        Ok(Table {
            id: row.id,
            number: u32::try_from(row.number).map_err(|_| invalid("number"))?,
            capacity: u32::try_from(row.capacity).map_err(|_| invalid("capacity"))?,
            status: row.status.parse().map_err(|_| invalid("status"))?,
            location: row.location,
            reservation_id: row.reservation_id,
        })
    }
}

fn rows_to_reservations(rows: Vec<ReservationRow>) -> StoreResult<Vec<Reservation>> {
    rows.into_iter().map(Reservation::try_from).collect()
}

fn rows_to_tables(rows: Vec<TableRow>) -> StoreResult<Vec<Table>> {
    rows.into_iter().map(Table::try_from).collect()
}

/// Translates constraint violations into domain store errors.
fn map_db_err(err: sqlx::Error, slot: Option<Slot>, code: Option<&str>) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            match (db_err.constraint(), slot, code) {
                (Some(SLOT_INDEX), Some(slot), _) => {
                    return StoreError::SlotConflict {
                        table_id: slot.table_id,
                        date: slot.date,
                        time: slot.time,
                    }
                }
                (Some(CODE_KEY), _, Some(code)) => return StoreError::DuplicateCode(code.to_string()),
                _ => {}
            }
        }
    }
    backend(err)
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

// ============================================================================
// Table helpers shared by the registry and the reservation transactions
// ============================================================================

async fn lock_table(conn: &mut PgConnection, table_id: Uuid) -> StoreResult<Table> {
    let row = sqlx::query_as::<_, TableRow>("SELECT * FROM dining_tables WHERE id = $1 FOR UPDATE")
        .bind(table_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?
        .ok_or_else(|| StoreError::table_not_found(table_id))?;
    row.try_into()
}

async fn write_table_status<'e, E: PgExecutor<'e>>(
    executor: E,
    table_id: Uuid,
    status: TableStatus,
    occupant: Option<Uuid>,
) -> StoreResult<Option<Table>> {
    let row = sqlx::query_as::<_, TableRow>(
        "UPDATE dining_tables SET status = $2, reservation_id = $3 WHERE id = $1 RETURNING *",
    )
    .bind(table_id)
    .bind(status.as_str())
    .bind(occupant)
    .fetch_optional(executor)
    .await
    .map_err(backend)?;
    row.map(Table::try_from).transpose()
}

async fn apply_effect(
    conn: &mut PgConnection,
    table_id: Uuid,
    effect: TableEffect,
    reservation_id: Uuid,
) -> StoreResult<Option<Table>> {
    let table = lock_table(&mut *conn, table_id).await?;
    match effect.resolve(&table, reservation_id) {
        Some((status, occupant)) => write_table_status(&mut *conn, table_id, status, occupant).await,
        None => Ok(None),
    }
}

/// Table rows a rebinding touches, in the one order every writer locks them.
/// Crossing reassignments then queue on the first row instead of deadlocking.
fn lock_order(old: Option<Uuid>, new: Uuid) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = old.into_iter().chain([new]).collect();
    ids.sort();
    ids.dedup();
    ids
}

async fn reservation_exists(conn: &mut PgConnection, id: Uuid) -> StoreResult<bool> {
    let found = sqlx::query_scalar::<_, Uuid>("SELECT id FROM reservations WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;
    Ok(found.is_some())
}

// ============================================================================
// ReservationStore
// ============================================================================

#[async_trait]
impl ReservationStore for PgStore {
    async fn insert(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        if let Some(table_id) = reservation.table_id {
            lock_table(&mut tx, table_id).await?;
        }

        let party_size = i32::try_from(reservation.party_size)
            .map_err(|_| StoreError::Backend("party size out of range".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO reservations (id, confirmation_code, customer_name, customer_email, customer_phone,
                                      date, time, party_size, table_id, special_requests, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(reservation.id)
        .bind(&reservation.confirmation_code)
        .bind(&reservation.customer_name)
        .bind(&reservation.customer_email)
        .bind(&reservation.customer_phone)
        .bind(reservation.date)
        .bind(reservation.time)
        .bind(party_size)
        .bind(reservation.table_id)
        .bind(&reservation.special_requests)
        .bind(reservation.status.as_str())
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err(e, reservation.slot(), Some(reservation.confirmation_code.as_str())))?;

        tx.commit().await.map_err(backend)?;
        debug!(reservation_id = %reservation.id, "reservation inserted");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Reservation>> {
        sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE confirmation_code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn list(&self) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_reservations(rows)
    }

    async fn list_active_at(&self, date: NaiveDate, time: NaiveTime) -> StoreResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT * FROM reservations WHERE date = $1 AND time = $2 AND table_id IS NOT NULL AND {ACTIVE_FILTER}"
        );
        let rows = sqlx::query_as::<_, ReservationRow>(&sql)
            .bind(date)
            .bind(time)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_reservations(rows)
    }

    async fn list_overdue(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT * FROM reservations
            WHERE status IN ('pending', 'confirmed') AND (date + time) <= $1
            ORDER BY date, time
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows_to_reservations(rows)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        target: ReservationStatus,
        effect: Option<TableEffect>,
    ) -> StoreResult<Applied> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query_as::<_, ReservationRow>(
            "UPDATE reservations SET status = $3, updated_at = now() WHERE id = $1 AND status = $2 RETURNING *",
        )
        .bind(id)
        .bind(expected.as_str())
        .bind(target.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let reservation = match row {
            Some(row) => Reservation::try_from(row)?,
            None => {
                return Err(if reservation_exists(&mut tx, id).await? {
                    StoreError::StaleState { id, expected }
                } else {
                    StoreError::reservation_not_found(id)
                });
            }
        };

        let mut tables = Vec::new();
        if let (Some(table_id), Some(effect)) = (reservation.table_id, effect) {
            tables.extend(apply_effect(&mut tx, table_id, effect, id).await?);
        }

        tx.commit().await.map_err(backend)?;
        Ok(Applied { reservation, tables })
    }

    async fn bind_table(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        table_id: Uuid,
    ) -> StoreResult<Applied> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let current: Reservation =
            sqlx::query_as::<_, ReservationRow>("SELECT * FROM reservations WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .ok_or_else(|| StoreError::reservation_not_found(id))?
                .try_into()?;
        if current.status != expected {
            return Err(StoreError::StaleState { id, expected });
        }

        for locked in lock_order(current.table_id, table_id) {
            lock_table(&mut tx, locked).await?;
        }

        let new_slot = Slot {
            table_id,
            date: current.date,
            time: current.time,
        };
        let reservation: Reservation = sqlx::query_as::<_, ReservationRow>(
            "UPDATE reservations SET table_id = $2, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(table_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_db_err(e, Some(new_slot), None))?
        .try_into()?;

        let mut tables = Vec::new();
        if let Some(old_table) = current.table_id.filter(|old| *old != table_id) {
            tables.extend(apply_effect(&mut tx, old_table, TableEffect::Release, id).await?);
        }
        if expected == ReservationStatus::Confirmed {
            tables.extend(apply_effect(&mut tx, table_id, TableEffect::Reserve, id).await?);
        }

        tx.commit().await.map_err(backend)?;
        Ok(Applied { reservation, tables })
    }
}

// ============================================================================
// TableRegistry
// ============================================================================

#[async_trait]
impl TableRegistry for PgStore {
    async fn get(&self, id: Uuid) -> StoreResult<Table> {
        sqlx::query_as::<_, TableRow>("SELECT * FROM dining_tables WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::table_not_found(id))?
            .try_into()
    }

    async fn get_by_number(&self, number: u32) -> StoreResult<Table> {
        let number_param = i32::try_from(number).map_err(|_| StoreError::table_not_found(format!("#{number}")))?;
        sqlx::query_as::<_, TableRow>("SELECT * FROM dining_tables WHERE number = $1")
            .bind(number_param)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::table_not_found(format!("#{number}")))?
            .try_into()
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: TableStatus,
        occupant: Option<Uuid>,
    ) -> StoreResult<Table> {
        write_table_status(&self.pool, id, status, occupant)
            .await?
            .ok_or_else(|| StoreError::table_not_found(id))
    }

    async fn set_maintenance(&self, id: Uuid, on: bool) -> StoreResult<MaintenanceChange> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let table = lock_table(&mut tx, id).await?;
        if table.is_under_maintenance() == on {
            return Ok(MaintenanceChange {
                table,
                changed: false,
            });
        }

        let (status, occupant) = if on {
            (TableStatus::Maintenance, table.reservation_id)
        } else {
            // transitions of these rows apply their table effect only after this lock is released
            let rows = sqlx::query_as::<_, ReservationRow>(
                "SELECT * FROM reservations WHERE table_id = $1 AND status IN ('confirmed', 'seated')",
            )
            .bind(id)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?;
            restored_state(table.reservation_id, &rows_to_reservations(rows)?)
        };

        let table = write_table_status(&mut *tx, id, status, occupant)
            .await?
            .ok_or_else(|| StoreError::table_not_found(id))?;
        tx.commit().await.map_err(backend)?;
        Ok(MaintenanceChange {
            table,
            changed: true,
        })
    }

    async fn list_by_status(&self, status: TableStatus) -> StoreResult<Vec<Table>> {
        let rows = sqlx::query_as::<_, TableRow>("SELECT * FROM dining_tables WHERE status = $1 ORDER BY number")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_tables(rows)
    }

    async fn list(&self) -> StoreResult<Vec<Table>> {
        let rows = sqlx::query_as::<_, TableRow>("SELECT * FROM dining_tables ORDER BY number")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows_to_tables(rows)
    }

    async fn provision(&self, table: Table) -> StoreResult<Table> {
        let out_of_range = |field: &str| StoreError::Backend(format!("table {field} out of range"));
        sqlx::query_as::<_, TableRow>(
            r#"
            INSERT INTO dining_tables (id, number, capacity, location, status, reservation_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (number) DO UPDATE
                SET capacity = EXCLUDED.capacity, location = EXCLUDED.location
            RETURNING *
            "#,
        )
        .bind(table.id)
        .bind(i32::try_from(table.number).map_err(|_| out_of_range("number"))?)
        .bind(i32::try_from(table.capacity).map_err(|_| out_of_range("capacity"))?)
        .bind(&table.location)
        .bind(table.status.as_str())
        .bind(table.reservation_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?
        .try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crossing_rebinds_lock_in_same_order() {
        let (t5, t6) = (Uuid::new_v4(), Uuid::new_v4());

        assert_eq!(lock_order(Some(t5), t6), lock_order(Some(t6), t5));
        assert_eq!(lock_order(Some(t5), t6).len(), 2);
    }

    #[test]
    fn test_lock_order_without_previous_table() {
        let t5 = Uuid::new_v4();

        assert_eq!(lock_order(None, t5), vec![t5]);
        assert_eq!(lock_order(Some(t5), t5), vec![t5]);
    }
}
