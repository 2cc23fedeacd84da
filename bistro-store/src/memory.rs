use async_trait::async_trait;
use bistro_core::{
    restored_state, Applied, MaintenanceChange, ReservationStore, StoreError, StoreResult, TableEffect,
    TableRegistry,
};
use bistro_shared::{Reservation, ReservationStatus, Slot, Table, TableStatus};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Process-local store for reservations and tables.
///
/// One mutex guards reservations, the slot index, the code index and the
/// tables together, so every write (slot check + insert, status change +
/// table side effect, rebinding) runs as one unit.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    reservations: HashMap<Uuid, Reservation>,
    /// Slots held by active reservations
    slots: HashMap<Slot, Uuid>,
    codes: HashMap<String, Uuid>,
    tables: HashMap<Uuid, Table>,
}

impl Inner {
    fn claim_slot(&mut self, slot: Slot, reservation_id: Uuid) -> StoreResult<()> {
        match self.slots.get(&slot) {
            Some(holder) if *holder != reservation_id => Err(StoreError::SlotConflict {
                table_id: slot.table_id,
                date: slot.date,
                time: slot.time,
            }),
            _ => {
                self.slots.insert(slot, reservation_id);
                Ok(())
            }
        }
    }

    fn free_slot(&mut self, slot: &Slot, reservation_id: Uuid) {
        if self.slots.get(slot) == Some(&reservation_id) {
            self.slots.remove(slot);
        }
    }

    fn apply_effect(&mut self, table_id: Uuid, effect: TableEffect, reservation_id: Uuid) -> Option<Table> {
        let table = self.tables.get_mut(&table_id)?;
        let (status, occupant) = effect.resolve(table, reservation_id)?;
        table.status = status;
        table.reservation_id = occupant;
        Some(table.clone())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-provisioned with `tables`.
    pub fn with_tables(tables: impl IntoIterator<Item = Table>) -> Self {
        let inner = Inner {
            tables: tables.into_iter().map(|t| (t.id, t)).collect(),
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn insert(&self, reservation: &Reservation) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Backend(format!(
                "reservation {} already exists",
                reservation.id
            )));
        }
        if inner.codes.contains_key(&reservation.confirmation_code) {
            return Err(StoreError::DuplicateCode(reservation.confirmation_code.clone()));
        }
        if let Some(table_id) = reservation.table_id {
            if !inner.tables.contains_key(&table_id) {
                return Err(StoreError::table_not_found(table_id));
            }
        }
        if let (Some(slot), true) = (reservation.slot(), reservation.is_active()) {
            inner.claim_slot(slot, reservation.id)?;
        }

        inner
            .codes
            .insert(reservation.confirmation_code.clone(), reservation.id);
        inner.reservations.insert(reservation.id, reservation.clone());
        debug!(reservation_id = %reservation.id, "reservation inserted");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Reservation>> {
        Ok(self.inner.lock().await.reservations.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> StoreResult<Option<Reservation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .codes
            .get(code)
            .and_then(|id| inner.reservations.get(id))
            .cloned())
    }

    async fn list(&self) -> StoreResult<Vec<Reservation>> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Reservation> = inner.reservations.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn list_active_at(&self, date: NaiveDate, time: NaiveTime) -> StoreResult<Vec<Reservation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .slots
            .iter()
            .filter(|(slot, _)| slot.date == date && slot.time == time)
            .filter_map(|(_, id)| inner.reservations.get(id))
            .cloned()
            .collect())
    }

    async fn list_overdue(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<Reservation>> {
        let inner = self.inner.lock().await;
        let mut overdue: Vec<Reservation> = inner
            .reservations
            .values()
            .filter(|r| matches!(r.status, ReservationStatus::Pending | ReservationStatus::Confirmed))
            .filter(|r| r.starts_at() <= cutoff)
            .cloned()
            .collect();
        overdue.sort_by_key(|r| r.starts_at());
        Ok(overdue)
    }

    async fn transition(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        target: ReservationStatus,
        effect: Option<TableEffect>,
    ) -> StoreResult<Applied> {
        let mut inner = self.inner.lock().await;

        let current = inner
            .reservations
            .get(&id)
            .ok_or_else(|| StoreError::reservation_not_found(id))?;
        if current.status != expected {
            return Err(StoreError::StaleState { id, expected });
        }
        let slot = current.slot();

        if let Some(slot) = slot {
            if target.is_active() {
                inner.claim_slot(slot, id)?;
            } else {
                inner.free_slot(&slot, id);
            }
        }

        let mut tables = Vec::new();
        if let (Some(slot), Some(effect)) = (slot, effect) {
            tables.extend(inner.apply_effect(slot.table_id, effect, id));
        }

        let reservation = inner
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StoreError::reservation_not_found(id))?;
        reservation.update_status(target);

        Ok(Applied {
            reservation: reservation.clone(),
            tables,
        })
    }

    async fn bind_table(
        &self,
        id: Uuid,
        expected: ReservationStatus,
        table_id: Uuid,
    ) -> StoreResult<Applied> {
        let mut inner = self.inner.lock().await;

        if !inner.tables.contains_key(&table_id) {
            return Err(StoreError::table_not_found(table_id));
        }
        let current = inner
            .reservations
            .get(&id)
            .ok_or_else(|| StoreError::reservation_not_found(id))?;
        if current.status != expected {
            return Err(StoreError::StaleState { id, expected });
        }
        let old_slot = current.slot();
        let new_slot = Slot {
            table_id,
            date: current.date,
            time: current.time,
        };

        inner.claim_slot(new_slot, id)?;

        let mut tables = Vec::new();
        if let Some(old) = old_slot.filter(|old| old.table_id != table_id) {
            inner.free_slot(&old, id);
            tables.extend(inner.apply_effect(old.table_id, TableEffect::Release, id));
        }
        if expected == ReservationStatus::Confirmed {
            tables.extend(inner.apply_effect(table_id, TableEffect::Reserve, id));
        }

        let reservation = inner
            .reservations
            .get_mut(&id)
            .ok_or_else(|| StoreError::reservation_not_found(id))?;
        reservation.table_id = Some(table_id);
        reservation.updated_at = Utc::now();

        Ok(Applied {
            reservation: reservation.clone(),
            tables,
        })
    }
}

#[async_trait]
impl TableRegistry for MemoryStore {
    async fn get(&self, id: Uuid) -> StoreResult<Table> {
        self.inner
            .lock()
            .await
            .tables
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::table_not_found(id))
    }

    async fn get_by_number(&self, number: u32) -> StoreResult<Table> {
        self.inner
            .lock()
            .await
            .tables
            .values()
            .find(|t| t.number == number)
            .cloned()
            .ok_or_else(|| StoreError::table_not_found(format!("#{number}")))
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: TableStatus,
        occupant: Option<Uuid>,
    ) -> StoreResult<Table> {
        let mut inner = self.inner.lock().await;
        let table = inner
            .tables
            .get_mut(&id)
            .ok_or_else(|| StoreError::table_not_found(id))?;
        table.status = status;
        table.reservation_id = occupant;
        Ok(table.clone())
    }

    async fn set_maintenance(&self, id: Uuid, on: bool) -> StoreResult<MaintenanceChange> {
        let mut inner = self.inner.lock().await;
        let table = inner
            .tables
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::table_not_found(id))?;
        if table.is_under_maintenance() == on {
            return Ok(MaintenanceChange {
                table,
                changed: false,
            });
        }

        let (status, occupant) = if on {
            (TableStatus::Maintenance, table.reservation_id)
        } else {
            let holders: Vec<Reservation> = inner
                .reservations
                .values()
                .filter(|r| r.table_id == Some(id))
                .filter(|r| matches!(r.status, ReservationStatus::Confirmed | ReservationStatus::Seated))
                .cloned()
                .collect();
            restored_state(table.reservation_id, &holders)
        };

        let table = inner
            .tables
            .get_mut(&id)
            .ok_or_else(|| StoreError::table_not_found(id))?;
        table.status = status;
        table.reservation_id = occupant;
        Ok(MaintenanceChange {
            table: table.clone(),
            changed: true,
        })
    }

    async fn list_by_status(&self, status: TableStatus) -> StoreResult<Vec<Table>> {
        let mut tables = TableRegistry::list(self).await?;
        tables.retain(|t| t.status == status);
        Ok(tables)
    }

    async fn list(&self) -> StoreResult<Vec<Table>> {
        let inner = self.inner.lock().await;
        let mut tables: Vec<Table> = inner.tables.values().cloned().collect();
        tables.sort_by_key(|t| t.number);
        Ok(tables)
    }

    async fn provision(&self, table: Table) -> StoreResult<Table> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.tables.values_mut().find(|t| t.number == table.number) {
            existing.capacity = table.capacity;
            existing.location = table.location;
            return Ok(existing.clone());
        }
        inner.tables.insert(table.id, table.clone());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn reservation(table_id: Option<Uuid>, code: &str) -> Reservation {
        let now = Utc::now();
        Reservation {
            id: Uuid::new_v4(),
            confirmation_code: code.to_string(),
            customer_name: "Test Guest".to_string(),
            customer_email: "guest@example.com".to_string(),
            customer_phone: "5550102030".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            time: NaiveTime::from_hms_opt(19, 30, 0).unwrap(),
            party_size: 4,
            table_id,
            special_requests: None,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_taken_slot() {
        let table = Table::new(5, 4, "main");
        let store = MemoryStore::with_tables([table.clone()]);

        store.insert(&reservation(Some(table.id), "A")).await.unwrap();
        let err = store.insert(&reservation(Some(table.id), "B")).await.unwrap_err();
        assert!(matches!(err, StoreError::SlotConflict { table_id, .. } if table_id == table.id));

        // unassigned reservations never conflict
        store.insert(&reservation(None, "C")).await.unwrap();
        store.insert(&reservation(None, "D")).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_code() {
        let store = MemoryStore::new();
        store.insert(&reservation(None, "SAME")).await.unwrap();
        let err = store.insert(&reservation(None, "SAME")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(code) if code == "SAME"));
    }

    #[tokio::test]
    async fn test_terminal_transition_frees_slot() {
        let table = Table::new(5, 4, "main");
        let store = MemoryStore::with_tables([table.clone()]);
        let first = reservation(Some(table.id), "A");
        store.insert(&first).await.unwrap();

        store
            .transition(first.id, ReservationStatus::Pending, ReservationStatus::Cancelled, Some(TableEffect::Release))
            .await
            .unwrap();

        store.insert(&reservation(Some(table.id), "B")).await.unwrap();
        assert_eq!(
            store.list_active_at(first.date, first.time).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        let r = reservation(None, "A");
        store.insert(&r).await.unwrap();

        let err = store
            .transition(r.id, ReservationStatus::Confirmed, ReservationStatus::Seated, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StaleState { .. }));

        let err = store
            .transition(Uuid::new_v4(), ReservationStatus::Pending, ReservationStatus::Confirmed, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_transition_applies_table_effect_in_same_unit() {
        let table = Table::new(5, 4, "main");
        let store = MemoryStore::with_tables([table.clone()]);
        let r = reservation(Some(table.id), "A");
        store.insert(&r).await.unwrap();

        let applied = store
            .transition(r.id, ReservationStatus::Pending, ReservationStatus::Confirmed, Some(TableEffect::Reserve))
            .await
            .unwrap();
        assert_eq!(applied.reservation.status, ReservationStatus::Confirmed);
        assert_eq!(applied.tables.len(), 1);
        assert_eq!(applied.tables[0].status, TableStatus::Reserved);
        assert_eq!(applied.tables[0].reservation_id, Some(r.id));

        let stored = TableRegistry::get(&store, table.id).await.unwrap();
        assert_eq!(stored.status, TableStatus::Reserved);
    }

    #[tokio::test]
    async fn test_bind_table_moves_reservation() {
        let t5 = Table::new(5, 4, "main");
        let t6 = Table::new(6, 6, "terrace");
        let store = MemoryStore::with_tables([t5.clone(), t6.clone()]);

        let holder = reservation(Some(t6.id), "HOLD");
        store.insert(&holder).await.unwrap();

        let r = reservation(Some(t5.id), "A");
        store.insert(&r).await.unwrap();
        store
            .transition(r.id, ReservationStatus::Pending, ReservationStatus::Confirmed, Some(TableEffect::Reserve))
            .await
            .unwrap();

        let err = store
            .bind_table(r.id, ReservationStatus::Confirmed, t6.id)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::SlotConflict { .. }));

        store
            .transition(holder.id, ReservationStatus::Pending, ReservationStatus::Cancelled, Some(TableEffect::Release))
            .await
            .unwrap();

        let applied = store
            .bind_table(r.id, ReservationStatus::Confirmed, t6.id)
            .await
            .unwrap();
        assert_eq!(applied.reservation.table_id, Some(t6.id));
        let statuses: Vec<(u32, TableStatus)> =
            applied.tables.iter().map(|t| (t.number, t.status)).collect();
        assert_eq!(
            statuses,
            vec![(5, TableStatus::Available), (6, TableStatus::Reserved)]
        );
    }

    #[tokio::test]
    async fn test_concurrent_inserts_claim_slot_once() {
        let table = Table::new(5, 4, "main");
        let store = Arc::new(MemoryStore::with_tables([table.clone()]));

        let mut handles = Vec::new();
        for n in 0..16 {
            let store = store.clone();
            let table_id = table.id;
            handles.push(tokio::spawn(async move {
                store.insert(&reservation(Some(table_id), &format!("C{n}"))).await
            }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(StoreError::SlotConflict { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 1);
        assert_eq!(conflicts, 15);
    }

    #[tokio::test]
    async fn test_provision_updates_same_number_in_place() {
        let store = MemoryStore::new();
        let original = store.provision(Table::new(5, 4, "main")).await.unwrap();
        let updated = store.provision(Table::new(5, 6, "terrace")).await.unwrap();

        assert_eq!(updated.id, original.id);
        let tables = TableRegistry::list(&store).await.unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(store.get_by_number(5).await.unwrap().capacity, 6);
        assert_eq!(tables[0].location, "terrace");
    }

    #[tokio::test]
    async fn test_list_overdue() {
        let store = MemoryStore::new();
        let r = reservation(None, "A");
        store.insert(&r).await.unwrap();

        let before = r.starts_at() - chrono::Duration::minutes(1);
        assert!(store.list_overdue(before).await.unwrap().is_empty());
        assert_eq!(store.list_overdue(r.starts_at()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clearing_maintenance_restores_party_seated_meanwhile() {
        let table = Table::new(5, 4, "main");
        let store = MemoryStore::with_tables([table.clone()]);
        let r = reservation(Some(table.id), "A");
        store.insert(&r).await.unwrap();

        let flagged = store.set_maintenance(table.id, true).await.unwrap();
        assert!(flagged.changed);
        assert_eq!(flagged.table.status, TableStatus::Maintenance);

        store
            .transition(r.id, ReservationStatus::Pending, ReservationStatus::Confirmed, Some(TableEffect::Reserve))
            .await
            .unwrap();
        let seated = store
            .transition(r.id, ReservationStatus::Confirmed, ReservationStatus::Seated, Some(TableEffect::Occupy))
            .await
            .unwrap();
        assert!(seated.tables.is_empty());

        let cleared = store.set_maintenance(table.id, false).await.unwrap();
        assert_eq!(cleared.table.status, TableStatus::Occupied);
        assert_eq!(cleared.table.reservation_id, Some(r.id));

        let again = store.set_maintenance(table.id, false).await.unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn test_clearing_maintenance_ignores_cancelled_occupant() {
        let table = Table::new(5, 4, "main");
        let store = MemoryStore::with_tables([table.clone()]);
        let r = reservation(Some(table.id), "A");
        store.insert(&r).await.unwrap();
        store
            .transition(r.id, ReservationStatus::Pending, ReservationStatus::Confirmed, Some(TableEffect::Reserve))
            .await
            .unwrap();

        let flagged = store.set_maintenance(table.id, true).await.unwrap();
        assert_eq!(flagged.table.reservation_id, Some(r.id));
        store
            .transition(r.id, ReservationStatus::Confirmed, ReservationStatus::Cancelled, Some(TableEffect::Release))
            .await
            .unwrap();

        let cleared = store.set_maintenance(table.id, false).await.unwrap();
        assert_eq!(cleared.table.status, TableStatus::Available);
        assert_eq!(cleared.table.reservation_id, None);
    }

    #[tokio::test]
    async fn test_maintenance_toggles_interleaved_with_transitions_keep_table_consistent() {
        let table = Table::new(5, 4, "main");
        let store = Arc::new(MemoryStore::with_tables([table.clone()]));
        let r = reservation(Some(table.id), "A");
        store.insert(&r).await.unwrap();
        let (table_id, reservation_id) = (table.id, r.id);

        let toggler = {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 0..50 {
                    store.set_maintenance(table_id, round % 2 == 0).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };
        let walker = {
            let store = store.clone();
            tokio::spawn(async move {
                let steps = [
                    (ReservationStatus::Pending, ReservationStatus::Confirmed, TableEffect::Reserve),
                    (ReservationStatus::Confirmed, ReservationStatus::Seated, TableEffect::Occupy),
                ];
                for (from, to, effect) in steps {
                    tokio::task::yield_now().await;
                    store.transition(reservation_id, from, to, Some(effect)).await.unwrap();
                }
            })
        };
        toggler.await.unwrap();
        walker.await.unwrap();

        let settled = store.set_maintenance(table.id, false).await.unwrap().table;
        assert_eq!(settled.status, TableStatus::Occupied);
        assert_eq!(settled.reservation_id, Some(r.id));
    }
}
