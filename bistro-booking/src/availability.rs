use std::collections::HashSet;
use std::sync::Arc;

use bistro_core::{ReservationStore, TableRegistry};
use bistro_shared::serde_helpers::hh_mm_vec;
use bistro_shared::Table;
use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{BookingError, BookingResult};

pub const DEFAULT_OFFSETS_MINUTES: [i64; 6] = [-30, 30, -60, 60, -90, 90];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    /// Nearby times with a free table, closest first. Empty when the
    /// requested time itself is available.
    #[serde(with = "hh_mm_vec")]
    pub suggested_times: Vec<NaiveTime>,
}

/// Read-only slot search over the table registry and active reservations.
pub struct AvailabilityChecker {
    reservations: Arc<dyn ReservationStore>,
    tables: Arc<dyn TableRegistry>,
    offsets: Vec<Duration>,
}

impl AvailabilityChecker {
    pub fn new(reservations: Arc<dyn ReservationStore>, tables: Arc<dyn TableRegistry>) -> Self {
        Self {
            reservations,
            tables,
            offsets: probe_order(&DEFAULT_OFFSETS_MINUTES),
        }
    }

    pub fn with_offsets(mut self, minutes: &[i64]) -> Self {
        self.offsets = probe_order(minutes);
        self
    }

    pub async fn find_available(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u32,
    ) -> BookingResult<Availability> {
        if party_size == 0 {
            return Err(BookingError::validation("partySize", "must be at least 1"));
        }

        let eligible: Vec<Table> = self
            .tables
            .list()
            .await?
            .into_iter()
            .filter(|t| !t.is_under_maintenance() && t.can_seat(party_size))
            .collect();

        if eligible.is_empty() {
            debug!(party_size, "No table can seat this party");
            return Ok(Availability {
                available: false,
                suggested_times: Vec::new(),
            });
        }

        if self.has_free_table(&eligible, date, time).await? {
            return Ok(Availability {
                available: true,
                suggested_times: Vec::new(),
            });
        }

        let mut suggested_times = Vec::new();
        for offset in &self.offsets {
            let (candidate, wrapped) = time.overflowing_add_signed(*offset);
            // stay on the requested day
            if wrapped != 0 {
                continue;
            }
            if self.has_free_table(&eligible, date, candidate).await? {
                suggested_times.push(candidate);
            }
        }

        debug!(%date, %time, party_size, suggestions = suggested_times.len(), "Slot fully booked");
        Ok(Availability {
            available: false,
            suggested_times,
        })
    }

    async fn has_free_table(
        &self,
        eligible: &[Table],
        date: NaiveDate,
        time: NaiveTime,
    ) -> BookingResult<bool> {
        let taken: HashSet<Uuid> = self
            .reservations
            .list_active_at(date, time)
            .await?
            .into_iter()
            .filter_map(|r| r.table_id)
            .collect();
        Ok(eligible.iter().any(|t| !taken.contains(&t.id)))
    }
}

/// Closest offsets first, earlier before later on a tie. Zero and
/// duplicates are dropped.
fn probe_order(minutes: &[i64]) -> Vec<Duration> {
    let mut sorted: Vec<i64> = minutes.iter().copied().filter(|m| *m != 0).collect();
    sorted.sort_by_key(|m| (m.abs(), *m));
    sorted.dedup();
    sorted.into_iter().map(Duration::minutes).collect()
}
