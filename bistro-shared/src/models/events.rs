use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::reservation::{Reservation, ReservationStatus};
use super::table::Table;
use crate::serde_helpers::format_time;

// ============================================================================
// Domain events
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    NewReservation,
    StatusChanged,
    TableUpdated,
}

impl EventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::NewReservation => "new-reservation",
            EventKind::StatusChanged => "status-changed",
            EventKind::TableUpdated => "table-updated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EventPayload {
    Reservation(Reservation),
    Table(Table),
}

/// Transient state-change notice fanned out to live clients. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub kind: EventKind,
    pub payload: EventPayload,
    /// Set for status changes only
    pub previous_status: Option<ReservationStatus>,
    pub emitted_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new_reservation(reservation: Reservation) -> Self {
        Self {
            kind: EventKind::NewReservation,
            payload: EventPayload::Reservation(reservation),
            previous_status: None,
            emitted_at: Utc::now(),
        }
    }

    pub fn status_changed(reservation: Reservation, previous: ReservationStatus) -> Self {
        Self {
            kind: EventKind::StatusChanged,
            payload: EventPayload::Reservation(reservation),
            previous_status: Some(previous),
            emitted_at: Utc::now(),
        }
    }

    pub fn table_updated(table: Table) -> Self {
        Self {
            kind: EventKind::TableUpdated,
            payload: EventPayload::Table(table),
            previous_status: None,
            emitted_at: Utc::now(),
        }
    }
}

// ============================================================================
// Live channel envelope
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeType {
    /// Human-readable notice plus the affected entity
    Notification,
    /// A resource category changed and should be refetched
    Update,
    /// Recompute dashboard stats
    Refresh,
}

/// Wire frame for every message on the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn connected(subscriber_id: u64) -> Self {
        Self {
            kind: EnvelopeType::Notification,
            data: json!({
                "event": "connected",
                "title": "Connected",
                "message": "Connection established",
                "subscriberId": subscriber_id,
            }),
            timestamp: Utc::now(),
        }
    }

    pub fn refresh(reason: &str) -> Self {
        Self {
            kind: EnvelopeType::Refresh,
            data: json!({ "reason": reason }),
            timestamp: Utc::now(),
        }
    }
}

impl From<&NotificationEvent> for Envelope {
    fn from(event: &NotificationEvent) -> Self {
        let event_name = event.kind.as_str();
        let (kind, data) = match (&event.payload, event.kind) {
            (EventPayload::Reservation(r), EventKind::NewReservation) => (
                EnvelopeType::Notification,
                json!({
                    "event": event_name,
                    "title": "New reservation",
                    "message": format!(
                        "{}, party of {} on {} at {}",
                        r.customer_name,
                        r.party_size,
                        r.date,
                        format_time(&r.time)
                    ),
                    "reservation": r,
                }),
            ),
            (EventPayload::Reservation(r), _) => {
                let message = match event.previous_status {
                    Some(previous) => format!(
                        "{} moved from {} to {}",
                        r.confirmation_code, previous, r.status
                    ),
                    None => format!("{} is now {}", r.confirmation_code, r.status),
                };
                (
                    EnvelopeType::Notification,
                    json!({
                        "event": event_name,
                        "title": format!("Reservation {}", r.status),
                        "message": message,
                        "reservation": r,
                    }),
                )
            }
            (EventPayload::Table(t), _) => (
                EnvelopeType::Update,
                json!({
                    "event": event_name,
                    "resource": "tables",
                    "table": t,
                }),
            ),
        };

        Self {
            kind,
            data,
            timestamp: event.emitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::Table;

    #[test]
    fn test_table_event_becomes_update_envelope() {
        let table = Table::new(5, 4, "window");
        let event = NotificationEvent::table_updated(table.clone());
        let envelope = Envelope::from(&event);

        assert_eq!(envelope.kind, EnvelopeType::Update);
        assert_eq!(envelope.data["resource"], "tables");
        assert_eq!(envelope.data["table"]["number"], 5);
        assert_eq!(envelope.timestamp, event.emitted_at);

        let wire = serde_json::to_value(&envelope).unwrap();
        assert_eq!(wire["type"], "update");
        assert!(wire["timestamp"].is_string());
    }

    #[test]
    fn test_refresh_envelope() {
        let wire = serde_json::to_value(Envelope::refresh("no-show sweep")).unwrap();
        assert_eq!(wire["type"], "refresh");
        assert_eq!(wire["data"]["reason"], "no-show sweep");
    }
}
