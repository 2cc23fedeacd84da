use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::reservation::ParseStatusError;

/// Physical state of a dining table
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Available,
    Reserved,
    Occupied,
    /// Operator override, never cleared by booking logic
    Maintenance,
}

impl TableStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Reserved => "reserved",
            TableStatus::Occupied => "occupied",
            TableStatus::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(TableStatus::Available),
            "reserved" => Ok(TableStatus::Reserved),
            "occupied" => Ok(TableStatus::Occupied),
            "maintenance" => Ok(TableStatus::Maintenance),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: Uuid,
    pub number: u32,
    pub capacity: u32,
    pub location: String,
    pub status: TableStatus,
    /// Active reservation currently holding the table
    pub reservation_id: Option<Uuid>,
}

impl Table {
    pub fn new(number: u32, capacity: u32, location: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            capacity,
            location: location.into(),
            status: TableStatus::Available,
            reservation_id: None,
        }
    }

    pub fn is_under_maintenance(&self) -> bool {
        self.status == TableStatus::Maintenance
    }

    /// Whether a party of this size may be seated here at all.
    pub fn can_seat(&self, party_size: u32) -> bool {
        !self.is_under_maintenance() && self.capacity >= party_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_seat() {
        let mut table = Table::new(5, 4, "terrace");
        assert!(table.can_seat(4));
        assert!(!table.can_seat(5));

        table.status = TableStatus::Maintenance;
        assert!(!table.can_seat(2));
    }
}
