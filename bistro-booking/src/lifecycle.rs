//! Reservation status machine.
//!
//! ```text
//! pending ──> confirmed ──> seated ──> completed
//!    │            │
//!    └─> cancelled / no_show <─┘
//! ```
//!
//! Both tables below match on every status without a wildcard arm, so a new
//! status does not compile until each edge and table effect is decided.

use bistro_core::TableEffect;
use bistro_shared::ReservationStatus;

use crate::error::BookingError;

/// Statuses reachable in one step from `from`.
pub const fn successors(from: ReservationStatus) -> &'static [ReservationStatus] {
    use ReservationStatus::*;
    match from {
        Pending => &[Confirmed, Cancelled, NoShow],
        Confirmed => &[Seated, Cancelled, NoShow],
        Seated => &[Completed],
        Completed | Cancelled | NoShow => &[],
    }
}

/// What entering `to` does to the bound table.
pub const fn table_effect(to: ReservationStatus) -> Option<TableEffect> {
    use ReservationStatus::*;
    match to {
        Pending => None,
        Confirmed => Some(TableEffect::Reserve),
        Seated => Some(TableEffect::Occupy),
        Completed | Cancelled | NoShow => Some(TableEffect::Release),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Already in the requested non-terminal status
    Stay,
    Advance(Option<TableEffect>),
}

/// Decides how a change from `from` to `to` is carried out.
pub fn plan(from: ReservationStatus, to: ReservationStatus) -> Result<Step, BookingError> {
    if from == to && !from.is_terminal() {
        return Ok(Step::Stay);
    }
    if successors(from).contains(&to) {
        return Ok(Step::Advance(table_effect(to)));
    }
    Err(BookingError::InvalidTransition { from, to })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReservationStatus::*;

    const ALLOWED: [(ReservationStatus, ReservationStatus); 7] = [
        (Pending, Confirmed),
        (Pending, Cancelled),
        (Pending, NoShow),
        (Confirmed, Seated),
        (Confirmed, Cancelled),
        (Confirmed, NoShow),
        (Seated, Completed),
    ];

    #[test]
    fn test_every_unlisted_edge_is_rejected() {
        for from in ReservationStatus::ALL {
            for to in ReservationStatus::ALL {
                let outcome = plan(from, to);
                if ALLOWED.contains(&(from, to)) {
                    assert!(matches!(outcome, Ok(Step::Advance(_))), "{from} -> {to}");
                } else if from == to && !from.is_terminal() {
                    assert_eq!(outcome.unwrap(), Step::Stay, "{from} -> {to}");
                } else {
                    assert!(
                        matches!(outcome, Err(BookingError::InvalidTransition { .. })),
                        "{from} -> {to} should be rejected"
                    );
                }
            }
        }
    }

    #[test]
    fn test_terminal_self_loops_are_invalid() {
        for status in [Completed, Cancelled, NoShow] {
            assert!(plan(status, status).is_err());
        }
    }

    #[test]
    fn test_table_effects_follow_the_transition_table() {
        assert_eq!(plan(Pending, Confirmed).unwrap(), Step::Advance(Some(TableEffect::Reserve)));
        assert_eq!(plan(Confirmed, Seated).unwrap(), Step::Advance(Some(TableEffect::Occupy)));
        assert_eq!(plan(Seated, Completed).unwrap(), Step::Advance(Some(TableEffect::Release)));
        assert_eq!(plan(Confirmed, Cancelled).unwrap(), Step::Advance(Some(TableEffect::Release)));
        assert_eq!(plan(Pending, NoShow).unwrap(), Step::Advance(Some(TableEffect::Release)));
    }

    #[test]
    fn test_skipping_confirmation_is_invalid() {
        match plan(Pending, Seated) {
            Err(BookingError::InvalidTransition { from, to }) => {
                assert_eq!(from, Pending);
                assert_eq!(to, Seated);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }
}
