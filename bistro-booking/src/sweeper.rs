use std::sync::Arc;
use std::time::Duration;

use bistro_notify::NotificationBroker;
use bistro_shared::ReservationStatus;
use chrono::{Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BookingError, BookingResult};
use crate::service::BookingService;

/// Marks reservations whose start time plus grace has passed without a
/// check-in as `no_show`.
pub struct NoShowSweeper {
    service: Arc<BookingService>,
    broker: Arc<NotificationBroker>,
    grace: chrono::Duration,
}

impl NoShowSweeper {
    pub fn new(
        service: Arc<BookingService>,
        broker: Arc<NotificationBroker>,
        grace_minutes: i64,
    ) -> Self {
        Self {
            service,
            broker,
            grace: chrono::Duration::minutes(grace_minutes.max(0)),
        }
    }

    /// One pass against restaurant-local `now`. Returns how many
    /// reservations were marked.
    pub async fn sweep_once(&self, now: NaiveDateTime) -> BookingResult<usize> {
        let overdue = self.service.overdue(now - self.grace).await?;
        let mut marked = 0;

        for reservation in overdue {
            match self
                .service
                .change_status(reservation.id, ReservationStatus::NoShow)
                .await
            {
                Ok(_) => marked += 1,
                // staff got there first
                Err(BookingError::InvalidTransition { from, .. }) => {
                    debug!(reservation_id = %reservation.id, %from, "Skipping, already moved on");
                }
                Err(e) => {
                    warn!(reservation_id = %reservation.id, error = %e, "Failed to mark no-show");
                }
            }
        }

        if marked > 0 {
            info!(marked, "No-show sweep finished");
            self.broker.broadcast_refresh("no-show sweep").await;
        }
        Ok(marked)
    }

    pub fn spawn(self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = every.as_secs(), "No-show sweeper started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Local::now().naive_local()).await {
                            error!("No-show sweep failed: {}", e);
                        }
                    }
                }
            }

            debug!("No-show sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{booking_request, drain, Fixture};
    use bistro_core::TableRegistry;
    use bistro_notify::Outbound;
    use bistro_shared::{EnvelopeType, TableStatus};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 20)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn test_sweep_marks_only_overdue_reservations() {
        let fx = Fixture::new();
        let table = fx.table(5).await;
        let late = fx.service.create(&booking_request(Some(table.id))).await.unwrap();
        fx.service
            .change_status(late.id, ReservationStatus::Confirmed)
            .await
            .unwrap();

        let mut later = booking_request(None);
        later.time = "21:00".to_string();
        let later = fx.service.create(&later).await.unwrap();

        let broker = fx.broker.clone();
        let service = Arc::new(fx.service);
        let sweeper = NoShowSweeper::new(service.clone(), broker.clone(), 15);

        // still inside the grace window
        assert_eq!(sweeper.sweep_once(at(19, 40)).await.unwrap(), 0);

        let mut handle = broker.connect().await;
        assert_eq!(sweeper.sweep_once(at(19, 46)).await.unwrap(), 1);

        assert_eq!(
            service.get(late.id).await.unwrap().status,
            ReservationStatus::NoShow
        );
        assert_eq!(
            service.get(later.id).await.unwrap().status,
            ReservationStatus::Pending
        );
        assert_eq!(
            fx.store.get_by_number(5).await.unwrap().status,
            TableStatus::Available
        );

        let last = drain(&mut handle).pop();
        match last {
            Some(Outbound::Message(envelope)) => assert_eq!(envelope.kind, EnvelopeType::Refresh),
            other => panic!("expected refresh, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_seated_guests_are_left_alone() {
        let fx = Fixture::new();
        let table = fx.table(5).await;
        let r = fx.service.create(&booking_request(Some(table.id))).await.unwrap();
        for status in [ReservationStatus::Confirmed, ReservationStatus::Seated] {
            fx.service.change_status(r.id, status).await.unwrap();
        }

        let broker = fx.broker.clone();
        let sweeper = NoShowSweeper::new(Arc::new(fx.service), broker, 15);
        assert_eq!(sweeper.sweep_once(at(23, 0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_spawned_sweeper_stops_on_cancel() {
        let fx = Fixture::new();
        let sweeper = NoShowSweeper::new(Arc::new(fx.service), fx.broker.clone(), 15);
        let token = CancellationToken::new();

        let task = sweeper.spawn(Duration::from_millis(10), token.clone());
        token.cancel();
        task.await.unwrap();
    }
}
