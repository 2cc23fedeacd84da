use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bistro_shared::{Envelope, NotificationEvent};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Gap between liveness probes. A subscriber that has not answered the
    /// previous probe when the next one fires is dropped.
    pub probe_interval: Duration,
    /// Per-subscriber queue depth
    pub buffer: usize,
}

impl BrokerConfig {
    pub fn new(probe_interval: Duration, buffer: usize) -> Self {
        Self {
            probe_interval,
            buffer: buffer.max(1),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 256)
    }
}

// ============================================================================
// Subscriber side
// ============================================================================

/// What the broker pushes down a subscriber's queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(Envelope),
    /// Liveness probe; the transport answers via [`NotificationBroker::acknowledge`]
    Probe,
}

/// Receiving end handed to a connection.
#[derive(Debug)]
pub struct SubscriberHandle {
    pub id: u64,
    rx: mpsc::Receiver<Outbound>,
}

impl SubscriberHandle {
    /// Next outbound item, or `None` once the broker dropped this subscriber.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("subscriber {0} is gone")]
    Closed(u64),
    #[error("subscriber {0} is not keeping up")]
    Lagging(u64),
}

struct Subscriber {
    tx: mpsc::Sender<Outbound>,
    awaiting_ack: bool,
}

impl Subscriber {
    fn deliver(&self, id: u64, item: Outbound) -> Result<(), DeliveryFailure> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed(id),
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::Lagging(id),
        })
    }
}

// ============================================================================
// Broker
// ============================================================================

/// Registry of live subscribers and fan-out point for domain events.
///
/// All deliveries happen under the registry lock, so every subscriber sees
/// events in publication order.
pub struct NotificationBroker {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
    config: BrokerConfig,
    shutdown: CancellationToken,
}

impl NotificationBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Registers a subscriber and queues the connection confirmation.
    ///
    /// After shutdown the returned handle is already closed.
    pub async fn connect(&self) -> SubscriberHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.buffer);
        let mut subscribers = self.subscribers.lock().await;

        if self.shutdown.is_cancelled() {
            debug!(subscriber = id, "Broker shut down, refusing subscriber");
            return SubscriberHandle { id, rx };
        }

        let subscriber = Subscriber {
            tx,
            awaiting_ack: false,
        };
        if let Err(e) = subscriber.deliver(id, Outbound::Message(Envelope::connected(id))) {
            warn!(error = %e, "Delivery failed on connect");
            return SubscriberHandle { id, rx };
        }

        subscribers.insert(id, subscriber);
        info!(subscriber = id, total = subscribers.len(), "Subscriber connected");

        SubscriberHandle { id, rx }
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub async fn disconnect(&self, id: u64) {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.remove(&id).is_some() {
            info!(subscriber = id, total = subscribers.len(), "Subscriber disconnected");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }

    /// Fans an event out to every current subscriber.
    pub async fn publish(&self, event: &NotificationEvent) {
        self.fan_out(Envelope::from(event)).await;
    }

    /// Asks every dashboard to recompute its derived figures.
    pub async fn broadcast_refresh(&self, reason: &str) {
        self.fan_out(Envelope::refresh(reason)).await;
    }

    async fn fan_out(&self, envelope: Envelope) {
        let mut subscribers = self.subscribers.lock().await;
        let mut failed = Vec::new();

        for (id, subscriber) in subscribers.iter() {
            if let Err(e) = subscriber.deliver(*id, Outbound::Message(envelope.clone())) {
                warn!(error = %e, "Delivery failed, dropping subscriber");
                failed.push(*id);
            }
        }

        for id in failed {
            subscribers.remove(&id);
        }

        debug!(kind = ?envelope.kind, recipients = subscribers.len(), "Envelope fanned out");
    }

    /// Records a probe answer. Returns false for unknown subscribers.
    pub async fn acknowledge(&self, id: u64) -> bool {
        match self.subscribers.lock().await.get_mut(&id) {
            Some(subscriber) => {
                subscriber.awaiting_ack = false;
                true
            }
            None => false,
        }
    }

    /// One liveness round. Subscribers still owing an answer from the
    /// previous round are dropped; everyone else gets a fresh probe.
    /// Returns how many were dropped.
    pub async fn probe(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        let mut dropped = Vec::new();

        for (id, subscriber) in subscribers.iter_mut() {
            if subscriber.awaiting_ack {
                warn!(subscriber = *id, "Subscriber missed probe, dropping");
                dropped.push(*id);
                continue;
            }
            match subscriber.deliver(*id, Outbound::Probe) {
                Ok(()) => subscriber.awaiting_ack = true,
                Err(e) => {
                    warn!(error = %e, "Probe delivery failed, dropping subscriber");
                    dropped.push(*id);
                }
            }
        }

        for id in &dropped {
            subscribers.remove(id);
        }
        dropped.len()
    }

    /// Runs [`probe`](Self::probe) every `probe_interval` until shutdown.
    pub fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let broker = Arc::clone(self);
        let period = broker.config.probe_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = period.as_secs(), "Heartbeat started");

            loop {
                tokio::select! {
                    _ = broker.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let dropped = broker.probe().await;
                        if dropped > 0 {
                            info!(dropped, "Heartbeat pruned subscribers");
                        }
                    }
                }
            }

            debug!("Heartbeat stopped");
        })
    }

    /// Stops the heartbeat and closes every subscriber queue.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut subscribers = self.subscribers.lock().await;
        let closed = subscribers.len();
        subscribers.clear();
        info!(closed, "Notification broker shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Default for NotificationBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
