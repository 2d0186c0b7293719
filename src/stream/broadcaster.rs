//! Fan-out of events to registered streaming clients.

use std::sync::{Arc, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::instrument;

use super::registry::{ClientEntry, Owner, StreamClientRegistry};
use crate::events::StreamEvent;

/// Outcome of one broadcast call. Informational only; per-client failures
/// never surface as errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Entries the event was addressed to.
    pub matched: usize,
    /// Entries that accepted the event into their buffer.
    pub delivered: usize,
    /// Entries whose buffer was full; the event was skipped for them.
    pub dropped: usize,
    /// Entries found closed and removed during this call.
    pub pruned: usize,
}

/// Delivers events to some or all registered clients.
///
/// Each call walks the registry once under its write lock, offering the event
/// to every matching client without waiting and pruning clients whose
/// connection has gone away. Holding the lock for the walk serializes
/// broadcasts, so every client observes events in submission order.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    registry: StreamClientRegistry,
}

impl EventBroadcaster {
    #[must_use]
    pub fn new(registry: StreamClientRegistry) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &StreamClientRegistry {
        &self.registry
    }

    /// Deliver `event` to every registered client.
    #[instrument(skip(self, event), fields(kind = %event.kind()))]
    pub fn broadcast_all(&self, event: StreamEvent) -> BroadcastReport {
        self.fan_out(&Arc::new(event), |_| true)
    }

    /// Deliver `event` only to clients scoped to `owner`. No matching clients
    /// is a silent no-op.
    #[instrument(skip(self, owner, event), fields(kind = %event.kind(), owner = %owner))]
    pub fn broadcast_to(&self, owner: &Owner, event: StreamEvent) -> BroadcastReport {
        self.fan_out(&Arc::new(event), |entry| entry.owner.as_ref() == Some(owner))
    }

    fn fan_out<F>(&self, event: &Arc<StreamEvent>, matches: F) -> BroadcastReport
    where
        F: Fn(&ClientEntry) -> bool,
    {
        let mut report = BroadcastReport::default();
        let mut clients = self
            .registry
            .inner
            .clients
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        clients.retain(|id, entry| {
            if !matches(entry) {
                return true;
            }
            report.matched += 1;
            match entry.sink.try_send(Arc::clone(event)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    tracing::warn!(
                        name: "stream.client.lagging",
                        client_id = %id,
                        "Client buffer full, event skipped"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    report.pruned += 1;
                    tracing::info!(
                        name: "stream.client.pruned",
                        client_id = %id,
                        "Dead stream client removed during broadcast"
                    );
                    false
                }
            }
        });
        let total = clients.len();
        drop(clients);

        if report.pruned > 0 {
            super::registry::record_client_gauge(total);
            metrics::counter!("relay_clients_pruned_total").increment(report.pruned as u64);
        }
        metrics::counter!("relay_events_delivered_total").increment(report.delivered as u64);
        if report.dropped > 0 {
            metrics::counter!("relay_events_dropped_total").increment(report.dropped as u64);
        }

        tracing::debug!(
            name: "stream.broadcast",
            matched = report.matched,
            delivered = report.delivered,
            dropped = report.dropped,
            pruned = report.pruned,
            "Event broadcast"
        );
        report
    }
}
