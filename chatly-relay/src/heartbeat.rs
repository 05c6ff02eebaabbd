//! Missed-ping liveness eviction.

use crate::connection::ConnectionId;
use crate::message::Message;
use crate::registry::ConnectionRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Result of a single heartbeat cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Connections that did not answer the previous ping
    pub evicted: Vec<ConnectionId>,
    /// Connections that were sent a new ping
    pub pinged: usize,
}

/// Periodically pings every registered connection.
///
/// Each cycle first evicts connections still suspect from the previous cycle,
/// then marks the survivors suspect and pings them. A pong clears the mark
/// through [`ConnectionRegistry::mark_alive`]. A peer that stops answering is
/// therefore gone one interval after its first missed ping.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ConnectionRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        for connection in self.registry.all() {
            if !connection.take_alive() {
                // closed first so no fanout can queue to it once it leaves the registry
                connection.terminate();
                self.registry.unregister(connection.id);
                tracing::info!(
                    connection_id = %connection.id,
                    room = connection.room().unwrap_or("-"),
                    "Evicted unresponsive connection"
                );
                report.evicted.push(connection.id);
                continue;
            }

            // a failed ping leaves the connection suspect, which the next cycle handles
            if let Err(e) = connection.send(Message::ping(Vec::new())) {
                tracing::debug!(
                    connection_id = %connection.id,
                    error = %e,
                    "Failed to queue ping"
                );
            }
            report.pinged += 1;
        }

        report
    }

    /// Run cycles until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::debug!(interval = ?self.interval, "Heartbeat monitor started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep();
                    tracing::trace!(
                        pinged = report.pinged,
                        evicted = report.evicted.len(),
                        "Heartbeat cycle"
                    );
                }
                _ = shutdown.wait_for(|stop| *stop) => break,
            }
        }
        tracing::info!("Heartbeat monitor stopped");
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
