//! Telemetry fan-out.
//!
//! One ticker snapshots the bike once per second, encodes both notification
//! payloads, and pushes them to every subscriber over a small bounded
//! channel. A subscriber that can't keep up loses frames rather than
//! slowing the tick; two consecutive misses and it is dropped entirely.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use crate::bike::SharedState;

/// Queue depth per subscriber. Telemetry is a stream of current values, so
/// holding more than a few seconds of backlog has no value.
const QUEUE_DEPTH: usize = 4;
/// Consecutive failed pushes before a subscriber is unsubscribed.
const MAX_STRIKES: u8 = 2;

/// One tick's worth of encoded notification payloads.
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    pub indoor_bike_data: Vec<u8>,
    pub power_measurement: Vec<u8>,
}

struct Subscriber {
    label: String,
    tx: mpsc::Sender<TelemetryFrame>,
    strikes: u8,
}

/// Cloneable handle; all clones feed the same subscriber list.
#[derive(Clone)]
pub struct Publisher {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a subscriber and return its frame stream. The label only
    /// appears in logs.
    pub async fn subscribe(&self, label: &str) -> mpsc::Receiver<TelemetryFrame> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        info!("telemetry subscriber added: {label}");
        self.subscribers.lock().await.push(Subscriber {
            label: label.to_string(),
            tx,
            strikes: 0,
        });
        rx
    }

    /// Push a frame to every subscriber without blocking the tick.
    pub async fn publish(&self, frame: &TelemetryFrame) {
        let mut subs = self.subscribers.lock().await;
        subs.retain_mut(|sub| match sub.tx.try_send(frame.clone()) {
            Ok(()) => {
                sub.strikes = 0;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                sub.strikes += 1;
                if sub.strikes >= MAX_STRIKES {
                    warn!(
                        "telemetry subscriber {} missed {} pushes, dropping",
                        sub.label, sub.strikes
                    );
                    false
                } else {
                    debug!("telemetry subscriber {} queue full", sub.label);
                    true
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                info!("telemetry subscriber {} went away", sub.label);
                false
            }
        });
    }

    #[cfg(test)]
    async fn subscriber_count(&self) -> usize {
        self.subscribers.lock().await.len()
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot-encode-publish loop. Runs until the process exits.
pub async fn run(publisher: Publisher, state: SharedState, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let snapshot = state.lock().await.snapshot();
        let frame = TelemetryFrame {
            indoor_bike_data: snapshot.encode_indoor_bike_data(),
            power_measurement: snapshot.encode_power_measurement(),
        };
        publisher.publish(&frame).await;
    }
}
