//! Connectivity monitoring.
//!
//! Translates raw platform reachability callbacks into a debounced boolean
//! plus a stream of transition events. The debounce window absorbs
//! sub-second flaps so the engine sees one stable transition instead of a
//! burst. No retry or backoff logic lives here — purely an observer.

use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// A debounced connectivity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityEvent {
    CameOnline,
    WentOffline,
}

/// Configuration for the network monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long a reported state must hold before it is published.
    pub debounce: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(800),
        }
    }
}

/// Debounces platform reachability signals into a stable state.
///
/// The platform glue calls [`report`](Self::report) from its reachability
/// callback; everything downstream consumes [`watch`](Self::watch) or
/// [`events`](Self::events). Must be created inside a tokio runtime.
pub struct NetworkMonitor {
    raw: watch::Sender<bool>,
    state: watch::Receiver<bool>,
    events: broadcast::Sender<ConnectivityEvent>,
    task: JoinHandle<()>,
}

impl NetworkMonitor {
    /// Creates a monitor starting in the disconnected state.
    pub fn new(config: MonitorConfig) -> Self {
        let (raw, mut raw_rx) = watch::channel(false);
        let (state_tx, state) = watch::channel(false);
        let (events, _) = broadcast::channel(16);

        let events_tx = events.clone();
        let debounce = config.debounce;
        let task = tokio::spawn(async move {
            let mut published = false;
            loop {
                if raw_rx.changed().await.is_err() {
                    break;
                }
                // Restart the window on every flap until the signal holds.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(debounce) => break,
                        changed = raw_rx.changed() => {
                            if changed.is_err() {
                                return;
                            }
                        }
                    }
                }
                let current = *raw_rx.borrow_and_update();
                if current != published {
                    published = current;
                    debug!("connectivity settled: {}", if current { "online" } else { "offline" });
                    state_tx.send_replace(current);
                    let event = if current {
                        ConnectivityEvent::CameOnline
                    } else {
                        ConnectivityEvent::WentOffline
                    };
                    let _ = events_tx.send(event);
                }
            }
        });

        Self {
            raw,
            state,
            events,
            task,
        }
    }

    /// Feeds a raw reachability signal from the platform.
    /// Repeated identical reports are ignored.
    pub fn report(&self, connected: bool) {
        self.raw.send_if_modified(|current| {
            if *current != connected {
                *current = connected;
                true
            } else {
                false
            }
        });
    }

    /// The current debounced state.
    pub fn is_connected(&self) -> bool {
        *self.state.borrow()
    }

    /// Subscribes to the debounced state.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }

    /// Subscribes to the transition stream.
    pub fn events(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.events.subscribe()
    }
}

impl Drop for NetworkMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
