//! The relay loop: broker events in, chat messages out.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio_stream::StreamExt;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

use ocfbot_broker::{EventSource, SourceConnection};
use ocfbot_core::{Event, EventKind, Formatter};

use super::config::ReconnectPolicy;
use super::error::RelayError;
use crate::readiness::ReadinessGate;
use crate::sink::OutputSink;

/// Where the controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    WaitingForReadiness,
    Connecting,
    Streaming,
    Stopped,
    Failed,
}

/// Counters kept across the controller's lifetime.
#[derive(Debug, Default)]
pub struct RelayStats {
    connections: AtomicU64,
    stream_closures: AtomicU64,
    events_relayed: AtomicU64,
    events_dropped: AtomicU64,
}

impl RelayStats {
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn stream_closures(&self) -> u64 {
        self.stream_closures.load(Ordering::Relaxed)
    }

    pub fn events_relayed(&self) -> u64 {
        self.events_relayed.load(Ordering::Relaxed)
    }

    /// Events that formatted to nothing.
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }
}

/// How a streaming session ended.
enum SessionEnd {
    Shutdown,
    Closed(String),
}

/// Drives one [`EventSource`] into an [`OutputSink`].
///
/// Waits for the chat connection to be ready, connects, and relays events
/// strictly one at a time. A lost stream is retried with exponential
/// backoff; a failed connect ends the run with [`RelayError::Connection`]
/// and is left to the supervisor.
pub struct RelayController<S> {
    source: S,
    formatter: Formatter,
    sink: OutputSink,
    readiness: ReadinessGate,
    reconnect: ReconnectPolicy,
    kinds: Vec<EventKind>,
    stats: RelayStats,
    state: watch::Sender<RelayState>,
}

impl<S: EventSource> RelayController<S> {
    pub fn new(source: S, formatter: Formatter, sink: OutputSink, readiness: ReadinessGate) -> Self {
        let (state, _rx) = watch::channel(RelayState::WaitingForReadiness);
        Self {
            source,
            formatter,
            sink,
            readiness,
            reconnect: ReconnectPolicy::default(),
            kinds: EventKind::ACCOUNT_EVENTS.to_vec(),
            stats: RelayStats::default(),
            state,
        }
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub const fn source(&self) -> &S {
        &self.source
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    pub const fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: RelayState) {
        self.state.send_replace(state);
    }

    /// Run until shutdown or a terminal error.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RelayError> {
        self.set_state(RelayState::WaitingForReadiness);
        tokio::select! {
            () = self.readiness.wait_ready() => {}
            _ = shutdown.changed() => {
                info!("Relay shutting down before chat was ready");
                self.set_state(RelayState::Stopped);
                return Ok(());
            }
        }

        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                info!("Relay shutting down");
                self.set_state(RelayState::Stopped);
                return Ok(());
            }

            self.set_state(RelayState::Connecting);
            let connected = tokio::select! {
                result = self.source.connect() => result,
                _ = shutdown.changed() => {
                    info!("Relay shutting down while connecting");
                    self.set_state(RelayState::Stopped);
                    return Ok(());
                }
            };
            let conn = match connected {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "Failed to connect to event source");
                    self.set_state(RelayState::Failed);
                    return Err(RelayError::Connection(e.to_string()));
                }
            };
            self.stats.connections.fetch_add(1, Ordering::Relaxed);
            info!(attempt, "Connected to event source");

            let started = Instant::now();
            self.set_state(RelayState::Streaming);
            let reason = match self.stream(conn, &mut shutdown).await {
                SessionEnd::Shutdown => {
                    info!("Relay shutting down");
                    self.set_state(RelayState::Stopped);
                    return Ok(());
                }
                SessionEnd::Closed(reason) => reason,
            };
            self.stats.stream_closures.fetch_add(1, Ordering::Relaxed);

            if started.elapsed() > self.reconnect.reset_after {
                attempt = 0;
            }

            if !self.reconnect.should_retry(attempt) {
                error!(reason = %reason, attempt, "Max reconnect attempts reached");
                self.set_state(RelayState::Failed);
                return Err(RelayError::RetriesExhausted {
                    attempts: attempt,
                    reason,
                });
            }

            let delay = self.reconnect.delay_for_attempt(attempt);
            warn!(reason = %reason, attempt, delay_ms = delay.as_millis(), "Event stream lost, reconnecting");

            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("Relay shutting down during reconnect wait");
                    self.set_state(RelayState::Stopped);
                    return Ok(());
                }
            }

            attempt = attempt.saturating_add(1);
        }
    }

    /// Relay events from one connection until it is lost or shutdown is
    /// requested.
    async fn stream(
        &self,
        conn: S::Connection,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut events = conn.receive_stream(&self.kinds);
        loop {
            let item = tokio::select! {
                item = events.next() => item,
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            };
            match item {
                Some(Ok(event)) => self.relay_event(&event).await,
                Some(Err(e)) => return SessionEnd::Closed(e.to_string()),
                None => return SessionEnd::Closed("event stream ended".to_string()),
            }
        }
    }

    async fn relay_event(&self, event: &Event) {
        let Some(message) = self.formatter.format(event) else {
            debug!(kind = %event.kind, "Event has no announcement");
            self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let delivered = self.sink.send(&message).await;
        self.stats.events_relayed.fetch_add(1, Ordering::Relaxed);
        debug!(
            kind = %event.kind,
            user = %event.payload.user_name,
            delivered,
            "Relayed event"
        );
    }
}
