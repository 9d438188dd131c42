//! Event source: subscribes to account events on the broker.
//!
//! [`EventSource::connect`] opens a link and binds the source's queue to the
//! event exchange; [`SourceConnection::receive_stream`] consumes the link and
//! yields events of the requested kinds, in broker order, until the link
//! fails. The stream then yields one [`SourceError::StreamClosed`] and ends.
//! A stream cannot be restarted: connect again to resume.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use redis::aio::MultiplexedConnection;
use tracing::{debug, info, warn};

use ocfbot_core::{Event, EventKind};

use crate::error::BrokerError;
use crate::kombu::{self, Envelope};
use crate::link::BrokerLink;

/// Errors surfaced by an event source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The broker is unreachable, rejected the credentials or refused the
    /// subscription.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The link failed mid-stream.
    #[error("Event stream closed: {0}")]
    StreamClosed(String),
}

impl From<BrokerError> for SourceError {
    fn from(e: BrokerError) -> Self {
        Self::Connection(e.to_string())
    }
}

/// Lazy, unbounded sequence of events from one connection.
pub type EventStream = BoxStream<'static, Result<Event, SourceError>>;

/// Something that can open event links.
#[async_trait]
pub trait EventSource: Send + Sync {
    type Connection: SourceConnection;

    async fn connect(&self) -> Result<Self::Connection, SourceError>;
}

/// A live link that can be turned into an event stream exactly once.
pub trait SourceConnection: Send + 'static {
    fn receive_stream(self, kinds: &[EventKind]) -> EventStream;
}

/// Event source backed by the task queue's Redis broker.
///
/// Events are delivered to a private queue bound to the event exchange, one
/// binding per subscribed kind. The queue name is fixed for the lifetime of
/// the source, so reconnecting re-uses the same queue and events published
/// while disconnected are still delivered.
#[derive(Debug, Clone)]
pub struct BrokerEventSource {
    link: BrokerLink,
    queue: String,
    kinds: Vec<EventKind>,
    poll_interval: Duration,
}

impl BrokerEventSource {
    /// A source subscribed to every account event kind.
    pub fn new(link: BrokerLink, poll_interval: Duration) -> Self {
        Self {
            link,
            queue: format!("{}.{}", kombu::EVENT_EXCHANGE, uuid::Uuid::new_v4()),
            kinds: EventKind::ACCOUNT_EVENTS.to_vec(),
            poll_interval: poll_interval.max(Duration::from_secs(1)),
        }
    }

    /// Restrict the kinds bound on the broker. Streams never yield other kinds.
    #[must_use]
    pub fn with_kinds(mut self, kinds: &[EventKind]) -> Self {
        self.kinds = kinds
            .iter()
            .copied()
            .filter(|k| *k != EventKind::Unknown)
            .collect();
        self
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    fn binding_members(&self) -> impl Iterator<Item = String> + '_ {
        self.kinds
            .iter()
            .filter_map(|k| k.wire_name())
            .map(|routing_key| kombu::binding_member(routing_key, &self.queue))
    }

    /// Bind the queue for every subscribed kind. Re-binding is idempotent.
    async fn bind(&self, conn: &mut MultiplexedConnection) -> Result<(), BrokerError> {
        let key = kombu::binding_key(kombu::EVENT_EXCHANGE);
        for member in self.binding_members() {
            let mut cmd = redis::cmd("SADD");
            cmd.arg(&key).arg(&member);
            self.link.query::<()>(conn, &cmd).await?;
        }
        info!(queue = %self.queue, kinds = self.kinds.len(), "Subscribed to account events");
        Ok(())
    }

    /// Remove this source's bindings and queue from the broker.
    pub async fn unbind(&self) -> Result<(), BrokerError> {
        let mut conn = self.link.connect().await?;
        let key = kombu::binding_key(kombu::EVENT_EXCHANGE);
        for member in self.binding_members() {
            let mut cmd = redis::cmd("SREM");
            cmd.arg(&key).arg(&member);
            self.link.query::<()>(&mut conn, &cmd).await?;
        }
        let mut cmd = redis::cmd("DEL");
        cmd.arg(&self.queue);
        self.link.query::<()>(&mut conn, &cmd).await?;
        info!(queue = %self.queue, "Removed event queue from broker");
        Ok(())
    }
}

#[async_trait]
impl EventSource for BrokerEventSource {
    type Connection = BrokerSourceConnection;

    async fn connect(&self) -> Result<Self::Connection, SourceError> {
        let mut conn = self.link.connect().await?;
        self.bind(&mut conn).await?;
        Ok(BrokerSourceConnection {
            link: self.link.clone(),
            conn,
            queue: self.queue.clone(),
            bound: self.kinds.clone(),
            poll_interval: self.poll_interval,
        })
    }
}

/// A connected, subscribed link to the broker's event exchange.
pub struct BrokerSourceConnection {
    link: BrokerLink,
    conn: MultiplexedConnection,
    queue: String,
    bound: Vec<EventKind>,
    poll_interval: Duration,
}

impl BrokerSourceConnection {
    /// Block until a message arrives or the poll interval passes.
    async fn pop(&mut self) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut cmd = redis::cmd("BRPOP");
        cmd.arg(&self.queue).arg(self.poll_interval.as_secs());
        let deadline = self.poll_interval + self.link.options().command_timeout;
        let reply: Option<(String, Vec<u8>)> =
            self.link.query_within(&mut self.conn, &cmd, deadline).await?;
        Ok(reply.map(|(_, payload)| payload))
    }
}

impl SourceConnection for BrokerSourceConnection {
    fn receive_stream(mut self, kinds: &[EventKind]) -> EventStream {
        let accepted: HashSet<EventKind> = kinds
            .iter()
            .copied()
            .filter(|k| self.bound.contains(k))
            .collect();

        Box::pin(async_stream::stream! {
            loop {
                match self.pop().await {
                    Ok(None) => {}
                    Ok(Some(raw)) => match decode_event(&raw) {
                        Ok(event) if accepted.contains(&event.kind) => {
                            yield Ok(event);
                        }
                        Ok(event) => {
                            debug!(kind = %event.kind, "Ignoring event of unsubscribed kind");
                        }
                        Err(e) => {
                            warn!(error = %e, "Dropping undecodable event message");
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, queue = %self.queue, "Event stream lost");
                        yield Err(SourceError::StreamClosed(e.to_string()));
                        return;
                    }
                }
            }
        })
    }
}

/// Decode a raw queue message into an event.
pub fn decode_event(raw: &[u8]) -> Result<Event, BrokerError> {
    let envelope = Envelope::from_slice(raw)?;
    let body = envelope.decode_body()?;
    Event::from_json(&body).map_err(|e| BrokerError::Protocol(e.to_string()))
}
