//! ocfbot Broker Client Library
//!
//! Talks to the task-queue broker (a Redis server) the way the account
//! workers expect:
//! - Broker links over the `redis` client, validated or unvalidated TLS
//! - The kombu message envelope
//! - An event subscriber yielding account [`Event`](ocfbot_core::Event)s
//! - A task client that publishes tasks and reads their results

pub mod error;
pub mod kombu;
pub mod link;
pub mod subscriber;
pub mod tasks;
pub mod tls;

pub use error::BrokerError;
pub use link::{BrokerLink, ConnectOptions};
pub use subscriber::{BrokerEventSource, EventSource, EventStream, SourceConnection, SourceError};
pub use tasks::{TaskClient, TaskResult, TaskState};
pub use tls::CertVerification;
