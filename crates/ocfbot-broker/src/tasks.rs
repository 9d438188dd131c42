//! Task client: publishes task messages and reads their results.
//!
//! Messages follow task protocol 2 with a JSON body (`[args, kwargs,
//! embed]`), pushed onto the worker queue on the broker. Results are read from
//! the backend, where workers store them as JSON under
//! `celery-task-meta-<task id>`.

use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::BrokerError;
use crate::kombu::{DeliveryInfo, Envelope, Properties};
use crate::link::BrokerLink;

/// Queue the account workers consume.
pub const DEFAULT_QUEUE: &str = "celery";
/// Prefix of result keys on the backend.
pub const RESULT_KEY_PREFIX: &str = "celery-task-meta-";

/// Task states as stored by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Pending,
    Received,
    Started,
    Retry,
    Success,
    Failure,
    Revoked,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// Whether the task has finished, successfully or not.
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }
}

/// A stored task result.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskResult {
    pub status: TaskState,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub traceback: Option<String>,
}

/// A lazily (re)established, shared connection.
///
/// The lock only guards the slot; commands run on a clone of the connection
/// so a stalled reply never blocks other callers.
struct Link {
    link: BrokerLink,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl Link {
    fn new(link: BrokerLink) -> Self {
        Self {
            link,
            conn: Mutex::new(None),
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.link.connect().await?;
        *slot = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command, reconnecting first if the previous connection broke.
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> Result<T, BrokerError> {
        let mut conn = self.connection().await?;
        let result = self.link.query(&mut conn, cmd).await;
        if let Err(e) = &result {
            if !e.connection_reusable() {
                debug!(error = %e, broker = %self.link.address(), "Dropping broken connection");
                self.conn.lock().await.take();
            }
        }
        result
    }
}

/// Publishes tasks to the broker and reads results from the backend.
pub struct TaskClient {
    broker: Link,
    backend: Link,
    queue: String,
    result_poll: Duration,
}

impl TaskClient {
    pub fn new(broker: BrokerLink, backend: BrokerLink) -> Self {
        Self {
            broker: Link::new(broker),
            backend: Link::new(backend),
            queue: DEFAULT_QUEUE.to_string(),
            result_poll: Duration::from_millis(100),
        }
    }

    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    #[must_use]
    pub const fn with_result_poll(mut self, interval: Duration) -> Self {
        self.result_poll = interval;
        self
    }

    /// Publish a task and return its id. Does not wait for the task to run.
    pub async fn send_task(&self, name: &str, args: Vec<Value>) -> Result<String, BrokerError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let message = task_message(&task_id, name, args, &self.queue)?;
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(&self.queue).arg(message);
        self.broker.query::<()>(&cmd).await?;
        info!(task = name, task_id = %task_id, queue = %self.queue, "Published task");
        Ok(task_id)
    }

    /// The stored result of a task, if the backend has one yet.
    pub async fn result(&self, task_id: &str) -> Result<Option<TaskResult>, BrokerError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(format!("{RESULT_KEY_PREFIX}{task_id}"));
        let raw: Option<Vec<u8>> = self.backend.query(&cmd).await?;
        raw.map(|raw| serde_json::from_slice(&raw).map_err(BrokerError::from))
            .transpose()
    }

    /// Poll the backend until the task has finished.
    ///
    /// Unbounded: callers impose their own deadline.
    pub async fn wait_result(&self, task_id: &str) -> Result<TaskResult, BrokerError> {
        loop {
            if let Some(result) = self.result(task_id).await? {
                if result.status.is_ready() {
                    return Ok(result);
                }
            }
            tokio::time::sleep(self.result_poll).await;
        }
    }
}

/// Build the envelope for a task message.
pub fn task_message(
    task_id: &str,
    name: &str,
    args: Vec<Value>,
    queue: &str,
) -> Result<Vec<u8>, BrokerError> {
    let argsrepr = Value::Array(args.clone()).to_string();
    let body = json!([
        args,
        {},
        {"callbacks": null, "errbacks": null, "chain": null, "chord": null},
    ]);
    let headers = json!({
        "lang": "py",
        "task": name,
        "id": task_id,
        "shadow": null,
        "eta": null,
        "expires": null,
        "group": null,
        "group_index": null,
        "retries": 0,
        "timelimit": [null, null],
        "root_id": task_id,
        "parent_id": null,
        "argsrepr": argsrepr,
        "kwargsrepr": "{}",
        "origin": "ocfbot",
        "ignore_result": false,
    });
    let properties = Properties {
        correlation_id: Some(task_id.to_string()),
        reply_to: Some(String::new()),
        delivery_mode: Some(2),
        delivery_info: Some(DeliveryInfo {
            exchange: String::new(),
            routing_key: queue.to_string(),
        }),
        priority: Some(0),
        delivery_tag: Some(uuid::Uuid::new_v4().to_string()),
        ..Properties::default()
    };
    Envelope::json(&body, headers, properties)?.to_vec()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn task_message_layout() {
        let raw = task_message(
            "1f0c",
            "ocflib.account.submission.approve_request",
            vec![json!("alice")],
            "celery",
        )
        .unwrap();
        let envelope = Envelope::from_slice(&raw).unwrap();

        assert_eq!(envelope.headers["task"], "ocflib.account.submission.approve_request");
        assert_eq!(envelope.headers["id"], "1f0c");
        assert_eq!(envelope.headers["argsrepr"], r#"["alice"]"#);
        assert_eq!(envelope.properties.correlation_id.as_deref(), Some("1f0c"));
        assert_eq!(
            envelope.properties.delivery_info.as_ref().unwrap().routing_key,
            "celery"
        );

        let body: Value = serde_json::from_slice(&envelope.decode_body().unwrap()).unwrap();
        assert_eq!(body[0], json!(["alice"]));
        assert_eq!(body[1], json!({}));
    }

    #[test]
    fn result_states() {
        let done: TaskResult =
            serde_json::from_str(r#"{"status": "SUCCESS", "result": ["alice"], "task_id": "x"}"#)
                .unwrap();
        assert!(done.status.is_ready());
        assert_eq!(done.result, json!(["alice"]));

        let started: TaskResult = serde_json::from_str(r#"{"status": "STARTED"}"#).unwrap();
        assert!(!started.status.is_ready());

        let odd: TaskResult = serde_json::from_str(r#"{"status": "PROGRESS"}"#).unwrap();
        assert_eq!(odd.status, TaskState::Unknown);
    }
}
