//! Account request commands: `approve`, `reject`, `list`.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{error, info, warn};

use ocfbot_broker::{
    BrokerError, BrokerLink, CertVerification, ConnectOptions, TaskClient, TaskResult, TaskState,
};
use ocfbot_core::config::CeleryConfig;

use super::{CommandEntry, Invocation, Reply};
use crate::context::BotContext;

pub const APPROVE_TASK: &str = "ocflib.account.submission.approve_request";
pub const REJECT_TASK: &str = "ocflib.account.submission.reject_request";
pub const PENDING_TASK: &str = "ocflib.account.submission.get_pending_requests";

/// Errors from the request queue.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The task could not be handed to the broker.
    #[error("Failed to submit task: {0}")]
    Submit(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The result could not be read.
    #[error("Result backend error: {0}")]
    Backend(String),

    /// The task ran and failed.
    #[error("Task failed: {0}")]
    Task(String),
}

/// The account request workflow, as run by the task-queue workers.
#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Enqueue approval of a pending request. Does not wait for it to run.
    async fn approve(&self, user_name: &str) -> Result<(), RequestError>;

    /// Enqueue rejection of a pending request. Does not wait for it to run.
    async fn reject(&self, user_name: &str) -> Result<(), RequestError>;

    /// The pending requests, one display line each. Waits for the worker.
    async fn pending_requests(&self) -> Result<Vec<String>, RequestError>;
}

/// [`RequestQueue`] backed by the task queue's broker and result backend.
pub struct CeleryRequestQueue {
    client: TaskClient,
}

impl CeleryRequestQueue {
    pub const fn new(client: TaskClient) -> Self {
        Self { client }
    }

    /// Build from configuration: the broker connection validates the server
    /// certificate, the result backend connection does not.
    pub fn from_config(config: &CeleryConfig) -> Result<Self, ocfbot_core::Error> {
        let broker = open_link(
            "celery.broker",
            config.broker()?,
            ConnectOptions::new(
                CertVerification::Verified {
                    ca_certs: config.ca_certs.clone(),
                },
                config.connect_timeout(),
            ),
        )?;
        let backend = open_link(
            "celery.backend",
            config.backend()?,
            ConnectOptions::new(CertVerification::Disabled, config.connect_timeout()),
        )?;
        Ok(Self::new(TaskClient::new(broker, backend)))
    }

    async fn submit(&self, task: &str, user_name: &str) -> Result<(), RequestError> {
        self.client
            .send_task(task, vec![Value::from(user_name)])
            .await
            .map(|_| ())
            .map_err(|e| RequestError::Submit(e.to_string()))
    }
}

/// Open the link configured under `key`, reporting failures as config errors.
pub(crate) fn open_link(
    key: &str,
    url: &SecretString,
    options: ConnectOptions,
) -> Result<BrokerLink, ocfbot_core::Error> {
    BrokerLink::open(url.expose_secret(), options)
        .map_err(|e| ocfbot_core::Error::Config(format!("{key}: {e}")))
}

#[async_trait]
impl RequestQueue for CeleryRequestQueue {
    async fn approve(&self, user_name: &str) -> Result<(), RequestError> {
        self.submit(APPROVE_TASK, user_name).await
    }

    async fn reject(&self, user_name: &str) -> Result<(), RequestError> {
        self.submit(REJECT_TASK, user_name).await
    }

    async fn pending_requests(&self) -> Result<Vec<String>, RequestError> {
        let task_id = self
            .client
            .send_task(PENDING_TASK, Vec::new())
            .await
            .map_err(|e| RequestError::Submit(e.to_string()))?;
        let result = self
            .client
            .wait_result(&task_id)
            .await
            .map_err(|e: BrokerError| RequestError::Backend(e.to_string()))?;
        pending_lines(result)
    }
}

/// Turn a finished `get_pending_requests` result into display lines.
fn pending_lines(result: TaskResult) -> Result<Vec<String>, RequestError> {
    match result.status {
        TaskState::Success => {}
        status => {
            let detail = result
                .traceback
                .unwrap_or_else(|| format!("{status:?}: {}", result.result));
            return Err(RequestError::Task(detail));
        }
    }
    match result.result {
        Value::Null => Ok(Vec::new()),
        Value::Array(requests) => Ok(requests.iter().map(request_line).collect()),
        other => Err(RequestError::Backend(format!(
            "unexpected pending request list {other}"
        ))),
    }
}

fn request_line(request: &Value) -> String {
    match request {
        Value::String(s) => s.clone(),
        Value::Object(fields) => match fields.get("user_name").and_then(Value::as_str) {
            Some(user) => user.to_string(),
            None => request.to_string(),
        },
        other => other.to_string(),
    }
}

pub fn commands() -> Vec<CommandEntry> {
    vec![
        CommandEntry::command("approve", "Approve a pending account.", approve).admin_only(),
        CommandEntry::command("reject", "Reject a pending account.", reject).admin_only(),
        CommandEntry::command("list", "List accounts pending approval.", list_pending)
            .admin_only(),
    ]
}

fn approve<'a>(ctx: &'a BotContext, inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        let Some(user_name) = inv.first_arg() else {
            return vec![Reply::ping("usage: approve <username>")];
        };
        match ctx.requests.approve(user_name).await {
            Ok(()) => {
                info!(user = user_name, by = %inv.nick, "Approved account request");
                vec![Reply::ping(format!(
                    "approved {user_name}, the account is being created"
                ))]
            }
            Err(e) => {
                error!(user = user_name, error = %e, "Failed to enqueue approval");
                vec![enqueue_failed(user_name)]
            }
        }
    })
}

fn reject<'a>(ctx: &'a BotContext, inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        let Some(user_name) = inv.first_arg() else {
            return vec![Reply::ping("usage: reject <username>")];
        };
        match ctx.requests.reject(user_name).await {
            Ok(()) => {
                info!(user = user_name, by = %inv.nick, "Rejected account request");
                vec![Reply::ping(format!(
                    "rejected {user_name}, better luck next time"
                ))]
            }
            Err(e) => {
                error!(user = user_name, error = %e, "Failed to enqueue rejection");
                vec![enqueue_failed(user_name)]
            }
        }
    })
}

fn enqueue_failed(user_name: &str) -> Reply {
    Reply::ping(format!(
        "failed to queue request for {user_name}, try again later"
    ))
}

fn list_pending<'a>(ctx: &'a BotContext, _inv: &'a Invocation) -> BoxFuture<'a, Vec<Reply>> {
    Box::pin(async move {
        let timeout = ctx.config.commands.list_timeout();
        let pending = match tokio::time::timeout(timeout, ctx.requests.pending_requests()).await {
            Err(_) => Err(RequestError::Timeout(timeout)),
            Ok(result) => result,
        };
        match pending {
            Ok(requests) if requests.is_empty() => vec![Reply::ping("no pending requests")],
            Ok(requests) => requests.into_iter().map(Reply::ping).collect(),
            Err(RequestError::Timeout(after)) => {
                warn!(timeout_ms = after.as_millis(), "Timed out loading pending requests");
                vec![Reply::ping("timed out loading list of requests, sorry!")]
            }
            Err(e) => {
                error!(error = %e, "Failed to load pending requests");
                vec![Reply::ping("failed to load list of requests, sorry!")]
            }
        }
    })
}
